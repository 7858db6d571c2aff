use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

const BOM: char = '\u{FEFF}';
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Flatten Markdown into a single line of plain text suitable for result
/// previews. Code blocks, block quotes, tables and images are dropped.
pub fn format_preview_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let cleaned = strip_hidden_chars(raw);
    if cleaned.trim().is_empty() {
        return String::new();
    }

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(&cleaned, options);
    let mut output = String::new();
    let mut skip_depth = 0usize;

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::CodeBlock(_) | Tag::BlockQuote(_) | Tag::Table(_) | Tag::Image { .. } => {
                    skip_depth = skip_depth.saturating_add(1);
                }
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::CodeBlock | TagEnd::BlockQuote(_) | TagEnd::Table | TagEnd::Image => {
                    skip_depth = skip_depth.saturating_sub(1);
                }
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item => {
                    if skip_depth == 0 {
                        ensure_space(&mut output);
                    }
                }
                _ => {}
            },
            Event::Text(text) | Event::Code(text) => {
                if skip_depth == 0 {
                    output.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if skip_depth == 0 {
                    ensure_space(&mut output);
                }
            }
            _ => {}
        }
    }

    collapse_whitespace(&output)
}

/// Truncate preview text to at most `max_bytes`, never splitting a character.
pub fn truncate_preview(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    text[..end].to_string()
}

fn strip_hidden_chars(raw: &str) -> String {
    raw.chars()
        .filter(|ch| *ch != BOM && *ch != ZERO_WIDTH_SPACE)
        .collect()
}

fn ensure_space(output: &mut String) {
    if output
        .chars()
        .last()
        .map_or(false, |ch| !ch.is_whitespace())
    {
        output.push(' ');
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{format_preview_text, truncate_preview};

    #[test]
    fn strips_heading_hashes_and_joins_lines() {
        let raw = "# Hello World\nBody text";
        assert_eq!(format_preview_text(raw), "Hello World Body text");
    }

    #[test]
    fn removes_inline_markdown_while_keeping_text() {
        let raw = "**bold** _italic_ `code`";
        assert_eq!(format_preview_text(raw), "bold italic code");
    }

    #[test]
    fn skips_code_blocks_and_quotes() {
        let raw = "Intro\n```\nhidden\n```\n> quoted\nOutro";
        assert_eq!(format_preview_text(raw), "Intro Outro");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "日本語のテキスト";
        let truncated = truncate_preview(text, 7);
        assert_eq!(truncated, "日本");
        assert!(truncated.len() <= 7);
    }

    #[test]
    fn truncation_is_noop_for_short_text() {
        assert_eq!(truncate_preview("short", 500), "short");
    }
}
