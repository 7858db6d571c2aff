mod frontmatter;
mod markdown_text;
mod title;

pub use frontmatter::{parse_document, render_document, ParsedDocument};
pub use markdown_text::{format_preview_text, truncate_preview};
pub use title::derive_title;
