use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value as YamlValue;

/// A Markdown document split into its YAML front-matter and body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Always a JSON object; empty when the document has no front-matter or
    /// the front-matter fails to parse.
    pub frontmatter: JsonValue,
    /// Raw body after the closing front-matter delimiter.
    pub body: String,
}

fn is_frontmatter_delimiter(line: &str) -> bool {
    line.trim() == "---"
}

fn split_frontmatter(source: &str) -> (Option<String>, &str) {
    let trimmed = source
        .trim_start_matches(['\u{FEFF}', '\u{200B}'])
        .trim_start();
    if !trimmed.starts_with("---") {
        return (None, source);
    }

    let mut lines = trimmed.lines();
    let Some(first) = lines.next() else {
        return (None, source);
    };
    if !is_frontmatter_delimiter(first) {
        return (None, source);
    }

    let mut yaml_lines: Vec<&str> = Vec::new();
    let mut consumed = first.len();
    for line in trimmed[first.len()..].split_inclusive('\n') {
        consumed += line.len();
        let line_content = line.trim_end_matches(['\n', '\r']);
        if is_frontmatter_delimiter(line_content) {
            let lead = source.len() - trimmed.len();
            let body = &source[lead + consumed..];
            return (Some(yaml_lines.join("\n")), body);
        }
        yaml_lines.push(line_content);
    }

    (None, source)
}

fn yaml_to_json(value: YamlValue) -> JsonValue {
    match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(v) => JsonValue::Bool(v),
        YamlValue::Number(num) => yaml_number_to_json(num),
        YamlValue::String(v) => JsonValue::String(v),
        YamlValue::Sequence(items) => {
            JsonValue::Array(items.into_iter().map(yaml_to_json).collect())
        }
        YamlValue::Mapping(map) => {
            let mut object = Map::new();
            for (key, val) in map {
                object.insert(yaml_key_to_string(key), yaml_to_json(val));
            }
            JsonValue::Object(object)
        }
        YamlValue::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_number_to_json(num: serde_yaml::Number) -> JsonValue {
    if let Some(value) = num.as_i64() {
        return JsonValue::Number(value.into());
    }
    if let Some(value) = num.as_u64() {
        return JsonValue::Number(value.into());
    }
    if let Some(value) = num.as_f64() {
        if let Some(number) = serde_json::Number::from_f64(value) {
            return JsonValue::Number(number);
        }
    }
    JsonValue::Null
}

fn yaml_key_to_string(value: YamlValue) -> String {
    match value {
        YamlValue::String(v) => v,
        YamlValue::Bool(v) => v.to_string(),
        YamlValue::Number(v) => v.to_string(),
        YamlValue::Null => "null".to_string(),
        other => match serde_yaml::to_string(&other) {
            Ok(s) => s.trim().to_string(),
            Err(_) => "<unserializable-key>".to_string(),
        },
    }
}

fn json_to_yaml(value: &JsonValue) -> YamlValue {
    match value {
        JsonValue::Null => YamlValue::Null,
        JsonValue::Bool(v) => YamlValue::Bool(*v),
        JsonValue::Number(num) => {
            if let Some(v) = num.as_i64() {
                YamlValue::Number(v.into())
            } else if let Some(v) = num.as_u64() {
                YamlValue::Number(v.into())
            } else if let Some(v) = num.as_f64() {
                YamlValue::Number(v.into())
            } else {
                YamlValue::Null
            }
        }
        JsonValue::String(v) => YamlValue::String(v.clone()),
        JsonValue::Array(items) => YamlValue::Sequence(items.iter().map(json_to_yaml).collect()),
        JsonValue::Object(map) => {
            let mut mapping = serde_yaml::Mapping::new();
            for (key, val) in map {
                mapping.insert(YamlValue::String(key.clone()), json_to_yaml(val));
            }
            YamlValue::Mapping(mapping)
        }
    }
}

/// Split a Markdown source into front-matter and body. Unparseable or absent
/// front-matter yields an empty object and the full source as body.
pub fn parse_document(source: &str) -> ParsedDocument {
    let (yaml_source, body) = split_frontmatter(source);

    let Some(yaml_source) = yaml_source else {
        return ParsedDocument {
            frontmatter: JsonValue::Object(Map::new()),
            body: source.to_string(),
        };
    };

    let parsed: YamlValue = match serde_yaml::from_str(&yaml_source) {
        Ok(value) => value,
        Err(_) => {
            return ParsedDocument {
                frontmatter: JsonValue::Object(Map::new()),
                body: body.to_string(),
            };
        }
    };

    let frontmatter = match parsed {
        YamlValue::Mapping(_) => yaml_to_json(parsed),
        _ => JsonValue::Object(Map::new()),
    };

    ParsedDocument {
        frontmatter,
        body: strip_leading_newline(body).to_string(),
    }
}

fn strip_leading_newline(body: &str) -> &str {
    body.strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body)
}

/// Serialize front-matter and body back into a Markdown document. The inverse
/// of [`parse_document`] up to YAML formatting.
pub fn render_document(frontmatter: &JsonValue, body: &str) -> String {
    let is_empty = matches!(frontmatter, JsonValue::Object(map) if map.is_empty());
    if is_empty || frontmatter.is_null() {
        return body.to_string();
    }

    let yaml = match serde_yaml::to_string(&json_to_yaml(frontmatter)) {
        Ok(yaml) => yaml,
        Err(_) => return body.to_string(),
    };

    let mut output = String::with_capacity(yaml.len() + body.len() + 16);
    output.push_str("---\n");
    output.push_str(yaml.trim_end_matches('\n'));
    output.push_str("\n---\n");
    output.push_str(body);
    output
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value as JsonValue};

    use super::{parse_document, render_document};

    #[test]
    fn splits_frontmatter_from_body() {
        let source = "---\ntitle: Hello\ntags:\n  - a\n  - b\n---\nBody text\n";
        let parsed = parse_document(source);

        assert_eq!(parsed.frontmatter["title"], "Hello");
        assert_eq!(parsed.frontmatter["tags"], json!(["a", "b"]));
        assert_eq!(parsed.body, "Body text\n");
    }

    #[test]
    fn missing_frontmatter_yields_empty_object() {
        let parsed = parse_document("# Just a heading\n");

        assert_eq!(parsed.frontmatter, json!({}));
        assert_eq!(parsed.body, "# Just a heading\n");
    }

    #[test]
    fn unterminated_frontmatter_is_treated_as_body() {
        let source = "---\ntitle: open\nBody";
        let parsed = parse_document(source);

        assert_eq!(parsed.frontmatter, json!({}));
        assert_eq!(parsed.body, source);
    }

    #[test]
    fn invalid_yaml_yields_empty_object_and_keeps_body() {
        let source = "---\ntitle: [unterminated\n---\nBody text";
        let parsed = parse_document(source);

        assert_eq!(parsed.frontmatter, json!({}));
        assert_eq!(parsed.body, "Body text");
    }

    #[test]
    fn render_then_parse_round_trips_values() {
        let frontmatter = json!({
            "id": "life.work",
            "title": "Work",
            "half_life_days": 7,
            "tags": ["x", "y"],
        });
        let rendered = render_document(&frontmatter, "note body\n");
        let parsed = parse_document(&rendered);

        assert_eq!(parsed.frontmatter["id"], "life.work");
        assert_eq!(parsed.frontmatter["half_life_days"], 7);
        assert_eq!(parsed.frontmatter["tags"], json!(["x", "y"]));
        assert_eq!(parsed.body, "note body\n");
    }

    #[test]
    fn render_with_empty_frontmatter_emits_bare_body() {
        let rendered = render_document(&JsonValue::Object(Default::default()), "plain\n");
        assert_eq!(rendered, "plain\n");
    }
}
