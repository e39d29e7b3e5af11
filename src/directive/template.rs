//! Key templates.
//!
//! A template is literal text with `{field}` placeholders. It is parsed once into
//! segments and rendered against the serialized form of a request.

use serde_json::Value;

use super::DirectiveError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(FieldPath),
}

/// Dotted path into a serialized request, e.g. `author.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldPath {
    raw: String,
    parts: Vec<String>,
}

impl FieldPath {
    fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.parts.iter().try_fold(root, |current, part| match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        })
    }
}

/// A parsed key or region template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parse `source`. `{{` and `}}` stand for literal braces.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err("nested `{` inside placeholder".to_string()),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(format!("unclosed placeholder `{{{name}`"));
                    }
                    let name = name.trim();
                    let parts: Vec<String> = name.split('.').map(str::to_string).collect();
                    if parts.iter().any(String::is_empty) {
                        return Err(format!("empty field name in placeholder `{{{name}}}`"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(FieldPath {
                        raw: name.to_string(),
                        parts,
                    }));
                }
                '}' => return Err("unmatched `}`".to_string()),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Field names referenced by the template, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(path) => Some(path.raw.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.fields().next().is_none()
    }

    /// Substitute every placeholder with the matching field of `fields`.
    pub fn render(&self, fields: &Value, request_type: &'static str) -> Result<String, DirectiveError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(path) => {
                    let value = path.lookup(fields).ok_or_else(|| {
                        DirectiveError::TemplateFieldNotFound {
                            request_type,
                            field: path.raw.clone(),
                        }
                    })?;
                    push_value(&mut rendered, value);
                }
            }
        }
        Ok(rendered)
    }
}

/// Rendering of `null`. Strings starting with it gain one more, so a null
/// field never renders the same as any string.
const NULL_MARKER: char = '~';

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(text) => {
            if text.starts_with(NULL_MARKER) {
                out.push(NULL_MARKER);
            }
            out.push_str(text);
        }
        Value::Null => out.push(NULL_MARKER),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => out.push_str(&number.to_string()),
        // serde_json maps keep keys sorted, so this is stable across calls
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_literals_and_fields() {
        let template = KeyTemplate::parse("user:{id}:posts:{page}").expect("valid template");
        assert_eq!(template.fields().collect::<Vec<_>>(), vec!["id", "page"]);
        assert!(!template.is_literal());
        assert_eq!(template.source(), "user:{id}:posts:{page}");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let template = KeyTemplate::parse("{{raw}}:{id}").expect("valid template");
        let rendered = template.render(&json!({"id": 3}), "Req").expect("renders");
        assert_eq!(rendered, "{raw}:3");
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(KeyTemplate::parse("user:{id").is_err());
        assert!(KeyTemplate::parse("user:id}").is_err());
        assert!(KeyTemplate::parse("user:{}").is_err());
        assert!(KeyTemplate::parse("user:{a..b}").is_err());
        assert!(KeyTemplate::parse("user:{a{b}}").is_err());
    }

    #[test]
    fn renders_scalar_kinds() {
        let template = KeyTemplate::parse("{s}|{n}|{f}|{b}|{z}").expect("valid template");
        let fields = json!({"s": "abc", "n": 42, "f": 1.5, "b": true, "z": null});
        assert_eq!(
            template.render(&fields, "Req").expect("renders"),
            "abc|42|1.5|true|~"
        );
    }

    #[test]
    fn null_never_renders_like_a_string() {
        let template = KeyTemplate::parse("posts:{author}").expect("valid template");
        let render = |author: Value| {
            template
                .render(&json!({ "author": author }), "Req")
                .expect("renders")
        };

        assert_eq!(render(Value::Null), "posts:~");
        assert_eq!(render(json!("null")), "posts:null");
        assert_eq!(render(json!("~")), "posts:~~");
        assert_eq!(render(json!("~~x")), "posts:~~~x");
    }

    #[test]
    fn renders_nested_paths_and_indexes() {
        let template = KeyTemplate::parse("{author.id}/{tags.1}").expect("valid template");
        let fields = json!({"author": {"id": 7}, "tags": ["a", "b"]});
        assert_eq!(template.render(&fields, "Req").expect("renders"), "7/b");
    }

    #[test]
    fn composite_values_render_as_json() {
        let template = KeyTemplate::parse("q:{filter}").expect("valid template");
        let fields = json!({"filter": {"tag": "rust", "month": "2024-01"}});
        assert_eq!(
            template.render(&fields, "Req").expect("renders"),
            r#"q:{"month":"2024-01","tag":"rust"}"#
        );
    }

    #[test]
    fn missing_field_is_reported() {
        let template = KeyTemplate::parse("user:{id}").expect("valid template");
        let err = template
            .render(&json!({"name": "x"}), "GetUser")
            .expect_err("field missing");
        assert_eq!(
            err,
            DirectiveError::TemplateFieldNotFound {
                request_type: "GetUser",
                field: "id".to_string(),
            }
        );
    }

    #[test]
    fn literal_template_ignores_fields() {
        let template = KeyTemplate::parse("settings").expect("valid template");
        assert!(template.is_literal());
        assert_eq!(template.render(&Value::Null, "Req").expect("renders"), "settings");
    }
}
