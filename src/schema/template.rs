//! Placeholder scanning for prompt templates.
//!
//! A placeholder is `{name}` where `name` contains no braces, quotes, colons or
//! line breaks. Anything else in braces (for example a JSON example in the
//! prompt) is literal text. `{{` and `}}` always produce a literal brace.

/// Which template a placeholder set is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Single,
    Batch,
}

/// Placeholders available in single-record templates besides input columns.
pub const SINGLE_RESERVED: [&str; 2] = ["input_data", "output_fields_description"];
/// Placeholders available in batch templates besides input columns.
pub const BATCH_RESERVED: [&str; 3] = ["batch_data", "output_fields_description", "record_count"];

impl TemplateKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
        }
    }

    pub fn is_reserved(self, name: &str) -> bool {
        match self {
            Self::Single => SINGLE_RESERVED.contains(&name),
            Self::Batch => BATCH_RESERVED.contains(&name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A template split into literal text and placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        while let Some(ch) = rest.chars().next() {
            if rest.starts_with("{{") {
                literal.push('{');
                rest = &rest[2..];
                continue;
            }
            if rest.starts_with("}}") {
                literal.push('}');
                rest = &rest[2..];
                continue;
            }
            if ch == '{' {
                if let Some(name) = placeholder_name(&rest[1..]) {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.trim().to_string()));
                    rest = &rest[name.len() + 2..];
                    continue;
                }
            }
            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every placeholder; the first one `lookup` cannot resolve is
    /// returned as the error.
    pub fn render<F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}

/// Return the raw name between `{` and the closing `}` if it forms a placeholder.
fn placeholder_name(after_open: &str) -> Option<&str> {
    let end = after_open.find(|c: char| matches!(c, '}' | '{' | '"' | ':' | '\n' | '\r'))?;
    if !after_open[end..].starts_with('}') {
        return None;
    }
    let name = &after_open[..end];
    if name.trim().is_empty() {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_placeholders_and_keeps_json_examples_literal() {
        let template = Template::parse(
            "Company: {company_name}\nAnswer like {\"industry\": \"...\"} for {公司}",
        );
        let names: Vec<_> = template.placeholders().collect();
        assert_eq!(names, vec!["company_name", "公司"]);
        let rendered = template
            .render(|name| Some(format!("<{name}>")))
            .expect("render");
        assert_eq!(
            rendered,
            "Company: <company_name>\nAnswer like {\"industry\": \"...\"} for <公司>"
        );
    }

    #[test]
    fn doubled_braces_are_escapes() {
        let template = Template::parse("{{not_a_placeholder}} {x}");
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["x"]);
        let rendered = template.render(|_| Some("1".to_string())).expect("render");
        assert_eq!(rendered, "{not_a_placeholder} 1");
    }

    #[test]
    fn render_reports_unresolved_placeholder() {
        let template = Template::parse("{a} {b}");
        let err = template
            .render(|name| (name == "a").then(|| "ok".to_string()))
            .expect_err("b is unknown");
        assert_eq!(err, "b");
    }

    #[test]
    fn empty_braces_are_literal() {
        let template = Template::parse("{} { }");
        assert_eq!(template.placeholders().count(), 0);
    }
}
