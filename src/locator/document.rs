use async_trait::async_trait;

use super::CandidateSource;
use crate::error::{LivememoError, Result};

/// An element of a [`StaticDocument`]: tag, attributes, and its full
/// `textContent` (descendant text included, as the browser reports it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
}

impl Element {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            text: text.to_string(),
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    fn attr_value(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attr_value("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }
}

/// A fixed, in-memory page: elements in document order.
///
/// Understands the compound selectors the locator uses: an optional tag,
/// followed by any number of `.class` and `[attr]`, `[attr="v"]`,
/// `[attr*="v"]` or `[attr^="v"]` parts.
#[derive(Debug, Clone, Default)]
pub struct StaticDocument {
    elements: Vec<Element>,
}

impl StaticDocument {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    fn first_match(&self, selector: &str) -> Result<Option<&Element>> {
        let selector = SimpleSelector::parse(selector)?;
        Ok(self.elements.iter().find(|el| selector.matches(el)))
    }
}

#[async_trait]
impl CandidateSource for StaticDocument {
    async fn query_text(&self, selector: &str) -> Result<Option<String>> {
        Ok(self.first_match(selector)?.map(|el| el.text.clone()))
    }

    async fn scan_texts(&self, tags: &[String]) -> Result<Vec<String>> {
        Ok(self
            .elements
            .iter()
            .filter(|el| tags.iter().any(|t| t.eq_ignore_ascii_case(&el.tag)))
            .map(|el| el.text.clone())
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
}

#[derive(Debug, Default)]
struct SimpleSelector {
    tag: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrOp)>,
}

impl SimpleSelector {
    fn parse(input: &str) -> Result<Self> {
        let bad = || LivememoError::Other(format!("Unsupported selector: {}", input));
        let s = input.trim();
        if s.is_empty() {
            return Err(bad());
        }

        let mut selector = SimpleSelector::default();
        let mut rest = s;

        let tag_end = rest.find(['.', '[']).unwrap_or(rest.len());
        if tag_end > 0 {
            let tag = &rest[..tag_end];
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(bad());
            }
            selector.tag = Some(tag.to_ascii_lowercase());
        }
        rest = &rest[tag_end..];

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                if end == 0 {
                    return Err(bad());
                }
                selector.classes.push(after[..end].to_string());
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(bad)?;
                selector.attrs.push(parse_attr(&after[..end]).ok_or_else(bad)?);
                rest = &after[end + 1..];
            } else {
                return Err(bad());
            }
        }

        Ok(selector)
    }

    fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if *tag != el.tag {
                return false;
            }
        }
        if !self.classes.iter().all(|c| el.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, op)| match (el.attr_value(name), op) {
            (None, _) => false,
            (Some(_), AttrOp::Exists) => true,
            (Some(v), AttrOp::Equals(x)) => v == x,
            (Some(v), AttrOp::Contains(x)) => v.contains(x.as_str()),
            (Some(v), AttrOp::Prefix(x)) => v.starts_with(x.as_str()),
        })
    }
}

fn parse_attr(body: &str) -> Option<(String, AttrOp)> {
    let Some(eq) = body.find('=') else {
        let name = body.trim();
        return (!name.is_empty()).then(|| (name.to_string(), AttrOp::Exists));
    };

    let (lhs, value) = (&body[..eq], body[eq + 1..].trim());
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string();

    let (name, op) = if let Some(name) = lhs.strip_suffix('*') {
        (name, AttrOp::Contains(value))
    } else if let Some(name) = lhs.strip_suffix('^') {
        (name, AttrOp::Prefix(value))
    } else {
        (lhs, AttrOp::Equals(value))
    };

    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), op))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> StaticDocument {
        StaticDocument::new(vec![
            Element::new("div", "header"),
            Element::new("span", "01:00:00").attr("data-knife-tooltip", "라이브 시작 2024-01-01"),
            Element::new("span", "02:00:00").class("video_information_count__Y05sI other"),
            Element::new("p", "paragraph"),
        ])
    }

    #[tokio::test]
    async fn attribute_operators_match() {
        let d = doc();
        let contains = d.query_text(r#"span[data-knife-tooltip*="시작"]"#).await.unwrap();
        assert_eq!(contains.as_deref(), Some("01:00:00"));

        let prefix = d.query_text(r#"span[data-knife-tooltip^="라이브"]"#).await.unwrap();
        assert_eq!(prefix.as_deref(), Some("01:00:00"));

        let wrong_prefix = d.query_text(r#"span[data-knife-tooltip^="시작"]"#).await.unwrap();
        assert!(wrong_prefix.is_none());

        let exists = d.query_text("[data-knife-tooltip]").await.unwrap();
        assert_eq!(exists.as_deref(), Some("01:00:00"));
    }

    #[tokio::test]
    async fn class_selector_matches_one_of_many_classes() {
        let text = doc().query_text(".video_information_count__Y05sI").await.unwrap();
        assert_eq!(text.as_deref(), Some("02:00:00"));
    }

    #[tokio::test]
    async fn tag_selector_returns_first_in_document_order() {
        let text = doc().query_text("span").await.unwrap();
        assert_eq!(text.as_deref(), Some("01:00:00"));
    }

    #[tokio::test]
    async fn scan_texts_filters_by_tag_in_order() {
        let tags = vec!["span".to_string(), "p".to_string()];
        let texts = doc().scan_texts(&tags).await.unwrap();
        assert_eq!(texts, vec!["01:00:00", "02:00:00", "paragraph"]);
    }

    #[tokio::test]
    async fn unsupported_selector_is_an_error() {
        assert!(doc().query_text("div > span").await.is_err());
        assert!(doc().query_text("").await.is_err());
        assert!(doc().query_text("span[unterminated").await.is_err());
    }
}
