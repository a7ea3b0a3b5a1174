//! Generated article model and the parsing that turns provider HTML into it.
//!
//! Providers are asked for a bare HTML fragment: one `<h2>` title followed by
//! `<h3>` subheadings and paragraphs. Models frequently wrap that in a
//! markdown fence or lead with commentary, so [`clean_provider_output`] trims
//! both before [`Article::from_html`] splits the fragment into sections.

use crate::config::Product;
use crate::error::GenerationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// HTML fragment as produced by the provider.
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub sections: Vec<Section>,
    pub cta_text: String,
    pub cta_link: String,
}

static FENCE_RE: OnceLock<Regex> = OnceLock::new();
static H2_RE: OnceLock<Regex> = OnceLock::new();
static H3_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();

fn fence_re() -> &'static Regex {
    FENCE_RE.get_or_init(|| Regex::new(r"(?s)```(?:html)?(.*?)```").unwrap())
}

fn h2_re() -> &'static Regex {
    H2_RE.get_or_init(|| Regex::new(r"(?is)<h2[^>]*>(.*?)</h2\s*>").unwrap())
}

fn h3_re() -> &'static Regex {
    H3_RE.get_or_init(|| Regex::new(r"(?is)<h3[^>]*>(.*?)</h3\s*>").unwrap())
}

fn tag_re() -> &'static Regex {
    TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

/// Strip a markdown code fence and any leading commentary before the first tag.
pub fn clean_provider_output(raw: &str) -> String {
    let mut content = raw.trim();
    if let Some(inner) = fence_re().captures(content).and_then(|c| c.get(1)) {
        content = inner.as_str().trim();
    }
    if let Some(first_tag) = content.find('<') {
        content = &content[first_tag..];
    }
    content.trim().to_string()
}

/// Plain text of an HTML fragment: tags removed, common entities decoded,
/// whitespace collapsed.
pub fn text_of(html: &str) -> String {
    let stripped = tag_re().replace_all(html, " ");
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Call-to-action line pointing at the product's affiliate link.
pub fn call_to_action(product: &Product) -> String {
    format!("Click Here to Learn More About {}!", product.name)
}

impl Article {
    /// Parse a cleaned provider fragment for `product` and validate it.
    ///
    /// Invalid output is reported as a transient failure: a fresh attempt
    /// can plausibly produce a usable article.
    pub fn from_html(html: &str, product: &Product) -> Result<Self, GenerationError> {
        let title_match = h2_re().captures(html).ok_or_else(|| {
            GenerationError::Transient("response has no <h2> title".to_string())
        })?;
        let whole = title_match.get(0).map(|m| m.range()).unwrap_or(0..0);
        let title = text_of(title_match.get(1).map(|m| m.as_str()).unwrap_or(""));

        let mut body = String::with_capacity(html.len());
        body.push_str(&html[..whole.start]);
        body.push_str(&html[whole.end..]);

        let article = Article {
            title,
            sections: split_sections(&body),
            cta_text: call_to_action(product),
            cta_link: product.link.clone(),
        };
        article.validate(product)?;
        Ok(article)
    }

    pub fn validate(&self, product: &Product) -> Result<(), GenerationError> {
        if self.title.trim().is_empty() {
            return Err(GenerationError::Transient("article title is empty".into()));
        }
        if self.body_text().trim().is_empty() {
            return Err(GenerationError::Transient("article body is empty".into()));
        }
        if self.cta_text.trim().is_empty() || self.cta_link != product.link {
            return Err(GenerationError::Transient(format!(
                "call to action does not reference '{}'",
                product.link
            )));
        }
        Ok(())
    }

    /// Body HTML: sections in order, each heading re-emitted as `<h3>`.
    pub fn body_html(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if let Some(heading) = &section.heading {
                out.push_str(&format!("<h3>{}</h3>\n", escape_html(heading)));
            }
            if !section.html.is_empty() {
                out.push_str(&section.html);
                out.push('\n');
            }
        }
        out
    }

    pub fn body_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| text_of(&s.html))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut cursor = 0;
    let mut heading: Option<String> = None;

    for caps in h3_re().captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        push_section(&mut sections, heading.take(), &body[cursor..whole.start()]);
        heading = Some(text_of(caps.get(1).map(|m| m.as_str()).unwrap_or("")));
        cursor = whole.end();
    }
    push_section(&mut sections, heading, &body[cursor..]);
    sections
}

fn push_section(sections: &mut Vec<Section>, heading: Option<String>, html: &str) {
    let html = html.trim();
    let heading = heading.filter(|h| !h.is_empty());
    if heading.is_none() && html.is_empty() {
        return;
    }
    sections.push(Section {
        heading,
        html: html.to_string(),
    });
}

/// Escape text for interpolation into HTML element content or attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desk() -> Product {
        Product {
            name: "Standing Desk".into(),
            link: "https://aff.example/desk".into(),
            description: "Adjustable desk".into(),
        }
    }

    const SAMPLE: &str = "<h2>Why You Need a Standing Desk</h2>\n\
        <p>Sitting all day is rough.</p>\n\
        <h3>Health Benefits</h3>\n\
        <p>Better posture &amp; energy.</p>\n\
        <h3>Buying Tips</h3>\n\
        <p>Check the height range.</p>";

    #[test]
    fn clean_strips_fence_and_commentary() {
        let raw = "Sure! Here is your post:\n```html\n<h2>Title</h2><p>Body</p>\n```\nEnjoy!";
        assert_eq!(clean_provider_output(raw), "<h2>Title</h2><p>Body</p>");

        let raw = "Here is the code: <h2>Title</h2>";
        assert_eq!(clean_provider_output(raw), "<h2>Title</h2>");
    }

    #[test]
    fn parses_title_and_sections() {
        let article = Article::from_html(SAMPLE, &desk()).unwrap();
        assert_eq!(article.title, "Why You Need a Standing Desk");
        assert_eq!(article.sections.len(), 3);
        assert_eq!(article.sections[0].heading, None);
        assert_eq!(article.sections[0].html, "<p>Sitting all day is rough.</p>");
        assert_eq!(article.sections[1].heading.as_deref(), Some("Health Benefits"));
        assert_eq!(article.sections[2].heading.as_deref(), Some("Buying Tips"));
        assert_eq!(article.cta_link, "https://aff.example/desk");
        assert!(article.cta_text.contains("Standing Desk"));
    }

    #[test]
    fn body_html_reemits_headings() {
        let article = Article::from_html(SAMPLE, &desk()).unwrap();
        let body = article.body_html();
        assert!(body.contains("<h3>Health Benefits</h3>"));
        assert!(body.contains("<p>Better posture &amp; energy.</p>"));
        assert!(!body.contains("<h2>"));
    }

    #[test]
    fn missing_title_is_transient() {
        let err = Article::from_html("<p>No title here</p>", &desk()).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn empty_body_is_transient() {
        let err = Article::from_html("<h2>Only a title</h2>", &desk()).unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("body"));
    }

    #[test]
    fn blank_title_is_transient() {
        let err = Article::from_html("<h2>  </h2><p>Body</p>", &desk()).unwrap_err();
        assert!(err.message().contains("title"));
    }

    #[test]
    fn validate_rejects_foreign_link() {
        let mut article = Article::from_html(SAMPLE, &desk()).unwrap();
        article.cta_link = "https://elsewhere.example".into();
        assert!(article.validate(&desk()).is_err());
    }

    #[test]
    fn title_entities_are_decoded() {
        let html = "<h2>Tips &amp; <em>Tricks</em></h2><p>Body</p>";
        let article = Article::from_html(html, &desk()).unwrap();
        assert_eq!(article.title, "Tips & Tricks");
    }

    #[test]
    fn escape_html_escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom's & Co</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom&#39;s &amp; Co&lt;/a&gt;"
        );
    }
}
