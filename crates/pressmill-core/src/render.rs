//! Page rendering over a placeholder layout.
//!
//! A layout is a complete HTML document containing `{{NAME}}` placeholders:
//!
//! | Placeholder           | Value                                          |
//! |-----------------------|------------------------------------------------|
//! | `{{ARTICLE_TITLE}}`   | Page title, HTML-escaped                       |
//! | `{{ARTICLE_CONTENT}}` | Article body plus call to action, or post list |
//! | `{{CACHE_BUSTER}}`    | Render time as a Unix timestamp                |
//! | `{{SITE_NAME}}`       | `site.name`, HTML-escaped                      |
//! | `{{SITE_URL}}`        | `site.url`, HTML-escaped                       |
//! | `{{ROOT}}`            | `../` on post pages, empty on the index        |
//!
//! Substitution is a single pass over the layout, so placeholder-like text
//! inside generated content is never expanded. Unknown placeholders are left
//! untouched.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::article::{escape_html, Article};
use crate::config::SiteConfig;
use crate::error::PublishError;
use crate::paths;
use crate::state::PostRecord;

const DEFAULT_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ARTICLE_TITLE}}</title>
  <link rel="stylesheet" href="{{ROOT}}style.css?v={{CACHE_BUSTER}}">
</head>
<body>
  <header class="site-header">
    <a class="site-name" href="{{ROOT}}index.html">{{SITE_NAME}}</a>
  </header>
  <main class="content">
    {{ARTICLE_CONTENT}}
  </main>
  <footer class="site-footer">
    <a href="{{SITE_URL}}">{{SITE_URL}}</a>
  </footer>
</body>
</html>
"#;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{([A-Z_]+)\}\}").unwrap())
}

/// Values for one rendered page. `title` and site fields are raw text;
/// `content` is trusted HTML.
#[derive(Debug, Clone)]
pub struct PageVars<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub root: &'a str,
    pub site: &'a SiteConfig,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Layout {
    source: String,
}

impl Layout {
    pub fn builtin() -> Self {
        Self {
            source: DEFAULT_LAYOUT.to_string(),
        }
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Read the layout at `path`, or fall back to the built-in one.
    pub fn load(path: Option<&Path>) -> Result<Self, PublishError> {
        match path {
            None => Ok(Self::builtin()),
            Some(p) => std::fs::read_to_string(p)
                .map(Self::from_source)
                .map_err(|source| PublishError::Template {
                    path: p.to_path_buf(),
                    source,
                }),
        }
    }

    pub fn render(&self, vars: &PageVars<'_>) -> String {
        placeholder_re()
            .replace_all(&self.source, |caps: &Captures<'_>| match &caps[1] {
                "ARTICLE_TITLE" => escape_html(vars.title),
                "ARTICLE_CONTENT" => vars.content.to_string(),
                "CACHE_BUSTER" => vars.now.timestamp().to_string(),
                "SITE_NAME" => escape_html(&vars.site.name),
                "SITE_URL" => escape_html(&vars.site.url),
                "ROOT" => vars.root.to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Call-to-action paragraph linking to the affiliate URL.
pub fn cta_html(article: &Article) -> String {
    format!(
        r#"<p><a href="{}" class="affiliate-button" target="_blank" rel="noopener noreferrer">{}</a></p>"#,
        escape_html(&article.cta_link),
        escape_html(&article.cta_text)
    )
}

pub fn article_page(
    layout: &Layout,
    article: &Article,
    site: &SiteConfig,
    now: DateTime<Utc>,
) -> String {
    let content = format!("{}{}\n", article.body_html(), cta_html(article));
    layout.render(&PageVars {
        title: &article.title,
        content: &content,
        root: "../",
        site,
        now,
    })
}

/// Post list markup for `records`, in the order given.
pub fn post_list(records: &[&PostRecord]) -> String {
    let mut out = String::from("<ul class=\"post-grid\">\n");
    for record in records {
        out.push_str(&format!(
            "  <li class=\"post-card\"><a href=\"{}\">{}</a></li>\n",
            paths::post_href(&record.slug),
            escape_html(&record.title)
        ));
    }
    out.push_str("</ul>");
    out
}

/// Homepage listing `records`, which the caller has already filtered and
/// ordered.
pub fn index_page(
    layout: &Layout,
    records: &[&PostRecord],
    site: &SiteConfig,
    now: DateTime<Utc>,
) -> String {
    let title = format!("{} - Home", site.name);
    layout.render(&PageVars {
        title: &title,
        content: &post_list(records),
        root: "",
        site,
        now,
    })
}
