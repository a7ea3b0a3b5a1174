use crate::error::{PressmillError, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PRESSMILL_DIR: &str = ".pressmill";
pub const CONFIG_FILE: &str = ".pressmill/config.yaml";
pub const STATE_DB: &str = ".pressmill/state.redb";

pub const DEFAULT_OUTPUT_DIR: &str = "public";
pub const POSTS_DIR: &str = "posts";
pub const INDEX_FILE: &str = "index.html";
pub const PAGE_EXT: &str = "html";

/// Slug fragments derived from product names are capped at this length.
pub const MAX_NAME_SLUG_LEN: usize = 50;

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(PRESSMILL_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_db_path(root: &Path) -> PathBuf {
    root.join(STATE_DB)
}

/// Resolve a configured path against the project root. Absolute paths are
/// returned unchanged.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

pub fn posts_dir(output: &Path) -> PathBuf {
    output.join(POSTS_DIR)
}

pub fn post_page_path(output: &Path, slug: &str) -> PathBuf {
    posts_dir(output).join(format!("{slug}.{PAGE_EXT}"))
}

pub fn index_path(output: &Path) -> PathBuf {
    output.join(INDEX_FILE)
}

/// Link to a post page relative to the site root, as used by the index.
pub fn post_href(slug: &str) -> String {
    format!("{POSTS_DIR}/{slug}.{PAGE_EXT}")
}

// ---------------------------------------------------------------------------
// Slugs
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();
static STRIP_RE: OnceLock<Regex> = OnceLock::new();
static DASH_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

fn strip_re() -> &'static Regex {
    STRIP_RE.get_or_init(|| Regex::new(r"[^a-z0-9\s\-_]").unwrap())
}

fn dash_re() -> &'static Regex {
    DASH_RE.get_or_init(|| Regex::new(r"[\s_\-]+").unwrap())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(PressmillError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

/// Turn free text (a product name) into a web-safe slug fragment.
///
/// Punctuation is dropped, runs of whitespace, underscores and hyphens become
/// one hyphen, and the result is capped at [`MAX_NAME_SLUG_LEN`]. Text with
/// no usable characters slugifies to `post`.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = strip_re().replace_all(&lower, "");
    let dashed = dash_re().replace_all(stripped.trim(), "-");
    let capped: String = dashed.chars().take(MAX_NAME_SLUG_LEN).collect();
    let slug = capped.trim_matches('-').to_string();
    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

/// Slug for the post at ledger position `seq`. The zero-padded sequence
/// prefix keeps slugs unique even when the same product repeats.
pub fn post_slug(seq: u64, product_name: &str) -> String {
    format!("{seq:04}-{}", slugify(product_name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
