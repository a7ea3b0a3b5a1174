//! Static-site publisher.
//!
//! Output tree:
//!
//! ```text
//! <output>/index.html          post list, rebuilt from the ledger
//! <output>/posts/<slug>.html   one page per published post
//! <output>/...                 assets copied from assets_dir
//! ```
//!
//! Every file is written through [`io::atomic_write`]. A page is always
//! committed before the index that links to it, and removed only after an
//! index without it has been committed, so the homepage never links a missing
//! page.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::article::Article;
use crate::config::{Config, Product, SiteConfig};
use crate::error::{PublishError, Result};
use crate::io;
use crate::paths;
use crate::render::{self, Layout};
use crate::state::PostRecord;
use crate::types::PostStatus;

/// Published records in homepage order: newest first, later ledger position
/// first on equal timestamps.
pub fn index_order<'a>(records: impl IntoIterator<Item = &'a PostRecord>) -> Vec<&'a PostRecord> {
    let mut listed: Vec<&PostRecord> = records.into_iter().filter(|r| r.is_published()).collect();
    listed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.seq.cmp(&a.seq)));
    listed
}

// ---------------------------------------------------------------------------
// ReconcileReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Published posts whose missing page was re-rendered.
    pub restored: Vec<String>,
    /// Files under `posts/` with no published ledger record, now removed.
    pub orphans_removed: Vec<String>,
    /// Published posts with neither a page nor a stored article. They are
    /// left out of the index.
    pub unrecoverable: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.restored.is_empty() && self.orphans_removed.is_empty() && self.unrecoverable.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Publisher {
    output: PathBuf,
    layout: Layout,
    site: SiteConfig,
    assets: Option<PathBuf>,
}

impl Publisher {
    pub fn new(output: PathBuf, layout: Layout, site: SiteConfig, assets: Option<PathBuf>) -> Self {
        Self {
            output,
            layout,
            site,
            assets,
        }
    }

    pub fn from_config(root: &Path, config: &Config) -> std::result::Result<Self, PublishError> {
        let layout = Layout::load(config.template_file(root).as_deref())?;
        Ok(Self::new(
            config.output_dir(root),
            layout,
            config.site.clone(),
            config.assets_source(root),
        ))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn page_path(&self, slug: &str) -> PathBuf {
        paths::post_page_path(&self.output, slug)
    }

    /// Write the page for `article` at ledger position `seq`, then an index
    /// listing `listed` plus the new post. Returns the record for the
    /// scheduler to append; nothing is recorded here.
    ///
    /// If the index cannot be written the new page is removed again.
    pub fn publish(
        &self,
        article: &Article,
        product: &Product,
        seq: u64,
        listed: &[PostRecord],
        now: DateTime<Utc>,
    ) -> std::result::Result<PostRecord, PublishError> {
        self.copy_assets()?;

        let record = PostRecord {
            seq,
            slug: paths::post_slug(seq, &product.name),
            product: product.name.clone(),
            product_link: product.link.clone(),
            title: article.title.clone(),
            timestamp: now,
            status: PostStatus::Published,
            failure: None,
        };

        self.write_page(&record.slug, article, now)?;

        let mut with_new: Vec<PostRecord> = listed.to_vec();
        with_new.push(record.clone());
        if let Err(e) = self.rebuild_index(&with_new, now) {
            warn!(slug = %record.slug, error = %e, "index write failed; removing new page");
            if let Err(rm) = self.remove_page(&record.slug) {
                warn!(slug = %record.slug, error = %rm, "could not remove page after index failure");
            }
            return Err(e);
        }

        info!(slug = %record.slug, title = %record.title, "page and index written");
        Ok(record)
    }

    /// Undo a publish whose ledger commit did not happen: rebuild the index
    /// from the committed ledger, then drop the page.
    pub fn rollback(
        &self,
        slug: &str,
        committed: &[PostRecord],
        now: DateTime<Utc>,
    ) -> std::result::Result<(), PublishError> {
        self.rebuild_index(committed, now)?;
        self.remove_page(slug)?;
        Ok(())
    }

    pub fn write_page(
        &self,
        slug: &str,
        article: &Article,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), PublishError> {
        let path = self.page_path(slug);
        let html = render::article_page(&self.layout, article, &self.site, now);
        io::atomic_write(&path, html.as_bytes()).map_err(|source| PublishError::Write { path, source })
    }

    /// Rewrite `index.html` from the published entries of `records`.
    pub fn rebuild_index(
        &self,
        records: &[PostRecord],
        now: DateTime<Utc>,
    ) -> std::result::Result<(), PublishError> {
        let listed = index_order(records);
        let html = render::index_page(&self.layout, &listed, &self.site, now);
        let path = paths::index_path(&self.output);
        io::atomic_write(&path, html.as_bytes()).map_err(|source| PublishError::Write { path, source })
    }

    /// Delete a post page. Returns false if it was already gone.
    pub fn remove_page(&self, slug: &str) -> std::result::Result<bool, PublishError> {
        let path = self.page_path(slug);
        io::remove_if_exists(&path).map_err(|source| PublishError::Remove { path, source })
    }

    /// Mirror `assets_dir` into the output directory. Returns the number of
    /// files that changed.
    pub fn copy_assets(&self) -> std::result::Result<usize, PublishError> {
        let Some(src) = &self.assets else {
            return Ok(0);
        };
        if !src.is_dir() {
            warn!(path = %src.display(), "assets_dir does not exist; skipping");
            return Ok(0);
        }
        let copied = copy_tree(src, &self.output)?;
        if copied > 0 {
            info!(copied, "assets updated");
        }
        Ok(copied)
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Make pages and index agree with `ledger`.
    ///
    /// `load_article` fetches the stored article for a ledger position.
    pub fn reconcile(
        &self,
        ledger: &[PostRecord],
        load_article: impl Fn(u64) -> Result<Option<Article>>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in ledger.iter().filter(|r| r.is_published()) {
            if self.page_path(&record.slug).exists() {
                continue;
            }
            match load_article(record.seq)? {
                Some(article) => {
                    self.write_page(&record.slug, &article, now)?;
                    warn!(slug = %record.slug, "restored missing page");
                    report.restored.push(record.slug.clone());
                }
                None => {
                    warn!(slug = %record.slug, "page missing and no stored article; dropping from index");
                    report.unrecoverable.push(record.slug.clone());
                }
            }
        }

        // The stale index may still link orphans; replace it before deleting them.
        let indexable: Vec<PostRecord> = ledger
            .iter()
            .filter(|r| !report.unrecoverable.contains(&r.slug))
            .cloned()
            .collect();
        self.rebuild_index(&indexable, now)?;

        let keep: HashSet<String> = ledger
            .iter()
            .filter(|r| r.is_published())
            .map(|r| format!("{}.{}", r.slug, paths::PAGE_EXT))
            .collect();
        let posts = paths::posts_dir(&self.output);
        if posts.is_dir() {
            for entry in std::fs::read_dir(&posts)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if keep.contains(&name) {
                    continue;
                }
                let path = entry.path();
                io::remove_if_exists(&path).map_err(|source| PublishError::Remove {
                    path: path.clone(),
                    source,
                })?;
                warn!(file = %name, "removed orphan file from posts directory");
                report.orphans_removed.push(name);
            }
        }

        Ok(report)
    }
}

fn asset_err(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError {
    let path = path.to_path_buf();
    move |source| PublishError::Asset { path, source }
}

fn copy_tree(src: &Path, dest: &Path) -> std::result::Result<usize, PublishError> {
    let mut copied = 0;
    for entry in std::fs::read_dir(src).map_err(asset_err(src))? {
        let entry = entry.map_err(asset_err(src))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let kind = entry.file_type().map_err(asset_err(&from))?;
        if kind.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if kind.is_file() && io::copy_if_changed(&from, &to).map_err(asset_err(&from))? {
            copied += 1;
        }
    }
    Ok(copied)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
