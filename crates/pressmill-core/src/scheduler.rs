//! The gated posting cycle and the lock-guarded maintenance operations.
//!
//! ```text
//! acquire lock ─▶ due? ─▶ portfolio? ─▶ reconcile ─▶ rotate ─▶ generate ─▶ publish ─▶ commit
//!      │held        │no        │empty                              │err        │err      │
//!      ▼            ▼          ▼                                   └───────────┴──▶ commit failure
//!   Skipped      Skipped    Skipped
//! ```
//!
//! Every exit path leaves the lock released: commits release it in the same
//! transaction, all other paths release it explicitly.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, Product};
use crate::error::{PressmillError, Result};
use crate::generator::ContentGenerator;
use crate::paths;
use crate::publish::{Publisher, ReconcileReport};
use crate::rotator;
use crate::state::{is_due, LockAttempt, LockOwner, PostRecord};
use crate::store::{PublishCommit, StateStore};
use crate::types::{CycleOutcome, PostStatus, SkipReason};

#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub now: DateTime<Utc>,
    /// Bypass the due check. The lock is still honoured.
    pub force: bool,
}

impl CycleOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, force: false }
    }
}

/// Ledger positions of older published posts for `product` that must be
/// withdrawn so that, counting the post about to be published, at most
/// `limit` remain.
pub fn retention_victims(ledger: &[PostRecord], product: &Product, limit: Option<u32>) -> Vec<u64> {
    let Some(limit) = limit.filter(|l| *l > 0) else {
        return Vec::new();
    };
    let mut older: Vec<u64> = ledger
        .iter()
        .filter(|r| r.is_published() && r.product_link == product.link)
        .map(|r| r.seq)
        .collect();
    older.sort_unstable();
    let keep = (limit - 1) as usize;
    let excess = older.len().saturating_sub(keep);
    older.truncate(excess);
    older
}

/// Lock-guarded operations on a site that never call the text generator.
pub struct Maintainer<'a> {
    config: &'a Config,
    store: &'a StateStore,
    publisher: Publisher,
}

impl<'a> Maintainer<'a> {
    pub fn new(root: &Path, config: &'a Config, store: &'a StateStore) -> Result<Self> {
        let publisher = Publisher::from_config(root, config)?;
        Ok(Self {
            config,
            store,
            publisher,
        })
    }

    // -----------------------------------------------------------------------
    // Lock helpers
    // -----------------------------------------------------------------------

    /// Take the cycle lock or fail with `Locked`.
    fn acquire(&self, owner: LockOwner, now: DateTime<Utc>) -> Result<Uuid> {
        let run_id = owner.run_id;
        let stale_after = self.config.posting.stale_lock_timeout();
        match self.store.try_acquire_lock(owner, now, stale_after)? {
            LockAttempt::Held(holder) => Err(PressmillError::Locked {
                run_id: holder.run_id.to_string(),
                pid: holder.pid,
                acquired_at: holder.acquired_at,
            }),
            LockAttempt::Acquired { reclaimed } => {
                if let Some(previous) = reclaimed {
                    warn!(
                        previous_run = %previous.run_id,
                        previous_pid = previous.pid,
                        acquired_at = %previous.acquired_at,
                        "reclaimed stale lock"
                    );
                }
                Ok(run_id)
            }
        }
    }

    fn release(&self, run_id: Uuid) {
        if let Err(e) = self.store.release_lock(run_id) {
            warn!(run_id = %run_id, error = %e, "failed to release lock");
        }
    }

    /// Run `f` under the lock. The lock is released afterwards whether or not
    /// `f` already committed.
    fn with_lock<T>(&self, now: DateTime<Utc>, f: impl FnOnce(Uuid) -> Result<T>) -> Result<T> {
        let run_id = self.acquire(LockOwner::new(now), now)?;
        let result = f(run_id);
        self.release(run_id);
        result
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Withdraw one published post. Returns the records that changed: empty
    /// when the post exists but is not currently published.
    pub fn withdraw(&self, slug: &str, now: DateTime<Utc>) -> Result<Vec<PostRecord>> {
        paths::validate_slug(slug)?;
        self.withdraw_where(now, |r| r.slug == slug, Some(slug))
    }

    pub fn withdraw_all(&self, now: DateTime<Utc>) -> Result<Vec<PostRecord>> {
        self.withdraw_where(now, |_| true, None)
    }

    fn withdraw_where(
        &self,
        now: DateTime<Utc>,
        select: impl Fn(&PostRecord) -> bool,
        required: Option<&str>,
    ) -> Result<Vec<PostRecord>> {
        self.with_lock(now, |run_id| {
            let ledger = self.store.ledger()?;
            if let Some(slug) = required {
                if !ledger.iter().any(|r| r.slug == slug) {
                    return Err(PressmillError::PostNotFound(slug.to_string()));
                }
            }

            let targets: Vec<PostRecord> = ledger
                .iter()
                .filter(|r| r.is_published() && select(r))
                .cloned()
                .collect();
            if targets.is_empty() {
                return Ok(Vec::new());
            }
            let seqs: Vec<u64> = targets.iter().map(|r| r.seq).collect();

            let remaining: Vec<PostRecord> = ledger
                .iter()
                .filter(|r| !seqs.contains(&r.seq))
                .cloned()
                .collect();
            self.publisher.rebuild_index(&remaining, now)?;

            if let Err(e) = self.store.commit_withdraw(run_id, &seqs) {
                if let Err(rb) = self.publisher.rebuild_index(&ledger, now) {
                    warn!(error = %rb, "could not restore index after failed withdraw");
                }
                return Err(e);
            }

            let mut withdrawn = Vec::with_capacity(targets.len());
            for mut record in targets {
                if let Err(e) = self.publisher.remove_page(&record.slug) {
                    warn!(slug = %record.slug, error = %e, "could not remove withdrawn page");
                }
                info!(slug = %record.slug, "withdrawn");
                record.status = PostStatus::Withdrawn;
                withdrawn.push(record);
            }
            Ok(withdrawn)
        })
    }

    /// Reconcile pages and index with the ledger under the lock.
    pub fn repair(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        self.with_lock(now, |_| {
            let ledger = self.store.ledger()?;
            self.publisher.copy_assets()?;
            let report = self
                .publisher
                .reconcile(&ledger, |seq| self.store.article(seq), now)?;
            info!(
                restored = report.restored.len(),
                orphans = report.orphans_removed.len(),
                unrecoverable = report.unrecoverable.len(),
                "repair complete"
            );
            Ok(report)
        })
    }
}

pub struct Scheduler<'a> {
    site: Maintainer<'a>,
    generator: &'a dyn ContentGenerator,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        root: &Path,
        config: &'a Config,
        store: &'a StateStore,
        generator: &'a dyn ContentGenerator,
    ) -> Result<Self> {
        Ok(Self {
            site: Maintainer::new(root, config, store)?,
            generator,
        })
    }

    pub fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_cycle_with(CycleOptions::at(Utc::now()))
    }

    pub fn run_cycle_with(&self, opts: CycleOptions) -> Result<CycleOutcome> {
        let owner = LockOwner::new(opts.now);
        let span = info_span!("cycle", run_id = %owner.run_id);
        let _enter = span.enter();

        let run_id = match self.site.acquire(owner, opts.now) {
            Ok(id) => id,
            Err(PressmillError::Locked {
                run_id,
                pid,
                acquired_at,
            }) => {
                info!(holder = %run_id, pid, since = %acquired_at, "another run holds the lock; skipping");
                return Ok(CycleOutcome::skipped(SkipReason::Locked));
            }
            Err(PressmillError::StoreBusy) => {
                info!("state store is open in another process; skipping");
                return Ok(CycleOutcome::skipped(SkipReason::Locked));
            }
            Err(e) => return Err(e),
        };

        let result = self.locked_cycle(run_id, opts);
        if !matches!(
            result,
            Ok(CycleOutcome::Published { .. } | CycleOutcome::Failed { .. })
        ) {
            self.site.release(run_id);
        }
        result
    }

    fn locked_cycle(&self, run_id: Uuid, opts: CycleOptions) -> Result<CycleOutcome> {
        let now = opts.now;
        let state = self.site.store.run_state()?;
        let ledger = self.site.store.ledger()?;

        if opts.force {
            info!("forced run; due check bypassed");
        } else if !is_due(&state, &ledger, &self.site.config.posting, now) {
            let next_due = state.next_due_at(self.site.config.posting.interval());
            info!(next_due = ?next_due, "not due; skipping");
            return Ok(CycleOutcome::skipped(SkipReason::NotDue));
        }

        let portfolio = &self.site.config.portfolio;
        if portfolio.is_empty() {
            info!("portfolio is empty; skipping");
            return Ok(CycleOutcome::skipped(SkipReason::EmptyPortfolio));
        }

        let report = self
            .site.publisher
            .reconcile(&ledger, |seq| self.site.store.article(seq), now)?;
        if !report.is_clean() {
            warn!(
                restored = report.restored.len(),
                orphans = report.orphans_removed.len(),
                unrecoverable = report.unrecoverable.len(),
                "site reconciled with ledger"
            );
        }

        let (product, next_cursor) = rotator::next(portfolio, state.cursor_for(portfolio.len()))?;
        let seq = self.site.store.next_seq()?;
        info!(product = %product.name, seq, "post due; generating");

        let article = match self.generator.generate(product, &self.site.config.site) {
            Ok(article) => article,
            Err(e) => return self.fail(run_id, seq, product, e.to_string(), now),
        };

        let retired = retention_victims(&ledger, product, self.site.config.posting.max_posts_per_product);
        let listed: Vec<PostRecord> = ledger
            .iter()
            .filter(|r| r.is_published() && !retired.contains(&r.seq))
            .cloned()
            .collect();

        let record = match self.site.publisher.publish(&article, product, seq, &listed, now) {
            Ok(record) => record,
            Err(e) => return self.fail(run_id, seq, product, e.to_string(), now),
        };

        let commit = PublishCommit {
            run_id,
            record: &record,
            article: &article,
            next_cursor,
            published_at: now,
            retired: &retired,
        };
        if let Err(e) = self.site.store.commit_publish(commit) {
            error!(slug = %record.slug, error = %e, "ledger commit failed; rolling back page");
            if let Err(rb) = self.site.publisher.rollback(&record.slug, &ledger, now) {
                warn!(slug = %record.slug, error = %rb, "rollback incomplete; next cycle will reconcile");
            }
            return Err(e);
        }

        for old in ledger.iter().filter(|r| retired.contains(&r.seq)) {
            match self.site.publisher.remove_page(&old.slug) {
                Ok(_) => info!(slug = %old.slug, "withdrawn by retention"),
                Err(e) => warn!(slug = %old.slug, error = %e, "could not remove retired page"),
            }
        }

        info!(slug = %record.slug, product = %product.name, "published");
        Ok(CycleOutcome::Published { slug: record.slug })
    }

    fn fail(
        &self,
        run_id: Uuid,
        seq: u64,
        product: &Product,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        error!(product = %product.name, error = %reason, "cycle failed");
        let record = PostRecord {
            seq,
            slug: paths::post_slug(seq, &product.name),
            product: product.name.clone(),
            product_link: product.link.clone(),
            title: String::new(),
            timestamp: now,
            status: PostStatus::Failed,
            failure: Some(reason.clone()),
        };
        self.site.store.commit_failure(run_id, &record)?;
        Ok(CycleOutcome::Failed {
            product: product.name.clone(),
            error: reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;
    use crate::config::SiteConfig;
    use crate::error::GenerationError;
    use crate::generator::testing::{article_html, no_delay, ScriptedProvider};
    use crate::generator::Generator;
    use crate::state::RunState;
    use chrono::{Duration, TimeZone};
    use regex::Regex;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use std::path::PathBuf;
    use tempfile::TempDir;

    // -- fixtures -----------------------------------------------------------

    /// Generator that writes a short review of whatever product it is given,
    /// failing first with any queued errors.
    #[derive(Default)]
    struct StubGenerator {
        failures: RefCell<VecDeque<GenerationError>>,
        calls: RefCell<Vec<String>>,
    }

    impl StubGenerator {
        fn failing(errors: Vec<GenerationError>) -> Self {
            Self {
                failures: RefCell::new(errors.into()),
                calls: RefCell::default(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl ContentGenerator for StubGenerator {
        fn generate(&self, product: &Product, _site: &SiteConfig) -> std::result::Result<Article, GenerationError> {
            self.calls.borrow_mut().push(product.name.clone());
            if let Some(e) = self.failures.borrow_mut().pop_front() {
                return Err(e);
            }
            Article::from_html(&article_html(&format!("{} Review", product.name)), product)
        }
    }

    struct Site {
        dir: TempDir,
        config: Config,
        store: StateStore,
    }

    impl Site {
        fn new(products: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::new("Spotlight", "https://spotlight.example");
            for name in products {
                config.portfolio.push(Product {
                    name: name.to_string(),
                    link: format!("https://aff.example/{}", paths::slugify(name)),
                    description: format!("All about {name}"),
                });
            }
            let store = StateStore::open(&paths::state_db_path(dir.path())).unwrap();
            Self { dir, config, store }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn output(&self) -> PathBuf {
            self.config.output_dir(self.root())
        }

        fn run(&self, generator: &dyn ContentGenerator, at: DateTime<Utc>) -> CycleOutcome {
            self.run_with(generator, CycleOptions::at(at))
        }

        fn run_with(&self, generator: &dyn ContentGenerator, opts: CycleOptions) -> CycleOutcome {
            Scheduler::new(self.root(), &self.config, &self.store, generator)
                .unwrap()
                .run_cycle_with(opts)
                .unwrap()
        }

        fn maintainer(&self) -> Maintainer<'_> {
            Maintainer::new(self.root(), &self.config, &self.store).unwrap()
        }

        fn state(&self) -> RunState {
            self.store.run_state().unwrap()
        }

        fn ledger(&self) -> Vec<PostRecord> {
            self.store.ledger().unwrap()
        }

        /// Every file under the output directory, keyed by relative path.
        fn files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
            fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
                let Ok(entries) = std::fs::read_dir(dir) else { return };
                for entry in entries {
                    let path = entry.unwrap().path();
                    if path.is_dir() {
                        walk(base, &path, out);
                    } else {
                        let rel = path.strip_prefix(base).unwrap().to_path_buf();
                        out.insert(rel, std::fs::read(&path).unwrap());
                    }
                }
            }
            let mut out = BTreeMap::new();
            walk(&self.output(), &self.output(), &mut out);
            out
        }

        fn index(&self) -> String {
            std::fs::read_to_string(paths::index_path(&self.output())).unwrap_or_default()
        }

        /// The homepage must only link pages that exist.
        fn assert_index_consistent(&self) {
            let href = Regex::new(r#"href="(posts/[^"]+)""#).unwrap();
            for caps in href.captures_iter(&self.index()) {
                let page = self.output().join(&caps[1]);
                assert!(page.exists(), "index links missing page {}", page.display());
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn published(slug: &str) -> CycleOutcome {
        CycleOutcome::Published { slug: slug.into() }
    }

    // -- gating -------------------------------------------------------------

    #[test]
    fn oversized_interval_skips_and_releases_lock() {
        let mut site = Site::new(&["A", "B"]);
        site.config.posting.interval_minutes = 200_000_000_000;
        let generator = StubGenerator::default();

        assert_eq!(site.run(&generator, t0()), published("0001-a"));
        assert_eq!(
            site.run(&generator, t0() + Duration::days(365 * 50)),
            CycleOutcome::skipped(SkipReason::NotDue)
        );
        assert!(site.state().lock_owner.is_none());
    }

    #[test]
    fn scenario_rotation_with_daily_interval() {
        let site = Site::new(&["A", "B", "C"]);
        let generator = StubGenerator::default();

        assert_eq!(site.run(&generator, t0()), published("0001-a"));
        assert_eq!(site.state().rotation_cursor, 1);
        assert_eq!(site.state().last_post_at, Some(t0()));

        assert_eq!(
            site.run(&generator, t0() + Duration::minutes(10)),
            CycleOutcome::skipped(SkipReason::NotDue)
        );
        assert_eq!(site.state().rotation_cursor, 1);

        assert_eq!(site.run(&generator, t0() + Duration::days(1)), published("0002-b"));
        assert_eq!(site.state().rotation_cursor, 2);
        assert_eq!(generator.calls(), vec!["A", "B"]);
        site.assert_index_consistent();
    }

    #[test]
    fn not_due_cycle_changes_nothing() {
        let site = Site::new(&["A", "B"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());

        let state = site.state();
        let ledger = site.ledger();
        let files = site.files();

        let outcome = site.run(&generator, t0() + Duration::hours(3));
        assert_eq!(outcome, CycleOutcome::skipped(SkipReason::NotDue));
        assert_eq!(site.state(), state);
        assert_eq!(site.ledger(), ledger);
        assert_eq!(site.files(), files);
        assert_eq!(generator.calls().len(), 1);
    }

    #[test]
    fn force_bypasses_due_check() {
        let site = Site::new(&["A", "B"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());
        let outcome = site.run_with(
            &generator,
            CycleOptions {
                now: t0() + Duration::minutes(1),
                force: true,
            },
        );
        assert_eq!(outcome, published("0002-b"));
    }

    #[test]
    fn daily_cap_skips_even_after_interval() {
        let mut site = Site::new(&["A", "B"]);
        site.config.posting.interval_minutes = 60;
        site.config.posting.max_posts_per_day = Some(1);
        let generator = StubGenerator::default();

        assert!(site.run(&generator, t0()).is_published());
        assert_eq!(
            site.run(&generator, t0() + Duration::hours(2)),
            CycleOutcome::skipped(SkipReason::NotDue)
        );
        assert!(site.run(&generator, t0() + Duration::hours(25)).is_published());
    }

    #[test]
    fn empty_portfolio_skips_and_releases_lock() {
        let site = Site::new(&[]);
        let generator = StubGenerator::default();
        assert_eq!(
            site.run(&generator, t0()),
            CycleOutcome::skipped(SkipReason::EmptyPortfolio)
        );
        assert!(site.state().lock_owner.is_none());
        assert!(site.ledger().is_empty());
    }

    #[test]
    fn rotation_is_fair_over_many_cycles() {
        let site = Site::new(&["A", "B", "C"]);
        let generator = StubGenerator::default();
        for day in 0..9 {
            assert!(site.run(&generator, t0() + Duration::days(day)).is_published());
            site.assert_index_consistent();
        }
        let calls = generator.calls();
        for name in ["A", "B", "C"] {
            assert_eq!(calls.iter().filter(|c| c.as_str() == name).count(), 3);
        }
        assert_eq!(&calls[..3], &["A", "B", "C"]);
    }

    #[test]
    fn shrunk_portfolio_cursor_wraps() {
        let mut site = Site::new(&["A", "B", "C"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());
        site.run(&generator, t0() + Duration::days(1));
        assert_eq!(site.state().rotation_cursor, 2);

        site.config.portfolio.truncate(2);
        assert_eq!(
            site.run(&generator, t0() + Duration::days(2)),
            published("0003-a")
        );
        assert_eq!(site.state().rotation_cursor, 1);
    }

    // -- locking ------------------------------------------------------------

    /// Runs a second cycle against the same store while the first one is
    /// generating.
    struct OverlappingGenerator<'a> {
        site: &'a Site,
        observed: RefCell<Option<CycleOutcome>>,
    }

    impl ContentGenerator for OverlappingGenerator<'_> {
        fn generate(&self, product: &Product, site: &SiteConfig) -> std::result::Result<Article, GenerationError> {
            let inner = StubGenerator::default();
            let outcome = self.site.run_with(
                &inner,
                CycleOptions {
                    now: t0() + Duration::minutes(1),
                    force: true,
                },
            );
            *self.observed.borrow_mut() = Some(outcome);
            StubGenerator::default().generate(product, site)
        }
    }

    #[test]
    fn overlapping_run_is_skipped_while_first_publishes() {
        let site = Site::new(&["A", "B"]);
        let generator = OverlappingGenerator {
            site: &site,
            observed: RefCell::new(None),
        };
        assert_eq!(site.run(&generator, t0()), published("0001-a"));
        assert_eq!(
            generator.observed.borrow().clone(),
            Some(CycleOutcome::skipped(SkipReason::Locked))
        );
        assert_eq!(site.ledger().len(), 1);
        assert!(site.state().lock_owner.is_none());
    }

    #[test]
    fn fresh_lock_skips_stale_lock_is_reclaimed() {
        let site = Site::new(&["A"]);
        let generator = StubGenerator::default();
        let stale = site.config.posting.stale_lock_timeout();

        let holder = LockOwner::new(t0() - Duration::minutes(5));
        site.store
            .try_acquire_lock(holder.clone(), holder.acquired_at, stale)
            .unwrap();
        assert_eq!(
            site.run(&generator, t0()),
            CycleOutcome::skipped(SkipReason::Locked)
        );
        // The skipped run must not touch someone else's lock.
        assert_eq!(site.state().lock_owner, Some(holder));

        let later = t0() + Duration::minutes(26);
        assert_eq!(site.run(&generator, later), published("0001-a"));
        assert!(site.state().lock_owner.is_none());
    }

    #[test]
    fn busy_store_is_reported_as_locked() {
        let site = Site::new(&["A"]);
        let generator = StubGenerator::default();
        let _held = redb::Database::create(paths::state_db_path(site.root())).unwrap();
        assert_eq!(
            site.run(&generator, t0()),
            CycleOutcome::skipped(SkipReason::Locked)
        );
        assert!(generator.calls().is_empty());
    }

    // -- failure handling ---------------------------------------------------

    #[test]
    fn permanent_failure_retries_same_product_next_cycle() {
        let site = Site::new(&["A", "B"]);
        let generator =
            StubGenerator::failing(vec![GenerationError::Permanent("model not found".into())]);

        let outcome = site.run(&generator, t0());
        assert!(matches!(
            &outcome,
            CycleOutcome::Failed { product, error } if product == "A" && error.contains("model not found")
        ));
        let state = site.state();
        assert_eq!(state.rotation_cursor, 0);
        assert_eq!(state.last_post_at, None);
        assert!(state.lock_owner.is_none());
        let ledger = site.ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, PostStatus::Failed);
        assert_eq!(ledger[0].slug, "0001-a");
        assert!(!site.output().join("posts/0001-a.html").exists());

        assert_eq!(
            site.run(&generator, t0() + Duration::minutes(10)),
            published("0002-a")
        );
        assert_eq!(generator.calls(), vec!["A", "A"]);
        assert!(!site.index().contains("0001-a"));
    }

    #[test]
    fn transient_errors_are_retried_within_one_cycle() {
        let site = Site::new(&["Desk"]);
        let provider = ScriptedProvider::new(vec![
            Err(GenerationError::Transient("503".into())),
            Ok(format!("```html\n{}\n```", article_html("Desk Deep Dive"))),
        ]);
        let generator = Generator::new(provider, no_delay(3), false);

        assert_eq!(site.run(&generator, t0()), published("0001-desk"));
        assert_eq!(generator.provider().calls(), 2);
        assert!(site.index().contains("Desk Deep Dive"));
    }

    #[test]
    fn exhausted_retries_fail_the_cycle() {
        let site = Site::new(&["Desk"]);
        let provider = ScriptedProvider::new(vec![
            Err(GenerationError::Transient("timeout".into())),
            Err(GenerationError::Transient("timeout".into())),
        ]);
        let generator = Generator::new(provider, no_delay(2), false);
        let outcome = site.run(&generator, t0());
        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert_eq!(site.state().last_post_at, None);
    }

    #[test]
    fn publish_failure_leaves_cursor_and_site_untouched() {
        let mut site = Site::new(&["A", "B"]);
        // An asset directory named like the index cannot be copied over it.
        let assets = site.root().join("theme");
        std::fs::create_dir_all(assets.join("index.html")).unwrap();
        std::fs::write(assets.join("index.html/style.css"), "body{}").unwrap();
        site.config.assets_dir = Some(assets);
        let generator = StubGenerator::default();

        let outcome = site.run(&generator, t0());
        assert!(matches!(&outcome, CycleOutcome::Failed { product, .. } if product == "A"));
        assert_eq!(site.state().rotation_cursor, 0);
        assert_eq!(site.ledger()[0].status, PostStatus::Failed);
        assert!(!site.output().join("posts/0001-a.html").exists());
        site.assert_index_consistent();
    }

    // -- reconcile ----------------------------------------------------------

    #[test]
    fn cycle_reconciles_before_publishing() {
        let site = Site::new(&["A", "B", "C"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());

        // Simulate a crash after a page rename but before the ledger append,
        // plus a page lost from the output directory.
        std::fs::write(site.output().join("posts/0002-b.html"), "half-published").unwrap();
        std::fs::remove_file(site.output().join("posts/0001-a.html")).unwrap();

        assert_eq!(site.run(&generator, t0() + Duration::days(1)), published("0002-b"));
        let page = std::fs::read_to_string(site.output().join("posts/0002-b.html")).unwrap();
        assert!(page.contains("B Review"));
        assert!(site.output().join("posts/0001-a.html").exists());
        site.assert_index_consistent();
    }

    #[test]
    fn repair_restores_pages_under_lock() {
        let site = Site::new(&["A"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());
        std::fs::remove_file(site.output().join("posts/0001-a.html")).unwrap();

        let report = site.maintainer().repair(t0()).unwrap();
        assert_eq!(report.restored, vec!["0001-a".to_string()]);
        assert!(site.output().join("posts/0001-a.html").exists());
        assert!(site.state().lock_owner.is_none());
    }

    #[test]
    fn repair_refuses_while_locked() {
        let site = Site::new(&["A"]);
        site.store
            .try_acquire_lock(LockOwner::new(t0()), t0(), Duration::minutes(30))
            .unwrap();
        let err = site.maintainer().repair(t0()).unwrap_err();
        assert!(matches!(err, PressmillError::Locked { .. }));
    }

    // -- withdraw & retention -----------------------------------------------

    #[test]
    fn withdraw_removes_post_from_site() {
        let site = Site::new(&["A", "B"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());
        site.run(&generator, t0() + Duration::days(1));

        let changed = site.maintainer().withdraw("0001-a", t0()).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, PostStatus::Withdrawn);
        assert!(!site.output().join("posts/0001-a.html").exists());
        assert!(!site.index().contains("0001-a"));
        assert!(site.index().contains("0002-b"));
        assert_eq!(site.ledger()[0].status, PostStatus::Withdrawn);
        assert!(site.state().lock_owner.is_none());

        // Second withdraw is a no-op; the slug stays reserved.
        assert!(site.maintainer().withdraw("0001-a", t0()).unwrap().is_empty());
        assert_eq!(site.store.next_seq().unwrap(), 3);
    }

    #[test]
    fn withdraw_unknown_slug_is_not_found() {
        let site = Site::new(&["A"]);
        let err = site.maintainer().withdraw("0009-nope", t0()).unwrap_err();
        assert!(matches!(err, PressmillError::PostNotFound(_)));
        assert!(site.state().lock_owner.is_none());

        let err = site.maintainer().withdraw("../etc", t0()).unwrap_err();
        assert!(matches!(err, PressmillError::InvalidSlug(_)));
    }

    #[test]
    fn withdraw_all_empties_index() {
        let site = Site::new(&["A", "B"]);
        let generator = StubGenerator::default();
        site.run(&generator, t0());
        site.run(&generator, t0() + Duration::days(1));

        let changed = site.maintainer().withdraw_all(t0()).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(!site.index().contains("post-card"));
        assert!(site.ledger().iter().all(|r| r.status == PostStatus::Withdrawn));
    }

    #[test]
    fn retention_withdraws_oldest_posts_of_product() {
        let mut site = Site::new(&["A"]);
        site.config.posting.max_posts_per_product = Some(2);
        let generator = StubGenerator::default();
        for day in 0..3 {
            assert!(site.run(&generator, t0() + Duration::days(day)).is_published());
        }

        let statuses: Vec<PostStatus> = site.ledger().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![PostStatus::Withdrawn, PostStatus::Published, PostStatus::Published]
        );
        assert!(!site.output().join("posts/0001-a.html").exists());
        assert!(!site.index().contains("0001-a"));
        site.assert_index_consistent();
    }

    #[test]
    fn retention_victims_counts_new_post() {
        let product = Product {
            name: "A".into(),
            link: "https://aff.example/a".into(),
            description: String::new(),
        };
        let ledger: Vec<PostRecord> = (1..=4)
            .map(|seq| PostRecord {
                seq,
                slug: format!("{seq:04}-a"),
                product: "A".into(),
                product_link: product.link.clone(),
                title: "A".into(),
                timestamp: t0(),
                status: if seq == 2 { PostStatus::Failed } else { PostStatus::Published },
                failure: None,
            })
            .collect();
        assert_eq!(retention_victims(&ledger, &product, Some(2)), vec![1, 3]);
        assert_eq!(retention_victims(&ledger, &product, Some(1)), vec![1, 3, 4]);
        assert!(retention_victims(&ledger, &product, Some(10)).is_empty());
        assert!(retention_victims(&ledger, &product, None).is_empty());
    }
}
