//! Integration tests for the sync drivers
//!
//! These tests wire scripted feed sources and classifiers into real drivers
//! backed by an in-memory database and run whole cycles end-to-end.

use async_trait::async_trait;
use chrono::Utc;
use feed_harvest::classifier::{credential_fingerprint, Classifier};
use feed_harvest::engine::{
    ClassificationJob, ExtractionJob, JobOrchestrator, OrchestratorConfig, RateLimitGate,
    RetryLedger, SyncDriver, SyncJob,
};
use feed_harvest::feed::{FeedRegistry, FeedSource, RawPage};
use feed_harvest::storage::{
    ClassificationCounts, RateLimitState, RetryEntry, RunRecord, SqliteStorage, Storage,
    StorageError, StorageResult,
};
use feed_harvest::{
    ClassificationOutcome, CycleState, ErrorKind, HarvestError, Post, Result, Watermark,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

const HOST: &str = "feed.test";

fn account(name: &str) -> String {
    format!("https://{}/{}", HOST, name)
}

/// Creation time `minutes` before now, well inside the lookback window
fn minutes_ago(minutes: i64) -> i64 {
    Utc::now().timestamp() - minutes * 60
}

/// Serves scripted pages per account
///
/// Each page is a list of `(id, created_at)` pairs. Accounts listed in
/// `fail_at` fail to fetch the page at that index.
#[derive(Default)]
struct ScriptedFeed {
    pages: HashMap<String, Vec<Vec<(String, i64)>>>,
    fail_at: HashMap<String, usize>,
    probe_fails: bool,
    hold: Option<Arc<Notify>>,
    fetches: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedFeed {
    fn with_account(mut self, url: &str, pages: Vec<Vec<(&str, i64)>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|page| page.into_iter().map(|(id, t)| (id.to_string(), t)).collect())
            .collect();
        self.pages.insert(url.to_string(), pages);
        self
    }

    fn failing_at(mut self, url: &str, page: usize) -> Self {
        self.fail_at.insert(url.to_string(), page);
        self
    }

    fn fetches_of(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(account, _)| account == url)
            .count()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn platform(&self) -> &'static str {
        "scripted"
    }

    fn handles(&self, account: &Url) -> bool {
        account.host_str() == Some(HOST)
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_fails {
            return Err(HarvestError::transport(HOST, "connection refused"));
        }
        Ok(())
    }

    async fn fetch_page(&self, account_url: &str, cursor: Option<&str>) -> Result<RawPage> {
        self.fetches
            .lock()
            .unwrap()
            .push((account_url.to_string(), cursor.map(str::to_string)));

        if let Some(hold) = &self.hold {
            hold.notified().await;
        }

        let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        if self.fail_at.get(account_url) == Some(&index) {
            return Err(HarvestError::transport(account_url, "503 Service Unavailable"));
        }

        let pages = self.pages.get(account_url).cloned().unwrap_or_default();
        let items = pages
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(id, t)| json!({ "id": id, "t": t }))
            .collect();
        let has_more = index + 1 < pages.len();

        Ok(RawPage {
            items,
            next_cursor: has_more.then(|| (index + 1).to_string()),
            has_more,
        })
    }

    fn parse(&self, account_url: &str, page: &RawPage) -> Result<Vec<Post>> {
        Ok(page
            .items
            .iter()
            .map(|item| {
                let id = item["id"].as_str().unwrap_or_default().to_string();
                Post {
                    post_url: format!("{}/p/{}", account_url, id),
                    id,
                    platform: "scripted".to_string(),
                    account_id: "1".to_string(),
                    account_url: account_url.to_string(),
                    created_at: item["t"].as_i64().unwrap_or_default(),
                    description: Some("Kajian rutin malam Jumat".to_string()),
                    author_name: None,
                    username: None,
                    profile_picture: None,
                    media: vec![],
                }
            })
            .collect())
    }
}

/// Matches posts whose description mentions "kajian"; the first
/// `rate_limited` calls fail with a one-second reset hint
#[derive(Default)]
struct KeywordClassifier {
    rate_limited: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, post: &Post, credential: &str) -> Result<Option<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.rate_limited {
            return Err(HarvestError::RateLimited {
                credential: credential_fingerprint(credential),
                retry_after: Some(Duration::from_secs(1)),
            });
        }

        let text = post.description.as_deref().unwrap_or_default();
        if text.to_lowercase().contains("kajian") {
            Ok(Some(
                r#"{"theme":"Kajian rutin","date":"2025-03-07","venue":"Masjid","location":null,"speaker":null}"#
                    .to_string(),
            ))
        } else {
            Ok(Some("null".to_string()))
        }
    }
}

/// Delegates to SQLite but cannot clear retry entries
struct StuckLedgerStorage {
    inner: SqliteStorage,
}

impl Storage for StuckLedgerStorage {
    fn upsert_posts(&self, posts: &[Post]) -> StorageResult<usize> {
        self.inner.upsert_posts(posts)
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>> {
        self.inner.get_post(post_id)
    }

    fn count_posts(&self) -> StorageResult<u64> {
        self.inner.count_posts()
    }

    fn pending_classification(&self) -> StorageResult<Vec<Post>> {
        self.inner.pending_classification()
    }

    fn record_classification(
        &self,
        post_id: &str,
        outcome: &ClassificationOutcome,
    ) -> StorageResult<()> {
        self.inner.record_classification(post_id, outcome)
    }

    fn classification_counts(&self) -> StorageResult<ClassificationCounts> {
        self.inner.classification_counts()
    }

    fn count_events(&self) -> StorageResult<u64> {
        self.inner.count_events()
    }

    fn get_watermark(&self, account_url: &str) -> StorageResult<Option<Watermark>> {
        self.inner.get_watermark(account_url)
    }

    fn put_watermark(&self, watermark: &Watermark) -> StorageResult<()> {
        self.inner.put_watermark(watermark)
    }

    fn count_watermarks(&self) -> StorageResult<u64> {
        self.inner.count_watermarks()
    }

    fn get_retry_entry(&self, scope: &str, item_key: &str) -> StorageResult<Option<RetryEntry>> {
        self.inner.get_retry_entry(scope, item_key)
    }

    fn upsert_increment_retry(
        &self,
        scope: &str,
        item_key: &str,
        last_error: Option<&str>,
    ) -> StorageResult<u32> {
        self.inner.upsert_increment_retry(scope, item_key, last_error)
    }

    fn delete_retry_entry(&self, _scope: &str, _item_key: &str) -> StorageResult<()> {
        Err(StorageError::LockPoisoned)
    }

    fn clear_retry_scope(&self, scope: &str) -> StorageResult<usize> {
        self.inner.clear_retry_scope(scope)
    }

    fn get_rate_limit(&self, credential_id: &str) -> StorageResult<Option<RateLimitState>> {
        self.inner.get_rate_limit(credential_id)
    }

    fn put_rate_limit(&self, state: &RateLimitState) -> StorageResult<()> {
        self.inner.put_rate_limit(state)
    }

    fn delete_rate_limit(&self, credential_id: &str) -> StorageResult<()> {
        self.inner.delete_rate_limit(credential_id)
    }

    fn count_rate_limits(&self) -> StorageResult<u64> {
        self.inner.count_rate_limits()
    }

    fn create_run(&self, job: &str, config_hash: &str) -> StorageResult<i64> {
        self.inner.create_run(job, config_hash)
    }

    fn complete_run(
        &self,
        run_id: i64,
        status: CycleState,
        items_total: usize,
        items_failed: usize,
    ) -> StorageResult<()> {
        self.inner
            .complete_run(run_id, status, items_total, items_failed)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn latest_run(&self, job: &str) -> StorageResult<Option<RunRecord>> {
        self.inner.latest_run(job)
    }
}

fn storage() -> Arc<dyn Storage> {
    Arc::new(SqliteStorage::open_in_memory().expect("Failed to open database"))
}

fn orchestrator(storage: &Arc<dyn Storage>, job: &str, width: usize, retries: u32) -> JobOrchestrator {
    JobOrchestrator::new(
        OrchestratorConfig {
            max_concurrency: width,
            max_retries: retries,
            chunk_delay: Duration::ZERO,
            rate_limit_backoff: Duration::from_secs(60),
        },
        RetryLedger::new(storage.clone(), RetryLedger::scope_for("test", job)),
        RateLimitGate::new(storage.clone()),
    )
}

fn extraction_driver(
    feed: Arc<ScriptedFeed>,
    storage: &Arc<dyn Storage>,
    accounts: Vec<String>,
    width: usize,
    retries: u32,
) -> SyncDriver {
    let mut registry = FeedRegistry::new();
    registry.register(feed);
    let job = ExtractionJob::new(registry, storage.clone(), accounts, 7);

    SyncDriver::new(
        SyncJob::Extraction(job),
        orchestrator(storage, "extraction", width, retries),
        storage.clone(),
        "hash",
        CancellationToken::new(),
    )
}

fn classification_driver(
    classifier: Arc<KeywordClassifier>,
    storage: &Arc<dyn Storage>,
    retries: u32,
) -> SyncDriver {
    let job = ClassificationJob::new(classifier, storage.clone(), "test-api-key");

    SyncDriver::new(
        SyncJob::Classification(job),
        orchestrator(storage, "classification", 2, retries),
        storage.clone(),
        "hash",
        CancellationToken::new(),
    )
}

fn stored_post(id: &str, description: &str, created_at: i64) -> Post {
    Post {
        id: id.to_string(),
        platform: "scripted".to_string(),
        account_id: "1".to_string(),
        account_url: account("masjid"),
        created_at,
        description: Some(description.to_string()),
        post_url: format!("https://{}/p/{}", HOST, id),
        author_name: None,
        username: None,
        profile_picture: None,
        media: vec![],
    }
}

#[tokio::test]
async fn test_extraction_stops_at_last_successful_item() {
    let url = account("masjid");
    let feed = Arc::new(ScriptedFeed::default().with_account(
        &url,
        vec![
            vec![("p6", minutes_ago(1)), ("p5", minutes_ago(2))],
            vec![("p4", minutes_ago(3)), ("p3", minutes_ago(4))],
            vec![("p2", minutes_ago(5)), ("p1", minutes_ago(6))],
        ],
    ));
    let storage = storage();

    let mut mark = Watermark::new(url.as_str());
    mark.last_successful_item_id = Some("p3".to_string());
    mark.last_seen_item_id = Some("p3".to_string());
    storage.put_watermark(&mark).unwrap();

    let driver = extraction_driver(feed.clone(), &storage, vec![url.clone()], 2, 0);
    let cycle = driver.tick().await.expect("tick should run");

    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(feed.fetches_of(&url), 2, "third page must not be requested");
    assert_eq!(storage.count_posts().unwrap(), 3);
    assert!(storage.get_post("p3").unwrap().is_none());

    let mark = storage.get_watermark(&url).unwrap().unwrap();
    assert_eq!(mark.last_successful_item_id.as_deref(), Some("p6"));
    assert_eq!(mark.last_seen_item_id.as_deref(), Some("p6"));
    assert_eq!(driver.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_failed_account_does_not_move_its_successful_watermark() {
    let failing = account("failing");
    let healthy = account("healthy");
    let feed = Arc::new(
        ScriptedFeed::default()
            .with_account(
                &failing,
                vec![
                    vec![("a2", minutes_ago(1))],
                    vec![("a1", minutes_ago(2))],
                ],
            )
            .failing_at(&failing, 1)
            .with_account(&healthy, vec![vec![("b1", minutes_ago(1))]]),
    );
    let storage = storage();

    let driver = extraction_driver(feed, &storage, vec![failing.clone(), healthy.clone()], 2, 0);
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::PartialFailure);
    assert_eq!(cycle.report.exhausted.len(), 1);
    assert_eq!(cycle.report.exhausted[0].0, failing);
    assert_eq!(cycle.report.exhausted[0].1.kind(), ErrorKind::Transport);

    // Posts gathered before the failure are kept and move only the seen cursor
    let mark = storage.get_watermark(&failing).unwrap().unwrap();
    assert_eq!(mark.last_seen_item_id.as_deref(), Some("a2"));
    assert_eq!(mark.last_successful_item_id, None);
    assert!(storage.get_post("a2").unwrap().is_some());

    let mark = storage.get_watermark(&healthy).unwrap().unwrap();
    assert_eq!(mark.last_successful_item_id.as_deref(), Some("b1"));
}

#[tokio::test]
async fn test_retry_budget_is_spent_then_dropped() {
    let url = account("down");
    let feed = Arc::new(
        ScriptedFeed::default()
            .with_account(&url, vec![vec![("x1", minutes_ago(1))]])
            .failing_at(&url, 0),
    );
    let storage = storage();
    let ledger = RetryLedger::new(storage.clone(), RetryLedger::scope_for("test", "extraction"));

    let driver = extraction_driver(feed.clone(), &storage, vec![url.clone()], 1, 3);
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::PartialFailure);
    assert_eq!(feed.fetches_of(&url), 4);
    assert_eq!(cycle.report.attempts, 4);
    assert_eq!(ledger.retry_count(&url).unwrap(), 4);
    assert!(storage.get_watermark(&url).unwrap().is_none());
}

#[tokio::test]
async fn test_accounts_fan_out_in_chunks() {
    let names = ["a", "b", "c", "d", "e"];
    let mut feed = ScriptedFeed::default();
    for name in names {
        let id = format!("{}-1", name);
        feed = feed.with_account(&account(name), vec![vec![(id.as_str(), minutes_ago(1))]]);
    }
    let storage = storage();
    let accounts = names.iter().map(|n| account(n)).collect();

    let driver = extraction_driver(Arc::new(feed), &storage, accounts, 2, 0);
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(cycle.report.chunks, 3);
    assert_eq!(cycle.report.succeeded.len(), 5);
    assert_eq!(storage.count_posts().unwrap(), 5);
    assert_eq!(storage.count_watermarks().unwrap(), 5);
}

#[tokio::test]
async fn test_unsupported_account_is_not_retried() {
    let storage = storage();
    let driver = extraction_driver(
        Arc::new(ScriptedFeed::default()),
        &storage,
        vec!["https://www.tiktok.com/@masjid".to_string()],
        1,
        3,
    );

    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::PartialFailure);
    assert_eq!(cycle.report.attempts, 1);
    assert_eq!(cycle.report.exhausted[0].1.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn test_failed_probe_is_fatal() {
    let url = account("masjid");
    let feed = ScriptedFeed {
        probe_fails: true,
        ..ScriptedFeed::default()
    }
    .with_account(&url, vec![vec![("p1", minutes_ago(1))]]);
    let feed = Arc::new(feed);
    let storage = storage();

    let driver = extraction_driver(feed.clone(), &storage, vec![url.clone()], 1, 0);
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::Fatal);
    assert_eq!(cycle.error.map(|e| e.kind()), Some(ErrorKind::FatalSetup));
    assert_eq!(feed.fetches_of(&url), 0);
    assert_eq!(storage.count_watermarks().unwrap(), 0);

    let run = storage.latest_run("extraction").unwrap().unwrap();
    assert_eq!(run.status, CycleState::Fatal);
    assert!(run.finished_at.is_some());
    assert_eq!(driver.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let url = account("slow");
    let hold = Arc::new(Notify::new());
    let feed = ScriptedFeed {
        hold: Some(hold.clone()),
        ..ScriptedFeed::default()
    }
    .with_account(&url, vec![vec![("s1", minutes_ago(1))]]);
    let storage = storage();
    let driver = Arc::new(extraction_driver(Arc::new(feed), &storage, vec![url], 1, 0));

    let first = tokio::spawn({
        let driver = driver.clone();
        async move { driver.tick().await }
    });
    while driver.state() != CycleState::Running {
        tokio::task::yield_now().await;
    }

    assert!(driver.tick().await.is_none());

    hold.notify_one();
    let cycle = first.await.unwrap().expect("first tick should run");
    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(driver.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_second_cycle_inserts_nothing_new() {
    let url = account("masjid");
    let feed = Arc::new(ScriptedFeed::default().with_account(
        &url,
        vec![vec![("p2", minutes_ago(1)), ("p1", minutes_ago(2))]],
    ));
    let storage = storage();
    let driver = extraction_driver(feed.clone(), &storage, vec![url.clone()], 1, 0);

    driver.tick().await.unwrap();
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(storage.count_posts().unwrap(), 2);
    assert_eq!(feed.fetches_of(&url), 2);

    let latest = storage.latest_run("extraction").unwrap().unwrap();
    assert_eq!(latest.status, CycleState::Success);
    assert_eq!(latest.items_total, 1);
    assert_eq!(latest.items_failed, 0);
}

#[tokio::test]
async fn test_classification_records_outcomes_and_events() {
    let storage = storage();
    storage
        .upsert_posts(&[
            stored_post("m1", "Kajian tafsir bersama ustadz", minutes_ago(3)),
            stored_post("n1", "Kerja bakti membersihkan halaman", minutes_ago(2)),
            stored_post("n2", "Selamat hari raya", minutes_ago(1)),
        ])
        .unwrap();
    let classifier = Arc::new(KeywordClassifier::default());

    let driver = classification_driver(classifier.clone(), &storage, 2);
    let cycle = driver.tick().await.unwrap();

    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);

    let counts = storage.classification_counts().unwrap();
    assert_eq!(counts.matched, 1);
    assert_eq!(counts.not_matched, 2);
    assert_eq!(counts.pending, 0);
    assert_eq!(storage.count_events().unwrap(), 1);

    // Classified posts are not offered again
    let cycle = driver.tick().await.unwrap();
    assert_eq!(cycle.report.total(), 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_credential_delays_next_chunk() {
    let storage = storage();
    storage
        .upsert_posts(&[stored_post("m1", "Kajian subuh", minutes_ago(1))])
        .unwrap();
    let classifier = Arc::new(KeywordClassifier {
        rate_limited: 1,
        ..KeywordClassifier::default()
    });

    let driver = classification_driver(classifier.clone(), &storage, 2);
    let start = tokio::time::Instant::now();
    let cycle = driver.tick().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(cycle.state, CycleState::Success);
    assert_eq!(cycle.report.chunks, 2);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(1300), "{:?}", elapsed);

    let fingerprint = credential_fingerprint("test-api-key");
    assert!(storage.get_rate_limit(&fingerprint).unwrap().is_none());
    assert_eq!(storage.classification_counts().unwrap().matched, 1);
}

#[tokio::test]
async fn test_ledger_failure_after_dispatch_is_partial() {
    let names = ["a", "b", "c", "d"];
    let mut feed = ScriptedFeed::default();
    for name in names {
        let id = format!("{}-1", name);
        feed = feed.with_account(&account(name), vec![vec![(id.as_str(), minutes_ago(1))]]);
    }
    let storage: Arc<dyn Storage> = Arc::new(StuckLedgerStorage {
        inner: SqliteStorage::open_in_memory().unwrap(),
    });
    let accounts = names.iter().map(|n| account(n)).collect();

    let driver = extraction_driver(Arc::new(feed), &storage, accounts, 4, 2);
    let cycle = driver.tick().await.unwrap();

    // Every handler ran and moved its watermark, so the cycle cannot be fatal
    assert_eq!(cycle.state, CycleState::PartialFailure);
    assert!(cycle.error.is_none());
    assert_eq!(cycle.report.attempts, 4);
    assert_eq!(cycle.report.exhausted.len(), 4);
    assert!(cycle
        .report
        .exhausted
        .iter()
        .all(|(_, e)| e.kind() == ErrorKind::Storage));
    assert_eq!(storage.count_watermarks().unwrap(), 4);
    assert_eq!(storage.count_posts().unwrap(), 4);

    let run = storage.latest_run("extraction").unwrap().unwrap();
    assert_eq!(run.status, CycleState::PartialFailure);
    assert_eq!(run.items_total, 4);
    assert_eq!(run.items_failed, 4);
}
