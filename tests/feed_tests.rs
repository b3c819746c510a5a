use history_importer::dedup::FEED_LEDGER_CAPACITY;
use history_importer::feed::{FeedEntry, FeedFetcher, FeedSyncEngine, SyncScheduler, SyncTrigger};
use history_importer::media::{MediaError, MediaResolver};
use history_importer::sink::{MediaId, NormalizedRecord, RecordId, RecordSink, SinkError};
use history_importer::state::StateHandle;
use history_importer::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const FEED_URL: &str = "https://example.com/feed";

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<NormalizedRecord>>,
}

impl RecordSink for RecordingSink {
    fn submit(&self, record: &NormalizedRecord) -> Result<RecordId, SinkError> {
        if record.content.contains("REJECT") {
            return Err(SinkError::Rejected("refused by test".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(RecordId(records.len() as i64))
    }
}

struct AlwaysResolves;

impl MediaResolver for AlwaysResolves {
    fn resolve(&self, _url: &str) -> Result<MediaId, MediaError> {
        Ok(MediaId(7))
    }
}

/// Hands out fresh ids and remembers which ones were given back.
#[derive(Default)]
struct CountingResolver {
    next: AtomicUsize,
    released: Mutex<Vec<MediaId>>,
}

impl MediaResolver for CountingResolver {
    fn resolve(&self, _url: &str) -> Result<MediaId, MediaError> {
        Ok(MediaId(self.next.fetch_add(1, Ordering::SeqCst) as i64 + 1))
    }

    fn release(&self, id: MediaId) {
        self.released.lock().unwrap().push(id);
    }
}

#[derive(Default)]
struct StaticFetcher {
    entries: Mutex<Vec<FeedEntry>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl StaticFetcher {
    fn serve(&self, entries: Vec<FeedEntry>) {
        *self.entries.lock().unwrap() = entries;
    }
}

impl FeedFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> history_importer::Result<Vec<FeedEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::FeedUnreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}

fn entry(id: &str, body: &str) -> FeedEntry {
    FeedEntry {
        id: Some(id.to_string()),
        link: Some(format!("https://example.com/{}", id)),
        published: Some("Tue, 02 Mar 2021 10:00:00 +0800".to_string()),
        title: None,
        body: body.to_string(),
    }
}

struct Fixture {
    sink: Arc<RecordingSink>,
    fetcher: Arc<StaticFetcher>,
    engine: Arc<FeedSyncEngine>,
}

fn fixture() -> Fixture {
    let sink = Arc::new(RecordingSink::default());
    let fetcher = Arc::new(StaticFetcher::default());
    let engine = Arc::new(FeedSyncEngine::new(
        StateHandle::in_memory(),
        sink.clone(),
        Arc::new(AlwaysResolves),
        fetcher.clone(),
    ));
    engine.set_feed_url(Some(FEED_URL)).unwrap();
    Fixture {
        sink,
        fetcher,
        engine,
    }
}

#[test]
fn test_sync_skips_entries_already_in_ledger() {
    let fx = fixture();
    fx.fetcher.serve(vec![entry("a", "<p>first</p>")]);
    assert_eq!(fx.engine.sync(SyncTrigger::Manual).unwrap().imported_count, 1);

    fx.fetcher.serve(vec![
        entry("a", "<p>first</p>"),
        entry("b", "<p>second</p>"),
        entry("c", "<p>third</p>"),
    ]);
    let outcome = fx.engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(outcome.imported_count, 2);
    assert_eq!(outcome.already_seen, 1);
    assert_eq!(fx.sink.records.lock().unwrap().len(), 3);
}

#[test]
fn test_ledger_never_exceeds_capacity() {
    let fx = fixture();
    for round in 0..3 {
        let entries = (0..60)
            .map(|i| entry(&format!("r{}-{}", round, i), "<p>x</p>"))
            .collect();
        fx.fetcher.serve(entries);
        fx.engine.sync(SyncTrigger::Manual).unwrap();
        assert!(fx.engine.ledger().unwrap().len() <= FEED_LEDGER_CAPACITY);
    }
    assert_eq!(fx.engine.ledger().unwrap().len(), FEED_LEDGER_CAPACITY);

    // the first round has been evicted and imports again
    fx.fetcher
        .serve(vec![entry("r0-0", "<p>x</p>"), entry("r2-59", "<p>x</p>")]);
    assert_eq!(fx.engine.sync(SyncTrigger::Manual).unwrap().imported_count, 1);
}

#[test]
fn test_unconfigured_feed_fails() {
    let fx = fixture();
    fx.engine.set_feed_url(None).unwrap();
    assert!(matches!(
        fx.engine.sync(SyncTrigger::Manual),
        Err(Error::FeedUnconfigured)
    ));
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rejected_entry_does_not_stop_the_run() {
    let fx = fixture();
    fx.fetcher.serve(vec![
        entry("a", "<p>fine</p>"),
        entry("b", "<p>REJECT me</p>"),
        entry("c", "<p>also fine</p>"),
    ]);
    let outcome = fx.engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!((outcome.imported_count, outcome.failed), (2, 1));

    // only successes are remembered, so the rejected entry is tried again
    let again = fx.engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!((again.imported_count, again.failed, again.already_seen), (0, 1, 2));
}

#[test]
fn test_rejected_entry_gives_back_its_media() {
    let sink = Arc::new(RecordingSink::default());
    let fetcher = Arc::new(StaticFetcher::default());
    let media = Arc::new(CountingResolver::default());
    let engine = FeedSyncEngine::new(
        StateHandle::in_memory(),
        sink.clone(),
        media.clone(),
        fetcher.clone(),
    );
    engine.set_feed_url(Some(FEED_URL)).unwrap();
    fetcher.serve(vec![
        entry("a", r#"<p>kept</p><img src="https://img.example.com/a.jpg">"#),
        entry(
            "b",
            r#"<p>REJECT</p><img src="https://img.example.com/b.jpg"><img src="https://img.example.com/c.png">"#,
        ),
    ]);

    let outcome = engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!((outcome.imported_count, outcome.failed), (1, 1));
    assert_eq!(sink.records.lock().unwrap()[0].media, vec![MediaId(1)]);
    assert_eq!(*media.released.lock().unwrap(), vec![MediaId(2), MediaId(3)]);

    // the retry resolves again and gives those back too
    engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(media.released.lock().unwrap().len(), 4);
}

#[test]
fn test_entries_without_guid_use_link_and_date() {
    let fx = fixture();
    let mut first = entry("x", "<p>one</p>");
    first.id = None;
    let mut second = first.clone();
    second.published = Some("Wed, 03 Mar 2021 10:00:00 +0800".to_string());
    fx.fetcher.serve(vec![first.clone(), second, first]);

    let outcome = fx.engine.sync(SyncTrigger::Manual).unwrap();
    assert_eq!(outcome.imported_count, 2);
    assert_eq!(outcome.already_seen, 1);
}

#[test]
fn test_last_sync_only_moves_on_success() {
    let fx = fixture();
    fx.fetcher.offline.store(true, Ordering::SeqCst);
    assert!(fx.engine.sync(SyncTrigger::Manual).is_err());
    assert!(fx.engine.state().unwrap().last_sync_at.is_none());

    fx.fetcher.offline.store(false, Ordering::SeqCst);
    fx.fetcher.serve(vec![entry("a", "<p>hi</p>")]);
    fx.engine.sync(SyncTrigger::Manual).unwrap();
    assert!(fx.engine.state().unwrap().last_sync_at.is_some());
}

#[test]
fn test_entry_body_is_cleaned_and_media_resolved() {
    let fx = fixture();
    fx.fetcher.serve(vec![entry(
        "a",
        r#"<div>Look<br><img src="https://img.example.com/1.jpg"><strong>now</strong></div>"#,
    )]);
    fx.engine.sync(SyncTrigger::Manual).unwrap();

    let records = fx.sink.records.lock().unwrap();
    let record = &records[0];
    assert_eq!(record.content, "Look\n\n<strong>now</strong>");
    assert_eq!(record.media_urls, vec!["https://img.example.com/1.jpg"]);
    assert_eq!(record.media, vec![MediaId(7)]);
    assert_eq!(record.source_ref.as_deref(), Some("https://example.com/a"));
    assert!(record.recorded_at.is_some());
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_scheduler_runs_until_disarmed() {
    let fx = fixture();
    fx.engine.set_enabled(true).unwrap();
    fx.fetcher.serve(vec![entry("a", "<p>hi</p>")]);

    let scheduler = SyncScheduler::new(fx.engine.clone(), Duration::from_millis(20));
    scheduler.apply(true).unwrap();
    assert!(scheduler.is_armed());
    assert!(wait_for(|| fx.fetcher.calls.load(Ordering::SeqCst) >= 3));

    assert!(scheduler.disarm());
    assert!(!scheduler.is_armed());
    let calls = fx.fetcher.calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), calls);
    assert_eq!(fx.sink.records.lock().unwrap().len(), 1);
}

#[test]
fn test_scheduled_runs_skip_while_disabled() {
    let fx = fixture();
    let scheduler = SyncScheduler::new(fx.engine.clone(), Duration::from_millis(10));
    scheduler.arm().unwrap();
    thread::sleep(Duration::from_millis(60));
    scheduler.apply(false).unwrap();

    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
    assert!(!scheduler.disarm());
}
