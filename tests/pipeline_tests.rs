mod common;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use tickflow::analytics::{analyze, AnalyticsOptions, ModelKind, ModelStatus, Scaling};
use tickflow::backoff::ReconnectBackoff;
use tickflow::config::{GeneratorConfig, StoreBackend, StoreConfig};
use tickflow::dispatch::{self, TickSink};
use tickflow::generator::{RandomTickGenerator, ReplayGenerator, TimestampSource};
use tickflow::model::tick::Tick;
use tickflow::pipeline::{run_consumer, run_ingest, PipelineSettings};
use tickflow::store::{PostgresConnector, SqliteConnector, StoreConnector, TickStore};
use tickflow::writer::PersistenceWriter;

use common::MemoryConnector;

fn settings(iterations: Option<usize>) -> PipelineSettings {
    PipelineSettings {
        interval: Duration::from_millis(5),
        iterations,
        channel_capacity: 64,
        max_redeliveries: 3,
        disconnected_pause: Duration::ZERO,
        reconnect_initial: Duration::from_millis(10),
        reconnect_max: Duration::from_millis(100),
    }
}

fn seeded_generator() -> RandomTickGenerator {
    let cfg = GeneratorConfig {
        seed: Some(42),
        ..GeneratorConfig::default()
    };
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 14, 0, 0).unwrap();
    RandomTickGenerator::from_config(&cfg)
        .with_clock(TimestampSource::stepped(start, chrono::Duration::milliseconds(500)))
}

#[tokio::test]
/// Fifteen generated ticks for AAPL/MSFT/GOOG land in the store and feed a
/// z-score + regression analysis over all fifteen rows.
async fn end_to_end_ingest_then_analyze() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ticks.sqlite");
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let summary = run_ingest(
        seeded_generator(),
        SqliteConnector::new(&db),
        settings(Some(15)),
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(summary.producer.iterations, 15);
    assert_eq!(summary.producer.dispatched, 15);
    assert_eq!(summary.consumer.written, 15);
    assert_eq!(summary.consumer.skipped, 0);
    assert!(summary.connected_at_exit);

    let mut store = SqliteConnector::new(&db).connect().unwrap();
    let ticks = store.query_all(None).unwrap();
    assert_eq!(ticks.len(), 15);
    let symbols: BTreeSet<&str> = ticks.iter().map(|t| t.symbol.as_str()).collect();
    assert!(symbols.is_subset(&["AAPL", "GOOG", "MSFT"].into()));

    let report = analyze(
        &ticks,
        &AnalyticsOptions {
            scaling: Scaling::ZScore,
            model: ModelKind::Regression,
            ..AnalyticsOptions::default()
        },
    );
    assert_eq!(report.rows.len(), 15);
    let ModelStatus::Regressed(fit) = &report.status else {
        panic!("expected regression, got {}", report.status);
    };
    assert!(fit.fit.r_squared <= 1.0);
}

#[tokio::test]
/// Re-running the same deterministic session only produces skips.
async fn replaying_the_same_session_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ticks.sqlite");

    for expected_written in [10, 0] {
        let (_tx, rx) = watch::channel(false);
        let summary = run_ingest(seeded_generator(), SqliteConnector::new(&db), settings(Some(10)), rx)
            .await
            .unwrap();
        assert_eq!(summary.consumer.written, expected_written);
        assert_eq!(summary.consumer.written + summary.consumer.skipped, 10);
    }
    let mut store = SqliteConnector::new(&db).connect().unwrap();
    assert_eq!(store.query_all(None).unwrap().len(), 10);
}

#[tokio::test]
/// The stop signal ends an unbounded session between iterations and every
/// dispatched tick is still persisted.
async fn shutdown_signal_stops_unbounded_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ticks.sqlite");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
    });

    let summary = run_ingest(seeded_generator(), SqliteConnector::new(&db), settings(None), shutdown_rx)
        .await
        .unwrap();

    assert!(summary.producer.iterations > 0);
    assert_eq!(summary.consumer.written, summary.producer.dispatched);
    let mut store = SqliteConnector::new(&db).connect().unwrap();
    assert_eq!(store.query_all(None).unwrap().len(), summary.consumer.written);
}

#[tokio::test]
/// External records with a bad timestamp are discarded individually; duplicates
/// in the feed are skipped by the store.
async fn replay_file_discards_malformed_records() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ticks.sqlite");
    let feed = dir.path().join("feed.jsonl");
    let mut f = std::fs::File::create(&feed).unwrap();
    writeln!(f, r#"{{"symbol":"AAPL","timestamp":"2024-04-01T14:00:00","price":190.1,"volume":1000}}"#).unwrap();
    writeln!(f, r#"{{"symbol":"AAPL","timestamp":"not-a-time","price":190.2,"volume":1000}}"#).unwrap();
    writeln!(f, r#"{{"symbol":"MSFT","timestamp":"2024-04-01T14:00:01+00:00","price":301.0,"volume":2000}}"#).unwrap();
    writeln!(f, r#"{{"symbol":"AAPL","timestamp":"2024-04-01T14:00:00","price":190.1,"volume":1000}}"#).unwrap();
    drop(f);

    let reader = std::io::BufReader::new(std::fs::File::open(&feed).unwrap());
    let (_tx, rx) = watch::channel(false);
    let summary = run_ingest(ReplayGenerator::new(reader), SqliteConnector::new(&db), settings(None), rx)
        .await
        .unwrap();

    assert_eq!(summary.producer.generated, 3);
    assert_eq!(summary.consumer.written, 2);
    assert_eq!(summary.consumer.skipped, 1);
}

#[tokio::test]
/// With the store down for the whole session nothing is written, dropped or
/// crashes; once shutdown is signalled the held ticks are abandoned.
async fn unreachable_store_holds_ticks_until_shutdown() {
    let connector = PostgresConnector::from_config(&StoreConfig {
        backend: StoreBackend::Postgres,
        host: "127.0.0.1".to_string(),
        port: 1,
        database: "ticks".to_string(),
        user: "postgres".to_string(),
        password_env: None,
        sqlite_path: PathBuf::from("unused.sqlite"),
        connect_timeout_ms: 200,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown_tx.send(true);
    });
    let mut s = settings(Some(3));
    s.max_redeliveries = 1;
    s.disconnected_pause = Duration::from_millis(5);

    let summary = run_ingest(seeded_generator(), connector, s, shutdown_rx).await.unwrap();
    assert!(!summary.connected_at_exit);
    assert_eq!(summary.producer.dispatched, 3);
    assert_eq!(summary.consumer.written, 0);
    assert_eq!(summary.consumer.dropped, 0);
    assert!(summary.consumer.paused > 2);
    assert_eq!(summary.consumer.abandoned, 3);
}

fn at(sec: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 14, 0, sec).unwrap()
}

#[test]
/// A failed write is not retried by the writer itself; the dispatcher
/// redelivers it and the second delivery is stored exactly once.
fn failed_write_is_redelivered_and_stored_once() {
    let connector = MemoryConnector::default();
    connector.fail_writes(1);

    let mut writer = PersistenceWriter::new(connector.clone(), Duration::ZERO);
    let (sink, mut source) = dispatch::channel(8, 3);
    sink.send(Tick::new("AAPL", at(0), 190.0, 100)).unwrap();
    sink.send(Tick::new("MSFT", at(0), 300.0, 100)).unwrap();
    // Broker-level duplicate of the first tick.
    sink.send(Tick::new("AAPL", at(0), 190.0, 100)).unwrap();
    drop(sink);

    let (_tx, rx) = watch::channel(false);
    let mut backoff = ReconnectBackoff::new(Duration::ZERO, Duration::ZERO);
    let summary = run_consumer(&mut writer, &mut source, &mut backoff, &rx);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.redelivered, 1);
    assert_eq!(summary.written, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.dropped, 0);
    assert_eq!(connector.row_count(), 2);
    assert!(writer.is_connected());
}

#[test]
/// Pausing on a disconnected store does not spend the redelivery budget: a
/// tick sent during an outage longer than budget x pause is still stored
/// once the scheduled reconnect succeeds.
fn outage_longer_than_redelivery_budget_loses_nothing() {
    let connector = MemoryConnector::default();
    // Construction and the first scheduled reconnect both fail.
    connector.fail_connects(2);

    let mut writer = PersistenceWriter::new(connector.clone(), Duration::from_millis(20));
    assert!(!writer.is_connected());
    let (sink, mut source) = dispatch::channel(8, 3);
    sink.send(Tick::new("AAPL", at(1), 190.0, 100)).unwrap();
    drop(sink);

    let (_tx, rx) = watch::channel(false);
    let mut backoff = ReconnectBackoff::new(Duration::from_millis(200), Duration::from_secs(1));
    let started = Instant::now();
    let summary = run_consumer(&mut writer, &mut source, &mut backoff, &rx);

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(summary.paused > 3);
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.redelivered, 0);
    assert_eq!(summary.written, 1);
    assert_eq!(connector.connects(), 3);
    assert_eq!(connector.row_count(), 1);
    assert!(writer.is_connected());
}

#[test]
/// A connection lost mid-session disconnects the writer, schedules a
/// reconnect through the backoff and redelivers the interrupted tick.
fn connection_lost_mid_session_reconnects_and_redelivers() {
    let connector = MemoryConnector::default();
    connector.drop_connection_after(1);

    let mut writer = PersistenceWriter::new(connector.clone(), Duration::from_millis(5));
    let (sink, mut source) = dispatch::channel(8, 3);
    for sec in 0..3 {
        sink.send(Tick::new("GOOG", at(sec), 140.0, 100)).unwrap();
    }
    drop(sink);

    let (_tx, rx) = watch::channel(false);
    let mut backoff = ReconnectBackoff::new(Duration::from_millis(30), Duration::from_secs(1));
    let started = Instant::now();
    let summary = run_consumer(&mut writer, &mut source, &mut backoff, &rx);

    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.redelivered, 1);
    assert_eq!(summary.written, 3);
    assert_eq!(summary.dropped, 0);
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.row_count(), 3);
    assert!(writer.is_connected());
    assert_eq!(backoff.failures(), 0);
}
