use super::datetime::DatetimeNormalizer;
use super::parser::RecordParser;
use super::reconciler::Reconciler;
use super::remote::{ByteStream, MemoryRemote, RemoteConnector, RemoteFile, RemoteSession};
use super::sync::{PassSummary, SyncEngine};
use crate::assets::{asset_key, AssetStore, LocalAssetStore};
use crate::config::RowDefaults;
use crate::db::models::{Area, RemoteDescriptor};
use crate::db::{MemoryStore, ParkingStore, PgStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

const FOLDER: &str = "/CF02200-200034BE004";

struct Harness {
    store: Arc<MemoryStore>,
    remote: MemoryRemote,
    engine: SyncEngine,
    area: Area,
}

fn descriptor() -> RemoteDescriptor {
    RemoteDescriptor {
        host: "camera.local".to_string(),
        port: 21,
        user: "cam".to_string(),
        password: "secret".to_string(),
        secure: true,
        accept_invalid_certs: true,
        folder: FOLDER.to_string(),
    }
}

fn engine(store: Arc<dyn ParkingStore>, remote: &MemoryRemote) -> SyncEngine {
    SyncEngine::new(
        store.clone(),
        Arc::new(remote.clone()),
        RecordParser::new(';', RowDefaults::default()).unwrap(),
        DatetimeNormalizer::new(600).unwrap(),
        Reconciler::new(store, 80),
    )
}

fn engine_with_assets(
    store: Arc<dyn ParkingStore>,
    connector: Arc<dyn RemoteConnector>,
    assets: Arc<dyn AssetStore>,
) -> SyncEngine {
    SyncEngine::new(
        store.clone(),
        connector,
        RecordParser::new(';', RowDefaults::default()).unwrap(),
        DatetimeNormalizer::new(600).unwrap(),
        Reconciler::new(store, 80).with_assets(assets),
    )
}

/// Server that rejects `..` and only lets the target folder be entered a
/// limited number of times per session
struct RestrictedRemote {
    inner: MemoryRemote,
    target_entries: usize,
}

struct RestrictedSession {
    inner: Box<dyn RemoteSession>,
    target_entries_left: usize,
}

#[async_trait]
impl RemoteConnector for RestrictedRemote {
    async fn connect(&self, remote: &RemoteDescriptor) -> crate::Result<Box<dyn RemoteSession>> {
        Ok(Box::new(RestrictedSession {
            inner: self.inner.connect(remote).await?,
            target_entries_left: self.target_entries,
        }))
    }
}

#[async_trait]
impl RemoteSession for RestrictedSession {
    async fn change_directory(&mut self, path: &str) -> crate::Result<()> {
        if path == ".." {
            return Err(crate::Error::NotFound("550 CDUP not permitted".to_string()));
        }
        if path == FOLDER {
            if self.target_entries_left == 0 {
                return Err(crate::Error::NotFound(format!("550 {}: permission denied", path)));
            }
            self.target_entries_left -= 1;
        }
        self.inner.change_directory(path).await
    }

    async fn current_directory(&mut self) -> crate::Result<String> {
        self.inner.current_directory().await
    }

    async fn list(&mut self) -> crate::Result<Vec<RemoteFile>> {
        self.inner.list().await
    }

    async fn open_stream(&mut self, name: &str) -> crate::Result<ByteStream> {
        self.inner.open_stream(name).await
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

fn temp_assets() -> (std::path::PathBuf, Arc<LocalAssetStore>) {
    let root = std::env::temp_dir().join(format!("parkwatch-sync-{}", uuid::Uuid::new_v4()));
    let assets = Arc::new(LocalAssetStore::new(&root));
    (root, assets)
}

async fn harness(capacity: i32) -> Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    let area = Area::new("Car park", capacity, Some(descriptor()));
    store.create_area(&area).await?;
    let remote = MemoryRemote::new();
    let engine = engine(store.clone(), &remote);
    Ok(Harness {
        store,
        remote,
        engine,
        area,
    })
}

fn mtime(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 2, 0, minute, 0).unwrap()
}

fn instant(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

async fn occupancy(h: &Harness) -> Result<i32> {
    Ok(h.store.get_area(&h.area.id).await?.unwrap().current_occupancy)
}

async fn assert_counter_matches_presence(h: &Harness) -> Result<()> {
    let presence = h.store.list_presence(&h.area.id).await?.len() as i32;
    assert_eq!(occupancy(h).await?, presence);
    assert_eq!(h.store.recount_occupancy(&h.area.id).await?, presence);
    Ok(())
}

fn assert_success(summary: &PassSummary) {
    assert!(summary.success, "pass failed: {:?}", summary.error);
}

#[tokio::test]
async fn test_first_approach_creates_presence() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-56-53-630;ABC123;AUS;92;0;2025-04-02/ABC123.jpg;APPROACHING;CAR\n",
    );

    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.rows_committed, 1);
    assert_eq!(summary.previous_watermark, None);
    assert_eq!(summary.new_watermark, Some(instant("2025-04-01T21:56:53.630Z")));

    let events = h.store.list_events(&h.area.id).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate_number, "ABC123");

    let presence = h.store.list_presence(&h.area.id).await?;
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].entry_time, instant("2025-04-01T21:56:53.630Z"));
    assert_eq!(occupancy(&h).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_leaving_removes_presence_and_advances_watermark() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-56-53-630;ABC123;AUS;92;0;a.jpg;APPROACHING\n",
    );
    assert_success(&h.engine.run_pass(h.area.id).await);

    h.remote.append_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(2),
        "2025-04-02;09-10-00-000;ABC123;AUS;92;0;b.jpg;LEAVING\n",
    );
    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.rows_committed, 1);
    assert_eq!(summary.new_watermark, Some(instant("2025-04-01T23:10:00Z")));

    assert!(h.store.list_presence(&h.area.id).await?.is_empty());
    assert_eq!(occupancy(&h).await?, 0);
    assert_eq!(h.store.list_events(&h.area.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_double_approach_self_heals() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;ABC123;AUS;92;0;first.jpg;APPROACHING\n\
         2025-04-02;08-00-00;ABC123;AUS;92;0;second.jpg;APPROACHING\n",
    );

    assert_success(&h.engine.run_pass(h.area.id).await);

    let presence = h.store.list_presence(&h.area.id).await?;
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].image, "second.jpg");
    assert_eq!(occupancy(&h).await?, 1);
    assert_counter_matches_presence(&h).await
}

#[tokio::test]
async fn test_empty_plate_is_dropped_and_pass_continues() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;;AUS;92;0;x.jpg;APPROACHING\n\
         2025-04-02;07-00-01;GOOD1;AUS;92;0;y.jpg;APPROACHING\n",
    );

    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.rows_seen, 2);
    assert_eq!(summary.rows_rejected, 1);
    assert_eq!(summary.rows_committed, 1);

    let events = h.store.list_events(&h.area.id).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate_number, "GOOD1");
    assert_eq!(occupancy(&h).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_timestamps_are_skipped() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "yesterday;07-00-00;BAD1;AUS;92;0;x.jpg;APPROACHING\n\
         2025-04-02;7.00;BAD2;AUS;92;0;x.jpg;APPROACHING\n\
         02/04/2025;07:00:02;GOOD1;AUS;92;0;y.jpg;APPROACHING\n",
    );

    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.rows_rejected, 2);
    assert_eq!(summary.rows_committed, 1);
    assert_eq!(summary.new_watermark, Some(instant("2025-04-01T21:00:02Z")));
    Ok(())
}

#[tokio::test]
async fn test_replay_is_idempotent() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;AAA111;AUS;92;0;x.jpg;APPROACHING\n\
         2025-04-02;07-05-00;BBB222;AUS;92;0;x.jpg;APPROACHING\n\
         2025-04-02;07-10-00;AAA111;AUS;92;0;x.jpg;LEAVING\n",
    );

    let first = h.engine.run_pass(h.area.id).await;
    assert_success(&first);
    let events_after_first = h.store.list_events(&h.area.id).await?.len();

    let second = h.engine.run_pass(h.area.id).await;
    assert_success(&second);
    assert_eq!(second.rows_committed, 0);
    assert_eq!(second.rows_skipped, 3);
    assert_eq!(second.new_watermark, first.new_watermark);
    assert_eq!(h.store.list_events(&h.area.id).await?.len(), events_after_first);
    assert_counter_matches_presence(&h).await
}

#[tokio::test]
async fn test_watermark_is_monotonic() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;10-00-00;LATE1;AUS;92;0;x.jpg;APPROACHING\n",
    );
    let first = h.engine.run_pass(h.area.id).await;
    assert_success(&first);

    // A file uploaded later holding only older rows never rewinds the watermark
    h.remote.put_file(
        FOLDER,
        "2025-04-01.csv",
        mtime(5),
        "2025-04-01;23-00-00;OLD1;AUS;92;0;x.jpg;APPROACHING\n",
    );
    let second = h.engine.run_pass(h.area.id).await;
    assert_success(&second);
    assert_eq!(second.rows_skipped, 2);
    assert_eq!(second.new_watermark, first.new_watermark);

    let stored = h.store.get_area(&h.area.id).await?.unwrap().watermark;
    assert_eq!(stored, first.new_watermark);
    Ok(())
}

#[tokio::test]
async fn test_files_are_processed_oldest_first() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-03.csv",
        mtime(9),
        "2025-04-03;07-00-00;ABC123;AUS;92;0;x.jpg;LEAVING\n",
    );
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;ABC123;AUS;92;0;x.jpg;APPROACHING\n",
    );
    h.remote.put_file(FOLDER, "readme.txt", mtime(0), "not a csv");

    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.rows_committed, 2);

    // APPROACHING was reconciled before LEAVING
    assert!(h.store.list_presence(&h.area.id).await?.is_empty());
    assert_eq!(occupancy(&h).await?, 0);

    let events = h.store.list_events(&h.area.id).await?;
    assert_eq!(events[0].status, "APPROACHING");
    assert_eq!(events[1].status, "LEAVING");
    Ok(())
}

#[tokio::test]
async fn test_connection_failure_leaves_watermark() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;ABC123;AUS;92;0;x.jpg;APPROACHING\n",
    );
    h.remote.refuse_connections(true);

    let summary = h.engine.run_pass(h.area.id).await;
    assert!(!summary.success);
    assert!(summary.error.is_some());
    assert_eq!(summary.new_watermark, None);
    assert_eq!(h.store.get_area(&h.area.id).await?.unwrap().watermark, None);
    assert!(h.store.list_events(&h.area.id).await?.is_empty());

    h.remote.refuse_connections(false);
    assert_success(&h.engine.run_pass(h.area.id).await);
    assert_eq!(h.store.list_events(&h.area.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_file_retrieval_aborts_without_committing() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-56-53-630;ABC123;AUS;92;0;a.jpg;APPROACHING\n",
    );
    h.remote.put_file(
        FOLDER,
        "2025-04-03.csv",
        mtime(2),
        "2025-04-03;08-00-00-000;XYZ789;AUS;88;0;b.jpg;APPROACHING\n",
    );
    h.remote.fail_open("2025-04-03.csv", true);

    let summary = h.engine.run_pass(h.area.id).await;
    assert!(!summary.success);
    assert!(summary.error.is_some());
    // the first file was reconciled before the second could not be read
    assert_eq!(summary.rows_committed, 1);
    assert_eq!(summary.new_watermark, summary.previous_watermark);
    assert_eq!(h.store.get_area(&h.area.id).await?.unwrap().watermark, None);
    assert_eq!(h.remote.sessions_closed(), 1);

    h.remote.fail_open("2025-04-03.csv", false);
    let summary = h.engine.run_pass(h.area.id).await;
    assert_success(&summary);
    assert_eq!(summary.rows_committed, 2);
    assert_eq!(summary.new_watermark, Some(instant("2025-04-02T22:00:00Z")));
    assert_eq!(h.remote.sessions_closed(), 2);

    let presence = h.store.list_presence(&h.area.id).await?;
    assert_eq!(presence.len(), 2);
    assert_counter_matches_presence(&h).await
}

#[tokio::test]
async fn test_images_resolved_without_parent_navigation() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let area = Area::new("Car park", 10, Some(descriptor()));
    store.create_area(&area).await?;

    let inner = MemoryRemote::new();
    inner.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-56-53-630;ABC123;AUS;92;0;2025-04-02/ABC123.jpg;APPROACHING\n",
    );
    inner.put_file(
        FOLDER,
        "2025-04-02-b.csv",
        mtime(2),
        "2025-04-02;08-10-00-000;XYZ789;AUS;88;0;2025-04-02/XYZ789.jpg;APPROACHING\n",
    );
    inner.put_file(&format!("{}/2025-04-02", FOLDER), "ABC123.jpg", mtime(1), vec![0xFFu8, 0xD8]);

    let (root, assets) = temp_assets();
    let connector = Arc::new(RestrictedRemote {
        inner: inner.clone(),
        target_entries: usize::MAX,
    });
    let engine = engine_with_assets(store.clone(), connector, assets.clone());

    let summary = engine.run_pass(area.id).await;
    assert_success(&summary);
    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.rows_committed, 2);
    assert_eq!(summary.rows_failed, 0);

    let date = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
    let key = asset_key(&area.id, date, "ABC123.jpg");
    let events = store.list_events(&area.id).await?;
    let fetched = events.iter().find(|e| e.plate_number == "ABC123").unwrap();
    assert_eq!(fetched.image, assets.locate(&key));
    let missing = events.iter().find(|e| e.plate_number == "XYZ789").unwrap();
    assert_eq!(missing.image, "2025-04-02/XYZ789.jpg");
    assert_eq!(inner.sessions_closed(), 1);

    tokio::fs::remove_dir_all(&root).await?;
    Ok(())
}

#[tokio::test]
async fn test_losing_target_folder_aborts_pass() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let area = Area::new("Car park", 10, Some(descriptor()));
    store.create_area(&area).await?;

    let inner = MemoryRemote::new();
    inner.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-56-53-630;ABC123;AUS;92;0;2025-04-02/ABC123.jpg;APPROACHING\n",
    );
    inner.put_file(&format!("{}/2025-04-02", FOLDER), "ABC123.jpg", mtime(1), vec![0xFFu8, 0xD8]);

    let (root, assets) = temp_assets();
    // enough to reach the folder, not enough to come back from the date folder
    let connector = Arc::new(RestrictedRemote {
        inner: inner.clone(),
        target_entries: 1,
    });
    let engine = engine_with_assets(store.clone(), connector, assets);

    let summary = engine.run_pass(area.id).await;
    assert!(!summary.success);
    assert!(summary
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Lost target folder")));
    assert_eq!(summary.rows_failed, 0);
    assert_eq!(summary.new_watermark, None);
    assert!(store.list_events(&area.id).await?.is_empty());
    assert_eq!(inner.sessions_closed(), 1);

    if tokio::fs::try_exists(&root).await? {
        tokio::fs::remove_dir_all(&root).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_folder_aborts_and_closes_session() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut remote_descriptor = descriptor();
    remote_descriptor.folder = "/does-not-exist".to_string();
    let area = Area::new("Car park", 10, Some(remote_descriptor));
    store.create_area(&area).await?;

    let remote = MemoryRemote::new();
    remote.put_file(FOLDER, "2025-04-02.csv", mtime(1), "");
    let engine = engine(store.clone(), &remote);

    let summary = engine.run_pass(area.id).await;
    assert!(!summary.success);
    assert_eq!(remote.sessions_opened(), 1);
    assert_eq!(remote.sessions_closed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_sessions_are_closed_after_success() -> Result<()> {
    let h = harness(10).await?;
    h.remote.put_file(FOLDER, "2025-04-02.csv", mtime(1), "");
    assert_success(&h.engine.run_pass(h.area.id).await);
    assert_success(&h.engine.run_pass(h.area.id).await);
    assert_eq!(h.remote.sessions_opened(), 2);
    assert_eq!(h.remote.sessions_closed(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_area_and_missing_remote() -> Result<()> {
    let h = harness(10).await?;
    let summary = h.engine.run_pass(uuid::Uuid::new_v4()).await;
    assert!(!summary.success);

    let local_only = Area::new("No camera", 10, None);
    h.store.create_area(&local_only).await?;
    let summary = h.engine.run_pass(local_only.id).await;
    assert!(!summary.success);
    assert_eq!(h.remote.sessions_opened(), 0);
    Ok(())
}

#[tokio::test]
async fn test_occupancy_matches_presence_after_mixed_traffic() -> Result<()> {
    let h = harness(50).await?;
    let mut csv = String::new();
    let base = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
    for i in 0..30u32 {
        let plate = format!("P{}", i % 7);
        let status = if i % 3 == 2 { "LEAVING" } else { "APPROACHING" };
        let t = (base + Duration::minutes(i as i64)).format("%H-%M-%S");
        csv.push_str(&format!("2025-04-02;{};{};AUS;90;0;x.jpg;{}\n", t, plate, status));
    }
    h.remote.put_file(FOLDER, "2025-04-02.csv", mtime(1), csv);

    assert_success(&h.engine.run_pass(h.area.id).await);

    let presence = h.store.list_presence(&h.area.id).await?;
    let mut plates: Vec<&str> = presence.iter().map(|p| p.plate_number.as_str()).collect();
    plates.sort();
    plates.dedup();
    assert_eq!(plates.len(), presence.len());
    assert_counter_matches_presence(&h).await
}

// Runs the engine against Postgres. Needs a scratch database.
#[tokio::test]
async fn test_pass_against_postgres() -> Result<()> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        println!("Skipping Postgres test. Set TEST_DATABASE_URL to run.");
        return Ok(());
    };

    let config = crate::config::DatabaseConfig {
        url,
        max_connections: 2,
        auto_migrate: true,
    };
    let db = crate::db::DatabaseService::new(&config).await?;
    let store: Arc<PgStore> = Arc::new(db.store());

    let area = Area::new(&format!("pg-{}", uuid::Uuid::new_v4()), 10, Some(descriptor()));
    store.create_area(&area).await?;

    let remote = MemoryRemote::new();
    remote.put_file(
        FOLDER,
        "2025-04-02.csv",
        mtime(1),
        "2025-04-02;07-00-00;ABC123;AUS;92;0;x.jpg;APPROACHING\n\
         2025-04-02;07-00-00;ABC123;AUS;92;0;x.jpg;APPROACHING\n",
    );
    let engine = engine(store.clone(), &remote);

    assert_success(&engine.run_pass(area.id).await);
    assert_success(&engine.run_pass(area.id).await);

    assert_eq!(store.list_presence(&area.id).await?.len(), 1);
    assert_eq!(store.get_area(&area.id).await?.unwrap().current_occupancy, 1);
    assert_eq!(store.list_events(&area.id).await?.len(), 2);
    Ok(())
}
