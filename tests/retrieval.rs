//! Retrieval, key derivation and publishing over an in-memory site.

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use audiocrawl::config::{Config, StorageConfig};
use audiocrawl::context::RunEvent;
use audiocrawl::error::HarvestError;
use audiocrawl::models::{ContentMetadata, ContentRecord, RecordBatch, ResourceRef, RunLog};
use audiocrawl::services::artifacts::RagCollection;
use audiocrawl::services::object_store::FsObjectStore;
use audiocrawl::services::{Pipeline, PlacementDeriver, Retriever, RunRecorder};
use common::{context, lesson_page, test_config, MemorySite};

fn record(n: usize, title: &str) -> ContentRecord {
    ContentRecord::new(
        ResourceRef::parse(&MemorySite::url(&lesson_path(n))).unwrap(),
        ResourceRef::parse(&MemorySite::url(&format!("/media/{}.mp3", n))).unwrap(),
        ContentMetadata {
            title: Some(title.to_string()),
            ..Default::default()
        },
    )
}

fn lesson_path(n: usize) -> String {
    format!("/multimedia/video_cdo/aid/{}/jewish/lesson.htm", 100 + n)
}

fn publish(site: &MemorySite, n: usize, title: &str, size: usize) {
    site.html(
        &lesson_path(n),
        &lesson_page(title, &format!("/media/{}.mp3", n)),
    )
    .audio(&format!("/media/{}.mp3", n), size);
}

fn pipeline(config: &Config, staging: &Path, store_dir: &Path) -> Pipeline {
    let storage = StorageConfig::default();
    let store = FsObjectStore::new(store_dir, storage.bucket.clone(), None);
    Pipeline::new(
        Retriever::new(
            config.retrieval.clone(),
            staging,
            config.site.selectors.download_trigger.clone(),
        ),
        PlacementDeriver::new(&storage, "mp3"),
        Box::new(store),
        "mp3",
        Duration::ZERO,
    )
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_retrieve_stages_and_relocates_file() {
    let site = MemorySite::new();
    publish(&site, 1, "First", 4096);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let retriever = Retriever::new(
        config.retrieval.clone(),
        &staging,
        config.site.selectors.download_trigger.clone(),
    );

    let target = tmp.path().join("work").join("0001.mp3");
    let asset = retriever
        .retrieve(&mut driver, &mut ctx, &record(1, "First"), 1, &target)
        .await
        .unwrap();

    assert_eq!(asset.byte_length, 4096);
    assert_eq!(asset.local_path, target);
    assert!(target.exists());
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    assert_eq!(site.request_count(&lesson_path(1)), 1);
}

#[tokio::test]
async fn test_undersized_file_is_rejected_and_retried() {
    let site = MemorySite::new();
    publish(&site, 1, "Error page", 500);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let retriever = Retriever::new(
        config.retrieval.clone(),
        &staging,
        config.site.selectors.download_trigger.clone(),
    );

    let err = retriever
        .retrieve(
            &mut driver,
            &mut ctx,
            &record(1, "Error page"),
            1,
            &tmp.path().join("0001.mp3"),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarvestError::AssetTooSmall {
            size: 500,
            minimum: 1000
        }
    ));
    assert_eq!(site.request_count("/media/1.mp3"), 3);
    assert!(!tmp.path().join("0001.mp3").exists());
}

#[tokio::test]
async fn test_download_triggered_from_source_page() {
    let site = MemorySite::new();
    publish(&site, 1, "Triggered", 2048);
    // Direct access fails; only the page link works
    site.fail("/media/direct.mp3");

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let retriever = Retriever::new(
        config.retrieval.clone(),
        &staging,
        config.site.selectors.download_trigger.clone(),
    );

    let mut rec = record(1, "Triggered");
    rec.download_url = ResourceRef::parse(&MemorySite::url("/media/direct.mp3")).unwrap();
    let asset = retriever
        .retrieve(&mut driver, &mut ctx, &rec, 1, &tmp.path().join("0001.mp3"))
        .await
        .unwrap();

    assert_eq!(asset.byte_length, 2048);
    assert_eq!(site.request_count("/media/1.mp3"), 1);
}

#[tokio::test]
async fn test_failed_record_does_not_stop_the_run() {
    let site = MemorySite::new();
    publish(&site, 1, "Rabbi Gordon: Bereishit!", 4096);
    // Record 2 is missing from the site entirely
    publish(&site, 3, "Noach", 3000);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());

    let out = tmp.path().join("out");
    let pipeline = pipeline(&config, &staging, &tmp.path().join("store"))
        .with_recorder(RunRecorder::new(&out));

    let records = vec![
        record(1, "Rabbi Gordon: Bereishit!"),
        record(2, "Lech Lecha"),
        record(3, "Noach"),
    ];
    let outcome = pipeline.run(&mut driver, &mut ctx, &records, &work).await;

    let summary = &outcome.log.summary;
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.success_rate, "66.67%");
    assert!(outcome.log.finished_at.is_some());

    let keys: Vec<_> = outcome.placements.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "rabbi-gordon/rabbi-gordon-bereishit/101/0001-rabbi-gordon-bereishit.mp3",
            "rabbi-gordon/noach/103/0003-noach.mp3",
        ]
    );
    assert_eq!(outcome.placements[1].rag_document.id, "audio-0003");

    assert_eq!(outcome.failed, vec![records[1].with_sequence_index(2)]);
    let failed_entry = &outcome.log.entries[1];
    assert!(!failed_entry.success);
    assert_eq!(failed_entry.index, 2);
    assert!(failed_entry.error.as_deref().unwrap().contains("Lech Lecha"));

    for key in &keys {
        assert!(tmp.path().join("store").join(key).exists());
    }
    assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    assert_eq!(ctx.counters.records_succeeded, 2);
    assert_eq!(ctx.counters.records_failed, 1);

    let saved = outcome.artifacts.unwrap();
    let log: RunLog = read_json(&saved.log);
    assert_eq!(log.entries.len(), 3);
    assert!(log.finished_at.is_some());
    let failed: RecordBatch = read_json(&saved.failed.unwrap());
    assert_eq!(failed.data.len(), 1);
    assert_eq!(failed.data[0].sequence_index, Some(2));
}

#[tokio::test]
async fn test_rerun_keeps_original_sequence_index() {
    let site = MemorySite::new();
    publish(&site, 1, "Vayeira", 4096);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let pipeline = pipeline(&config, &staging, &tmp.path().join("store"));

    let records = vec![record(1, "Vayeira").with_sequence_index(7)];
    let outcome = pipeline.run(&mut driver, &mut ctx, &records, &work).await;

    assert_eq!(outcome.log.summary.successful, 1);
    assert_eq!(
        outcome.placements[0].key,
        "rabbi-gordon/vayeira/101/0007-vayeira.mp3"
    );
    assert_eq!(outcome.placements[0].rag_document.id, "audio-0007");
    assert_eq!(outcome.log.entries[0].index, 7);
}

#[tokio::test]
async fn test_interrupted_run_keeps_completed_records() {
    let site = MemorySite::new();
    publish(&site, 1, "Bereishit", 4096);
    // Record 2's trigger leads to a plain page, so it waits out every attempt
    site.html(&lesson_path(2), &lesson_page("Noach", "/media/2.htm"))
        .html("/media/2.htm", "<p>Coming soon</p>");
    publish(&site, 3, "Lech Lecha", 4096);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let out = tmp.path().join("out");
    let mut driver = site.driver_with_downloads(&staging);
    let (tx, mut rx) = mpsc::channel(100);
    let mut ctx = context(&config, tmp.path()).with_events(tx);
    let pipeline = pipeline(&config, &staging, &tmp.path().join("store"))
        .with_recorder(RunRecorder::new(&out));

    let records = vec![
        record(1, "Bereishit"),
        record(2, "Noach"),
        record(3, "Lech Lecha"),
    ];
    let first_done = async {
        while let Some(event) = rx.recv().await {
            if matches!(event, RunEvent::RecordCompleted { index: 1, .. }) {
                return;
            }
        }
    };
    tokio::select! {
        _ = pipeline.run(&mut driver, &mut ctx, &records, &work) => {
            panic!("run finished before it was interrupted")
        }
        _ = first_done => {}
    }

    let saved = pipeline.recorder().unwrap().artifacts();
    let log: RunLog = read_json(&saved.log);
    assert!(log.finished_at.is_none());
    assert_eq!(log.summary.successful, 1);
    assert_eq!(log.entries.len(), 1);
    assert_eq!(log.entries[0].index, 1);
    let rag: RagCollection = read_json(&saved.rag);
    assert_eq!(rag.count, 1);
    assert_eq!(rag.documents[0].id, "audio-0001");
    assert!(saved.failed.is_none());
    assert_eq!(site.request_count(&lesson_path(3)), 0);
}

#[tokio::test]
async fn test_extensionless_download_is_staged() {
    let site = MemorySite::new();
    site.html(&lesson_path(5), &lesson_page("Vayishlach", "/download?id=5"))
        .audio("/download?id=5", 2048);

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let retriever = Retriever::new(
        config.retrieval.clone(),
        &staging,
        config.site.selectors.download_trigger.clone(),
    );

    let mut rec = record(5, "Vayishlach");
    rec.download_url = ResourceRef::parse(&MemorySite::url("/download?id=5")).unwrap();
    let target = tmp.path().join("0005.mp3");
    let asset = retriever
        .retrieve(&mut driver, &mut ctx, &rec, 5, &target)
        .await
        .unwrap();

    assert_eq!(asset.byte_length, 2048);
    assert!(target.exists());
    assert_eq!(site.request_count("/download?id=5"), 1);
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn test_broken_trigger_fails_without_waiting() {
    let site = MemorySite::new();
    site.html(&lesson_path(1), &lesson_page("Vayeshev", "/media/gone.mp3"))
        .fail("/media/gone.mp3");

    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("downloads");
    let mut driver = site.driver_with_downloads(&staging);
    let mut ctx = context(&config, tmp.path());
    let retriever = Retriever::new(
        config.retrieval.clone(),
        &staging,
        config.site.selectors.download_trigger.clone(),
    );

    let started = Instant::now();
    let err = retriever
        .retrieve(
            &mut driver,
            &mut ctx,
            &record(1, "Vayeshev"),
            1,
            &tmp.path().join("0001.mp3"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::TransientNavigation { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(site.request_count("/media/gone.mp3"), 3);
}
