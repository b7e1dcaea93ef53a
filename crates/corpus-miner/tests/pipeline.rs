//! End-to-end runs against real worker processes
//!
//! External tools are replaced by small shell scripts.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use corpus_miner::config::{ExtractionConfig, MinerConfig, ReaderConfig, TopicModelConfig};
use corpus_miner::processing::{ExtractionSupervisor, WorkerBinary};
use corpus_miner::{DocumentInput, IncrementalCache, Orchestrator};
use lopdf::{dictionary, Document, Object, Stream};

const DOCUMENTS: [&str; 7] = [
    "The city council approved the annual budget after a long debate about taxes, \
     public spending and the cost of maintaining the old bridges across the river.",
    "Tax revenue grew this year, so the finance committee proposed lowering taxes for \
     small businesses while keeping the budget balanced for schools and hospitals.",
    "The finance minister presented a report on public debt, warning that spending \
     on infrastructure must stay within the budget approved by parliament.",
    "The football team won the league after scoring a late goal in the final match, \
     and the coach thanked the supporters who travelled across the country.",
    "Our coach changed the training schedule before the cup match, and the players \
     responded with three goals and a clean sheet in front of a full stadium.",
    "The league announced new rules for transfers, and several football clubs said \
     the changes would help young players find a team and a fair contract.",
    "Supporters filled the stadium to watch the match, while the finance director of \
     the club explained how ticket revenue pays for the new training ground.",
];

fn worker_binary(reader: &ReaderConfig) -> Arc<WorkerBinary> {
    Arc::new(WorkerBinary::new(env!("CARGO_BIN_EXE_corpus-miner"), reader).unwrap())
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_documents(dir: &Path, texts: &[&str], offset: usize) -> Vec<DocumentInput> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let path = dir.join(format!("doc{}.txt", offset + i));
            std::fs::write(&path, text).unwrap();
            DocumentInput::from_file(&path).unwrap()
        })
        .collect()
}

fn blank_pdf(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn miner_config(dir: &Path, reader: ReaderConfig) -> MinerConfig {
    MinerConfig {
        extraction: ExtractionConfig {
            workers: Some(2),
            base_timeout_secs: 30.0,
            poll_interval_ms: 20,
            shutdown_grace_secs: 2,
        },
        reader,
        topics: TopicModelConfig {
            n_topics: 2,
            max_iter: 30,
            evaluate_every: 10,
            ..TopicModelConfig::default()
        },
        cache: corpus_miner::config::CacheConfig {
            path: dir.join("cache.db"),
        },
        ..MinerConfig::default()
    }
}

#[tokio::test]
async fn test_plain_text_batch_succeeds_without_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ocr-called");
    let tesseract = script(dir.path(), "tesseract", &format!("touch {}", marker.display()));
    let reader = ReaderConfig {
        temporary_path: dir.path().join("tmp"),
        tesseract_path: Some(tesseract),
        ..ReaderConfig::without_tools()
    };

    let inputs = write_documents(dir.path(), &DOCUMENTS[..3], 0);
    let config = miner_config(dir.path(), reader.clone());
    let cache = IncrementalCache::open(&config.cache.path).unwrap();
    let orchestrator = Orchestrator::new(config, cache, worker_binary(&reader)).unwrap();

    let report = orchestrator.run(&inputs).await.unwrap();

    assert_eq!(report.records.len(), 3);
    for record in &report.records {
        assert!(record.is_ok(), "unexpected error {:?}", record.error);
        assert!(record.raw_text.is_some());
        assert!(record.filtered_text.as_deref().is_some_and(|t| !t.is_empty()));
    }
    assert_eq!(report.mining.mined, 3);
    assert!(!marker.exists());

    assert_eq!(report.topics.documents.len(), 3);
    for doc in &report.topics.documents {
        assert!(doc.weights.iter().all(|&w| w >= 0.0));
        assert!((doc.weights.iter().sum::<f64>() - 1.0).abs() < 1e-3);
    }
    assert!(orchestrator.last_run_time().is_some());
}

#[tokio::test]
async fn test_scanned_pdf_falls_back_to_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("scan.pdf");
    blank_pdf(&pdf);

    // pdftoppm -png -r <dpi> <input> <prefix>
    let rasterizer = script(dir.path(), "pdftoppm", "touch \"$5-1.png\"");
    let tesseract = script(dir.path(), "tesseract", "echo 'Recognized budget report text'");
    let reader = ReaderConfig {
        temporary_path: dir.path().join("tmp"),
        rasterizer_path: Some(rasterizer),
        tesseract_path: Some(tesseract),
        ..ReaderConfig::without_tools()
    };
    let extraction = ExtractionConfig {
        workers: Some(1),
        base_timeout_secs: 30.0,
        poll_interval_ms: 20,
        shutdown_grace_secs: 2,
    };

    let mut supervisor = ExtractionSupervisor::start(extraction, worker_binary(&reader)).unwrap();
    let results = supervisor.extract(&[pdf.clone()]).await;
    supervisor.shutdown().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, pdf);
    assert_eq!(results[0].page_count, 1);
    let content = results[0].outcome.content().unwrap();
    assert!(content.contains("Recognized budget report text"));
}

#[tokio::test]
async fn test_hung_conversion_times_out_and_pool_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let converter = script(dir.path(), "soffice", "sleep 20");
    let reader = ReaderConfig {
        temporary_path: dir.path().join("tmp"),
        converter_path: Some(converter),
        ..ReaderConfig::without_tools()
    };
    let extraction = ExtractionConfig {
        workers: Some(2),
        base_timeout_secs: 2.0,
        poll_interval_ms: 20,
        shutdown_grace_secs: 2,
    };

    let slow = dir.path().join("legacy.doc");
    std::fs::write(&slow, b"binary office document").unwrap();
    let inputs = write_documents(dir.path(), &DOCUMENTS[..2], 0);
    let mut paths = vec![slow.clone()];
    paths.extend(inputs.iter().map(|i| i.file_path.clone()));

    let mut supervisor = ExtractionSupervisor::start(extraction, worker_binary(&reader)).unwrap();
    let results = supervisor.extract(&paths).await;

    assert_eq!(results.len(), 3);
    let error = results[0].outcome.error().unwrap();
    assert!(error.starts_with("Timeout"), "unexpected error {}", error);
    assert!(results[1].outcome.content().is_some());
    assert!(results[2].outcome.content().is_some());

    assert_eq!(supervisor.pool_size(), 2);
    assert_eq!(supervisor.live_workers(), 2);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_incremental_run_extracts_only_new_documents() {
    let dir = tempfile::tempdir().unwrap();
    let reader = ReaderConfig {
        temporary_path: dir.path().join("tmp"),
        ..ReaderConfig::without_tools()
    };
    let config = miner_config(dir.path(), reader.clone());
    let cache = IncrementalCache::open(&config.cache.path).unwrap();
    let orchestrator = Orchestrator::new(config, cache.clone(), worker_binary(&reader)).unwrap();

    let mut inputs = write_documents(dir.path(), &DOCUMENTS[..5], 0);
    let first = orchestrator.run(&inputs).await.unwrap();
    assert_eq!(first.extracted, 5);
    assert_eq!(cache.len().unwrap(), 5);

    inputs.extend(write_documents(dir.path(), &DOCUMENTS[5..], 5));
    let second = orchestrator.run(&inputs).await.unwrap();

    assert_eq!(second.extracted, 2);
    assert_eq!(second.reused, 5);
    assert_eq!(cache.len().unwrap(), 7);
    assert_eq!(second.records.len(), 7);
    assert_eq!(second.topics.documents.len(), 7);

    let names: Vec<_> = second.records.iter().map(|r| r.file_name.clone()).collect();
    let expected: Vec<_> = (0..7).map(|i| format!("doc{}", i)).collect();
    assert_eq!(names, expected);
}
