//! End-to-end pipeline tests against in-process providers.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{HarnessBuilder, HashEmbedder, FLOOD_QUESTION, POLICY_DOC};
use kb_harness::error::KbError;
use kb_harness::models::ScoredChunk;
use kb_harness::progress::NoProgress;
use tempfile::TempDir;

#[tokio::test]
async fn flood_question_retrieves_flood_chunk() {
    let h = HarnessBuilder::new().build();
    let report = h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();
    assert_eq!(report.chunks_indexed, 3);
    assert_eq!(report.dims, common::DIMS);
    assert_eq!(report.document_sha256.len(), 64);

    let results = h.kb.retrieve(FLOOD_QUESTION, 3).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].chunk.id, 1);
    assert!(results[0].chunk.text.contains("flood insurance"));
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn ask_grounds_prompt_in_top_chunks() {
    let h = HarnessBuilder::new().build();
    h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();

    let answer = h.kb.ask(FLOOD_QUESTION).await.unwrap();
    assert_eq!(answer.sources_count, 2);
    assert_eq!(answer.source_ids.len(), 2);
    assert_eq!(answer.source_ids[0], 1);
    assert!(answer.text.contains("flood insurance"));

    let prompts = h.generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0]
        .system
        .contains("Flood damage needs a separate flood insurance policy."));
    assert_eq!(prompts[0].user, FLOOD_QUESTION);
}

#[tokio::test]
async fn queries_before_ingest_are_not_ready() {
    let h = HarnessBuilder::new().build();
    assert!(!h.kb.is_ready());
    assert!(!h.kb.status().ready);

    let err = h.kb.retrieve(FLOOD_QUESTION, 2).await.unwrap_err();
    assert!(matches!(err, KbError::KnowledgeBaseNotReady));
    let err = h.kb.ask(FLOOD_QUESTION).await.unwrap_err();
    assert!(err.is_not_ready());
    assert!(h.generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_document_publishes_empty_index() {
    let h = HarnessBuilder::new().build();
    let report = h.kb.rebuild("   \n\n  ", &NoProgress).await.unwrap();
    assert_eq!(report.chunks_indexed, 0);
    assert!(!h.kb.is_ready());

    let err = h.kb.retrieve(FLOOD_QUESTION, 2).await.unwrap_err();
    assert!(matches!(err, KbError::EmptyIndex));
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let h = HarnessBuilder::new().build();
    h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();

    let err = h.kb.retrieve(FLOOD_QUESTION, 0).await.unwrap_err();
    assert!(matches!(err, KbError::InvalidK(0)));
    let err = h.kb.retrieve("   ", 2).await.unwrap_err();
    assert!(matches!(err, KbError::EmptyQuery));

    let all = h.kb.retrieve(FLOOD_QUESTION, 50).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn persisted_index_reloads_in_new_knowledge_base() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("index");

    let mut first = HarnessBuilder::new();
    first.index_dir = Some(dir.clone());
    let first = first.build();
    let report = first.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();

    let mut second = HarnessBuilder::new();
    second.index_dir = Some(dir.clone());
    let second = second.build();
    assert!(!second.kb.is_ready());
    assert!(second.kb.load_persisted().unwrap());
    assert!(second.kb.is_ready());

    let status = second.kb.status();
    assert_eq!(status.chunks, 3);
    assert_eq!(status.model, "hash-bow");
    assert_eq!(
        status.document_sha256.as_deref(),
        Some(report.document_sha256.as_str())
    );

    let before = first.kb.retrieve(FLOOD_QUESTION, 3).await.unwrap();
    let after = second.kb.retrieve(FLOOD_QUESTION, 3).await.unwrap();
    let ids = |r: &[ScoredChunk]| r.iter().map(|c| c.chunk.id).collect::<Vec<_>>();
    assert_eq!(ids(before.as_slice()), ids(after.as_slice()));
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a.score - b.score).abs() < 1e-6);
    }

    let (built, loaded) = (first.kb.snapshot().unwrap(), second.kb.snapshot().unwrap());
    assert_eq!(built.dims(), loaded.dims());
    assert_eq!(built.chunks(), loaded.chunks());
    for i in 0..built.len() {
        let (x, y) = (built.vector(i).unwrap(), loaded.vector(i).unwrap());
        assert_eq!(x.len(), common::DIMS);
        assert!(
            x.iter().zip(y).all(|(p, q)| (p - q).abs() < 1e-6),
            "stored vector {i} changed across reload"
        );
    }
}

#[tokio::test]
async fn load_without_persisted_index_reports_false() {
    let tmp = TempDir::new().unwrap();
    let mut b = HarnessBuilder::new();
    b.index_dir = Some(tmp.path().join("missing"));
    let h = b.build();
    assert!(!h.kb.load_persisted().unwrap());
    assert!(!h.kb.is_ready());
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("index");
    let mut b = HarnessBuilder::new();
    b.embedder.fail_marker = Some("poison".to_string());
    b.index_dir = Some(dir.clone());
    let h = b.build();

    let good = h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();
    let err = h
        .kb
        .rebuild("this document contains poison and nothing else", &NoProgress)
        .await
        .unwrap_err();
    assert!(err.is_upstream(), "unexpected error: {err}");

    assert!(h.kb.is_ready());
    let status = h.kb.status();
    assert_eq!(status.chunks, 3);
    assert_eq!(
        status.document_sha256.as_deref(),
        Some(good.document_sha256.as_str())
    );
    let results = h.kb.retrieve(FLOOD_QUESTION, 1).await.unwrap();
    assert_eq!(results[0].chunk.id, 1);

    // The persisted copy is untouched too.
    let mut reload = HarnessBuilder::new();
    reload.index_dir = Some(dir);
    let reload = reload.build();
    assert!(reload.kb.load_persisted().unwrap());
    assert_eq!(reload.kb.status().chunks, 3);
}

#[tokio::test]
async fn ingest_timeout_leaves_previous_index() {
    let mut b = HarnessBuilder::new();
    b.embedder.delay = Duration::from_millis(300);
    b.embedder.slow_marker = Some("earthquake".to_string());
    b.ingest_timeout = Duration::from_millis(50);
    let h = b.build();

    h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();
    let err = h
        .kb
        .rebuild("earthquake cover is excluded from every policy", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, KbError::IngestTimeout(_)));
    assert_eq!(h.kb.status().chunks, 3);
}

#[tokio::test]
async fn queries_during_rebuild_see_a_consistent_snapshot() {
    let mut b = HarnessBuilder::new();
    b.embedder.delay = Duration::from_millis(200);
    b.embedder.slow_marker = Some("replacement".to_string());
    let h = b.build();
    h.kb.rebuild(POLICY_DOC, &NoProgress).await.unwrap();

    // Nine words: two chunks.
    let replacement = "replacement text about earthquakes and seismic events only here";
    let kb = Arc::clone(&h.kb);
    let rebuild = tokio::spawn(async move { kb.rebuild(replacement, &NoProgress).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut readers = Vec::new();
    for _ in 0..8 {
        let kb = Arc::clone(&h.kb);
        readers.push(tokio::spawn(async move {
            kb.retrieve(FLOOD_QUESTION, 10).await
        }));
    }
    for reader in readers {
        let results = reader.await.unwrap().unwrap();
        let ids: Vec<usize> = results.iter().map(|c| c.chunk.id).collect();
        assert_eq!(results.len(), 3, "mid-rebuild query saw a partial index");
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    let report = rebuild.await.unwrap().unwrap();
    assert_eq!(report.chunks_indexed, 2);
    let results = h.kb.retrieve(FLOOD_QUESTION, 10).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn concurrent_rebuilds_are_serialized() {
    let mut b = HarnessBuilder::new();
    b.embedder = HashEmbedder::new();
    b.embedder.delay = Duration::from_millis(20);
    b.batch_size = 1;
    let h = b.build();

    let mut tasks = Vec::new();
    for doc in [POLICY_DOC, "Hail damage to roofs is covered after the deductible."] {
        let kb = Arc::clone(&h.kb);
        tasks.push(tokio::spawn(async move { kb.rebuild(doc, &NoProgress).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.embedder.max_in_flight.load(Ordering::SeqCst), 1);
    // Three chunks for the policy document plus two for the hail sentence.
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 5);
    assert!(h.kb.is_ready());
}
