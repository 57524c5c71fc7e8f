//! Orchestrator scenario tests: in-memory store, scripted publisher, no
//! network. These pin down the batch/pause/resume/failure semantics.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use openaid_common::{Category, CostTracker, VerificationLevel};
use openaid_import::mapper::SourceMapping;
use openaid_import::store::ImportStore;
use openaid_import::testing::{MemoryImportStore, ScriptedPublisher};
use openaid_import::{ImportJob, ImportOptions, ImportOrchestrator, JobStatus, RecordStatus};
use openaid_verify::testing::MockGeocoder;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn mapping() -> SourceMapping {
    SourceMapping {
        source_name: "test_feed".to_string(),
        display_name: "Test Feed".to_string(),
        field_map: [
            ("name", "name"),
            ("address", "address"),
            ("city", "city"),
            ("state", "state"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect(),
        category_map: HashMap::from([
            ("shelter".to_string(), Category::Housing),
            ("*".to_string(), Category::Other),
        ]),
        service_map: HashMap::new(),
        tags: vec![],
        verification_level: VerificationLevel::PartiallyVerified,
        requires_geocoding: false,
        // No rate budget: tests must not sleep.
        requests_per_minute: None,
        id_fields: vec!["id".to_string()],
    }
}

fn raw_records(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("r-{i}"),
                "name": format!("Org {i}"),
                "address": format!("{i} Main St"),
                "city": "Minneapolis",
                "state": "MN",
                "type": "shelter",
            })
        })
        .collect()
}

fn options(batch_size: usize) -> ImportOptions {
    ImportOptions {
        batch_size,
        ..Default::default()
    }
}

async fn create(
    store: Arc<MemoryImportStore>,
    publisher: Arc<ScriptedPublisher>,
    opts: ImportOptions,
    total: u32,
) -> ImportOrchestrator {
    ImportOrchestrator::create(
        store,
        publisher,
        None,
        Arc::new(CostTracker::new()),
        mapping(),
        opts,
        total,
    )
    .await
    .expect("create job")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A clean run walks every batch and lands on `completed` with consistent
/// counters.
#[tokio::test]
async fn completed_job_counts_are_consistent() {
    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = create(store.clone(), publisher.clone(), options(10), 23).await;

    let stats = orch.run(raw_records(23)).await.expect("run");

    assert_eq!(stats.processed, 23);
    assert_eq!(stats.successful, 23);
    assert_eq!(stats.batches, 3);

    let job = store.job(orch.job_id()).expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.counts_consistent());
    assert!(job.completed_at.is_some());
    assert_eq!(publisher.call_count(), 3);
}

/// An external pause lands at the next batch boundary: the in-flight batch
/// finishes, the checkpoint carries everything after it.
#[tokio::test]
async fn pause_is_honored_at_the_next_batch_boundary() {
    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = create(store.clone(), publisher.clone(), options(50), 120).await;

    // The operator flips the row to paused while batch 1 is in flight:
    // the first status poll (before batch 1) still reads running.
    store.pause_after_polls(1);

    let stats = orch.run(raw_records(120)).await.expect("run");

    assert_eq!(stats.processed, 50);
    let job = store.job(orch.job_id()).expect("job");
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.processed_records, 50);

    let checkpoint = job.checkpoint.expect("checkpoint written before pause");
    assert_eq!(checkpoint.last_processed_index, 50);
    assert_eq!(checkpoint.pending_batch_queue.len(), 70);
    assert_eq!(publisher.submitted_source_ids().len(), 50);
}

/// Progress writes between batches leave the status column alone, so a
/// pause an operator flips onto the row while a batch is in flight is not
/// clobbered before the next boundary poll sees it.
#[tokio::test]
async fn progress_writes_do_not_overwrite_an_external_pause() {
    let store = MemoryImportStore::new();
    let mut job = ImportJob::new("test_feed", 10);
    store.insert_job(&job).await.expect("insert");

    store.set_status(job.id, JobStatus::Paused);
    job.processed_records = 5;
    job.successful_records = 5;
    store.update_progress(&job).await.expect("progress");

    let stored = store.job(job.id).expect("job");
    assert_eq!(stored.status, JobStatus::Paused);
    assert_eq!(stored.processed_records, 5);
}

/// Resuming a paused job processes only the remaining records; nothing
/// from the completed batches is resubmitted or double-counted.
#[tokio::test]
async fn resume_processes_only_the_remaining_records() {
    let store = Arc::new(MemoryImportStore::new());
    let first = Arc::new(ScriptedPublisher::approving());
    let mut orch = create(store.clone(), first.clone(), options(50), 120).await;
    store.pause_after_polls(1);
    orch.run(raw_records(120)).await.expect("run to pause");
    let job_id = orch.job_id();
    store.clear_pause();

    let second = Arc::new(ScriptedPublisher::approving());
    let mut resumed = ImportOrchestrator::resume(
        store.clone(),
        second.clone(),
        None,
        Arc::new(CostTracker::new()),
        mapping(),
        options(50),
        job_id,
    )
    .await
    .expect("resume");

    let stats = resumed.run_resumed(None).await.expect("resumed run");

    assert_eq!(stats.processed, 120);
    assert_eq!(stats.successful, 120);

    let job = store.job(job_id).expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.counts_consistent());

    // Only records 50..119 went through the second publisher.
    let resubmitted = second.submitted_source_ids();
    assert_eq!(resubmitted.len(), 70);
    assert_eq!(resubmitted.first().map(String::as_str), Some("r-50"));
    assert_eq!(resubmitted.last().map(String::as_str), Some("r-119"));
    for early in first.submitted_source_ids() {
        assert!(!resubmitted.contains(&early), "{early} was reprocessed");
    }

    assert_eq!(store.records(job_id).len(), 120);
}

/// Resume refuses jobs that are not paused, and cross-checks a re-supplied
/// original list against the checkpoint.
#[tokio::test]
async fn resume_validates_job_state_and_original_list() {
    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = create(store.clone(), publisher.clone(), options(10), 10).await;
    orch.run(raw_records(10)).await.expect("run");

    // Completed, not paused.
    let err = ImportOrchestrator::resume(
        store.clone(),
        publisher.clone(),
        None,
        Arc::new(CostTracker::new()),
        mapping(),
        options(10),
        orch.job_id(),
    )
    .await
    .expect_err("completed jobs do not resume");
    assert!(err.to_string().contains("only paused jobs"), "got: {err}");

    // Paused, but the caller re-supplies a list of the wrong length.
    let store = Arc::new(MemoryImportStore::new());
    let mut orch = create(store.clone(), publisher.clone(), options(5), 20).await;
    store.pause_after_polls(1);
    orch.run(raw_records(20)).await.expect("run to pause");
    store.clear_pause();

    let mut resumed = ImportOrchestrator::resume(
        store.clone(),
        publisher,
        None,
        Arc::new(CostTracker::new()),
        mapping(),
        options(5),
        orch.job_id(),
    )
    .await
    .expect("resume");
    let wrong = raw_records(7);
    let err = resumed
        .run_resumed(Some(&wrong))
        .await
        .expect_err("length mismatch");
    assert!(err.to_string().contains("checkpoint expects"), "got: {err}");
}

/// A failed batch submission is fatal: the in-flight batch is marked
/// `error`, the failure is logged on the job, and the job is `failed`.
#[tokio::test]
async fn publication_failure_fails_the_job_and_marks_the_batch() {
    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::failing_on_call(1));
    let mut orch = create(store.clone(), publisher, options(5), 10).await;

    let err = orch.run(raw_records(10)).await.expect_err("fatal batch");
    assert!(err.to_string().contains("batch submission"), "got: {err}");

    let job = store.job(orch.job_id()).expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.error_log.is_empty());
    assert_eq!(job.processed_records, 5);
    assert_eq!(job.failed_records, 5);
    assert!(job.counts_consistent());
    assert_eq!(
        store.records_with_status(orch.job_id(), RecordStatus::Error),
        5
    );
}

/// A record that fails normalization is isolated: it goes to `error`, the
/// rest of the batch is unaffected, and the job still completes.
#[tokio::test]
async fn normalization_failure_is_isolated_to_one_record() {
    let mut records = raw_records(7);
    records[3]
        .as_object_mut()
        .unwrap()
        .retain(|k, _| k == "id" || k == "name" || k == "type");

    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = create(store.clone(), publisher, options(3), 7).await;

    let stats = orch.run(records).await.expect("run");

    assert_eq!(stats.processed, 7);
    assert_eq!(stats.successful, 6);
    assert_eq!(stats.failed, 1);

    let job = store.job(orch.job_id()).expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.counts_consistent());

    let errored: Vec<_> = store
        .records(orch.job_id())
        .into_iter()
        .filter(|r| r.status == RecordStatus::Error)
        .collect();
    assert_eq!(errored.len(), 1);
    let message = errored[0].error_message.as_deref().unwrap_or("");
    assert!(
        message.contains("address, city, state"),
        "missing fields should all be named, got: {message}"
    );
}

/// Geocoding failures are non-fatal: the record proceeds without
/// coordinates, marked accordingly.
#[tokio::test]
async fn geocoding_failure_does_not_block_the_record() {
    let mut m = mapping();
    m.requires_geocoding = true;

    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = ImportOrchestrator::create(
        store.clone(),
        publisher,
        Some(Arc::new(MockGeocoder::failing())),
        Arc::new(CostTracker::new()),
        m,
        options(5),
        4,
    )
    .await
    .expect("create job");

    let stats = orch.run(raw_records(4)).await.expect("run");

    assert_eq!(stats.successful, 4);
    assert_eq!(stats.geocode_failures, 4);
    for record in store.records(orch.job_id()) {
        assert_eq!(record.status, RecordStatus::Approved);
        assert_eq!(record.geocoding_success, Some(false));
    }
}

/// Successful geocoding enriches the normalized record with coordinates.
#[tokio::test]
async fn geocoding_success_fills_in_coordinates() {
    let mut m = mapping();
    m.requires_geocoding = true;

    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let mut orch = ImportOrchestrator::create(
        store.clone(),
        publisher,
        Some(Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95))),
        Arc::new(CostTracker::new()),
        m,
        options(5),
        1,
    )
    .await
    .expect("create job");

    orch.run(raw_records(1)).await.expect("run");

    let record = store.records(orch.job_id()).remove(0);
    assert_eq!(record.geocoding_success, Some(true));
    let normalized = record.normalized_data.expect("normalized payload");
    assert_eq!(normalized["latitude"].as_f64(), Some(44.9786));
    assert_eq!(normalized["longitude"].as_f64(), Some(-93.2790));
}

/// Skip-geocoding leaves the geocoder untouched even when the mapping
/// requires it.
#[tokio::test]
async fn skip_geocoding_overrides_the_mapping() {
    let mut m = mapping();
    m.requires_geocoding = true;

    let store = Arc::new(MemoryImportStore::new());
    let publisher = Arc::new(ScriptedPublisher::approving());
    let opts = ImportOptions {
        batch_size: 5,
        skip_geocoding: true,
        ..Default::default()
    };
    let mut orch = ImportOrchestrator::create(
        store.clone(),
        publisher,
        Some(Arc::new(MockGeocoder::failing())),
        Arc::new(CostTracker::new()),
        m,
        opts,
        3,
    )
    .await
    .expect("create job");

    let stats = orch.run(raw_records(3)).await.expect("run");

    assert_eq!(stats.geocode_failures, 0);
    for record in store.records(orch.job_id()) {
        assert_eq!(record.geocoding_success, None);
    }
}
