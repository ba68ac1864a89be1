//! End-to-end pipeline scenarios.
//!
//! Fresh run, crash and resume, and a scheduled owner driven to idle, all
//! against real storage with the mock AI services.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{fast_config, RecordingProgress, TestHarness, EMBEDDING_DIM};
use enrich_pipeline::{BatchGate, BatchOutcome, ControllerStatus, GateDecision, PipelineError, ProgressStore, RunOutcome, StepOutcome};
use enrich_types::{PipelinePhase, RunStatus, Stage};

const OWNER: &str = "owner-1";

/// Gate that records group sizes and never halts.
#[derive(Default)]
struct SizeLog(Vec<usize>);

#[async_trait::async_trait]
impl BatchGate for SizeLog {
    async fn before_batch(&mut self, _stage: Stage) -> GateDecision {
        GateDecision::Proceed
    }

    async fn after_batch(&mut self, outcome: &BatchOutcome) -> Result<(), PipelineError> {
        self.0.push(outcome.attempted.len());
        Ok(())
    }
}

/// Fresh run: 7 contacts in groups of 3 run as 3, 3, 1 and the call reports
/// completion.
#[tokio::test]
async fn test_fresh_run_groups_of_three() {
    let harness = TestHarness::new();
    harness.seed_contacts(OWNER, 7);

    let runner = harness.runner(fast_config().with_group_size(Stage::Enrichment, 3));
    let mut gate = SizeLog::default();
    let result = runner
        .run_page(Stage::Enrichment, OWNER, None, &mut gate)
        .await
        .unwrap();

    assert_eq!(gate.0, vec![3, 3, 1]);
    assert!(result.completed);
    assert_eq!(result.counters.succeeded, 7);
    assert_eq!(result.counters.processed, 7);
    assert_eq!(harness.bio.call_count(), 7);
}

/// Fresh client run: three batches, a checkpoint after each, none at the end.
#[tokio::test]
async fn test_fresh_client_run_checkpoints_each_batch() {
    let harness = TestHarness::new();
    let ids = harness.seed_contacts(OWNER, 7);

    let progress = Arc::new(RecordingProgress::new(harness.slot_progress(OWNER)));
    let controller = harness.controller_with_progress(
        OWNER,
        fast_config().with_client_batch_size(3),
        progress.clone(),
    );

    let summary = controller.start().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.processed, 7);
    assert_eq!(summary.batches, 3);

    // First save is the enrolment itself, then one per batch
    let processed: Vec<usize> = progress.saved().iter().map(|s| s.processed_ids.len()).collect();
    assert_eq!(processed, vec![0, 3, 6, 7]);

    let last = progress.saved().pop().unwrap();
    let mut processed_ids = last.processed_ids.clone();
    processed_ids.sort();
    assert_eq!(processed_ids, ids);

    assert!(progress.load().await.unwrap().is_none());
    assert!(harness.fully_enriched(OWNER, &ids));
    assert_eq!(
        harness.contact(OWNER, "c-04").embedding.map(|e| e.len()),
        Some(EMBEDDING_DIM)
    );
    assert_eq!(controller.snapshot().status, ControllerStatus::Completed);
}

/// Crash and resume: a run dies after 4 of 7 contacts; a new controller on
/// the same storage finishes the remaining 3 without repeating AI calls.
#[tokio::test(start_paused = true)]
async fn test_crash_and_resume_without_duplicate_calls() {
    let harness = TestHarness::new();
    let ids = harness.seed_contacts(OWNER, 7);

    // The crashed process never releases its lease; let it lapse at once
    let config = fast_config()
        .with_client_batch_size(2)
        .with_client_delay(Duration::from_secs(3600))
        .with_lease_ttl(Duration::ZERO);

    let first = harness.controller(OWNER, config.clone());
    let mut rx = first.subscribe();
    let run = {
        let controller = first.clone();
        tokio::spawn(async move { controller.start().await })
    };

    rx.wait_for(|s| s.batch_index >= 2).await.unwrap();
    first.pause();
    rx.wait_for(|s| s.status == ControllerStatus::Paused).await.unwrap();
    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    let checkpoint = harness.slot_progress(OWNER).load().await.unwrap().unwrap();
    assert_eq!(checkpoint.processed_ids.len(), 4);
    assert_eq!(checkpoint.total, 7);
    assert_eq!(harness.bio.call_count(), 4);

    // "New process": fresh controller, same storage and services
    let second = harness.controller(OWNER, config.with_client_delay(Duration::ZERO));
    assert!(second.has_checkpoint().await.unwrap());
    let summary = second.resume().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.processed, 7);
    assert_eq!(summary.enrichment.processed, 7);
    assert_eq!(summary.batches, 4);

    let mut calls = harness.bio.calls();
    assert_eq!(calls.len(), 7);
    calls.sort();
    calls.dedup();
    assert_eq!(calls.len(), 7);
    assert_eq!(harness.thesis.call_count(), 7);
    assert_eq!(harness.embedder.call_count(), 7);

    assert!(harness.fully_enriched(OWNER, &ids));
    assert!(!second.has_checkpoint().await.unwrap());
}

/// Scheduled owner: one stage per invocation until idle, then idle again on
/// the next tick without touching the AI services.
#[tokio::test]
async fn test_scheduled_owner_reaches_idle() {
    let harness = TestHarness::new();
    let ids = harness.seed_contacts(OWNER, 4);
    let stepper = harness.stepper(fast_config());
    stepper.enroll_owner(OWNER).await.unwrap();

    let mut phases = Vec::new();
    loop {
        let report = stepper.step_owner(OWNER).await.unwrap();
        phases.push(report.phase);
        if report.outcome == StepOutcome::Idle {
            break;
        }
        assert!(phases.len() < 10, "pipeline never went idle");
    }
    assert_eq!(
        phases,
        vec![PipelinePhase::Extraction, PipelinePhase::Embedding, PipelinePhase::Idle]
    );
    assert!(harness.fully_enriched(OWNER, &ids));

    let calls = harness.bio.call_count();
    let report = stepper.step_owner(OWNER).await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Idle);
    assert_eq!(harness.bio.call_count(), calls);

    let record = stepper.status(OWNER).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Idle);
    assert_eq!(record.completed_runs, 1);
    assert_eq!(record.consecutive_errors, 0);
}

/// New contacts arriving after an owner went idle start a new run.
#[tokio::test]
async fn test_idle_owner_picks_up_new_contacts() {
    let harness = TestHarness::new();
    harness.seed_contacts(OWNER, 2);
    let stepper = harness.stepper(fast_config());
    stepper.enroll_owner(OWNER).await.unwrap();

    for _ in 0..3 {
        stepper.step_owner(OWNER).await.unwrap();
    }
    assert_eq!(stepper.status(OWNER).await.unwrap().unwrap().completed_runs, 1);

    harness
        .storage
        .put_contact(&enrich_types::Contact::new(OWNER, "c-99", "Late Arrival"))
        .unwrap();

    let report = stepper.step_owner(OWNER).await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Progressed);
    assert_eq!(report.phase, PipelinePhase::Extraction);
    assert_eq!(report.result.unwrap().counters.succeeded, 1);
    assert!(harness.contact(OWNER, "c-99").has_bio());
}

/// Client runs and scheduled steps for different owners share one store.
#[tokio::test]
async fn test_owners_are_isolated() {
    let harness = TestHarness::new();
    let a = harness.seed_contacts("owner-a", 3);
    let b = harness.seed_contacts("owner-b", 5);

    let summary = harness
        .controller("owner-a", fast_config())
        .start()
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert!(harness.fully_enriched("owner-a", &a));
    assert!(!harness.contact("owner-b", &b[0]).has_bio());

    let stepper = harness.stepper(fast_config());
    stepper.enroll_owner("owner-b").await.unwrap();
    let reports = stepper.step_all().await.unwrap();

    // owner-a got a record from its client run lease; it has no work left
    let outcome = |owner: &str| {
        reports
            .iter()
            .find(|r| r.owner_id == owner)
            .map(|r| r.outcome.clone())
    };
    assert_eq!(outcome("owner-a"), Some(StepOutcome::Idle));
    assert_eq!(outcome("owner-b"), Some(StepOutcome::Progressed));
}
