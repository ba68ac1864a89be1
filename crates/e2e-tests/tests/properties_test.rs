//! Pipeline properties checked end to end.
//!
//! - a contact that finished a stage is never selected for it again
//! - exhaustion is reported on the call that comes back short
//! - per-stage counters always add up
//! - stop requests are honoured promptly, during a pause or a batch

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::{Notify, Semaphore};

use e2e_tests::{fast_config, RecordingProgress, TestHarness};
use enrich_ai::{AiError, BioGenerator, BioProfile, BioRequest, MockBioGenerator, MockEmbedder, MockThesisExtractor};
use enrich_pipeline::{
    BatchGate, BatchOutcome, ControllerStatus, GateDecision, PipelineController, PipelineError, RunOutcome,
    SlotProgressStore, StageRunner, UnitProcessor,
};
use enrich_types::{PipelinePhase, Stage};

const OWNER: &str = "owner-1";

struct PassGate;

#[async_trait]
impl BatchGate for PassGate {
    async fn before_batch(&mut self, _stage: Stage) -> GateDecision {
        GateDecision::Proceed
    }

    async fn after_batch(&mut self, _outcome: &BatchOutcome) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_completed_stage_never_reselected() {
    let harness = TestHarness::with_bio(MockBioGenerator::failing_for(["Person 2"]));
    harness.seed_contacts(OWNER, 5);
    let runner = harness.runner(fast_config());

    let first = runner.run_page(Stage::Enrichment, OWNER, None, &mut PassGate).await.unwrap();
    assert_eq!(first.counters.succeeded, 4);
    assert_eq!(first.counters.failed, 1);

    // Only the failed contact is left for enrichment
    let second = runner.run_page(Stage::Enrichment, OWNER, None, &mut PassGate).await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(harness.bio.calls().iter().filter(|c| *c == "Person 2").count(), 2);

    for stage in [Stage::Extraction, Stage::Embedding] {
        runner.run_page(stage, OWNER, None, &mut PassGate).await.unwrap();
        let again = runner.run_page(stage, OWNER, None, &mut PassGate).await.unwrap();
        assert_eq!(again.fetched, 0, "{} reselected finished contacts", stage);
        assert!(again.completed);
    }
    assert_eq!(harness.thesis.call_count(), 4);
    assert_eq!(harness.embedder.call_count(), 4);
}

#[tokio::test]
async fn test_exhaustion_on_exact_page_multiple() {
    let harness = TestHarness::new();
    harness.seed_contacts(OWNER, 6);
    let stepper = harness.stepper(fast_config().with_page_size(3));
    stepper.enroll_owner(OWNER).await.unwrap();

    let mut completed = Vec::new();
    let mut phases = Vec::new();
    for _ in 0..3 {
        let report = stepper.step_owner(OWNER).await.unwrap();
        completed.push(report.result.as_ref().map(|r| r.completed).unwrap());
        phases.push(report.phase);
    }

    assert_eq!(completed, vec![false, false, true]);
    assert_eq!(
        phases,
        vec![PipelinePhase::Enrichment, PipelinePhase::Enrichment, PipelinePhase::Extraction]
    );
    assert_eq!(harness.bio.call_count(), 6);
}

#[tokio::test]
async fn test_counters_conserved_after_every_batch() {
    let harness = TestHarness::with_bio(MockBioGenerator::failing_for(["Person 1", "Person 5", "Person 6"]));
    harness.seed_contacts(OWNER, 8);

    let progress = Arc::new(RecordingProgress::new(harness.slot_progress(OWNER)));
    let controller = harness.controller_with_progress(OWNER, fast_config().with_client_batch_size(3), progress.clone());
    let summary = controller.start().await.unwrap();

    let saved = progress.saved();
    assert!(saved.len() > 1);
    for state in &saved {
        for stage in Stage::ALL {
            assert!(
                state.counters(stage).is_consistent(),
                "{} counters inconsistent after batch {}",
                stage,
                state.batches_completed
            );
        }
    }

    assert_eq!(summary.enrichment.processed, 8);
    assert_eq!(summary.enrichment.failed, 3);
    assert_eq!(summary.thesis.processed, 5);
    assert_eq!(summary.embedding.processed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_pause_starts_no_batch() {
    let harness = TestHarness::new();
    harness.seed_contacts(OWNER, 6);
    let controller = harness.controller(
        OWNER,
        fast_config()
            .with_client_batch_size(2)
            .with_client_delay(Duration::from_secs(60)),
    );
    let mut rx = controller.subscribe();

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start().await })
    };

    rx.wait_for(|s| s.batch_index >= 1).await.unwrap();
    controller.pause();
    rx.wait_for(|s| s.status == ControllerStatus::Paused).await.unwrap();
    let calls_at_pause = harness.bio.call_count();

    controller.stop();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.batches, 1);
    assert_eq!(harness.bio.call_count(), calls_at_pause);
    assert_eq!(calls_at_pause, 2);
}

/// Bio generator that blocks until released, to hold a batch in flight.
struct GatedBio {
    started: Notify,
    release: Semaphore,
    inner: MockBioGenerator,
}

#[async_trait]
impl BioGenerator for GatedBio {
    async fn generate_bio(&self, request: &BioRequest) -> Result<BioProfile, AiError> {
        self.started.notify_one();
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| AiError::ApiError(e.to_string()))?;
        permit.forget();
        self.inner.generate_bio(request).await
    }
}

#[tokio::test]
async fn test_stop_during_batch_counts_its_outcomes() {
    let harness = TestHarness::new();
    harness.seed_contacts(OWNER, 9);

    let bio = Arc::new(GatedBio {
        started: Notify::new(),
        release: Semaphore::new(0),
        inner: MockBioGenerator::new(),
    });
    let processor = Arc::new(UnitProcessor::new(
        bio.clone(),
        Arc::new(MockThesisExtractor::new()),
        Arc::new(MockEmbedder::new(4)),
    ));
    let runner = Arc::new(StageRunner::new(
        harness.storage.clone(),
        processor,
        fast_config().with_client_batch_size(3),
    ));
    let controller = Arc::new(PipelineController::new(
        OWNER,
        runner,
        Arc::new(SlotProgressStore::new(harness.storage.clone(), OWNER)),
    ));

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start().await })
    };

    bio.started.notified().await;
    controller.stop();
    bio.release.add_permits(3);

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.enrichment.succeeded, 3);
    assert!(summary.to_string().ends_with("(stopped early)"));

    // Stopping discards the checkpoint; the next start rescans
    assert!(!controller.has_checkpoint().await.unwrap());
    assert!(harness.contact(OWNER, "c-00").has_bio());
    assert!(!harness.contact(OWNER, "c-03").has_bio());
}
