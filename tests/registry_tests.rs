
use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinSet;

use jobq::error::JobqError;
use jobq::queue::{JobSpec, JobState};
use jobq::worker::ExecutionResult;
use test_harness::test_queue;

fn spec(command: &str) -> JobSpec {
    JobSpec {
        command: Some(command.to_string()),
        ..JobSpec::default()
    }
}

fn success(output: &str) -> ExecutionResult {
    ExecutionResult {
        success: true,
        output: Some(output.to_string()),
        error: None,
    }
}

fn failure(error: &str) -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: None,
        error: Some(error.to_string()),
    }
}

// ==================== Enqueue ====================

#[tokio::test]
async fn test_enqueue_is_immediately_visible() {
    let q = test_queue();

    let id = q.registry.enqueue(spec("echo hello")).await.unwrap();

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[0].attempts, 0);
    assert_eq!(jobs[0].max_retries, 3);

    let counts = q.registry.status().await.unwrap();
    assert_eq!(counts.get(&JobState::Pending), Some(&1));
}

#[tokio::test]
async fn test_enqueue_generates_unique_ids() {
    let q = test_queue();

    let a = q.registry.enqueue(spec("echo a")).await.unwrap();
    let b = q.registry.enqueue(spec("echo b")).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_enqueue_honors_explicit_id_and_retries() {
    let q = test_queue();

    let id = q
        .registry
        .enqueue(JobSpec {
            id: Some("job1".to_string()),
            command: Some("echo hi".to_string()),
            max_retries: Some(5),
        })
        .await
        .unwrap();
    assert_eq!(id, "job1");

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs[0].max_retries, 5);
}

#[tokio::test]
async fn test_enqueue_duplicate_id_fails_and_leaves_store_unchanged() {
    let q = test_queue();

    q.registry
        .enqueue(JobSpec {
            id: Some("job1".to_string()),
            command: Some("echo first".to_string()),
            max_retries: None,
        })
        .await
        .unwrap();

    let err = q
        .registry
        .enqueue(JobSpec {
            id: Some("job1".to_string()),
            command: Some("echo second".to_string()),
            max_retries: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JobqError::DuplicateId(id) if id == "job1"));

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].command, "echo first");
}

#[tokio::test]
async fn test_enqueue_rejects_missing_or_empty_command() {
    let q = test_queue();

    let err = q.registry.enqueue(JobSpec::default()).await.unwrap_err();
    assert!(matches!(err, JobqError::InvalidPayload(_)));

    let err = q.registry.enqueue(spec("   ")).await.unwrap_err();
    assert!(matches!(err, JobqError::InvalidPayload(_)));

    assert!(q.registry.list(None).await.unwrap().is_empty());
}

// ==================== List / Status ====================

#[tokio::test]
async fn test_list_filters_by_state() {
    let q = test_queue();

    q.registry.enqueue(spec("echo a")).await.unwrap();
    q.registry.enqueue(spec("echo b")).await.unwrap();
    let claimed = q.registry.claim().await.unwrap().unwrap();

    let pending = q.registry.list(Some(JobState::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);

    let processing = q.registry.list(Some(JobState::Processing)).await.unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, claimed.id);

    assert_eq!(q.registry.list(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_status_counts_live_collection_only() {
    let q = test_queue();

    q.registry.enqueue(spec("echo a")).await.unwrap();
    q.registry
        .enqueue(JobSpec {
            id: Some("doomed".to_string()),
            command: Some("false".to_string()),
            max_retries: Some(1),
        })
        .await
        .unwrap();

    // Drive the doomed job into the DLQ.
    loop {
        match q.registry.claim().await.unwrap() {
            Some(job) if job.id == "doomed" => {
                q.registry.settle(job, failure("exit code 1"), 2).await.unwrap();
                break;
            }
            Some(job) => q.registry.settle(job, success("ok"), 2).await.unwrap(),
            None => panic!("expected a claimable job"),
        }
    }

    let counts = q.registry.status().await.unwrap();
    assert_eq!(counts.get(&JobState::Dead), None);
    assert_eq!(q.registry.dlq_list().await.unwrap().len(), 1);
}

// ==================== Claim ====================

#[tokio::test]
async fn test_claim_flips_first_pending_job_to_processing() {
    let q = test_queue();

    let first = q.registry.enqueue(spec("echo 1")).await.unwrap();
    q.registry.enqueue(spec("echo 2")).await.unwrap();

    let job = q.registry.claim().await.unwrap().unwrap();
    assert_eq!(job.id, first);
    assert_eq!(job.state, JobState::Processing);

    // The transition is persisted, not just returned.
    let stored = q.store.load_jobs().unwrap();
    assert_eq!(stored[0].state, JobState::Processing);
    assert_eq!(stored[1].state, JobState::Pending);
}

#[tokio::test]
async fn test_claim_returns_none_when_nothing_eligible() {
    let q = test_queue();
    assert!(q.registry.claim().await.unwrap().is_none());

    q.registry.enqueue(spec("echo 1")).await.unwrap();
    q.registry.claim().await.unwrap().unwrap();

    // The only job is now processing.
    assert!(q.registry.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_skips_jobs_scheduled_in_the_future() {
    let q = test_queue();

    let id = q.registry.enqueue(spec("false")).await.unwrap();
    let job = q.registry.claim().await.unwrap().unwrap();
    q.registry.settle(job, failure("exit code 1"), 2).await.unwrap();

    // Rescheduled with backoff; not yet due.
    assert!(q.registry.claim().await.unwrap().is_none());

    let stored = q.store.load_jobs().unwrap();
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].state, JobState::Pending);
    assert!(stored[0].next_run_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_claim_takes_due_jobs() {
    let q = test_queue();

    q.registry.enqueue(spec("echo due")).await.unwrap();
    let mut jobs = q.store.load_jobs().unwrap();
    jobs[0].next_run_at = Some(Utc::now() - ChronoDuration::seconds(5));
    q.store.save_jobs(&jobs).unwrap();

    assert!(q.registry.claim().await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_claims_hand_job_to_exactly_one_caller() {
    let q = test_queue();
    q.registry.enqueue(spec("echo once")).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let registry = q.registry.clone();
        tasks.spawn(async move { registry.claim().await.unwrap() });
    }

    let mut claimed = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().is_some() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);
}

// ==================== Settle: retry policy ====================

#[tokio::test]
async fn test_settle_success_marks_job_completed() {
    let q = test_queue();

    let id = q.registry.enqueue(spec("echo hi")).await.unwrap();
    let job = q.registry.claim().await.unwrap().unwrap();
    q.registry.settle(job, success("hi\n"), 2).await.unwrap();

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs[0].id, id);
    assert_eq!(jobs[0].state, JobState::Completed);
    assert_eq!(jobs[0].attempts, 0);
    assert_eq!(jobs[0].output.as_deref(), Some("hi\n"));
}

#[tokio::test]
async fn test_settle_success_reinserts_concurrently_removed_job() {
    let q = test_queue();

    q.registry.enqueue(spec("echo hi")).await.unwrap();
    let job = q.registry.claim().await.unwrap().unwrap();

    // Simulate a concurrent removal of the live record.
    q.store.save_jobs(&[]).unwrap();

    q.registry.settle(job, success("hi\n"), 2).await.unwrap();

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Completed);
}

#[tokio::test]
async fn test_settle_failure_reschedules_with_backoff() {
    let q = test_queue();

    q.registry.enqueue(spec("false")).await.unwrap();
    let job = q.registry.claim().await.unwrap().unwrap();

    let before = Utc::now();
    q.registry.settle(job, failure("exit code 1"), 3).await.unwrap();

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[0].attempts, 1);
    assert_eq!(jobs[0].last_error.as_deref(), Some("exit code 1"));

    // Delay after the first failure is base^1 seconds.
    let next_run = jobs[0].next_run_at.unwrap();
    assert!(next_run >= before + ChronoDuration::seconds(3));
    assert!(next_run <= Utc::now() + ChronoDuration::seconds(4));
}

#[tokio::test]
async fn test_settle_failure_backoff_grows_with_attempts() {
    let q = test_queue();

    q.registry
        .enqueue(JobSpec {
            id: None,
            command: Some("false".to_string()),
            max_retries: Some(10),
        })
        .await
        .unwrap();

    // First failure: base^1 = 2s. Clear next_run_at to claim again.
    let job = q.registry.claim().await.unwrap().unwrap();
    q.registry.settle(job, failure("boom"), 2).await.unwrap();

    let mut jobs = q.store.load_jobs().unwrap();
    jobs[0].next_run_at = None;
    q.store.save_jobs(&jobs).unwrap();

    // Second failure: base^2 = 4s.
    let job = q.registry.claim().await.unwrap().unwrap();
    let before = Utc::now();
    q.registry.settle(job, failure("boom"), 2).await.unwrap();

    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs[0].attempts, 2);
    let next_run = jobs[0].next_run_at.unwrap();
    assert!(next_run >= before + ChronoDuration::seconds(4));
    assert!(next_run <= Utc::now() + ChronoDuration::seconds(5));
}

#[tokio::test]
async fn test_settle_final_failure_moves_job_to_dlq() {
    let q = test_queue();

    let id = q
        .registry
        .enqueue(JobSpec {
            id: None,
            command: Some("false".to_string()),
            max_retries: Some(1),
        })
        .await
        .unwrap();

    let job = q.registry.claim().await.unwrap().unwrap();
    q.registry.settle(job, failure("exit code 1"), 2).await.unwrap();

    assert!(q.registry.list(None).await.unwrap().is_empty());

    let dlq = q.registry.dlq_list().await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id, id);
    assert_eq!(dlq[0].state, JobState::Dead);
    assert_eq!(dlq[0].attempts, 1);
    assert_eq!(dlq[0].last_error.as_deref(), Some("exit code 1"));
}

// ==================== DLQ retry ====================

#[tokio::test]
async fn test_dlq_retry_resets_job_for_a_fresh_run() {
    let q = test_queue();

    let id = q
        .registry
        .enqueue(JobSpec {
            id: Some("doomed".to_string()),
            command: Some("false".to_string()),
            max_retries: Some(1),
        })
        .await
        .unwrap();
    let job = q.registry.claim().await.unwrap().unwrap();
    q.registry.settle(job, failure("exit code 1"), 2).await.unwrap();
    assert_eq!(q.registry.dlq_list().await.unwrap().len(), 1);

    q.registry.dlq_retry(&id).await.unwrap();

    assert!(q.registry.dlq_list().await.unwrap().is_empty());
    let jobs = q.registry.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[0].attempts, 0);
    assert!(jobs[0].last_error.is_none());
    assert!(jobs[0].next_run_at.is_none());

    // And it is claimable right away.
    assert!(q.registry.claim().await.unwrap().is_some());
}

#[tokio::test]
async fn test_dlq_retry_unknown_id_fails_without_mutation() {
    let q = test_queue();

    q.registry.enqueue(spec("echo live")).await.unwrap();

    let err = q.registry.dlq_retry("missing").await.unwrap_err();
    assert!(matches!(err, JobqError::NotFound(id) if id == "missing"));

    assert_eq!(q.registry.list(None).await.unwrap().len(), 1);
    assert!(q.registry.dlq_list().await.unwrap().is_empty());
}
