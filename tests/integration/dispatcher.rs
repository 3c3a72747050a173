//! Submission, attempts and job lifecycle through the dispatcher

use super::test_utils::{assert_status, doc, open_docket, wait_for_finished, WAIT};
use docket::document::{DocValue, JobDocument};
use docket::error::{DocketError, DocumentError};
use docket::queue::{JobStatus, Submission};
use docket::types::JobKind;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_generic_job_completes_with_value() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: math
count: 41
main: !!js/function "(job) => job.complete(job.get(\"count\") + 1)"
"#),
        )
        .await
        .unwrap();
    assert_eq!(submission.queue(), "math");

    let record = docket
        .dispatcher()
        .wait_for("math", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(json!(42)));
    assert_eq!(record.attempts_made, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_thrown_error_uses_every_attempt() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: flaky
main: !!js/function "(job) => { throw \"boom\"; }"
option:
  attempts: 3
  backoff:
    type: fixed
    delay: 10
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("flaky", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert_eq!(record.attempts_made, 3);
    assert_eq!(record.stacktrace.len(), 3);
    assert!(record.failed_reason.unwrap().contains("boom"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_main_that_never_settles_fails() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc("name: idle\nmain: !!js/function \"(job) => 1\"\n"),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("idle", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert!(record
        .failed_reason
        .unwrap()
        .contains("without calling complete or fail"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_hook_sees_message() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: hooked
main: !!js/function "(job) => job.fail(\"bad input\")"
error: !!js/function "(job, message) => job.update(#{ seen: message })"
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("hooked", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert_eq!(record.payload.data.get("seen"), Some(&json!("bad input")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_document_is_rejected_before_enqueue() {
    let (_dir, docket, _) = open_docket();
    let err = docket
        .dispatcher()
        .submit(JobKind::Generic, doc("name: nothing\nvalue: 1\n"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocketError::Document(DocumentError::MissingField(ref field)) if field == "main"
    ));
    assert!(docket.dispatcher().queue_names().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unnamed_document_uses_default_queue() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .enqueue(
            JobKind::Generic,
            doc("main: !!js/function \"(job) => job.complete()\"\n"),
        )
        .await
        .unwrap();
    assert_eq!(submission.queue(), "__DocketQueue__");
    assert!(docket.dispatcher().active_workers().is_empty());

    let listing = docket.dispatcher().jobs_of("__DocketQueue__").await.unwrap();
    assert_eq!(listing.jobs, vec![submission.id().to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_explicit_job_id_and_removal() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .enqueue(
            JobKind::Generic,
            doc(r#"
name: ids
main: !!js/function "(job) => job.complete()"
option:
  jobId: nightly-report
  delay: 60000
"#),
        )
        .await
        .unwrap();
    let Submission::Job(record) = submission else {
        panic!("expected a one-off job");
    };
    assert_eq!(record.id, "nightly-report");
    assert_eq!(record.status, JobStatus::Delayed);

    assert!(docket.dispatcher().remove("ids", "nightly-report").await.unwrap());
    assert!(docket
        .dispatcher()
        .describe("ids", "nightly-report")
        .await
        .unwrap()
        .is_none());
    assert!(!docket.dispatcher().remove("ids", "nightly-report").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recurring_job_stops_at_limit() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: ticks
main: !!js/function "(job) => job.complete(job.id)"
option:
  repeat:
    every: 50
    limit: 2
"#),
        )
        .await
        .unwrap();
    assert!(matches!(submission, Submission::Scheduled(_)));

    let records = super::test_utils::wait_for_finished(&docket, "ticks", 2).await;
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_status(record, JobStatus::Completed);
        assert!(record.repeat_key.is_some());
    }
    let listing = docket.dispatcher().jobs_of("ticks").await.unwrap();
    assert!(listing.repeat_jobs.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capability_modules_are_injected() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: counters
modules:
  - kv
  - name: clock
    source: time
main: !!js/function >
  function (job) {
    kv::set("runs", 7);
    let stamp = clock::millis();
    job.complete(#{ runs: kv::get("runs"), timed: stamp > 0 });
  }
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("counters", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(json!({"runs": 7, "timed": true})));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_module_fails_the_job() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc("name: missing-mod\nmodules: [nosuch]\nmain: !!js/function \"(job) => job.complete()\"\n"),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("missing-mod", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert!(record.failed_reason.unwrap().contains("nosuch"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_module_still_runs_the_error_hook() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: missing-mod-hook
modules: [nosuch]
main: !!js/function "(job) => job.complete()"
error: !!js/function "(job, message) => job.update(#{ hooked: message })"
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("missing-mod-hook", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    let hooked = record.payload.data.get("hooked").and_then(|v| v.as_str());
    assert!(
        hooked.is_some_and(|message| message.contains("nosuch")),
        "error hook did not run: {:?}",
        record.payload.data
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_hook_can_resubmit_recursively() {
    let (_dir, docket, _) = open_docket();
    docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: recursive
count: 0
main: !!js/function "(job) => { throw \"nope\"; }"
error: !!js/function |
  function (job, message) {
    let c = job.get("count");
    if c < 5 {
      job.set("count", c + 1);
      job.submit();
    }
  }
"#),
        )
        .await
        .unwrap();

    let records = wait_for_finished(&docket, "recursive", 6).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let records_after = docket.dispatcher().job_records("recursive").await.unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(records_after.len(), 6);

    let mut counts: Vec<i64> = records_after
        .iter()
        .map(|record| {
            assert_status(record, JobStatus::Failed);
            match JobDocument::parse(&record.payload.document).unwrap().get("count") {
                Some(DocValue::Int(count)) => *count,
                other => panic!("unexpected count {:?}", other),
            }
        })
        .collect();
    counts.sort();
    assert_eq!(counts, vec![0, 1, 2, 3, 4, 5]);
}
