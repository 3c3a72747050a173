//! Timed out attempts are stopped before the job is released

use super::test_utils::{assert_status, doc, open_docket, WAIT};
use docket::queue::JobStatus;
use docket::types::JobKind;
use serde_json::json;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_attempt_stops_before_the_retry() {
    let (_dir, docket, _) = open_docket();
    let started = Instant::now();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: slow
modules: [time]
main: !!js/function |
  function (job) {
    let n = job.attempts_made;
    let begin = #{};
    begin["start_" + n] = time::millis();
    job.update(begin);
    time::sleep(800);
    let end = #{};
    end["end_" + n] = time::millis();
    job.update(end);
    job.complete(n);
  }
option:
  attempts: 2
  timeout: 100
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("slow", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert_eq!(record.attempts_made, 2);
    assert!(record.failed_reason.as_deref().unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_millis(1_600));

    let data = &record.payload.data;
    let first = data.get("start_0").and_then(|v| v.as_i64()).unwrap();
    let second = data.get("start_1").and_then(|v| v.as_i64()).unwrap();
    assert!(second - first >= 100, "attempts overlapped: {:?}", data);

    // Give an abandoned attempt time to write after the job became terminal.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let later = docket
        .dispatcher()
        .job_records("slow")
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == record.id)
        .unwrap();
    assert_eq!(later.payload.data, record.payload.data);
    assert_eq!(later.payload.data.get("end_0"), None);
    assert_eq!(later.payload.data.get("end_1"), None);
    assert_ne!(later.return_value, Some(json!(0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_shell_job_is_killed() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Shell,
            doc(r#"
name: sleepy
command: "sleep 5; echo done"
option:
  timeout: 100
"#),
        )
        .await
        .unwrap();

    let started = Instant::now();
    let record = docket
        .dispatcher()
        .wait_for("sleepy", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(record.payload.data.get("stdout"), None);
}
