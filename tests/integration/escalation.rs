//! Declarative escalation: failed jobs resubmit a counted copy of themselves

use super::test_utils::{assert_status, doc, open_docket, wait_for_finished};
use docket::document::{DocValue, JobDocument};
use docket::queue::JobStatus;
use docket::types::JobKind;

#[tokio::test(flavor = "multi_thread")]
async fn test_escalation_stops_at_max() {
    let (_dir, docket, _) = open_docket();
    docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: escalating
main: !!js/function "(job) => { throw \"still broken\"; }"
retry:
  max: 2
  delay: 0
"#),
        )
        .await
        .unwrap();

    let records = wait_for_finished(&docket, "escalating", 3).await;
    // Give a stray fourth copy a chance to show up.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let records_after = docket.dispatcher().job_records("escalating").await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records_after.len(), 3);

    let mut counts: Vec<i64> = records_after
        .iter()
        .map(|record| {
            assert_status(record, JobStatus::Failed);
            let document = JobDocument::parse(&record.payload.document).unwrap();
            match document.get("retry_count") {
                Some(DocValue::Int(count)) => *count,
                None => 0,
                other => panic!("unexpected counter {:?}", other),
            }
        })
        .collect();
    counts.sort();
    assert_eq!(counts, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_counter_field() {
    let (_dir, docket, _) = open_docket();
    docket
        .dispatcher()
        .submit(
            JobKind::Shell,
            doc(r#"
name: escalating-shell
command: "echo failing 1>&2"
retry:
  max: 1
  delay: 0
  counter: tries
"#),
        )
        .await
        .unwrap();

    let records = wait_for_finished(&docket, "escalating-shell", 2).await;
    assert_eq!(records.len(), 2);
    let escalated = records
        .iter()
        .filter(|record| {
            JobDocument::parse(&record.payload.document)
                .unwrap()
                .get("tries")
                .is_some()
        })
        .count();
    assert_eq!(escalated, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_escalation_waits_for_the_last_attempt() {
    let (_dir, docket, _) = open_docket();
    docket
        .dispatcher()
        .submit(
            JobKind::Generic,
            doc(r#"
name: escalating-attempts
main: !!js/function "(job) => { throw \"still broken\"; }"
option:
  attempts: 2
retry:
  max: 1
  delay: 0
"#),
        )
        .await
        .unwrap();

    wait_for_finished(&docket, "escalating-attempts", 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let records = docket
        .dispatcher()
        .job_records("escalating-attempts")
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_status(record, JobStatus::Failed);
        assert_eq!(record.attempts_made, 2);
    }
}
