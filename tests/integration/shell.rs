//! Shell jobs: exit codes and captured output

use super::test_utils::{assert_status, doc, open_docket, WAIT};
use docket::queue::JobStatus;
use docket::types::JobKind;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_zero_completes_with_code() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Shell,
            doc("name: greet\ncommand: echo\nargs: [hello, world]\n"),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("greet", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(json!(0)));
    assert_eq!(record.payload.data.get("stdout"), Some(&json!("hello world\n")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stderr_output_fails_the_job() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Shell,
            doc("name: noisy\ncommand: \"echo oops 1>&2\"\n"),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("noisy", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    assert!(record.failed_reason.unwrap().contains("oops"));
    assert_eq!(record.payload.data.get("stderr"), Some(&json!("oops\n")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nonzero_exit_without_stderr_completes_with_code() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(JobKind::Shell, doc("name: quiet\ncommand: \"exit 3\"\n"))
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("quiet", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(json!(3)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unnamed_shell_job_uses_shell_queue() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .enqueue(JobKind::Shell, doc("command: \"true\"\n"))
        .await
        .unwrap();
    assert_eq!(submission.queue(), "__DocketShellQueue__");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multibyte_output_split_across_reads() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Shell,
            doc(r#"
name: accented
command: 'head -c 8191 /dev/zero | tr "\0" a >&2; printf "\303" >&2; sleep 0.2; printf "\251" >&2'
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("accented", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Failed);
    let expected = format!("{}é", "a".repeat(8191));
    let stderr = record.payload.data.get("stderr").and_then(|v| v.as_str()).unwrap();
    assert!(!stderr.contains('\u{fffd}'));
    assert_eq!(stderr, expected);
    assert_eq!(record.failed_reason.as_deref(), Some(expected.as_str()));
}
