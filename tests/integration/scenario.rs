//! Browser jobs against the in-memory driver

use super::test_utils::{assert_status, doc, open_docket, WAIT};
use docket::queue::JobStatus;
use docket::types::JobKind;
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test(flavor = "multi_thread")]
async fn test_goto_and_scrape() {
    let (_dir, docket, driver) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Browser,
            doc(r#"
name: crawl
play:
  goto: https://example.com/
  scrape:
    selector: h1
    attributes: [innerText]
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("crawl", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    let result = record.return_value.unwrap();
    assert_eq!(result["goto"], json!({"success": true, "url": "https://example.com/"}));
    assert_eq!(result["scrape"], json!([{"innerText": "Example Domain"}]));
    assert_eq!(driver.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(driver.sessions_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_action_is_recorded_not_raised() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Browser,
            doc(r#"
name: offline
play:
  goto: "unreachable://nowhere"
  wait: h1
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("offline", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    let result = record.return_value.unwrap();
    assert_eq!(result["goto"]["success"], json!(false));
    assert!(result["goto"]["error"]
        .as_str()
        .unwrap()
        .contains("ERR_NAME_NOT_RESOLVED"));
    assert_eq!(result["wait"], json!({"success": true}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_then_hook_settles_the_job() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Browser,
            doc(r#"
name: hooked-crawl
play:
  goto: https://example.com/about
then: !!js/function "(job, result) => job.complete(result.goto.url)"
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("hooked-crawl", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(json!("https://example.com/about")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_actions_run_in_written_order() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Browser,
            doc(r#"
name: custom-order
init: !!js/function |
  function (job) {
    #{
      zeta: |page, arg| arg + 1,
      alpha: |page, arg| arg * 2
    }
  }
play:
  alpha: 5
  zeta: 1
then: !!js/function "(job, result) => result.zeta"
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("custom-order", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    // `then` returned without settling, so the scenario result stands.
    let result = record.return_value.unwrap();
    let names: Vec<&str> = result.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
    assert_eq!(result["zeta"], json!(2));
    assert_eq!(result["alpha"], json!(10));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_screenshot_without_upload_returns_buffer() {
    let (_dir, docket, _) = open_docket();
    let submission = docket
        .dispatcher()
        .submit(
            JobKind::Browser,
            doc(r#"
name: shots
play:
  goto: https://example.com/
  screenshot:
    fullPage: true
"#),
        )
        .await
        .unwrap();

    let record = docket
        .dispatcher()
        .wait_for("shots", submission.id(), WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    let shot = &record.return_value.unwrap()["screenshot"];
    assert_eq!(shot["success"], json!(true));
    assert!(shot["buffer"].as_str().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_browser_job_without_play_is_rejected() {
    let (_dir, docket, _) = open_docket();
    assert!(docket
        .dispatcher()
        .submit(JobKind::Browser, doc("name: empty\nbrowser:\n  locale: en-US\n"))
        .await
        .is_err());
}
