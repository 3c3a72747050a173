//! Worker attachment and persistence across reopening the store

use super::test_utils::{assert_status, doc, test_config, StubDriver, WAIT};
use docket::queue::JobStatus;
use docket::types::JobKind;
use docket::Docket;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn test_awaken_all_attaches_one_worker_per_queue() {
    let dir = TempDir::new().unwrap();
    let docket = Docket::with_driver(test_config(dir.path()), Arc::new(StubDriver::default())).unwrap();
    let dispatcher = docket.dispatcher();

    let first = dispatcher
        .enqueue(
            JobKind::Generic,
            doc("name: alpha\nmain: !!js/function \"(job) => job.complete(1)\"\n"),
        )
        .await
        .unwrap();
    let second = dispatcher
        .enqueue(
            JobKind::Generic,
            doc("name: beta\nmain: !!js/function \"(job) => job.complete(2)\"\n"),
        )
        .await
        .unwrap();
    assert!(dispatcher.active_workers().is_empty());

    let names = dispatcher.awaken_all().await.unwrap();
    assert_eq!(names.len(), 2);
    dispatcher.awaken_all().await.unwrap();
    assert_eq!(dispatcher.active_workers(), vec!["alpha".to_string(), "beta".to_string()]);
    assert!(!dispatcher.ensure_worker("alpha"));

    for (queue, submission) in [("alpha", &first), ("beta", &second)] {
        let record = dispatcher
            .wait_for(queue, submission.id(), WAIT)
            .await
            .unwrap()
            .unwrap();
        assert_status(&record, JobStatus::Completed);
    }
    dispatcher.shutdown().await;
    assert!(dispatcher.active_workers().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jobs_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let id = {
        let docket =
            Docket::with_driver(test_config(dir.path()), Arc::new(StubDriver::default())).unwrap();
        let submission = docket
            .dispatcher()
            .enqueue(
                JobKind::Generic,
                doc("name: durable\nmain: !!js/function \"(job) => job.complete(\\\"done\\\")\"\n"),
            )
            .await
            .unwrap();
        submission.id().to_string()
    };

    let docket = Docket::with_driver(test_config(dir.path()), Arc::new(StubDriver::default())).unwrap();
    let names = docket.dispatcher().awaken_all().await.unwrap();
    assert_eq!(names, vec!["durable".to_string()]);
    let record = docket
        .dispatcher()
        .wait_for("durable", &id, WAIT)
        .await
        .unwrap()
        .unwrap();
    assert_status(&record, JobStatus::Completed);
    assert_eq!(record.return_value, Some(serde_json::json!("done")));
}
