use super::*;
use crate::channel::MemoryChannel;
use crate::health::ComponentStatus;
use crate::testing::{record, BrokenChannel, Call, MockService};
use chrono::TimeZone;
use serde_json::json;

struct Setup {
    service: Arc<MockService>,
    input: Arc<MemoryChannel>,
    output: Arc<MemoryChannel>,
}

impl Setup {
    async fn new(service: MockService, records: usize) -> Self {
        let input = Arc::new(MemoryChannel::new("in"));
        for i in 0..records {
            input.write(&record(json!({"x": i, "y": i * 2}))).await.unwrap();
        }
        Self {
            service: Arc::new(service),
            input,
            output: Arc::new(MemoryChannel::new("out")),
        }
    }

    fn controller(&self, threshold: Duration) -> LearningController {
        let mut config = LearningConfig::new("learn", "p", threshold)
            .with_params(record(json!({"to_predict": "y", "kwargs": {"stop_training_in_x_seconds": 5}})));
        config.collect_interval = Duration::from_millis(10);
        LearningController::new(config, self.input.clone(), self.output.clone(), self.service.clone())
    }

    async fn run(&self) -> LearningJob {
        let (_tx, rx) = broadcast::channel(1);
        self.controller(Duration::from_millis(50)).run(rx).await
    }

    fn registrations_deleted(&self) -> usize {
        self.service
            .calls()
            .iter()
            .filter(|c| **c == Call::DeleteRegistration("learn".into()))
            .count()
    }
}

#[test]
fn test_training_names() {
    let at = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let names = TrainingNames::new("p", at);

    assert_eq!(names.dataset, "p_training_ds_2021-03-04_05-06-07");
    assert_eq!(names.temporary, "TMP_p_2021-03-04_05-06-07");
}

#[test]
fn test_training_params_keep_user_kwargs() {
    let params = training_params(&record(json!({"to_predict": "y", "kwargs": {"a": 1}})), "ds").unwrap();

    assert_eq!(params["data_source_name"], json!("ds"));
    assert_eq!(params["kwargs"], json!({"a": 1, "join_learn_process": true}));
    assert_eq!(params["to_predict"], json!("y"));

    let params = training_params(&Record::new(), "ds").unwrap();
    assert_eq!(params["kwargs"], json!({"join_learn_process": true}));

    assert!(training_params(&record(json!({"kwargs": 3})), "ds").is_err());
}

#[tokio::test]
async fn test_existing_predictor_is_swapped_via_temporary_name() {
    let setup = Setup::new(MockService::new().with_exists(true), 3).await;

    let job = setup.run().await;

    assert_eq!(job.status, Some(JobStatus::Success));
    assert_eq!(job.records.len(), 3);
    let temporary = job.trained_as.clone().unwrap();
    assert!(temporary.starts_with("TMP_p_"));

    let calls = setup.service.calls();
    assert_eq!(calls[0], Call::Exists("p".into()));
    let Call::Upload { name: dataset, rows } = &calls[1] else {
        panic!("expected upload after the existence check, got {:?}", calls[1]);
    };
    assert!(dataset.starts_with("p_training_ds_"));
    assert_eq!(*rows, 3);

    let Call::Train { name, params } = &calls[2] else {
        panic!("expected train, got {:?}", calls[2]);
    };
    assert_eq!(name, &temporary);
    assert_eq!(params["data_source_name"], json!(dataset));
    assert_eq!(params["kwargs"]["join_learn_process"], json!(true));
    assert_eq!(params["kwargs"]["stop_training_in_x_seconds"], json!(5));

    assert_eq!(
        calls[3..].to_vec(),
        vec![
            Call::Delete("p".into()),
            Call::Rename {
                from: temporary,
                to: "p".into()
            },
            Call::DeleteRegistration("learn".into()),
        ]
    );

    let status = setup.output.read().await.unwrap();
    assert_eq!(
        status,
        vec![record(json!({"action": "training", "predictor": "p", "status": "success", "details": ""}))]
    );
}

#[tokio::test]
async fn test_predictor_checked_before_collection() {
    let setup = Setup::new(MockService::new().with_exists(false), 1).await;
    let health = HealthRegistry::new();

    let mut handle = setup
        .controller(Duration::from_secs(60))
        .with_health(health.clone())
        .start();
    assert_eq!(handle.wait_for(ControllerState::Running).await, ControllerState::Running);

    // still collecting, only the existence check has reached the service
    assert_eq!(setup.service.calls(), vec![Call::Exists("p".into())]);
    let service_health = health.component(components::PREDICTION_SERVICE).await.unwrap();
    assert_eq!(service_health.status, ComponentStatus::Degraded);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_existing_predictor_marks_service_healthy() {
    let setup = Setup::new(MockService::new().with_exists(true), 1).await;
    let health = HealthRegistry::new();

    let (_tx, rx) = broadcast::channel(1);
    let job = setup
        .controller(Duration::from_millis(30))
        .with_health(health.clone())
        .run(rx)
        .await;

    assert_eq!(job.status, Some(JobStatus::Success));
    let service_health = health.component(components::PREDICTION_SERVICE).await.unwrap();
    assert_eq!(service_health.status, ComponentStatus::Healthy);
    let checks = setup
        .service
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Exists(_)))
        .count();
    assert_eq!(checks, 1);
}

#[tokio::test]
async fn test_new_predictor_is_trained_in_place() {
    let setup = Setup::new(MockService::new().with_exists(false), 2).await;

    let job = setup.run().await;

    assert_eq!(job.status, Some(JobStatus::Success));
    assert_eq!(job.trained_as.as_deref(), Some("p"));
    let calls = setup.service.calls();
    assert!(!calls.iter().any(|c| matches!(c, Call::Delete(_) | Call::Rename { .. })));
    assert_eq!(setup.registrations_deleted(), 1);
}

#[tokio::test]
async fn test_training_failure_leaves_target_untouched() {
    let setup = Setup::new(MockService::new().with_exists(true).failing("train"), 2).await;

    let job = setup.run().await;

    assert_eq!(job.status, Some(JobStatus::Error));
    assert!(job.details.contains("failed to train TMP_p_"));
    assert!(job.details.contains("500"));

    let calls = setup.service.calls();
    assert!(!calls.iter().any(|c| matches!(c, Call::Delete(_) | Call::Rename { .. })));
    assert_eq!(setup.registrations_deleted(), 1);

    let status = setup.output.read().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["status"], json!("error"));
    assert_eq!(status[0]["details"], json!(job.details));
}

#[tokio::test]
async fn test_upload_failure_skips_training() {
    let setup = Setup::new(MockService::new().failing("upload"), 1).await;

    let job = setup.run().await;

    assert_eq!(job.status, Some(JobStatus::Error));
    assert!(job.details.starts_with("failed to upload dataset p_training_ds_"));
    assert!(!setup.service.calls().iter().any(|c| matches!(c, Call::Train { .. })));
    assert_eq!(setup.registrations_deleted(), 1);
}

#[tokio::test]
async fn test_delete_failure_does_not_rename() {
    let setup = Setup::new(MockService::new().with_exists(true).failing("delete"), 1).await;

    let job = setup.run().await;

    assert_eq!(job.status, Some(JobStatus::Error));
    assert!(!setup.service.calls().iter().any(|c| matches!(c, Call::Rename { .. })));
    assert_eq!(setup.registrations_deleted(), 1);
}

#[tokio::test]
async fn test_cleanup_runs_when_status_write_fails() {
    let service = Arc::new(MockService::new());
    let mut config = LearningConfig::new("learn", "p", Duration::from_millis(30));
    config.collect_interval = Duration::from_millis(10);
    let controller = LearningController::new(
        config,
        Arc::new(MemoryChannel::new("in")),
        Arc::new(BrokenChannel),
        service.clone(),
    );

    let (_tx, rx) = broadcast::channel(1);
    let job = controller.run(rx).await;

    assert_eq!(job.status, Some(JobStatus::Success));
    let deletions = service
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::DeleteRegistration(_)))
        .count();
    assert_eq!(deletions, 1);
}

#[tokio::test]
async fn test_cancel_during_collection() {
    let setup = Setup::new(MockService::new(), 1).await;
    let health = HealthRegistry::new();

    let mut handle = setup
        .controller(Duration::from_secs(60))
        .with_health(health.clone())
        .start();
    assert_eq!(handle.wait_for(ControllerState::Running).await, ControllerState::Running);

    let job = handle.stop().await.unwrap();

    assert_eq!(job.status, None);
    assert!(setup.output.is_empty().await);
    assert!(!setup.service.calls().iter().any(|c| matches!(c, Call::Upload { .. })));
    assert_eq!(setup.registrations_deleted(), 1);
    assert!(!health.readiness().await.ready);
}
