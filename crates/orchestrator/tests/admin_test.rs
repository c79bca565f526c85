//! Administrative operations, persistence and degraded construction.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use domain::{
    AnalyticsSettings, Capability, ConfigStore, ErrorKind, HttpMethod, PersistedState, StoreError,
    WorkerConfig, WorkerError, WorkerName,
};
use orchestrator::{OrchestratorBuilder, OrchestratorError};
use store::InMemoryConfigStore;

/// A config store that can be switched into failing.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryConfigStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "settings".into(),
                message: "disk unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FlakyStore {
    async fn get_worker_config(&self, name: &WorkerName) -> Result<Option<WorkerConfig>, StoreError> {
        self.check()?;
        self.inner.get_worker_config(name).await
    }

    async fn set_worker_config(&self, name: &WorkerName, config: &WorkerConfig) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_worker_config(name, config).await
    }

    async fn get_all(&self) -> Result<BTreeMap<WorkerName, WorkerConfig>, StoreError> {
        self.check()?;
        self.inner.get_all().await
    }
}

#[tokio::test]
async fn resetting_twice_matches_resetting_once() {
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        ScriptedTransport::always(ok(QUESTIONS)),
        clock(),
    )
    .await;
    let client = visitor("192.0.2.10");
    orchestrator.invoke(question("x"), &client).await.unwrap();

    assert_eq!(orchestrator.reset_rate_limit("question_generator"), Ok(1));
    assert_eq!(orchestrator.reset_rate_limit("question-generator"), Ok(0));
    let status = orchestrator.worker_status().unwrap();
    let worker = status
        .workers
        .iter()
        .find(|w| w.worker == "question_generator")
        .unwrap();
    assert_eq!(worker.usage.current, 0);
    assert!(orchestrator.invoke(question("x"), &client).await.is_ok());

    assert_eq!(
        orchestrator.reset_rate_limit("validator"),
        Err(OrchestratorError::UnknownWorker("validator".into()))
    );
}

#[tokio::test]
async fn status_covers_every_worker() {
    let orchestrator = orchestrator(
        vec![worker(Capability::SeoAnalyzer, 75)],
        ScriptedTransport::always(ok("{}")),
        clock(),
    )
    .await;
    orchestrator.block_ip("203.0.113.1", "spam", 0).unwrap();

    let status = orchestrator.worker_status().unwrap();
    assert_eq!(status.workers.len(), 6);
    assert_eq!(status.blocked_ips, 1);
    let extractor = status
        .workers
        .iter()
        .find(|w| w.worker == "faq_extractor")
        .unwrap();
    assert_eq!(extractor.rate_limit, 100);
    assert!(extractor.url.is_empty());
}

#[tokio::test]
async fn ip_administration_round_trip() {
    let orchestrator = orchestrator(Vec::new(), ScriptedTransport::always(ok("{}")), clock()).await;

    assert!(matches!(
        orchestrator.block_ip("not-an-ip", "x", 1),
        Err(OrchestratorError::InvalidIp(_))
    ));
    let entry = orchestrator.block_ip("2001:db8::1", "abuse", 2).unwrap();
    assert_eq!(entry.added_by, "admin");
    assert_eq!(orchestrator.list_blocked().unwrap().len(), 1);
    orchestrator.unblock_ip("2001:db8::1").unwrap();
    assert!(matches!(
        orchestrator.unblock_ip("2001:db8::1"),
        Err(OrchestratorError::NotBlocked(_))
    ));

    orchestrator.allow_ip("192.0.2.5", "monitoring").unwrap();
    assert_eq!(orchestrator.list_allowed().unwrap().len(), 1);
    orchestrator.disallow_ip("192.0.2.5").unwrap();
    assert!(matches!(
        orchestrator.disallow_ip("192.0.2.5"),
        Err(OrchestratorError::NotWhitelisted(_))
    ));
}

#[tokio::test]
async fn config_updates_apply_without_restart() {
    let store = Arc::new(FlakyStore::default());
    let orchestrator = OrchestratorBuilder::new(store.clone(), ScriptedTransport::always(ok(QUESTIONS)))
        .clock(clock())
        .build()
        .await;

    let mut config = orchestrator.worker_config("question_generator").unwrap();
    assert_eq!(config.rate_limit, 100);
    config.url = "https://q.example.com".into();
    config.rate_limit = 2;
    orchestrator.update_worker_config(config).await.unwrap();
    assert_eq!(orchestrator.worker_config("question_generator").unwrap().rate_limit, 2);

    let mut bad = orchestrator.worker_config("seo_analyzer").unwrap();
    bad.url = "ftp://seo.example.com".into();
    assert!(matches!(
        orchestrator.update_worker_config(bad).await,
        Err(OrchestratorError::InvalidConfig(WorkerError::InvalidConfig { .. }))
    ));

    store.failing.store(true, Ordering::SeqCst);
    assert!(matches!(
        orchestrator.reload_config().await,
        Err(OrchestratorError::Store(_))
    ));
    // The previous map survives a failed reload.
    assert_eq!(orchestrator.worker_config("question_generator").unwrap().rate_limit, 2);
}

#[tokio::test]
async fn health_check_bypasses_admission() {
    let transport = ScriptedTransport::always(ok(r#"{"status": "ok"}"#));
    let orchestrator = orchestrator(
        vec![worker(Capability::SeoAnalyzer, 1)],
        transport.clone(),
        clock(),
    )
    .await;

    for _ in 0..3 {
        let report = orchestrator.test_worker("seo-analyzer").await.unwrap();
        assert!(report.reachable);
        assert_eq!(report.status, Some(200));
    }
    let request = &transport.requests()[0];
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url, "https://seo-analyzer.example.com/health");
    assert!(request.body.is_none());
    assert!(orchestrator.export_state().unwrap().rate_windows.is_empty());

    let report = orchestrator.test_worker("faq_extractor").await.unwrap();
    assert!(!report.reachable);
    assert_eq!(report.message, "no URL configured");
    assert!(matches!(
        orchestrator.test_worker("nope").await,
        Err(OrchestratorError::UnknownWorker(_))
    ));
}

#[tokio::test]
async fn state_survives_a_restart() {
    let clock = clock();
    let first = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        ScriptedTransport::always(ok(QUESTIONS)),
        clock.clone(),
    )
    .await;
    first.invoke(question("x"), &visitor("192.0.2.10")).await.unwrap();
    first.block_ip("203.0.113.3", "abuse", 0).unwrap();
    let state = first.export_state().unwrap();
    assert_eq!(state.rate_windows.len(), 1);

    let second = OrchestratorBuilder::new(
        Arc::new(InMemoryConfigStore::with_workers([worker(Capability::QuestionGenerator, 1)])),
        ScriptedTransport::always(ok(QUESTIONS)),
    )
    .clock(clock.clone())
    .restore_state(state)
    .build()
    .await;

    assert!(second.is_available());
    assert!(matches!(
        second.invoke(question("x"), &visitor("192.0.2.10")).await,
        Err(WorkerError::RateLimited { .. })
    ));
    assert_eq!(second.list_blocked().unwrap().len(), 1);
    assert_eq!(second.analytics(1).unwrap().total_requests, 2);
}

#[tokio::test]
async fn maintenance_reports_what_it_removed() {
    let clock = clock();
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 5)],
        ScriptedTransport::always(ok(QUESTIONS)),
        clock.clone(),
    )
    .await;
    orchestrator.invoke(question("x"), &visitor("192.0.2.10")).await.unwrap();
    orchestrator.block_ip("203.0.113.3", "abuse", 1).unwrap();

    clock.advance(Duration::from_secs(2 * 3_600));
    let report = orchestrator.run_maintenance().unwrap();
    assert_eq!(report.rate_windows_evicted, 1);
    assert_eq!(report.blocks_expired, 1);
    assert_eq!(report.usage_events_pruned, 0);
}

#[tokio::test]
async fn analytics_reports_per_worker_outcomes() {
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        ScriptedTransport::always(ok(QUESTIONS)),
        clock(),
    )
    .await;
    let client = visitor("192.0.2.10");
    orchestrator.invoke(question("x"), &client).await.unwrap();
    let _ = orchestrator.invoke(question("x"), &client).await;

    let stats = orchestrator.analytics(7).unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.success_rate, 50.0);
    assert_eq!(stats.unique_clients, 1);
    assert_eq!(stats.per_worker["question_generator"].fail_count, 1);

    let worker = orchestrator.worker_analytics("question-generator", 7).unwrap();
    assert_eq!(worker.total_requests, 2);

    let activity = orchestrator.activity(1).unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].error_kind, Some(ErrorKind::Admission));

    assert_eq!(
        orchestrator.reset_analytics(false),
        Err(OrchestratorError::ConfirmationRequired)
    );
    assert_eq!(orchestrator.reset_analytics(true), Ok(2));
}

#[tokio::test]
async fn invalid_component_settings_degrade_the_orchestrator() {
    let orchestrator = OrchestratorBuilder::new(
        Arc::new(InMemoryConfigStore::new()),
        ScriptedTransport::always(ok(QUESTIONS)),
    )
    .analytics_settings(AnalyticsSettings {
        retention_days: 400,
        ..AnalyticsSettings::default()
    })
    .build()
    .await;

    assert!(!orchestrator.is_available());
    assert!(orchestrator.unavailable_reasons()[0].starts_with("analytics recorder"));

    let err = orchestrator
        .invoke(question("x"), &visitor("192.0.2.10"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Unavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(matches!(
        orchestrator.worker_status(),
        Err(OrchestratorError::Unavailable { .. })
    ));
}

#[tokio::test]
async fn unreadable_configuration_degrades_the_orchestrator() {
    let store = Arc::new(FlakyStore::default());
    store.failing.store(true, Ordering::SeqCst);
    let orchestrator = OrchestratorBuilder::new(store, ScriptedTransport::always(ok(QUESTIONS)))
        .build()
        .await;
    assert!(!orchestrator.is_available());
    assert!(orchestrator.unavailable_reasons()[0].starts_with("worker configuration"));
}

#[tokio::test]
async fn unsupported_state_version_degrades_the_orchestrator() {
    let orchestrator = OrchestratorBuilder::new(
        Arc::new(InMemoryConfigStore::new()),
        ScriptedTransport::always(ok(QUESTIONS)),
    )
    .restore_state(PersistedState {
        version: 99,
        ..PersistedState::default()
    })
    .build()
    .await;
    assert!(!orchestrator.is_available());
    assert!(matches!(
        orchestrator.export_state(),
        Err(OrchestratorError::Unavailable { .. })
    ));
}

#[tokio::test]
async fn unreadable_state_degrades_the_orchestrator() {
    let orchestrator = OrchestratorBuilder::new(
        Arc::new(InMemoryConfigStore::new()),
        ScriptedTransport::always(ok(QUESTIONS)),
    )
    .state_unreadable(StoreError::Parse {
        path: "state.json".into(),
        message: "expected value at line 1 column 1".into(),
    })
    .build()
    .await;
    assert!(!orchestrator.is_available());
    assert!(orchestrator.unavailable_reasons()[0].starts_with("persisted state"));
}
