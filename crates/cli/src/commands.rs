//! Runs one command against a freshly built orchestrator.
//!
//! State is loaded from the state directory before the command and written
//! back after it, but only while the orchestrator is available. A degraded
//! run never overwrites the state it could not read.
//!
//! Concurrent runs over one state directory are serialised by an exclusive
//! advisory lock on `state.lock`, held from before the load until after the
//! save.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use domain::{CapabilityInput, ClientContext, Settings, StateStore, Timestamp, WorkerError};
use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorError};
use serde::Serialize;
use serde_json::{json, Value};
use store::{JsonStateStore, TomlConfigStore};
use tracing::{debug, warn};
use worker_http::ReqwestTransport;

use crate::args::{Cli, Command};

const LOCK_FILE: &str = "state.lock";

/// The JSON document to print and whether the command succeeded.
#[derive(Debug)]
pub struct Outcome {
    pub document: Value,
    pub success: bool,
}

/// A failed command, rendered as `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: String,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl Failure {
    fn new(kind: impl Into<String>, message: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            message: message.to_string(),
            retry_after_secs: None,
        }
    }

    pub fn internal(err: &anyhow::Error) -> Self {
        Self::new("internal", format!("{err:#}"))
    }

    fn from_worker(err: &WorkerError, now: Option<Timestamp>) -> Self {
        Self {
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
            retry_after_secs: now
                .and_then(|now| err.retry_after(now))
                .map(|d| d.as_secs()),
        }
    }

    pub fn document(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
                "retry_after_secs": self.retry_after_secs,
            }
        })
    }
}

impl From<OrchestratorError> for Failure {
    fn from(err: OrchestratorError) -> Self {
        let kind = match &err {
            OrchestratorError::Unavailable { .. } => "unavailable",
            OrchestratorError::UnknownWorker(_) => "configuration",
            OrchestratorError::InvalidIp(_) => "invalid_input",
            OrchestratorError::NotBlocked(_) | OrchestratorError::NotWhitelisted(_) => "not_found",
            OrchestratorError::InvalidConfig(inner) => inner.kind().as_str(),
            OrchestratorError::Store(_) => "storage",
            OrchestratorError::ConfirmationRequired => "confirmation_required",
        };
        Self::new(kind, err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Self::new("internal", err)
    }
}

/// Exclusive hold on a state directory. The lock goes with the file handle.
#[derive(Debug)]
struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Waits until no other run holds `dir`.
    async fn acquire(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating state directory {}", dir.display()))?;
        let path = dir.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> std::io::Result<File> {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)?;
                fs4::fs_std::FileExt::lock_exclusive(&file)?;
                Ok(file)
            }
        })
        .await
        .context("waiting for the state lock")?
        .with_context(|| format!("locking {}", path.display()))?;
        debug!(path = %path.display(), "state lock acquired");
        Ok(Self { _file: file, path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "state lock released");
    }
}

pub async fn run(cli: &Cli) -> Result<Outcome> {
    let _lock = StateLock::acquire(&cli.state_dir).await?;

    let config_store = Arc::new(TomlConfigStore::new(&cli.config));
    // An unreadable settings file leaves the component settings at their
    // defaults; the builder then fails on the worker table and degrades.
    let settings = config_store.load_settings().await.unwrap_or_else(|e| {
        warn!(path = %cli.config.display(), error = %e, "settings unreadable");
        Settings::default()
    });

    let transport = Arc::new(ReqwestTransport::new().context("building the HTTP client")?);
    let mut builder = OrchestratorBuilder::new(config_store, transport)
        .security_settings(settings.security)
        .analytics_settings(settings.analytics)
        .user_agent(settings.http.user_agent);

    let state_store = JsonStateStore::in_dir(&cli.state_dir);
    builder = match state_store.load().await {
        Ok(Some(state)) => builder.restore_state(state),
        Ok(None) => builder,
        Err(e) => builder.state_unreadable(e),
    };
    let orchestrator = builder.build().await;

    let result = execute(&orchestrator, &cli.command).await;

    if orchestrator.is_available() {
        let state = orchestrator
            .export_state()
            .context("exporting orchestrator state")?;
        state_store
            .save(&state)
            .await
            .with_context(|| format!("saving state to {}", state_store.path().display()))?;
    } else {
        debug!("orchestrator unavailable; state left untouched");
    }

    Ok(match result {
        Ok(document) => Outcome {
            document,
            success: true,
        },
        Err(failure) => Outcome {
            document: failure.document(),
            success: false,
        },
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, Failure> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(orchestrator: &Orchestrator, command: &Command) -> Result<Value, Failure> {
    match command {
        Command::Invoke {
            capability,
            input,
            client_ip,
            headers,
        } => {
            let payload: Value = serde_json::from_str(input).map_err(|e| {
                Failure::from_worker(&WorkerError::invalid_input("input", e.to_string()), None)
            })?;
            let input = CapabilityInput::from_json(*capability, payload)
                .map_err(|e| Failure::from_worker(&e, None))?;
            let client = ClientContext {
                peer_addr: *client_ip,
                headers: headers.clone(),
            };
            let output = orchestrator
                .invoke(input, &client)
                .await
                .map_err(|e| Failure::from_worker(&e, orchestrator.now()))?;
            to_json(&output)
        }
        Command::Status => to_json(&orchestrator.worker_status()?),
        Command::Config { worker } => to_json(&orchestrator.worker_config(worker)?),
        Command::ResetRateLimit { worker } => {
            let cleared = orchestrator.reset_rate_limit(worker)?;
            Ok(json!({ "worker": worker, "windows_cleared": cleared }))
        }
        Command::BlockIp { ip, reason, hours } => to_json(&orchestrator.block_ip(ip, reason, *hours)?),
        Command::UnblockIp { ip } => to_json(&orchestrator.unblock_ip(ip)?),
        Command::ListBlocked => to_json(&orchestrator.list_blocked()?),
        Command::AllowIp { ip, reason } => to_json(&orchestrator.allow_ip(ip, reason)?),
        Command::DisallowIp { ip } => to_json(&orchestrator.disallow_ip(ip)?),
        Command::ListAllowed => to_json(&orchestrator.list_allowed()?),
        Command::Analytics { days, worker: None } => to_json(&orchestrator.analytics(*days)?),
        Command::Analytics {
            days,
            worker: Some(worker),
        } => to_json(&orchestrator.worker_analytics(worker, *days)?),
        Command::UsagePatterns { days, limit } => to_json(&orchestrator.usage_patterns(*days, *limit)?),
        Command::Violations { hours } => to_json(&orchestrator.violations(*hours)?),
        Command::Activity { limit } => to_json(&orchestrator.activity(*limit)?),
        Command::TestWorker { worker } => to_json(&orchestrator.test_worker(worker).await?),
        Command::Reload => {
            let workers = orchestrator.reload_config().await?;
            Ok(json!({ "workers": workers }))
        }
        Command::Maintenance => to_json(&orchestrator.run_maintenance()?),
        Command::ResetAnalytics { confirm } => {
            let removed = orchestrator.reset_analytics(*confirm)?;
            Ok(json!({ "events_removed": removed }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    const SETTINGS: &str = r#"
[workers.seo_analyzer]
url = "http://127.0.0.1:9"
enabled = false

[security]
auto_block_threshold = 3
"#;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("faqworks.toml"), SETTINGS).unwrap();
        dir
    }

    async fn run_in(dir: &Path, args: &[&str]) -> Outcome {
        let config = dir.join("faqworks.toml");
        let state = dir.join("state");
        let mut argv = vec![
            "faqworks".to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--state-dir".to_string(),
            state.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        let cli = Cli::try_parse_from(argv).unwrap();
        run(&cli).await.unwrap()
    }

    #[tokio::test]
    async fn blocks_persist_between_runs() {
        let dir = workspace();
        let blocked = run_in(dir.path(), &["block-ip", "203.0.113.9", "--reason", "scraping"]).await;
        assert!(blocked.success);
        assert_eq!(blocked.document["reason"], "scraping");

        let listed = run_in(dir.path(), &["list-blocked"]).await;
        assert!(listed.success);
        assert_eq!(listed.document.as_array().unwrap().len(), 1);

        let unblocked = run_in(dir.path(), &["unblock-ip", "203.0.113.9"]).await;
        assert!(unblocked.success);
        let again = run_in(dir.path(), &["unblock-ip", "203.0.113.9"]).await;
        assert!(!again.success);
        assert_eq!(again.document["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn failed_invocations_are_reported_and_recorded() {
        let dir = workspace();
        let outcome = run_in(
            dir.path(),
            &["invoke", "seo", "--input", r#"{"question": "What is X?", "answer": "A thing."}"#, "--client-ip", "192.0.2.4"],
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.document["error"]["kind"], "configuration");
        assert!(outcome.document["error"]["retry_after_secs"].is_null());

        let stats = run_in(dir.path(), &["analytics", "--worker", "seo_analyzer"]).await;
        assert_eq!(stats.document["total_requests"], 1);
        assert_eq!(stats.document["fail_count"], 1);
    }

    #[tokio::test]
    async fn malformed_input_is_invalid_input() {
        let dir = workspace();
        let outcome = run_in(dir.path(), &["invoke", "question", "--input", "{not json"]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.document["error"]["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn status_reflects_settings_file() {
        let dir = workspace();
        let outcome = run_in(dir.path(), &["status"]).await;
        assert!(outcome.success);
        let workers = outcome.document["workers"].as_array().unwrap();
        assert_eq!(workers.len(), 6);
        let seo = workers.iter().find(|w| w["worker"] == "seo_analyzer").unwrap();
        assert_eq!(seo["enabled"], false);
        assert_eq!(seo["url"], "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn corrupt_state_degrades_and_is_left_alone() {
        let dir = workspace();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("state.json"), "not json").unwrap();

        let outcome = run_in(dir.path(), &["status"]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.document["error"]["kind"], "unavailable");
        assert_eq!(
            std::fs::read_to_string(state_dir.join("state.json")).unwrap(),
            "not json"
        );
    }

    #[tokio::test]
    async fn concurrent_runs_keep_each_others_state() {
        let dir = workspace();
        let input = r#"{"question": "What is X?", "answer": "A thing."}"#;
        let args = ["invoke", "seo", "--input", input, "--client-ip", "192.0.2.4"];
        let (first, second) = tokio::join!(run_in(dir.path(), &args), run_in(dir.path(), &args));
        assert!(!first.success);
        assert!(!second.success);

        let stats = run_in(dir.path(), &["analytics", "--worker", "seo_analyzer"]).await;
        assert_eq!(stats.document["total_requests"], 2);
        assert_eq!(stats.document["fail_count"], 2);
    }

    #[tokio::test]
    async fn state_lock_waits_for_the_holder() {
        let dir = workspace();
        let state_dir = dir.path().join("state");
        let held = StateLock::acquire(&state_dir).await.unwrap();
        assert!(state_dir.join(LOCK_FILE).exists());

        let waiting = tokio::spawn({
            let state_dir = state_dir.clone();
            async move { StateLock::acquire(&state_dir).await.map(|_| ()) }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        drop(held);
        tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn analytics_reset_needs_confirmation() {
        let dir = workspace();
        let refused = run_in(dir.path(), &["reset-analytics"]).await;
        assert_eq!(refused.document["error"]["kind"], "confirmation_required");
        let done = run_in(dir.path(), &["reset-analytics", "--confirm"]).await;
        assert!(done.success);
        assert_eq!(done.document["events_removed"], 0);
    }
}
