//! Diagnostic jobs: one trace run per trigger, reported back by webhook.

mod notify;

pub use notify::*;

use crate::config::JobConfig;
use crate::probe::{no_loss_message, render_report, ProbeResult, ProbeRunner};

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Settings label holding the host to trace.
pub const TARGET_SETTING: &str = "target_url";

/// Job error types. None of these leave the job task; they are logged.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("no target_url setting provided for channel {channel_id}")]
    MissingTarget { channel_id: String },
    #[error("webhook delivery failed: {0}")]
    Delivery(String),
    #[error("webhook rejected with status {0}")]
    Rejected(StatusCode),
}

/// One configuration item sent by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(deserialize_with = "scalar_as_string")]
    pub default: String,
}

/// Inbound trigger body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRequest {
    pub channel_id: String,
    pub return_url: String,
    pub settings: Vec<Setting>,
}

impl DiagnosticRequest {
    /// Settings keyed by lowercased label. Later duplicates win.
    pub fn settings_map(&self) -> HashMap<String, &str> {
        self.settings
            .iter()
            .map(|s| (s.label.to_lowercase(), s.default.as_str()))
            .collect()
    }

    /// The host to trace, if the request names one.
    pub fn target(&self) -> Option<String> {
        self.settings_map()
            .get(TARGET_SETTING)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Accept string, bool or number for a setting value.
fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Flag(bool),
        Number(serde_json::Number),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Flag(b) => b.to_string(),
        Scalar::Number(n) => n.to_string(),
    })
}

/// Runs diagnostics and reports them. Shared by all triggers; holds no
/// per-job state.
#[derive(Debug)]
pub struct DiagnosticJob {
    config: JobConfig,
    runner: ProbeRunner,
    notifier: Notifier,
    max_jitter: Duration,
}

impl DiagnosticJob {
    pub fn new(config: JobConfig, runner: ProbeRunner, notifier: Notifier) -> Self {
        Self {
            config,
            runner,
            notifier,
            max_jitter: Duration::from_millis(100),
        }
    }

    #[cfg(test)]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Run `request` in the background. The caller does not wait for it.
    pub fn spawn(self: &Arc<Self>, request: DiagnosticRequest) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move { job.execute(request).await })
    }

    /// Run one diagnostic end to end. Failures are logged, never returned.
    pub async fn execute(&self, request: DiagnosticRequest) {
        let started = Utc::now();
        let channel_id = request.channel_id.clone();

        match self.run(request).await {
            Ok(status) => tracing::info!(
                "Diagnostic for channel {} delivered ({}) in {}ms",
                channel_id,
                status,
                (Utc::now() - started).num_milliseconds()
            ),
            Err(e @ JobError::MissingTarget { .. }) => {
                tracing::error!("Diagnostic aborted: {}", e)
            }
            Err(e) => tracing::warn!("Diagnostic for channel {}: {}", channel_id, e),
        }
    }

    async fn run(&self, request: DiagnosticRequest) -> Result<StatusCode, JobError> {
        let target = request.target().ok_or_else(|| JobError::MissingTarget {
            channel_id: request.channel_id.clone(),
        })?;

        if !self.max_jitter.is_zero() {
            let jitter = rand::random::<u64>() % self.max_jitter.as_millis().max(1) as u64;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        tracing::info!("Running network diagnostics on {}...", target);
        let result = self.runner.run(&target).await;
        tracing::debug!("Trace for {} finished with exit code {:?}", target, result.exit_code);
        let payload = self.build_payload(&target, &result);

        self.notifier.deliver(&request.return_url, &payload).await
    }

    /// Turn a probe outcome into the webhook body.
    pub fn build_payload(&self, target: &str, result: &ProbeResult) -> NotificationPayload {
        let (status, message) = match &result.error {
            Some(e) => (
                Status::Error,
                format!("❌ Network diagnostic failed for {}: {}", target, e),
            ),
            None => {
                let message = render_report(&result.raw_output, target);
                let status = if message == no_loss_message(target) {
                    Status::Success
                } else {
                    Status::Warning
                };
                (status, message)
            }
        };

        NotificationPayload {
            message,
            username: self.config.username.clone(),
            event_name: self.config.event_name.clone(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, TraceCommand};

    use axum::{extract::State, routing::post, Json, Router};
    use tokio::sync::mpsc;

    /// Local webhook receiver; yields every posted body.
    async fn webhook_sink() -> (String, mpsc::UnboundedReceiver<NotificationPayload>) {
        async fn receive(
            State(tx): State<mpsc::UnboundedSender<NotificationPayload>>,
            Json(payload): Json<NotificationPayload>,
        ) -> Json<serde_json::Value> {
            let _ = tx.send(payload);
            Json(serde_json::json!({ "status": "ok" }))
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route("/hook", post(receive)).with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (format!("http://{}/hook", addr), rx)
    }

    fn job_with(command: TraceCommand, timeout: Duration) -> DiagnosticJob {
        let config = JobConfig::default();
        let notifier = Notifier::new(Duration::from_secs(5)).unwrap();
        DiagnosticJob::new(config, ProbeRunner::new(command, timeout), notifier)
            .with_max_jitter(Duration::ZERO)
    }

    fn echo(output: &str) -> TraceCommand {
        TraceCommand::new("sh", &["-c", &format!("printf '%s\\n' '{}'", output)])
    }

    fn request(return_url: &str, settings: Vec<Setting>) -> DiagnosticRequest {
        DiagnosticRequest {
            channel_id: "chan-1".to_string(),
            return_url: return_url.to_string(),
            settings,
        }
    }

    fn setting(label: &str, value: &str) -> Setting {
        Setting {
            label: label.to_string(),
            kind: "text".to_string(),
            required: true,
            default: value.to_string(),
        }
    }

    #[test]
    fn test_target_lookup_is_case_insensitive() {
        let req = request(
            "http://localhost/hook",
            vec![setting("interval", "* * * * *"), setting("target_URL", " google.com ")],
        );
        assert_eq!(req.target().as_deref(), Some("google.com"));
    }

    #[test]
    fn test_blank_target_is_missing() {
        let req = request("http://localhost/hook", vec![setting("Target_Url", "  ")]);
        assert_eq!(req.target(), None);
    }

    #[test]
    fn test_setting_values_accept_scalars() {
        let req: DiagnosticRequest = serde_json::from_value(serde_json::json!({
            "channel_id": "c",
            "return_url": "https://ping.example.com/v1/webhooks/abc",
            "settings": [
                {"label": "target_URL", "type": "text", "required": true, "default": "google.com"},
                {"label": "enabled", "type": "checkbox", "required": false, "default": true},
                {"label": "cycles", "type": "number", "required": false, "default": 5}
            ]
        }))
        .unwrap();

        assert_eq!(req.settings[1].default, "true");
        assert_eq!(req.settings[2].default, "5");
        assert_eq!(req.settings[0].kind, "text");
    }

    #[test]
    fn test_build_payload_statuses() {
        let job = job_with(TraceCommand::mtr(5), Duration::from_secs(1));

        let warning = job.build_payload(
            "google.com",
            &ProbeResult::completed(" 2   192.168.1.1      5/ 100 =  5%  |".to_string(), 0),
        );
        assert_eq!(warning.status, Status::Warning);
        assert!(warning.message.contains("5% packet loss detected at 192.168.1.1"));
        assert_eq!(warning.username, "Network Path Health");
        assert_eq!(warning.event_name, "Network Diagnostics");

        let success = job.build_payload("google.com", &ProbeResult::completed(String::new(), 0));
        assert_eq!(success.status, Status::Success);
        assert_eq!(success.message, "No packet loss detected to google.com.");

        let failed = job.build_payload(
            "google.com",
            &ProbeResult::failed(ProbeError::Command("boom".to_string()), Some(1)),
        );
        assert_eq!(failed.status, Status::Error);
        assert_eq!(
            failed.message,
            "❌ Network diagnostic failed for google.com: command failed: boom"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_loss_is_reported_as_warning() {
        let (url, mut rx) = webhook_sink().await;
        let job = job_with(
            echo(" 2   192.168.1.1      5/ 100 =  5%  |"),
            Duration::from_secs(10),
        );

        job.execute(request(&url, vec![setting("target_url", "google.com")]))
            .await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.status, Status::Warning);
        assert!(payload.message.contains("5% packet loss detected at 192.168.1.1"));
        assert!(payload.message.contains("google.com"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_path_is_reported_as_success() {
        let (url, mut rx) = webhook_sink().await;
        let job = job_with(
            echo("  1.|-- 192.168.1.1   0.0%   5   0.5   0.6   0.4   0.8   0.1"),
            Duration::from_secs(10),
        );

        job.execute(request(&url, vec![setting("TARGET_URL", "google.com")]))
            .await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.status, Status::Success);
        assert_eq!(payload.message, "No packet loss detected to google.com.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_target_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let (url, mut rx) = webhook_sink().await;
        let job = job_with(
            TraceCommand::new("sh", &["-c", &format!("touch {}", marker.display())]),
            Duration::from_secs(10),
        );

        job.execute(request(&url, vec![setting("interval", "* * * * *")]))
            .await;

        assert!(rx.try_recv().is_err());
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported_as_error() {
        let (url, mut rx) = webhook_sink().await;
        let job = job_with(
            TraceCommand::new("sh", &["-c", "exec sleep 30"]),
            Duration::from_millis(200),
        );

        job.execute(request(&url, vec![setting("target_url", "google.com")]))
            .await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.status, Status::Error);
        assert!(payload.message.starts_with("❌"));
        assert!(payload.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported_as_error() {
        let (url, mut rx) = webhook_sink().await;
        let job = job_with(
            TraceCommand::new("netpath-no-such-trace-tool", &[]),
            Duration::from_secs(1),
        );

        job.execute(request(&url, vec![setting("target_url", "google.com")]))
            .await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.status, Status::Error);
        assert!(payload.message.contains("failed to start netpath-no-such-trace-tool"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_jobs_run_concurrently() {
        let (url, mut rx) = webhook_sink().await;
        let job = Arc::new(job_with(
            TraceCommand::new("sh", &["-c", "sleep 0.5"]),
            Duration::from_secs(10),
        ));

        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| job.spawn(request(&url, vec![setting("target_url", "google.com")])))
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(started.elapsed() < Duration::from_millis(1400));
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap().status, Status::Success);
        }
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_panic() {
        let job = job_with(TraceCommand::new("netpath-no-such-trace-tool", &[]), Duration::from_secs(1));
        job.execute(request("http://127.0.0.1:1/hook", vec![setting("target_url", "google.com")]))
            .await;
    }
}
