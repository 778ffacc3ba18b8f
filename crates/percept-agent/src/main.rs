//! # percept-agent
//!
//! Robot perception server binary. Loads settings and credentials, wires the
//! collaborator clients and serves robot sessions until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use percept_clients::{
    ActionNotifier, CameraCapture, DeepgramConnector, FrameSource, OpenAiClient, PineconeStore,
    VectorStore, WebhookNotifier,
};
use percept_server::{PerceptServer, ServerConfig};
use percept_session::{Collaborators, SessionOptions};
use percept_settings::{Credentials, FrameSourceKind, PerceptSettings};

/// Robot perception server.
#[derive(Parser, Debug)]
#[command(name = "percept-agent", about = "Robot perception session server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `percept_session=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum concurrent sessions (overrides settings).
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Skip the Prometheus recorder; `/metrics` answers 404.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn apply(&self, settings: &mut PerceptSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_sessions {
            settings.server.max_sessions = max;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Build the collaborator set from settings and credentials.
fn build_collaborators(settings: &PerceptSettings, credentials: &Credentials) -> Collaborators {
    let openai = OpenAiClient::new(
        credentials.openai_api_key.clone(),
        settings.vision.clone(),
        settings.intention.clone(),
    );

    let store: Option<Arc<dyn VectorStore>> = match (
        &settings.vector_store.index_host,
        &credentials.pinecone_api_key,
    ) {
        (Some(host), Some(key)) => {
            tracing::info!(%host, "vector store enabled");
            Some(Arc::new(PineconeStore::new(
                host,
                key.clone(),
                &settings.vector_store,
                openai.clone(),
            )))
        }
        _ => {
            tracing::info!("no vector store configured, running without semantic context");
            None
        }
    };

    let notifier: Option<Arc<dyn ActionNotifier>> = match (
        &settings.orchestrator.endpoint,
        &credentials.orchestrator_api_key,
    ) {
        (Some(endpoint), Some(key)) => {
            tracing::info!(%endpoint, "orchestrator notifications enabled");
            Some(Arc::new(WebhookNotifier::new(
                endpoint.clone(),
                key.clone(),
                &settings.orchestrator,
            )))
        }
        _ => {
            tracing::info!("no orchestrator configured, actions are reported to the client only");
            None
        }
    };

    let camera: Option<Arc<dyn FrameSource>> =
        if settings.session.frame_source == FrameSourceKind::Camera {
            tracing::info!(device = ?settings.camera.device, "capturing from local camera");
            Some(Arc::new(CameraCapture::new(settings.camera.clone())))
        } else {
            None
        };

    let openai = Arc::new(openai);
    Collaborators {
        speech: Arc::new(DeepgramConnector::new(
            settings.speech.clone(),
            credentials.deepgram_api_key.clone(),
        )),
        vision: openai.clone(),
        analyzer: openai,
        store,
        notifier,
        camera,
    }
}

#[cfg(unix)]
async fn terminate() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c"),
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn terminate() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    // A missing .env is fine; the environment may already carry the keys.
    let _ = dotenvy::dotenv();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(percept_settings::settings_path);
    let mut settings = percept_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    percept_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let credentials = Credentials::from_env().context("Missing credentials")?;
    credentials
        .check_services(&settings)
        .context("Incomplete service configuration")?;

    let metrics = if args.no_metrics {
        None
    } else {
        Some(percept_server::metrics::install_recorder().context("Failed to install metrics")?)
    };

    let collaborators = build_collaborators(&settings, &credentials);
    let options = SessionOptions::from_settings(&settings);
    let config = ServerConfig::from(&settings.server);
    let server = PerceptServer::new(config, options, collaborators, metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        strategy = ?settings.session.capture_strategy,
        max_sessions = settings.server.max_sessions,
        "percept agent listening on http://{addr}"
    );

    terminate().await?;

    tracing::info!("Shutting down...");
    server.drain(vec![handle]).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            openai_api_key: "sk-test".into(),
            deepgram_api_key: "dg-test".into(),
            pinecone_api_key: None,
            orchestrator_api_key: None,
        }
    }

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["percept-agent"]);
        let mut settings = PerceptSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert!(!cli.no_metrics);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "percept-agent",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--max-sessions",
            "3",
            "--log-level",
            "debug",
        ]);
        let mut settings = PerceptSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.max_sessions, 3);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["percept-agent", "--settings", "/tmp/p.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/p.json")));
    }

    #[test]
    fn optional_services_off_without_config() {
        let collaborators = build_collaborators(&PerceptSettings::default(), &credentials());
        assert!(collaborators.store.is_none());
        assert!(collaborators.notifier.is_none());
        assert!(collaborators.camera.is_none());
    }

    #[test]
    fn optional_services_on_with_config() {
        let mut settings = PerceptSettings::default();
        settings.vector_store.index_host = Some("idx.example.io".into());
        settings.orchestrator.endpoint = Some("http://orchestrator.local/actions".into());
        settings.session.frame_source = FrameSourceKind::Camera;
        let credentials = Credentials {
            pinecone_api_key: Some("pc".into()),
            orchestrator_api_key: Some("orch".into()),
            ..credentials()
        };
        let collaborators = build_collaborators(&settings, &credentials);
        assert!(collaborators.store.is_some());
        assert!(collaborators.notifier.is_some());
        assert!(collaborators.camera.is_some());
    }
}
