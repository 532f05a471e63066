use crate::config::Settings;
use crate::proxy::ShadowProxyService;
use crate::Result;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    service: ShadowProxyService,
}

impl Application {
    #[instrument]
    pub fn new() -> Result<Self> {
        Self::from_settings(Settings::new()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        let config = settings.shadow_config()?;

        info!(
            authoritative = %config.authoritative_url,
            candidate = %config.candidate_url,
            sample_rate = config.sample_rate.into_inner(),
            candidate_timeout_ms = config.candidate_timeout.as_millis() as u64,
            "Shadow configuration loaded"
        );

        Ok(Self {
            settings,
            service: ShadowProxyService::new(config),
        })
    }

    /// Serve until Ctrl-C; in-flight requests drain before returning
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.settings.bind_address()).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(address = %listener.local_addr()?, "Starting shadow proxy server");

        axum::serve(listener, self.service.into_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Shadow proxy stopped");
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn service(&self) -> &ShadowProxyService {
        &self.service
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
