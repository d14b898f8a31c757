use crate::{
    config::Config,
    hls::PlaylistRewriter,
    metrics,
    upstream::{self, FetchConfig},
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across all handlers.
///
/// Read-only after construction; requests never share mutable state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling (redirects disabled)
    pub http_client: Client,
    /// Outbound request settings derived from `config`
    pub fetch: Arc<FetchConfig>,
    pub rewriter: Arc<PlaylistRewriter>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let http_client = upstream::build_client(&config)?;
        let fetch = FetchConfig::from_config(&config);
        let rewriter = PlaylistRewriter::new(config.proxy_path.clone())
            .with_https_upgrade(config.force_https_upgrade);

        Ok(Self {
            config: Arc::new(config),
            http_client,
            fetch: Arc::new(fetch),
            rewriter: Arc::new(rewriter),
            metrics: metrics::init(),
            started_at: Instant::now(),
        })
    }
}
