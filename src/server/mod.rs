pub mod handlers;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
    middleware,
    routing::get,
};
use state::AppState;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

/// Header carrying the running version on every response
pub const VERSION_HEADER: &str = "x-hls-relay-version";

/// Build the application router.
///
/// Exposed separately from [`start`] so tests can drive it with `oneshot`.
pub fn build_router(config: Config) -> reqwest::Result<Router> {
    let proxy_path = config.proxy_path.clone();
    let static_site = config
        .static_dir
        .clone()
        .map(|dir| (dir.join(&config.static_index), dir));

    let state = AppState::new(config)?;

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::render_metrics))
        .route(&proxy_path, get(handlers::proxy::proxy));

    app = match static_site {
        Some((index, dir)) => {
            info!("Serving static assets from {}", dir.display());
            app.route_service("/", ServeFile::new(&index))
                .fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index)))
        }
        None => app.route("/", get(handlers::health::health_check)),
    };

    Ok(app
        .with_state(state)
        // Pre-flight is answered for every path, routed or not
        .layer(middleware::from_fn(handlers::proxy::answer_preflight))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .layer(TraceLayer::new_for_http()))
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let proxy_path = config.proxy_path.clone();

    let app = build_router(config)?;

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{} (proxy at {})", addr, proxy_path);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
