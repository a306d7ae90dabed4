/// vidfetch web server
///
/// Paste a video link, get the file back. Serves the form, runs yt-dlp per
/// request and streams the result to the browser.
mod config;
mod routes;
mod tickets;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use vidfetch_shared::fetcher::VideoFetcher;
use vidfetch_shared::issues::IssueStore;

use crate::config::Config;
use crate::tickets::TicketStore;

/// Shared application state for all handlers.
pub struct AppState {
    pub fetcher: VideoFetcher,
    pub issues: IssueStore,
    pub tickets: TicketStore,
    pub static_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidfetch_web=info,vidfetch_shared=info,tower_http=info".into()),
        )
        .init();

    // Config
    let config = Config::from_env()?;
    let fetcher = config.build_fetcher()?;
    if !fetcher.ffmpeg_available().await {
        error!("FFmpeg is not installed. The application may not function correctly.");
    }
    let issues = IssueStore::new(&config.issues_dir)?;
    info!("Issue reports go to {}", issues.dir().display());

    // App state
    let state = Arc::new(AppState {
        fetcher,
        issues,
        tickets: TicketStore::new(),
        static_dir: config.static_dir.clone(),
    });

    // Background ticket cleanup
    let cleanup_tickets = state.tickets.clone();
    let ttl = Duration::from_secs(config.ticket_ttl_secs);
    let cleanup_every = Duration::from_secs(config.ticket_cleanup_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            let removed = cleanup_tickets.cleanup_expired(ttl).await;
            if removed > 0 {
                info!(
                    "Cleaned up {} unclaimed downloads ({} still waiting)",
                    removed,
                    cleanup_tickets.pending().await
                );
            }
        }
    });

    let app = build_router(state);

    // Bind
    let addr = config.bind_addr();
    info!("vidfetch listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("vidfetch stopped");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/download", post(routes::download))
        .route("/download/events", get(routes::download_events))
        .route("/download/file/:ticket", get(routes::download_file))
        .route("/debug-formats", post(routes::debug_formats))
        .route("/report-issue", post(routes::report_issue))
        .route_service("/ads.txt", ServeFile::new(state.static_dir.join("ads.txt")))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
