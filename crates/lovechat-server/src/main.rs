mod gateway;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use lovechat_db::Database;
use lovechat_sync::composer::Composer;
use lovechat_sync::reactions::{ReactionEngine, ReactionMode};
use lovechat_sync::store::SqliteStore;
use lovechat_sync::streak::{Clock, DEFAULT_STREAK_TICK, StreakTracker, SystemClock};
use lovechat_sync::synchronizer::MessageSynchronizer;
use lovechat_sync::uploads::LocalBlobStore;

use crate::routes::{AppState, AppStateInner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lovechat_server=debug,lovechat_sync=debug,lovechat_db=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("LOVECHAT_DB_PATH").unwrap_or_else(|_| "lovechat.db".into());
    let host = std::env::var("LOVECHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LOVECHAT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let media_dir: PathBuf = std::env::var("LOVECHAT_MEDIA_DIR")
        .unwrap_or_else(|_| "./media".into())
        .into();
    let public_url =
        std::env::var("LOVECHAT_PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));
    let streak_tick = std::env::var("LOVECHAT_STREAK_TICK_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STREAK_TICK);
    let reaction_mode: ReactionMode = std::env::var("LOVECHAT_REACTION_MODE")
        .ok()
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or_default();

    // Init store and media
    let store = Arc::new(SqliteStore::new(Database::open(&PathBuf::from(&db_path))?));
    let blobs = Arc::new(LocalBlobStore::new(media_dir.clone(), &public_url).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state: AppState = Arc::new(AppStateInner {
        store: store.clone(),
        synchronizer: MessageSynchronizer::new(store.clone()),
        composer: Composer::new(store.clone(), blobs),
        reactions: ReactionEngine::new(store.clone(), reaction_mode),
        streak: StreakTracker::spawn(store, clock.clone(), streak_tick),
        clock,
    });

    let app = routes::router(state, &media_dir);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("LoveChat listening on {}", addr);
    info!("Reaction mode: {:?}, media served from {}", reaction_mode, media_dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
