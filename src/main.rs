use std::sync::Arc;

use lexikon_srs::config::Config;
use lexikon_srs::state::AppState;
use lexikon_srs::store::{RecordStore, SqliteStore, VocabSource};
use lexikon_srs::{create_app, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let store = match SqliteStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(error = %err, url = %config.database_url, "failed to open record store");
            std::process::exit(1);
        }
    };

    let state = AppState::new(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        store as Arc<dyn VocabSource>,
        config.params.clone(),
        config.tuning.clone(),
        config.batch.clone(),
    );

    let sessions = state.sessions();
    let sweeper = sessions
        .clone()
        .start_sweeper(config.tuning.session_idle_timeout);

    let app = create_app(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, "lexikon-srs listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, flushing live sessions");
    sweeper.abort();
    sessions.shutdown_all().await;
    tracing::info!("graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
