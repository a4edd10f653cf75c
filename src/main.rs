use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vocab_mirror::{api, cache::ResultCache, config, remote::HttpRemote, session::SessionManager, state::AppState};

#[tokio::main]
async fn main() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vocab_mirror=debug,tower_http=debug".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = match config::load() {
    Ok(config) => Arc::new(config),
    Err(e) => {
      tracing::error!("Invalid configuration: {}", e);
      std::process::exit(1);
    }
  };

  let remote = Arc::new(HttpRemote::new(config.remote.clone()).expect("Failed to build HTTP client"));
  let cache = Arc::new(ResultCache::new(config.cache_ttl));
  let manager = Arc::new(SessionManager::new(
    remote,
    cache,
    config.data_dir.clone(),
    config.session.clone(),
  ));
  tracing::info!(
    data_dir = %config.data_dir.display(),
    refresh_interval_ms = config.session.refresh_interval.as_millis() as u64,
    cache_ttl_ms = config.cache_ttl.as_millis() as u64,
    "Session manager ready"
  );

  let app = api::router(AppState::new(Arc::clone(&manager), Arc::clone(&config)));

  let bind_addr = config.server.bind_addr();
  let listener = tokio::net::TcpListener::bind(&bind_addr)
    .await
    .unwrap_or_else(|_| panic!("Failed to bind to {}", bind_addr));

  tracing::info!("Server running on http://{}", bind_addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server failed to start");

  manager.shutdown().await;
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("Failed to listen for Ctrl-C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::error!("Failed to listen for SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  tracing::info!("Shutting down, closing sessions");
}
