mod config;
mod monitor;

use agency_portal_access::{
    AuthManager, ProviderError, RouteTable, SessionListener, post_login_destination,
};
use agency_portal_backend::{BackendClient, HostedIdentityProvider, HostedProfileStore};
use config::MonitorConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = MonitorConfig::from_env().expect("failed to load configuration");
    tracing::info!(api_url = %config.backend.api_url, "Loaded configuration");

    let client = BackendClient::new(&config.backend).expect("failed to build backend client");
    let provider = Arc::new(
        HostedIdentityProvider::new(client.clone())
            .with_event_capacity(config.access.event_capacity),
    );
    let store = HostedProfileStore::new(client, provider.shared_session());
    let manager = Arc::new(AuthManager::new(
        provider.clone(),
        store,
        config.access.clone(),
    ));
    let routes = RouteTable::standard(config.access.paths.clone());

    // Subscribe before the first session check so no event is missed
    let listener = SessionListener::spawn(manager.clone()).expect("no listener is running yet");
    let reporter = tokio::spawn(monitor::report_changes(
        manager.watch(),
        routes.clone(),
        config.watch_paths.clone(),
    ));

    manager.initialize().await;

    if let Some(login) = &config.login {
        let outcome = manager.login(&login.email, &login.password).await;
        if outcome.success {
            let state = manager.state();
            let destination = state
                .principal()
                .and_then(|principal| principal.profile())
                .map(|profile| post_login_destination(profile, &routes, None));
            tracing::info!(role = ?outcome.role, destination = ?destination, "Signed in");
        } else {
            tracing::warn!(
                message = ?manager.snapshot().error_message(),
                "Startup sign-in failed"
            );
        }
    }

    // Refresh tokens ahead of expiry
    let refresh_provider = provider.clone();
    let refresh_interval = config.token_refresh_interval();
    let refresher = tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            match refresh_provider.refresh_session().await {
                Ok(session) => {
                    tracing::debug!(expires_at = %session.expires_at(), "Periodic token refresh");
                }
                Err(ProviderError::NoSession) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to refresh session");
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutting down");

    refresher.abort();
    if config.login.is_some() {
        manager.logout().await;
    }
    listener.shutdown().await;
    reporter.abort();
}
