//! Logs auth state changes and the guard decisions they imply.

use agency_portal_access::{AuthSnapshot, AuthState, GuardDecision, RouteTable};
use tokio::sync::watch;
use tracing::{info, warn};

/// Guard decision for one watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLine {
    pub path: String,
    pub decision: GuardDecision,
}

/// Evaluates `paths` against `state`.
#[must_use]
pub fn route_report(state: &AuthState, routes: &RouteTable, paths: &[String]) -> Vec<RouteLine> {
    paths
        .iter()
        .map(|path| RouteLine {
            path: path.clone(),
            decision: routes.decide_path(state, path),
        })
        .collect()
}

fn log_snapshot(snapshot: &AuthSnapshot, routes: &RouteTable, paths: &[String]) {
    let state = &snapshot.state;
    info!(
        state = state.label(),
        role = ?state.role(),
        approval = ?state.approval_status(),
        "Auth state changed"
    );
    if let (Some(error), Some(message)) = (&snapshot.error, snapshot.error_message()) {
        warn!(
            error = %error,
            retryable = error.is_retryable(),
            needs_support = error.needs_support(),
            message = %message,
            "Auth error recorded"
        );
    }
    for line in route_report(state, routes, paths) {
        match line.decision {
            GuardDecision::Allow => info!(path = %line.path, "Route allowed"),
            GuardDecision::ShowLoadingIndicator => {
                info!(path = %line.path, "Route waiting for session check");
            }
            GuardDecision::RedirectTo(redirect) => {
                info!(path = %line.path, redirect = %redirect.path, "Route redirects");
            }
        }
    }
}

/// Logs every snapshot published on `rx` until the manager is dropped.
pub async fn report_changes(
    mut rx: watch::Receiver<AuthSnapshot>,
    routes: RouteTable,
    paths: Vec<String>,
) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        log_snapshot(&snapshot, &routes, &paths);
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_portal_access::{
        AccessConfig, AuthManager, InMemoryIdentityProvider, InMemoryProfileStore, PortalPaths,
        ProfileRecord,
    };
    use std::sync::Arc;

    fn paths() -> Vec<String> {
        vec!["/admin".to_string(), "/client/quotes".to_string(), "/about".to_string()]
    }

    #[test]
    fn loading_state_waits_on_guarded_paths_only() {
        let routes = RouteTable::standard(PortalPaths::default());

        let report = route_report(&AuthState::Loading, &routes, &paths());

        assert_eq!(report[0].decision, GuardDecision::ShowLoadingIndicator);
        assert_eq!(report[1].decision, GuardDecision::ShowLoadingIndicator);
        assert_eq!(report[2].decision, GuardDecision::Allow);
    }

    #[tokio::test]
    async fn pending_client_is_sent_to_pending_page() {
        let store = Arc::new(InMemoryProfileStore::new());
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let id = provider.register_account("dana@pier.test", "pw");
        store.insert(ProfileRecord::new(&id, Some("client"), Some("pending")));
        let manager = AuthManager::new(provider, store, AccessConfig::default());
        manager.login("dana@pier.test", "pw").await;
        let routes = RouteTable::standard(manager.config().paths.clone());

        let report = route_report(&manager.state(), &routes, &paths());

        assert_eq!(report[0].decision.redirect_path(), Some("/client"));
        assert_eq!(report[1].decision.redirect_path(), Some("/client/pending"));
        assert!(report[2].decision.is_allowed());
    }

    #[tokio::test]
    async fn reporter_stops_when_manager_is_dropped() {
        let manager = AuthManager::new(
            Arc::new(InMemoryIdentityProvider::new()),
            Arc::new(InMemoryProfileStore::new()),
            AccessConfig::default(),
        );
        let reporter = tokio::spawn(report_changes(
            manager.watch(),
            RouteTable::standard(PortalPaths::default()),
            paths(),
        ));

        manager.initialize().await;
        drop(manager);

        reporter.await.expect("reporter exits cleanly");
    }
}
