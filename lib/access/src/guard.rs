//! Role-gated route guards.
//!
//! Guards are pure: they read an [`AuthState`] and return a decision. The
//! caller performs any navigation. Evaluation order:
//!
//! 1. `Loading` shows a loading indicator (no redirect flicker).
//! 2. `Unauthenticated` goes to the login page, remembering the target.
//! 3. A role mismatch goes to the principal's own home, or to login when the
//!    role is unknown or has no home.
//! 4. An unapproved client on an approval-gated route goes to the pending page.
//! 5. Everything else is allowed.

use crate::config::PortalPaths;
use crate::profile::Profile;
use crate::role::{ApprovalStatus, Role};
use crate::state::AuthState;
use serde::{Deserialize, Serialize};

/// What a protected route demands of the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequirement {
    pub role: Role,
    pub require_approved: bool,
}

impl RouteRequirement {
    /// Requires `role` with no approval gate.
    #[must_use]
    pub fn role(role: Role) -> Self {
        Self {
            role,
            require_approved: false,
        }
    }

    /// Requires an approved client.
    #[must_use]
    pub fn approved_client() -> Self {
        Self {
            role: Role::Client,
            require_approved: true,
        }
    }
}

/// A redirect target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    /// Where to go.
    pub path: String,
    /// The originally requested path, for returning after login.
    pub return_to: Option<String>,
}

impl Redirect {
    fn to(path: &str) -> Self {
        Self {
            path: path.to_string(),
            return_to: None,
        }
    }
}

/// Outcome of evaluating a guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    ShowLoadingIndicator,
    Allow,
    RedirectTo(Redirect),
}

impl GuardDecision {
    /// Returns true for [`GuardDecision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns the redirect path, if this is a redirect.
    #[must_use]
    pub fn redirect_path(&self) -> Option<&str> {
        match self {
            Self::RedirectTo(redirect) => Some(&redirect.path),
            _ => None,
        }
    }
}

/// Decides whether `state` may enter a route protected by `requirement`.
///
/// `requested_path` is carried on the login redirect so the login flow can
/// return there.
#[must_use]
pub fn decide(
    state: &AuthState,
    requirement: RouteRequirement,
    paths: &PortalPaths,
    requested_path: Option<&str>,
) -> GuardDecision {
    let principal = match state {
        AuthState::Loading => return GuardDecision::ShowLoadingIndicator,
        AuthState::Unauthenticated => {
            return GuardDecision::RedirectTo(Redirect {
                path: paths.login.clone(),
                return_to: requested_path.map(str::to_string),
            });
        }
        AuthState::Authenticated(principal) => principal,
    };

    let Some(role) = principal.role() else {
        return GuardDecision::RedirectTo(Redirect::to(&paths.login));
    };

    if role != requirement.role {
        let target = paths.home_for(role).unwrap_or(paths.login.as_str());
        return GuardDecision::RedirectTo(Redirect::to(target));
    }

    if requirement.role == Role::Client
        && requirement.require_approved
        && principal.approval_status() != Some(ApprovalStatus::Approved)
    {
        return GuardDecision::RedirectTo(Redirect::to(&paths.pending_approval));
    }

    GuardDecision::Allow
}

/// Guards registered per route subtree.
///
/// The longest registered prefix that matches on a path-segment boundary
/// applies; paths under no prefix are public.
#[derive(Debug, Clone)]
pub struct RouteTable {
    paths: PortalPaths,
    guarded: Vec<(String, RouteRequirement)>,
}

impl RouteTable {
    /// Creates a table with no guarded subtrees.
    #[must_use]
    pub fn new(paths: PortalPaths) -> Self {
        Self {
            paths,
            guarded: Vec::new(),
        }
    }

    /// Creates the portal's standard table: `/admin` for admins, `/employee`
    /// for employees, `/client` for approved clients, and the pending-approval
    /// page for any client.
    #[must_use]
    pub fn standard(paths: PortalPaths) -> Self {
        let pending = paths.pending_approval.clone();
        Self::new(paths)
            .guard("/admin", RouteRequirement::role(Role::Admin))
            .guard("/employee", RouteRequirement::role(Role::Employee))
            .guard("/client", RouteRequirement::approved_client())
            .guard(&pending, RouteRequirement::role(Role::Client))
    }

    /// Registers (or replaces) the requirement for a subtree.
    #[must_use]
    pub fn guard(mut self, prefix: &str, requirement: RouteRequirement) -> Self {
        let prefix = normalize(prefix);
        self.guarded.retain(|(existing, _)| *existing != prefix);
        self.guarded.push((prefix, requirement));
        self.guarded.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        self
    }

    /// Returns the redirect targets in use.
    #[must_use]
    pub fn paths(&self) -> &PortalPaths {
        &self.paths
    }

    /// Returns the requirement governing `path`, or `None` if it is public.
    #[must_use]
    pub fn requirement_for(&self, path: &str) -> Option<RouteRequirement> {
        let path = normalize(path);
        self.guarded
            .iter()
            .find(|(prefix, _)| covers(prefix, &path))
            .map(|(_, requirement)| *requirement)
    }

    /// Evaluates the guard for navigating to `path`.
    #[must_use]
    pub fn decide_path(&self, state: &AuthState, path: &str) -> GuardDecision {
        match self.requirement_for(path) {
            Some(requirement) => decide(state, requirement, &self.paths, Some(path)),
            None => GuardDecision::Allow,
        }
    }
}

fn normalize(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn covers(prefix: &str, path: &str) -> bool {
    prefix == "/"
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Where a successful login should land.
///
/// Returns `return_to` when the table would allow it for this profile, else
/// the role's home (or the pending page for clients not yet approved), else
/// the login page.
#[must_use]
pub fn post_login_destination(
    profile: &Profile,
    table: &RouteTable,
    return_to: Option<&str>,
) -> String {
    let paths = table.paths();

    if let Some(target) = return_to {
        let requirement = table.requirement_for(target);
        let allowed = match requirement {
            None => true,
            Some(requirement) => {
                requirement.role == profile.role()
                    && (!requirement.require_approved || profile.is_approved_client())
            }
        };
        if allowed && normalize(target) != normalize(&paths.login) {
            return target.to_string();
        }
    }

    if profile.role() == Role::Client && !profile.is_approved_client() {
        return paths.pending_approval.clone();
    }

    paths
        .home_for(profile.role())
        .unwrap_or(paths.login.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionId};
    use agency_portal_core::PrincipalId;
    use chrono::Duration;

    fn principal_id() -> PrincipalId {
        PrincipalId::parse("p-1").expect("valid id")
    }

    fn session() -> Session {
        Session::new(
            SessionId::from("sess_1"),
            principal_id(),
            "token".to_string(),
            None,
            Duration::hours(1),
        )
    }

    fn profile(role: Role, approval: Option<ApprovalStatus>) -> Profile {
        Profile::new(principal_id(), role, approval)
    }

    fn signed_in(role: Role, approval: Option<ApprovalStatus>) -> AuthState {
        AuthState::authenticated(session(), Some(profile(role, approval)))
    }

    fn redirect(path: &str) -> GuardDecision {
        GuardDecision::RedirectTo(Redirect::to(path))
    }

    #[test]
    fn loading_shows_indicator_for_every_role() {
        let paths = PortalPaths::default();
        for role in Role::ALL {
            assert_eq!(
                decide(&AuthState::Loading, RouteRequirement::role(role), &paths, None),
                GuardDecision::ShowLoadingIndicator
            );
        }
    }

    #[test]
    fn unauthenticated_goes_to_login_with_return_path() {
        let decision = decide(
            &AuthState::Unauthenticated,
            RouteRequirement::role(Role::Admin),
            &PortalPaths::default(),
            Some("/admin/clients"),
        );

        assert_eq!(
            decision,
            GuardDecision::RedirectTo(Redirect {
                path: "/login".to_string(),
                return_to: Some("/admin/clients".to_string()),
            })
        );
    }

    #[test]
    fn pending_client_goes_to_pending_page() {
        let decision = decide(
            &signed_in(Role::Client, Some(ApprovalStatus::Pending)),
            RouteRequirement::approved_client(),
            &PortalPaths::default(),
            None,
        );
        assert_eq!(decision, redirect("/client/pending"));
    }

    #[test]
    fn rejected_client_goes_to_pending_page() {
        let decision = decide(
            &signed_in(Role::Client, Some(ApprovalStatus::Rejected)),
            RouteRequirement::approved_client(),
            &PortalPaths::default(),
            None,
        );
        assert_eq!(decision, redirect("/client/pending"));
    }

    #[test]
    fn approved_client_is_allowed() {
        let decision = decide(
            &signed_in(Role::Client, Some(ApprovalStatus::Approved)),
            RouteRequirement::approved_client(),
            &PortalPaths::default(),
            None,
        );
        assert_eq!(decision, GuardDecision::Allow);
    }

    #[test]
    fn employee_on_client_route_goes_to_employee_home() {
        let decision = decide(
            &signed_in(Role::Employee, None),
            RouteRequirement::approved_client(),
            &PortalPaths::default(),
            None,
        );
        assert_eq!(decision, redirect("/employee"));
    }

    #[test]
    fn admin_on_admin_route_is_allowed() {
        let decision = decide(
            &signed_in(Role::Admin, None),
            RouteRequirement::role(Role::Admin),
            &PortalPaths::default(),
            None,
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn role_mismatch_wins_over_approval() {
        // A pending client on the admin portal goes home, not to the pending page.
        let decision = decide(
            &signed_in(Role::Client, Some(ApprovalStatus::Pending)),
            RouteRequirement::role(Role::Admin),
            &PortalPaths::default(),
            None,
        );
        assert_eq!(decision, redirect("/client"));
    }

    #[test]
    fn mismatch_without_home_goes_to_login() {
        let paths = PortalPaths {
            employee_home: None,
            ..PortalPaths::default()
        };
        let decision = decide(
            &signed_in(Role::Employee, None),
            RouteRequirement::role(Role::Admin),
            &paths,
            None,
        );
        assert_eq!(decision, redirect("/login"));
    }

    #[test]
    fn unknown_role_goes_to_login() {
        let state = AuthState::authenticated(session(), None);
        let decision = decide(
            &state,
            RouteRequirement::role(Role::Employee),
            &PortalPaths::default(),
            Some("/employee/tasks"),
        );
        assert_eq!(decision.redirect_path(), Some("/login"));
    }

    #[test]
    fn route_table_picks_longest_prefix() {
        let table = RouteTable::standard(PortalPaths::default());

        assert_eq!(
            table.requirement_for("/client/pending"),
            Some(RouteRequirement::role(Role::Client))
        );
        assert_eq!(
            table.requirement_for("/client/invoices/42"),
            Some(RouteRequirement::approved_client())
        );
        assert_eq!(
            table.requirement_for("/admin/"),
            Some(RouteRequirement::role(Role::Admin))
        );
    }

    #[test]
    fn route_table_matches_on_segment_boundaries() {
        let table = RouteTable::standard(PortalPaths::default());

        assert_eq!(table.requirement_for("/administration"), None);
        assert_eq!(table.requirement_for("/clientele"), None);
        assert_eq!(table.requirement_for("/rentals"), None);
        assert_eq!(
            table.requirement_for("/employee?tab=assignments"),
            Some(RouteRequirement::role(Role::Employee))
        );
    }

    #[test]
    fn pending_client_can_reach_pending_page_but_not_portal() {
        let table = RouteTable::standard(PortalPaths::default());
        let state = signed_in(Role::Client, Some(ApprovalStatus::Pending));

        assert!(table.decide_path(&state, "/client/pending").is_allowed());
        assert_eq!(
            table.decide_path(&state, "/client/documents").redirect_path(),
            Some("/client/pending")
        );
    }

    #[test]
    fn public_paths_are_allowed_even_while_loading() {
        let table = RouteTable::standard(PortalPaths::default());
        assert!(table.decide_path(&AuthState::Loading, "/careers").is_allowed());
        assert!(table.decide_path(&AuthState::Unauthenticated, "/").is_allowed());
    }

    #[test]
    fn guard_replaces_existing_prefix() {
        let table = RouteTable::new(PortalPaths::default())
            .guard("/reports", RouteRequirement::role(Role::Admin))
            .guard("/reports/", RouteRequirement::role(Role::Employee));

        assert_eq!(
            table.requirement_for("/reports/q3"),
            Some(RouteRequirement::role(Role::Employee))
        );
    }

    #[test]
    fn post_login_prefers_allowed_return_path() {
        let table = RouteTable::standard(PortalPaths::default());
        let admin = profile(Role::Admin, None);

        assert_eq!(
            post_login_destination(&admin, &table, Some("/admin/teams")),
            "/admin/teams"
        );
        assert_eq!(
            post_login_destination(&admin, &table, Some("/client/documents")),
            "/admin"
        );
        assert_eq!(post_login_destination(&admin, &table, Some("/login")), "/admin");
    }

    #[test]
    fn post_login_sends_unapproved_clients_to_pending() {
        let table = RouteTable::standard(PortalPaths::default());

        let pending = profile(Role::Client, Some(ApprovalStatus::Pending));
        assert_eq!(
            post_login_destination(&pending, &table, Some("/client/billing")),
            "/client/pending"
        );

        let approved = profile(Role::Client, Some(ApprovalStatus::Approved));
        assert_eq!(
            post_login_destination(&approved, &table, Some("/client/billing")),
            "/client/billing"
        );
        assert_eq!(post_login_destination(&approved, &table, None), "/client");
    }
}
