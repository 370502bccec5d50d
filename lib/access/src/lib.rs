//! Session and role authorization for agency-portal.
//!
//! This crate derives who is signed in and what they may see:
//!
//! - [`IdentityProvider`] and [`ProfileStore`] are the seams to the hosted
//!   identity service and the `profiles` table
//! - [`AuthManager`] turns sessions and profile rows into an [`AuthState`]
//!   published through a watch channel
//! - [`SessionListener`] feeds provider session events into the manager
//! - [`RouteTable`] and [`decide`] gate route subtrees by role and approval
//!
//! # Example
//!
//! ```ignore
//! let manager = Arc::new(AuthManager::new(provider, store, AccessConfig::from_env()?));
//! let listener = SessionListener::spawn(manager.clone())?;
//! manager.initialize().await;
//!
//! let routes = RouteTable::standard(manager.config().paths.clone());
//! match routes.decide_path(&manager.state(), "/admin/clients") {
//!     GuardDecision::Allow => { /* render */ }
//!     GuardDecision::RedirectTo(redirect) => { /* navigate */ }
//!     GuardDecision::ShowLoadingIndicator => { /* spinner */ }
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod listener;
pub mod manager;
pub mod memory;
pub mod profile;
pub mod provider;
pub mod resolver;
pub mod role;
pub mod session;
pub mod state;

pub use agency_portal_core::PrincipalId;
pub use config::{AccessConfig, ConfigError, PortalPaths};
pub use error::{AuthError, ProviderError, StoreError};
pub use events::{SessionChannel, SessionEvent, SessionEventKind, SessionSubscription};
pub use guard::{
    GuardDecision, Redirect, RouteRequirement, RouteTable, decide, post_login_destination,
};
pub use listener::{ListenerError, SessionListener};
pub use manager::{AuthManager, LoginOutcome};
pub use memory::{InMemoryIdentityProvider, InMemoryProfileStore};
pub use profile::{Profile, ProfileRecord, ProfileValidationError};
pub use provider::{Credentials, IdentityProvider, SignupMetadata};
pub use resolver::{ProfileResolver, ProfileStore, ResolveError};
pub use role::{ApprovalStatus, Role};
pub use session::{Session, SessionId};
pub use state::{AuthSnapshot, AuthState, AuthenticatedPrincipal};
