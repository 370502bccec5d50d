//! Hosted backend adapters for agency-portal.
//!
//! [`HostedIdentityProvider`] and [`HostedProfileStore`] implement the access
//! crate's provider and store seams over the hosted REST API. Build both from
//! one [`BackendClient`] and share the provider's session with the store:
//!
//! ```ignore
//! let client = BackendClient::new(&config)?;
//! let provider = HostedIdentityProvider::new(client.clone());
//! let store = HostedProfileStore::new(client, provider.shared_session());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod store;

pub use client::{BackendClient, SharedSession};
pub use config::BackendConfig;
pub use error::BackendError;
pub use identity::HostedIdentityProvider;
pub use store::HostedProfileStore;
