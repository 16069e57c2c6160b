//! Collaborator seams
//!
//! The core drives polling; where addresses come from and where messages go
//! is someone else's business. These traits are the only thing the core
//! knows about those collaborators.

use crate::error::Result;
use async_trait::async_trait;

/// Source of target addresses, keyed by target name.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// The configured address for `target`, if any.
    async fn get_address(&self, target: &str) -> Option<String>;
}

/// Destination for human-readable status messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}
