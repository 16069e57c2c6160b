//! Notifier sinks.
//!
//! The daemon's default sink writes status messages to the log. Anything
//! else (chat webhooks, mail) plugs in behind the same trait.

use async_trait::async_trait;
use statuswatch_core::{Notifier, Result};
use tracing::info;

/// Tracing-backed notifier.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!("{text}");
        Ok(())
    }
}
