use async_trait::async_trait;

use crate::{domain::ChatTarget, Result};

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
    /// Whether empty/whitespace-only messages are rejected by the host.
    pub rejects_blank: bool,
}

/// Outbound chat port.
///
/// The plugin core only ever sends plain text lines; everything else about the
/// host (updates, auth, formatting) stays in the adapter crate.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<()>;
}
