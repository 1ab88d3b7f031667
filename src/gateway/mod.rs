use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod twilio;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway rejected the message: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("send timed out")]
    Timeout,
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

/// One templated WhatsApp message, addressed and fully resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination in E.164 form, without the transport prefix.
    pub to: String,
    /// Gateway-side content identifier of the approved template.
    pub content_sid: String,
    /// Positional variables, keyed "1", "2", ...
    pub variables: HashMap<String, String>,
}

/// What the gateway acknowledged at submission time. Delivery confirmation
/// arrives later through the status callback webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayReceipt {
    pub sid: String,
    pub status: String,
}

/// Seam for the external messaging gateway: `send(message) -> {sid, status}`
/// plus an asynchronous status-callback webhook handled elsewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<GatewayReceipt, GatewayError>;
}
