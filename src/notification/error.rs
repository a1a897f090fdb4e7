//! Error types for the alarm channels.

use thiserror::Error;

/// Errors a single channel delivery can end in. None of them is retried;
/// the next scheduler tick only reports newer events.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel block is incomplete (missing server, recipients or ids).
    #[error("invalid channel config: {0}")]
    ConfigInvalid(String),

    /// The message could not be rendered.
    #[error("failed to render alarm message: {0}")]
    Render(String),

    /// The server could not be reached or the TLS handshake failed.
    #[error("failed to connect to {addr}: {reason}")]
    DialFailed { addr: String, reason: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The mail server refused one recipient; the session stops there.
    #[error("recipient {address} rejected: {reason}")]
    RecipientRejected { address: String, reason: String },

    #[error("failed to transmit message: {0}")]
    TransmitFailed(String),

    /// The chat bot gateway did not hand out an access token.
    #[error("token exchange failed with corp id {corp_id}: {reason}")]
    TokenExchangeFailed { corp_id: String, reason: String },

    /// The chat bot gateway refused the message.
    #[error("failed to push chat bot alarm with corp id {corp_id}: {reason}")]
    SendFailed { corp_id: String, reason: String },

    #[error("failed to push http alarm to {url}: {reason}")]
    WebhookDeliveryFailed { url: String, reason: String },
}

impl ChannelError {
    /// A short, stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::ConfigInvalid(_) => "config_invalid",
            ChannelError::Render(_) => "render_failed",
            ChannelError::DialFailed { .. } => "dial_failed",
            ChannelError::AuthFailed(_) => "auth_failed",
            ChannelError::RecipientRejected { .. } => "recipient_rejected",
            ChannelError::TransmitFailed(_) => "transmit_failed",
            ChannelError::TokenExchangeFailed { .. } => "token_exchange_failed",
            ChannelError::SendFailed { .. } => "send_failed",
            ChannelError::WebhookDeliveryFailed { .. } => "webhook_delivery_failed",
        }
    }
}
