//! Delivery of attack alarms to the notification channels.
//!
//! Each channel (mail, chat bot, webhook) implements [`AlarmChannel`]. The
//! [`dispatcher::AlarmDispatcher`] fans one alarm out to every channel an
//! application has switched on and collects one outcome per channel, so a
//! failing channel never keeps the others from being attempted.

pub mod chatbot;
pub mod dispatcher;
pub mod error;
pub mod mail;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod webhook;

use crate::core::{Alarm, Application, ChannelKind};
use async_trait::async_trait;
use error::ChannelError;

/// A notification channel that can deliver an alarm for an application.
#[async_trait]
pub trait AlarmChannel: Send + Sync {
    /// Which channel block of the application this channel reads.
    fn kind(&self) -> ChannelKind;

    /// Returns `true` if the application has this channel switched on.
    fn is_enabled(&self, app: &Application) -> bool;

    /// Renders and delivers the alarm using the application's channel block.
    ///
    /// Implementations validate the block first and return
    /// [`ChannelError::ConfigInvalid`] without any network I/O when it is
    /// incomplete.
    async fn push(&self, app: &Application, alarm: &Alarm) -> Result<(), ChannelError>;
}
