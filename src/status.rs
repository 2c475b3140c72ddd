//! Outward-facing status messages.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Opaque reference to a message previously sent on a [`StatusChannel`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MessageHandle(pub String);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interactive controls attached to a status message.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Controls {
    /// Rewind, stop, forward, skip and loop buttons. The loop button is
    /// highlighted while `looping`.
    Playback { looping: bool },
    /// No interaction possible any more.
    Disabled,
}

/// A text channel that status messages and notices are posted to.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Posts a new message.
    async fn send(&self, text: &str, controls: Controls) -> Result<MessageHandle>;

    /// Replaces the text of a message. `controls` of `None` leaves the
    /// existing controls untouched.
    ///
    /// # Errors
    ///
    /// Returns an error of kind `NotFound` if the message was deleted.
    async fn edit(
        &self,
        message: &MessageHandle,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<()>;
}
