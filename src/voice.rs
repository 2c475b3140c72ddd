//! Voice transport seam.
//!
//! The chat platform's voice connection is an external collaborator. It plays
//! one stream at a time and reports the end of playback through a completion
//! callback that may run on any thread, for example an audio mixer thread.
//! Implementations must never call back into the playback loop directly;
//! the callback handed to [`VoiceTransport::play`] already forwards into it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::{GuildId, VoiceChannel},
    error::{Error, Result},
    track::StreamHandle,
};

/// Invoked exactly once when a stream started by [`VoiceTransport::play`]
/// ends, with the playback error if it ended abnormally.
pub type Completion = Box<dyn FnOnce(Option<Error>) + Send + 'static>;

/// An established voice connection for one guild.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// The channel this connection is in.
    fn channel(&self) -> VoiceChannel;

    /// Starts playing `stream`; `on_complete` fires when it ends or is
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if playback could not be started. `on_complete` is
    /// dropped without being called in that case.
    fn play(&self, stream: StreamHandle, on_complete: Completion) -> Result<()>;

    /// Replaces the source of the current playback without firing its
    /// completion.
    fn set_source(&self, stream: StreamHandle) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Stops the current playback, which fires its completion.
    fn stop(&self);

    fn is_playing(&self) -> bool;

    fn is_paused(&self) -> bool;

    /// Leaves the voice channel.
    async fn disconnect(&self) -> Result<()>;
}

/// Establishes voice connections.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Connects to `channel` in `guild`. Connecting a guild that already has
    /// a connection moves that connection and returns it.
    async fn connect(
        &self,
        guild: GuildId,
        channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceTransport>>;
}
