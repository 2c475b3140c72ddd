//! Events emitted by the playback loop.
//!
//! Observers receive these over an unbounded channel handed to
//! [`Player::with_events`](crate::player::Player::with_events). The binary
//! logs them; tests use them to wait for asynchronous transitions.
//!
//! # Example
//!
//! ```rust
//! use jukebot::events::Event;
//!
//! fn describe(event: Event) -> String {
//!     match event {
//!         Event::TrackChanged(guild) => format!("{guild}: new track"),
//!         Event::Ended(guild, status) => format!("{guild}: track {status}"),
//!         _ => String::new(),
//!     }
//! }
//! ```

use crate::{context::GuildId, track::Status};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A track started playing.
    TrackChanged(GuildId),

    /// Playback paused for a seek.
    Pause(GuildId),

    /// Playback resumed after a seek, whether it succeeded or not.
    Play(GuildId),

    /// The current track ended with the given terminal status.
    Ended(GuildId, Status),

    /// Nothing is playing and nothing is starting.
    Idle(GuildId),

    /// A track failed to start.
    Failed(GuildId),

    /// The loop flag changed.
    LoopChanged(GuildId, bool),
}
