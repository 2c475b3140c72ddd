//! Identifiers and the per-command invocation context.

use std::{fmt, sync::Arc};

use crate::status::StatusChannel;

/// An isolated tenant on the chat platform. All queue and playback state is
/// scoped to one guild.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GuildId(pub u64);

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct UserId(pub u64);

/// A voice channel a user can be in and the bot can connect to.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: u64,
    pub name: String,
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VoiceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Who issued a command, from where.
///
/// The text channel is where the guild's status messages and background
/// failure notices end up once playback starts.
#[derive(Clone)]
pub struct Context {
    pub guild: GuildId,
    pub user: UserId,
    pub channel_name: String,
    pub channel: Arc<dyn StatusChannel>,
    /// The voice channel the invoking user is currently in.
    pub voice: Option<VoiceChannel>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("guild", &self.guild)
            .field("user", &self.user)
            .field("channel_name", &self.channel_name)
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}
