//! User-facing commands.
//!
//! A [`Controller`] turns a command from the chat platform into playback
//! loop requests and renders the textual reply. Replies marked ephemeral
//! are meant to be shown to the invoking user only.
//!
//! Precondition failures ("Not playing." and friends) become replies.
//! Errors are returned only when infrastructure fails: the playback loop is
//! gone, the voice connection could not be made, or the playlist store is
//! unreadable.

use std::{fmt::Write, sync::Arc};

use crate::{
    config::Config,
    context::Context,
    error::{Error, ErrorKind, Result},
    player::{Enqueued, Handle},
    playlist::PlaylistStore,
    progress::{format_bar, format_time},
    resolver::Resolver,
    voice::VoiceConnector,
};

/// Seek step of the status message controls, in seconds.
pub const SEEK_STEP: i64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub ephemeral: bool,
}

impl Reply {
    fn public(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ephemeral: false,
        }
    }

    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ephemeral: true,
        }
    }
}

/// Renders the reply of a precondition failure, passes anything else on.
fn precondition(e: Error) -> Result<Reply> {
    if e.kind == ErrorKind::FailedPrecondition {
        Ok(Reply::ephemeral(e.error.to_string()))
    } else {
        Err(e)
    }
}

pub struct Controller {
    player: Handle,
    resolver: Arc<Resolver>,
    voice: Arc<dyn VoiceConnector>,
    playlists: Arc<dyn PlaylistStore>,
    allowed_channel: Option<String>,
    bar_width: usize,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: &Config,
        player: Handle,
        resolver: Arc<Resolver>,
        voice: Arc<dyn VoiceConnector>,
        playlists: Arc<dyn PlaylistStore>,
    ) -> Self {
        Self {
            player,
            resolver,
            voice,
            playlists,
            allowed_channel: config.allowed_channel.clone(),
            bar_width: config.bar_width,
        }
    }

    /// The reply to send instead of running a command issued outside the
    /// allowed channel.
    fn misplaced(&self, ctx: &Context) -> Option<Reply> {
        let allowed = self.allowed_channel.as_deref()?;
        (ctx.channel_name != allowed).then(|| {
            Reply::ephemeral(format!("🚫 I can only be used in the #{allowed} channel!"))
        })
    }

    /// Connects to the user's voice channel unless the guild already has a
    /// connection. Returns `false` when the user is not in a voice channel.
    async fn ensure_connected(&self, ctx: &Context) -> Result<bool> {
        let Some(channel) = ctx.voice.as_ref() else {
            return Ok(false);
        };
        if self.player.voice_channel(ctx.guild).await?.is_none() {
            let transport = self.voice.connect(ctx.guild, channel).await?;
            self.player.attach(ctx.guild, transport).await?;
        }
        Ok(true)
    }

    /// Plays a query, or queues it behind what is playing. Collections are
    /// queued entry by entry.
    pub async fn play(&self, ctx: &Context, query: &str) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        if !self.ensure_connected(ctx).await? {
            return Ok(Reply::ephemeral("You are not connected to a voice channel."));
        }

        let queries = self.resolver.expand(query).await;
        self.enqueue(ctx, queries).await
    }

    async fn enqueue(&self, ctx: &Context, queries: Vec<String>) -> Result<Reply> {
        if queries.is_empty() {
            return Ok(Reply::public("Could not find any songs."));
        }

        let enqueued = self
            .player
            .enqueue(ctx.guild, Arc::clone(&ctx.channel), queries)
            .await?;

        let text = match enqueued {
            Enqueued {
                now_playing: Some(query),
                ..
            } => format!("Loading **{query}**..."),
            Enqueued {
                queued: 1,
                first_queued: Some(query),
                ..
            } => format!("Added to queue: **{query}**"),
            Enqueued { queued, .. } => format!("Added **{queued}** songs to queue."),
        };
        Ok(Reply::public(text))
    }

    /// Joins the user's voice channel, or moves there.
    pub async fn join(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let Some(channel) = ctx.voice.as_ref() else {
            return Ok(Reply::ephemeral("You are not connected to a voice channel."));
        };

        let transport = self.voice.connect(ctx.guild, channel).await?;
        let text = if self.player.attach(ctx.guild, transport).await? {
            format!("Joined {channel}")
        } else {
            format!("Moved to {channel}")
        };
        Ok(Reply::public(text))
    }

    pub async fn skip(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        match self.player.skip(ctx.guild).await {
            Ok(()) => Ok(Reply::public("Skipped.")),
            Err(e) => precondition(e),
        }
    }

    pub async fn stop(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        match self.player.stop(ctx.guild).await {
            Ok(()) => Ok(Reply::public("Stopped.")),
            Err(e) => precondition(e),
        }
    }

    /// Moves playback by `delta` seconds.
    pub async fn seek(&self, ctx: &Context, delta: i64) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        match self.player.seek(ctx.guild, delta).await {
            Ok(position) => Ok(Reply::public(format!(
                "Seeked to {}",
                format_time(position)
            ))),
            Err(e) if e.kind == ErrorKind::FailedPrecondition => precondition(e),
            // The loop is gone, not the seek.
            Err(e) if e.kind == ErrorKind::Cancelled => Err(e),
            Err(e) => Ok(Reply::ephemeral(format!("Failed to seek: {}", e.error))),
        }
    }

    pub async fn toggle_loop(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let looping = self.player.toggle_loop(ctx.guild).await?;
        Ok(Reply::public(if looping {
            "Loop enabled."
        } else {
            "Loop disabled."
        }))
    }

    /// What is playing and what comes next.
    pub async fn status(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let Some(snapshot) = self.player.status(ctx.guild).await? else {
            return Ok(Reply::ephemeral("Nothing is playing."));
        };

        let mut text = String::new();
        if let Some(current) = &snapshot.current {
            let _ = writeln!(
                text,
                "**{}:** {}\n{}",
                current.status,
                current.title,
                format_bar(current.position, current.duration, self.bar_width)
            );
        } else if let Some(query) = &snapshot.starting {
            let _ = writeln!(text, "**Loading:** {query}");
        } else {
            text.push_str("Nothing is playing.\n");
        }

        if !snapshot.queue.is_empty() {
            text.push_str("**Up next:**\n");
            for (i, query) in snapshot.queue.iter().enumerate() {
                let _ = writeln!(text, "{}. {query}", i + 1);
            }
        }
        if snapshot.looping {
            text.push_str("🔁 Loop is on.\n");
        }

        Ok(Reply::public(text.trim_end()))
    }

    pub async fn playlist_create(&self, ctx: &Context, name: &str) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let mut playlists = self.playlists.get(ctx.user).await?;
        if playlists.contains_key(name) {
            return Ok(Reply::ephemeral(format!("Playlist **{name}** already exists!")));
        }

        playlists.insert(name.to_owned(), Vec::new());
        self.playlists.set(ctx.user, playlists).await?;
        Ok(Reply::public(format!("Created playlist **{name}**.")))
    }

    pub async fn playlist_delete(&self, ctx: &Context, name: &str) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let mut playlists = self.playlists.get(ctx.user).await?;
        if playlists.remove(name).is_none() {
            return Ok(Reply::ephemeral(format!("Playlist **{name}** not found.")));
        }

        self.playlists.set(ctx.user, playlists).await?;
        Ok(Reply::public(format!("Deleted playlist **{name}**.")))
    }

    /// Appends a raw query to a playlist.
    pub async fn playlist_add(&self, ctx: &Context, name: &str, query: &str) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let mut playlists = self.playlists.get(ctx.user).await?;
        let Some(queries) = playlists.get_mut(name) else {
            return Ok(Reply::ephemeral(format!(
                "Playlist **{name}** not found. Create it first with /playlist create"
            )));
        };

        queries.push(query.to_owned());
        self.playlists.set(ctx.user, playlists).await?;
        Ok(Reply::public(format!(
            "Added **{query}** to playlist **{name}**."
        )))
    }

    pub async fn playlist_list(&self, ctx: &Context) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let playlists = self.playlists.get(ctx.user).await?;
        if playlists.is_empty() {
            return Ok(Reply::ephemeral("You don't have any playlists yet."));
        }

        let mut text = String::from("**Your Playlists:**\n");
        for (name, queries) in &playlists {
            let _ = writeln!(text, "- **{name}**: {} songs", queries.len());
        }
        Ok(Reply::public(text.trim_end()))
    }

    /// Queues every entry of a saved playlist, as if each was played.
    pub async fn playlist_play(&self, ctx: &Context, name: &str) -> Result<Reply> {
        if let Some(reply) = self.misplaced(ctx) {
            return Ok(reply);
        }
        let mut playlists = self.playlists.get(ctx.user).await?;
        let Some(queries) = playlists.remove(name) else {
            return Ok(Reply::ephemeral(format!("Playlist **{name}** not found.")));
        };
        if queries.is_empty() {
            return Ok(Reply::ephemeral(format!("Playlist **{name}** is empty!")));
        }
        if !self.ensure_connected(ctx).await? {
            return Ok(Reply::ephemeral("You are not connected to a voice channel."));
        }

        self.enqueue(ctx, queries).await
    }
}
