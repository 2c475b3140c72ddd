//! The playback loop.
//!
//! A single task owns every guild's queue and playback state and processes
//! [`Message`]s one at a time, which serialises all mutations without
//! locks. Nothing inside the loop waits on I/O: resolutions, status message
//! updates and disconnects run as spawned tasks that report back with a
//! message. Completion callbacks from the voice transport, which may fire on
//! a foreign thread, do the same.
//!
//! Requests come in through a cloneable [`Handle`].
//!
//! # Example
//!
//! ```rust
//! use jukebot::player::Player;
//!
//! let player = Player::new(&config, resolver);
//! let handle = player.handle();
//! tokio::spawn(player.run());
//!
//! let enqueued = handle.enqueue(guild, channel, vec!["some song".into()]).await?;
//! ```

use std::{sync::Arc, time::Duration};

use futures_util::future;
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{Instant, MissedTickBehavior},
};

use crate::{
    config::Config,
    context::{GuildId, VoiceChannel},
    error::{Error, Result},
    events::Event,
    reporter::{self, Reporter},
    resolver::Resolver,
    session::{GuildSession, Phase, Playback, Sessions, Snapshot, Ticket},
    status::{Controls, MessageHandle, StatusChannel},
    track::{Status, Track},
    voice::{Completion, VoiceTransport},
};

/// Outcome of an enqueue request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Enqueued {
    /// The query that is starting right away, if any.
    pub now_playing: Option<String>,
    /// How many queries were appended to the queue.
    pub queued: usize,
    /// The first appended query.
    pub first_queued: Option<String>,
}

/// Messages processed by the playback loop.
pub(crate) enum Message {
    Enqueue {
        guild: GuildId,
        channel: Arc<dyn StatusChannel>,
        queries: Vec<String>,
        reply: oneshot::Sender<Enqueued>,
    },
    Resolved {
        guild: GuildId,
        ticket: Ticket,
        result: Result<Track>,
    },
    Announced {
        guild: GuildId,
        ticket: Ticket,
        title: String,
        message: MessageHandle,
    },
    Completed {
        guild: GuildId,
        ticket: Ticket,
        error: Option<Error>,
    },
    Skip {
        guild: GuildId,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        guild: GuildId,
        reply: oneshot::Sender<Result<()>>,
    },
    Seek {
        guild: GuildId,
        delta: i64,
        reply: oneshot::Sender<Result<Duration>>,
    },
    Sought {
        guild: GuildId,
        ticket: Ticket,
        target: Duration,
        result: Result<Track>,
        reply: oneshot::Sender<Result<Duration>>,
    },
    ToggleLoop {
        guild: GuildId,
        reply: oneshot::Sender<bool>,
    },
    Attach {
        guild: GuildId,
        voice: Arc<dyn VoiceTransport>,
        reply: oneshot::Sender<bool>,
    },
    Voice {
        guild: GuildId,
        reply: oneshot::Sender<Option<VoiceChannel>>,
    },
    Status {
        guild: GuildId,
        reply: oneshot::Sender<Option<Snapshot>>,
    },
    MessageGone {
        guild: GuildId,
        message: MessageHandle,
    },
    Evict {
        guild: GuildId,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Owner of all guild sessions.
pub struct Player {
    sessions: Sessions,
    resolver: Arc<Resolver>,
    reporter: Reporter,

    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
    events: Option<UnboundedSender<Event>>,

    next_ticket: u64,
    interval: Duration,
    bar_width: usize,
    max_failures: u32,
}

impl Player {
    /// How long shutdown waits for each voice connection to close.
    const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(config: &Config, resolver: Arc<Resolver>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sessions: Sessions::new(),
            resolver,
            reporter: Reporter::new(config),
            tx,
            rx,
            events: None,
            next_ticket: 0,
            interval: config.progress_interval,
            bar_width: config.bar_width,
            max_failures: config.max_consecutive_failures,
        }
    }

    /// Sends playback events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            tx: self.tx.clone(),
        }
    }

    /// Runs the loop until [`Handle::shutdown`] is called.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                message = self.rx.recv() => match message {
                    Some(Message::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(message) => self.handle_message(message),
                    None => break,
                },

                _ = ticker.tick() => {
                    self.reporter.refresh(&self.sessions, Instant::now(), &self.tx);
                }
            }
        }

        debug!("playback loop stopped");
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Enqueue {
                guild,
                channel,
                queries,
                reply,
            } => {
                let enqueued = self.enqueue(guild, channel, queries);
                let _ = reply.send(enqueued);
            }
            Message::Resolved {
                guild,
                ticket,
                result,
            } => self.resolved(guild, ticket, result),
            Message::Announced {
                guild,
                ticket,
                title,
                message,
            } => self.announced(guild, ticket, title, message),
            Message::Completed {
                guild,
                ticket,
                error,
            } => self.completed(guild, ticket, error),
            Message::Skip { guild, reply } => {
                let _ = reply.send(self.skip(guild));
            }
            Message::Stop { guild, reply } => {
                let _ = reply.send(self.stop(guild));
            }
            Message::Seek {
                guild,
                delta,
                reply,
            } => self.seek(guild, delta, reply),
            Message::Sought {
                guild,
                ticket,
                target,
                result,
                reply,
            } => self.sought(guild, ticket, target, result, reply),
            Message::ToggleLoop { guild, reply } => {
                let _ = reply.send(self.toggle_loop(guild));
            }
            Message::Attach {
                guild,
                voice,
                reply,
            } => {
                let _ = reply.send(self.attach(guild, voice));
            }
            Message::Voice { guild, reply } => {
                let channel = self
                    .sessions
                    .get(guild)
                    .and_then(|session| session.voice.as_ref())
                    .map(|voice| voice.channel());
                let _ = reply.send(channel);
            }
            Message::Status { guild, reply } => {
                let snapshot = self
                    .sessions
                    .get(guild)
                    .map(|session| session.snapshot(Instant::now()));
                let _ = reply.send(snapshot);
            }
            Message::MessageGone { guild, message } => self.message_gone(guild, &message),
            Message::Evict { guild, reply } => {
                self.evict(guild);
                let _ = reply.send(());
            }
            Message::Shutdown { reply } => {
                // Handled by `run`.
                let _ = reply.send(());
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn enqueue(
        &mut self,
        guild: GuildId,
        channel: Arc<dyn StatusChannel>,
        mut queries: Vec<String>,
    ) -> Enqueued {
        let session = self.sessions.get_or_create(guild);
        session.channel = Some(channel);

        if queries.is_empty() {
            return Enqueued::default();
        }

        let busy = session.is_busy();
        if !busy {
            session.failures = 0;
        }
        let play_now = (!busy && session.queue.is_empty()).then(|| queries.remove(0));

        let enqueued = Enqueued {
            now_playing: play_now.clone(),
            queued: queries.len(),
            first_queued: queries.first().cloned(),
        };
        session.queue.extend(queries);
        debug!(
            "{guild}: enqueued {} (queue length {})",
            enqueued.queued,
            session.queue.len()
        );

        if let Some(query) = play_now {
            let note = (enqueued.queued > 0)
                .then(|| format!("*(+ {} more songs added to queue)*", enqueued.queued));
            self.start(guild, query, note);
            enqueued
        } else if !busy {
            // Idle with leftovers in the queue: get them going.
            self.advance(guild);
            let now_playing = match self.sessions.get(guild).map(GuildSession::phase) {
                Some(Phase::Starting { query, .. }) => Some(query.clone()),
                _ => None,
            };
            Enqueued {
                now_playing,
                ..enqueued
            }
        } else {
            enqueued
        }
    }

    /// Enters `Starting` and resolves `query` in the background.
    fn start(&mut self, guild: GuildId, query: String, note: Option<String>) {
        let ticket = self.ticket();
        let Some(session) = self.sessions.get_mut(guild) else {
            return;
        };

        debug!("{guild}: starting {query} ({ticket})");
        session.phase = Phase::Starting {
            ticket,
            query: query.clone(),
            note,
            cancelled: false,
        };

        let resolver = Arc::clone(&self.resolver);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = resolver.track(&query, Duration::ZERO).await;
            let _ = tx.send(Message::Resolved {
                guild,
                ticket,
                result,
            });
        });
    }

    fn resolved(&mut self, guild: GuildId, ticket: Ticket, result: Result<Track>) {
        let Some(session) = self.sessions.get_mut(guild) else {
            debug!("{guild}: discarding resolution {ticket} for evicted guild");
            return;
        };

        match &session.phase {
            Phase::Starting { ticket: current, .. } if *current == ticket => {}
            _ => {
                debug!("{guild}: discarding stale resolution {ticket}");
                return;
            }
        }

        // Leaving `Starting` here is what clears the busy state, on every
        // path below.
        let Phase::Starting {
            query,
            note,
            cancelled,
            ..
        } = std::mem::take(&mut session.phase)
        else {
            return;
        };

        if cancelled {
            debug!("{guild}: start of {query} was cancelled");
            // Anything queued after the stop is a new request.
            let pending = !session.queue.is_empty();
            self.emit(Event::Idle(guild));
            if pending {
                self.advance(guild);
            }
            return;
        }

        let track = match result {
            Ok(track) => track,
            Err(e) => return self.start_failed(guild, &query, &e),
        };

        let Some(voice) = session.voice.clone() else {
            let e = Error::failed_precondition("not connected to a voice channel");
            return self.start_failed(guild, &query, &e);
        };

        let tx = self.tx.clone();
        let on_complete: Completion = Box::new(move |error| {
            let _ = tx.send(Message::Completed {
                guild,
                ticket,
                error,
            });
        });

        if let Err(e) = voice.play(track.stream().clone(), on_complete) {
            return self.start_failed(guild, &query, &e);
        }

        info!("{guild}: now playing {track}");
        let mut text = reporter::now_playing_text(
            track.title(),
            Duration::ZERO,
            track.duration(),
            self.bar_width,
        );
        if let Some(note) = note {
            text.push('\n');
            text.push_str(&note);
        }
        let title = track.title().to_owned();

        session.failures = 0;
        session.phase = Phase::Active(Playback::new(track, ticket, Instant::now()));
        let controls = Controls::Playback {
            looping: session.looping,
        };
        let channel = session.channel.clone();
        self.emit(Event::TrackChanged(guild));

        if let Some(channel) = channel {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                match channel.send(&text, controls).await {
                    Ok(message) => {
                        let _ = tx.send(Message::Announced {
                            guild,
                            ticket,
                            title,
                            message,
                        });
                    }
                    Err(e) => warn!("{guild}: could not post status message: {e}"),
                }
            });
        }
    }

    /// Handles a track that could not be started and moves on to the next
    /// candidate. Looping is disabled first so that a track that always
    /// fails cannot be retried forever.
    fn start_failed(&mut self, guild: GuildId, query: &str, error: &Error) {
        warn!("{guild}: failed to start {query}: {error}");
        let Some(session) = self.sessions.get_mut(guild) else {
            return;
        };

        session.phase = Phase::Idle;
        session.failures += 1;

        let mut notices = Vec::with_capacity(2);
        let loop_disabled = session.looping;
        if loop_disabled {
            session.looping = false;
            notices.push(format!("Error playing **{query}**, loop disabled. Skipping..."));
        } else {
            notices.push(format!("Error playing **{query}**: {error}. Skipping..."));
        }

        if session.failures >= self.max_failures && !session.queue.is_empty() {
            let dropped = session.queue.len();
            session.queue.clear();
            warn!("{guild}: {} failures in a row, dropping {dropped} queued", session.failures);
            notices.push(format!(
                "{} songs failed in a row, cleared the remaining **{dropped}** from the queue.",
                session.failures
            ));
        }

        let channel = session.channel.clone();
        self.emit(Event::Failed(guild));
        if loop_disabled {
            self.emit(Event::LoopChanged(guild, false));
        }

        if let Some(channel) = channel {
            tokio::spawn(async move {
                for notice in notices {
                    if let Err(e) = channel.send(&notice, Controls::Disabled).await {
                        warn!("{guild}: could not post notice: {e}");
                    }
                }
            });
        }

        self.advance(guild);
    }

    /// Moves on to the next track, or to idle when there is none.
    fn advance(&mut self, guild: GuildId) {
        let Some(session) = self.sessions.get_mut(guild) else {
            return;
        };

        if matches!(session.phase, Phase::Starting { .. }) {
            debug!("{guild}: already starting a track");
            return;
        }

        let stopped = session
            .playback()
            .is_some_and(|playback| playback.status == Status::Stopped);
        if stopped {
            // A stop cleared the queue; whatever is queued now was requested
            // afterwards.
            session.phase = Phase::Idle;
            if session.queue.is_empty() {
                self.emit(Event::Idle(guild));
                return;
            }
        }

        match session.next_query() {
            Some(query) => self.start(guild, query, None),
            None => {
                debug!("{guild}: queue finished");
                session.phase = Phase::Idle;
                self.emit(Event::Idle(guild));
            }
        }
    }

    fn announced(&mut self, guild: GuildId, ticket: Ticket, title: String, message: MessageHandle) {
        let Some(session) = self.sessions.get_mut(guild) else {
            return;
        };
        if let Some(playback) = session
            .playback_mut()
            .filter(|playback| playback.ticket == ticket)
        {
            playback.message = Some(message);
            return;
        }

        // The track ended before its status message landed.
        debug!("{guild}: track {ticket} ended before it was announced");
        let text = match session.unannounced.take() {
            Some((ended, text)) if ended == ticket => text,
            other => {
                session.unannounced = other;
                format!("**{title}**")
            }
        };
        if let Some(channel) = session.channel.clone() {
            tokio::spawn(async move {
                let _ = channel
                    .edit(&message, &text, Some(Controls::Disabled))
                    .await;
            });
        }
    }

    fn completed(&mut self, guild: GuildId, ticket: Ticket, error: Option<Error>) {
        let Some(session) = self.sessions.get_mut(guild) else {
            return;
        };
        let channel = session.channel.clone();
        let Some(playback) = session
            .playback_mut()
            .filter(|playback| playback.ticket == ticket)
        else {
            debug!("{guild}: discarding stale completion {ticket}");
            return;
        };

        let now = Instant::now();
        if !playback.status.is_terminal() {
            playback.freeze(now, Status::Finished);
        }
        let status = playback.status;

        // Broken streams keep the bar where they stopped.
        let (position, notice) = match &error {
            Some(e) => {
                warn!("{guild}: playback of {} ended with error: {e}", playback.track);
                let notice = format!("Error playing **{}**: {e}", playback.track.title());
                (playback.position(now), Some(notice))
            }
            None => {
                info!("{guild}: {} {status}", playback.track);
                (playback.final_position(now), None)
            }
        };

        // The one terminal render for this track.
        let text = reporter::final_text(
            playback.track.title(),
            position,
            playback.track.duration(),
            status,
            self.bar_width,
        );
        let message = playback.message.clone();
        if message.is_none() {
            session.unannounced = Some((ticket, text.clone()));
        }

        if let Some(channel) = channel {
            tokio::spawn(async move {
                if let Some(message) = message {
                    if let Err(e) = channel.edit(&message, &text, Some(Controls::Disabled)).await {
                        debug!("{guild}: final status update failed: {e}");
                    }
                }
                if let Some(notice) = notice {
                    if let Err(e) = channel.send(&notice, Controls::Disabled).await {
                        warn!("{guild}: could not post notice: {e}");
                    }
                }
            });
        }

        self.emit(Event::Ended(guild, status));
        self.advance(guild);
    }

    fn skip(&mut self, guild: GuildId) -> Result<()> {
        let session = self
            .sessions
            .get_mut(guild)
            .ok_or_else(|| Error::failed_precondition("Not playing."))?;
        let voice = session.voice.clone();
        let (Some(voice), Some(playback)) = (voice, session.playback_mut()) else {
            return Err(Error::failed_precondition("Not playing."));
        };
        if playback.status.is_terminal() {
            return Err(Error::failed_precondition("Not playing."));
        }

        info!("{guild}: skipping {}", playback.track);
        playback.freeze(Instant::now(), Status::Skipped);
        // Fires the completion, which advances.
        voice.stop();
        Ok(())
    }

    fn stop(&mut self, guild: GuildId) -> Result<()> {
        let session = self
            .sessions
            .get_mut(guild)
            .ok_or_else(|| Error::failed_precondition("Not playing."))?;
        if session.voice.is_none() && matches!(session.phase, Phase::Idle) {
            return Err(Error::failed_precondition("Not playing."));
        }

        info!("{guild}: stopping");
        session.queue.clear();
        let voice = session.voice.take();

        let mut orphaned = None;
        match &mut session.phase {
            Phase::Idle => {}
            Phase::Starting { cancelled, .. } => *cancelled = true,
            Phase::Active(playback) => {
                if playback.status.is_terminal() {
                    playback.status = Status::Stopped;
                } else {
                    playback.freeze(Instant::now(), Status::Stopped);
                }
                if voice.is_none() {
                    orphaned = Some(playback.ticket);
                }
            }
        }

        if let Some(voice) = voice {
            voice.stop();
            tokio::spawn(async move {
                if let Err(e) = voice.disconnect().await {
                    warn!("{guild}: disconnect failed: {e}");
                }
            });
        } else if let Some(ticket) = orphaned {
            // No transport left to report completion.
            self.completed(guild, ticket, None);
        }

        Ok(())
    }

    fn seek(&mut self, guild: GuildId, delta: i64, reply: oneshot::Sender<Result<Duration>>) {
        let Some(session) = self.sessions.get_mut(guild) else {
            let _ = reply.send(Err(Error::failed_precondition("Nothing is playing.")));
            return;
        };
        let voice = session.voice.clone();
        let (Some(voice), Some(playback)) = (voice, session.playback_mut()) else {
            let _ = reply.send(Err(Error::failed_precondition("Nothing is playing.")));
            return;
        };

        match playback.status {
            Status::Playing => {}
            Status::Paused => {
                let _ = reply.send(Err(Error::failed_precondition(
                    "A seek is already in progress.",
                )));
                return;
            }
            _ => {
                let _ = reply.send(Err(Error::failed_precondition("Nothing is playing.")));
                return;
            }
        }

        let now = Instant::now();
        let position = playback.position(now);
        let offset = Duration::from_secs(delta.unsigned_abs());
        let target = if delta < 0 {
            position.saturating_sub(offset)
        } else {
            position + offset
        };

        if let Err(e) = voice.pause() {
            let _ = reply.send(Err(e));
            return;
        }
        playback.freeze(now, Status::Paused);
        debug!(
            "{guild}: seeking {} from {:.1}s to {:.1}s",
            playback.track,
            position.as_secs_f64(),
            target.as_secs_f64()
        );

        let ticket = playback.ticket;
        let query = playback.track.query().to_owned();
        self.emit(Event::Pause(guild));

        let resolver = Arc::clone(&self.resolver);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = resolver.track(&query, target).await;
            let _ = tx.send(Message::Sought {
                guild,
                ticket,
                target,
                result,
                reply,
            });
        });
    }

    fn sought(
        &mut self,
        guild: GuildId,
        ticket: Ticket,
        target: Duration,
        result: Result<Track>,
        reply: oneshot::Sender<Result<Duration>>,
    ) {
        let aborted = || Error::aborted("playback changed while seeking");
        let Some(session) = self.sessions.get_mut(guild) else {
            let _ = reply.send(Err(aborted()));
            return;
        };
        let channel = session.channel.clone();
        let voice = session.voice.clone();
        let (Some(voice), Some(playback)) = (voice, session.playback_mut()) else {
            let _ = reply.send(Err(aborted()));
            return;
        };
        if playback.ticket != ticket || playback.status != Status::Paused {
            let _ = reply.send(Err(aborted()));
            return;
        }

        let swapped = result.and_then(|track| {
            voice.set_source(track.stream().clone())?;
            Ok(track)
        });

        let now = Instant::now();
        let outcome = match swapped {
            Ok(track) => {
                playback.track.set_stream(track.stream().clone());
                playback.resume_at(target, now);
                Ok(target)
            }
            Err(e) => {
                warn!("{guild}: seek failed, resuming: {e}");
                let frozen = playback.seek_position;
                playback.resume_at(frozen, now);
                Err(e)
            }
        };

        // Never leave the transport paused, whatever happened above.
        if let Err(e) = voice.resume() {
            warn!("{guild}: could not resume after seek: {e}");
        }

        if outcome.is_ok() {
            if let (Some(channel), Some(message)) = (channel, playback.message.clone()) {
                let text = reporter::now_playing_text(
                    playback.track.title(),
                    target,
                    playback.track.duration(),
                    self.bar_width,
                );
                tokio::spawn(async move {
                    let _ = channel.edit(&message, &text, None).await;
                });
            }
        }

        self.emit(Event::Play(guild));
        let _ = reply.send(outcome);
    }

    fn toggle_loop(&mut self, guild: GuildId) -> bool {
        let session = self.sessions.get_or_create(guild);
        session.looping = !session.looping;
        let looping = session.looping;
        info!("{guild}: loop {}", if looping { "enabled" } else { "disabled" });

        // Repaint the loop control of the current status message.
        let playback = session
            .playback()
            .filter(|playback| !playback.status.is_terminal());
        if let (Some(channel), Some(playback)) = (session.channel.clone(), playback) {
            if let Some(message) = playback.message.clone() {
                let text = reporter::now_playing_text(
                    playback.track.title(),
                    playback.position(Instant::now()),
                    playback.track.duration(),
                    self.bar_width,
                );
                tokio::spawn(async move {
                    let controls = Some(Controls::Playback { looping });
                    let _ = channel.edit(&message, &text, controls).await;
                });
            }
        }

        self.emit(Event::LoopChanged(guild, looping));
        looping
    }

    /// Stores a voice connection. Returns whether it is a fresh connection
    /// rather than a move of an existing one; fresh connections start with
    /// an empty queue.
    fn attach(&mut self, guild: GuildId, voice: Arc<dyn VoiceTransport>) -> bool {
        let session = self.sessions.get_or_create(guild);
        let fresh = session.voice.is_none();
        if fresh {
            session.queue.clear();
        }
        debug!("{guild}: voice in {}", voice.channel());
        session.voice = Some(voice);
        fresh
    }

    fn message_gone(&mut self, guild: GuildId, message: &MessageHandle) {
        if let Some(playback) = self
            .sessions
            .get_mut(guild)
            .and_then(GuildSession::playback_mut)
        {
            if playback.message.as_ref() == Some(message) {
                playback.message = None;
            }
        }
    }

    fn evict(&mut self, guild: GuildId) {
        let Some(session) = self.sessions.evict(guild) else {
            return;
        };
        if let Some(voice) = session.voice {
            voice.stop();
            tokio::spawn(async move {
                if let Err(e) = voice.disconnect().await {
                    warn!("{guild}: disconnect failed: {e}");
                }
            });
        }
    }

    async fn shutdown(&mut self) {
        let guilds: Vec<_> = self.sessions.guilds().collect();
        info!("shutting down {} sessions", guilds.len());

        let disconnects = guilds.into_iter().filter_map(|guild| {
            let voice = self.sessions.evict(guild)?.voice?;
            voice.stop();
            Some(async move {
                match tokio::time::timeout(Self::DISCONNECT_TIMEOUT, voice.disconnect()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("{guild}: disconnect failed: {e}"),
                    Err(e) => warn!("{guild}: disconnect {e}"),
                }
            })
        });
        let disconnects: Vec<_> = disconnects.collect();
        future::join_all(disconnects).await;
    }
}

/// Cloneable entry point into the playback loop.
#[derive(Clone)]
pub struct Handle {
    tx: UnboundedSender<Message>,
}

impl Handle {
    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(message(reply))?;
        Ok(response.await?)
    }

    /// Appends `queries` to the guild's queue, starting the first right away
    /// if nothing is playing or starting.
    pub async fn enqueue(
        &self,
        guild: GuildId,
        channel: Arc<dyn StatusChannel>,
        queries: Vec<String>,
    ) -> Result<Enqueued> {
        self.request(|reply| Message::Enqueue {
            guild,
            channel,
            queries,
            reply,
        })
        .await
    }

    /// Ends the current track; the next one, if any, starts.
    pub async fn skip(&self, guild: GuildId) -> Result<()> {
        self.request(|reply| Message::Skip { guild, reply }).await?
    }

    /// Ends playback, clears the queue and leaves the voice channel.
    pub async fn stop(&self, guild: GuildId) -> Result<()> {
        self.request(|reply| Message::Stop { guild, reply }).await?
    }

    /// Moves playback by `delta` seconds, returning the new position.
    pub async fn seek(&self, guild: GuildId, delta: i64) -> Result<Duration> {
        self.request(|reply| Message::Seek {
            guild,
            delta,
            reply,
        })
        .await?
    }

    /// Flips the loop flag, returning the new state.
    pub async fn toggle_loop(&self, guild: GuildId) -> Result<bool> {
        self.request(|reply| Message::ToggleLoop { guild, reply })
            .await
    }

    /// Hands a voice connection to the guild. Returns whether it is fresh.
    pub async fn attach(&self, guild: GuildId, voice: Arc<dyn VoiceTransport>) -> Result<bool> {
        self.request(|reply| Message::Attach {
            guild,
            voice,
            reply,
        })
        .await
    }

    /// The voice channel the guild is connected to.
    pub async fn voice_channel(&self, guild: GuildId) -> Result<Option<VoiceChannel>> {
        self.request(|reply| Message::Voice { guild, reply }).await
    }

    pub async fn status(&self, guild: GuildId) -> Result<Option<Snapshot>> {
        self.request(|reply| Message::Status { guild, reply }).await
    }

    /// Forgets everything about a guild, for example after the bot was
    /// removed from it.
    pub async fn evict(&self, guild: GuildId) -> Result<()> {
        self.request(|reply| Message::Evict { guild, reply }).await
    }

    /// Stops every session and ends the loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Message::Shutdown { reply }).await
    }
}
