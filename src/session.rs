//! Per-guild playback state and the registry that owns it.
//!
//! A guild moves through three phases:
//!
//! * [`Phase::Idle`]: nothing plays; the queue may or may not be empty.
//! * [`Phase::Starting`]: a query was taken off the queue and is being
//!   resolved. This phase is entered before the first suspension point and
//!   left only when the matching resolution comes back, which keeps a
//!   second request from also seeing "not playing" and starting a track.
//! * [`Phase::Active`]: a track was handed to the voice transport. It stays
//!   active until the transport reports completion, whatever the status.
//!
//! Only the playback loop touches these types; see [`crate::player`].

use std::{
    collections::{hash_map, HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    context::GuildId,
    status::{MessageHandle, StatusChannel},
    track::{Status, Track},
    voice::VoiceTransport,
};

/// Identifies one start attempt. Resolutions and completions carry the
/// ticket they were issued for, so late arrivals for a replaced track are
/// recognised and dropped.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timing state of the track that is playing.
///
/// While playing, the position is `seek_position + (now - started_at)`.
/// In any other status it is frozen at `seek_position`.
#[derive(Clone, Debug)]
pub struct Playback {
    pub(crate) track: Track,
    pub(crate) status: Status,
    pub(crate) started_at: Instant,
    pub(crate) seek_position: Duration,
    pub(crate) message: Option<MessageHandle>,
    pub(crate) ticket: Ticket,
}

impl Playback {
    #[must_use]
    pub fn new(track: Track, ticket: Ticket, now: Instant) -> Self {
        Self {
            track,
            status: Status::Playing,
            started_at: now,
            seek_position: Duration::ZERO,
            message: None,
            ticket,
        }
    }

    #[must_use]
    pub fn track(&self) -> &Track {
        &self.track
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> Option<&MessageHandle> {
        self.message.as_ref()
    }

    /// True elapsed position at `now`.
    #[must_use]
    pub fn position(&self, now: Instant) -> Duration {
        if self.status == Status::Playing {
            self.seek_position + now.saturating_duration_since(self.started_at)
        } else {
            self.seek_position
        }
    }

    /// Freezes the position and switches to a status other than playing.
    pub fn freeze(&mut self, now: Instant, status: Status) {
        self.seek_position = self.position(now);
        self.status = status;
    }

    /// Continues playing from `position`.
    pub fn resume_at(&mut self, position: Duration, now: Instant) {
        self.seek_position = position;
        self.started_at = now;
        self.status = Status::Playing;
    }

    /// Where the bar of an ended track is frozen: the full duration for a
    /// finished track, the position at which it was cut off otherwise.
    #[must_use]
    pub fn final_position(&self, now: Instant) -> Duration {
        let position = self.position(now);
        match (self.status, self.track.duration()) {
            (Status::Finished, Some(duration)) => duration,
            _ => position,
        }
    }
}

#[derive(Debug, Default)]
pub enum Phase {
    #[default]
    Idle,
    Starting {
        ticket: Ticket,
        query: String,
        /// Appended to the now-playing message.
        note: Option<String>,
        /// Set by a stop while the resolution is in flight.
        cancelled: bool,
    },
    Active(Playback),
}

/// Everything the bot keeps for one guild.
#[derive(Default)]
pub struct GuildSession {
    pub(crate) queue: VecDeque<String>,
    pub(crate) phase: Phase,
    pub(crate) looping: bool,
    pub(crate) voice: Option<Arc<dyn VoiceTransport>>,
    /// Where status messages and background notices go.
    pub(crate) channel: Option<Arc<dyn StatusChannel>>,
    /// Start failures in a row.
    pub(crate) failures: u32,
    /// Final text of the last track that ended before its status message
    /// was posted.
    pub(crate) unannounced: Option<(Ticket, String)>,
}

impl GuildSession {
    #[must_use]
    pub fn queue(&self) -> &VecDeque<String> {
        &self.queue
    }

    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    #[must_use]
    pub fn looping(&self) -> bool {
        self.looping
    }

    #[must_use]
    pub fn playback(&self) -> Option<&Playback> {
        match &self.phase {
            Phase::Active(playback) => Some(playback),
            _ => None,
        }
    }

    pub fn playback_mut(&mut self) -> Option<&mut Playback> {
        match &mut self.phase {
            Phase::Active(playback) => Some(playback),
            _ => None,
        }
    }

    /// Whether a new request has to queue rather than play right away.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
            || self
                .voice
                .as_ref()
                .is_some_and(|voice| voice.is_playing() || voice.is_paused())
    }

    /// Decides what plays next: the current track again while looping,
    /// the head of the queue otherwise.
    pub fn next_query(&mut self) -> Option<String> {
        match (&self.phase, self.looping) {
            (Phase::Active(playback), true) => Some(playback.track.query().to_owned()),
            _ => self.queue.pop_front(),
        }
    }

    /// A point-in-time view for status commands.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let (starting, current) = match &self.phase {
            Phase::Idle => (None, None),
            Phase::Starting { query, .. } => (Some(query.clone()), None),
            Phase::Active(playback) => (
                None,
                Some(NowPlaying {
                    title: playback.track.title().to_owned(),
                    query: playback.track.query().to_owned(),
                    status: playback.status,
                    position: playback.position(now),
                    duration: playback.track.duration(),
                }),
            ),
        };

        Snapshot {
            current,
            starting,
            queue: self.queue.iter().cloned().collect(),
            looping: self.looping,
            connected: self.voice.as_ref().map(|voice| voice.channel()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub query: String,
    pub status: Status,
    pub position: Duration,
    pub duration: Option<Duration>,
}

/// A copy of a guild's state, safe to hand out of the playback loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub current: Option<NowPlaying>,
    /// Query being resolved to start playing.
    pub starting: Option<String>,
    pub queue: Vec<String>,
    pub looping: bool,
    pub connected: Option<crate::context::VoiceChannel>,
}

/// Registry of guild sessions.
///
/// Sessions are created explicitly and live until evicted, so every point
/// where state comes into being or goes away is visible at the call site.
#[derive(Default)]
pub struct Sessions {
    guilds: HashMap<GuildId, GuildSession>,
}

impl Sessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<&GuildSession> {
        self.guilds.get(&guild)
    }

    pub fn get_mut(&mut self, guild: GuildId) -> Option<&mut GuildSession> {
        self.guilds.get_mut(&guild)
    }

    /// Creates an empty session, replacing any existing one.
    pub fn create(&mut self, guild: GuildId) -> &mut GuildSession {
        debug!("{guild}: creating session");
        match self.guilds.entry(guild) {
            hash_map::Entry::Occupied(mut entry) => {
                entry.insert(GuildSession::default());
                entry.into_mut()
            }
            hash_map::Entry::Vacant(entry) => entry.insert(GuildSession::default()),
        }
    }

    pub fn get_or_create(&mut self, guild: GuildId) -> &mut GuildSession {
        self.guilds.entry(guild).or_insert_with(|| {
            debug!("{guild}: creating session");
            GuildSession::default()
        })
    }

    /// Removes a session and returns it, so the caller can release its
    /// voice connection.
    pub fn evict(&mut self, guild: GuildId) -> Option<GuildSession> {
        let session = self.guilds.remove(&guild);
        if session.is_some() {
            debug!("{guild}: evicted session");
        }
        session
    }

    pub fn iter(&self) -> impl Iterator<Item = (GuildId, &GuildSession)> {
        self.guilds.iter().map(|(guild, session)| (*guild, session))
    }

    pub fn guilds(&self) -> impl Iterator<Item = GuildId> + '_ {
        self.guilds.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::StreamHandle;

    fn track(query: &str) -> Track {
        Track::new(
            query,
            query.to_uppercase(),
            Some(Duration::from_secs(100)),
            StreamHandle {
                url: format!("https://cdn/{query}"),
                start: Duration::ZERO,
                length: Some(Duration::from_secs(100)),
            },
        )
    }

    #[test]
    fn position_runs_while_playing_and_freezes_otherwise() {
        let t0 = Instant::now();
        let mut playback = Playback::new(track("a"), Ticket(1), t0);
        assert_eq!(playback.position(t0 + Duration::from_secs(7)), Duration::from_secs(7));

        playback.freeze(t0 + Duration::from_secs(7), Status::Paused);
        assert_eq!(playback.position(t0 + Duration::from_secs(60)), Duration::from_secs(7));

        playback.resume_at(Duration::from_secs(17), t0 + Duration::from_secs(60));
        assert_eq!(playback.position(t0 + Duration::from_secs(62)), Duration::from_secs(19));
    }

    #[test]
    fn finished_tracks_snap_to_their_duration() {
        let t0 = Instant::now();
        let mut playback = Playback::new(track("a"), Ticket(1), t0);
        playback.freeze(t0 + Duration::from_secs(98), Status::Finished);
        assert_eq!(playback.final_position(t0), Duration::from_secs(100));

        playback.status = Status::Stopped;
        assert_eq!(playback.final_position(t0), Duration::from_secs(98));
    }

    #[test]
    fn looping_repeats_the_current_query() {
        let mut session = GuildSession::default();
        session.queue.extend(["b".to_owned(), "c".to_owned()]);
        session.phase = Phase::Active(Playback::new(track("a"), Ticket(1), Instant::now()));

        assert_eq!(session.next_query().as_deref(), Some("b"));

        session.looping = true;
        for _ in 0..3 {
            assert_eq!(session.next_query().as_deref(), Some("a"));
        }
        assert_eq!(session.queue.len(), 1);
    }

    #[test]
    fn looping_without_current_track_takes_the_queue() {
        let mut session = GuildSession {
            looping: true,
            ..GuildSession::default()
        };
        session.queue.push_back("b".to_owned());
        assert_eq!(session.next_query().as_deref(), Some("b"));
        assert_eq!(session.next_query(), None);
    }

    #[test]
    fn registry_lifecycle_is_explicit() {
        let mut sessions = Sessions::new();
        let guild = GuildId(7);
        assert!(sessions.get(guild).is_none());

        sessions.get_or_create(guild).queue.push_back("a".to_owned());
        assert_eq!(sessions.get_or_create(guild).queue.len(), 1);
        assert_eq!(sessions.len(), 1);

        sessions.create(guild);
        assert!(sessions.get(guild).unwrap().queue.is_empty());

        assert!(sessions.evict(guild).is_some());
        assert!(sessions.evict(guild).is_none());
        assert!(sessions.is_empty());
    }
}
