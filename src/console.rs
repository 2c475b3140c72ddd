//! Terminal stand-ins for the chat platform.
//!
//! [`ConsoleChannel`] prints status messages to stdout and [`Simulator`]
//! provides voice connections that "play" a stream by waiting out its
//! length on a worker thread. Together they let the bot run without a chat
//! platform, with real media resolution.

use std::{
    collections::HashMap,
    io::Write as _,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    commands::SEEK_STEP,
    context::{GuildId, VoiceChannel},
    error::{Error, Result},
    status::{Controls, MessageHandle, StatusChannel},
    track::StreamHandle,
    voice::{Completion, VoiceConnector, VoiceTransport},
};

/// Status messages on stdout.
///
/// Edits of the most recent message rewrite it in place; edits of older
/// messages are printed as new lines tagged with the message number.
#[derive(Default)]
pub struct ConsoleChannel {
    state: Mutex<Screen>,
}

#[derive(Default)]
struct Screen {
    next_id: u64,
    last: Option<Printed>,
}

/// The message printed last.
struct Printed {
    message: MessageHandle,
    lines: usize,
    controls: Controls,
}

impl ConsoleChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn render(text: &str, controls: Option<Controls>) -> String {
        match controls {
            Some(Controls::Playback { looping }) => {
                let repeat = if looping { "[🔁 on]" } else { "[🔁]" };
                format!(
                    "{text}\n  [⏪ -{SEEK_STEP}s] [⏹ stop] [⏩ +{SEEK_STEP}s] [⏭ skip] {repeat}"
                )
            }
            Some(Controls::Disabled) | None => text.to_owned(),
        }
    }

    fn screen(&self) -> MutexGuard<'_, Screen> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusChannel for ConsoleChannel {
    async fn send(&self, text: &str, controls: Controls) -> Result<MessageHandle> {
        let mut screen = self.screen();
        screen.next_id += 1;
        let message = MessageHandle(screen.next_id.to_string());

        let rendered = Self::render(text, Some(controls));
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{rendered}")?;
        stdout.flush()?;

        screen.last = Some(Printed {
            message: message.clone(),
            lines: rendered.lines().count(),
            controls,
        });
        Ok(message)
    }

    async fn edit(
        &self,
        message: &MessageHandle,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<()> {
        let mut screen = self.screen();
        let known = message
            .0
            .parse::<u64>()
            .is_ok_and(|id| id > 0 && id <= screen.next_id);
        if !known {
            return Err(Error::not_found(format!("no message {message}")));
        }

        let mut stdout = std::io::stdout().lock();
        match screen.last.take() {
            Some(last) if last.message == *message => {
                let controls = controls.unwrap_or(last.controls);
                let rendered = Self::render(text, Some(controls));
                writeln!(stdout, "\x1b[{}F\x1b[J{rendered}", last.lines)?;
                screen.last = Some(Printed {
                    message: message.clone(),
                    lines: rendered.lines().count(),
                    controls,
                });
            }
            other => {
                screen.last = other;
                let rendered = Self::render(text, controls);
                writeln!(stdout, "(#{message}) {rendered}")?;
            }
        }
        stdout.flush()?;
        Ok(())
    }
}

/// How long a stream of unknown length "plays".
const UNKNOWN_LENGTH: Duration = Duration::from_secs(180);

/// Hands out simulated voice connections, one per guild.
#[derive(Default)]
pub struct Simulator {
    connections: Mutex<HashMap<GuildId, Arc<SimulatedVoice>>>,
}

impl Simulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoiceConnector for Simulator {
    async fn connect(
        &self,
        guild: GuildId,
        channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceTransport>> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(voice) = connections
            .get(&guild)
            .filter(|voice| voice.line.connected.load(Ordering::Acquire))
        {
            info!("{guild}: moving to voice channel {channel}");
            voice.line.lock().channel = channel.clone();
            return Ok(Arc::clone(voice) as Arc<dyn VoiceTransport>);
        }

        info!("{guild}: joining voice channel {channel}");
        let voice = Arc::new(SimulatedVoice {
            line: Arc::new(Line::new(guild, channel.clone())),
        });
        connections.insert(guild, Arc::clone(&voice));
        Ok(voice)
    }
}

/// A voice connection that plays silence in real time.
pub struct SimulatedVoice {
    line: Arc<Line>,
}

/// State shared with the worker thread of the current stream.
struct Line {
    guild: GuildId,
    connected: AtomicBool,
    state: Mutex<LineState>,
    wake: Condvar,
}

struct LineState {
    channel: VoiceChannel,
    /// Bumped whenever playback is replaced, so that stale workers exit.
    generation: u64,
    current: Option<Stream>,
}

struct Stream {
    remaining: Duration,
    /// `None` while paused.
    resumed_at: Option<Instant>,
    on_complete: Completion,
}

impl Stream {
    fn left(&self) -> Duration {
        match self.resumed_at {
            Some(resumed_at) => self.remaining.saturating_sub(resumed_at.elapsed()),
            None => self.remaining,
        }
    }
}

impl Line {
    fn new(guild: GuildId, channel: VoiceChannel) -> Self {
        Self {
            guild,
            connected: AtomicBool::new(true),
            state: Mutex::new(LineState {
                channel,
                generation: 0,
                current: None,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits out the stream of `generation` and fires its completion.
    fn work(&self, generation: u64) {
        let mut state = self.lock();
        loop {
            if state.generation != generation {
                return;
            }
            let Some(stream) = &state.current else {
                return;
            };

            let left = stream.left();
            let paused = stream.resumed_at.is_none();
            if !paused && left.is_zero() {
                let stream = state.current.take();
                state.generation += 1;
                drop(state);
                if let Some(stream) = stream {
                    trace!("{}: stream ended", self.guild);
                    (stream.on_complete)(None);
                }
                return;
            }

            state = if paused {
                self.wake.wait(state).unwrap_or_else(PoisonError::into_inner)
            } else {
                self.wake
                    .wait_timeout(state, left)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            };
        }
    }

    fn take_current(&self) -> Option<Stream> {
        let mut state = self.lock();
        state.generation += 1;
        let stream = state.current.take();
        self.wake.notify_all();
        stream
    }

    fn with_current<T>(&self, f: impl FnOnce(&mut Stream) -> T) -> Result<T> {
        let mut state = self.lock();
        let current = state
            .current
            .as_mut()
            .ok_or_else(|| Error::failed_precondition("not playing"))?;
        let result = f(current);
        self.wake.notify_all();
        Ok(result)
    }
}

#[async_trait]
impl VoiceTransport for SimulatedVoice {
    fn channel(&self) -> VoiceChannel {
        self.line.lock().channel.clone()
    }

    fn play(&self, stream: StreamHandle, on_complete: Completion) -> Result<()> {
        let line = &self.line;
        if !line.connected.load(Ordering::Acquire) {
            return Err(Error::failed_precondition("not connected to a voice channel"));
        }

        let mut state = line.lock();
        if state.current.is_some() {
            return Err(Error::failed_precondition("already playing audio"));
        }

        debug!("{}: playing {}", line.guild, stream.url);
        state.generation += 1;
        let generation = state.generation;
        state.current = Some(Stream {
            remaining: stream.remaining().unwrap_or(UNKNOWN_LENGTH),
            resumed_at: Some(Instant::now()),
            on_complete,
        });
        drop(state);

        let worker = Arc::clone(line);
        let spawned = thread::Builder::new()
            .name(format!("voice-{}", line.guild))
            .spawn(move || worker.work(generation));
        if let Err(e) = spawned {
            line.take_current();
            return Err(e.into());
        }
        Ok(())
    }

    fn set_source(&self, stream: StreamHandle) -> Result<()> {
        debug!(
            "{}: switching to {} at {:.1}s",
            self.line.guild,
            stream.url,
            stream.start.as_secs_f64()
        );
        self.line.with_current(|current| {
            current.remaining = stream.remaining().unwrap_or(UNKNOWN_LENGTH);
            if current.resumed_at.is_some() {
                current.resumed_at = Some(Instant::now());
            }
        })
    }

    fn pause(&self) -> Result<()> {
        self.line.with_current(|current| {
            current.remaining = current.left();
            current.resumed_at = None;
        })
    }

    fn resume(&self) -> Result<()> {
        self.line.with_current(|current| {
            if current.resumed_at.is_none() {
                current.resumed_at = Some(Instant::now());
            }
        })
    }

    fn stop(&self) {
        if let Some(stream) = self.line.take_current() {
            (stream.on_complete)(None);
        }
    }

    fn is_playing(&self) -> bool {
        self.line
            .lock()
            .current
            .as_ref()
            .is_some_and(|stream| stream.resumed_at.is_some())
    }

    fn is_paused(&self) -> bool {
        self.line
            .lock()
            .current
            .as_ref()
            .is_some_and(|stream| stream.resumed_at.is_none())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop();
        self.line.connected.store(false, Ordering::Release);
        info!("{}: left voice channel {}", self.line.guild, self.channel());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn stream(millis: u64) -> StreamHandle {
        StreamHandle {
            url: "https://cdn/stream".to_owned(),
            start: Duration::ZERO,
            length: Some(Duration::from_millis(millis)),
        }
    }

    fn channel() -> VoiceChannel {
        VoiceChannel {
            id: 1,
            name: "General".to_owned(),
        }
    }

    #[tokio::test]
    async fn streams_complete_after_their_length() {
        let voice = Simulator::new().connect(GuildId(1), &channel()).await.unwrap();
        let (tx, rx) = mpsc::channel();
        voice
            .play(stream(20), Box::new(move |error| tx.send(error.is_none()).unwrap()))
            .unwrap();
        assert!(voice.is_playing());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        assert!(!voice.is_playing());
    }

    #[tokio::test]
    async fn stop_completes_right_away_and_only_once() {
        let voice = Simulator::new().connect(GuildId(1), &channel()).await.unwrap();
        let (tx, rx) = mpsc::channel();
        voice
            .play(stream(60_000), Box::new(move |_| tx.send(()).unwrap()))
            .unwrap();

        voice.pause().unwrap();
        assert!(voice.is_paused());
        voice.stop();
        voice.stop();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[tokio::test]
    async fn connecting_again_moves_the_connection() {
        let simulator = Simulator::new();
        let first = simulator.connect(GuildId(1), &channel()).await.unwrap();
        let lounge = VoiceChannel {
            id: 2,
            name: "Lounge".to_owned(),
        };
        simulator.connect(GuildId(1), &lounge).await.unwrap();
        assert_eq!(first.channel(), lounge);

        first.disconnect().await.unwrap();
        let fresh = simulator.connect(GuildId(1), &channel()).await.unwrap();
        assert_eq!(fresh.channel(), channel());
        assert_eq!(first.channel(), lounge);
    }

    #[tokio::test]
    async fn editing_an_older_message_keeps_the_latest_in_place() {
        let console = ConsoleChannel::new();
        let older = console.send("older", Controls::Disabled).await.unwrap();
        let latest = console
            .send("latest", Controls::Playback { looping: false })
            .await
            .unwrap();

        console.edit(&older, "older, edited", None).await.unwrap();
        let screen = console.screen();
        let last = screen.last.as_ref().unwrap();
        assert_eq!(last.message, latest);
        assert_eq!(last.controls, Controls::Playback { looping: false });
        assert_eq!(last.lines, 2);
    }

    #[tokio::test]
    async fn edits_of_unknown_messages_are_not_found() {
        let console = ConsoleChannel::new();
        let err = console
            .edit(&MessageHandle("9".to_owned()), "text", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
