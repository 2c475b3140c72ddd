//! In-memory collaborators for driving the playback loop in tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use jukebot::{
    commands::Controller,
    config::Config,
    context::{Context, GuildId, UserId, VoiceChannel},
    error::{Error, Result},
    events::Event,
    media::{Entry, Extracted, Extraction, MediaBackend, Shape},
    player::{Handle, Player},
    playlist::JsonFileStore,
    resolver::Resolver,
    status::{Controls, MessageHandle, StatusChannel},
    track::StreamHandle,
    voice::{Completion, VoiceConnector, VoiceTransport},
};

// ===== Media backend =====

#[derive(Clone)]
struct Song {
    title: String,
    duration: Option<Duration>,
    fails: bool,
}

#[derive(Default)]
struct Catalogue {
    songs: HashMap<String, Song>,
    collections: HashMap<String, Vec<String>>,
    gates: HashMap<String, Arc<Semaphore>>,
    resolved: Vec<(String, Duration)>,
}

/// A backend serving a fixed catalogue. Unknown queries fail.
#[derive(Default)]
pub struct MockBackend {
    catalogue: Mutex<Catalogue>,
}

impl MockBackend {
    pub fn song(&self, query: &str, title: &str, secs: u64) {
        self.catalogue.lock().unwrap().songs.insert(
            query.to_owned(),
            Song {
                title: title.to_owned(),
                duration: Some(Duration::from_secs(secs)),
                fails: false,
            },
        );
    }

    /// A stream of unknown length, like a live broadcast.
    pub fn live(&self, query: &str, title: &str) {
        self.catalogue.lock().unwrap().songs.insert(
            query.to_owned(),
            Song {
                title: title.to_owned(),
                duration: None,
                fails: false,
            },
        );
    }

    /// Makes every full resolution of `query` fail from now on.
    pub fn break_song(&self, query: &str) {
        let mut catalogue = self.catalogue.lock().unwrap();
        match catalogue.songs.get_mut(query) {
            Some(song) => song.fails = true,
            None => {
                catalogue.songs.insert(
                    query.to_owned(),
                    Song {
                        title: query.to_owned(),
                        duration: None,
                        fails: true,
                    },
                );
            }
        }
    }

    pub fn collection(&self, query: &str, entries: &[&str]) {
        self.catalogue.lock().unwrap().collections.insert(
            query.to_owned(),
            entries.iter().map(|entry| (*entry).to_owned()).collect(),
        );
    }

    /// Holds full resolutions of `query` until permits are added to the
    /// returned semaphore.
    pub fn gate(&self, query: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.catalogue
            .lock()
            .unwrap()
            .gates
            .insert(query.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Every full resolution so far, with its start offset.
    pub fn resolved(&self) -> Vec<(String, Duration)> {
        self.catalogue.lock().unwrap().resolved.clone()
    }

    pub fn resolutions_of(&self, query: &str) -> usize {
        self.resolved().iter().filter(|(q, _)| q == query).count()
    }
}

#[async_trait]
impl MediaBackend for MockBackend {
    async fn extract(&self, query: &str, mode: Extraction) -> Result<Extracted> {
        let start = match mode {
            Extraction::Flat => {
                let catalogue = self.catalogue.lock().unwrap();
                if let Some(entries) = catalogue.collections.get(query) {
                    return Ok(Extracted {
                        shape: Shape::Collection,
                        entries: entries
                            .iter()
                            .map(|entry| Entry {
                                url: Some(entry.clone()),
                                ..Entry::default()
                            })
                            .collect(),
                        ..Extracted::default()
                    });
                }
                return Ok(Extracted {
                    webpage_url: Some(query.to_owned()),
                    ..Extracted::default()
                });
            }
            Extraction::Full { start } => start,
        };

        let gate = self.catalogue.lock().unwrap().gates.get(query).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let song = {
            let mut catalogue = self.catalogue.lock().unwrap();
            catalogue.resolved.push((query.to_owned(), start));
            catalogue.songs.get(query).cloned()
        };
        match song {
            Some(song) if !song.fails => Ok(Extracted {
                title: Some(song.title),
                duration: song.duration,
                webpage_url: Some(query.to_owned()),
                url: Some(format!("https://cdn.test/{query}")),
                ..Extracted::default()
            }),
            _ => Err(Error::unavailable(format!("{query} is unavailable"))),
        }
    }
}

// ===== Voice =====

struct Line {
    channel: VoiceChannel,
    current: Option<Completion>,
    paused: bool,
    plays: Vec<StreamHandle>,
    sources: Vec<StreamHandle>,
    disconnected: bool,
}

pub struct MockVoice {
    line: Mutex<Line>,
}

impl MockVoice {
    fn new(channel: VoiceChannel) -> Self {
        Self {
            line: Mutex::new(Line {
                channel,
                current: None,
                paused: false,
                plays: Vec::new(),
                sources: Vec::new(),
                disconnected: false,
            }),
        }
    }

    /// Ends the current stream naturally. The completion fires on another
    /// thread, as it would from an audio mixer.
    pub fn finish(&self) {
        let completion = self.line.lock().unwrap().current.take();
        let completion = completion.expect("nothing is playing");
        std::thread::spawn(move || completion(None)).join().unwrap();
    }

    /// Ends the current stream with a transport error.
    pub fn fail(&self, reason: &str) {
        let completion = self.line.lock().unwrap().current.take();
        let completion = completion.expect("nothing is playing");
        let error = Error::unavailable(reason.to_owned());
        std::thread::spawn(move || completion(Some(error)))
            .join()
            .unwrap();
    }

    pub fn plays(&self) -> Vec<StreamHandle> {
        self.line.lock().unwrap().plays.clone()
    }

    pub fn sources(&self) -> Vec<StreamHandle> {
        self.line.lock().unwrap().sources.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.line.lock().unwrap().disconnected
    }
}

#[async_trait]
impl VoiceTransport for MockVoice {
    fn channel(&self) -> VoiceChannel {
        self.line.lock().unwrap().channel.clone()
    }

    fn play(&self, stream: StreamHandle, on_complete: Completion) -> Result<()> {
        let mut line = self.line.lock().unwrap();
        if line.disconnected {
            return Err(Error::failed_precondition("not connected"));
        }
        if line.current.is_some() {
            return Err(Error::failed_precondition("already playing audio"));
        }
        line.plays.push(stream);
        line.current = Some(on_complete);
        line.paused = false;
        Ok(())
    }

    fn set_source(&self, stream: StreamHandle) -> Result<()> {
        self.line.lock().unwrap().sources.push(stream);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.line.lock().unwrap().paused = true;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.line.lock().unwrap().paused = false;
        Ok(())
    }

    fn stop(&self) {
        let completion = self.line.lock().unwrap().current.take();
        if let Some(completion) = completion {
            completion(None);
        }
    }

    fn is_playing(&self) -> bool {
        let line = self.line.lock().unwrap();
        line.current.is_some() && !line.paused
    }

    fn is_paused(&self) -> bool {
        let line = self.line.lock().unwrap();
        line.current.is_some() && line.paused
    }

    async fn disconnect(&self) -> Result<()> {
        self.line.lock().unwrap().disconnected = true;
        Ok(())
    }
}

/// Hands out one [`MockVoice`] per guild, a new one after a disconnect.
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<HashMap<GuildId, Arc<MockVoice>>>,
}

impl MockConnector {
    pub fn voice(&self, guild: GuildId) -> Arc<MockVoice> {
        Arc::clone(
            self.connections
                .lock()
                .unwrap()
                .get(&guild)
                .expect("guild never connected"),
        )
    }
}

#[async_trait]
impl VoiceConnector for MockConnector {
    async fn connect(
        &self,
        guild: GuildId,
        channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceTransport>> {
        let mut connections = self.connections.lock().unwrap();
        if let Some(voice) = connections.get(&guild).filter(|v| !v.is_disconnected()) {
            voice.line.lock().unwrap().channel = channel.clone();
            return Ok(Arc::clone(voice) as Arc<dyn VoiceTransport>);
        }
        let voice = Arc::new(MockVoice::new(channel.clone()));
        connections.insert(guild, Arc::clone(&voice));
        Ok(voice)
    }
}

// ===== Status messages =====

#[derive(Clone, Debug)]
pub struct Posted {
    pub id: MessageHandle,
    /// The text as first posted.
    pub sent: String,
    /// The text after the latest edit.
    pub text: String,
    pub controls: Controls,
}

#[derive(Default)]
struct Board {
    posted: Vec<Posted>,
    deleted: HashSet<MessageHandle>,
    edits: Vec<(MessageHandle, String, Option<Controls>)>,
    failed_edits: usize,
}

/// Records everything posted; messages can be "deleted" by a moderator.
#[derive(Default)]
pub struct MockChannel {
    board: Mutex<Board>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockChannel {
    /// Holds new posts until permits are added to the returned semaphore.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.board.lock().unwrap().posted.clone()
    }

    /// Every posted message as first sent.
    pub fn texts(&self) -> Vec<String> {
        self.posted().into_iter().map(|posted| posted.sent).collect()
    }

    pub fn edits_of(&self, id: &MessageHandle) -> Vec<(String, Option<Controls>)> {
        self.board
            .lock()
            .unwrap()
            .edits
            .iter()
            .filter(|(message, _, _)| message == id)
            .map(|(_, text, controls)| (text.clone(), *controls))
            .collect()
    }

    pub fn failed_edits(&self) -> usize {
        self.board.lock().unwrap().failed_edits
    }

    pub fn delete(&self, id: &MessageHandle) {
        self.board.lock().unwrap().deleted.insert(id.clone());
    }
}

#[async_trait]
impl StatusChannel for MockChannel {
    async fn send(&self, text: &str, controls: Controls) -> Result<MessageHandle> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut board = self.board.lock().unwrap();
        let id = MessageHandle(format!("m{}", board.posted.len() + 1));
        board.posted.push(Posted {
            id: id.clone(),
            sent: text.to_owned(),
            text: text.to_owned(),
            controls,
        });
        Ok(id)
    }

    async fn edit(
        &self,
        message: &MessageHandle,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<()> {
        let mut board = self.board.lock().unwrap();
        if board.deleted.contains(message) {
            board.failed_edits += 1;
            return Err(Error::not_found(format!("message {message} was deleted")));
        }
        let posted = board
            .posted
            .iter_mut()
            .find(|posted| posted.id == *message)
            .ok_or_else(|| Error::not_found(format!("no message {message}")))?;
        posted.text = text.to_owned();
        if let Some(controls) = controls {
            posted.controls = controls;
        }
        board
            .edits
            .push((message.clone(), text.to_owned(), controls));
        Ok(())
    }
}

// ===== Harness =====

pub const GUILD: GuildId = GuildId(42);

pub fn general() -> VoiceChannel {
    VoiceChannel {
        id: 1,
        name: "General".to_owned(),
    }
}

/// A running playback loop wired to mocks, plus a command context for one
/// user in [`GUILD`].
pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub connector: Arc<MockConnector>,
    pub channel: Arc<MockChannel>,
    pub player: Handle,
    pub controller: Controller,
    pub ctx: Context,
    events: mpsc::UnboundedReceiver<Event>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Must be called within a tokio runtime.
    pub fn with_config(mut config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config.playlist_file = dir.path().join("playlists.json").display().to_string();

        let backend = Arc::new(MockBackend::default());
        let resolver = Arc::new(Resolver::new(
            &config,
            Arc::clone(&backend) as Arc<dyn MediaBackend>,
            None,
        ));

        let (tx, events) = mpsc::unbounded_channel();
        let player = Player::new(&config, Arc::clone(&resolver)).with_events(tx);
        let handle = player.handle();
        tokio::spawn(player.run());

        let connector = Arc::new(MockConnector::default());
        let controller = Controller::new(
            &config,
            handle.clone(),
            resolver,
            Arc::clone(&connector) as Arc<dyn VoiceConnector>,
            Arc::new(JsonFileStore::new(&config.playlist_file)),
        );

        let channel = Arc::new(MockChannel::default());
        let ctx = Context {
            guild: GUILD,
            user: UserId(7),
            channel_name: "music".to_owned(),
            channel: Arc::clone(&channel) as Arc<dyn StatusChannel>,
            voice: Some(general()),
        };

        Self {
            backend,
            connector,
            channel,
            player: handle,
            controller,
            ctx,
            events,
            _dir: dir,
        }
    }

    /// Joins the voice channel and returns the connection.
    pub async fn join(&self) -> Arc<MockVoice> {
        self.controller.join(&self.ctx).await.unwrap();
        self.voice()
    }

    pub fn voice(&self) -> Arc<MockVoice> {
        self.connector.voice(GUILD)
    }

    /// Waits for the next event matching `wanted`, skipping others.
    pub async fn wait_for(&mut self, wanted: impl Fn(&Event) -> bool) -> Event {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(600), async {
            loop {
                let event = events.recv().await.expect("playback loop is gone");
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event did not arrive")
    }

    pub async fn track_changed(&mut self) {
        self.wait_for(|event| matches!(event, Event::TrackChanged(_)))
            .await;
    }

    pub async fn idle(&mut self) {
        self.wait_for(|event| matches!(event, Event::Idle(_))).await;
    }

    /// Lets spawned tasks such as status message posts run. Under a paused
    /// clock the sleep only ends once every other task is waiting.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
