use std::{fmt, time::Duration};

/// Where the voice transport reads a track's audio from.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StreamHandle {
    pub url: String,
    /// Offset into the stream to start decoding at.
    pub start: Duration,
    /// Total length of the media, if the backend knows it.
    pub length: Option<Duration>,
}

impl StreamHandle {
    /// How much audio is left after `start`.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.length.map(|length| length.saturating_sub(self.start))
    }
}

/// A playable audio item, resolved from the query a user asked for.
///
/// Tracks are immutable once resolved. Seeking resolves the same query again
/// at an offset and only swaps the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    query: String,
    title: String,
    duration: Option<Duration>,
    stream: StreamHandle,
}

impl Track {
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        title: impl Into<String>,
        duration: Option<Duration>,
        stream: StreamHandle,
    ) -> Self {
        Self {
            query: query.into(),
            title: title.into(),
            duration,
            stream,
        }
    }

    /// The original user input this track was resolved from. Looping
    /// resolves this again.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Length of the track, if the backend knows it.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[must_use]
    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub(crate) fn set_stream(&mut self, stream: StreamHandle) {
        self.stream = stream;
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Playback status of the current track.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub enum Status {
    #[default]
    Playing,
    /// Held while a seek swaps the stream.
    Paused,
    Skipped,
    Stopped,
    Finished,
}

impl Status {
    /// Whether the track has ended or is about to.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Stopped | Self::Finished)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Skipped => "Skipped",
            Self::Stopped => "Stopped",
            Self::Finished => "Finished",
        };
        f.write_str(name)
    }
}
