//! Media extraction backend.
//!
//! Turning a query into something playable is delegated to an extraction
//! backend. The production backend runs `yt-dlp` and reads its JSON dump:
//!
//! ```json
//! {
//!     "_type": "playlist",
//!     "extractor_key": "YoutubeTab",
//!     "title": "Some playlist",
//!     "entries": [
//!         {"url": "https://www.youtube.com/watch?v=abc", "id": "abc", "title": "First"},
//!         {"id": "def", "title": "Second"}
//!     ]
//! }
//! ```
//!
//! Single videos carry `webpage_url`, `duration` (seconds) and, when formats
//! were selected, the direct stream `url`.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Error, Result};

/// How much work the backend should do for a query.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// Classify the query and list collection entries without resolving
    /// streams.
    Flat,
    /// Resolve one playable stream, starting at `start`.
    Full { start: Duration },
}

/// What kind of thing a query turned out to be, as reported by the backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Shape {
    #[default]
    Single,
    /// A playlist, album or channel: every entry should be queued.
    Collection,
    /// Results of a text search.
    Search,
}

/// One item of a collection or search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Entry {
    const WATCH_URL: &'static str = "https://www.youtube.com/watch?v=";

    /// A query that resolves to this entry again, if the entry has enough
    /// information for one.
    #[must_use]
    pub fn query(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| self.id.as_ref().map(|id| format!("{}{id}", Self::WATCH_URL)))
    }
}

/// The result of an extraction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extracted {
    pub shape: Shape,
    pub entries: Vec<Entry>,
    pub title: Option<String>,
    pub duration: Option<Duration>,
    /// Canonical page of a single item.
    pub webpage_url: Option<String>,
    /// Direct stream of a single item. Only set by full extraction.
    pub url: Option<String>,
}

/// Resolves queries into media.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Extracts `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or times out. Failures for one
    /// query say nothing about others.
    async fn extract(&self, query: &str, mode: Extraction) -> Result<Extracted>;
}

/// Raw `yt-dlp --dump-single-json` output.
#[derive(Clone, Debug, Default, Deserialize)]
struct Dump {
    #[serde(rename = "_type", default)]
    typ: Option<String>,
    #[serde(default)]
    extractor_key: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Option<Dump>>>,
    #[serde(default)]
    id: Option<String>,
}

impl Dump {
    fn shape(&self) -> Shape {
        match (self.typ.as_deref(), self.extractor_key.as_deref()) {
            (Some("playlist"), Some(key)) if key.ends_with("Search") => Shape::Search,
            (Some("playlist"), _) => Shape::Collection,
            _ => Shape::Single,
        }
    }

    fn into_entry(self) -> Entry {
        Entry {
            url: self.url.or(self.webpage_url),
            id: self.id,
            title: self.title,
        }
    }

    fn into_extracted(self) -> Extracted {
        let shape = self.shape();
        let duration = self
            .duration
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        Extracted {
            shape,
            entries: self
                .entries
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .map(Self::into_entry)
                .collect(),
            title: self.title,
            duration,
            webpage_url: self.webpage_url,
            url: self.url,
        }
    }
}

/// Parses `yt-dlp` JSON output.
///
/// Full extractions of collections or searches are narrowed down to their
/// first entry, which is what plays.
///
/// # Errors
///
/// Returns an error if the output is not valid JSON.
pub fn parse_dump(json: &[u8], mode: Extraction) -> Result<Extracted> {
    let dump: Dump = serde_json::from_slice(json)?;
    let dump = match mode {
        Extraction::Full { .. } if dump.entries.is_some() => dump
            .entries
            .into_iter()
            .flatten()
            .flatten()
            .next()
            .ok_or_else(|| Error::not_found("no entries found"))?,
        _ => dump,
    };
    Ok(dump.into_extracted())
}

/// The `yt-dlp` command line program as extraction backend.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: String,
    timeout: Duration,
}

impl YtDlp {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, query: &str, mode: Extraction) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args([
                "--dump-single-json",
                "--quiet",
                "--no-warnings",
                "--no-check-certificates",
                "--default-search",
                "auto",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match mode {
            Extraction::Flat => {
                command.args(["--flat-playlist", "--yes-playlist"]);
            }
            Extraction::Full { .. } => {
                // The start offset is applied by the voice transport when it
                // opens the stream.
                command.args(["--no-playlist", "--format", "bestaudio/best"]);
            }
        }

        // Queries starting with a dash would otherwise parse as options.
        command.arg("--").arg(query);
        command
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn extract(&self, query: &str, mode: Extraction) -> Result<Extracted> {
        trace!("extracting {query:?} ({mode:?})");

        let output = tokio::time::timeout(self.timeout, self.command(query, mode).output())
            .await?
            .map_err(|e| Error::unavailable(format!("could not run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim();
            return Err(Error::unavailable(format!(
                "{} exited with {}: {reason}",
                self.program, output.status
            )));
        }

        parse_dump(&output.stdout, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_dump_is_a_collection() {
        let json = br#"{
            "_type": "playlist",
            "extractor_key": "YoutubeTab",
            "title": "Mix",
            "entries": [
                {"url": "https://www.youtube.com/watch?v=abc", "id": "abc", "title": "First"},
                {"id": "def", "title": "Second"},
                null
            ]
        }"#;
        let extracted = parse_dump(json, Extraction::Flat).unwrap();
        assert_eq!(extracted.shape, Shape::Collection);
        let queries: Vec<_> = extracted.entries.iter().filter_map(Entry::query).collect();
        assert_eq!(
            queries,
            [
                "https://www.youtube.com/watch?v=abc",
                "https://www.youtube.com/watch?v=def"
            ]
        );
    }

    #[test]
    fn search_results_are_reported_as_search() {
        let json = br#"{"_type": "playlist", "extractor_key": "YoutubeSearch", "entries": []}"#;
        let extracted = parse_dump(json, Extraction::Flat).unwrap();
        assert_eq!(extracted.shape, Shape::Search);
    }

    #[test]
    fn full_extraction_narrows_to_first_entry() {
        let json = br#"{
            "_type": "playlist",
            "extractor_key": "YoutubeSearch",
            "entries": [{
                "title": "Song",
                "duration": 212.5,
                "webpage_url": "https://www.youtube.com/watch?v=abc",
                "url": "https://cdn.example/audio"
            }]
        }"#;
        let extracted = parse_dump(json, Extraction::Full { start: Duration::ZERO }).unwrap();
        assert_eq!(extracted.shape, Shape::Single);
        assert_eq!(extracted.title.as_deref(), Some("Song"));
        assert_eq!(extracted.duration, Some(Duration::from_millis(212_500)));
        assert_eq!(extracted.url.as_deref(), Some("https://cdn.example/audio"));
    }

    #[test]
    fn full_extraction_of_empty_search_is_not_found() {
        let json = br#"{"_type": "playlist", "entries": []}"#;
        let err = parse_dump(json, Extraction::Full { start: Duration::ZERO }).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn garbage_is_data_loss() {
        let err = parse_dump(b"not json", Extraction::Flat).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DataLoss);
    }
}
