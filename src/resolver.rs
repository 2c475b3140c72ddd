//! Track resolution.
//!
//! Queries are resolved twice. At enqueue time a flat extraction classifies
//! the query and expands collections into one query per entry; stream URLs
//! are not resolved then because they go stale while waiting in the queue.
//! At playback time each query is resolved in full into a [`Track`].
//!
//! Links to platforms the backend cannot play from, such as track share
//! links, are first rewritten into a text search for the page title.

use std::{sync::Arc, sync::LazyLock, time::Duration};

use regex_lite::Regex;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    media::{Extraction, MediaBackend, Shape},
    track::{StreamHandle, Track},
};

static SHARE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title>(.*?) \| Spotify</title>").expect("invalid regex"));

static ANY_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("invalid regex"));

/// Extracts a human readable title from a share page.
#[must_use]
pub fn title_from_page(html: &str) -> Option<String> {
    let captures = SHARE_TITLE
        .captures(html)
        .or_else(|| ANY_TITLE.captures(html))?;

    let title = decode_entities(captures.get(1)?.as_str())
        .replace(" - song by", "")
        .replace(" | Spotify", "");
    let title = title.trim();

    (!title.is_empty()).then(|| title.to_owned())
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub struct Resolver {
    backend: Arc<dyn MediaBackend>,
    http: Option<http::Client>,
    share_link_prefixes: Vec<String>,
    search_prefix: String,
}

impl Resolver {
    /// Creates a resolver. Without an HTTP client share links are passed to
    /// the backend unchanged.
    #[must_use]
    pub fn new(config: &Config, backend: Arc<dyn MediaBackend>, http: Option<http::Client>) -> Self {
        Self {
            backend,
            http,
            share_link_prefixes: config.share_link_prefixes.clone(),
            search_prefix: config.search_prefix.clone(),
        }
    }

    fn is_share_link(&self, query: &str) -> bool {
        self.share_link_prefixes
            .iter()
            .any(|prefix| query.starts_with(prefix.as_str()))
    }

    /// Rewrites a share link into a search for its title. Anything else,
    /// and any link that cannot be scraped, is returned unchanged.
    pub async fn rewrite_share_link(&self, query: &str) -> String {
        if !self.is_share_link(query) {
            return query.to_owned();
        }
        let Some(http) = self.http.as_ref() else {
            return query.to_owned();
        };

        let page = match Url::parse(query) {
            Ok(url) => http.get_text(url).await,
            Err(e) => Err(e.into()),
        };

        match page.map(|html| title_from_page(&html)) {
            Ok(Some(title)) => {
                debug!("share link {query} is \"{title}\"");
                format!("{}{title}", self.search_prefix)
            }
            Ok(None) => {
                warn!("share link {query} has no title");
                query.to_owned()
            }
            Err(e) => {
                warn!("failed to resolve share link {query}: {e}");
                query.to_owned()
            }
        }
    }

    /// Expands a user query into the queries to enqueue, in playback order.
    ///
    /// Resolution failures never reject a request: the query is then
    /// enqueued as is and fails, if at all, when it is about to play. An
    /// empty result means the backend positively found nothing.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let query = self.rewrite_share_link(query).await;

        match self.backend.extract(&query, Extraction::Flat).await {
            Ok(extracted) => match extracted.shape {
                Shape::Collection | Shape::Search => {
                    let queries: Vec<_> = extracted
                        .entries
                        .iter()
                        .filter_map(crate::media::Entry::query)
                        .collect();
                    debug!(
                        "{query} is a {} with {} entries",
                        if extracted.shape == Shape::Search {
                            "search"
                        } else {
                            "collection"
                        },
                        queries.len()
                    );
                    queries
                }
                Shape::Single => vec![extracted.webpage_url.or(extracted.url).unwrap_or(query)],
            },
            Err(e) => {
                warn!("flat extraction of {query} failed, enqueueing as is: {e}");
                vec![query]
            }
        }
    }

    /// Resolves a query into a playable track starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or finds no playable stream.
    pub async fn track(&self, query: &str, start: Duration) -> Result<Track> {
        let rewritten = self.rewrite_share_link(query).await;
        let extracted = self
            .backend
            .extract(&rewritten, Extraction::Full { start })
            .await?;

        let url = extracted
            .url
            .ok_or_else(|| Error::not_found(format!("no playable stream for {query}")))?;
        let title = extracted.title.unwrap_or_else(|| query.to_owned());

        Ok(Track::new(
            query,
            title,
            extracted.duration,
            StreamHandle {
                url,
                start,
                length: extracted.duration,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::media::{Entry, Extracted};

    struct Canned(Result<Extracted>);

    #[async_trait]
    impl MediaBackend for Canned {
        async fn extract(&self, _query: &str, _mode: Extraction) -> Result<Extracted> {
            match &self.0 {
                Ok(extracted) => Ok(extracted.clone()),
                Err(e) => Err(Error::new(e.kind, e.to_string())),
            }
        }
    }

    fn resolver(result: Result<Extracted>) -> Resolver {
        Resolver::new(&Config::default(), Arc::new(Canned(result)), None)
    }

    #[test]
    fn share_page_title_is_cleaned() {
        let html = "<html><head><title>Bohemian Rhapsody - song by Queen | Spotify</title></head>";
        assert_eq!(
            title_from_page(html).as_deref(),
            Some("Bohemian Rhapsody Queen")
        );
    }

    #[test]
    fn falls_back_to_any_title() {
        let html = "<title>Tom &amp; Jerry</title>";
        assert_eq!(title_from_page(html).as_deref(), Some("Tom & Jerry"));
        assert_eq!(title_from_page("<title>  </title>"), None);
        assert_eq!(title_from_page("<p>no title</p>"), None);
    }

    #[tokio::test]
    async fn collections_expand_into_entries() {
        let resolver = resolver(Ok(Extracted {
            shape: Shape::Collection,
            entries: vec![
                Entry {
                    url: Some("https://a".to_owned()),
                    ..Entry::default()
                },
                Entry::default(),
                Entry {
                    id: Some("b".to_owned()),
                    ..Entry::default()
                },
            ],
            ..Extracted::default()
        }));
        assert_eq!(
            resolver.expand("https://list").await,
            ["https://a", "https://www.youtube.com/watch?v=b"]
        );
    }

    #[tokio::test]
    async fn single_items_prefer_their_page() {
        let resolver = resolver(Ok(Extracted {
            webpage_url: Some("https://page".to_owned()),
            ..Extracted::default()
        }));
        assert_eq!(resolver.expand("some song").await, ["https://page"]);
    }

    #[tokio::test]
    async fn failed_expansion_passes_query_through() {
        let resolver = resolver(Err(Error::unavailable("backend down")));
        assert_eq!(resolver.expand("some song").await, ["some song"]);
    }

    #[tokio::test]
    async fn share_links_without_http_are_left_alone() {
        let resolver = resolver(Err(Error::unavailable("backend down")));
        let link = "https://open.spotify.com/track/abc";
        assert_eq!(resolver.rewrite_share_link(link).await, link);
    }

    #[tokio::test]
    async fn tracks_keep_the_original_query() {
        let resolver = resolver(Ok(Extracted {
            title: Some("Song".to_owned()),
            duration: Some(Duration::from_secs(90)),
            url: Some("https://cdn/stream".to_owned()),
            ..Extracted::default()
        }));
        let track = resolver
            .track("song query", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(track.query(), "song query");
        assert_eq!(track.title(), "Song");
        assert_eq!(track.stream().start, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn tracks_without_stream_are_not_found() {
        let resolver = resolver(Ok(Extracted::default()));
        let err = resolver.track("q", Duration::ZERO).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
