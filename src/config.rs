use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Runtime settings of the bot.
///
/// Every field has a default, so a missing or empty configuration file
/// yields a working setup. Durations are written as seconds in the file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub app_name: String,
    #[serde(skip)]
    pub app_version: String,
    #[serde(skip)]
    pub user_agent: String,

    /// Name of the only text channel commands are accepted from.
    pub allowed_channel: Option<String>,

    /// Period of the progress reporter.
    #[serde(deserialize_with = "seconds")]
    pub progress_interval: Duration,

    /// How long past its duration a track may run before the reporter stops
    /// repainting it.
    #[serde(deserialize_with = "seconds")]
    pub end_grace: Duration,

    pub bar_width: usize,

    pub ytdlp_path: String,
    #[serde(deserialize_with = "seconds")]
    pub extract_timeout: Duration,

    /// Link prefixes whose pages are scraped for a title and turned into a
    /// search.
    pub share_link_prefixes: Vec<String>,
    pub search_prefix: String,

    pub playlist_file: String,

    /// Start failures in a row after which the rest of a queue is dropped.
    pub max_consecutive_failures: u32,
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let user_agent = user_agent(&app_name, &app_version);

        Self {
            app_name,
            app_version,
            user_agent,

            allowed_channel: None,

            progress_interval: Duration::from_secs(1),
            end_grace: Duration::from_secs(2),
            bar_width: crate::progress::DEFAULT_WIDTH,

            ytdlp_path: "yt-dlp".to_owned(),
            extract_timeout: Duration::from_secs(30),

            share_link_prefixes: vec!["https://open.spotify.com/track".to_owned()],
            search_prefix: "ytsearch:".to_owned(),

            playlist_file: "playlists.json".to_owned(),

            max_consecutive_failures: 10,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds values out of range.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&contents)?;
        debug!("loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parses the configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or holds values out of
    /// range.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.progress_interval.is_zero() {
            return Err(Error::invalid_argument("progress_interval must be positive"));
        }
        if self.bar_width == 0 {
            return Err(Error::invalid_argument("bar_width must be positive"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::invalid_argument(
                "max_consecutive_failures must be positive",
            ));
        }
        Ok(())
    }
}

/// Builds a `User-Agent` in the form `name/version (Rust; os/version)`.
fn user_agent(app_name: &str, app_version: &str) -> String {
    let illegal_chars = |chr| chr == '/' || chr == ';';

    let os_name = match std::env::consts::OS {
        "macos" => "osx",
        other => other,
    };
    let os_version = sysinfo::System::os_version()
        .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
        .unwrap_or_else(|| String::from("0"));

    let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
    trace!("user agent: {user_agent}");
    user_agent
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
