//! Progress reporting.
//!
//! Once per period the playback loop asks the reporter to repaint the status
//! message of every guild that is playing. Reporting is best-effort: edits
//! run in the background, failures are swallowed, and a guild whose previous
//! edit is still in flight (typically because the platform is rate limiting)
//! is skipped for that cycle instead of piling up more requests.
//!
//! Terminal renders of ended tracks are not done here but by the playback
//! loop, exactly once per track.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle, time::Instant};

use crate::{
    config::Config,
    context::GuildId,
    player::Message,
    progress::format_bar,
    session::{Playback, Sessions},
    status::{MessageHandle, StatusChannel},
    track::Status,
};

/// Text of the status message of a playing track.
#[must_use]
pub fn now_playing_text(
    title: &str,
    position: Duration,
    duration: Option<Duration>,
    width: usize,
) -> String {
    format!(
        "**Now playing:** {title}\n{}",
        format_bar(position, duration, width)
    )
}

/// Text a status message is frozen at once its track has ended.
#[must_use]
pub fn final_text(
    title: &str,
    position: Duration,
    duration: Option<Duration>,
    status: Status,
    width: usize,
) -> String {
    format!(
        "**{title}**\n{} ({status})",
        format_bar(position, duration, width)
    )
}

pub struct Reporter {
    width: usize,
    grace: Duration,
    in_flight: HashMap<GuildId, JoinHandle<()>>,
}

impl Reporter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            width: config.bar_width,
            grace: config.end_grace,
            in_flight: HashMap::new(),
        }
    }

    /// The position to paint for `playback` at `now`, or `None` if it should
    /// be left alone this cycle.
    ///
    /// Tracks past their end (plus grace) are about to complete; painting
    /// them would race the terminal render. Tracks of unknown length have no
    /// bar to move.
    #[must_use]
    pub fn due(&self, playback: &Playback, now: Instant) -> Option<Duration> {
        if playback.status() != Status::Playing || playback.message().is_none() {
            return None;
        }

        let duration = playback.track().duration()?;
        let position = playback.position(now);
        (position <= duration + self.grace).then_some(position)
    }

    /// Repaints every playing guild's status message.
    pub(crate) fn refresh(&mut self, sessions: &Sessions, now: Instant, tx: &UnboundedSender<Message>) {
        self.in_flight.retain(|_, edit| !edit.is_finished());

        for (guild, session) in sessions.iter() {
            let Some(playback) = session.playback() else {
                continue;
            };
            let Some(position) = self.due(playback, now) else {
                continue;
            };
            let (Some(channel), Some(message)) = (session.channel.clone(), playback.message.clone())
            else {
                continue;
            };

            if self.in_flight.contains_key(&guild) {
                trace!("{guild}: previous progress update still in flight");
                continue;
            }

            let text = now_playing_text(
                playback.track().title(),
                position,
                playback.track().duration(),
                self.width,
            );
            let edit = tokio::spawn(Self::edit(guild, channel, message, text, tx.clone()));
            self.in_flight.insert(guild, edit);
        }
    }

    async fn edit(
        guild: GuildId,
        channel: Arc<dyn StatusChannel>,
        message: MessageHandle,
        text: String,
        tx: UnboundedSender<Message>,
    ) {
        match channel.edit(&message, &text, None).await {
            Ok(()) => trace!("{guild}: refreshed {message}"),
            Err(e) if e.is_not_found() => {
                debug!("{guild}: status message {message} is gone");
                let _ = tx.send(Message::MessageGone { guild, message });
            }
            Err(e) => trace!("{guild}: progress update failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::Ticket,
        track::{StreamHandle, Track},
    };

    fn playback(duration: Option<Duration>, now: Instant) -> Playback {
        let track = Track::new(
            "q",
            "Song",
            duration,
            StreamHandle {
                url: "https://cdn/q".to_owned(),
                start: Duration::ZERO,
                length: duration,
            },
        );
        let mut playback = Playback::new(track, Ticket(1), now);
        playback.message = Some(MessageHandle("m1".to_owned()));
        playback
    }

    #[test]
    fn paints_playing_tracks_until_past_the_grace_period() {
        let reporter = Reporter::new(&Config::default());
        let t0 = Instant::now();
        let playback = playback(Some(Duration::from_secs(60)), t0);

        assert_eq!(
            reporter.due(&playback, t0 + Duration::from_secs(30)),
            Some(Duration::from_secs(30))
        );
        assert!(reporter.due(&playback, t0 + Duration::from_secs(62)).is_some());
        assert!(reporter.due(&playback, t0 + Duration::from_secs(63)).is_none());
    }

    #[test]
    fn leaves_paused_unknown_and_unannounced_tracks_alone() {
        let reporter = Reporter::new(&Config::default());
        let t0 = Instant::now();

        let mut paused = playback(Some(Duration::from_secs(60)), t0);
        paused.freeze(t0, Status::Paused);
        assert!(reporter.due(&paused, t0).is_none());

        assert!(reporter.due(&playback(None, t0), t0).is_none());

        let mut unannounced = playback(Some(Duration::from_secs(60)), t0);
        unannounced.message = None;
        assert!(reporter.due(&unannounced, t0).is_none());
    }

    #[test]
    fn final_text_names_the_status() {
        let text = final_text(
            "Song",
            Duration::from_secs(60),
            Some(Duration::from_secs(60)),
            Status::Finished,
            20,
        );
        assert!(text.starts_with("**Song**\n["));
        assert!(text.ends_with("01:00 / 01:00 (Finished)"));
    }
}
