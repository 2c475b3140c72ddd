//! Guild-scoped streaming audio queue for chat voice bots.
//!
//! Each guild gets a queue of queries, a playback state machine and a status
//! message with a live progress bar. Everything that talks to the outside
//! world sits behind a trait: the voice connection ([`voice`]), status
//! messages ([`status`]), media extraction ([`media`]) and saved playlists
//! ([`playlist`]).
//!
//! All guild state is owned by one task, the playback loop in [`player`].
//! Commands reach it through a [`player::Handle`], usually via the
//! [`commands::Controller`] that renders user-facing replies.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod commands;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod events;
pub mod http;
pub mod media;
pub mod player;
pub mod playlist;
pub mod progress;
pub mod reporter;
pub mod resolver;
pub mod session;
pub mod signal;
pub mod status;
pub mod track;
pub mod voice;
