//! Process signals that end the console bot.
//!
//! The binary races [`Handler::recv`] against stdin. Whichever signal
//! arrives first, the playback loop is asked to shut down, which stops
//! every guild and leaves its voice channel.
//!
//! Only Ctrl-C exists outside Unix.
//!
//! # Example
//!
//! ```no_run
//! use jukebot::signal::Handler;
//!
//! async fn wait_then_leave(player: jukebot::player::Handle) -> jukebot::error::Result<()> {
//!     let mut signals = Handler::new()?;
//!     let signal = signals.recv().await;
//!     println!("leaving on {signal}");
//!     player.shutdown().await
//! }
//! ```

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Why the bot is going away.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[expect(clippy::module_name_repetitions)]
pub enum ShutdownSignal {
    /// Ctrl-C at the terminal.
    Interrupt,
    /// A service manager asked the bot to stop.
    Terminate,
    /// The terminal running the console was closed.
    Hangup,
}

impl ShutdownSignal {
    fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "Ctrl+C",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Listens for shutdown signals. Ctrl-C needs no registration; the others
/// are registered up front so none is missed between two `recv` calls.
pub struct Handler {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    hangup: Signal,
}

impl Handler {
    /// # Errors
    ///
    /// Fails when the runtime cannot install the Unix signal listeners.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        let handler = Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        };

        #[cfg(not(unix))]
        let handler = Self {};

        Ok(handler)
    }

    /// Resolves with the first signal received.
    pub async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                _ = self.terminate.recv() => ShutdownSignal::Terminate,
                _ = self.hangup.recv() => ShutdownSignal::Hangup,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            ShutdownSignal::Interrupt
        }
    }
}
