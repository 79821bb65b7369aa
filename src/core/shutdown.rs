//! # Termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves with the first [`ShutdownSignal`] the process receives.
//! The orchestrator races it against startup and the running phase when driven by
//! [`Orchestrator::run_until_shutdown`](crate::Orchestrator::run_until_shutdown).
//!
//! | Platform | Signals                         |
//! |----------|---------------------------------|
//! | Unix     | `SIGINT`, `SIGTERM`, `SIGQUIT`  |
//! | other    | Ctrl-C                          |

use std::fmt;

/// Signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
    CtrlC,
}

impl ShutdownSignal {
    /// Conventional signal name, used as the `ShutdownRequested` event reason.
    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::CtrlC => "ctrl-c",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waits for the first termination signal.
///
/// Listeners are registered per call. Fails only if registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
        _ = quit.recv() => ShutdownSignal::Quit,
    })
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::CtrlC)
}
