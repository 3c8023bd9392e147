//! Process stop signals.

use std::fmt;
use std::io;

/// A request from the OS to stop the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Interrupt,
    Hangup,
    CtrlBreak,
    CtrlClose,
    CtrlShutdown,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Hangup => "SIGHUP",
            StopSignal::CtrlBreak => "CTRL_BREAK",
            StopSignal::CtrlClose => "CTRL_CLOSE",
            StopSignal::CtrlShutdown => "CTRL_SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[cfg(unix)]
async fn wait_impl() -> io::Result<StopSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::select! {
        _ = terminate.recv() => StopSignal::Terminate,
        _ = interrupt.recv() => StopSignal::Interrupt,
        _ = hangup.recv() => StopSignal::Hangup,
    })
}

#[cfg(windows)]
async fn wait_impl() -> io::Result<StopSignal> {
    use tokio::signal::windows;

    let mut ctrl_c = windows::ctrl_c()?;
    let mut ctrl_break = windows::ctrl_break()?;
    let mut ctrl_close = windows::ctrl_close()?;
    let mut ctrl_shutdown = windows::ctrl_shutdown()?;

    Ok(tokio::select! {
        _ = ctrl_c.recv() => StopSignal::Interrupt,
        _ = ctrl_break.recv() => StopSignal::CtrlBreak,
        _ = ctrl_close.recv() => StopSignal::CtrlClose,
        _ = ctrl_shutdown.recv() => StopSignal::CtrlShutdown,
    })
}

/// Wait until the OS asks the process to stop.
/// Fails only when a handler cannot be installed.
pub async fn wait_for_stop_signal() -> io::Result<StopSignal> {
    wait_impl().await
}
