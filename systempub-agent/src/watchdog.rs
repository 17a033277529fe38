//! systemd service notifications
//!
//! Handles:
//! - READY / STOPPING notifications for `Type=notify` units
//! - Watchdog keep-alive pings at half the configured watchdog period
//! - STATUS lines reflecting the broker connection

use crate::scheduler::ticker;
use std::ffi::OsStr;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NotifyAddr {
    Path(PathBuf),
    Abstract(Vec<u8>),
}

/// Sender for the sd_notify datagram protocol
#[derive(Debug, Clone)]
pub struct SdNotifier {
    addr: NotifyAddr,
}

impl SdNotifier {
    /// Notifier for `$NOTIFY_SOCKET`, `None` when not started by systemd
    pub fn from_env() -> Option<Self> {
        std::env::var_os("NOTIFY_SOCKET").and_then(Self::new)
    }

    /// A socket name starting with `@` is in the abstract namespace
    pub fn new(socket: impl AsRef<OsStr>) -> Option<Self> {
        let socket = socket.as_ref();
        let bytes = socket.as_encoded_bytes();
        match bytes.first() {
            None => None,
            Some(b'@') => Some(Self {
                addr: NotifyAddr::Abstract(bytes[1..].to_vec()),
            }),
            Some(_) => Some(Self {
                addr: NotifyAddr::Path(PathBuf::from(socket)),
            }),
        }
    }

    pub fn notify(&self, state: &str) -> io::Result<()> {
        let socket = UnixDatagram::unbound()?;
        match &self.addr {
            NotifyAddr::Path(path) => socket.send_to(state.as_bytes(), path)?,
            NotifyAddr::Abstract(name) => send_abstract(&socket, name, state)?,
        };
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &UnixDatagram, name: &[u8], state: &str) -> io::Result<usize> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name)?;
    socket.send_to_addr(state.as_bytes(), &addr)
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_socket: &UnixDatagram, _name: &[u8], _state: &str) -> io::Result<usize> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "abstract sockets require Linux"))
}

/// Watchdog period requested through `$WATCHDOG_USEC`
pub fn watchdog_interval() -> Option<Duration> {
    parse_watchdog(
        std::env::var("WATCHDOG_USEC").ok().as_deref(),
        std::env::var("WATCHDOG_PID").ok().as_deref(),
        std::process::id(),
    )
}

/// The watchdog applies to this process only if `WATCHDOG_PID` is unset or
/// names it.
pub fn parse_watchdog(usec: Option<&str>, pid: Option<&str>, own_pid: u32) -> Option<Duration> {
    if let Some(pid) = pid {
        if pid.trim().parse::<u32>().ok()? != own_pid {
            return None;
        }
    }
    let usec: u64 = usec?.trim().parse().ok()?;
    (usec > 0).then(|| Duration::from_micros(usec))
}

pub struct Watchdog {
    notifier: SdNotifier,
    interval: Option<Duration>,
    span: Span,
}

impl Watchdog {
    pub fn new(notifier: SdNotifier, interval: Option<Duration>) -> Self {
        Self {
            notifier,
            interval,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn send(&self, state: &str) {
        match self.notifier.notify(state) {
            Ok(()) => debug!(state, "Notified service manager"),
            Err(e) => warn!(state, error = %e, "Failed to notify service manager"),
        }
    }

    pub async fn run(self, mut connectivity: watch::Receiver<bool>, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            self.send("READY=1");
            self.send("STATUS=Connecting...");

            let mut pinger = self.interval.map(|period| {
                info!(period_ms = period.as_millis() as u64, "Watchdog enabled");
                ticker(period / 2)
            });

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.send("STOPPING=1");
                        break;
                    }
                    Ok(()) = connectivity.changed() => {
                        if *connectivity.borrow_and_update() {
                            self.send("STATUS=Connected to MQTT server");
                        } else {
                            self.send("STATUS=Disconnected from MQTT server");
                        }
                    }
                    _ = async {
                        match pinger.as_mut() {
                            Some(pinger) => {
                                pinger.tick().await;
                            }
                            None => std::future::pending::<()>().await,
                        }
                    } => self.send("WATCHDOG=1"),
                }
            }
        }
        .instrument(span)
        .await
    }
}
