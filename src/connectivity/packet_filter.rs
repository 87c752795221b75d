//! Packet filter strategy
//!
//! Opens an outbound-traffic intercept handle and drains it on a dedicated
//! thread, dropping every captured packet. Closing the handle ends the
//! outage. The capture driver itself is injected through [`InterceptOpener`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use super::ConnectivityStrategy;
use crate::config::schema::StrategyKind;
use crate::error::ConnectivityError;

/// An open capture handle on outbound traffic.
pub trait PacketIntercept: Send + Sync {
    /// Blocks until a packet is captured and returns its length.
    ///
    /// # Errors
    ///
    /// Returns an error once the handle is closed or the driver fails.
    fn recv(&self) -> io::Result<usize>;

    /// Closes the handle, unblocking any pending [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses to close.
    fn close(&self) -> io::Result<()>;
}

/// Factory for capture handles.
pub trait InterceptOpener: Send + std::fmt::Debug {
    fn is_available(&self) -> bool;

    /// Opens a handle that captures all outbound traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is missing or access is denied.
    fn open(&self) -> io::Result<Arc<dyn PacketIntercept>>;
}

/// Opener used when no capture driver is linked in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOpener;

impl InterceptOpener for UnsupportedOpener {
    fn is_available(&self) -> bool {
        false
    }

    fn open(&self) -> io::Result<Arc<dyn PacketIntercept>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no packet intercept driver available",
        ))
    }
}

struct Drain {
    handle: Arc<dyn PacketIntercept>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl std::fmt::Debug for Drain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain")
            .field("stop", &self.stop.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Blocks traffic by capturing and discarding it.
#[derive(Debug)]
pub struct PacketFilterStrategy {
    opener: Box<dyn InterceptOpener>,
    drain: Option<Drain>,
    dropped: Arc<AtomicU64>,
}

impl PacketFilterStrategy {
    #[must_use]
    pub fn new(opener: Box<dyn InterceptOpener>) -> Self {
        Self {
            opener,
            drain: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Packets discarded since creation.
    #[must_use]
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn is_draining(&self) -> bool {
        self.drain.is_some()
    }

    fn drain_loop(handle: &dyn PacketIntercept, stop: &AtomicBool, dropped: &AtomicU64) {
        while !stop.load(Ordering::SeqCst) {
            match handle.recv() {
                Ok(_) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if !stop.load(Ordering::SeqCst) {
                        tracing::debug!(error = %e, "packet intercept receive failed");
                    }
                    break;
                }
            }
        }
    }
}

impl ConnectivityStrategy for PacketFilterStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PacketFilter
    }

    fn is_available(&self) -> bool {
        self.opener.is_available()
    }

    fn disconnect(&mut self) -> Result<(), ConnectivityError> {
        if self.drain.is_some() {
            return Ok(());
        }
        if !self.opener.is_available() {
            return Err(ConnectivityError::Unavailable {
                strategy: StrategyKind::PacketFilter.as_str(),
            });
        }

        let handle = self.opener.open().map_err(ConnectivityError::Intercept)?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let handle = Arc::clone(&handle);
            let stop = Arc::clone(&stop);
            let dropped = Arc::clone(&self.dropped);
            std::thread::Builder::new()
                .name("tether-drain".to_string())
                .spawn(move || Self::drain_loop(handle.as_ref(), &stop, &dropped))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                let _ = handle.close();
                return Err(ConnectivityError::Intercept(e));
            }
        };

        self.drain = Some(Drain {
            handle,
            stop,
            thread,
        });
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        let Some(drain) = self.drain.take() else {
            return Ok(());
        };
        drain.stop.store(true, Ordering::SeqCst);
        if let Err(e) = drain.handle.close() {
            drain.stop.store(false, Ordering::SeqCst);
            self.drain = Some(drain);
            return Err(ConnectivityError::Intercept(e));
        }
        if drain.thread.join().is_err() {
            tracing::warn!("packet drain thread panicked");
        }
        tracing::debug!(dropped = self.dropped_packets(), "packet drain stopped");
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.reconnect() {
            tracing::warn!(error = %e, "packet filter cleanup failed");
        }
    }
}

impl Drop for PacketFilterStrategy {
    fn drop(&mut self) {
        self.cleanup();
    }
}
