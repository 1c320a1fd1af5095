//! Transport fault classification and escape points
//!
//! Every blocking transport call returns `Result<T, Fault>`. Transient
//! faults are retried by the framing layer and never leave it; a fatal
//! fault is propagated with `?` up to the innermost armed [`EscapePoint`],
//! which invalidates the session transport and turns the fault into a plain
//! `Option`/`bool` outcome for its caller.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// A failed transport operation
#[derive(Error, Debug)]
pub enum Fault {
    /// Interrupted or would-block; the operation can simply be reissued
    #[error("transient transport fault: {0}")]
    Transient(#[source] io::Error),

    /// The peer is gone or the stream is unusable; abandon the operation
    #[error("fatal transport fault: {0}")]
    Fatal(#[source] io::Error),
}

impl Fault {
    /// Classify an IO error coming off a socket
    pub fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Fault::Transient(err),
            _ => Fault::Fatal(err),
        }
    }

    /// The peer closed its end in the middle of an exchange
    pub fn closed() -> Self {
        Fault::Fatal(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))
    }

    /// The peer sent something that cannot be part of the protocol
    pub fn protocol(message: impl Into<String>) -> Self {
        Fault::Fatal(io::Error::new(io::ErrorKind::InvalidData, message.into()))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Fatal(_))
    }

    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Fault::Transient(e) | Fault::Fatal(e) => e.kind(),
        }
    }
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        Fault::classify(err)
    }
}

/// Something an escape point can disable after a fatal fault
pub trait Invalidate {
    /// Drop the transport so later sends become no-ops
    fn invalidate(&mut self);
}

/// Per-process stack of armed escape points
#[derive(Debug, Clone, Default)]
pub struct FaultHandler {
    points: Arc<Mutex<Vec<&'static str>>>,
}

impl FaultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a new innermost escape point; the previous one is restored when
    /// the returned guard is dropped
    pub fn arm(&self, label: &'static str) -> EscapePoint {
        let mut points = self.points.lock();
        points.push(label);
        tracing::trace!(escape_point = label, depth = points.len(), "Armed escape point");

        EscapePoint {
            points: Arc::clone(&self.points),
            depth: points.len(),
            label,
        }
    }

    /// Label of the innermost armed escape point
    pub fn innermost(&self) -> Option<&'static str> {
        self.points.lock().last().copied()
    }

    /// Number of escape points currently armed
    pub fn depth(&self) -> usize {
        self.points.lock().len()
    }
}

/// An armed escape point; see [`FaultHandler::arm`]
#[must_use = "an escape point is disarmed as soon as it is dropped"]
#[derive(Debug)]
pub struct EscapePoint {
    points: Arc<Mutex<Vec<&'static str>>>,
    depth: usize,
    label: &'static str,
}

impl EscapePoint {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Land the outcome of a guarded region
    ///
    /// A fatal fault invalidates `transport` and yields `None`. A transient
    /// fault that reached this far is treated the same way: the operation
    /// it interrupted was already abandoned.
    pub fn settle<T, I: Invalidate + ?Sized>(
        &self,
        transport: &mut I,
        outcome: Result<T, Fault>,
    ) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(fault) => {
                if fault.kind() != io::ErrorKind::BrokenPipe {
                    tracing::error!(escape_point = self.label, "{}", fault);
                } else {
                    tracing::debug!(escape_point = self.label, "Peer went away");
                }
                transport.invalidate();
                None
            }
        }
    }
}

impl Drop for EscapePoint {
    fn drop(&mut self) {
        let mut points = self.points.lock();
        points.truncate(self.depth.saturating_sub(1));
        tracing::trace!(escape_point = self.label, depth = points.len(), "Restored escape point");
    }
}
