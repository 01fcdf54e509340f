//! Generic user activity signal.
//!
//! The session only needs to know that something happened and when. Where
//! the ticks come from (pointer, keyboard, a terminal) is up to the caller.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// Kind of physical input that produced a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Pointer,
    Key,
    Click,
    Scroll,
    Other,
}

/// "The user did something at `at`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTick {
    pub kind: ActivityKind,
    pub at: Instant,
}

impl ActivityTick {
    pub fn new(kind: ActivityKind, at: Instant) -> Self {
        Self { kind, at }
    }

    /// A tick stamped with the current time.
    pub fn now(kind: ActivityKind) -> Self {
        Self::new(kind, Instant::now())
    }
}

/// Producer side of an activity stream.
#[derive(Debug, Clone)]
pub struct ActivitySender {
    tx: mpsc::Sender<ActivityTick>,
}

impl ActivitySender {
    /// Record an activity tick.
    ///
    /// Ticks are dropped when the buffer is full; one tick per burst is
    /// enough to keep the session awake. Returns false once the session is
    /// gone.
    pub fn record(&self, kind: ActivityKind) -> bool {
        match self.tx.try_send(ActivityTick::now(kind)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Create a bounded activity channel to pass to [`crate::CaseSession::spawn`].
pub fn activity_channel(capacity: usize) -> (ActivitySender, ReceiverStream<ActivityTick>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ActivitySender { tx }, ReceiverStream::new(rx))
}
