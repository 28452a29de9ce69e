//! Async sync runtime.
//!
//! A pairwise sync between sites `a` and `b` runs two protocol sessions at
//! once, one per direction, each made of an incoming role on the serving
//! site and an outgoing role on the requesting site:
//!
//! ```text
//!   a: run_incoming ──IncomingMessage──▶ b: run_outgoing
//!   a: run_incoming ◀──OutgoingMessage── b: run_outgoing
//!   b: run_incoming ──IncomingMessage──▶ a: run_outgoing
//!   b: run_incoming ◀──OutgoingMessage── a: run_outgoing
//! ```
//!
//! That is four tasks over four bounded channels. Every driver keeps
//! receiving while it waits for channel capacity, so long chains of
//! pairwise syncs cannot deadlock on backpressure.

mod driver;
mod link;
mod site;

pub use driver::{run_incoming, run_outgoing};
pub use link::{Link, link_pair};
pub use site::{EventScope, Site};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::history::{HistoryError, TwoWayProjection};
use crate::protocol::{IncomingMessage, ProtocolError};

/// Errors that end a sync session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The peer violated the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A received event could not be inserted.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The session was cancelled.
    #[error("sync session cancelled")]
    Cancelled,

    /// The configuration cannot drive a session.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// A session task panicked or was aborted.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(err) => err.code(),
            Self::History(err) => err.code(),
            Self::Cancelled => ErrorCode::SessionCancelled,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::TaskFailed(_) => ErrorCode::InternalUnexpected,
        }
    }
}

/// Summary of one site's side of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events sent to the peer.
    pub events_sent: usize,
    /// Events received from the peer and inserted.
    pub events_received: usize,
    /// Payload bytes sent and received.
    pub bytes_transferred: usize,
    /// Protocol messages sent and received.
    pub messages: usize,
}

impl SyncReport {
    /// Returns `true` if no event moved in either direction.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.events_sent == 0 && self.events_received == 0
    }

    fn record_sent(&mut self, message: &IncomingMessage) {
        self.messages += 1;
        if let IncomingMessage::Event { payload, .. } = message {
            self.events_sent += 1;
            self.bytes_transferred += payload.len();
        }
    }

    const fn record_received(&mut self, payload_len: usize) {
        self.events_received += 1;
        self.bytes_transferred += payload_len;
    }

    fn absorb(&mut self, other: &Self) {
        self.events_sent += other.events_sent;
        self.events_received += other.events_received;
        self.bytes_transferred += other.bytes_transferred;
        self.messages += other.messages;
    }
}

/// Control over running sessions, shared by every task of a sync.
///
/// [`finish`](Self::finish) asks each role to send `Done` and drain what is
/// in flight; [`cancel`](Self::cancel) stops the tasks at their next
/// suspension point.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    finish: CancellationToken,
    cancel: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every role to finish cooperatively.
    pub fn finish(&self) {
        self.finish.cancel();
    }

    /// Stop every task immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn finishing(&self) {
        self.finish.cancelled().await;
    }

    async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Sync two sites until both sessions terminate.
///
/// Returns one report per site, `a`'s first. In [`SyncMode::Live`] this
/// only returns once the sessions are finished or cancelled through a
/// handle; use [`sync_with`] for that.
///
/// [`SyncMode::Live`]: crate::config::SyncMode::Live
///
/// # Errors
///
/// The first error of any of the four tasks.
pub async fn sync<P>(
    a: &Site<P>,
    b: &Site<P>,
    config: &SyncConfig,
) -> Result<(SyncReport, SyncReport), SyncError>
where
    P: TwoWayProjection + Send + 'static,
    P::Model: Send,
    P::Change: Send,
{
    sync_with(a, b, config, SessionHandle::new()).await
}

/// [`sync`] driven by a caller-held [`SessionHandle`].
///
/// # Errors
///
/// The first error of any of the four tasks.
pub async fn sync_with<P>(
    a: &Site<P>,
    b: &Site<P>,
    config: &SyncConfig,
    handle: SessionHandle,
) -> Result<(SyncReport, SyncReport), SyncError>
where
    P: TwoWayProjection + Send + 'static,
    P::Model: Send,
    P::Change: Send,
{
    config
        .validate()
        .map_err(|err| SyncError::InvalidConfig(format!("{err:#}")))?;
    debug!(a = %a.id(), b = %b.id(), mode = ?config.mode, "sync starting");

    let (a_serves, b_requests) = link_pair(config.channel_capacity);
    let (b_serves, a_requests) = link_pair(config.channel_capacity);

    let a_in = tokio::spawn(run_incoming(a.clone(), a_serves, config.mode, handle.clone()));
    let b_out = tokio::spawn(run_outgoing(b.clone(), b_requests, config.request_batch, handle.clone()));
    let b_in = tokio::spawn(run_incoming(b.clone(), b_serves, config.mode, handle.clone()));
    let a_out = tokio::spawn(run_outgoing(a.clone(), a_requests, config.request_batch, handle));

    let (a_in, b_out, b_in, a_out) = tokio::join!(a_in, b_out, b_in, a_out);
    let mut first_error = None;
    let mut reports = [SyncReport::default(), SyncReport::default()];
    for (slot, joined) in [(0, a_in), (1, b_out), (1, b_in), (0, a_out)] {
        match joined {
            Ok(Ok(report)) => reports[slot].absorb(&report),
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(err) => {
                first_error.get_or_insert(SyncError::TaskFailed(err.to_string()));
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let [a_report, b_report] = reports;
    debug!(
        a = %a.id(),
        b = %b.id(),
        a_received = a_report.events_received,
        b_received = b_report.events_received,
        "sync finished"
    );
    Ok((a_report, b_report))
}
