use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::SyncMode;
use crate::history::TwoWayProjection;
use crate::protocol::{
    IncomingMessage, IncomingRole, OutgoingAction, OutgoingMessage, OutgoingRole,
};

use super::{Link, SessionHandle, Site, SyncError, SyncReport};

/// Serve `site`'s log to the peer on the other end of `link`.
///
/// Runs until the session terminates: `Done` sent and received, or the
/// channel closed. Sending and receiving are multiplexed, so a full
/// outbound channel never stops this side from draining its inbound one.
///
/// # Errors
///
/// [`SyncError::Protocol`] when the peer violates the protocol and
/// [`SyncError::Cancelled`] when `handle` is cancelled. Either way the link
/// is dropped, which the peer observes as `Done`.
pub async fn run_incoming<P>(
    site: Site<P>,
    link: Link<IncomingMessage, OutgoingMessage>,
    mode: SyncMode,
    handle: SessionHandle,
) -> Result<SyncReport, SyncError>
where
    P: TwoWayProjection,
{
    let Link { tx, mut rx } = link;
    let mut revision = site.subscribe();
    let mut role = IncomingRole::new(mode);
    let mut outbox: VecDeque<IncomingMessage> =
        site.with_history(|history| role.start(history.log())).into();
    let mut report = SyncReport::default();
    let mut inbound_open = true;
    debug!(site = %site.id(), ?mode, "incoming session started");

    while !(role.is_terminated() && outbox.is_empty()) {
        tokio::select! {
            () = handle.cancelled() => {
                debug!(site = %site.id(), "incoming session cancelled");
                return Err(SyncError::Cancelled);
            }
            () = handle.finishing(), if !role.done_sent() => {
                outbox.extend(role.finish());
            }
            permit = tx.reserve(), if !outbox.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(message) = outbox.pop_front() {
                        report.record_sent(&message);
                        permit.send(message);
                    }
                }
                Err(_) => {
                    role.on_channel_closed();
                    outbox.clear();
                }
            },
            message = rx.recv(), if inbound_open => match message {
                Some(message) => {
                    report.messages += 1;
                    let replies = site.with_history(|history| role.on_message(message, history.log()));
                    match replies {
                        Ok(replies) => outbox.extend(replies),
                        Err(err) => {
                            warn!(site = %site.id(), error = %err, "protocol violation, closing session");
                            return Err(err.into());
                        }
                    }
                }
                None => {
                    inbound_open = false;
                    role.on_channel_closed();
                    outbox.clear();
                }
            },
            changed = revision.changed(), if !role.done_sent() => {
                if changed.is_ok() {
                    outbox.extend(site.with_history(|history| role.on_log_changed(history.log())));
                }
            }
        }
    }

    debug!(site = %site.id(), events = report.events_sent, "incoming session finished");
    Ok(report)
}

/// Request events from the peer on the other end of `link` and insert them
/// into `site`.
///
/// # Errors
///
/// [`SyncError::Protocol`] on a protocol violation, [`SyncError::History`]
/// when a received event cannot be inserted (for example, its payload does
/// not decode), [`SyncError::Cancelled`] when `handle` is cancelled.
pub async fn run_outgoing<P>(
    site: Site<P>,
    link: Link<OutgoingMessage, IncomingMessage>,
    batch: u32,
    handle: SessionHandle,
) -> Result<SyncReport, SyncError>
where
    P: TwoWayProjection,
{
    let Link { tx, mut rx } = link;
    let mut role = OutgoingRole::new(batch);
    let mut outbox: VecDeque<OutgoingMessage> = VecDeque::new();
    let mut report = SyncReport::default();
    let mut inbound_open = true;
    debug!(site = %site.id(), batch, "outgoing session started");

    while !(role.is_terminated() && outbox.is_empty()) {
        let actions = tokio::select! {
            () = handle.cancelled() => {
                debug!(site = %site.id(), "outgoing session cancelled");
                return Err(SyncError::Cancelled);
            }
            () = handle.finishing(), if !role.done_sent() => {
                role.finish()
            }
            permit = tx.reserve(), if !outbox.is_empty() => {
                match permit {
                    Ok(permit) => {
                        if let Some(message) = outbox.pop_front() {
                            report.messages += 1;
                            permit.send(message);
                        }
                    }
                    Err(_) => {
                        role.on_channel_closed();
                        outbox.clear();
                    }
                }
                Vec::new()
            }
            message = rx.recv(), if inbound_open => match message {
                Some(message) => {
                    report.messages += 1;
                    let replies = site.with_history(|history| role.on_message(message, history.log()));
                    match replies {
                        Ok(actions) => actions,
                        Err(err) => {
                            warn!(site = %site.id(), error = %err, "protocol violation, closing session");
                            return Err(err.into());
                        }
                    }
                }
                None => {
                    inbound_open = false;
                    role.on_channel_closed();
                    outbox.clear();
                    Vec::new()
                }
            },
        };

        for action in actions {
            match action {
                OutgoingAction::Send(message) => outbox.push_back(message),
                OutgoingAction::Insert {
                    seqno,
                    site: origin,
                    payload,
                } => {
                    if let Err(err) = site.insert(seqno, origin, &payload) {
                        warn!(
                            site = %site.id(),
                            %origin,
                            %seqno,
                            error = %err,
                            "received event rejected, closing session"
                        );
                        return Err(err.into());
                    }
                    report.record_received(payload.len());
                }
            }
        }
    }

    debug!(site = %site.id(), events = report.events_received, "outgoing session finished");
    Ok(report)
}
