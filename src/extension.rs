//! Extension channel (component C): the single privileged `/extension`
//! socket, request-id allocation, and the pending-request table.
//!
//! The pending table is the central concurrency primitive (see design
//! notes): allocation is a monotonic counter, and every entry is either
//! bound to a client (the response must be rewritten and delivered in
//! the extension reader loop's own sequential order, so that responses
//! never reorder relative to events for the same session) or a bare
//! one-shot waiter for the relay's own control-plane calls (recording
//! start/stop/cancel, which carry no session-ordering requirement).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tracing::warn;

use crate::error::{Error, Result};
use crate::wire::Envelope;

/// A frame queued for delivery to the extension's writer task.
#[derive(Debug, Clone)]
pub enum ExtensionFrame {
    Text(String),
    Close { code: u16, reason: String },
}

enum PendingKind {
    ClientBound {
        client_id: String,
        orig_id: u64,
        session_id: Option<String>,
    },
    Oneshot(oneshot::Sender<Result<Value>>),
}

struct PendingEntry {
    method: String,
    deadline: Instant,
    kind: PendingKind,
}

/// What happened when an extension response frame was matched against
/// the pending table.
pub enum Resolution {
    /// Resolved a control-plane [`ExtensionLink::send_control`] waiter.
    Delivered,
    /// A client command's response — the caller must rewrite `id` is
    /// already done; deliver `envelope` to `client_id`.
    ToClient { client_id: String, envelope: Envelope },
    /// No pending entry for this id (late response after timeout, or a
    /// bogus id from a misbehaving extension).
    Unknown,
}

/// An expired entry reaped by [`ExtensionLink::sweep_expired`], already
/// resolved if it was a control-plane waiter; if it was client-bound the
/// caller must still deliver the timeout error.
pub enum Expired {
    ClientBound { client_id: String, orig_id: u64, session_id: Option<String> },
}

struct Bound {
    tx: mpsc::UnboundedSender<ExtensionFrame>,
    connected_at: Instant,
    generation: u64,
}

/// The singleton link to the extension.
pub struct ExtensionLink {
    bound: RwLock<Option<Bound>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    pending: DashMap<u64, PendingEntry>,
    command_timeout: Duration,
    missed_pongs: AtomicU32,
    connected: Notify,
}

impl ExtensionLink {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            bound: RwLock::new(None),
            next_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            pending: DashMap::new(),
            command_timeout,
            missed_pongs: AtomicU32::new(0),
            connected: Notify::new(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.bound.read().await.is_some()
    }

    /// Wait for the extension to (re)connect, up to `timeout`. Used under
    /// `QueueWithGracePeriod` to hold a client command open for one grace
    /// interval rather than failing it the instant the link happens to be
    /// idle.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let notified = self.connected.notified();
        if self.is_connected().await {
            return true;
        }
        tokio::select! {
            _ = notified => self.is_connected().await,
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    /// Bind a newly accepted `/extension` socket, replacing any existing
    /// one. Returns the new binding's generation and every client-bound
    /// request that was in flight on the replaced socket (the caller
    /// must deliver an `ExtensionReplaced` error for each to its client;
    /// control-plane waiters are resolved here directly).
    pub async fn bind(
        &self,
        tx: mpsc::UnboundedSender<ExtensionFrame>,
    ) -> (u64, Vec<(String, u64, Option<String>)>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut bound = self.bound.write().await;
        let mut orphaned = Vec::new();
        if let Some(previous) = bound.take() {
            warn!("extension connection replaced by a new one");
            let _ = previous.tx.send(ExtensionFrame::Close {
                code: crate::wire::CLOSE_NORMAL,
                reason: "replaced by new extension connection".to_string(),
            });
            orphaned = self.fail_all_pending(Error::ExtensionReplaced);
        }
        *bound = Some(Bound {
            tx,
            connected_at: Instant::now(),
            generation,
        });
        self.missed_pongs.store(0, Ordering::SeqCst);
        drop(bound);
        self.connected.notify_waiters();
        (generation, orphaned)
    }

    /// Unbind the socket identified by `generation` (a no-op if it was
    /// already replaced) and return every client-bound request that was
    /// in flight for the caller to fail with `ExtensionUnavailable`.
    pub async fn unbind(&self, generation: u64) -> Vec<(String, u64, Option<String>)> {
        let mut bound = self.bound.write().await;
        let still_current = matches!(&*bound, Some(b) if b.generation == generation);
        if still_current {
            *bound = None;
            self.fail_all_pending(Error::ExtensionUnavailable)
        } else {
            Vec::new()
        }
    }

    fn fail_all_pending(&self, err: Error) -> Vec<(String, u64, Option<String>)> {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut orphaned = Vec::new();
        for id in ids {
            let Some((_, entry)) = self.pending.remove(&id) else {
                continue;
            };
            match entry.kind {
                PendingKind::Oneshot(responder) => {
                    let _ = responder.send(Err(clone_err(&err)));
                }
                PendingKind::ClientBound {
                    client_id,
                    orig_id,
                    session_id,
                } => orphaned.push((client_id, orig_id, session_id)),
            }
        }
        orphaned
    }

    /// Forward a client's CDP command to the extension under a freshly
    /// allocated extension-visible id. Returns immediately with
    /// `ExtensionUnavailable` if no extension is bound; otherwise writes
    /// the frame and registers the pending entry, leaving the response
    /// to be delivered later from the extension reader loop via
    /// [`ExtensionLink::resolve`].
    pub async fn dispatch_to_client(
        &self,
        client_id: String,
        orig_id: u64,
        method: &str,
        params: Value,
        client_session_id: Option<String>,
        ext_session_tag: Option<String>,
    ) -> Result<()> {
        let tx = {
            let bound = self.bound.read().await;
            match bound.as_ref() {
                Some(b) => b.tx.clone(),
                None => return Err(Error::ExtensionUnavailable),
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                deadline: Instant::now() + self.command_timeout,
                kind: PendingKind::ClientBound {
                    client_id,
                    orig_id,
                    session_id: client_session_id,
                },
            },
        );
        let envelope = Envelope::command(id, method, params).with_session(ext_session_tag);
        let text = envelope.to_text()?;
        if tx.send(ExtensionFrame::Text(text)).is_err() {
            self.pending.remove(&id);
            return Err(Error::ExtensionUnavailable);
        }
        Ok(())
    }

    /// Issue a control-plane command (recording start/stop/cancel/status)
    /// that carries no CDP session-ordering requirement, and await its
    /// response directly.
    pub async fn send_control(&self, method: &str, params: Value) -> Result<Value> {
        let tx = {
            let bound = self.bound.read().await;
            match bound.as_ref() {
                Some(b) => b.tx.clone(),
                None => return Err(Error::ExtensionUnavailable),
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (responder, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                deadline: Instant::now() + self.command_timeout,
                kind: PendingKind::Oneshot(responder),
            },
        );
        let envelope = Envelope::command(id, method, params);
        let text = envelope.to_text()?;
        if tx.send(ExtensionFrame::Text(text)).is_err() {
            self.pending.remove(&id);
            return Err(Error::ExtensionUnavailable);
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::internal("control response channel dropped")))
    }

    /// Resolve an inbound extension response frame against the pending
    /// table.
    pub fn resolve(&self, id: u64, result: Option<Value>, error: Option<Value>) -> Resolution {
        let Some((_, entry)) = self.pending.remove(&id) else {
            return Resolution::Unknown;
        };
        match entry.kind {
            PendingKind::Oneshot(responder) => {
                let outcome = match error {
                    Some(err) => Err(Error::protocol(format!("{} failed: {err}", entry.method))),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = responder.send(outcome);
                Resolution::Delivered
            }
            PendingKind::ClientBound {
                client_id,
                orig_id,
                session_id,
            } => {
                let envelope = match error {
                    Some(err) => Envelope::error(orig_id, err),
                    None => Envelope::result(orig_id, result.unwrap_or(Value::Null)),
                }
                .with_session(session_id);
                Resolution::ToClient { client_id, envelope }
            }
        }
    }

    /// Drain every pending entry whose deadline has passed. Control-plane
    /// waiters are resolved with a timeout error here; client-bound ones
    /// are returned for the caller to deliver (it needs the client
    /// registry, which this type does not hold).
    pub fn sweep_expired(&self) -> Vec<Expired> {
        let now = Instant::now();
        let expired_ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();
        let mut out = Vec::new();
        for id in expired_ids {
            let Some((_, entry)) = self.pending.remove(&id) else {
                continue;
            };
            match entry.kind {
                PendingKind::Oneshot(responder) => {
                    let _ = responder.send(Err(Error::timeout(entry.method)));
                }
                PendingKind::ClientBound {
                    client_id,
                    orig_id,
                    session_id,
                } => out.push(Expired::ClientBound {
                    client_id,
                    orig_id,
                    session_id,
                }),
            }
        }
        out
    }

    pub fn note_ping_sent(&self) -> u32 {
        self.missed_pongs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_pong(&self) {
        self.missed_pongs.store(0, Ordering::SeqCst);
    }

    pub async fn connected_since(&self) -> Option<Instant> {
        self.bound.read().await.as_ref().map(|b| b.connected_at)
    }

    /// Close the bound extension socket, if any, with a normal close
    /// code. Called last in the relay's shutdown sequence, after every
    /// client has already been notified and closed.
    pub async fn close(&self, reason: impl Into<String>) {
        let bound = self.bound.read().await;
        if let Some(b) = bound.as_ref() {
            let _ = b.tx.send(ExtensionFrame::Close {
                code: crate::wire::CLOSE_NORMAL,
                reason: reason.into(),
            });
        }
    }
}

fn clone_err(err: &Error) -> Error {
    match err {
        Error::ExtensionReplaced => Error::ExtensionReplaced,
        Error::ExtensionUnavailable => Error::ExtensionUnavailable,
        other => Error::internal(other.to_string()),
    }
}
