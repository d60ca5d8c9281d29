//! Registry of live viewer sessions and their outbound queues.
//!
//! Admission and forced disconnection both run under one gate, so a session
//! from an IP that is being blocked is either swept by the disconnect or
//! rejected by the block-list check in `register`. Never both missed.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::ChatError;
use crate::moderation::ModerationRegistry;

use super::events::CloseReason;
use super::session::ViewerSession;

/// A pre-rendered frame queued for one session.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub text: Utf8Bytes,
    /// Set on COMMENT_CREATE frames so a session can skip comments it
    /// already received as history.
    pub comment_id: Option<i64>,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session's queue is at capacity.
    Full,
    /// The session loop has already exited.
    Closed,
}

/// The registry's handle on one session: its metadata plus the sending
/// halves of its outbound queue and termination signal.
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<ViewerSession>,
    outbound: mpsc::Sender<Outbound>,
    terminate: Arc<watch::Sender<Option<CloseReason>>>,
}

/// The session loop's side of a [`SessionHandle`].
pub struct SessionOutlet {
    pub frames: mpsc::Receiver<Outbound>,
    pub termination: Termination,
}

/// Receiving half of a session's close request.
pub struct Termination(watch::Receiver<Option<CloseReason>>);

impl SessionHandle {
    /// Create a handle with a queue of `capacity` frames.
    pub fn channel(session: Arc<ViewerSession>, capacity: usize) -> (Self, SessionOutlet) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (term_tx, term_rx) = watch::channel(None);
        (
            Self {
                session,
                outbound: tx,
                terminate: Arc::new(term_tx),
            },
            SessionOutlet {
                frames: rx,
                termination: Termination(term_rx),
            },
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: Outbound) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the session loop to flush what it has queued and close.
    pub fn terminate(&self, reason: CloseReason) {
        self.session.begin_close();
        self.terminate.send_replace(Some(reason));
    }
}

impl Termination {
    /// Resolves once the session has been told to close.
    ///
    /// Never resolves if the handle is dropped without a reason; the frame
    /// queue closing covers that case.
    pub async fn requested(&mut self) -> CloseReason {
        loop {
            if let Some(reason) = *self.0.borrow_and_update() {
                return reason;
            }
            if self.0.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// All currently open viewer sessions, keyed by session id.
pub struct ConnectionRegistry {
    sessions: DashMap<String, SessionHandle>,
    moderation: Arc<ModerationRegistry>,
    admission: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new(moderation: Arc<ModerationRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            moderation,
            admission: Mutex::new(()),
        }
    }

    /// Admit a session. Fails with [`ChatError::Blocked`] if its IP is blocked.
    pub fn register(&self, handle: SessionHandle) -> Result<(), ChatError> {
        let _gate = self.admission.lock();
        if self.moderation.is_blocked(&handle.session.ip_address) {
            return Err(ChatError::Blocked);
        }
        handle.session.mark_open();
        self.sessions.insert(handle.session.session_id.clone(), handle);
        Ok(())
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn unregister(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Visit every session. Iterates over a snapshot, so `f` may freely call
    /// back into the registry.
    pub fn for_each_session(&self, mut f: impl FnMut(&SessionHandle)) {
        let snapshot: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for handle in &snapshot {
            f(handle);
        }
    }

    /// Remove every session from `ip`, queue `notice` for each (best effort)
    /// and tell them to close. Returns the removed sessions.
    pub fn forcibly_disconnect(
        &self,
        ip: &str,
        reason: CloseReason,
        notice: Option<Outbound>,
    ) -> Vec<SessionHandle> {
        let _gate = self.admission.lock();

        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().session.ip_address == ip)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.sessions.remove(&id) {
                if let Some(frame) = &notice {
                    if let Err(e) = handle.try_deliver(frame.clone()) {
                        tracing::debug!(
                            session_id = %handle.session_id(),
                            error = ?e,
                            "close notice not queued"
                        );
                    }
                }
                handle.terminate(reason);
                removed.push(handle);
            }
        }
        removed
    }
}
