//! Per-connection viewer session state.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use livechat_common::id::{prefix, prefixed_ulid};

use crate::auth::tokens::Identity;

/// Lifecycle of a viewer connection.
///
/// `Connecting` until the registry admits it, `Open` while registered,
/// `Closing` once either side starts tearing it down, `Closed` after it has
/// left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// State for a single WebSocket connection.
#[derive(Debug)]
pub struct ViewerSession {
    /// Unique session identifier (`vs_` prefixed ULID).
    pub session_id: String,
    /// Network address the connection came from.
    pub ip_address: String,
    /// Identity attached at connect time by the auth boundary, if any.
    pub identity: Option<Identity>,
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
}

impl ViewerSession {
    pub fn new(ip_address: String, identity: Option<Identity>) -> Self {
        Self {
            session_id: prefixed_ulid(prefix::VIEWER_SESSION),
            ip_address,
            identity,
            connected_at: Utc::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    /// Whether this session receives the IP-enriched view of comments.
    pub fn is_admin(&self) -> bool {
        self.identity.as_ref().is_some_and(|i| i.is_admin())
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting → Open`. Returns `false` if the session was not connecting.
    pub fn mark_open(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// `Connecting | Open → Closing`. Returns `false` if already closing or closed.
    pub fn begin_close(&self) -> bool {
        self.transition(SessionState::Open, SessionState::Closing)
            || self.transition(SessionState::Connecting, SessionState::Closing)
    }

    /// Any state `→ Closed`.
    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::Role;

    #[test]
    fn lifecycle_moves_forward_only() {
        let s = ViewerSession::new("1.1.1.1".into(), None);
        assert!(s.session_id.starts_with("vs_"));
        assert_eq!(s.state(), SessionState::Connecting);

        assert!(s.mark_open());
        assert!(!s.mark_open());
        assert_eq!(s.state(), SessionState::Open);

        assert!(s.begin_close());
        assert!(!s.begin_close());
        assert_eq!(s.state(), SessionState::Closing);

        s.mark_closed();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.mark_open());
    }

    #[test]
    fn rejected_session_can_close_from_connecting() {
        let s = ViewerSession::new("1.1.1.1".into(), None);
        assert!(s.begin_close());
        assert_eq!(s.state(), SessionState::Closing);
    }

    #[test]
    fn only_admin_role_is_admin() {
        let viewer = ViewerSession::new(
            "1.1.1.1".into(),
            Some(Identity {
                subject: "bob".into(),
                role: Role::User,
            }),
        );
        assert!(!viewer.is_admin());

        let admin = ViewerSession::new(
            "1.1.1.1".into(),
            Some(Identity {
                subject: "alice".into(),
                role: Role::Admin,
            }),
        );
        assert!(admin.is_admin());
    }
}
