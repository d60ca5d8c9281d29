//! Broadcast hub: the single point through which every event reaches viewers.
//!
//! All connects, disconnects and published events go through one command
//! queue drained by one worker task, so every session observes events in the
//! same order they were published. Each event is rendered once per view
//! (public and admin) and the rendered frame is queued on every session
//! without waiting. A session whose queue is full is dropped rather than
//! allowed to hold anyone else back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::error::ChatError;
use crate::models::comment::{Comment, PublicComment};
use crate::models::match_info::MatchInfo;

use super::events::{CloseReason, EventName, GatewayMessage};
use super::presence::ViewerCountCoalescer;
use super::registry::{ConnectionRegistry, DeliveryError, Outbound, SessionHandle};

/// Lower bound for the viewer-count timer; `tokio::time::interval` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Something every connected viewer should hear about.
#[derive(Debug, Clone)]
pub enum HubEvent {
    CommentAdded(Comment),
    CommentDeleted { comment_id: i64 },
    IpBlocked { ip_address: String },
    ChannelStatus { active: bool },
    /// `None` clears the match from viewers' screens.
    MatchInfo(Option<MatchInfo>),
}

enum Command {
    Connect {
        handle: SessionHandle,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Disconnect {
        session_id: String,
    },
    Publish(HubEvent),
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub viewer_count_interval: Duration,
}

/// Cloneable front end to the hub worker. Store in AppState.
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastHub {
    /// Start the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(registry: Arc<ConnectionRegistry>, settings: HubSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = HubWorker {
            registry: registry.clone(),
            coalescer: ViewerCountCoalescer::new(settings.viewer_count_interval),
            seq: 0,
        };
        tokio::spawn(worker.run(rx, settings.viewer_count_interval.max(MIN_TICK)));
        Self {
            commands: tx,
            registry,
        }
    }

    /// Register a session. Resolves once it is admitted, after which it
    /// receives every subsequently published event.
    pub async fn connect(&self, handle: SessionHandle) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { handle, reply })
            .map_err(|_| ChatError::Storage("broadcast hub stopped".to_string()))?;
        rx.await
            .map_err(|_| ChatError::Storage("broadcast hub stopped".to_string()))?
    }

    /// Unregister a session. Idempotent.
    pub fn disconnect(&self, session_id: &str) {
        let _ = self.commands.send(Command::Disconnect {
            session_id: session_id.to_string(),
        });
    }

    /// Queue an event for fan-out. Never blocks.
    pub fn publish(&self, event: HubEvent) {
        if self.commands.send(Command::Publish(event)).is_err() {
            tracing::error!("broadcast hub stopped; event dropped");
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.registry.count()
    }
}

/// A frame rendered for both audiences.
struct Rendered {
    public: Outbound,
    admin: Outbound,
}

impl Rendered {
    fn same(frame: Outbound) -> Self {
        Self {
            public: frame.clone(),
            admin: frame,
        }
    }
}

struct HubWorker {
    registry: Arc<ConnectionRegistry>,
    coalescer: ViewerCountCoalescer,
    seq: u64,
}

impl HubWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, tick: Duration) {
        let mut timer = time::interval(tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = timer.tick() => {}
            }
            self.flush_viewer_count(Instant::now());
        }

        tracing::debug!("broadcast hub stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { handle, reply } => {
                let session_id = handle.session_id().to_string();
                let result = self.registry.register(handle);
                if result.is_ok() {
                    self.coalescer.mark_changed();
                    tracing::debug!(%session_id, viewers = self.registry.count(), "session registered");
                }
                // The connecting task may have given up; nothing to undo then,
                // its own disconnect follows.
                let _ = reply.send(result);
            }
            Command::Disconnect { session_id } => {
                if let Some(handle) = self.registry.unregister(&session_id) {
                    handle.session.mark_closed();
                    self.coalescer.mark_changed();
                    tracing::debug!(%session_id, viewers = self.registry.count(), "session unregistered");
                }
            }
            Command::Publish(event) => self.fan_out(event),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn fan_out(&mut self, event: HubEvent) {
        match event {
            HubEvent::CommentAdded(comment) => {
                let seq = self.next_seq();
                let public = GatewayMessage::dispatch(
                    EventName::COMMENT_CREATE,
                    Some(seq),
                    json!(PublicComment::from(&comment)),
                );
                let admin =
                    GatewayMessage::dispatch(EventName::COMMENT_CREATE, Some(seq), json!(comment));
                self.deliver(Rendered {
                    public: Outbound {
                        text: public.to_text(),
                        comment_id: Some(comment.id),
                    },
                    admin: Outbound {
                        text: admin.to_text(),
                        comment_id: Some(comment.id),
                    },
                });
            }
            HubEvent::CommentDeleted { comment_id } => {
                let seq = self.next_seq();
                let msg = GatewayMessage::dispatch(
                    EventName::COMMENT_DELETE,
                    Some(seq),
                    json!({ "comment_id": comment_id }),
                );
                self.deliver(Rendered::same(Outbound {
                    text: msg.to_text(),
                    comment_id: None,
                }));
            }
            HubEvent::ChannelStatus { active } => {
                let seq = self.next_seq();
                let msg = GatewayMessage::dispatch(
                    EventName::CHANNEL_STATUS,
                    Some(seq),
                    json!({ "active": active }),
                );
                self.deliver(Rendered::same(Outbound {
                    text: msg.to_text(),
                    comment_id: None,
                }));
            }
            HubEvent::MatchInfo(info) => {
                let seq = self.next_seq();
                let action = if info.is_some() { "update" } else { "clear" };
                let msg = GatewayMessage::dispatch(
                    EventName::MATCH_INFO,
                    Some(seq),
                    json!({ "action": action, "match_info": info }),
                );
                self.deliver(Rendered::same(Outbound {
                    text: msg.to_text(),
                    comment_id: None,
                }));
            }
            HubEvent::IpBlocked { ip_address } => {
                let notice = GatewayMessage::dispatch(
                    EventName::IP_BLOCKED,
                    None,
                    json!({ "message": "You can no longer take part in this chat" }),
                );
                let removed = self.registry.forcibly_disconnect(
                    &ip_address,
                    CloseReason::BLOCKED,
                    Some(Outbound {
                        text: notice.to_text(),
                        comment_id: None,
                    }),
                );
                if !removed.is_empty() {
                    self.coalescer.mark_changed();
                    tracing::info!(ip = %ip_address, sessions = removed.len(), "blocked sessions disconnected");
                }
            }
        }
    }

    fn flush_viewer_count(&mut self, now: Instant) {
        let current = self.registry.count();
        if let Some(count) = self.coalescer.poll(now, current) {
            let seq = self.next_seq();
            let msg =
                GatewayMessage::dispatch(EventName::VIEWER_COUNT, Some(seq), json!({ "count": count }));
            self.deliver(Rendered::same(Outbound {
                text: msg.to_text(),
                comment_id: None,
            }));
        }
    }

    /// Queue `rendered` on every session, dropping the ones that cannot keep up.
    fn deliver(&mut self, rendered: Rendered) {
        let mut dropped: Vec<(SessionHandle, DeliveryError)> = Vec::new();

        self.registry.for_each_session(|handle| {
            let frame = if handle.session.is_admin() {
                &rendered.admin
            } else {
                &rendered.public
            };
            if let Err(e) = handle.try_deliver(frame.clone()) {
                dropped.push((handle.clone(), e));
            }
        });

        for (handle, err) in dropped {
            if self.registry.unregister(handle.session_id()).is_none() {
                continue;
            }
            self.coalescer.mark_changed();
            match err {
                DeliveryError::Full => {
                    tracing::warn!(
                        session_id = %handle.session_id(),
                        ip = %handle.session.ip_address,
                        "session queue full; dropping slow consumer"
                    );
                    handle.terminate(CloseReason::SLOW_CONSUMER);
                }
                DeliveryError::Closed => {
                    handle.session.mark_closed();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::{Identity, Role};
    use crate::db::blocked_ips::MemoryBlockList;
    use crate::gateway::registry::SessionOutlet;
    use crate::gateway::session::ViewerSession;
    use crate::models::comment::CommentDraft;
    use crate::moderation::ModerationRegistry;
    use chrono::Utc;
    use serde_json::Value;

    struct Harness {
        hub: BroadcastHub,
        moderation: Arc<ModerationRegistry>,
    }

    fn harness(interval: Duration) -> Harness {
        let moderation = Arc::new(ModerationRegistry::new(Arc::new(MemoryBlockList::new())));
        let registry = Arc::new(ConnectionRegistry::new(moderation.clone()));
        let hub = BroadcastHub::spawn(
            registry,
            HubSettings {
                viewer_count_interval: interval,
            },
        );
        Harness { hub, moderation }
    }

    async fn join(hub: &BroadcastHub, ip: &str, admin: bool, capacity: usize) -> SessionOutlet {
        let identity = admin.then(|| Identity {
            subject: "mod".into(),
            role: Role::Admin,
        });
        let session = Arc::new(ViewerSession::new(ip.to_string(), identity));
        let (handle, outlet) = SessionHandle::channel(session, capacity);
        hub.connect(handle).await.unwrap();
        outlet
    }

    fn comment(id: i64, ip: &str) -> Comment {
        CommentDraft {
            display_name: "An".into(),
            content: format!("comment {id}"),
            parent_id: None,
            reply_to: None,
            ip_address: ip.into(),
            is_admin: false,
            admin_identity: None,
        }
        .into_comment(id, Utc::now())
    }

    /// Next frame with the given event name, skipping others (viewer counts).
    async fn next_event(outlet: &mut SessionOutlet, name: &str) -> Value {
        loop {
            let frame = time::timeout(Duration::from_secs(2), outlet.frames.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("queue closed");
            let v: Value = serde_json::from_str(frame.text.as_str()).unwrap();
            if v["t"] == name {
                return v;
            }
        }
    }

    #[tokio::test]
    async fn every_session_sees_the_same_order() {
        let h = harness(Duration::from_secs(60));
        let mut a = join(&h.hub, "1.1.1.1", false, 512).await;
        let mut b = join(&h.hub, "2.2.2.2", false, 512).await;

        for id in 1..=100 {
            h.hub.publish(HubEvent::CommentAdded(comment(id, "3.3.3.3")));
        }

        for outlet in [&mut a, &mut b] {
            let mut last_seq = 0;
            for id in 1..=100 {
                let v = next_event(outlet, EventName::COMMENT_CREATE).await;
                assert_eq!(v["d"]["id"], id);
                let seq = v["s"].as_u64().unwrap();
                assert!(seq > last_seq);
                last_seq = seq;
            }
        }
    }

    #[tokio::test]
    async fn only_admins_see_sender_ip() {
        let h = harness(Duration::from_secs(60));
        let mut viewer = join(&h.hub, "1.1.1.1", false, 16).await;
        let mut admin = join(&h.hub, "2.2.2.2", true, 16).await;

        h.hub.publish(HubEvent::CommentAdded(comment(7, "9.9.9.9")));

        let v = next_event(&mut viewer, EventName::COMMENT_CREATE).await;
        assert!(v["d"].get("ip_address").is_none());
        let a = next_event(&mut admin, EventName::COMMENT_CREATE).await;
        assert_eq!(a["d"]["ip_address"], "9.9.9.9");
        assert_eq!(v["s"], a["s"]);
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_without_stalling_others() {
        let h = harness(Duration::from_secs(60));
        let mut slow = join(&h.hub, "1.1.1.1", false, 2).await;
        let mut fast = join(&h.hub, "2.2.2.2", false, 64).await;

        for id in 1..=10 {
            h.hub.publish(HubEvent::CommentAdded(comment(id, "3.3.3.3")));
        }

        for id in 1..=10 {
            let v = next_event(&mut fast, EventName::COMMENT_CREATE).await;
            assert_eq!(v["d"]["id"], id);
        }

        let reason = time::timeout(Duration::from_secs(2), slow.termination.requested())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::SLOW_CONSUMER);
        assert_eq!(h.hub.viewer_count(), 1);
    }

    #[tokio::test]
    async fn ip_block_disconnects_matching_sessions_only() {
        let h = harness(Duration::from_secs(60));
        let mut blocked = join(&h.hub, "6.6.6.6", false, 16).await;
        let mut other = join(&h.hub, "7.7.7.7", false, 16).await;

        h.moderation.block("6.6.6.6", "spam", "mod").await.unwrap();
        h.hub.publish(HubEvent::IpBlocked {
            ip_address: "6.6.6.6".into(),
        });
        h.hub.publish(HubEvent::CommentDeleted { comment_id: 1 });

        next_event(&mut blocked, EventName::IP_BLOCKED).await;
        assert_eq!(blocked.termination.requested().await, CloseReason::BLOCKED);
        next_event(&mut other, EventName::COMMENT_DELETE).await;

        // Reconnecting from the blocked IP is refused.
        let session = Arc::new(ViewerSession::new("6.6.6.6".into(), None));
        let (handle, _outlet) = SessionHandle::channel(session, 4);
        assert!(matches!(h.hub.connect(handle).await, Err(ChatError::Blocked)));
        assert_eq!(h.hub.viewer_count(), 1);
    }

    #[tokio::test]
    async fn match_info_reaches_every_audience_in_sequence() {
        let h = harness(Duration::from_secs(60));
        let mut viewer = join(&h.hub, "1.1.1.1", false, 16).await;
        let mut admin = join(&h.hub, "2.2.2.2", true, 16).await;

        h.hub.publish(HubEvent::MatchInfo(Some(MatchInfo {
            match_number: 3,
            red_weight: 61.5,
            blue_weight: 60.0,
            updated_at: Utc::now(),
            updated_by: "mod".into(),
        })));
        h.hub.publish(HubEvent::MatchInfo(None));

        for outlet in [&mut viewer, &mut admin] {
            let update = next_event(outlet, EventName::MATCH_INFO).await;
            assert_eq!(update["d"]["action"], "update");
            assert_eq!(update["d"]["match_info"]["match_number"], 3);
            assert_eq!(update["d"]["match_info"]["red_weight"], 61.5);

            let clear = next_event(outlet, EventName::MATCH_INFO).await;
            assert_eq!(clear["d"]["action"], "clear");
            assert!(clear["d"]["match_info"].is_null());
            assert!(clear["s"].as_u64().unwrap() > update["s"].as_u64().unwrap());
        }
    }

    #[tokio::test]
    async fn viewer_count_bursts_are_coalesced() {
        let h = harness(Duration::from_millis(200));
        let mut watcher = join(&h.hub, "1.1.1.1", false, 256).await;

        let first = next_event(&mut watcher, EventName::VIEWER_COUNT).await;
        assert_eq!(first["d"]["count"], 1);

        let mut outlets = Vec::new();
        for i in 0..20 {
            outlets.push(join(&h.hub, &format!("10.0.0.{i}"), false, 256).await);
        }

        let settled = next_event(&mut watcher, EventName::VIEWER_COUNT).await;
        assert_eq!(settled["d"]["count"], 21);

        // The burst produced exactly one further count.
        time::sleep(Duration::from_millis(500)).await;
        let mut extra = 0;
        while let Ok(frame) = watcher.frames.try_recv() {
            let v: Value = serde_json::from_str(frame.text.as_str()).unwrap();
            if v["t"] == EventName::VIEWER_COUNT {
                extra += 1;
            }
        }
        assert_eq!(extra, 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let h = harness(Duration::from_secs(60));
        let session = Arc::new(ViewerSession::new("1.1.1.1".into(), None));
        let id = session.session_id.clone();
        let (handle, _outlet) = SessionHandle::channel(session, 4);
        h.hub.connect(handle).await.unwrap();
        assert_eq!(h.hub.viewer_count(), 1);

        h.hub.disconnect(&id);
        h.hub.disconnect(&id);
        h.hub.disconnect("vs_unknown");
        // Round-trip a connect so the disconnects above have been processed.
        let _other = join(&h.hub, "2.2.2.2", false, 4).await;
        assert_eq!(h.hub.viewer_count(), 1);
    }
}
