//! The comment gateway: every viewer submission and admin command goes
//! through here, whichever transport it arrived on.
//!
//! Submission pipeline: channel open → validate → content filter → moderation
//! → cooldown → resolve reply → persist → hand off to the hub. Anything that
//! fails before "persist" leaves no trace in the store and is never broadcast.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::auth::tokens::Identity;
use crate::db::comments::{clamp_limit, CommentStore, Deletion};
use crate::db::kv::KeyValueStore;
use crate::error::{ChatError, FieldError};
use crate::filter::ContentFilter;
use crate::models::blocked_ip::BlockedIp;
use crate::models::comment::{Comment, CommentDraft};
use crate::models::match_info::MatchInfo;
use crate::moderation::ModerationRegistry;

use super::events::{BlockIpPayload, MatchInfoPayload, SubmitCommentPayload};
use super::fanout::{BroadcastHub, HubEvent};

pub const MAX_DISPLAY_NAME_CHARS: usize = 50;
pub const MAX_CONTENT_CHARS: usize = 500;
const MAX_REASON_CHARS: usize = 200;
const MAX_IP_CHARS: usize = 64;
const MAX_WEIGHT_KG: f64 = 500.0;
const MATCH_INFO_KEY: &str = "match:current";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// `0` disables the cooldown.
    pub comment_cooldown_secs: u64,
    pub content_filter: bool,
    pub history_limit: usize,
    pub replay_window: usize,
    /// How long a match stays on screen without a fresh update.
    pub match_info_ttl_secs: u64,
}

/// Who is submitting: the connection's address and, if present, its identity.
#[derive(Debug, Clone, Copy)]
pub struct Submitter<'a> {
    pub ip: &'a str,
    pub identity: Option<&'a Identity>,
}

impl Submitter<'_> {
    fn admin(&self) -> Option<&Identity> {
        self.identity.filter(|i| i.is_admin())
    }
}

pub struct CommentGateway {
    pub(super) store: Arc<dyn CommentStore>,
    moderation: Arc<ModerationRegistry>,
    hub: BroadcastHub,
    /// Cooldown markers and the current match info.
    kv: Arc<dyn KeyValueStore>,
    filter: Option<ContentFilter>,
    channel_active: AtomicBool,
    /// Held from persist through hub hand-off, so comment ids and broadcast
    /// order agree.
    write_order: Arc<tokio::sync::Mutex<()>>,
    pub(super) settings: GatewaySettings,
}

impl CommentGateway {
    pub fn new(
        store: Arc<dyn CommentStore>,
        moderation: Arc<ModerationRegistry>,
        hub: BroadcastHub,
        kv: Arc<dyn KeyValueStore>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            store,
            moderation,
            hub,
            kv,
            filter: settings.content_filter.then(ContentFilter::new),
            channel_active: AtomicBool::new(true),
            write_order: Arc::new(tokio::sync::Mutex::new(())),
            settings,
        }
    }

    pub fn is_channel_active(&self) -> bool {
        self.channel_active.load(Ordering::Acquire)
    }

    /// Accept a viewer comment, persist it and broadcast it.
    pub async fn submit(
        &self,
        from: Submitter<'_>,
        payload: SubmitCommentPayload,
    ) -> Result<Comment, ChatError> {
        if !self.is_channel_active() {
            return Err(ChatError::ChannelEnded);
        }

        let (display_name, content) = validate_submission(&payload, self.filter.as_ref())?;

        if self.moderation.is_blocked(from.ip) {
            tracing::debug!(ip = %from.ip, "submission from blocked ip rejected");
            return Err(ChatError::Blocked);
        }

        let admin = from.admin();
        let cooldown_key = self.claim_cooldown(from.ip, admin.is_some()).await?;

        let reply_to = match payload.parent_id {
            Some(parent_id) => self.resolve_reply(parent_id).await,
            None => None,
        };

        let draft = CommentDraft {
            display_name,
            content,
            parent_id: payload.parent_id,
            reply_to,
            ip_address: from.ip.to_string(),
            is_admin: admin.is_some(),
            admin_identity: admin.map(|a| a.subject.clone()),
        };

        let store = self.store.clone();
        let hub = self.hub.clone();
        let persisted = self
            .ordered(async move {
                let comment = store.append(draft).await?;
                hub.publish(HubEvent::CommentAdded(comment.clone()));
                Ok::<_, ChatError>(comment)
            })
            .await;

        match persisted {
            Ok(comment) => {
                tracing::info!(comment_id = comment.id, ip = %comment.ip_address, "comment accepted");
                Ok(comment)
            }
            Err(e) => {
                // The comment never existed; let the sender retry right away.
                if let Some(key) = cooldown_key {
                    let _ = self.kv.del(&key).await;
                }
                Err(e)
            }
        }
    }

    /// Soft-delete a comment. Only the first delete of an id is broadcast.
    pub async fn delete(
        &self,
        actor: Option<&Identity>,
        comment_id: i64,
    ) -> Result<Deletion, ChatError> {
        let admin = authorize(actor, "delete_comment")?;

        let store = self.store.clone();
        let hub = self.hub.clone();
        let deletion = self
            .ordered(async move {
                let deletion = store.soft_delete(comment_id).await?;
                if deletion.newly_deleted {
                    hub.publish(HubEvent::CommentDeleted { comment_id });
                }
                Ok::<_, ChatError>(deletion)
            })
            .await?;

        if deletion.newly_deleted {
            tracing::info!(comment_id, admin = %admin.subject, "comment deleted");
        }
        Ok(deletion)
    }

    /// Block an IP and disconnect every session from it.
    pub async fn block(
        &self,
        actor: Option<&Identity>,
        payload: BlockIpPayload,
    ) -> Result<BlockedIp, ChatError> {
        let admin = authorize(actor, "block_ip")?;

        let ip = payload.ip_address.trim();
        let reason = payload.reason.as_deref().map(str::trim).unwrap_or("");
        let mut errors = Vec::new();
        if ip.is_empty() {
            errors.push(FieldError::new("ip_address", "IP address is required"));
        } else if ip.chars().count() > MAX_IP_CHARS {
            errors.push(FieldError::new("ip_address", "IP address is too long"));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            errors.push(FieldError::new(
                "reason",
                format!("Reason must be {MAX_REASON_CHARS} characters or fewer"),
            ));
        }
        if !errors.is_empty() {
            return Err(ChatError::Validation(errors));
        }

        let entry = self.moderation.block(ip, reason, &admin.subject).await?;
        // Only after the block is visible to `register`, so a racing
        // reconnect is either swept here or refused there.
        self.hub.publish(HubEvent::IpBlocked {
            ip_address: entry.ip_address.clone(),
        });
        Ok(entry)
    }

    /// Mark the channel live or ended. Broadcast only on an actual change.
    pub fn set_channel_active(
        &self,
        actor: Option<&Identity>,
        active: bool,
    ) -> Result<bool, ChatError> {
        let admin = authorize(actor, "set_channel_status")?;
        let previous = self.channel_active.swap(active, Ordering::AcqRel);
        if previous != active {
            tracing::info!(active, admin = %admin.subject, "channel status changed");
            self.hub.publish(HubEvent::ChannelStatus { active });
        }
        Ok(active)
    }

    /// Put a match on every viewer's screen, replacing any current one.
    pub async fn update_match_info(
        &self,
        actor: Option<&Identity>,
        payload: MatchInfoPayload,
    ) -> Result<MatchInfo, ChatError> {
        let admin = authorize(actor, "update_match_info")?;
        validate_match_info(&payload)?;

        let info = MatchInfo {
            match_number: payload.match_number,
            red_weight: payload.red_weight,
            blue_weight: payload.blue_weight,
            updated_at: Utc::now(),
            updated_by: admin.subject.clone(),
        };
        let encoded =
            serde_json::to_string(&info).map_err(|e| ChatError::Storage(e.to_string()))?;

        let kv = self.kv.clone();
        let hub = self.hub.clone();
        let ttl = self.settings.match_info_ttl_secs;
        let published = info.clone();
        self.ordered(async move {
            kv.set_ex(MATCH_INFO_KEY, &encoded, ttl).await?;
            hub.publish(HubEvent::MatchInfo(Some(published)));
            Ok::<_, ChatError>(())
        })
        .await?;

        tracing::info!(match_number = info.match_number, admin = %admin.subject, "match info updated");
        Ok(info)
    }

    /// Take the match off viewers' screens.
    pub async fn clear_match_info(&self, actor: Option<&Identity>) -> Result<(), ChatError> {
        let admin = authorize(actor, "clear_match_info")?;

        let kv = self.kv.clone();
        let hub = self.hub.clone();
        self.ordered(async move {
            kv.del(MATCH_INFO_KEY).await?;
            hub.publish(HubEvent::MatchInfo(None));
            Ok::<_, ChatError>(())
        })
        .await?;

        tracing::info!(admin = %admin.subject, "match info cleared");
        Ok(())
    }

    /// The match currently on screen, if it has not expired.
    pub async fn match_info(&self) -> Result<Option<MatchInfo>, ChatError> {
        let Some(raw) = self.kv.get(MATCH_INFO_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                tracing::warn!(error = %e, "stored match info is unreadable");
                Ok(None)
            }
        }
    }

    /// Most recent non-deleted comments, oldest first.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<Comment>, ChatError> {
        self.store
            .recent(clamp_limit(limit.unwrap_or(self.settings.history_limit)))
            .await
    }

    /// Check an admin identity for REST callers that have no session.
    pub fn require_admin<'a>(
        &self,
        actor: Option<&'a Identity>,
        action: &str,
    ) -> Result<&'a Identity, ChatError> {
        authorize(actor, action)
    }

    pub fn blocked_ips(&self) -> Vec<BlockedIp> {
        self.moderation.list()
    }

    /// Reserve the sender's cooldown slot. Returns the key to release if the
    /// submission fails later on.
    async fn claim_cooldown(&self, ip: &str, exempt: bool) -> Result<Option<String>, ChatError> {
        let secs = self.settings.comment_cooldown_secs;
        if exempt || secs == 0 {
            return Ok(None);
        }
        let key = format!("chat:cooldown:{ip}");
        if !self.kv.set_nx_ex(&key, "1", secs).await? {
            tracing::warn!(ip = %ip, "comment rate limited");
            return Err(ChatError::RateLimited);
        }
        Ok(Some(key))
    }

    /// Display name of the parent's author, if the parent is still visible.
    /// Lookup failures degrade to no enrichment.
    async fn resolve_reply(&self, parent_id: i64) -> Option<String> {
        match self.store.by_id(parent_id).await {
            Ok(Some(parent)) if !parent.deleted => Some(parent.display_name),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(parent_id, error = %e, "reply parent lookup failed");
                None
            }
        }
    }

    /// Run `op` under the write-order lock on its own task, so a caller that
    /// goes away mid-write cannot leave a persisted event unbroadcast.
    async fn ordered<T, F>(&self, op: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ChatError>> + Send + 'static,
    {
        let order = self.write_order.clone();
        tokio::spawn(async move {
            let _guard = order.lock().await;
            op.await
        })
        .await
        .map_err(|e| ChatError::Storage(format!("write task failed: {e}")))?
    }
}

fn authorize<'a>(actor: Option<&'a Identity>, action: &str) -> Result<&'a Identity, ChatError> {
    match actor {
        Some(identity) if identity.is_admin() => Ok(identity),
        other => {
            tracing::warn!(
                action,
                subject = other.map(|i| i.subject.as_str()).unwrap_or("anonymous"),
                "admin command rejected"
            );
            Err(ChatError::Forbidden)
        }
    }
}

fn validate_match_info(payload: &MatchInfoPayload) -> Result<(), ChatError> {
    let mut errors = Vec::new();
    if payload.match_number == 0 {
        errors.push(FieldError::new("match_number", "Match number must be at least 1"));
    }
    for (field, weight) in [
        ("red_weight", payload.red_weight),
        ("blue_weight", payload.blue_weight),
    ] {
        if !weight.is_finite() || weight <= 0.0 || weight > MAX_WEIGHT_KG {
            errors.push(FieldError::new(
                field,
                format!("Weight must be between 0 and {MAX_WEIGHT_KG} kg"),
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ChatError::Validation(errors))
    }
}

/// Trim and check a submission. Returns the trimmed `(display_name, content)`.
pub fn validate_submission(
    payload: &SubmitCommentPayload,
    filter: Option<&ContentFilter>,
) -> Result<(String, String), ChatError> {
    let display_name = payload.display_name.as_deref().unwrap_or("").trim();
    let content = payload.content.as_deref().unwrap_or("").trim();

    let mut errors = Vec::new();
    check_length(&mut errors, "display_name", "Display name", display_name, MAX_DISPLAY_NAME_CHARS);
    check_length(&mut errors, "content", "Content", content, MAX_CONTENT_CHARS);

    if errors.is_empty() {
        if let Some(filter) = filter {
            for (field, label, text) in [
                ("display_name", "Display name", display_name),
                ("content", "Content", content),
            ] {
                if let Some(violation) = filter.check(text) {
                    errors.push(FieldError::new(field, format!("{label} {}", violation.message())));
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(ChatError::Validation(errors));
    }
    Ok((display_name.to_string(), content.to_string()))
}

fn check_length(errors: &mut Vec<FieldError>, field: &str, label: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if len == 0 {
        errors.push(FieldError::new(field, format!("{label} is required")));
    } else if len > max {
        errors.push(FieldError::new(
            field,
            format!("{label} must be {max} characters or fewer"),
        ));
    }
}
