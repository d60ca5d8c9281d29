pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod models;
pub mod moderation;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenKeys;
use config::Config;
use db::blocked_ips::{BlockListStore, MemoryBlockList};
use db::comments::{CommentStore, MemoryCommentStore};
use db::kv::{KeyValueStore, MemoryStore};
use error::ChatError;
use gateway::fanout::{BroadcastHub, HubSettings};
use gateway::handler::{CommentGateway, GatewaySettings};
use gateway::registry::ConnectionRegistry;
use moderation::ModerationRegistry;

/// Storage the service runs on.
pub struct Backends {
    pub comments: Arc<dyn CommentStore>,
    pub block_list: Arc<dyn BlockListStore>,
    pub kv: Arc<dyn KeyValueStore>,
}

impl Backends {
    /// In-memory stores, for tests and database-less development.
    pub fn in_memory(config: &Config) -> Self {
        Self {
            comments: Arc::new(MemoryCommentStore::new(config.max_retained_comments)),
            block_list: Arc::new(MemoryBlockList::new()),
            kv: Arc::new(MemoryStore::new()),
        }
    }
}

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenKeys,
    pub comments: Arc<dyn CommentStore>,
    pub moderation: Arc<ModerationRegistry>,
    pub hub: BroadcastHub,
    pub gateway: Arc<CommentGateway>,
}

impl AppState {
    /// Load the block list and start the broadcast hub.
    /// Must be called inside a Tokio runtime.
    pub async fn build(config: Config, backends: Backends) -> Result<Self, ChatError> {
        let moderation = Arc::new(ModerationRegistry::new(backends.block_list));
        moderation.load().await?;

        let registry = Arc::new(ConnectionRegistry::new(moderation.clone()));
        let hub = BroadcastHub::spawn(
            registry,
            HubSettings {
                viewer_count_interval: config.viewer_count_interval(),
            },
        );

        let gateway = Arc::new(CommentGateway::new(
            backends.comments.clone(),
            moderation.clone(),
            hub.clone(),
            backends.kv,
            GatewaySettings {
                comment_cooldown_secs: config.comment_cooldown_secs,
                content_filter: config.content_filter,
                history_limit: config.history_limit,
                replay_window: config.replay_window,
                match_info_ttl_secs: config.match_info_ttl_secs,
            },
        ));

        Ok(Self {
            tokens: TokenKeys::from_secret(&config.jwt_secret),
            config: Arc::new(config),
            comments: backends.comments,
            moderation,
            hub,
            gateway,
        })
    }
}
