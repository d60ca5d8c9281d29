#![allow(dead_code)]

use axum::Router;

use chat_api::auth::tokens::Role;
use chat_api::config::Config;
use chat_api::gateway::events::SubmitCommentPayload;
use chat_api::gateway::handler::Submitter;
use chat_api::models::comment::Comment;
use chat_api::{AppState, Backends};

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub fn test_config() -> Config {
    Config::for_tests(TEST_SECRET)
}

/// Application state over in-memory stores.
pub async fn test_state_with(config: Config) -> AppState {
    let backends = Backends::in_memory(&config);
    AppState::build(config, backends)
        .await
        .expect("failed to build test state")
}

pub async fn test_state() -> AppState {
    test_state_with(test_config()).await
}

/// Build the full router with a fresh in-memory state.
pub async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    let app = chat_api::routes::router().with_state(state.clone());
    (app, state)
}

pub fn admin_token(state: &AppState, subject: &str) -> String {
    state
        .tokens
        .issue(subject, Role::Admin, 300)
        .expect("failed to mint admin token")
}

pub fn user_token(state: &AppState, subject: &str) -> String {
    state
        .tokens
        .issue(subject, Role::User, 300)
        .expect("failed to mint user token")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Post a comment straight through the gateway, as an anonymous viewer.
pub async fn seed_comment(state: &AppState, ip: &str, name: &str, content: &str) -> Comment {
    state
        .gateway
        .submit(
            Submitter { ip, identity: None },
            SubmitCommentPayload {
                display_name: Some(name.to_string()),
                content: Some(content.to_string()),
                parent_id: None,
            },
        )
        .await
        .expect("failed to seed comment")
}
