mod common;

use axum::body::Body;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// GET /api/v1/comments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_comments_empty() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/api/v1/comments").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["comments"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_comments_oldest_first_without_ips() {
    let (app, state) = common::test_app().await;
    common::seed_comment(&state, "10.0.0.1", "alice", "one").await;
    common::seed_comment(&state, "10.0.0.2", "bob", "two").await;
    common::seed_comment(&state, "10.0.0.3", "carol", "three").await;
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/api/v1/comments").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    let comments = body["comments"].as_array().unwrap();

    let contents: Vec<&str> = comments
        .iter()
        .map(|c| c["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
    assert!(comments.iter().all(|c| c.get("ip_address").is_none()));
}

#[tokio::test]
async fn test_list_comments_respects_limit() {
    let (app, state) = common::test_app().await;
    for i in 0..5 {
        common::seed_comment(&state, "10.0.0.1", "alice", &format!("msg {i}")).await;
    }
    let server = TestServer::new(app).unwrap();

    let resp = server
        .get("/api/v1/comments")
        .add_query_param("limit", 2)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    let comments = body["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 2);
    // The two most recent, still oldest first.
    assert_eq!(comments[0]["content"], "msg 3");
    assert_eq!(comments[1]["content"], "msg 4");
}

#[tokio::test]
async fn test_list_comments_clamps_oversized_limit() {
    let (app, state) = common::test_app().await;
    for i in 0..120 {
        common::seed_comment(&state, "10.0.0.1", "alice", &format!("msg {i}")).await;
    }
    let server = TestServer::new(app).unwrap();

    let resp = server
        .get("/api/v1/comments")
        .add_query_param("limit", 1000)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["comments"].as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_deleted_comments_are_hidden() {
    let (app, state) = common::test_app().await;
    let kept = common::seed_comment(&state, "10.0.0.1", "alice", "kept").await;
    let gone = common::seed_comment(&state, "10.0.0.1", "alice", "gone").await;
    let token = common::admin_token(&state, "mod-1");
    let server = TestServer::new(app).unwrap();

    server
        .delete(&format!("/api/v1/admin/comments/{}", gone.id))
        .add_header(
            axum::http::header::AUTHORIZATION,
            common::bearer(&token),
        )
        .await
        .assert_status(StatusCode::OK);

    let body: Value = server.get("/api/v1/comments").await.json();
    let comments = body["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["id"], kept.id);
}

#[tokio::test]
async fn test_reply_carries_parent_author() {
    let (app, state) = common::test_app().await;
    let parent = common::seed_comment(&state, "10.0.0.1", "alice", "question?").await;
    state
        .gateway
        .submit(
            chat_api::gateway::handler::Submitter {
                ip: "10.0.0.2",
                identity: None,
            },
            chat_api::gateway::events::SubmitCommentPayload {
                display_name: Some("bob".into()),
                content: Some("answer".into()),
                parent_id: Some(parent.id),
            },
        )
        .await
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let body: Value = server.get("/api/v1/comments").await.json();
    let reply = &body["comments"][1];
    assert_eq!(reply["parent_id"], parent.id);
    assert_eq!(reply["reply_to"], "alice");
}

// ---------------------------------------------------------------------------
// GET /api/v1/channel, GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_channel_status_defaults_to_active() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/api/v1/channel").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert_eq!(body["active"], true);
    assert_eq!(body["viewer_count"], 0);
}

#[tokio::test]
async fn test_health() {
    let (app, _state) = common::test_app().await;

    let resp = app
        .oneshot(
            http::Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/openapi.json").await;
    resp.assert_status(StatusCode::OK);
    let body: Value = resp.json();
    assert!(body["paths"]["/api/v1/comments"].is_object());
    assert!(body["paths"]["/api/v1/admin/blocked-ips/{ip}"].is_object());
    assert!(body["paths"]["/api/v1/admin/match-info"]["put"].is_object());
}
