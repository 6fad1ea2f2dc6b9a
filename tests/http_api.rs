use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::{AUTHORIZATION, CONTENT_TYPE}},
};
use duochat::{AppState, app, auth::TokenIdentity, model::UserId, store, users::SqliteDirectory};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

struct TestApp {
    router: Router,
    ann: (UserId, String),
    bob: (UserId, String),
}

async fn setup() -> TestApp {
    let db_pool = store::connect("sqlite::memory:", 1).await.unwrap();
    let directory = SqliteDirectory::new(db_pool.clone());
    let tokens = TokenIdentity::new(db_pool.clone());

    let mut users = Vec::new();
    for (first, email) in [("Ann", "ann@example.com"), ("Bob", "bob@example.com")] {
        let user = directory.insert(first, "Tester", email).await.unwrap();
        let token = tokens.issue(user.id, time::Duration::hours(1)).await.unwrap();
        users.push((user.id, token));
    }
    let bob = users.pop().unwrap();
    let ann = users.pop().unwrap();

    TestApp {
        router: app(AppState::new(db_pool), CorsLayer::permissive()),
        ann,
        bob,
    }
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn conversation_is_shared_by_both_participants() {
    let t = setup().await;
    let (ann, ann_token) = &t.ann;
    let (bob, bob_token) = &t.bob;

    let (status, first) = call(
        &t.router,
        "POST",
        "/api/chat/conversation",
        Some(ann_token.as_str()),
        Some(json!({"clientId1": ann, "clientId2": bob})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = call(
        &t.router,
        "POST",
        "/api/chat/conversation",
        Some(bob_token.as_str()),
        Some(json!({"clientId1": bob, "clientId2": ann})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["title"], format!("dm:{ann}:{bob}"));

    let (status, list) = call(&t.router, "GET", "/api/chat/conversations", Some(bob_token.as_str()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn self_pair_is_a_bad_request() {
    let t = setup().await;
    let (ann, ann_token) = &t.ann;

    let (status, body) = call(
        &t.router,
        "POST",
        "/api/chat/conversation",
        Some(ann_token.as_str()),
        Some(json!({"clientId1": ann, "clientId2": ann})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn offline_message_stays_unread_until_marked() {
    let t = setup().await;
    let (ann, ann_token) = &t.ann;
    let (bob, bob_token) = &t.bob;

    let (_, conversation) = call(
        &t.router,
        "POST",
        "/api/chat/conversation",
        Some(ann_token.as_str()),
        Some(json!({"clientId1": ann, "clientId2": bob})),
    )
    .await;
    let conversation_id = conversation["id"].clone();

    let (status, message) = call(
        &t.router,
        "POST",
        "/api/chat/message",
        Some(ann_token.as_str()),
        Some(json!({"conversationId": conversation_id, "message": "hi", "senderId": ann, "receiverId": bob})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message["message"], "hi");
    assert_eq!(message["isRead"], false);

    let (_, unread) = call(&t.router, "GET", "/api/chat/unread-messages", Some(bob_token.as_str()), None).await;
    assert_eq!(unread["count"], 1);

    let (_, history) = call(
        &t.router,
        "GET",
        &format!("/api/chat/conversation?id={conversation_id}"),
        Some(bob_token.as_str()),
        None,
    )
    .await;
    assert_eq!(history["messages"][0]["message"], "hi");

    let (status, marked) = call(
        &t.router,
        "POST",
        "/api/chat/mark-as-read",
        Some(bob_token.as_str()),
        Some(json!({"conversationId": conversation_id, "userId": bob})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked, json!({"success": true, "updated": 1}));

    let (_, unread) = call(
        &t.router,
        "GET",
        &format!("/api/chat/unread-messages?userId={bob}"),
        Some(bob_token.as_str()),
        None,
    )
    .await;
    assert_eq!(unread["count"], 0);
}

#[tokio::test]
async fn requests_need_a_valid_token() {
    let t = setup().await;

    let (status, body) = call(&t.router, "GET", "/api/chat/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = call(&t.router, "GET", "/api/chat/conversations", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // rejected before any upgrade happens
    let (status, _) = call(&t.router, "GET", "/chat", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callers_cannot_act_for_someone_else() {
    let t = setup().await;
    let (ann, ann_token) = &t.ann;
    let (bob, _) = &t.bob;

    let (_, conversation) = call(
        &t.router,
        "POST",
        "/api/chat/conversation",
        Some(ann_token.as_str()),
        Some(json!({"clientId1": ann, "clientId2": bob})),
    )
    .await;

    let (status, _) = call(
        &t.router,
        "POST",
        "/api/chat/message",
        Some(ann_token.as_str()),
        Some(json!({"conversationId": conversation["id"], "message": "hi", "senderId": bob, "receiverId": ann})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &t.router,
        "GET",
        &format!("/api/chat/unread-messages?userId={bob}"),
        Some(ann_token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let t = setup().await;
    let (ann, ann_token) = &t.ann;
    let (bob, _) = &t.bob;

    let (status, body) = call(&t.router, "GET", "/api/chat/conversation?id=999", Some(ann_token.as_str()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "conversation 999 not found");

    let (status, _) = call(
        &t.router,
        "POST",
        "/api/chat/message",
        Some(ann_token.as_str()),
        Some(json!({"conversationId": 999, "message": "hi", "senderId": ann, "receiverId": bob})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_and_health_are_open() {
    let t = setup().await;
    let (ann, _) = &t.ann;

    let (status, found) = call(&t.router, "GET", "/api/users/search?term=an", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found[0]["id"], json!(ann));

    let (status, _) = call(&t.router, "GET", "/api/users/user-id?id=999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, health) = call(&t.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health, json!({"status": "ok", "online": 0}));
}

#[tokio::test]
async fn malformed_input_gets_the_error_body() {
    let t = setup().await;
    let (_, ann_token) = &t.ann;

    let (status, body) = call(
        &t.router,
        "POST",
        "/api/chat/mark-as-read",
        Some(ann_token.as_str()),
        Some(json!({"conversationId": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().starts_with("bad request: "));

    let (status, body) =
        call(&t.router, "GET", "/api/chat/conversation?id=abc", Some(ann_token.as_str()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, body) = call(&t.router, "GET", "/api/users/user-id", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}
