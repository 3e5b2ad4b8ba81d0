//! REST client tests against a mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use evalboard_net::NetworkError;
use evalboard_net::http::{
    ApiClient, AssistantApi, Envelope, NotificationsApi, RemoteNotificationStore,
};
use evalboard_net::session::Session;
use serde_json::{Value, json};
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, header_regex, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApiClient {
    let session = Session::new();
    session.login("abc", "42");
    ApiClient::builder(format!("{}/api/v1", server.uri()), session)
        .build()
        .expect("Failed to build client")
}

#[tokio::test]
async fn test_bearer_token_and_prefix_normalization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .and(header("authorization", "Bearer abc"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.get("/students").query("page", 2).send().await.unwrap();
    client.get("/api/v1/students").query("page", 2).send().await.unwrap();
}

#[tokio::test]
async fn test_envelope_with_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": 1, "name": "Ada" }, { "id": 2, "name": "Linus" }],
            "meta": { "pagination": { "page": 1, "size": 10, "total": 2 }, "generated": "now" },
        })))
        .mount(&server)
        .await;

    let students: Envelope<Vec<Value>> = client(&server).get("/students").fetch().await.unwrap();

    assert_eq!(students.data.len(), 2);
    assert_eq!(students.data[1]["name"], "Linus");
    let pagination = students.pagination().unwrap();
    assert_eq!(pagination.total, Some(2));
    assert_eq!(students.meta.unwrap().extra["generated"], "now");
}

#[tokio::test]
async fn test_unauthorized_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token expired" })))
        .mount(&server)
        .await;

    let client = client(&server);
    let prompts = Arc::new(AtomicU32::new(0));
    {
        let prompts = prompts.clone();
        client.login_required().connect(move |_| {
            prompts.fetch_add(1, Ordering::SeqCst);
        });
    }

    let err = client.get("/students").send().await.unwrap_err();

    assert_eq!(err, NetworkError::Authentication("Token expired".into()));
    assert!(!client.session().is_logged_in());
    assert_eq!(prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_soft_forbidden_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/quant-item-categories"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "Teachers only" })))
        .mount(&server)
        .await;

    let client = client(&server);
    let categories: Envelope<Vec<Value>> = client.get("/quant-item-categories").fetch().await.unwrap();
    assert!(categories.data.is_empty());

    let err = client.get("/students").send().await.unwrap_err();
    assert_eq!(err, NetworkError::Permission("Teachers only".into()));
    assert!(client.session().is_logged_in());
}

#[tokio::test]
async fn test_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/students/9"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    let err = client(&server).delete("/students/9").send().await.unwrap_err();

    assert_eq!(
        err,
        NetworkError::HttpStatus {
            status: 500,
            message: Some("database unavailable".into()),
        }
    );
}

#[tokio::test]
async fn test_login_is_sent_as_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("username=teacher"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t" })))
        .expect(1)
        .mount(&server)
        .await;

    let token: Value = client(&server)
        .post("/auth/login")
        .json(&json!({ "username": "teacher", "password": "secret" }))
        .json_response()
        .await
        .unwrap();
    assert_eq!(token["access_token"], "t");
}

#[tokio::test]
async fn test_concurrent_duplicate_posts_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": 5, "role": "user", "content": "hi" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let send = || {
        client
            .post("/ai-assistant/conversations/1/messages")
            .json(&json!({ "content": "hi", "role": "user" }))
            .send()
    };

    let (first, second) = tokio::join!(send(), send());
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.bytes(), second.bytes());

    // A repeat shortly after completion joins too.
    let third = send().await.unwrap();
    assert_eq!(third.status(), 200);
    assert_eq!(client.deduplicator().pending_count(), 1);
}

#[tokio::test]
async fn test_distinct_posts_are_not_merged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 5 })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/ai-assistant/conversations/1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let path = "/ai-assistant/conversations/1/messages";
    client.post(path).json(&json!({ "content": "a" })).send().await.unwrap();
    client.post(path).json(&json!({ "content": "b" })).send().await.unwrap();
    client.get(path).send().await.unwrap();
    client.get(path).send().await.unwrap();
}

#[tokio::test]
async fn test_failed_post_is_not_remembered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let body = json!({ "content": "hello" });
    assert!(client.post("/messages").json(&body).send().await.is_err());
    assert!(client.post("/messages").json(&body).send().await.is_err());
    assert_eq!(client.deduplicator().pending_count(), 0);
}

#[tokio::test]
async fn test_assistant_message_waits_for_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .and(header_regex("x-request-id", r"^\d+-[a-z0-9]{13}$"))
        .and(body_partial_json(json!({
            "content": "Summarize week 3",
            "role": "user",
            "useLocalModel": true,
            "modelName": "gemma3:27",
            "waitForResponse": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 30,
            "role": "user",
            "content": "Summarize week 3",
            "conversation_id": 4,
            "ai_message": { "id": 31, "role": "assistant", "content": "Attendance improved.", "processing_time": 3.5 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = AssistantApi::new(client(&server))
        .send_message(4, "Summarize week 3")
        .await
        .unwrap();

    assert_eq!(reply.user_message.id, 30);
    let answer = reply.ai_message.unwrap();
    assert_eq!(answer.content, "Attendance improved.");
    assert_eq!(answer.processing_time, Some(3.5));
    assert!(!reply.is_timeout);
}

#[tokio::test]
async fn test_assistant_timeout_falls_back_to_async_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .and(body_partial_json(json!({ "waitForResponse": true })))
        .respond_with(ResponseTemplate::new(408))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .and(header_regex("x-request-id", "-fallback$"))
        .and(body_string_contains("waitForResponse"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 40,
            "role": "user",
            "content": "Summarize week 3",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = AssistantApi::new(client(&server))
        .send_message(4, "Summarize week 3")
        .await
        .unwrap();

    assert!(reply.is_timeout);
    assert_eq!(reply.user_message.id, 40);
    let placeholder = reply.ai_message.unwrap();
    assert!(placeholder.is_timeout_message);
    assert!(placeholder.id < 0);
    assert_eq!(placeholder.role, "assistant");
    assert_eq!(placeholder.conversation_id, Some(4));
}

#[tokio::test]
async fn test_assistant_fallback_failure_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .and(body_partial_json(json!({ "waitForResponse": true })))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = AssistantApi::new(client(&server))
        .send_message(4, "Summarize week 3")
        .await
        .unwrap_err();

    assert_eq!(err, NetworkError::Timeout);
}

#[tokio::test]
async fn test_assistant_other_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/ai-assistant/conversations/4/messages"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Conversation not found" })))
        .expect(1)
        .mount(&server)
        .await;

    let err = AssistantApi::new(client(&server))
        .send_message(4, "hello")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NetworkError::HttpStatus {
            status: 404,
            message: Some("Conversation not found".into()),
        }
    );
}

#[tokio::test]
async fn test_notifications_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/notifications"))
        .and(query_param("page", "1"))
        .and(query_param("pageSize", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": 1, "title": "Grades posted", "is_read": false, "created_at": "2026-03-01T09:30:00Z" },
                { "id": 2, "title": "Parent meeting", "is_read": true, "created_at": "2026-03-02 08:00:00" },
            ],
            "meta": { "count": 12 },
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/notifications/1/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": 1 } })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/notifications/read-all"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/notifications/unread-count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "count": 3 } })))
        .mount(&server)
        .await;

    let api = NotificationsApi::new(client(&server));
    let page = api.list(1, 10).await.unwrap();
    assert_eq!(page.total, 12);
    assert_eq!(page.items[0].title, "Grades posted");
    assert!(page.items[1].is_read);

    assert_eq!(api.unread_count().await.unwrap(), 3);
    api.mark_all_as_read().await.unwrap();

    let store = RemoteNotificationStore::new(api);
    let changes = Arc::new(AtomicU32::new(0));
    {
        let changes = changes.clone();
        store.changed().connect(move |_| {
            changes.fetch_add(1, Ordering::SeqCst);
        });
    }

    store.reload().await.unwrap();
    assert_eq!(store.notifications().len(), 2);
    assert_eq!(store.total(), 12);
    assert_eq!(store.unread_count(), 1);

    store.mark_read(1).await.unwrap();
    assert_eq!(store.unread_count(), 0);
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}
