//! Unit tests for the Telegram transport against a mock Bot API

use super::*;
use hostctl_proto::CommandKind;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:secret";

fn transport(server: &MockServer) -> TelegramTransport {
    TelegramTransport::new(TOKEN)
        .unwrap()
        .with_api_url(server.uri())
        .with_poll_timeout(Duration::from_secs(0))
}

fn text_update(update_id: i64, from: i64, text: &str) -> serde_json::Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 10,
            "date": 1_700_000_000,
            "from": { "id": from, "is_bot": false, "first_name": "Op" },
            "chat": { "id": from, "type": "private" },
            "text": text,
        }
    })
}

#[tokio::test]
async fn test_next_commands_parses_and_advances_offset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [
                text_update(10, 42, "/lock"),
                text_update(11, 42, "just chatting"),
                text_update(12, 7, "/say@HostBot hello there"),
                text_update(13, 42, "/start"),
                { "update_id": 14, "edited_message": {} },
            ]
        })))
        .mount(&server)
        .await;

    let transport = transport(&server);
    let inbound = transport.next_commands().await.unwrap();

    assert_eq!(inbound.len(), 2);
    assert_eq!(inbound[0].chat_id, 42);
    assert_eq!(inbound[0].command.kind(), CommandKind::Lock);
    assert_eq!(inbound[0].command.caller(), CallerId(42));
    assert_eq!(inbound[1].command.kind(), CommandKind::Say);
    assert_eq!(inbound[1].command.joined_args(), "hello there");
    assert_eq!(inbound[1].command.caller(), CallerId(7));
    assert_eq!(transport.offset(), 15);
}

#[tokio::test]
async fn test_drop_pending_skips_backlog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .and(query_param("offset", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [text_update(99, 42, "/shutdown")]
        })))
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport.drop_pending().await.unwrap();
    assert_eq!(transport.offset(), 100);
}

#[tokio::test]
async fn test_drop_pending_with_empty_backlog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": [] })))
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport.drop_pending().await.unwrap();
    assert_eq!(transport.offset(), 0);
}

#[tokio::test]
async fn test_api_error_is_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        })))
        .mount(&server)
        .await;

    match transport(&server).next_commands().await {
        Err(TransportError::Api { code, description }) => {
            assert_eq!(code, 401);
            assert_eq!(description, "Unauthorized");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TOKEN)))
        .and(body_partial_json(json!({ "chat_id": 42, "text": "box: ✅ Shutdown canceled." })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "message_id": 5, "date": 1_700_000_000, "chat": { "id": 42 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .send(42, &Reply::text("box: ✅ Shutdown canceled."))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_photo_uses_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendPhoto", TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "message_id": 6, "date": 1_700_000_000, "chat": { "id": 42 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = Reply::photo(bytes::Bytes::from_static(b"\x89PNG\r\n\x1a\nrest"), "Screenshot from box");
    transport(&server).send(42, &reply).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"photo\"; filename=\"capture.png\""));
    assert!(body.contains("Screenshot from box"));
}

#[tokio::test]
async fn test_acknowledge_confirms_offset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .and(query_param("offset", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [text_update(20, 42, "/shutdown_bot")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .and(query_param("offset", "21"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport.drop_pending().await.unwrap();
    transport.acknowledge().await.unwrap();
}

#[test]
fn test_debug_redacts_token() {
    let transport = TelegramTransport::new(TOKEN).unwrap();
    let debug = format!("{:?}", transport);
    assert!(!debug.contains("secret"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn test_truncate_limits_characters() {
    assert_eq!(truncate("hello", 3), "hel");
    assert_eq!(truncate("hé", 5), "hé");
}
