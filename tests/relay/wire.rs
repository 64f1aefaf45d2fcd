use crate::harness::{
    RelayTestServer, connect_raw, next_frame, next_matching, relay_config, send_raw,
};
use checkin_relay::core::CheckIn;
use checkin_relay::security::Signer;
use checkin_relay::transport::{AUTH_FAILURE_CLOSE_CODE, ClientMessage, ServerMessage, Submission};
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

fn checkin_json(identity: &str, message: &str) -> String {
    let check_in = CheckIn::compose(identity, vec!["python".into()], message, 42);
    ClientMessage::Checkin(Submission::unsigned(check_in)).to_json()
}

fn is_checkin_from(identity: &'static str) -> impl Fn(&ServerMessage) -> bool {
    move |message| matches!(message, ServerMessage::NewCheckin(c) if c.identity == identity)
}

#[tokio::test]
async fn late_joiner_receives_history_then_end_marker() {
    let server = RelayTestServer::open().await;

    let mut alice = connect_raw(&server.ws_url()).await;
    send_raw(&mut alice, checkin_json("alice", "debugging")).await;
    // Wait for the fan-out so the relay has stored it.
    next_matching(&mut alice, is_checkin_from("alice")).await;

    let mut bob = connect_raw(&server.ws_url()).await;
    send_raw(&mut bob, r#"{"type":"history_request"}"#.to_string()).await;

    let ServerMessage::NewCheckin(replayed) = next_matching(&mut bob, |m| {
        matches!(m, ServerMessage::NewCheckin(_) | ServerMessage::HistoryEnd { .. })
    })
    .await
    else {
        panic!("history should start with alice's check-in");
    };
    assert_eq!(replayed.identity, "alice");
    assert_eq!(replayed.tags, vec!["python"]);
    assert_eq!(replayed.message, "debugging");

    let end = next_matching(&mut bob, |m| matches!(m, ServerMessage::HistoryEnd { .. })).await;
    assert_eq!(end, ServerMessage::HistoryEnd { count: 1 });
}

#[tokio::test]
async fn online_count_is_pushed_and_answered() {
    let server = RelayTestServer::open().await;

    let mut first = connect_raw(&server.ws_url()).await;
    let pushed = next_matching(&mut first, |m| matches!(m, ServerMessage::OnlineUsers { .. })).await;
    assert_eq!(pushed, ServerMessage::OnlineUsers { count: 1 });

    let _second = connect_raw(&server.ws_url()).await;
    let pushed = next_matching(&mut first, |m| matches!(m, ServerMessage::OnlineUsers { .. })).await;
    assert_eq!(pushed, ServerMessage::OnlineUsers { count: 2 });

    send_raw(&mut first, r#"{"type":"online_users_request"}"#.to_string()).await;
    let answered =
        next_matching(&mut first, |m| matches!(m, ServerMessage::OnlineUsers { .. })).await;
    assert_eq!(answered, ServerMessage::OnlineUsers { count: 2 });
}

#[tokio::test]
async fn broadcast_reaches_every_client_including_sender() {
    let server = RelayTestServer::open().await;
    let mut sender = connect_raw(&server.ws_url()).await;
    let mut watcher = connect_raw(&server.ws_url()).await;

    send_raw(&mut sender, checkin_json("carol", "writing docs")).await;

    next_matching(&mut sender, is_checkin_from("carol")).await;
    let ServerMessage::NewCheckin(seen) = next_matching(&mut watcher, is_checkin_from("carol")).await
    else {
        unreachable!();
    };
    assert_eq!(seen.message, "writing docs");
}

#[tokio::test]
async fn malformed_json_gets_notice_and_connection_survives() {
    let server = RelayTestServer::open().await;
    let mut client = connect_raw(&server.ws_url()).await;

    send_raw(&mut client, "{this is not json".to_string()).await;
    let notice = next_matching(&mut client, |m| matches!(m, ServerMessage::Error { .. })).await;
    let ServerMessage::Error { message } = notice else {
        unreachable!();
    };
    assert!(message.starts_with("invalid message"));

    send_raw(&mut client, r#"{"type":"history_request"}"#.to_string()).await;
    let end = next_matching(&mut client, |m| matches!(m, ServerMessage::HistoryEnd { .. })).await;
    assert_eq!(end, ServerMessage::HistoryEnd { count: 0 });
}

#[tokio::test]
async fn forged_signature_closes_with_auth_code() {
    let mut config = relay_config();
    config.signing_secret = Some("relay-secret".into());
    let server = RelayTestServer::start(config).await;
    let mut client = connect_raw(&server.ws_url()).await;

    let check_in = CheckIn::compose("mallory", vec![], "trust me", 42);
    let signing_timestamp = Utc::now().timestamp_millis();
    let forged = Signer::new("not-the-secret")
        .unwrap()
        .sign_at(&check_in, signing_timestamp);
    let submission = ClientMessage::Checkin(Submission {
        check_in,
        auth_token: None,
        signature: Some(forged),
        signing_timestamp: Some(signing_timestamp),
    });
    send_raw(&mut client, submission.to_json()).await;

    loop {
        match next_frame(&mut client).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), AUTH_FAILURE_CLOSE_CODE);
                break;
            }
            Message::Close(None) => panic!("close frame should carry the auth code"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn repeated_checkin_inside_interval_gets_rate_limit_notice() {
    let mut config = relay_config();
    config.relay.cooldown_secs = Some(60);
    let server = RelayTestServer::start(config).await;
    let mut client = connect_raw(&server.ws_url()).await;

    send_raw(&mut client, checkin_json("dave", "first")).await;
    next_matching(&mut client, is_checkin_from("dave")).await;

    send_raw(&mut client, checkin_json("dave", "second")).await;
    let ServerMessage::Error { message } =
        next_matching(&mut client, |m| matches!(m, ServerMessage::Error { .. })).await
    else {
        unreachable!();
    };
    assert!(message.starts_with("rate limited"));
}

#[tokio::test]
async fn handshake_requires_bearer_token_when_configured() {
    let mut config = relay_config();
    config.relay.require_token = true;
    config.relay.tokens = vec!["letmein".into()];
    let server = RelayTestServer::start(config).await;

    let rejected = tokio_tungstenite::connect_async(server.ws_url()).await;
    match rejected {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED.as_u16());
        }
        other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
    }

    let mut request = server.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("authorization", HeaderValue::from_static("Bearer letmein"));
    assert!(tokio_tungstenite::connect_async(request).await.is_ok());
}

#[tokio::test]
async fn health_reports_online_and_history() {
    let server = RelayTestServer::open().await;
    let mut client = connect_raw(&server.ws_url()).await;
    send_raw(&mut client, checkin_json("erin", "reviewing")).await;
    next_matching(&mut client, is_checkin_from("erin")).await;

    let body: Value = reqwest::get(server.url("/health"))
        .await
        .expect("health request should complete")
        .json()
        .await
        .expect("health should be json");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["online"], 1);
    assert_eq!(body["history"], 1);
}
