use crate::harness::{RelayTestServer, relay_config, wait_for_event};
use checkin_relay::Config;
use checkin_relay::core::{ClientEvent, ConnectionState, StaticIdentity, StaticTags};
use checkin_relay::session::{PresenceSession, SubmitOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn start(
    config: Config,
    handle: &str,
    token: Option<&str>,
) -> (PresenceSession, mpsc::Receiver<ClientEvent>) {
    let identity = Arc::new(StaticIdentity::new(handle, None, token.map(String::from)));
    let tags = Arc::new(StaticTags(vec!["python".into()]));
    PresenceSession::start(Arc::new(config), identity, tags).expect("session should start")
}

async fn connected(
    config: Config,
    handle: &str,
    token: Option<&str>,
) -> (PresenceSession, mpsc::Receiver<ClientEvent>) {
    let (session, mut events) = start(config, handle, token);
    session.connect().await.expect("connect command should be accepted");
    wait_for_event(&session, &mut events, |e| {
        matches!(e, ClientEvent::HistoryReady { .. })
    })
    .await;
    (session, events)
}

fn is_checkin_from(identity: &'static str) -> impl Fn(&ClientEvent) -> bool {
    move |event| matches!(event, ClientEvent::CheckInReceived { check_in } if check_in.identity == identity)
}

#[tokio::test]
async fn submitted_checkin_is_echoed_and_confirmed() {
    let server = RelayTestServer::open().await;
    let (alice, mut events) = connected(server.client_config("alice"), "alice", None).await;

    let SubmitOutcome::Sent { check_in } = alice.submit("debugging").await.unwrap() else {
        panic!("fresh session should not be cooling down");
    };
    assert_eq!(check_in.tags, vec!["python"]);
    assert!(alice.snapshot()[0].pending);

    wait_for_event(&alice, &mut events, is_checkin_from("alice")).await;
    let snapshot = alice.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].check_in, check_in);
    assert!(!snapshot[0].pending);

    alice.shutdown().await;
}

#[tokio::test]
async fn fresh_client_sees_exactly_one_entry_for_identity() {
    let server = RelayTestServer::open().await;
    let (alice, mut alice_events) =
        connected(server.client_config("alice"), "alice", None).await;
    alice.submit("debugging").await.unwrap();
    wait_for_event(&alice, &mut alice_events, is_checkin_from("alice")).await;

    let (bob, _bob_events) = connected(server.client_config("bob"), "bob", None).await;
    let snapshot = bob.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].check_in.identity, "alice");
    assert_eq!(snapshot[0].check_in.message, "debugging");
    assert_eq!(snapshot[0].check_in.tags, vec!["python"]);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn second_submission_waits_for_cooldown() {
    let server = RelayTestServer::open().await;
    let (alice, _events) = connected(server.client_config("alice"), "alice", None).await;

    assert!(matches!(
        alice.submit("first").await.unwrap(),
        SubmitOutcome::Sent { .. }
    ));
    let SubmitOutcome::CoolingDown { remaining } = alice.submit("second").await.unwrap() else {
        panic!("second submission should be held back");
    };
    assert!(remaining > Duration::from_secs(290));

    alice.shutdown().await;
}

#[tokio::test]
async fn signed_checkin_round_trips_through_verifying_relay() {
    let mut relay = relay_config();
    relay.signing_secret = Some("shared".into());
    let server = RelayTestServer::start(relay).await;

    let mut config = server.client_config("alice");
    config.signing_secret = Some("shared".into());
    config.client.decorate = true;
    let (alice, mut events) = connected(config, "alice", None).await;

    alice.submit("signed and sealed").await.unwrap();
    let ClientEvent::CheckInReceived { check_in } =
        wait_for_event(&alice, &mut events, is_checkin_from("alice")).await
    else {
        unreachable!();
    };
    assert_eq!(check_in.message, "signed and sealed");
    assert!(check_in.decorative_snippet.is_some());

    alice.shutdown().await;
}

#[tokio::test]
async fn wrong_secret_surfaces_auth_failure_without_retry_loop() {
    let mut relay = relay_config();
    relay.signing_secret = Some("right".into());
    let server = RelayTestServer::start(relay).await;

    let mut config = server.client_config("mallory");
    config.signing_secret = Some("wrong".into());
    let (mallory, mut events) = connected(config, "mallory", None).await;

    mallory.submit("let me in").await.unwrap();
    wait_for_event(&mallory, &mut events, |e| {
        matches!(e, ClientEvent::AuthenticationFailed { .. })
    })
    .await;
    wait_for_event(&mallory, &mut events, |e| {
        matches!(
            e,
            ClientEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
                ..
            }
        )
    })
    .await;

    // Backoff base is 50ms; no silent reconnect happens.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mallory.connection_state(), ConnectionState::Disconnected);
    assert!(mallory.snapshot()[0].pending);

    mallory.shutdown().await;
}

#[tokio::test]
async fn identity_token_is_presented_to_token_relay() {
    let mut relay = relay_config();
    relay.relay.require_token = true;
    relay.relay.tokens = vec!["team-token".into()];
    let server = RelayTestServer::start(relay).await;

    let (alice, mut events) =
        connected(server.client_config("alice"), "alice", Some("team-token")).await;
    alice.submit("authenticated").await.unwrap();
    wait_for_event(&alice, &mut events, is_checkin_from("alice")).await;

    alice.shutdown().await;
}

#[tokio::test]
async fn run_loop_forwards_events_and_snapshots() {
    use checkin_relay::core::{DisplaySink, HistoryEntry};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ClientEvent>>,
        snapshots: Mutex<Vec<usize>>,
    }

    impl DisplaySink for Recorder {
        fn on_event(&self, event: &ClientEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_snapshot(&self, entries: &[HistoryEntry]) {
            self.snapshots.lock().unwrap().push(entries.len());
        }
    }

    let server = RelayTestServer::open().await;
    let (session, events) = start(server.client_config("alice"), "alice", None);
    let session = Arc::new(session);
    let recorder = Arc::new(Recorder::default());

    let runner = {
        let session = Arc::clone(&session);
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move { session.run(events, recorder.as_ref()).await })
    };

    session.connect().await.unwrap();
    session
        .connection()
        .wait_for(ConnectionState::Open)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.submit("recording").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !recorder.events.lock().unwrap().iter().any(|e| {
        matches!(e, ClientEvent::CheckInReceived { check_in } if check_in.identity == "alice")
    }) {
        assert!(tokio::time::Instant::now() < deadline, "echo should arrive");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.shutdown().await;
    runner.await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(e, ClientEvent::OnlineCountChanged { .. })));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::CooldownTick { .. })));
    assert_eq!(recorder.snapshots.lock().unwrap().last(), Some(&1));
}
