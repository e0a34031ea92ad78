#![allow(clippy::unwrap_used)]
// Optimistic sends and REST-backed chat actions against wiremock.
// Real time throughout; the session uses millisecond backoff instead.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{self, BoxFuture};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use chorus_core::{
    ConnectionStatus, CoreError, CredentialStore, Credentials, Delivery, InstanceId,
    MemoryCredentialStore, TokenRefresher, UserId,
};

use common::{ClientFixture, fast_session, instance_id, valid_credentials};

const MESSAGES: &str = "/api/v1/channels/general/messages";

fn me() -> UserId {
    UserId::new("me")
}

fn message_json(id: &str, content: &str, nonce: Option<&str>) -> Value {
    json!({
        "id": id,
        "channel_id": "general",
        "author_id": "me",
        "content": content,
        "created_at": "2026-03-01T10:00:00Z",
        "nonce": nonce,
    })
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

/// Creates the message with `id`, echoing the request's nonce.
struct Created {
    id: &'static str,
    delay: Duration,
}

impl Respond for Created {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let content = body["content"].as_str().unwrap();
        let nonce = body["nonce"].as_str();
        ResponseTemplate::new(201)
            .set_body_json(message_json(self.id, content, nonce))
            .set_delay(self.delay)
    }
}

#[tokio::test]
async fn offline_send_reconnects_flushes_and_confirms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .respond_with(Created {
            id: "m42",
            delay: Duration::from_millis(500),
        })
        .expect(1)
        .mount(&server)
        .await;

    let mut fixture = ClientFixture::new(&server.uri(), fast_session());
    fixture.dialer.fail_next(3);
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);

    fixture.client.coordinator().start_typing(&id, "general").unwrap();
    fixture.client.connect(&id, &me()).unwrap();

    let client = fixture.client.clone();
    let send = tokio::spawn(async move {
        client
            .send_message(&instance_id(), "general", &me(), "hello")
            .await
    });

    eventually(|| chat.messages("general").len() == 1).await;
    let pending = chat.messages("general").remove(0);
    assert_eq!(pending.message.content, "hello");
    assert_eq!(pending.delivery, Delivery::Pending);

    let mut dialed = fixture.next_dial().await;
    assert_eq!(
        fixture.dialer.attempts.load(std::sync::atomic::Ordering::SeqCst),
        4
    );
    dialed.authenticate();

    assert_eq!(dialed.next_frame().await["type"], "typing.start");
    assert!(!send.is_finished());

    let sent = send.await.unwrap().unwrap();
    assert_eq!(sent.id, "m42");

    // The server's broadcast of the same message lands on the same record.
    dialed.send(
        "message.created",
        message_json("m42", "hello", sent.nonce.as_deref()),
    );
    fixture.wait_for_status(ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let records = chat.messages("general");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message.id, "m42");
    assert_eq!(records[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn broadcast_before_response_still_yields_one_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .respond_with(Created {
            id: "m7",
            delay: Duration::from_millis(300),
        })
        .mount(&server)
        .await;

    let mut fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);
    fixture.client.connect(&id, &me()).unwrap();
    let dialed = fixture.next_dial().await;
    dialed.authenticate();
    fixture.wait_for_status(ConnectionStatus::Connected).await;

    let client = fixture.client.clone();
    let send = tokio::spawn(async move {
        client
            .send_message(&instance_id(), "general", &me(), "race")
            .await
    });
    eventually(|| chat.messages("general").len() == 1).await;
    let nonce = chat.messages("general")[0].nonce().unwrap().to_owned();

    dialed.send("message.created", message_json("m7", "race", Some(&nonce)));
    eventually(|| chat.find("general", "m7").is_some()).await;

    send.await.unwrap().unwrap();
    let records = chat.messages("general");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn failed_send_is_marked_and_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .respond_with(Created {
            id: "m43",
            delay: Duration::ZERO,
        })
        .mount(&server)
        .await;

    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);
    let messaging = fixture.client.messaging();

    let err = messaging
        .send_message(&id, "general", &me(), "again")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Api { status: Some(500), .. }));

    let failed = chat.messages("general").remove(0);
    assert!(failed.is_failed());
    let token = failed.nonce().unwrap().to_owned();

    let sent = messaging.retry(&id, "general", &token, &me()).await.unwrap();

    assert_eq!(sent.id, "m43");
    let records = chat.messages("general");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message.id, "m43");
    assert!(chat.find_by_nonce("general", &token).is_none());
}

#[tokio::test]
async fn send_without_credentials_fails_locally() {
    let server = MockServer::start().await;
    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    fixture.credentials.remove(&id).unwrap();

    let err = fixture
        .client
        .send_message(&id, "general", &me(), "nobody home")
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotAuthenticated { .. }));
    let records = fixture.client.stores().chat(&id).messages("general");
    assert!(records[0].is_failed());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn history_replaces_confirmed_and_keeps_local_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MESSAGES))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            message_json("m1", "one", None),
            message_json("m2", "two", None),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(MESSAGES))
        .and(query_param("before", "m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            message_json("m0", "zero", None),
        ])))
        .mount(&server)
        .await;

    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);
    chat.begin_send("general", &me(), "still sending");
    let messaging = fixture.client.messaging();

    let loaded = messaging
        .load_history(&id, "general", None, chorus_core::HISTORY_PAGE_SIZE)
        .await
        .unwrap();
    assert_eq!(loaded, 2);

    let older = messaging
        .load_history(&id, "general", Some("m1"), 20)
        .await
        .unwrap();
    assert_eq!(older, 1);

    let ids: Vec<String> = chat
        .messages("general")
        .into_iter()
        .filter(|r| !r.is_local())
        .map(|r| r.message.id)
        .collect();
    assert_eq!(ids, ["m0", "m1", "m2"]);
    assert_eq!(chat.messages("general").last().unwrap().message.content, "still sending");
}

#[tokio::test]
async fn toggle_reaction_adds_then_removes() {
    let server = MockServer::start().await;
    let reaction_path = "/api/v1/channels/general/messages/m1/reactions/%F0%9F%91%8D";
    Mock::given(method("PUT"))
        .and(path(reaction_path))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(reaction_path))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);
    chat.apply_created(serde_json::from_value(message_json("m1", "react to me", None)).unwrap());
    let messaging = fixture.client.messaging();

    let set = messaging
        .toggle_reaction(&id, "general", "m1", "👍", &me())
        .await
        .unwrap();
    assert!(set);
    assert!(chat.has_reacted("general", "m1", "👍", &me()));

    let set = messaging
        .toggle_reaction(&id, "general", "m1", "👍", &me())
        .await
        .unwrap();
    assert!(!set);
    assert!(chat.find("general", "m1").unwrap().message.reactions.is_empty());
}

#[tokio::test]
async fn edit_and_delete_apply_server_answers() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/channels/general/messages/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_json("m1", "fixed", None)))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/channels/general/messages/m1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();
    let chat = fixture.client.stores().chat(&id);
    chat.apply_created(serde_json::from_value(message_json("m1", "typo", None)).unwrap());
    let messaging = fixture.client.messaging();

    messaging.edit_message(&id, "general", "m1", "fixed").await.unwrap();
    assert_eq!(chat.find("general", "m1").unwrap().message.content, "fixed");

    messaging.delete_message(&id, "general", "m1").await.unwrap();
    assert!(chat.find("general", "m1").is_none());
}

// ── Rejected tokens ──────────────────────────────────────────────────

/// Swaps in `access-2` on every refresh.
struct Rotate {
    store: Arc<MemoryCredentialStore>,
    calls: AtomicUsize,
}

impl TokenRefresher for Rotate {
    fn refresh(&self, id: &InstanceId) -> BoxFuture<'static, bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fresh = Credentials::new("access-2", "refresh-2", Utc::now() + chrono::Duration::hours(1));
        Box::pin(future::ready(self.store.put(id, &fresh).is_ok()))
    }
}

fn rotating_fixture(base: &str) -> (ClientFixture, Arc<Rotate>) {
    let store = Arc::new(MemoryCredentialStore::new());
    store.put(&instance_id(), &valid_credentials()).unwrap();
    let rotate = Arc::new(Rotate {
        store: Arc::clone(&store),
        calls: AtomicUsize::new(0),
    });
    let refresher = Arc::clone(&rotate) as Arc<dyn TokenRefresher>;
    let fixture = ClientFixture::with_builder(base, fast_session(), |b| {
        b.credentials(store as Arc<dyn CredentialStore>).refresher(refresher)
    });
    (fixture, rotate)
}

#[tokio::test]
async fn rejected_token_is_refreshed_once_and_the_send_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MESSAGES))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(Created {
            id: "m7",
            delay: Duration::ZERO,
        })
        .expect(1)
        .mount(&server)
        .await;

    let (fixture, rotate) = rotating_fixture(&server.uri());
    let id = instance_id();

    let sent = fixture
        .client
        .send_message(&id, "general", &me(), "after expiry")
        .await
        .unwrap();

    assert_eq!(sent.id, "m7");
    assert_eq!(rotate.calls.load(Ordering::SeqCst), 1);
    let records = fixture.client.stores().chat(&id).messages("general");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn rejected_token_without_a_refresh_fails_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/channels/general/messages/m1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = ClientFixture::new(&server.uri(), fast_session());
    let id = instance_id();

    let err = fixture
        .client
        .messaging()
        .edit_message(&id, "general", "m1", "never lands")
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
}
