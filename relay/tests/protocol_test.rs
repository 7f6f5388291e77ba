//! Wire contract shared by the relay and the node's HTTP transport.

use serde_json::json;
use tessera_engine::protocol::relay::{
    CreateRoomRequest, ErrorBody, EventsQuery, LockRequest, LockResponse, PublishRequest,
    RegisterMemberRequest, RegisterMemberResponse,
};
use tessera_engine::{EventPage, StateFixture, REPLICATION_EVENT};

#[test]
fn test_request_bodies_are_camel_case() {
    let publish = PublishRequest {
        event_type: REPLICATION_EVENT.to_string(),
        content: json!({"txnId": "node-1:1"}),
    };
    assert_eq!(
        serde_json::to_value(&publish).unwrap(),
        json!({"eventType": "tessera.replicate", "content": {"txnId": "node-1:1"}})
    );

    let lock = LockRequest {
        key: "tessera.database".into(),
        ttl_ms: 30_000,
    };
    assert_eq!(
        serde_json::to_value(&lock).unwrap(),
        json!({"key": "tessera.database", "ttlMs": 30000})
    );
}

#[test]
fn test_optional_fields_may_be_omitted() {
    let room: CreateRoomRequest = serde_json::from_str(r#"{"name": "notes"}"#).unwrap();
    assert_eq!(room.name.as_deref(), Some("notes"));
    assert!(room.topic.is_none());

    let member: RegisterMemberRequest = serde_json::from_str(r#"{"username": "laptop"}"#).unwrap();
    assert!(member.display_name.is_none());

    let query: EventsQuery = serde_json::from_str("{}").unwrap();
    assert_eq!(query, EventsQuery::default());
}

#[test]
fn test_event_page_decodes_relay_output() {
    let json = r#"{
        "events": [{
            "eventId": "$abc",
            "roomId": "!r:relay.test",
            "seq": 7,
            "eventType": "tessera.replicate",
            "sender": "@laptop:relay.test",
            "content": {"txnId": "node-1:4", "origin": "node-1", "entries": []},
            "originTs": 1706745600000
        }],
        "nextSince": 7,
        "hasMore": false
    }"#;

    let page: EventPage = serde_json::from_str(json).unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].seq, 7);
    assert_eq!(page.next_since, 7);
    assert!(!page.has_more);
}

#[test]
fn test_responses_round_trip_field_names() {
    let lock: LockResponse =
        serde_json::from_str(r#"{"token": "t-1", "expiresAt": 1706745630000}"#).unwrap();
    assert_eq!(lock.token, "t-1");
    assert_eq!(lock.expires_at, 1706745630000);

    let member: RegisterMemberResponse =
        serde_json::from_str(r#"{"memberId": "@a:relay.test", "accessToken": "secret"}"#).unwrap();
    assert_eq!(member.member_id, "@a:relay.test");

    let error: ErrorBody =
        serde_json::from_str(r#"{"error": "lock tessera.database is held", "code": "conflict"}"#)
            .unwrap();
    assert_eq!(error.code, "conflict");
}

#[test]
fn test_state_content_is_stored_verbatim() {
    let fixture = StateFixture {
        fixture: json!({"id": "db-1", "name": "notes"}),
    };
    let stored = serde_json::to_value(&fixture).unwrap();
    let loaded: StateFixture = serde_json::from_value(stored).unwrap();
    assert_eq!(loaded, fixture);
}
