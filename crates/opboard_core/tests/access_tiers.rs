use opboard_core::{
    open_db_in_memory, AccessLevel, AgentId, ErrorKind, FetchOutcome, InMemoryRoster, KeyOnHand,
    NoopNotifier, OperationId, OperationService, SqliteOperationStore, WaypointId,
};
use rusqlite::Connection;
use serde_json::json;

const OP: &str = "op-tiers";

fn agent(id: &str) -> AgentId {
    AgentId::new(id)
}

fn op_id() -> OperationId {
    OperationId::new(OP)
}

fn roster() -> InMemoryRoster {
    InMemoryRoster::new()
        .with_member("team-read", "agent-reader")
        .with_member("team-write", "agent-writer")
        .with_member("team-limited", "agent-limited")
        .with_member("team-read", "agent-both")
        .with_member("team-write", "agent-both")
        .with_member("team-read", "agent-reader-assigned")
}

fn seed(conn: &Connection, roster: &InMemoryRoster) {
    let store = SqliteOperationStore::try_new(conn).unwrap();
    let service = OperationService::new(&store, roster, &NoopNotifier);
    let snapshot = json!({
        "ID": OP,
        "name": "Tiers",
        "opportals": [
            {"id": "p1", "name": "A", "lat": "1.0", "lng": "1.0"},
            {"id": "p2", "name": "B", "lat": "2.0", "lng": "2.0"},
            {"id": "p3", "name": "C", "lat": "3.0", "lng": "3.0"},
            {"id": "p4", "name": "D", "lat": "4.0", "lng": "4.0"}
        ],
        "links": [
            {"ID": "l1", "fromPortalId": "p1", "toPortalId": "p2",
             "assignments": ["agent-assignee"], "state": "assigned"},
            {"ID": "l2", "fromPortalId": "p3", "toPortalId": "p4",
             "assignments": ["agent-reader-assigned"], "state": "assigned"}
        ],
        "markers": [
            {"ID": "m1", "portalId": "p4", "type": "capture"}
        ],
        "teamlist": [
            {"teamid": "team-read", "role": "read"},
            {"teamid": "team-write", "role": "write"},
            {"teamid": "team-limited", "role": "assignedonly"}
        ]
    });
    service
        .create(&agent("agent-owner"), &serde_json::to_vec(&snapshot).unwrap())
        .unwrap();
}

#[test]
fn resolves_each_tier() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    let access = service.access();

    let cases = [
        ("agent-owner", AccessLevel::Owner),
        ("agent-writer", AccessLevel::Write),
        ("agent-both", AccessLevel::Write),
        ("agent-reader", AccessLevel::Read),
        ("agent-reader-assigned", AccessLevel::Read),
        ("agent-assignee", AccessLevel::AssignedOnly),
        ("agent-limited", AccessLevel::AssignedOnly),
        ("agent-stranger", AccessLevel::None),
    ];
    for (id, expected) in cases {
        assert_eq!(
            access.resolve(&agent(id), &op_id()).unwrap(),
            expected,
            "tier for {id}"
        );
    }
}

#[test]
fn predicates_follow_the_tier_order() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    let access = service.access();
    let op = op_id();

    let owner = agent("agent-owner");
    assert!(access.is_owner(&owner, &op).unwrap());
    assert!(access.has_write_access(&owner, &op).unwrap());
    assert!(access.has_read_access(&owner, &op).unwrap());
    assert!(!access.has_assigned_only_access(&owner, &op).unwrap());

    let writer = agent("agent-writer");
    assert!(!access.is_owner(&writer, &op).unwrap());
    assert!(access.has_write_access(&writer, &op).unwrap());
    assert!(access.has_read_access(&writer, &op).unwrap());

    let reader = agent("agent-reader");
    assert!(!access.has_write_access(&reader, &op).unwrap());
    assert!(access.has_read_access(&reader, &op).unwrap());

    let assigned_reader = agent("agent-reader-assigned");
    assert!(!access.has_assigned_only_access(&assigned_reader, &op).unwrap());

    let assignee = agent("agent-assignee");
    assert!(!access.has_read_access(&assignee, &op).unwrap());
    assert!(access.has_assigned_only_access(&assignee, &op).unwrap());

    let stranger = agent("agent-stranger");
    assert!(!access.has_read_access(&stranger, &op).unwrap());
    assert!(!access.has_assigned_only_access(&stranger, &op).unwrap());
}

#[test]
fn missing_operation_is_not_found_for_resolve_and_false_for_predicates() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    let access = service.access();
    let missing = OperationId::new("nope");

    let err = access.resolve(&agent("agent-owner"), &missing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!access.is_owner(&agent("agent-owner"), &missing).unwrap());
    assert!(!access.has_read_access(&agent("agent-owner"), &missing).unwrap());
}

#[test]
fn roster_membership_changes_take_effect_immediately() {
    let conn = open_db_in_memory().unwrap();
    let mut roster = roster();
    seed(&conn, &roster);
    roster.add_member("team-write", "agent-stranger");
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    assert_eq!(
        service
            .access()
            .resolve(&agent("agent-stranger"), &op_id())
            .unwrap(),
        AccessLevel::Write
    );
}

#[test]
fn readers_fetch_everything_and_assignees_see_only_their_tasks() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let FetchOutcome::Document(full) = service.fetch(&agent("agent-reader"), &op_id(), None).unwrap()
    else {
        panic!("reader should get a document");
    };
    assert_eq!(full.links.len(), 2);
    assert_eq!(full.markers.len(), 1);
    assert_eq!(full.teams.len(), 3);

    let FetchOutcome::Document(view) = service
        .fetch(&agent("agent-assignee"), &op_id(), None)
        .unwrap()
    else {
        panic!("assignee should get a document");
    };
    let links: Vec<&str> = view.links.iter().map(|link| link.task.id.as_str()).collect();
    assert_eq!(links, vec!["l1"]);
    assert!(view.markers.is_empty());
    let waypoints: Vec<&str> = view.waypoints.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(waypoints, vec!["p1", "p2"]);
    assert!(view.teams.is_empty());

    let FetchOutcome::Document(empty) = service
        .fetch(&agent("agent-limited"), &op_id(), None)
        .unwrap()
    else {
        panic!("assigned-only team member should get a document");
    };
    assert!(empty.links.is_empty());
    assert!(empty.waypoints.is_empty());
}

#[test]
fn strangers_are_denied() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let err = service
        .fetch(&agent("agent-stranger"), &op_id(), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = service
        .stat(&agent("agent-stranger"), &op_id())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn update_requires_write_access() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    let snapshot = serde_json::to_vec(&json!({
        "ID": OP,
        "name": "Renamed",
        "opportals": []
    }))
    .unwrap();

    for denied in ["agent-reader", "agent-assignee", "agent-stranger"] {
        let err = service
            .update(&agent(denied), &op_id(), &snapshot)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{denied}");
    }
    assert_eq!(
        service.tracker().stat(&op_id()).unwrap().name,
        "Tiers"
    );

    service
        .update(&agent("agent-writer"), &op_id(), &snapshot)
        .unwrap();
    assert_eq!(
        service.tracker().stat(&op_id()).unwrap().name,
        "Renamed"
    );
}

#[test]
fn any_visible_agent_reports_their_own_keys() {
    let conn = open_db_in_memory().unwrap();
    let roster = roster();
    seed(&conn, &roster);
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    let key = |waypoint: &str, count: i64| KeyOnHand {
        waypoint_id: WaypointId::new(waypoint),
        agent: agent("agent-owner"),
        count,
        capsule_label: String::new(),
    };

    service
        .set_key_on_hand(&agent("agent-assignee"), &op_id(), &key("p1", 3))
        .unwrap();
    let FetchOutcome::Document(document) = service
        .fetch(&agent("agent-owner"), &op_id(), None)
        .unwrap()
    else {
        panic!("owner should get a document");
    };
    assert_eq!(document.keys.len(), 1);
    assert_eq!(document.keys[0].agent, agent("agent-assignee"));
    assert_eq!(document.keys[0].count, 3);

    let err = service
        .set_key_on_hand(&agent("agent-assignee"), &op_id(), &key("p1", -1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = service
        .set_key_on_hand(&agent("agent-assignee"), &op_id(), &key("p9", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = service
        .set_key_on_hand(&agent("agent-stranger"), &op_id(), &key("p1", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}
