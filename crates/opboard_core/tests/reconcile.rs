use opboard_core::service::reconcile_service::EntityKind;
use opboard_core::{
    open_db_in_memory, AgentId, ErrorKind, FetchOutcome, InMemoryRoster, NoopNotifier, OpColor,
    Operation, OperationId, OperationService, SkipReason, SkippedEntity, SqliteOperationStore,
    TaskId, TaskState, TeamRole, WaypointId,
};
use rusqlite::Connection;
use serde_json::{json, Value};

const OWNER: &str = "agent-owner";
const OP: &str = "op-1";

fn base_snapshot() -> Value {
    json!({
        "ID": OP,
        "name": "Alpha",
        "color": "groupa",
        "comment": "first pass",
        "opportals": [
            {"id": "p1", "name": "Fountain", "lat": "10.5", "lng": "20.25"},
            {"id": "p2", "name": "Library", "lat": "-33.9", "lng": "151.2"},
            {"id": "p3", "name": "Station", "lat": "0", "lng": "0"}
        ],
        "links": [
            {
                "ID": "l1",
                "fromPortalId": "p1",
                "toPortalId": "p2",
                "color": "groupb",
                "assignments": ["agent-b"],
                "state": "assigned",
                "order": 1
            }
        ],
        "markers": [
            {
                "ID": "m1",
                "portalId": "p3",
                "type": "destroy",
                "assignments": ["agent-c"],
                "state": "assigned",
                "dependsOn": ["l1"],
                "order": 2
            }
        ],
        "teamlist": [],
        "keysonhand": []
    })
}

fn raw(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

fn owner() -> AgentId {
    AgentId::new(OWNER)
}

fn op_id() -> OperationId {
    OperationId::new(OP)
}

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn fetch_document(service: &OperationService<'_, SqliteOperationStore<'_>>) -> Operation {
    match service.fetch(&owner(), &op_id(), None).unwrap() {
        FetchOutcome::Document(document) => document,
        other => panic!("expected document, got {other:?}"),
    }
}

#[test]
fn create_stores_full_document_owned_by_caller() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let mut snapshot = base_snapshot();
    snapshot["creator"] = json!("someone-else");
    let report = service.create(&owner(), &raw(&snapshot)).unwrap();
    assert_eq!(report.waypoints.inserted, 3);
    assert_eq!(report.links.inserted, 1);
    assert_eq!(report.markers.inserted, 1);
    assert!(report.skipped.is_empty());

    let document = fetch_document(&service);
    assert_eq!(document.owner, owner());
    assert_eq!(document.name, "Alpha");
    assert_eq!(document.color, OpColor::GroupA);
    assert_eq!(document.comment, "first pass");
    assert_eq!(document.waypoints.len(), 3);
    assert_eq!(document.links[0].color, OpColor::GroupB);
    assert_eq!(document.links[0].task.assignments, vec![AgentId::new("agent-b")]);
    assert_eq!(document.markers[0].task.depends_on.len(), 1);
    assert_eq!(
        document.anchors,
        vec![WaypointId::new("p1"), WaypointId::new("p2")]
    );
    assert!(!document.modified.is_empty());
    assert!(!document.fetched.is_empty());
}

#[test]
fn identical_resubmission_reports_no_changes() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();
    let before = fetch_document(&service);

    let report = service
        .update(&owner(), &op_id(), &raw(&base_snapshot()))
        .unwrap();

    assert!(!report.has_changes());
    assert_eq!(report.waypoints.unchanged, 3);
    assert_eq!(report.links.unchanged, 1);
    assert_eq!(report.markers.unchanged, 1);

    let after = fetch_document(&service);
    assert_eq!(before.waypoints, after.waypoints);
    assert_eq!(before.links, after.links);
    assert_eq!(before.markers, after.markers);
}

#[test]
fn omitted_entities_are_deleted() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["markers"] = json!([]);
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert_eq!(report.markers.deleted, 1);
    assert!(fetch_document(&service).markers.is_empty());

    let assignments: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assignments WHERE op_id = ?1 AND task_id = 'm1';",
            [OP],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(assignments, 0);
}

#[test]
fn empty_link_list_deletes_every_link() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["links"] = json!([]);
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert_eq!(report.links.deleted, 1);
    let document = fetch_document(&service);
    assert!(document.links.is_empty());
    assert!(document.anchors.is_empty());
    assert!(
        document.markers[0].task.depends_on.is_empty(),
        "dependency on a deleted link must go with it"
    );
}

#[test]
fn removing_a_waypoint_cascades_to_its_markers() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["opportals"].as_array_mut().unwrap().pop();
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert_eq!(report.waypoints.deleted, 1);
    assert_eq!(report.skipped_ids(EntityKind::Marker), vec!["m1"]);
    let document = fetch_document(&service);
    assert_eq!(document.waypoints.len(), 2);
    assert!(document.markers.is_empty());
}

#[test]
fn entity_with_missing_waypoint_is_skipped_and_others_apply() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["name"] = json!("Alpha v2");
    snapshot["links"]
        .as_array_mut()
        .unwrap()
        .push(json!({"ID": "l2", "fromPortalId": "p1", "toPortalId": "p9"}));
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.kind, EntityKind::Link);
    assert_eq!(skipped.id, "l2");
    assert_eq!(
        skipped.reason,
        SkipReason::MissingWaypoint(WaypointId::new("p9"))
    );

    let document = fetch_document(&service);
    assert_eq!(document.name, "Alpha v2");
    assert_eq!(document.links.len(), 1);
    assert_eq!(document.links[0].task.id.as_str(), "l1");
}

#[test]
fn active_mode_keeps_assignments_and_state() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["mode"] = json!("active");
    snapshot["links"][0]["assignments"] = json!([]);
    snapshot["links"][0]["state"] = json!("pending");
    snapshot["links"][0]["comment"] = json!("go at dawn");
    snapshot["links"][0]["order"] = json!(7);
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert_eq!(report.links.updated, 1);

    let link = fetch_document(&service).links.remove(0);
    assert_eq!(link.task.assignments, vec![AgentId::new("agent-b")]);
    assert_eq!(link.task.state, TaskState::Assigned);
    assert_eq!(link.task.comment, "go at dawn");
    assert_eq!(link.task.order, 7);

    snapshot["mode"] = json!("design");
    service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    let link = fetch_document(&service)
        .links
        .into_iter()
        .find(|link| link.task.id.as_str() == "l1")
        .unwrap();
    assert!(link.task.assignments.is_empty());
    assert_eq!(link.task.state, TaskState::Pending);
}

#[test]
fn endpoint_change_replaces_link_and_keeps_inbound_dependencies() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["links"][0]["toPortalId"] = json!("p3");
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert_eq!(report.links.updated, 1);

    let document = fetch_document(&service);
    let link = &document.links[0];
    assert_eq!(link.from.as_str(), "p1");
    assert_eq!(link.to.as_str(), "p3");
    assert_eq!(link.task.assignments, vec![AgentId::new("agent-b")]);
    assert_eq!(
        document.markers[0].task.depends_on,
        vec![link.task.id.clone()]
    );
}

#[test]
fn marker_id_reused_as_link_replaces_the_marker() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["markers"] = json!([]);
    snapshot["links"]
        .as_array_mut()
        .unwrap()
        .push(json!({"ID": "m1", "fromPortalId": "p2", "toPortalId": "p3"}));
    service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    let document = fetch_document(&service);
    assert!(document.markers.is_empty());
    let ids: Vec<&str> = document
        .links
        .iter()
        .map(|link| link.task.id.as_str())
        .collect();
    assert_eq!(ids, vec!["m1", "l1"]);
}

#[test]
fn update_rejects_mismatched_or_unparsable_snapshots() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut other = base_snapshot();
    other["ID"] = json!("op-2");
    let err = service.update(&owner(), &op_id(), &raw(&other)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);

    let err = service.update(&owner(), &op_id(), b"{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);

    let mut shared_id = base_snapshot();
    shared_id["links"][0]["ID"] = json!("m1");
    let err = service
        .update(&owner(), &op_id(), &raw(&shared_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);

    assert_eq!(fetch_document(&service).name, "Alpha");
}

#[test]
fn update_of_missing_operation_is_not_found() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let err = service
        .update(&owner(), &op_id(), &raw(&base_snapshot()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn create_is_once_only() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut second = base_snapshot();
    second["name"] = json!("Hijack");
    second["opportals"] = json!([]);
    second["links"] = json!([]);
    second["markers"] = json!([]);
    let err = service
        .create(&AgentId::new("agent-other"), &raw(&second))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let document = fetch_document(&service);
    assert_eq!(document.name, "Alpha");
    assert_eq!(document.owner, owner());
    assert_eq!(document.waypoints.len(), 3);
}

#[test]
fn create_applies_team_list_and_keys_with_known_waypoints() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let mut snapshot = base_snapshot();
    snapshot["teamlist"] = json!([
        {"teamid": "team-read", "role": "read"},
        {"teamid": "team-write", "role": "write"}
    ]);
    snapshot["keysonhand"] = json!([
        {"portalId": "p1", "gid": "agent-b", "onhand": 3, "capsule": "cap-1"},
        {"portalId": "p9", "gid": "agent-b", "onhand": 1, "capsule": ""}
    ]);
    let report = service.create(&owner(), &raw(&snapshot)).unwrap();
    assert_eq!(report.skipped_ids(EntityKind::Key), vec!["p9"]);

    let document = fetch_document(&service);
    let roles: Vec<(&str, TeamRole)> = document
        .teams
        .iter()
        .map(|binding| (binding.team_id.as_str(), binding.role))
        .collect();
    assert_eq!(
        roles,
        vec![("team-read", TeamRole::Read), ("team-write", TeamRole::Write)]
    );
    assert_eq!(document.keys.len(), 1);
    assert_eq!(document.keys[0].count, 3);
    assert_eq!(document.keys[0].capsule_label, "cap-1");
}

#[test]
fn update_ignores_incoming_team_list() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["teamlist"] = json!([{"teamid": "team-x", "role": "write"}]);
    service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert!(fetch_document(&service).teams.is_empty());
}

#[test]
fn resubmission_after_dropping_a_dependency_target_is_a_no_op() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["links"] = json!([]);
    let first = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert!(first.has_changes());

    let second = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert!(!second.has_changes());
    assert_eq!(second.markers.unchanged, 1);

    let document = fetch_document(&service);
    assert!(document.markers[0].task.depends_on.is_empty());
}

#[test]
fn create_drops_dependencies_on_tasks_outside_the_snapshot() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let mut snapshot = base_snapshot();
    snapshot["markers"][0]["dependsOn"] = json!(["l1", "nowhere"]);
    service.create(&owner(), &raw(&snapshot)).unwrap();

    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();
    assert!(!report.has_changes());
    let document = fetch_document(&service);
    assert_eq!(
        document.markers[0].task.depends_on,
        vec![TaskId::new("l1")]
    );
}

#[test]
fn marker_and_link_sharing_an_id_are_rejected() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);

    let mut clash = base_snapshot();
    clash["links"][0]["ID"] = json!("m1");
    let err = service.create(&owner(), &raw(&clash)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
    let operations: i64 = conn
        .query_row("SELECT COUNT(*) FROM operations;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(operations, 0);

    service.create(&owner(), &raw(&base_snapshot())).unwrap();
    let err = service.update(&owner(), &op_id(), &raw(&clash)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);

    let document = fetch_document(&service);
    assert_eq!(document.markers.len(), 1);
    assert_eq!(document.links.len(), 1);
    assert_eq!(document.links[0].task.id.as_str(), "l1");
}

#[test]
fn store_failure_keeps_that_task_and_applies_siblings() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();
    let before = service.stat(&owner(), &op_id()).unwrap();

    conn.execute_batch(
        "CREATE TEMP TRIGGER lock_m1 BEFORE UPDATE ON tasks
         WHEN NEW.task_id = 'm1'
         BEGIN SELECT RAISE(ABORT, 'm1 is locked'); END;",
    )
    .unwrap();

    let mut snapshot = base_snapshot();
    snapshot["markers"][0]["comment"] = json!("hold position");
    snapshot["markers"][0]["order"] = json!(9);
    snapshot["links"][0]["comment"] = json!("after m1");
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.kind, EntityKind::Marker);
    assert_eq!(skipped.id, "m1");
    assert!(
        matches!(&skipped.reason, SkipReason::Store(message) if message.contains("m1 is locked"))
    );
    assert_eq!(report.links.updated, 1);
    assert_eq!(report.markers.deleted, 0);

    let document = fetch_document(&service);
    let marker = &document.markers[0];
    assert_eq!(marker.task.id.as_str(), "m1");
    assert_eq!(marker.task.comment, "");
    assert_eq!(marker.task.order, 2);
    assert_eq!(document.links[0].task.comment, "after m1");

    let after = service.stat(&owner(), &op_id()).unwrap();
    assert!(after.modified > before.modified);
}

#[test]
fn unparsable_coordinate_skips_only_that_waypoint() {
    let conn = setup();
    let store = SqliteOperationStore::try_new(&conn).unwrap();
    let roster = InMemoryRoster::new();
    let service = OperationService::new(&store, &roster, &NoopNotifier);
    service.create(&owner(), &raw(&base_snapshot())).unwrap();

    let mut snapshot = base_snapshot();
    snapshot["name"] = json!("Alpha v2");
    snapshot["opportals"][2]["lat"] = json!("95.0");
    let report = service.update(&owner(), &op_id(), &raw(&snapshot)).unwrap();

    assert_eq!(report.waypoints.deleted, 1);
    assert_eq!(report.waypoints.unchanged, 2);
    assert_eq!(report.skipped_ids(EntityKind::Waypoint), vec!["p3"]);
    assert!(report.skipped.contains(&SkippedEntity {
        kind: EntityKind::Waypoint,
        id: "p3".to_string(),
        reason: SkipReason::InvalidCoordinate("95.0".to_string()),
    }));
    assert!(report.skipped.contains(&SkippedEntity {
        kind: EntityKind::Marker,
        id: "m1".to_string(),
        reason: SkipReason::MissingWaypoint(WaypointId::new("p3")),
    }));

    let document = fetch_document(&service);
    assert_eq!(document.name, "Alpha v2");
    let ids: Vec<&str> = document
        .waypoints
        .iter()
        .map(|waypoint| waypoint.id.as_str())
        .collect();
    assert_eq!(ids, vec!["p1", "p2"]);
    assert!(document.markers.is_empty());
    assert_eq!(document.links.len(), 1);
}
