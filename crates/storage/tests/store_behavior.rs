#![forbid(unsafe_code)]

use cdr_core::{DocId, FilterSetMember, MAX_VERSION_DATE, VersionSpec};
use cdr_storage::{
    AddDocumentRequest, AddVersionRequest, CdrStore, CtlAction, ExternMapOutcome,
    FilterSetContent, StoreError,
};

fn scratch_store() -> (tempfile::TempDir, CdrStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CdrStore::open(dir.path()).expect("open store");
    (dir, store)
}

fn seed_document(store: &mut CdrStore, id: i32, title: &str, xml: &str) {
    store
        .add_document(AddDocumentRequest {
            id: DocId::new(id),
            title: title.to_string(),
            doc_type: "Filter".to_string(),
            active_status: "A".to_string(),
            first_pub: None,
            xml: xml.to_string(),
        })
        .expect("add document");
}

fn seed_version(store: &mut CdrStore, id: i32, num: i32, dt: &str, publishable: bool) {
    store
        .add_version(AddVersionRequest {
            id: DocId::new(id),
            num,
            dt: dt.to_string(),
            publishable,
            xml: format!("<v>{num}</v>"),
        })
        .expect("add version");
}

#[test]
fn version_resolution_is_deterministic() {
    let (_dir, mut store) = scratch_store();
    seed_document(&mut store, 100, "Versioned", "<current/>");
    seed_version(&mut store, 100, 1, "2020-01-01", false);
    seed_version(&mut store, 100, 2, "2020-02-01", true);
    seed_version(&mut store, 100, 3, "2020-03-01", false);
    let id = DocId::new(100);

    assert_eq!(
        store.doc_xml(id, VersionSpec::Lastp, MAX_VERSION_DATE).unwrap(),
        "<v>2</v>"
    );
    assert_eq!(
        store.doc_xml(id, VersionSpec::Last, "2020-02-15").unwrap(),
        "<v>2</v>"
    );
    assert!(matches!(
        store.doc_xml(id, VersionSpec::Lastp, "2020-01-15"),
        Err(StoreError::VersionNotFound { .. })
    ));
    assert_eq!(
        store.doc_xml(id, VersionSpec::Current, MAX_VERSION_DATE).unwrap(),
        "<current/>"
    );
    assert_eq!(
        store.doc_xml(id, VersionSpec::Number(1), MAX_VERSION_DATE).unwrap(),
        "<v>1</v>"
    );
}

#[test]
fn pv_num_is_zero_without_publishable_versions() {
    let (_dir, mut store) = scratch_store();
    seed_document(&mut store, 7, "NoPub", "<d/>");
    seed_version(&mut store, 7, 1, "2020-01-01", false);
    assert_eq!(store.get_pv_num(DocId::new(7)).unwrap(), 0);
    seed_version(&mut store, 7, 2, "2020-02-01", true);
    assert_eq!(store.get_pv_num(DocId::new(7)).unwrap(), 2);
}

#[test]
fn filter_set_preserves_member_order() {
    let (_dir, mut store) = scratch_store();
    for id in [1, 2, 3] {
        seed_document(&mut store, id, &format!("F{id}"), "<xsl/>");
    }
    let total = store
        .add_filter_set(FilterSetContent {
            name: "Ordered".to_string(),
            description: "order check".to_string(),
            notes: None,
            members: vec![
                FilterSetMember::Filter(DocId::new(3)),
                FilterSetMember::Filter(DocId::new(1)),
                FilterSetMember::Filter(DocId::new(2)),
            ],
        })
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(
        store.filters_in_set("Ordered").unwrap(),
        vec![DocId::new(3), DocId::new(1), DocId::new(2)]
    );
}

#[test]
fn nested_sets_expand_in_place() {
    let (_dir, mut store) = scratch_store();
    for id in [1, 2, 3] {
        seed_document(&mut store, id, &format!("F{id}"), "<xsl/>");
    }
    store
        .add_filter_set(FilterSetContent {
            name: "Inner".to_string(),
            description: "inner".to_string(),
            notes: None,
            members: vec![FilterSetMember::Filter(DocId::new(2))],
        })
        .unwrap();
    let inner_id = store.filter_set_info("Inner").unwrap().id;
    let total = store
        .add_filter_set(FilterSetContent {
            name: "Outer".to_string(),
            description: "outer".to_string(),
            notes: None,
            members: vec![
                FilterSetMember::Filter(DocId::new(1)),
                FilterSetMember::Subset(inner_id),
                FilterSetMember::Filter(DocId::new(3)),
            ],
        })
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(
        store.filters_in_set("Outer").unwrap(),
        vec![DocId::new(1), DocId::new(2), DocId::new(3)]
    );
}

#[test]
fn cyclic_membership_fails_before_commit() {
    let (_dir, mut store) = scratch_store();
    store
        .add_filter_set(FilterSetContent {
            name: "A".to_string(),
            description: "a".to_string(),
            notes: None,
            members: vec![],
        })
        .unwrap();
    let a_id = store.filter_set_info("A").unwrap().id;

    // Self-reference: the replacement walk must hit the depth bound and
    // leave the old (empty) membership intact.
    let err = store
        .rep_filter_set(FilterSetContent {
            name: "A".to_string(),
            description: "a".to_string(),
            notes: None,
            members: vec![FilterSetMember::Subset(a_id)],
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::FilterSetDepthExceeded { .. }));
    assert_eq!(store.filters_in_set("A").unwrap(), vec![]);
}

#[test]
fn nested_set_cannot_be_deleted() {
    let (_dir, mut store) = scratch_store();
    store
        .add_filter_set(FilterSetContent {
            name: "Leaf".to_string(),
            description: "leaf".to_string(),
            notes: None,
            members: vec![],
        })
        .unwrap();
    let leaf_id = store.filter_set_info("Leaf").unwrap().id;
    store
        .add_filter_set(FilterSetContent {
            name: "Parent".to_string(),
            description: "parent".to_string(),
            notes: None,
            members: vec![FilterSetMember::Subset(leaf_id)],
        })
        .unwrap();

    assert!(matches!(
        store.del_filter_set("Leaf"),
        Err(StoreError::FilterSetInUse(_))
    ));
    store.del_filter_set("Parent").unwrap();
    store.del_filter_set("Leaf").unwrap();
    assert!(matches!(
        store.filter_set_info("Leaf"),
        Err(StoreError::UnknownFilterSet(_))
    ));
}

#[test]
fn replace_clears_and_reinserts_membership() {
    let (_dir, mut store) = scratch_store();
    for id in [1, 2] {
        seed_document(&mut store, id, &format!("F{id}"), "<xsl/>");
    }
    store
        .add_filter_set(FilterSetContent {
            name: "S".to_string(),
            description: "v1".to_string(),
            notes: None,
            members: vec![FilterSetMember::Filter(DocId::new(1))],
        })
        .unwrap();
    let total = store
        .rep_filter_set(FilterSetContent {
            name: "S".to_string(),
            description: "v2".to_string(),
            notes: Some("note".to_string()),
            members: vec![FilterSetMember::Filter(DocId::new(2))],
        })
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(store.filters_in_set("S").unwrap(), vec![DocId::new(2)]);
    let info = store.filter_set_info("S").unwrap();
    assert_eq!(info.description, "v2");
    assert_eq!(info.notes.as_deref(), Some("note"));
}

#[test]
fn title_lookup_distinguishes_missing_and_ambiguous() {
    let (_dir, mut store) = scratch_store();
    seed_document(&mut store, 1, "Unique", "<a/>");
    seed_document(&mut store, 2, "Shared", "<b/>");
    seed_document(&mut store, 3, "Shared", "<c/>");

    assert_eq!(store.unique_id_for_title("Unique").unwrap(), DocId::new(1));
    assert!(matches!(
        store.unique_id_for_title("Nope"),
        Err(StoreError::UnknownTitle(_))
    ));
    assert!(matches!(
        store.unique_id_for_title("Shared"),
        Err(StoreError::AmbiguousTitle(_))
    ));
}

#[test]
fn extern_map_miss_inserts_exactly_once() {
    let (_dir, mut store) = scratch_store();
    store.add_map_usage("CT.gov Facilities").unwrap();

    assert_eq!(
        store
            .map_external_value("CT.gov Facilities", "M D Anderson")
            .unwrap(),
        ExternMapOutcome::Unmapped
    );
    assert_eq!(
        store
            .map_external_value("CT.gov Facilities", "M D Anderson")
            .unwrap(),
        ExternMapOutcome::Unmapped
    );
    let table = store
        .run_query(
            "SELECT COUNT(*) FROM external_map WHERE value = ?",
            &["M D Anderson".to_string()],
        )
        .unwrap();
    assert_eq!(table.rows, vec![vec![Some("1".to_string())]]);
}

#[test]
fn extern_map_three_way_outcomes() {
    let (_dir, mut store) = scratch_store();
    store.add_map_usage("CT.gov Facilities").unwrap();
    store
        .add_external_mapping("CT.gov Facilities", "Known Site", Some(DocId::new(55)), false)
        .unwrap();
    store
        .add_external_mapping("CT.gov Facilities", "Junk Value", None, true)
        .unwrap();

    assert_eq!(
        store
            .map_external_value("CT.gov Facilities", "Known Site")
            .unwrap(),
        ExternMapOutcome::Mapped(DocId::new(55))
    );
    assert_eq!(
        store
            .map_external_value("CT.gov Facilities", "Junk Value")
            .unwrap(),
        ExternMapOutcome::Drop
    );
    assert!(matches!(
        store.map_external_value("No Such Usage", "x"),
        Err(StoreError::UnknownMapUsage(_))
    ));
}

#[test]
fn nomap_patterns_classify_new_rows() {
    let (_dir, mut store) = scratch_store();
    store.add_map_usage("CT.gov Facilities").unwrap();
    store.add_nomap_pattern("%clinical trials office%").unwrap();

    store
        .map_external_value("CT.gov Facilities", "The Clinical Trials Office")
        .unwrap();
    let table = store
        .run_query(
            "SELECT mappable FROM external_map WHERE value = ?",
            &["The Clinical Trials Office".to_string()],
        )
        .unwrap();
    assert_eq!(table.rows, vec![vec![Some("N".to_string())]]);
}

#[test]
fn restricted_query_rejects_mutation_before_prepare() {
    let (_dir, store) = scratch_store();
    assert!(matches!(
        store.run_query("DELETE FROM document WHERE id = 1", &[]),
        Err(StoreError::UnsafeQuery)
    ));
    // The document table is untouched even though the statement would have
    // been valid SQL.
    let table = store
        .run_query("SELECT COUNT(*) FROM document", &[])
        .unwrap();
    assert_eq!(table.rows, vec![vec![Some("0".to_string())]]);
}

#[test]
fn restricted_query_checks_placeholder_count() {
    let (_dir, store) = scratch_store();
    assert!(matches!(
        store.run_query("SELECT ? , ?", &["a".to_string()]),
        Err(StoreError::PlaceholderMismatch {
            expected: 2,
            supplied: 1
        })
    ));
}

#[test]
fn restricted_query_marks_nulls() {
    let (_dir, mut store) = scratch_store();
    seed_document(&mut store, 9, "NullCheck", "<d/>");
    let table = store
        .run_query("SELECT title, first_pub FROM document WHERE id = ?", &["9".to_string()])
        .unwrap();
    assert_eq!(table.columns, vec!["title", "first_pub"]);
    assert_eq!(
        table.rows,
        vec![vec![Some("NullCheck".to_string()), None]]
    );
}

#[test]
fn zip_validation_truncates_to_five() {
    let (_dir, mut store) = scratch_store();
    store.add_zip("20850").unwrap();
    assert_eq!(
        store.valid_zip("20850-3300").unwrap(),
        Some("20850".to_string())
    );
    assert_eq!(store.valid_zip("99999").unwrap(), None);
    assert_eq!(store.valid_zip("123").unwrap(), None);
}

#[test]
fn session_lifecycle() {
    let (_dir, mut store) = scratch_store();
    store.add_user("alice", "secret").unwrap();

    assert!(matches!(
        store.logon("alice", "wrong"),
        Err(StoreError::BadPassword)
    ));
    assert!(matches!(
        store.logon("nobody", "x"),
        Err(StoreError::UnknownUser(_))
    ));

    let session = store.logon("alice", "secret").unwrap();
    let info = store.validate_session(&session).unwrap();
    assert_eq!(info.usr, "alice");

    let twin = store.dup_session(&session).unwrap();
    assert_ne!(twin, session);
    assert_eq!(store.validate_session(&twin).unwrap().usr, "alice");

    store.logoff(&session).unwrap();
    assert!(matches!(
        store.validate_session(&session),
        Err(StoreError::SessionEnded(_))
    ));
    // The duplicate stays open independently.
    assert!(store.validate_session(&twin).is_ok());
}

#[test]
fn action_grants_gate_privileged_commands() {
    let (_dir, mut store) = scratch_store();
    store.add_user("admin", "pw").unwrap();
    assert!(!store.can_do("admin", "SHUTDOWN").unwrap());
    store.grant_action("admin", "SHUTDOWN").unwrap();
    assert!(store.can_do("admin", "SHUTDOWN").unwrap());
}

#[test]
fn ctl_create_supersedes_and_inactivate_hides() {
    let (_dir, mut store) = scratch_store();
    store
        .set_ctl(CtlAction::Create {
            grp: "Publishing".to_string(),
            key: "ThrottleDocs".to_string(),
            val: "100".to_string(),
            comment: None,
        })
        .unwrap();
    store
        .set_ctl(CtlAction::Create {
            grp: "Publishing".to_string(),
            key: "ThrottleDocs".to_string(),
            val: "250".to_string(),
            comment: Some("raised".to_string()),
        })
        .unwrap();

    let values = store.ctl_values().unwrap();
    assert_eq!(
        values.get(&("Publishing".to_string(), "ThrottleDocs".to_string())),
        Some(&"250".to_string())
    );

    store
        .set_ctl(CtlAction::Inactivate {
            grp: "Publishing".to_string(),
            key: "ThrottleDocs".to_string(),
        })
        .unwrap();
    assert!(store.ctl_values().unwrap().is_empty());
}

#[test]
fn version_info_reports_change_state() {
    let (_dir, mut store) = scratch_store();
    seed_document(&mut store, 5, "Doc", "<v>2</v>");
    seed_version(&mut store, 5, 1, "2020-01-01", false);
    seed_version(&mut store, 5, 2, "2020-02-01", true);

    let info = store.version_info(DocId::new(5)).unwrap();
    assert_eq!(info.last_any, 2);
    assert_eq!(info.last_pub, 2);
    assert!(!info.is_changed);

    seed_document(&mut store, 5, "Doc", "<v>edited</v>");
    assert!(store.version_info(DocId::new(5)).unwrap().is_changed);
}
