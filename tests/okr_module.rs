use okra::okr::{
    apply_proposal, create_proposal, parse_and_validate_document, OkrStore, PermissionConfig,
    Scope,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const VALID_ORG_DOC: &str = r#"scope: org
objectives:
  - objective_id: OBJ-1
    objective: Grow adoption.
    owner_id: team-growth
    key_results:
      - kr_id: KR-USERS
        description: Reach 100 weekly users.
        owner_id: team-growth
        metric_key: manual.users
        baseline: 20
        target: 100
        confidence: 0.7
        status: in_progress
        evidence:
          - crm:export
"#;

fn write_okrs(dir: &Path) {
    fs::create_dir_all(dir).expect("mkdir");
    fs::write(dir.join("org.yml"), VALID_ORG_DOC).expect("write org.yml");
    fs::write(
        dir.join("permissions.yml"),
        "permissions:\n  read:\n    - all\n  write:\n    - owner_id_match\n",
    )
    .expect("write permissions.yml");
}

#[test]
fn valid_documents_normalize_into_scoped_records() {
    let doc = parse_and_validate_document(VALID_ORG_DOC, "okrs/org.yml").expect("parse");
    assert_eq!(doc.scope, Scope::Org);
    assert_eq!(doc.objectives.len(), 1);
    assert_eq!(doc.objectives[0].key_results[0].id, "KR-USERS");
    assert_eq!(doc.objectives[0].key_results[0].baseline, 20.0);
}

#[test]
fn validation_aggregates_field_errors_with_paths() {
    let broken = r#"scope: org
objectives:
  - objective_id: ""
    objective: ""
    key_results:
      - kr_id: KR-1
        description: Something.
        owner_id: someone
        metric_key: m.key
        baseline: 1
        target: 2
        confidence: 3.5
        status: in_progress
        evidence:
          - ok
"#;
    let errs = parse_and_validate_document(broken, "okrs/broken.yml")
        .expect_err("must aggregate errors");
    let rendered = errs.to_string();
    assert!(rendered.contains("objectives[0].objective_id"));
    assert!(rendered.contains("objectives[0].objective"));
    assert!(rendered.contains("confidence"));
    assert!(rendered.contains("okrs/broken.yml"));
}

#[test]
fn invalid_scope_and_missing_evidence_are_reported() {
    let broken = r#"scope: galaxy
objectives:
  - objective_id: OBJ-1
    objective: Something.
    owner_id: team
    key_results:
      - kr_id: KR-1
        description: Something.
        owner_id: someone
        metric_key: m.key
        baseline: 1
        target: 2
        confidence: 0.5
        status: in_progress
"#;
    let errs = parse_and_validate_document(broken, "okrs/broken.yml")
        .expect_err("must reject");
    let rendered = errs.to_string();
    assert!(rendered.contains("invalid scope"));
    assert!(rendered.contains("evidence list is required"));
}

#[test]
fn store_load_rejects_cross_document_duplicate_kr_ids() {
    let dir = tempdir().expect("tempdir");
    let okrs = dir.path().join("okrs");
    fs::create_dir_all(&okrs).expect("mkdir");
    fs::write(okrs.join("a.yml"), VALID_ORG_DOC).expect("write a");
    fs::write(
        okrs.join("b.yml"),
        VALID_ORG_DOC.replace("OBJ-1", "OBJ-2"),
    )
    .expect("write b");

    let err = OkrStore::load_from_dir(&okrs).expect_err("duplicate kr ids");
    assert!(err.contains("KR-USERS"));
    assert!(err.contains("already defined"));
}

#[test]
fn store_lookups_resolve_objectives_and_key_results() {
    let dir = tempdir().expect("tempdir");
    let okrs = dir.path().join("okrs");
    write_okrs(&okrs);

    let store = OkrStore::load_from_dir(&okrs).expect("load");
    assert_eq!(store.org_documents().len(), 1);

    let objective = store.objective("OBJ-1").expect("objective");
    assert_eq!(objective.scope, Scope::Org);

    let kr = store.key_result("KR-USERS").expect("kr");
    assert_eq!(kr.objective.id, "OBJ-1");
    assert!(store.objective("OBJ-MISSING").is_none());

    let ids = store.list_objective_ids();
    assert_eq!(ids[&Scope::Org], vec!["OBJ-1".to_string()]);
    assert!(ids[&Scope::Team].is_empty());
}

#[test]
fn permissions_rules_gate_write_access() {
    let config: PermissionConfig = {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("permissions.yml");
        fs::write(
            &path,
            "permissions:\n  read:\n    - all\n  write:\n    - owner_id_match\n    - delegated_explicitly\ndelegations:\n  team-growth:\n    - bot-1\n",
        )
        .expect("write");
        PermissionConfig::load(&path).expect("load")
    };

    assert!(config.can_propose("team-growth", "team-growth"));
    assert!(config.can_propose("bot-1", "team-growth"));
    assert!(!config.can_propose("bot-2", "team-growth"));
    assert!(!config.can_propose("", "team-growth"));

    // Deny-all default when no permissions file exists.
    let empty = PermissionConfig::default();
    assert!(!empty.can_propose("team-growth", "team-growth"));
}

#[test]
fn propose_then_apply_round_trips_through_the_package() {
    let dir = tempdir().expect("tempdir");
    let okrs = dir.path().join("okrs");
    write_okrs(&okrs);

    let updates = dir.path().join("updates");
    fs::create_dir_all(&updates).expect("mkdir updates");
    fs::write(
        updates.join("org.yml"),
        VALID_ORG_DOC.replace("baseline: 20", "baseline: 25"),
    )
    .expect("write update");

    let proposals = dir.path().join("proposals");
    let meta = create_proposal("team-growth", &updates, &okrs, &proposals, "bump baseline")
        .expect("propose");
    assert_eq!(meta.agent_id, "team-growth");
    assert_eq!(meta.files, vec!["org.yml".to_string()]);
    assert_eq!(meta.note, "bump baseline");

    let proposal_dir = Path::new(&meta.proposal_dir);
    assert!(proposal_dir.join("proposal.json").exists());
    assert!(proposal_dir.join("org.yml").exists());
    assert_eq!(meta.diff_file, "changes.diff");
    let diff = fs::read_to_string(proposal_dir.join("changes.diff")).expect("diff");
    assert!(diff.contains("-        baseline: 20"));
    assert!(diff.contains("+        baseline: 25"));

    // Apply refuses without confirmation, then copies the files in.
    let err = apply_proposal(proposal_dir, false).expect_err("needs confirmation");
    assert!(err.contains("--i-understand"));

    apply_proposal(proposal_dir, true).expect("apply");
    let applied = fs::read_to_string(okrs.join("org.yml")).expect("read applied");
    assert!(applied.contains("baseline: 25"));
}

#[test]
fn propose_rejects_agents_without_write_permission() {
    let dir = tempdir().expect("tempdir");
    let okrs = dir.path().join("okrs");
    write_okrs(&okrs);

    let updates = dir.path().join("updates");
    fs::create_dir_all(&updates).expect("mkdir updates");
    fs::write(updates.join("org.yml"), VALID_ORG_DOC).expect("write update");

    let proposals = dir.path().join("proposals");
    let err = create_proposal("intruder", &updates, &okrs, &proposals, "")
        .expect_err("must reject foreign agents");
    assert!(err.contains("not permitted"));
    // A rejected proposal leaves nothing behind.
    assert!(
        !proposals.exists()
            || fs::read_dir(&proposals).expect("read proposals").next().is_none()
    );
}

#[test]
fn propose_rejects_direct_edits_to_the_okrs_dir() {
    let dir = tempdir().expect("tempdir");
    let okrs = dir.path().join("okrs");
    write_okrs(&okrs);

    let err = create_proposal("team-growth", &okrs, &okrs, &dir.path().join("proposals"), "")
        .expect_err("okrs dir cannot be its own update source");
    assert!(err.contains("must differ"));
}
