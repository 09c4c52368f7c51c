use chrono::{TimeZone, Utc};
use okra::metrics::score::percent_to_target;
use okra::metrics::{
    canonicalize_points, latest_snapshot_path, load_snapshot, score_key_results,
    snapshot_path_for_date, write_snapshot, CiProvider, Dimension, ManualProvider, MetricPoint,
    Provider, Snapshot,
};
use okra::okr::OkrStore;
use std::fs;
use tempfile::tempdir;

fn point(key: &str, value: f64, source: &str) -> MetricPoint {
    MetricPoint {
        key: key.to_string(),
        value,
        unit: String::new(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        source: source.to_string(),
        evidence: Vec::new(),
        dimensions: Vec::new(),
    }
}

#[test]
fn canonicalize_sorts_points_and_normalizes_attachments() {
    let mut noisy = point("b.metric", 2.0, "manual");
    noisy.evidence = vec![
        " second ".to_string(),
        "first".to_string(),
        "first".to_string(),
        "".to_string(),
    ];
    noisy.dimensions = vec![
        Dimension {
            key: " env ".to_string(),
            value: " prod ".to_string(),
        },
        Dimension {
            key: "env".to_string(),
            value: "prod".to_string(),
        },
        Dimension {
            key: "".to_string(),
            value: "dropped".to_string(),
        },
    ];

    let points = canonicalize_points(vec![noisy, point("a.metric", 1.0, "manual")]);
    assert_eq!(points[0].key, "a.metric");
    assert_eq!(points[1].key, "b.metric");
    assert_eq!(points[1].evidence, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(
        points[1].dimensions,
        vec![Dimension {
            key: "env".to_string(),
            value: "prod".to_string(),
        }]
    );
}

#[test]
fn percent_to_target_clamps_and_handles_directions() {
    // Increase toward a higher target.
    assert_eq!(percent_to_target(0.0, 10.0, 5.0), 50.0);
    assert_eq!(percent_to_target(0.0, 10.0, 15.0), 100.0);
    assert_eq!(percent_to_target(0.0, 10.0, -5.0), 0.0);

    // Decrease toward a lower target.
    assert_eq!(percent_to_target(0.2, 0.05, 0.125), 50.0);
    assert_eq!(percent_to_target(0.2, 0.05, 0.01), 100.0);
    assert_eq!(percent_to_target(0.2, 0.05, 0.3), 0.0);

    // Degenerate baseline == target.
    assert_eq!(percent_to_target(1.0, 1.0, 1.0), 100.0);
    assert_eq!(percent_to_target(1.0, 1.0, 0.5), 0.0);
}

#[test]
fn snapshots_round_trip_and_reject_unknown_fields() {
    let dir = tempdir().expect("tempdir");
    let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let path = snapshot_path_for_date(dir.path(), as_of);
    assert!(path.ends_with("2024-01-01.json"));

    write_snapshot(
        &path,
        Snapshot {
            schema_version: 1,
            as_of: "2024-01-01".to_string(),
            points: vec![point("manual.users", 42.0, "manual")],
        },
    )
    .expect("write");

    let raw = fs::read_to_string(&path).expect("read");
    assert!(raw.ends_with('\n'));

    let loaded = load_snapshot(&path).expect("load");
    assert_eq!(loaded.as_of, "2024-01-01");
    assert_eq!(loaded.points.len(), 1);

    // Unknown top-level fields are rejected on load.
    fs::write(
        &path,
        r#"{"schema_version":1,"as_of":"2024-01-01","points":[],"surprise":true}"#,
    )
    .expect("rewrite");
    assert!(load_snapshot(&path).is_err());

    // A schema version from the future is rejected.
    fs::write(&path, r#"{"schema_version":9,"as_of":"2024-01-01","points":[]}"#)
        .expect("rewrite");
    let err = load_snapshot(&path).expect_err("must reject");
    assert!(err.contains("schema_version"));
}

#[test]
fn latest_snapshot_is_lexicographically_newest() {
    let dir = tempdir().expect("tempdir");
    for date in ["2023-12-31", "2024-01-02", "2024-01-01"] {
        fs::write(
            dir.path().join(format!("{date}.json")),
            format!(r#"{{"schema_version":1,"as_of":"{date}","points":[]}}"#),
        )
        .expect("write");
    }
    let latest = latest_snapshot_path(dir.path()).expect("latest");
    assert!(latest.ends_with("2024-01-02.json"));

    let empty = tempdir().expect("tempdir");
    assert!(latest_snapshot_path(empty.path()).is_err());
}

#[test]
fn manual_provider_accepts_both_file_shapes() {
    let dir = tempdir().expect("tempdir");
    let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();

    let keyed = dir.path().join("manual.yml");
    fs::write(
        &keyed,
        "metrics:\n  - key: manual.users\n    value: 42\n    unit: count\n    evidence:\n      - crm:export\n    dimensions:\n      region: us\n",
    )
    .expect("write keyed");
    let provider = ManualProvider {
        path: keyed,
        as_of,
    };
    let points = provider.collect().expect("collect");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].key, "manual.users");
    assert_eq!(points[0].source, "manual");
    assert_eq!(points[0].timestamp, "2024-01-01T00:00:00Z");
    assert_eq!(points[0].dimensions[0].key, "region");

    let listed = dir.path().join("list.yml");
    fs::write(&listed, "- key: manual.nps\n  value: 7\n").expect("write list");
    let provider = ManualProvider {
        path: listed,
        as_of,
    };
    let points = provider.collect().expect("collect list");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].key, "manual.nps");

    let missing = ManualProvider {
        path: dir.path().join("absent.yml"),
        as_of,
    };
    assert!(missing.collect().expect("missing file").is_empty());
}

#[test]
fn ci_provider_reads_numeric_fields_from_either_shape() {
    let dir = tempdir().expect("tempdir");
    let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let wrapped = dir.path().join("ci_report.json");
    fs::write(
        &wrapped,
        r#"{"metrics": {"pass_rate_30d": 0.97, "runs_30d": 140, "branch": "main"}}"#,
    )
    .expect("write");
    let provider = CiProvider {
        report_path: wrapped,
        as_of,
    };
    let points = provider.collect().expect("collect");
    assert_eq!(points.len(), 2, "non-numeric fields are skipped");
    assert_eq!(points[0].key, "ci.pass_rate_30d");
    assert_eq!(points[0].unit, "ratio");
    assert_eq!(points[1].key, "ci.runs_30d");

    let flat = dir.path().join("flat.json");
    fs::write(&flat, r#"{"pass_rate_30d": 0.5}"#).expect("write flat");
    let provider = CiProvider {
        report_path: flat,
        as_of,
    };
    assert_eq!(provider.collect().expect("collect flat").len(), 1);

    let missing = CiProvider {
        report_path: dir.path().join("absent.json"),
        as_of,
    };
    assert!(missing.collect().expect("missing").is_empty());
}

fn seeded_okrs(dir: &std::path::Path) -> OkrStore {
    let okrs = dir.join("okrs");
    fs::create_dir_all(&okrs).expect("mkdir");
    fs::write(
        okrs.join("org.yml"),
        r#"scope: org
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
      - kr_id: KR-GHOST
        description: Metric nobody measures yet.
        owner_id: team-growth
        metric_key: manual.ghost
        baseline: 0
        target: 1
        confidence: 0.5
        status: in_progress
        evidence:
          - none:yet
"#,
    )
    .expect("write org.yml");
    OkrStore::load_from_dir(&okrs).expect("load okrs")
}

#[test]
fn scoring_reports_progress_and_missing_metrics() {
    let dir = tempdir().expect("tempdir");
    let store = seeded_okrs(dir.path());
    let snapshot = Snapshot {
        schema_version: 1,
        as_of: "2024-01-01".to_string(),
        points: vec![point("manual.users", 60.0, "manual")],
    };

    let report = score_key_results(&store, &snapshot, dir.path().join("snap.json").as_path())
        .expect("score");
    assert_eq!(report.results.len(), 2);

    let users = report
        .results
        .iter()
        .find(|score| score.kr_id == "KR-USERS")
        .expect("users score");
    assert_eq!(users.current, Some(60.0));
    assert_eq!(users.percent_to_target, 50.0);

    let ghost = report
        .results
        .iter()
        .find(|score| score.kr_id == "KR-GHOST")
        .expect("ghost score");
    assert_eq!(ghost.current, None);
    assert_eq!(ghost.percent_to_target, 0.0);
    assert_eq!(report.missing_metric_keys, vec!["manual.ghost".to_string()]);
}

#[test]
fn scoring_rejects_duplicate_flat_metric_keys() {
    let dir = tempdir().expect("tempdir");
    let store = seeded_okrs(dir.path());
    let snapshot = Snapshot {
        schema_version: 1,
        as_of: "2024-01-01".to_string(),
        points: vec![
            point("manual.users", 60.0, "manual"),
            point("manual.users", 61.0, "ci"),
        ],
    };
    let err = score_key_results(&store, &snapshot, dir.path().join("snap.json").as_path())
        .expect_err("duplicates are ambiguous");
    assert!(err.contains("duplicate metric key"));
}

#[test]
fn scoring_ignores_dimensioned_points() {
    let dir = tempdir().expect("tempdir");
    let store = seeded_okrs(dir.path());
    let mut dimensioned = point("manual.users", 999.0, "manual");
    dimensioned.dimensions = vec![Dimension {
        key: "region".to_string(),
        value: "us".to_string(),
    }];
    let snapshot = Snapshot {
        schema_version: 1,
        as_of: "2024-01-01".to_string(),
        points: vec![dimensioned, point("manual.users", 60.0, "manual")],
    };
    let report = score_key_results(&store, &snapshot, dir.path().join("snap.json").as_path())
        .expect("score");
    let users = report
        .results
        .iter()
        .find(|score| score.kr_id == "KR-USERS")
        .expect("users score");
    assert_eq!(users.current, Some(60.0), "the flat point wins");
}
