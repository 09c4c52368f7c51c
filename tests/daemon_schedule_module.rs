use chrono::{TimeZone, Utc};
use okra::daemon::schedule::{get_watermark, set_watermark, Scheduler};
use okra::daemon::store::Store;
use okra::daemon::{JOB_KR_MEASURE, JOB_PLAN_EXECUTE, JOB_PLAN_GENERATE, JOB_WATCH_TICK};
use okra::shared::timefmt::format_utc_seconds;
use tempfile::tempdir;

fn scheduler_in(dir: &std::path::Path) -> (Store, Scheduler) {
    let store = Store::open(&dir.join("daemon.sqlite")).expect("open store");
    let scheduler = Scheduler::new(store.clone(), "America/Chicago").expect("scheduler");
    (store, scheduler)
}

#[test]
fn cold_start_sets_watermark_without_backfill() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    let first = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

    scheduler.tick(first).expect("first tick");
    assert_eq!(
        get_watermark(&store).expect("watermark"),
        Some(first),
        "first tick records now as the watermark"
    );
    assert!(
        store.list_queued(100).expect("queued").is_empty(),
        "cold start emits no historical jobs"
    );

    // Thirty seconds later, exactly one watch tick is due.
    let second = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
    scheduler.tick(second).expect("second tick");
    let queued = store.list_queued(100).expect("queued");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job_type, JOB_WATCH_TICK);
    assert_eq!(queued[0].scheduled_at, second);
}

#[test]
fn interval_catch_up_emits_every_aligned_boundary() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("tick");

    let queued = store.list_queued(100).expect("queued");
    let ticks: Vec<_> = queued
        .iter()
        .filter(|job| job.job_type == JOB_WATCH_TICK)
        .collect();
    assert_eq!(ticks.len(), 4, "one tick per 30-second boundary");
    let expected = [
        "2024-01-01T10:00:30Z",
        "2024-01-01T10:01:00Z",
        "2024-01-01T10:01:30Z",
        "2024-01-01T10:02:00Z",
    ];
    for (job, expected_at) in ticks.iter().zip(expected) {
        assert_eq!(format_utc_seconds(job.scheduled_at), expected_at);
    }
    assert_eq!(queued.len(), 4, "no calendar trigger falls in this window");
}

#[test]
fn tick_is_idempotent_for_the_same_now() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("first tick");
    let first_pass = store.list_queued(100).expect("queued");

    // Re-running with the same now must not create or duplicate anything,
    // even if the watermark write never happened.
    set_watermark(&store, watermark).expect("rewind watermark");
    scheduler.tick(now).expect("second tick");
    let second_pass = store.list_queued(100).expect("queued");

    assert_eq!(first_pass.len(), second_pass.len());
    let ids_first: Vec<_> = first_pass.iter().map(|job| job.id.clone()).collect();
    let ids_second: Vec<_> = second_pass.iter().map(|job| job.id.clone()).collect();
    assert_eq!(ids_first, ids_second);
}

#[test]
fn daily_trigger_fires_at_local_two_am() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    // 02:00 America/Chicago in January is 08:00 UTC.
    let watermark = Utc.with_ymd_and_hms(2024, 1, 2, 7, 59, 30).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 30).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("tick");

    let queued = store.list_queued(100).expect("queued");
    let measures: Vec<_> = queued
        .iter()
        .filter(|job| job.job_type == JOB_KR_MEASURE)
        .collect();
    assert_eq!(measures.len(), 1);
    assert_eq!(
        format_utc_seconds(measures[0].scheduled_at),
        "2024-01-02T08:00:00Z"
    );
    let payload: serde_json::Value =
        serde_json::from_str(&measures[0].payload_json).expect("payload");
    assert_eq!(payload["scheduled_time"], "2024-01-02T08:00:00Z");
}

#[test]
fn weekly_triggers_fire_on_monday_mornings() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    // 2024-01-01 is a Monday; 09:00/09:15 Chicago are 15:00/15:15 UTC.
    let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 14, 59, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 15, 16, 0).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("tick");

    let queued = store.list_queued(100).expect("queued");
    let generate: Vec<_> = queued
        .iter()
        .filter(|job| job.job_type == JOB_PLAN_GENERATE)
        .collect();
    let execute: Vec<_> = queued
        .iter()
        .filter(|job| job.job_type == JOB_PLAN_EXECUTE)
        .collect();
    assert_eq!(generate.len(), 1);
    assert_eq!(
        format_utc_seconds(generate[0].scheduled_at),
        "2024-01-01T15:00:00Z"
    );
    assert_eq!(execute.len(), 1);
    assert_eq!(
        format_utc_seconds(execute[0].scheduled_at),
        "2024-01-01T15:15:00Z"
    );
}

#[test]
fn weekly_triggers_skip_other_weekdays() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    // 2024-01-02 is a Tuesday.
    let watermark = Utc.with_ymd_and_hms(2024, 1, 2, 14, 59, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 15, 16, 0).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("tick");

    let queued = store.list_queued(100).expect("queued");
    assert!(
        queued
            .iter()
            .all(|job| job.job_type == JOB_WATCH_TICK),
        "only interval ticks fall on a Tuesday window"
    );
}

#[test]
fn watermark_advances_to_now_after_a_tick() {
    let dir = tempdir().expect("tempdir");
    let (store, scheduler) = scheduler_in(dir.path());
    let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap();

    set_watermark(&store, watermark).expect("set watermark");
    scheduler.tick(now).expect("tick");
    assert_eq!(get_watermark(&store).expect("watermark"), Some(now));
}
