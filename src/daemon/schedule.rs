use crate::daemon::store::Store;
use crate::daemon::{JOB_KR_MEASURE, JOB_PLAN_EXECUTE, JOB_PLAN_GENERATE, JOB_WATCH_TICK};
use crate::shared::timefmt::{align_down, format_utc_seconds, parse_utc_seconds};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

pub const WATERMARK_KEY: &str = "scheduler_watermark";
pub const WATCH_TICK_SECONDS: i64 = 30;

/// Turns wall-clock progression into idempotent job emissions. All state is
/// a single KV watermark; every emission goes through the store's
/// `(type, scheduled_at)` uniqueness constraint, so re-running a tick with
/// the same `now` is a no-op and concurrent schedulers converge.
#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Store,
    timezone: Tz,
}

impl Scheduler {
    pub fn new(store: Store, tz_name: &str) -> Result<Self, String> {
        let timezone = tz_name
            .parse::<Tz>()
            .map_err(|_| format!("invalid timezone `{tz_name}`; expected IANA timezone id"))?;
        Ok(Self { store, timezone })
    }

    /// Materialises every trigger firing in `(watermark, now]` and advances
    /// the watermark to `now`. On a store with no watermark this records
    /// `now` and emits nothing: downtime before first start is not
    /// backfilled.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<(), String> {
        let watermark_raw = self
            .store
            .get_kv(WATERMARK_KEY)
            .map_err(|err| format!("get scheduler watermark: {err}"))?;

        let Some(watermark_raw) = watermark_raw else {
            self.store
                .set_kv(WATERMARK_KEY, &format_utc_seconds(now))
                .map_err(|err| format!("set initial watermark: {err}"))?;
            return Ok(());
        };

        let watermark = parse_utc_seconds(&watermark_raw)
            .map_err(|err| format!("parse scheduler watermark: {err}"))?;

        self.schedule_daily_at(watermark, now, JOB_KR_MEASURE, 2, 0)
            .map_err(|err| format!("schedule {JOB_KR_MEASURE}: {err}"))?;
        self.schedule_weekly_at(watermark, now, JOB_PLAN_GENERATE, Weekday::Mon, 9, 0)
            .map_err(|err| format!("schedule {JOB_PLAN_GENERATE}: {err}"))?;
        self.schedule_weekly_at(watermark, now, JOB_PLAN_EXECUTE, Weekday::Mon, 9, 15)
            .map_err(|err| format!("schedule {JOB_PLAN_EXECUTE}: {err}"))?;
        self.schedule_interval(watermark, now, JOB_WATCH_TICK, WATCH_TICK_SECONDS)
            .map_err(|err| format!("schedule {JOB_WATCH_TICK}: {err}"))?;

        // The watermark is advanced last. A crash between the enqueues and
        // this write only means the same window is re-enumerated next tick,
        // which the uniqueness constraint absorbs.
        self.store
            .set_kv(WATERMARK_KEY, &format_utc_seconds(now))
            .map_err(|err| format!("update watermark: {err}"))?;
        Ok(())
    }

    /// Enqueues `job_type` for every local date in the window whose H:M
    /// instant lands in `(watermark, now]`.
    fn schedule_daily_at(
        &self,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        job_type: &str,
        hour: u32,
        minute: u32,
    ) -> Result<(), String> {
        self.schedule_calendar(watermark, now, job_type, hour, minute, None)
    }

    fn schedule_weekly_at(
        &self,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        job_type: &str,
        weekday: Weekday,
        hour: u32,
        minute: u32,
    ) -> Result<(), String> {
        self.schedule_calendar(watermark, now, job_type, hour, minute, Some(weekday))
    }

    fn schedule_calendar(
        &self,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        job_type: &str,
        hour: u32,
        minute: u32,
        weekday: Option<Weekday>,
    ) -> Result<(), String> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| format!("invalid trigger time {hour:02}:{minute:02}"))?;

        let mut date = watermark.with_timezone(&self.timezone).date_naive();
        let end_date = now.with_timezone(&self.timezone).date_naive();

        while date <= end_date {
            if weekday.map(|wd| date.weekday() == wd).unwrap_or(true) {
                // `earliest` picks the first valid instant around DST gaps.
                let local = self
                    .timezone
                    .from_local_datetime(&date.and_time(time))
                    .earliest();
                if let Some(local) = local {
                    let scheduled = local.with_timezone(&Utc);
                    if scheduled > watermark && scheduled <= now {
                        self.enqueue(job_type, scheduled)?;
                    }
                }
            }
            date = date
                .succ_opt()
                .ok_or_else(|| "calendar date overflow".to_string())?;
        }
        Ok(())
    }

    /// Enqueues `job_type` at every aligned `step_seconds` boundary in
    /// `(watermark, now]`. Boundaries derive from the epoch, so overlapping
    /// windows between concurrent tickers converge on the same instants.
    fn schedule_interval(
        &self,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        job_type: &str,
        step_seconds: i64,
    ) -> Result<(), String> {
        let mut current = align_down(watermark, step_seconds) + Duration::seconds(step_seconds);
        while current <= now {
            self.enqueue(job_type, current)?;
            current += Duration::seconds(step_seconds);
        }
        Ok(())
    }

    fn enqueue(&self, job_type: &str, scheduled_at: DateTime<Utc>) -> Result<(), String> {
        let payload = serde_json::json!({
            "scheduled_time": format_utc_seconds(scheduled_at),
        });
        self.store
            .enqueue_unique(job_type, scheduled_at, &payload)
            .map(|_| ())
            .map_err(|err| {
                format!(
                    "enqueue {job_type} at {}: {err}",
                    format_utc_seconds(scheduled_at)
                )
            })
    }
}

/// Exposed for tests that need to position the watermark directly.
pub fn set_watermark(store: &Store, at: DateTime<Utc>) -> Result<(), String> {
    store
        .set_kv(WATERMARK_KEY, &format_utc_seconds(at))
        .map_err(|err| format!("set watermark: {err}"))
}

pub fn get_watermark(store: &Store) -> Result<Option<DateTime<Utc>>, String> {
    let raw = store
        .get_kv(WATERMARK_KEY)
        .map_err(|err| format!("get watermark: {err}"))?;
    raw.map(|value| parse_utc_seconds(&value)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_timezone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("daemon.sqlite")).expect("open store");
        let err = Scheduler::new(store, "Mars/Olympus").expect_err("must reject");
        assert!(err.contains("invalid timezone"));
    }
}
