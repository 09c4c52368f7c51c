use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// All persisted timestamps are RFC 3339 UTC at second resolution.
pub fn format_utc_seconds(ts: DateTime<Utc>) -> String {
    truncate_to_second(ts).to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_utc_seconds(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| truncate_to_second(parsed.with_timezone(&Utc)))
        .map_err(|err| format!("invalid RFC 3339 timestamp `{raw}`: {err}"))
}

pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0)
        .single()
        .unwrap_or(ts)
}

/// Compact UTC timestamp used for run identifiers, e.g. `20240101T100000Z`.
pub fn compact_utc(ts: DateTime<Utc>) -> String {
    truncate_to_second(ts).format("%Y%m%dT%H%M%SZ").to_string()
}

/// Aligns a timestamp down to the previous multiple of `step` seconds.
pub fn align_down(ts: DateTime<Utc>, step_seconds: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let aligned = secs - secs.rem_euclid(step_seconds);
    Utc.timestamp_opt(aligned, 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_drops_subsecond_precision() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
            + Duration::milliseconds(750);
        assert_eq!(format_utc_seconds(ts), "2024-01-01T10:00:00Z");
    }

    #[test]
    fn parse_round_trips() {
        let parsed = parse_utc_seconds("2024-01-01T10:00:30Z").expect("parse");
        assert_eq!(format_utc_seconds(parsed), "2024-01-01T10:00:30Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_utc_seconds("not-a-time").is_err());
    }

    #[test]
    fn align_down_snaps_to_interval() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 44).unwrap();
        let aligned = align_down(ts, 30);
        assert_eq!(format_utc_seconds(aligned), "2024-01-01T10:00:30Z");
    }
}
