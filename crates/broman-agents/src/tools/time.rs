use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TimeArgs {
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeReport {
    pub now: String,
    pub timezone: String,
}

pub fn current_time(timezone: Option<&str>) -> TimeReport {
    time_at(timezone, Utc::now())
}

/// Format `instant` as `DD.MM.YYYY, HH:MM:SS` in `timezone` (UTC when absent).
/// An unknown zone yields the UTC RFC 3339 timestamp, still labelled with the
/// zone that was asked for.
pub fn time_at(timezone: Option<&str>, instant: DateTime<Utc>) -> TimeReport {
    let zone = timezone
        .map(str::trim)
        .filter(|tz| !tz.is_empty())
        .unwrap_or("UTC");

    let now = match zone.parse::<chrono_tz::Tz>() {
        Ok(tz) => instant
            .with_timezone(&tz)
            .format("%d.%m.%Y, %H:%M:%S")
            .to_string(),
        Err(_) => instant.to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    TimeReport {
        now,
        timezone: zone.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 5).unwrap()
    }

    #[test]
    fn defaults_to_utc() {
        let report = time_at(None, noon());
        assert_eq!(report.timezone, "UTC");
        assert_eq!(report.now, "14.03.2025, 12:00:05");
    }

    #[test]
    fn converts_into_named_zone() {
        let report = time_at(Some("Europe/Moscow"), noon());
        assert_eq!(report.now, "14.03.2025, 15:00:05");
    }

    #[test]
    fn unknown_zone_falls_back_to_iso_timestamp() {
        let report = time_at(Some("Mars/Olympus_Mons"), noon());
        assert_eq!(report.timezone, "Mars/Olympus_Mons");
        assert_eq!(report.now, "2025-03-14T12:00:05.000Z");
    }
}
