use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Formatted views of a single moment, for file names and templates.
#[derive(Debug, Clone, Serialize)]
pub struct Ts {
    pub timestamp: String,
    pub datum: String,
    pub ymd: String,
    pub daymonth: String,
    pub now: String,
}

impl Ts {
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }

    pub fn at(moment: NaiveDateTime) -> Self {
        Self {
            timestamp: moment.format("%d-%m-%Y %H:%M").to_string(),
            datum: moment.format("%d-%m-%Y").to_string(),
            ymd: moment.format("%Y%m%d").to_string(),
            daymonth: moment.format("%d %B").to_string(),
            now: moment.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

pub struct Stopwatch {
    start: Instant,
    last: Instant,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
        }
    }

    /// Time since the previous split (or since start).
    pub fn split(&mut self, label: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        info!("{}: {}", label, format_duration(elapsed));
        elapsed
    }

    pub fn total(&self) -> Duration {
        let elapsed = self.start.elapsed();
        info!("Total: {}", format_duration(elapsed));
        elapsed
    }
}

/// `1h 02m 03.4s`, `2m 03.4s` or `3.4s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    let hours = (secs / 3600.0).floor() as u64;
    let minutes = ((secs % 3600.0) / 60.0).floor() as u64;
    let rest = secs % 60.0;
    if hours > 0 {
        format!("{}h {:02}m {:04.1}s", hours, minutes, rest)
    } else if minutes > 0 {
        format!("{}m {:04.1}s", minutes, rest)
    } else {
        format!("{:.1}s", rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_ts_formats() {
        let moment = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 7, 0)
            .unwrap();
        let ts = Ts::at(moment);
        assert_eq!(ts.timestamp, "05-03-2024 09:07");
        assert_eq!(ts.datum, "05-03-2024");
        assert_eq!(ts.ymd, "20240305");
        assert_eq!(ts.daymonth, "05 March");
        assert_eq!(ts.now, "2024-03-05T09:07:00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(3400)), "3.4s");
        assert_eq!(format_duration(Duration::from_millis(123_400)), "2m 03.4s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03.0s");
    }

    #[test]
    fn test_stopwatch_splits_are_monotonic() {
        let mut watch = Stopwatch::new();
        let first = watch.split("first");
        let total = watch.total();
        assert!(total >= first);
    }
}
