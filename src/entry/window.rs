use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::error::BotError;

/// Daily intervals (inclusive on both ends) in which new entries are allowed
#[derive(Debug, Clone, PartialEq)]
pub struct TradingWindow {
    timezone: Tz,
    intervals: Vec<(NaiveTime, NaiveTime)>,
}

impl Default for TradingWindow {
    fn default() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            timezone: chrono_tz::Europe::Berlin,
            intervals: vec![
                (hm(8, 0), hm(12, 0)),
                (hm(13, 0), hm(15, 0)),
                (hm(15, 0), hm(20, 0)),
            ],
        }
    }
}

impl TradingWindow {
    pub fn new(timezone: Tz, intervals: Vec<(NaiveTime, NaiveTime)>) -> Self {
        Self { timezone, intervals }
    }

    /// Parse a timezone name and "HH:MM-HH:MM" interval strings
    pub fn parse(timezone: &str, intervals: &[String]) -> Result<Self, BotError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| BotError::Configuration(format!("unknown timezone '{}'", timezone)))?;

        let mut parsed = Vec::with_capacity(intervals.len());
        for raw in intervals {
            let (start, end) = raw
                .split_once('-')
                .ok_or_else(|| BotError::Configuration(format!("invalid trading window '{}'", raw)))?;
            let start = parse_time(start)?;
            let end = parse_time(end)?;
            if end < start {
                return Err(BotError::Configuration(format!(
                    "trading window '{}' ends before it starts",
                    raw
                )));
            }
            parsed.push((start, end));
        }

        Ok(Self::new(tz, parsed))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether `at` falls inside any interval, in the window's local time
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone).time();
        self.intervals
            .iter()
            .any(|(start, end)| *start <= local && local <= *end)
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, BotError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| BotError::Configuration(format!("invalid time '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_window_berlin_winter() {
        let window = TradingWindow::default();
        // 09:30 UTC = 10:30 CET
        let inside = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        // 11:30 UTC = 12:30 CET, in the lunch gap
        let gap = Utc.with_ymd_and_hms(2024, 1, 15, 11, 30, 0).unwrap();
        // 19:00 UTC = 20:00 CET, end is inclusive
        let edge = Utc.with_ymd_and_hms(2024, 1, 15, 19, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 15, 19, 1, 0).unwrap();

        assert!(window.contains(inside));
        assert!(!window.contains(gap));
        assert!(window.contains(edge));
        assert!(!window.contains(late));
    }

    #[test]
    fn test_summer_time_shift() {
        let window = TradingWindow::default();
        // 06:30 UTC = 08:30 CEST
        let summer = Utc.with_ymd_and_hms(2024, 7, 15, 6, 30, 0).unwrap();
        assert!(window.contains(summer));
    }

    #[test]
    fn test_parse_windows() {
        let window = TradingWindow::parse("UTC", &["00:00-01:00".to_string()]).unwrap();
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap()));
        assert!(TradingWindow::parse("Mars/Olympus", &[]).is_err());
        assert!(TradingWindow::parse("UTC", &["12:00".to_string()]).is_err());
        assert!(TradingWindow::parse("UTC", &["12:00-11:00".to_string()]).is_err());
    }
}
