//! 时间戳换算与格式化
//!
//! 内部统一使用 Unix 纪元纳秒 (i64)；线路与 TOB1 中使用 1990 纪元。

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Timelike, Utc};

use crate::constants::{DEFAULT_TIME_FORMAT, LOGGER_EPOCH_OFFSET_SECS, NSEC_PER_SEC};

/// 1990 纪元秒 + 纳秒 -> Unix 纳秒
pub fn logger_to_unix_nsec(secs: i64, nsec: i64) -> i64 {
    (secs + LOGGER_EPOCH_OFFSET_SECS)
        .saturating_mul(NSEC_PER_SEC)
        .saturating_add(nsec)
}

/// Unix 纳秒 -> 1990 纪元 (秒, 纳秒)
pub fn unix_nsec_to_logger(nsec: i64) -> (i64, u32) {
    let secs = nsec.div_euclid(NSEC_PER_SEC) - LOGGER_EPOCH_OFFSET_SECS;
    let frac = nsec.rem_euclid(NSEC_PER_SEC) as u32;
    (secs, frac)
}

pub fn to_datetime(nsec: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nsec)
}

pub fn from_datetime(dt: &DateTime<Utc>) -> Option<i64> {
    dt.timestamp_nanos_opt()
}

/// 格式串是否可被 chrono 解析
pub fn is_valid_pattern(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

/// 按格式串格式化，`midnight_is_2400` 时零点显示为前一天的 24:00
pub fn format_stamp(nsec: i64, pattern: &str, midnight_is_2400: bool) -> String {
    let dt = to_datetime(nsec);
    let mut out = String::new();

    let at_midnight = dt.num_seconds_from_midnight() == 0 && dt.nanosecond() == 0;
    let result = if midnight_is_2400 && at_midnight {
        let pattern = pattern.replace("%T", "24:%M:%S").replace("%H", "24");
        write!(out, "{}", (dt - Duration::days(1)).format(&pattern))
    } else {
        write!(out, "{}", dt.format(pattern))
    };

    if result.is_err() {
        out.clear();
        let _ = write!(out, "{}", dt.format(DEFAULT_TIME_FORMAT));
    }
    out
}

/// 解析 RFC3339 或 `YYYY-MM-DD HH:MM:SS[.f]` 文本（UTC）
pub fn parse_stamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return from_datetime(&dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|p| chrono::NaiveDateTime::parse_from_str(text, p).ok())
        .and_then(|naive| from_datetime(&naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ISO_TIME_FORMAT;

    #[test]
    fn test_epoch_conversion() {
        assert_eq!(logger_to_unix_nsec(0, 0), 631_152_000 * NSEC_PER_SEC);
        let ns = 1_700_000_000_123_456_789;
        let (secs, frac) = unix_nsec_to_logger(ns);
        assert_eq!(logger_to_unix_nsec(secs, frac as i64), ns);
    }

    #[test]
    fn test_format_iso() {
        let s = format_stamp(1_700_000_000_000_000_000, ISO_TIME_FORMAT, false);
        assert_eq!(s, "2023-11-14T22:13:20");
        let s = format_stamp(1_700_000_000_500_000_000, ISO_TIME_FORMAT, false);
        assert_eq!(s, "2023-11-14T22:13:20.500");
    }

    #[test]
    fn test_midnight_as_2400() {
        let midnight = parse_stamp("2024-03-02 00:00:00").unwrap();
        assert_eq!(
            format_stamp(midnight, "%Y-%m-%d %H:%M:%S", true),
            "2024-03-01 24:00:00"
        );
        assert_eq!(
            format_stamp(midnight, "%Y-%m-%d %H:%M:%S", false),
            "2024-03-02 00:00:00"
        );
        let later = midnight + NSEC_PER_SEC;
        assert_eq!(
            format_stamp(later, "%Y-%m-%d %H:%M:%S", true),
            "2024-03-02 00:00:01"
        );
    }

    #[test]
    fn test_parse_forms() {
        let a = parse_stamp("2023-11-14T22:13:20Z").unwrap();
        let b = parse_stamp("2023-11-14 22:13:20").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 1_700_000_000_000_000_000);
        assert!(parse_stamp("yesterday").is_none());
    }

    #[test]
    fn test_pattern_validation() {
        assert!(is_valid_pattern("%Y-%m-%d"));
        assert!(!is_valid_pattern("%Q"));
    }
}
