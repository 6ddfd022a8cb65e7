//! Time utilities for rovnc

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds, or 0 on a clock before the epoch.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Today's UTC date as `YYYYMMDD`, used in log file names.
pub fn utc_date_stamp() -> String {
    date_stamp_from_secs(current_time_secs())
}

/// Format a Unix timestamp as a UTC `YYYYMMDD` string.
pub fn date_stamp_from_secs(secs: u64) -> String {
    let (y, m, d) = civil_from_days((secs / 86_400) as i64);
    format!("{:04}{:02}{:02}", y, m, d)
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_stamp() {
        assert_eq!(date_stamp_from_secs(0), "19700101");
    }

    #[test]
    fn test_leap_day_stamp() {
        // 2024-02-29T12:00:00Z
        assert_eq!(date_stamp_from_secs(1_709_208_000), "20240229");
    }

    #[test]
    fn test_stamp_is_eight_digits() {
        let stamp = utc_date_stamp();
        assert_eq!(stamp.len(), 8);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }
}
