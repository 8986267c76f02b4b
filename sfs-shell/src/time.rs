//! Rendering of the epoch-second timestamps stored in inodes and the superblock.

const SECS_PER_DAY: u64 = 86_400;

/// Formats `secs` since the UNIX epoch as `dd/mm/YYYY HH:MM:SS` in UTC.
pub fn format_timestamp(secs: u64) -> String {
    let days = secs / SECS_PER_DAY;
    let rem = secs % SECS_PER_DAY;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:02}/{:02}/{:04} {:02}:{:02}:{:02}",
        day,
        month,
        year,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Converts days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    // Shift the epoch to 0000-03-01 so leap days fall at the end of a year.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + (month <= 2) as u64;
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_the_first_of_january_1970() {
        assert_eq!(format_timestamp(0), "01/01/1970 00:00:00");
    }

    #[test]
    fn leap_days_and_time_of_day_are_rendered() {
        // 2024-02-29 12:34:56 UTC
        assert_eq!(format_timestamp(1_709_210_096), "29/02/2024 12:34:56");
        // 2000-03-01 00:00:00 UTC
        assert_eq!(format_timestamp(951_868_800), "01/03/2000 00:00:00");
        // 1999-12-31 23:59:59 UTC
        assert_eq!(format_timestamp(946_684_799), "31/12/1999 23:59:59");
    }
}
