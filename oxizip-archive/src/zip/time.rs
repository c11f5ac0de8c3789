//! Timestamp conversions for ZIP headers.
//!
//! ZIP stores times in three encodings: the DOS date/time words of the
//! fixed headers (2-second resolution, years 1980-2107), NTFS FILETIME ticks
//! and 32-bit Unix seconds in extra fields. All conversions here are UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;
/// FILETIME ticks per second.
const TICKS_PER_SEC: u64 = 10_000_000;

/// DOS date word of 1980-01-01.
pub const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// (year, month, day) for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap { 29 } else { 28 }
        }
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

fn from_unix_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .unwrap_or(UNIX_EPOCH)
    }
}

/// Encode a time as DOS `(time, date)` words.
///
/// Times before 1980 clamp to the DOS epoch; times after 2107 clamp to the
/// last representable second.
pub fn to_dos(time: SystemTime) -> (u16, u16) {
    let secs = unix_seconds(time);
    let days = secs.div_euclid(86_400);
    let of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);

    if year < 1980 {
        return (0, DOS_EPOCH_DATE);
    }
    if year > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }

    let hour = (of_day / 3600) as u16;
    let minute = ((of_day % 3600) / 60) as u16;
    let second = (of_day % 60) as u16;

    let dos_time = (hour << 11) | (minute << 5) | (second / 2);
    let dos_date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    (dos_time, dos_date)
}

/// Decode DOS `(time, date)` words. Invalid fields decode to the DOS epoch.
pub fn from_dos(dos_time: u16, dos_date: u16) -> SystemTime {
    let day = (dos_date & 0x1F) as u32;
    let month = ((dos_date >> 5) & 0x0F) as u32;
    let year = ((dos_date >> 9) & 0x7F) as i64 + 1980;

    let second = ((dos_time & 0x1F) as i64) * 2;
    let minute = ((dos_time >> 5) & 0x3F) as i64;
    let hour = ((dos_time >> 11) & 0x1F) as i64;

    let valid = (1..=12).contains(&month)
        && day >= 1
        && day <= days_in_month(year, month)
        && hour <= 23
        && minute <= 59
        && second <= 59;
    if !valid {
        return dos_epoch();
    }

    let days = days_from_civil(year, month, day);
    from_unix_seconds(days * 86_400 + hour * 3600 + minute * 60 + second)
}

/// 1980-01-01 00:00:00 UTC.
pub fn dos_epoch() -> SystemTime {
    from_unix_seconds(days_from_civil(1980, 1, 1) * 86_400)
}

/// FILETIME ticks (100 ns since 1601-01-01 UTC) for a time.
pub fn to_filetime(time: SystemTime) -> u64 {
    let offset = Duration::from_secs(FILETIME_UNIX_OFFSET_SECS);
    let since_1601 = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => offset + after,
        Err(before) => offset.saturating_sub(before.duration()),
    };
    let ticks = since_1601.as_secs() as u128 * TICKS_PER_SEC as u128
        + (since_1601.subsec_nanos() / 100) as u128;
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Time for FILETIME ticks.
pub fn from_filetime(ticks: u64) -> SystemTime {
    let secs = ticks / TICKS_PER_SEC;
    let nanos = ((ticks % TICKS_PER_SEC) * 100) as u32;
    if secs >= FILETIME_UNIX_OFFSET_SECS {
        UNIX_EPOCH + Duration::new(secs - FILETIME_UNIX_OFFSET_SECS, nanos)
    } else {
        let before = Duration::from_secs(FILETIME_UNIX_OFFSET_SECS - secs) - Duration::new(0, nanos);
        UNIX_EPOCH.checked_sub(before).unwrap_or(UNIX_EPOCH)
    }
}

/// 32-bit Unix seconds for a time, clamped to `0..=u32::MAX`.
pub fn to_unix32(time: SystemTime) -> u32 {
    unix_seconds(time).clamp(0, u32::MAX as i64) as u32
}

/// Time for 32-bit Unix seconds.
pub fn from_unix32(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}
