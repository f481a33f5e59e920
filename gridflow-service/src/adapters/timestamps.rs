//! Timestamp decoding rules. Each source uses exactly one of them; a value
//! the rule rejects is reported as unparseable by the caller.

use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, Month,
    OffsetDateTime, PrimitiveDateTime, Time,
};

/// ISO-8601 style text: RFC 3339 with an offset, or a naive
/// `YYYY-MM-DD[T| ]HH:MM[:SS[.fff]]` / `YYYY-MM-DD` read as UTC.
pub fn parse_iso(raw: &str) -> Option<OffsetDateTime> {
    let text = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(ts);
    }

    // Accept a space between date and time.
    let text = match text.as_bytes().get(10) {
        Some(b' ') => format!("{}T{}", &text[..10], &text[11..]),
        _ => text.to_string(),
    };
    if let Ok(ts) = OffsetDateTime::parse(&text, &Rfc3339) {
        return Some(ts);
    }

    let naive = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    if let Some(dt) = naive
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(&text, format).ok())
    {
        return Some(dt.assume_utc());
    }

    Date::parse(&text, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// Fixed-width numeric dates: `YYYYMMDD`, `YYYYMMDDHHMM` or
/// `YYYYMMDDHHMMSS`, read as UTC.
///
/// Spreadsheet exports sometimes render the column as a float, so a single
/// trailing `.0` is tolerated. Anything else is rejected; there is no
/// fallback date.
pub fn parse_compact_numeric(raw: &str) -> Option<OffsetDateTime> {
    let text = raw.trim();
    let digits = text.strip_suffix(".0").unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let (date_part, time_part) = match digits.len() {
        8 => (digits, ""),
        12 | 14 => digits.split_at(8),
        _ => return None,
    };

    let year: i32 = date_part[0..4].parse().ok()?;
    let month = Month::try_from(date_part[4..6].parse::<u8>().ok()?).ok()?;
    let day: u8 = date_part[6..8].parse().ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;

    let two = |range: std::ops::Range<usize>| -> Option<u8> { time_part.get(range)?.parse().ok() };
    let time = match time_part.len() {
        0 => Time::MIDNIGHT,
        4 => Time::from_hms(two(0..2)?, two(2..4)?, 0).ok()?,
        _ => Time::from_hms(two(0..2)?, two(2..4)?, two(4..6)?).ok()?,
    };

    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn iso_accepts_offsets_and_naive_forms() {
        assert_eq!(
            parse_iso("2025-01-22T00:00:00Z"),
            Some(datetime!(2025-01-22 00:00:00 UTC))
        );
        assert_eq!(
            parse_iso("2025-01-22T05:30:00+05:00"),
            Some(datetime!(2025-01-22 05:30:00 +05:00))
        );
        assert_eq!(
            parse_iso("2025-01-22T00:00"),
            Some(datetime!(2025-01-22 00:00:00 UTC))
        );
        assert_eq!(
            parse_iso("2025-01-22 13:15:00"),
            Some(datetime!(2025-01-22 13:15:00 UTC))
        );
        assert_eq!(
            parse_iso("2025-01-22T13:15:00.250"),
            Some(datetime!(2025-01-22 13:15:00.25 UTC))
        );
        assert_eq!(parse_iso("2025-01-22"), Some(datetime!(2025-01-22 00:00:00 UTC)));
    }

    #[test]
    fn iso_rejects_numeric_dates_and_garbage() {
        assert_eq!(parse_iso("20250122"), None);
        assert_eq!(parse_iso("2025-02-30T00:00:00"), None);
        assert_eq!(parse_iso("yesterday"), None);
    }

    #[test]
    fn compact_numeric_date_parses_exactly() {
        let ts = parse_compact_numeric("20250123").unwrap();
        assert_eq!(ts.date(), date!(2025 - 01 - 23));
        assert_eq!(ts.time(), Time::MIDNIGHT);
        assert_eq!(
            parse_compact_numeric("202501231545"),
            Some(datetime!(2025-01-23 15:45:00 UTC))
        );
        assert_eq!(
            parse_compact_numeric("20250123154512"),
            Some(datetime!(2025-01-23 15:45:12 UTC))
        );
        assert_eq!(
            parse_compact_numeric("20250123.0"),
            Some(datetime!(2025-01-23 00:00:00 UTC))
        );
    }

    #[test]
    fn compact_numeric_never_falls_back_to_an_epoch() {
        for bad in ["2025012", "20251301", "20250230", "2025-01-23", "0", "202501231", "20250123.5"] {
            assert_eq!(parse_compact_numeric(bad), None, "{bad} must be rejected");
        }
    }
}
