use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

/// Formats accepted when normalizing a date, tried in order.
const INPUT_FORMATS: [&[BorrowedFormatItem<'static>]; 4] = [
    format_description!("[year]-[month]-[day]"),
    format_description!("[day]-[month]-[year]"),
    format_description!("[day]/[month]/[year]"),
    format_description!("[year]/[month]/[day]"),
];

/// Local time where the offset is known, UTC otherwise.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn today() -> Date {
    now().date()
}

pub fn iso(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_default()
}

/// `YYYYMMDD_HHMMSS`, used for file names.
pub fn timestamp() -> String {
    now().format(STAMP).unwrap_or_default()
}

pub fn parse_date(s: &str) -> Option<Date> {
    let s = s.trim();
    INPUT_FORMATS
        .iter()
        .find_map(|fmt| Date::parse(s, *fmt).ok())
}

/// Re-emit a recognised date as `YYYY-MM-DD`; unrecognised input is returned as is.
pub fn normalize_date(s: &str) -> String {
    parse_date(s).map(iso).unwrap_or_else(|| s.to_string())
}

pub fn add_days(date: Date, days: i64) -> Date {
    date.checked_add(Duration::days(days)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_normalize_known_formats() {
        assert_eq!(normalize_date("2026-02-01"), "2026-02-01");
        assert_eq!(normalize_date("01-02-2026"), "2026-02-01");
        assert_eq!(normalize_date("01/02/2026"), "2026-02-01");
        assert_eq!(normalize_date("2026/02/01"), "2026-02-01");
        assert_eq!(normalize_date("kal"), "kal");
    }

    #[test]
    fn test_add_days_crosses_month() {
        assert_eq!(add_days(date!(2026 - 01 - 25), 14), date!(2026 - 02 - 08));
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
    }
}
