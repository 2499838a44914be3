//! HTTP date formatting and parsing (RFC 9110 §5.6.7).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// IMF-fixdate, the only format we emit.
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// Obsolete RFC 850 format, accepted on input.
const RFC850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
/// ANSI C `asctime()` format, accepted on input.
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Format a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format(IMF_FIXDATE).to_string()
}

/// Parse any of the three HTTP date formats. Returns `None` for garbage.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Some(t.with_timezone(&Utc));
    }
    [IMF_FIXDATE, RFC850, ASCTIME]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
