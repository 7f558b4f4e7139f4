//! Timestamp helpers for the `modified` stamp and its wire format.
//!
//! Storage keeps epoch milliseconds; the wire uses RFC 1123 in GMT, as
//! carried by `Last-Modified` / `If-Modified-Since`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Converts stored epoch milliseconds to a UTC instant.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_epoch_ms(value: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(value).single().unwrap_or_default()
}

/// Current time as epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Formats an instant as an RFC 1123 HTTP date.
pub fn format_http_date(value: DateTime<Utc>) -> String {
    value.format(HTTP_DATE_FORMAT).to_string()
}

/// Parses a client-supplied last-seen stamp.
///
/// Returns `None` for empty input, the literal `null` some clients send, and
/// anything that is not an RFC 1123 / RFC 2822 date.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, HTTP_DATE_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::{format_http_date, from_epoch_ms, parse_http_date};

    #[test]
    fn http_date_formats_in_gmt() {
        let stamp = from_epoch_ms(1_136_214_245_000);
        assert_eq!(format_http_date(stamp), "Mon, 02 Jan 2006 15:04:05 GMT");
    }

    #[test]
    fn parse_accepts_rfc1123_and_rejects_null() {
        let parsed = parse_http_date("Mon, 02 Jan 2006 15:04:05 GMT").unwrap();
        assert_eq!(parsed.timestamp(), 1_136_214_245);
        assert!(parse_http_date("null").is_none());
        assert!(parse_http_date("").is_none());
        assert!(parse_http_date("yesterday").is_none());
    }
}
