//! Timestamp-suffixed revision names: `{prefix}-{YYYYMMDDHHMMSS}`.
//!
//! Images and launch templates are published as dated revisions of a
//! logical name. The suffix is exactly 14 digits.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-(\d{14})$").expect("revision regex is valid"));

/// A name split into its logical prefix and 14-digit stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionName<'a> {
    pub prefix: &'a str,
    pub stamp: &'a str,
}

impl<'a> RevisionName<'a> {
    /// Split `name`; None unless it ends in `-` plus exactly 14 digits.
    pub fn parse(name: &'a str) -> Option<Self> {
        let caps = REVISION_RE.captures(name)?;
        Some(Self {
            prefix: caps.get(1)?.as_str(),
            stamp: caps.get(2)?.as_str(),
        })
    }

    /// The stamp as a UTC time, if it is a valid calendar time.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.stamp, STAMP_FORMAT).ok()
    }
}

/// True if `name` is `prefix` itself or a dated revision of it.
pub fn is_revision_of(name: &str, prefix: &str) -> bool {
    name == prefix || RevisionName::parse(name).is_some_and(|r| r.prefix == prefix)
}

/// A new revision name for `prefix` stamped at `at`.
pub fn revision_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, at.format(STAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_revision() {
        let r = RevisionName::parse("prod-web-20240131235959").unwrap();
        assert_eq!(r.prefix, "prod-web");
        assert_eq!(r.stamp, "20240131235959");
        assert_eq!(
            r.timestamp().unwrap().to_string(),
            "2024-01-31 23:59:59"
        );
    }

    #[test]
    fn test_parse_rejects_wrong_digit_count() {
        assert!(RevisionName::parse("web-2024013123595").is_none());
        assert!(RevisionName::parse("web-202401312359590").is_none());
        assert!(RevisionName::parse("web-2024013123595x").is_none());
        assert!(RevisionName::parse("20240131235959").is_none());
    }

    #[test]
    fn test_digits_that_are_not_a_date() {
        let r = RevisionName::parse("web-99999999999999").unwrap();
        assert!(r.timestamp().is_none());
    }

    #[test]
    fn test_is_revision_of() {
        assert!(is_revision_of("prod-web", "prod-web"));
        assert!(is_revision_of("prod-web-20240101000000", "prod-web"));
        assert!(!is_revision_of("prod-web-extra-20240101000000", "prod-web"));
        assert!(!is_revision_of("prod-web-latest", "prod-web"));
        assert!(!is_revision_of("prod-webapp-20240101000000", "prod-web"));
    }

    #[test]
    fn test_revision_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let name = revision_name("app-prod", at);
        assert_eq!(name, "app-prod-20240305070809");
        assert!(is_revision_of(&name, "app-prod"));
    }
}
