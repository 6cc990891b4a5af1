//! Stateless repositories — every method takes `&Connection`.
//!
//! Transaction scope belongs to the caller: the adapter composes repo calls
//! inside a single checkout/transaction where an operation is multi-step.

pub mod card;
pub mod card_box;
pub mod logs;
pub mod tasks;

pub use card::CardRepo;
pub use card_box::BoxRepo;
pub use logs::LogRepo;
pub use tasks::TaskRepo;

use chrono::{DateTime, SecondsFormat, Utc};

/// Persisted timestamp format: RFC 3339 with fixed microsecond precision
/// and a `Z` suffix, so lexicographic order is chronological.
pub(crate) fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// JSON path for a metadata key, quoted so keys containing dots stay a
/// single path segment.
pub(crate) fn metadata_path(key: &str) -> String {
    let cleaned: String = key.chars().filter(|c| *c != '"' && *c != '\\').collect();
    format!("$.\"{cleaned}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexicographically() {
        let early: DateTime<Utc> = "2026-08-04T10:00:00.000009Z".parse().unwrap();
        let late: DateTime<Utc> = "2026-08-04T10:00:00.000010Z".parse().unwrap();
        assert!(timestamp(early) < timestamp(late));
    }

    #[test]
    fn metadata_path_quotes_keys() {
        assert_eq!(metadata_path("step_id"), "$.\"step_id\"");
        assert_eq!(metadata_path("a.b"), "$.\"a.b\"");
        assert_eq!(metadata_path("we\"ird"), "$.\"weird\"");
    }
}
