//! Content validation policy.
//!
//! Replaces the usual process-wide settings singleton with an explicit
//! value threaded through constructors: components that validate content
//! hold their own [`UriPolicy`], and overrides are applied with a pure
//! merge instead of global mutation.

/// Allow-list of URI schemes accepted for external file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriPolicy {
    schemes: Vec<String>,
}

impl Default for UriPolicy {
    fn default() -> Self {
        Self::new(["s3", "https"])
    }
}

impl UriPolicy {
    /// Build a policy from a list of schemes.
    ///
    /// Schemes are lowercased and de-duplicated while preserving order;
    /// empty entries are dropped. An empty result falls back to the
    /// default allow-list.
    pub fn new<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for scheme in schemes {
            let lower = scheme.into().to_lowercase();
            if !lower.is_empty() && !normalized.contains(&lower) {
                normalized.push(lower);
            }
        }
        if normalized.is_empty() {
            return Self {
                schemes: vec!["s3".to_string(), "https".to_string()],
            };
        }
        Self {
            schemes: normalized,
        }
    }

    /// Whether the given scheme (case-insensitive) is allowed.
    pub fn allows(&self, scheme: &str) -> bool {
        let lower = scheme.to_lowercase();
        self.schemes.iter().any(|s| *s == lower)
    }

    /// The normalized allow-list.
    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// Comma-joined allow-list for error messages.
    pub fn allowed_display(&self) -> String {
        self.schemes.join(", ")
    }

    /// Pure override merge: `None` keeps the base policy, `Some` replaces it.
    pub fn overridden(self, schemes: Option<Vec<String>>) -> Self {
        match schemes {
            Some(list) => Self::new(list),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_s3_and_https_only() {
        let policy = UriPolicy::default();
        assert!(policy.allows("s3"));
        assert!(policy.allows("https"));
        assert!(policy.allows("S3"));
        assert!(!policy.allows("http"));
        assert!(!policy.allows("ftp"));
    }

    #[test]
    fn normalizes_case_and_duplicates() {
        let policy = UriPolicy::new(["S3", "s3", "HTTPS", "", "https"]);
        assert_eq!(policy.schemes(), ["s3", "https"]);
    }

    #[test]
    fn empty_list_falls_back_to_default() {
        let policy = UriPolicy::new(Vec::<String>::new());
        assert_eq!(policy, UriPolicy::default());
    }

    #[test]
    fn overridden_replaces_or_keeps() {
        let base = UriPolicy::default();
        assert_eq!(base.clone().overridden(None), base);
        let replaced = base.overridden(Some(vec!["https".to_string(), "http".to_string()]));
        assert!(replaced.allows("http"));
        assert!(!replaced.allows("s3"));
    }
}
