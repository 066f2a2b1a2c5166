/// Terms rejected by the default prompt filter.
pub const DEFAULT_RESTRICTED_TERMS: &[&str] = &["illegal", "harm", "explicit"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub term: String,
}

/// Predicate applied to text input before anything leaves the process.
pub trait ContentPolicy: Send + Sync {
    fn check(&self, text: &str) -> Result<(), PolicyViolation>;
}

/// Case-insensitive substring denylist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenylistPolicy {
    terms: Vec<String>,
}

impl DenylistPolicy {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self { terms: Vec::new() };
        policy.extend(terms);
        policy
    }

    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extend(terms);
        self
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    fn extend<I, S>(&mut self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for term in terms {
            let normalized = term.as_ref().trim().to_lowercase();
            if normalized.is_empty() || self.terms.contains(&normalized) {
                continue;
            }
            self.terms.push(normalized);
        }
    }
}

impl Default for DenylistPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RESTRICTED_TERMS.iter().copied())
    }
}

impl ContentPolicy for DenylistPolicy {
    fn check(&self, text: &str) -> Result<(), PolicyViolation> {
        let lowered = text.to_lowercase();
        match self.terms.iter().find(|term| lowered.contains(term.as_str())) {
            Some(term) => Err(PolicyViolation { term: term.clone() }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContentPolicy for AllowAll {
    fn check(&self, _text: &str) -> Result<(), PolicyViolation> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AllowAll, ContentPolicy, DenylistPolicy};

    #[test]
    fn default_denylist_matches_case_insensitively() {
        let policy = DenylistPolicy::default();
        assert!(policy.check("a cat in a spacesuit").is_ok());
        let violation = policy.check("Something ILLEGAL here").unwrap_err();
        assert_eq!(violation.term, "illegal");
        assert!(policy.check("unharmed").is_err());
        assert!(policy.check("EXPLICITLY").is_err());
    }

    #[test]
    fn with_terms_extends_and_dedupes() {
        let policy = DenylistPolicy::default().with_terms(["  Gore ", "harm", ""]);
        assert_eq!(policy.terms(), &["illegal", "harm", "explicit", "gore"]);
        assert!(policy.check("gory? no, GORE").is_err());
    }

    #[test]
    fn allow_all_accepts_anything() {
        assert!(AllowAll.check("explicit").is_ok());
    }
}
