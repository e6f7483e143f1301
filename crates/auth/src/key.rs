//! Keys shared with trusted callers

use std::fmt;

/// A secret shared with a trusted caller, such as the identity provider
/// that vouches for members before sessions are issued.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey(String);

impl SharedKey {
    /// Blank keys are rejected
    pub fn new(key: &str) -> Option<Self> {
        let key = key.trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    /// Whether `presented` is this key. Every byte is compared, whatever
    /// the position of the first difference.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();

        let mut diff = expected.len() ^ presented.len();
        for (i, byte) in expected.iter().enumerate() {
            diff |= usize::from(byte ^ presented.get(i).copied().unwrap_or(0));
        }
        diff == 0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let key = SharedKey::new(" s3cret ").unwrap();
        assert!(key.matches("s3cret"));
        assert!(!key.matches("s3cre"));
        assert!(!key.matches("s3cret!"));
        assert!(!key.matches(""));
    }

    #[test]
    fn test_blank_key_is_rejected() {
        assert!(SharedKey::new("   ").is_none());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SharedKey::new("s3cret").unwrap();
        assert!(!format!("{:?}", key).contains("s3cret"));
    }
}
