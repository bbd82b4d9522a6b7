//! Parameter-type list matching, including the trailing `..` wildcard.

use super::{Pattern, PatternError};

/// The "any remaining parameters" token. Only valid in the final position.
pub const REMAINING_TOKEN: &str = "..";

/// An ordered list of parameter-type patterns, optionally ending with `..`
/// meaning "zero or more further parameters of any type".
#[derive(Debug, Clone)]
pub struct ParamPatterns {
    patterns: Vec<Pattern>,
    any_remaining: bool,
}

impl ParamPatterns {
    /// Compile a parameter-pattern list. A `..` anywhere but the last
    /// position is a configuration error.
    pub fn compile(texts: &[String]) -> Result<Self, PatternError> {
        let mut patterns = Vec::new();
        let mut any_remaining = false;

        for (position, text) in texts.iter().enumerate() {
            if text == REMAINING_TOKEN {
                if position + 1 != texts.len() {
                    return Err(PatternError::RemainingTokenNotLast { position });
                }
                any_remaining = true;
            } else {
                patterns.push(Pattern::compile(text)?);
            }
        }

        Ok(Self {
            patterns,
            any_remaining,
        })
    }

    /// Exact-arity match on the declared prefix; with the wildcard, trailing
    /// parameters of any type and count are accepted.
    pub fn matches(&self, parameter_types: &[String]) -> bool {
        if self.any_remaining {
            if parameter_types.len() < self.patterns.len() {
                return false;
            }
        } else if parameter_types.len() != self.patterns.len() {
            return false;
        }

        self.patterns
            .iter()
            .zip(parameter_types.iter())
            .all(|(pattern, ty)| pattern.matches(ty))
    }

    /// The original pattern texts, with the `..` token restored (round-trip
    /// guarantee).
    pub fn sources(&self) -> Vec<String> {
        let mut out: Vec<String> = self.patterns.iter().map(|p| p.source().to_string()).collect();
        if self.any_remaining {
            out.push(REMAINING_TOKEN.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_arity_without_wildcard() {
        let p = ParamPatterns::compile(&types(&["java.lang.String", "int"])).unwrap();
        assert!(p.matches(&types(&["java.lang.String", "int"])));
        assert!(!p.matches(&types(&["java.lang.String"])));
        assert!(!p.matches(&types(&["java.lang.String", "int", "long"])));
    }

    #[test]
    fn empty_list_matches_only_no_args() {
        let p = ParamPatterns::compile(&[]).unwrap();
        assert!(p.matches(&[]));
        assert!(!p.matches(&types(&["int"])));
    }

    #[test]
    fn trailing_wildcard_accepts_any_suffix() {
        let p = ParamPatterns::compile(&types(&["java.lang.String", ".."])).unwrap();
        assert!(p.matches(&types(&["java.lang.String"])));
        assert!(p.matches(&types(&["java.lang.String", "int"])));
        assert!(p.matches(&types(&["java.lang.String", "int", "long", "byte[]"])));
        assert!(!p.matches(&[]));
        assert!(!p.matches(&types(&["int", "java.lang.String"])));
    }

    #[test]
    fn lone_wildcard_matches_everything() {
        let p = ParamPatterns::compile(&types(&[".."])).unwrap();
        assert!(p.matches(&[]));
        assert!(p.matches(&types(&["a", "b", "c"])));
    }

    #[test]
    fn wildcard_not_last_is_rejected() {
        let err = ParamPatterns::compile(&types(&["..", "int"])).unwrap_err();
        assert!(matches!(
            err,
            PatternError::RemainingTokenNotLast { position: 0 }
        ));
    }

    #[test]
    fn prefix_entries_may_be_globs() {
        let p = ParamPatterns::compile(&types(&["com.example.*", ".."])).unwrap();
        assert!(p.matches(&types(&["com.example.Request", "int"])));
        assert!(!p.matches(&types(&["org.other.Request"])));
    }

    #[test]
    fn sources_round_trip_including_token() {
        let original = types(&["java.lang.String", "com.example.*", ".."]);
        let p = ParamPatterns::compile(&original).unwrap();
        assert_eq!(p.sources(), original);
    }
}
