//! Pattern Matcher - compiles declarative rule strings into matchable predicates.
//!
//! The whole pattern language is four forms: a literal (exact match), a
//! `*`/`?` glob (compiled to an anchored regex), a `|`-delimited alternation
//! of sub-patterns, and the trailing `..` parameter-list wildcard handled in
//! [`params`]. An empty pattern matches everything. Compiled patterns keep
//! their source text so rules round-trip identically between storage and
//! matching.

use regex::Regex;
use thiserror::Error;

pub mod params;
pub mod target;

pub use params::ParamPatterns;
pub use target::{MethodTarget, TypeTarget};

/// Errors raised while compiling a pattern string.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("empty alternation branch in pattern: {pattern:?}")]
    EmptyAlternationBranch { pattern: String },

    #[error("the `..` wildcard is only valid as the last parameter pattern (found at position {position})")]
    RemainingTokenNotLast { position: usize },

    #[error("failed to compile glob pattern {pattern:?} to a regex")]
    GlobCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum MatchSpec {
    /// Empty pattern: matches everything.
    Any,
    Literal(String),
    Glob(Regex),
    Alternation(Vec<MatchSpec>),
}

/// A compiled, immutable pattern. Matching is a pure function of the
/// candidate string; repeated calls are idempotent.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    spec: MatchSpec,
}

impl Pattern {
    /// Compile a pattern string. An empty string compiles to match-all.
    pub fn compile(text: &str) -> Result<Self, PatternError> {
        let spec = if text.is_empty() {
            MatchSpec::Any
        } else if text.contains('|') {
            let mut branches = Vec::new();
            for part in text.split('|') {
                if part.is_empty() {
                    return Err(PatternError::EmptyAlternationBranch {
                        pattern: text.to_string(),
                    });
                }
                branches.push(compile_single(part)?);
            }
            MatchSpec::Alternation(branches)
        } else {
            compile_single(text)?
        };

        Ok(Self {
            source: text.to_string(),
            spec,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match_spec(&self.spec, candidate)
    }

    /// True when any of the given candidates matches. An empty pattern
    /// matches even when the candidate list is empty.
    pub fn matches_any<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> bool {
        if self.is_match_all() {
            return true;
        }
        candidates.into_iter().any(|c| self.matches(c))
    }

    /// The original pattern text, unchanged (round-trip guarantee).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self.spec, MatchSpec::Any)
    }
}

fn compile_single(text: &str) -> Result<MatchSpec, PatternError> {
    if text.contains('*') || text.contains('?') {
        let regex = glob_to_regex(text).map_err(|source| PatternError::GlobCompile {
            pattern: text.to_string(),
            source,
        })?;
        Ok(MatchSpec::Glob(regex))
    } else {
        Ok(MatchSpec::Literal(text.to_string()))
    }
}

fn match_spec(spec: &MatchSpec, candidate: &str) -> bool {
    match spec {
        MatchSpec::Any => true,
        MatchSpec::Literal(lit) => lit == candidate,
        MatchSpec::Glob(re) => re.is_match(candidate),
        MatchSpec::Alternation(branches) => branches.iter().any(|b| match_spec(b, candidate)),
    }
}

/// Translate a `*`/`?` glob into an anchored regex. Every other character is
/// matched literally.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_pattern_matches_everything() {
        let p = Pattern::compile("").unwrap();
        assert!(p.is_match_all());
        assert!(p.matches("anything"));
        assert!(p.matches(""));
    }

    #[test]
    fn literal_requires_exact_match() {
        let p = Pattern::compile("com.example.Service").unwrap();
        assert!(p.matches("com.example.Service"));
        assert!(!p.matches("com.example.ServiceImpl"));
        assert!(!p.matches("com.example"));
    }

    #[test]
    fn glob_star_spans_separators() {
        let p = Pattern::compile("com.example.*").unwrap();
        assert!(p.matches("com.example.Service"));
        assert!(p.matches("com.example.sub.Deep"));
        assert!(!p.matches("org.example.Service"));
    }

    #[test]
    fn glob_question_matches_single_char() {
        let p = Pattern::compile("Handler?").unwrap();
        assert!(p.matches("Handler1"));
        assert!(!p.matches("Handler12"));
        assert!(!p.matches("Handler"));
    }

    #[test]
    fn glob_is_anchored() {
        let p = Pattern::compile("*Service").unwrap();
        assert!(p.matches("UserService"));
        assert!(!p.matches("UserServiceImpl"));
    }

    #[test]
    fn dots_are_literal_inside_globs() {
        let p = Pattern::compile("com.example.?").unwrap();
        assert!(!p.matches("comXexampleXZ"));
        assert!(p.matches("com.example.Z"));
    }

    #[test]
    fn alternation_is_or_semantics() {
        let p = Pattern::compile("execute|run|call").unwrap();
        assert!(p.matches("execute"));
        assert!(p.matches("run"));
        assert!(p.matches("call"));
        assert!(!p.matches("invoke"));
    }

    #[test]
    fn alternation_branches_may_be_globs() {
        let p = Pattern::compile("get*|set*").unwrap();
        assert!(p.matches("getName"));
        assert!(p.matches("setName"));
        assert!(!p.matches("name"));
    }

    #[test]
    fn empty_alternation_branch_is_rejected() {
        assert!(Pattern::compile("run|").is_err());
        assert!(Pattern::compile("|run").is_err());
    }

    #[test]
    fn source_round_trips() {
        for text in ["", "exact", "get*|set*", "com.?.x"] {
            let p = Pattern::compile(text).unwrap();
            assert_eq!(p.source(), text);
        }
    }

    #[test]
    fn recompilation_behaves_identically() {
        let a = Pattern::compile("com.*.Service|org.?x").unwrap();
        let b = Pattern::compile("com.*.Service|org.?x").unwrap();
        for candidate in ["com.a.Service", "org.1x", "org.12x", "net.Service", ""] {
            assert_eq!(a.matches(candidate), b.matches(candidate));
        }
    }
}
