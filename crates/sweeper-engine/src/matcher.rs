//! Banned-content detection.
//!
//! A rule is either a literal keyword, matched as a case-insensitive
//! substring, or a regular expression written as `/pattern/flags`. Regex rules
//! are always case-insensitive; `m`, `s` and `x` flags are honoured and any
//! other flag letters are ignored. A rule that fails to compile is logged once
//! and matched literally instead.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use regex::{Regex, RegexBuilder};
use tracing::warn;

use sweeper_core::{MatchResult, Message};

/// Content matcher with a compiled-regex cache.
#[derive(Default)]
pub struct ContentMatcher {
    /// `None` marks a rule that failed to compile.
    cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl ContentMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `text` against every rule, returning all rules that matched.
    pub fn check<S: AsRef<str>>(&self, text: &str, rules: &[S]) -> MatchResult {
        if text.is_empty() || rules.is_empty() {
            return MatchResult::default();
        }

        let lowered = text.to_lowercase();
        let matched = rules
            .iter()
            .map(AsRef::as_ref)
            .filter(|rule| !rule.trim().is_empty())
            .filter(|rule| self.rule_matches(rule, text, &lowered))
            .map(str::to_owned)
            .collect();

        MatchResult::from_matches(matched)
    }

    /// Check a message's content.
    pub fn check_message<S: AsRef<str>>(&self, message: &Message, rules: &[S]) -> MatchResult {
        self.check(&message.content, rules)
    }

    /// Drop every cached regex.
    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Regex>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rule_matches(&self, rule: &str, text: &str, lowered: &str) -> bool {
        let Some((pattern, flags)) = split_regex_rule(rule) else {
            return lowered.contains(&rule.to_lowercase());
        };

        let mut cache = self.lock();
        let compiled = cache
            .entry(rule.to_owned())
            .or_insert_with(|| match build_regex(pattern, flags) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!(rule, error = %err, "Invalid regex rule, matching literally");
                    None
                }
            });

        match compiled {
            Some(regex) => regex.is_match(text),
            None => lowered.contains(&rule.to_lowercase()),
        }
    }
}

/// Flag letters accepted after the closing slash.
const REGEX_FLAGS: &str = "gimsuyx";

/// Split `/pattern/flags` into its parts; `None` for literal rules.
///
/// Anything after the closing slash must be known flag letters, so a rule
/// like `/path/to` stays a literal.
fn split_regex_rule(rule: &str) -> Option<(&str, &str)> {
    let rest = rule.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let flags = &rest[close + 1..];
    if !flags.chars().all(|c| REGEX_FLAGS.contains(c)) {
        return None;
    }
    Some((&rest[..close], flags))
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    let mut builder = RegexBuilder::new(pattern);
    builder.case_insensitive(true);
    for flag in flags.chars() {
        match flag {
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            _ => {}
        }
    }
    builder.build()
}
