//! Severity classification for reported errors.
//!
//! A classifier is an ordered list of rules. Each rule pairs a matcher with a
//! severity, and the first matching rule wins, so priority is expressed by
//! position in the list rather than by the severity itself. Errors no rule
//! matches are `Severity::Low`.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Severity;
use crate::CoreError;

lazy_static! {
    /// HTTP 5xx status codes mentioned in an error message
    static ref SERVER_ERROR_PATTERN: Regex = Regex::new(
        r"\b(?:http|status)[\s:=]*5\d\d\b"
    ).unwrap();
}

/// Built-in keyword rules, most severe category first.
const DEFAULT_KEYWORDS: &[(Severity, &[&str])] = &[
    (
        Severity::Critical,
        &[
            "critical",
            "fatal",
            "panic",
            "out of memory",
            "corrupt",
            "security",
            "unauthorized access",
        ],
    ),
    (
        Severity::High,
        &[
            "database",
            "connection",
            "unavailable",
            "refused",
            "timeout",
            "timed out",
        ],
    ),
    (
        Severity::Medium,
        &["rate limit", "throttl", "retry", "temporar", "degraded", "slow"],
    ),
];

/// How a rule recognises an error.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-insensitive substring of the error message
    Contains(String),

    /// Regular expression applied to the lowercased error message
    Pattern(Regex),

    /// Substring of the error's type name
    ErrorType(String),
}

impl Matcher {
    fn matches(&self, error_type: &str, lowered_message: &str) -> bool {
        match self {
            Matcher::Contains(needle) => lowered_message.contains(needle.as_str()),
            Matcher::Pattern(regex) => regex.is_match(lowered_message),
            Matcher::ErrorType(name) => error_type.contains(name.as_str()),
        }
    }
}

/// One (matcher, severity) pair.
#[derive(Debug, Clone)]
pub struct SeverityRule {
    pub matcher: Matcher,
    pub severity: Severity,
}

impl SeverityRule {
    /// Match messages containing `keyword`, ignoring case.
    pub fn contains(keyword: &str, severity: Severity) -> Self {
        Self {
            matcher: Matcher::Contains(keyword.to_lowercase()),
            severity,
        }
    }

    /// Match the lowercased message against `regex`.
    pub fn pattern(regex: Regex, severity: Severity) -> Self {
        Self {
            matcher: Matcher::Pattern(regex),
            severity,
        }
    }

    /// Match error type names containing `name`.
    pub fn error_type(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            matcher: Matcher::ErrorType(name.into()),
            severity,
        }
    }
}

/// Kind of matcher in a serialized rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Contains,
    Regex,
    ErrorType,
}

/// Serializable form of a [`SeverityRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityRuleSpec {
    #[serde(default = "default_kind")]
    pub kind: MatcherKind,
    pub pattern: String,
    pub severity: Severity,
}

fn default_kind() -> MatcherKind {
    MatcherKind::Contains
}

impl SeverityRuleSpec {
    /// Build the runtime rule, compiling regexes.
    pub fn compile(&self) -> Result<SeverityRule, CoreError> {
        let rule = match self.kind {
            MatcherKind::Contains => SeverityRule::contains(&self.pattern, self.severity),
            MatcherKind::ErrorType => SeverityRule::error_type(&self.pattern, self.severity),
            MatcherKind::Regex => {
                let regex = Regex::new(&self.pattern).map_err(|source| CoreError::InvalidPattern {
                    pattern: self.pattern.clone(),
                    source,
                })?;
                SeverityRule::pattern(regex, self.severity)
            }
        };
        Ok(rule)
    }
}

/// Ordered severity classifier.
#[derive(Debug, Clone)]
pub struct SeverityClassifier {
    rules: Vec<SeverityRule>,
}

impl SeverityClassifier {
    /// Classifier with an explicit rule list.
    pub fn new(rules: Vec<SeverityRule>) -> Self {
        Self { rules }
    }

    /// Compile serialized rules. An empty list yields the built-in rules.
    pub fn from_specs(specs: &[SeverityRuleSpec]) -> Result<Self, CoreError> {
        if specs.is_empty() {
            return Ok(Self::default());
        }
        let rules = specs
            .iter()
            .map(SeverityRuleSpec::compile)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(rules = rules.len(), "Compiled severity rules");
        Ok(Self::new(rules))
    }

    /// Append a rule with the lowest priority.
    pub fn push(&mut self, rule: SeverityRule) {
        self.rules.push(rule);
    }

    /// Rules in priority order.
    pub fn rules(&self) -> &[SeverityRule] {
        &self.rules
    }

    /// Severity of an error, from its type name and message.
    pub fn classify(&self, error_type: &str, message: &str) -> Severity {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(error_type, &lowered))
            .map(|rule| rule.severity)
            .unwrap_or_default()
    }
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        let mut rules = Vec::new();
        for (severity, keywords) in DEFAULT_KEYWORDS {
            for keyword in *keywords {
                rules.push(SeverityRule::contains(keyword, *severity));
            }
            if *severity == Severity::High {
                rules.push(SeverityRule::pattern(
                    SERVER_ERROR_PATTERN.clone(),
                    Severity::High,
                ));
            }
        }
        Self::new(rules)
    }
}
