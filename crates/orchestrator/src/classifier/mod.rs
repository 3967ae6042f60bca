//! Error Classifier
//!
//! Maps a raised error to an [`ErrorClassification`] by evaluating an ordered rule
//! list. Matching runs in three passes, each in ascending priority: rule predicates,
//! then exact error names, then message patterns. A rule that names the error
//! therefore beats a message heuristic of another rule. Errors matching nothing get a
//! conservative fallback so no failure mode is ever swallowed.

mod rules;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::request::ExecutionErrorInfo;

pub use rules::default_rules;

/// Open taxonomy tag. New rules may introduce their own types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorType(Cow<'static, str>);

impl ErrorType {
    pub const SYNTAX: ErrorType = ErrorType(Cow::Borrowed("syntax"));
    pub const UNDEFINED_REFERENCE: ErrorType = ErrorType(Cow::Borrowed("undefined-reference"));
    pub const ENTITY_NOT_FOUND: ErrorType = ErrorType(Cow::Borrowed("entity-not-found"));
    pub const TYPE_ERROR: ErrorType = ErrorType(Cow::Borrowed("type-error"));
    pub const TIMEOUT: ErrorType = ErrorType(Cow::Borrowed("timeout"));
    pub const NETWORK: ErrorType = ErrorType(Cow::Borrowed("network"));
    pub const UNKNOWN: ErrorType = ErrorType(Cow::Borrowed("unknown"));

    pub fn new(name: impl Into<String>) -> Self {
        ErrorType(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorType {
    fn from(value: &str) -> Self {
        ErrorType::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    CompileTime,
    Runtime,
    Execution,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// `matched_rule` of the fallback classification.
pub const FALLBACK_RULE: &str = "fallback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_type: ErrorType,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub clean_context: bool,
    /// The failure has to reach the submitter instead of being retried silently
    pub requires_reasoning: bool,
    pub matched_rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ErrorClassification {
    pub fn new(error_type: ErrorType, category: ErrorCategory, severity: Severity) -> Self {
        Self {
            error_type,
            category,
            severity,
            retryable: false,
            clean_context: false,
            requires_reasoning: false,
            matched_rule: String::new(),
            suggestion: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn clean_context(mut self, clean: bool) -> Self {
        self.clean_context = clean;
        self
    }

    pub fn requires_reasoning(mut self, requires: bool) -> Self {
        self.requires_reasoning = requires;
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Used when no rule matches.
    pub fn fallback() -> Self {
        let mut classification =
            ErrorClassification::new(ErrorType::UNKNOWN, ErrorCategory::Runtime, Severity::High)
                .requires_reasoning(true);
        classification.matched_rule = FALLBACK_RULE.to_string();
        classification
    }

    /// No rule matched this failure.
    pub fn is_fallback(&self) -> bool {
        self.matched_rule == FALLBACK_RULE
    }
}

pub type ErrorPredicate = Arc<dyn Fn(&ExecutionErrorInfo) -> bool + Send + Sync>;

/// One classifier rule. It matches when the error name is listed, the message
/// matches the pattern, or the predicate accepts the error.
#[derive(Clone)]
pub struct ClassificationRule {
    pub name: String,
    pub priority: u32,
    error_names: Vec<String>,
    message_pattern: Option<Regex>,
    predicate: Option<ErrorPredicate>,
    classification: ErrorClassification,
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("error_names", &self.error_names)
            .field("message_pattern", &self.message_pattern.as_ref().map(Regex::as_str))
            .field("predicate", &self.predicate.is_some())
            .field("error_type", &self.classification.error_type)
            .finish()
    }
}

impl ClassificationRule {
    pub fn new(name: impl Into<String>, priority: u32, classification: ErrorClassification) -> Self {
        Self {
            name: name.into(),
            priority,
            error_names: Vec::new(),
            message_pattern: None,
            predicate: None,
            classification,
        }
    }

    pub fn on_error_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn on_message(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.message_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionErrorInfo) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, error: &ExecutionErrorInfo) -> bool {
        self.accepts(error) || self.names(error) || self.message_matches(error)
    }

    fn accepts(&self, error: &ExecutionErrorInfo) -> bool {
        self.predicate.as_ref().is_some_and(|p| p(error))
    }

    fn names(&self, error: &ExecutionErrorInfo) -> bool {
        self.error_names.iter().any(|n| n == &error.name)
    }

    fn message_matches(&self, error: &ExecutionErrorInfo) -> bool {
        self.message_pattern
            .as_ref()
            .is_some_and(|p| p.is_match(&error.message))
    }

    pub fn error_type(&self) -> &ErrorType {
        &self.classification.error_type
    }
}

/// Ordered, runtime-extensible rule engine.
pub struct ErrorClassifier {
    rules: RwLock<Vec<ClassificationRule>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// A classifier with no rules; everything classifies as the fallback.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_rules() -> Result<Self, regex::Error> {
        let classifier = Self::new();
        for rule in default_rules()? {
            classifier.register_rule(rule);
        }
        Ok(classifier)
    }

    /// Add a rule, replacing any rule with the same name.
    pub fn register_rule(&self, rule: ClassificationRule) {
        let mut rules = self.rules.write();
        if let Some(pos) = rules.iter().position(|r| r.name == rule.name) {
            info!(rule = %rule.name, "replacing classification rule");
            rules.remove(pos);
        } else {
            debug!(rule = %rule.name, priority = rule.priority, "registered classification rule");
        }
        // Stable insert keeps registration order among equal priorities.
        let pos = rules.partition_point(|r| r.priority <= rule.priority);
        rules.insert(pos, rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        before != rules.len()
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name.clone()).collect()
    }

    pub fn classify(&self, error: &ExecutionErrorInfo) -> ErrorClassification {
        let rules = self.rules.read();
        let matched = rules
            .iter()
            .find(|r| r.accepts(error))
            .or_else(|| rules.iter().find(|r| r.names(error)))
            .or_else(|| rules.iter().find(|r| r.message_matches(error)));
        match matched {
            Some(rule) => {
                let mut classification = rule.classification.clone();
                classification.matched_rule = rule.name.clone();
                debug!(
                    rule = %rule.name,
                    error_type = %classification.error_type,
                    error_name = %error.name,
                    "classified error"
                );
                classification
            }
            None => {
                debug!(error_name = %error.name, "no classification rule matched");
                ErrorClassification::fallback()
            }
        }
    }
}
