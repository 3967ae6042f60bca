use crate::runner::UNRESOLVED_SENTINEL;

use super::{ClassificationRule, ErrorCategory, ErrorClassification, ErrorType, Severity};

/// The rule set every classifier starts with, lowest priority value first.
pub fn default_rules() -> Result<Vec<ClassificationRule>, regex::Error> {
    Ok(vec![
        ClassificationRule::new(
            "timeout",
            10,
            ErrorClassification::new(ErrorType::TIMEOUT, ErrorCategory::Execution, Severity::Medium)
                .retryable(true)
                .clean_context(true)
                .suggestion(
                    "Execution exceeded its time budget: do less work per snippet, \
                     avoid unbounded loops, or split the task into smaller steps",
                ),
        )
        .on_error_names(["TimeoutError"])
        .on_message(r"(?i)\b(timed out|timeout)\b")?,
        ClassificationRule::new(
            "syntax",
            20,
            ErrorClassification::new(ErrorType::SYNTAX, ErrorCategory::CompileTime, Severity::High)
                .requires_reasoning(true)
                .suggestion("The code does not parse; fix the syntax before resubmitting"),
        )
        .on_error_names(["SyntaxError"])
        .on_message(
            r"(?i)(unexpected token|unexpected end of input|unterminated string|syntax error)",
        )?,
        ClassificationRule::new(
            "entity-not-found",
            30,
            ErrorClassification::new(
                ErrorType::ENTITY_NOT_FOUND,
                ErrorCategory::Runtime,
                Severity::Medium,
            )
            .retryable(true)
            .clean_context(true)
            .requires_reasoning(true)
            .suggestion("Reference only identifiers listed in the valid entities"),
        )
        .on_error_names(["NotFoundError", "EntityNotFoundError"])
        .when(|e| e.message.contains(UNRESOLVED_SENTINEL))
        .on_message(
            r"(?i)(__unresolved_reference__|\b(entity|record|memory|task|goal|vault)\b.*\bnot found\b|no such (entity|record))",
        )?,
        ClassificationRule::new(
            "undefined-reference",
            40,
            ErrorClassification::new(
                ErrorType::UNDEFINED_REFERENCE,
                ErrorCategory::Runtime,
                Severity::Medium,
            )
            .retryable(true)
            .clean_context(true)
            .requires_reasoning(true)
            .suggestion("A name used by the code is not defined in the injected context"),
        )
        .on_error_names(["ReferenceError", "NameError"])
        .on_message(r"(?i)(is not defined|undefined variable)")?,
        ClassificationRule::new(
            "type-error",
            50,
            ErrorClassification::new(ErrorType::TYPE_ERROR, ErrorCategory::Runtime, Severity::Medium)
                .requires_reasoning(true)
                .suggestion("A value has an unexpected type; check the shape of the data used"),
        )
        .on_error_names(["TypeError"])
        .on_message(r"(?i)(is not a function|cannot read propert(y|ies) of (undefined|null))")?,
        ClassificationRule::new(
            "network",
            60,
            ErrorClassification::new(ErrorType::NETWORK, ErrorCategory::External, Severity::Low)
                .retryable(true),
        )
        .on_error_names(["NetworkError", "FetchError", "ConnectionError"])
        .on_message(
            r"(?i)(ECONNRESET|ECONNREFUSED|ETIMEDOUT|network error|connection (reset|refused)|socket hang up|failed to fetch)",
        )?,
    ])
}
