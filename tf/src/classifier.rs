//! Error classification
//!
//! Turns an arbitrary error into a recovery decision: what failed, how
//! urgent it is, whether a retry is worth it, and which fallback strategy
//! applies. Classification never fails; anything unrecognized degrades to
//! an unknown-but-retryable verdict with generic advice.
//!
//! Keyword matching over the error text is a deliberate first-pass
//! heuristic. Callers with typed errors register a custom classifier,
//! which is consulted before the default rules.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use tracing::Level;

/// How urgently a failure matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// System-wide failure, immediate attention needed
    Critical,
    /// Component failure, affects user experience
    High,
    /// Degraded functionality, can continue
    Medium,
    /// Minor issue, logged for monitoring
    Low,
    /// Temporary issue, likely to resolve on its own
    Transient,
}

impl ErrorSeverity {
    /// Tracing level appropriate for this severity
    pub fn log_level(&self) -> Level {
        match self {
            Self::Critical | Self::High => Level::ERROR,
            Self::Medium => Level::WARN,
            Self::Low => Level::INFO,
            Self::Transient => Level::DEBUG,
        }
    }
}

/// What failed, for targeted recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AiModel,
    DocumentProcessing,
    Database,
    Network,
    Webhook,
    Memory,
    UserInput,
    FileDownload,
    ThirdParty,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AiModel => write!(f, "ai_model"),
            Self::DocumentProcessing => write!(f, "document_processing"),
            Self::Database => write!(f, "database"),
            Self::Network => write!(f, "network"),
            Self::Webhook => write!(f, "webhook"),
            Self::Memory => write!(f, "memory"),
            Self::UserInput => write!(f, "user_input"),
            Self::FileDownload => write!(f, "file_download"),
            Self::ThirdParty => write!(f, "third_party"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured classification result driving recovery decisions
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    /// Suggested retry budget
    pub max_retries: u32,
    /// Suggested base delay between retries, in seconds
    pub retry_delay_base: f64,
    /// Strategy tag for the embedding application
    pub fallback_strategy: &'static str,
    /// User-facing message; never contains internal error text
    pub user_message: &'static str,
    /// The error's own description, for logs only
    pub error_text: String,
}

/// Category keyword groups, first match wins
const CATEGORY_PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::AiModel, &["anthropic", "openai", "ai", "llm", "model"]),
    (ErrorCategory::DocumentProcessing, &["ocr", "document", "pdf", "image"]),
    (ErrorCategory::Database, &["database", "db", "sql", "mongo", "redis"]),
    (ErrorCategory::Network, &["network", "connection", "http", "url", "ssl"]),
    (ErrorCategory::Webhook, &["webhook", "callback"]),
    (ErrorCategory::Memory, &["memory", "state", "session"]),
    (ErrorCategory::UserInput, &["user", "input", "command"]),
    (ErrorCategory::FileDownload, &["download", "file", "telegram"]),
    (ErrorCategory::ThirdParty, &["cloudconvert", "google", "sheets", "api"]),
];

/// Patterns that always make an error non-retryable, checked first
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "unauthorized", "forbidden", "401", "403", "authentication", "invalid key",
    "not found", "404", "does not exist", "missing",
    "invalid", "bad request", "validation", "malformed", "400",
    "quota exceeded", "limit exceeded", "insufficient", "out of credits",
    "corrupt", "invalid format", "cannot parse", "unsupported",
];

/// Retryable pattern groups with their (severity, max_retries, delay_base)
const RETRYABLE_GROUPS: &[(&[&str], ErrorSeverity, u32, f64)] = &[
    (
        &["rate limit", "too many requests", "429", "throttled"],
        ErrorSeverity::Medium,
        5,
        2.0,
    ),
    (
        &["timeout", "timed out", "connection timeout", "read timeout"],
        ErrorSeverity::Medium,
        3,
        1.0,
    ),
    (
        &["service unavailable", "maintenance", "overloaded"],
        ErrorSeverity::High,
        10,
        5.0,
    ),
    (
        &["temporary", "transient", "unavailable", "try again", "503", "502", "504"],
        ErrorSeverity::Transient,
        3,
        0.5,
    ),
    (
        &["connection error", "network error", "dns", "unreachable", "reset by peer"],
        ErrorSeverity::Transient,
        3,
        0.5,
    ),
];

type CustomClassifier = Box<dyn Fn(&(dyn StdError + 'static)) -> Option<ClassifiedError> + Send + Sync>;

/// Keyword-driven error classifier with custom override hooks
pub struct ErrorClassifier {
    custom: Vec<CustomClassifier>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self { custom: Vec::new() }
    }

    /// Register a custom classifier, consulted before the default rules
    ///
    /// The closure may downcast the error to a concrete type and return
    /// `Some` to take over classification for it.
    pub fn register_custom<F>(&mut self, classifier: F)
    where
        F: Fn(&(dyn StdError + 'static)) -> Option<ClassifiedError> + Send + Sync + 'static,
    {
        self.custom.push(Box::new(classifier));
    }

    /// Classify an error, optionally with a context hint (operation name,
    /// subsystem) that participates in category matching
    pub fn classify(&self, error: &(dyn StdError + 'static), context: Option<&str>) -> ClassifiedError {
        for classifier in &self.custom {
            if let Some(classified) = classifier(error) {
                return classified;
            }
        }

        let error_text = error.to_string();
        let mut haystack = error_text.to_lowercase();
        if let Some(ctx) = context {
            haystack.push(' ');
            haystack.push_str(&ctx.to_lowercase());
        }

        self.classify_text(&haystack, error_text)
    }

    /// Classify from a plain description (for errors that only exist as text,
    /// e.g. reloaded dead-letter items)
    pub fn classify_description(&self, description: &str) -> ClassifiedError {
        self.classify_text(&description.to_lowercase(), description.to_string())
    }

    fn classify_text(&self, haystack: &str, error_text: String) -> ClassifiedError {
        let category = determine_category(haystack);
        let (retryable, severity, max_retries, retry_delay_base) = analyze_retryability(haystack, category);

        ClassifiedError {
            category,
            severity,
            retryable,
            max_retries,
            retry_delay_base,
            fallback_strategy: fallback_strategy(category, retryable),
            user_message: user_message(category, retryable),
            error_text,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn determine_category(haystack: &str) -> ErrorCategory {
    for (category, patterns) in CATEGORY_PATTERNS {
        if patterns.iter().any(|p| haystack.contains(p)) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

fn analyze_retryability(haystack: &str, category: ErrorCategory) -> (bool, ErrorSeverity, u32, f64) {
    // Non-retryable patterns win over everything
    if NON_RETRYABLE_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return (false, ErrorSeverity::High, 0, 0.0);
    }

    for (patterns, severity, max_retries, delay_base) in RETRYABLE_GROUPS {
        if patterns.iter().any(|p| haystack.contains(p)) {
            return (true, *severity, *max_retries, *delay_base);
        }
    }

    // Category defaults when no pattern matched
    match category {
        ErrorCategory::AiModel => (true, ErrorSeverity::High, 3, 1.0),
        ErrorCategory::DocumentProcessing => (false, ErrorSeverity::High, 0, 0.0),
        ErrorCategory::Database => (true, ErrorSeverity::Critical, 5, 1.0),
        ErrorCategory::Network => (true, ErrorSeverity::Medium, 5, 1.0),
        ErrorCategory::Webhook => (true, ErrorSeverity::Low, 3, 2.0),
        ErrorCategory::Memory => (false, ErrorSeverity::Critical, 0, 0.0),
        ErrorCategory::UserInput => (false, ErrorSeverity::Low, 0, 0.0),
        ErrorCategory::FileDownload => (true, ErrorSeverity::Medium, 3, 1.0),
        ErrorCategory::ThirdParty => (true, ErrorSeverity::Medium, 3, 1.0),
        ErrorCategory::Unknown => (true, ErrorSeverity::Medium, 2, 1.0),
    }
}

fn fallback_strategy(category: ErrorCategory, retryable: bool) -> &'static str {
    match (category, retryable) {
        (ErrorCategory::AiModel, true) => "fallback_model",
        (ErrorCategory::AiModel, false) => "static_response",
        (ErrorCategory::DocumentProcessing, true) => "manual_extraction",
        (ErrorCategory::DocumentProcessing, false) => "request_new_file",
        (ErrorCategory::Database, true) => "local_cache",
        (ErrorCategory::Database, false) => "in_memory_state",
        (ErrorCategory::Network, true) | (ErrorCategory::Webhook, true) => "queue_for_retry",
        (ErrorCategory::Network, false) => "degraded_mode",
        (ErrorCategory::Webhook, false) => "log_and_continue",
        (ErrorCategory::Memory, true) => "reconstruct_state",
        (ErrorCategory::Memory, false) => "start_fresh",
        (ErrorCategory::UserInput, _) => "clarify_request",
        (ErrorCategory::FileDownload, true) => "retry_download",
        (ErrorCategory::FileDownload, false) => "request_again",
        (ErrorCategory::ThirdParty, true) => "alternative_service",
        (ErrorCategory::ThirdParty, false) => "skip_operation",
        (ErrorCategory::Unknown, true) => "generic_retry",
        (ErrorCategory::Unknown, false) => "graceful_degradation",
    }
}

fn user_message(category: ErrorCategory, retryable: bool) -> &'static str {
    if retryable {
        match category {
            ErrorCategory::AiModel => "I'm experiencing a brief delay. Let me try again...",
            ErrorCategory::Database => "Just a moment, reconnecting to my systems...",
            ErrorCategory::Network => "Connection hiccup! Retrying...",
            ErrorCategory::FileDownload => "Having trouble accessing your file. Trying again...",
            ErrorCategory::ThirdParty => "Connecting to external service...",
            _ => "I'm working on it. One moment please...",
        }
    } else {
        match category {
            ErrorCategory::AiModel => "I'm having trouble processing that. Could you rephrase?",
            ErrorCategory::DocumentProcessing => {
                "I couldn't read that document. Could you try a clearer image or PDF?"
            }
            ErrorCategory::Database => "I'm having trouble saving your data. Your current session is safe.",
            ErrorCategory::UserInput => "I'm not sure I understood. Could you clarify what you need?",
            ErrorCategory::FileDownload => "I couldn't download your file. Please try uploading it again.",
            ErrorCategory::ThirdParty => {
                "An external service is temporarily unavailable. I'll continue with what I can do."
            }
            _ => "I encountered an issue, but I'm still here to help!",
        }
    }
}
