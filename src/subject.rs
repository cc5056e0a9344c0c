//! Subject matching.
//!
//! Subjects are dot-separated token lists (`orders.us.created`). Filters may
//! use two wildcards:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens and must be the last token

use crate::error::{EngineError, Result};

/// Full wildcard token.
pub const FULL_WILDCARD: &str = ">";
/// Single token wildcard.
pub const TOKEN_WILDCARD: &str = "*";

fn has_invalid_chars(token: &str) -> bool {
    token.chars().any(|c| c.is_whitespace())
}

/// Validate a filter subject (wildcards allowed).
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(EngineError::InvalidSubject(filter.to_string()));
    }
    let tokens: Vec<&str> = filter.split('.').collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() || has_invalid_chars(token) {
            return Err(EngineError::InvalidSubject(filter.to_string()));
        }
        if token.len() > 1 && (token.contains('*') || token.contains('>')) {
            return Err(EngineError::InvalidSubject(filter.to_string()));
        }
        if *token == FULL_WILDCARD && i != last {
            return Err(EngineError::InvalidSubject(filter.to_string()));
        }
    }
    Ok(())
}

/// Validate a concrete publish subject (no wildcards).
pub fn validate_subject(subject: &str) -> Result<()> {
    validate_filter(subject)?;
    if is_literal(subject) {
        Ok(())
    } else {
        Err(EngineError::InvalidSubject(subject.to_string()))
    }
}

/// True when the subject contains no wildcard tokens.
pub fn is_literal(subject: &str) -> bool {
    subject
        .split('.')
        .all(|t| t != TOKEN_WILDCARD && t != FULL_WILDCARD)
}

/// Check if a literal subject matches a filter.
///
/// Matching rules:
/// - Literal tokens must be equal
/// - `*` matches any single token
/// - `>` matches the remaining tokens (at least one)
pub fn subject_matches(subject: &str, filter: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut filter_tokens = filter.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(FULL_WILDCARD), Some(_)) => return true,
            (Some(TOKEN_WILDCARD), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check whether any literal subject could match both filters.
pub fn filters_overlap(a: &str, b: &str) -> bool {
    let mut a_tokens = a.split('.');
    let mut b_tokens = b.split('.');
    loop {
        match (a_tokens.next(), b_tokens.next()) {
            (Some(FULL_WILDCARD), Some(_)) | (Some(_), Some(FULL_WILDCARD)) => return true,
            (Some(x), Some(y)) if x == y || x == TOKEN_WILDCARD || y == TOKEN_WILDCARD => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check if a subject matches any of the given filters.
pub fn matches_any(subject: &str, filters: &[String]) -> bool {
    filters.iter().any(|f| subject_matches(subject, f))
}
