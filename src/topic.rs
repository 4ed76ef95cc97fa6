//! Topic name and topic filter utilities.
//!
//! Topics are handled as level vectors rather than strings so that the
//! subscription trie and key schema can address individual levels. Sanitized
//! level vectors are terminated by the [`END`] sentinel: the terminator edge
//! of a complete filter in the trie is addressed with the same level walk as
//! every other edge, and the matcher's last step reads it directly.

use thiserror::Error;

/// Sentinel level marking the terminal edge of a complete filter.
///
/// NUL is not a valid character inside an MQTT topic, so the sentinel can
/// never collide with a user level. Every node in the cluster must use the
/// same sentinel.
pub const END: &str = "\u{0}";

/// Single-level wildcard.
pub const SINGLE_WILDCARD: &str = "+";

/// Multi-level wildcard, last level only.
pub const MULTI_WILDCARD: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("empty topic")]
    Empty,
    #[error("topic contains a NUL character")]
    EmbeddedNul,
    #[error("wildcard level {0:?} not allowed in a topic name")]
    WildcardInName(String),
    #[error("multi-level wildcard must be the final level")]
    MultiWildcardNotLast,
    #[error("wildcard must occupy a whole level, found {0:?}")]
    WildcardNotAlone(String),
}

/// Split a topic string into its levels, preserving empty levels
/// (`/a` has a leading empty level, `a/` a trailing one).
pub fn split(topic: &str) -> Vec<String> {
    topic.split('/').map(str::to_owned).collect()
}

/// Join sanitized levels back into the user-facing topic string.
/// The trailing [`END`] sentinel, if present, is not part of the output.
pub fn join(levels: &[String]) -> String {
    let user = match levels.last() {
        Some(last) if last == END => &levels[..levels.len() - 1],
        _ => levels,
    };
    user.join("/")
}

/// True iff any level is a wildcard. The [`END`] sentinel never matches.
pub fn is_filter<S: AsRef<str>>(levels: &[S]) -> bool {
    levels
        .iter()
        .any(|l| l.as_ref() == SINGLE_WILDCARD || l.as_ref() == MULTI_WILDCARD)
}

/// True iff the topic string contains a wildcard level.
pub fn is_filter_str(topic: &str) -> bool {
    topic
        .split('/')
        .any(|l| l == SINGLE_WILDCARD || l == MULTI_WILDCARD)
}

/// Validate a concrete topic name and return its END-terminated levels.
///
/// Rejects wildcards, embedded NULs, and the empty topic. Idempotent over
/// already-terminated level lists rendered back through [`join`].
pub fn sanitize_name(topic: &str) -> Result<Vec<String>, TopicError> {
    let mut levels = presanitize(topic)?;
    for level in &levels {
        if level.contains('+') || level.contains('#') {
            return Err(TopicError::WildcardInName(level.clone()));
        }
    }
    levels.push(END.to_owned());
    Ok(levels)
}

/// Validate a topic filter and return its END-terminated levels.
///
/// `#` is accepted only as the final level, `+` only as a whole level.
pub fn sanitize_filter(filter: &str) -> Result<Vec<String>, TopicError> {
    let mut levels = presanitize(filter)?;
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level == MULTI_WILDCARD {
            if i != last {
                return Err(TopicError::MultiWildcardNotLast);
            }
        } else if level != SINGLE_WILDCARD && (level.contains('+') || level.contains('#')) {
            return Err(TopicError::WildcardNotAlone(level.clone()));
        }
    }
    levels.push(END.to_owned());
    Ok(levels)
}

fn presanitize(topic: &str) -> Result<Vec<String>, TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\u{0}') {
        return Err(TopicError::EmbeddedNul);
    }
    Ok(split(topic))
}
