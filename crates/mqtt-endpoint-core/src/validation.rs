//! Topic name / topic filter / client id validation and shared-subscription
//! parsing. Applied at the API boundary so protocol errors carry the right
//! reason code (`TOPIC_FILTER_INVALID` and friends) instead of surfacing as
//! malformed packets mid-connection.

use crate::error::{MqttError, Result};

pub use crate::topic_matching::matches as topic_matches_filter;

const MAX_TOPIC_LEN: usize = 65_535;

/// A topic name: non-empty, bounded, and free of wildcards.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(MqttError::InvalidTopicName("empty topic".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(MqttError::InvalidTopicName(format!(
            "topic length {} exceeds {MAX_TOPIC_LEN}",
            topic.len()
        )));
    }
    if topic.contains(['+', '#']) {
        return Err(MqttError::InvalidTopicName(topic.to_string()));
    }
    if topic.contains('\u{0000}') {
        return Err(MqttError::InvalidTopicName("topic contains U+0000".to_string()));
    }
    Ok(())
}

/// A topic filter: wildcards only as whole levels, `#` only terminal.
/// `$share/<group>/<filter>` is validated on its inner filter.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(MqttError::InvalidTopicFilter("empty filter".to_string()));
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(MqttError::InvalidTopicFilter(format!(
            "filter length {} exceeds {MAX_TOPIC_LEN}",
            filter.len()
        )));
    }
    if filter.contains('\u{0000}') {
        return Err(MqttError::InvalidTopicFilter(
            "filter contains U+0000".to_string(),
        ));
    }

    let (inner, group) = parse_shared_subscription(filter);
    if let Some(group) = group {
        if group.is_empty() || group.contains(['+', '#', '/']) {
            return Err(MqttError::InvalidTopicFilter(format!(
                "invalid share group in {filter}"
            )));
        }
        if inner.is_empty() {
            return Err(MqttError::InvalidTopicFilter(format!(
                "shared subscription {filter} has no filter"
            )));
        }
    }

    let levels: Vec<&str> = inner.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        match *level {
            "+" => {}
            "#" => {
                if index != levels.len() - 1 {
                    return Err(MqttError::InvalidTopicFilter(format!(
                        "'#' must be the final level in {filter}"
                    )));
                }
            }
            other => {
                // Wildcards embedded within a level, e.g. "a+b" or "a#".
                if other.contains(['+', '#']) {
                    return Err(MqttError::InvalidTopicFilter(format!(
                        "wildcard inside level '{other}' in {filter}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Client ids are bounded and free of U+0000. Zero-length ids are legal at
/// this layer; the broker decides whether to assign one.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.len() > MAX_TOPIC_LEN {
        return Err(MqttError::InvalidClientId(format!(
            "client id length {} exceeds {MAX_TOPIC_LEN}",
            client_id.len()
        )));
    }
    if client_id.contains('\u{0000}') {
        return Err(MqttError::InvalidClientId(
            "client id contains U+0000".to_string(),
        ));
    }
    Ok(())
}

/// Splits `$share/<group>/<filter>` into `(<filter>, Some(<group>))`;
/// anything else comes back unchanged with no group.
#[must_use]
pub fn parse_shared_subscription(filter: &str) -> (&str, Option<&str>) {
    let Some(rest) = filter.strip_prefix("$share/") else {
        return (filter, None);
    };
    match rest.split_once('/') {
        Some((group, inner)) => (inner, Some(group)),
        None => ("", Some(rest)),
    }
}

/// The filter used for matching, with any `$share/<group>/` prefix removed.
#[must_use]
pub fn strip_shared_subscription_prefix(filter: &str) -> &str {
    parse_shared_subscription(filter).0
}
