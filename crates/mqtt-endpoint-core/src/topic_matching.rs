//! Pure topic-filter matching.
//!
//! `+` matches exactly one level, a terminal `#` matches the remaining
//! levels (including zero), and topics whose first level starts with `$`
//! are only matched by filters that spell that level out literally.

/// Returns true when `filter` matches `topic`.
#[must_use]
pub fn matches(topic: &str, filter: &str) -> bool {
    // Wildcards never match into a $-prefixed first level.
    if topic.starts_with('$') {
        let topic_first = topic.split('/').next().unwrap_or(topic);
        let filter_first = filter.split('/').next().unwrap_or(filter);
        if filter_first != topic_first {
            return false;
        }
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) => {
                if expected != actual {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("a/b", "+/+"));
        assert!(matches("a/b", "a/+"));
        assert!(matches("a/b", "+/b"));
        assert!(!matches("a/b/c", "+/+"));
        assert!(!matches("a", "+/+"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("a", "#"));
        assert!(matches("a/b/c", "#"));
        assert!(matches("a/b/c", "a/#"));
        // The parent level itself is matched.
        assert!(matches("a", "a/#"));
        assert!(!matches("b/x", "a/#"));
    }

    #[test]
    fn test_mixed_wildcards() {
        assert!(matches("a/b/c/d", "a/+/#"));
        assert!(matches("sport/tennis/player1/ranking", "sport/tennis/+/#"));
        assert!(!matches("sport/golf", "sport/tennis/#"));
    }

    #[test]
    fn test_dollar_topics_suppressed_from_wildcards() {
        assert!(!matches("$SYS/broker/load", "#"));
        assert!(!matches("$SYS/broker/load", "+/broker/load"));
        assert!(matches("$SYS/broker/load", "$SYS/#"));
        assert!(matches("$SYS/broker/load", "$SYS/broker/+"));
        // An inner $ is not special.
        assert!(matches("a/$weird", "a/+"));
    }

    #[test]
    fn test_empty_levels_are_significant() {
        assert!(matches("a//b", "a/+/b"));
        assert!(matches("/a", "+/a"));
        assert!(!matches("a", "/a"));
    }

    #[test]
    fn test_plus_does_not_match_partial_level() {
        assert!(!matches("ab", "a+"));
        assert!(!matches("a/bc", "a/b+"));
    }
}
