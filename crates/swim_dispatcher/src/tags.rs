//! Tag sets and tag filters.
//!
//! Tags on stored objects are the only persisted processing state. Writes
//! always merge into the existing set (see [`crate::storage::ObjectStore::tag`]).

use std::collections::BTreeMap;

/// Key/value annotations on a stored object.
pub type TagSet = BTreeMap<String, String>;

/// Maximum length of a tag value written from an error message.
pub const TAG_MAX_VALUE_LENGTH: usize = 256;

/// Required and excluded tag entries for a listing.
///
/// A file matches when it carries every required pair and, for every
/// excluded key, its value is none of the listed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub required: TagSet,
    pub exclude: BTreeMap<String, Vec<String>>,
}

impl TagFilter {
    pub fn new(required: TagSet, exclude: BTreeMap<String, Vec<String>>) -> Self {
        Self { required, exclude }
    }

    /// Filter that accepts every file.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        let has_required = self
            .required
            .iter()
            .all(|(key, value)| tags.get(key) == Some(value));
        if !has_required {
            return false;
        }
        !self.exclude.iter().any(|(key, values)| {
            tags.get(key)
                .map(|current| values.iter().any(|v| v == current))
                .unwrap_or(false)
        })
    }
}

/// Build a tag set from borrowed pairs.
pub fn tag_set<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> TagSet {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Make an arbitrary message safe for a tag value: characters other than
/// ASCII word characters, space, `.` and `-` become spaces, and the result is
/// capped at [`TAG_MAX_VALUE_LENGTH`] characters.
pub fn sanitize_tag_value(message: &str) -> String {
    message
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | ' ' | '.' | '-') {
                ch
            } else {
                ' '
            }
        })
        .take(TAG_MAX_VALUE_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclude(key: &str, values: &[&str]) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), values.iter().map(|v| v.to_string()).collect());
        map
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(TagFilter::any().matches(&TagSet::new()));
        assert!(TagFilter::any().matches(&tag_set([("a", "b")])));
    }

    #[test]
    fn test_required_tags_must_all_match() {
        let filter = TagFilter::new(tag_set([("kind", "invoice"), ("ready", "yes")]), BTreeMap::new());
        assert!(filter.matches(&tag_set([("kind", "invoice"), ("ready", "yes"), ("x", "y")])));
        assert!(!filter.matches(&tag_set([("kind", "invoice")])));
        assert!(!filter.matches(&tag_set([("kind", "letter"), ("ready", "yes")])));
    }

    #[test]
    fn test_exclude_values_are_or_within_key() {
        let filter = TagFilter::new(
            TagSet::new(),
            exclude("SWIM_State", &["dispatched", "finished", "error"]),
        );
        assert!(filter.matches(&TagSet::new()));
        assert!(filter.matches(&tag_set([("SWIM_State", "pending")])));
        assert!(!filter.matches(&tag_set([("SWIM_State", "dispatched")])));
        assert!(!filter.matches(&tag_set([("SWIM_State", "finished")])));
        assert!(!filter.matches(&tag_set([("SWIM_State", "error")])));
    }

    #[test]
    fn test_sanitize_replaces_illegal_characters() {
        assert_eq!(
            sanitize_tag_value("File a/b.pdf too large: 3 > 2"),
            "File a b.pdf too large  3   2"
        );
        assert_eq!(sanitize_tag_value("ümlaut_ok-1.0"), " mlaut_ok-1.0");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_tag_value(&long).len(), TAG_MAX_VALUE_LENGTH);
    }
}
