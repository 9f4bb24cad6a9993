//! Substitution patterns of the form `s/<regex>/<template>/<options>`.
//!
//! The regex must match the whole subject. Numbered and named capture groups
//! are available in the template as `${1}` or `${name}`. With the `m` option
//! every metadata index field is also available as `${if.<field>}`.

use crate::error::{DispatchError, Result};
use crate::metadata::Metadata;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Grammar of a full substitution pattern.
pub const RAW_PATTERN: &str = r"^s/(.+)/(.+)/(m?)$";
/// Option enabling metadata index fields in the template.
pub const OPTION_METADATA: &str = "m";
/// Key prefix of metadata index fields in the substitution table.
pub const METADATA_KEY_PREFIX: &str = "if.";

static PATTERN_GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(RAW_PATTERN).expect("pattern grammar is a valid regex"));

/// A parsed and compiled substitution pattern.
#[derive(Debug, Clone)]
pub struct SubstitutionPattern {
    regex: Regex,
    template: String,
    use_metadata: bool,
}

impl SubstitutionPattern {
    /// Parse `s/<regex>/<template>/<options>`.
    pub fn parse(full_pattern: &str) -> Result<Self> {
        let caps = PATTERN_GRAMMAR.captures(full_pattern).ok_or_else(|| {
            DispatchError::Pattern(format!(
                "Input pattern '{}' does not match pattern syntax '{}'",
                full_pattern, RAW_PATTERN
            ))
        })?;
        let regex = compile_full_match(&caps[1])?;
        Ok(Self {
            regex,
            template: caps[2].to_string(),
            use_metadata: &caps[3] == OPTION_METADATA,
        })
    }

    pub fn uses_metadata(&self) -> bool {
        self.use_metadata
    }

    /// Apply the pattern to a subject.
    pub fn apply(&self, subject: &str, metadata: Option<&Metadata>) -> Result<String> {
        let table = self.substitution_table(subject, metadata)?;
        expand_template(&self.template, &table)
    }

    fn substitution_table(
        &self,
        subject: &str,
        metadata: Option<&Metadata>,
    ) -> Result<BTreeMap<String, String>> {
        let caps = self.regex.captures(subject).ok_or_else(|| {
            DispatchError::Pattern(format!(
                "Input '{}' does not match supplied pattern '{}'",
                subject,
                self.regex.as_str()
            ))
        })?;

        let mut table = BTreeMap::new();
        // group 0 is the anchoring wrapper's whole match
        for (idx, name) in self.regex.capture_names().enumerate().skip(1) {
            let value = caps.get(idx).map(|m| m.as_str()).unwrap_or_default();
            table.insert(idx.to_string(), value.to_string());
            if let Some(name) = name {
                table.insert(name.to_string(), value.to_string());
            }
        }

        if self.use_metadata {
            let metadata = metadata.ok_or_else(|| {
                DispatchError::Pattern("Metadata is required by pattern option but missing".to_string())
            })?;
            for (key, value) in metadata.index_fields() {
                table.insert(format!("{}{}", METADATA_KEY_PREFIX, key), value.clone());
            }
        }
        Ok(table)
    }
}

/// Apply an optional substitution pattern. A blank pattern returns the
/// subject unchanged.
pub fn apply_pattern(
    full_pattern: Option<&str>,
    subject: &str,
    metadata: Option<&Metadata>,
) -> Result<String> {
    match full_pattern {
        Some(p) if !p.trim().is_empty() => SubstitutionPattern::parse(p)?.apply(subject, metadata),
        _ => Ok(subject.to_string()),
    }
}

/// Compile a regex that only matches the entire input.
pub fn compile_full_match(regex: &str) -> Result<Regex> {
    // non-capturing wrapper keeps user group numbering intact
    Regex::new(&format!("^(?:{})$", regex))
        .map_err(|e| DispatchError::Pattern(format!("Invalid regex '{}': {}", regex, e)))
}

/// Replace every `${key}` in the template with its table value.
fn expand_template(template: &str, table: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let key = &rest[start + 2..start + 2 + len];
        let value = table.get(key).ok_or_else(|| {
            DispatchError::Pattern(format!("Unresolved substitution key '{}' in '{}'", key, template))
        })?;
        out.push_str(&rest[..start]);
        out.push_str(value);
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FILENAME: &str = "Test123-COO123.123.123-ExampleTest.pdf";

    fn user_metadata() -> Metadata {
        Metadata::parse(
            br#"{"Document":{"IndexFields":[{"Name":"PPK_Username","Value":"metadata.user"}]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_blank_pattern_is_noop() {
        assert_eq!(apply_pattern(None, "input", None).unwrap(), "input");
        assert_eq!(apply_pattern(Some("  "), "input", None).unwrap(), "input");
    }

    #[test]
    fn test_numbered_groups() {
        let result =
            apply_pattern(Some(r"s/(.+)-COO[\d.]+-(.*)/${1}-${2}/"), "test-COO1.2.3-asd", None)
                .unwrap();
        assert_eq!(result, "test-asd");

        let result =
            apply_pattern(Some(r"s/(.+)-COO[\d\.]+-(.*)/${1}-${2}/"), TEST_FILENAME, None).unwrap();
        assert_eq!(result, "Test123-ExampleTest.pdf");
    }

    #[test]
    fn test_named_groups_and_metadata() {
        let metadata = user_metadata();
        let result = apply_pattern(
            Some(r"s/(?<p1>.+)-COO[\d\.]+-(?<p2>.*)/${p1}_${if.PPK_Username}_${p2}/m"),
            TEST_FILENAME,
            Some(&metadata),
        )
        .unwrap();
        assert_eq!(result, "Test123_metadata.user_ExampleTest.pdf");
    }

    #[test]
    fn test_metadata_option_without_metadata_fails() {
        let err = apply_pattern(Some(r"s/(.+)-COO[\d\.]+-(.*)/${1}-${2}/m"), TEST_FILENAME, None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Pattern(_)));
    }

    #[test]
    fn test_partial_match_fails() {
        let err = apply_pattern(Some(r"s/COO(\d+)/${1}/"), "prefix-COO123", None).unwrap_err();
        assert!(err.to_string().contains("does not match supplied pattern"));
    }

    #[test]
    fn test_invalid_grammar_fails() {
        assert!(SubstitutionPattern::parse("(.+)/x").is_err());
        assert!(SubstitutionPattern::parse("s/(.+)/x/q").is_err());
    }

    #[test]
    fn test_unresolved_key_fails() {
        let err = apply_pattern(Some(r"s/(.+)/${missing}/"), "abc", None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_optional_group_without_match_is_empty() {
        let result = apply_pattern(Some(r"s/(a)(b)?/${1}[${2}]/"), "a", None).unwrap();
        assert_eq!(result, "a[]");
    }

    #[test]
    fn test_full_match_regex_is_anchored() {
        let re = compile_full_match(r".*_generated").unwrap();
        assert!(re.is_match("doc_generated"));
        assert!(!re.is_match("doc_generated_v2"));
        let alternation = compile_full_match("a|b").unwrap();
        assert!(!alternation.is_match("ab"));
    }
}
