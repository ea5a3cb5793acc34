//! Coarse category derivation from a free-text source group.
//!
//! The category is computed once at ingest and stored on the record; queries
//! filter on the stored key. `fuzzy_group_match` keeps the older substring
//! behaviour available for callers that still filter by raw search text.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    StartsWith,
    Regex,
}

/// One pattern-to-category rule, compiled once when built or deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleDef", into = "RuleDef")]
pub struct CategoryRule {
    pattern: String,
    category: String,
    match_type: MatchType,
    /// Lowercased pattern for `contains`/`starts_with`.
    needle: String,
    regex: Option<Regex>,
}

/// Serialized shape of a `CategoryRule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub pattern: String,
    pub category: String,
    #[serde(default)]
    pub match_type: MatchType,
}

impl CategoryRule {
    /// Build a rule, compiling regex patterns up front.
    pub fn new(
        pattern: impl Into<String>,
        category: impl Into<String>,
        match_type: MatchType,
    ) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = match match_type {
            MatchType::Regex => Some(Regex::new(&pattern)?),
            MatchType::Contains | MatchType::StartsWith => None,
        };
        Ok(Self {
            needle: pattern.to_lowercase(),
            pattern,
            category: category.into(),
            match_type,
            regex,
        })
    }

    /// Case-insensitive substring rule; cannot fail.
    pub fn contains(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self {
            needle: pattern.to_lowercase(),
            pattern,
            category: category.into(),
            match_type: MatchType::Contains,
            regex: None,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Case-insensitive for `contains`/`starts_with`; regex patterns are used
    /// as written.
    pub fn matches(&self, text: &str) -> bool {
        match self.match_type {
            MatchType::Contains => text.to_lowercase().contains(&self.needle),
            MatchType::StartsWith => text.to_lowercase().starts_with(&self.needle),
            MatchType::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(text)),
        }
    }
}

impl TryFrom<RuleDef> for CategoryRule {
    type Error = regex::Error;

    fn try_from(def: RuleDef) -> Result<Self, Self::Error> {
        CategoryRule::new(def.pattern, def.category, def.match_type)
    }
}

impl From<CategoryRule> for RuleDef {
    fn from(rule: CategoryRule) -> Self {
        RuleDef {
            pattern: rule.pattern,
            category: rule.category,
            match_type: rule.match_type,
        }
    }
}

/// First matching rule wins; `fallback` when nothing matches.
pub fn derive_category(source_group: &str, rules: &[CategoryRule], fallback: &str) -> String {
    rules
        .iter()
        .find(|rule| rule.matches(source_group))
        .map(|rule| rule.category.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Legacy group filter: `source_group LIKE '%needle%'` (ASCII case-insensitive,
/// same as SQLite's default LIKE). An empty needle matches everything.
pub fn fuzzy_group_match(source_group: &str, needle: &str) -> bool {
    source_group
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// How the review queue restricts records to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GroupFilter {
    /// Exact match on the canonical category stored at ingest.
    Category(String),
    /// Substring match against the raw source group text.
    Fuzzy(String),
}

impl GroupFilter {
    pub fn matches(&self, category: &str, source_group: &str) -> bool {
        match self {
            GroupFilter::Category(key) => category == key,
            GroupFilter::Fuzzy(needle) => fuzzy_group_match(source_group, needle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryConfig;

    fn defaults() -> CategoryConfig {
        CategoryConfig::default()
    }

    #[test]
    fn test_derive_category_from_search_phrase() {
        let c = defaults();
        assert_eq!(
            derive_category("Japanese sushi ramen dishes", &c.rules, &c.fallback),
            "Japan"
        );
        assert_eq!(
            derive_category("British fish chips traditional food", &c.rules, &c.fallback),
            "UK"
        );
    }

    #[test]
    fn test_derive_category_drifted_text_falls_back() {
        let c = defaults();
        // Phrase no longer contains the table key, so it lands in the fallback
        assert_eq!(
            derive_category("Brazil street food", &c.rules, &c.fallback),
            "Others"
        );
        assert_eq!(derive_category("", &c.rules, &c.fallback), "Others");
    }

    #[test]
    fn test_first_rule_wins() {
        let rules = vec![
            CategoryRule::contains("food", "Generic"),
            CategoryRule::contains("Thai food", "Thailand"),
        ];
        assert_eq!(derive_category("Thai food dishes", &rules, "Others"), "Generic");
    }

    #[test]
    fn test_match_types() {
        let starts = CategoryRule::new("greek", "Greece", MatchType::StartsWith).unwrap();
        assert!(starts.matches("Greek traditional food dishes"));
        assert!(!starts.matches("traditional Greek food"));

        let re = CategoryRule::new(r"^(Korean|Korea)\b", "Korea", MatchType::Regex).unwrap();
        assert!(re.matches("Korean kimchi bibimbap dishes"));
        assert!(!re.matches("North Korean"));
    }

    #[test]
    fn test_invalid_regex_rejected_when_built() {
        assert!(CategoryRule::new("([", "X", MatchType::Regex).is_err());
        // Not a regex rule, so the brackets are plain text
        let literal = CategoryRule::new("([", "X", MatchType::Contains).unwrap();
        assert!(literal.matches("odd ([ text"));
    }

    #[test]
    fn test_rules_compile_on_deserialize() {
        let yaml = "- pattern: '^Viet'\n  category: Vietnam\n  match_type: regex\n- pattern: pho\n  category: Vietnam\n";
        let rules: Vec<CategoryRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0].match_type(), MatchType::Regex);
        assert_eq!(rules[1].match_type(), MatchType::Contains);
        assert!(rules[0].matches("Vietnamese street food"));
        assert_eq!(derive_category("Bowl of PHO", &rules, "Others"), "Vietnam");

        let broken = "- pattern: '(['\n  category: X\n  match_type: regex\n";
        assert!(serde_yaml::from_str::<Vec<CategoryRule>>(broken).is_err());
    }

    #[test]
    fn test_fuzzy_group_match_is_substring() {
        assert!(fuzzy_group_match("Brazilian feijoada traditional food", "Brazil"));
        assert!(fuzzy_group_match("Brazilian feijoada traditional food", "brazil"));
        assert!(fuzzy_group_match("anything", ""));
        assert!(!fuzzy_group_match("Brazilian feijoada", "Brasil"));
        // The fuzzy matcher cannot tell overlapping groups apart
        assert!(fuzzy_group_match("Indian curry traditional dishes", "India"));
        assert!(fuzzy_group_match("American Indian fry bread", "India"));
    }

    #[test]
    fn test_group_filter_category_is_exact() {
        let filter = GroupFilter::Category("India".into());
        assert!(filter.matches("India", "Indian curry traditional dishes"));
        assert!(!filter.matches("USA", "American Indian fry bread"));

        let fuzzy = GroupFilter::Fuzzy("India".into());
        assert!(fuzzy.matches("USA", "American Indian fry bread"));
    }
}
