//! Classification rules
//!
//! Rules are read once at startup from a JSON document:
//!
//! ```json
//! { "rules": [ { "name": "aggreg", "pattern": ["foo", "aggreg"], "applicationNamePosition": 2 } ] }
//! ```
//!
//! Raw definitions are validated into a `RuleSet`, which is immutable afterwards
//! and can be shared freely between tasks.

use crate::error::{AppError, AppResult, RuleError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rule file document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// A rule exactly as written in the rule file, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub use_tags: Vec<String>,
    #[serde(default)]
    pub pattern: Vec<String>,
    #[serde(default, rename = "applicationNamePosition")]
    pub application_name_position: usize,
}

impl RuleDefinition {
    /// Pattern rule matching paths that start with `pattern`
    pub fn pattern(name: &str, pattern: &[&str], position: usize) -> Self {
        Self {
            name: name.to_string(),
            use_tags: Vec::new(),
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            application_name_position: position,
        }
    }

    /// Tag rule matching records carrying any of `tags`
    pub fn tags(name: &str, tags: &[&str], position: usize) -> Self {
        Self {
            name: name.to_string(),
            use_tags: tags.iter().map(|s| s.to_string()).collect(),
            pattern: Vec::new(),
            application_name_position: position,
        }
    }

    /// Rule matching every record
    pub fn catch_all(name: &str, position: usize) -> Self {
        Self::pattern(name, &[], position)
    }
}

/// How a rule decides whether it applies to a metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Matches when the record carries at least one of these tag keys.
    /// Declaration order decides which tag supplies the application name.
    Tags(Vec<String>),
    /// Matches when the leading path components equal these literals.
    Pattern(Vec<String>),
    /// Matches everything.
    CatchAll,
}

/// A validated classification rule
///
/// Fields are private: a `Rule` can only be obtained through `RuleSet`
/// validation, so a non-empty name and at most one of tags/pattern are
/// guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    name: String,
    matcher: Matcher,
    application_name_position: usize,
}

impl Rule {
    fn validate(index: usize, definition: RuleDefinition) -> Result<Self, RuleError> {
        if definition.name.is_empty() {
            return Err(RuleError::EmptyName { index });
        }

        let matcher = match (definition.use_tags.is_empty(), definition.pattern.is_empty()) {
            (false, false) => {
                return Err(RuleError::TagsAndPattern {
                    index,
                    name: definition.name,
                });
            }
            (false, true) => Matcher::Tags(definition.use_tags),
            (true, false) => Matcher::Pattern(definition.pattern),
            (true, true) => Matcher::CatchAll,
        };

        Ok(Self {
            name: definition.name,
            matcher,
            application_name_position: definition.application_name_position,
        })
    }

    /// Rule name, reported as the application type
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Index of the path component holding the application name
    pub fn application_name_position(&self) -> usize {
        self.application_name_position
    }
}

/// Ordered, validated list of rules (first match wins)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate raw definitions, preserving their order
    ///
    /// An empty list is accepted with a warning; such a set never matches.
    ///
    /// # Errors
    ///
    /// Returns the first `RuleError` found, in rule order.
    pub fn new(definitions: Vec<RuleDefinition>) -> Result<Self, RuleError> {
        if definitions.is_empty() {
            tracing::warn!("No rules defined, every metric will be reported as unmatched");
        }

        let rules = definitions
            .into_iter()
            .enumerate()
            .map(|(index, definition)| Rule::validate(index, definition))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Parse and validate a rule document
    ///
    /// # Errors
    ///
    /// Returns `AppError::RuleFileParse` for malformed JSON and
    /// `AppError::Rule` for invalid definitions.
    pub fn from_json(json: &[u8]) -> AppResult<Self> {
        let file: RuleFile =
            serde_json::from_slice(json).map_err(|source| AppError::RuleFileParse {
                path: "<inline>".to_string(),
                source,
            })?;
        Ok(Self::new(file.rules)?)
    }

    /// Load rules from a JSON file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or contains an
    /// invalid rule.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read(path.as_ref()).map_err(|source| AppError::RuleFileRead {
            path: path_display.clone(),
            source,
        })?;

        let file: RuleFile =
            serde_json::from_slice(&content).map_err(|source| AppError::RuleFileParse {
                path: path_display.clone(),
                source,
            })?;

        let rules = Self::new(file.rules)?;

        tracing::info!(
            path = %path_display,
            rule_count = rules.len(),
            "Loaded classification rules"
        );

        Ok(rules)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
