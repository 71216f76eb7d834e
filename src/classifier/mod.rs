//! Metric path classification
//!
//! Maps a metric path and its tags to the application that produced it,
//! using an ordered `RuleSet`. Everything here is pure CPU work: no I/O and
//! no shared mutable state, so one classifier can serve any number of tasks.

pub mod components;
pub mod matching;

pub use components::split_components;
pub use matching::{matches, matching_tag, select_rule};

use crate::metrics::MetricsSink;
use crate::rules::{Matcher, Rule, RuleSet};
use serde::Serialize;
use std::collections::HashMap;

/// Value used for every field when a metric cannot be attributed
pub const NONE_LABEL: &str = "None";

/// Outcome of classifying one metric path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClassificationResult {
    /// The path truncated to the configured number of components
    pub extracted_metric: String,
    pub application_name: String,
    /// Name of the rule that matched
    pub application_type: String,
}

impl ClassificationResult {
    /// The all-`"None"` result reported for unattributed metrics
    pub fn none() -> Self {
        Self {
            extracted_metric: NONE_LABEL.to_string(),
            application_name: NONE_LABEL.to_string(),
            application_type: NONE_LABEL.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        self == &Self::none()
    }
}

/// Detailed classification outcome, before it is flattened into a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<'r> {
    Matched {
        rule: &'r Rule,
        result: ClassificationResult,
    },
    NoRuleMatched,
    /// The matched rule names a component the path does not have
    PositionOutOfRange { rule: &'r Rule, components: usize },
}

impl Classification<'_> {
    pub fn into_result(self) -> ClassificationResult {
        match self {
            Self::Matched { result, .. } => result,
            Self::NoRuleMatched | Self::PositionOutOfRange { .. } => ClassificationResult::none(),
        }
    }
}

/// Classify `path` against `rules`, looking at its first `components_nb` segments
pub fn classify<'r>(
    path: &str,
    tags: &HashMap<String, String>,
    components_nb: usize,
    rules: &'r RuleSet,
) -> Classification<'r> {
    let components = split_components(path, components_nb);

    let Some(rule) = select_rule(&components, tags, rules) else {
        return Classification::NoRuleMatched;
    };

    let position = rule.application_name_position();
    if position >= components.len() {
        return Classification::PositionOutOfRange {
            rule,
            components: components.len(),
        };
    }

    let application_name = match matching_tag(tags, rule) {
        Some(key) => tags[key].clone(),
        None => components[position].to_string(),
    };

    Classification::Matched {
        rule,
        result: ClassificationResult {
            extracted_metric: components.join("."),
            application_name,
            application_type: rule.name().to_string(),
        },
    }
}

/// Rule set plus extraction settings, reporting outcomes to a `MetricsSink`
#[derive(Debug, Clone)]
pub struct PathClassifier {
    rules: RuleSet,
    components_nb: usize,
    use_tags: bool,
}

impl PathClassifier {
    /// Create a classifier extracting `components_nb` path components
    ///
    /// Pattern rules whose application name position can never be reached
    /// with `components_nb` components are logged, since they will only ever
    /// produce bad-metric outcomes.
    pub fn new(rules: RuleSet, components_nb: usize) -> Self {
        for rule in &rules {
            if !matches!(rule.matcher(), Matcher::Tags(_))
                && rule.application_name_position() >= components_nb
            {
                tracing::warn!(
                    rule = %rule.name(),
                    application_name_position = rule.application_name_position(),
                    components_nb,
                    "Rule position is beyond the extracted components and can never resolve an application name"
                );
            }
        }

        Self {
            rules,
            components_nb,
            use_tags: true,
        }
    }

    /// Enable or disable tag-based rules
    ///
    /// With tags disabled, records are classified as if they carried no tags,
    /// so tag rules never match.
    pub fn with_tags(mut self, use_tags: bool) -> Self {
        self.use_tags = use_tags;
        self
    }

    /// Classify a metric and report unmatched and bad metrics to `sink`
    pub fn classify(
        &self,
        path: &str,
        tags: &HashMap<String, String>,
        sink: &dyn MetricsSink,
    ) -> ClassificationResult {
        let no_tags = HashMap::new();
        let tags = if self.use_tags { tags } else { &no_tags };

        let classification = classify(path, tags, self.components_nb, &self.rules);
        match &classification {
            Classification::Matched { .. } => {}
            Classification::NoRuleMatched => {
                sink.record_no_rule_matched();
                tracing::warn!(metric_path = %path, "Metric path did not match any rules");
            }
            Classification::PositionOutOfRange { rule, components } => {
                sink.record_bad_metric();
                tracing::error!(
                    metric_path = %path,
                    rule = %rule.name(),
                    components,
                    application_name_position = rule.application_name_position(),
                    "Bad metric: path is too short for the matched rule"
                );
            }
        }
        classification.into_result()
    }
}
