//! Rule matching (first match wins)

use crate::rules::{Matcher, Rule, RuleSet};
use std::collections::HashMap;

/// First tag key of `rule` present in `tags`, in the rule's declaration order
pub fn matching_tag<'r>(tags: &HashMap<String, String>, rule: &'r Rule) -> Option<&'r str> {
    let Matcher::Tags(keys) = rule.matcher() else {
        return None;
    };
    if tags.is_empty() {
        return None;
    }
    keys.iter()
        .map(String::as_str)
        .find(|key| tags.contains_key(*key))
}

/// Whether `rule` applies to a metric with these components and tags
///
/// Tag rules look only at tags; pattern rules compare the leading components
/// element-wise; catch-all rules always match.
pub fn matches(components: &[&str], tags: &HashMap<String, String>, rule: &Rule) -> bool {
    match rule.matcher() {
        Matcher::Tags(_) => matching_tag(tags, rule).is_some(),
        Matcher::CatchAll => true,
        Matcher::Pattern(pattern) => {
            components.len() >= pattern.len()
                && pattern
                    .iter()
                    .zip(components)
                    .all(|(expected, component)| expected == component)
        }
    }
}

/// Earliest rule in `rules` that matches, if any
pub fn select_rule<'r>(
    components: &[&str],
    tags: &HashMap<String, String>,
    rules: &'r RuleSet,
) -> Option<&'r Rule> {
    rules.iter().find(|rule| matches(components, tags, rule))
}
