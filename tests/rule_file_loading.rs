//! Integration tests for rule file loading
//!
//! Verifies the JSON rule format, its defaults, validation errors and the
//! bundled sample file.

use metric_attributor::classifier::classify;
use metric_attributor::error::{AppError, RuleError};
use metric_attributor::rules::{Matcher, RuleSet};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use tempfile::TempDir;

fn write_rules(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("rules.json");
    fs::write(&path, content).expect("Failed to write rule file");
    path
}

#[test]
fn test_bundled_rules_load() {
    let rules = RuleSet::from_file("configs/rules.json").expect("bundled rules should load");
    assert_eq!(rules.len(), 6);

    let names: Vec<&str> = rules.iter().map(|rule| rule.name()).collect();
    assert_eq!(
        names,
        vec![
            "tagged",
            "aggreg",
            "anotheraggr",
            "legacy-bar",
            "start-by-foo",
            "start-by-app"
        ]
    );
    assert!(matches!(
        rules.iter().next().map(|rule| rule.matcher()),
        Some(Matcher::Tags(_))
    ));
}

#[test]
fn test_rules_file_defaults_and_unknown_fields() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(
        &dir,
        r#"{"rules": [{"name": "everything", "owner": "team-metrics"}], "version": 2}"#,
    );

    let rules = RuleSet::from_file(&path).expect("unknown fields are ignored");
    let rule = rules.iter().next().expect("one rule");
    assert_eq!(rule.matcher(), &Matcher::CatchAll);
    assert_eq!(rule.application_name_position(), 0);
}

#[test]
fn test_rule_order_is_preserved_for_classification() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(
        &dir,
        r#"{"rules": [
            {"name": "broad", "pattern": ["foo"], "applicationNamePosition": 1},
            {"name": "narrow", "pattern": ["foo", "aggreg"], "applicationNamePosition": 2}
        ]}"#,
    );

    let rules = RuleSet::from_file(&path).expect("rules should load");
    let result = classify("foo.aggreg.cas", &HashMap::new(), 3, &rules).into_result();
    assert_eq!(result.application_type, "broad");
    assert_eq!(result.application_name, "aggreg");
}

#[test]
fn test_empty_rule_list_is_accepted() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(&dir, r#"{"rules": []}"#);

    let rules = RuleSet::from_file(&path).expect("empty rule list is allowed");
    assert!(rules.is_empty());
    assert!(
        classify("a.b.c", &HashMap::new(), 3, &rules)
            .into_result()
            .is_none()
    );
}

#[test]
fn test_rule_without_name_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(
        &dir,
        r#"{"rules": [{"name": "ok"}, {"pattern": ["foo"]}]}"#,
    );

    let err = RuleSet::from_file(&path).expect_err("unnamed rule must fail");
    assert!(matches!(
        err,
        AppError::Rule(RuleError::EmptyName { index: 1 })
    ));
}

#[test]
fn test_rule_with_tags_and_pattern_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(
        &dir,
        r#"{"rules": [{"name": "both", "use_tags": ["appname"], "pattern": ["foo"]}]}"#,
    );

    let err = RuleSet::from_file(&path).expect_err("both criteria must fail");
    assert!(err.to_string().contains("'both'"));
}

#[test]
fn test_missing_rule_file_preserves_io_error() {
    let err = RuleSet::from_file("/nonexistent/rules.json").expect_err("missing file must fail");
    assert!(err.to_string().contains("/nonexistent/rules.json"));

    let source = err.source().expect("Should have source error");
    assert!(source.is::<std::io::Error>());
}

#[test]
fn test_malformed_rule_file_preserves_json_error() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_rules(&dir, r#"{"rules": [ {"name": "#);

    let err = RuleSet::from_file(&path).expect_err("malformed JSON must fail");
    assert!(matches!(err, AppError::RuleFileParse { .. }));
    let source = err.source().expect("Should have source error");
    assert!(source.is::<serde_json::Error>());
}
