use std::collections::BTreeMap;

use crate::core::{
    domain::{TestOutcome, TestResult},
    results::{ParseError, test_cases},
};

const ROOT: &str = "TestResult";

/// Parses a repaired XML report and records the outcome of every test case.
///
/// A report outcome takes precedence over one derived from the log.
pub fn parse_report(
    xml: &str,
    results: &mut BTreeMap<String, TestResult>,
) -> Result<(), ParseError> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name(ROOT) {
        return Err(ParseError::UnexpectedRoot {
            expected: ROOT,
            found: root.tag_name().name().to_string(),
        });
    }

    for case in test_cases(root) {
        let outcome = parse_outcome(case.node.attribute("result"));
        results
            .entry(case.path.clone())
            .and_modify(|result| result.outcome = outcome)
            .or_insert_with(|| TestResult::new(&case.path, outcome));
    }

    Ok(())
}

fn parse_outcome(value: Option<&str>) -> TestOutcome {
    match value {
        Some("passed") => TestOutcome::Passed,
        Some("skipped") => TestOutcome::Skipped,
        Some("aborted") => TestOutcome::Aborted,
        _ => TestOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0"?>
<TestResult>
<TestSuite name="Master" result="failed" assertions_passed="3" assertions_failed="1">
<TestCase name="Passing" result="passed" assertions_passed="2" assertions_failed="0"/>
<TestSuite name="Suite" result="failed">
<TestCase name="Failing" result="failed" assertions_passed="1" assertions_failed="1"/>
<TestCase name="Skipped" result="skipped"/>
<TestCase name="Aborted" result="aborted"/>
</TestSuite>
</TestSuite>
</TestResult>"#;

    #[test]
    fn test_outcomes_per_path() {
        let mut results = BTreeMap::new();
        parse_report(REPORT, &mut results).unwrap();

        let outcomes: Vec<(&str, TestOutcome)> = results
            .values()
            .map(|r| (r.path.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("Passing", TestOutcome::Passed),
                ("Suite/Aborted", TestOutcome::Aborted),
                ("Suite/Failing", TestOutcome::Failed),
                ("Suite/Skipped", TestOutcome::Skipped),
            ]
        );
    }

    #[test]
    fn test_report_outcome_overrides_existing_result() {
        let mut results = BTreeMap::new();
        results.insert(
            "Passing".to_string(),
            TestResult::new("Passing", TestOutcome::Failed),
        );
        parse_report(REPORT, &mut results).unwrap();
        assert_eq!(results["Passing"].outcome, TestOutcome::Passed);
    }

    #[test]
    fn test_wrong_root_is_rejected() {
        let mut results = BTreeMap::new();
        let err = parse_report("<TestLog/>", &mut results).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedRoot { .. }));
    }

    #[test]
    fn test_malformed_report_is_rejected() {
        let mut results = BTreeMap::new();
        let err = parse_report("<TestResult><TestSuite>", &mut results).unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)));
    }
}
