//! Parsers for the artifacts a runner leaves behind: the XML report, the XML
//! log and the captured standard output and error streams.
//!
//! Every parser contributes to a shared map of results keyed by test path.

pub mod decode;
pub mod leak;
pub mod log;
pub mod repair;
pub mod report;
pub mod stdio;

use roxmltree::Node;

use crate::core::domain::SourceFileInfo;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("Unexpected root element <{found}>, expected <{expected}>")]
    UnexpectedRoot {
        expected: &'static str,
        found: String,
    },
}

const TEST_SUITE: &str = "TestSuite";
const TEST_CASE: &str = "TestCase";

/// A test case element together with its fully qualified path.
struct TestCaseNode<'a, 'input> {
    path: String,
    node: Node<'a, 'input>,
}

/// Collects every test case under `root`, whose first `TestSuite` child is the
/// master suite and does not take part in test paths.
fn test_cases<'a, 'input>(root: Node<'a, 'input>) -> Vec<TestCaseNode<'a, 'input>> {
    let mut cases = Vec::new();
    for master in root.children().filter(|n| n.has_tag_name(TEST_SUITE)) {
        collect_test_cases(master, None, &mut cases);
    }
    cases
}

fn collect_test_cases<'a, 'input>(
    suite: Node<'a, 'input>,
    prefix: Option<&str>,
    cases: &mut Vec<TestCaseNode<'a, 'input>>,
) {
    for child in suite.children().filter(|n| n.is_element()) {
        let Some(name) = child.attribute("name") else {
            continue;
        };
        let path = match prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.to_string(),
        };

        if child.has_tag_name(TEST_SUITE) {
            collect_test_cases(child, Some(&path), cases);
        } else if child.has_tag_name(TEST_CASE) {
            cases.push(TestCaseNode { path, node: child });
        }
    }
}

/// Concatenated text and CDATA content directly below `node`.
fn element_text(node: Node) -> String {
    let text: String = node
        .children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    repair::restore_carriage_returns(&text)
}

fn source_info(node: Node) -> Option<SourceFileInfo> {
    let file = node.attribute("file")?;
    let line = node.attribute("line").and_then(|line| line.parse().ok());
    Some(SourceFileInfo::new(file, line))
}
