use std::{collections::BTreeMap, time::Duration};

use roxmltree::Node;

use crate::core::{
    domain::{LogEntry, LogEntryKind, TestOutcome, TestResult},
    results::{ParseError, element_text, source_info, test_cases},
};

const ROOT: &str = "TestLog";

/// Parses a repaired XML log, appending its entries and timings to `results`.
///
/// Tests not yet present get an outcome derived from their entries: skipped
/// when the runner says so, failed on any error, fatal error or exception,
/// passed otherwise.
pub fn parse_log(xml: &str, results: &mut BTreeMap<String, TestResult>) -> Result<(), ParseError> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name(ROOT) {
        return Err(ParseError::UnexpectedRoot {
            expected: ROOT,
            found: root.tag_name().name().to_string(),
        });
    }

    for case in test_cases(root) {
        let mut entries = Vec::new();
        let mut duration = None;

        for child in case.node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "TestingTime" => {
                    duration = element_text(child)
                        .trim()
                        .parse()
                        .ok()
                        .map(Duration::from_micros);
                }
                name => entries.extend(parse_entry(name, child)),
            }
        }

        let skipped = case.node.attribute("skipped") == Some("yes");
        if skipped {
            if let Some(reason) = case.node.attribute("reason") {
                entries.push(LogEntry::new(LogEntryKind::Message, reason));
            }
        }

        let outcome = if skipped {
            TestOutcome::Skipped
        } else if entries.iter().any(LogEntry::is_failure) {
            TestOutcome::Failed
        } else {
            TestOutcome::Passed
        };

        let result = results
            .entry(case.path.clone())
            .or_insert_with(|| TestResult::new(&case.path, outcome));
        result.log_entries.extend(entries);
        if let Some(duration) = duration {
            result.duration = duration;
        }
    }

    Ok(())
}

fn parse_entry(name: &str, node: Node) -> Option<LogEntry> {
    let kind = match name {
        "Info" => LogEntryKind::Info,
        "Message" => LogEntryKind::Message,
        "Warning" => LogEntryKind::Warning,
        "Error" => LogEntryKind::Error,
        "FatalError" => LogEntryKind::FatalError,
        "Exception" => {
            let checkpoint = node.children().find(|n| n.has_tag_name("LastCheckpoint"));
            LogEntryKind::Exception {
                last_checkpoint: checkpoint.and_then(source_info),
                checkpoint_detail: checkpoint.map(element_text).unwrap_or_default(),
            }
        }
        other => {
            tracing::debug!(element = other, "Ignoring unknown log element");
            return None;
        }
    };

    let context_frames = node
        .children()
        .filter(|n| n.has_tag_name("Context"))
        .flat_map(|context| context.children().filter(|n| n.has_tag_name("Frame")))
        .map(element_text)
        .collect();

    Some(LogEntry {
        kind,
        detail: element_text(node),
        source: source_info(node),
        context_frames,
    })
}
