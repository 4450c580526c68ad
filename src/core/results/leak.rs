use crate::core::domain::{LogEntry, LogEntryKind, SourceFileInfo};

const LEAK_MARKER: &str = "Detected memory leaks!";
const DATA_PREFIX: &str = "Data:";
const SIZE_SUFFIX: &str = "bytes long.";

/// Extracts the blocks of a CRT debug heap leak dump such as
///
/// ```text
/// Detected memory leaks!
/// Dumping objects ->
/// c:\src\test.cpp(20) : {869} normal block at 0x00A88A58, 4 bytes long.
///  Data: <    > CD CD CD CD
/// Object dump complete.
/// ```
///
/// Returns no entries when the text has no leak dump.
pub fn parse_memory_leaks(text: &str) -> Vec<LogEntry> {
    let Some(start) = text.find(LEAK_MARKER) else {
        return Vec::new();
    };

    let mut leaks: Vec<LogEntry> = Vec::new();
    for line in text[start + LEAK_MARKER.len()..].lines() {
        if let Some(leak) = parse_block_line(line) {
            leaks.push(leak);
        } else if let Some(data) = line.trim_start().strip_prefix(DATA_PREFIX) {
            if let Some(LogEntry {
                kind: LogEntryKind::MemoryLeak { leaked_data, .. },
                ..
            }) = leaks.last_mut()
            {
                *leaked_data = data.trim().to_string();
            }
        }
    }
    leaks
}

fn parse_block_line(line: &str) -> Option<LogEntry> {
    let open = line.find('{')?;
    let close = open + line[open..].find('}')?;
    let allocation_number = line[open + 1..close].parse().ok()?;

    let size_bytes = line[close..]
        .rsplit(',')
        .next()?
        .trim()
        .strip_suffix(SIZE_SUFFIX)?
        .trim()
        .parse()
        .ok()?;

    let source = line[..open]
        .trim_end()
        .strip_suffix(':')
        .and_then(|location| parse_location(location.trim_end()));

    let entry = LogEntry::new(
        LogEntryKind::MemoryLeak {
            allocation_number,
            size_bytes,
            leaked_data: String::new(),
        },
        line.trim(),
    );
    Some(entry.with_source(source))
}

/// Parses `file(line)`.
fn parse_location(location: &str) -> Option<SourceFileInfo> {
    let (file, line) = location.strip_suffix(')')?.rsplit_once('(')?;
    Some(SourceFileInfo::new(file, Some(line.parse().ok()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "Running 1 test case...\r\n\
Detected memory leaks!\r\n\
Dumping objects ->\r\n\
c:\\src\\test.cpp(20) : {869} normal block at 0x00A88A58, 4 bytes long.\r\n \
Data: <    > CD CD CD CD \r\n\
{868} normal block at 0x00A88A18, 16 bytes long.\r\n \
Data: <                > CD CD CD CD CD CD CD CD CD CD CD CD CD CD CD CD \r\n\
Object dump complete.\r\n";

    #[test]
    fn test_blocks_are_extracted() {
        let leaks = parse_memory_leaks(DUMP);
        assert_eq!(leaks.len(), 2);

        assert_eq!(
            leaks[0].kind,
            LogEntryKind::MemoryLeak {
                allocation_number: 869,
                size_bytes: 4,
                leaked_data: "<    > CD CD CD CD".to_string(),
            }
        );
        assert_eq!(
            leaks[0].source,
            Some(SourceFileInfo::new("c:\\src\\test.cpp", Some(20)))
        );

        assert!(matches!(
            leaks[1].kind,
            LogEntryKind::MemoryLeak { allocation_number: 868, size_bytes: 16, .. }
        ));
        assert_eq!(leaks[1].source, None);
    }

    #[test]
    fn test_no_marker_means_no_leaks() {
        assert!(parse_memory_leaks("{1} normal block at 0x0, 4 bytes long.").is_empty());
        assert!(parse_memory_leaks("all good").is_empty());
    }
}
