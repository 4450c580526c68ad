use std::{io, path::Path};

use encoding_rs::Encoding;

const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Resolves an encoding label, defaulting to Windows-1252 for unknown labels.
pub fn legacy_encoding(label: &str) -> &'static Encoding {
    Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
        tracing::warn!(label, "Unknown legacy encoding, using windows-1252");
        encoding_rs::WINDOWS_1252
    })
}

/// Decodes runner output of unknown provenance.
///
/// The runner writes ASCII markup but embeds application strings (exception
/// messages, checked values) in whatever encoding the test was built with.
/// UTF-8 is tried first; anything else goes through the legacy code page with
/// undecodable sequences dropped.
pub fn decode(bytes: &[u8], legacy: &'static Encoding) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = legacy.decode_without_bom_handling(bytes);
            text.chars()
                .filter(|c| *c != char::REPLACEMENT_CHARACTER)
                .collect()
        }
    };

    match text.strip_prefix(BYTE_ORDER_MARK) {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

pub async fn read_text(path: &Path, legacy: &'static Encoding) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(decode(&bytes, legacy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_is_preferred() {
        let text = decode("Überprüfung".as_bytes(), encoding_rs::WINDOWS_1252);
        assert_eq!(text, "Überprüfung");
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_legacy_encoding() {
        // "caf\xe9" is not valid UTF-8 but is "café" in Windows-1252
        let text = decode(b"<x>caf\xe9</x>", encoding_rs::WINDOWS_1252);
        assert_eq!(text, "<x>café</x>");
    }

    #[test]
    fn test_undecodable_sequences_are_dropped() {
        // 0x81 is unmapped in Shift_JIS when it's the last byte
        let text = decode(b"abc\xff\x81", legacy_encoding("shift_jis"));
        assert!(!text.contains(char::REPLACEMENT_CHARACTER));
        assert!(text.starts_with("abc"));
    }

    #[test]
    fn test_byte_order_mark_is_stripped() {
        let text = decode(b"\xef\xbb\xbf<TestLog/>", encoding_rs::WINDOWS_1252);
        assert_eq!(text, "<TestLog/>");
    }

    #[test]
    fn test_unknown_label_defaults_to_windows_1252() {
        assert_eq!(legacy_encoding("klingon"), encoding_rs::WINDOWS_1252);
        assert_eq!(legacy_encoding("latin1"), encoding_rs::WINDOWS_1252);
        assert_eq!(legacy_encoding("gbk"), encoding_rs::GBK);
    }

    #[tokio::test]
    async fn test_read_text_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_text(&dir.path().join("absent.xml"), encoding_rs::WINDOWS_1252).await;
        assert!(result.is_err());
    }
}
