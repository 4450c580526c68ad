const CDATA_START: &str = "<![CDATA[";
const CDATA_END: &str = "]]>";
const XML_DECLARATION: &str = "<?xml version=\"1.0\"?>\n";

/// XML parsers normalise carriage returns inside CDATA to line feeds. They are
/// carried through parsing as this private-use code point and restored by
/// [`restore_carriage_returns`].
pub const CARRIAGE_RETURN_PLACEHOLDER: char = '\u{E00D}';

/// Makes runner XML output acceptable to a strict parser.
///
/// Older runners write raw control characters from checked values into CDATA
/// sections and pad files with NUL characters; none of them write an XML
/// declaration.
pub fn repair(content: &str) -> String {
    let content = escape_cdata_control_chars(content);
    let content = content.replace('\0', "");
    add_xml_declaration(content)
}

pub fn restore_carriage_returns(text: &str) -> String {
    text.replace(CARRIAGE_RETURN_PLACEHOLDER, "\r")
}

fn escape_cdata_control_chars(content: &str) -> String {
    let mut repaired = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(CDATA_START) {
        let (before, section) = rest.split_at(start + CDATA_START.len());
        repaired.push_str(before);

        let end = section.find(CDATA_END).unwrap_or(section.len());
        for c in section[..end].chars() {
            match c {
                '\n' => repaired.push(c),
                '\r' => repaired.push(CARRIAGE_RETURN_PLACEHOLDER),
                c if (c as u32) < 32 => repaired.push_str(&format!("0x{:02X}", c as u32)),
                c => repaired.push(c),
            }
        }

        rest = &section[end..];
    }

    repaired.push_str(rest);
    repaired
}

fn add_xml_declaration(content: String) -> String {
    if content.starts_with("<?xml") {
        content
    } else {
        format!("{}{}", XML_DECLARATION, content)
    }
}
