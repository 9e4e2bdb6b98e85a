//! Sanitization of [`Tag`] values into vector-table names.
//!
//! Each component is percent-style escaped so that the mapping is
//! injective: bytes outside `[A-Za-z0-9_]` become `.` followed by two
//! lowercase hex digits. Because a raw `-` never survives escaping, the
//! components can be joined with the literal separator `--` without any
//! risk of an escaped component manufacturing that separator itself.

use crate::types::Tag;

const SEPARATOR: &str = "--";

fn escape_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!(".{byte:02x}"));
        }
    }
    out
}

/// Render a [`Tag`] as the name of its vector table.
pub fn sanitize(tag: &Tag) -> String {
    format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}",
        escape_component(&tag.branch),
        escape_component(&tag.directory),
        escape_component(&tag.artifact_id),
    )
}
