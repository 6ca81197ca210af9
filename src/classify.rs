//! Line classification for the dump stream.
//!
//! The logger prints some banner/debug text, then one schema line naming the
//! fields (`timestamp_ms,...`), then comma-separated records with `#` annotations
//! mixed in, and finally a fixed end-of-dump line.

pub const TERMINATOR_MARKER: &str = "End of binary file dump.";
pub const HEADER_MARKER: &str = "timestamp_ms";
pub const COMMENT_PREFIX: char = '#';
pub const FIELD_SEPARATOR: char = ',';
/// Fewest fields the firmware ever emits in a data record.
pub const MIN_DATA_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Blank,
    Terminator,
    Header,
    Comment,
    Data,
    Unrecognized,
}

/// Classify one decoded line. Only the first header line defines the schema,
/// so `header_captured` gates both header detection and data acceptance.
pub fn classify(line: &str, header_captured: bool) -> LineTag {
    let line = line.trim();
    if line.is_empty() {
        return LineTag::Blank;
    }
    if line.contains(TERMINATOR_MARKER) {
        return LineTag::Terminator;
    }
    if !header_captured {
        return if line.contains(HEADER_MARKER) {
            LineTag::Header
        } else {
            LineTag::Unrecognized
        };
    }
    if line.starts_with(COMMENT_PREFIX) {
        return LineTag::Comment;
    }
    if line.split(FIELD_SEPARATOR).count() >= MIN_DATA_FIELDS {
        LineTag::Data
    } else {
        LineTag::Unrecognized
    }
}

pub fn split_fields(line: &str) -> Vec<String> {
    line.trim()
        .split(FIELD_SEPARATOR)
        .map(str::to_string)
        .collect()
}
