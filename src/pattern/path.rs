//! Composite column keys: `field|occurrence|subfield...`.
//!
//! A header is split on [`COLUMN_SEPARATOR`]. An all-digit part right after a field
//! is that field's 1-based occurrence; a part ending in [`KEY_SUFFIX`] marks the field
//! as resolved by alternate-key lookup on import. Anything else is a literal field
//! name, so parsing never fails.

/// Separator between the parts of a flat header.
pub const COLUMN_SEPARATOR: char = '|';

/// Separator between the segments of an export line name (`child_ids/name`).
pub const LINE_PATH_SEPARATOR: char = '/';

/// Suffix marking a field as a lookup key (`ref#key`).
pub const KEY_SUFFIX: &str = "#key";

/// Sub-field carrying an external identifier.
pub const EXTERNAL_ID: &str = "id";

/// Sub-field carrying a raw internal identifier.
pub const DATABASE_ID: &str = ".id";

/// One field step of a parsed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    /// 1-based position inside a list-valued relation.
    pub occurrence: Option<usize>,
    pub key_lookup: bool,
}

impl Segment {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            occurrence: None,
            key_lookup: false,
        }
    }

    pub fn at(mut self, occurrence: usize) -> Self {
        self.occurrence = Some(occurrence);
        self
    }

    pub fn key(mut self) -> Self {
        self.key_lookup = true;
        self
    }

    /// 0-based array index for the occurrence; `None` for occurrence `0`.
    pub fn index(&self) -> Option<usize> {
        self.occurrence.and_then(|o| o.checked_sub(1))
    }
}

/// Parse a flat header into segments.
pub fn parse(header: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for part in header.split(COLUMN_SEPARATOR) {
        if is_occurrence(part) {
            if let Some(prev) = segments.last_mut().filter(|s| s.occurrence.is_none()) {
                if let Ok(occurrence) = part.parse() {
                    prev.occurrence = Some(occurrence);
                    continue;
                }
            }
        }
        match part.strip_suffix(KEY_SUFFIX) {
            Some(name) if !name.is_empty() => segments.push(Segment::field(name).key()),
            _ => segments.push(Segment::field(part)),
        }
    }
    segments
}

/// Build a flat header from segments. Inverse of [`parse`].
pub fn build(segments: &[Segment]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(segments.len() * 2);
    for segment in segments {
        if segment.key_lookup {
            parts.push(format!("{}{KEY_SUFFIX}", segment.name));
        } else {
            parts.push(segment.name.clone());
        }
        if let Some(occurrence) = segment.occurrence {
            parts.push(occurrence.to_string());
        }
    }
    parts.join(&COLUMN_SEPARATOR.to_string())
}

fn is_occurrence(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}
