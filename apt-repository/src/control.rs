//! Debian control stanza parsing and generation.
//!
//! A [`ControlFile`] keeps its fields in the order they were parsed or
//! inserted. Two things depend on that: a stanza re-emitted from a parsed
//! one is byte-identical, and regenerating a `Packages` file for the same
//! index contents always yields the same bytes (and therefore the same
//! digests in the `Release` document).

use crate::digest::{DigestAlgorithm, DigestSet};
use crate::error::{AptRepositoryError, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// One control-metadata paragraph: ordered `(field, value)` pairs.
///
/// Multi-line values are stored with embedded newlines; continuation
/// markers are re-added on output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFile {
    fields: Vec<(String, String)>,
}

impl ControlFile {
    /// Create an empty control file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single stanza.
    ///
    /// Continuation lines (leading space or tab) extend the previous
    /// field. Blank lines are ignored, so the input may carry its stanza
    /// terminator.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let (_, value) = fields.last_mut().ok_or_else(|| {
                    AptRepositoryError::InvalidControlLine(line.to_string())
                })?;
                value.push('\n');
                value.push_str(line.trim_start());
            } else if let Some((field, value)) = line.split_once(':') {
                fields.push((field.trim().to_string(), value.trim().to_string()));
            } else {
                return Err(AptRepositoryError::InvalidControlLine(line.to_string()));
            }
        }

        if fields.is_empty() {
            return Err(AptRepositoryError::missing_field("Package"));
        }

        Ok(Self { fields })
    }

    /// Look up a field, case-insensitively.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.as_str())
    }

    /// Look up a field that must be present.
    pub fn require(&self, field: &str) -> Result<&str> {
        self.get(field)
            .ok_or_else(|| AptRepositoryError::missing_field(field))
    }

    /// Set a field, replacing an existing value in place or appending.
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
        {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    /// Iterate fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The `Package` field.
    pub fn package(&self) -> Option<&str> {
        self.get("Package")
    }

    /// The `Version` field.
    pub fn version(&self) -> Option<&str> {
        self.get("Version")
    }

    /// The `Architecture` field.
    pub fn architecture(&self) -> Option<&str> {
        self.get("Architecture")
    }

    /// The `Size` field, parsed.
    pub fn size(&self) -> Result<Option<u64>> {
        match self.get("Size") {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| AptRepositoryError::invalid_field("Size", value)),
        }
    }

    /// The digest recorded for one algorithm, if any.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        self.get(algorithm.control_field())
    }

    /// All digests present in the stanza.
    pub fn digests(&self) -> DigestSet {
        let mut set = DigestSet::new();
        for &alg in DigestAlgorithm::all() {
            if let Some(hex) = self.digest(alg) {
                set.insert(alg, hex.to_string());
            }
        }
        set
    }

    /// The strongest digest present, in the documented preference order.
    pub fn strongest_digest(&self) -> Option<(DigestAlgorithm, &str)> {
        DigestAlgorithm::preference()
            .iter()
            .find_map(|&alg| self.digest(alg).map(|hex| (alg, hex)))
    }

    /// Render the stanza, one `Field: value` line per field, continuation
    /// lines indented by one space, trailing newline included.
    pub fn to_stanza(&self) -> String {
        let mut out = String::new();
        for (field, value) in &self.fields {
            out.push_str(field);
            out.push_str(": ");
            let mut lines = value.split('\n');
            if let Some(first) = lines.next() {
                out.push_str(first);
            }
            for line in lines {
                out.push_str("\n ");
                out.push_str(line);
            }
            out.push('\n');
        }
        out
    }

    /// Split concatenated stanza text (a `Packages` file) on blank-line
    /// boundaries and parse each paragraph.
    pub fn parse_many(text: &str) -> Result<Vec<Self>> {
        let mut stanzas = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                if !current.trim().is_empty() {
                    stanzas.push(Self::parse(&current)?);
                    current.clear();
                }
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
        if !current.trim().is_empty() {
            stanzas.push(Self::parse(&current)?);
        }

        Ok(stanzas)
    }
}

impl fmt::Display for ControlFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_stanza())
    }
}

impl Serialize for ControlFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANZA: &str = "Package: hello\n\
        Version: 2.10-3\n\
        Architecture: amd64\n\
        Maintainer: Example <ex@example.org>\n\
        Size: 53456\n\
        MD5sum: a273cccb4e1b5a9ffc44e04db3d041b7\n\
        SHA256: 31e6b4b32b11ccc77d77a3e923bb296dd40ba568aeb4dcf3c4c12a100a9cc0f5\n\
        Description: example package\n greeting program\n with a longer description\n";

    #[test]
    fn parse_emit_roundtrip() {
        let control = ControlFile::parse(STANZA).unwrap();
        assert_eq!(control.to_stanza(), STANZA);
    }

    #[test]
    fn roundtrip_preserves_field_order_and_values() {
        let control = ControlFile::parse(STANZA).unwrap();
        let reparsed = ControlFile::parse(&control.to_stanza()).unwrap();
        assert_eq!(control, reparsed);
        let names: Vec<_> = control.iter().map(|(name, _)| name).collect();
        assert_eq!(names[0], "Package");
        assert_eq!(names.last(), Some(&"Description"));
    }

    #[test]
    fn continuation_lines_kept() {
        let control = ControlFile::parse(STANZA).unwrap();
        assert_eq!(
            control.get("Description"),
            Some("example package\ngreeting program\nwith a longer description")
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let control = ControlFile::parse(STANZA).unwrap();
        assert_eq!(control.get("package"), Some("hello"));
        assert_eq!(control.get("md5SUM"), control.digest(DigestAlgorithm::Md5));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut control = ControlFile::parse(STANZA).unwrap();
        control.set("Filename", "pool/main/binary-amd64/abc.deb");
        control.set("Version", "2.10-4");
        assert_eq!(control.version(), Some("2.10-4"));
        // Version stayed in its original slot.
        let names: Vec<_> = control.iter().map(|(name, _)| name).collect();
        assert_eq!(names[1], "Version");
        assert_eq!(names.last(), Some(&"Filename"));
    }

    #[test]
    fn strongest_digest_prefers_sha256() {
        let control = ControlFile::parse(STANZA).unwrap();
        let (alg, hex) = control.strongest_digest().unwrap();
        assert_eq!(alg, DigestAlgorithm::Sha256);
        assert!(hex.starts_with("31e6b4b3"));
    }

    #[test]
    fn parse_many_splits_on_blank_lines() {
        let text = "Package: a\nVersion: 1\nArchitecture: amd64\n\n\
                    Package: b\nVersion: 2\nArchitecture: all\n";
        let stanzas = ControlFile::parse_many(text).unwrap();
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].package(), Some("a"));
        assert_eq!(stanzas[1].architecture(), Some("all"));
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(ControlFile::parse("no colon here").is_err());
        assert!(ControlFile::parse(" orphan continuation\n").is_err());
    }

    #[test]
    fn serializes_as_ordered_map() {
        let control = ControlFile::parse("Package: a\nVersion: 1\n").unwrap();
        let json = serde_json::to_string(&control).unwrap();
        assert_eq!(json, r#"{"Package":"a","Version":"1"}"#);
    }
}
