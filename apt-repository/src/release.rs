//! `Release` document generation and parsing.
//!
//! The generated form is what an APT client verifies signatures against,
//! so emission is strictly deterministic: fixed field order, stable hash
//! block ordering, size column right-aligned to the widest entry.

use crate::digest::{DigestAlgorithm, HashedEntry};
use crate::error::{AptRepositoryError, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// An APT `Release` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Release {
    /// `Origin` field.
    pub origin: Option<String>,
    /// `Label` field.
    pub label: Option<String>,
    /// `Suite` field.
    pub suite: Option<String>,
    /// `Codename` field.
    pub codename: Option<String>,
    /// `Description` field.
    pub description: Option<String>,
    /// `Date` field.
    pub date: Option<DateTime<Utc>>,
    /// Published architectures.
    pub architectures: Vec<String>,
    /// Published components.
    pub components: Vec<String>,
    /// Index files with their sizes and digests.
    pub files: Vec<HashedEntry>,
    /// Fields this model does not interpret, in input order.
    pub extra: Vec<(String, String)>,
}

impl Release {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an index file.
    pub fn add_file(&mut self, file: HashedEntry) {
        self.files.push(file);
    }

    /// Files carrying a digest for the given algorithm.
    pub fn files_for(&self, algorithm: DigestAlgorithm) -> Vec<(&HashedEntry, &str)> {
        self.files
            .iter()
            .filter_map(|file| file.digests.get(algorithm).map(|hex| (file, hex)))
            .collect()
    }

    /// Parse a plaintext `Release` document (cleartext framing already
    /// stripped). Hash tables are merged per path across algorithms.
    pub fn parse(content: &str) -> Result<Self> {
        let mut release = Release::new();
        let mut current_hash: Option<DigestAlgorithm> = None;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                match current_hash {
                    Some(algorithm) => release.push_hash_line(algorithm, line)?,
                    None => {
                        if let Some((_, value)) = release.extra.last_mut() {
                            value.push('\n');
                            value.push_str(line.trim_start());
                        }
                    }
                }
                continue;
            }

            current_hash = None;
            let (field, value) = line
                .split_once(':')
                .ok_or_else(|| AptRepositoryError::InvalidControlLine(line.to_string()))?;
            let field = field.trim();
            let value = value.trim();

            if let Some(&algorithm) = DigestAlgorithm::all()
                .iter()
                .find(|alg| field.eq_ignore_ascii_case(alg.release_field()))
            {
                current_hash = Some(algorithm);
                continue;
            }

            match field.to_ascii_lowercase().as_str() {
                "origin" => release.origin = Some(value.to_string()),
                "label" => release.label = Some(value.to_string()),
                "suite" => release.suite = Some(value.to_string()),
                "codename" => release.codename = Some(value.to_string()),
                "description" => release.description = Some(value.to_string()),
                "date" => {
                    release.date = DateTime::parse_from_rfc2822(value)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc));
                }
                "architectures" => {
                    release.architectures =
                        value.split_whitespace().map(str::to_string).collect();
                }
                "components" => {
                    release.components =
                        value.split_whitespace().map(str::to_string).collect();
                }
                _ => release.extra.push((field.to_string(), value.to_string())),
            }
        }

        Ok(release)
    }

    fn push_hash_line(&mut self, algorithm: DigestAlgorithm, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        let (hash, size, path) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(hash), Some(size), Some(path), None) => (hash, size, path),
            _ => return Err(AptRepositoryError::InvalidHashLine(line.to_string())),
        };
        let size: u64 = size
            .parse()
            .map_err(|_| AptRepositoryError::InvalidHashLine(line.to_string()))?;

        match self.files.iter_mut().find(|file| file.path == path) {
            Some(file) => file.digests.insert(algorithm, hash.to_string()),
            None => {
                let mut entry = HashedEntry {
                    path: path.to_string(),
                    size,
                    digests: Default::default(),
                };
                entry.digests.insert(algorithm, hash.to_string());
                self.files.push(entry);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(origin) = &self.origin {
            writeln!(f, "Origin: {}", origin)?;
        }
        if let Some(label) = &self.label {
            writeln!(f, "Label: {}", label)?;
        }
        if let Some(suite) = &self.suite {
            writeln!(f, "Suite: {}", suite)?;
        }
        if let Some(codename) = &self.codename {
            writeln!(f, "Codename: {}", codename)?;
        }
        if let Some(date) = &self.date {
            writeln!(f, "Date: {}", date.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        writeln!(f, "Acquire-By-Hash: no")?;
        if !self.architectures.is_empty() {
            writeln!(f, "Architectures: {}", self.architectures.join(" "))?;
        }
        if !self.components.is_empty() {
            writeln!(f, "Components: {}", self.components.join(" "))?;
        }
        if let Some(description) = &self.description {
            writeln!(f, "Description: {}", description)?;
        }
        for (field, value) in &self.extra {
            writeln!(f, "{}: {}", field, value)?;
        }

        let width = self
            .files
            .iter()
            .map(|file| file.size.to_string().len())
            .max()
            .unwrap_or(0);
        for &algorithm in DigestAlgorithm::all() {
            let files = self.files_for(algorithm);
            if files.is_empty() {
                continue;
            }
            writeln!(f, "{}:", algorithm.release_field())?;
            for (file, hash) in files {
                writeln!(f, " {} {:>width$} {}", hash, file.size, file.path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestSet;
    use chrono::TimeZone;

    fn entry(path: &str, size: u64, sha256: &str, md5: &str) -> HashedEntry {
        let mut digests = DigestSet::new();
        digests.insert(DigestAlgorithm::Sha256, sha256.to_string());
        digests.insert(DigestAlgorithm::Md5, md5.to_string());
        HashedEntry {
            path: path.to_string(),
            size,
            digests,
        }
    }

    fn sample() -> Release {
        let mut release = Release::new();
        release.origin = Some("Example".to_string());
        release.suite = Some("stable".to_string());
        release.codename = Some("stable".to_string());
        release.date = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        release.architectures = vec!["amd64".to_string(), "all".to_string()];
        release.components = vec!["main".to_string()];
        release.add_file(entry("main/binary-amd64/Packages", 1234, "aa", "bb"));
        release.add_file(entry("main/binary-amd64/Packages.gz", 99, "cc", "dd"));
        release
    }

    #[test]
    fn render_is_deterministic_and_padded() {
        let text = sample().to_string();
        assert_eq!(text, sample().to_string());
        assert!(text.contains("Date: Fri, 01 Mar 2024 12:00:00 GMT"));
        assert!(text.contains("Architectures: amd64 all\n"));
        // Size column right-aligned to the widest entry (1234 -> width 4).
        assert!(text.contains(" bb 1234 main/binary-amd64/Packages\n"));
        assert!(text.contains(" dd   99 main/binary-amd64/Packages.gz\n"));
    }

    #[test]
    fn hash_blocks_only_for_present_algorithms() {
        let text = sample().to_string();
        assert!(text.contains("MD5Sum:\n"));
        assert!(text.contains("SHA256:\n"));
        assert!(!text.contains("SHA1:\n"));
        assert!(!text.contains("SHA512:\n"));
    }

    #[test]
    fn parse_roundtrip_merges_hash_tables() {
        let original = sample();
        let parsed = Release::parse(&original.to_string()).unwrap();
        assert_eq!(parsed.origin, original.origin);
        assert_eq!(parsed.suite, original.suite);
        assert_eq!(parsed.architectures, original.architectures);
        assert_eq!(parsed.components, original.components);
        assert_eq!(parsed.date, original.date);
        assert_eq!(parsed.files.len(), 2);
        let file = &parsed.files[0];
        assert_eq!(file.path, "main/binary-amd64/Packages");
        assert_eq!(file.size, 1234);
        assert_eq!(file.digests.get(DigestAlgorithm::Sha256), Some("aa"));
        assert_eq!(file.digests.get(DigestAlgorithm::Md5), Some("bb"));
    }

    #[test]
    fn parse_keeps_unknown_fields() {
        let text = "Origin: X\nValid-Until: Sat, 02 Mar 2024 12:00:00 GMT\n";
        let release = Release::parse(text).unwrap();
        assert_eq!(
            release.extra,
            vec![(
                "Valid-Until".to_string(),
                "Sat, 02 Mar 2024 12:00:00 GMT".to_string()
            )]
        );
    }

    #[test]
    fn parse_rejects_malformed_hash_line() {
        let text = "SHA256:\n aabb 12\n";
        assert!(Release::parse(text).is_err());
    }
}
