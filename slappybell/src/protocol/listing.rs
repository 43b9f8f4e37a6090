//! Parser for the body of a `list` reply.
//!
//! ```text
//! Files:
//! chime.mp3 20480
//! door bell.mp3 8192
//! Storage Usage: 28672 / 1048576
//! ```

const STORAGE_USAGE_PREFIX: &str = "Storage Usage:";
const FILES_HEADER: &str = "Files:";

/// A sound file stored on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredFile {
    /// File name as the device reports it.
    pub name: String,
    /// Size in bytes, when the device printed a parsable one.
    pub size: Option<u64>,
}

/// Parsed file listing with storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileListing {
    /// Stored files in device order.
    pub files: Vec<StoredFile>,
    /// Bytes in use, if reported.
    pub storage_used: Option<u64>,
    /// Storage capacity in bytes, if reported.
    pub storage_total: Option<u64>,
}

impl FileListing {
    /// Parse a listing body. Unrecognized lines are treated as file entries.
    pub fn parse(body: &str) -> Self {
        let mut listing = Self::default();

        for line in body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            if let Some(usage) = line.strip_prefix(STORAGE_USAGE_PREFIX) {
                if let Some((used, total)) = usage.split_once('/') {
                    listing.storage_used = used
                        .trim()
                        .parse()
                        .ok();
                    listing.storage_total = total
                        .trim()
                        .parse()
                        .ok();
                }
            } else if line.starts_with(FILES_HEADER) {
                continue;
            } else {
                listing
                    .files
                    .push(parse_file_line(line));
            }
        }

        listing
    }

    /// Bytes still free, when both statistics are known.
    pub fn storage_free(&self) -> Option<u64> {
        Some(
            self.storage_total?
                .saturating_sub(self.storage_used?),
        )
    }

    /// Whether a file of this name is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.files
            .iter()
            .any(|f| f.name == name)
    }
}

fn parse_file_line(line: &str) -> StoredFile {
    match line.rsplit_once(' ') {
        Some((name, size)) => match size.parse() {
            Ok(size) => StoredFile {
                name: name
                    .trim()
                    .to_string(),
                size: Some(size),
            },
            Err(_) => StoredFile {
                name: line.to_string(),
                size: None,
            },
        },
        None => StoredFile {
            name: line.to_string(),
            size: None,
        },
    }
}
