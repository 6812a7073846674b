//! Turning an untrusted upload name into something we can put on disk.
//!
//! Uploads arrive with whatever name the client felt like sending.
//! Before any path gets built from it, [`SafeName::parse()`] either hands back
//! a [`SafeName`] (a single, harmless path component) or says why it refused.
//!
//! [`SafeName::parse()`]: struct.SafeName.html#method.parse
//! [`SafeName`]: struct.SafeName.html

use std::fmt;

use log::*;
use thiserror::Error;

use crate::config::ARCHIVE_SUFFIX;

/// Longest name (in bytes) we keep, leaving room for the archive suffix
/// and a uniquifying counter inside a 255-byte path component.
pub const MAX_NAME_LEN: usize = 200;

/// Why an upload's declared name was refused outright.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameRejection {
    #[error("name is empty")]
    Empty,
    #[error("name contains a NUL byte")]
    NulByte,
    #[error("name contains a parent directory (..) component")]
    Traversal,
    #[error("name consists only of dots")]
    DotsOnly,
}

/// A sanitized upload name: one path component,
/// no separators, no control characters, no reserved names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    /// Sanitizes `raw`, or rejects it if no sane reading of it exists.
    ///
    /// Names that try to climb out of a directory are rejected rather than
    /// mangled. Separators and control characters are replaced with `_`.
    /// On Windows, so are the characters it forbids, and reserved names
    /// like `aux.c` get a `_` prefix.
    pub fn parse(raw: &str) -> Result<Self, NameRejection> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NameRejection::Empty);
        }
        if trimmed.contains('\0') {
            return Err(NameRejection::NulByte);
        }
        if trimmed.split(['/', '\\']).any(|component| component == "..") {
            return Err(NameRejection::Traversal);
        }
        if trimmed.chars().all(|c| c == '.') {
            return Err(NameRejection::DotsOnly);
        }

        let mut cleaned = clean(trimmed);
        truncate_at_char_boundary(&mut cleaned, MAX_NAME_LEN);
        if cleaned.is_empty() {
            return Err(NameRejection::Empty);
        }
        if cleaned != raw {
            debug!("Sanitized upload name {:?} to {:?}", raw, cleaned);
        }
        Ok(SafeName(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The archive file name for this upload: the name plus [`ARCHIVE_SUFFIX`].
    ///
    /// [`ARCHIVE_SUFFIX`]: ../config/constant.ARCHIVE_SUFFIX.html
    pub fn archive_name(&self) -> String {
        format!("{}{}", self.0, ARCHIVE_SUFFIX)
    }

    /// The `n`th candidate archive name when the plain one is taken.
    /// `n <= 1` gives the plain name; `report.csv` with `n = 3` gives `report.csv_(3).zip`.
    pub fn numbered_archive_name(&self, n: u32) -> String {
        if n <= 1 {
            self.archive_name()
        } else {
            format!("{}_({}){}", self.0, n, ARCHIVE_SUFFIX)
        }
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replaces what the store's filesystem can't hold in a single path component.
#[cfg(not(windows))]
fn clean(name: &str) -> String {
    // POSIX only forbids '/' and NUL (already rejected).
    // Backslashes and control characters go too.
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

/// Replaces what the store's filesystem can't hold in a single path component.
#[cfg(windows)]
fn clean(name: &str) -> String {
    use sanitize_filename::{is_sanitized_with_options, sanitize_with_options, Options, OptionsForCheck};

    let options = |windows| Options {
        windows,
        truncate: false,
        replacement: "_",
    };
    let cleaned = sanitize_with_options(name, options(false));
    let check = OptionsForCheck {
        windows: true,
        truncate: false,
    };
    // The Windows pass would replace a reserved name (`con.h`) wholesale.
    let cleaned = if is_sanitized_with_options(&cleaned, check) {
        cleaned
    } else {
        format!("_{cleaned}")
    };
    sanitize_with_options(cleaned, options(true))
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn safe_names_pass_through() {
        for raw in &["report.csv", "photo 2024.jpg", "résumé.pdf", ".env", "a,b;c"] {
            assert_eq!(SafeName::parse(raw).unwrap().as_str(), *raw);
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn names_only_windows_dislikes_pass_through() {
        for raw in &[
            "aux.c",
            "con.h",
            "nul.log",
            "Com1.rs",
            "notes:2024.txt",
            "report.",
            "what?*<>|\"",
            "trailing ",
        ] {
            let expected = raw.trim();
            assert_eq!(SafeName::parse(raw).unwrap().as_str(), expected);
        }
        assert_eq!(SafeName::parse("bell\u{7}.txt").unwrap().as_str(), "bell_.txt");
    }

    #[cfg(windows)]
    #[test]
    fn windows_reserved_names_keep_their_stems() {
        assert_eq!(SafeName::parse("aux.c").unwrap().as_str(), "_aux.c");
        assert_eq!(SafeName::parse("notes:2024.txt").unwrap().as_str(), "notes_2024.txt");
        assert_ne!(SafeName::parse("aux.c").unwrap(), SafeName::parse("con.h").unwrap());
    }

    #[test]
    fn traversal_is_rejected() {
        for raw in &["..", "../etc/passwd", "a/../../b", "..\\windows\\system32", "x/.."] {
            let rejection = SafeName::parse(raw).unwrap_err();
            assert!(
                rejection == NameRejection::Traversal || rejection == NameRejection::DotsOnly,
                "{raw:?} gave {rejection:?}"
            );
        }
        assert_eq!(SafeName::parse("../x"), Err(NameRejection::Traversal));
    }

    #[test]
    fn degenerate_names_are_rejected() {
        assert_eq!(SafeName::parse(""), Err(NameRejection::Empty));
        assert_eq!(SafeName::parse("   "), Err(NameRejection::Empty));
        assert_eq!(SafeName::parse("."), Err(NameRejection::DotsOnly));
        assert_eq!(SafeName::parse("..."), Err(NameRejection::DotsOnly));
        assert_eq!(SafeName::parse("a\0b"), Err(NameRejection::NulByte));
    }

    #[test]
    fn separators_are_replaced() {
        let name = SafeName::parse("dir/sub\\file.txt").unwrap();
        assert!(!name.as_str().contains('/'));
        assert!(!name.as_str().contains('\\'));
        assert!(name.as_str().ends_with("file.txt"));
    }

    #[test]
    fn long_names_are_truncated_on_char_boundaries() {
        let raw = "é".repeat(300);
        let name = SafeName::parse(&raw).unwrap();
        assert!(name.as_str().len() <= MAX_NAME_LEN);
        assert!(name.archive_name().len() <= 255);
    }

    #[test]
    fn numbered_names() {
        let name = SafeName::parse("report.csv").unwrap();
        assert_eq!(name.archive_name(), "report.csv.zip");
        assert_eq!(name.numbered_archive_name(1), "report.csv.zip");
        assert_eq!(name.numbered_archive_name(3), "report.csv_(3).zip");
    }
}
