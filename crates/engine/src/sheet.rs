//! Sheet identity.
//!
//! Sheets are identified by a stable numeric id that is never reused after a
//! sheet is removed, so cache entries keyed by sheet stay unambiguous for the
//! lifetime of a workbook.

use serde::{Deserialize, Serialize};

/// Stable identifier for a sheet within one workbook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub u64);

impl SheetId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SheetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sheet{}", self.0)
    }
}

/// Returns true if a sheet name must be quoted when used as a reference
/// prefix (`'My Sheet'!A1`).
pub fn needs_quoting(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => true,
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => true,
        Some(_) => !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    }
}

/// Format a sheet name as a reference prefix, quoting when needed.
pub fn format_sheet_prefix(name: &str) -> String {
    if needs_quoting(name) {
        format!("'{}'!", name.replace('\'', "''"))
    } else {
        format!("{}!", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheet_id_order() {
        assert!(SheetId(1) < SheetId(2));
        assert_eq!(SheetId::from_raw(7).raw(), 7);
    }

    #[test]
    fn test_sheet_prefix_quoting() {
        assert_eq!(format_sheet_prefix("new12"), "new12!");
        assert_eq!(format_sheet_prefix("My Sheet"), "'My Sheet'!");
        assert_eq!(format_sheet_prefix("Bob's"), "'Bob''s'!");
        assert_eq!(format_sheet_prefix("2024"), "'2024'!");
    }
}
