//! Cell identity for the evaluation cache.
//!
//! A `CellId` uniquely identifies a cell across all sheets in a workbook and
//! a `CellRange` identifies a rectangular block of cells on one sheet.

use crate::sheet::SheetId;

/// Unique identifier for a cell in a workbook.
///
/// Ordered by (sheet, row, col), which is the deterministic order used when
/// the cache sorts cells, e.g. inside one invalidation wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    /// The sheet this cell belongs to (stable, never reused after deletion)
    pub sheet: SheetId,
    /// Row index (0-based)
    pub row: usize,
    /// Column index (0-based)
    pub col: usize,
}

impl CellId {
    #[inline]
    pub fn new(sheet: SheetId, row: usize, col: usize) -> Self {
        Self { sheet, row, col }
    }

    /// Parse a sheet-local A1 address (`"D12"`, `"$A$1"`) on `sheet`.
    pub fn parse_a1(sheet: SheetId, text: &str) -> Option<Self> {
        let (row, col) = parse_a1(text)?;
        Some(Self::new(sheet, row, col))
    }

    /// The sheet-local A1 address, without sheet prefix.
    pub fn a1(&self) -> String {
        format_a1(self.row, self.col)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}", self.sheet, self.a1())
    }
}

/// A rectangular block of cells on one sheet. Bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRange {
    pub sheet: SheetId,
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

impl CellRange {
    /// Build a range from two corners in any order.
    pub fn new(sheet: SheetId, row_a: usize, col_a: usize, row_b: usize, col_b: usize) -> Self {
        Self {
            sheet,
            first_row: row_a.min(row_b),
            first_col: col_a.min(col_b),
            last_row: row_a.max(row_b),
            last_col: col_a.max(col_b),
        }
    }

    /// Parse a sheet-local `A1:B2` address (a bare `A1` is a 1x1 range).
    pub fn parse_a1(sheet: SheetId, text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((start, end)) => {
                let (r0, c0) = parse_a1(start)?;
                let (r1, c1) = parse_a1(end)?;
                Some(Self::new(sheet, r0, c0, r1, c1))
            }
            None => {
                let (r, c) = parse_a1(text)?;
                Some(Self::new(sheet, r, c, r, c))
            }
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.last_row - self.first_row + 1
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.last_col - self.first_col + 1
    }

    #[inline]
    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    pub fn top_left(&self) -> CellId {
        CellId::new(self.sheet, self.first_row, self.first_col)
    }

    pub fn contains(&self, cell: CellId) -> bool {
        cell.sheet == self.sheet
            && (self.first_row..=self.last_row).contains(&cell.row)
            && (self.first_col..=self.last_col).contains(&cell.col)
    }

    /// The cell at `(row, col)` relative to the top-left corner, if inside.
    pub fn cell_at(&self, row: usize, col: usize) -> Option<CellId> {
        if row < self.height() && col < self.width() {
            Some(CellId::new(self.sheet, self.first_row + row, self.first_col + col))
        } else {
            None
        }
    }

    /// All cells of the range in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        (self.first_row..=self.last_row).flat_map(move |row| {
            (self.first_col..=self.last_col).map(move |col| CellId::new(self.sheet, row, col))
        })
    }

    /// The sheet-local `A1:B2` address, without sheet prefix.
    pub fn a1(&self) -> String {
        format!(
            "{}:{}",
            format_a1(self.first_row, self.first_col),
            format_a1(self.last_row, self.last_col)
        )
    }
}

impl std::fmt::Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}", self.sheet, self.a1())
    }
}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Format 0-based coordinates as an A1 address.
pub fn format_a1(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Parse an A1 address into 0-based (row, col). `$` markers are accepted and
/// ignored.
pub fn parse_a1(text: &str) -> Option<(usize, usize)> {
    let text = text.trim();
    let mut col: usize = 0;
    let mut letters = 0;
    let mut chars = text.chars().filter(|c| *c != '$').peekable();

    while let Some(&c) = chars.peek() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        letters += 1;
        chars.next();
    }
    if letters == 0 || letters > 3 {
        return None;
    }

    let digits: String = chars.collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}
