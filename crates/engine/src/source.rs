//! Cell data sources.
//!
//! The evaluator never owns cell content. It pulls plain values and formula
//! tokens from a [`CellDataSource`] on demand, and hosts notify it when
//! content changes.

use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::cell_id::{CellId, CellRange};
use crate::formula::parser::parse_formula;
use crate::formula::token::Token;
use crate::sheet::SheetId;
use crate::value::Value;

/// What a cell currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Blank,
    Value(Value),
    Formula(Rc<[Token]>),
}

pub trait CellDataSource {
    /// The literal value of a plain cell, `None` for blank or formula cells.
    fn plain_value(&self, cell: CellId) -> Option<Value>;

    /// The RPN token sequence of a formula cell.
    fn formula_tokens(&self, cell: CellId) -> Option<Rc<[Token]>>;

    /// Cells inside `area` that hold content, in row-major order.
    fn cells_in_area(&self, area: &CellRange) -> Vec<CellId>;

    fn content(&self, cell: CellId) -> CellContent {
        if let Some(tokens) = self.formula_tokens(cell) {
            return CellContent::Formula(tokens);
        }
        match self.plain_value(cell) {
            Some(v) if !v.is_blank() => CellContent::Value(v),
            _ => CellContent::Blank,
        }
    }
}

#[derive(Debug, Clone)]
enum StoredCell {
    Value(Value),
    Formula(Rc<[Token]>),
}

#[derive(Debug, Default)]
struct SheetCells {
    name: String,
    cells: BTreeMap<(usize, usize), StoredCell>,
}

/// In-memory multi-sheet cell store.
///
/// Sheet ids start at 1 and are never reused. Writes do not notify anyone:
/// call `WorkbookEvaluator::notify_update_cell` after changing a cell that
/// may already be cached.
#[derive(Debug)]
pub struct MemorySource {
    sheets: FxHashMap<SheetId, SheetCells>,
    by_name: FxHashMap<String, SheetId>,
    next_sheet_id: u64,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            sheets: FxHashMap::default(),
            by_name: FxHashMap::default(),
            next_sheet_id: 1,
        }
    }

    /// Add a sheet, or return the existing id if the name is taken
    /// (names compare case-insensitively).
    pub fn add_sheet(&mut self, name: &str) -> SheetId {
        let key = name.to_lowercase();
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = SheetId::from_raw(self.next_sheet_id);
        self.next_sheet_id += 1;
        self.by_name.insert(key, id);
        self.sheets.insert(id, SheetCells { name: name.to_string(), cells: BTreeMap::new() });
        id
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.sheets.get(&id).map(|s| s.name.as_str())
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// Store a plain value. Storing `Value::Blank` clears the cell.
    /// Returns false if the sheet does not exist.
    pub fn set_value(&mut self, cell: CellId, value: impl Into<Value>) -> bool {
        let value = value.into();
        if value.is_blank() {
            return self.clear(cell);
        }
        self.store(cell, StoredCell::Value(value))
    }

    pub fn set_formula(&mut self, cell: CellId, tokens: Vec<Token>) -> bool {
        self.store(cell, StoredCell::Formula(tokens.into()))
    }

    /// Parse `text` relative to the cell's sheet and store the tokens.
    pub fn set_formula_text(&mut self, cell: CellId, text: &str) -> Result<(), String> {
        if !self.sheets.contains_key(&cell.sheet) {
            return Err(format!("Unknown sheet {}", cell.sheet));
        }
        let tokens = parse_formula(text, cell.sheet, |name| self.sheet_id(name))?;
        self.set_formula(cell, tokens);
        Ok(())
    }

    /// Remove any content. Returns false if the sheet does not exist.
    pub fn clear(&mut self, cell: CellId) -> bool {
        match self.sheets.get_mut(&cell.sheet) {
            Some(sheet) => {
                sheet.cells.remove(&(cell.row, cell.col));
                true
            }
            None => false,
        }
    }

    fn store(&mut self, cell: CellId, stored: StoredCell) -> bool {
        match self.sheets.get_mut(&cell.sheet) {
            Some(sheet) => {
                sheet.cells.insert((cell.row, cell.col), stored);
                true
            }
            None => false,
        }
    }

    fn stored(&self, cell: CellId) -> Option<&StoredCell> {
        self.sheets.get(&cell.sheet)?.cells.get(&(cell.row, cell.col))
    }
}

impl CellDataSource for MemorySource {
    fn plain_value(&self, cell: CellId) -> Option<Value> {
        match self.stored(cell)? {
            StoredCell::Value(v) => Some(v.clone()),
            StoredCell::Formula(_) => None,
        }
    }

    fn formula_tokens(&self, cell: CellId) -> Option<Rc<[Token]>> {
        match self.stored(cell)? {
            StoredCell::Formula(tokens) => Some(Rc::clone(tokens)),
            StoredCell::Value(_) => None,
        }
    }

    fn cells_in_area(&self, area: &CellRange) -> Vec<CellId> {
        let Some(sheet) = self.sheets.get(&area.sheet) else {
            return Vec::new();
        };
        sheet
            .cells
            .range((area.first_row, 0)..=(area.last_row, usize::MAX))
            .filter(|((_, col), _)| (area.first_col..=area.last_col).contains(col))
            .map(|((row, col), _)| CellId::new(area.sheet, *row, *col))
            .collect()
    }
}
