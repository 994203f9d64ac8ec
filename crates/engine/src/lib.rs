pub mod cache;
pub mod cell_id;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod formula;
pub mod listener;
pub mod settings;
pub mod sheet;
pub mod source;
pub mod value;

#[cfg(test)]
pub mod harness;

pub use cache::EvaluationCache;
pub use cell_id::{CellId, CellRange};
pub use error::{EvalFault, SettingsError};
pub use evaluator::WorkbookEvaluator;
pub use listener::{ContentKind, EvaluationListener, NoopListener};
pub use settings::EvaluatorSettings;
pub use sheet::SheetId;
pub use source::{CellContent, CellDataSource, MemorySource};
pub use value::{ErrorCode, Value};
