//! Evaluation listener: synchronous, read-only hooks into the cache and
//! evaluator.
//!
//! Every method has a no-op default. Listeners observe; nothing they return
//! influences evaluation, and they must not call back into the cache.

use crate::cell_id::CellId;
use crate::formula::token::Token;
use crate::value::Value;

/// Last known content of a cell, as tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentKind {
    #[default]
    Blank,
    Value,
    Formula,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Blank => "blank",
            ContentKind::Value => "value",
            ContentKind::Formula => "formula",
        }
    }
}

pub trait EvaluationListener {
    /// A cached value was returned without recomputation.
    fn on_cache_hit(&mut self, _cell: CellId, _value: &Value) {}

    /// A plain cell was read from the data source.
    fn on_read_plain_value(&mut self, _cell: CellId, _value: &Value) {}

    fn on_start_evaluate(&mut self, _cell: CellId, _tokens: &[Token]) {}

    fn on_end_evaluate(&mut self, _cell: CellId, _value: &Value) {}

    /// The changed cell's own cached value was discarded. `old` is `None`
    /// when nothing was cached.
    fn on_clear_cached_value(&mut self, _cell: CellId, _old: Option<&Value>) {}

    /// A consumer `depth` steps away from the changed cell lost its value.
    fn on_clear_dependent_cached_value(&mut self, _cell: CellId, _depth: usize, _old: &Value) {}

    /// A blank cell received content of `kind`.
    fn on_change_from_blank_value(&mut self, _cell: CellId, _kind: ContentKind) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EvaluationListener for NoopListener {}
