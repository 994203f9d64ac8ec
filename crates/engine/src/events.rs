//! Recorded evaluation events.
//!
//! `RecordingListener` turns listener callbacks into owned `EvalEvent`s so
//! tests and diagnostics can inspect what the cache did after the fact
//! (which cells were recomputed, which were hits, what a change cleared).

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell_id::CellId;
use crate::formula::token::Token;
use crate::listener::{ContentKind, EvaluationListener};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalEvent {
    CacheHit { cell: CellId, value: Value },
    ReadPlainValue { cell: CellId, value: Value },
    StartEvaluate { cell: CellId, tokens: Vec<Token> },
    EndEvaluate { cell: CellId, value: Value },
    /// The changed cell itself lost its cached value.
    ClearCachedValue { cell: CellId, old: Option<Value> },
    /// A transitive consumer lost its cached value, `depth` steps from the change.
    ClearDependent { cell: CellId, depth: usize, old: Value },
    ChangeFromBlank { cell: CellId, kind: ContentKind },
}

impl EvalEvent {
    pub fn cell(&self) -> CellId {
        match self {
            EvalEvent::CacheHit { cell, .. }
            | EvalEvent::ReadPlainValue { cell, .. }
            | EvalEvent::StartEvaluate { cell, .. }
            | EvalEvent::EndEvaluate { cell, .. }
            | EvalEvent::ClearCachedValue { cell, .. }
            | EvalEvent::ClearDependent { cell, .. }
            | EvalEvent::ChangeFromBlank { cell, .. } => *cell,
        }
    }
}

/// Simple event collector for testing.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<EvalEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: EvalEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[EvalEvent] {
        &self.events
    }

    /// Drain all recorded events.
    pub fn take(&mut self) -> Vec<EvalEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Cells whose formula was (re)computed, in start order.
    pub fn evaluated(&self) -> Vec<CellId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EvalEvent::StartEvaluate { cell, .. } => Some(*cell),
                _ => None,
            })
            .collect()
    }

    /// Cells served from the cache.
    pub fn hits(&self) -> Vec<CellId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EvalEvent::CacheHit { cell, .. } => Some(*cell),
                _ => None,
            })
            .collect()
    }

    /// Consumers cleared by invalidation waves, with their depth.
    pub fn cleared_dependents(&self) -> Vec<(CellId, usize)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EvalEvent::ClearDependent { cell, depth, .. } => Some((*cell, *depth)),
                _ => None,
            })
            .collect()
    }
}

/// Listener that records into a shared collector.
#[derive(Debug, Clone)]
pub struct RecordingListener {
    sink: Rc<RefCell<EventCollector>>,
}

impl RecordingListener {
    pub fn new(sink: Rc<RefCell<EventCollector>>) -> Self {
        Self { sink }
    }

    fn push(&self, event: EvalEvent) {
        self.sink.borrow_mut().push(event);
    }
}

impl EvaluationListener for RecordingListener {
    fn on_cache_hit(&mut self, cell: CellId, value: &Value) {
        self.push(EvalEvent::CacheHit { cell, value: value.clone() });
    }

    fn on_read_plain_value(&mut self, cell: CellId, value: &Value) {
        self.push(EvalEvent::ReadPlainValue { cell, value: value.clone() });
    }

    fn on_start_evaluate(&mut self, cell: CellId, tokens: &[Token]) {
        self.push(EvalEvent::StartEvaluate { cell, tokens: tokens.to_vec() });
    }

    fn on_end_evaluate(&mut self, cell: CellId, value: &Value) {
        self.push(EvalEvent::EndEvaluate { cell, value: value.clone() });
    }

    fn on_clear_cached_value(&mut self, cell: CellId, old: Option<&Value>) {
        self.push(EvalEvent::ClearCachedValue { cell, old: old.cloned() });
    }

    fn on_clear_dependent_cached_value(&mut self, cell: CellId, depth: usize, old: &Value) {
        self.push(EvalEvent::ClearDependent { cell, depth, old: old.clone() });
    }

    fn on_change_from_blank_value(&mut self, cell: CellId, kind: ContentKind) {
        self.push(EvalEvent::ChangeFromBlank { cell, kind });
    }
}
