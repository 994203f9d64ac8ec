//! Test harness for evaluation scenarios on a single sheet.
//!
//! `SheetHarness` wraps a `WorkbookEvaluator` over a `MemorySource` and:
//! - Addresses cells by A1 text
//! - Notifies the evaluator after every edit, like a host would
//! - Records listener events and renders them as short log lines
//!
//! Log lines look like `start A1 MAX(B1:B2)`, `hit C1 54`, `value D2 14`,
//! `end A1 46`, `clear D1 12`, `clear2 B1 8` or `from-blank B6 value`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell_id::CellId;
use crate::evaluator::WorkbookEvaluator;
use crate::events::{EvalEvent, EventCollector, RecordingListener};
use crate::formula::token::format_tokens;
use crate::settings::EvaluatorSettings;
use crate::sheet::SheetId;
use crate::source::MemorySource;
use crate::value::Value;

pub struct SheetHarness {
    evaluator: WorkbookEvaluator<MemorySource>,
    sheet: SheetId,
    events: Rc<RefCell<EventCollector>>,
}

impl SheetHarness {
    pub fn new() -> Self {
        Self::with_settings(EvaluatorSettings::default())
    }

    pub fn with_settings(settings: EvaluatorSettings) -> Self {
        let mut source = MemorySource::new();
        let sheet = source.add_sheet("Sheet1");
        let events = Rc::new(RefCell::new(EventCollector::new()));
        let mut evaluator = WorkbookEvaluator::with_settings(source, settings);
        evaluator.set_listener(Box::new(RecordingListener::new(Rc::clone(&events))));
        Self { evaluator, sheet, events }
    }

    pub fn evaluator(&mut self) -> &mut WorkbookEvaluator<MemorySource> {
        &mut self.evaluator
    }

    pub fn cell(&self, a1: &str) -> CellId {
        match CellId::parse_a1(self.sheet, a1) {
            Some(cell) => cell,
            None => panic!("bad cell reference {:?}", a1),
        }
    }

    pub fn set_value(&mut self, a1: &str, value: f64) {
        self.store(a1, Value::number(value));
    }

    pub fn set_text(&mut self, a1: &str, text: &str) {
        self.store(a1, Value::text(text));
    }

    pub fn clear_cell(&mut self, a1: &str) {
        self.store(a1, Value::Blank);
    }

    pub fn set_formula(&mut self, a1: &str, formula: &str) {
        let cell = self.cell(a1);
        if let Err(e) = self.evaluator.source_mut().set_formula_text(cell, formula) {
            panic!("bad formula {:?} in {}: {}", formula, a1, e);
        }
        self.evaluator.notify_update_cell(cell);
    }

    pub fn evaluate(&mut self, a1: &str) -> Value {
        let cell = self.cell(a1);
        self.evaluator.evaluate(cell)
    }

    pub fn clear_all(&mut self) {
        self.evaluator.clear_all_cached_result_values();
    }

    /// Drain recorded events.
    pub fn take_events(&self) -> Vec<EvalEvent> {
        self.events.borrow_mut().take()
    }

    /// Drain recorded events as log lines.
    pub fn take_log(&self) -> Vec<String> {
        let events = self.take_events();
        events.iter().map(|e| self.render(e)).collect()
    }

    pub fn assert_consistent(&self) {
        self.evaluator.cache().assert_consistent();
    }

    fn store(&mut self, a1: &str, value: Value) {
        let cell = self.cell(a1);
        self.evaluator.source_mut().set_value(cell, value);
        self.evaluator.notify_update_cell(cell);
    }

    fn render(&self, event: &EvalEvent) -> String {
        let at = self.address(event.cell());
        match event {
            EvalEvent::CacheHit { value, .. } => format!("hit {} {}", at, render_value(value)),
            EvalEvent::ReadPlainValue { value, .. } => format!("value {} {}", at, render_value(value)),
            EvalEvent::StartEvaluate { cell, tokens } => {
                let source = self.evaluator.source();
                let text = format_tokens(tokens, cell.sheet, |id| source.sheet_name(id).map(String::from));
                format!("start {} {}", at, text)
            }
            EvalEvent::EndEvaluate { value, .. } => format!("end {} {}", at, render_value(value)),
            EvalEvent::ClearCachedValue { old: Some(old), .. } => format!("clear {} {}", at, render_value(old)),
            EvalEvent::ClearCachedValue { old: None, .. } => format!("clear {}", at),
            EvalEvent::ClearDependent { depth, old, .. } => {
                format!("clear{} {} {}", depth, at, render_value(old))
            }
            EvalEvent::ChangeFromBlank { kind, .. } => format!("from-blank {} {}", at, kind.as_str()),
        }
    }

    fn address(&self, cell: CellId) -> String {
        if cell.sheet == self.sheet {
            cell.a1()
        } else {
            cell.to_string()
        }
    }
}

impl Default for SheetHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Blank => "#BLANK#".to_string(),
        Value::Number(n) => format!("{}", n),
        Value::Text(s) => format!("'{}'", s),
        Value::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Value::Error(e) => e.as_str().to_string(),
        Value::Area(range) => range.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_renders_log_lines() {
        let mut h = SheetHarness::new();
        h.set_value("B1", 2.5);
        h.set_text("B2", "x");
        h.set_formula("A1", "B1*2");
        assert_eq!(h.take_log(), vec!["from-blank B1 value", "from-blank B2 value", "from-blank A1 formula"]);

        h.clear_all();
        assert_eq!(h.evaluate("A1"), Value::Number(5.0));
        assert_eq!(h.take_log(), vec!["start A1 B1*2", "value B1 2.5", "end A1 5"]);

        h.clear_cell("B1");
        assert_eq!(h.take_log(), vec!["clear B1 2.5", "clear1 A1 5"]);

        // never evaluated since the reset, so there is no old value to show
        h.clear_all();
        h.clear_cell("B2");
        assert_eq!(h.take_log(), vec!["clear B2"]);
    }

    #[test]
    fn test_harness_cell_addressing() {
        let h = SheetHarness::new();
        let cell = h.cell("C4");
        assert_eq!((cell.row, cell.col), (3, 2));
        assert_eq!(render_value(&Value::text("x")), "'x'");
        assert_eq!(render_value(&Value::Boolean(false)), "FALSE");
    }
}
