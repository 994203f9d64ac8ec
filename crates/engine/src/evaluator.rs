//! Workbook evaluator: recursive, memoized formula evaluation.
//!
//! Evaluation pulls content from the [`CellDataSource`], consults the
//! [`EvaluationCache`] for every reference and installs each result together
//! with the dependencies that were actually read. Reads go through a
//! per-formula [`AreaResolver`] frame, so functions such as INDEX only
//! depend on the cells they pick.

use rustc_hash::FxHashSet;

use crate::cache::{AreaRead, Dependencies, EntryId, EvaluationCache};
use crate::cell_id::{CellId, CellRange};
use crate::error::EvalFault;
use crate::formula::functions::{implicit_intersection, AreaResolver, FunctionLibrary, StandardLibrary};
use crate::formula::token::{FunctionId, Token};
use crate::listener::{ContentKind, EvaluationListener};
use crate::settings::EvaluatorSettings;
use crate::source::{CellContent, CellDataSource};
use crate::value::{ErrorCode, Value};

pub struct WorkbookEvaluator<S: CellDataSource, F: FunctionLibrary = StandardLibrary> {
    library: F,
    state: EvalState<S>,
}

struct EvalState<S> {
    source: S,
    cache: EvaluationCache,
    settings: EvaluatorSettings,
    /// Formula cells currently being evaluated, outermost first
    in_progress: Vec<CellId>,
    active: FxHashSet<CellId>,
}

impl<S: CellDataSource> WorkbookEvaluator<S, StandardLibrary> {
    pub fn new(source: S) -> Self {
        Self::with_library(source, StandardLibrary, EvaluatorSettings::default())
    }

    pub fn with_settings(source: S, settings: EvaluatorSettings) -> Self {
        Self::with_library(source, StandardLibrary, settings)
    }
}

impl<S: CellDataSource, F: FunctionLibrary> WorkbookEvaluator<S, F> {
    pub fn with_library(source: S, library: F, settings: EvaluatorSettings) -> Self {
        Self {
            library,
            state: EvalState {
                source,
                cache: EvaluationCache::new(),
                settings,
                in_progress: Vec::new(),
                active: FxHashSet::default(),
            },
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn EvaluationListener>) {
        self.state.cache.set_listener(listener);
    }

    pub fn source(&self) -> &S {
        &self.state.source
    }

    /// Mutable access to the data source. Changes made here are invisible to
    /// the cache until [`notify_update_cell`](Self::notify_update_cell).
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.state.source
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.state.cache
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.state.settings
    }

    /// Evaluate `cell`, panicking on a fatal fault.
    ///
    /// Spreadsheet errors (`#DIV/0!`, `#CIRC!`, ...) are ordinary values.
    pub fn evaluate(&mut self, cell: CellId) -> Value {
        match self.try_evaluate(cell) {
            Ok(value) => value,
            Err(fault) => {
                log::error!("evaluation of {} failed: {}", cell, fault);
                panic!("evaluation of {} failed: {}", cell, fault);
            }
        }
    }

    /// Evaluate `cell`, returning fatal faults instead of panicking. Results
    /// computed before the fault stay cached.
    pub fn try_evaluate(&mut self, cell: CellId) -> Result<Value, EvalFault> {
        let result = self.state.evaluate_cell(&self.library, cell).map(|(_, value)| value);
        debug_assert!(self.state.in_progress.is_empty() && self.state.active.is_empty());
        result
    }

    /// The stored content of `cell` may have changed: re-read it and let the
    /// cache invalidate whatever depended on it.
    pub fn notify_update_cell(&mut self, cell: CellId) {
        match self.state.source.content(cell) {
            CellContent::Formula(_) => self.state.cache.notify_formula_changed(cell),
            CellContent::Value(value) => {
                self.state.cache.update_plain_value(cell, value);
            }
            CellContent::Blank => {
                self.state.cache.update_plain_value(cell, Value::Blank);
            }
        }
    }

    pub fn clear_all_cached_result_values(&mut self) {
        self.state.cache.clear_all_cached_result_values();
    }
}

impl<S: CellDataSource> EvalState<S> {
    fn evaluate_cell<F: FunctionLibrary>(
        &mut self,
        library: &F,
        cell: CellId,
    ) -> Result<(EntryId, Value), EvalFault> {
        let id = self.cache.get_or_create(cell);

        if self.active.contains(&cell) {
            log::trace!("circular reference to {}", cell);
            return Ok((id, Value::Error(ErrorCode::Circular)));
        }

        if let Some(cached) = self.cache.value(id) {
            let value = cached.clone();
            if !value.is_blank() || self.settings.report_blank_reads {
                self.cache.listener_mut().on_cache_hit(cell, &value);
            }
            return Ok((id, value));
        }

        let tokens = match self.source.content(cell) {
            CellContent::Formula(tokens) => tokens,
            CellContent::Value(value) => return Ok((id, self.install_plain(id, cell, value))),
            CellContent::Blank => return Ok((id, self.install_plain(id, cell, Value::Blank))),
        };

        if self.in_progress.len() >= self.settings.max_depth {
            let mut chain = self.in_progress.clone();
            chain.push(cell);
            return Err(EvalFault::DepthExceeded { limit: self.settings.max_depth, chain });
        }

        self.cache.set_content(id, ContentKind::Formula);
        log::trace!("evaluating {}", cell);
        self.cache.listener_mut().on_start_evaluate(cell, &tokens);

        self.in_progress.push(cell);
        self.active.insert(cell);
        let outcome = self.evaluate_formula(library, cell, &tokens);
        self.in_progress.pop();
        self.active.remove(&cell);

        let (value, deps) = outcome?;
        self.cache.set_value(id, value.clone(), deps);
        self.cache.listener_mut().on_end_evaluate(cell, &value);
        log::trace!("evaluated {} = {:?}", cell, value);
        Ok((id, value))
    }

    fn install_plain(&mut self, id: EntryId, cell: CellId, value: Value) -> Value {
        let value = value.normalized();
        let kind = if value.is_blank() { ContentKind::Blank } else { ContentKind::Value };
        self.cache.set_content(id, kind);
        self.cache.set_value(id, value.clone(), Dependencies::new());
        if !value.is_blank() || self.settings.report_blank_reads {
            self.cache.listener_mut().on_read_plain_value(cell, &value);
        }
        value
    }

    /// Run an RPN token sequence. Returns the result and the dependencies
    /// read while computing it.
    fn evaluate_formula<F: FunctionLibrary>(
        &mut self,
        library: &F,
        cell: CellId,
        tokens: &[Token],
    ) -> Result<(Value, Dependencies), EvalFault> {
        let mut frame = FrameResolver { state: self, library, deps: Dependencies::new(), fault: None };
        let mut stack: Vec<Value> = Vec::with_capacity(tokens.len());

        for token in tokens {
            let value = match token {
                Token::Number(n) => Value::number(*n),
                Token::Text(s) => Value::Text(s.clone()),
                Token::Boolean(b) => Value::Boolean(*b),
                Token::Error(e) => Value::Error(*e),
                Token::MissingArg => Value::Blank,
                Token::Paren => continue,
                Token::Ref(target) => frame.read(*target),
                Token::Area(range) if range.is_single_cell() => frame.read(range.top_left()),
                Token::Area(range) => Value::Area(*range),
                Token::Operator(op) => {
                    let id = FunctionId::Operator(*op);
                    match frame.call(&id, &mut stack, op.arity(), cell) {
                        Some(v) => v,
                        None => return frame.malformed(cell),
                    }
                }
                Token::Function { name, argc } => {
                    let id = FunctionId::Named(name.clone());
                    match frame.call(&id, &mut stack, *argc, cell) {
                        Some(v) => v,
                        None => return frame.malformed(cell),
                    }
                }
            };
            if let Some(fault) = frame.fault.take() {
                return Err(fault);
            }
            stack.push(value);
        }

        if stack.len() != 1 {
            return frame.malformed(cell);
        }
        let result = match stack.pop() {
            Some(Value::Area(area)) => implicit_intersection(&area, &mut frame, cell.row, cell.col),
            Some(value) => value,
            None => Value::Blank,
        };
        if let Some(fault) = frame.fault.take() {
            return Err(fault);
        }
        let result = match result {
            Value::Blank => Value::Number(0.0),
            other => other.normalized(),
        };
        Ok((result, frame.deps))
    }
}

/// Resolves references for one formula evaluation and collects what it read.
struct FrameResolver<'a, S, F> {
    state: &'a mut EvalState<S>,
    library: &'a F,
    deps: Dependencies,
    /// First fatal fault hit by a nested read. Once set, reads return blank
    /// and the enclosing formula aborts.
    fault: Option<EvalFault>,
}

impl<S: CellDataSource, F: FunctionLibrary> FrameResolver<'_, S, F> {
    fn read(&mut self, cell: CellId) -> Value {
        if self.fault.is_some() {
            return Value::Blank;
        }
        match self.state.evaluate_cell(self.library, cell) {
            Ok((id, value)) => {
                self.deps.add_cell(id);
                value
            }
            Err(fault) => {
                self.fault = Some(fault);
                Value::Blank
            }
        }
    }

    /// Pop `argc` operands and apply `id`. `None` if the stack is too short.
    fn call(&mut self, id: &FunctionId, stack: &mut Vec<Value>, argc: usize, cell: CellId) -> Option<Value> {
        if stack.len() < argc {
            return None;
        }
        let args = stack.split_off(stack.len() - argc);
        let library = self.library;
        Some(library.apply(id, &args, self, cell.row, cell.col).normalized())
    }

    fn malformed(self, cell: CellId) -> Result<(Value, Dependencies), EvalFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        log::warn!("malformed token sequence in {}", cell);
        Ok((Value::Error(ErrorCode::Value), self.deps))
    }
}

impl<S: CellDataSource, F: FunctionLibrary> AreaResolver for FrameResolver<'_, S, F> {
    fn cell(&mut self, area: &CellRange, row: usize, col: usize) -> Value {
        match area.cell_at(row, col) {
            Some(cell) => self.read(cell),
            None => Value::Error(ErrorCode::Ref),
        }
    }

    fn populated(&mut self, area: &CellRange) -> Vec<(CellId, Value)> {
        let mut read = AreaRead { range: *area, cells: Vec::new() };
        let mut values = Vec::new();
        for cell in self.state.source.cells_in_area(area) {
            if self.fault.is_some() {
                break;
            }
            match self.state.evaluate_cell(self.library, cell) {
                Ok((id, value)) => {
                    read.cells.push(id);
                    if !value.is_blank() {
                        values.push((cell, value));
                    }
                }
                Err(fault) => self.fault = Some(fault),
            }
        }
        self.deps.add_area(read);
        values
    }
}
