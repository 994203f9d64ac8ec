//! Evaluation cache: memoized cell values plus the dependency graph that was
//! used to produce them.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B read A"  (A ∈ deps[B], B ∈ consumers[A])
//! ```
//!
//! Entries live in an arena addressed by [`EntryId`] and are never removed.
//! Location lookup is sheet-scoped and sparse, so registering a cell costs the
//! same whether the workbook has one sheet or thousands.
//!
//! Besides one entry per cell, the cache keeps one *area node* per
//! (consumer, rectangle) pair for aggregate reads such as `SUM(D1:E2)`. The
//! area node depends on the populated cells of the rectangle and the consumer
//! depends on the area node, so an area costs the consumer a single edge.
//! Area nodes also watch the blank cells of their rectangle: when one of them
//! gains content the consumer is invalidated.
//!
//! # Invariants
//!
//! 1. **Mutual inverse:** `b ∈ deps[a]` iff `a ∈ consumers[b]`.
//! 2. **Atomic replacement:** `set_value` swaps a dependency set wholesale.
//! 3. **Freshness:** a present value was computed from the current values of
//!    its dependencies. Invalidation clears values but keeps edges; edges are
//!    replaced by the next `set_value`.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::{CellId, CellRange};
use crate::error::EvalFault;
use crate::listener::{ContentKind, EvaluationListener, NoopListener};
use crate::sheet::SheetId;
use crate::value::Value;

/// Stable handle to a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// An aggregate read of a rectangle: the populated cells that were read.
/// Blank cells of the rectangle are watched implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaRead {
    pub range: CellRange,
    pub cells: Vec<EntryId>,
}

/// Working dependency set collected while evaluating one formula.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    cells: FxHashSet<EntryId>,
    areas: Vec<AreaRead>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell(&mut self, id: EntryId) {
        self.cells.insert(id);
    }

    /// Record an aggregate read. Reading the same rectangle twice in one
    /// formula yields one area edge.
    pub fn add_area(&mut self, read: AreaRead) {
        match self.areas.iter_mut().find(|a| a.range == read.range) {
            Some(existing) => {
                for id in read.cells {
                    if !existing.cells.contains(&id) {
                        existing.cells.push(id);
                    }
                }
            }
            None => self.areas.push(read),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.areas.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryKind {
    Cell(CellId),
    Area { range: CellRange, consumer: EntryId },
}

#[derive(Debug)]
struct CacheEntry {
    kind: EntryKind,
    /// `None` = stale or never computed
    value: Option<Value>,
    content: ContentKind,
    dependencies: FxHashSet<EntryId>,
    consumers: FxHashSet<EntryId>,
}

impl CacheEntry {
    fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            value: None,
            content: ContentKind::Blank,
            dependencies: FxHashSet::default(),
            consumers: FxHashSet::default(),
        }
    }

    fn is_area(&self) -> bool {
        matches!(self.kind, EntryKind::Area { .. })
    }
}

pub struct EvaluationCache {
    entries: Vec<CacheEntry>,
    /// sheet -> (row, col) -> cell entry
    cells: FxHashMap<SheetId, FxHashMap<(usize, usize), EntryId>>,
    /// (consumer, rectangle) -> area node
    areas: FxHashMap<(EntryId, CellRange), EntryId>,
    /// sheet -> area nodes whose rectangle lies on that sheet
    blank_watchers: FxHashMap<SheetId, FxHashSet<EntryId>>,
    listener: Box<dyn EvaluationListener>,
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::with_listener(Box::new(NoopListener))
    }

    pub fn with_listener(listener: Box<dyn EvaluationListener>) -> Self {
        Self {
            entries: Vec::new(),
            cells: FxHashMap::default(),
            areas: FxHashMap::default(),
            blank_watchers: FxHashMap::default(),
            listener,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn EvaluationListener>) {
        self.listener = listener;
    }

    pub fn listener_mut(&mut self) -> &mut dyn EvaluationListener {
        self.listener.as_mut()
    }

    /// Number of cell entries (area nodes excluded).
    pub fn cell_count(&self) -> usize {
        self.cells.values().map(|m| m.len()).sum()
    }

    // -------------------------------------------------------------------------
    // Entry access
    // -------------------------------------------------------------------------

    /// Existing entry for `cell`, or a new empty one.
    pub fn get_or_create(&mut self, cell: CellId) -> EntryId {
        if let Some(id) = self.lookup(cell) {
            return id;
        }
        let id = self.push_entry(EntryKind::Cell(cell));
        self.cells.entry(cell.sheet).or_default().insert((cell.row, cell.col), id);
        id
    }

    pub fn lookup(&self, cell: CellId) -> Option<EntryId> {
        self.cells.get(&cell.sheet)?.get(&(cell.row, cell.col)).copied()
    }

    pub fn value(&self, id: EntryId) -> Option<&Value> {
        self.entries[id.index()].value.as_ref()
    }

    /// Cached value of `cell`, if any.
    pub fn cached(&self, cell: CellId) -> Option<&Value> {
        self.lookup(cell).and_then(|id| self.value(id))
    }

    pub fn content(&self, id: EntryId) -> ContentKind {
        self.entries[id.index()].content
    }

    pub fn set_content(&mut self, id: EntryId, content: ContentKind) {
        self.entries[id.index()].content = content;
    }

    /// The cell an entry belongs to. Area nodes have none.
    pub fn cell_of(&self, id: EntryId) -> Option<CellId> {
        match self.entries[id.index()].kind {
            EntryKind::Cell(cell) => Some(cell),
            EntryKind::Area { .. } => None,
        }
    }

    /// Cells `cell` read during its last evaluation, areas flattened, sorted.
    pub fn dependency_cells(&self, cell: CellId) -> Vec<CellId> {
        let Some(id) = self.lookup(cell) else {
            return Vec::new();
        };
        let mut out = FxHashSet::default();
        for dep in &self.entries[id.index()].dependencies {
            let entry = &self.entries[dep.index()];
            match entry.kind {
                EntryKind::Cell(c) => {
                    out.insert(c);
                }
                EntryKind::Area { .. } => {
                    out.extend(entry.dependencies.iter().filter_map(|d| self.cell_of(*d)));
                }
            }
        }
        let mut out: Vec<CellId> = out.into_iter().collect();
        out.sort();
        out
    }

    /// Rectangles `cell` read as aggregates during its last evaluation.
    pub fn dependency_areas(&self, cell: CellId) -> Vec<CellRange> {
        let Some(id) = self.lookup(cell) else {
            return Vec::new();
        };
        let mut out: Vec<CellRange> = self.entries[id.index()]
            .dependencies
            .iter()
            .filter_map(|d| match self.entries[d.index()].kind {
                EntryKind::Area { range, .. } => Some(range),
                EntryKind::Cell(_) => None,
            })
            .collect();
        out.sort();
        out
    }

    /// Cells that read `cell` directly or through an area, sorted.
    pub fn consumer_cells(&self, cell: CellId) -> Vec<CellId> {
        let Some(id) = self.lookup(cell) else {
            return Vec::new();
        };
        let mut visited = FxHashSet::default();
        visited.insert(id);
        let mut out = Vec::new();
        self.collect_consumers(id, &mut visited, &mut out);
        let mut cells: Vec<CellId> = out.into_iter().filter_map(|c| self.cell_of(c)).collect();
        cells.sort();
        cells
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Store a freshly computed value and replace the entry's dependencies.
    ///
    /// This is the only path that installs edges. Each `AreaRead` becomes (or
    /// reuses) the area node for this consumer and rectangle; area nodes the
    /// consumer no longer reads are detached.
    pub fn set_value(&mut self, id: EntryId, value: Value, deps: Dependencies) {
        let Dependencies { cells, areas } = deps;
        let mut new_deps = cells;

        for read in areas {
            let area_id = self.area_node(id, read.range);
            self.replace_edges(area_id, read.cells.into_iter().collect());
            self.watch(area_id, read.range.sheet, true);
            new_deps.insert(area_id);
        }

        self.detach_areas(id, &new_deps);
        self.replace_edges(id, new_deps);
        self.entries[id.index()].value = Some(value);
    }

    /// A plain cell's stored value may have changed.
    ///
    /// Returns true if it really changed, in which case the entry holds the
    /// new value and every transitive consumer has been cleared. Setting a
    /// value bit-identical to the cached one is a no-op.
    pub fn update_plain_value(&mut self, cell: CellId, value: Value) -> bool {
        let id = self.get_or_create(cell);
        let value = value.normalized();
        let entry = &self.entries[id.index()];
        let was = entry.content;

        let changed = match (was, entry.value.as_ref()) {
            (ContentKind::Blank, _) => !value.is_blank(),
            (ContentKind::Value, Some(old)) => !old.is_identical(&value),
            (ContentKind::Value, None) => true,
            (ContentKind::Formula, _) => true,
        };
        if !changed {
            return false;
        }

        if was == ContentKind::Formula {
            let none = FxHashSet::default();
            self.detach_areas(id, &none);
            self.replace_edges(id, none);
        }

        let now = if value.is_blank() { ContentKind::Blank } else { ContentKind::Value };
        let entry = &mut self.entries[id.index()];
        let old = entry.value.replace(value);
        entry.content = now;

        let from_blank = was == ContentKind::Blank;
        if from_blank {
            self.listener.on_change_from_blank_value(cell, now);
        } else {
            self.listener.on_clear_cached_value(cell, old.as_ref());
        }
        self.invalidate_consumers(id, from_blank);
        true
    }

    /// A cell now holds a (new) formula. Its cached value is dropped and its
    /// consumers are cleared; its dependencies stay until it is re-evaluated.
    pub fn notify_formula_changed(&mut self, cell: CellId) {
        let id = self.get_or_create(cell);
        let entry = &mut self.entries[id.index()];
        let was = entry.content;
        entry.content = ContentKind::Formula;
        let old = entry.value.take();

        let from_blank = was == ContentKind::Blank;
        if from_blank {
            self.listener.on_change_from_blank_value(cell, ContentKind::Formula);
        } else {
            self.listener.on_clear_cached_value(cell, old.as_ref());
        }
        self.invalidate_consumers(id, from_blank);
    }

    /// Drop every cached value. Edges and content kinds are kept.
    pub fn clear_all_cached_result_values(&mut self) {
        let mut cleared = 0usize;
        for entry in &mut self.entries {
            if entry.value.take().is_some() {
                cleared += 1;
            }
        }
        log::debug!("cleared {} cached values ({} entries)", cleared, self.entries.len());
    }

    // -------------------------------------------------------------------------
    // Invalidation wave
    // -------------------------------------------------------------------------

    /// Clear every transitive consumer of `origin`, breadth-first by depth.
    ///
    /// Each wave is sorted by location. A node is visited at most once, which
    /// bounds the work on diamonds and cycles. Area nodes are transparent: they
    /// add no depth. With `from_blank`, area nodes whose rectangle covers
    /// the origin cell also seed depth 1.
    fn invalidate_consumers(&mut self, origin: EntryId, from_blank: bool) {
        let mut visited = FxHashSet::default();
        visited.insert(origin);

        let mut frontier = Vec::new();
        self.collect_consumers(origin, &mut visited, &mut frontier);
        if from_blank {
            if let Some(cell) = self.cell_of(origin) {
                for area_id in self.watchers_covering(cell) {
                    if visited.insert(area_id) {
                        self.collect_consumers(area_id, &mut visited, &mut frontier);
                    }
                }
            }
        }

        let mut depth = 1;
        let mut cleared = 0usize;
        while !frontier.is_empty() {
            frontier.sort_by_key(|id| self.sort_key(*id));
            let mut next = Vec::new();
            for id in frontier {
                if let Some(old) = self.entries[id.index()].value.take() {
                    cleared += 1;
                    if let Some(cell) = self.cell_of(id) {
                        self.listener.on_clear_dependent_cached_value(cell, depth, &old);
                    }
                }
                self.collect_consumers(id, &mut visited, &mut next);
            }
            frontier = next;
            depth += 1;
        }

        log::debug!(
            "invalidated from {}: {} cleared over {} waves",
            self.describe(origin),
            cleared,
            depth - 1
        );
    }

    /// Push unvisited consumers of `id`, looking through area nodes.
    fn collect_consumers(&self, id: EntryId, visited: &mut FxHashSet<EntryId>, out: &mut Vec<EntryId>) {
        for &consumer in &self.entries[id.index()].consumers {
            if !visited.insert(consumer) {
                continue;
            }
            if self.entries[consumer.index()].is_area() {
                self.collect_consumers(consumer, visited, out);
            } else {
                out.push(consumer);
            }
        }
    }

    fn watchers_covering(&self, cell: CellId) -> Vec<EntryId> {
        let Some(watchers) = self.blank_watchers.get(&cell.sheet) else {
            return Vec::new();
        };
        let mut covering: Vec<EntryId> = watchers
            .iter()
            .filter(|id| match self.entries[id.index()].kind {
                EntryKind::Area { range, .. } => range.contains(cell),
                EntryKind::Cell(_) => false,
            })
            .copied()
            .collect();
        covering.sort();
        covering
    }

    fn sort_key(&self, id: EntryId) -> (CellId, EntryId) {
        match self.entries[id.index()].kind {
            EntryKind::Cell(cell) => (cell, id),
            EntryKind::Area { range, .. } => (range.top_left(), id),
        }
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Replace all dependencies of `id` atomically, keeping consumer sets
    /// the exact inverse.
    fn replace_edges(&mut self, id: EntryId, new_deps: FxHashSet<EntryId>) {
        let old = std::mem::take(&mut self.entries[id.index()].dependencies);
        for dep in &old {
            self.entries[dep.index()].consumers.remove(&id);
        }
        for dep in &new_deps {
            self.entries[dep.index()].consumers.insert(id);
        }
        self.entries[id.index()].dependencies = new_deps;
    }

    /// Empty and unwatch the area nodes of `id` that are not in `keep`.
    fn detach_areas(&mut self, id: EntryId, keep: &FxHashSet<EntryId>) {
        let dropped: Vec<(EntryId, SheetId)> = self.entries[id.index()]
            .dependencies
            .iter()
            .filter(|d| !keep.contains(d))
            .filter_map(|d| match self.entries[d.index()].kind {
                EntryKind::Area { range, .. } => Some((*d, range.sheet)),
                EntryKind::Cell(_) => None,
            })
            .collect();
        for (area_id, sheet) in dropped {
            self.replace_edges(area_id, FxHashSet::default());
            self.watch(area_id, sheet, false);
        }
    }

    fn area_node(&mut self, consumer: EntryId, range: CellRange) -> EntryId {
        if let Some(id) = self.areas.get(&(consumer, range)) {
            return *id;
        }
        let id = self.push_entry(EntryKind::Area { range, consumer });
        self.areas.insert((consumer, range), id);
        id
    }

    fn watch(&mut self, area_id: EntryId, sheet: SheetId, on: bool) {
        if on {
            self.blank_watchers.entry(sheet).or_default().insert(area_id);
        } else if let Some(set) = self.blank_watchers.get_mut(&sheet) {
            set.remove(&area_id);
            if set.is_empty() {
                self.blank_watchers.remove(&sheet);
            }
        }
    }

    fn push_entry(&mut self, kind: EntryKind) -> EntryId {
        let Ok(raw) = u32::try_from(self.entries.len()) else {
            log::error!("evaluation cache is full ({} entries)", self.entries.len());
            panic!("evaluation cache is full");
        };
        self.entries.push(CacheEntry::new(kind));
        EntryId(raw)
    }

    fn describe(&self, id: EntryId) -> String {
        match self.entries.get(id.index()).map(|e| e.kind) {
            Some(EntryKind::Cell(cell)) => cell.to_string(),
            Some(EntryKind::Area { range, consumer }) => {
                format!("{} (area of entry #{})", range, consumer.0)
            }
            None => format!("entry #{}", id.0),
        }
    }

    // -------------------------------------------------------------------------
    // Consistency
    // -------------------------------------------------------------------------

    /// Verify the mutual-inverse invariant and that every edge points at an
    /// entry the cache owns.
    pub fn check_consistency(&self) -> Result<(), EvalFault> {
        let owned = |id: &EntryId| id.index() < self.entries.len();
        for (index, entry) in self.entries.iter().enumerate() {
            let this = EntryId(index as u32);
            for dep in &entry.dependencies {
                if !owned(dep) {
                    return Err(EvalFault::DanglingEdge { from: self.describe(this), to: dep.0 });
                }
                if !self.entries[dep.index()].consumers.contains(&this) {
                    return Err(EvalFault::AsymmetricEdge {
                        consumer: self.describe(this),
                        producer: self.describe(*dep),
                    });
                }
            }
            for consumer in &entry.consumers {
                if !owned(consumer) {
                    return Err(EvalFault::DanglingEdge { from: self.describe(this), to: consumer.0 });
                }
                if !self.entries[consumer.index()].dependencies.contains(&this) {
                    return Err(EvalFault::AsymmetricEdge {
                        consumer: self.describe(*consumer),
                        producer: self.describe(this),
                    });
                }
            }
        }
        Ok(())
    }

    /// Panic (after logging) if the cache graph is inconsistent.
    pub fn assert_consistent(&self) {
        if let Err(fault) = self.check_consistency() {
            log::error!("evaluation cache corrupted: {}", fault);
            panic!("evaluation cache corrupted: {}", fault);
        }
    }
}

impl std::fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationCache")
            .field("entries", &self.entries.len())
            .field("cells", &self.cell_count())
            .field("areas", &self.areas.len())
            .finish()
    }
}
