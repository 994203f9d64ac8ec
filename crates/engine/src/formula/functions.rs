// Built-in spreadsheet functions and operators
//
// Functions receive resolved operand values. Multi-cell areas arrive as lazy
// `Value::Area` references and are read through an `AreaResolver`, so the
// caller learns exactly which cells (or which whole areas) were consulted.

use std::cmp::Ordering;

use crate::cell_id::{CellId, CellRange};
use crate::value::{compare_values, negate, ErrorCode, Value};

use super::token::{FunctionId, Op};

/// Reads cells of an area on behalf of a function, recording the reads as
/// dependencies of the formula being evaluated.
pub trait AreaResolver {
    /// Value of the cell at `(row, col)` relative to the area's top-left
    /// corner. Only that cell becomes a dependency.
    fn cell(&mut self, area: &CellRange, row: usize, col: usize) -> Value;

    /// Every non-blank cell of the area, row-major. The whole area becomes
    /// one dependency, including cells that are currently blank.
    fn populated(&mut self, area: &CellRange) -> Vec<(CellId, Value)>;
}

/// Combines already-resolved operands into a result.
pub trait FunctionLibrary {
    /// `src_row`/`src_col` locate the calling cell, for position-sensitive
    /// behaviour such as implicit intersection.
    fn apply(
        &self,
        id: &FunctionId,
        args: &[Value],
        resolver: &mut dyn AreaResolver,
        src_row: usize,
        src_col: usize,
    ) -> Value;
}

/// Operators plus SUM, AVERAGE, COUNT, MIN, MAX, INDEX, CHOOSE, IF and ABS.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLibrary;

impl FunctionLibrary for StandardLibrary {
    fn apply(
        &self,
        id: &FunctionId,
        args: &[Value],
        resolver: &mut dyn AreaResolver,
        src_row: usize,
        src_col: usize,
    ) -> Value {
        match id {
            FunctionId::Operator(op) => {
                if args.len() != op.arity() {
                    return Value::Error(ErrorCode::Value);
                }
                let operands: Vec<Value> = args
                    .iter()
                    .map(|a| to_scalar(a, resolver, src_row, src_col))
                    .collect();
                apply_operator(*op, &operands)
            }
            FunctionId::Named(name) => {
                let mut call = Call { args, resolver, src_row, src_col };
                match name.as_str() {
                    "SUM" => call.aggregate(|nums| Value::number(nums.iter().sum())),
                    "AVERAGE" => call.aggregate(|nums| {
                        if nums.is_empty() {
                            Value::Error(ErrorCode::Div0)
                        } else {
                            Value::number(nums.iter().sum::<f64>() / nums.len() as f64)
                        }
                    }),
                    "COUNT" => call.count(),
                    "MIN" => call.aggregate(|nums| {
                        Value::number(nums.iter().cloned().reduce(f64::min).unwrap_or(0.0))
                    }),
                    "MAX" => call.aggregate(|nums| {
                        Value::number(nums.iter().cloned().reduce(f64::max).unwrap_or(0.0))
                    }),
                    "INDEX" => call.index(),
                    "CHOOSE" => call.choose(),
                    "IF" => call.if_(),
                    "ABS" => call.abs(),
                    _ => Value::Error(ErrorCode::Name),
                }
            }
        }
    }
}

/// Reduce a multi-cell area to the single cell that lines up with the calling
/// cell: the row of a one-column area or the column of a one-row area.
/// Anything else is `#VALUE!`. A 1x1 area is its only cell.
pub fn implicit_intersection(
    area: &CellRange,
    resolver: &mut dyn AreaResolver,
    src_row: usize,
    src_col: usize,
) -> Value {
    if area.is_single_cell() {
        return resolver.cell(area, 0, 0);
    }
    if area.width() == 1 && (area.first_row..=area.last_row).contains(&src_row) {
        return resolver.cell(area, src_row - area.first_row, 0);
    }
    if area.height() == 1 && (area.first_col..=area.last_col).contains(&src_col) {
        return resolver.cell(area, 0, src_col - area.first_col);
    }
    Value::Error(ErrorCode::Value)
}

fn to_scalar(value: &Value, resolver: &mut dyn AreaResolver, src_row: usize, src_col: usize) -> Value {
    match value {
        Value::Area(area) => implicit_intersection(area, resolver, src_row, src_col),
        other => other.clone(),
    }
}

fn apply_operator(op: Op, operands: &[Value]) -> Value {
    if op.is_comparison() {
        let ordering = match compare_values(&operands[0], &operands[1]) {
            Ok(o) => o,
            Err(e) => return Value::Error(e),
        };
        let result = match op {
            Op::Eq => ordering == Ordering::Equal,
            Op::NotEq => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::LtEq => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        return Value::Boolean(result);
    }

    match op {
        Op::Concat => {
            let joined = operands[0]
                .to_text()
                .and_then(|l| operands[1].to_text().map(|r| l + &r));
            match joined {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Error(e),
            }
        }
        Op::Plus => operands[0].clone(),
        Op::Neg => match operands[0].to_number() {
            Ok(n) => Value::number(negate(n)),
            Err(e) => Value::Error(e),
        },
        Op::Percent => match operands[0].to_number() {
            Ok(n) => finite(n / 100.0),
            Err(e) => Value::Error(e),
        },
        _ => {
            let (l, r) = match (operands[0].to_number(), operands[1].to_number()) {
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
                (Ok(l), Ok(r)) => (l, r),
            };
            match op {
                Op::Add => finite(l + r),
                Op::Sub => finite(l - r),
                Op::Mul => finite(l * r),
                Op::Div if r == 0.0 => Value::Error(ErrorCode::Div0),
                Op::Div => finite(l / r),
                Op::Pow if l == 0.0 && r == 0.0 => Value::Error(ErrorCode::Num),
                Op::Pow if l == 0.0 && r < 0.0 => Value::Error(ErrorCode::Div0),
                _ => finite(l.powf(r)),
            }
        }
    }
}

fn finite(n: f64) -> Value {
    if n.is_finite() {
        Value::number(n)
    } else {
        Value::Error(ErrorCode::Num)
    }
}

struct Call<'a, 'r> {
    args: &'a [Value],
    resolver: &'r mut dyn AreaResolver,
    src_row: usize,
    src_col: usize,
}

impl<'a, 'r> Call<'a, 'r> {
    fn scalar(&mut self, index: usize) -> Value {
        let args = self.args;
        match args.get(index) {
            Some(v) => to_scalar(v, self.resolver, self.src_row, self.src_col),
            None => Value::Blank,
        }
    }

    /// Numbers from all arguments. Area cells holding text, booleans or
    /// blanks are skipped; direct text must be numeric. First error wins.
    fn numbers(&mut self, strict_text: bool) -> Result<Vec<f64>, ErrorCode> {
        let mut out = Vec::new();
        for arg in self.args {
            match arg {
                Value::Area(area) => {
                    for (_, v) in self.resolver.populated(area) {
                        match v {
                            Value::Number(n) => out.push(n),
                            Value::Error(e) => return Err(e),
                            _ => {}
                        }
                    }
                }
                Value::Number(n) => out.push(*n),
                Value::Boolean(b) => out.push(if *b { 1.0 } else { 0.0 }),
                Value::Error(e) => return Err(*e),
                Value::Text(s) => match s.trim().parse::<f64>() {
                    Ok(n) => out.push(n),
                    Err(_) if strict_text => return Err(ErrorCode::Value),
                    Err(_) => {}
                },
                Value::Blank => {}
            }
        }
        Ok(out)
    }

    fn aggregate(&mut self, f: impl FnOnce(&[f64]) -> Value) -> Value {
        if self.args.is_empty() {
            return Value::Error(ErrorCode::Value);
        }
        match self.numbers(true) {
            Ok(nums) => f(&nums),
            Err(e) => Value::Error(e),
        }
    }

    /// COUNT never fails: errors and non-numeric text are simply not counted.
    fn count(&mut self) -> Value {
        let mut total = 0usize;
        for arg in self.args {
            total += match arg {
                Value::Area(area) => self
                    .resolver
                    .populated(area)
                    .iter()
                    .filter(|(_, v)| matches!(v, Value::Number(_)))
                    .count(),
                Value::Number(_) | Value::Boolean(_) => 1,
                Value::Text(s) if s.trim().parse::<f64>().is_ok() => 1,
                _ => 0,
            };
        }
        Value::number(total as f64)
    }

    fn index_arg(&mut self, index: usize) -> Result<usize, ErrorCode> {
        let n = self.scalar(index).to_number()?;
        if n < 0.0 {
            return Err(ErrorCode::Value);
        }
        Ok(n.trunc() as usize)
    }

    /// INDEX(area, row, [col]), 1-based. A zero row or column selects the
    /// whole column or row as a sub-area. A one-row area given only a second
    /// argument treats it as the column.
    fn index(&mut self) -> Value {
        if self.args.len() < 2 || self.args.len() > 3 {
            return Value::Error(ErrorCode::Value);
        }
        let area = match &self.args[0] {
            Value::Area(area) => *area,
            Value::Error(e) => return Value::Error(*e),
            scalar => {
                // INDEX(5, 1) is 5
                let scalar = scalar.clone();
                return match (self.index_arg(1), self.index_arg(2)) {
                    (Err(e), _) | (_, Err(e)) => Value::Error(e),
                    (Ok(r), Ok(c)) if r <= 1 && c <= 1 => scalar,
                    _ => Value::Error(ErrorCode::Ref),
                };
            }
        };

        let (mut row, mut col) = match (self.index_arg(1), self.index_arg(2)) {
            (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            (Ok(r), Ok(c)) => (r, c),
        };
        if self.args.len() == 2 && area.height() == 1 && area.width() > 1 {
            col = row;
            row = 1;
        }
        if row > area.height() || col > area.width() {
            return Value::Error(ErrorCode::Ref);
        }

        match (row, col) {
            (0, 0) => Value::Area(area),
            (0, c) => sub_area(&area, area.first_row, area.last_row, area.first_col + c - 1, area.first_col + c - 1)
                .map_or_else(|| self.resolver.cell(&area, 0, c - 1), Value::Area),
            (r, 0) => sub_area(&area, area.first_row + r - 1, area.first_row + r - 1, area.first_col, area.last_col)
                .map_or_else(|| self.resolver.cell(&area, r - 1, 0), Value::Area),
            (r, c) => self.resolver.cell(&area, r - 1, c - 1),
        }
    }

    /// CHOOSE(n, v1, v2, ...). The chosen argument is returned as-is, so an
    /// area stays lazy.
    fn choose(&mut self) -> Value {
        if self.args.len() < 2 {
            return Value::Error(ErrorCode::Value);
        }
        let n = match self.scalar(0).to_number() {
            Ok(n) => n.trunc(),
            Err(e) => return Value::Error(e),
        };
        if n < 1.0 || n as usize >= self.args.len() {
            return Value::Error(ErrorCode::Value);
        }
        self.args[n as usize].clone()
    }

    fn if_(&mut self) -> Value {
        if self.args.len() < 2 || self.args.len() > 3 {
            return Value::Error(ErrorCode::Value);
        }
        match self.scalar(0).to_bool() {
            Ok(true) => self.args[1].clone(),
            Ok(false) => self.args.get(2).cloned().unwrap_or(Value::Boolean(false)),
            Err(e) => Value::Error(e),
        }
    }

    fn abs(&mut self) -> Value {
        if self.args.len() != 1 {
            return Value::Error(ErrorCode::Value);
        }
        match self.scalar(0).to_number() {
            Ok(n) => Value::number(n.abs()),
            Err(e) => Value::Error(e),
        }
    }
}

/// The sub-area of `area` with the given absolute bounds, or `None` when it
/// is a single cell (which the caller reads directly).
fn sub_area(area: &CellRange, r0: usize, r1: usize, c0: usize, c1: usize) -> Option<CellRange> {
    let sub = CellRange::new(area.sheet, r0, c0, r1, c1);
    if sub.is_single_cell() {
        None
    } else {
        Some(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SheetId;
    use rustc_hash::FxHashMap;

    /// Grid-backed resolver that records which reads happened.
    #[derive(Default)]
    struct GridResolver {
        cells: FxHashMap<CellId, Value>,
        single_reads: Vec<CellId>,
        area_reads: Vec<CellRange>,
    }

    impl GridResolver {
        fn with(cells: &[(&str, Value)]) -> Self {
            let mut resolver = GridResolver::default();
            for (a1, v) in cells {
                resolver.cells.insert(CellId::parse_a1(sheet(), a1).unwrap(), v.clone());
            }
            resolver
        }
    }

    impl AreaResolver for GridResolver {
        fn cell(&mut self, area: &CellRange, row: usize, col: usize) -> Value {
            let Some(id) = area.cell_at(row, col) else {
                return Value::Error(ErrorCode::Ref);
            };
            self.single_reads.push(id);
            self.cells.get(&id).cloned().unwrap_or(Value::Blank)
        }

        fn populated(&mut self, area: &CellRange) -> Vec<(CellId, Value)> {
            self.area_reads.push(*area);
            area.cells()
                .filter_map(|id| self.cells.get(&id).map(|v| (id, v.clone())))
                .collect()
        }
    }

    fn sheet() -> SheetId {
        SheetId::from_raw(1)
    }

    fn area(a1: &str) -> Value {
        Value::Area(CellRange::parse_a1(sheet(), a1).unwrap())
    }

    fn call(name: &str, args: &[Value], resolver: &mut GridResolver) -> Value {
        StandardLibrary.apply(&FunctionId::Named(name.to_string()), args, resolver, 0, 0)
    }

    fn op(op: Op, args: &[Value]) -> Value {
        let mut resolver = GridResolver::default();
        StandardLibrary.apply(&FunctionId::Operator(op), args, &mut resolver, 0, 0)
    }

    #[test]
    fn test_sum_skips_text_in_areas() {
        let mut r = GridResolver::with(&[
            ("A1", Value::Number(1.0)),
            ("A2", Value::text("x")),
            ("A3", Value::Boolean(true)),
            ("A4", Value::Number(2.5)),
        ]);
        assert_eq!(call("SUM", &[area("A1:A5")], &mut r), Value::Number(3.5));
        assert_eq!(r.area_reads.len(), 1);
        assert!(r.single_reads.is_empty());
    }

    #[test]
    fn test_sum_error_propagates() {
        let mut r = GridResolver::with(&[("A1", Value::Number(1.0)), ("A2", Value::Error(ErrorCode::NA))]);
        assert_eq!(call("SUM", &[area("A1:A2")], &mut r), Value::Error(ErrorCode::NA));
        assert_eq!(call("SUM", &[Value::text("abc")], &mut r), Value::Error(ErrorCode::Value));
    }

    #[test]
    fn test_average_count_min_max() {
        let mut r = GridResolver::with(&[("B1", Value::Number(4.0)), ("B2", Value::Number(-2.0))]);
        assert_eq!(call("AVERAGE", &[area("B1:B3")], &mut r), Value::Number(1.0));
        assert_eq!(call("COUNT", &[area("B1:B3"), Value::text("n")], &mut r), Value::Number(2.0));
        assert_eq!(call("MIN", &[area("B1:B3")], &mut r), Value::Number(-2.0));
        assert_eq!(call("MAX", &[area("B1:B3"), Value::Number(7.0)], &mut r), Value::Number(7.0));
        assert_eq!(call("MAX", &[area("C1:C3")], &mut r), Value::Number(0.0));
        assert_eq!(call("AVERAGE", &[area("C1:C3")], &mut r), Value::Error(ErrorCode::Div0));
    }

    #[test]
    fn test_index_reads_single_cell() {
        let mut r = GridResolver::with(&[("C1", Value::Number(5.0)), ("C2", Value::Number(6.0))]);
        assert_eq!(call("INDEX", &[area("C1:C2"), Value::Number(2.0)], &mut r), Value::Number(6.0));
        assert!(r.area_reads.is_empty());
        assert_eq!(r.single_reads, vec![CellId::parse_a1(sheet(), "C2").unwrap()]);
    }

    #[test]
    fn test_index_single_row_uses_column() {
        let mut r = GridResolver::with(&[("B1", Value::Number(1.0)), ("C1", Value::Number(2.0))]);
        assert_eq!(call("INDEX", &[area("B1:C1"), Value::Number(2.0)], &mut r), Value::Number(2.0));
    }

    #[test]
    fn test_index_zero_returns_sub_area() {
        let mut r = GridResolver::default();
        assert_eq!(
            call("INDEX", &[area("A1:C3"), Value::Number(0.0), Value::Number(2.0)], &mut r),
            area("B1:B3")
        );
        assert_eq!(
            call("INDEX", &[area("A1:C3"), Value::Number(3.0), Value::Number(0.0)], &mut r),
            area("A3:C3")
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let mut r = GridResolver::default();
        assert_eq!(call("INDEX", &[area("A1:A3"), Value::Number(4.0)], &mut r), Value::Error(ErrorCode::Ref));
        assert_eq!(call("INDEX", &[area("A1:A3"), Value::Number(-1.0)], &mut r), Value::Error(ErrorCode::Value));
        assert_eq!(call("INDEX", &[Value::Number(5.0), Value::Number(1.0)], &mut r), Value::Number(5.0));
    }

    #[test]
    fn test_choose_and_if() {
        let mut r = GridResolver::default();
        let args = [Value::Number(2.0), Value::text("a"), area("D1:D4")];
        assert_eq!(call("CHOOSE", &args, &mut r), area("D1:D4"));
        assert_eq!(call("CHOOSE", &[Value::Number(3.0), Value::Blank], &mut r), Value::Error(ErrorCode::Value));
        assert_eq!(call("IF", &[Value::Boolean(false), Value::Number(1.0)], &mut r), Value::Boolean(false));
        assert_eq!(
            call("IF", &[Value::Number(1.0), Value::Number(1.0), Value::Number(2.0)], &mut r),
            Value::Number(1.0)
        );
        assert_eq!(call("ABS", &[Value::Number(-3.0)], &mut r), Value::Number(3.0));
    }

    #[test]
    fn test_unknown_function_is_name_error() {
        let mut r = GridResolver::default();
        assert_eq!(call("VLOOKUP", &[Value::Number(1.0)], &mut r), Value::Error(ErrorCode::Name));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(op(Op::Div, &[Value::Number(1.0), Value::Number(0.0)]), Value::Error(ErrorCode::Div0));
        assert_eq!(op(Op::Pow, &[Value::Number(0.0), Value::Number(0.0)]), Value::Error(ErrorCode::Num));
        assert_eq!(op(Op::Mul, &[Value::Number(1e308), Value::Number(10.0)]), Value::Error(ErrorCode::Num));
        assert_eq!(op(Op::Add, &[Value::text("x"), Value::Number(1.0)]), Value::Error(ErrorCode::Value));
        assert_eq!(
            op(Op::Sub, &[Value::Error(ErrorCode::Ref), Value::Error(ErrorCode::NA)]),
            Value::Error(ErrorCode::Ref)
        );
        assert_eq!(op(Op::Add, &[Value::Blank, Value::text(" 2 ")]), Value::Number(2.0));
    }

    #[test]
    fn test_negation_normalises_zero() {
        match op(Op::Neg, &[Value::Number(0.0)]) {
            Value::Number(n) => assert_eq!(n.to_bits(), 0.0f64.to_bits()),
            other => panic!("unexpected {:?}", other),
        }
        match op(Op::Mul, &[Value::Number(-1.0), Value::Number(0.0)]) {
            Value::Number(n) => assert_eq!(n.to_bits(), 0.0f64.to_bits()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(op(Op::Eq, &[Value::text("ABC"), Value::text("abc")]), Value::Boolean(true));
        assert_eq!(op(Op::Gt, &[Value::Boolean(false), Value::Number(100.0)]), Value::Boolean(true));
        assert_eq!(op(Op::Lt, &[Value::text("5"), Value::Number(1.0)]), Value::Boolean(true));
        assert_eq!(op(Op::Eq, &[Value::Blank, Value::text("")]), Value::Boolean(true));
        assert_eq!(op(Op::NotEq, &[Value::Blank, Value::Number(0.0)]), Value::Boolean(false));
        assert_eq!(op(Op::GtEq, &[Value::Error(ErrorCode::Div0), Value::Blank]), Value::Error(ErrorCode::Div0));
    }

    #[test]
    fn test_concat_and_percent() {
        assert_eq!(op(Op::Concat, &[Value::text("a"), Value::Number(1.5)]), Value::text("a1.5"));
        assert_eq!(op(Op::Percent, &[Value::Number(50.0)]), Value::Number(0.5));
    }

    #[test]
    fn test_implicit_intersection() {
        let mut r = GridResolver::with(&[("B2", Value::Number(9.0)), ("D1", Value::Number(4.0))]);
        let column = CellRange::parse_a1(sheet(), "B1:B3").unwrap();
        let row = CellRange::parse_a1(sheet(), "C1:E1").unwrap();
        let block = CellRange::parse_a1(sheet(), "B1:C3").unwrap();
        assert_eq!(implicit_intersection(&column, &mut r, 1, 0), Value::Number(9.0));
        assert_eq!(implicit_intersection(&column, &mut r, 5, 0), Value::Error(ErrorCode::Value));
        assert_eq!(implicit_intersection(&row, &mut r, 7, 3), Value::Number(4.0));
        assert_eq!(implicit_intersection(&block, &mut r, 1, 1), Value::Error(ErrorCode::Value));
    }

    #[test]
    fn test_operator_intersects_area_operand() {
        let mut r = GridResolver::with(&[("A2", Value::Number(3.0))]);
        let result = StandardLibrary.apply(
            &FunctionId::Operator(Op::Add),
            &[area("A1:A3"), Value::Number(1.0)],
            &mut r,
            1,
            4,
        );
        assert_eq!(result, Value::Number(4.0));
    }
}
