// Cell values: the scalar primitive shared by the cache, evaluator and
// function library.

use std::cmp::Ordering;

use crate::cell_id::CellRange;

// =============================================================================
// ErrorCode: formula-level errors (first-class values, never Result::Err)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    /// Circular reference detected during evaluation
    Circular,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Null => "#NULL!",
            ErrorCode::Div0 => "#DIV/0!",
            ErrorCode::Value => "#VALUE!",
            ErrorCode::Ref => "#REF!",
            ErrorCode::Name => "#NAME?",
            ErrorCode::Num => "#NUM!",
            ErrorCode::NA => "#N/A",
            ErrorCode::Circular => "#CIRC!",
        }
    }

    /// Parse an error literal such as `#DIV/0!` (case-insensitive).
    pub fn from_text(text: &str) -> Option<Self> {
        let upper = text.to_ascii_uppercase();
        [
            ErrorCode::Null,
            ErrorCode::Div0,
            ErrorCode::Value,
            ErrorCode::Ref,
            ErrorCode::Name,
            ErrorCode::Num,
            ErrorCode::NA,
            ErrorCode::Circular,
        ]
        .into_iter()
        .find(|code| code.as_str() == upper)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Value
// =============================================================================

/// A cell value.
///
/// `Area` is a lazy rectangular reference: its cells are read on demand
/// through [`AreaResolver`](crate::formula::functions::AreaResolver) so that
/// only the cells a function actually consults become dependencies.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Blank,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorCode),
    Area(CellRange),
}

impl Value {
    /// Build a number, folding negative zero to positive zero.
    #[inline]
    pub fn number(n: f64) -> Self {
        Value::Number(normalize_zero(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Fold negative zero in a value that came from outside the engine.
    pub fn normalized(self) -> Self {
        match self {
            Value::Number(n) => Value::number(n),
            other => other,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    /// Type- and bit-exact equality. Unlike `==`, distinguishes `-0.0` from
    /// `+0.0` and treats identical NaN payloads as equal.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub fn to_number(&self) -> Result<f64, ErrorCode> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Blank => Ok(0.0),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorCode::Value),
            Value::Error(e) => Err(*e),
            Value::Area(_) => Err(ErrorCode::Value),
        }
    }

    pub fn to_text(&self) -> Result<String, ErrorCode> {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Ok(format!("{}", *n as i64))
                } else {
                    Ok(format!("{}", n))
                }
            }
            Value::Text(s) => Ok(s.clone()),
            Value::Boolean(b) => Ok(if *b { "TRUE".to_string() } else { "FALSE".to_string() }),
            Value::Blank => Ok(String::new()),
            Value::Error(e) => Err(*e),
            Value::Area(_) => Err(ErrorCode::Value),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ErrorCode> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Blank => Ok(false),
            Value::Text(s) => {
                let upper = s.trim().to_uppercase();
                if upper == "TRUE" {
                    Ok(true)
                } else if upper == "FALSE" {
                    Ok(false)
                } else {
                    Err(ErrorCode::Value)
                }
            }
            Value::Error(e) => Err(*e),
            Value::Area(_) => Err(ErrorCode::Value),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ErrorCode> for Value {
    fn from(e: ErrorCode) -> Self {
        Value::Error(e)
    }
}

#[inline]
pub fn normalize_zero(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

/// Unary negation with zero-sign normalisation.
#[inline]
pub fn negate(n: f64) -> f64 {
    normalize_zero(-n)
}

// =============================================================================
// Comparison
// =============================================================================

/// Type-aware comparison used by the comparison operators.
///
/// Class precedence is Boolean > Number > Text regardless of magnitude.
/// Blank takes the class of the other operand (0, "" or FALSE), and two
/// blanks are equal. Text compares case-insensitively. An error operand is
/// returned as `Err`, left operand first.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, ErrorCode> {
    if let Value::Error(e) = a {
        return Err(*e);
    }
    if let Value::Error(e) = b {
        return Err(*e);
    }
    if matches!(a, Value::Area(_)) || matches!(b, Value::Area(_)) {
        return Err(ErrorCode::Value);
    }

    match (a, b) {
        (Value::Blank, Value::Blank) => Ok(Ordering::Equal),
        (Value::Blank, other) => compare_values(&blank_as(other), other),
        (other, Value::Blank) => compare_values(other, &blank_as(other)),
        (Value::Number(x), Value::Number(y)) => Ok(x.partial_cmp(y).unwrap_or(Ordering::Equal)),
        (Value::Text(x), Value::Text(y)) => Ok(x.to_lowercase().cmp(&y.to_lowercase())),
        (Value::Boolean(x), Value::Boolean(y)) => Ok(x.cmp(y)),
        _ => Ok(class_rank(a).cmp(&class_rank(b))),
    }
}

fn class_rank(v: &Value) -> u8 {
    match v {
        Value::Text(_) => 1,
        Value::Number(_) => 2,
        Value::Boolean(_) => 3,
        _ => 0,
    }
}

/// The value a blank stands in for when compared against `other`.
fn blank_as(other: &Value) -> Value {
    match other {
        Value::Number(_) => Value::Number(0.0),
        Value::Boolean(_) => Value::Boolean(false),
        _ => Value::Text(String::new()),
    }
}
