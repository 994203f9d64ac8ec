// Formula tokens - the already-parsed form the evaluator consumes.
// A token sequence is in reverse Polish order: operands precede the operator
// or function that consumes them.

use crate::cell_id::{CellId, CellRange};
use crate::sheet::{format_sheet_prefix, SheetId};
use crate::value::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    // String
    Concat,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Unary
    Neg,
    Plus,
    Percent,
}

impl Op {
    /// Number of operands popped from the evaluation stack.
    pub fn arity(&self) -> usize {
        match self {
            Op::Neg | Op::Plus | Op::Percent => 1,
            _ => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Add | Op::Plus => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Pow => "^",
            Op::Concat => "&",
            Op::Eq => "=",
            Op::NotEq => "<>",
            Op::Lt => "<",
            Op::LtEq => "<=",
            Op::Gt => ">",
            Op::GtEq => ">=",
            Op::Percent => "%",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq)
    }
}

/// One element of a parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorCode),
    /// An omitted argument, e.g. the last slot of `IF(A1,1,)`
    MissingArg,
    Ref(CellId),
    Area(CellRange),
    /// Marks that the preceding operand was parenthesised in the source.
    /// No-op at evaluation time; kept so formulas render as written.
    Paren,
    Operator(Op),
    Function { name: String, argc: usize },
}

/// What the function library is asked to apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionId {
    Operator(Op),
    /// Upper-cased function name
    Named(String),
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionId::Operator(op) => f.write_str(op.symbol()),
            FunctionId::Named(name) => f.write_str(name),
        }
    }
}

/// Render a token sequence back to formula text (without leading `=`).
///
/// References on `home` are written bare; references to other sheets get a
/// prefix from `sheet_name`, or `#REF!` if the sheet is unknown.
pub fn format_tokens<F>(tokens: &[Token], home: SheetId, sheet_name: F) -> String
where
    F: Fn(SheetId) -> Option<String>,
{
    let prefix = |sheet: SheetId| -> Option<String> {
        if sheet == home {
            Some(String::new())
        } else {
            sheet_name(sheet).map(|name| format_sheet_prefix(&name))
        }
    };

    let mut stack: Vec<String> = Vec::new();
    for token in tokens {
        let text = match token {
            Token::Number(n) => format!("{}", n),
            Token::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
            Token::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            Token::Error(e) => e.as_str().to_string(),
            Token::MissingArg => String::new(),
            Token::Ref(cell) => match prefix(cell.sheet) {
                Some(p) => format!("{}{}", p, cell.a1()),
                None => ErrorCode::Ref.as_str().to_string(),
            },
            Token::Area(range) => match prefix(range.sheet) {
                Some(p) => format!("{}{}", p, range.a1()),
                None => ErrorCode::Ref.as_str().to_string(),
            },
            Token::Paren => {
                let inner = stack.pop().unwrap_or_default();
                format!("({})", inner)
            }
            Token::Operator(op) => match op {
                Op::Neg | Op::Plus => {
                    let operand = stack.pop().unwrap_or_default();
                    format!("{}{}", op.symbol(), operand)
                }
                Op::Percent => {
                    let operand = stack.pop().unwrap_or_default();
                    format!("{}%", operand)
                }
                _ => {
                    let right = stack.pop().unwrap_or_default();
                    let left = stack.pop().unwrap_or_default();
                    format!("{}{}{}", left, op.symbol(), right)
                }
            },
            Token::Function { name, argc } => {
                let split = stack.len().saturating_sub(*argc);
                let args = stack.split_off(split);
                format!("{}({})", name, args.join(","))
            }
        };
        stack.push(text);
    }
    stack.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> SheetId {
        SheetId::from_raw(1)
    }

    fn cell(a1: &str) -> Token {
        Token::Ref(CellId::parse_a1(sheet(), a1).unwrap())
    }

    fn area(a1: &str) -> Token {
        Token::Area(CellRange::parse_a1(sheet(), a1).unwrap())
    }

    #[test]
    fn test_format_binary_chain() {
        let tokens = vec![
            cell("B3"),
            cell("C1"),
            Token::Operator(Op::Mul),
            cell("C2"),
            Token::Operator(Op::Sub),
        ];
        assert_eq!(format_tokens(&tokens, sheet(), |_| None), "B3*C1-C2");
    }

    #[test]
    fn test_format_function_and_paren() {
        let tokens = vec![
            area("B1:B2"),
            Token::Function { name: "MAX".into(), argc: 1 },
            Token::Number(2.0),
            Token::Operator(Op::Add),
            Token::Paren,
            Token::Operator(Op::Neg),
        ];
        assert_eq!(format_tokens(&tokens, sheet(), |_| None), "-(MAX(B1:B2)+2)");
    }

    #[test]
    fn test_format_cross_sheet_prefix() {
        let other = SheetId::from_raw(9);
        let tokens = vec![
            Token::Ref(CellId::new(other, 0, 0)),
            Token::Ref(CellId::new(SheetId::from_raw(10), 0, 0)),
            Token::Operator(Op::Add),
        ];
        let text = format_tokens(&tokens, sheet(), |id| {
            if id == other { Some("My Data".to_string()) } else { None }
        });
        assert_eq!(text, "'My Data'!A1+#REF!");
    }

    #[test]
    fn test_format_missing_arg_and_text() {
        let tokens = vec![
            cell("A1"),
            Token::Text("say \"hi\"".into()),
            Token::MissingArg,
            Token::Function { name: "IF".into(), argc: 3 },
        ];
        assert_eq!(format_tokens(&tokens, sheet(), |_| None), "IF(A1,\"say \"\"hi\"\"\",)");
    }
}
