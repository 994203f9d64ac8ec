// Formula parser - converts formula strings into RPN token sequences
// Supports: numbers, strings, booleans, error literals, cell refs (A1, $A$1),
// ranges (A1:B5), sheet-qualified refs (Sheet2!A1, 'My Sheet'!A1:B2),
// function calls with omitted arguments, arithmetic, comparison, &, ^ and %.
//
// Precedence, lowest first: comparison, &, + -, * /, ^, %, unary + -.

use crate::cell_id::{CellId, CellRange};
use crate::sheet::SheetId;
use crate::value::ErrorCode;

use super::token::{Op, Token};

/// Parse a formula into RPN tokens. A leading `=` is optional.
///
/// Unqualified references land on `home`; sheet prefixes are resolved with
/// `resolve_sheet`, and an unknown sheet becomes a `#REF!` literal.
pub fn parse_formula<R>(formula: &str, home: SheetId, resolve_sheet: R) -> Result<Vec<Token>, String>
where
    R: Fn(&str) -> Option<SheetId>,
{
    let formula = formula.trim();
    let input = formula.strip_prefix('=').unwrap_or(formula);
    let lexemes = tokenize(input)?;
    if lexemes.is_empty() {
        return Err("Empty formula".to_string());
    }

    let mut parser = Parser { lexemes: &lexemes, pos: 0, home, resolve_sheet, out: Vec::new() };
    parser.parse_comparison()?;
    if parser.pos < lexemes.len() {
        return Err(format!("Unexpected token at position {}", parser.pos));
    }
    Ok(parser.out)
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Number(f64),
    StringLit(String),
    ErrorLit(ErrorCode),
    CellRef { col: usize, row: usize },
    /// Sheet name prefix (e.g., "Sheet1" from "Sheet1!A1")
    SheetPrefix(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn tokenize(input: &str) -> Result<Vec<Lexeme>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Lexeme::Plus); chars.next(); }
            '-' => { tokens.push(Lexeme::Minus); chars.next(); }
            '*' => { tokens.push(Lexeme::Star); chars.next(); }
            '/' => { tokens.push(Lexeme::Slash); chars.next(); }
            '(' => { tokens.push(Lexeme::LParen); chars.next(); }
            ')' => { tokens.push(Lexeme::RParen); chars.next(); }
            ':' => { tokens.push(Lexeme::Colon); chars.next(); }
            ',' => { tokens.push(Lexeme::Comma); chars.next(); }
            '&' => { tokens.push(Lexeme::Ampersand); chars.next(); }
            '^' => { tokens.push(Lexeme::Caret); chars.next(); }
            '%' => { tokens.push(Lexeme::Percent); chars.next(); }
            '=' => { tokens.push(Lexeme::Eq); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some(&'=') => { tokens.push(Lexeme::LtEq); chars.next(); }
                    Some(&'>') => { tokens.push(Lexeme::NotEq); chars.next(); }
                    _ => tokens.push(Lexeme::Lt),
                }
            }
            '>' => {
                chars.next();
                if let Some(&'=') = chars.peek() {
                    tokens.push(Lexeme::GtEq);
                    chars.next();
                } else {
                    tokens.push(Lexeme::Gt);
                }
            }
            '"' => {
                // Doubled quotes ("") inside are an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Lexeme::StringLit(s));
            }
            '\'' => {
                // Quoted sheet name ('My Sheet'!A1, 'Bob''s'!A1)
                chars.next();
                let mut sheet_name = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            sheet_name.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => sheet_name.push(ch),
                        None => return Err("Unterminated sheet name".to_string()),
                    }
                }
                if chars.next() != Some('!') {
                    return Err("Quoted sheet name must be followed by !".to_string());
                }
                tokens.push(Lexeme::SheetPrefix(sheet_name));
            }
            '#' => {
                let mut lit = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '#' || ch.is_ascii_alphanumeric() || ch == '/' {
                        lit.push(ch);
                        chars.next();
                    } else if ch == '!' || ch == '?' {
                        lit.push(ch);
                        chars.next();
                        break;
                    } else {
                        break;
                    }
                }
                let code = ErrorCode::from_text(&lit)
                    .ok_or_else(|| format!("Unknown error literal: {}", lit))?;
                tokens.push(Lexeme::ErrorLit(code));
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                // Cell reference (A1, $A$1), function name (SUM, STDEV.P) or sheet prefix (Sheet1!)
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if chars.peek() == Some(&'!') {
                    chars.next();
                    tokens.push(Lexeme::SheetPrefix(ident));
                    continue;
                }

                // LOG10( is a call even though LOG10 reads as a cell address
                let is_call = chars.peek() == Some(&'(');
                if let Some((row, col)) = crate::cell_id::parse_a1(&ident).filter(|_| !is_call) {
                    tokens.push(Lexeme::CellRef { col, row });
                } else if ident.contains('$') {
                    return Err(format!("Invalid cell reference: {}", ident));
                } else {
                    tokens.push(Lexeme::Ident(ident.to_uppercase()));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Exponent suffix (1.5E3, 2e-4)
                if matches!(chars.peek(), Some(&'e') | Some(&'E')) {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from("e");
                    if let Some(&sign) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    if lookahead.peek().map_or(false, |d| d.is_ascii_digit()) {
                        while let Some(&d) = lookahead.peek() {
                            if d.is_ascii_digit() {
                                exponent.push(d);
                                lookahead.next();
                            } else {
                                break;
                            }
                        }
                        num_str.push_str(&exponent);
                        chars = lookahead;
                    }
                }
                let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Lexeme::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

struct Parser<'a, R> {
    lexemes: &'a [Lexeme],
    pos: usize,
    home: SheetId,
    resolve_sheet: R,
    out: Vec<Token>,
}

impl<'a, R> Parser<'a, R>
where
    R: Fn(&str) -> Option<SheetId>,
{
    fn peek(&self) -> Option<&'a Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Lexeme> {
        let lexeme = self.lexemes.get(self.pos);
        self.pos += 1;
        lexeme
    }

    // Lowest precedence: comparison operators
    fn parse_comparison(&mut self) -> Result<(), String> {
        self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Lexeme::Lt) => Op::Lt,
                Some(Lexeme::Gt) => Op::Gt,
                Some(Lexeme::Eq) => Op::Eq,
                Some(Lexeme::LtEq) => Op::LtEq,
                Some(Lexeme::GtEq) => Op::GtEq,
                Some(Lexeme::NotEq) => Op::NotEq,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.parse_concat()?;
            self.out.push(Token::Operator(op));
        }
    }

    fn parse_concat(&mut self) -> Result<(), String> {
        self.parse_add_sub()?;
        while let Some(Lexeme::Ampersand) = self.peek() {
            self.pos += 1;
            self.parse_add_sub()?;
            self.out.push(Token::Operator(Op::Concat));
        }
        Ok(())
    }

    fn parse_add_sub(&mut self) -> Result<(), String> {
        self.parse_mul_div()?;
        loop {
            let op = match self.peek() {
                Some(Lexeme::Plus) => Op::Add,
                Some(Lexeme::Minus) => Op::Sub,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.parse_mul_div()?;
            self.out.push(Token::Operator(op));
        }
    }

    fn parse_mul_div(&mut self) -> Result<(), String> {
        self.parse_power()?;
        loop {
            let op = match self.peek() {
                Some(Lexeme::Star) => Op::Mul,
                Some(Lexeme::Slash) => Op::Div,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.parse_power()?;
            self.out.push(Token::Operator(op));
        }
    }

    // Exponentiation (^) - right-associative
    fn parse_power(&mut self) -> Result<(), String> {
        self.parse_percent()?;
        if let Some(Lexeme::Caret) = self.peek() {
            self.pos += 1;
            self.parse_power()?;
            self.out.push(Token::Operator(Op::Pow));
        }
        Ok(())
    }

    fn parse_percent(&mut self) -> Result<(), String> {
        self.parse_unary()?;
        while let Some(Lexeme::Percent) = self.peek() {
            self.pos += 1;
            self.out.push(Token::Operator(Op::Percent));
        }
        Ok(())
    }

    // Unary minus binds tighter than ^, so -2^2 is 4
    fn parse_unary(&mut self) -> Result<(), String> {
        let op = match self.peek() {
            Some(Lexeme::Minus) => Op::Neg,
            Some(Lexeme::Plus) => Op::Plus,
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        self.parse_unary()?;
        self.out.push(Token::Operator(op));
        Ok(())
    }

    fn parse_primary(&mut self) -> Result<(), String> {
        let lexeme = self
            .advance()
            .ok_or_else(|| "Unexpected end of expression".to_string())?;

        match lexeme {
            Lexeme::Number(n) => self.out.push(Token::Number(*n)),
            Lexeme::StringLit(s) => self.out.push(Token::Text(s.clone())),
            Lexeme::ErrorLit(code) => self.out.push(Token::Error(*code)),
            Lexeme::SheetPrefix(name) => {
                let sheet = (self.resolve_sheet)(name);
                match self.advance() {
                    Some(Lexeme::CellRef { col, row }) => self.push_reference(sheet, *row, *col),
                    _ => return Err("Sheet reference must be followed by cell reference".to_string()),
                }
            }
            Lexeme::CellRef { col, row } => self.push_reference(Some(self.home), *row, *col),
            Lexeme::Ident(name) => {
                if let Some(Lexeme::LParen) = self.peek() {
                    self.pos += 1;
                    let argc = self.parse_function_args()?;
                    self.out.push(Token::Function { name: name.clone(), argc });
                } else if name == "TRUE" {
                    self.out.push(Token::Boolean(true));
                } else if name == "FALSE" {
                    self.out.push(Token::Boolean(false));
                } else {
                    // Named ranges are not supported
                    self.out.push(Token::Error(ErrorCode::Name));
                }
            }
            Lexeme::LParen => {
                self.parse_comparison()?;
                match self.advance() {
                    Some(Lexeme::RParen) => self.out.push(Token::Paren),
                    Some(_) => return Err("Expected closing parenthesis".to_string()),
                    None => return Err("Missing closing parenthesis".to_string()),
                }
            }
            _ => return Err(format!("Unexpected token at position {}", self.pos - 1)),
        }
        Ok(())
    }

    /// Push a cell or, if followed by `:ref`, an area reference.
    fn push_reference(&mut self, sheet: Option<SheetId>, row: usize, col: usize) {
        let mut end = None;
        if let (Some(Lexeme::Colon), Some(Lexeme::CellRef { col: end_col, row: end_row })) =
            (self.lexemes.get(self.pos), self.lexemes.get(self.pos + 1))
        {
            end = Some((*end_row, *end_col));
            self.pos += 2;
        }

        let token = match (sheet, end) {
            (None, _) => Token::Error(ErrorCode::Ref),
            (Some(sheet), None) => Token::Ref(CellId::new(sheet, row, col)),
            (Some(sheet), Some((end_row, end_col))) => {
                Token::Area(CellRange::new(sheet, row, col, end_row, end_col))
            }
        };
        self.out.push(token);
    }

    /// Parse arguments after `(` through the closing `)`; returns the count.
    fn parse_function_args(&mut self) -> Result<usize, String> {
        if let Some(Lexeme::RParen) = self.peek() {
            self.pos += 1;
            return Ok(0);
        }

        let mut argc = 0;
        loop {
            // Empty argument: next token is , or ) immediately
            if matches!(self.peek(), Some(Lexeme::Comma) | Some(Lexeme::RParen)) {
                self.out.push(Token::MissingArg);
            } else {
                self.parse_comparison()?;
            }
            argc += 1;

            match self.advance() {
                Some(Lexeme::RParen) => return Ok(argc),
                Some(Lexeme::Comma) => {}
                Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
                None => return Err("Missing closing parenthesis in function call".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::token::format_tokens;

    fn home() -> SheetId {
        SheetId::from_raw(1)
    }

    fn parse(text: &str) -> Vec<Token> {
        parse_formula(text, home(), |name| {
            if name.eq_ignore_ascii_case("Data") { Some(SheetId::from_raw(2)) } else { None }
        })
        .unwrap()
    }

    fn cell(a1: &str) -> Token {
        Token::Ref(CellId::parse_a1(home(), a1).unwrap())
    }

    fn roundtrip(text: &str) -> String {
        format_tokens(&parse(text), home(), |id| {
            if id == SheetId::from_raw(2) { Some("Data".to_string()) } else { None }
        })
    }

    #[test]
    fn test_parse_rpn_order() {
        assert_eq!(
            parse("=B3*C1-C2"),
            vec![cell("B3"), cell("C1"), Token::Operator(Op::Mul), cell("C2"), Token::Operator(Op::Sub)]
        );
    }

    #[test]
    fn test_parse_area_and_function() {
        let tokens = parse("SUM(D1:E2)");
        assert_eq!(
            tokens,
            vec![
                Token::Area(CellRange::parse_a1(home(), "D1:E2").unwrap()),
                Token::Function { name: "SUM".into(), argc: 1 },
            ]
        );
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_power() {
        assert_eq!(
            parse("-2^2"),
            vec![
                Token::Number(2.0),
                Token::Operator(Op::Neg),
                Token::Number(2.0),
                Token::Operator(Op::Pow),
            ]
        );
    }

    #[test]
    fn test_power_right_associative() {
        assert_eq!(roundtrip("2^3^2"), "2^3^2");
        let tokens = parse("2^3^2");
        assert_eq!(tokens[3], Token::Operator(Op::Pow));
        assert_eq!(tokens[4], Token::Operator(Op::Pow));
    }

    #[test]
    fn test_comparison_lowest_precedence() {
        let tokens = parse("A1+1>=B1&\"x\"");
        assert_eq!(tokens.last(), Some(&Token::Operator(Op::GtEq)));
    }

    #[test]
    fn test_empty_args() {
        let tokens = parse("IF(A1,,)");
        assert_eq!(
            tokens,
            vec![
                cell("A1"),
                Token::MissingArg,
                Token::MissingArg,
                Token::Function { name: "IF".into(), argc: 3 },
            ]
        );
        assert_eq!(parse("SUM()"), vec![Token::Function { name: "SUM".into(), argc: 0 }]);
    }

    #[test]
    fn test_sheet_prefix() {
        let tokens = parse("data!A1+'Data'!B2:C3");
        assert_eq!(tokens[0], Token::Ref(CellId::new(SheetId::from_raw(2), 0, 0)));
        assert_eq!(
            tokens[1],
            Token::Area(CellRange::new(SheetId::from_raw(2), 1, 1, 2, 2))
        );
    }

    #[test]
    fn test_unknown_sheet_becomes_ref_error() {
        assert_eq!(parse("Nope!A1:B2"), vec![Token::Error(ErrorCode::Ref)]);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse("IF(true,\"a\"\"b\",#DIV/0!)"),
            vec![
                Token::Boolean(true),
                Token::Text("a\"b".into()),
                Token::Error(ErrorCode::Div0),
                Token::Function { name: "IF".into(), argc: 3 },
            ]
        );
        assert_eq!(parse("1.5E3"), vec![Token::Number(1500.0)]);
        assert_eq!(parse("#N/A"), vec![Token::Error(ErrorCode::NA)]);
    }

    #[test]
    fn test_absolute_refs_and_lowercase() {
        assert_eq!(parse("$a$1"), vec![cell("A1")]);
        assert_eq!(parse("index(b1:b3,2)")[2], Token::Function { name: "INDEX".into(), argc: 2 });
    }

    #[test]
    fn test_roundtrip_text() {
        assert_eq!(roundtrip("=MAX(B1:B2)"), "MAX(B1:B2)");
        assert_eq!(roundtrip("= C2 - C1"), "C2-C1");
        assert_eq!(roundtrip("(A1+2)*-B1%"), "(A1+2)*-B1%");
        assert_eq!(roundtrip("Data!A1*2"), "Data!A1*2");
    }

    #[test]
    fn test_errors() {
        let bad = |text: &str| parse_formula(text, home(), |_| None).is_err();
        assert!(bad(""));
        assert!(bad("=(A1"));
        assert!(bad("SUM(A1"));
        assert!(bad("A1 B1"));
        assert!(bad("\"open"));
        assert!(bad("#BOGUS!"));
        assert!(bad("1+"));
    }
}
