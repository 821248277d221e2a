//! Recursive-descent parser for inline code blocks.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! statement  := NAME ("=" | "+=" | "-=" | "*=") expr | expr
//! expr       := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not" "in") sum)?
//! sum        := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "//" | "%") unary)*
//! unary      := "-" unary | postfix
//! postfix    := primary ("[" expr "]")*
//! primary    := literal | NAME | BUILTIN "(" args ")" | "(" expr ")" | list | dict
//! ```

use serde_json::Value;

use super::lexer::{Spanned, Token};
use super::{CodeError, MAX_DEPTH, MAX_STATEMENTS};

pub(super) const BUILTINS: [&str; 6] = ["len", "range", "sum", "min", "max", "sorted"];

const RESERVED: [&str; 7] = ["and", "or", "not", "in", "True", "False", "None"];

const FORBIDDEN: [&str; 27] = [
    "import", "from", "def", "class", "lambda", "while", "for", "if", "else", "elif", "return",
    "with", "try", "except", "finally", "global", "nonlocal", "del", "yield", "async", "await",
    "raise", "assert", "pass", "break", "continue", "is",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Stmt {
    Assign {
        target: String,
        op: Option<BinOp>,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Line {
    pub stmt: Stmt,
    pub line: usize,
}

pub(super) fn parse(tokens: &[Spanned]) -> Result<Vec<Line>, CodeError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut program = Vec::new();

    loop {
        while parser.peek() == Some(&Token::Newline) {
            parser.pos += 1;
        }
        if parser.peek().is_none() {
            break;
        }
        if program.len() >= MAX_STATEMENTS {
            return Err(CodeError::Limit(format!(
                "more than {MAX_STATEMENTS} statements"
            )));
        }
        let line = parser.line();
        let stmt = parser.statement()?;
        program.push(Line { stmt, line });

        match parser.peek() {
            None | Some(Token::Newline) => {}
            Some(token) => return Err(parser.error(format!("unexpected {}", describe(token)))),
        }
    }
    Ok(program)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        let tokens: &'a [Spanned] = self.tokens;
        tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn error(&self, message: String) -> CodeError {
        CodeError::Syntax {
            line: self.line(),
            message,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), CodeError> {
        match self.peek() {
            Some(token) if token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(token) => Err(self.error(format!("expected {what}, found {}", describe(token)))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    fn is_name(&self, offset: usize, name: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Name(n)) if n == name)
    }

    fn enter(&mut self) -> Result<(), CodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CodeError::Limit(format!(
                "expressions nested deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.release(1);
    }

    /// Each link of a left-associative chain nests the tree one level, so
    /// operator loops `enter` per link and release them all at the end.
    fn release(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn statement(&mut self) -> Result<Stmt, CodeError> {
        if let (Some(Token::Name(name)), Some(Token::Op(op))) = (self.peek(), self.peek_at(1)) {
            let op = match *op {
                "=" => Some(None),
                "+=" => Some(Some(BinOp::Add)),
                "-=" => Some(Some(BinOp::Sub)),
                "*=" => Some(Some(BinOp::Mul)),
                _ => None,
            };
            if let Some(op) = op {
                self.check_name(name)?;
                if RESERVED.contains(&name.as_str()) {
                    return Err(self.error(format!("cannot assign to '{name}'")));
                }
                self.pos += 2;
                let value = self.expression()?;
                return Ok(Stmt::Assign {
                    target: name.clone(),
                    op,
                    value,
                });
            }
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn check_name(&self, name: &str) -> Result<(), CodeError> {
        if FORBIDDEN.contains(&name) {
            return Err(self.error(format!("'{name}' is not allowed")));
        }
        if name.starts_with("__") {
            return Err(self.error(format!("names starting with '__' are not allowed: {name}")));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, CodeError> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, CodeError> {
        let mut left = self.and_expr()?;
        let mut chained = 0;
        while self.is_name(0, "or") {
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.release(chained);
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, CodeError> {
        let mut left = self.not_expr()?;
        let mut chained = 0;
        while self.is_name(0, "and") {
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.release(chained);
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, CodeError> {
        if self.is_name(0, "not") {
            self.pos += 1;
            self.enter()?;
            let inner = self.not_expr();
            self.leave();
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.comparison()
    }

    fn comparison_op(&self) -> Option<(CmpOp, usize)> {
        match self.peek()? {
            Token::Op("==") => Some((CmpOp::Eq, 1)),
            Token::Op("!=") => Some((CmpOp::Ne, 1)),
            Token::Op("<") => Some((CmpOp::Lt, 1)),
            Token::Op("<=") => Some((CmpOp::Le, 1)),
            Token::Op(">") => Some((CmpOp::Gt, 1)),
            Token::Op(">=") => Some((CmpOp::Ge, 1)),
            Token::Name(n) if n == "in" => Some((CmpOp::In, 1)),
            Token::Name(n) if n == "not" && self.is_name(1, "in") => Some((CmpOp::NotIn, 2)),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Expr, CodeError> {
        let left = self.sum()?;
        let Some((op, width)) = self.comparison_op() else {
            return Ok(left);
        };
        self.pos += width;
        let right = self.sum()?;
        if self.comparison_op().is_some() {
            return Err(self.error("chained comparisons are not supported".into()));
        }
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expr, CodeError> {
        let mut left = self.term()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Op("+")) => BinOp::Add,
                Some(Token::Op("-")) => BinOp::Sub,
                _ => {
                    self.release(chained);
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, CodeError> {
        let mut left = self.unary()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => BinOp::Mul,
                Some(Token::Op("/")) => BinOp::Div,
                Some(Token::Op("//")) => BinOp::FloorDiv,
                Some(Token::Op("%")) => BinOp::Mod,
                _ => {
                    self.release(chained);
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, CodeError> {
        if self.peek() == Some(&Token::Op("-")) {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary();
            self.leave();
            return Ok(Expr::Neg(Box::new(inner?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CodeError> {
        let mut expr = self.primary()?;
        let mut chained = 0;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.pos += 1;
                    self.enter()?;
                    chained += 1;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LParen) => {
                    return Err(self.error("only built-in functions can be called".into()));
                }
                _ => {
                    self.release(chained);
                    return Ok(expr);
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, CodeError> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of input".into()));
        };
        match token {
            Token::Int(n) => Ok(Expr::Literal(Value::from(*n))),
            Token::Float(f) => serde_json::Number::from_f64(*f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| self.error(format!("invalid number {f}"))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            Token::Name(name) => self.name(name),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.sequence(&Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Token::LBrace => self.dict(),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(other))))
            }
        }
    }

    fn name(&mut self, name: &str) -> Result<Expr, CodeError> {
        match name {
            "True" => return Ok(Expr::Literal(Value::Bool(true))),
            "False" => return Ok(Expr::Literal(Value::Bool(false))),
            "None" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }
        self.check_name(name)?;
        if RESERVED.contains(&name) {
            return Err(self.error(format!("unexpected keyword '{name}'")));
        }

        if self.peek() == Some(&Token::LParen) {
            if !BUILTINS.contains(&name) {
                return Err(self.error(format!("calling '{name}' is not allowed")));
            }
            self.pos += 1;
            let args = self.sequence(&Token::RParen, "')'")?;
            return Ok(Expr::Call(name.to_string(), args));
        }
        Ok(Expr::Name(name.to_string()))
    }

    /// Comma-separated expressions up to `close` (trailing comma allowed).
    fn sequence(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, CodeError> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.expression()?);
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                self.expect(close, what)?;
                return Ok(items);
            }
        }
    }

    fn dict(&mut self) -> Result<Expr, CodeError> {
        let mut pairs = Vec::new();
        loop {
            if self.peek() == Some(&Token::RBrace) {
                self.pos += 1;
                return Ok(Expr::Dict(pairs));
            }
            let key = self.expression()?;
            self.expect(&Token::Colon, "':'")?;
            let value = self.expression()?;
            pairs.push((key, value));
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                self.expect(&Token::RBrace, "'}'")?;
                return Ok(Expr::Dict(pairs));
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(n) => format!("number {n}"),
        Token::Float(f) => format!("number {f}"),
        Token::Str(_) => "string literal".into(),
        Token::Name(n) => format!("name '{n}'"),
        Token::Op(op) => format!("'{op}'"),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::Newline => "end of line".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_source(source: &str) -> Result<Vec<Line>, CodeError> {
        parse(&tokenize(source)?)
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse_source("x = 1 + 2 * 3").unwrap();
        let Stmt::Assign { value, .. } = &program[0].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Binary(BinOp::Add, _, rhs) if matches!(**rhs, Expr::Binary(BinOp::Mul, _, _))));
    }

    #[test]
    fn records_statement_lines() {
        let program = parse_source("a = 1\n\n# skip\nb = a").unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program[1].line, 4);
    }

    #[test]
    fn parses_not_in_and_augmented_assignment() {
        let program = parse_source("ok = 3 not in [1, 2]; n += 1").unwrap();
        assert!(matches!(
            &program[0].stmt,
            Stmt::Assign { value: Expr::Compare(CmpOp::NotIn, _, _), .. }
        ));
        assert!(matches!(&program[1].stmt, Stmt::Assign { op: Some(BinOp::Add), .. }));
    }

    #[test]
    fn rejects_forbidden_constructs() {
        for source in [
            "import os",
            "x = open('f')",
            "x = __import__",
            "x = (1)(2)",
            "x = lambda: 1",
            "for = 1",
            "None = 1",
            "a < b < c",
            "x = 1 2",
        ] {
            assert!(
                matches!(parse_source(source), Err(CodeError::Syntax { .. })),
                "accepted {source:?}"
            );
        }
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("x = {}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(parse_source(&deep), Err(CodeError::Limit(_))));
        let negations = format!("x = {}1", "-".repeat(100));
        assert!(matches!(parse_source(&negations), Err(CodeError::Limit(_))));
    }

    #[test]
    fn operator_chains_count_toward_nesting() {
        let chain = format!("x = 1{}", " + 1".repeat(20_000));
        assert!(matches!(parse_source(&chain), Err(CodeError::Limit(_))));
        let lookups = format!("x = a{}", "[0]".repeat(20_000));
        assert!(matches!(parse_source(&lookups), Err(CodeError::Limit(_))));

        // depth resets between statements
        let short = format!("x = 1{}\n", " + 1".repeat(40)).repeat(3);
        assert_eq!(parse_source(&short).unwrap().len(), 3);
    }

    #[test]
    fn statement_count_is_bounded() {
        let long = "x = 1\n".repeat(MAX_STATEMENTS + 1);
        assert!(matches!(parse_source(&long), Err(CodeError::Limit(_))));
        let ok = "x = 1\n".repeat(MAX_STATEMENTS);
        assert_eq!(parse_source(&ok).unwrap().len(), MAX_STATEMENTS);
    }
}
