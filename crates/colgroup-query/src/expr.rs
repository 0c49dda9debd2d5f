//! Column expressions: a small numexpr-style language evaluated chunk by chunk.
//!
//! ```text
//! (f0 > 10) & (f1 != "x") | ~(f2 * 2.5 <= f3)
//! ```
//!
//! Precedence, loosest first: `|`, `&`, comparisons, `+ -`, `* /`, then unary `-` and `~`.

use crate::error::{QueryError, QueryResult};
use colgroup_columnar::{BitVec, ChunkData, ColumnarTable, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Column(String),
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }

    /// Comparison operator for a symbol such as `"<="`.
    pub fn comparison(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(BinaryOp::Equals),
            "!=" => Some(BinaryOp::NotEquals),
            "<" => Some(BinaryOp::Less),
            "<=" => Some(BinaryOp::LessEquals),
            ">" => Some(BinaryOp::Greater),
            ">=" => Some(BinaryOp::GreaterEquals),
            _ => None,
        }
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::Less
                | BinaryOp::LessEquals
                | BinaryOp::Greater
                | BinaryOp::GreaterEquals
        )
    }
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn literal(value: &Value) -> Self {
        match value {
            Value::Int32(v) => Expr::Int(i64::from(*v)),
            Value::Int64(v) => Expr::Int(*v),
            Value::Float64(v) => Expr::Float(*v),
            Value::Boolean(v) => Expr::Boolean(*v),
            Value::String(v) => Expr::Text(v.to_string()),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Names of all columns the expression reads, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
            match expr {
                Expr::Column(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::UnaryOp { expr, .. } => walk(expr, out),
                Expr::BinaryOp { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Float(v) => write!(f, "{v:?}"),
            Expr::Text(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Expr::Boolean(true) => f.write_str("True"),
            Expr::Boolean(false) => f.write_str("False"),
            Expr::Column(name) => f.write_str(name),
            Expr::UnaryOp {
                op: UnaryOp::Negate,
                expr,
            } => write!(f, "-({expr})"),
            Expr::UnaryOp {
                op: UnaryOp::Not,
                expr,
            } => write!(f, "~({expr})"),
            Expr::BinaryOp { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
        }
    }
}

fn malformed(msg: impl fmt::Display) -> QueryError {
    QueryError::InvalidArgument(format!("malformed expression: {msg}"))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    Int(i64),
    Float(f64),
    String(String),
    True,
    False,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Ampersand,
    Pipe,
    Tilde,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::str::Chars<'a>,
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let mut chars = input.chars();
        let peeked = chars.next();
        Self {
            input,
            chars,
            peeked,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let current = self.peeked.take();
        self.peeked = self.chars.next();
        current
    }

    fn peek(&self) -> Option<char> {
        self.peeked
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            buf.push(ch);
            self.bump();
        }
        buf
    }

    /// Consume `second` if it follows, choosing between a two- and a one-character token.
    fn pair(&mut self, second: char, both: Token, single: Option<Token>) -> QueryResult<Token> {
        let first = self.bump();
        if self.peek() == Some(second) {
            self.bump();
            return Ok(both);
        }
        single.ok_or_else(|| {
            malformed(format!(
                "unexpected character {:?} in {:?}",
                first.unwrap_or_default(),
                self.input
            ))
        })
    }

    fn next_token(&mut self) -> QueryResult<Token> {
        self.consume_while(char::is_whitespace);
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '&' => Some(Token::Ampersand),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            _ => None,
        };
        if let Some(token) = single {
            self.bump();
            return Ok(token);
        }

        match ch {
            '=' => self.pair('=', Token::Equals, None),
            '!' => self.pair('=', Token::NotEquals, None),
            '<' => self.pair('=', Token::LessEquals, Some(Token::Less)),
            '>' => self.pair('=', Token::GreaterEquals, Some(Token::Greater)),
            '"' | '\'' => {
                self.bump();
                let mut out = String::new();
                loop {
                    match self.bump() {
                        None => return Err(malformed("unterminated string")),
                        Some('\\') => match self.bump() {
                            Some(escaped) => out.push(escaped),
                            None => return Err(malformed("unterminated string")),
                        },
                        Some(c) if c == ch => break,
                        Some(c) => out.push(c),
                    }
                }
                Ok(Token::String(out))
            }
            c if c.is_ascii_digit() || c == '.' => self.number(),
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.consume_while(|c| c.is_alphanumeric() || c == '_');
                Ok(match ident.as_str() {
                    "True" | "true" => Token::True,
                    "False" | "false" => Token::False,
                    _ => Token::Identifier(ident),
                })
            }
            other => Err(malformed(format!(
                "unexpected character {other:?} in {:?}",
                self.input
            ))),
        }
    }

    fn number(&mut self) -> QueryResult<Token> {
        let mut text = self.consume_while(|c| c.is_ascii_digit() || c == '.');
        let mut is_float = text.contains('.');
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.extend(self.bump());
            if matches!(self.peek(), Some('+' | '-')) {
                text.extend(self.bump());
            }
            let digits = self.consume_while(|c| c.is_ascii_digit());
            if digits.is_empty() {
                return Err(malformed(format!("invalid number {text:?}")));
            }
            text.push_str(&digits);
        }
        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                return Ok(Token::Int(v));
            }
        }
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| malformed(format!("invalid number {text:?}")))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> QueryResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> QueryResult<Token> {
        let current = std::mem::replace(&mut self.lookahead, Token::Eof);
        self.lookahead = self.lexer.next_token()?;
        Ok(current)
    }

    fn expect(&mut self, token: Token) -> QueryResult<()> {
        if self.lookahead == token {
            self.bump()?;
            Ok(())
        } else {
            Err(malformed(format!(
                "expected {token:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    fn parse(&mut self) -> QueryResult<Expr> {
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(malformed(format!("unexpected token {:?}", self.lookahead)));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> QueryResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((op, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> QueryResult<Expr> {
        match self.bump()? {
            Token::Minus => Ok(Expr::UnaryOp {
                op: UnaryOp::Negate,
                expr: Box::new(self.parse_expr(7)?),
            }),
            Token::Tilde => Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                expr: Box::new(self.parse_expr(7)?),
            }),
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::String(s) => Ok(Expr::Text(s)),
            Token::True => Ok(Expr::Boolean(true)),
            Token::False => Ok(Expr::Boolean(false)),
            Token::Identifier(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(malformed(format!("unexpected token {other:?}"))),
        }
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        match self.lookahead {
            Token::Pipe => Some((BinaryOp::Or, 1)),
            Token::Ampersand => Some((BinaryOp::And, 2)),
            Token::Equals => Some((BinaryOp::Equals, 3)),
            Token::NotEquals => Some((BinaryOp::NotEquals, 3)),
            Token::Less => Some((BinaryOp::Less, 3)),
            Token::LessEquals => Some((BinaryOp::LessEquals, 3)),
            Token::Greater => Some((BinaryOp::Greater, 3)),
            Token::GreaterEquals => Some((BinaryOp::GreaterEquals, 3)),
            Token::Plus => Some((BinaryOp::Add, 5)),
            Token::Minus => Some((BinaryOp::Subtract, 5)),
            Token::Star => Some((BinaryOp::Multiply, 6)),
            Token::Slash => Some((BinaryOp::Divide, 6)),
            _ => None,
        }
    }
}

pub fn parse(input: &str) -> QueryResult<Expr> {
    Parser::new(input)?.parse()
}

/// Result of evaluating an expression over every row of a table.
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluated {
    Mask(BitVec),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl Evaluated {
    pub fn len(&self) -> usize {
        match self {
            Evaluated::Mask(bits) => bits.len(),
            Evaluated::Int64(v) => v.len(),
            Evaluated::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_mask(self) -> Option<BitVec> {
        match self {
            Evaluated::Mask(bits) => Some(bits),
            _ => None,
        }
    }

    fn append(&mut self, array: Array) -> QueryResult<()> {
        match (self, array) {
            (Evaluated::Mask(out), Array::Bool(bits)) => out.extend_from(&bits),
            (Evaluated::Int64(out), Array::Int(v)) => out.extend(v),
            (Evaluated::Float64(out), Array::Float(v)) => out.extend(v),
            (_, other) => {
                return Err(QueryError::InvalidArgument(format!(
                    "expression changed result type to {}",
                    other.kind()
                )))
            }
        }
        Ok(())
    }
}

/// Values of one sub-expression over the rows of a chunk.
#[derive(Clone, Debug)]
enum Array {
    Bool(BitVec),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<Arc<str>>),
}

impl Array {
    fn from_chunk(chunk: &ChunkData) -> Self {
        match chunk {
            ChunkData::Int32(v) => Array::Int(v.iter().map(|&x| i64::from(x)).collect()),
            ChunkData::Int64(v) => Array::Int(v.clone()),
            ChunkData::Float64(v) => Array::Float(v.clone()),
            ChunkData::Boolean(bits) => Array::Bool(bits.clone()),
            ChunkData::String(v) => Array::Text(v.clone()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Array::Bool(_) => "boolean",
            Array::Int(_) => "integer",
            Array::Float(_) => "float",
            Array::Text(_) => "string",
        }
    }

    fn into_floats(self, op: BinaryOp) -> QueryResult<Vec<f64>> {
        match self {
            Array::Int(v) => Ok(v.into_iter().map(|x| x as f64).collect()),
            Array::Float(v) => Ok(v),
            other => Err(operand_error(op.symbol(), &other)),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Array::Int(_) | Array::Float(_))
    }
}

fn operand_error(op: &str, operand: &Array) -> QueryError {
    QueryError::InvalidArgument(format!(
        "operator {op} does not accept {} operands",
        operand.kind()
    ))
}

struct Env {
    len: usize,
    chunks: HashMap<String, Arc<ChunkData>>,
}

fn eval(expr: &Expr, env: &Env) -> QueryResult<Array> {
    let len = env.len;
    match expr {
        Expr::Int(v) => Ok(Array::Int(vec![*v; len])),
        Expr::Float(v) => Ok(Array::Float(vec![*v; len])),
        Expr::Boolean(true) => Ok(Array::Bool(BitVec::with_len_all_true(len))),
        Expr::Boolean(false) => Ok(Array::Bool(BitVec::with_len_all_false(len))),
        Expr::Text(s) => Ok(Array::Text(vec![Arc::from(s.as_str()); len])),
        Expr::Column(name) => env
            .chunks
            .get(name)
            .map(|chunk| Array::from_chunk(chunk))
            .ok_or_else(|| QueryError::unknown_column(name)),
        Expr::UnaryOp { op, expr } => match (op, eval(expr, env)?) {
            (UnaryOp::Negate, Array::Int(v)) => {
                Ok(Array::Int(v.into_iter().map(i64::wrapping_neg).collect()))
            }
            (UnaryOp::Negate, Array::Float(v)) => {
                Ok(Array::Float(v.into_iter().map(|x| -x).collect()))
            }
            (UnaryOp::Not, Array::Bool(mut bits)) => {
                bits.not_inplace();
                Ok(Array::Bool(bits))
            }
            (UnaryOp::Negate, other) => Err(operand_error("-", &other)),
            (UnaryOp::Not, other) => Err(operand_error("~", &other)),
        },
        Expr::BinaryOp { op, left, right } => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            match op {
                BinaryOp::And | BinaryOp::Or => logical(*op, left, right),
                op if op.is_comparison() => compare(*op, left, right).map(Array::Bool),
                _ => arithmetic(*op, left, right),
            }
        }
    }
}

fn logical(op: BinaryOp, left: Array, right: Array) -> QueryResult<Array> {
    match (left, right) {
        (Array::Bool(mut a), Array::Bool(b)) => {
            if op == BinaryOp::And {
                a.and_inplace(&b);
            } else {
                a.or_inplace(&b);
            }
            Ok(Array::Bool(a))
        }
        (Array::Bool(_), other) | (other, _) => Err(operand_error(op.symbol(), &other)),
    }
}

fn arithmetic(op: BinaryOp, left: Array, right: Array) -> QueryResult<Array> {
    match (op, left, right) {
        (BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply, Array::Int(a), Array::Int(b)) => {
            let f: fn(i64, i64) -> i64 = match op {
                BinaryOp::Add => i64::wrapping_add,
                BinaryOp::Subtract => i64::wrapping_sub,
                _ => i64::wrapping_mul,
            };
            Ok(Array::Int(a.into_iter().zip(b).map(|(x, y)| f(x, y)).collect()))
        }
        (op, left, right) => {
            let a = left.into_floats(op)?;
            let b = right.into_floats(op)?;
            let f: fn(f64, f64) -> f64 = match op {
                BinaryOp::Add => |x, y| x + y,
                BinaryOp::Subtract => |x, y| x - y,
                BinaryOp::Multiply => |x, y| x * y,
                _ => |x, y| x / y,
            };
            Ok(Array::Float(a.into_iter().zip(b).map(|(x, y)| f(x, y)).collect()))
        }
    }
}

fn holds(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    match op {
        BinaryOp::Equals => ordering == Some(Ordering::Equal),
        BinaryOp::NotEquals => ordering != Some(Ordering::Equal),
        BinaryOp::Less => ordering == Some(Ordering::Less),
        BinaryOp::LessEquals => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Greater => ordering == Some(Ordering::Greater),
        BinaryOp::GreaterEquals => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}

fn compare(op: BinaryOp, left: Array, right: Array) -> QueryResult<BitVec> {
    let bits = match (left, right) {
        (Array::Int(a), Array::Int(b)) => a
            .iter()
            .zip(&b)
            .map(|(x, y)| holds(op, Some(x.cmp(y))))
            .collect(),
        (Array::Text(a), Array::Text(b)) => a
            .iter()
            .zip(&b)
            .map(|(x, y)| holds(op, Some(x.cmp(y))))
            .collect(),
        (Array::Bool(a), Array::Bool(b)) => (0..a.len())
            .map(|i| holds(op, Some(a.get(i).cmp(&b.get(i)))))
            .collect(),
        (l, r) if l.is_numeric() && r.is_numeric() => {
            let a = l.into_floats(op)?;
            let b = r.into_floats(op)?;
            a.iter()
                .zip(&b)
                .map(|(x, y)| holds(op, x.partial_cmp(y)))
                .collect()
        }
        (l, r) => {
            return Err(QueryError::InvalidArgument(format!(
                "cannot compare {} with {} using {}",
                l.kind(),
                r.kind(),
                op.symbol()
            )))
        }
    };
    Ok(bits)
}

/// Evaluate `expr` against `table`, one chunk of the referenced columns at a time.
pub fn evaluate(table: &ColumnarTable, expr: &Expr) -> QueryResult<Evaluated> {
    let mut columns = Vec::new();
    for name in expr.columns() {
        let column = table
            .column(name)
            .map_err(|_| QueryError::unknown_column(name))?;
        columns.push((name, column));
    }

    let mut out: Option<Evaluated> = None;
    let chunk_count = table.chunk_count();
    for chunk_idx in 0..chunk_count.max(1) {
        let start = chunk_idx * table.chunk_len();
        let len = (table.row_count() - start.min(table.row_count())).min(table.chunk_len());
        let mut chunks = HashMap::with_capacity(columns.len());
        for &(name, column) in &columns {
            let chunk = if chunk_count == 0 {
                Arc::new(ChunkData::with_capacity(column.column_type(), 0))
            } else {
                column.chunk(chunk_idx)?
            };
            chunks.insert(name.to_string(), chunk);
        }
        let array = eval(expr, &Env { len, chunks })?;
        if let Some(out) = out.as_mut() {
            out.append(array)?;
            continue;
        }
        out = Some(match array {
            Array::Bool(bits) => Evaluated::Mask(bits),
            Array::Int(v) => Evaluated::Int64(v),
            Array::Float(v) => Evaluated::Float64(v),
            Array::Text(_) => {
                return Err(QueryError::InvalidArgument(format!(
                    "expression {expr} yields strings"
                )))
            }
        });
    }
    log::trace!("evaluated {expr} over {} rows", table.row_count());
    out.ok_or_else(|| QueryError::InvalidArgument(format!("expression {expr} produced no rows")))
}
