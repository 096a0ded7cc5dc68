//! Sandboxed evaluator for generated tool source
//!
//! Generated tools are written in a small expression language:
//!
//! ```text
//! @tool
//! fn celsius_to_fahrenheit(celsius: float) -> str {
//!     # Convert a temperature from Celsius to Fahrenheit.
//!     let f = celsius * 9 / 5 + 32;
//!     return format("{} C = {} F", celsius, round(f, 1));
//! }
//! ```
//!
//! The evaluator has no I/O of any kind. The only callable functions are the
//! pure builtins in [`BUILTINS`]; every run is bounded by a step budget and
//! by caps on string and collection sizes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde_json::Value as JsonValue;

use super::types::ParamType;
use crate::error::{GateError, Result};

/// Decorator line that opens every tool source.
pub const DECORATOR: &str = "@tool";

/// Default number of evaluation steps before a run is aborted.
pub const DEFAULT_STEP_BUDGET: u64 = 100_000;

/// Largest tool source accepted by the parser.
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;

/// Deepest syntax tree (blocks, sub-expressions and operator chains) the
/// parser builds, and deepest list/map value the evaluator constructs.
pub const MAX_NESTING: usize = 64;

const MAX_COLLECTION_LEN: usize = 100_000;
const MAX_STRING_BYTES: usize = 1 << 20;

/// Reserved words; never valid as tool or parameter names.
pub(crate) const KEYWORDS: &[&str] = &[
    "fn", "let", "if", "else", "for", "in", "while", "return", "true", "false", "null",
];

/// Functions callable from tool source.
pub const BUILTINS: &[&str] = &[
    "abs",
    "bool",
    "ceil",
    "contains",
    "ends_with",
    "float",
    "floor",
    "format",
    "get",
    "int",
    "join",
    "keys",
    "len",
    "lower",
    "max",
    "min",
    "pow",
    "push",
    "range",
    "replace",
    "reverse",
    "round",
    "sort",
    "split",
    "sqrt",
    "starts_with",
    "str",
    "sum",
    "trim",
    "type_of",
    "upper",
    "values",
];

fn script_err(msg: impl Into<String>) -> GateError {
    GateError::Script(msg.into())
}

// ============================================================================
// Values
// ============================================================================

/// Runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Val>),
    Map(BTreeMap<String, Val>),
}

impl Val {
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "str",
            Val::List(_) => "list",
            Val::Map(_) => "dict",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::List(l) => !l.is_empty(),
            Val::Map(m) => !m.is_empty(),
        }
    }

    /// Whether lists or maps nest more than `limit` levels below this value.
    fn nests_deeper_than(&self, limit: usize) -> bool {
        match self {
            Val::List(items) => limit == 0 || items.iter().any(|v| v.nests_deeper_than(limit - 1)),
            Val::Map(map) => limit == 0 || map.values().any(|v| v.nests_deeper_than(limit - 1)),
            _ => false,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality with numeric widening (`1 == 1.0`).
    fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => (*a as f64) == *b,
            (Val::List(a), Val::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Val::Map(a), Val::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.loose_eq(w)).unwrap_or(false))
            }
            _ => self == other,
        }
    }

    pub fn from_json(value: &JsonValue) -> Val {
        match value {
            JsonValue::Null => Val::Null,
            JsonValue::Bool(b) => Val::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Val::Int(i),
                None => Val::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Val::Str(s.clone()),
            JsonValue::Array(items) => Val::List(items.iter().map(Val::from_json).collect()),
            JsonValue::Object(map) => Val::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Val::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Int(i) => JsonValue::from(*i),
            Val::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Map(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int(i) => write!(f, "{}", i),
            Val::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Val::Str(s) => write!(f, "{}", s),
            Val::List(_) | Val::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    At,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Arrow,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    And,
    Or,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let is_float =
                i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let tok = if is_float {
                Tok::Float(
                    text.parse()
                        .map_err(|_| script_err(format!("line {}: bad number '{}'", line, text)))?,
                )
            } else {
                Tok::Int(text.parse().map_err(|_| {
                    script_err(format!("line {}: integer '{}' out of range", line, text))
                })?)
            };
            tokens.push(Token { tok, line });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                line,
            });
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(script_err(format!(
                        "line {}: unterminated string literal",
                        start_line
                    )));
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\n' {
                    line += 1;
                }
                if ch == '\\' {
                    let esc = chars.get(i).copied().ok_or_else(|| {
                        script_err(format!("line {}: unterminated string literal", start_line))
                    })?;
                    i += 1;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
            }
            tokens.push(Token {
                tok: Tok::Str(s),
                line: start_line,
            });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (tok, width) = match (c, next) {
            ('-', Some('>')) => (Tok::Arrow, 2),
            ('=', Some('=')) => (Tok::Eq, 2),
            ('!', Some('=')) => (Tok::Ne, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('&', Some('&')) => (Tok::And, 2),
            ('|', Some('|')) => (Tok::Or, 2),
            ('@', _) => (Tok::At, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('{', _) => (Tok::LBrace, 1),
            ('}', _) => (Tok::RBrace, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (',', _) => (Tok::Comma, 1),
            (';', _) => (Tok::Semi, 1),
            (':', _) => (Tok::Colon, 1),
            ('=', _) => (Tok::Assign, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('%', _) => (Tok::Percent, 1),
            ('!', _) => (Tok::Not, 1),
            _ => {
                return Err(script_err(format!(
                    "line {}: unexpected character '{}'",
                    line, c
                )))
            }
        };
        tokens.push(Token { tok, line });
        i += width;
    }

    tokens.push(Token { tok: Tok::Eof, line });
    Ok(tokens)
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Val),
    Var(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    If(Vec<(Expr, Vec<Stmt>)>, Option<Vec<Stmt>>),
    For(String, Expr, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Return(Option<Expr>),
    Expr(Expr),
}

/// A declared tool parameter as written in the signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptParam {
    pub name: String,
    pub ty: ParamType,
}

/// A parsed tool program.
#[derive(Debug, Clone)]
pub struct ScriptProgram {
    /// Function name from the signature
    pub name: String,
    /// Declared parameters, in order
    pub params: Vec<ScriptParam>,
    /// Declared return type, if annotated
    pub return_type: Option<String>,
    body: Vec<Stmt>,
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Enter one level of nesting. A failed parse is abandoned, so only the
    /// success paths need to `ascend`.
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(&format!(
                "nesting deeper than {} levels",
                MAX_NESTING
            )));
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, msg: &str) -> GateError {
        script_err(format!("line {}: {}", self.line(), msg))
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<()> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == kw)
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.at_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Tok::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(&format!("expected {}, found {:?}", what, other))),
        }
    }

    fn program(&mut self) -> Result<ScriptProgram> {
        self.expect(Tok::At, "'@tool' decorator")?;
        self.expect_keyword("tool")?;
        self.expect_keyword("fn")?;
        let name = self.expect_name("function name")?;

        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        while *self.peek() != Tok::RParen {
            let pname = self.expect_name("parameter name")?;
            self.expect(Tok::Colon, "':' after parameter name")?;
            let tname = self.expect_name("parameter type")?;
            let ty = ParamType::parse(&tname)
                .ok_or_else(|| self.error(&format!("unknown parameter type '{}'", tname)))?;
            if params.iter().any(|p: &ScriptParam| p.name == pname) {
                return Err(self.error(&format!("duplicate parameter '{}'", pname)));
            }
            params.push(ScriptParam { name: pname, ty });
            if *self.peek() == Tok::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;

        let return_type = if *self.peek() == Tok::Arrow {
            self.advance();
            Some(self.expect_name("return type")?)
        } else {
            None
        };

        let body = self.block()?;
        if *self.peek() != Tok::Eof {
            return Err(self.error("unexpected content after function body"));
        }
        Ok(ScriptProgram {
            name,
            params,
            return_type,
            body,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.descend()?;
        let stmts = self.block_inner();
        self.ascend(1);
        stmts
    }

    fn block_inner(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Tok::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while *self.peek() != Tok::RBrace {
            if *self.peek() == Tok::Eof {
                return Err(self.error("unexpected end of input, missing '}'"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn end_statement(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Semi => {
                self.advance();
                Ok(())
            }
            Tok::RBrace => Ok(()),
            other => Err(self.error(&format!("expected ';', found {:?}", other))),
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.at_keyword("let") {
            self.advance();
            let name = self.expect_name("variable name")?;
            self.expect(Tok::Assign, "'='")?;
            let value = self.expr()?;
            self.end_statement()?;
            return Ok(Stmt::Let(name, value));
        }
        if self.at_keyword("if") {
            return self.if_statement();
        }
        if self.at_keyword("for") {
            self.advance();
            let var = self.expect_name("loop variable")?;
            self.expect_keyword("in")?;
            let iter = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::For(var, iter, body));
        }
        if self.at_keyword("while") {
            self.advance();
            let cond = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::While(cond, body));
        }
        if self.at_keyword("return") {
            self.advance();
            let value = match self.peek() {
                Tok::Semi | Tok::RBrace => None,
                _ => Some(self.expr()?),
            };
            self.end_statement()?;
            return Ok(Stmt::Return(value));
        }
        let is_assign = *self.peek_at(1) == Tok::Assign;
        if let Tok::Ident(name) = self.peek().clone() {
            if is_assign && !KEYWORDS.contains(&name.as_str()) {
                self.advance();
                self.advance();
                let value = self.expr()?;
                self.end_statement()?;
                return Ok(Stmt::Assign(name, value));
            }
        }
        let expr = self.expr()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        self.expect_keyword("if")?;
        loop {
            let cond = self.expr()?;
            let body = self.block()?;
            branches.push((cond, body));
            if !self.at_keyword("else") {
                break;
            }
            self.advance();
            if self.at_keyword("if") {
                self.advance();
                continue;
            }
            otherwise = Some(self.block()?);
            break;
        }
        Ok(Stmt::If(branches, otherwise))
    }

    fn expr(&mut self) -> Result<Expr> {
        self.descend()?;
        let expr = self.or_expr();
        self.ascend(1);
        expr
    }

    // Operator chains build left-nested trees, so each link counts as a level.
    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        let mut links = 0;
        while *self.peek() == Tok::Or {
            self.advance();
            links += 1;
            self.descend()?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.ascend(links);
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        let mut links = 0;
        while *self.peek() == Tok::And {
            self.advance();
            links += 1;
            self.descend()?;
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.ascend(links);
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Tok::Eq => BinOp::Eq,
            Tok::Ne => BinOp::Ne,
            Tok::Lt => BinOp::Lt,
            Tok::Le => BinOp::Le,
            Tok::Gt => BinOp::Gt,
            Tok::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => {
                    self.ascend(links);
                    return Ok(left);
                }
            };
            self.advance();
            links += 1;
            self.descend()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => {
                    self.ascend(links);
                    return Ok(left);
                }
            };
            self.advance();
            links += 1;
            self.descend()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Tok::Minus => {
                self.advance();
                self.descend()?;
                let operand = self.unary()?;
                self.ascend(1);
                Ok(Expr::Neg(Box::new(operand)))
            }
            Tok::Not => {
                self.advance();
                self.descend()?;
                let operand = self.unary()?;
                self.ascend(1);
                Ok(Expr::Not(Box::new(operand)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        let mut links = 0;
        while *self.peek() == Tok::LBracket {
            self.advance();
            links += 1;
            self.descend()?;
            let index = self.expr()?;
            self.expect(Tok::RBracket, "']'")?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        self.ascend(links);
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Lit(Val::Int(i))),
            Tok::Float(f) => Ok(Expr::Lit(Val::Float(f))),
            Tok::Str(s) => Ok(Expr::Lit(Val::Str(s))),
            Tok::Ident(name) => {
                match name.as_str() {
                    "true" => return Ok(Expr::Lit(Val::Bool(true))),
                    "false" => return Ok(Expr::Lit(Val::Bool(false))),
                    "null" => return Ok(Expr::Lit(Val::Null)),
                    kw if KEYWORDS.contains(&kw) => {
                        return Err(script_err(format!(
                            "line {}: unexpected keyword '{}'",
                            line, kw
                        )))
                    }
                    _ => {}
                }
                if *self.peek() == Tok::LParen {
                    self.advance();
                    let args = self.expr_list(Tok::RParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => Ok(Expr::List(self.expr_list(Tok::RBracket, "']'")?)),
            Tok::LBrace => {
                let mut entries = Vec::new();
                while *self.peek() != Tok::RBrace {
                    let key = match self.advance() {
                        Tok::Str(s) | Tok::Ident(s) => s,
                        other => {
                            return Err(self.error(&format!("invalid map key {:?}", other)))
                        }
                    };
                    self.expect(Tok::Colon, "':' after map key")?;
                    entries.push((key, self.expr()?));
                    if *self.peek() == Tok::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Tok::RBrace, "'}'")?;
                Ok(Expr::Map(entries))
            }
            other => Err(script_err(format!(
                "line {}: unexpected token {:?}",
                line, other
            ))),
        }
    }

    fn expr_list(&mut self, close: Tok, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while *self.peek() != close {
            items.push(self.expr()?);
            if *self.peek() == Tok::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }
}

// ============================================================================
// Program API
// ============================================================================

impl ScriptProgram {
    /// Parse tool source.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Script`] with a line number on any syntax error.
    pub fn parse(source: &str) -> Result<Self> {
        if source.len() > MAX_SOURCE_BYTES {
            return Err(script_err(format!(
                "source is {} bytes, limit is {}",
                source.len(),
                MAX_SOURCE_BYTES
            )));
        }
        let tokens = tokenize(source)?;
        Parser::new(tokens).program()
    }

    /// Whether any path through the body contains a `return` statement.
    pub fn has_return(&self) -> bool {
        fn walk(stmts: &[Stmt]) -> bool {
            stmts.iter().any(|s| match s {
                Stmt::Return(_) => true,
                Stmt::If(branches, otherwise) => {
                    branches.iter().any(|(_, b)| walk(b))
                        || otherwise.as_deref().map(walk).unwrap_or(false)
                }
                Stmt::For(_, _, body) | Stmt::While(_, body) => walk(body),
                _ => false,
            })
        }
        walk(&self.body)
    }

    /// Names of every function called anywhere in the body.
    pub fn called_functions(&self) -> BTreeSet<String> {
        fn expr(e: &Expr, out: &mut BTreeSet<String>) {
            match e {
                Expr::Lit(_) | Expr::Var(_) => {}
                Expr::List(items) => items.iter().for_each(|i| expr(i, out)),
                Expr::Map(entries) => entries.iter().for_each(|(_, v)| expr(v, out)),
                Expr::Neg(inner) | Expr::Not(inner) => expr(inner, out),
                Expr::And(a, b) | Expr::Or(a, b) | Expr::Binary(_, a, b) | Expr::Index(a, b) => {
                    expr(a, out);
                    expr(b, out);
                }
                Expr::Call(name, args) => {
                    out.insert(name.clone());
                    args.iter().for_each(|a| expr(a, out));
                }
            }
        }
        fn stmts(list: &[Stmt], out: &mut BTreeSet<String>) {
            for s in list {
                match s {
                    Stmt::Let(_, e) | Stmt::Assign(_, e) | Stmt::Expr(e) => expr(e, out),
                    Stmt::Return(e) => {
                        if let Some(e) = e {
                            expr(e, out);
                        }
                    }
                    Stmt::If(branches, otherwise) => {
                        for (cond, body) in branches {
                            expr(cond, out);
                            stmts(body, out);
                        }
                        if let Some(body) = otherwise {
                            stmts(body, out);
                        }
                    }
                    Stmt::For(_, iter, body) => {
                        expr(iter, out);
                        stmts(body, out);
                    }
                    Stmt::While(cond, body) => {
                        expr(cond, out);
                        stmts(body, out);
                    }
                }
            }
        }
        let mut out = BTreeSet::new();
        stmts(&self.body, &mut out);
        out
    }

    /// Called functions that are not builtins.
    pub fn unknown_functions(&self) -> Vec<String> {
        self.called_functions()
            .into_iter()
            .filter(|f| !BUILTINS.contains(&f.as_str()))
            .collect()
    }

    /// Run with the default step budget; returns the rendered return value.
    pub fn run(&self, args: &JsonValue) -> Result<String> {
        self.run_with_budget(args, DEFAULT_STEP_BUDGET)
    }

    /// Run with an explicit step budget.
    pub fn run_with_budget(&self, args: &JsonValue, budget: u64) -> Result<String> {
        let obj = match args {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => serde_json::Map::new(),
            other => {
                return Err(script_err(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };

        let mut scope = HashMap::new();
        for param in &self.params {
            let raw = obj
                .get(&param.name)
                .ok_or_else(|| script_err(format!("missing argument '{}'", param.name)))?;
            scope.insert(param.name.clone(), coerce(&param.name, param.ty, raw)?);
        }

        let mut interp = Interpreter {
            scopes: vec![scope],
            steps: 0,
            budget,
        };
        match interp.exec_block(&self.body)? {
            Flow::Return(value) => Ok(value.to_string()),
            Flow::Next => Ok(Val::Null.to_string()),
        }
    }
}

fn coerce(name: &str, ty: ParamType, raw: &JsonValue) -> Result<Val> {
    let mismatch = || {
        script_err(format!(
            "argument '{}' must be {}, got {}",
            name, ty, raw
        ))
    };
    match ty {
        ParamType::Str => raw.as_str().map(|s| Val::Str(s.to_string())).ok_or_else(mismatch),
        ParamType::Int => match raw.as_i64() {
            Some(i) => Ok(Val::Int(i)),
            None => match raw.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Val::Int(f as i64)),
                _ => Err(mismatch()),
            },
        },
        ParamType::Float => raw.as_f64().map(Val::Float).ok_or_else(mismatch),
        ParamType::Bool => raw.as_bool().map(Val::Bool).ok_or_else(mismatch),
        ParamType::List if raw.is_array() => Ok(Val::from_json(raw)),
        ParamType::Dict if raw.is_object() => Ok(Val::from_json(raw)),
        _ => Err(mismatch()),
    }
}

// ============================================================================
// Interpreter
// ============================================================================

enum Flow {
    Next,
    Return(Val),
}

struct Interpreter {
    scopes: Vec<HashMap<String, Val>>,
    steps: u64,
    budget: u64,
}

impl Interpreter {
    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.budget {
            Err(script_err(format!(
                "execution budget of {} steps exceeded",
                self.budget
            )))
        } else {
            Ok(())
        }
    }

    fn lookup(&self, name: &str) -> Result<Val> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .cloned()
            .ok_or_else(|| script_err(format!("undefined variable '{}'", name)))
    }

    fn assign(&mut self, name: &str, value: Val) -> Result<()> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(script_err(format!(
            "assignment to undeclared variable '{}' (use let)",
            name
        )))
    }

    fn declare(&mut self, name: &str, value: Val) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        self.scopes.push(HashMap::new());
        let result = self.exec_stmts(stmts);
        self.scopes.pop();
        result
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Let(name, e) => {
                let v = self.eval(e)?;
                self.declare(name, v);
            }
            Stmt::Assign(name, e) => {
                let v = self.eval(e)?;
                self.assign(name, v)?;
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
            Stmt::Return(e) => {
                let v = match e {
                    Some(e) => self.eval(e)?,
                    None => Val::Null,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::If(branches, otherwise) => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            Stmt::For(var, iter, body) => {
                let items: Vec<Val> = match self.eval(iter)? {
                    Val::List(items) => items,
                    Val::Str(s) => s.chars().map(|c| Val::Str(c.to_string())).collect(),
                    Val::Map(m) => m.into_keys().map(Val::Str).collect(),
                    other => {
                        return Err(script_err(format!(
                            "cannot iterate over {}",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.scopes.push(HashMap::from([(var.clone(), item)]));
                    let flow = self.exec_stmts(body);
                    self.scopes.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    self.tick()?;
                    if let Flow::Return(v) = self.exec_block(body)? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Val> {
        self.tick()?;
        match expr {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                check_list(out)
            }
            Expr::Map(entries) => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    let v = self.eval(v)?;
                    out.insert(k.clone(), v);
                }
                check_nesting(Val::Map(out))
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                Val::Int(i) => i
                    .checked_neg()
                    .map(Val::Int)
                    .ok_or_else(|| script_err("integer overflow")),
                Val::Float(f) => Ok(Val::Float(-f)),
                other => Err(script_err(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Not(inner) => Ok(Val::Bool(!self.eval(inner)?.truthy())),
            Expr::And(a, b) => {
                if !self.eval(a)?.truthy() {
                    return Ok(Val::Bool(false));
                }
                Ok(Val::Bool(self.eval(b)?.truthy()))
            }
            Expr::Or(a, b) => {
                if self.eval(a)?.truthy() {
                    return Ok(Val::Bool(true));
                }
                Ok(Val::Bool(self.eval(b)?.truthy()))
            }
            Expr::Binary(op, a, b) => {
                let l = self.eval(a)?;
                let r = self.eval(b)?;
                binary(*op, l, r)
            }
            Expr::Call(name, args) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(self.eval(a)?);
                }
                call_builtin(name, vals)
            }
            Expr::Index(target, index) => {
                let t = self.eval(target)?;
                let i = self.eval(index)?;
                index_value(t, i)
            }
        }
    }
}

fn check_string(s: String) -> Result<Val> {
    if s.len() > MAX_STRING_BYTES {
        return Err(script_err("string size limit exceeded"));
    }
    Ok(Val::Str(s))
}

fn check_list(items: Vec<Val>) -> Result<Val> {
    if items.len() > MAX_COLLECTION_LEN {
        return Err(script_err("list size limit exceeded"));
    }
    check_nesting(Val::List(items))
}

fn check_nesting(value: Val) -> Result<Val> {
    if value.nests_deeper_than(MAX_NESTING) {
        return Err(script_err("value nesting limit exceeded"));
    }
    Ok(value)
}

fn numeric(op: BinOp, l: &Val, r: &Val) -> Result<(f64, f64)> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(script_err(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn compare(l: &Val, r: &Val) -> Result<std::cmp::Ordering> {
    match (l, r) {
        (Val::Int(a), Val::Int(b)) => Ok(a.cmp(b)),
        (Val::Str(a), Val::Str(b)) => Ok(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| script_err("cannot compare NaN")),
            _ => Err(script_err(format!(
                "cannot compare {} with {}",
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

fn binary(op: BinOp, l: Val, r: Val) -> Result<Val> {
    let overflow = || script_err("integer overflow");
    match op {
        BinOp::Add => match (l, r) {
            (Val::Int(a), Val::Int(b)) => a.checked_add(b).map(Val::Int).ok_or_else(overflow),
            (Val::Str(a), Val::Str(b)) => check_string(a + &b),
            (Val::List(mut a), Val::List(b)) => {
                a.extend(b);
                check_list(a)
            }
            (l, r) => numeric(op, &l, &r).map(|(a, b)| Val::Float(a + b)),
        },
        BinOp::Sub => match (l, r) {
            (Val::Int(a), Val::Int(b)) => a.checked_sub(b).map(Val::Int).ok_or_else(overflow),
            (l, r) => numeric(op, &l, &r).map(|(a, b)| Val::Float(a - b)),
        },
        BinOp::Mul => match (l, r) {
            (Val::Int(a), Val::Int(b)) => a.checked_mul(b).map(Val::Int).ok_or_else(overflow),
            (l, r) => numeric(op, &l, &r).map(|(a, b)| Val::Float(a * b)),
        },
        BinOp::Div => {
            let (a, b) = numeric(op, &l, &r)?;
            if b == 0.0 {
                return Err(script_err("division by zero"));
            }
            Ok(Val::Float(a / b))
        }
        BinOp::Rem => match (l, r) {
            (Val::Int(_), Val::Int(0)) => Err(script_err("division by zero")),
            (Val::Int(a), Val::Int(b)) => a.checked_rem_euclid(b).map(Val::Int).ok_or_else(overflow),
            (l, r) => {
                let (a, b) = numeric(op, &l, &r)?;
                if b == 0.0 {
                    return Err(script_err("division by zero"));
                }
                Ok(Val::Float(a % b))
            }
        },
        BinOp::Eq => Ok(Val::Bool(l.loose_eq(&r))),
        BinOp::Ne => Ok(Val::Bool(!l.loose_eq(&r))),
        BinOp::Lt => Ok(Val::Bool(compare(&l, &r)?.is_lt())),
        BinOp::Le => Ok(Val::Bool(compare(&l, &r)?.is_le())),
        BinOp::Gt => Ok(Val::Bool(compare(&l, &r)?.is_gt())),
        BinOp::Ge => Ok(Val::Bool(compare(&l, &r)?.is_ge())),
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    (idx >= 0 && (idx as usize) < len).then_some(idx as usize)
}

fn index_value(target: Val, index: Val) -> Result<Val> {
    match (target, index) {
        (Val::List(items), Val::Int(i)) => resolve_index(i, items.len())
            .map(|idx| items[idx].clone())
            .ok_or_else(|| script_err(format!("list index {} out of range", i))),
        (Val::Str(s), Val::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            resolve_index(i, chars.len())
                .map(|idx| Val::Str(chars[idx].to_string()))
                .ok_or_else(|| script_err(format!("string index {} out of range", i)))
        }
        (Val::Map(map), Val::Str(key)) => map
            .get(&key)
            .cloned()
            .ok_or_else(|| script_err(format!("key '{}' not found", key))),
        (t, i) => Err(script_err(format!(
            "cannot index {} with {}",
            t.type_name(),
            i.type_name()
        ))),
    }
}

// ============================================================================
// Builtins
// ============================================================================

fn arity(name: &str, args: &[Val], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}-{}", min, max)
        };
        return Err(script_err(format!(
            "{}() takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn bad_arg(name: &str, v: &Val) -> GateError {
    script_err(format!("{}() does not accept {}", name, v.type_name()))
}

fn as_str<'a>(name: &str, v: &'a Val) -> Result<&'a str> {
    match v {
        Val::Str(s) => Ok(s),
        other => Err(bad_arg(name, other)),
    }
}

fn as_int(name: &str, v: &Val) -> Result<i64> {
    match v {
        Val::Int(i) => Ok(*i),
        other => Err(bad_arg(name, other)),
    }
}

fn as_num(name: &str, v: &Val) -> Result<f64> {
    v.as_f64().ok_or_else(|| bad_arg(name, v))
}

fn float_to_int(name: &str, f: f64) -> Result<Val> {
    if !f.is_finite() || f.abs() >= 9.2e18 {
        return Err(script_err(format!("{}(): value {} out of integer range", name, f)));
    }
    Ok(Val::Int(f as i64))
}

fn extreme(name: &str, args: Vec<Val>, pick_greater: bool) -> Result<Val> {
    let items = match args.as_slice() {
        [Val::List(items)] => items.clone(),
        _ => args,
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| script_err(format!("{}() of an empty sequence", name)))?;
    for item in iter {
        let ord = compare(&item, &best)?;
        if (pick_greater && ord.is_gt()) || (!pick_greater && ord.is_lt()) {
            best = item;
        }
    }
    Ok(best)
}

fn format_template(template: &str, args: &[Val]) -> Result<String> {
    let mut out = String::new();
    let mut next = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some('{')) => {
                chars.next();
                out.push('{');
            }
            ('}', Some('}')) => {
                chars.next();
                out.push('}');
            }
            ('{', Some('}')) => {
                chars.next();
                let v = args.get(next).ok_or_else(|| {
                    script_err("format(): more placeholders than arguments")
                })?;
                out.push_str(&v.to_string());
                next += 1;
            }
            (c, _) => out.push(c),
        }
        if out.len() > MAX_STRING_BYTES {
            return Err(script_err("string size limit exceeded"));
        }
    }
    if next < args.len() {
        return Err(script_err("format(): more arguments than placeholders"));
    }
    Ok(out)
}

fn call_builtin(name: &str, args: Vec<Val>) -> Result<Val> {
    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Str(s) => Ok(Val::Int(s.chars().count() as i64)),
                Val::List(l) => Ok(Val::Int(l.len() as i64)),
                Val::Map(m) => Ok(Val::Int(m.len() as i64)),
                other => Err(bad_arg(name, other)),
            }
        }
        "str" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(args[0].to_string()))
        }
        "int" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Int(i) => Ok(Val::Int(*i)),
                Val::Float(f) => float_to_int(name, f.trunc()),
                Val::Bool(b) => Ok(Val::Int(*b as i64)),
                Val::Str(s) => {
                    let t = s.trim();
                    match t.parse::<i64>() {
                        Ok(i) => Ok(Val::Int(i)),
                        Err(_) => t
                            .parse::<f64>()
                            .map_err(|_| script_err(format!("int(): invalid literal '{}'", s)))
                            .and_then(|f| float_to_int(name, f.trunc())),
                    }
                }
                other => Err(bad_arg(name, other)),
            }
        }
        "float" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Int(i) => Ok(Val::Float(*i as f64)),
                Val::Float(f) => Ok(Val::Float(*f)),
                Val::Bool(b) => Ok(Val::Float(if *b { 1.0 } else { 0.0 })),
                Val::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Val::Float)
                    .map_err(|_| script_err(format!("float(): invalid literal '{}'", s))),
                other => Err(bad_arg(name, other)),
            }
        }
        "bool" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Bool(args[0].truthy()))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Int(i) => i
                    .checked_abs()
                    .map(Val::Int)
                    .ok_or_else(|| script_err("integer overflow")),
                Val::Float(f) => Ok(Val::Float(f.abs())),
                other => Err(bad_arg(name, other)),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let x = as_num(name, &args[0])?;
            match args.get(1) {
                None => match &args[0] {
                    Val::Int(i) => Ok(Val::Int(*i)),
                    _ => float_to_int(name, x.round()),
                },
                Some(d) => {
                    let digits = as_int(name, d)?.clamp(-15, 15) as i32;
                    let m = 10f64.powi(digits);
                    Ok(Val::Float((x * m).round() / m))
                }
            }
        }
        "floor" => {
            arity(name, &args, 1, 1)?;
            float_to_int(name, as_num(name, &args[0])?.floor())
        }
        "ceil" => {
            arity(name, &args, 1, 1)?;
            float_to_int(name, as_num(name, &args[0])?.ceil())
        }
        "sqrt" => {
            arity(name, &args, 1, 1)?;
            let x = as_num(name, &args[0])?;
            if x < 0.0 {
                return Err(script_err("sqrt() of a negative number"));
            }
            Ok(Val::Float(x.sqrt()))
        }
        "pow" => {
            arity(name, &args, 2, 2)?;
            match (&args[0], &args[1]) {
                (Val::Int(base), Val::Int(exp)) if *exp >= 0 => u32::try_from(*exp)
                    .ok()
                    .and_then(|e| base.checked_pow(e))
                    .map(Val::Int)
                    .ok_or_else(|| script_err("integer overflow")),
                (a, b) => Ok(Val::Float(as_num(name, a)?.powf(as_num(name, b)?))),
            }
        }
        "min" => extreme(name, args, false),
        "max" => extreme(name, args, true),
        "sum" => {
            arity(name, &args, 1, 1)?;
            let Val::List(items) = &args[0] else {
                return Err(bad_arg(name, &args[0]));
            };
            let mut acc = Val::Int(0);
            for item in items {
                if item.as_f64().is_none() {
                    return Err(bad_arg(name, item));
                }
                acc = binary(BinOp::Add, acc, item.clone())?;
            }
            Ok(acc)
        }
        "upper" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(as_str(name, &args[0])?.to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(as_str(name, &args[0])?.to_lowercase()))
        }
        "trim" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(as_str(name, &args[0])?.trim().to_string()))
        }
        "contains" => {
            arity(name, &args, 2, 2)?;
            match (&args[0], &args[1]) {
                (Val::Str(h), Val::Str(n)) => Ok(Val::Bool(h.contains(n.as_str()))),
                (Val::List(items), needle) => {
                    Ok(Val::Bool(items.iter().any(|i| i.loose_eq(needle))))
                }
                (Val::Map(m), Val::Str(k)) => Ok(Val::Bool(m.contains_key(k))),
                (other, _) => Err(bad_arg(name, other)),
            }
        }
        "starts_with" => {
            arity(name, &args, 2, 2)?;
            Ok(Val::Bool(
                as_str(name, &args[0])?.starts_with(as_str(name, &args[1])?),
            ))
        }
        "ends_with" => {
            arity(name, &args, 2, 2)?;
            Ok(Val::Bool(
                as_str(name, &args[0])?.ends_with(as_str(name, &args[1])?),
            ))
        }
        "replace" => {
            arity(name, &args, 3, 3)?;
            let from = as_str(name, &args[1])?;
            if from.is_empty() {
                return Err(script_err("replace(): empty pattern"));
            }
            check_string(as_str(name, &args[0])?.replace(from, as_str(name, &args[2])?))
        }
        "split" => {
            arity(name, &args, 1, 2)?;
            let s = as_str(name, &args[0])?;
            let parts: Vec<Val> = match args.get(1) {
                None => s.split_whitespace().map(|p| Val::Str(p.to_string())).collect(),
                Some(sep) => {
                    let sep = as_str(name, sep)?;
                    if sep.is_empty() {
                        return Err(script_err("split(): empty separator"));
                    }
                    s.split(sep).map(|p| Val::Str(p.to_string())).collect()
                }
            };
            check_list(parts)
        }
        "join" => {
            arity(name, &args, 2, 2)?;
            let Val::List(items) = &args[0] else {
                return Err(bad_arg(name, &args[0]));
            };
            let sep = as_str(name, &args[1])?;
            let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
            check_string(parts.join(sep))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let (start, end, step) = match args.len() {
                1 => (0, as_int(name, &args[0])?, 1),
                2 => (as_int(name, &args[0])?, as_int(name, &args[1])?, 1),
                _ => (
                    as_int(name, &args[0])?,
                    as_int(name, &args[1])?,
                    as_int(name, &args[2])?,
                ),
            };
            if step == 0 {
                return Err(script_err("range(): step must not be zero"));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < end) || (step < 0 && i > end) {
                if out.len() >= MAX_COLLECTION_LEN {
                    return Err(script_err("list size limit exceeded"));
                }
                out.push(Val::Int(i));
                i = match i.checked_add(step) {
                    Some(n) => n,
                    None => break,
                };
            }
            Ok(Val::List(out))
        }
        "keys" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Map(m) => Ok(Val::List(m.keys().cloned().map(Val::Str).collect())),
                other => Err(bad_arg(name, other)),
            }
        }
        "values" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::Map(m) => Ok(Val::List(m.values().cloned().collect())),
                other => Err(bad_arg(name, other)),
            }
        }
        "get" => {
            arity(name, &args, 2, 3)?;
            let default = args.get(2).cloned().unwrap_or(Val::Null);
            match (&args[0], &args[1]) {
                (Val::Map(m), Val::Str(k)) => Ok(m.get(k).cloned().unwrap_or(default)),
                (Val::List(items), Val::Int(i)) => Ok(resolve_index(*i, items.len())
                    .map(|idx| items[idx].clone())
                    .unwrap_or(default)),
                (other, _) => Err(bad_arg(name, other)),
            }
        }
        "push" => {
            arity(name, &args, 2, 2)?;
            let mut args = args;
            let item = args.pop().unwrap_or(Val::Null);
            match args.pop() {
                Some(Val::List(mut items)) => {
                    items.push(item);
                    check_list(items)
                }
                Some(other) => Err(bad_arg(name, &other)),
                None => Err(script_err("push() takes 2 argument(s)")),
            }
        }
        "sort" => {
            arity(name, &args, 1, 1)?;
            let Val::List(items) = &args[0] else {
                return Err(bad_arg(name, &args[0]));
            };
            let mut items = items.clone();
            let mut failure = None;
            items.sort_by(|a, b| {
                compare(a, b).unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    std::cmp::Ordering::Equal
                })
            });
            match failure {
                Some(e) => Err(e),
                None => Ok(Val::List(items)),
            }
        }
        "reverse" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Val::List(items) => Ok(Val::List(items.iter().rev().cloned().collect())),
                Val::Str(s) => Ok(Val::Str(s.chars().rev().collect())),
                other => Err(bad_arg(name, other)),
            }
        }
        "format" => {
            if args.is_empty() {
                return Err(script_err("format() requires a template"));
            }
            let template = as_str(name, &args[0])?;
            Ok(Val::Str(format_template(template, &args[1..])?))
        }
        "type_of" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(args[0].type_name().to_string()))
        }
        _ => Err(script_err(format!("unknown function '{}'", name))),
    }
}
