//! `${{ }}` expression language used by step guards and templates
//!
//! Supports literals (`'text'`, numbers, `true`, `false`, `null`), dotted
//! context paths (`matrix.toolchain`, `github.ref`), `!`, `==`, `!=`, `&&`,
//! `||`, parentheses and the `contains`, `startsWith`, `endsWith` functions.
//! `||` and `&&` return operand values, so `a || b` works as a fallback.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing an expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Resolves dotted context paths to values
pub trait Resolver {
    fn resolve(&self, path: &str) -> Option<String>;
}

impl Resolver for HashMap<String, String> {
    fn resolve(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Runtime value of an evaluated expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
        }
    }

    /// Loose equality: numeric when both sides are numeric, otherwise
    /// case-insensitive string comparison
    fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => {
                a.eq_ignore_ascii_case(b)
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => a.to_string().eq_ignore_ascii_case(&b.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Path(String),
    Not(Box<Expression>),
    Eq(Box<Expression>, Box<Expression>),
    Ne(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Call { name: Function, args: Vec<Expression> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "contains" => Some(Function::Contains),
            "startswith" => Some(Function::StartsWith),
            "endswith" => Some(Function::EndsWith),
            _ => None,
        }
    }
}

impl Expression {
    /// Parse a bare expression or a single `${{ ... }}` wrapped one
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let inner = strip_delimiters(source);
        let tokens = tokenize(inner)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }

    /// Evaluate against the given resolver
    pub fn evaluate(&self, resolver: &dyn Resolver) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::Path(path) => resolver
                .resolve(path)
                .map(Value::String)
                .unwrap_or(Value::Null),
            Expression::Not(inner) => Value::Bool(!inner.evaluate(resolver).is_truthy()),
            Expression::Eq(a, b) => {
                Value::Bool(a.evaluate(resolver).loosely_equals(&b.evaluate(resolver)))
            }
            Expression::Ne(a, b) => {
                Value::Bool(!a.evaluate(resolver).loosely_equals(&b.evaluate(resolver)))
            }
            Expression::And(a, b) => {
                let left = a.evaluate(resolver);
                if left.is_truthy() {
                    b.evaluate(resolver)
                } else {
                    left
                }
            }
            Expression::Or(a, b) => {
                let left = a.evaluate(resolver);
                if left.is_truthy() {
                    left
                } else {
                    b.evaluate(resolver)
                }
            }
            Expression::Call { name, args } => {
                let haystack = args[0].evaluate(resolver).to_string().to_lowercase();
                let needle = args[1].evaluate(resolver).to_string().to_lowercase();
                Value::Bool(match name {
                    Function::Contains => haystack.contains(&needle),
                    Function::StartsWith => haystack.starts_with(&needle),
                    Function::EndsWith => haystack.ends_with(&needle),
                })
            }
        }
    }

    /// Evaluate as a guard condition
    pub fn is_satisfied(&self, resolver: &dyn Resolver) -> bool {
        self.evaluate(resolver).is_truthy()
    }
}

fn strip_delimiters(source: &str) -> &str {
    let trimmed = source.trim();
    match trimmed.strip_prefix("${{").and_then(|s| s.strip_suffix("}}")) {
        Some(inner) if !inner.contains("${{") => inner.trim(),
        _ => trimmed,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Eq => f.write_str("=="),
            Token::Ne => f.write_str("!="),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' => {
                // '' is an escaped quote
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            ch => return Err(ExpressionError::UnexpectedChar { ch, pos: i }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression, ExpressionError> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expression::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expression::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        match self.next() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some(Token::Str(s)) => Ok(Expression::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expression::Literal(Value::Number(n))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expression::Literal(Value::Bool(true))),
                "false" => Ok(Expression::Literal(Value::Bool(false))),
                "null" => Ok(Expression::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.parse_call(name),
                _ => Ok(Expression::Path(name)),
            },
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expression, ExpressionError> {
        let function =
            Function::from_name(&name).ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != 2 {
            return Err(ExpressionError::Arity {
                name,
                expected: 2,
                got: args.len(),
            });
        }

        Ok(Expression::Call {
            name: function,
            args,
        })
    }
}
