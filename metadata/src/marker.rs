//! Environment markers (`; python_version < "3" and extra == "tests"`).
//!
//! Markers are parsed into a [`MarkerTree`]. The resolver never evaluates
//! markers against an interpreter; it only needs [`MarkerTree::split_extra`] to
//! group conditional requirements under the extra that activates them.

use std::{fmt, str::FromStr};

use crate::{error::Error, names::normalize_name};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(String),
    Literal(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(name) => f.write_str(name),
            MarkerValue::Literal(value) if value.contains('"') => write!(f, "'{value}'"),
            MarkerValue::Literal(value) => write!(f, "\"{value}\""),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerOp {
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Compatible,
    Arbitrary,
    In,
    NotIn,
}

impl MarkerOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => MarkerOp::Equal,
            "!=" => MarkerOp::NotEqual,
            "<=" => MarkerOp::LessEqual,
            ">=" => MarkerOp::GreaterEqual,
            "<" => MarkerOp::Less,
            ">" => MarkerOp::Greater,
            "~=" => MarkerOp::Compatible,
            "===" => MarkerOp::Arbitrary,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            MarkerOp::Equal => "==",
            MarkerOp::NotEqual => "!=",
            MarkerOp::LessEqual => "<=",
            MarkerOp::GreaterEqual => ">=",
            MarkerOp::Less => "<",
            MarkerOp::Greater => ">",
            MarkerOp::Compatible => "~=",
            MarkerOp::Arbitrary => "===",
            MarkerOp::In => "in",
            MarkerOp::NotIn => "not in",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    fn as_str(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerTree {
    /// `lhs op rhs` for anything other than an `extra == "..."` test.
    Compare {
        lhs: MarkerValue,
        op: MarkerOp,
        rhs: MarkerValue,
    },
    /// `extra == "name"`, with the name normalized.
    Extra(String),
    Node {
        op: BoolOp,
        lhs: Box<MarkerTree>,
        rhs: Box<MarkerTree>,
    },
}

impl MarkerTree {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        let tree = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(tree)
    }

    pub fn and(lhs: MarkerTree, rhs: MarkerTree) -> Self {
        MarkerTree::Node {
            op: BoolOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: MarkerTree, rhs: MarkerTree) -> Self {
        MarkerTree::Node {
            op: BoolOp::Or,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Separate the extra that activates this marker from the rest of the expression.
    ///
    /// Returns `(extra, residual)`. When both sides of a node name an extra, the
    /// left one wins and the right one is dropped along with its comparison.
    pub fn split_extra(&self) -> (Option<String>, Option<MarkerTree>) {
        match self {
            MarkerTree::Extra(name) => (Some(name.clone()), None),
            MarkerTree::Compare { .. } => (None, Some(self.clone())),
            MarkerTree::Node { op, lhs, rhs } => {
                let (lextra, lrest) = lhs.split_extra();
                let (rextra, rrest) = rhs.split_extra();
                let extra = lextra.or(rextra);
                (extra, combine(*op, lrest, rrest))
            }
        }
    }

    /// The key under which a requirement carrying this marker is grouped:
    /// `extra`, `extra:residual` or `:residual`.
    pub fn group_key(&self) -> String {
        match self.split_extra() {
            (Some(extra), None) => extra,
            (Some(extra), Some(rest)) => format!("{extra}:{rest}"),
            (None, Some(rest)) => format!(":{rest}"),
            (None, None) => String::new(),
        }
    }
}

fn combine(op: BoolOp, lhs: Option<MarkerTree>, rhs: Option<MarkerTree>) -> Option<MarkerTree> {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => Some(MarkerTree::Node {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }),
        (Some(tree), None) | (None, Some(tree)) => Some(tree),
        (None, None) => None,
    }
}

impl FromStr for MarkerTree {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerTree::Compare { lhs, op, rhs } => write!(f, "{lhs} {} {rhs}", op.as_str()),
            MarkerTree::Extra(name) => write!(f, "extra == \"{name}\""),
            MarkerTree::Node { op, lhs, rhs } => {
                write_operand(f, *op, lhs)?;
                write!(f, " {} ", op.as_str())?;
                write_operand(f, *op, rhs)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, parent: BoolOp, tree: &MarkerTree) -> fmt::Result {
    match tree {
        MarkerTree::Node { op, .. } if parent == BoolOp::And && *op == BoolOp::Or => {
            write!(f, "({tree})")
        }
        _ => write!(f, "{tree}"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Str(String),
    Ident(String),
    Op(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let invalid = |message: &str| Error::InvalidMarker {
        marker: input.to_string(),
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(ch) => value.push(ch),
                        None => return Err(invalid("unterminated string")),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '<' | '>' | '=' | '!' | '~' => {
                let mut op = String::new();
                while let Some(&ch) = chars.peek() {
                    if !matches!(ch, '<' | '>' | '=' | '!' | '~') {
                        break;
                    }
                    op.push(ch);
                    chars.next();
                }
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '.') {
                        break;
                    }
                    ident.push(ch);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(invalid(&format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::InvalidMarker {
            marker: self.input.to_string(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<MarkerTree, Error> {
        let mut tree = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            tree = MarkerTree::or(tree, rhs);
        }
        Ok(tree)
    }

    fn parse_and(&mut self) -> Result<MarkerTree, Error> {
        let mut tree = self.parse_atom()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_atom()?;
            tree = MarkerTree::and(tree, rhs);
        }
        Ok(tree)
    }

    fn parse_atom(&mut self) -> Result<MarkerTree, Error> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let tree = self.parse_or()?;
            if self.next() != Some(Token::RParen) {
                return Err(self.error("expected `)`"));
            }
            return Ok(tree);
        }

        let lhs = self.parse_value()?;
        let op = self.parse_op()?;
        let rhs = self.parse_value()?;

        let extra = match (&lhs, op, &rhs) {
            (MarkerValue::Variable(var), MarkerOp::Equal, MarkerValue::Literal(value))
            | (MarkerValue::Literal(value), MarkerOp::Equal, MarkerValue::Variable(var))
                if var == "extra" =>
            {
                Some(normalize_name(value))
            }
            _ => None,
        };

        Ok(match extra {
            Some(name) => MarkerTree::Extra(name),
            None => MarkerTree::Compare { lhs, op, rhs },
        })
    }

    fn parse_value(&mut self) -> Result<MarkerValue, Error> {
        match self.next() {
            Some(Token::Str(value)) => Ok(MarkerValue::Literal(value)),
            Some(Token::Ident(name)) if !matches!(name.as_str(), "and" | "or" | "in" | "not") => {
                Ok(MarkerValue::Variable(name))
            }
            _ => Err(self.error("expected a marker variable or string")),
        }
    }

    fn parse_op(&mut self) -> Result<MarkerOp, Error> {
        match self.next() {
            Some(Token::Op(symbol)) => {
                MarkerOp::from_symbol(&symbol).ok_or_else(|| self.error("unknown operator"))
            }
            Some(Token::Ident(word)) if word == "in" => Ok(MarkerOp::In),
            Some(Token::Ident(word)) if word == "not" && self.eat_keyword("in") => {
                Ok(MarkerOp::NotIn)
            }
            _ => Err(self.error("expected a comparison operator")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(s: &str) -> MarkerTree {
        MarkerTree::parse(s).unwrap()
    }

    #[test]
    fn extra_leaf_is_recognized_in_either_order() {
        assert_eq!(tree("extra == 'Socks'"), MarkerTree::Extra("socks".into()));
        assert_eq!(tree("\"tests\" == extra"), MarkerTree::Extra("tests".into()));
        assert!(matches!(
            tree("extra != 'tests'"),
            MarkerTree::Compare { .. }
        ));
    }

    #[test]
    fn split_extra_on_plain_comparison() {
        let (extra, rest) = tree("python_version < '3'").split_extra();
        assert_eq!(extra, None);
        assert_eq!(rest.unwrap().to_string(), "python_version < \"3\"");
    }

    #[test]
    fn split_extra_keeps_residual_from_both_sides() {
        let marker = tree(
            "(python_version < '3.8' and extra == 'test') and sys_platform == 'win32'",
        );
        let (extra, rest) = marker.split_extra();
        assert_eq!(extra.as_deref(), Some("test"));
        assert_eq!(
            rest.unwrap().to_string(),
            "python_version < \"3.8\" and sys_platform == \"win32\""
        );
    }

    #[test]
    fn group_keys() {
        assert_eq!(tree("extra == 'socks'").group_key(), "socks");
        assert_eq!(
            tree("sys_platform == 'win32' and extra == 'socks'").group_key(),
            "socks:sys_platform == \"win32\""
        );
        assert_eq!(
            tree("os_name == 'nt' or os_name == 'posix'").group_key(),
            ":os_name == \"nt\" or os_name == \"posix\""
        );
    }

    #[test]
    fn parenthesizes_or_inside_and() {
        let marker = tree("(os_name == 'nt' or os_name == 'posix') and python_version >= '3'");
        assert_eq!(
            marker.to_string(),
            "(os_name == \"nt\" or os_name == \"posix\") and python_version >= \"3\""
        );
    }

    #[test]
    fn membership_operators() {
        let marker = tree("'linux' not in sys_platform");
        assert!(matches!(
            marker,
            MarkerTree::Compare {
                op: MarkerOp::NotIn,
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_markers() {
        assert!(MarkerTree::parse("python_version <").is_err());
        assert!(MarkerTree::parse("(os_name == 'nt'").is_err());
        assert!(MarkerTree::parse("os_name == 'nt' junk").is_err());
        assert!(MarkerTree::parse("os_name == 'nt").is_err());
    }
}
