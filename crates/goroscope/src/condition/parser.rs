//! Recursive-descent parser for conditions.
//!
//! Precedence, loosest first: `||`, `&&`, equality and regex match,
//! ordering, `+ -`, `* / %`, unary `! -`.

use regex::Regex;

use super::lexer::{SpannedToken, Token, tokenize};
use super::{Function, Property};
use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

/// Parsed condition tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Property(Property),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
    /// `expr =~ 'pattern'`, or `!~` when `negated`.
    Match {
        expr: Box<Expr>,
        pattern: Regex,
        negated: bool,
    },
}

pub(crate) fn parse(source: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    if parser.is_at_end() {
        return Err(EvalError::new("empty condition"));
    }
    let expr = parser.parse_or()?;
    if !parser.is_at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// Offset reported for errors at end of input.
    end: usize,
}

impl Parser {
    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek_token(), Some(Token::OrOr)) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while matches!(self.peek_token(), Some(Token::AndAnd)) {
            self.advance();
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Match) => {
                    self.advance();
                    left = self.parse_match(left, false)?;
                    continue;
                }
                Some(Token::NotMatch) => {
                    self.advance();
                    left = self.parse_match(left, true)?;
                    continue;
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_match(&mut self, left: Expr, negated: bool) -> Result<Expr, EvalError> {
        let offset = self.current_offset();
        let Some(Token::Str(pattern)) = self.peek_token() else {
            return Err(self.error("regex match needs a string literal pattern"));
        };
        let pattern = Regex::new(pattern)
            .map_err(|err| EvalError::at(offset, format!("invalid regex: {err}")))?;
        self.advance();
        Ok(Expr::Match {
            expr: Box::new(left),
            pattern,
            negated,
        })
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_term()?;
        while let Some(op) = match self.peek_token() {
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        } {
            self.advance();
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_factor()?;
        while let Some(op) = match self.peek_token() {
            Some(Token::Plus) => Some(BinaryOp::Add),
            Some(Token::Minus) => Some(BinaryOp::Sub),
            _ => None,
        } {
            self.advance();
            let right = self.parse_factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = match self.peek_token() {
            Some(Token::Star) => Some(BinaryOp::Mul),
            Some(Token::Slash) => Some(BinaryOp::Div),
            Some(Token::Percent) => Some(BinaryOp::Rem),
            _ => None,
        } {
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek_token() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.current_offset();
        let Some(token) = self.peek_token().cloned() else {
            return Err(self.error("expected expression"));
        };
        self.advance();
        match token {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Token::Ident(name) if matches!(self.peek_token(), Some(Token::LParen)) => {
                self.advance();
                let func = Function::from_name(&name)
                    .ok_or_else(|| EvalError::at(offset, format!("unknown function {name}()")))?;
                let args = self.parse_args()?;
                func.check_arity(args.len())
                    .map_err(|message| EvalError::at(offset, message))?;
                Ok(Expr::Call { func, args })
            }
            Token::Ident(name) => Property::from_name(&name)
                .map(Expr::Property)
                .ok_or_else(|| EvalError::at(offset, format!("unknown property {name:?}"))),
            _ => Err(EvalError::at(offset, "expected expression")),
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if matches!(self.peek_token(), Some(Token::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if !matches!(self.peek_token(), Some(Token::Comma)) {
                break;
            }
            self.advance();
        }
        self.expect(Token::RParen, "expected ',' or ')' in argument list")?;
        Ok(args)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn current_offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, expected: Token, message: &str) -> Result<(), EvalError> {
        if self.peek_token() == Some(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> EvalError {
        EvalError::at(self.current_offset(), message)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("id == 1 || id == 2 && dups > 0").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary root");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(
            *right,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn arithmetic_binds_tighter_than_comparison() {
        let expr = parse("lines - 1 > 2 * 3").unwrap();
        let Expr::Binary { op, left, right } = expr else {
            panic!("expected binary root");
        };
        assert_eq!(op, BinaryOp::Gt);
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn nested_calls() {
        let expr = parse("contains(lower(trace), 'handlestream')").unwrap();
        let Expr::Call { func, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(func, Function::Contains);
        assert!(matches!(
            &args[0],
            Expr::Call {
                func: Function::Lower,
                ..
            }
        ));
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        let err = parse("contains(trace)").unwrap_err();
        assert_eq!(err.message(), "contains() accepts exactly two arguments");
        assert_eq!(err.offset(), Some(0));

        let err = parse("id > 1 && lower()").unwrap_err();
        assert_eq!(err.message(), "lower() accepts exactly one argument");
        assert_eq!(err.offset(), Some(10));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            parse("goroutine > 1").unwrap_err().message(),
            "unknown property \"goroutine\""
        );
        assert_eq!(parse("len(trace)").unwrap_err().message(), "unknown function len()");
    }

    #[test]
    fn syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("id >").is_err());
        assert!(parse("(id > 1").is_err());
        assert!(parse("id > 1 )").is_err());
        assert!(parse("contains(trace, 'a'").is_err());
        assert!(parse("state =~ state").is_err());
        assert!(parse("state =~ '('").is_err());
    }

    #[test]
    fn regex_match_compiles_once() {
        let expr = parse("trace !~ 'net/http'").unwrap();
        let Expr::Match { pattern, negated, .. } = expr else {
            panic!("expected match");
        };
        assert!(negated);
        assert_eq!(pattern.as_str(), "net/http");
    }
}
