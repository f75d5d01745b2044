use logos::Logos;

use crate::error::EvalError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub(crate) enum Token {
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    // overflow fails the callback and surfaces as a lex error
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, unquote)]
    #[regex(r#"'([^'\\]|\\.)*'"#, unquote)]
    Str(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("=~")]
    Match,
    #[token("!~")]
    NotMatch,

    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
}

/// Strips the quotes and unescapes `\\`, `\'` and `\"`. Other escapes are
/// kept verbatim so regex patterns survive.
fn unquote(lex: &mut logos::Lexer<Token>) -> String {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(q @ ('\\' | '\'' | '"')) => out.push(q),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpannedToken {
    pub token: Token,
    /// Byte offset of the token start.
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<SpannedToken>, EvalError> {
    let mut tokens = Vec::new();
    let mut lex = Token::lexer(source);
    while let Some(token) = lex.next() {
        let span = lex.span();
        match token {
            Ok(token) => tokens.push(SpannedToken {
                token,
                offset: span.start,
            }),
            Err(()) => {
                return Err(EvalError::at(
                    span.start,
                    format!("unexpected input {:?}", &source[span]),
                ));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(
            kinds("duration >= 10 && !(state != 'running')"),
            vec![
                Token::Ident("duration".to_string()),
                Token::Ge,
                Token::Int(10),
                Token::AndAnd,
                Token::Bang,
                Token::LParen,
                Token::Ident("state".to_string()),
                Token::Ne,
                Token::Str("running".to_string()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn both_quote_styles_and_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"" 'it\'s'"#),
            vec![
                Token::Str("say \"hi\"".to_string()),
                Token::Str("it's".to_string()),
            ]
        );
    }

    #[test]
    fn regex_escapes_survive() {
        assert_eq!(
            kinds(r"'\(\*conn\)\.serve'"),
            vec![Token::Str(r"\(\*conn\)\.serve".to_string())]
        );
    }

    #[test]
    fn keywords_win_over_identifiers_only_on_exact_match() {
        assert_eq!(
            kinds("true trueish"),
            vec![Token::True, Token::Ident("trueish".to_string())]
        );
    }

    #[test]
    fn bad_input_reports_offset() {
        let err = tokenize("id == 1 # 2").unwrap_err();
        assert_eq!(err.offset(), Some(8));
    }

    #[test]
    fn integer_overflow_is_a_lex_error() {
        assert!(tokenize("id > 99999999999999999999").is_err());
    }
}
