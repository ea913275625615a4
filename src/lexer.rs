use std::{collections::VecDeque, fmt, io::BufRead};

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    /// Any other single character, standing for itself.
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Number(value) => write!(f, "number {}", value),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid number literal {0}")]
    InvalidNumber(String),
}

lazy_static! {
    static ref IGNORE_RE: Regex = Regex::new(r"#.*$").unwrap();
    static ref TOKEN_RE: Regex = Regex::new(
        &[
            r"(?P<ident>[A-Za-z][A-Za-z0-9]*)",
            r"(?P<number>\d+(?:\.\d*)?|\.\d+)",
            r"(?P<char>\S)",
        ]
        .join("|")
    )
    .unwrap();
}

fn preprocess(line: &str) -> std::borrow::Cow<'_, str> {
    IGNORE_RE.replace(line.trim_end_matches(&['\n', '\r'][..]), "")
}

/// Tokenize a single line of source, appending to `out` in order.
fn lex_line(line: &str, out: &mut VecDeque<Token>) -> Result<(), LexError> {
    let preprocessed = preprocess(line);

    for cap in TOKEN_RE.captures_iter(&preprocessed) {
        let token = if let Some(ident) = cap.name("ident") {
            match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                name => Token::Ident(name.to_string()),
            }
        } else if let Some(number) = cap.name("number") {
            let text = number.as_str();
            let value = text
                .parse()
                .map_err(|_| LexError::InvalidNumber(text.to_string()))?;
            Token::Number(value)
        } else if let Some(c) = cap.name("char").and_then(|m| m.as_str().chars().next()) {
            Token::Char(c)
        } else {
            continue;
        };

        out.push_back(token);
    }

    Ok(())
}

/// Pulls tokens out of a buffered reader, one line at a time.
///
/// Once the reader is exhausted every further call yields [`Token::Eof`].
pub struct Lexer<R> {
    input: R,
    pending: VecDeque<Token>,
    exhausted: bool,
}

impl<R: BufRead> Lexer<R> {
    pub fn new(input: R) -> Self {
        Lexer {
            input,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            if self.exhausted {
                return Ok(Token::Eof);
            }

            // Bytes that are not UTF-8 become U+FFFD and lex as a stray
            // character, so the parser reports them like any other bad token.
            let mut line = Vec::new();
            if self.input.read_until(b'\n', &mut line)? == 0 {
                self.exhausted = true;
                continue;
            }
            lex_line(&String::from_utf8_lossy(&line), &mut self.pending)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex_all(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input.as_bytes());
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token().unwrap() {
                Token::Eof => break,
                token => tokens.push(token),
            }
        }
        tokens
    }

    #[test]
    fn ignore_works() {
        assert_eq!(preprocess("a # somebody\n"), "a ");
        assert_eq!(lex_all("# somebody \na"), [Token::Ident("a".to_string())]);
    }

    #[test]
    fn lex_works() {
        let input = "def add(x) x+1.0;";
        let tokenized = [
            Token::Def,
            Token::Ident("add".to_string()),
            Token::Char('('),
            Token::Ident("x".to_string()),
            Token::Char(')'),
            Token::Ident("x".to_string()),
            Token::Char('+'),
            Token::Number(1.0),
            Token::Char(';'),
        ];
        assert_eq!(lex_all(input), tokenized);
    }

    #[test]
    fn keywords_only_match_whole_identifiers() {
        assert_eq!(
            lex_all("extern define"),
            [Token::Extern, Token::Ident("define".to_string())]
        );
    }

    #[test]
    fn numbers_take_at_most_one_point() {
        assert_eq!(
            lex_all("1.2.3 .5 7."),
            [
                Token::Number(1.2),
                Token::Number(0.3),
                Token::Number(0.5),
                Token::Number(7.0)
            ]
        );
        assert_eq!(lex_all("4-2"), [Token::Number(4.0), Token::Char('-'), Token::Number(2.0)]);
    }

    #[test]
    fn identifiers_are_alphanumeric() {
        assert_eq!(
            lex_all("x1_y"),
            [
                Token::Ident("x1".to_string()),
                Token::Char('_'),
                Token::Ident("y".to_string())
            ]
        );
        assert_eq!(lex_all("2x"), [Token::Number(2.0), Token::Ident("x".to_string())]);
    }

    #[test]
    fn invalid_utf8_is_a_stray_character() {
        let mut lexer = Lexer::new(&b"\xff;\ndef"[..]);
        assert_eq!(lexer.next_token().unwrap(), Token::Char('\u{fffd}'));
        assert_eq!(lexer.next_token().unwrap(), Token::Char(';'));
        assert_eq!(lexer.next_token().unwrap(), Token::Def);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn eof_repeats() {
        let mut lexer = Lexer::new("x\n\n".as_bytes());
        assert_eq!(lexer.next_token().unwrap(), Token::Ident("x".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }
}
