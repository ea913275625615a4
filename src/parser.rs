use std::{collections::HashMap, io::BufRead};

use tracing::trace;

use crate::{
    ast::{ASTNode, Expression, Function, Prototype},
    lexer::{LexError, Lexer, Token},
};

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("expected ')'")]
    ExpectedCloseParen,
    #[error("unknown token {0}, expected an expression")]
    UnknownToken(Token),
    #[error("expected ')' or ',' in argument list, found {0}")]
    ExpectedArgumentDelimiter(Token),
    #[error("expected function name in prototype, found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype, found {0}")]
    ExpectedPrototypeOpen(Token),
    #[error("expected ')' in prototype, found {0}")]
    ExpectedPrototypeClose(Token),
    #[error(transparent)]
    Lex(#[from] LexError),
}

pub type PartialParseResult = Result<Expression, ParserError>;

fn default_precedence() -> HashMap<char, i32> {
    let mut operator_precedence = HashMap::new();
    operator_precedence.insert('<', 10);
    operator_precedence.insert('>', 10);
    operator_precedence.insert('+', 20);
    operator_precedence.insert('-', 20);
    operator_precedence.insert('*', 40);
    operator_precedence.insert('/', 40);
    operator_precedence
}

/// Recursive descent parser holding a single token of lookahead.
///
/// A fresh parser has not read anything yet; call [`Parser::advance`] once to
/// load the first token.
pub struct Parser<R> {
    lexer: Lexer<R>,
    current: Token,
    pub operator_precedence: HashMap<char, i32>,
}

impl<R: BufRead> Parser<R> {
    pub fn new(lexer: Lexer<R>) -> Self {
        Parser {
            lexer,
            current: Token::Eof,
            operator_precedence: default_precedence(),
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn advance(&mut self) -> Result<(), ParserError> {
        self.current = self.lexer.next_token()?;
        trace!(token = %self.current, "advanced");
        Ok(())
    }

    /// The current token as a binary operator, if the table knows it.
    fn binary_operator(&self) -> Option<(char, i32)> {
        match self.current {
            Token::Char(op) => self.operator_precedence.get(&op).map(|&prec| (op, prec)),
            _ => None,
        }
    }

    fn parse_number(&mut self, value: f64) -> PartialParseResult {
        self.advance()?;
        Ok(Expression::Literal(value))
    }

    fn parse_identifier(&mut self, ident: String) -> PartialParseResult {
        self.advance()?;

        if self.current != Token::Char('(') {
            return Ok(Expression::Variable(ident));
        }
        self.advance()?;

        let mut args = Vec::new();
        if self.current != Token::Char(')') {
            loop {
                args.push(self.parse_expr()?);

                match self.current {
                    Token::Char(')') => break,
                    Token::Char(',') => self.advance()?,
                    ref other => return Err(ParserError::ExpectedArgumentDelimiter(other.clone())),
                }
            }
        }
        self.advance()?;

        Ok(Expression::Call(ident, args))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.advance()?;
        let res = self.parse_expr()?;
        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedCloseParen);
        }
        self.advance()?;
        Ok(res)
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Number(value) => self.parse_number(value),
            Token::Ident(ref ident) => {
                let ident = ident.clone();
                self.parse_identifier(ident)
            }
            Token::Char('(') => self.parse_nested(),
            ref other => Err(ParserError::UnknownToken(other.clone())),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match self.binary_operator() {
                Some((op, prec)) if prec >= expr_precedence => (op, prec),
                _ => return Ok(result),
            };
            self.advance()?;

            let mut rhs = self.parse_primary()?;

            if let Some((_, next_precedence)) = self.binary_operator() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            result = Expression::binary(operator, result, rhs);
        }
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    pub fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = match self.current {
            Token::Ident(ref name) => name.clone(),
            ref other => return Err(ParserError::ExpectedFunctionName(other.clone())),
        };
        self.advance()?;

        if self.current != Token::Char('(') {
            return Err(ParserError::ExpectedPrototypeOpen(self.current.clone()));
        }

        let mut args = Vec::new();
        loop {
            self.advance()?;
            match self.current {
                Token::Ident(ref arg) => args.push(arg.clone()),
                _ => break,
            }
        }

        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedPrototypeClose(self.current.clone()));
        }
        self.advance()?;

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.advance()?;
        let prototype = self.parse_prototype()?;
        let body = self.parse_expr()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.advance()?;
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expr()?;
        Ok(Function {
            prototype: Prototype::anonymous(),
            body,
        })
    }

    /// Parse whatever top-level form starts at the current token.
    ///
    /// Empty `;` separators are not forms; the caller skips them.
    pub fn parse_top_level(&mut self) -> Result<ASTNode, ParserError> {
        match self.current {
            Token::Def => self.parse_definition().map(ASTNode::Function),
            Token::Extern => self.parse_extern().map(ASTNode::Extern),
            _ => self.parse_top_level_expr().map(ASTNode::Function),
        }
    }
}
