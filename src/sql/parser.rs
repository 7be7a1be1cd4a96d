//! Recursive-descent parser fulfilling the `ParsedStmt` contract of §6.3.
//!
//! `Parser::parse` tokenizes one statement and builds a [`Statement`]: the
//! grammar covers exactly `USE`, `CREATE TABLE`, `INSERT INTO`, `SELECT`,
//! and `DELETE`, plus the predicate/`ORDER BY`/`LIMIT`/`OFFSET` clauses
//! `SELECT`/`DELETE` share.

use crate::error::{EngineError, Result};
use crate::sql::ast::*;
use crate::sql::lexer::{Lexer, Token};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse one SQL statement (an optional trailing `;` is consumed but
    /// not required).
    pub fn parse(sql: &str) -> Result<Statement> {
        let tokens = Lexer::new(sql).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let stmt = parser.parse_statement()?;
        if parser.current() == &Token::Semicolon {
            parser.advance();
        }
        if parser.current() != &Token::Eof {
            return Err(EngineError::InvalidSql(format!(
                "unexpected trailing tokens starting at {:?}",
                parser.current()
            )));
        }
        Ok(stmt)
    }

    // -- token helpers --------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(EngineError::InvalidSql(format!(
                "expected {:?}, found {:?}",
                expected,
                self.current()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(EngineError::InvalidSql(format!("expected identifier, found {other:?}"))),
        }
    }

    // -- statements -------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current() {
            Token::Use => self.parse_use(),
            Token::Create => self.parse_create_table(),
            Token::Insert => self.parse_insert(),
            Token::Select => self.parse_select(),
            Token::Delete => self.parse_delete(),
            other => Err(EngineError::InvalidSql(format!("unrecognized statement starting at {other:?}"))),
        }
    }

    fn parse_use(&mut self) -> Result<Statement> {
        self.expect(&Token::Use)?;
        let table = self.expect_ident()?;
        Ok(Statement::Use(table))
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect(&Token::Create)?;
        self.expect(&Token::Table)?;
        let table = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let type_name = self.expect_ident()?;
            columns.push(ColumnDecl { name, type_name });
            if self.current() == &Token::Comma {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(&Token::RParen)?;
        Ok(Statement::CreateTable(CreateTableStmt { table, columns }))
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table = self.expect_ident()?;
        let mut values = Vec::new();
        loop {
            match self.current().clone() {
                Token::Semicolon | Token::Eof => break,
                _ => values.push(self.parse_raw_value()?),
            }
        }
        Ok(Statement::Insert(InsertStmt { table, values }))
    }

    /// One insert value: identifiers, numbers, and quoted strings all pass
    /// through as their raw text (§4.6 — the row codec decides how to
    /// interpret each column's text at serialization time).
    fn parse_raw_value(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            Token::Number(s) => Ok(s),
            Token::Str(s) => Ok(s),
            other => Err(EngineError::InvalidSql(format!("expected a value, found {other:?}"))),
        }
    }

    fn parse_select(&mut self) -> Result<Statement> {
        self.expect(&Token::Select)?;
        let projection = if self.current() == &Token::Star {
            self.advance();
            Projection::All
        } else {
            let mut cols = vec![self.expect_ident()?];
            while self.current() == &Token::Comma {
                self.advance();
                cols.push(self.expect_ident()?);
            }
            Projection::Columns(cols)
        };
        self.expect(&Token::From)?;
        let table = self.expect_ident()?;

        let filter = self.parse_optional_where()?;
        let order_by = self.parse_optional_order_by()?;
        let limit = self.parse_optional_clause(&Token::Limit)?;
        let offset = self.parse_optional_clause(&Token::Offset)?;

        Ok(Statement::Select(SelectStmt { table, projection, filter, order_by, limit, offset }))
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table = self.expect_ident()?;
        let filter = self.parse_optional_where()?;
        Ok(Statement::Delete(DeleteStmt { table, filter }))
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expr>> {
        if self.current() == &Token::Where {
            self.advance();
            Ok(Some(self.parse_or_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_optional_order_by(&mut self) -> Result<Option<OrderBy>> {
        if self.current() == &Token::Order {
            self.advance();
            self.expect(&Token::By)?;
            let column = self.expect_ident()?;
            let desc = match self.current() {
                Token::Desc => {
                    self.advance();
                    true
                }
                Token::Asc => {
                    self.advance();
                    false
                }
                _ => false,
            };
            Ok(Some(OrderBy { column, desc }))
        } else {
            Ok(None)
        }
    }

    fn parse_optional_clause(&mut self, keyword: &Token) -> Result<Option<usize>> {
        if self.current() == keyword {
            self.advance();
            match self.advance() {
                Token::Number(n) => n
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| EngineError::InvalidSql(format!("invalid numeric literal: {n}"))),
                other => Err(EngineError::InvalidSql(format!("expected a number, found {other:?}"))),
            }
        } else {
            Ok(None)
        }
    }

    // -- predicate grammar: or > and > not > primary ---------------------

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and_expr()?;
        while self.current() == &Token::Or {
            self.advance();
            let rhs = self.parse_and_expr()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not_expr()?;
        while self.current() == &Token::And {
            self.advance();
            let rhs = self.parse_not_expr()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.current() == &Token::Not {
            self.advance();
            let inner = self.parse_not_expr()?;
            Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)))
        } else {
            self.parse_predicate()
        }
    }

    /// A single comparison/BETWEEN/IS NULL/IN clause, or a parenthesized
    /// sub-expression.
    fn parse_predicate(&mut self) -> Result<Expr> {
        if self.current() == &Token::LParen {
            self.advance();
            let inner = self.parse_or_expr()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        let lhs = self.parse_operand()?;

        match self.current() {
            Token::Eq => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Eq, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Ne => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Ne, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Lt => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Lt, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Le => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Le, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Gt => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Gt, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Ge => {
                self.advance();
                Ok(Expr::Binary(BinaryOp::Ge, Box::new(lhs), Box::new(self.parse_operand()?)))
            }
            Token::Between => {
                self.advance();
                let low = self.parse_operand()?;
                self.expect(&Token::And)?;
                let high = self.parse_operand()?;
                Ok(Expr::Between(Box::new(lhs), Box::new(low), Box::new(high)))
            }
            Token::Is => {
                self.advance();
                let negated = if self.current() == &Token::Not {
                    self.advance();
                    true
                } else {
                    false
                };
                self.expect(&Token::Null)?;
                Ok(Expr::IsNull(Box::new(lhs), negated))
            }
            Token::In => {
                self.advance();
                self.expect(&Token::LParen)?;
                let mut items = vec![self.parse_operand()?];
                while self.current() == &Token::Comma {
                    self.advance();
                    items.push(self.parse_operand()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::In(Box::new(lhs), items))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Ident(s) => Ok(Expr::Column(s)),
            Token::Number(s) => Ok(Expr::Literal(s)),
            Token::Str(s) => Ok(Expr::Literal(s)),
            other => Err(EngineError::InvalidSql(format!("expected a column or literal, found {other:?}"))),
        }
    }
}
