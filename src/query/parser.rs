//! Recursive descent parser for the textual query form.
//!
//! ```text
//! query   := MATCH target step* [WHERE cond (AND cond)*] [DEPTH int] [LIMIT int]
//! target  := Identifier | '*'
//! step    := '-' '[' pred ']' '->'      outgoing
//!          | '<-' '[' pred ']' '-'      incoming
//!          | '-' '[' pred ']' '-'       either direction
//! cond    := key op literal
//! op      := '=' | '<>' | '<' | '<=' | '>' | '>=' | CONTAINS | STARTS WITH
//! literal := string | ['-'] number | TRUE | FALSE | NULL
//! ```

use crate::model::{Direction, Value};
use super::QueryError;
use super::ast::{CompareOp, PathStep, PropertyFilter, PropertyFilters, StructuredQuery};
use super::lexer::{Token, TokenKind, tokenize};

/// Parser state: wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<&Token, QueryError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {what}, found {}", self.describe())))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> QueryError {
        QueryError::Syntax {
            position: self.peek().span.start,
            message,
        }
    }

    fn describe(&self) -> String {
        match self.peek_kind() {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("'{}'", self.peek().text),
        }
    }
}

/// Parse a textual query into a [`StructuredQuery`].
pub fn parse(input: &str) -> Result<StructuredQuery, QueryError> {
    let tokens = tokenize(input)?;
    let mut p = Parser::new(&tokens);
    let query = parse_query(&mut p)?;
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("unexpected {}", p.describe())));
    }
    Ok(query)
}

fn parse_query(p: &mut Parser) -> Result<StructuredQuery, QueryError> {
    p.expect(TokenKind::Match, "MATCH")?;

    let entity_type = if p.eat(TokenKind::Star) {
        None
    } else {
        Some(p.expect(TokenKind::Identifier, "an entity type or '*'")?.text.clone())
    };

    let mut steps = Vec::new();
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        steps.push(parse_step(p)?);
    }

    let mut conditions = Vec::new();
    if p.eat(TokenKind::Where) {
        conditions.push(parse_condition(p)?);
        while p.eat(TokenKind::And) {
            conditions.push(parse_condition(p)?);
        }
    }

    let depth = if p.eat(TokenKind::Depth) {
        let n = parse_count(p, "DEPTH")?;
        Some(u32::try_from(n).map_err(|_| QueryError::InvalidDepth(u32::MAX))?)
    } else {
        None
    };
    let limit = if p.eat(TokenKind::Limit) {
        Some(parse_count(p, "LIMIT")?)
    } else {
        None
    };

    Ok(StructuredQuery {
        entity_type,
        relation_path: (!steps.is_empty()).then_some(steps),
        property_filters: (!conditions.is_empty()).then_some(PropertyFilters::Conditions(conditions)),
        depth,
        limit,
    })
}

fn parse_step(p: &mut Parser) -> Result<PathStep, QueryError> {
    let incoming = p.eat(TokenKind::LeftArrow);
    if !incoming {
        p.expect(TokenKind::Dash, "'-' or '<-'")?;
    }
    p.expect(TokenKind::LBracket, "'['")?;
    let predicate = p.expect(TokenKind::Identifier, "a predicate")?.text.clone();
    p.expect(TokenKind::RBracket, "']'")?;

    let direction = if incoming {
        p.expect(TokenKind::Dash, "'-' closing an incoming step")?;
        Direction::Incoming
    } else if p.eat(TokenKind::Arrow) {
        Direction::Outgoing
    } else if p.eat(TokenKind::Dash) {
        Direction::Both
    } else {
        return Err(p.error(format!("expected '->' or '-', found {}", p.describe())));
    };

    Ok(match direction {
        Direction::Outgoing => PathStep::Predicate(predicate),
        direction => PathStep::Directed { predicate, direction },
    })
}

fn parse_condition(p: &mut Parser) -> Result<PropertyFilter, QueryError> {
    let key = p.expect(TokenKind::Identifier, "a property name")?.text.clone();
    let op = match p.peek_kind() {
        TokenKind::Eq => CompareOp::Eq,
        TokenKind::Neq => CompareOp::Neq,
        TokenKind::Lt => CompareOp::Lt,
        TokenKind::Lte => CompareOp::Lte,
        TokenKind::Gt => CompareOp::Gt,
        TokenKind::Gte => CompareOp::Gte,
        TokenKind::Contains => CompareOp::Contains,
        TokenKind::Starts => {
            p.advance();
            p.expect(TokenKind::With, "WITH after STARTS")?;
            let value = parse_literal(p)?;
            return Ok(PropertyFilter { key, op: CompareOp::StartsWith, value });
        }
        _ => return Err(p.error(format!("expected a comparison operator, found {}", p.describe()))),
    };
    p.advance();
    let value = parse_literal(p)?;
    Ok(PropertyFilter { key, op, value })
}

fn parse_literal(p: &mut Parser) -> Result<Value, QueryError> {
    let negative = p.eat(TokenKind::Dash);
    let tok = p.peek().clone();
    let value = match tok.kind {
        TokenKind::Integer => tok
            .text
            .parse::<i64>()
            .map(|n| Value::Int(if negative { -n } else { n }))
            .map_err(|e| p.error(format!("bad integer '{}': {e}", tok.text)))?,
        TokenKind::Float => tok
            .text
            .parse::<f64>()
            .map(|f| Value::Float(if negative { -f } else { f }))
            .map_err(|e| p.error(format!("bad number '{}': {e}", tok.text)))?,
        _ if negative => return Err(p.error(format!("expected a number after '-', found {}", p.describe()))),
        TokenKind::StringLiteral => Value::String(tok.text),
        TokenKind::True => Value::Bool(true),
        TokenKind::False => Value::Bool(false),
        TokenKind::Null => Value::Null,
        _ => return Err(p.error(format!("expected a literal, found {}", p.describe()))),
    };
    p.advance();
    Ok(value)
}

fn parse_count(p: &mut Parser, clause: &str) -> Result<usize, QueryError> {
    let tok = p.expect(TokenKind::Integer, &format!("an integer after {clause}"))?;
    let start = tok.span.start;
    tok.text.parse::<usize>().map_err(|e| QueryError::Syntax {
        position: start,
        message: format!("bad {clause} value: {e}"),
    })
}
