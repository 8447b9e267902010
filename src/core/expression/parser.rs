//! Recursive-descent parser for the expression language.
//!
//! One routine per precedence level, lowest binding first:
//!
//! ```text
//! program    := filter (';' filter)* ';'?
//! filter     := assignment ('|' Identifier (':' assignment)*)*
//! assignment := ternary ('=' ternary)?
//! ternary    := or ('?' assignment ':' assignment)?
//! or / and / equality / relational / additive / multiplicative
//! unary      := ('+' | '-' | '!') unary | primary
//! primary    := '(' filter ')' | array | object | name | literal,
//!               then any chain of '.' name | '[' filter ']' | '(' args ')'
//! ```
//!
//! The parser consults the filter registry while building filter nodes so
//! the constness analysis can see each filter's stateful flag.

use super::ast::{self, AstNode, AstRef, BinaryOp, LogicalOp, Property, UnaryOp};
use super::error::{EvalResult, ExprError};
use super::lexer::{lex, Token};
use super::registry::FilterRegistry;

/// Parse expression source into a program AST.
pub fn parse(text: &str, registry: &FilterRegistry) -> EvalResult<AstRef> {
    Parser::new(lex(text)?, registry).run()
}

/// The expression parser.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'a FilterRegistry,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, registry: &'a FilterRegistry) -> Self {
        Self {
            tokens,
            pos: 0,
            registry,
        }
    }

    pub fn run(mut self) -> EvalResult<AstRef> {
        let program = self.program()?;
        if let Some(extra) = self.tokens.get(self.pos) {
            return Err(ExprError::parse(
                format!("token '{}' is an unexpected token", extra.text),
                extra.index,
            ));
        }
        Ok(program)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn at(&self, text: &str) -> bool {
        matches!(self.current(), Some(tok) if tok.text == text)
    }

    fn at_any(&self, texts: &[&str]) -> bool {
        matches!(self.current(), Some(tok) if texts.contains(&tok.text.as_str()))
    }

    /// Consume the current token if its text matches.
    fn consume_if(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume the current token if it matches one of the given operator
    /// spellings and return its text.
    fn consume_any(&mut self, texts: &[&str]) -> Option<String> {
        if self.at_any(texts) {
            let text = self.tokens[self.pos].text.clone();
            self.pos += 1;
            Some(text)
        } else {
            None
        }
    }

    fn expect(&mut self, text: &str) -> EvalResult<()> {
        if self.consume_if(text) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expecting '{}'", text)))
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn expect_identifier(&mut self) -> EvalResult<Token> {
        match self.current() {
            Some(tok) if tok.identifier => Ok(self.advance()),
            _ => Err(self.unexpected("expecting an identifier")),
        }
    }

    fn unexpected(&self, context: &str) -> ExprError {
        match self.current() {
            Some(tok) => ExprError::parse(
                format!("token '{}' is unexpected, {}", tok.text, context),
                tok.index,
            ),
            None => ExprError::parse(
                format!("unexpected end of expression, {}", context),
                self.tokens.last().map(|t| t.index).unwrap_or(0),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Grammar rules
    // ------------------------------------------------------------------

    fn program(&mut self) -> EvalResult<AstRef> {
        let mut body = Vec::new();
        loop {
            if self.current().is_some() && !self.at_any(&["}", ")", ";", "]"]) {
                body.push(self.filter_chain()?);
            }
            if !self.consume_if(";") {
                return Ok(AstNode::program(body));
            }
        }
    }

    fn filter_chain(&mut self) -> EvalResult<AstRef> {
        let mut left = self.assignment()?;
        while self.consume_if("|") {
            left = self.filter(left)?;
        }
        Ok(left)
    }

    fn filter(&mut self, input: AstRef) -> EvalResult<AstRef> {
        let name = self.expect_identifier()?.text;
        let mut args = vec![input];
        while self.consume_if(":") {
            args.push(self.assignment()?);
        }
        let stateful = self.registry.is_stateful(&name);
        Ok(AstNode::filter(name, args, stateful))
    }

    fn assignment(&mut self) -> EvalResult<AstRef> {
        let left = self.ternary()?;
        if self.consume_if("=") {
            if !is_assignable(&left) {
                return Err(self.assign_error());
            }
            let right = self.ternary()?;
            return Ok(AstNode::assignment(left, right));
        }
        Ok(left)
    }

    fn assign_error(&self) -> ExprError {
        let index = self
            .current()
            .map(|t| t.index)
            .or_else(|| self.tokens.last().map(|t| t.index))
            .unwrap_or(0);
        ExprError::parse("cannot assign to a non-assignable expression", index)
    }

    fn ternary(&mut self) -> EvalResult<AstRef> {
        let test = self.logical_or()?;
        if self.consume_if("?") {
            let consequent = self.assignment()?;
            self.expect(":")?;
            let alternate = self.assignment()?;
            return Ok(AstNode::conditional(test, consequent, alternate));
        }
        Ok(test)
    }

    fn logical_or(&mut self) -> EvalResult<AstRef> {
        let mut left = self.logical_and()?;
        while self.consume_if("||") {
            let right = self.logical_and()?;
            left = AstNode::logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> EvalResult<AstRef> {
        let mut left = self.equality()?;
        while self.consume_if("&&") {
            let right = self.equality()?;
            left = AstNode::logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> EvalResult<AstRef> {
        let mut left = self.relational()?;
        while let Some(op) = self.consume_any(&["===", "!==", "==", "!="]) {
            let right = self.relational()?;
            let op = match op.as_str() {
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Neq,
                "===" => BinaryOp::StrictEq,
                _ => BinaryOp::StrictNeq,
            };
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn relational(&mut self) -> EvalResult<AstRef> {
        let mut left = self.additive()?;
        while let Some(op) = self.consume_any(&["<=", ">=", "<", ">"]) {
            let right = self.additive()?;
            let op = match op.as_str() {
                "<" => BinaryOp::Lt,
                ">" => BinaryOp::Gt,
                "<=" => BinaryOp::Le,
                _ => BinaryOp::Ge,
            };
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> EvalResult<AstRef> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.consume_any(&["+", "-"]) {
            let right = self.multiplicative()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> EvalResult<AstRef> {
        let mut left = self.unary()?;
        while let Some(op) = self.consume_any(&["*", "/", "%"]) {
            let right = self.unary()?;
            let op = match op.as_str() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> EvalResult<AstRef> {
        if let Some(op) = self.consume_any(&["+", "-", "!"]) {
            let arg = self.unary()?;
            let op = match op.as_str() {
                "+" => UnaryOp::Plus,
                "-" => UnaryOp::Minus,
                _ => UnaryOp::Not,
            };
            return Ok(AstNode::unary(op, arg));
        }
        self.primary()
    }

    fn primary(&mut self) -> EvalResult<AstRef> {
        let mut primary = if self.consume_if("(") {
            let inner = self.filter_chain()?;
            self.expect(")")?;
            inner
        } else if self.at("[") {
            self.array_literal()?
        } else if self.at("{") {
            self.object_literal()?
        } else {
            match self.current() {
                Some(tok) if tok.identifier => {
                    let tok = self.advance();
                    match ast::constant_name(&tok.text) {
                        Some(sentinel) => sentinel,
                        None => AstNode::identifier(tok.text),
                    }
                }
                Some(tok) if tok.value.is_some() => {
                    let tok = self.advance();
                    AstNode::literal(tok.value.expect("literal token"))
                }
                _ => return Err(self.unexpected("expecting a primary expression")),
            }
        };

        loop {
            if self.consume_if("(") {
                let args = self.call_args()?;
                self.expect(")")?;
                primary = AstNode::call(primary, args);
            } else if self.consume_if("[") {
                let property = self.filter_chain()?;
                self.expect("]")?;
                primary = AstNode::member_computed(primary, property);
            } else if self.consume_if(".") {
                let name = self.expect_identifier()?.text;
                primary = AstNode::member(primary, name);
            } else {
                return Ok(primary);
            }
        }
    }

    fn call_args(&mut self) -> EvalResult<Vec<AstRef>> {
        let mut args = Vec::new();
        if !self.at(")") {
            loop {
                args.push(self.filter_chain()?);
                if !self.consume_if(",") {
                    break;
                }
            }
        }
        Ok(args)
    }

    fn array_literal(&mut self) -> EvalResult<AstRef> {
        self.expect("[")?;
        let mut elements = Vec::new();
        if !self.at("]") {
            loop {
                if self.at("]") {
                    // Trailing comma.
                    break;
                }
                elements.push(self.assignment()?);
                if !self.consume_if(",") {
                    break;
                }
            }
        }
        self.expect("]")?;
        Ok(AstNode::array(elements))
    }

    fn object_literal(&mut self) -> EvalResult<AstRef> {
        self.expect("{")?;
        let mut properties = Vec::new();
        if !self.at("}") {
            loop {
                if self.at("}") {
                    break;
                }
                let key = match self.current() {
                    Some(tok) if tok.identifier => self.advance().text,
                    Some(tok) if tok.value.is_some() => {
                        let tok = self.advance();
                        tok.value.expect("literal token").to_display()
                    }
                    _ => return Err(self.unexpected("expecting an object key")),
                };
                self.expect(":")?;
                let value = self.assignment()?;
                properties.push(Property { key, value });
                if !self.consume_if(",") {
                    break;
                }
            }
        }
        self.expect("}")?;
        Ok(AstNode::object(properties))
    }
}

/// Only identifiers and member accesses can be assigned to.
fn is_assignable(node: &AstRef) -> bool {
    matches!(
        node.kind,
        ast::AstKind::Identifier { .. }
            | ast::AstKind::MemberComputed { .. }
            | ast::AstKind::MemberNonComputed { .. }
    )
}
