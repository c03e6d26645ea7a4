// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::capabilities::Capabilities;
use crate::errors::{Error, ErrorKind, Errors};
use crate::lexer::*;
use crate::number::Number;
use crate::transform::{transform, transform_vars, Transformable, Transformed, Transformer};

use core::str::FromStr;

use anyhow::{anyhow, bail, Result};
use log::debug;

#[derive(Clone, Debug)]
pub struct ParserOptions {
    /// Attach `# METADATA` blocks to the module.
    pub process_annotations: bool,
    pub capabilities: Capabilities,
}

impl Default for ParserOptions {
    fn default() -> ParserOptions {
        ParserOptions {
            process_annotations: true,
            capabilities: Capabilities::default(),
        }
    }
}

/// A top-level statement of a policy snippet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    Package(Package),
    Import(Import),
    Rule(Rule),
    Body(Body),
}

// Parsed expression before calls are flattened into body literals.
#[derive(Clone, Debug)]
enum Syntax {
    Term(Term),
    Ref {
        loc: Location,
        head: Box<Syntax>,
        path: Vec<Syntax>,
    },
    Array {
        loc: Location,
        items: Vec<Syntax>,
    },
    Set {
        loc: Location,
        items: Vec<Syntax>,
    },
    Object {
        loc: Location,
        items: Vec<(Syntax, Syntax)>,
    },
    Comprehension(Term),
    Call {
        loc: Location,
        op: Term,
        args: Vec<Syntax>,
    },
}

impl Syntax {
    fn is_call(&self) -> bool {
        matches!(self, Syntax::Call { .. })
    }

    fn is_string(&self) -> bool {
        matches!(self, Syntax::Term(Term { value: Value::String(_), .. }))
    }

    fn is_var(&self) -> bool {
        matches!(self, Syntax::Term(Term { value: Value::Var(_), .. }))
    }

    fn operator_name(&self) -> Option<&str> {
        match self {
            Syntax::Call { op, .. } => match &op.value {
                Value::Var(v) => Some(v.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct WithSyntax {
    loc: Location,
    target: Ref,
    value: Syntax,
}

#[derive(Clone, Debug)]
enum Literal {
    // `some x, y` declarations carry no information once vars are scoped.
    SomeVars,
    SomeIn {
        loc: Location,
        key: Option<Syntax>,
        value: Syntax,
        collection: Syntax,
        withs: Vec<WithSyntax>,
    },
    Expr {
        loc: Location,
        negated: bool,
        syntax: Syntax,
        withs: Vec<WithSyntax>,
    },
}

struct HeadSyntax {
    span: Span,
    reference: Syntax,
    args: Option<Vec<Syntax>>,
    contains: Option<Syntax>,
    assign: Option<(bool, Syntax)>,
}

struct ElseSyntax {
    span: Span,
    assign: Option<(bool, Syntax)>,
    body: Option<Vec<Expr>>,
}

#[derive(Clone)]
pub struct Parser<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
    line: u32,
    end: u32,
    options: &'source ParserOptions,
    locals: u32,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source Source, options: &'source ParserOptions) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let tok = lexer.next_token()?;
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
            line: 0,
            end: 0,
            options,
            locals: 0,
        })
    }

    pub fn token_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::Symbol | TokenKind::Number | TokenKind::Ident | TokenKind::Eof => self.tok.1.text(),
            TokenKind::String | TokenKind::RawString => "",
        }
    }

    /// Location of the current token.
    pub fn location(&self) -> Location {
        self.tok.1.location()
    }

    pub fn next_token(&mut self) -> Result<()> {
        self.line = self.tok.1.line;
        self.end = self.tok.1.end;
        self.tok = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, msg: &str) -> anyhow::Error {
        self.source.error(self.tok.1.line, self.tok.1.col, msg)
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.token_text() == text {
            self.next_token()
        } else {
            Err(self.error(&format!("expecting `{text}` {context}")))
        }
    }

    fn location_to_end(&self, mut span: Span) -> Location {
        span.end = self.end.max(span.start);
        span.location()
    }

    fn is_keyword(&self, ident: &str) -> bool {
        matches!(
            ident,
            "as" | "default" | "else" | "false" | "import" | "package" | "not" | "null" | "some" | "true" | "with"
        )
    }

    fn is_future_keyword(&self, ident: &str) -> bool {
        self.options.capabilities.keywords.iter().any(|k| k == ident)
    }

    fn parse_ident(&mut self) -> Result<Span> {
        let span = self.tok.1.clone();
        match self.tok.0 {
            TokenKind::Ident if self.is_keyword(span.text()) => {
                Err(self.error(&format!("unexpected keyword `{}`", span.text())))
            }
            TokenKind::Ident => {
                self.next_token()?;
                Ok(span)
            }
            _ => Err(self.error("expecting identifier")),
        }
    }

    fn parse_var(&mut self) -> Result<Span> {
        let span = self.tok.1.clone();
        match self.tok.0 {
            TokenKind::Ident
                if self.is_keyword(span.text())
                    // contains can be the name of a builtin even when a keyword
                    || (self.is_future_keyword(span.text()) && span.text() != "contains") =>
            {
                Err(self.error(&format!("unexpected keyword `{}`", span.text())))
            }
            TokenKind::Ident => {
                self.next_token()?;
                Ok(span)
            }
            _ => Err(self.error("expecting identifier")),
        }
    }

    fn var_term(span: &Span) -> Term {
        Term::var(span.text()).with_location(Some(span.location()))
    }

    fn read_number(span: &Span) -> Result<Number> {
        Number::from_str(span.text()).map_err(|_| span.error("could not parse number"))
    }

    fn parse_scalar_or_var(&mut self) -> Result<Syntax> {
        let span = self.tok.1.clone();
        let value = match &self.tok.0 {
            TokenKind::Number => Value::Number(Self::read_number(&span)?),
            TokenKind::String => match serde_json::from_str::<String>(&format!("\"{}\"", span.text())) {
                Ok(s) => Value::String(s),
                Err(e) => bail!(span.error(&format!("invalid string literal. {e}"))),
            },
            TokenKind::RawString => Value::String(span.text().to_string()),
            TokenKind::Ident => match self.token_text() {
                "null" => Value::Null,
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => {
                    let ident = self.parse_var()?;
                    return Ok(Syntax::Term(Self::var_term(&ident)));
                }
            },
            _ => return Err(self.error("expecting expression")),
        };
        self.next_token()?;
        Ok(Syntax::Term(Term::new(value).with_location(Some(span.location()))))
    }

    fn parse_compr(&mut self, delim: &str) -> Result<(Syntax, Vec<Expr>)> {
        // Save the state.
        let state = self.clone();

        // Parse the first expression as a ref.
        let term = match self.parse_ref() {
            Ok(e) if self.token_text() == "|" => e,
            _ => {
                // Not a comprehension. Restore state.
                *self = state;
                bail!("internal error: not a compr");
            }
        };

        let query_span = self.tok.1.clone();
        self.next_token()?;
        let pos = self.end;
        match self.parse_query(query_span, delim) {
            Ok(query) => Ok((term, query)),
            Err(_) if self.end == pos => {
                // No progress was made in parsing the query.
                // Restore state and try parsing as set, array or object.
                *self = state;
                bail!("internal error: not a compr");
            }
            Err(err) => Err(err),
        }
    }

    // The head term of a comprehension is evaluated after its body, so calls
    // in it are lifted to the end of the body.
    fn comprehension_term(&mut self, term: Syntax, mut exprs: Vec<Expr>) -> (Term, Body) {
        let term = self.lower(term, &mut exprs);
        (term, Body::new(exprs))
    }

    fn parse_items(&mut self, delim: &str, items: &mut Vec<Syntax>) -> Result<()> {
        if self.token_text() != delim {
            items.push(self.parse_in_expr()?);
            while self.token_text() == "," {
                self.next_token()?;
                match self.token_text() {
                    t if t == delim => break,
                    "" if self.tok.0 == TokenKind::Eof => break,
                    _ => items.push(self.parse_in_expr()?),
                }
            }
        }
        Ok(())
    }

    fn parse_compr_or_array(&mut self) -> Result<Syntax> {
        let span = self.tok.1.clone();
        self.expect("[", "while parsing array comprehension or array")?;

        let pos = self.end;
        match self.parse_compr("]") {
            Ok((term, query)) => {
                let (term, body) = self.comprehension_term(term, query);
                let value = Value::ArrayComprehension(Box::new(ArrayComprehension { term, body }));
                Ok(Syntax::Comprehension(
                    Term::new(value).with_location(Some(self.location_to_end(span))),
                ))
            }
            Err(_) if self.end == pos => {
                // No progress was made in parsing comprehension.
                // Parse as array.
                let mut items = vec![];
                self.parse_items("]", &mut items)?;
                self.expect("]", "while parsing array")?;
                Ok(Syntax::Array {
                    loc: self.location_to_end(span),
                    items,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn parse_compr_set_or_object(&mut self) -> Result<Syntax> {
        let span = self.tok.1.clone();
        self.expect("{", "while parsing set, object or comprehension")?;

        let pos = self.end;
        match self.parse_compr("}") {
            Ok((term, query)) => {
                let (term, body) = self.comprehension_term(term, query);
                let value = Value::SetComprehension(Box::new(SetComprehension { term, body }));
                return Ok(Syntax::Comprehension(
                    Term::new(value).with_location(Some(self.location_to_end(span))),
                ));
            }
            Err(err) if self.end != pos => {
                // Some progress was made parsing the set comprehension.
                // Report errors.
                return Err(err);
            }
            _ => (),
        }

        // It could be a set, object or object comprehension.
        // In all the cases, the first expression must parse successfully.
        if self.token_text() == "}" {
            self.next_token()?;
            return Ok(Syntax::Object {
                loc: self.location_to_end(span),
                items: vec![],
            });
        }

        let first = self.parse_in_expr()?;

        if self.token_text() != ":" {
            // Parse as set.
            let mut items = vec![first];
            while self.token_text() == "," {
                self.next_token()?;
                match self.token_text() {
                    "}" => break,
                    "" if self.tok.0 == TokenKind::Eof => break,
                    _ => items.push(self.parse_in_expr()?),
                }
            }
            self.expect("}", "while parsing set")?;
            return Ok(Syntax::Set {
                loc: self.location_to_end(span),
                items,
            });
        }

        // Parse as object.
        self.next_token()?;

        let pos = self.end;
        match self.parse_compr("}") {
            Ok((value, query)) => {
                let mut exprs = query;
                let key = self.lower(first, &mut exprs);
                let value = self.lower(value, &mut exprs);
                let body = Body::new(exprs);
                let compr = Value::ObjectComprehension(Box::new(ObjectComprehension { key, value, body }));
                return Ok(Syntax::Comprehension(
                    Term::new(compr).with_location(Some(self.location_to_end(span))),
                ));
            }
            Err(err) if self.end != pos => {
                // Some progress was made parsing the object comprehension.
                // Report errors.
                return Err(err);
            }
            _ => (),
        }

        // Parse object
        let mut items = vec![];
        let value = self.parse_in_expr()?;
        items.push((first, value));

        while self.token_text() == "," {
            self.next_token()?;
            let key = match self.token_text() {
                "}" => break,
                "" if self.tok.0 == TokenKind::Eof => break,
                _ => self.parse_in_expr()?,
            };
            self.expect(":", "while parsing object item")?;
            let value = self.parse_in_expr()?;
            items.push((key, value));
        }

        self.expect("}", "while parsing object")?;
        Ok(Syntax::Object {
            loc: self.location_to_end(span),
            items,
        })
    }

    fn parse_empty_set(&mut self) -> Result<Syntax> {
        let span = self.tok.1.clone();
        self.expect("set(", "while parsing empty set")?;
        self.expect(")", "while parsing empty set")?;
        Ok(Syntax::Set {
            loc: self.location_to_end(span),
            items: vec![],
        })
    }

    fn parse_parens_expr(&mut self) -> Result<Syntax> {
        self.next_token()?;
        let expr = self.parse_expr()?;
        self.expect(")", "while parsing parenthesized expression")?;
        Ok(expr)
    }

    fn builtin_operator(&self, symbol: &str, span: &Span) -> Result<Term> {
        match self.options.capabilities.infix(symbol) {
            Some(b) => Ok(Term::var(&b.name).with_location(Some(span.location()))),
            None => Err(span.error(&format!("operator `{symbol}` is not supported"))),
        }
    }

    fn binary(&self, op: Term, start: Span, lhs: Syntax, rhs: Syntax) -> Syntax {
        Syntax::Call {
            loc: self.location_to_end(start),
            op,
            args: vec![lhs, rhs],
        }
    }

    // `-x` is `0 - x`.
    fn parse_unary_expr(&mut self) -> Result<Syntax> {
        let span = self.tok.1.clone();
        let op = self.builtin_operator("-", &span)?;
        self.next_token()?;
        let expr = self.parse_in_expr()?;
        let zero = Syntax::Term(Term::number(0i64).with_location(Some(span.location())));
        Ok(self.binary(op, span, zero, expr))
    }

    // Operator term of a call. Dotted names of builtins become a single var.
    fn call_operator(&self, term: Syntax, path: Vec<Syntax>, span: &Span) -> Result<Term> {
        let Syntax::Term(head) = term else {
            bail!(span.error("invalid function name"));
        };
        let Value::Var(v) = &head.value else {
            bail!(span.error("invalid function name"));
        };
        let mut name = v.as_str().to_string();
        let mut terms = vec![head.clone()];
        for p in path {
            match p {
                Syntax::Term(t @ Term { value: Value::String(_), .. }) => {
                    if let Value::String(s) = &t.value {
                        name.push('.');
                        name.push_str(s);
                    }
                    terms.push(t);
                }
                _ => bail!(span.error("invalid function name")),
            }
        }
        if terms.len() == 1 || self.options.capabilities.builtin(&name).is_some() {
            return Ok(Term::var(&name).with_location(head.location));
        }
        Ok(Term::reference(Ref::new(terms)).with_location(head.location))
    }

    fn parse_ref(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut term = match self.token_text() {
            "[" if self.tok.0 == TokenKind::Symbol => self.parse_compr_or_array()?,
            "{" if self.tok.0 == TokenKind::Symbol => self.parse_compr_set_or_object()?,
            "set(" => self.parse_empty_set()?,
            "(" if self.tok.0 == TokenKind::Symbol => return self.parse_parens_expr(),
            "-" if self.tok.0 == TokenKind::Symbol => return self.parse_unary_expr(),
            _ => self.parse_scalar_or_var()?,
        };

        let mut possible_fcn = term.is_var();
        let mut path = vec![];

        loop {
            let sep_pos = self.tok.1.start;
            match self.token_text() {
                "." | "[" if self.tok.1.start != self.end => {
                    if self.line != self.tok.1.line {
                        // Newline encountered. This could be a separate
                        // literal.
                        break;
                    }
                    bail!(self.error(&format!("invalid whitespace before {}", self.token_text())));
                }
                "." => {
                    // Read identifier.
                    self.next_token()?;
                    let field = self.parse_var()?;

                    // Disallow any whitespace between . and identifier.
                    if field.start != sep_pos + 1 {
                        bail!(self
                            .source
                            .error(field.line, field.col - 1, "invalid whitespace between . and identifier"));
                    }
                    path.push(Syntax::Term(
                        Term::string(field.text()).with_location(Some(field.location())),
                    ));
                }
                "[" => {
                    self.next_token()?;
                    let index = self.parse_in_expr()?;

                    // If the index is a string, the ref could be path to a function.
                    possible_fcn = possible_fcn && index.is_string();

                    self.expect("]", "while parsing bracketed reference")?;
                    path.push(index);
                }
                "(" if possible_fcn => {
                    self.next_token()?;
                    let mut args = vec![];
                    self.parse_items(")", &mut args)?;
                    self.expect(")", "while parsing call expr")?;
                    let op = self.call_operator(term, core::mem::take(&mut path), &start)?;
                    term = Syntax::Call {
                        loc: self.location_to_end(start.clone()),
                        op,
                        args,
                    };

                    // The expression can no longer be a function after the call.
                    possible_fcn = false;
                }
                _ => break,
            }
        }

        if !path.is_empty() {
            term = Syntax::Ref {
                loc: self.location_to_end(start),
                head: Box::new(term),
                path,
            };
        }
        Ok(term)
    }

    fn parse_term(&mut self) -> Result<Syntax> {
        self.parse_ref()
    }

    fn parse_mul_div_mod_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_term()?;

        loop {
            let op = match self.token_text() {
                "*" | "/" | "%" => self.builtin_operator(self.token_text(), &self.tok.1)?,
                _ => return Ok(expr),
            };
            self.next_token()?;
            let right = self.parse_term()?;
            expr = self.binary(op, start.clone(), expr, right);
        }
    }

    fn parse_arith_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_mul_div_mod_expr()?;

        loop {
            let op = match self.token_text() {
                "+" => self.builtin_operator("+", &self.tok.1)?,
                "-" => self.builtin_operator("-", &self.tok.1)?,
                n if n.starts_with('-') && self.tok.0 == TokenKind::Number => self.builtin_operator("-", &self.tok.1)?,
                _ => return Ok(expr),
            };
            let right = if self.token_text().len() > 1 {
                // Treat the - as a separate token
                let mut rhs_span = self.tok.1.clone();
                rhs_span.start += 1;
                rhs_span.col += 1;

                self.next_token()?;
                let n = Self::read_number(&rhs_span)?;
                Syntax::Term(Term::number(n).with_location(Some(rhs_span.location())))
            } else {
                self.next_token()?;
                self.parse_mul_div_mod_expr()?
            };
            expr = self.binary(op, start.clone(), expr, right);
        }
    }

    fn parse_set_intersection_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_arith_expr()?;

        while self.token_text() == "&" {
            let op = self.builtin_operator("&", &self.tok.1)?;
            self.next_token()?;
            let right = self.parse_arith_expr()?;
            expr = self.binary(op, start.clone(), expr, right);
        }
        Ok(expr)
    }

    fn parse_set_union_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_set_intersection_expr()?;

        while self.token_text() == "|" {
            let op = self.builtin_operator("|", &self.tok.1)?;
            self.next_token()?;
            let right = self.parse_set_intersection_expr()?;
            expr = self.binary(op, start.clone(), expr, right);
        }
        Ok(expr)
    }

    fn parse_bool_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_set_union_expr()?;
        loop {
            let op = match self.token_text() {
                "<" | "<=" | "==" | ">=" | ">" | "!=" if self.tok.0 == TokenKind::Symbol => {
                    self.builtin_operator(self.token_text(), &self.tok.1)?
                }
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_set_union_expr()?;
            expr = self.binary(op, start.clone(), expr, right);
        }
        Ok(expr)
    }

    fn parse_membership_tail(&mut self, start: Span, mut expr1: Syntax, mut expr2: Option<Syntax>) -> Result<Syntax> {
        loop {
            let op_span = self.tok.1.clone();
            self.expect("in", "while parsing membership expression")?;
            let collection = self.parse_bool_expr()?;
            let (name, args) = match expr2 {
                Some(value) => (MEMBER_WITH_KEY, vec![expr1, value, collection]),
                None => (MEMBER, vec![expr1, collection]),
            };
            expr1 = Syntax::Call {
                loc: self.location_to_end(start.clone()),
                op: Term::var(name).with_location(Some(op_span.location())),
                args,
            };
            expr2 = None;

            if self.token_text() != "in" {
                break;
            }
        }

        Ok(expr1)
    }

    fn parse_in_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_bool_expr()?;

        while self.token_text() == "in" {
            expr = self.parse_membership_tail(start.clone(), expr, None)?;
        }

        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<Syntax> {
        self.parse_membership_expr()
    }

    fn parse_membership_expr(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_bool_expr()?;

        if self.token_text() == "," {
            self.next_token()?;
            let value = self.parse_bool_expr()?;
            expr = self.parse_membership_tail(start.clone(), expr, Some(value))?;
        }

        while self.token_text() == "in" {
            expr = self.parse_membership_tail(start.clone(), expr, None)?;
        }

        Ok(expr)
    }

    fn parse_assign_expr(&mut self) -> Result<Syntax> {
        let state = self.clone();
        let start = self.tok.1.clone();
        let expr = self.parse_ref()?;

        let span = self.tok.1.clone();
        match self.token_text() {
            "=" => (),
            ":=" => {
                if let Syntax::Term(Term { value: Value::Var(v), .. }) = &expr {
                    if self.options.capabilities.is_root_document(v.as_str()) {
                        bail!(span.error(&format!("{} cannot be shadowed", v.as_str())));
                    }
                }
            }
            _ => {
                *self = state;
                return self.parse_expr();
            }
        };
        let op = self.builtin_operator(span.text(), &span)?;

        self.next_token()?;
        let right = self.parse_expr()?;
        Ok(self.binary(op, start, expr, right))
    }

    fn parse_with_modifiers(&mut self) -> Result<Vec<WithSyntax>> {
        let mut modifiers = vec![];
        while self.token_text() == "with" {
            let span = self.tok.1.clone();
            self.next_token()?;
            let (_, target) = self.parse_path_ref()?;
            self.expect("as", "while parsing with-modifier expression")?;
            let value = self.parse_in_expr()?;
            modifiers.push(WithSyntax {
                loc: self.location_to_end(span),
                target,
                value,
            });
        }
        Ok(modifiers)
    }

    fn parse_some_stmt(&mut self) -> Result<Literal> {
        let span = self.tok.1.clone();
        self.expect("some", "while parsing some-decl")?;

        // parse any vars.
        let mut vars = vec![self.tok.1.clone()];
        let mut refs = vec![self.parse_ref()?];

        while self.token_text() == "," {
            self.next_token()?;
            vars.push(self.tok.1.clone());
            refs.push(self.parse_ref()?);
        }

        if self.token_text() != "in" {
            // All the refs must be identifiers
            for (idx, r) in refs.iter().enumerate() {
                if !r.is_var() {
                    let span = &vars[idx];
                    bail!(span.error(&format!("encountered `{}` while expecting identifier", span.text())));
                }
            }
            return Ok(Literal::SomeVars);
        }

        let mut refs = refs.into_iter();
        let (key, value) = match (refs.next(), refs.next(), refs.next()) {
            (Some(key), Some(value), None) => (Some(key), value),
            (Some(value), None, None) => (None, value),
            _ => {
                let span = &vars[2];
                bail!(span.error(&format!("encountered `{}` while expecting `in`", span.text())));
            }
        };

        self.expect("in", "while parsing some-decl")?;
        let collection = self.parse_bool_expr()?;
        Ok(Literal::SomeIn {
            loc: self.location_to_end(span),
            key,
            value,
            collection,
            withs: vec![],
        })
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.token_text() {
            "some" => return self.parse_some_stmt(),
            "every" => bail!(self.error("`every` is not supported")),
            _ => (),
        }
        let span = self.tok.1.clone();
        let negated = if self.token_text() == "not" {
            self.next_token()?;
            true
        } else {
            false
        };

        let syntax = self.parse_assign_expr()?;
        Ok(Literal::Expr {
            loc: self.location_to_end(span),
            negated,
            syntax,
            withs: vec![],
        })
    }

    fn parse_literal_stmt(&mut self) -> Result<Literal> {
        let mut literal = self.parse_literal()?;
        let with_mods = self.parse_with_modifiers()?;
        match &mut literal {
            Literal::SomeVars if !with_mods.is_empty() => {
                bail!(self.error("`with` cannot modify a some-decl"))
            }
            Literal::SomeVars => (),
            Literal::SomeIn { withs, .. } | Literal::Expr { withs, .. } => *withs = with_mods,
        }
        Ok(literal)
    }

    fn parse_query(&mut self, span: Span, end_delim: &str) -> Result<Vec<Expr>> {
        let state = self.clone();
        let is_definite_query = self.token_text() == "some";

        let mut literals = vec![];

        let stmt = match self.parse_literal_stmt() {
            Ok(_) if self.token_text() == ":" => {
                // This is likely an object comprehension.
                // Restore the state and return.
                *self = state;
                bail!("try parsing as comprehension");
            }
            Ok(stmt) if self.token_text() == end_delim => {
                // Treat { 1 | 1 } as a comprehension instead of a
                // set of 1 element.
                if let Literal::Expr { syntax, .. } = &stmt {
                    if syntax.operator_name() == Some("or") {
                        *self = state;
                        bail!("try parse as comprehension");
                    }
                }
                stmt
            }
            Ok(stmt) => stmt,
            Err(e) if is_definite_query => return Err(e),
            Err(e) if matches!(self.token_text(), "=" | ":=") => return Err(e),
            Err(_) => {
                // There was error parsing the first literal
                // Restore the state and return.
                *self = state;
                bail!(span.error(&format!("expecting {end_delim}")));
            }
        };

        if self.token_text() == "," {
            // This is likely an array or set.
            // Restore the state.
            *self = state;
            return Err(anyhow!("encountered , when expecting {}", end_delim));
        }

        literals.push(stmt);

        loop {
            match self.token_text() {
                t if t == end_delim => break,
                "" if self.tok.0 == TokenKind::Eof => break,
                ";" => self.next_token()?,
                _ => {
                    // Next literal must be on a new line.
                    if self.line == self.tok.1.line {
                        break;
                    }
                }
            }
            literals.push(self.parse_literal_stmt()?);
        }

        if !end_delim.is_empty() {
            self.expect(end_delim, "while parsing query")?;
        }

        let mut exprs = vec![];
        for literal in literals {
            exprs.extend(self.lower_literal(literal));
        }
        if exprs.is_empty() {
            bail!(span.error("empty query"));
        }
        Ok(exprs)
    }

    fn parse_rule_assign(&mut self) -> Result<Option<(bool, Syntax)>> {
        let assign = match self.token_text() {
            "=" => false,
            ":=" => true,
            _ => return Ok(None),
        };
        self.next_token()?;
        Ok(Some((assign, self.parse_expr()?)))
    }

    /// `a.b["c"]`: a variable followed by constant string keys.
    fn parse_path_ref(&mut self) -> Result<(Span, Ref)> {
        let mut span = self.tok.1.clone();
        let var = self.parse_var()?;
        let mut terms = vec![Self::var_term(&var)];

        loop {
            let sep_pos = self.tok.1.start;
            match self.token_text() {
                "." | "[" if self.tok.1.start != self.end => {
                    bail!(self.source.error(
                        self.tok.1.line,
                        self.tok.1.col - 1,
                        &format!("invalid whitespace before {}", self.token_text())
                    ));
                }
                "." => {
                    // Read identifier.
                    self.next_token()?;
                    let field = self.parse_ident()?;

                    // Disallow any whitespace between . and identifier.
                    if field.start != sep_pos + 1 {
                        bail!(self
                            .source
                            .error(field.line, field.col - 1, "invalid whitespace between . and identifier"));
                    }
                    terms.push(Term::string(field.text()).with_location(Some(field.location())));
                }
                "[" => {
                    self.next_token()?;
                    let index = match self.parse_scalar_or_var()? {
                        Syntax::Term(t @ Term { value: Value::String(_), .. }) => t,
                        _ => bail!(self.error("expected string")),
                    };
                    self.expect("]", "while parsing bracketed reference")?;
                    terms.push(index);
                }
                _ => break,
            }
        }

        span.end = self.end;
        Ok((span, Ref::new(terms)))
    }

    fn parse_rule_ref(&mut self) -> Result<Syntax> {
        let start = self.tok.1.clone();

        if self.tok.0 != TokenKind::Ident {
            bail!(self.error("expecting identifier. Failed to parse rule-ref."));
        }
        let v = self.parse_var()?;
        if self.options.capabilities.is_root_document(v.text()) {
            bail!(start.error(&format!("{} cannot be shadowed", v.text())));
        }
        let head = Syntax::Term(Self::var_term(&v));
        let mut path = vec![];

        loop {
            match self.token_text() {
                // . and [ must not have any space between the previous token.
                "." | "[" if self.tok.1.start != self.end => {
                    bail!(self.source.error(
                        self.tok.1.line,
                        self.tok.1.col - 1,
                        &format!("invalid whitespace before {}", self.token_text())
                    ));
                }
                "." => {
                    let sep_pos = self.tok.1.start;
                    self.next_token()?;
                    let field = self.parse_var()?;

                    // Disallow any whitespace between . and identifier.
                    if field.start != sep_pos + 1 {
                        bail!(self
                            .source
                            .error(field.line, field.col - 1, "invalid whitespace between . and identifier"));
                    }
                    path.push(Syntax::Term(
                        Term::string(field.text()).with_location(Some(field.location())),
                    ));
                }
                "[" => {
                    self.next_token()?;
                    path.push(self.parse_expr()?);
                    self.expect("]", "while parsing bracketed reference")?;
                }
                _ => break,
            }
        }

        if path.is_empty() {
            return Ok(head);
        }
        Ok(Syntax::Ref {
            loc: self.location_to_end(start),
            head: Box::new(head),
            path,
        })
    }

    fn parse_rule_head(&mut self) -> Result<HeadSyntax> {
        let span = self.tok.1.clone();

        let reference = self.parse_rule_ref()?;
        match self.token_text() {
            "(" => {
                self.next_token()?;
                let mut args = vec![];
                if self.token_text() != ")" {
                    args.push(self.parse_term()?);
                    while self.token_text() == "," {
                        self.next_token()?;
                        match self.token_text() {
                            ")" => break,
                            "" if self.tok.0 == TokenKind::Eof => break,
                            _ => args.push(self.parse_term()?),
                        }
                    }
                }
                self.expect(")", "while parsing function rule args")?;
                let assign = self.parse_rule_assign()?;
                Ok(HeadSyntax {
                    span,
                    reference,
                    args: Some(args),
                    contains: None,
                    assign,
                })
            }
            "contains" => {
                self.next_token()?;
                let key = self.parse_expr()?;
                Ok(HeadSyntax {
                    span,
                    reference,
                    args: None,
                    contains: Some(key),
                    assign: None,
                })
            }
            _ => {
                let assign = self.parse_rule_assign()?;
                Ok(HeadSyntax {
                    span,
                    reference,
                    args: None,
                    contains: None,
                    assign,
                })
            }
        }
    }

    fn parse_query_or_literal_stmt(&mut self) -> Result<Vec<Expr>> {
        let state = self.clone();
        let span = self.tok.1.clone();

        if self.token_text() == "{" {
            self.next_token()?;
            let pos = self.end;
            match self.parse_query(span.clone(), "}") {
                Ok(query) => return Ok(query),
                Err(e) if pos != self.end => {
                    // Error encountered while parsing query.
                    return Err(e);
                }
                _ => (),
            }
        }

        // Restore state.
        *self = state;
        let literal = self.parse_literal_stmt()?;
        let exprs = self.lower_literal(literal);
        if exprs.is_empty() {
            bail!(span.error("empty query"));
        }
        Ok(exprs)
    }

    fn parse_rule_bodies(&mut self) -> Result<(Vec<Vec<Expr>>, Vec<ElseSyntax>)> {
        let span = self.tok.1.clone();
        let mut bodies = vec![];
        let mut elses = vec![];

        let has_query = match self.token_text() {
            "if" => {
                self.next_token()?;
                bodies.push(self.parse_query_or_literal_stmt()?);
                true
            }
            "{" => {
                self.next_token()?;
                bodies.push(self.parse_query(span, "}")?);
                true
            }
            _ => false,
        };

        match self.token_text() {
            "{" if has_query => self.parse_query_blocks(&mut bodies)?,
            "else" if has_query => self.parse_else_blocks(&mut elses)?,
            _ => (),
        }

        Ok((bodies, elses))
    }

    fn parse_query_blocks(&mut self, bodies: &mut Vec<Vec<Expr>>) -> Result<()> {
        while self.token_text() == "{" {
            let span = self.tok.1.clone();
            self.next_token()?;
            bodies.push(self.parse_query(span, "}")?);
        }
        Ok(())
    }

    fn parse_else_blocks(&mut self, elses: &mut Vec<ElseSyntax>) -> Result<()> {
        loop {
            let span = self.tok.1.clone();

            match self.token_text() {
                "{" => bail!(self.error("expected `else` keyword")),
                "else" => self.next_token()?,
                _ => break,
            }

            let assign = self.parse_rule_assign()?;

            match self.token_text() {
                "if" => {
                    self.next_token()?;
                    let body = Some(self.parse_query_or_literal_stmt()?);
                    elses.push(ElseSyntax { span, assign, body });
                }
                "{" => {
                    let query_span = self.tok.1.clone();
                    self.next_token()?;
                    let body = Some(self.parse_query(query_span, "}")?);
                    elses.push(ElseSyntax { span, assign, body });
                }
                _ if assign.is_none() => {
                    bail!(self.error("expected assignment or query after `else`"));
                }
                _ => {
                    elses.push(ElseSyntax {
                        span,
                        assign,
                        body: None,
                    });
                    break;
                }
            }
        }
        Ok(())
    }

    fn parse_default_rule(&mut self) -> Result<Rule> {
        let span = self.tok.1.clone();
        self.expect("default", "while parsing default rule")?;
        let reference = self.parse_rule_ref()?;

        let mut args: Vec<Term> = vec![];
        if self.token_text() == "(" {
            self.next_token()?;
            if self.token_text() != ")" {
                loop {
                    let arg = self.parse_ident()?;
                    if arg.text() != WILDCARD && args.iter().any(|a| a.as_var().map(|v| v.as_str()) == Some(arg.text()))
                    {
                        bail!(arg.error("repeating parameter name"));
                    }
                    args.push(Self::var_term(&arg));
                    if self.token_text() == ")" || self.tok.0 == TokenKind::Eof {
                        break;
                    }
                    self.expect(",", "while parsing default rule parameters")?;
                }
            }
            self.expect(")", "while parsing default rule parameters")?;
        }

        let assign = match self.token_text() {
            "=" => false,
            ":=" => true,
            _ => {
                self.expect(":=", "while parsing default rule")?;
                false
            }
        };
        self.next_token()?;

        let value = self.parse_term()?;
        let mut lifted = vec![];
        let reference = self.lower_rule_ref(reference, &mut lifted);
        let value = self.lower(value, &mut lifted);
        if !lifted.is_empty() {
            bail!(span.error("default rule value cannot contain calls"));
        }

        let location = Some(span.location());
        Ok(Rule {
            default: true,
            head: Head {
                reference,
                args,
                key: None,
                value: Some(value),
                assign,
                location: location.clone(),
            },
            body: Body::truthy(),
            r#else: None,
            location,
        })
    }

    fn lower_rule_ref(&mut self, reference: Syntax, out: &mut Vec<Expr>) -> Ref {
        let term = self.lower(reference, out);
        match term.value {
            Value::Ref(r) => r,
            _ => Ref::new(vec![term]),
        }
    }

    fn lower_head(&mut self, h: HeadSyntax, out: &mut Vec<Expr>) -> Head {
        let location = Some(h.span.location());
        let mut reference = self.lower_rule_ref(h.reference, out);
        let mut head = Head {
            reference: Ref::new(vec![]),
            args: vec![],
            key: None,
            value: None,
            assign: false,
            location: location.clone(),
        };
        let truthy = || Term::boolean(true).with_location(location.clone());
        let is_variable_key = |r: &Ref| r.len() > 1 && !matches!(r.terms().last().map(|t| &t.value), Some(Value::String(_)));

        if let Some(args) = h.args {
            head.args = args.into_iter().map(|a| self.lower(a, out)).collect();
            match h.assign {
                Some((assign, value)) => {
                    head.value = Some(self.lower(value, out));
                    head.assign = assign;
                }
                None => head.value = Some(truthy()),
            }
        } else if let Some(key) = h.contains {
            head.key = Some(self.lower(key, out));
        } else if let Some((assign, value)) = h.assign {
            if is_variable_key(&reference) {
                head.key = reference.terms_mut().pop();
            }
            head.value = Some(self.lower(value, out));
            head.assign = assign;
        } else if reference.len() == 2 && is_variable_key(&reference) {
            // p[x] is a partial set.
            head.key = reference.terms_mut().pop();
        } else {
            head.value = Some(truthy());
        }
        head.reference = reference;
        head
    }

    fn make_body(exprs: Option<Vec<Expr>>, lifted: &[Expr]) -> Body {
        let mut exprs = exprs.unwrap_or_default();
        exprs.extend(lifted.iter().cloned());
        if exprs.is_empty() {
            Body::truthy()
        } else {
            Body::new(exprs)
        }
    }

    /// Parses one rule statement. Several bodies produce several rules with
    /// the same head. The flag tells whether a body was given.
    fn parse_rule(&mut self) -> Result<(Vec<Rule>, bool)> {
        if self.token_text() == "default" {
            return Ok((vec![self.parse_default_rule()?], true));
        }

        let span = self.tok.1.clone();
        let head = self.parse_rule_head()?;
        let (bodies, elses) = self.parse_rule_bodies()?;
        let has_body = !bodies.is_empty();

        let mut lifted = vec![];
        let head = self.lower_head(head, &mut lifted);
        let location = Some(span.location());

        let bodies: Vec<Option<Vec<Expr>>> = if bodies.is_empty() {
            vec![None]
        } else {
            bodies.into_iter().map(Some).collect()
        };
        let mut rules: Vec<Rule> = bodies
            .into_iter()
            .map(|b| Rule {
                default: false,
                head: head.clone(),
                body: Self::make_body(b, &lifted),
                r#else: None,
                location: location.clone(),
            })
            .collect();

        let mut chain = vec![];
        for e in elses {
            let mut out = lifted.clone();
            let mut else_head = head.clone();
            else_head.location = Some(e.span.location());
            match e.assign {
                Some((assign, value)) => {
                    let mut value_out = vec![];
                    else_head.value = Some(self.lower(value, &mut value_out));
                    else_head.assign = assign;
                    out.extend(value_out);
                }
                None => {
                    else_head.value = Some(Term::boolean(true).with_location(Some(e.span.location())));
                    else_head.assign = false;
                }
            }
            chain.push(Rule {
                default: false,
                head: else_head,
                body: Self::make_body(e.body, &out),
                r#else: None,
                location: Some(e.span.location()),
            });
        }
        let else_chain = chain.into_iter().rev().fold(None, |next: Option<Box<Rule>>, mut r| {
            r.r#else = next;
            Some(Box::new(r))
        });
        if let Some(last) = rules.last_mut() {
            last.r#else = else_chain;
        }

        Ok((rules, has_body))
    }

    fn parse_package(&mut self) -> Result<Package> {
        let span = self.tok.1.clone();
        self.expect("package", "Missing package declaration.")?;
        let (_, path) = self.parse_path_ref()?;
        let mut terms = vec![Term::var(DEFAULT_ROOT_DOCUMENT)];
        for (i, t) in path.into_terms().into_iter().enumerate() {
            match (i, &t.value) {
                (0, Value::Var(v)) => {
                    terms.push(Term::string(v.as_str()).with_location(t.location.clone()));
                }
                _ => terms.push(t),
            }
        }
        Ok(Package {
            path: Ref::new(terms),
            location: Some(self.location_to_end(span)),
        })
    }

    fn path_components(r: &Ref) -> Vec<String> {
        r.iter()
            .map(|t| match &t.value {
                Value::Var(v) => v.as_str().to_string(),
                Value::String(s) => s.clone(),
                v => v.to_string(),
            })
            .collect()
    }

    fn check_future_import(&self, comps: &[String], span: &Span) -> Result<()> {
        match comps {
            [_, kw] if kw == "keywords" => Ok(()),
            [_, kw, name] if kw == "keywords" => {
                if self.is_future_keyword(name) {
                    Ok(())
                } else {
                    bail!(span.error("invalid future keyword"))
                }
            }
            [_, kw, ..] if kw == "keywords" => bail!(span.error("invalid future keyword")),
            _ => bail!(span.error("invalid import, must be `future.keywords`")),
        }
    }

    fn parse_imports(&mut self) -> Result<Vec<Import>> {
        let mut imports: Vec<Import> = vec![];
        while self.token_text() == "import" {
            let span = self.tok.1.clone();
            self.next_token()?;
            let (path_span, path) = self.parse_path_ref()?;
            let comps = Self::path_components(&path);

            let ignored = match comps.first().map(|s| s.as_str()) {
                Some("future") => {
                    self.check_future_import(&comps, &path_span)?;
                    true
                }
                Some("rego") if comps.len() == 2 && comps[1] == "v1" => true,
                Some("rego") => bail!(path_span.error("invalid import, must be `rego.v1`")),
                Some(DEFAULT_ROOT_DOCUMENT) | Some(INPUT_ROOT_DOCUMENT) => false,
                _ => bail!(path_span.error("import path must begin with one of: {data, future, input, rego}")),
            };

            let alias = if self.token_text() == "as" {
                if ignored {
                    bail!(self.error("`future` imports cannot be aliased"));
                }
                self.next_token()?;
                let var = self.parse_var()?;
                if var.text() == WILDCARD {
                    bail!(var.error("`_` cannot be used as alias"));
                }
                Some(Var::new(var.text()))
            } else {
                None
            };

            if ignored {
                continue;
            }

            let import = Import {
                path: Term::reference(path).with_location(Some(path_span.location())),
                alias,
                location: Some(self.location_to_end(span.clone())),
            };

            if let Some(prev) = imports.iter().find(|i| i.name() == import.name()) {
                let shadowed = prev
                    .location
                    .as_ref()
                    .map(|l| self.source.message(l.row, l.col, "", "this import is shadowed"))
                    .unwrap_or_default();
                bail!(span.error(&format!("import shadows following import defined earlier:{shadowed}")));
            }
            imports.push(import);
        }

        Ok(imports)
    }

    pub fn parse(&mut self) -> Result<Module> {
        let package = self.parse_package()?;
        let imports = self.parse_imports()?;

        let mut module = Module::new(package);
        module.imports = imports;
        while self.tok.0 != TokenKind::Eof {
            let (rules, _) = self.parse_rule()?;
            module.rules.extend(rules);
        }

        module.comments = self
            .lexer
            .comments()
            .iter()
            .map(|s| Comment {
                text: s.text().to_string(),
                location: Some(s.location()),
            })
            .collect();

        if self.options.process_annotations {
            module.annotations = self.parse_annotations(&module)?;
        }

        let module = self.post_process(&module)?;
        debug!(
            "parsed module {} with {} rule(s)",
            module.package,
            module.rules.len()
        );
        Ok(module)
    }

    pub fn parse_statements(&mut self) -> Result<Vec<Statement>> {
        let mut statements = vec![];
        while self.tok.0 != TokenKind::Eof {
            match self.token_text() {
                "package" => statements.push(Statement::Package(self.parse_package()?)),
                "import" => {
                    for i in self.parse_imports()? {
                        statements.push(Statement::Import(i));
                    }
                }
                _ => {
                    let state = self.clone();
                    match self.parse_rule() {
                        Ok((rules, has_body))
                            if has_body
                                || rules
                                    .iter()
                                    .any(|r| r.default || r.r#else.is_some() || r.head.key.is_some()) =>
                        {
                            statements.extend(rules.into_iter().map(Statement::Rule));
                        }
                        _ => {
                            // Not a rule; parse the literals on this line.
                            *self = state;
                            let line = self.tok.1.line;
                            let mut exprs = vec![];
                            loop {
                                let literal = self.parse_literal_stmt()?;
                                exprs.extend(self.lower_literal(literal));
                                if self.token_text() == ";" {
                                    self.next_token()?;
                                }
                                if self.tok.0 == TokenKind::Eof || self.tok.1.line != line {
                                    break;
                                }
                            }
                            if !exprs.is_empty() {
                                statements.push(Statement::Body(Body::new(exprs)));
                            }
                        }
                    }
                }
            }
        }

        // Wildcards are numbered across all statements.
        let mut n = 0;
        statements
            .into_iter()
            .map(|s| self.post_process_statement(s, &mut n))
            .collect()
    }

    fn post_process_statement(&self, s: Statement, n: &mut usize) -> Result<Statement> {
        let mut lifter = RootDocumentLifter {
            roots: &self.options.capabilities.root_documents,
        };
        Ok(match s {
            Statement::Rule(r) => Statement::Rule(transform(&mut lifter, &mangle_wildcards(&r, n)?)?),
            Statement::Body(b) => Statement::Body(transform(&mut lifter, &mangle_wildcards(&b, n)?)?),
            Statement::Import(i) => Statement::Import(transform(&mut lifter, &i)?),
            p => p,
        })
    }

    pub fn parse_user_query(&mut self) -> Result<Body> {
        let span = self.tok.1.clone();
        let exprs = self.parse_query(span, "")?;
        if self.tok.0 != TokenKind::Eof {
            bail!(self.tok.1.error("expecting EOF"));
        }
        self.post_process(&Body::new(exprs))
    }

    /// Parses a single term. Terms that need calls to be lifted are rejected.
    pub fn parse_user_term(&mut self) -> Result<Term> {
        let span = self.tok.1.clone();
        let syntax = self.parse_expr()?;
        if self.tok.0 != TokenKind::Eof {
            bail!(self.tok.1.error("expecting EOF"));
        }
        let mut lifted = vec![];
        let term = self.lower(syntax, &mut lifted);
        if !lifted.is_empty() {
            bail!(span.error("expecting a term, found a call"));
        }
        self.post_process(&term)
    }

    fn post_process<X: Transformable + Clone>(&self, node: &X) -> Result<X> {
        let mut n = 0;
        let node = mangle_wildcards(node, &mut n)?;
        let mut lifter = RootDocumentLifter {
            roots: &self.options.capabilities.root_documents,
        };
        transform(&mut lifter, &node)
    }

    // Lowering: nested calls become preceding literals that bind a fresh
    // local variable.

    fn fresh_local(&mut self, loc: &Location) -> Term {
        let name = format!("__local{}__", self.locals);
        self.locals += 1;
        Term::var(&name).with_location(Some(loc.clone()))
    }

    fn lower(&mut self, s: Syntax, out: &mut Vec<Expr>) -> Term {
        match s {
            Syntax::Term(t) | Syntax::Comprehension(t) => t,
            Syntax::Ref { loc, head, path } => {
                let head = self.lower(*head, out);
                let mut terms = match head.value {
                    Value::Ref(r) => r.into_terms(),
                    _ => vec![head],
                };
                for p in path {
                    terms.push(self.lower(p, out));
                }
                Term::reference(Ref::new(terms)).with_location(Some(loc))
            }
            Syntax::Array { loc, items } => {
                let items = items.into_iter().map(|i| self.lower(i, out)).collect();
                Term::array(items).with_location(Some(loc))
            }
            Syntax::Set { loc, items } => {
                let items = items.into_iter().map(|i| self.lower(i, out)).collect();
                Term::set(items).with_location(Some(loc))
            }
            Syntax::Object { loc, items } => {
                let items = items
                    .into_iter()
                    .map(|(k, v)| {
                        let k = self.lower(k, out);
                        (k, self.lower(v, out))
                    })
                    .collect();
                Term::object(items).with_location(Some(loc))
            }
            Syntax::Call { loc, op, args } => {
                let mut operands: Vec<Term> = args.into_iter().map(|a| self.lower(a, out)).collect();
                let local = self.fresh_local(&loc);
                operands.push(local.clone());
                out.push(Expr::call(op, operands).with_location(Some(loc)));
                local
            }
        }
    }

    fn lower_call(&mut self, op: Term, args: Vec<Syntax>, output: Option<Syntax>, out: &mut Vec<Expr>) -> Terms {
        let mut terms = vec![op];
        for a in args {
            terms.push(self.lower(a, out));
        }
        if let Some(o) = output {
            terms.push(self.lower(o, out));
        }
        Terms::Call(terms)
    }

    fn lower_terms(&mut self, syntax: Syntax, out: &mut Vec<Expr>) -> Terms {
        let unify = matches!(syntax.operator_name(), Some(EQUALITY) | Some(ASSIGN));
        match syntax {
            Syntax::Call { op, args, .. } if unify && args.len() == 2 => {
                let mut args = args.into_iter();
                let (Some(a), Some(b)) = (args.next(), args.next()) else {
                    return Terms::Call(vec![op]);
                };
                // `y = f(x)` binds the output of the call.
                match (a, b) {
                    (a, Syntax::Call { op: f, args, .. }) if !a.is_call() => self.lower_call(f, args, Some(a), out),
                    (Syntax::Call { op: f, args, .. }, b) if !b.is_call() => self.lower_call(f, args, Some(b), out),
                    (a, b) => self.lower_call(op, vec![a, b], None, out),
                }
            }
            Syntax::Call { op, args, .. } => self.lower_call(op, args, None, out),
            s => Terms::Single(self.lower(s, out)),
        }
    }

    fn finish_literal(
        &mut self,
        mut expr: Expr,
        loc: Location,
        negated: bool,
        withs: Vec<WithSyntax>,
        hoisted: Vec<Expr>,
    ) -> Vec<Expr> {
        let mut out = vec![];
        for w in withs {
            let value = self.lower(w.value, &mut out);
            expr.with.push(With {
                target: Term::reference(w.target).with_location(Some(w.loc.clone())),
                value,
                location: Some(w.loc),
            });
        }
        // Calls lifted out of the literal are evaluated under its modifiers too.
        for mut h in hoisted {
            h.with = expr.with.clone();
            out.push(h);
        }
        expr.negated = negated;
        out.push(expr.with_location(Some(loc)));
        out
    }

    fn lower_literal(&mut self, literal: Literal) -> Vec<Expr> {
        let mut out = vec![];
        match literal {
            Literal::SomeVars => out,
            Literal::SomeIn {
                loc,
                key,
                value,
                collection,
                withs,
            } => {
                // `some k, v in xs` is `v = xs[k]`.
                let collection = self.lower(collection, &mut out);
                let key = match key {
                    Some(k) => self.lower(k, &mut out),
                    None => Term::var(WILDCARD).with_location(Some(loc.clone())),
                };
                let mut terms = match collection.value {
                    Value::Ref(r) => r.into_terms(),
                    _ => vec![collection],
                };
                terms.push(key);
                let value = self.lower(value, &mut out);
                let elem = Term::reference(Ref::new(terms)).with_location(Some(loc.clone()));
                self.finish_literal(Expr::equality(value, elem), loc, false, withs, out)
            }
            Literal::Expr {
                loc,
                negated,
                syntax,
                withs,
            } => {
                let terms = self.lower_terms(syntax, &mut out);
                self.finish_literal(Expr::new(terms), loc, negated, withs, out)
            }
        }
    }

    // Annotations

    fn parse_annotations(&self, module: &Module) -> Result<Vec<Annotations>> {
        let comments = self.lexer.comments();
        let package_row = module.package.location.as_ref().map(|l| l.row).unwrap_or(0);
        let mut annotations = vec![];

        let mut idx = 0;
        while idx < comments.len() {
            let start = &comments[idx];
            idx += 1;
            if start.text().trim() != "METADATA" {
                continue;
            }

            let mut lines = vec![];
            let mut row = start.line;
            while idx < comments.len() && comments[idx].line == row + 1 {
                let text = comments[idx].text();
                lines.push(text.strip_prefix(' ').unwrap_or(text));
                row = comments[idx].line;
                idx += 1;
            }
            let yaml = lines.join("\n");

            let on_package = package_row > start.line;
            let default_scope = if on_package {
                AnnotationScope::Package
            } else {
                AnnotationScope::Rule
            };
            let raw = RawAnnotations::from_yaml(&yaml).map_err(|e| start.error(&e.to_string()))?;
            let mut parse_ref = |s: &str| parse_ref_with(s, self.options);
            let mut a = raw
                .into_annotations(default_scope, &mut parse_ref)
                .map_err(|e| start.error(&e.to_string()))?;

            match (on_package, a.scope.targets_package()) {
                (true, false) => bail!(start.error(&format!(
                    "annotation scope '{}' must be applied to rule (have package)",
                    a.scope
                ))),
                (false, true) => bail!(start.error(&format!(
                    "annotation scope '{}' must be applied to package (have rule)",
                    a.scope
                ))),
                _ => (),
            }
            a.location = Some(start.location());
            annotations.push(a);
        }
        Ok(annotations)
    }
}

/// Gives each `_` a distinct name, numbered in walk order from `n`.
fn mangle_wildcards<X: Transformable + Clone>(node: &X, n: &mut usize) -> Result<X> {
    transform_vars(node, |v| {
        if v.as_str() != WILDCARD {
            return Ok(Value::Var(v));
        }
        let name = format!("{WILDCARD_PREFIX}{n}");
        *n += 1;
        Ok(Value::Var(Var::new(name)))
    })
}

/// Turns bare root document variables into references so that `input` and
/// `input.x` share a shape. Heads of references stay variables.
struct RootDocumentLifter<'a> {
    roots: &'a [String],
}

impl RootDocumentLifter<'_> {
    fn is_root(&self, v: &Var) -> bool {
        self.roots.iter().any(|r| r == v.as_str())
    }
}

impl Transformer for RootDocumentLifter<'_> {
    fn term(&mut self, t: Term) -> Result<Transformed<Term>> {
        match t.value {
            Value::Var(v) if self.is_root(&v) => {
                let head = Term::new(Value::Var(v)).with_location(t.location.clone());
                Ok(Transformed::Done(Term {
                    value: Value::Ref(Ref::new(vec![head])),
                    location: t.location,
                }))
            }
            Value::Ref(r) => {
                let mut terms = r.into_terms().into_iter();
                let mut lifted = vec![];
                if let Some(head) = terms.next() {
                    lifted.push(match head.value {
                        Value::Var(_) => head,
                        _ => head.transform_with(self)?,
                    });
                }
                for term in terms {
                    lifted.push(term.transform_with(self)?);
                }
                Ok(Transformed::Done(Term {
                    value: Value::Ref(Ref::new(lifted)),
                    location: t.location,
                }))
            }
            value => Ok(Transformed::Continue(Term {
                value,
                location: t.location,
            })),
        }
    }

    // Package paths and rule references are not documents being read.
    fn reference(&mut self, r: Ref) -> Result<Transformed<Ref>> {
        Ok(Transformed::Done(r))
    }
}

fn parse_error(e: anyhow::Error, location: Option<Location>) -> Errors {
    Error::new(ErrorKind::ParseErr, e.to_string())
        .with_location(location)
        .into()
}

fn run<T>(
    file: &str,
    text: &str,
    options: &ParserOptions,
    f: impl FnOnce(&mut Parser<'_>) -> Result<T>,
) -> Result<T, Errors> {
    let source = Source::from_contents(file, text.to_string()).map_err(|e| parse_error(e, None))?;
    let mut parser = Parser::new(&source, options).map_err(|e| parse_error(e, None))?;
    f(&mut parser).map_err(|e| parse_error(e, Some(parser.location())))
}

fn parse_ref_with(text: &str, options: &ParserOptions) -> Result<Ref> {
    let source = Source::from_contents("", text.to_string())?;
    let mut parser = Parser::new(&source, options)?;
    let term = parser.parse_user_term()?;
    match term.value {
        Value::Ref(r) => Ok(r),
        Value::Var(v) => Ok(Ref::new(vec![Term::new(Value::Var(v))])),
        _ => bail!("expecting a reference: {text}"),
    }
}

/// Parses a policy module.
pub fn parse_module(file: &str, text: &str, options: &ParserOptions) -> Result<Module, Errors> {
    run(file, text, options, |p| p.parse())
}

/// Parses a query such as `x = input.a; x > 1`.
pub fn parse_body(text: &str, options: &ParserOptions) -> Result<Body, Errors> {
    run("", text, options, |p| p.parse_user_query())
}

/// Parses a single literal. Literals whose calls need lifting are rejected.
pub fn parse_expr(text: &str, options: &ParserOptions) -> Result<Expr, Errors> {
    let body = parse_body(text, options)?;
    match body.into_exprs().as_slice() {
        [e] => Ok(e.clone()),
        _ => Err(Error::new(ErrorKind::ParseErr, format!("expected a single expression: {text}")).into()),
    }
}

pub fn parse_term(text: &str, options: &ParserOptions) -> Result<Term, Errors> {
    run("", text, options, |p| p.parse_user_term())
}

pub fn parse_ref(text: &str, options: &ParserOptions) -> Result<Ref, Errors> {
    parse_ref_with(text, options).map_err(|e| parse_error(e, None))
}

/// Parses a sequence of packages, imports, rules and bodies.
pub fn parse_statements(file: &str, text: &str, options: &ParserOptions) -> Result<Vec<Statement>, Errors> {
    run(file, text, options, |p| p.parse_statements())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ParserOptions {
        ParserOptions::default()
    }

    fn body(text: &str) -> Body {
        parse_body(text, &opts()).unwrap()
    }

    #[test]
    fn flattens_calls() {
        let b = body("y = count(x)");
        assert_eq!(b.len(), 1);
        assert_eq!(b.to_string(), "count(x, y)");

        let b = body("f(g(x))");
        assert_eq!(b.to_string(), "g(x, __local0__); f(__local0__)");

        let b = body("y := x + 1 * 2");
        assert_eq!(b.to_string(), "__local0__ = 1 * 2; y = x + __local0__");
    }

    #[test]
    fn lifted_calls_keep_with_modifiers() {
        let b = body("count(input.items) > 0 with input.items as [1]");
        assert_eq!(b.len(), 2);
        assert!(b.exprs().iter().all(|e| e.with.len() == 1));
        assert_eq!(
            b.to_string(),
            "count(input.items, __local0__) with input.items as [1]; __local0__ > 0 with input.items as [1]"
        );

        // Calls inside the modifier value are evaluated outside of it.
        let b = body("x with input.a as count(y)");
        assert_eq!(b.to_string(), "count(y, __local0__); x with input.a as __local0__");
    }

    #[test]
    fn lifts_root_documents() {
        let b = body("x = input");
        let Terms::Call(terms) = &b.exprs()[0].terms else {
            panic!("expected a call");
        };
        assert_eq!(terms[2].as_ref().map(|r| r.len()), Some(1));

        let b = body("x = data.a[input.b]");
        let Terms::Call(terms) = &b.exprs()[0].terms else {
            panic!("expected a call");
        };
        let r = terms[2].as_ref().unwrap();
        assert_eq!(r.head_var().map(|v| v.as_str()), Some("data"));
        assert!(matches!(r.terms()[2].value, Value::Ref(_)));
    }

    #[test]
    fn wildcards_are_distinct() {
        let b = body("x = [_, _]; y[_] = 1");
        let vars: Vec<_> = b
            .vars(Default::default())
            .into_iter()
            .filter(|v| v.as_str().starts_with(WILDCARD_PREFIX))
            .collect();
        assert_eq!(vars.len(), 3);
        assert_eq!(b.to_string(), "x = [_, _]; y[_] = 1");
    }

    #[test]
    fn some_in_becomes_unification() {
        assert_eq!(body("some x in xs").to_string(), "x = xs[_]");
        assert_eq!(body("some k, v in input.xs").to_string(), "v = input.xs[k]");
        assert!(body("some x; x = 1").len() == 1);
    }

    #[test]
    fn membership() {
        assert_eq!(body("x in xs").to_string(), "x in xs");
        assert_eq!(body("k, v in xs").to_string(), "k, v in xs");
        assert_eq!(body("y := x in xs").to_string(), "y = (x in xs)");
    }

    #[test]
    fn builtin_names_are_vars() {
        let e = parse_expr("object.get(x, \"a\", 1)", &opts()).unwrap();
        assert_eq!(e.operator_name().as_deref(), Some("object.get"));
        assert!(matches!(e.operator().map(|t| &t.value), Some(Value::Var(_))));

        let e = parse_expr("data.lib.f(x)", &opts()).unwrap();
        assert!(matches!(e.operator().map(|t| &t.value), Some(Value::Ref(_))));
    }

    #[test]
    fn rejects_bad_imports() {
        let err = parse_module("a.rego", "package a\nimport foo.bar", &opts()).unwrap_err();
        let e = err.iter().next().unwrap();
        assert_eq!(e.kind, ErrorKind::ParseErr);
        assert!(e
            .message
            .contains("import path must begin with one of: {data, future, input, rego}"));
        assert!(e.location.is_some());
    }

    #[test]
    fn accepts_keyword_imports() {
        let m = parse_module(
            "a.rego",
            "package a\nimport future.keywords.if\nimport rego.v1\nimport data.x",
            &opts(),
        )
        .unwrap();
        assert_eq!(m.imports.len(), 1);
    }

    #[test]
    fn statements() {
        let s = parse_statements("", "package a\nx = 1\np contains x if { x = 1 }", &opts()).unwrap();
        assert!(matches!(s[0], Statement::Package(_)));
        assert!(matches!(s[1], Statement::Body(_)));
        assert!(matches!(s[2], Statement::Rule(_)));
    }

    #[test]
    fn term_and_ref() {
        let t = parse_term("{\"a\": [1, x]}", &opts()).unwrap();
        assert!(matches!(t.value, Value::Object(_)));
        assert!(parse_term("f(x)", &opts()).is_err());

        let r = parse_ref("input.a[\"b\"]", &opts()).unwrap();
        assert_eq!(r.to_string(), "input.a.b");
        assert_eq!(parse_ref("input", &opts()).unwrap().len(), 1);
    }
}
