// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::annotations::Annotations;
use crate::ast::impl_structural_eq;
use crate::ast::term::*;
use crate::visitor::{VarVisitor, VarVisitorParams};

/// Operator names of the infix builtins the parser produces.
pub const EQUALITY: &str = "eq";
pub const ASSIGN: &str = "assign";
pub const MEMBER: &str = "internal.member_2";
pub const MEMBER_WITH_KEY: &str = "internal.member_3";

/// Either a single term or a call. A call's first term is the operator.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Terms {
    Single(Term),
    Call(Vec<Term>),
}

#[derive(Clone, Debug)]
pub struct With {
    pub target: Term,
    pub value: Term,
    pub location: Option<Location>,
}

impl_structural_eq!(With, s => (&s.target, &s.value));

impl With {
    pub fn new(target: Term, value: Term) -> With {
        With {
            target,
            value,
            location: None,
        }
    }
}

/// A single literal of a body.
#[derive(Clone, Debug)]
pub struct Expr {
    pub(crate) index: usize,
    pub negated: bool,
    pub terms: Terms,
    pub with: Vec<With>,
    pub location: Option<Location>,
}

impl_structural_eq!(Expr, s => (s.index, s.negated, &s.terms, &s.with));

impl Expr {
    pub fn new(terms: Terms) -> Expr {
        Expr {
            index: 0,
            negated: false,
            terms,
            with: vec![],
            location: None,
        }
    }

    pub fn from_term(term: Term) -> Expr {
        Expr::new(Terms::Single(term))
    }

    pub fn call(operator: Term, operands: Vec<Term>) -> Expr {
        let mut terms = Vec::with_capacity(operands.len() + 1);
        terms.push(operator);
        terms.extend(operands);
        Expr::new(Terms::Call(terms))
    }

    /// `a = b`
    pub fn equality(a: Term, b: Term) -> Expr {
        Expr::call(Term::var(EQUALITY), vec![a, b])
    }

    /// Position within the enclosing body.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn with_location(mut self, location: Option<Location>) -> Expr {
        self.location = location;
        self
    }

    pub fn is_call(&self) -> bool {
        matches!(self.terms, Terms::Call(_))
    }

    pub fn operator(&self) -> Option<&Term> {
        match &self.terms {
            Terms::Call(terms) => terms.first(),
            Terms::Single(_) => None,
        }
    }

    /// Name of the operator: the variable name or the dotted reference.
    pub fn operator_name(&self) -> Option<String> {
        let op = self.operator()?;
        match &op.value {
            Value::Var(v) => Some(v.as_str().to_string()),
            Value::Ref(r) => Some(r.to_string()),
            _ => None,
        }
    }

    pub fn operands(&self) -> &[Term] {
        match &self.terms {
            Terms::Call(terms) if !terms.is_empty() => &terms[1..],
            _ => &[],
        }
    }

    pub fn operand(&self, i: usize) -> Option<&Term> {
        self.operands().get(i)
    }

    pub fn is_equality(&self) -> bool {
        self.operator_name().as_deref() == Some(EQUALITY) && self.operands().len() == 2
    }

    pub fn is_assignment(&self) -> bool {
        self.operator_name().as_deref() == Some(ASSIGN) && self.operands().len() == 2
    }

    /// Copy of the expression with the negation flipped.
    pub fn complement(&self) -> Expr {
        let mut e = self.clone();
        e.negated = !e.negated;
        e
    }

    pub fn vars(&self, params: VarVisitorParams) -> VarSet {
        let mut visitor = VarVisitor::with_params(params);
        visitor.walk_expr(self);
        visitor.into_vars()
    }
}

/// Ordered, non-empty conjunction of expressions.
///
/// Every expression's index equals its position; all mutating operations
/// restore that.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Body {
    exprs: Vec<Expr>,
}

impl Body {
    pub fn new(exprs: Vec<Expr>) -> Body {
        let mut body = Body { exprs };
        body.reindex();
        body
    }

    /// The body `true`.
    pub fn truthy() -> Body {
        Body::new(vec![Expr::from_term(Term::boolean(true))])
    }

    fn reindex(&mut self) {
        for (i, e) in self.exprs.iter_mut().enumerate() {
            e.index = i;
        }
    }

    pub fn push(&mut self, expr: Expr) {
        self.exprs.push(expr);
        self.reindex();
    }

    pub fn insert(&mut self, idx: usize, expr: Expr) {
        self.exprs.insert(idx, expr);
        self.reindex();
    }

    pub fn remove(&mut self, idx: usize) -> Expr {
        let e = self.exprs.remove(idx);
        self.reindex();
        e
    }

    pub fn set(&mut self, idx: usize, expr: Expr) {
        self.exprs[idx] = expr;
        self.exprs[idx].index = idx;
    }

    pub fn append(&mut self, other: Body) {
        self.exprs.extend(other.exprs);
        self.reindex();
    }

    pub fn get(&self, idx: usize) -> Option<&Expr> {
        self.exprs.get(idx)
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Expr> {
        self.exprs.iter()
    }

    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn into_exprs(self) -> Vec<Expr> {
        self.exprs
    }

    /// True if the body is exactly `true`.
    pub fn is_truthy(&self) -> bool {
        match self.exprs.as_slice() {
            [e] => !e.negated && e.with.is_empty() && e.terms == Terms::Single(Term::boolean(true)),
            _ => false,
        }
    }

    pub fn vars(&self, params: VarVisitorParams) -> VarSet {
        let mut visitor = VarVisitor::with_params(params);
        visitor.walk_body(self);
        visitor.into_vars()
    }
}

impl FromIterator<Expr> for Body {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Body {
        Body::new(iter.into_iter().collect())
    }
}

/// The kind of document a rule defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocKind {
    Complete,
    PartialSet,
    PartialObject,
    Function,
}

#[derive(Clone, Debug)]
pub struct Head {
    /// Rule reference; for simple rules a single variable.
    pub reference: Ref,
    pub args: Vec<Term>,
    pub key: Option<Term>,
    pub value: Option<Term>,
    /// Set when the value was given with `:=`.
    pub assign: bool,
    pub location: Option<Location>,
}

impl_structural_eq!(Head, s => (&s.reference, &s.args, &s.key, &s.value, s.assign));

impl Head {
    pub fn new(name: &str) -> Head {
        Head {
            reference: Ref::from_var(name),
            args: vec![],
            key: None,
            value: None,
            assign: false,
            location: None,
        }
    }

    pub fn name(&self) -> Option<&Var> {
        self.reference.head_var()
    }

    pub fn doc_kind(&self) -> DocKind {
        if !self.args.is_empty() {
            DocKind::Function
        } else if self.key.is_some() && self.value.is_some() {
            DocKind::PartialObject
        } else if self.key.is_some() {
            DocKind::PartialSet
        } else {
            DocKind::Complete
        }
    }

    /// Variables of the key, the value and the arguments.
    pub fn vars(&self) -> VarSet {
        let mut visitor = VarVisitor::new();
        for t in self.args.iter().chain(self.key.iter()).chain(self.value.iter()) {
            visitor.walk_term(t);
        }
        visitor.into_vars()
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub default: bool,
    pub head: Head,
    pub body: Body,
    pub r#else: Option<Box<Rule>>,
    pub location: Option<Location>,
}

impl_structural_eq!(Rule, s => (&s.head, s.default, &s.body, &s.r#else));

impl Rule {
    /// Full path of the rule's document: the package path followed by the
    /// rule name.
    pub fn path(&self, package: &Ref) -> Ref {
        match self.head.name() {
            Some(name) => package.append(Term::string(name.as_str())),
            None => package.clone(),
        }
    }

    /// Package path extended with the complete rule reference.
    pub fn ref_path(&self, package: &Ref) -> Ref {
        package.extend(&self.head.reference)
    }

    /// The rule followed by its else branches.
    pub fn chain(&self) -> impl Iterator<Item = &Rule> {
        core::iter::successors(Some(self), |r| r.r#else.as_deref())
    }
}

#[derive(Clone, Debug)]
pub struct Import {
    pub path: Term,
    pub alias: Option<Var>,
    pub location: Option<Location>,
}

impl_structural_eq!(Import, s => (&s.path, &s.alias));

impl Import {
    /// Variable that refers to the import in rules: the alias, or the last
    /// element of the path.
    pub fn name(&self) -> Option<Var> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        match &self.path.value {
            Value::Var(v) => Some(v.clone()),
            Value::Ref(r) if r.len() == 1 => r.head_var().cloned(),
            Value::Ref(r) => match r.terms().last().map(|t| &t.value) {
                Some(Value::String(s)) => Some(Var::new(s.clone())),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Package {
    /// Path headed by `data`.
    pub path: Ref,
    pub location: Option<Location>,
}

impl_structural_eq!(Package, s => &s.path);

#[derive(Clone, Debug)]
pub struct Comment {
    pub text: String,
    pub location: Option<Location>,
}

impl_structural_eq!(Comment, s => &s.text);

#[derive(Clone, Debug)]
pub struct Module {
    pub package: Package,
    pub imports: Vec<Import>,
    pub rules: Vec<Rule>,
    pub annotations: Vec<Annotations>,
    pub comments: Vec<Comment>,
}

impl_structural_eq!(Module, s => (&s.package, &s.imports, &s.rules, &s.annotations));

impl Module {
    pub fn new(package: Package) -> Module {
        Module {
            package,
            imports: vec![],
            rules: vec![],
            annotations: vec![],
            comments: vec![],
        }
    }

    /// Rules whose name is `name`.
    pub fn rules_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.head.name().map(|v| v.as_str()) == Some(name))
    }
}
