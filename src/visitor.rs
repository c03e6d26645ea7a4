// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-only traversal of trees.
//!
//! Walks are depth first in source order: module (package, imports, rules,
//! then annotations), rule (head, body, else), head (reference, args, key,
//! value), expression (terms, then `with` modifiers), with (target, value),
//! object (key then value of each pair), comprehension (term or key/value,
//! then body).

use crate::ast::*;

/// What a visitor wants the walk to do after visiting a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitorControl {
    Continue,
    SkipSubtree,
    Stop,
}

/// Any node of a tree.
#[derive(Clone, Copy, Debug)]
pub enum Node<'a> {
    Module(&'a Module),
    Package(&'a Package),
    Import(&'a Import),
    Rule(&'a Rule),
    Head(&'a Head),
    Body(&'a Body),
    Expr(&'a Expr),
    With(&'a With),
    Term(&'a Term),
    /// A reference that is not wrapped in a term: package paths and rule
    /// head references.
    Ref(&'a Ref),
    /// A variable that is not wrapped in a term: import aliases.
    Var(&'a Var),
    Annotations(&'a Annotations),
}

macro_rules! node_from {
    ($($variant:ident),*) => {
        $(
            impl<'a> From<&'a $variant> for Node<'a> {
                fn from(n: &'a $variant) -> Node<'a> {
                    Node::$variant(n)
                }
            }
        )*
    };
}

node_from!(Module, Package, Import, Rule, Head, Body, Expr, With, Term, Ref, Var, Annotations);

fn term_children(term: &Term) -> Vec<Node<'_>> {
    match &term.value {
        Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_) | Value::Var(_) => vec![],
        Value::Ref(r) => r.iter().map(Node::Term).collect(),
        Value::Array(a) => a.iter().map(Node::Term).collect(),
        Value::Set(s) => s.iter().map(Node::Term).collect(),
        Value::Object(o) => o.iter().flat_map(|(k, v)| [Node::Term(k), Node::Term(v)]).collect(),
        Value::ArrayComprehension(c) => vec![Node::Term(&c.term), Node::Body(&c.body)],
        Value::SetComprehension(c) => vec![Node::Term(&c.term), Node::Body(&c.body)],
        Value::ObjectComprehension(c) => vec![Node::Term(&c.key), Node::Term(&c.value), Node::Body(&c.body)],
    }
}

fn expr_terms(expr: &Expr) -> impl Iterator<Item = &Term> {
    let terms: &[Term] = match &expr.terms {
        Terms::Single(t) => core::slice::from_ref(t),
        Terms::Call(terms) => terms,
    };
    terms.iter()
}

impl<'a> Node<'a> {
    /// Direct children in walk order.
    pub fn children(&self) -> Vec<Node<'a>> {
        match *self {
            Node::Module(m) => {
                let mut c = vec![Node::Package(&m.package)];
                c.extend(m.imports.iter().map(Node::Import));
                c.extend(m.rules.iter().map(Node::Rule));
                c.extend(m.annotations.iter().map(Node::Annotations));
                c
            }
            Node::Package(p) => vec![Node::Ref(&p.path)],
            Node::Import(i) => {
                let mut c = vec![Node::Term(&i.path)];
                c.extend(i.alias.iter().map(Node::Var));
                c
            }
            Node::Rule(r) => {
                let mut c = vec![Node::Head(&r.head), Node::Body(&r.body)];
                c.extend(r.r#else.iter().map(|e| Node::Rule(e)));
                c
            }
            Node::Head(h) => {
                let mut c = vec![Node::Ref(&h.reference)];
                c.extend(h.args.iter().map(Node::Term));
                c.extend(h.key.iter().map(Node::Term));
                c.extend(h.value.iter().map(Node::Term));
                c
            }
            Node::Body(b) => b.iter().map(Node::Expr).collect(),
            Node::Expr(e) => {
                let mut c: Vec<_> = expr_terms(e).map(Node::Term).collect();
                c.extend(e.with.iter().map(Node::With));
                c
            }
            Node::With(w) => vec![Node::Term(&w.target), Node::Term(&w.value)],
            Node::Term(t) => term_children(t),
            Node::Ref(r) => r.iter().map(Node::Term).collect(),
            Node::Var(_) | Node::Annotations(_) => vec![],
        }
    }
}

/// Generic visitor. Closures taking a [`Node`] are visitors too.
pub trait Visitor<'a> {
    fn visit(&mut self, node: Node<'a>) -> VisitorControl;
}

impl<'a, F> Visitor<'a> for F
where
    F: FnMut(Node<'a>) -> VisitorControl,
{
    fn visit(&mut self, node: Node<'a>) -> VisitorControl {
        self(node)
    }
}

/// Visitor notified on entry and on exit of every node. `after` runs even
/// when `before` asks to skip the subtree or to stop.
pub trait BeforeAfterVisitor<'a> {
    fn before(&mut self, node: Node<'a>) -> VisitorControl;
    fn after(&mut self, _node: Node<'a>) {}
}

// Returns false once the walk has been stopped.
fn walk_node<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, node: Node<'a>) -> bool {
    match visitor.visit(node) {
        VisitorControl::Stop => false,
        VisitorControl::SkipSubtree => true,
        VisitorControl::Continue => node.children().into_iter().all(|c| walk_node(visitor, c)),
    }
}

/// Walks `node` with `visitor`. Returns `Stop` if the walk was stopped.
pub fn walk<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, node: impl Into<Node<'a>>) -> VisitorControl {
    if walk_node(visitor, node.into()) {
        VisitorControl::Continue
    } else {
        VisitorControl::Stop
    }
}

fn walk_before_after_node<'a, V: BeforeAfterVisitor<'a> + ?Sized>(visitor: &mut V, node: Node<'a>) -> bool {
    let keep_going = match visitor.before(node) {
        VisitorControl::Stop => false,
        VisitorControl::SkipSubtree => true,
        VisitorControl::Continue => node
            .children()
            .into_iter()
            .all(|c| walk_before_after_node(visitor, c)),
    };
    visitor.after(node);
    keep_going
}

pub fn walk_before_after<'a, V: BeforeAfterVisitor<'a> + ?Sized>(
    visitor: &mut V,
    node: impl Into<Node<'a>>,
) -> VisitorControl {
    if walk_before_after_node(visitor, node.into()) {
        VisitorControl::Continue
    } else {
        VisitorControl::Stop
    }
}

/// Calls `f` on every variable, including import aliases.
pub fn walk_vars<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Var) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Var(v) => f(v),
            Node::Term(Term {
                value: Value::Var(v), ..
            }) => f(v),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

/// Calls `f` on every reference term.
pub fn walk_refs<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Ref) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Term(Term {
                value: Value::Ref(r), ..
            }) => f(r),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

pub fn walk_terms<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Term) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Term(t) => f(t),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

pub fn walk_withs<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a With) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::With(w) => f(w),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

pub fn walk_exprs<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Expr) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Expr(e) => f(e),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

pub fn walk_bodies<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Body) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Body(b) => f(b),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

pub fn walk_rules<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Rule) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Rule(r) => f(r),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

/// Calls `f` on every comprehension term.
pub fn walk_closures<'a>(node: impl Into<Node<'a>>, mut f: impl FnMut(&'a Term) -> VisitorControl) {
    walk(
        &mut |n: Node<'a>| match n {
            Node::Term(t) if t.value.is_comprehension() => f(t),
            _ => VisitorControl::Continue,
        },
        node,
    );
}

/// Parts of the tree a [`VarVisitor`] leaves out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarVisitorParams {
    /// Head of every reference.
    pub skip_ref_head: bool,
    /// Operator of calls: the whole operator when it is a variable, the
    /// head when it is a reference.
    pub skip_builtin_operators: bool,
    /// Keys of object literals.
    pub skip_object_keys: bool,
    /// Comprehensions.
    pub skip_closures: bool,
    /// Targets of `with` modifiers.
    pub skip_with_target: bool,
    /// Set literals.
    pub skip_sets: bool,
}

/// Collects the variables of a tree.
#[derive(Debug, Default)]
pub struct VarVisitor {
    params: VarVisitorParams,
    vars: VarSet,
}

impl VarVisitor {
    pub fn new() -> VarVisitor {
        VarVisitor::default()
    }

    pub fn with_params(params: VarVisitorParams) -> VarVisitor {
        VarVisitor {
            params,
            vars: VarSet::new(),
        }
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    pub fn into_vars(self) -> VarSet {
        self.vars
    }

    pub fn walk_node(&mut self, node: Node<'_>) {
        walk(self, node);
    }

    pub fn walk_term(&mut self, term: &Term) {
        walk(self, term);
    }

    pub fn walk_value(&mut self, value: &Value) {
        // Values are walked through a detached term.
        match value {
            Value::Var(v) => {
                self.vars.insert(v.clone());
            }
            _ => self.walk_term(&Term::new(value.clone())),
        }
    }

    pub fn walk_ref(&mut self, r: &Ref) {
        walk(self, r);
    }

    pub fn walk_expr(&mut self, expr: &Expr) {
        walk(self, expr);
    }

    pub fn walk_body(&mut self, body: &Body) {
        walk(self, body);
    }

    fn walk_ref_tail(&mut self, r: &Ref) {
        for t in r.iter().skip(1) {
            self.walk_term(t);
        }
    }
}

impl<'a> Visitor<'a> for VarVisitor {
    fn visit(&mut self, node: Node<'a>) -> VisitorControl {
        let p = self.params;
        match node {
            Node::Var(v) => {
                self.vars.insert(v.clone());
            }
            Node::Ref(r) if p.skip_ref_head => {
                self.walk_ref_tail(r);
                return VisitorControl::SkipSubtree;
            }
            Node::With(w) if p.skip_with_target => {
                self.walk_term(&w.value);
                return VisitorControl::SkipSubtree;
            }
            Node::Expr(e) if p.skip_builtin_operators && e.is_call() => {
                if let Some(Term {
                    value: Value::Ref(r), ..
                }) = e.operator()
                {
                    self.walk_ref_tail(r);
                }
                for t in e.operands() {
                    self.walk_term(t);
                }
                for w in &e.with {
                    walk(self, w);
                }
                return VisitorControl::SkipSubtree;
            }
            Node::Term(t) => match &t.value {
                Value::Var(v) => {
                    self.vars.insert(v.clone());
                }
                Value::Ref(r) if p.skip_ref_head => {
                    self.walk_ref_tail(r);
                    return VisitorControl::SkipSubtree;
                }
                Value::Object(o) if p.skip_object_keys => {
                    for v in o.values() {
                        self.walk_term(v);
                    }
                    return VisitorControl::SkipSubtree;
                }
                Value::Set(_) if p.skip_sets => return VisitorControl::SkipSubtree,
                v if v.is_comprehension() && p.skip_closures => return VisitorControl::SkipSubtree,
                _ => (),
            },
            _ => (),
        }
        VisitorControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(vars: &VarSet) -> Vec<&str> {
        vars.iter().map(|v| v.as_str()).collect()
    }

    fn sample_expr() -> Expr {
        // f(x, {k: v}, {s}, [t | y], data.a[i]) with input as z
        let compr = Term::new(Value::ArrayComprehension(Box::new(ArrayComprehension {
            term: Term::var("t"),
            body: Body::new(vec![Expr::from_term(Term::var("y"))]),
        })));
        let mut e = Expr::call(
            Term::var("f"),
            vec![
                Term::var("x"),
                Term::object(vec![(Term::var("k"), Term::var("v"))]),
                Term::set(vec![Term::var("s")]),
                compr,
                Term::reference(Ref::new(vec![Term::var("data"), Term::string("a"), Term::var("i")])),
            ],
        );
        e.with.push(With::new(Term::var("w"), Term::var("z")));
        e
    }

    #[test]
    fn collects_all_vars_by_default() {
        let vars = sample_expr().vars(VarVisitorParams::default());
        assert_eq!(
            names(&vars),
            vec!["data", "f", "i", "k", "s", "t", "v", "w", "x", "y", "z"]
        );
    }

    #[test]
    fn honors_skip_flags() {
        let vars = sample_expr().vars(VarVisitorParams {
            skip_ref_head: true,
            skip_builtin_operators: true,
            skip_object_keys: true,
            skip_closures: true,
            skip_with_target: true,
            skip_sets: true,
        });
        assert_eq!(names(&vars), vec!["i", "v", "x", "z"]);
    }

    #[test]
    fn skip_subtree_and_stop() {
        let e = sample_expr();
        let mut seen = vec![];
        walk(
            &mut |n: Node<'_>| match n {
                Node::Term(t) if t.value.is_comprehension() => VisitorControl::SkipSubtree,
                Node::Term(Term {
                    value: Value::Var(v), ..
                }) => {
                    seen.push(v.as_str().to_string());
                    VisitorControl::Continue
                }
                _ => VisitorControl::Continue,
            },
            &e,
        );
        assert!(!seen.contains(&"t".to_string()));
        assert!(seen.contains(&"z".to_string()));

        let mut count = 0;
        let control = walk(
            &mut |n: Node<'_>| {
                if matches!(n, Node::Term(_)) {
                    count += 1;
                    if count == 2 {
                        return VisitorControl::Stop;
                    }
                }
                VisitorControl::Continue
            },
            &e,
        );
        assert_eq!(control, VisitorControl::Stop);
        assert_eq!(count, 2);
    }

    struct Depth {
        depth: usize,
        max: usize,
        exits: usize,
    }

    impl<'a> BeforeAfterVisitor<'a> for Depth {
        fn before(&mut self, node: Node<'a>) -> VisitorControl {
            self.depth += 1;
            self.max = self.max.max(self.depth);
            if matches!(node, Node::With(_)) {
                VisitorControl::SkipSubtree
            } else {
                VisitorControl::Continue
            }
        }

        fn after(&mut self, _node: Node<'a>) {
            self.depth -= 1;
            self.exits += 1;
        }
    }

    #[test]
    fn before_after_balances() {
        let e = sample_expr();
        let mut v = Depth {
            depth: 0,
            max: 0,
            exits: 0,
        };
        walk_before_after(&mut v, &e);
        assert_eq!(v.depth, 0);
        assert!(v.max >= 4);
        assert!(v.exits > 0);
    }

    #[test]
    fn typed_walks() {
        let e = sample_expr();
        let mut refs = 0;
        walk_refs(&e, |_| {
            refs += 1;
            VisitorControl::Continue
        });
        assert_eq!(refs, 1);

        let mut closures = 0;
        walk_closures(&e, |_| {
            closures += 1;
            VisitorControl::Continue
        });
        assert_eq!(closures, 1);

        let mut withs = 0;
        walk_withs(&e, |_| {
            withs += 1;
            VisitorControl::Continue
        });
        assert_eq!(withs, 1);

        let mut bodies = 0;
        walk_bodies(&e, |_| {
            bodies += 1;
            VisitorControl::Continue
        });
        assert_eq!(bodies, 1);
    }
}
