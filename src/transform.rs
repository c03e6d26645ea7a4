// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rewriting of trees.
//!
//! A [`Transformer`] is offered every node before its children. Returning
//! [`Transformed::Continue`] rewrites the children of the returned node;
//! returning [`Transformed::Done`] keeps the returned node as is. The input
//! tree is never modified.

use crate::ast::*;

use anyhow::Result;

pub enum Transformed<T> {
    /// Keep rewriting inside the node.
    Continue(T),
    /// The node is already rewritten.
    Done(T),
}

type Step<T> = Result<Transformed<T>>;

/// Hooks for each node kind. Every hook defaults to leaving the node alone.
pub trait Transformer {
    fn module(&mut self, m: Module) -> Step<Module> {
        Ok(Transformed::Continue(m))
    }

    fn package(&mut self, p: Package) -> Step<Package> {
        Ok(Transformed::Continue(p))
    }

    fn import(&mut self, i: Import) -> Step<Import> {
        Ok(Transformed::Continue(i))
    }

    fn rule(&mut self, r: Rule) -> Step<Rule> {
        Ok(Transformed::Continue(r))
    }

    fn head(&mut self, h: Head) -> Step<Head> {
        Ok(Transformed::Continue(h))
    }

    fn body(&mut self, b: Body) -> Step<Body> {
        Ok(Transformed::Continue(b))
    }

    fn expr(&mut self, e: Expr) -> Step<Expr> {
        Ok(Transformed::Continue(e))
    }

    fn with(&mut self, w: With) -> Step<With> {
        Ok(Transformed::Continue(w))
    }

    fn term(&mut self, t: Term) -> Step<Term> {
        Ok(Transformed::Continue(t))
    }

    /// References outside terms: package paths and rule head references.
    fn reference(&mut self, r: Ref) -> Step<Ref> {
        Ok(Transformed::Continue(r))
    }

    fn annotations(&mut self, a: Annotations) -> Result<Annotations> {
        Ok(a)
    }
}

/// Nodes that can be rewritten.
pub trait Transformable: Sized {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Self>;
}

/// Rewrites a copy of `node`.
pub fn transform<X: Transformable + Clone, T: Transformer + ?Sized>(t: &mut T, node: &X) -> Result<X> {
    node.clone().transform_with(t)
}

fn terms<T: Transformer + ?Sized>(t: &mut T, terms: Vec<Term>) -> Result<Vec<Term>> {
    terms.into_iter().map(|x| x.transform_with(t)).collect()
}

impl Transformable for Term {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Term> {
        let Term { value, location } = match t.term(self)? {
            Transformed::Done(x) => return Ok(x),
            Transformed::Continue(x) => x,
        };
        let value = match value {
            Value::Ref(r) => Value::Ref(Ref::new(terms(t, r.into_terms())?)),
            Value::Array(a) => Value::Array(terms(t, a)?),
            Value::Set(s) => Value::Set(terms(t, s.into_items())?.into_iter().collect()),
            Value::Object(o) => {
                let mut obj = Object::new();
                for (k, v) in o.into_items() {
                    obj.insert(k.transform_with(t)?, v.transform_with(t)?);
                }
                Value::Object(obj)
            }
            Value::ArrayComprehension(c) => {
                let ArrayComprehension { term, body } = *c;
                Value::ArrayComprehension(Box::new(ArrayComprehension {
                    term: term.transform_with(t)?,
                    body: body.transform_with(t)?,
                }))
            }
            Value::SetComprehension(c) => {
                let SetComprehension { term, body } = *c;
                Value::SetComprehension(Box::new(SetComprehension {
                    term: term.transform_with(t)?,
                    body: body.transform_with(t)?,
                }))
            }
            Value::ObjectComprehension(c) => {
                let ObjectComprehension { key, value, body } = *c;
                Value::ObjectComprehension(Box::new(ObjectComprehension {
                    key: key.transform_with(t)?,
                    value: value.transform_with(t)?,
                    body: body.transform_with(t)?,
                }))
            }
            v => v,
        };
        Ok(Term { value, location })
    }
}

impl Transformable for Ref {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Ref> {
        match t.reference(self)? {
            Transformed::Done(r) => Ok(r),
            Transformed::Continue(r) => Ok(Ref::new(terms(t, r.into_terms())?)),
        }
    }
}

impl Transformable for With {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<With> {
        match t.with(self)? {
            Transformed::Done(w) => Ok(w),
            Transformed::Continue(w) => Ok(With {
                target: w.target.transform_with(t)?,
                value: w.value.transform_with(t)?,
                location: w.location,
            }),
        }
    }
}

impl Transformable for Expr {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Expr> {
        let mut e = match t.expr(self)? {
            Transformed::Done(e) => return Ok(e),
            Transformed::Continue(e) => e,
        };
        e.terms = match e.terms {
            Terms::Single(x) => Terms::Single(x.transform_with(t)?),
            Terms::Call(xs) => Terms::Call(terms(t, xs)?),
        };
        e.with = e
            .with
            .into_iter()
            .map(|w| w.transform_with(t))
            .collect::<Result<_>>()?;
        Ok(e)
    }
}

impl Transformable for Body {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Body> {
        match t.body(self)? {
            Transformed::Done(b) => Ok(b),
            Transformed::Continue(b) => Ok(Body::new(
                b.into_exprs()
                    .into_iter()
                    .map(|e| e.transform_with(t))
                    .collect::<Result<_>>()?,
            )),
        }
    }
}

impl Transformable for Head {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Head> {
        let h = match t.head(self)? {
            Transformed::Done(h) => return Ok(h),
            Transformed::Continue(h) => h,
        };
        Ok(Head {
            reference: h.reference.transform_with(t)?,
            args: terms(t, h.args)?,
            key: h.key.map(|k| k.transform_with(t)).transpose()?,
            value: h.value.map(|v| v.transform_with(t)).transpose()?,
            assign: h.assign,
            location: h.location,
        })
    }
}

impl Transformable for Rule {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Rule> {
        let r = match t.rule(self)? {
            Transformed::Done(r) => return Ok(r),
            Transformed::Continue(r) => r,
        };
        Ok(Rule {
            default: r.default,
            head: r.head.transform_with(t)?,
            body: r.body.transform_with(t)?,
            r#else: r
                .r#else
                .map(|e| e.transform_with(t).map(Box::new))
                .transpose()?,
            location: r.location,
        })
    }
}

impl Transformable for Import {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Import> {
        match t.import(self)? {
            Transformed::Done(i) => Ok(i),
            Transformed::Continue(i) => Ok(Import {
                path: i.path.transform_with(t)?,
                ..i
            }),
        }
    }
}

impl Transformable for Package {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Package> {
        match t.package(self)? {
            Transformed::Done(p) => Ok(p),
            Transformed::Continue(p) => Ok(Package {
                path: p.path.transform_with(t)?,
                ..p
            }),
        }
    }
}

impl Transformable for Module {
    fn transform_with<T: Transformer + ?Sized>(self, t: &mut T) -> Result<Module> {
        let m = match t.module(self)? {
            Transformed::Done(m) => return Ok(m),
            Transformed::Continue(m) => m,
        };
        Ok(Module {
            package: m.package.transform_with(t)?,
            imports: m
                .imports
                .into_iter()
                .map(|i| i.transform_with(t))
                .collect::<Result<_>>()?,
            rules: m
                .rules
                .into_iter()
                .map(|r| r.transform_with(t))
                .collect::<Result<_>>()?,
            annotations: m
                .annotations
                .into_iter()
                .map(|a| t.annotations(a))
                .collect::<Result<_>>()?,
            comments: m.comments,
        })
    }
}

struct RefTransformer<F>(F);

impl<F: FnMut(Ref) -> Result<Value>> Transformer for RefTransformer<F> {
    fn term(&mut self, t: Term) -> Step<Term> {
        match t.value {
            Value::Ref(r) => Ok(Transformed::Continue(Term {
                value: (self.0)(r)?,
                location: t.location,
            })),
            _ => Ok(Transformed::Continue(t)),
        }
    }
}

/// Replaces every reference term with the value `f` returns for it. The
/// terms inside the returned value are visited as well.
pub fn transform_refs<X, F>(node: &X, f: F) -> Result<X>
where
    X: Transformable + Clone,
    F: FnMut(Ref) -> Result<Value>,
{
    transform(&mut RefTransformer(f), node)
}

struct VarTransformer<F>(F);

impl<F: FnMut(Var) -> Result<Value>> Transformer for VarTransformer<F> {
    fn term(&mut self, t: Term) -> Step<Term> {
        match t.value {
            Value::Var(v) => Ok(Transformed::Done(Term {
                value: (self.0)(v)?,
                location: t.location,
            })),
            _ => Ok(Transformed::Continue(t)),
        }
    }
}

/// Replaces every variable term with the value `f` returns for it. The
/// returned values are not visited again.
pub fn transform_vars<X, F>(node: &X, f: F) -> Result<X>
where
    X: Transformable + Clone,
    F: FnMut(Var) -> Result<Value>,
{
    transform(&mut VarTransformer(f), node)
}

struct AnnotationsTransformer<F>(F);

impl<F: FnMut(Annotations) -> Result<Annotations>> Transformer for AnnotationsTransformer<F> {
    fn annotations(&mut self, a: Annotations) -> Result<Annotations> {
        (self.0)(a)
    }
}

/// Rewrites every annotation block of `module`.
pub fn transform_annotations<F>(module: &Module, f: F) -> Result<Module>
where
    F: FnMut(Annotations) -> Result<Annotations>,
{
    transform(&mut AnnotationsTransformer(f), module)
}
