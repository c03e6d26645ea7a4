// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Output variables and safety of bodies.
//!
//! A variable is safe once some expression binds it. The analysis computes,
//! for a set of variables already bound, the variables an expression or a
//! body binds in addition. It never fails; [`SafetyChecker::check_module`]
//! turns whatever is still unbound into errors.

use crate::ast::*;
use crate::capabilities::Capabilities;
use crate::errors::{Error, ErrorKind, Errors};
use crate::transform::{transform, Transformed, Transformer};
use crate::visitor::{walk_closures, walk_terms, VarVisitor, VarVisitorParams, VisitorControl};

use alloc::collections::BTreeMap;

use anyhow::Result;
use log::{debug, trace};

/// Variables that must be bound for an expression to be evaluated.
fn safety_params() -> VarVisitorParams {
    VarVisitorParams {
        skip_builtin_operators: true,
        skip_closures: true,
        skip_with_target: true,
        ..Default::default()
    }
}

// Variables bound by a term that is known to be bound as a whole.
fn unifier_params() -> VarVisitorParams {
    VarVisitorParams {
        skip_ref_head: true,
        skip_object_keys: true,
        skip_closures: true,
        skip_sets: true,
        ..Default::default()
    }
}

fn vars_with(term: &Term, params: VarVisitorParams) -> VarSet {
    let mut visitor = VarVisitor::with_params(params);
    visitor.walk_term(term);
    visitor.into_vars()
}

fn difference(a: &VarSet, b: &VarSet) -> VarSet {
    a.difference(b).cloned().collect()
}

/// Unsafe variables and the indices of the expressions they occur in.
pub type UnsafeVars = BTreeMap<Var, Vec<usize>>;

#[derive(Clone, Debug)]
pub struct SafetyChecker<'c> {
    capabilities: &'c Capabilities,
    functions: BTreeMap<String, usize>,
}

impl<'c> SafetyChecker<'c> {
    pub fn new(capabilities: &'c Capabilities) -> SafetyChecker<'c> {
        SafetyChecker {
            capabilities,
            functions: BTreeMap::new(),
        }
    }

    /// Declares a user function. `name` is the operator as written in calls,
    /// e.g. `f` or `data.lib.f`.
    pub fn with_function_arity(mut self, name: &str, arity: usize) -> SafetyChecker<'c> {
        self.functions.insert(name.to_string(), arity);
        self
    }

    fn arity(&self, op: &Term) -> Option<usize> {
        let name = match &op.value {
            Value::Var(v) => v.as_str().to_string(),
            Value::Ref(r) => r.to_string(),
            _ => return None,
        };
        if let Some(arity) = self.functions.get(&name) {
            return Some(*arity);
        }
        self.capabilities.builtin(&name).map(|b| b.arity())
    }

    fn is_safe(&self, v: &Var, safe: &VarSet) -> bool {
        safe.contains(v) || self.capabilities.is_root_document(v.as_str())
    }

    fn is_ref_safe(&self, r: &Ref, safe: &VarSet) -> bool {
        match r.head() {
            Some(Term {
                value: Value::Var(v), ..
            }) => self.is_safe(v, safe),
            Some(head) => head.vars().iter().all(|v| self.is_safe(v, safe)),
            None => false,
        }
    }

    // Variables bound by walking the safe references of the expression.
    fn output_vars_for_terms(&self, expr: &Expr, safe: &VarSet) -> VarSet {
        let mut output = VarSet::new();
        walk_terms(expr, |t| match &t.value {
            v if v.is_comprehension() => VisitorControl::SkipSubtree,
            Value::Ref(r) if self.is_ref_safe(r, safe) => {
                output.extend(r.output_vars());
                VisitorControl::Continue
            }
            Value::Ref(_) => VisitorControl::SkipSubtree,
            _ => VisitorControl::Continue,
        });
        output
    }

    fn output_vars_for_eq(&self, expr: &Expr, a: &Term, b: &Term, safe: &VarSet) -> VarSet {
        let mut output = self.output_vars_for_terms(expr, safe);
        output.extend(safe.iter().cloned());
        let mut unifier = Unifier::new(self, &output);
        unifier.unify(a, b);
        let unified = unifier.unified;
        output.extend(unified);
        difference(&output, safe)
    }

    fn output_vars_for_call(&self, expr: &Expr, arity: usize, safe: &VarSet) -> VarSet {
        let mut output = self.output_vars_for_terms(expr, safe);
        let operands = expr.operands();
        if arity >= operands.len() {
            return output;
        }

        let params = VarVisitorParams {
            skip_closures: true,
            skip_sets: true,
            skip_object_keys: true,
            skip_ref_head: true,
            ..Default::default()
        };
        let mut inputs = VarVisitor::with_params(params);
        for t in &operands[..arity] {
            inputs.walk_term(t);
        }
        if inputs.vars().iter().any(|v| !output.contains(v) && !self.is_safe(v, safe)) {
            return VarSet::new();
        }

        let mut targets = VarVisitor::with_params(params);
        for t in &operands[arity..] {
            targets.walk_term(t);
        }
        output.extend(targets.into_vars());
        output
    }

    fn expr_outputs(&self, expr: &Expr, safe: &VarSet) -> VarSet {
        if expr.negated {
            return VarSet::new();
        }

        // `with` values are evaluated before the expression.
        let params = VarVisitorParams {
            skip_closures: true,
            ..Default::default()
        };
        for w in &expr.with {
            if vars_with(&w.value, params).iter().any(|v| !self.is_safe(v, safe)) {
                return VarSet::new();
            }
        }

        match &expr.terms {
            Terms::Single(_) => self.output_vars_for_terms(expr, safe),
            Terms::Call(_) if expr.is_equality() || expr.is_assignment() => {
                match (expr.operand(0), expr.operand(1)) {
                    (Some(a), Some(b)) => self.output_vars_for_eq(expr, a, b, safe),
                    _ => VarSet::new(),
                }
            }
            Terms::Call(terms) => match terms.first().and_then(|op| self.arity(op)) {
                Some(arity) => self.output_vars_for_call(expr, arity, safe),
                None => self.output_vars_for_terms(expr, safe),
            },
        }
    }

    /// Variables `expr` binds that are not in `safe`.
    pub fn output_vars_for_expr(&self, expr: &Expr, safe: &VarSet) -> VarSet {
        difference(&self.expr_outputs(expr, safe), safe)
    }

    /// Variables the body binds, processing expressions in order.
    pub fn output_vars_for_body(&self, body: &Body, safe: &VarSet) -> VarSet {
        let mut output = safe.clone();
        for e in body.iter() {
            let vars = self.expr_outputs(e, &output);
            output.extend(vars);
        }
        difference(&output, safe)
    }

    /// Reorders `body` so that each expression comes after the ones binding
    /// its variables. Expressions that can never be made safe keep their
    /// relative order at the end, and their unsafe variables are returned
    /// with the indices (in `body`) of the expressions they occur in.
    pub fn reorder_body(&self, body: &Body, globals: &VarSet) -> (Body, UnsafeVars) {
        let params = safety_params();
        let exprs = body.exprs();
        let body_vars = body.vars(params);

        let mut pending: Vec<VarSet> = exprs
            .iter()
            .map(|e| {
                e.vars(params)
                    .into_iter()
                    .filter(|v| !self.is_safe(v, globals))
                    .collect()
            })
            .collect();

        let mut safe = globals.clone();
        let mut order: Vec<usize> = vec![];
        let mut placed = vec![false; exprs.len()];
        let mut round = 0;

        loop {
            let n = order.len();
            for (i, e) in exprs.iter().enumerate() {
                if placed[i] {
                    continue;
                }
                let outputs = self.expr_outputs(e, &safe);

                // Variables the comprehensions of the expression close over
                // must be bound by what precedes it.
                let closed: VarSet = closure_vars(e)
                    .intersection(&body_vars)
                    .filter(|v| !self.is_safe(v, &safe))
                    .cloned()
                    .collect();
                if !closed.is_empty() {
                    if closed == outputs {
                        continue;
                    }
                    pending[i].extend(closed);
                }

                pending[i].retain(|v| !outputs.contains(v) && !self.is_safe(v, &safe));
                if pending[i].is_empty() {
                    placed[i] = true;
                    order.push(i);
                    safe.extend(outputs);
                }
            }
            round += 1;
            trace!("safety round {round}: {} of {} expression(s) ordered", order.len(), exprs.len());
            if order.len() == n {
                break;
            }
        }

        let mut unsafe_vars = UnsafeVars::new();
        let record = |v: Var, i: usize, unsafe_vars: &mut UnsafeVars| {
            let idxs = unsafe_vars.entry(v).or_default();
            if !idxs.contains(&i) {
                idxs.push(i);
            }
        };

        // Comprehensions are checked with everything bound before them.
        let mut globals = globals.clone();
        let mut reordered = vec![];
        for (pos, &i) in order.iter().enumerate() {
            if pos > 0 {
                globals.extend(exprs[order[pos - 1]].vars(params));
            }
            let mut closures = ClosureReorder {
                checker: self,
                globals: &globals,
                unsafe_vars: VarSet::new(),
            };
            let expr = match transform(&mut closures, &exprs[i]) {
                Ok(e) => e,
                Err(e) => {
                    debug!("closures of expression {i} left in place: {e}");
                    exprs[i].clone()
                }
            };
            for v in closures.unsafe_vars {
                record(v, i, &mut unsafe_vars);
            }
            reordered.push(expr);
        }

        for (i, e) in exprs.iter().enumerate() {
            if placed[i] {
                continue;
            }
            let mut vars = core::mem::take(&mut pending[i]);
            vars.retain(|v| !self.is_safe(v, &safe));
            if vars.is_empty() {
                vars = closure_vars(e);
                vars.retain(|v| !self.is_safe(v, &safe));
            }
            for v in vars {
                record(v, i, &mut unsafe_vars);
            }
            reordered.push(e.clone());
        }

        (Body::new(reordered), unsafe_vars)
    }

    fn head_vars(head: &Head) -> VarSet {
        let params = VarVisitorParams {
            skip_closures: true,
            ..Default::default()
        };
        let mut visitor = VarVisitor::with_params(params);
        for t in head.key.iter().chain(head.value.iter()) {
            visitor.walk_term(t);
        }
        for t in head.reference.iter().skip(1) {
            visitor.walk_term(t);
        }
        visitor.into_vars()
    }

    fn unsafe_error(v: &Var, location: Option<Location>) -> Error {
        let message = if v.is_generated() {
            "expression is unsafe".to_string()
        } else if v.as_str().starts_with(WILDCARD_PREFIX) {
            format!("var {WILDCARD} is unsafe")
        } else {
            format!("var {} is unsafe", v.as_str())
        };
        Error::new(ErrorKind::CompileErr, message).with_location(location)
    }

    // Location of the first occurrence of `v` in `expr`.
    fn var_location(expr: &Expr, v: &Var) -> Option<Location> {
        let mut location = None;
        walk_terms(expr, |t| match &t.value {
            Value::Var(x) if x == v && location.is_none() => {
                location = t.location.clone();
                VisitorControl::Stop
            }
            _ => VisitorControl::Continue,
        });
        location.or_else(|| expr.location.clone())
    }

    fn check_rule(&self, rule: &Rule, globals: &VarSet, errors: &mut Errors) -> Rule {
        let mut safe = globals.clone();
        for a in &rule.head.args {
            safe.extend(a.vars());
        }

        let (body, unsafe_vars) = self.reorder_body(&rule.body, &safe);
        for (v, idxs) in &unsafe_vars {
            let location = idxs
                .first()
                .and_then(|i| rule.body.get(*i))
                .and_then(|e| Self::var_location(e, v));
            errors.push(Self::unsafe_error(v, location));
        }

        let bound = self.output_vars_for_body(&body, &safe);
        for v in Self::head_vars(&rule.head) {
            if self.is_safe(&v, &safe) || bound.contains(&v) || unsafe_vars.contains_key(&v) {
                continue;
            }
            errors.push(Self::unsafe_error(&v, rule.head.location.clone()));
        }

        Rule {
            body,
            r#else: rule
                .r#else
                .as_ref()
                .map(|r| Box::new(self.check_rule(r, globals, errors))),
            ..rule.clone()
        }
    }

    /// Reorders every rule body of the module and reports unsafe variables
    /// as `CompileErr`s. Rule names, imports and root documents are bound.
    pub fn check_module(&self, module: &Module) -> Result<Module, Errors> {
        let mut checker = self.clone();
        let mut globals = VarSet::new();
        for r in &module.rules {
            if let Some(name) = r.head.name() {
                globals.insert(name.clone());
                if !r.head.args.is_empty() {
                    let arity = r.head.args.len();
                    checker.functions.insert(name.as_str().to_string(), arity);
                    checker
                        .functions
                        .insert(r.path(&module.package.path).to_string(), arity);
                }
            }
        }
        for i in &module.imports {
            globals.extend(i.name());
        }

        let mut errors = Errors::new();
        let mut checked = module.clone();
        checked.rules = module
            .rules
            .iter()
            .map(|r| checker.check_rule(r, &globals, &mut errors))
            .collect();
        errors.into_result(checked)
    }
}

/// Variables occurring inside the comprehensions of `expr`.
fn closure_vars(expr: &Expr) -> VarSet {
    let mut vars = VarSet::new();
    walk_closures(expr, |t| {
        let mut visitor = VarVisitor::with_params(VarVisitorParams {
            skip_builtin_operators: true,
            ..Default::default()
        });
        visitor.walk_term(t);
        vars.extend(visitor.into_vars());
        VisitorControl::SkipSubtree
    });
    vars
}

// Reorders the bodies of comprehensions and checks that their heads are
// bound.
struct ClosureReorder<'a, 'c> {
    checker: &'a SafetyChecker<'c>,
    globals: &'a VarSet,
    unsafe_vars: VarSet,
}

impl ClosureReorder<'_, '_> {
    fn reorder(&mut self, body: &Body, heads: &[&Term]) -> Body {
        let (body, unsafe_vars) = self.checker.reorder_body(body, self.globals);
        self.unsafe_vars.extend(unsafe_vars.into_keys());

        let mut bound = self.checker.output_vars_for_body(&body, self.globals);
        bound.extend(self.globals.iter().cloned());
        for h in heads {
            for v in vars_with(h, safety_params()) {
                if !self.checker.is_safe(&v, &bound) {
                    self.unsafe_vars.insert(v);
                }
            }
        }
        body
    }
}

impl Transformer for ClosureReorder<'_, '_> {
    fn term(&mut self, t: Term) -> Result<Transformed<Term>> {
        let value = match t.value {
            Value::ArrayComprehension(c) => {
                let body = self.reorder(&c.body, &[&c.term]);
                Value::ArrayComprehension(Box::new(ArrayComprehension { term: c.term, body }))
            }
            Value::SetComprehension(c) => {
                let body = self.reorder(&c.body, &[&c.term]);
                Value::SetComprehension(Box::new(SetComprehension { term: c.term, body }))
            }
            Value::ObjectComprehension(c) => {
                let body = self.reorder(&c.body, &[&c.key, &c.value]);
                Value::ObjectComprehension(Box::new(ObjectComprehension {
                    key: c.key,
                    value: c.value,
                    body,
                }))
            }
            value => {
                return Ok(Transformed::Continue(Term {
                    value,
                    location: t.location,
                }))
            }
        };
        Ok(Transformed::Done(Term {
            value,
            location: t.location,
        }))
    }
}

struct Unifier<'a, 'c> {
    checker: &'a SafetyChecker<'c>,
    safe: &'a VarSet,
    unified: VarSet,
    // Variables that become safe together with the ones they map to.
    unknown: BTreeMap<Var, VarSet>,
}

impl<'a, 'c> Unifier<'a, 'c> {
    fn new(checker: &'a SafetyChecker<'c>, safe: &'a VarSet) -> Unifier<'a, 'c> {
        Unifier {
            checker,
            safe,
            unified: VarSet::new(),
            unknown: BTreeMap::new(),
        }
    }

    fn is_safe(&self, v: &Var) -> bool {
        self.checker.is_safe(v, self.safe) || self.unified.contains(v)
    }

    fn is_ref_safe(&self, r: &Ref) -> bool {
        match r.head() {
            Some(Term {
                value: Value::Var(v), ..
            }) => self.is_safe(v),
            Some(head) => head.vars().iter().all(|v| self.is_safe(v)),
            None => false,
        }
    }

    fn mark_safe(&mut self, v: &Var) {
        if !self.unified.insert(v.clone()) {
            return;
        }
        if let Some(deps) = self.unknown.remove(v) {
            for d in deps {
                self.mark_safe(&d);
            }
        }
        let mut ready = vec![];
        for (x, deps) in self.unknown.iter_mut() {
            if deps.remove(v) && deps.is_empty() {
                ready.push(x.clone());
            }
        }
        for x in ready {
            self.unknown.remove(&x);
            self.mark_safe(&x);
        }
    }

    fn mark_all_safe(&mut self, t: &Term) {
        for v in vars_with(t, unifier_params()) {
            self.mark_safe(&v);
        }
    }

    fn mark_unknown(&mut self, a: &Var, b: &Var) {
        self.unknown.entry(a.clone()).or_default().insert(b.clone());
    }

    fn unify_all(&mut self, v: &Var, t: &Term) {
        if self.is_safe(v) {
            self.mark_all_safe(t);
            return;
        }
        let unsafe_vars: Vec<Var> = vars_with(t, unifier_params())
            .into_iter()
            .filter(|x| !self.is_safe(x))
            .collect();
        if unsafe_vars.is_empty() {
            self.mark_safe(v);
        }
        for x in unsafe_vars {
            self.mark_unknown(v, &x);
        }
    }

    fn unify_var(&mut self, v: &Var, t: &Term) {
        match &t.value {
            Value::Var(w) => {
                if self.is_safe(w) {
                    self.mark_safe(v);
                } else if self.is_safe(v) {
                    self.mark_safe(w);
                } else {
                    self.mark_unknown(v, w);
                    self.mark_unknown(w, v);
                }
            }
            Value::Ref(r) => {
                if self.is_ref_safe(r) {
                    self.mark_safe(v);
                }
            }
            Value::Array(_) | Value::Object(_) => self.unify_all(v, t),
            Value::Set(_) => {
                if t.vars().iter().all(|x| self.is_safe(x)) {
                    self.mark_safe(v);
                }
            }
            _ => self.mark_safe(v),
        }
    }

    fn unify(&mut self, a: &Term, b: &Term) {
        match (&a.value, &b.value) {
            (Value::Var(v), _) => self.unify_var(v, b),
            (_, Value::Var(v)) => self.unify_var(v, a),
            (Value::Ref(r), Value::Array(_) | Value::Object(_)) => {
                if self.is_ref_safe(r) {
                    self.mark_all_safe(b);
                }
            }
            (Value::Array(_) | Value::Object(_), Value::Ref(r)) => {
                if self.is_ref_safe(r) {
                    self.mark_all_safe(a);
                }
            }
            (x, Value::Array(_)) if x.is_comprehension() => self.mark_all_safe(b),
            (Value::Array(_), y) if y.is_comprehension() => self.mark_all_safe(a),
            (Value::Array(x), Value::Array(y)) if x.len() == y.len() => {
                for (l, r) in x.iter().zip(y.iter()) {
                    self.unify(l, r);
                }
            }
            (Value::Object(x), Value::Object(y)) if x.len() == y.len() => {
                for (k, l) in x.iter() {
                    if let Some(r) = y.get(k) {
                        self.unify(l, r);
                    }
                }
            }
            // Elements of sets only meet elements equal to them.
            (Value::Set(x), Value::Set(y)) if x.len() == y.len() => {
                for l in x.iter() {
                    if let Some(r) = y.iter().find(|r| *r == l) {
                        self.unify(l, r);
                    }
                }
            }
            _ => (),
        }
    }
}

/// [`SafetyChecker::output_vars_for_expr`] with the default capabilities.
pub fn output_vars_for_expr(expr: &Expr, safe: &VarSet) -> VarSet {
    SafetyChecker::new(&Capabilities::default()).output_vars_for_expr(expr, safe)
}

/// [`SafetyChecker::output_vars_for_body`] with the default capabilities.
pub fn output_vars_for_body(body: &Body, safe: &VarSet) -> VarSet {
    SafetyChecker::new(&Capabilities::default()).output_vars_for_body(body, safe)
}

/// [`SafetyChecker::reorder_body`] with the default capabilities.
pub fn reorder_body_for_safety(body: &Body, safe: &VarSet) -> (Body, UnsafeVars) {
    SafetyChecker::new(&Capabilities::default()).reorder_body(body, safe)
}

/// [`SafetyChecker::check_module`] with the default capabilities.
pub fn check_safety(module: &Module) -> Result<Module, Errors> {
    SafetyChecker::new(&Capabilities::default()).check_module(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_body, parse_module, ParserOptions};

    fn body(text: &str) -> Body {
        parse_body(text, &ParserOptions::default()).unwrap()
    }

    fn vars(names: &[&str]) -> VarSet {
        names.iter().map(|n| Var::new(*n)).collect()
    }

    fn outputs(text: &str) -> VarSet {
        output_vars_for_body(&body(text), &VarSet::new())
    }

    #[test]
    fn body_outputs() {
        assert_eq!(outputs("x = 1; y = x + 1"), vars(&["x", "y"]));
        assert_eq!(outputs("y = x + 1; x = 1"), vars(&["x"]));
        assert_eq!(outputs("y = x + 1"), vars(&[]));
        assert_eq!(outputs("x = 1; y = x; z = y"), vars(&["x", "y", "z"]));
        assert_eq!(outputs("not x = 1"), vars(&[]));
        assert_eq!(outputs("x"), vars(&[]));
    }

    #[test]
    fn unification() {
        assert_eq!(outputs("[x, 2] = [1, y]"), vars(&["x", "y"]));
        assert_eq!(outputs("[x, [1]] = [1, [y]]"), vars(&["x", "y"]));
        assert_eq!(outputs("x = {1, y}"), vars(&[]));
        assert_eq!(outputs("{x, [1]} = {1, [y]}"), vars(&[]));
        assert_eq!(
            outputs(r#"{"foo": x, "bar": {"baz": 1}} = {"foo": 1, "bar": {"baz": y}}"#),
            vars(&["x", "y"])
        );
        assert_eq!(outputs(r#"{"foo": x} = {y: 1}"#), vars(&[]));
        assert_eq!(outputs("y = 1; x = y"), vars(&["x", "y"]));
        assert_eq!(outputs("x = y; y = 1"), vars(&["y"]));
    }

    #[test]
    fn refs() {
        assert_eq!(outputs("data.p[x]"), vars(&["x"]));
        assert_eq!(outputs("p[x]"), vars(&[]));
        assert_eq!(outputs("not data.p[x]"), vars(&[]));
        assert_eq!(outputs("data.p[data.q[x]]"), vars(&["x"]));
        assert_eq!(outputs("[x | data.p[x]]"), vars(&[]));
        assert_eq!(outputs("{1, 2}[1] = x"), vars(&["x"]));
        assert_eq!(outputs("{x, 2}[1] = y"), vars(&[]));
        assert_eq!(outputs("x = 1; {x, 2}[1] = y"), vars(&["x", "y"]));
    }

    #[test]
    fn calls() {
        assert_eq!(outputs("count([1, 2, 3], x)"), vars(&["x"]));
        assert_eq!(outputs("count(x)"), vars(&[]));
        assert_eq!(outputs("f(1, x)"), vars(&[]));
        assert_eq!(
            outputs(r#"z = "abc"; x = concat(z, [""])[y]"#),
            vars(&["__local0__", "x", "y", "z"])
        );

        let caps = Capabilities::default();
        let checker = SafetyChecker::new(&caps).with_function_arity("f", 1);
        let out = |text: &str| checker.output_vars_for_body(&body(text), &VarSet::new());
        assert_eq!(out("f(1, x)"), vars(&["x"]));
        assert_eq!(out("f(x, y)"), vars(&[]));
        assert_eq!(out("f(data.p[x], y)"), vars(&["x", "y"]));
        assert_eq!(out("f(1, {x})"), vars(&[]));
        assert_eq!(out("f(1, {x: 1})"), vars(&[]));
    }

    #[test]
    fn with_values_must_be_safe() {
        assert_eq!(outputs("x = 1 with input as y"), vars(&[]));
        let out = output_vars_for_body(&body("x = 1 with input as y"), &vars(&["y"]));
        assert_eq!(out, vars(&["x"]));
    }

    #[test]
    fn monotonic_in_safe_vars() {
        let b = body("y = x + 1; z = [y, w]");
        let small = output_vars_for_body(&b, &VarSet::new());
        let large = output_vars_for_body(&b, &vars(&["x"]));
        assert!(small.is_subset(&large));
        assert_eq!(large, vars(&["y"]));
    }

    #[test]
    fn reorders_to_fixpoint() {
        let (reordered, unsafe_vars) = reorder_body_for_safety(&body("y = x + 1; x = 1"), &VarSet::new());
        assert!(unsafe_vars.is_empty());
        assert_eq!(reordered.to_string(), "x = 1; y = x + 1");
        assert!(reordered.iter().enumerate().all(|(i, e)| e.index() == i));
        assert_eq!(output_vars_for_body(&reordered, &VarSet::new()), vars(&["x", "y"]));
    }

    #[test]
    fn reports_unsafe_vars() {
        let (_, unsafe_vars) = reorder_body_for_safety(&body("x = 1; y = z + x"), &VarSet::new());
        assert_eq!(unsafe_vars.keys().map(|v| v.as_str()).collect::<Vec<_>>(), vec!["y", "z"]);
        assert_eq!(unsafe_vars[&Var::new("z")], vec![1]);
    }

    #[test]
    fn reorders_closures() {
        let (reordered, unsafe_vars) =
            reorder_body_for_safety(&body("xs = [y | y = x]; x = 1"), &VarSet::new());
        assert!(unsafe_vars.is_empty());
        assert_eq!(reordered.to_string(), "x = 1; xs = [y | y = x]");
    }

    #[test]
    fn module_errors() {
        let m = parse_module(
            "test.rego",
            "package test\nimport data.lib\np[x] { q[y] }\nq[y] { y = lib.a }\nr = z",
            &ParserOptions::default(),
        )
        .unwrap();
        let errs = check_safety(&m).unwrap_err();
        let msgs: Vec<_> = errs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["var x is unsafe", "var z is unsafe"]);
        assert!(errs.iter().all(|e| e.kind == ErrorKind::CompileErr));
        assert_eq!(errs.iter().next().and_then(|e| e.location.as_ref()).map(|l| l.row), Some(3));
    }

    #[test]
    fn function_args_are_safe() {
        let m = parse_module(
            "test.rego",
            "package test\nf(x) = y { y = x + 1 }\np = z { z = f(1) }",
            &ParserOptions::default(),
        )
        .unwrap();
        assert!(check_safety(&m).is_ok());
    }
}
