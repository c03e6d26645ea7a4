// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static type checking of bodies and modules.
//!
//! Checking infers the types of variables from unification and built-in
//! signatures, verifies references against the known document types and
//! records the type of every rule so that later rules can rely on it.
//! Errors are collected; a failing expression does not stop the walk.
//!
//! ```
//! # use rego_ast::*;
//! # use rego_ast::unstable::{Ref, Term};
//! let module = parse_module("p.rego", "package p\nx := count(input.items)", &ParserOptions::default()).unwrap();
//! let root = TypeEnv::with_capabilities(&Capabilities::default());
//! let mut checker = TypeChecker::new();
//! let env = checker.check_module(&root, &module);
//! assert!(checker.errors().is_empty());
//! assert_eq!(env.get(&Term::reference(Ref::from_path("data.p.x"))), Some(Type::Number));
//! ```

use crate::ast::*;
use crate::errors::{Error, ErrorKind, Errors};
use crate::number::Number;
use crate::schema::{SchemaError, SchemaLoader, SchemaLoaderOptions, SchemaSet};
use crate::type_env::{TypeEnv, TypeTree};
use crate::types::{self, DynamicProperty, PropertyKey, Type};
use crate::visitor::{walk, walk_exprs, walk_vars, Node, VisitorControl};

use alloc::collections::BTreeMap;

use log::debug;

/// Result of checking one rule, applied to the module frame afterwards.
enum Outcome {
    Document(Ref, Type),
    Function(String, Vec<Type>),
}

pub struct TypeChecker<'s> {
    errors: Errors,
    // Function arguments start out as `any` and are refined by the body.
    in_func: bool,
    schemas: Option<&'s SchemaSet>,
    schema_options: SchemaLoaderOptions,
}

impl Default for TypeChecker<'static> {
    fn default() -> Self {
        TypeChecker::new()
    }
}

impl TypeChecker<'static> {
    pub fn new() -> TypeChecker<'static> {
        TypeChecker {
            errors: Errors::new(),
            in_func: false,
            schemas: None,
            schema_options: SchemaLoaderOptions::default(),
        }
    }
}

impl<'s> TypeChecker<'s> {
    /// Resolves `schema` references in annotations against `schemas`. The
    /// schema registered at `schema` itself types `input` everywhere.
    pub fn with_schemas<'t>(self, schemas: &'t SchemaSet) -> TypeChecker<'t> {
        TypeChecker {
            errors: self.errors,
            in_func: self.in_func,
            schemas: Some(schemas),
            schema_options: self.schema_options,
        }
    }

    pub fn with_schema_options(mut self, options: SchemaLoaderOptions) -> Self {
        self.schema_options = options;
        self
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn into_errors(self) -> Errors {
        self.errors
    }

    fn err(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Checks `body` in a new frame on top of `env`. The returned frame
    /// holds the types inferred for the body's variables.
    pub fn check_body<'e>(&mut self, env: &'e TypeEnv<'_>, body: &Body) -> TypeEnv<'e> {
        let mut env = env.wrap();

        // Expressions inside comprehensions are visited too and share the
        // frame.
        walk_exprs(body, |expr| {
            let ref_errors = check_refs(&mut env, expr);
            let had_ref_errors = !ref_errors.is_empty();
            for e in ref_errors {
                self.err(e);
            }

            if let Some((err, nil_type)) = self.check_expr(&mut env, expr) {
                // A ref error is the more actionable report when the
                // expression failed on a type that could not be inferred.
                if !had_ref_errors || !nil_type {
                    self.err(err);
                }
            }
            VisitorControl::Continue
        });

        env
    }

    pub fn check_module<'e>(&mut self, env: &'e TypeEnv<'_>, module: &Module) -> TypeEnv<'e> {
        self.check_modules(env, core::slice::from_ref(module))
    }

    /// Checks the rules of `modules` in order. The returned frame holds the
    /// type of every rule document and the signature of every function.
    pub fn check_modules<'e>(&mut self, env: &'e TypeEnv<'_>, modules: &[Module]) -> TypeEnv<'e> {
        let mut module_env = env.wrap();
        let before = self.errors.len();

        if let Some(root) = self.schemas.and_then(|s| s.get(&Ref::from_var(SCHEMA_ROOT_DOCUMENT))) {
            let loaded = self.load_schema(root);
            match loaded {
                Ok(t) => module_env.put(&Ref::from_var(INPUT_ROOT_DOCUMENT), t),
                Err(e) => self.err(e.into()),
            }
        }

        for module in modules {
            for (idx, rule) in module.rules.iter().enumerate() {
                let outcome = {
                    let mut scope = module_env.wrap();
                    bind_module_names(&mut scope, &module_env, module);
                    self.install_schemas(&mut scope, module, idx);
                    self.check_rule(&scope, &module_env, module, rule)
                };
                match outcome {
                    Some(Outcome::Document(path, t)) => module_env.put(&path, t),
                    Some(Outcome::Function(name, sig)) => module_env.put_func(&name, sig),
                    None => (),
                }
            }
        }

        debug!(
            "type checked {} module(s): {} error(s)",
            modules.len(),
            self.errors.len() - before
        );
        module_env
    }

    fn load_schema(&self, schema: &serde_json::Value) -> Result<Type, SchemaError> {
        SchemaLoader::new(&self.schema_options).load(schema)
    }

    /// Types the documents named by the schema annotations that apply to
    /// rule `idx`.
    fn install_schemas(&mut self, scope: &mut TypeEnv<'_>, module: &Module, idx: usize) {
        let annotations: Vec<&Annotations> = module
            .package_annotations()
            .chain(module.rule_annotations(idx))
            .collect();

        for a in annotations {
            for s in &a.schemas {
                let loaded = match (&s.schema, &s.definition) {
                    (Some(r), _) => match self.schemas.and_then(|set| set.get(r)) {
                        Some(doc) => self.load_schema(doc),
                        None => Err(SchemaError::UndefinedSchema(r.to_string())),
                    },
                    (None, Some(def)) => self.load_schema(&def.0),
                    (None, None) => continue,
                };
                match loaded {
                    Ok(t) => scope.insert(&s.path, t),
                    Err(e) => self.err(Error::from(e).with_location(a.location.clone())),
                }
            }
        }
    }

    fn check_rule(&mut self, scope: &TypeEnv<'_>, module_env: &TypeEnv<'_>, module: &Module, rule: &Rule) -> Option<Outcome> {
        if rule.head.doc_kind() == DocKind::Function {
            return self.check_func(scope, module_env, module, rule);
        }

        let path = document_path(rule, &module.package.path);
        let existing = module_env.tree().get(path.terms());
        let mut result: Option<Type> = None;

        for branch in rule.chain() {
            let before = self.errors.len();
            let body_env = self.check_body(scope, &branch.body);
            if self.errors.len() > before {
                continue;
            }

            let head = &branch.head;
            let t = match head.doc_kind() {
                DocKind::PartialSet => {
                    let key = head.key.as_ref().and_then(|k| body_env.get(k));
                    key.map(|k| Type::set_of(types::or(existing.as_ref().and_then(Type::keys), Some(k)).unwrap_or_else(Type::any)))
                }
                DocKind::PartialObject => {
                    let value = head.value.as_ref().and_then(|v| body_env.get(v));
                    value.map(|v| {
                        let value = types::or(existing.as_ref().and_then(Type::values), Some(v)).unwrap_or_else(Type::any);
                        Type::new_object(
                            vec![],
                            Some(DynamicProperty {
                                key: Type::any(),
                                value,
                            }),
                        )
                    })
                }
                _ => match &head.value {
                    Some(v) => body_env.get(v),
                    None => Some(Type::Boolean),
                },
            };
            result = types::or(result, t);
        }

        let t = match rule.head.doc_kind() {
            DocKind::Complete => types::or(Some(result?), existing),
            _ => result,
        }?;
        Some(Outcome::Document(path, t))
    }

    fn check_func(&mut self, scope: &TypeEnv<'_>, module_env: &TypeEnv<'_>, module: &Module, rule: &Rule) -> Option<Outcome> {
        let name = rule.path(&module.package.path).to_string();
        let num_args = rule.head.args.len();

        if let Some(cur) = module_env.get_func(&name) {
            if cur.len() != num_args + 1 {
                self.err(
                    Error::new(
                        ErrorKind::TypeErr,
                        format!(
                            "function definitions for {name} have different number of arguments ({num_args} vs {})",
                            cur.len().saturating_sub(1)
                        ),
                    )
                    .with_location(rule.head.location.clone()),
                );
                return None;
            }
        }

        let mut args_env = scope.wrap();
        for arg in &rule.head.args {
            walk_vars(arg, |v| {
                args_env.put_var(v, Type::any());
                VisitorControl::Continue
            });
        }

        let mut sig: Option<Vec<Type>> = module_env.get_func(&name).map(|s| s.to_vec());
        for branch in rule.chain() {
            let before = self.errors.len();
            self.in_func = true;
            let body_env = self.check_body(&args_env, &branch.body);
            self.in_func = false;
            if self.errors.len() > before {
                return None;
            }

            let mut found: Vec<Type> = rule
                .head
                .args
                .iter()
                .map(|arg| body_env.get(arg).unwrap_or_else(Type::any))
                .collect();
            found.push(
                branch
                    .head
                    .value
                    .as_ref()
                    .and_then(|v| body_env.get(v))
                    .unwrap_or_else(Type::any),
            );

            sig = Some(match sig {
                None => found,
                Some(prev) => prev.into_iter().zip(found).map(|(a, b)| a.or(b)).collect(),
            });
        }
        sig.map(|sig| Outcome::Function(name, sig))
    }

    /// Returns the error and whether it was caused by an unknown type.
    fn check_expr(&mut self, env: &mut TypeEnv<'_>, expr: &Expr) -> Option<(Error, bool)> {
        let name = expr.operator_name()?;
        if (name == EQUALITY || name == ASSIGN) && expr.operands().len() == 2 {
            return self.check_expr_eq(env, expr);
        }
        self.check_expr_builtin(env, expr, &name)
    }

    fn check_expr_builtin(&mut self, env: &mut TypeEnv<'_>, expr: &Expr, name: &str) -> Option<(Error, bool)> {
        let Some(expected) = env.get_func(name).map(|s| s.to_vec()) else {
            let is_user_function = matches!(expr.operator().map(|t| &t.value), Some(Value::Ref(_)));
            if is_user_function {
                // Defined in a module that was not checked.
                return None;
            }
            let err = Error::new(ErrorKind::TypeErr, format!("undefined built-in function {name}"))
                .with_location(expr.location.clone());
            return Some((err, false));
        };

        let args = expr.operands();
        let pre: Vec<Option<Type>> = args.iter().map(|a| env.get(a)).collect();

        // The last signature entry is the result; binding it is optional.
        if args.len() + 1 < expected.len() {
            return Some(arg_error(expr, name, "too few arguments", &pre, &expected));
        }
        if args.len() > expected.len() {
            return Some(arg_error(expr, name, "too many arguments", &pre, &expected));
        }

        for (arg, want) in args.iter().zip(expected.iter()) {
            if !self.unify1(env, arg, want) {
                let post: Vec<Option<Type>> = args.iter().map(|a| env.get(a)).collect();
                return Some(arg_error(expr, name, "invalid argument(s)", &post, &expected));
            }
        }
        None
    }

    fn check_expr_eq(&mut self, env: &mut TypeEnv<'_>, expr: &Expr) -> Option<(Error, bool)> {
        let (a, b) = (expr.operand(0)?, expr.operand(1)?);
        let (type_a, type_b) = (env.get(a), env.get(b));

        if self.unify2(env, a, type_a.as_ref(), b, type_b.as_ref()) {
            return None;
        }

        let nil_type = types::nil(type_a.as_ref()) || types::nil(type_b.as_ref());
        let err = Error::new(ErrorKind::TypeErr, "match error")
            .with_location(expr.location.clone())
            .with_details(vec![
                format!("left  : {}", display_type(type_a.as_ref())),
                format!("right : {}", display_type(type_b.as_ref())),
            ]);
        Some((err, nil_type))
    }

    fn unify2(&mut self, env: &mut TypeEnv<'_>, a: &Term, type_a: Option<&Type>, b: &Term, type_b: Option<&Type>) -> bool {
        let nil_a = types::nil(type_a);
        let nil_b = types::nil(type_b);

        match (type_a, type_b) {
            (_, Some(tb)) if nil_a && !nil_b => return self.unify1(env, a, tb),
            (Some(ta), _) if nil_b && !nil_a => return self.unify1(env, b, ta),
            _ if !nil_a && !nil_b => return unifies(type_a, type_b),
            _ => (),
        }

        match (&a.value, &b.value) {
            (Value::Array(xs), Value::Array(ys)) if xs.len() == ys.len() => xs.iter().zip(ys.iter()).all(|(x, y)| {
                let (tx, ty) = (env.get(x), env.get(y));
                self.unify2(env, x, tx.as_ref(), y, ty.as_ref())
            }),
            (Value::Object(xs), Value::Object(ys)) if xs.len() == ys.len() => {
                let pairs: Option<Vec<(&Term, &Term)>> = xs.iter().map(|(k, x)| ys.get(k).map(|y| (x, y))).collect();
                match pairs {
                    Some(pairs) => pairs.into_iter().all(|(x, y)| {
                        let (tx, ty) = (env.get(x), env.get(y));
                        self.unify2(env, x, tx.as_ref(), y, ty.as_ref())
                    }),
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Unifies `term` with `tpe`, binding the types of variables found in
    /// the term.
    fn unify1(&mut self, env: &mut TypeEnv<'_>, term: &Term, tpe: &Type) -> bool {
        match &term.value {
            Value::Array(_) | Value::Object(_) | Value::Set(_) => match tpe {
                Type::Any { of } if of.is_empty() => {
                    for child in composite_children(&term.value) {
                        self.unify1(env, child, tpe);
                    }
                    true
                }
                Type::Any { of } => {
                    let mut ok = false;
                    for t in of {
                        ok = self.unify1(env, term, t) || ok;
                    }
                    ok
                }
                _ => self.unify1_composite(env, &term.value, tpe),
            },

            Value::Var(v) => {
                if let Some(exist) = env.get(term) {
                    if !(exist.is_any() && self.in_func) {
                        return unifies(Some(&exist), Some(tpe));
                    }
                }
                env.put_var(v, tpe.clone());
                true
            }

            _ => unifies(env.get(term).as_ref(), Some(tpe)),
        }
    }

    fn unify1_composite(&mut self, env: &mut TypeEnv<'_>, value: &Value, tpe: &Type) -> bool {
        match (value, tpe) {
            (
                Value::Array(items),
                Type::Array {
                    static_items,
                    dynamic,
                },
            ) => {
                if items.len() != static_items.len() && dynamic.is_none() {
                    return false;
                }
                items.iter().enumerate().all(|(i, item)| match select_index(tpe, i) {
                    Some(t) => self.unify1(env, item, &t),
                    None => false,
                })
            }
            (
                Value::Object(obj),
                Type::Object {
                    static_props,
                    dynamic,
                },
            ) => {
                if obj.len() != static_props.len() && dynamic.is_none() {
                    return false;
                }
                obj.iter().all(|(k, v)| {
                    let child = PropertyKey::from_value(&k.value).and_then(|key| tpe.select(&key));
                    match child {
                        Some(t) => self.unify1(env, v, &t),
                        None => false,
                    }
                })
            }
            (Value::Set(set), Type::Set { of }) => set.iter().all(|elem| self.unify1(env, elem, of)),
            _ => false,
        }
    }
}

fn composite_children(value: &Value) -> Vec<&Term> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => obj.values().collect(),
        Value::Set(set) => set.iter().collect(),
        _ => vec![],
    }
}

fn select_index(tpe: &Type, i: usize) -> Option<Type> {
    tpe.select(&PropertyKey::Number(Number::from(i)))
}

/// Path of the document a non-function rule defines.
fn document_path(rule: &Rule, package: &Ref) -> Ref {
    let tail_is_constant = rule.head.reference.terms()[1..]
        .iter()
        .all(|t| matches!(t.value, Value::String(_)));
    if tail_is_constant && rule.head.reference.len() > 1 {
        rule.ref_path(package)
    } else {
        rule.path(package)
    }
}

/// Makes the rules and imports of `module` visible by their short names.
fn bind_module_names(scope: &mut TypeEnv<'_>, module_env: &TypeEnv<'_>, module: &Module) {
    let package = &module.package.path;
    for rule in &module.rules {
        let Some(name) = rule.head.name() else {
            continue;
        };
        if rule.head.doc_kind() == DocKind::Function {
            let full = rule.path(package).to_string();
            let sig = module_env
                .get_func(&full)
                .map(|s| s.to_vec())
                .unwrap_or_else(|| vec![Type::any(); rule.head.args.len() + 1]);
            if module_env.get_func(&full).is_none() {
                scope.put_func(&full, sig.clone());
            }
            scope.put_func(name.as_str(), sig);
        } else {
            let t = module_env
                .tree()
                .get(rule.path(package).terms())
                .unwrap_or_else(Type::any);
            scope.put_var(name, t);
        }
    }

    for import in &module.imports {
        let Some(alias) = import.name() else {
            continue;
        };
        if alias.as_str() == INPUT_ROOT_DOCUMENT || alias.as_str() == DEFAULT_ROOT_DOCUMENT {
            continue;
        }
        let t = module_env.get(&import.path).unwrap_or_else(Type::any);
        scope.put_var(&alias, t);
    }
}

fn display_type(t: Option<&Type>) -> String {
    match t {
        Some(t) => t.to_string(),
        None => "???".to_string(),
    }
}

fn format_args(args: &[Option<Type>]) -> String {
    let parts: Vec<String> = args.iter().map(|t| display_type(t.as_ref())).collect();
    format!("({})", parts.join(", "))
}

fn arg_error(expr: &Expr, name: &str, msg: &str, have: &[Option<Type>], want: &[Type]) -> (Error, bool) {
    let want: Vec<Option<Type>> = want.iter().cloned().map(Some).collect();
    let nil_type = have.iter().any(|t| types::nil(t.as_ref()));
    let err = Error::new(ErrorKind::TypeErr, format!("{name}: {msg}"))
        .with_location(expr.location.clone())
        .with_details(vec![
            format!("have: {}", format_args(have)),
            format!("want: {}", format_args(&want)),
        ]);
    (err, nil_type)
}

/// True if a value of type `a` may also be of type `b`.
pub(crate) fn unifies(a: Option<&Type>, b: Option<&Type>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };

    match (a, b) {
        (Type::Any { of }, other) | (other, Type::Any { of }) => {
            of.is_empty() || of.iter().any(|t| unifies(Some(t), Some(other)))
        }
        (Type::Null, Type::Null)
        | (Type::Boolean, Type::Boolean)
        | (Type::Number, Type::Number)
        | (Type::String, Type::String) => true,
        (Type::Array { dynamic: da, .. }, Type::Array { dynamic: db, .. }) => {
            unifies_static(a, b)
                && unifies_static(b, a)
                && match (da.as_deref(), db.as_deref()) {
                    (Some(x), Some(y)) => unifies(Some(x), Some(y)),
                    _ => true,
                }
        }
        (Type::Object { dynamic: da, .. }, Type::Object { dynamic: db, .. }) => {
            unifies_static(a, b)
                && unifies_static(b, a)
                && match (da, db) {
                    (Some(x), Some(y)) => {
                        unifies(Some(&x.key), Some(&y.key)) && unifies(Some(&x.value), Some(&y.value))
                    }
                    _ => true,
                }
        }
        (Type::Set { of: x }, Type::Set { of: y }) => unifies(Some(x), Some(y)),
        _ => false,
    }
}

// Every static position or key of `a` must unify with the same element of `b`.
fn unifies_static(a: &Type, b: &Type) -> bool {
    match a {
        Type::Array { static_items, .. } => {
            (0..static_items.len()).all(|i| unifies(select_index(a, i).as_ref(), select_index(b, i).as_ref()))
        }
        Type::Object { static_props, .. } => static_props
            .iter()
            .all(|p| unifies(Some(&p.value), b.select(&p.key).as_ref())),
        _ => true,
    }
}

/// Finds the references of `expr` outside closures and checks them against
/// `env`. Element variables receive the key type they range over.
fn check_refs(env: &mut TypeEnv<'_>, expr: &Expr) -> Vec<Error> {
    let refs = refs_outside_closures(expr);
    let mut checker = RefChecker {
        env: &*env,
        bindings: BTreeMap::new(),
        errors: vec![],
    };
    for r in refs {
        if let Err(e) = checker.check(r) {
            checker.errors.push(e);
        }
    }
    let RefChecker { bindings, errors, .. } = checker;
    for (v, t) in bindings {
        env.put_var(&v, t);
    }
    errors
}

fn refs_outside_closures<'a>(expr: &'a Expr) -> Vec<&'a Ref> {
    let op = expr.operator();
    let mut refs = vec![];
    walk(
        &mut |n: Node<'a>| match n {
            Node::Term(t) if op.is_some_and(|op| core::ptr::eq(op, t)) => VisitorControl::SkipSubtree,
            Node::Term(t) if t.value.is_comprehension() => VisitorControl::SkipSubtree,
            Node::Term(Term {
                value: Value::Ref(r), ..
            }) => {
                refs.push(r);
                VisitorControl::Continue
            }
            _ => VisitorControl::Continue,
        },
        expr,
    );
    refs
}

struct RefChecker<'e, 'a> {
    env: &'e TypeEnv<'a>,
    bindings: BTreeMap<Var, Type>,
    errors: Vec<Error>,
}

impl RefChecker<'_, '_> {
    fn lookup(&self, value: &Value) -> Option<Type> {
        if let Value::Var(v) = value {
            if let Some(t) = self.bindings.get(v) {
                return Some(t.clone());
            }
        }
        self.env.get_value(value)
    }

    fn check(&mut self, r: &Ref) -> Result<(), Error> {
        let env = self.env;
        self.check_ref(env, env.tree(), r, 0)
    }

    fn check_ref(&mut self, frame: &TypeEnv<'_>, node: &TypeTree, r: &Ref, idx: usize) -> Result<(), Error> {
        let Some(elem) = r.terms().get(idx) else {
            return Ok(());
        };

        // Package paths put strings or variables right below the root.
        if (idx == 1 || idx == 2) && !matches!(elem.value, Value::Var(_) | Value::String(_)) {
            let have = self.lookup(&elem.value);
            return Err(ref_err_invalid(r, idx, have.as_ref(), &Type::String, one_of_children(node)));
        }

        if let (Value::Var(v), true) = (&elem.value, idx != 0) {
            let want = node.extent().and_then(|t| t.keys()).unwrap_or_else(Type::any);
            match self.lookup(&elem.value) {
                Some(exist) if !unifies(Some(&want), Some(&exist)) => {
                    return Err(ref_err_invalid(r, idx, Some(&exist), &want, one_of_children(node)));
                }
                Some(_) => (),
                None => {
                    self.bindings.insert(v.clone(), want);
                }
            }
        }

        match node.child(&elem.value) {
            Some(child) if child.is_leaf() => self.check_leaf(child.value().cloned(), r, idx + 1),
            Some(child) => self.check_ref(frame, child, r, idx + 1),
            None => {
                if let Some(next) = frame.next() {
                    return self.check_ref(next, next.tree(), r, 0);
                }
                let rooted = matches!(
                    r.head_var().map(|v| v.as_str()),
                    Some(DEFAULT_ROOT_DOCUMENT | INPUT_ROOT_DOCUMENT)
                );
                match (rooted, idx) {
                    (true, 0) => self.check_leaf(Some(Type::any()), r, 1),
                    (true, _) => {
                        // Nothing is known past this point; the children are
                        // checked without reporting.
                        for (_, child) in node.children() {
                            let _ = self.check_ref(frame, child, r, idx + 1);
                        }
                        Ok(())
                    }
                    (false, _) => self.check_leaf(Some(Type::any()), r, 0),
                }
            }
        }
    }

    fn check_leaf(&mut self, tpe: Option<Type>, r: &Ref, idx: usize) -> Result<(), Error> {
        let Some(elem) = r.terms().get(idx) else {
            return Ok(());
        };
        let Some(tpe) = tpe else {
            return Ok(());
        };
        let Some(keys) = tpe.keys() else {
            return Err(ref_err_unsupported(r, idx - 1, &tpe));
        };

        match &elem.value {
            Value::Var(v) => match self.lookup(&elem.value) {
                Some(exist) if !unifies(Some(&exist), Some(&keys)) => {
                    return Err(ref_err_invalid(r, idx, Some(&exist), &keys, one_of_keys(&tpe)));
                }
                Some(_) => (),
                None => {
                    self.bindings.insert(v.clone(), keys);
                }
            },
            Value::Ref(_) | Value::Array(_) | Value::Object(_) | Value::Set(_) => {
                if let Some(exist) = self.lookup(&elem.value) {
                    if !unifies(Some(&exist), Some(&keys)) {
                        return Err(ref_err_invalid(r, idx, Some(&exist), &keys, one_of_keys(&tpe)));
                    }
                }
            }
            v => {
                let child = PropertyKey::from_value(v).and_then(|k| tpe.select(&k));
                return match child {
                    Some(child) => self.check_leaf(Some(child), r, idx + 1),
                    None => Err(ref_err_invalid(r, idx, None, &keys, one_of_keys(&tpe))),
                };
            }
        }

        self.check_leaf(tpe.values(), r, idx + 1)
    }
}

fn one_of_children(node: &TypeTree) -> Vec<String> {
    node.children().map(|(k, _)| k.to_string()).collect()
}

fn one_of_keys(tpe: &Type) -> Vec<String> {
    match tpe {
        Type::Object { static_props, .. } => static_props.iter().map(|p| p.key.to_value().to_string()).collect(),
        _ => vec![],
    }
}

fn prefix_len(r: &Ref, len: usize) -> usize {
    Ref::new(r.terms()[..len.min(r.len())].to_vec()).to_string().len()
}

fn ref_error(r: &Ref, details: Vec<String>) -> Error {
    Error::new(ErrorKind::TypeErr, format!("undefined ref: {r}"))
        .with_location(r.head().and_then(|t| t.location.clone()))
        .with_details(details)
}

fn ref_err_invalid(r: &Ref, pos: usize, have: Option<&Type>, want: &Type, one_of: Vec<String>) -> Error {
    let pad = " ".repeat(prefix_len(r, pos) + 1);
    let mut details = vec![r.to_string(), format!("{pad}^")];
    match (have, r.terms().get(pos)) {
        (Some(t), _) => details.push(format!("{pad}have (type): {t}")),
        (None, Some(elem)) => details.push(format!("{pad}have: {elem}")),
        (None, None) => (),
    }
    if one_of.is_empty() {
        details.push(format!("{pad}want (type): {want}"));
    } else {
        details.push(format!("{pad}want (one of): [{}]", one_of.join(", ")));
    }
    ref_error(r, details)
}

fn ref_err_unsupported(r: &Ref, pos: usize, have: &Type) -> Error {
    ref_error(
        r,
        vec![
            r.to_string(),
            "^".repeat(prefix_len(r, pos + 1)),
            format!("have: {have}"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::parser::{parse_body, parse_module, ParserOptions};

    fn body(text: &str) -> Body {
        parse_body(text, &ParserOptions::default()).unwrap()
    }

    fn module(text: &str) -> Module {
        parse_module("test.rego", text, &ParserOptions::default()).unwrap()
    }

    fn root() -> TypeEnv<'static> {
        TypeEnv::with_capabilities(&Capabilities::default())
    }

    fn get(env: &TypeEnv<'_>, path: &str) -> Option<Type> {
        let r = crate::parser::parse_ref(path, &ParserOptions::default()).unwrap();
        env.get(&Term::reference(r))
    }

    fn messages(errors: &Errors) -> Vec<String> {
        errors.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn infers_var_types() {
        let root = root();
        let mut checker = TypeChecker::new();
        let env = checker.check_body(&root, &body(r#"x = 1; y = "a"; z = [x, y]; n := count(z)"#));
        assert!(checker.errors().is_empty(), "{}", checker.errors());
        assert_eq!(env.get(&Term::var("x")), Some(Type::Number));
        assert_eq!(env.get(&Term::var("y")), Some(Type::String));
        assert_eq!(
            env.get(&Term::var("z")),
            Some(Type::new_array(vec![Type::Number, Type::String], None))
        );
        assert_eq!(env.get(&Term::var("n")), Some(Type::Number));
    }

    #[test]
    fn match_errors() {
        let root = root();
        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"x = 1; x = "a""#));
        let errors = checker.errors();
        assert_eq!(messages(errors), vec!["match error"]);
        let e = errors.iter().next().unwrap();
        assert_eq!(e.details, vec!["left  : number", "right : string"]);
        assert_eq!(e.kind, ErrorKind::TypeErr);

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"[x, 1] = ["a", y]; y = true"#));
        assert_eq!(messages(checker.errors()), vec!["match error"]);
    }

    #[test]
    fn builtin_arguments() {
        let root = root();
        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"x = 1; startswith(x, "a")"#));
        let errors = checker.errors();
        assert_eq!(messages(errors), vec!["startswith: invalid argument(s)"]);
        assert_eq!(
            errors.iter().next().unwrap().details,
            vec!["have: (number, string)", "want: (string, string, boolean)"]
        );

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"startswith("a")"#));
        assert_eq!(messages(checker.errors()), vec!["startswith: too few arguments"]);

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"count("a", x, y)"#));
        assert_eq!(messages(checker.errors()), vec!["count: too many arguments"]);

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"no_such_fn(1)"#));
        assert_eq!(messages(checker.errors()), vec!["undefined built-in function no_such_fn"]);
    }

    #[test]
    fn refs_against_typed_documents() {
        let mut root = root();
        let user = Type::new_object(
            vec![crate::types::StaticProperty {
                key: "name".into(),
                value: Type::String,
            }],
            None,
        );
        root.put(&Ref::from_path("input.user"), user);

        let mut checker = TypeChecker::new();
        let env = checker.check_body(&root, &body("x = input.user.name; y = input.other[0]"));
        assert!(checker.errors().is_empty(), "{}", checker.errors());
        assert_eq!(env.get(&Term::var("x")), Some(Type::String));

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body("x = input.user.age"));
        let errors = checker.errors();
        assert_eq!(messages(errors), vec!["undefined ref: input.user.age"]);
        let details = &errors.iter().next().unwrap().details;
        assert_eq!(details[0], "input.user.age");
        assert_eq!(details[3].trim(), "want (one of): [\"name\"]");

        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body("x = input.user.name.first"));
        assert_eq!(messages(checker.errors()), vec!["undefined ref: input.user.name.first"]);

        // Nothing is known about `y`, so nothing is reported.
        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body("x = y.z"));
        assert!(checker.errors().is_empty(), "{}", checker.errors());
    }

    #[test]
    fn iteration_vars_get_key_types() {
        let root = root();
        let mut checker = TypeChecker::new();
        let env = checker.check_body(&root, &body(r#"xs = [1, 2]; v = xs[i]"#));
        assert!(checker.errors().is_empty(), "{}", checker.errors());
        assert_eq!(env.get(&Term::var("i")), Some(Type::Number));
        assert_eq!(env.get(&Term::var("v")), Some(Type::Number));
    }

    #[test]
    fn rule_types() {
        let m = module(
            r#"package test
p := 1
q[x] { x := "a" }
r[k] = v { k := "a"; v := true }
s { p > 0 }
f(x) = y { y := x + 1 }
t := f(2)
"#,
        );
        let root = root();
        let mut checker = TypeChecker::new();
        let env = checker.check_module(&root, &m);
        assert!(checker.errors().is_empty(), "{}", checker.errors());

        assert_eq!(get(&env, "data.test.p"), Some(Type::Number));
        assert_eq!(get(&env, "data.test.q"), Some(Type::set_of(Type::String)));
        assert_eq!(
            get(&env, "data.test.r").map(|t| t.to_string()).as_deref(),
            Some("object[any: boolean]")
        );
        assert_eq!(get(&env, "data.test.s"), Some(Type::Boolean));
        assert_eq!(
            env.get_func("data.test.f"),
            Some(&[Type::Number, Type::Number][..])
        );
        assert_eq!(get(&env, "data.test.t"), Some(Type::Number));
    }

    #[test]
    fn function_arity_mismatch() {
        let m = module(
            r#"package test
f(x) = 1 { true }
f(x, y) = 2 { true }
"#,
        );
        let root = root();
        let mut checker = TypeChecker::new();
        checker.check_module(&root, &m);
        assert_eq!(
            messages(checker.errors()),
            vec!["function definitions for data.test.f have different number of arguments (2 vs 1)"]
        );
    }

    #[test]
    fn errors_do_not_stop_checking() {
        let root = root();
        let mut checker = TypeChecker::new();
        checker.check_body(&root, &body(r#"x = 1; x = "a"; y = true; lower(y)"#));
        assert_eq!(messages(checker.errors()), vec!["match error", "lower: invalid argument(s)"]);
    }

    #[test]
    fn annotation_schemas() {
        let m = module(
            r#"package test

# METADATA
# schemas:
#   - input: schema.request
allow {
    input.user == "admin"
}

# METADATA
# schemas:
#   - input: schema.request
deny {
    input.usr == "admin"
}
"#,
        );
        let mut schemas = SchemaSet::new();
        schemas.put(
            Ref::from_path("schema.request"),
            serde_json::json!({
                "type": "object",
                "properties": {"user": {"type": "string"}},
                "additionalProperties": false
            }),
        );

        let root = root();
        let mut checker = TypeChecker::new().with_schemas(&schemas);
        checker.check_module(&root, &m);
        assert_eq!(messages(checker.errors()), vec!["undefined ref: input.usr"]);
    }

    #[test]
    fn missing_schema_is_reported() {
        let m = module(
            r#"package test

# METADATA
# schemas:
#   - input: schema.missing
allow { input.x }
"#,
        );
        let root = root();
        let mut checker = TypeChecker::new();
        checker.check_module(&root, &m);
        assert_eq!(messages(checker.errors()), vec!["undefined schema: schema.missing"]);
    }

    #[test]
    fn root_schema_types_input() {
        let m = module("package test\nallow { input.a.b }");
        let mut schemas = SchemaSet::new();
        schemas.put_root(serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"a": {"type": "string"}}
        }));
        let root = root();
        let mut checker = TypeChecker::new().with_schemas(&schemas);
        checker.check_module(&root, &m);
        assert_eq!(messages(checker.errors()), vec!["undefined ref: input.a.b"]);
    }
}
