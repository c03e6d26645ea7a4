// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::policy::Body;
use crate::number::Number;
use crate::visitor::{VarVisitor, VarVisitorParams};
use crate::*;

use alloc::collections::BTreeSet;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use anyhow::{bail, Result};

/// Name of the default root document.
pub const DEFAULT_ROOT_DOCUMENT: &str = "data";

/// Name of the input document.
pub const INPUT_ROOT_DOCUMENT: &str = "input";

/// Root of schema references inside annotations.
pub const SCHEMA_ROOT_DOCUMENT: &str = "schema";

/// The anonymous variable as written in source.
pub const WILDCARD: &str = "_";

/// Prefix of generated wildcard names. Such names cannot be written by hand.
pub const WILDCARD_PREFIX: &str = "$";

const KEYWORDS: [&str; 17] = [
    "as", "contains", "default", "else", "every", "false", "if", "import", "in", "not", "null",
    "package", "some", "true", "with", "set", "__ignored__",
];

/// Position of a node inside its source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: Rc<str>,
    pub row: u32,
    pub col: u32,
    /// Source text spanned by the node.
    pub text: Rc<str>,
}

impl Location {
    pub fn new(file: &str, row: u32, col: u32, text: &str) -> Location {
        Location {
            file: file.into(),
            row,
            col,
            text: text.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}:{}", self.row, self.col)
        } else {
            write!(f, "{}:{}:{}", self.file, self.row, self.col)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(String);

pub type VarSet = BTreeSet<Var>;

impl Var {
    pub fn new(name: impl Into<String>) -> Var {
        Var(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `_` and for names produced by wildcard mangling.
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD || self.0.starts_with(WILDCARD_PREFIX)
    }

    /// True for names introduced by the compiler rather than the author.
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(WILDCARD_PREFIX) || (self.0.starts_with("__local") && self.0.ends_with("__"))
    }
}

impl From<&str> for Var {
    fn from(name: &str) -> Var {
        Var(name.to_string())
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.starts_with(WILDCARD_PREFIX) {
            f.write_str(WILDCARD)
        } else {
            f.write_str(&self.0)
        }
    }
}

pub(crate) fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// True if `s` can be written as `.s` inside a reference.
pub(crate) fn is_ref_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !is_keyword(s)
}

fn hash_one<T: Hash + ?Sized>(x: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.hash(&mut hasher);
    hasher.finish()
}

// Position sensitive combination used for arrays and references.
fn hash_sequence<'a>(seed: u64, items: impl Iterator<Item = &'a Term>) -> u64 {
    items.fold(seed, |h, t| h.wrapping_mul(31).wrapping_add(t.value.hash_code()))
}

/// A (non-empty) reference. The first term is the head; it is normally a
/// variable, and may also be a call or a literal composite.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(Vec<Term>);

impl Ref {
    pub fn new(terms: Vec<Term>) -> Ref {
        Ref(terms)
    }

    pub fn from_var(name: &str) -> Ref {
        Ref(vec![Term::var(name)])
    }

    /// Builds `data.a.b` style references from a dotted path.
    pub fn from_path(path: &str) -> Ref {
        let mut parts = path.split('.');
        let mut terms = vec![];
        if let Some(head) = parts.next() {
            terms.push(Term::var(head));
        }
        terms.extend(parts.map(Term::string));
        Ref(terms)
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    pub fn terms_mut(&mut self) -> &mut Vec<Term> {
        &mut self.0
    }

    pub fn into_terms(self) -> Vec<Term> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Term> {
        self.0.iter()
    }

    pub fn head(&self) -> Option<&Term> {
        self.0.first()
    }

    pub fn head_var(&self) -> Option<&Var> {
        match self.head().map(|t| &t.value) {
            Some(Value::Var(v)) => Some(v),
            _ => None,
        }
    }

    pub fn push(&mut self, term: Term) {
        self.0.push(term);
    }

    /// Returns a copy of the reference with `term` added at the end.
    pub fn append(&self, term: Term) -> Ref {
        let mut terms = self.0.clone();
        terms.push(term);
        Ref(terms)
    }

    /// Returns a copy of the reference with `other` added at the end. The
    /// head of `other` is converted into a string so that `a.b` extended with
    /// `c.d` reads `a.b.c.d`.
    pub fn extend(&self, other: &Ref) -> Ref {
        let mut terms = self.0.clone();
        for (i, t) in other.iter().enumerate() {
            match (&t.value, i) {
                (Value::Var(v), 0) => terms.push(Term {
                    value: Value::String(v.as_str().to_string()),
                    location: t.location.clone(),
                }),
                _ => terms.push(t.clone()),
            }
        }
        Ref(terms)
    }

    /// Returns a copy of the reference with `terms` added at the end.
    pub fn concat(&self, terms: &[Term]) -> Ref {
        let mut all = self.0.clone();
        all.extend_from_slice(terms);
        Ref(all)
    }

    pub fn has_prefix(&self, prefix: &Ref) -> bool {
        prefix.len() <= self.len() && self.0[..prefix.len()] == prefix.0[..]
    }

    /// Longest prefix whose terms are all ground.
    pub fn ground_prefix(&self) -> Ref {
        let mut terms = vec![];
        for (i, t) in self.iter().enumerate() {
            if i > 0 && !t.is_ground() {
                break;
            }
            terms.push(t.clone());
        }
        Ref(terms)
    }

    /// Longest prefix whose terms are all constants.
    pub fn constant_prefix(&self) -> Ref {
        match self.dynamic() {
            Some(i) => Ref(self.0[..i].to_vec()),
            None => self.clone(),
        }
    }

    /// Offset of the first term after the head that is not constant.
    pub fn dynamic(&self) -> Option<usize> {
        self.iter()
            .enumerate()
            .skip(1)
            .find(|(_, t)| !t.value.is_constant())
            .map(|(i, _)| i)
    }

    /// Ground check that ignores the head.
    pub fn is_ground(&self) -> bool {
        self.iter().skip(1).all(|t| t.is_ground())
    }

    /// True if a term after the head is itself a reference.
    pub fn is_nested(&self) -> bool {
        self.iter().skip(1).any(|t| matches!(t.value, Value::Ref(_)))
    }

    /// Variables that evaluating the reference would bind.
    pub fn output_vars(&self) -> VarSet {
        let mut visitor = VarVisitor::with_params(VarVisitorParams {
            skip_ref_head: true,
            ..Default::default()
        });
        visitor.walk_ref(self);
        visitor.into_vars()
    }

    /// Plain path of a ground reference made of scalars.
    pub fn underlying(&self) -> Result<Vec<serde_json::Value>> {
        let mut path = vec![];
        for (i, t) in self.iter().enumerate() {
            match &t.value {
                Value::Var(v) if i == 0 => path.push(serde_json::Value::String(v.as_str().to_string())),
                Value::Null => path.push(serde_json::Value::Null),
                Value::Boolean(b) => path.push(serde_json::Value::Bool(*b)),
                Value::String(s) => path.push(serde_json::Value::String(s.clone())),
                Value::Number(n) => path.push(serde_json::to_value(n)?),
                _ => bail!("cannot get underlying value of non-scalar reference term `{t}` in `{self}`"),
            }
        }
        Ok(path)
    }
}

impl From<Vec<Term>> for Ref {
    fn from(terms: Vec<Term>) -> Ref {
        Ref(terms)
    }
}

/// Key/value collection keeping insertion order. Keys are unique.
#[derive(Clone, Debug, Default)]
pub struct Object {
    items: Vec<(Term, Term)>,
}

impl Object {
    pub fn new() -> Object {
        Object::default()
    }

    /// Inserts a pair, replacing the value of an existing equal key.
    pub fn insert(&mut self, key: Term, value: Term) -> Option<Term> {
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => Some(core::mem::replace(v, value)),
            None => {
                self.items.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &Term) -> Option<&Term> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &Term) -> Option<Term> {
        let pos = self.items.iter().position(|(k, _)| k == key)?;
        Some(self.items.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Term, &Term)> {
        self.items.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut Term, &mut Term)> {
        self.items.iter_mut().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Term> {
        self.items.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Term> {
        self.items.iter().map(|(_, v)| v)
    }

    pub fn into_items(self) -> Vec<(Term, Term)> {
        self.items
    }

    fn sorted(&self) -> Vec<&(Term, Term)> {
        let mut items: Vec<_> = self.items.iter().collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    fn hash_code(&self) -> u64 {
        self.items.iter().fold(hash_one(&7u8), |h, (k, v)| {
            h.wrapping_add(k.value.hash_code().wrapping_mul(31).wrapping_add(v.value.hash_code()))
        })
    }
}

impl FromIterator<(Term, Term)> for Object {
    fn from_iter<I: IntoIterator<Item = (Term, Term)>>(iter: I) -> Object {
        let mut obj = Object::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

impl Ord for Object {
    fn cmp(&self, other: &Object) -> Ordering {
        let (a, b) = (self.sorted(), other.sorted());
        for ((ak, av), (bk, bv)) in a.iter().map(|p| (&p.0, &p.1)).zip(b.iter().map(|p| (&p.0, &p.1))) {
            match ak.cmp(bk).then_with(|| av.cmp(bv)) {
                Ordering::Equal => (),
                o => return o,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl PartialOrd for Object {
    fn partial_cmp(&self, other: &Object) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.len() == other.len() && self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code())
    }
}

/// Collection of unique terms keeping insertion order.
#[derive(Clone, Debug, Default)]
pub struct Set {
    items: Vec<Term>,
}

impl Set {
    pub fn new() -> Set {
        Set::default()
    }

    /// Adds `term` unless an equal term is already present.
    pub fn insert(&mut self, term: Term) -> bool {
        if self.contains(&term) {
            return false;
        }
        self.items.push(term);
        true
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.items.iter().any(|t| t == term)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Term> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Term> {
        self.items.iter_mut()
    }

    pub fn into_items(self) -> Vec<Term> {
        self.items
    }

    /// Elements in ascending order.
    pub fn sorted(&self) -> Vec<&Term> {
        let mut items: Vec<_> = self.items.iter().collect();
        items.sort();
        items
    }

    fn hash_code(&self) -> u64 {
        self.items
            .iter()
            .fold(hash_one(&8u8), |h, t| h.wrapping_add(t.value.hash_code()))
    }
}

impl FromIterator<Term> for Set {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Set {
        let mut set = Set::new();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

impl Ord for Set {
    fn cmp(&self, other: &Set) -> Ordering {
        self.sorted().cmp(&other.sorted())
    }
}

impl PartialOrd for Set {
    fn partial_cmp(&self, other: &Set) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Set) -> bool {
        self.len() == other.len() && self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Set {}

impl Hash for Set {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrayComprehension {
    pub term: Term,
    pub body: Body,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetComprehension {
    pub term: Term,
    pub body: Body,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectComprehension {
    pub key: Term,
    pub value: Term,
    pub body: Body,
}

/// Values that can appear in terms.
///
/// Clone produces a deep copy; nested terms are owned.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Var(Var),
    Ref(Ref),
    Array(Vec<Term>),
    Object(Object),
    Set(Set),
    ArrayComprehension(Box<ArrayComprehension>),
    ObjectComprehension(Box<ObjectComprehension>),
    SetComprehension(Box<SetComprehension>),
}

impl Value {
    // Position of the kind in the total order across kinds.
    fn sort_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Var(_) => 4,
            Value::Ref(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
            Value::Set(_) => 8,
            Value::ArrayComprehension(_) => 9,
            Value::ObjectComprehension(_) => 10,
            Value::SetComprehension(_) => 11,
        }
    }

    /// Name of the kind as used in the JSON encoding.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Var(_) => "var",
            Value::Ref(_) => "ref",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::ArrayComprehension(_) => "arraycomprehension",
            Value::ObjectComprehension(_) => "objectcomprehension",
            Value::SetComprehension(_) => "setcomprehension",
        }
    }

    /// Total order: first by kind, then by content.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Var(a), Value::Var(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::ArrayComprehension(a), Value::ArrayComprehension(b)) => a.cmp(b),
            (Value::ObjectComprehension(a), Value::ObjectComprehension(b)) => a.cmp(b),
            (Value::SetComprehension(a), Value::SetComprehension(b)) => a.cmp(b),
            _ => self.sort_order().cmp(&other.sort_order()),
        }
    }

    /// Hash consistent with [`Value::compare`]: equal values hash equally.
    pub fn hash_code(&self) -> u64 {
        match self {
            Value::Null => hash_one(&0u8),
            Value::Boolean(b) => hash_one(&(1u8, b)),
            Value::Number(n) => hash_one(&(2u8, n)),
            Value::String(s) => hash_one(&(3u8, s)),
            Value::Var(v) => hash_one(&(4u8, v)),
            Value::Ref(r) => hash_sequence(hash_one(&5u8), r.iter()),
            Value::Array(a) => hash_sequence(hash_one(&6u8), a.iter()),
            Value::Object(o) => o.hash_code(),
            Value::Set(s) => s.hash_code(),
            Value::ArrayComprehension(c) => hash_one(&(9u8, c)),
            Value::ObjectComprehension(c) => hash_one(&(10u8, c)),
            Value::SetComprehension(c) => hash_one(&(11u8, c)),
        }
    }

    /// True if the value contains no variables. References ignore their
    /// head; comprehensions ignore their bodies.
    pub fn is_ground(&self) -> bool {
        match self {
            Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_) => true,
            Value::Var(_) => false,
            Value::Ref(r) => r.is_ground(),
            Value::Array(a) => a.iter().all(Term::is_ground),
            Value::Object(o) => o.iter().all(|(k, v)| k.is_ground() && v.is_ground()),
            Value::Set(s) => s.iter().all(Term::is_ground),
            Value::ArrayComprehension(c) => c.term.is_ground(),
            Value::ObjectComprehension(c) => c.key.is_ground() && c.value.is_ground(),
            Value::SetComprehension(c) => c.term.is_ground(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_)
        )
    }

    /// True for scalars and for collections made only of constants.
    pub fn is_constant(&self) -> bool {
        match self {
            Value::Array(a) => a.iter().all(|t| t.value.is_constant()),
            Value::Object(o) => o.iter().all(|(k, v)| k.value.is_constant() && v.value.is_constant()),
            Value::Set(s) => s.iter().all(|t| t.value.is_constant()),
            v => v.is_scalar(),
        }
    }

    pub fn is_comprehension(&self) -> bool {
        matches!(
            self,
            Value::ArrayComprehension(_) | Value::ObjectComprehension(_) | Value::SetComprehension(_)
        )
    }

    /// All variables occurring in the value.
    pub fn vars(&self) -> VarSet {
        let mut visitor = VarVisitor::new();
        visitor.walk_value(self);
        visitor.into_vars()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        self.compare(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Value {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<Var> for Value {
    fn from(v: Var) -> Value {
        Value::Var(v)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Value {
        Value::Ref(r)
    }
}

/// A value together with the place it was written.
#[derive(Clone, Debug)]
pub struct Term {
    pub value: Value,
    pub location: Option<Location>,
}

impl Term {
    pub fn new(value: Value) -> Term {
        Term {
            value,
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<Location>) -> Term {
        self.location = location;
        self
    }

    pub fn null() -> Term {
        Term::new(Value::Null)
    }

    pub fn boolean(b: bool) -> Term {
        Term::new(Value::Boolean(b))
    }

    pub fn number(n: impl Into<Number>) -> Term {
        Term::new(Value::Number(n.into()))
    }

    pub fn string(s: &str) -> Term {
        Term::new(Value::String(s.to_string()))
    }

    pub fn var(name: &str) -> Term {
        Term::new(Value::Var(Var::from(name)))
    }

    pub fn reference(r: Ref) -> Term {
        Term::new(Value::Ref(r))
    }

    pub fn array(items: Vec<Term>) -> Term {
        Term::new(Value::Array(items))
    }

    pub fn object(items: Vec<(Term, Term)>) -> Term {
        Term::new(Value::Object(items.into_iter().collect()))
    }

    pub fn set(items: Vec<Term>) -> Term {
        Term::new(Value::Set(items.into_iter().collect()))
    }

    pub fn is_ground(&self) -> bool {
        self.value.is_ground()
    }

    pub fn vars(&self) -> VarSet {
        self.value.vars()
    }

    pub fn as_var(&self) -> Option<&Var> {
        match &self.value {
            Value::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&Ref> {
        match &self.value {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        self.value == other.value
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Term) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Term) -> Ordering {
        self.value.compare(&other.value)
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Term {
        Term::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn num(s: &str) -> Term {
        Term::number(Number::from_str(s).unwrap())
    }

    #[test]
    fn kinds_are_ordered() {
        let ordered = vec![
            Term::null(),
            Term::boolean(false),
            Term::boolean(true),
            num("-1"),
            num("2.5"),
            Term::string("a"),
            Term::var("x"),
            Term::reference(Ref::from_var("x")),
            Term::array(vec![]),
            Term::object(vec![]),
            Term::set(vec![]),
        ];
        for (i, a) in ordered.iter().enumerate() {
            for b in ordered.iter().skip(i + 1) {
                assert_eq!(a.cmp(b), Ordering::Less, "{a:?} < {b:?}");
            }
        }
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Term::array(vec![num("1"), num("2")]);
        let long = Term::array(vec![num("1"), num("2"), num("0")]);
        let bigger = Term::array(vec![num("1"), num("3")]);
        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn sets_and_objects_ignore_insertion_order() {
        let a = Term::set(vec![num("1"), num("2"), num("3")]);
        let b = Term::set(vec![num("3"), num("1"), num("2")]);
        assert_eq!(a, b);
        assert_eq!(a.value.hash_code(), b.value.hash_code());

        let o1 = Term::object(vec![(Term::string("a"), num("1")), (Term::string("b"), num("2"))]);
        let o2 = Term::object(vec![(Term::string("b"), num("2")), (Term::string("a"), num("1"))]);
        assert_eq!(o1, o2);
        assert_eq!(o1.value.hash_code(), o2.value.hash_code());
    }

    #[test]
    fn equal_numbers_hash_equally() {
        assert_eq!(num("1").value.hash_code(), num("1.0").value.hash_code());
        assert_ne!(
            Term::array(vec![num("1"), num("2")]).value.hash_code(),
            Term::array(vec![num("2"), num("1")]).value.hash_code()
        );
    }

    #[test]
    fn set_insert_deduplicates() {
        let mut s = Set::new();
        assert!(s.insert(num("1")));
        assert!(!s.insert(num("1.0")));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn object_insert_replaces_equal_key() {
        let mut o = Object::new();
        o.insert(Term::string("a"), num("1"));
        assert_eq!(o.insert(Term::string("a"), num("2")), Some(num("1")));
        assert_eq!(o.get(&Term::string("a")), Some(&num("2")));
        assert_eq!(o.len(), 1);
    }

    #[test]
    fn locations_do_not_affect_equality() {
        let a = Term::var("x").with_location(Some(Location::new("a.rego", 1, 1, "x")));
        let b = Term::var("x").with_location(Some(Location::new("b.rego", 9, 4, "x")));
        assert_eq!(a, b);
    }

    #[test]
    fn ground_checks() {
        assert!(Term::array(vec![num("1"), Term::string("a")]).is_ground());
        assert!(!Term::array(vec![Term::var("x")]).is_ground());
        let r = Ref::new(vec![Term::var("data"), Term::string("a")]);
        assert!(r.is_ground());
        let r = r.append(Term::var("i"));
        assert!(!r.is_ground());
        assert_eq!(r.ground_prefix(), Ref::from_path("data.a"));
        assert_eq!(r.dynamic(), Some(2));
    }

    #[test]
    fn ref_extend_converts_head() {
        let a = Ref::from_path("data.a");
        let b = Ref::from_path("b.c");
        assert_eq!(a.extend(&b), Ref::from_path("data.a.b.c"));
        assert!(a.extend(&b).has_prefix(&a));
        assert!(!a.has_prefix(&a.extend(&b)));
    }

    #[test]
    fn ref_output_vars_skip_head() {
        let r = Ref::new(vec![Term::var("x"), Term::var("i"), Term::string("a"), Term::var("j")]);
        let vars: Vec<_> = r.output_vars().into_iter().map(|v| v.as_str().to_string()).collect();
        assert_eq!(vars, vec!["i", "j"]);
    }

    #[test]
    fn ref_underlying_path() {
        let r = Ref::new(vec![Term::var("data"), Term::string("a"), num("1")]);
        assert_eq!(
            r.underlying().unwrap(),
            vec![
                serde_json::json!("data"),
                serde_json::json!("a"),
                serde_json::json!(1)
            ]
        );
        assert!(Ref::new(vec![Term::var("data"), Term::var("x")]).underlying().is_err());
    }

    #[test]
    fn wildcard_vars_render_as_underscore() {
        assert!(Var::from("$3").is_wildcard());
        assert_eq!(Var::from("$3").to_string(), "_");
        assert!(Var::from("__local0__").is_generated());
        assert!(!Var::from("x").is_generated());
    }
}
