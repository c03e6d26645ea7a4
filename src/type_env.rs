// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lexically scoped typing environment used by the type checker.

use crate::ast::*;
use crate::capabilities::Capabilities;
use crate::type_checker::TypeChecker;
use crate::types::{self, DynamicProperty, PropertyKey, StaticProperty, Type};

use alloc::collections::BTreeMap;

/// Trie keyed by ref elements. A node carrying a value is a leaf as far as
/// lookups are concerned; its children are kept for later inserts.
#[derive(Clone, Debug, Default)]
pub struct TypeTree {
    value: Option<Type>,
    children: BTreeMap<Value, TypeTree>,
}

impl TypeTree {
    pub fn new() -> TypeTree {
        TypeTree::default()
    }

    pub fn value(&self) -> Option<&Type> {
        self.value.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    pub fn child(&self, key: &Value) -> Option<&TypeTree> {
        self.children.get(key)
    }

    pub fn children(&self) -> impl Iterator<Item = (&Value, &TypeTree)> {
        self.children.iter()
    }

    /// Sets the type of the immediate child `key`.
    pub fn put_one(&mut self, key: Value, tpe: Type) {
        self.children.entry(key).or_default().value = Some(tpe);
    }

    /// Sets the type at `path`, replacing whatever was there.
    pub fn put(&mut self, path: &[Term], tpe: Type) {
        let mut curr = self;
        for t in path {
            curr = curr.children.entry(t.value.clone()).or_default();
        }
        curr.value = Some(tpe);
    }

    /// Type stored exactly at `path`.
    pub fn get(&self, path: &[Term]) -> Option<Type> {
        let mut curr = self;
        for t in path {
            curr = curr.children.get(&t.value)?;
        }
        curr.value.clone()
    }

    /// Merges `tpe` in at `path`. Object types stored along the way absorb
    /// the inserted type, and an object inserted above existing leaves
    /// absorbs those leaves.
    pub fn insert(&mut self, path: &[Term], tpe: Type) {
        let mut curr = self;
        for (i, t) in path.iter().enumerate() {
            curr = curr.children.entry(t.value.clone()).or_default();
            if let Some(obj @ Type::Object { .. }) = &curr.value {
                if i + 1 < path.len() {
                    let keys: Vec<&Value> = path[i + 1..].iter().map(|t| &t.value).collect();
                    curr.value = Some(insert_into_object(obj, &keys, tpe.clone()));
                }
            }
        }

        let merged = merge_types(curr.value.take(), Some(tpe));
        curr.value = match merged {
            Some(obj @ Type::Object { .. }) if !curr.children.is_empty() => {
                let mut leaves = vec![];
                curr.collect_leaves(&mut vec![], &mut leaves);
                Some(
                    leaves
                        .into_iter()
                        .fold(obj, |acc, (path, t)| {
                            let keys: Vec<&Value> = path.iter().collect();
                            insert_into_object(&acc, &keys, t)
                        }),
                )
            }
            other => other,
        };
    }

    fn collect_leaves(&self, prefix: &mut Vec<Value>, out: &mut Vec<(Vec<Value>, Type)>) {
        for (k, child) in &self.children {
            prefix.push(k.clone());
            match &child.value {
                Some(t) => out.push((prefix.clone(), t.clone())),
                None => child.collect_leaves(prefix, out),
            }
            prefix.pop();
        }
    }

    /// Type covering the whole subtree: the value of a leaf, otherwise an
    /// object of the children's extents open to further string keys.
    pub fn extent(&self) -> Option<Type> {
        if let Some(t) = &self.value {
            return Some(t.clone());
        }
        let props = self
            .children
            .iter()
            .filter(|(k, _)| matches!(k, Value::String(_) | Value::Number(_) | Value::Boolean(_)))
            .filter_map(|(k, child)| {
                Some(StaticProperty {
                    key: PropertyKey::from_value(k)?,
                    value: child.extent()?,
                })
            })
            .collect();
        Some(Type::new_object(
            props,
            Some(DynamicProperty {
                key: Type::String,
                value: Type::any(),
            }),
        ))
    }
}

fn merge_types(a: Option<Type>, b: Option<Type>) -> Option<Type> {
    let (a, b) = match (a, b) {
        (None, b) => return b,
        (a, None) => return a,
        (Some(a), Some(b)) => (a, b),
    };
    Some(match (a, b) {
        (
            Type::Object {
                static_props: sa,
                dynamic: Some(da),
            },
            Type::Object {
                static_props: sb,
                dynamic: Some(db),
            },
        ) if sa.is_empty() && sb.is_empty() => Type::new_object(
            vec![],
            Some(DynamicProperty {
                key: da.key.or(db.key),
                value: da.value.or(db.value),
            }),
        ),
        (Type::Set { of: a }, Type::Set { of: b }) => Type::set_of(a.or(*b)),
        (
            Type::Array {
                static_items: sa,
                dynamic: Some(da),
            },
            Type::Array {
                static_items: sb,
                dynamic: Some(db),
            },
        ) if sa.is_empty() && sb.is_empty() => Type::array_of(da.or(*db)),
        (a, b) => a.or(b),
    })
}

/// Adds `tpe` to the object type `obj` at the relative `path`. Scalar keys
/// become static properties, anything else widens the dynamic part.
fn insert_into_object(obj: &Type, path: &[&Value], tpe: Type) -> Type {
    let Type::Object {
        static_props,
        dynamic,
    } = obj
    else {
        return obj.clone();
    };
    let Some((head, rest)) = path.split_first() else {
        return obj.clone();
    };

    let mut props = static_props.clone();
    let mut dynamic = dynamic.as_deref().cloned();
    match PropertyKey::from_value(head) {
        Some(key) => {
            let existing = props.iter().position(|p| p.key == key);
            let value = if rest.is_empty() {
                merge_types(existing.map(|i| props[i].value.clone()), Some(tpe)).unwrap_or_else(Type::any)
            } else {
                let child = match existing.map(|i| &props[i].value) {
                    Some(o @ Type::Object { .. }) => o.clone(),
                    _ => Type::new_object(vec![], None),
                };
                insert_into_object(&child, rest, tpe)
            };
            match existing {
                Some(i) => props[i].value = value,
                None => props.push(StaticProperty { key, value }),
            }
        }
        None => {
            let value = if rest.is_empty() {
                tpe
            } else {
                insert_into_object(&Type::new_object(vec![], None), rest, tpe)
            };
            dynamic = Some(match dynamic {
                Some(d) => DynamicProperty {
                    key: d.key.or(Type::any()),
                    value: d.value.or(value),
                },
                None => DynamicProperty {
                    key: Type::any(),
                    value,
                },
            });
        }
    }
    Type::new_object(props, dynamic)
}

/// One frame of typing information. Lookups that miss fall through to the
/// enclosing frame.
#[derive(Clone, Debug, Default)]
pub struct TypeEnv<'a> {
    funcs: BTreeMap<String, Vec<Type>>,
    tree: TypeTree,
    next: Option<&'a TypeEnv<'a>>,
}

impl TypeEnv<'static> {
    pub fn new() -> TypeEnv<'static> {
        TypeEnv::default()
    }

    /// Root frame holding the signature of every builtin in `capabilities`.
    pub fn with_capabilities(capabilities: &Capabilities) -> TypeEnv<'static> {
        let mut env = TypeEnv::new();
        for b in &capabilities.builtins {
            env.put_func(&b.name, b.signature());
        }
        env
    }
}

impl<'a> TypeEnv<'a> {
    /// Pushes a fresh frame on top of `self`.
    pub fn wrap(&self) -> TypeEnv<'_> {
        TypeEnv {
            funcs: BTreeMap::new(),
            tree: TypeTree::new(),
            next: Some(self),
        }
    }

    pub fn next(&self) -> Option<&'a TypeEnv<'a>> {
        self.next
    }

    pub fn tree(&self) -> &TypeTree {
        &self.tree
    }

    pub fn put_func(&mut self, name: &str, signature: Vec<Type>) {
        self.funcs.insert(name.to_string(), signature);
    }

    /// Argument types followed by the result type.
    pub fn get_func(&self, name: &str) -> Option<&[Type]> {
        match self.funcs.get(name) {
            Some(sig) => Some(sig.as_slice()),
            None => self.next.and_then(|n| n.get_func(name)),
        }
    }

    pub fn put(&mut self, path: &Ref, tpe: Type) {
        self.tree.put(path.terms(), tpe);
    }

    pub fn insert(&mut self, path: &Ref, tpe: Type) {
        self.tree.insert(path.terms(), tpe);
    }

    pub fn put_var(&mut self, var: &Var, tpe: Type) {
        self.tree.put_one(Value::Var(var.clone()), tpe);
    }

    pub fn get(&self, term: &Term) -> Option<Type> {
        self.get_value(&term.value)
    }

    pub fn get_value(&self, value: &Value) -> Option<Type> {
        match value {
            Value::Null => Some(Type::Null),
            Value::Boolean(_) => Some(Type::Boolean),
            Value::Number(_) => Some(Type::Number),
            Value::String(_) => Some(Type::String),

            Value::Var(_) => match self.tree.child(value) {
                Some(node) => node.value().cloned(),
                None => self.next.and_then(|n| n.get_value(value)),
            },

            Value::Ref(r) => self.get_ref(r),

            Value::Array(items) => {
                let static_items = items.iter().map(|t| self.get(t)).collect::<Option<Vec<_>>>()?;
                let dynamic = static_items.is_empty().then(Type::any);
                Some(Type::new_array(static_items, dynamic))
            }

            Value::Object(obj) => {
                let mut props = vec![];
                let mut dynamic = None;
                for (k, v) in obj.iter() {
                    match PropertyKey::from_value(&k.value) {
                        Some(key) => props.push(StaticProperty {
                            key,
                            value: self.get(v)?,
                        }),
                        None => {
                            dynamic = Some(DynamicProperty {
                                key: self.get(k).unwrap_or_else(Type::any),
                                value: self.get(v).unwrap_or_else(Type::any),
                            })
                        }
                    }
                }
                if props.is_empty() && dynamic.is_none() {
                    dynamic = Some(DynamicProperty {
                        key: Type::any(),
                        value: Type::any(),
                    });
                }
                Some(Type::new_object(props, dynamic))
            }

            Value::Set(set) => {
                let elem = set.iter().try_fold(None, |acc, t| Some(types::or(acc, Some(self.get(t)?))))?;
                Some(Type::set_of(elem.unwrap_or_else(Type::any)))
            }

            Value::ArrayComprehension(c) => {
                let mut checker = TypeChecker::new();
                let env = checker.check_body(self, &c.body);
                checker
                    .errors()
                    .is_empty()
                    .then(|| Type::new_array(vec![], env.get(&c.term)))
            }
            Value::SetComprehension(c) => {
                let mut checker = TypeChecker::new();
                let env = checker.check_body(self, &c.body);
                if !checker.errors().is_empty() {
                    return None;
                }
                env.get(&c.term).map(Type::set_of)
            }
            Value::ObjectComprehension(c) => {
                let mut checker = TypeChecker::new();
                let env = checker.check_body(self, &c.body);
                if !checker.errors().is_empty() {
                    return None;
                }
                Some(Type::new_object(
                    vec![],
                    Some(DynamicProperty {
                        key: env.get(&c.key)?,
                        value: env.get(&c.value)?,
                    }),
                ))
            }
        }
    }

    fn get_ref(&self, r: &Ref) -> Option<Type> {
        let head = r.head()?;
        match self.tree.child(&head.value) {
            Some(node) => self.get_ref_rec(node, r, &r.terms()[1..]),
            None => self.get_ref_fallback(r),
        }
    }

    fn get_ref_fallback(&self, r: &Ref) -> Option<Type> {
        if let Some(next) = self.next {
            return next.get_ref(r);
        }
        match r.head_var() {
            Some(v) if v.as_str() == DEFAULT_ROOT_DOCUMENT || v.as_str() == INPUT_ROOT_DOCUMENT => Some(Type::any()),
            _ => None,
        }
    }

    fn get_ref_rec(&self, node: &TypeTree, r: &Ref, tail: &[Term]) -> Option<Type> {
        let Some((first, rest)) = tail.split_first() else {
            return node.extent();
        };

        if node.is_leaf() {
            if let Some(child) = node.child(&first.value) {
                return self.get_ref_rec(child, r, rest);
            }
            return select_ref(node.value().cloned(), tail);
        }

        if !first.value.is_constant() {
            return select_ref(node.extent(), tail);
        }

        match node.child(&first.value) {
            Some(child) => self.get_ref_rec(child, r, rest),
            None => self.get_ref_fallback(r),
        }
    }
}

/// Follows `path` through `tpe`. Non-scalar elements select every value.
pub(crate) fn select_ref(tpe: Option<Type>, path: &[Term]) -> Option<Type> {
    let Some((first, rest)) = path.split_first() else {
        return tpe;
    };
    let tpe = tpe?;
    let next = match &first.value {
        Value::Var(_) | Value::Ref(_) | Value::Array(_) | Value::Object(_) | Value::Set(_) => tpe.values(),
        v => select_constant(&tpe, v),
    };
    select_ref(next, rest)
}

fn select_constant(tpe: &Type, v: &Value) -> Option<Type> {
    tpe.select(&PropertyKey::from_value(v)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(keys: &[&str]) -> Vec<Term> {
        keys.iter().map(|k| Term::string(k)).collect()
    }

    #[test]
    fn ref_lookup_widens_on_vars() {
        let mut env = TypeEnv::new();
        env.put_func("plus", vec![Type::Number, Type::Number, Type::Number]);
        env.put(&Ref::from_path("data.users.name"), Type::String);

        let name = Term::reference(Ref::from_path("data.users.name"));
        assert_eq!(env.get(&name), Some(Type::String));

        let elem = Term::reference(Ref::from_path("data.users").append(Term::var("i")));
        assert_eq!(env.get(&elem), Some(Type::any()));

        assert_eq!(env.get_func("plus").map(|s| s.len()), Some(3));
        assert!(env.get_func("minus").is_none());
    }

    #[test]
    fn unknown_roots_are_any() {
        let env = TypeEnv::new();
        let r = Term::reference(Ref::from_path("input.a.b"));
        assert_eq!(env.get(&r), Some(Type::any()));
        let local = Term::reference(Ref::new(vec![Term::var("x"), Term::string("a")]));
        assert_eq!(env.get(&local), None);
    }

    #[test]
    fn frames_fall_through() {
        let mut root = TypeEnv::new();
        root.put_var(&Var::new("x"), Type::Number);
        root.put_func("f", vec![Type::String, Type::Boolean]);
        let mut inner = root.wrap();
        inner.put_var(&Var::new("y"), Type::String);

        assert_eq!(inner.get(&Term::var("x")), Some(Type::Number));
        assert_eq!(inner.get(&Term::var("y")), Some(Type::String));
        assert_eq!(root.get(&Term::var("y")), None);
        assert!(inner.get_func("f").is_some());
    }

    #[test]
    fn composite_values() {
        let mut env = TypeEnv::new();
        env.put_var(&Var::new("x"), Type::Number);

        let arr = Term::array(vec![Term::var("x"), Term::string("a")]);
        assert_eq!(
            env.get(&arr),
            Some(Type::new_array(vec![Type::Number, Type::String], None))
        );
        assert_eq!(env.get(&Term::array(vec![])), Some(Type::array_of(Type::any())));
        assert_eq!(env.get(&Term::array(vec![Term::var("unknown")])), None);

        let set = Term::set(vec![Term::number(1i64), Term::string("a")]);
        assert_eq!(
            env.get(&set),
            Some(Type::set_of(Type::any_of(vec![Type::Number, Type::String])))
        );
        assert_eq!(env.get(&Term::set(vec![])), Some(Type::set_of(Type::any())));

        let obj = Term::object(vec![(Term::string("a"), Term::var("x"))]);
        let Some(Type::Object { static_props, dynamic }) = env.get(&obj) else {
            panic!("expected an object type");
        };
        assert_eq!(static_props.len(), 1);
        assert!(dynamic.is_none());
    }

    #[test]
    fn leaf_types_are_selected_into() {
        let mut env = TypeEnv::new();
        let user = Type::new_object(
            vec![StaticProperty {
                key: "name".into(),
                value: Type::String,
            }],
            None,
        );
        env.put(&Ref::from_path("input.user"), user);
        let r = Term::reference(Ref::from_path("input.user.name"));
        assert_eq!(env.get(&r), Some(Type::String));
        let missing = Term::reference(Ref::from_path("input.user.age"));
        assert_eq!(env.get(&missing), None);
    }

    #[test]
    fn tree_insert_merges_leaves() {
        let mut tree = TypeTree::new();
        tree.put(&path(&["a", "b", "c"]), Type::Boolean);
        tree.put(&path(&["a", "b", "d", "e"]), Type::Number);
        assert_eq!(tree.get(&path(&["a", "b", "c"])), Some(Type::Boolean));

        let dynamic = DynamicProperty {
            key: Type::Number,
            value: Type::String,
        };
        tree.insert(&path(&["a", "b"]), Type::new_object(vec![], Some(dynamic.clone())));
        let d = Type::new_object(
            vec![StaticProperty {
                key: "e".into(),
                value: Type::Number,
            }],
            None,
        );
        let expected = Type::new_object(
            vec![
                StaticProperty {
                    key: "c".into(),
                    value: Type::Boolean,
                },
                StaticProperty {
                    key: "d".into(),
                    value: d.clone(),
                },
            ],
            Some(dynamic.clone()),
        );
        assert_eq!(tree.get(&path(&["a", "b"])), Some(expected));

        tree.insert(&path(&["a", "b", "f"]), Type::String);
        assert_eq!(tree.get(&path(&["a", "b", "f"])), Some(Type::String));
        let expected = Type::new_object(
            vec![
                StaticProperty {
                    key: "c".into(),
                    value: Type::Boolean,
                },
                StaticProperty {
                    key: "f".into(),
                    value: Type::String,
                },
                StaticProperty {
                    key: "d".into(),
                    value: d,
                },
            ],
            Some(dynamic),
        );
        assert_eq!(tree.get(&path(&["a", "b"])), Some(expected));
    }

    #[test]
    fn extent_of_inner_nodes() {
        let mut tree = TypeTree::new();
        tree.put(&path(&["x", "y"]), Type::Number);
        let Some(Type::Object { static_props, dynamic }) = tree.child(&Value::String("x".into())).and_then(|n| n.extent())
        else {
            panic!("expected an object type");
        };
        assert_eq!(static_props[0].value, Type::Number);
        assert_eq!(dynamic.map(|d| d.key), Some(Type::String));
    }
}
