// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static types of documents.
//!
//! An unknown type is represented as `None` wherever an `Option<Type>` is
//! used; [`Type::any`] is the type of every value.

use crate::ast::Value;
use crate::number::Number;

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};

/// Scalar key of a static object property.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl PropertyKey {
    /// JSON-native key of a scalar value.
    pub fn from_value(v: &Value) -> Option<PropertyKey> {
        Some(match v {
            Value::Null => PropertyKey::Null,
            Value::Boolean(b) => PropertyKey::Bool(*b),
            Value::Number(n) => PropertyKey::Number(n.clone()),
            Value::String(s) => PropertyKey::String(s.clone()),
            _ => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            PropertyKey::Null => Value::Null,
            PropertyKey::Bool(b) => Value::Boolean(*b),
            PropertyKey::Number(n) => Value::Number(n.clone()),
            PropertyKey::String(s) => Value::String(s.clone()),
        }
    }

    pub fn type_of(&self) -> Type {
        match self {
            PropertyKey::Null => Type::Null,
            PropertyKey::Bool(_) => Type::Boolean,
            PropertyKey::Number(_) => Type::Number,
            PropertyKey::String(_) => Type::String,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> PropertyKey {
        PropertyKey::String(s.to_string())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Null => f.write_str("null"),
            PropertyKey::Bool(b) => write!(f, "{b}"),
            PropertyKey::Number(n) => write!(f, "{n}"),
            PropertyKey::String(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StaticProperty {
    pub key: PropertyKey,
    pub value: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DynamicProperty {
    pub key: Type,
    pub value: Type,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Type {
    Null,
    Boolean,
    Number,
    String,
    Array {
        #[serde(rename = "static", default, skip_serializing_if = "Vec::is_empty")]
        static_items: Vec<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<Box<Type>>,
    },
    Object {
        /// Sorted by key, keys unique.
        #[serde(rename = "static", default, skip_serializing_if = "Vec::is_empty")]
        static_props: Vec<StaticProperty>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<Box<DynamicProperty>>,
    },
    Set {
        of: Box<Type>,
    },
    /// Union of `of`. Empty means every type.
    Any {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        of: Vec<Type>,
    },
    Function {
        #[serde(default)]
        args: Vec<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Box<Type>>,
    },
}

impl Type {
    pub fn any() -> Type {
        Type::Any { of: vec![] }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any { of } if of.is_empty())
    }

    pub fn array_of(t: Type) -> Type {
        Type::Array {
            static_items: vec![],
            dynamic: Some(Box::new(t)),
        }
    }

    pub fn new_array(static_items: Vec<Type>, dynamic: Option<Type>) -> Type {
        Type::Array {
            static_items,
            dynamic: dynamic.map(Box::new),
        }
    }

    /// Builds an object type. Properties are sorted by key; a later
    /// duplicate key replaces an earlier one.
    pub fn new_object(props: Vec<StaticProperty>, dynamic: Option<DynamicProperty>) -> Type {
        let mut static_props: Vec<StaticProperty> = vec![];
        for p in props {
            match static_props.iter_mut().find(|q| q.key == p.key) {
                Some(q) => q.value = p.value,
                None => static_props.push(p),
            }
        }
        static_props.sort_by(|a, b| a.key.cmp(&b.key));
        Type::Object {
            static_props,
            dynamic: dynamic.map(Box::new),
        }
    }

    pub fn set_of(t: Type) -> Type {
        Type::Set { of: Box::new(t) }
    }

    /// Union of `types`, flattened and deduplicated.
    pub fn any_of(types: Vec<Type>) -> Type {
        types
            .into_iter()
            .fold(None, |acc, t| or(acc, Some(t)))
            .unwrap_or_else(Type::any)
    }

    pub fn function(args: Vec<Type>, result: Option<Type>) -> Type {
        Type::Function {
            args,
            result: result.map(Box::new),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Type::Null => "null",
            Type::Boolean => "boolean",
            Type::Number => "number",
            Type::String => "string",
            Type::Array { .. } => "array",
            Type::Object { .. } => "object",
            Type::Set { .. } => "set",
            Type::Any { .. } => "any",
            Type::Function { .. } => "function",
        }
    }

    fn order(&self) -> u8 {
        match self {
            Type::Null => 0,
            Type::Boolean => 1,
            Type::Number => 2,
            Type::String => 3,
            Type::Array { .. } => 4,
            Type::Object { .. } => 5,
            Type::Set { .. } => 6,
            Type::Any { .. } => 7,
            Type::Function { .. } => 8,
        }
    }

    /// True if `self` is a superset of `other`.
    pub fn contains(&self, other: &Type) -> bool {
        match self {
            Type::Any { of } => of.is_empty() || of.iter().any(|t| t == other),
            t => t == other,
        }
    }

    /// Union with `other`. A superset is returned unchanged.
    pub fn or(self, other: Type) -> Type {
        match (self, other) {
            (Type::Any { of }, b) => merge_any(of, b),
            (a, Type::Any { of }) => merge_any(of, a),
            (a, b) if a == b => a,
            (a, b) => Type::Any { of: vec![a, b] },
        }
    }

    /// Type of the element selected by `key`.
    pub fn select(&self, key: &PropertyKey) -> Option<Type> {
        match self {
            Type::Array {
                static_items,
                dynamic,
            } => {
                let PropertyKey::Number(n) = key else {
                    return None;
                };
                let pos = n.as_u64()? as usize;
                static_items
                    .get(pos)
                    .cloned()
                    .or_else(|| dynamic.as_deref().cloned())
            }
            Type::Object {
                static_props,
                dynamic,
            } => {
                if let Some(p) = static_props.iter().find(|p| &p.key == key) {
                    return Some(p.value.clone());
                }
                match dynamic {
                    Some(d) if d.key.contains(&key.type_of()) => Some(d.value.clone()),
                    _ => None,
                }
            }
            Type::Set { of } => {
                let t = key.type_of();
                of.contains(&t).then_some(t)
            }
            Type::Any { of } if of.is_empty() => Some(Type::any()),
            Type::Any { of } => of.iter().fold(None, |acc, t| or(t.select(key), acc)),
            _ => None,
        }
    }

    /// Type of the keys that enumerate the value.
    pub fn keys(&self) -> Option<Type> {
        match self {
            Type::Array { .. } => Some(Type::Number),
            Type::Object {
                static_props,
                dynamic,
            } => {
                let keys = static_props.iter().fold(None, |acc, p| or(acc, Some(p.key.type_of())));
                or(keys, dynamic.as_ref().map(|d| d.key.clone()))
            }
            Type::Set { of } => Some((**of).clone()),
            Type::Any { of } if of.is_empty() => Some(Type::any()),
            Type::Any { of } => of.iter().fold(None, |acc, t| or(t.keys(), acc)),
            _ => None,
        }
    }

    /// Type of the values reached by enumerating the value.
    pub fn values(&self) -> Option<Type> {
        match self {
            Type::Array {
                static_items,
                dynamic,
            } => {
                let items = static_items.iter().fold(None, |acc, t| or(acc, Some(t.clone())));
                or(items, dynamic.as_deref().cloned())
            }
            Type::Object {
                static_props,
                dynamic,
            } => {
                let values = static_props.iter().fold(None, |acc, p| or(acc, Some(p.value.clone())));
                or(values, dynamic.as_ref().map(|d| d.value.clone()))
            }
            Type::Set { of } => Some((**of).clone()),
            Type::Any { of } if of.is_empty() => Some(Type::any()),
            Type::Any { of } => of.iter().fold(None, |acc, t| or(t.values(), acc)),
            _ => None,
        }
    }

    /// Total order over types; unions compare by their sorted members.
    pub fn compare(&self, other: &Type) -> Ordering {
        match (self, other) {
            (
                Type::Array {
                    static_items: sa,
                    dynamic: da,
                },
                Type::Array {
                    static_items: sb,
                    dynamic: db,
                },
            ) => da.cmp(db).then_with(|| sa.cmp(sb)),
            (
                Type::Object {
                    static_props: sa,
                    dynamic: da,
                },
                Type::Object {
                    static_props: sb,
                    dynamic: db,
                },
            ) => da.cmp(db).then_with(|| sa.cmp(sb)),
            (Type::Set { of: a }, Type::Set { of: b }) => a.cmp(b),
            (Type::Any { of: a }, Type::Any { of: b }) => {
                let mut a: Vec<_> = a.iter().collect();
                let mut b: Vec<_> = b.iter().collect();
                a.sort();
                b.sort();
                a.cmp(&b)
            }
            (
                Type::Function {
                    args: aa,
                    result: ra,
                },
                Type::Function {
                    args: ab,
                    result: rb,
                },
            ) => aa.cmp(ab).then_with(|| ra.cmp(rb)),
            _ => self.order().cmp(&other.order()),
        }
    }
}

fn merge_any(mut of: Vec<Type>, other: Type) -> Type {
    if of.is_empty() {
        return Type::any();
    }
    match other {
        Type::Any { of: other_of } if other_of.is_empty() => Type::any(),
        Type::Any { of: other_of } => {
            for t in other_of {
                if !of.contains(&t) {
                    of.push(t);
                }
            }
            Type::Any { of }
        }
        t => {
            if !of.contains(&t) {
                of.push(t);
            }
            Type::Any { of }
        }
    }
}

/// Union of two possibly unknown types.
pub fn or(a: Option<Type>, b: Option<Type>) -> Option<Type> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => Some(a.or(b)),
    }
}

/// True if the type is unknown or has an unknown part.
pub fn nil(t: Option<&Type>) -> bool {
    match t {
        None => true,
        Some(Type::Set { of }) => nil(Some(of)),
        Some(_) => false,
    }
}

/// Type of a JSON document.
pub fn type_of_json(v: &serde_json::Value) -> Type {
    match v {
        serde_json::Value::Null => Type::Null,
        serde_json::Value::Bool(_) => Type::Boolean,
        serde_json::Value::Number(_) => Type::Number,
        serde_json::Value::String(_) => Type::String,
        serde_json::Value::Array(items) => Type::new_array(items.iter().map(type_of_json).collect(), None),
        serde_json::Value::Object(fields) => Type::new_object(
            fields
                .iter()
                .map(|(k, v)| StaticProperty {
                    key: PropertyKey::from(k.as_str()),
                    value: type_of_json(v),
                })
                .collect(),
            None,
        ),
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Type {}

impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Type) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Type {
    fn cmp(&self, other: &Type) -> Ordering {
        self.compare(other)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, t) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{t}")?;
    }
    Ok(())
}

impl fmt::Display for StaticProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Array {
                static_items,
                dynamic,
            } => {
                f.write_str("array")?;
                if !static_items.is_empty() {
                    f.write_str("<")?;
                    write_list(f, static_items)?;
                    f.write_str(">")?;
                }
                if let Some(d) = dynamic {
                    write!(f, "[{d}]")?;
                }
                Ok(())
            }
            Type::Object {
                static_props,
                dynamic,
            } => {
                f.write_str("object")?;
                if !static_props.is_empty() {
                    f.write_str("<")?;
                    write_list(f, static_props)?;
                    f.write_str(">")?;
                }
                if let Some(d) = dynamic {
                    write!(f, "[{}: {}]", d.key, d.value)?;
                }
                Ok(())
            }
            Type::Set { of } => write!(f, "set[{of}]"),
            Type::Any { of } if of.is_empty() => f.write_str("any"),
            Type::Any { of } => {
                f.write_str("any<")?;
                write_list(f, of)?;
                f.write_str(">")
            }
            Type::Function { args, result } => {
                f.write_str("(")?;
                write_list(f, args)?;
                f.write_str(")")?;
                if let Some(r) = result {
                    write!(f, " => {r}")?;
                }
                Ok(())
            }
            t => f.write_str(t.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(props: &[(&str, Type)], dynamic: Option<(Type, Type)>) -> Type {
        Type::new_object(
            props
                .iter()
                .map(|(k, v)| StaticProperty {
                    key: PropertyKey::from(*k),
                    value: v.clone(),
                })
                .collect(),
            dynamic.map(|(key, value)| DynamicProperty { key, value }),
        )
    }

    #[test]
    fn or_absorbs_and_deduplicates() {
        assert_eq!(Type::String.or(Type::String), Type::String);
        assert_eq!(Type::String.or(Type::any()), Type::any());
        let u = Type::String.or(Type::Number);
        assert_eq!(u.clone().or(Type::Number), u);
        assert_eq!(u, Type::Number.or(Type::String));
        assert_eq!(u.to_string(), "any<string, number>");
    }

    #[test]
    fn select_from_collections() {
        let o = obj(&[("a", Type::String)], Some((Type::String, Type::Number)));
        assert_eq!(o.select(&"a".into()), Some(Type::String));
        assert_eq!(o.select(&"zzz".into()), Some(Type::Number));
        assert_eq!(o.select(&PropertyKey::Bool(true)), None);

        let a = Type::new_array(vec![Type::String], Some(Type::Boolean));
        assert_eq!(a.select(&PropertyKey::Number(0i64.into())), Some(Type::String));
        assert_eq!(a.select(&PropertyKey::Number(7i64.into())), Some(Type::Boolean));
        assert_eq!(a.select(&"x".into()), None);

        assert_eq!(Type::any().select(&"x".into()), Some(Type::any()));
    }

    #[test]
    fn keys_and_values() {
        let o = obj(&[("a", Type::String), ("b", Type::Number)], None);
        assert_eq!(o.keys(), Some(Type::String));
        assert_eq!(o.values(), Some(Type::String.or(Type::Number)));
        assert_eq!(Type::array_of(Type::Null).keys(), Some(Type::Number));
        assert_eq!(Type::set_of(Type::Boolean).values(), Some(Type::Boolean));
        assert_eq!(Type::Number.values(), None);
    }

    #[test]
    fn objects_are_sorted_by_key() {
        let o = obj(&[("b", Type::Number), ("a", Type::String)], None);
        assert_eq!(o.to_string(), "object<a: string, b: number>");
        let o = obj(&[], Some((Type::String, Type::any())));
        assert_eq!(o.to_string(), "object[string: any]");
    }

    #[test]
    fn serde_shape() {
        let t = Type::new_array(vec![Type::String], Some(Type::Number));
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"type": "array", "static": [{"type": "string"}], "dynamic": {"type": "number"}})
        );
        let back: Type = serde_json::from_value(v).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn nil_types() {
        assert!(nil(None));
        assert!(!nil(Some(&Type::any())));
    }
}
