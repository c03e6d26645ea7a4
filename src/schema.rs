// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Conversion of JSON Schema documents into static types.
//!
//! Only the structural part of a schema matters here. Validation keywords
//! such as `minimum`, `pattern` or `required` are ignored; what remains is
//! mapped onto [`Type`]:
//!
//! | schema                                  | type                          |
//! |-----------------------------------------|-------------------------------|
//! | `{}`, `true`, no `type`                 | `any`                         |
//! | `{"type": "integer"}`                   | `number`                      |
//! | `{"type": ["string", "null"]}`          | `any<string, null>`           |
//! | `{"properties": {..}}`                  | `object<..>[any: any]`        |
//! | `{"additionalProperties": false, ..}`   | `object<..>`                  |
//! | `{"items": {..}}`                       | `array[..]`                   |
//! | `{"items": [..]}`, `{"prefixItems": ..}`| `array<..>`                   |
//! | `{"enum": [1, "a"]}`                    | `any<number, string>`         |
//!
//! `allOf` merges its members structurally and fails when they disagree.
//! `anyOf` produces a union. `$ref` is followed within the document, and
//! to remote documents through a caller supplied [`SchemaFetcher`] when the
//! host is allowed. A reference that is already being expanded resolves to
//! `any`, so recursive schemas terminate.

pub mod error;

pub use error::SchemaError;

use crate::ast::{Ref, SCHEMA_ROOT_DOCUMENT};
use crate::types::{self, type_of_json, DynamicProperty, PropertyKey, StaticProperty, Type};
use crate::Rc;

use alloc::collections::BTreeMap;
use core::fmt;
use std::time::Instant;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

type Result<T> = core::result::Result<T, SchemaError>;

/// Retrieves remote schema documents.
pub trait SchemaFetcher {
    /// Fetch the document at `url`, giving up once `deadline` has passed.
    fn fetch(&self, url: &Url, deadline: Option<Instant>) -> anyhow::Result<Value>;
}

#[derive(Clone, Default)]
pub struct SchemaLoaderOptions {
    /// Hosts from which remote references may be loaded. `None` allows
    /// every host; an empty list disables remote references. An entry
    /// matches any host it is a prefix of.
    pub allowed_hosts: Option<Vec<String>>,
    pub deadline: Option<Instant>,
    pub fetcher: Option<Rc<dyn SchemaFetcher>>,
}

impl fmt::Debug for SchemaLoaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaLoaderOptions")
            .field("allowed_hosts", &self.allowed_hosts)
            .field("deadline", &self.deadline)
            .field("fetcher", &self.fetcher.as_ref().map(|_| "SchemaFetcher"))
            .finish()
    }
}

impl SchemaLoaderOptions {
    fn allows(&self, host: &str) -> bool {
        match &self.allowed_hosts {
            None => true,
            Some(hosts) => hosts.iter().any(|h| host.starts_with(h.as_str())),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum TypeNames {
    One(String),
    Many(Vec<String>),
}

impl TypeNames {
    fn names(&self) -> &[String] {
        match self {
            TypeNames::One(n) => core::slice::from_ref(n),
            TypeNames::Many(ns) => ns,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Items {
    Tuple(Vec<Value>),
    Single(Value),
}

/// The keywords of a schema object that contribute to its type.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SchemaNode {
    #[serde(rename = "$ref")]
    reference: Option<String>,
    #[serde(rename = "type")]
    types: Option<TypeNames>,
    properties: Option<BTreeMap<String, Value>>,
    additional_properties: Option<Value>,
    items: Option<Items>,
    prefix_items: Option<Vec<Value>>,
    all_of: Option<Vec<Value>>,
    any_of: Option<Vec<Value>>,
    #[serde(rename = "enum")]
    enumeration: Option<Vec<Value>>,
    #[serde(rename = "const")]
    constant: Option<Value>,
}

impl SchemaNode {
    fn is_object_like(&self) -> bool {
        self.properties.is_some() || self.additional_properties.is_some()
    }

    fn is_array_like(&self) -> bool {
        self.items.is_some() || self.prefix_items.is_some()
    }
}

#[derive(Clone)]
struct Document {
    base: Option<Url>,
    value: Rc<Value>,
}

impl Document {
    fn new(value: Rc<Value>) -> Document {
        let base = value
            .get("$id")
            .and_then(Value::as_str)
            .and_then(|id| Url::parse(id).ok())
            .map(|mut url| {
                url.set_fragment(None);
                url
            });
        Document { base, value }
    }

    fn key(&self, fragment: &str) -> String {
        let base = self.base.as_ref().map(Url::as_str).unwrap_or_default();
        format!("{base}#{fragment}")
    }
}

pub struct SchemaLoader<'o> {
    options: &'o SchemaLoaderOptions,
    current: Document,
    // References being expanded, innermost last.
    expanding: Vec<String>,
    cache: BTreeMap<String, Rc<Value>>,
}

impl<'o> SchemaLoader<'o> {
    pub fn new(options: &'o SchemaLoaderOptions) -> SchemaLoader<'o> {
        SchemaLoader {
            options,
            current: Document::new(Rc::new(Value::Null)),
            expanding: vec![],
            cache: BTreeMap::new(),
        }
    }

    /// Type described by `schema`.
    pub fn load(&mut self, schema: &Value) -> Result<Type> {
        self.cache.clear();
        self.expanding.clear();
        self.current = Document::new(Rc::new(schema.clone()));
        let root = Rc::clone(&self.current.value);
        self.parse(&root)
    }

    pub fn load_str(&mut self, schema: &str) -> Result<Type> {
        let schema: Value = serde_json::from_str(schema).map_err(|e| SchemaError::Invalid(e.to_string()))?;
        self.load(&schema)
    }

    fn parse(&mut self, schema: &Value) -> Result<Type> {
        let node = match schema {
            Value::Bool(_) => return Ok(Type::any()),
            Value::Object(_) => SchemaNode::deserialize(schema).map_err(|e| SchemaError::Invalid(e.to_string()))?,
            _ => return Err(SchemaError::Invalid(format!("expected a schema object, found `{schema}`"))),
        };

        if let Some(reference) = &node.reference {
            return self.resolve(reference);
        }
        if let Some(branches) = &node.any_of {
            return self.parse_any_of(&node, branches);
        }
        if let Some(parts) = &node.all_of {
            return self.parse_all_of(&node, parts);
        }
        Ok(self.parse_core(&node)?.unwrap_or_else(Type::any))
    }

    /// Type of the schema ignoring composition keywords. `None` if nothing
    /// constrains the shape.
    fn parse_core(&mut self, node: &SchemaNode) -> Result<Option<Type>> {
        if let Some(c) = &node.constant {
            return Ok(Some(type_of_json(c)));
        }
        if let Some(values) = &node.enumeration {
            return Ok(Some(Type::any_of(values.iter().map(type_of_json).collect())));
        }

        match &node.types {
            Some(names) => {
                let mut union = None;
                for name in names.names() {
                    let t = self.parse_kind(name, node)?;
                    union = types::or(union, Some(t));
                }
                Ok(union)
            }
            None if node.is_object_like() => Ok(Some(self.parse_object(node)?)),
            None if node.is_array_like() => Ok(Some(self.parse_array(node)?)),
            None => Ok(None),
        }
    }

    fn parse_kind(&mut self, name: &str, node: &SchemaNode) -> Result<Type> {
        Ok(match name {
            "null" => Type::Null,
            "boolean" => Type::Boolean,
            "integer" | "number" => Type::Number,
            "string" => Type::String,
            "object" => self.parse_object(node)?,
            "array" => self.parse_array(node)?,
            _ => return Err(SchemaError::UnknownType(name.to_string())),
        })
    }

    fn parse_object(&mut self, node: &SchemaNode) -> Result<Type> {
        let mut props = vec![];
        if let Some(properties) = &node.properties {
            for (key, schema) in properties {
                props.push(StaticProperty {
                    key: PropertyKey::from(key.as_str()),
                    value: self.parse(schema)?,
                });
            }
        }

        let dynamic = match &node.additional_properties {
            Some(Value::Bool(false)) => None,
            None | Some(Value::Bool(true)) => Some(DynamicProperty {
                key: Type::any(),
                value: Type::any(),
            }),
            Some(schema) => Some(DynamicProperty {
                key: Type::any(),
                value: self.parse(schema)?,
            }),
        };

        Ok(Type::new_object(props, dynamic))
    }

    fn parse_array(&mut self, node: &SchemaNode) -> Result<Type> {
        let mut static_items = vec![];
        if let Some(prefix) = &node.prefix_items {
            for schema in prefix {
                static_items.push(self.parse(schema)?);
            }
        }

        let dynamic = match &node.items {
            Some(Items::Tuple(tuple)) => {
                for schema in tuple {
                    static_items.push(self.parse(schema)?);
                }
                None
            }
            Some(Items::Single(Value::Bool(false))) => None,
            Some(Items::Single(schema)) => Some(self.parse(schema)?),
            None if static_items.is_empty() => Some(Type::any()),
            None => None,
        };

        Ok(Type::new_array(static_items, dynamic))
    }

    fn parse_all_of(&mut self, node: &SchemaNode, parts: &[Value]) -> Result<Type> {
        let mut merged = self.parse_core(node)?;
        for part in parts {
            let t = self.parse(part)?;
            merged = Some(match merged {
                Some(m) => merge(m, t)?,
                None => t,
            });
        }
        Ok(merged.unwrap_or_else(Type::any))
    }

    fn parse_any_of(&mut self, node: &SchemaNode, branches: &[Value]) -> Result<Type> {
        // A closed object declared next to `anyOf` forms one more alternative.
        let mut union = match self.parse_core(node)? {
            Some(t @ Type::Object { dynamic: None, .. }) if has_static_props(&t) => Some(t),
            _ => None,
        };
        for branch in branches {
            union = types::or(union, Some(self.parse(branch)?));
        }
        Ok(union.unwrap_or_else(Type::any))
    }

    fn resolve(&mut self, reference: &str) -> Result<Type> {
        let (location, fragment) = match reference.split_once('#') {
            Some((location, fragment)) => (location, fragment),
            None => (reference, ""),
        };

        let document = if location.is_empty() {
            self.current.clone()
        } else {
            let url = match &self.current.base {
                Some(base) => base.join(location),
                None => Url::parse(location),
            }
            .map_err(|e| SchemaError::InvalidRef {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
            if Some(&url) == self.current.base.as_ref() {
                self.current.clone()
            } else {
                self.fetch(url)?
            }
        };

        let key = document.key(fragment);
        if self.expanding.contains(&key) {
            debug!("schema reference {reference} is recursive; typing it as any");
            return Ok(Type::any());
        }

        let target = if fragment.is_empty() {
            Some(document.value.as_ref())
        } else if fragment.starts_with('/') {
            document.value.pointer(fragment)
        } else {
            find_anchor(&document.value, fragment)
        };
        let Some(target) = target else {
            return Err(SchemaError::UnresolvedRef(reference.to_string()));
        };
        debug!("resolved schema reference {reference}");

        self.expanding.push(key);
        let previous = core::mem::replace(&mut self.current, document.clone());
        let result = self.parse(target);
        self.current = previous;
        self.expanding.pop();
        result
    }

    fn fetch(&mut self, mut url: Url) -> Result<Document> {
        url.set_fragment(None);
        if let Some(value) = self.cache.get(url.as_str()) {
            return Ok(Document {
                base: Some(url),
                value: Rc::clone(value),
            });
        }

        let host = url.host_str().unwrap_or_default();
        if !self.options.allows(host) {
            warn!("remote schema reference {url} rejected: host `{host}` is not allowed");
            return Err(SchemaError::RemoteDisabled { url: url.to_string() });
        }
        if let Some(deadline) = self.options.deadline {
            if Instant::now() >= deadline {
                return Err(SchemaError::DeadlineExceeded { url: url.to_string() });
            }
        }
        let Some(fetcher) = &self.options.fetcher else {
            return Err(SchemaError::NoFetcher { url: url.to_string() });
        };

        let value = fetcher
            .fetch(&url, self.options.deadline)
            .map_err(|e| SchemaError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!("fetched remote schema {url}");

        let value = Rc::new(value);
        self.cache.insert(url.to_string(), Rc::clone(&value));
        Ok(Document { base: Some(url), value })
    }
}

fn has_static_props(t: &Type) -> bool {
    matches!(t, Type::Object { static_props, .. } if !static_props.is_empty())
}

fn find_anchor<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    match value {
        Value::Object(fields) => {
            let anchor = fields.get("$anchor").and_then(Value::as_str);
            let id = fields.get("$id").and_then(Value::as_str);
            if anchor == Some(name) || id.and_then(|id| id.strip_prefix('#')) == Some(name) {
                return Some(value);
            }
            fields.values().find_map(|v| find_anchor(v, name))
        }
        Value::Array(items) => items.iter().find_map(|v| find_anchor(v, name)),
        _ => None,
    }
}

/// Combines two types that must both hold.
fn merge(a: Type, b: Type) -> Result<Type> {
    match (a, b) {
        (a, b) if a.is_any() => Ok(b),
        (a, b) if b.is_any() => Ok(a),

        (
            Type::Object {
                static_props: pa,
                dynamic: da,
            },
            Type::Object {
                static_props: pb,
                dynamic: db,
            },
        ) => {
            let mut props: BTreeMap<PropertyKey, Type> = BTreeMap::new();
            for p in pa.into_iter().chain(pb) {
                let value = match props.remove(&p.key) {
                    Some(prev) => merge(prev, p.value)?,
                    None => p.value,
                };
                props.insert(p.key, value);
            }
            let dynamic = match (da, db) {
                (Some(x), Some(y)) => Some(DynamicProperty {
                    key: merge(x.key, y.key)?,
                    value: merge(x.value, y.value)?,
                }),
                _ => None,
            };
            Ok(Type::new_object(
                props
                    .into_iter()
                    .map(|(key, value)| StaticProperty { key, value })
                    .collect(),
                dynamic,
            ))
        }

        (
            Type::Array {
                static_items: sa,
                dynamic: da,
            },
            Type::Array {
                static_items: sb,
                dynamic: db,
            },
        ) => {
            let len = sa.len().max(sb.len());
            let mut ia = sa.into_iter();
            let mut ib = sb.into_iter();
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let x = ia.next().or_else(|| da.as_deref().cloned());
                let y = ib.next().or_else(|| db.as_deref().cloned());
                items.push(match (x, y) {
                    (Some(x), Some(y)) => merge(x, y)?,
                    (Some(t), None) | (None, Some(t)) => t,
                    (None, None) => break,
                });
            }
            let dynamic = match (da, db) {
                (Some(x), Some(y)) => Some(merge(*x, *y)?),
                _ => None,
            };
            Ok(Type::new_array(items, dynamic))
        }

        (Type::Set { of: a }, Type::Set { of: b }) => Ok(Type::set_of(merge(*a, *b)?)),

        (a, b) if a == b => Ok(a),
        _ => Err(SchemaError::Merge),
    }
}

/// Schema documents addressable from annotations, keyed by references
/// rooted at `schema`.
#[derive(Clone, Debug, Default)]
pub struct SchemaSet {
    schemas: BTreeMap<Ref, Value>,
}

impl SchemaSet {
    pub fn new() -> SchemaSet {
        SchemaSet::default()
    }

    pub fn put(&mut self, path: Ref, schema: Value) {
        self.schemas.insert(path, schema);
    }

    /// Registers the schema reached by the bare `schema` reference.
    pub fn put_root(&mut self, schema: Value) {
        self.put(Ref::from_path(SCHEMA_ROOT_DOCUMENT), schema);
    }

    pub fn get(&self, path: &Ref) -> Option<&Value> {
        self.schemas.get(path)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::cell::Cell;

    fn load(schema: &str) -> Result<Type> {
        SchemaLoader::new(&SchemaLoaderOptions::default()).load_str(schema)
    }

    fn closed(props: &[(&str, Type)]) -> Type {
        Type::new_object(
            props
                .iter()
                .map(|(k, v)| StaticProperty {
                    key: PropertyKey::from(*k),
                    value: v.clone(),
                })
                .collect(),
            None,
        )
    }

    fn open(props: &[(&str, Type)]) -> Type {
        match closed(props) {
            Type::Object { static_props, .. } => Type::new_object(
                static_props,
                Some(DynamicProperty {
                    key: Type::any(),
                    value: Type::any(),
                }),
            ),
            t => t,
        }
    }

    #[test]
    fn scalars_and_lists() {
        assert_eq!(load(r#"{"type": "integer"}"#).unwrap(), Type::Number);
        assert_eq!(load(r#"{"type": "null"}"#).unwrap(), Type::Null);
        assert_eq!(load("{}").unwrap(), Type::any());
        assert_eq!(load("true").unwrap(), Type::any());
        assert_eq!(
            load(r#"{"type": ["string", "null"]}"#).unwrap(),
            Type::String.or(Type::Null)
        );
        assert_eq!(
            load(r#"{"enum": [1, "a", 2]}"#).unwrap(),
            Type::Number.or(Type::String)
        );
        assert_eq!(load(r#"{"const": true}"#).unwrap(), Type::Boolean);
        assert_eq!(
            load(r#"{"type": "decimal"}"#),
            Err(SchemaError::UnknownType("decimal".to_string()))
        );
    }

    #[test]
    fn objects() {
        let t = load(
            r#"{
                "type": "object",
                "properties": {
                    "foo": {"type": "string"},
                    "b": {"type": "array", "items": {"type": "number"}},
                    "c": {}
                },
                "additionalProperties": false
            }"#,
        )
        .unwrap();
        assert_eq!(
            t,
            closed(&[
                ("b", Type::array_of(Type::Number)),
                ("c", Type::any()),
                ("foo", Type::String)
            ])
        );

        assert_eq!(load(r#"{"type": "object"}"#).unwrap(), open(&[]));
        assert_eq!(load(r#"{"type": "object"}"#).unwrap().to_string(), "object[any: any]");
        assert_eq!(
            load(r#"{"properties": {"a": {"type": "boolean"}}}"#).unwrap(),
            open(&[("a", Type::Boolean)])
        );
        assert_eq!(
            load(r#"{"type": "object", "additionalProperties": {"type": "number"}}"#)
                .unwrap()
                .to_string(),
            "object[any: number]"
        );
    }

    #[test]
    fn arrays() {
        assert_eq!(load(r#"{"type": "array"}"#).unwrap(), Type::array_of(Type::any()));
        assert_eq!(
            load(r#"{"type": "array", "items": [{"type": "string"}, {"type": "number"}]}"#).unwrap(),
            Type::new_array(vec![Type::String, Type::Number], None)
        );
        assert_eq!(
            load(r#"{"prefixItems": [{"type": "string"}], "items": {"type": "boolean"}}"#).unwrap(),
            Type::new_array(vec![Type::String], Some(Type::Boolean))
        );
    }

    #[test]
    fn all_of_merges_objects() {
        let t = load(
            r#"{
                "type": "object",
                "properties": {"City": {"type": "string"}},
                "additionalProperties": false,
                "allOf": [
                    {"type": "object", "properties": {"a": {"type": "string"}}, "additionalProperties": false},
                    {"properties": {"b": {"type": "integer"}}, "additionalProperties": false}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            t,
            closed(&[("City", Type::String), ("a", Type::String), ("b", Type::Number)])
        );

        let t = load(
            r#"{"allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}},
                {"type": "object", "properties": {"b": {"type": "number"}}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(t, open(&[("a", Type::String), ("b", Type::Number)]));

        assert_eq!(load(r#"{"allOf": []}"#).unwrap(), Type::any());
    }

    #[test]
    fn all_of_merges_arrays() {
        let t = load(
            r#"{"type": "array", "allOf": [
                {"items": [{"type": "integer"}, {"type": "integer"}]},
                {"items": [{"type": "integer"}, {"type": "integer"}, {"type": "string"}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(t, Type::new_array(vec![Type::Number, Type::Number, Type::String], None));

        let t = load(
            r#"{"type": "array", "items": {"type": "integer"}, "allOf": [
                {"type": "array", "items": {"type": "integer"}},
                {"type": "array", "items": {"type": "integer"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(t, Type::array_of(Type::Number));
    }

    #[test]
    fn all_of_mismatches_fail() {
        let cases = [
            r#"{"type": "object", "allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}},
                {"type": "array", "items": {"type": "integer"}}
            ]}"#,
            r#"{"type": "array", "items": {"type": "array"}, "allOf": [
                {"type": "array", "items": {"type": "integer"}}
            ]}"#,
            r#"{"type": "array", "allOf": [
                {"items": [{"type": "string"}, {"type": "integer"}]},
                {"items": [{"type": "boolean"}, {"type": "integer"}]}
            ]}"#,
            r#"{"type": "string", "allOf": [{"type": "string"}, {"type": "boolean"}]}"#,
            r#"{"type": "string", "allOf": [{"type": "integer"}]}"#,
        ];
        for schema in cases {
            let err = load(schema).unwrap_err();
            assert_eq!(err, SchemaError::Merge, "{schema}");
            assert_eq!(err.to_string(), "unable to merge these schemas");
        }
        assert_eq!(
            load(r#"{"type": "boolean", "allOf": [{"type": "boolean"}, {}]}"#).unwrap(),
            Type::Boolean
        );
    }

    #[test]
    fn any_of_unions() {
        let t = load(
            r#"{"anyOf": [
                {"type": "object", "properties": {"x": {"type": "string"}}, "additionalProperties": false},
                {"type": "number", "minimum": 0}
            ]}"#,
        )
        .unwrap();
        assert_eq!(t, closed(&[("x", Type::String)]).or(Type::Number));
        assert_eq!(t.to_string(), "any<object<x: string>, number>");

        // The parent's own properties are one of the alternatives.
        let t = load(
            r#"{
                "type": "object",
                "properties": {"AddressLine": {"type": "string"}},
                "additionalProperties": false,
                "anyOf": [
                    {"properties": {"State": {"type": "string"}}, "additionalProperties": false},
                    {"properties": {"PostCode": {"type": "integer"}}, "additionalProperties": false}
                ]
            }"#,
        )
        .unwrap();
        let expected = Type::any_of(vec![
            closed(&[("AddressLine", Type::String)]),
            closed(&[("State", Type::String)]),
            closed(&[("PostCode", Type::Number)]),
        ]);
        assert_eq!(t, expected);

        // An open parent object is not an alternative of its own.
        let t = load(
            r#"{
                "type": "object",
                "properties": {"AddressLine": {"type": "string"}},
                "anyOf": [
                    {"properties": {"State": {"type": "string"}}, "additionalProperties": false},
                    {"type": "number"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(t, closed(&[("State", Type::String)]).or(Type::Number));

        let t = load(
            r#"{"type": "array", "anyOf": [
                {"items": [{"type": "number"}, {"type": "string"}]},
                {"items": [{"type": "integer"}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            t,
            Type::new_array(vec![Type::Number, Type::String], None).or(Type::new_array(vec![Type::Number], None))
        );
    }

    #[test]
    fn local_refs() {
        let t = load(
            r##"{
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "a": {"$ref": "#/$defs/name"},
                    "b": {"$ref": "#/definitions/count"},
                    "c": {"$ref": "#item"}
                },
                "$defs": {"name": {"type": "string"}},
                "definitions": {
                    "count": {"type": "integer"},
                    "other": {"$anchor": "item", "type": "boolean"}
                }
            }"##,
        )
        .unwrap();
        assert_eq!(
            t,
            closed(&[("a", Type::String), ("b", Type::Number), ("c", Type::Boolean)])
        );

        assert_eq!(
            load(r##"{"properties": {"a": {"$ref": "#/$defs/missing"}}}"##),
            Err(SchemaError::UnresolvedRef("#/$defs/missing".to_string()))
        );
    }

    #[test]
    fn recursive_refs_terminate() {
        let t = load(
            r##"{
                "type": "object",
                "additionalProperties": false,
                "properties": {"Something": {"$ref": "#/$defs/X"}},
                "$defs": {
                    "X": {"type": "object", "additionalProperties": false, "properties": {"Y": {"$ref": "#/$defs/Y"}}},
                    "Y": {"type": "object", "additionalProperties": false, "properties": {"X": {"$ref": "#/$defs/X"}}}
                }
            }"##,
        )
        .unwrap();
        let x = closed(&[("Y", closed(&[("X", Type::any())]))]);
        assert_eq!(t, closed(&[("Something", x)]));

        // Sibling references to the same definition are both expanded.
        let t = load(
            r##"{
                "additionalProperties": false,
                "properties": {"a": {"$ref": "#/$defs/n"}, "b": {"$ref": "#/$defs/n"}},
                "$defs": {"n": {"type": "number"}}
            }"##,
        )
        .unwrap();
        assert_eq!(t, closed(&[("a", Type::Number), ("b", Type::Number)]));
    }

    struct Remote {
        calls: Cell<usize>,
    }

    impl SchemaFetcher for Remote {
        fn fetch(&self, url: &Url, _deadline: Option<Instant>) -> anyhow::Result<Value> {
            self.calls.set(self.calls.get() + 1);
            match url.path() {
                "/defs.json" => Ok(serde_json::json!({
                    "definitions": {
                        "name": {"type": "string"},
                        "meta": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {"labels": {"$ref": "#/definitions/labels"}}
                        },
                        "labels": {"type": "object"}
                    }
                })),
                p => anyhow::bail!("not found: {p}"),
            }
        }
    }

    const REMOTE: &str = r#"{
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "kind": {"$ref": "https://schemas.example.com/defs.json#/definitions/name"},
            "metadata": {"$ref": "https://schemas.example.com/defs.json#/definitions/meta"}
        }
    }"#;

    fn remote_options(allowed_hosts: Option<Vec<String>>) -> (Rc<Remote>, SchemaLoaderOptions) {
        let remote = Rc::new(Remote { calls: Cell::new(0) });
        let options = SchemaLoaderOptions {
            allowed_hosts,
            deadline: None,
            fetcher: Some(remote.clone()),
        };
        (remote, options)
    }

    #[test]
    fn remote_refs() {
        let (remote, options) = remote_options(None);
        let t = SchemaLoader::new(&options).load_str(REMOTE).unwrap();
        assert_eq!(
            t.to_string(),
            "object<kind: string, metadata: object<labels: object[any: any]>>"
        );
        assert_eq!(remote.calls.get(), 1);

        let (_, options) = remote_options(Some(vec!["schemas.ex".to_string()]));
        assert!(SchemaLoader::new(&options).load_str(REMOTE).is_ok());
    }

    #[test]
    fn remote_refs_respect_allowed_hosts() {
        for hosts in [vec![], vec!["foo".to_string()]] {
            let (remote, options) = remote_options(Some(hosts));
            let err = SchemaLoader::new(&options).load_str(REMOTE).unwrap_err();
            assert_eq!(
                err.to_string(),
                "unable to compile the schema: remote reference loading disabled: https://schemas.example.com/defs.json"
            );
            assert_eq!(remote.calls.get(), 0);
        }

        let options = SchemaLoaderOptions::default();
        assert!(matches!(
            SchemaLoader::new(&options).load_str(REMOTE),
            Err(SchemaError::NoFetcher { .. })
        ));

        let (_, mut options) = remote_options(None);
        options.deadline = Some(Instant::now());
        assert!(matches!(
            SchemaLoader::new(&options).load_str(REMOTE),
            Err(SchemaError::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn schema_set() {
        let mut set = SchemaSet::new();
        set.put_root(serde_json::json!({"type": "string"}));
        set.put(Ref::from_path("schema.pod"), serde_json::json!({"type": "object"}));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&Ref::from_path("schema")), Some(&serde_json::json!({"type": "string"})));
        assert!(set.get(&Ref::from_path("schema.other")).is_none());
    }
}
