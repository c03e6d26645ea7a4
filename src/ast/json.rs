// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! JSON encoding of trees.
//!
//! Terms are tagged unions `{"type": <kind>, "value": <payload>}`. Decoding
//! goes through [`serde_json::Value`] so that malformed documents produce
//! errors describing the offending field.

use crate::ast::annotations::Annotations;
use crate::ast::policy::*;
use crate::ast::term::*;
use crate::number::Number;
use crate::*;

use core::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

fn kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn field<'a>(obj: &'a Map<String, Json>, name: &str, node: &str) -> Result<&'a Json> {
    obj.get(name)
        .ok_or_else(|| anyhow!("ast: {node} is missing field `{name}`"))
}

fn as_object<'a>(v: &'a Json, node: &str) -> Result<&'a Map<String, Json>> {
    v.as_object()
        .ok_or_else(|| anyhow!("ast: unable to unmarshal {node} from {}", kind(v)))
}

fn as_array<'a>(v: &'a Json, node: &str) -> Result<&'a Vec<Json>> {
    v.as_array()
        .ok_or_else(|| anyhow!("ast: unable to unmarshal {node} from {}", kind(v)))
}

fn terms_to_json(terms: &[Term]) -> Result<Json> {
    Ok(Json::Array(terms.iter().map(Term::to_json).collect::<Result<_>>()?))
}

fn terms_from_json(v: &Json) -> Result<Vec<Term>> {
    as_array(v, "term list")?.iter().map(Term::from_json).collect()
}

impl Term {
    pub fn to_json(&self) -> Result<Json> {
        let value = match &self.value {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::to_value(n)?,
            Value::String(s) => Json::String(s.clone()),
            Value::Var(v) => Json::String(v.as_str().to_string()),
            Value::Ref(r) => terms_to_json(r.terms())?,
            Value::Array(a) => terms_to_json(a)?,
            Value::Set(s) => Json::Array(s.iter().map(Term::to_json).collect::<Result<_>>()?),
            Value::Object(o) => Json::Array(
                o.iter()
                    .map(|(k, v)| Ok(Json::Array(vec![k.to_json()?, v.to_json()?])))
                    .collect::<Result<_>>()?,
            ),
            Value::ArrayComprehension(c) => json!({"term": c.term.to_json()?, "body": c.body.to_json()?}),
            Value::SetComprehension(c) => json!({"term": c.term.to_json()?, "body": c.body.to_json()?}),
            Value::ObjectComprehension(c) => json!({
                "key": c.key.to_json()?,
                "value": c.value.to_json()?,
                "body": c.body.to_json()?,
            }),
        };
        Ok(json!({"type": self.value.type_name(), "value": value}))
    }

    pub fn from_json(v: &Json) -> Result<Term> {
        let obj = v.as_object().ok_or_else(|| anyhow!("ast: unable to unmarshal term"))?;
        let (Some(Json::String(tag)), Some(payload)) = (obj.get("type"), obj.get("value")) else {
            bail!("ast: unable to unmarshal term");
        };
        let value = match (tag.as_str(), payload) {
            ("null", Json::Null) => Value::Null,
            ("boolean", Json::Bool(b)) => Value::Boolean(*b),
            ("number", Json::Number(n)) => Value::Number(Number::from_str(&n.to_string())?),
            ("string", Json::String(s)) => Value::String(s.clone()),
            ("var", Json::String(s)) => Value::Var(Var::new(s.clone())),
            ("ref", Json::Array(_)) => {
                let terms = terms_from_json(payload)?;
                if terms.is_empty() {
                    bail!("ast: unable to unmarshal term: empty reference");
                }
                Value::Ref(Ref::new(terms))
            }
            ("array", Json::Array(_)) => Value::Array(terms_from_json(payload)?),
            ("set", Json::Array(_)) => Value::Set(terms_from_json(payload)?.into_iter().collect()),
            ("object", Json::Array(pairs)) => {
                let mut obj = Object::new();
                for pair in pairs {
                    match pair.as_array().map(|p| p.as_slice()) {
                        Some([k, v]) => {
                            obj.insert(Term::from_json(k)?, Term::from_json(v)?);
                        }
                        _ => bail!("ast: unable to unmarshal term: object items must be [key, value] pairs"),
                    }
                }
                Value::Object(obj)
            }
            ("arraycomprehension", Json::Object(c)) => Value::ArrayComprehension(Box::new(ArrayComprehension {
                term: Term::from_json(field(c, "term", "comprehension")?)?,
                body: Body::from_json(field(c, "body", "comprehension")?)?,
            })),
            ("setcomprehension", Json::Object(c)) => Value::SetComprehension(Box::new(SetComprehension {
                term: Term::from_json(field(c, "term", "comprehension")?)?,
                body: Body::from_json(field(c, "body", "comprehension")?)?,
            })),
            ("objectcomprehension", Json::Object(c)) => {
                Value::ObjectComprehension(Box::new(ObjectComprehension {
                    key: Term::from_json(field(c, "key", "comprehension")?)?,
                    value: Term::from_json(field(c, "value", "comprehension")?)?,
                    body: Body::from_json(field(c, "body", "comprehension")?)?,
                }))
            }
            _ => bail!("ast: unable to unmarshal term"),
        };
        Ok(Term::new(value))
    }
}

impl With {
    pub fn to_json(&self) -> Result<Json> {
        Ok(json!({"target": self.target.to_json()?, "value": self.value.to_json()?}))
    }

    pub fn from_json(v: &Json) -> Result<With> {
        let obj = as_object(v, "with")?;
        Ok(With::new(
            Term::from_json(field(obj, "target", "with")?)?,
            Term::from_json(field(obj, "value", "with")?)?,
        ))
    }
}

impl Expr {
    pub fn to_json(&self) -> Result<Json> {
        let mut obj = Map::new();
        obj.insert("index".into(), Json::from(self.index));
        if self.negated {
            obj.insert("negated".into(), Json::Bool(true));
        }
        let terms = match &self.terms {
            Terms::Single(t) => t.to_json()?,
            Terms::Call(terms) => terms_to_json(terms)?,
        };
        obj.insert("terms".into(), terms);
        if !self.with.is_empty() {
            let with = self.with.iter().map(With::to_json).collect::<Result<_>>()?;
            obj.insert("with".into(), Json::Array(with));
        }
        Ok(Json::Object(obj))
    }

    pub fn from_json(v: &Json) -> Result<Expr> {
        let obj = as_object(v, "expression")?;

        let negated = match obj.get("negated") {
            None => false,
            Some(Json::Bool(b)) => *b,
            Some(other) => bail!(
                "ast: unable to unmarshal negated field with type: {} (expected true or false)",
                kind(other)
            ),
        };

        let index = match obj.get("index") {
            Some(Json::Number(n)) => n
                .as_u64()
                .ok_or_else(|| anyhow!("ast: unable to unmarshal index field with type: number (expected integer)"))?,
            Some(other) => bail!(
                "ast: unable to unmarshal index field with type: {} (expected integer)",
                kind(other)
            ),
            None => 0,
        };

        let terms = match obj.get("terms") {
            Some(t @ Json::Object(_)) => Terms::Single(Term::from_json(t)?),
            Some(Json::Array(items)) => Terms::Call(items.iter().map(Term::from_json).collect::<Result<_>>()?),
            other => bail!(
                "ast: unable to unmarshal terms field with type: {} (expected {{\"value\": ..., \"type\": ...}} or [{{\"value\": ..., \"type\": ...}}, ...])",
                other.map(kind).unwrap_or("null")
            ),
        };

        let with = match obj.get("with") {
            None => vec![],
            Some(w) => as_array(w, "with")?
                .iter()
                .map(With::from_json)
                .collect::<Result<_>>()?,
        };

        Ok(Expr {
            index: index as usize,
            negated,
            terms,
            with,
            location: None,
        })
    }
}

impl Body {
    pub fn to_json(&self) -> Result<Json> {
        Ok(Json::Array(self.iter().map(Expr::to_json).collect::<Result<_>>()?))
    }

    pub fn from_json(v: &Json) -> Result<Body> {
        let exprs = as_array(v, "body")?
            .iter()
            .map(Expr::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Body::new(exprs))
    }
}

impl Head {
    pub fn to_json(&self) -> Result<Json> {
        let mut obj = Map::new();
        if let Some(name) = self.name() {
            obj.insert("name".into(), Json::String(name.as_str().to_string()));
        }
        obj.insert("ref".into(), terms_to_json(self.reference.terms())?);
        if !self.args.is_empty() {
            obj.insert("args".into(), terms_to_json(&self.args)?);
        }
        if let Some(key) = &self.key {
            obj.insert("key".into(), key.to_json()?);
        }
        if let Some(value) = &self.value {
            obj.insert("value".into(), value.to_json()?);
        }
        if self.assign {
            obj.insert("assign".into(), Json::Bool(true));
        }
        Ok(Json::Object(obj))
    }

    pub fn from_json(v: &Json) -> Result<Head> {
        let obj = as_object(v, "head")?;
        let reference = match (obj.get("ref"), obj.get("name")) {
            (Some(r), _) => Ref::new(terms_from_json(r)?),
            (None, Some(Json::String(name))) => Ref::from_var(name),
            _ => bail!("ast: head is missing field `ref`"),
        };
        let opt_term = |name: &str| obj.get(name).map(Term::from_json).transpose();
        Ok(Head {
            reference,
            args: match obj.get("args") {
                Some(a) => terms_from_json(a)?,
                None => vec![],
            },
            key: opt_term("key")?,
            value: opt_term("value")?,
            assign: matches!(obj.get("assign"), Some(Json::Bool(true))),
            location: None,
        })
    }
}

impl Rule {
    pub fn to_json(&self) -> Result<Json> {
        let mut obj = Map::new();
        if self.default {
            obj.insert("default".into(), Json::Bool(true));
        }
        obj.insert("head".into(), self.head.to_json()?);
        obj.insert("body".into(), self.body.to_json()?);
        if let Some(e) = &self.r#else {
            obj.insert("else".into(), e.to_json()?);
        }
        Ok(Json::Object(obj))
    }

    pub fn from_json(v: &Json) -> Result<Rule> {
        let obj = as_object(v, "rule")?;
        Ok(Rule {
            default: matches!(obj.get("default"), Some(Json::Bool(true))),
            head: Head::from_json(field(obj, "head", "rule")?)?,
            body: Body::from_json(field(obj, "body", "rule")?)?,
            r#else: obj
                .get("else")
                .map(|e| Rule::from_json(e).map(Box::new))
                .transpose()?,
            location: None,
        })
    }
}

impl Import {
    pub fn to_json(&self) -> Result<Json> {
        let mut obj = Map::new();
        obj.insert("path".into(), self.path.to_json()?);
        if let Some(alias) = &self.alias {
            obj.insert("alias".into(), Json::String(alias.as_str().to_string()));
        }
        Ok(Json::Object(obj))
    }

    pub fn from_json(v: &Json) -> Result<Import> {
        let obj = as_object(v, "import")?;
        Ok(Import {
            path: Term::from_json(field(obj, "path", "import")?)?,
            alias: match obj.get("alias") {
                Some(Json::String(s)) => Some(Var::new(s.clone())),
                Some(other) => bail!("ast: unable to unmarshal import alias from {}", kind(other)),
                None => None,
            },
            location: None,
        })
    }
}

impl Package {
    pub fn to_json(&self) -> Result<Json> {
        Ok(json!({"path": terms_to_json(self.path.terms())?}))
    }

    pub fn from_json(v: &Json) -> Result<Package> {
        let obj = as_object(v, "package")?;
        Ok(Package {
            path: Ref::new(terms_from_json(field(obj, "path", "package")?)?),
            location: None,
        })
    }
}

impl Module {
    pub fn to_json(&self) -> Result<Json> {
        let mut obj = Map::new();
        obj.insert("package".into(), self.package.to_json()?);
        if !self.imports.is_empty() {
            let imports = self.imports.iter().map(Import::to_json).collect::<Result<_>>()?;
            obj.insert("imports".into(), Json::Array(imports));
        }
        if !self.rules.is_empty() {
            let rules = self.rules.iter().map(Rule::to_json).collect::<Result<_>>()?;
            obj.insert("rules".into(), Json::Array(rules));
        }
        if !self.annotations.is_empty() {
            obj.insert("annotations".into(), serde_json::to_value(&self.annotations)?);
        }
        Ok(Json::Object(obj))
    }

    pub fn from_json(v: &Json) -> Result<Module> {
        let obj = as_object(v, "module")?;
        let mut module = Module::new(Package::from_json(field(obj, "package", "module")?)?);
        if let Some(imports) = obj.get("imports") {
            module.imports = as_array(imports, "imports")?
                .iter()
                .map(Import::from_json)
                .collect::<Result<_>>()?;
        }
        if let Some(rules) = obj.get("rules") {
            module.rules = as_array(rules, "rules")?
                .iter()
                .map(Rule::from_json)
                .collect::<Result<_>>()?;
        }
        if let Some(annotations) = obj.get("annotations") {
            module.annotations = Vec::<Annotations>::deserialize(annotations)?;
        }
        Ok(module)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }

    pub fn from_json_str(s: &str) -> Result<Module> {
        Module::from_json(&serde_json::from_str(s)?)
    }
}

macro_rules! serde_via_json {
    ($($t:ty),*) => {
        $(
            impl Serialize for $t {
                fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
                    self.to_json().map_err(ser::Error::custom)?.serialize(serializer)
                }
            }

            impl<'de> Deserialize<'de> for $t {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
                    let v = Json::deserialize(deserializer)?;
                    <$t>::from_json(&v).map_err(de::Error::custom)
                }
            }
        )*
    };
}

serde_via_json!(Term, With, Expr, Body, Head, Rule, Import, Package, Module);

impl Serialize for Ref {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        terms_to_json(self.terms())
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let v = Json::deserialize(deserializer)?;
        terms_from_json(&v).map(Ref::new).map_err(de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct LocationJson {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    file: String,
    row: u32,
    col: u32,
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        LocationJson {
            file: self.file.to_string(),
            row: self.row,
            col: self.col,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let l = LocationJson::deserialize(deserializer)?;
        Ok(Location {
            file: Rc::from(l.file.as_str()),
            row: l.row,
            col: l.col,
            text: Rc::from(""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr_err(v: Json) -> String {
        Expr::from_json(&v).unwrap_err().to_string()
    }

    #[test]
    fn term_encoding() {
        let t = Term::object(vec![(Term::string("a"), Term::set(vec![Term::number(1i64)]))]);
        assert_eq!(
            t.to_json().unwrap(),
            json!({"type": "object", "value": [[
                {"type": "string", "value": "a"},
                {"type": "set", "value": [{"type": "number", "value": 1}]}
            ]]})
        );
        assert_eq!(Term::from_json(&t.to_json().unwrap()).unwrap(), t);
    }

    #[test]
    fn expr_field_validation() {
        let t = json!({"type": "boolean", "value": true});
        assert_eq!(
            expr_err(json!({"index": 0, "negated": "yes", "terms": t})),
            "ast: unable to unmarshal negated field with type: string (expected true or false)"
        );
        assert_eq!(
            expr_err(json!({"index": "0", "terms": t})),
            "ast: unable to unmarshal index field with type: string (expected integer)"
        );
        assert_eq!(
            expr_err(json!({"index": 0, "terms": "x"})),
            "ast: unable to unmarshal terms field with type: string (expected {\"value\": ..., \"type\": ...} or [{\"value\": ..., \"type\": ...}, ...])"
        );
        assert_eq!(
            expr_err(json!({"index": 0, "terms": {"type": "bogus", "value": 1}})),
            "ast: unable to unmarshal term"
        );
    }

    #[test]
    fn expr_shapes() {
        let mut e = Expr::equality(Term::var("x"), Term::number(1i64));
        e.negated = true;
        e.with.push(With::new(
            Term::reference(Ref::from_var("input")),
            Term::object(vec![]),
        ));
        let v = e.to_json().unwrap();
        assert_eq!(v["negated"], json!(true));
        assert!(v["terms"].is_array());
        assert_eq!(Expr::from_json(&v).unwrap(), e);

        let single = Expr::from_term(Term::boolean(true)).to_json().unwrap();
        assert!(single["terms"].is_object());
        assert!(single.get("negated").is_none());
    }
}
