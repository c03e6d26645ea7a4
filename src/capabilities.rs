// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Built-in declarations, root documents and keywords known to the parser,
//! the safety analyzer and the type checker.

use crate::ast::{DEFAULT_ROOT_DOCUMENT, INPUT_ROOT_DOCUMENT};
use crate::types::{DynamicProperty, Type};

use anyhow::Result;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinDecl {
    #[serde(default)]
    pub args: Vec<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Type>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builtin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infix: Option<String>,
    pub decl: BuiltinDecl,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        self.decl.args.len()
    }

    /// Operand position bound by the call, if the builtin produces a value.
    pub fn target_pos(&self) -> Option<usize> {
        self.decl.result.as_ref().map(|_| self.arity())
    }

    /// Argument types followed by the result type.
    pub fn signature(&self) -> Vec<Type> {
        let mut sig = self.decl.args.clone();
        sig.extend(self.decl.result.clone());
        sig
    }
}

fn default_root_documents() -> Vec<String> {
    vec![DEFAULT_ROOT_DOCUMENT.to_string(), INPUT_ROOT_DOCUMENT.to_string()]
}

fn default_keywords() -> Vec<String> {
    ["contains", "every", "if", "in"].iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub builtins: Vec<Builtin>,
    #[serde(default = "default_root_documents")]
    pub root_documents: Vec<String>,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Capabilities {
    pub fn from_json_str(s: &str) -> Result<Capabilities> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn builtin(&self, name: &str) -> Option<&Builtin> {
        self.builtins.iter().find(|b| b.name == name)
    }

    /// Builtin spelled with the infix operator `op`.
    pub fn infix(&self, op: &str) -> Option<&Builtin> {
        self.builtins.iter().find(|b| b.infix.as_deref() == Some(op))
    }

    pub fn is_root_document(&self, name: &str) -> bool {
        self.root_documents.iter().any(|r| r == name)
    }
}

impl Default for Capabilities {
    fn default() -> Capabilities {
        DEFAULT_CAPABILITIES.clone()
    }
}

fn decl(name: &str, infix: Option<&str>, args: Vec<Type>, result: Type) -> Builtin {
    Builtin {
        name: name.to_string(),
        infix: infix.map(|s| s.to_string()),
        decl: BuiltinDecl {
            args,
            result: Some(result),
        },
    }
}

fn any_object() -> Type {
    Type::new_object(
        vec![],
        Some(DynamicProperty {
            key: Type::any(),
            value: Type::any(),
        }),
    )
}

fn collection_of(t: Type) -> Type {
    Type::any_of(vec![Type::array_of(t.clone()), Type::set_of(t)])
}

fn default_builtins() -> Vec<Builtin> {
    use Type::{Boolean, Number, String};
    let any = Type::any;
    let compare = |name: &str, op: &str| decl(name, Some(op), vec![any(), any()], Boolean);
    let arith = |name: &str, op: &str| decl(name, Some(op), vec![Number, Number], Number);
    let set_op = |name: &str, op: &str| {
        decl(
            name,
            Some(op),
            vec![Type::set_of(any()), Type::set_of(any())],
            Type::set_of(any()),
        )
    };

    vec![
        compare("eq", "="),
        compare("assign", ":="),
        compare("equal", "=="),
        compare("neq", "!="),
        compare("lt", "<"),
        compare("lte", "<="),
        compare("gt", ">"),
        compare("gte", ">="),
        arith("plus", "+"),
        decl(
            "minus",
            Some("-"),
            vec![
                Type::any_of(vec![Number, Type::set_of(any())]),
                Type::any_of(vec![Number, Type::set_of(any())]),
            ],
            Type::any_of(vec![Number, Type::set_of(any())]),
        ),
        arith("mul", "*"),
        arith("div", "/"),
        arith("rem", "%"),
        set_op("and", "&"),
        set_op("or", "|"),
        decl("internal.member_2", Some("in"), vec![any(), any()], Boolean),
        decl("internal.member_3", Some("in"), vec![any(), any(), any()], Boolean),
        decl(
            "count",
            None,
            vec![Type::any_of(vec![
                String,
                Type::array_of(any()),
                any_object(),
                Type::set_of(any()),
            ])],
            Number,
        ),
        decl("sum", None, vec![collection_of(Number)], Number),
        decl("max", None, vec![collection_of(any())], any()),
        decl("min", None, vec![collection_of(any())], any()),
        decl("concat", None, vec![String, collection_of(String)], String),
        decl("startswith", None, vec![String, String], Boolean),
        decl("endswith", None, vec![String, String], Boolean),
        decl("contains", None, vec![String, String], Boolean),
        decl("lower", None, vec![String], String),
        decl("upper", None, vec![String], String),
        decl("sprintf", None, vec![String, Type::array_of(any())], String),
        decl(
            "to_number",
            None,
            vec![Type::any_of(vec![Type::Null, Boolean, Number, String])],
            Number,
        ),
        decl("json.marshal", None, vec![any()], String),
        decl("json.unmarshal", None, vec![String], any()),
        decl("is_string", None, vec![any()], Boolean),
        decl("is_number", None, vec![any()], Boolean),
        decl("object.get", None, vec![any_object(), any(), any()], any()),
        decl(
            "array.concat",
            None,
            vec![Type::array_of(any()), Type::array_of(any())],
            Type::array_of(any()),
        ),
        decl(
            "walk",
            None,
            vec![any()],
            Type::new_array(vec![Type::array_of(any()), any()], None),
        ),
        decl("trace", None, vec![String], Boolean),
    ]
}

lazy_static! {
    pub static ref DEFAULT_CAPABILITIES: Capabilities = Capabilities {
        builtins: default_builtins(),
        root_documents: default_root_documents(),
        keywords: default_keywords(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_positions() {
        let caps = Capabilities::default();
        let count = caps.builtin("count").unwrap();
        assert_eq!(count.arity(), 1);
        assert_eq!(count.target_pos(), Some(1));
        assert_eq!(count.signature().len(), 2);
        assert_eq!(caps.infix("+").map(|b| b.name.as_str()), Some("plus"));
        assert!(caps.builtin("no.such.builtin").is_none());
    }

    #[test]
    fn loads_from_json() {
        let caps = Capabilities::from_json_str(
            r#"{"builtins": [{"name": "f", "decl": {"args": [{"type": "string"}], "result": {"type": "number"}}}]}"#,
        )
        .unwrap();
        assert_eq!(caps.builtin("f").and_then(|b| b.target_pos()), Some(1));
        assert!(caps.is_root_document("input"));
        assert!(caps.keywords.iter().any(|k| k == "contains"));
    }

    #[test]
    fn json_round_trip() {
        let caps = Capabilities::default();
        let text = serde_json::to_string(&caps).unwrap();
        assert_eq!(Capabilities::from_json_str(&text).unwrap(), caps);
    }
}
