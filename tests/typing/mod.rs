// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use rego_ast::unstable::*;
use rego_ast::*;

const REQUEST_SCHEMA: &str = r#"{
    "type": "object",
    "additionalProperties": false,
    "properties": {
        "user": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "name": {"type": "string"},
                "roles": {"type": "array", "items": {"type": "string"}}
            }
        }
    }
}"#;

fn module(file: &str, text: &str) -> Module {
    let m = parse_module(file, text, &ParserOptions::default()).unwrap();
    check_safety(&m).unwrap()
}

fn doc(env: &TypeEnv<'_>, path: &str) -> Option<String> {
    env.get(&Term::reference(Ref::from_path(path))).map(|t| t.to_string())
}

#[test]
fn package_schema_types_every_rule() {
    let m = module(
        "authz.rego",
        r#"# METADATA
# schemas:
#   - input: schema.request
package authz

allow {
    input.user.name == "alice"
    input.user.roles[_] == "admin"
}

deny {
    input.user.nmae == "bob"
}
"#,
    );

    let mut schemas = SchemaSet::new();
    schemas.put(
        Ref::from_path("schema.request"),
        serde_json::from_str(REQUEST_SCHEMA).unwrap(),
    );

    let root = TypeEnv::with_capabilities(&Capabilities::default());
    let mut checker = TypeChecker::new().with_schemas(&schemas);
    let env = checker.check_module(&root, &m);

    let errors: Vec<&Error> = checker.errors().iter().collect();
    assert_eq!(errors.len(), 1, "{}", checker.errors());
    assert_eq!(errors[0].message, "undefined ref: input.user.nmae");
    assert_eq!(errors[0].kind, ErrorKind::TypeErr);
    assert!(errors[0].to_string().contains("rego_type_error"));
    assert!(errors[0].location.is_some());

    assert_eq!(doc(&env, "data.authz.allow").as_deref(), Some("boolean"));
}

#[test]
fn rule_types_cross_modules() {
    let lib = module(
        "lib.rego",
        r#"package lib
names := ["a"]
double(x) = y { y := x * 2 }
"#,
    );
    let main = parse_module(
        "main.rego",
        r#"package main
n := count(data.lib.names)
first := data.lib.names[0]
twice := data.lib.double(n)
bad { data.lib.names.x }
"#,
        &ParserOptions::default(),
    )
    .unwrap();
    let main = SafetyChecker::new(&Capabilities::default())
        .with_function_arity("data.lib.double", 1)
        .check_module(&main)
        .unwrap();

    let root = TypeEnv::with_capabilities(&Capabilities::default());
    let mut checker = TypeChecker::new();
    let env = checker.check_modules(&root, &[lib, main]);

    let messages: Vec<&str> = checker.errors().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["undefined ref: data.lib.names.x"]);

    assert_eq!(doc(&env, "data.lib.names").as_deref(), Some("array<string>"));
    assert_eq!(doc(&env, "data.main.n").as_deref(), Some("number"));
    assert_eq!(doc(&env, "data.main.first").as_deref(), Some("string"));
    assert_eq!(doc(&env, "data.main.twice").as_deref(), Some("number"));
    assert_eq!(
        env.get_func("data.lib.double"),
        Some(&[Type::Number, Type::Number][..])
    );
}

#[test]
fn builtin_misuse() {
    let m = module(
        "misuse.rego",
        r#"package misuse
msg := upper(1)
total := sum(["a"])
"#,
    );
    let root = TypeEnv::with_capabilities(&Capabilities::default());
    let mut checker = TypeChecker::new();
    checker.check_module(&root, &m);

    let messages: Vec<&str> = checker.errors().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["upper: invalid argument(s)", "sum: invalid argument(s)"]);
}

#[test]
fn comprehensions_are_typed() {
    let body = parse_body(
        r#"xs := [1, 2, 3]; ys := [y | y := xs[_] * 2]; s := {k | k := "a"}"#,
        &ParserOptions::default(),
    )
    .unwrap();
    let root = TypeEnv::with_capabilities(&Capabilities::default());
    let mut checker = TypeChecker::new();
    let env = checker.check_body(&root, &body);
    assert!(checker.errors().is_empty(), "{}", checker.errors());
    assert_eq!(env.get(&Term::var("ys")), Some(Type::array_of(Type::Number)));
    assert_eq!(env.get(&Term::var("s")), Some(Type::set_of(Type::String)));
}
