// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use rego_ast::unstable::*;
use rego_ast::*;

fn module(text: &str) -> Module {
    parse_module("safety.rego", text, &ParserOptions::default()).unwrap()
}

#[test]
fn bodies_are_reordered() {
    let m = check_safety(&module(
        r#"package test
p {
    y = x + 1
    x = input.a
}
"#,
    ))
    .unwrap();
    let body = &m.rules[0].body;
    assert_eq!(body.len(), 2);
    assert_eq!(body.exprs()[0].to_string(), "x = input.a");
    assert_eq!(body.exprs()[1].to_string(), "y = x + 1");
}

#[test]
fn unsafe_vars_are_reported() {
    let errors = check_safety(&module(
        r#"package test
p {
    x > 1
}
q {
    not r[y]
}
r[k] { k := input.k }
"#,
    ))
    .unwrap_err();

    let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["var x is unsafe", "var y is unsafe"]);
    assert!(errors.iter().all(|e| e.kind == ErrorKind::CompileErr));
    assert!(errors.iter().all(|e| e.location.is_some()));
}

#[test]
fn rules_and_imports_are_globals() {
    let m = module(
        r#"package test
import input.user
allowed := {"alice"}
p {
    allowed[user]
}
"#,
    );
    assert!(check_safety(&m).is_ok());
}

#[test]
fn output_vars() {
    let body = parse_body("x = 1; y = x; z > y", &ParserOptions::default()).unwrap();
    let outputs = output_vars_for_body(&body, &VarSet::new());
    let names: Vec<&str> = outputs.iter().map(|v| v.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);

    let (reordered, unsafe_vars) = reorder_body_for_safety(&body, &VarSet::new());
    assert_eq!(reordered.len(), 3);
    assert_eq!(unsafe_vars.keys().map(|v| v.as_str()).collect::<Vec<_>>(), vec!["z"]);
}
