// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{anyhow, bail, Result};
use rego_ast::*;
use serde::{Deserialize, Serialize};
use test_generator::test_resources;

macro_rules! my_assert_eq {
    ($left:expr, $right:expr, $($arg:tt)+) => {
        match (&($left), &($right)) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    return Err(anyhow!("mismatch:\nleft  = {}\nright = {}\n{}",
                                       &$left, &$right, format_args!($($arg)+)));
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct TestCase {
    note: String,
    rego: String,
    package: Option<String>,
    imports: Option<Vec<String>>,
    rules: Option<Vec<String>>,
    error: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

fn check_module(case: &TestCase, module: &unstable::Module) -> Result<()> {
    if let Some(p) = &case.package {
        my_assert_eq!(module.package.to_string(), *p, "package mismatch");
    }

    if let Some(imports) = &case.imports {
        my_assert_eq!(module.imports.len(), imports.len(), "mismatch in number of imports");
        for (import, expected) in module.imports.iter().zip(imports) {
            my_assert_eq!(import.to_string(), *expected, "import mismatch");
        }
    }

    if let Some(rules) = &case.rules {
        my_assert_eq!(module.rules.len(), rules.len(), "mismatch in number of rules");
        for (rule, expected) in module.rules.iter().zip(rules) {
            my_assert_eq!(rule.to_string(), *expected, "rule mismatch");
        }
    }

    // Rendered source parses back into the same module.
    let text = module.to_string();
    let reparsed = parse_module("reparsed.rego", &text, &ParserOptions::default())
        .map_err(|e| anyhow!("rendered module does not parse:\n{text}\n{e}"))?;
    if reparsed != *module {
        bail!(
            "round trip mismatch:\n{}",
            prettydiff::diff_lines(&text, &reparsed.to_string())
        );
    }

    // So does its JSON form.
    let json = module.to_json_string()?;
    let decoded = unstable::Module::from_json_str(&json)?;
    if decoded != *module {
        bail!("json round trip mismatch:\n{json}");
    }
    Ok(())
}

fn yaml_test_impl(file: &str) -> Result<()> {
    println!("\nrunning {file}");

    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    for case in &test.cases {
        print!("\ncase {} ", case.note);
        match parse_module("case.rego", &case.rego, &ParserOptions::default()) {
            Ok(module) => {
                if let Some(e) = &case.error {
                    bail!("error `{}` not raised by parser.", e);
                }
                check_module(case, &module)?;
            }
            Err(actual) => match &case.error {
                Some(expected) => {
                    let actual = actual.to_string();
                    if !actual.contains(expected) {
                        bail!("Error message\n`{}\n`\ndoes not contain `{}`", actual, expected);
                    }
                    println!("{actual}");
                }
                _ => bail!("{actual}"),
            },
        }

        println!("passed");
    }

    println!("{} cases passed.", test.cases.len());
    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{}", e);
        }
    }
}

#[test_resources("tests/parser/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}
