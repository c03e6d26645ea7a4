// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::env;

use anyhow::{anyhow, bail, Result};
use rego_ast::*;

#[test]
#[ignore = "checks the .rego file given on the command line"]
fn one_file() -> Result<()> {
    env_logger::init();

    let mut file = String::default();
    for a in env::args() {
        if a.ends_with(".rego") {
            file = a;
        }
    }

    if file.is_empty() {
        bail!("missing <policy.rego>");
    }

    let contents = std::fs::read_to_string(&file)?;
    let module = parse_module(&file, &contents, &ParserOptions::default()).map_err(|e| anyhow!("{e}"))?;
    let module = check_safety(&module).map_err(|e| anyhow!("{e}"))?;

    let root = TypeEnv::with_capabilities(&Capabilities::default());
    let mut checker = TypeChecker::new();
    checker.check_module(&root, &module);

    let errors = checker.into_errors();
    if !errors.is_empty() {
        bail!("{errors}");
    }

    println!("{module}");
    Ok(())
}
