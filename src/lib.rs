// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

extern crate alloc;

#[cfg(feature = "arc")]
pub(crate) use std::sync::Arc as Rc;

#[cfg(not(feature = "arc"))]
pub(crate) use std::rc::Rc;

mod ast;
mod capabilities;
mod errors;
mod lexer;
mod number;
mod parser;
mod safety;
mod schema;
mod transform;
mod type_checker;
mod type_env;
mod types;
mod visitor;

pub use capabilities::{Builtin, BuiltinDecl, Capabilities};
pub use errors::{Error, ErrorKind, Errors};
pub use number::Number;
pub use parser::{parse_body, parse_expr, parse_module, parse_ref, parse_statements, parse_term, ParserOptions, Statement};
pub use safety::{check_safety, output_vars_for_body, output_vars_for_expr, reorder_body_for_safety, SafetyChecker, UnsafeVars};
pub use schema::{SchemaError, SchemaFetcher, SchemaLoader, SchemaLoaderOptions, SchemaSet};
pub use type_checker::TypeChecker;
pub use type_env::{TypeEnv, TypeTree};
pub use types::{DynamicProperty, PropertyKey, StaticProperty, Type};

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::lexer::*;
    pub use crate::parser::*;
    pub use crate::transform::*;
    pub use crate::visitor::*;
}
