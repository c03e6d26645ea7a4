// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod check;
mod parser;
mod safety;
mod schema;
mod typing;
