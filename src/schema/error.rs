// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::errors::{Error, ErrorKind};

/// Failures while turning a JSON Schema into a [`crate::Type`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unable to merge these schemas")]
    Merge,

    #[error("unable to compile the schema: remote reference loading disabled: {url}")]
    RemoteDisabled { url: String },

    #[error("unable to compile the schema: no fetcher configured for remote reference: {url}")]
    NoFetcher { url: String },

    #[error("unable to compile the schema: deadline exceeded while fetching {url}")]
    DeadlineExceeded { url: String },

    #[error("unable to compile the schema: failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("unable to compile the schema: invalid reference {reference}: {reason}")]
    InvalidRef { reference: String, reason: String },

    #[error("unable to compile the schema: unresolved reference: {0}")]
    UnresolvedRef(String),

    #[error("unable to compile the schema: unknown type `{0}`")]
    UnknownType(String),

    #[error("unable to compile the schema: {0}")]
    Invalid(String),

    #[error("undefined schema: {0}")]
    UndefinedSchema(String),
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Error {
        Error::new(ErrorKind::TypeErr, err.to_string())
    }
}
