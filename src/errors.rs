// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Location;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    ParseErr,
    TypeErr,
    CompileErr,
    InternalErr,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ParseErr => "rego_parse_error",
            ErrorKind::TypeErr => "rego_type_error",
            ErrorKind::CompileErr => "rego_compile_error",
            ErrorKind::InternalErr => "rego_internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    /// Extra lines rendered below the message, such as expected and actual types.
    pub details: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            message: message.into(),
            location: None,
            details: vec![],
        }
    }

    pub fn with_location(mut self, location: Option<Location>) -> Error {
        self.location = location;
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Error {
        self.details = details;
        self
    }

    fn sort_key(&self) -> (Option<(&str, u32, u32)>, &str) {
        let loc = self.location.as_ref().map(|l| (l.file.as_ref(), l.row, l.col));
        (loc, self.message.as_str())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{loc}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        for d in &self.details {
            write!(f, "\n\t{d}")?;
        }
        Ok(())
    }
}

/// Diagnostics collected by a pass, ordered by location.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn new() -> Errors {
        Errors::default()
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: Errors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Error> {
        self.0.iter()
    }

    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// `Ok(value)` when nothing was collected.
    pub fn into_result<T>(mut self, value: T) -> Result<T, Errors> {
        if self.is_empty() {
            Ok(value)
        } else {
            self.sort();
            Err(self)
        }
    }
}

impl From<Error> for Errors {
    fn from(err: Error) -> Errors {
        Errors(vec![err])
    }
}

impl From<Vec<Error>> for Errors {
    fn from(errs: Vec<Error>) -> Errors {
        let mut errs = Errors(errs);
        errs.sort();
        errs
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = alloc::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no error(s)"),
            [e] => write!(f, "1 error occurred: {e}"),
            errs => {
                write!(f, "{} errors occurred:", errs.len())?;
                for e in errs {
                    write!(f, "\n{e}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_location() {
        let e = Error::new(ErrorKind::CompileErr, "var x is unsafe")
            .with_location(Some(Location::new("a.rego", 3, 5, "x")));
        assert_eq!(e.to_string(), "a.rego:3:5: rego_compile_error: var x is unsafe");

        let e = Error::new(ErrorKind::TypeErr, "match error").with_details(vec!["left: number".into()]);
        assert_eq!(e.to_string(), "rego_type_error: match error\n\tleft: number");
    }

    #[test]
    fn sorted_by_location() {
        let errs: Errors = vec![
            Error::new(ErrorKind::TypeErr, "b").with_location(Some(Location::new("f", 9, 1, ""))),
            Error::new(ErrorKind::TypeErr, "a").with_location(Some(Location::new("f", 2, 1, ""))),
        ]
        .into();
        let msgs: Vec<_> = errs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["a", "b"]);
        assert!(errs.to_string().starts_with("2 errors occurred:"));
        assert!(Errors::new().into_result(1).is_ok());
    }
}
