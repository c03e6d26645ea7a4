// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Source rendering of trees. Output of a parsed module parses back into an
//! equal module.

use crate::ast::annotations::{AnnotationTarget, Annotations};
use crate::ast::policy::*;
use crate::ast::term::*;

use core::fmt::{self, Display, Formatter, Write};

fn write_joined<T: Display>(f: &mut Formatter<'_>, items: impl Iterator<Item = T>, sep: &str) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_string(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    match serde_json::to_string(s) {
        Ok(quoted) => f.write_str(&quoted),
        Err(_) => Err(fmt::Error),
    }
}

struct InlineBody<'a>(&'a Body);

impl Display for InlineBody<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_joined(f, self.0.iter(), "; ")
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write_string(f, s),
            Value::Var(v) => write!(f, "{v}"),
            Value::Ref(r) => write!(f, "{r}"),
            Value::Array(a) => {
                f.write_char('[')?;
                write_joined(f, a.iter(), ", ")?;
                f.write_char(']')
            }
            Value::Object(o) => {
                f.write_char('{')?;
                write_joined(f, o.iter().map(|(k, v)| format!("{k}: {v}")), ", ")?;
                f.write_char('}')
            }
            Value::Set(s) if s.is_empty() => f.write_str("set()"),
            Value::Set(s) => {
                f.write_char('{')?;
                write_joined(f, s.iter(), ", ")?;
                f.write_char('}')
            }
            Value::ArrayComprehension(c) => write!(f, "[{} | {}]", c.term, InlineBody(&c.body)),
            Value::ObjectComprehension(c) => {
                write!(f, "{{{}: {} | {}}}", c.key, c.value, InlineBody(&c.body))
            }
            Value::SetComprehension(c) => write!(f, "{{{} | {}}}", c.term, InlineBody(&c.body)),
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, t) in self.iter().enumerate() {
            match &t.value {
                _ if i == 0 => write!(f, "{t}")?,
                Value::String(s) if is_ref_safe_identifier(s) => write!(f, ".{s}")?,
                _ => write!(f, "[{t}]")?,
            }
        }
        Ok(())
    }
}

/// Infix spelling of a builtin operator.
pub(crate) fn infix_symbol(name: &str) -> Option<&'static str> {
    Some(match name {
        "eq" => "=",
        "assign" => ":=",
        "equal" => "==",
        "neq" => "!=",
        "lt" => "<",
        "lte" => "<=",
        "gt" => ">",
        "gte" => ">=",
        "plus" => "+",
        "minus" => "-",
        "mul" => "*",
        "div" => "/",
        "rem" => "%",
        "and" => "&",
        "or" => "|",
        MEMBER => "in",
        _ => return None,
    })
}

fn is_comparison(symbol: &str) -> bool {
    matches!(symbol, "=" | ":=" | "==" | "!=" | "<" | "<=" | ">" | ">=" | "in")
}

impl Display for Terms {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let terms = match self {
            Terms::Single(t) => return write!(f, "{t}"),
            Terms::Call(terms) => terms,
        };
        let Some((op, args)) = terms.split_first() else {
            return Ok(());
        };
        let name = match &op.value {
            Value::Var(v) => Some(v.as_str()),
            _ => None,
        };
        match (name.and_then(infix_symbol), args) {
            (Some(symbol), [a, b]) => write!(f, "{a} {symbol} {b}"),
            (Some(symbol), [a, b, out]) if !is_comparison(symbol) => {
                write!(f, "{out} = {a} {symbol} {b}")
            }
            (Some(symbol), [a, b, out]) => write!(f, "{out} = ({a} {symbol} {b})"),
            _ if name == Some(MEMBER_WITH_KEY) && args.len() == 3 => {
                write!(f, "{}, {} in {}", args[0], args[1], args[2])
            }
            _ => {
                write!(f, "{op}(")?;
                write_joined(f, args.iter(), ", ")?;
                f.write_char(')')
            }
        }
    }
}

impl Display for With {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "with {} as {}", self.target, self.value)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("not ")?;
        }
        write!(f, "{}", self.terms)?;
        for w in &self.with {
            write!(f, " {w}")?;
        }
        Ok(())
    }
}

impl Display for Body {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", InlineBody(self))
    }
}

impl Display for Head {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if !self.args.is_empty() {
            f.write_char('(')?;
            write_joined(f, self.args.iter(), ", ")?;
            f.write_char(')')?;
        }
        let assign = if self.assign { ":=" } else { "=" };
        match (&self.key, &self.value) {
            (Some(key), None) => write!(f, " contains {key}"),
            (Some(key), Some(value)) => write!(f, "[{key}] {assign} {value}"),
            (None, Some(value)) => write!(f, " {assign} {value}"),
            (None, None) => Ok(()),
        }
    }
}

fn write_block(f: &mut Formatter<'_>, body: &Body) -> fmt::Result {
    f.write_str(" if {\n")?;
    for e in body.iter() {
        writeln!(f, "\t{e}")?;
    }
    f.write_char('}')
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.default {
            return write!(f, "default {}", self.head);
        }
        write!(f, "{}", self.head)?;
        let chained = self.r#else.is_some();
        if chained || !self.body.is_truthy() {
            write_block(f, &self.body)?;
        }
        let mut next = self.r#else.as_deref();
        while let Some(e) = next {
            f.write_str(" else")?;
            if let Some(value) = &e.head.value {
                let assign = if e.head.assign { ":=" } else { "=" };
                write!(f, " {assign} {value}")?;
            }
            write_block(f, &e.body)?;
            next = e.r#else.as_deref();
        }
        Ok(())
    }
}

impl Display for Import {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "import {}", self.path)?;
        if let Some(alias) = &self.alias {
            write!(f, " as {alias}")?;
        }
        Ok(())
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut terms = self.path.terms().iter().skip(1);
        let Some(first) = terms.next() else {
            return f.write_str("package");
        };
        let head = match &first.value {
            Value::String(s) => Term::var(s),
            _ => first.clone(),
        };
        let mut path = vec![head];
        path.extend(terms.cloned());
        write!(f, "package {}", Ref::new(path))
    }
}

fn write_annotations(f: &mut Formatter<'_>, a: &Annotations) -> fmt::Result {
    let yaml = a.to_yaml().map_err(|_| fmt::Error)?;
    f.write_str("# METADATA\n")?;
    for line in yaml.lines() {
        writeln!(f, "# {line}")?;
    }
    Ok(())
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for a in self.package_annotations() {
            write_annotations(f, a)?;
        }
        writeln!(f, "{}", self.package)?;

        if !self.imports.is_empty() {
            f.write_char('\n')?;
            for i in &self.imports {
                writeln!(f, "{i}")?;
            }
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            f.write_char('\n')?;
            for a in self.annotations.iter() {
                if self.annotation_target(a) == Some(AnnotationTarget::Rule(idx)) {
                    write_annotations(f, a)?;
                }
            }
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_refs() {
        let r = Ref::new(vec![
            Term::var("data"),
            Term::string("a"),
            Term::string("foo-bar"),
            Term::var("x"),
            Term::number(1i64),
            Term::string("if"),
        ]);
        assert_eq!(r.to_string(), r#"data.a["foo-bar"][x][1]["if"]"#);
    }

    #[test]
    fn renders_values() {
        assert_eq!(Term::set(vec![]).to_string(), "set()");
        assert_eq!(Term::object(vec![]).to_string(), "{}");
        assert_eq!(
            Term::object(vec![(Term::string("a"), Term::array(vec![Term::null()]))]).to_string(),
            r#"{"a": [null]}"#
        );
        assert_eq!(Term::string("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(Term::var("$0").to_string(), "_");
    }

    #[test]
    fn renders_calls_infix() {
        let e = Expr::call(
            Term::var("plus"),
            vec![Term::var("x"), Term::number(1i64), Term::var("y")],
        );
        assert_eq!(e.to_string(), "y = x + 1");
        let e = Expr::call(Term::var("count"), vec![Term::var("xs"), Term::var("n")]);
        assert_eq!(e.to_string(), "count(xs, n)");
        let mut e = Expr::call(Term::var(MEMBER), vec![Term::var("x"), Term::var("xs")]);
        e.negated = true;
        assert_eq!(e.to_string(), "not x in xs");
    }

    #[test]
    fn renders_rules() {
        let mut head = Head::new("p");
        head.value = Some(Term::number(1i64));
        head.assign = true;
        let rule = Rule {
            default: false,
            head,
            body: Body::new(vec![Expr::equality(Term::var("x"), Term::number(2i64))]),
            r#else: None,
            location: None,
        };
        assert_eq!(rule.to_string(), "p := 1 if {\n\tx = 2\n}");

        let mut head = Head::new("q");
        head.key = Some(Term::var("x"));
        assert_eq!(head.to_string(), "q contains x");
    }

    #[test]
    fn renders_package_without_root() {
        let pkg = Package {
            path: Ref::from_path("data.a.b"),
            location: None,
        };
        assert_eq!(pkg.to_string(), "package a.b");
    }
}
