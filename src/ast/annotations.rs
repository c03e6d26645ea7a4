// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::impl_structural_eq;
use crate::ast::policy::Module;
use crate::ast::term::*;
use crate::*;

use alloc::collections::BTreeMap;
use core::fmt;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationScope {
    Rule,
    Document,
    Package,
    Subpackages,
}

impl AnnotationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationScope::Rule => "rule",
            AnnotationScope::Document => "document",
            AnnotationScope::Package => "package",
            AnnotationScope::Subpackages => "subpackages",
        }
    }

    /// True for scopes that attach to a package statement.
    pub fn targets_package(&self) -> bool {
        matches!(self, AnnotationScope::Package | AnnotationScope::Subpackages)
    }
}

impl fmt::Display for AnnotationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AnnotationScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<AnnotationScope> {
        Ok(match s {
            "rule" => AnnotationScope::Rule,
            "document" => AnnotationScope::Document,
            "package" => AnnotationScope::Package,
            "subpackages" => AnnotationScope::Subpackages,
            _ => bail!("invalid annotation scope '{s}'. Use one of 'rule', 'document', 'package', or 'subpackages'"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelatedResource {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Author {
    /// Parses `Jane Doe <jane@example.com>`. The email part is optional.
    pub fn parse(s: &str) -> Result<Author> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let (name_parts, email) = match parts.split_last() {
            Some((last, rest)) if last.starts_with('<') && last.ends_with('>') && last.len() > 2 => {
                (rest, Some(last[1..last.len() - 1].to_string()))
            }
            _ => (parts.as_slice(), None),
        };
        let name = name_parts.join(" ");
        let name = if name.is_empty() { None } else { Some(name) };
        if name.is_none() && email.is_none() {
            bail!("author is an empty string");
        }
        Ok(Author { name, email })
    }
}

/// Binds a document path to a schema. Exactly one of `schema` and
/// `definition` is set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaAnnotation {
    pub path: Ref,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<JsonDefinition>,
}

/// Inline schema document. Compared by its canonical text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonDefinition(pub serde_json::Value);

impl_structural_eq!(JsonDefinition, s => s.0.to_string());

/// Structured metadata attached to a package or rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Annotations {
    pub scope: AnnotationScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_resources: Vec<RelatedResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<SchemaAnnotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, JsonDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl_structural_eq!(Annotations, s => (
    s.scope,
    &s.title,
    &s.description,
    &s.organizations,
    &s.related_resources,
    &s.authors,
    &s.schemas,
    &s.custom,
));

impl Annotations {
    pub fn new(scope: AnnotationScope) -> Annotations {
        Annotations {
            scope,
            title: None,
            description: None,
            organizations: vec![],
            related_resources: vec![],
            authors: vec![],
            schemas: vec![],
            custom: BTreeMap::new(),
            location: None,
        }
    }

    /// Renders the annotation as the YAML payload of a `# METADATA` block.
    pub fn to_yaml(&self) -> Result<String> {
        let mut map = serde_yaml::Mapping::new();
        let mut put = |k: &str, v: serde_yaml::Value| {
            map.insert(serde_yaml::Value::String(k.to_string()), v);
        };
        put("scope", self.scope.as_str().into());
        if let Some(title) = &self.title {
            put("title", title.as_str().into());
        }
        if let Some(description) = &self.description {
            put("description", description.as_str().into());
        }
        if !self.organizations.is_empty() {
            put("organizations", serde_yaml::to_value(&self.organizations)?);
        }
        if !self.related_resources.is_empty() {
            put("related_resources", serde_yaml::to_value(&self.related_resources)?);
        }
        if !self.authors.is_empty() {
            put("authors", serde_yaml::to_value(&self.authors)?);
        }
        if !self.schemas.is_empty() {
            let mut schemas = vec![];
            for s in &self.schemas {
                let mut entry = serde_yaml::Mapping::new();
                let value = match (&s.schema, &s.definition) {
                    (Some(schema), _) => serde_yaml::Value::String(schema.to_string()),
                    (None, Some(definition)) => {
                        let mut m = serde_yaml::Mapping::new();
                        m.insert("definition".into(), json_to_yaml(&definition.0));
                        serde_yaml::Value::Mapping(m)
                    }
                    (None, None) => bail!("schema annotation for `{}` has neither schema nor definition", s.path),
                };
                entry.insert(serde_yaml::Value::String(s.path.to_string()), value);
                schemas.push(serde_yaml::Value::Mapping(entry));
            }
            put("schemas", serde_yaml::Value::Sequence(schemas));
        }
        if !self.custom.is_empty() {
            let custom = self
                .custom
                .iter()
                .map(|(k, v)| (serde_yaml::Value::String(k.clone()), json_to_yaml(&v.0)))
                .collect();
            put("custom", serde_yaml::Value::Mapping(custom));
        }
        Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(map))?)
    }
}

// Numbers are carried over by value; serde_json's arbitrary precision
// numbers do not serialize into other formats directly.
fn json_to_yaml(v: &serde_json::Value) -> serde_yaml::Value {
    match v {
        serde_json::Value::Null => serde_yaml::Value::Null,
        serde_json::Value::Bool(b) => serde_yaml::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                u.into()
            } else {
                n.as_f64().map(serde_yaml::Value::from).unwrap_or(serde_yaml::Value::Null)
            }
        }
        serde_json::Value::String(s) => serde_yaml::Value::String(s.clone()),
        serde_json::Value::Array(a) => serde_yaml::Value::Sequence(a.iter().map(json_to_yaml).collect()),
        serde_json::Value::Object(o) => serde_yaml::Value::Mapping(
            o.iter()
                .map(|(k, v)| (serde_yaml::Value::String(k.clone()), json_to_yaml(v)))
                .collect(),
        ),
    }
}

/// Shape of a `# METADATA` block before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawAnnotations {
    pub scope: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub organizations: Vec<String>,
    pub related_resources: Vec<serde_yaml::Value>,
    pub authors: Vec<serde_yaml::Value>,
    pub schemas: Vec<BTreeMap<String, serde_yaml::Value>>,
    pub custom: BTreeMap<String, serde_yaml::Value>,
}

impl RawAnnotations {
    pub(crate) fn from_yaml(text: &str) -> Result<RawAnnotations> {
        if text.trim().is_empty() {
            return Ok(RawAnnotations::default());
        }
        serde_yaml::from_str(text).map_err(|e| anyhow!("yaml: {e}"))
    }

    /// Validates the block. `default_scope` comes from the statement the
    /// block precedes; `parse_ref` turns schema paths into references.
    pub(crate) fn into_annotations(
        self,
        default_scope: AnnotationScope,
        parse_ref: &mut dyn FnMut(&str) -> Result<Ref>,
    ) -> Result<Annotations> {
        let scope = match &self.scope {
            Some(s) => s.parse()?,
            None => default_scope,
        };
        let mut a = Annotations::new(scope);
        a.title = self.title;
        a.description = self.description;
        a.organizations = self.organizations;

        for r in self.related_resources {
            a.related_resources.push(parse_related_resource(r)?);
        }
        for author in self.authors {
            a.authors.push(parse_author(author)?);
        }
        for entry in self.schemas {
            for (path, value) in entry {
                a.schemas.push(parse_schema_annotation(&path, value, parse_ref)?);
            }
        }
        for (k, v) in self.custom {
            a.custom.insert(k, JsonDefinition(serde_json::to_value(&v)?));
        }
        Ok(a)
    }
}

fn check_url(s: &str) -> Result<()> {
    url::Url::parse(s).map_err(|e| anyhow!("invalid related-resource URL `{s}`: {e}"))?;
    Ok(())
}

fn parse_related_resource(v: serde_yaml::Value) -> Result<RelatedResource> {
    match v {
        serde_yaml::Value::String(s) => {
            check_url(&s)?;
            Ok(RelatedResource {
                reference: s,
                description: None,
            })
        }
        serde_yaml::Value::Mapping(_) => {
            let r: RelatedResource =
                serde_yaml::from_value(v).map_err(|e| anyhow!("invalid related-resource definition: {e}"))?;
            check_url(&r.reference)?;
            Ok(r)
        }
        _ => bail!("invalid related-resource definition"),
    }
}

fn parse_author(v: serde_yaml::Value) -> Result<Author> {
    match v {
        serde_yaml::Value::String(s) => Author::parse(&s),
        serde_yaml::Value::Mapping(_) => {
            let a: Author = serde_yaml::from_value(v).map_err(|e| anyhow!("invalid author definition: {e}"))?;
            if a.name.is_none() && a.email.is_none() {
                bail!("author must have a name or an email");
            }
            Ok(a)
        }
        _ => bail!("invalid author definition"),
    }
}

fn parse_schema_annotation(
    path: &str,
    value: serde_yaml::Value,
    parse_ref: &mut dyn FnMut(&str) -> Result<Ref>,
) -> Result<SchemaAnnotation> {
    let path_ref = parse_ref(path).map_err(|e| anyhow!("invalid schema path `{path}`: {e}"))?;
    match path_ref.head_var().map(|v| v.as_str()) {
        Some(DEFAULT_ROOT_DOCUMENT) | Some(INPUT_ROOT_DOCUMENT) => (),
        _ => bail!("schema path must start with `{INPUT_ROOT_DOCUMENT}` or `{DEFAULT_ROOT_DOCUMENT}`: {path}"),
    }
    match value {
        serde_yaml::Value::String(s) => {
            let schema = parse_ref(&s).map_err(|e| anyhow!("invalid schema reference `{s}`: {e}"))?;
            if schema.head_var().map(|v| v.as_str()) != Some(SCHEMA_ROOT_DOCUMENT) {
                bail!("schema reference must start with `{SCHEMA_ROOT_DOCUMENT}`: {s}");
            }
            Ok(SchemaAnnotation {
                path: path_ref,
                schema: Some(schema),
                definition: None,
            })
        }
        serde_yaml::Value::Mapping(m) => match m.get("definition") {
            Some(d) if m.len() == 1 => Ok(SchemaAnnotation {
                path: path_ref,
                schema: None,
                definition: Some(JsonDefinition(serde_json::to_value(d)?)),
            }),
            _ => bail!("schema annotation for `{path}` must be a reference or a `definition` map"),
        },
        _ => bail!("schema annotation for `{path}` must be a reference or a `definition` map"),
    }
}

/// Statement an annotation block applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationTarget {
    Package,
    Rule(usize),
}

impl Module {
    /// Determines the statement each annotation applies to from its
    /// position: a block attaches to the first package or rule that starts
    /// after it. Annotations without a location fall back to their scope.
    pub fn annotation_target(&self, a: &Annotations) -> Option<AnnotationTarget> {
        let Some(loc) = &a.location else {
            return if a.scope.targets_package() {
                Some(AnnotationTarget::Package)
            } else {
                None
            };
        };
        let row_of = |l: &Option<Location>| l.as_ref().map(|l| l.row).unwrap_or(0);
        if row_of(&self.package.location) > loc.row {
            return Some(AnnotationTarget::Package);
        }
        self.rules
            .iter()
            .position(|r| row_of(&r.location) > loc.row)
            .map(AnnotationTarget::Rule)
    }

    pub fn package_annotations(&self) -> impl Iterator<Item = &Annotations> {
        self.annotations
            .iter()
            .filter(|a| self.annotation_target(a) == Some(AnnotationTarget::Package))
    }

    pub fn rule_annotations(&self, rule: usize) -> impl Iterator<Item = &Annotations> {
        self.annotations
            .iter()
            .filter(move |a| self.annotation_target(a) == Some(AnnotationTarget::Rule(rule)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ref(s: &str) -> Result<Ref> {
        Ok(Ref::from_path(s))
    }

    #[test]
    fn parses_authors() {
        let a = Author::parse("Jane Doe <jane@example.com>").unwrap();
        assert_eq!(a.name.as_deref(), Some("Jane Doe"));
        assert_eq!(a.email.as_deref(), Some("jane@example.com"));
        let a = Author::parse("<ops@example.com>").unwrap();
        assert_eq!(a.name, None);
        assert!(Author::parse("   ").is_err());
    }

    #[test]
    fn converts_raw_block() {
        let raw = RawAnnotations::from_yaml(
            "title: Allow\nrelated_resources:\n- https://example.com\nschemas:\n- input: schema.input\ncustom:\n  severity: high\n",
        )
        .unwrap();
        let a = raw.into_annotations(AnnotationScope::Rule, &mut parse_ref).unwrap();
        assert_eq!(a.scope, AnnotationScope::Rule);
        assert_eq!(a.title.as_deref(), Some("Allow"));
        assert_eq!(a.schemas[0].path, Ref::from_path("input"));
        assert_eq!(a.schemas[0].schema, Some(Ref::from_path("schema.input")));
        assert_eq!(a.custom["severity"].0, serde_json::json!("high"));
    }

    #[test]
    fn rejects_bad_scope_and_urls() {
        let raw = RawAnnotations::from_yaml("scope: everything\n").unwrap();
        assert!(raw.into_annotations(AnnotationScope::Rule, &mut parse_ref).is_err());
        let raw = RawAnnotations::from_yaml("related_resources:\n- not a url\n").unwrap();
        assert!(raw.into_annotations(AnnotationScope::Rule, &mut parse_ref).is_err());
    }

    #[test]
    fn yaml_output_reparses() {
        let mut a = Annotations::new(AnnotationScope::Package);
        a.description = Some("shared helpers".to_string());
        a.schemas.push(SchemaAnnotation {
            path: Ref::from_path("input.user"),
            schema: None,
            definition: Some(JsonDefinition(serde_json::json!({"type": "string"}))),
        });
        let text = a.to_yaml().unwrap();
        let back = RawAnnotations::from_yaml(&text)
            .unwrap()
            .into_annotations(AnnotationScope::Rule, &mut parse_ref)
            .unwrap();
        assert_eq!(a, back);
    }
}
