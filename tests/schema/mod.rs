// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use rego_ast::*;

#[test]
fn definitions_and_refs() {
    let t = SchemaLoader::new(&SchemaLoaderOptions::default())
        .load_str(
            r##"{
                "$defs": {
                    "port": {"type": "integer"},
                    "address": {
                        "type": "object",
                        "properties": {
                            "host": {"type": "string"},
                            "port": {"$ref": "#/$defs/port"}
                        },
                        "additionalProperties": false
                    }
                },
                "type": "object",
                "properties": {
                    "primary": {"$ref": "#/$defs/address"},
                    "replicas": {"type": "array", "items": {"$ref": "#/$defs/address"}}
                },
                "additionalProperties": false
            }"##,
        )
        .unwrap();

    assert_eq!(
        t.to_string(),
        "object<primary: object<host: string, port: number>, replicas: array[object<host: string, port: number>]>"
    );
    assert_eq!(t.select(&PropertyKey::from("primary")).and_then(|p| p.keys()), Some(Type::String));
}

#[test]
fn loader_errors_become_type_errors() {
    let err = SchemaLoader::new(&SchemaLoaderOptions::default())
        .load_str(r##"{"$ref": "#/$defs/missing"}"##)
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnresolvedRef(_) | SchemaError::InvalidRef { .. }));

    let e: Error = err.into();
    assert_eq!(e.kind, ErrorKind::TypeErr);
    assert!(e.message.starts_with("unable to compile the schema"));
}

#[test]
fn remote_refs_without_fetcher() {
    let err = SchemaLoader::new(&SchemaLoaderOptions::default())
        .load_str(r#"{"$ref": "https://example.com/schemas/user.json"}"#)
        .unwrap_err();
    assert_eq!(
        err,
        SchemaError::NoFetcher {
            url: "https://example.com/schemas/user.json".to_string()
        }
    );
}
