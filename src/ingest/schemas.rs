//! Static metadata schemas every ingested record is tagged with.
//!
//! The set is fixed at compile time, validated once on first access and
//! read-only afterwards.

use std::collections::HashSet;
use std::sync::OnceLock;

use thiserror::Error;

/// Namespace prefix shared by every schema this importer registers.
pub const BASE_NAMESPACE: &str = "http://mytardis.org/schemas/atom-import";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Dataset,
    Datafile,
}

impl SchemaType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::Dataset => "dataset",
            SchemaType::Datafile => "datafile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub namespace: &'static str,
    pub name: &'static str,
    pub kind: SchemaType,
    pub subtype: &'static str,
    pub identifier: &'static str,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema registry is empty")]
    Empty,

    #[error("Schema #{index} has an empty {field}")]
    Incomplete { index: usize, field: &'static str },

    #[error("Schema namespace '{0}' is outside {base}", base = BASE_NAMESPACE)]
    ForeignNamespace(String),

    #[error("Schema namespace '{0}' is declared twice")]
    DuplicateNamespace(String),

    #[error("No {} schema is registered", .0.as_str())]
    MissingType(SchemaType),
}

const DESCRIPTORS: &[SchemaDescriptor] = &[
    SchemaDescriptor {
        namespace: "http://mytardis.org/schemas/atom-import/dataset",
        name: "Atom Dataset",
        kind: SchemaType::Dataset,
        subtype: "atom",
        identifier: "atom-dataset",
    },
    SchemaDescriptor {
        namespace: "http://mytardis.org/schemas/atom-import/datafile",
        name: "Atom Datafile",
        kind: SchemaType::Datafile,
        subtype: "atom",
        identifier: "atom-datafile",
    },
];

static REGISTRY: OnceLock<Result<Vec<SchemaDescriptor>, SchemaError>> = OnceLock::new();

/// The process-wide schema set, validated on first call.
pub fn registry() -> Result<&'static [SchemaDescriptor], SchemaError> {
    let loaded = REGISTRY.get_or_init(|| {
        validate(DESCRIPTORS)?;
        Ok(DESCRIPTORS.to_vec())
    });
    match loaded {
        Ok(schemas) => Ok(schemas.as_slice()),
        Err(e) => Err(e.clone()),
    }
}

/// Checks a schema set is usable: non-empty, every field populated, every
/// namespace under [`BASE_NAMESPACE`] and unique, and both record types
/// the persister tags covered.
pub fn validate(schemas: &[SchemaDescriptor]) -> Result<(), SchemaError> {
    if schemas.is_empty() {
        return Err(SchemaError::Empty);
    }

    let mut namespaces = HashSet::new();
    for (index, schema) in schemas.iter().enumerate() {
        let fields = [
            ("namespace", schema.namespace),
            ("name", schema.name),
            ("subtype", schema.subtype),
            ("identifier", schema.identifier),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(SchemaError::Incomplete {
                index,
                field: *field,
            });
        }
        if !schema.namespace.starts_with(BASE_NAMESPACE) {
            return Err(SchemaError::ForeignNamespace(schema.namespace.to_string()));
        }
        if !namespaces.insert(schema.namespace) {
            return Err(SchemaError::DuplicateNamespace(schema.namespace.to_string()));
        }
    }

    for kind in [SchemaType::Dataset, SchemaType::Datafile] {
        if !schemas.iter().any(|s| s.kind == kind) {
            return Err(SchemaError::MissingType(kind));
        }
    }

    Ok(())
}
