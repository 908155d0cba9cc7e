//! Named GraphQL request templates, loaded once and shared read-only.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CatalogError;

/// A named GraphQL document plus the variables sent with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub variables: BTreeMap<String, sonic_rs::Value>,
}

impl RequestTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: sonic_rs::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// Read-only set of request templates, keyed by name. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    templates: Arc<Vec<RequestTemplate>>,
}

impl QueryCatalog {
    pub fn new(templates: Vec<RequestTemplate>) -> Result<Self, CatalogError> {
        for (i, template) in templates.iter().enumerate() {
            if templates[..i].iter().any(|t| t.name == template.name) {
                return Err(CatalogError::Duplicate(template.name.clone()));
            }
        }
        Ok(Self {
            templates: Arc::new(templates),
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let templates: Vec<RequestTemplate> =
            sonic_rs::from_str(&content).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        info!("Loaded {} queries from {:?}", templates.len(), path);

        Self::new(templates)
    }

    /// Introspection queries every GraphQL server answers.
    pub fn builtin() -> Self {
        warn!("Using built-in introspection queries");
        Self {
            templates: Arc::new(vec![
                RequestTemplate::new("typename", "{ __typename }"),
                RequestTemplate::new("schema_types", "query { __schema { types { name } } }"),
            ]),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RequestTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
