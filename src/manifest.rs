use crate::error::{Result, VibeError};
use serde::Deserialize;
use serde_yaml::Value;

/// A parsed multi-document manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    documents: Vec<Value>,
}

impl Manifest {
    /// Parses every `---`-separated document. Empty documents are dropped.
    ///
    /// # Errors
    ///
    /// Returns `ManifestParse` when any document is not valid YAML.
    pub fn parse(text: &str) -> Result<Self> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)
                .map_err(|e| VibeError::ManifestParse(e.to_string()))?;
            if !value.is_null() {
                documents.push(value);
            }
        }
        Ok(Self { documents })
    }

    #[must_use]
    pub fn documents(&self) -> &[Value] {
        &self.documents
    }

    /// `kind` of every mapping document, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.documents
            .iter()
            .filter_map(|doc| doc.get("kind").and_then(Value::as_str))
            .collect()
    }

    #[must_use]
    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds().iter().any(|k| k.eq_ignore_ascii_case(kind))
    }

    /// Canonical text: each document re-serialized, joined by `---`.
    ///
    /// # Errors
    ///
    /// Returns a YAML error if a document cannot be serialized.
    pub fn to_yaml(&self) -> Result<String> {
        let rendered = self
            .documents
            .iter()
            .map(serde_yaml::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rendered.join("---\n"))
    }
}
