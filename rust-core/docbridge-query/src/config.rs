// SPDX-License-Identifier: PMPL-1.0-or-later
//! Translator configuration.
//!
//! Defaults follow the document store's conventions:
//! - identifier field: `_id`
//! - writes affect every matching document
//! - results decode as plain documents (`typeMap`)
//! - sorting on `natural` means storage order (`$natural`)

use bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Configuration for the query translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Field whose clause values go through identifier normalization.
    pub id_field: String,
    /// Default for the `multiple` write option when the caller sets none.
    pub multiple_by_default: bool,
    /// Result decoding hints attached to every find and aggregate.
    pub type_map: Document,
    /// Sort column name that maps to the store's `$natural` order.
    pub natural_sort_column: String,
}

impl TranslatorConfig {
    /// Check the configuration for values the translator cannot work with.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.id_field.trim().is_empty() {
            return Err(QueryError::InvalidConfig(
                "id_field must not be empty".to_string(),
            ));
        }
        if self.id_field.starts_with('$') {
            return Err(QueryError::InvalidConfig(format!(
                "id_field {:?} must not start with '$'",
                self.id_field
            )));
        }
        if self.natural_sort_column.is_empty() {
            return Err(QueryError::InvalidConfig(
                "natural_sort_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            id_field: "_id".to_string(),
            multiple_by_default: true,
            type_map: doc! { "root": "document", "document": "document" },
            natural_sort_column: "natural".to_string(),
        }
    }
}
