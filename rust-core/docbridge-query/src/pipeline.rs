// SPDX-License-Identifier: PMPL-1.0-or-later
//! Aggregation pipeline model.

use std::fmt;

use bson::{Bson, Document};

/// One pipeline stage. Each renders to a single-key document.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    /// Path of the array to unwind, without the leading `$`.
    Unwind(String),
    Group(Document),
    Sort(Document),
    Skip(u64),
    Limit(u64),
    Project(Document),
}

impl Stage {
    /// The stage operator, e.g. `$match`.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
        }
    }

    pub fn to_document(&self) -> Document {
        let body = match self {
            Stage::Match(doc) | Stage::Group(doc) | Stage::Sort(doc) | Stage::Project(doc) => {
                Bson::Document(doc.clone())
            }
            Stage::Unwind(path) => Bson::String(format!("${path}")),
            Stage::Skip(n) | Stage::Limit(n) => as_i64(*n),
        };
        let mut doc = Document::new();
        doc.insert(self.name(), body);
        doc
    }
}

/// A count as `Int64`, clamped at `i64::MAX`.
pub(crate) fn as_i64(n: u64) -> Bson {
    Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX))
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage operator names in order, handy for logging and assertions.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Render every stage as a native document.
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}
