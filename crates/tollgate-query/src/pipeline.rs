//! Ordered processor pipeline of a dataset.

use tollgate_core::{DatasetDefinition, ProcessorSpec};
use tracing::debug;

use crate::error::Result;
use crate::processors::Processor;
use crate::query::Query;

/// The declared processors of a dataset, applied left to right
#[derive(Debug, Clone, Default)]
pub struct QueryPipeline {
    stages: Vec<Processor>,
}

impl QueryPipeline {
    pub fn new(stages: Vec<Processor>) -> Self {
        Self { stages }
    }

    /// Build every declared stage; the first invalid declaration fails the build
    pub fn build(specs: &[ProcessorSpec], definition: &DatasetDefinition) -> Result<Self> {
        let stages = specs
            .iter()
            .map(|spec| Processor::from_spec(spec, definition))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Fold the query through every stage.
    ///
    /// The query is taken by value and only a fully processed query is ever
    /// returned; on error the caller gets the error alone.
    pub fn apply(&self, query: Query) -> Result<Query> {
        self.stages.iter().try_fold(query, |query, stage| {
            debug!(processor = stage.name(), "Applying query processor");
            stage.process(query)
        })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Processor::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
