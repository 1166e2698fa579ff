//! Static backend settings declared by the dataset.
//!
//! Values configured here win over anything the caller asked for, so a
//! dataset can pin limits such as `max_memory_usage` or
//! `group_by_overflow_mode` regardless of the request.

use super::QueryProcessor;
use crate::error::Result;
use crate::query::{Query, QuerySettings};

#[derive(Debug, Clone)]
pub struct ClickhouseSettingsOverride {
    settings: QuerySettings,
}

impl ClickhouseSettingsOverride {
    pub fn new(settings: QuerySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }
}

impl QueryProcessor for ClickhouseSettingsOverride {
    const NAME: &'static str = "ClickhouseSettingsOverride";

    fn process_query(&self, mut query: Query) -> Result<Query> {
        for (key, value) in &self.settings {
            query.set_setting(key.clone(), value.clone());
        }
        Ok(query)
    }
}
