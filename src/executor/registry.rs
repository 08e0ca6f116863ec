//! Query Logic Registry
//!
//! Maps query logic names (e.g. "EventQuery") to the planner that handles them, so
//! the executor stays independent of any particular query language.

use super::collaborators::QueryPlanner;
use crate::error::{ExecutorError, Result};

use dashmap::DashMap;
use std::sync::Arc;

pub struct QueryLogicRegistry {
    planners: DashMap<String, Arc<dyn QueryPlanner>>,
}

impl QueryLogicRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            planners: DashMap::new(),
        })
    }

    /// Registers `planner` under `logic_name`, replacing any previous registration.
    pub fn register(&self, logic_name: &str, planner: Arc<dyn QueryPlanner>) {
        self.planners.insert(logic_name.to_string(), planner);
        tracing::info!("Registered query logic: {}", logic_name);
    }

    pub fn planner(&self, logic_name: &str) -> Result<Arc<dyn QueryPlanner>> {
        self.planners
            .get(logic_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecutorError::UnknownQueryLogic(logic_name.to_string()))
    }

    pub fn list_logics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .planners
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_logic(&self, logic_name: &str) -> bool {
        self.planners.contains_key(logic_name)
    }

    pub fn logic_count(&self) -> usize {
        self.planners.len()
    }
}

impl Default for QueryLogicRegistry {
    fn default() -> Self {
        Self {
            planners: DashMap::new(),
        }
    }
}
