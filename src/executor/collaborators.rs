//! Planner and scanner seams.
//!
//! The executor only sees these traits. `RangePlanner` and `MemoryScanBackend` back
//! single-node deployments and tests with an in-process sorted table.

use crate::pool::types::Connection;
use crate::query::types::{Prediction, QueryPlan, ScanRange};
use crate::results::types::ResultEntry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, query: &str, authorizations: &[String]) -> anyhow::Result<QueryPlan>;

    async fn predict(&self, query: &str, authorizations: &[String])
    -> anyhow::Result<Vec<Prediction>>;
}

#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Opens a scan over `plan`, positioned just after `checkpoint` when one is given.
    async fn open(
        &self,
        connection: &Connection,
        plan: &QueryPlan,
        checkpoint: Option<&str>,
    ) -> anyhow::Result<Box<dyn ScanContext>>;
}

#[async_trait]
pub trait ScanContext: Send + Sync {
    /// `None` once the scan is exhausted.
    async fn next_batch(&mut self) -> anyhow::Result<Option<ScanBatch>>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    pub entries: Vec<ResultEntry>,
    /// Resume token: reopening at this checkpoint continues after the last entry.
    pub checkpoint: String,
}

// ---------------------------------------------------------------------------
// In-process implementations
// ---------------------------------------------------------------------------

/// Plans a query string of the form `start..end` (either side may be empty) into a
/// single range. Any other text scans the whole table.
#[derive(Debug, Default)]
pub struct RangePlanner {
    table: Option<Arc<MemoryScanBackend>>,
}

impl RangePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `predict` report how many rows the plan would touch.
    pub fn with_table(table: Arc<MemoryScanBackend>) -> Self {
        Self { table: Some(table) }
    }

    fn range_for(query: &str) -> ScanRange {
        match query.split_once("..") {
            Some((start, end)) => ScanRange {
                start: start.trim().to_string(),
                end: end.trim().to_string(),
            },
            None => ScanRange {
                start: String::new(),
                end: String::new(),
            },
        }
    }
}

#[async_trait]
impl QueryPlanner for RangePlanner {
    async fn plan(&self, query: &str, authorizations: &[String]) -> anyhow::Result<QueryPlan> {
        let mut plan = QueryPlan {
            ranges: vec![Self::range_for(query)],
            ..QueryPlan::default()
        };
        if !authorizations.is_empty() {
            plan.iterator_settings
                .insert("authorizations".to_string(), authorizations.join(","));
        }
        Ok(plan)
    }

    async fn predict(
        &self,
        query: &str,
        _authorizations: &[String],
    ) -> anyhow::Result<Vec<Prediction>> {
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };
        let range = Self::range_for(query);
        Ok(vec![Prediction {
            name: "rows".to_string(),
            value: table.count_in(&range) as f64,
        }])
    }
}

/// Sorted in-memory table scanned in fixed-size batches.
#[derive(Debug, Clone)]
pub struct MemoryScanBackend {
    rows: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    batch_size: usize,
}

impl MemoryScanBackend {
    pub fn new(batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            batch_size: batch_size.max(1),
        })
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(key.to_string(), value);
        }
    }

    pub fn count_in(&self, range: &ScanRange) -> usize {
        self.rows
            .read()
            .map(|rows| match bounds(range, None) {
                Some(window) => rows.range(window).count(),
                None => 0,
            })
            .unwrap_or(0)
    }

    fn slice(&self, range: &ScanRange, after: Option<&str>, limit: usize) -> Vec<ResultEntry> {
        self.rows
            .read()
            .map(|rows| {
                let Some(window) = bounds(range, after) else {
                    return Vec::new();
                };
                rows.range(window)
                    .take(limit)
                    .map(|(key, value)| ResultEntry {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Key window for `range`, resuming after `after`. `None` when the window is empty.
fn bounds(range: &ScanRange, after: Option<&str>) -> Option<(Bound<String>, Bound<String>)> {
    let lower = match after {
        Some(key) if key >= range.start.as_str() => Some(key),
        _ => None,
    };
    if !range.end.is_empty() {
        let floor = lower.unwrap_or(range.start.as_str());
        if floor >= range.end.as_str() {
            return None;
        }
    }

    let start = match lower {
        Some(key) => Bound::Excluded(key.to_string()),
        None if range.start.is_empty() => Bound::Unbounded,
        None => Bound::Included(range.start.clone()),
    };
    let end = if range.end.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(range.end.clone())
    };
    Some((start, end))
}

#[async_trait]
impl ScanBackend for MemoryScanBackend {
    async fn open(
        &self,
        connection: &Connection,
        plan: &QueryPlan,
        checkpoint: Option<&str>,
    ) -> anyhow::Result<Box<dyn ScanContext>> {
        tracing::debug!(
            "Opening scan over {} ranges on {} (checkpoint {:?})",
            plan.ranges.len(),
            connection.pool(),
            checkpoint
        );
        Ok(Box::new(MemoryScan {
            table: self.clone(),
            ranges: plan.ranges.clone(),
            position: checkpoint.and_then(Checkpoint::parse).unwrap_or_default(),
            closed: false,
        }))
    }
}

/// `<range index>|<last key>`
#[derive(Debug, Default, Clone)]
struct Checkpoint {
    range: usize,
    last_key: Option<String>,
}

impl Checkpoint {
    fn parse(text: &str) -> Option<Self> {
        let (range, key) = text.split_once('|')?;
        Some(Self {
            range: range.parse().ok()?,
            last_key: Some(key.to_string()),
        })
    }

    fn render(&self) -> String {
        format!("{}|{}", self.range, self.last_key.as_deref().unwrap_or(""))
    }
}

struct MemoryScan {
    table: MemoryScanBackend,
    ranges: Vec<ScanRange>,
    position: Checkpoint,
    closed: bool,
}

#[async_trait]
impl ScanContext for MemoryScan {
    async fn next_batch(&mut self) -> anyhow::Result<Option<ScanBatch>> {
        if self.closed {
            anyhow::bail!("scan already closed");
        }

        while let Some(range) = self.ranges.get(self.position.range) {
            let entries = self.table.slice(
                range,
                self.position.last_key.as_deref(),
                self.table.batch_size,
            );
            if let Some(last) = entries.last() {
                self.position.last_key = Some(last.key.clone());
                return Ok(Some(ScanBatch {
                    entries,
                    checkpoint: self.position.render(),
                }));
            }
            self.position = Checkpoint {
                range: self.position.range + 1,
                last_key: None,
            };
        }
        Ok(None)
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
