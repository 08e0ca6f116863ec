use crate::query::types::QueryId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// One page of results produced by a NEXT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultPage {
    pub query_id: QueryId,
    /// 1-based, in publish order.
    pub page_number: u64,
    pub entries: Vec<ResultEntry>,
}

impl ResultPage {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What actually travels the channel: the encoded page, or a reference to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultEnvelope {
    Inline(Vec<u8>),
    ClaimCheck(ClaimCheckRef),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimCheckRef {
    pub reference: String,
    pub size: usize,
}
