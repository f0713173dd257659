use crate::{DagError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage class of the payload a block points at.
pub const HOT_PAYLOAD: &str = "HOT_IPFS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub cid: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One immutable record of a project's chain.
///
/// Field order is the serialized order; the block cid is derived from these
/// bytes, so it must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagBlock {
    pub height: u64,
    #[serde(rename = "prevCid")]
    pub prev_cid: Option<String>,
    #[serde(rename = "data")]
    pub payload: PayloadRef,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    pub timestamp: i64,
}

impl DagBlock {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Finality details captured from an inbound signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub timestamp: i64,
    #[serde(rename = "snapshotCid")]
    pub snapshot_cid: String,
    #[serde(rename = "payloadCommitId")]
    pub payload_commit_id: String,
    #[serde(rename = "apiKeyHash")]
    pub api_key_hash: String,
    #[serde(rename = "tentativeBlockHeight")]
    pub tentative_block_height: u64,
}

/// Ledger entry for a transaction between commit and finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "requestID")]
    pub request_id: String,
    /// `0` pending, `-1` finality captured, `>0` height of the built block.
    #[serde(rename = "lastTouchedBlock")]
    pub last_touched_block: i64,
    #[serde(default)]
    pub event_data: Option<EventData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Pending,
    Touched,
    Finalized(u64),
}

pub const TOUCHED_MARKER: i64 = -1;

impl PendingTransaction {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            request_id: ulid::Ulid::new().to_string(),
            last_touched_block: 0,
            event_data: None,
        }
    }

    pub fn state(&self) -> LedgerState {
        match self.last_touched_block {
            0 => LedgerState::Pending,
            height if height > 0 => LedgerState::Finalized(height as u64),
            _ => LedgerState::Touched,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Payload of an inbound finality signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityCallbackData {
    #[serde(rename = "apiKeyHash")]
    pub api_key_hash: String,
    #[serde(rename = "tentativeBlockHeight")]
    pub tentative_block_height: u64,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "snapshotCid")]
    pub snapshot_cid: String,
    #[serde(rename = "payloadCommitId")]
    pub payload_commit_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityCallback {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub event_data: FinalityCallbackData,
}

impl FinalityCallback {
    pub fn to_event_data(&self) -> EventData {
        EventData {
            tx_hash: self.tx_hash.clone(),
            project_id: self.event_data.project_id.clone(),
            timestamp: self.event_data.timestamp,
            snapshot_cid: self.event_data.snapshot_cid.clone(),
            payload_commit_id: self.event_data.payload_commit_id.clone(),
            api_key_hash: self.event_data.api_key_hash.clone(),
            tentative_block_height: self.event_data.tentative_block_height,
        }
    }
}

/// Inbound signal, tagged by `event_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_name")]
pub enum FinalityEvent {
    RecordAppended(FinalityCallback),
    RecordDiscarded(FinalityCallback),
    #[serde(other)]
    Unrecognized,
}

impl FinalityEvent {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|error| DagError::InvalidEvent(error.to_string()))
    }
}

/// Trailing window sizes the indexer maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    Hour,
    Day,
    Week,
}

impl TimePeriod {
    /// Unknown labels fall back to one hour.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "24h" => Self::Day,
            "7d" => Self::Week,
            _ => Self::Hour,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::Day => "24h",
            Self::Week => "7d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
            Self::Week => 7 * 24 * 60 * 60,
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowMarker {
    pub head: u64,
    pub tail: u64,
}
