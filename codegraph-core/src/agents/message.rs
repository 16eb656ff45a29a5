//! Point-to-point envelope agents use for direct replies, distinct from
//! knowledge-bus broadcasts (spec §4.1: "send/receive carry `AgentMessage`
//! records through the bus or point-to-point").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
