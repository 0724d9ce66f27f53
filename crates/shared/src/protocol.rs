//! Phoenix channel frames as spoken by the Realtime websocket endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    domain::{ChangeFilter, ChangeNotification},
    error::ProtocolError,
};

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const SYSTEM: &str = "system";

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const TOPIC_PREFIX: &str = "realtime:";
pub const PROTOCOL_VSN: &str = "1.0.0";

pub fn channel_topic(channel: &str) -> String {
    format!("{TOPIC_PREFIX}{channel}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresChangesFilter {
    pub event: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl From<&ChangeFilter> for PostgresChangesFilter {
    fn from(filter: &ChangeFilter) -> Self {
        Self {
            event: filter.event.clone(),
            schema: filter.schema.clone(),
            // The endpoint treats an omitted table as "every table".
            table: (!filter.is_wildcard_table()).then(|| filter.table.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct JoinPayload {
    config: JoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct JoinConfig {
    broadcast: Value,
    presence: Value,
    postgres_changes: Vec<PostgresChangesFilter>,
}

impl PhoenixFrame {
    pub fn join(
        topic: &str,
        filter: &ChangeFilter,
        access_token: Option<&str>,
        msg_ref: &str,
    ) -> Result<Self, ProtocolError> {
        let payload = JoinPayload {
            config: JoinConfig {
                broadcast: json!({ "ack": false, "self": false }),
                presence: json!({ "key": "" }),
                postgres_changes: vec![PostgresChangesFilter::from(filter)],
            },
            access_token: access_token.map(str::to_string),
        };
        Ok(Self {
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        })
    }

    pub fn leave(topic: &str, msg_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn classify(self) -> ChannelFrame {
        match self.event.as_str() {
            PHX_REPLY => ChannelFrame::Reply {
                msg_ref: self.msg_ref,
                status: self
                    .payload
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            POSTGRES_CHANGES => ChannelFrame::Change(change_from_payload(&self.payload)),
            PHX_ERROR => ChannelFrame::Error,
            PHX_CLOSE => ChannelFrame::Close,
            SYSTEM => ChannelFrame::System {
                status: string_field(&self.payload, "status"),
                message: string_field(&self.payload, "message"),
            },
            _ => ChannelFrame::Other(self.event),
        }
    }
}

/// What a decoded frame means to a single-channel subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    Reply {
        msg_ref: Option<String>,
        status: String,
    },
    Change(ChangeNotification),
    Error,
    Close,
    System {
        status: Option<String>,
        message: Option<String>,
    },
    Other(String),
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Field-by-field extraction so one bad field never drops the whole change.
fn change_from_payload(payload: &Value) -> ChangeNotification {
    let data = payload.get("data").unwrap_or(payload);
    ChangeNotification {
        event_kind: string_field(data, "type").or_else(|| string_field(data, "eventType")),
        schema_name: string_field(data, "schema"),
        table_name: string_field(data, "table"),
        before: data.get("old_record").cloned(),
        after: data.get("record").cloned(),
        commit_timestamp: string_field(data, "commit_timestamp"),
    }
}
