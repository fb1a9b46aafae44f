//! The three message shapes exchanged with the host.
//!
//! On the wire every message is a MessagePack array whose first element is
//! the message kind:
//!
//! ````text
//! [0, id, method, args]     request
//! [1, id, error, result]    response
//! [2, method, args]         notification
//! ````

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;
use serde::de::SeqAccess;
use serde::de::Unexpected;
use serde::de::Visitor;
use serde_json::Value;

/// Correlation id for an outbound request. Allocated per session starting at
/// 1 and never reused.
pub type RequestId = u64;

const REQUEST: u8 = 0;
const RESPONSE: u8 = 1;
const NOTIFICATION: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
    Notification(RpcNotification),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: RequestId,
    pub error: Option<Value>,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: String,
    pub args: Vec<Value>,
}

impl RpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            error: None,
            result,
        }
    }

    pub fn failure(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(Value::String(message.into())),
            result: Value::Null,
        }
    }

    /// A response counts as failed when its error slot is anything but nil.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(err) => Some(describe_error(err)),
        }
    }
}

/// Hosts report errors either as a bare string or as `[code, message]`.
pub fn describe_error(err: &Value) -> String {
    match err {
        Value::String(message) => message.clone(),
        Value::Array(parts) => match parts.as_slice() {
            [_, Value::String(message)] => message.clone(),
            _ => err.to_string(),
        },
        other => other.to_string(),
    }
}

impl Serialize for RpcMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RpcMessage::Request(req) => (REQUEST, req.id, &req.method, &req.args).serialize(serializer),
            RpcMessage::Response(resp) => {
                (RESPONSE, resp.id, &resp.error, &resp.result).serialize(serializer)
            }
            RpcMessage::Notification(note) => {
                (NOTIFICATION, &note.method, &note.args).serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for RpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(MessageVisitor)
    }
}

struct MessageVisitor;

fn next_field<'de, A, T>(seq: &mut A, index: usize, visitor: &MessageVisitor) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, visitor))
}

impl<'de> Visitor<'de> for MessageVisitor {
    type Value = RpcMessage;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an rpc message array")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<RpcMessage, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let kind: u8 = next_field(&mut seq, 0, &self)?;
        match kind {
            REQUEST => Ok(RpcMessage::Request(RpcRequest {
                id: next_field(&mut seq, 1, &self)?,
                method: next_field(&mut seq, 2, &self)?,
                args: next_field(&mut seq, 3, &self)?,
            })),
            RESPONSE => Ok(RpcMessage::Response(RpcResponse {
                id: next_field(&mut seq, 1, &self)?,
                error: next_field(&mut seq, 2, &self)?,
                result: next_field(&mut seq, 3, &self)?,
            })),
            NOTIFICATION => Ok(RpcMessage::Notification(RpcNotification {
                method: next_field(&mut seq, 1, &self)?,
                args: next_field(&mut seq, 2, &self)?,
            })),
            other => Err(de::Error::invalid_value(
                Unexpected::Unsigned(u64::from(other)),
                &"a message kind of 0, 1 or 2",
            )),
        }
    }
}
