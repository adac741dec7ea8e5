use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// The unit of dissemination.
pub type Value = i64;

pub type NodeId = String;

/// Every request a node serves. Anything else is rejected at decode time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// A single value to record and disseminate.
    Broadcast { message: Value },
    /// Several values addressed to one node in a single message.
    BroadcastBatch { message: Vec<Value> },
    /// Asks for every value the node knows about.
    Read,
    /// The full cluster adjacency map. Only the receiver's own entry is used.
    Topology {
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
}

impl Request {
    pub const TYPES: [&'static str; 4] =
        ["broadcast", "broadcast_batch", "read", "topology"];

    /// Decodes a raw message body into one of the four request shapes.
    ///
    /// Bodies without a `type` and bodies with a type this node doesn't serve
    /// are reported separately from bodies whose fields don't match.
    pub fn decode(body: Json) -> Result<Self> {
        let kind = body
            .get("type")
            .and_then(Json::as_str)
            .ok_or(Error::MissingType)?;
        if !Self::TYPES.contains(&kind) {
            return Err(Error::Unsupported(kind.to_owned()));
        }
        Ok(serde_json::from_value(body)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    BroadcastOk,
    BroadcastBatchOk,
    ReadOk { messages: Vec<Value> },
    TopologyOk,
    InitOk,
    Error { code: u32, text: String },
}

impl From<&Error> for Reply {
    fn from(error: &Error) -> Self {
        Reply::Error {
            code: error.code(),
            text: error.to_string(),
        }
    }
}

/// A message body: the payload plus the correlation ids the transport uses
/// to pair requests with replies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body<P> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: P,
}

/// One line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message<B> {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: B,
}

/// What a single pending delivery carries to one neighbor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

impl Payload {
    pub fn values(&self) -> &[Value] {
        match self {
            Payload::Single(value) => std::slice::from_ref(value),
            Payload::Batch(values) => values,
        }
    }
}

impl From<Payload> for Request {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Single(message) => Request::Broadcast { message },
            Payload::Batch(message) => Request::BroadcastBatch { message },
        }
    }
}
