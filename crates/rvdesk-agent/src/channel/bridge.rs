use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};

use super::{tools, Channel, ChannelClass, ChannelOp, ChannelReply, HypervisorStatus};
use crate::error::{BridgeError, ChannelError};

/// Transport for `query(tool, args)` calls answered by a remote counterpart.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn query(&self, tool: &str, args: Value) -> Result<Value, BridgeError>;
}

#[async_trait]
impl<T: ToolBridge + ?Sized> ToolBridge for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn query(&self, tool: &str, args: Value) -> Result<Value, BridgeError> {
        (**self).query(tool, args).await
    }
}

/// Outbound half of a tool call, keyed by a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: u64,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Inbound answer to the [`ToolRequest`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
}

/// Request/response tool bridge.
///
/// Every call gets a fresh correlation id and parks a one-shot sender in the pending map. Requests
/// are handed to whoever owns the receiver returned by [`RemoteToolBridge::new`]; that side calls
/// [`RemoteToolBridge::resolve`] when the counterpart answers. Calls that are not answered within
/// the configured timeout are removed from the map and fail with [`BridgeError::Timeout`].
#[derive(Debug)]
pub struct RemoteToolBridge {
    outbound: mpsc::UnboundedSender<ToolRequest>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RemoteToolBridge {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<ToolRequest>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        };
        (bridge, rx)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    /// Fulfils the pending call with `response.id`.
    pub fn resolve(&self, response: ToolResponse) -> Result<(), BridgeError> {
        let tx = self
            .pending()
            .remove(&response.id)
            .ok_or(BridgeError::UnknownRequest(response.id))?;
        // The caller may have timed out between the lookup and now; nothing to do then.
        let _ = tx.send(response.result);
        Ok(())
    }
}

/// Feeds newline-delimited [`ToolResponse`] JSON from `reader` into `bridge` until end of input.
///
/// Lines that are not UTF-8 are decoded lossily. Lines that do not parse, or that answer no
/// pending call, are logged and skipped. Only a read error ends the pump early. Returns the number
/// of responses delivered.
pub async fn pump_responses<R>(mut reader: R, bridge: &RemoteToolBridge) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut delivered = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(delivered);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let resolved = serde_json::from_str::<ToolResponse>(line)
            .map_err(BridgeError::from)
            .and_then(|response| bridge.resolve(response));
        match resolved {
            Ok(()) => delivered += 1,
            Err(err) => tracing::warn!("dropping bridge response: {err}"),
        }
    }
}

#[async_trait]
impl ToolBridge for RemoteToolBridge {
    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    async fn query(&self, tool: &str, args: Value) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        let request = ToolRequest {
            id,
            tool: tool.to_string(),
            args,
        };
        if self.outbound.send(request).is_err() {
            self.pending().remove(&id);
            return Err(BridgeError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.pending().remove(&id);
                Err(BridgeError::Timeout {
                    tool: tool.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// [`Channel`] adapter over a [`ToolBridge`].
///
/// The bridge's `hypervisor_input` tool takes text and performs its own press/release, so key
/// presses are forwarded as single-character text and releases are acknowledged locally.
pub struct ToolBridgeChannel<B> {
    bridge: B,
}

impl<B: ToolBridge> ToolBridgeChannel<B> {
    pub const NAME: &'static str = "tool-bridge";

    pub fn new(bridge: B) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value, ChannelError> {
        let reply = self
            .bridge
            .query(tool, args)
            .await
            .map_err(|source| ChannelError::Bridge {
                channel: Self::NAME,
                source,
            })?;
        Ok(reply)
    }
}

fn tool_error(reply: &Value) -> Option<String> {
    match reply.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl<B: ToolBridge> Channel for ToolBridgeChannel<B> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, _class: ChannelClass) -> bool {
        self.bridge.is_connected()
    }

    async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
        match op {
            ChannelOp::Status => {
                let reply = self.call(tools::STATUS, json!({})).await?;
                let status: HypervisorStatus =
                    serde_json::from_value(reply).map_err(|err| ChannelError::Bridge {
                        channel: Self::NAME,
                        source: BridgeError::Decode(err),
                    })?;
                Ok(ChannelReply::Status(status))
            }
            ChannelOp::Console => {
                let reply = self.call(tools::CONSOLE, json!({})).await?;
                if let Some(message) = tool_error(&reply) {
                    return Err(ChannelError::Invoke {
                        channel: Self::NAME,
                        message,
                    });
                }
                let output = reply
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(ChannelReply::Console(output.to_string()))
            }
            ChannelOp::Key(event) if !event.pressed => Ok(ChannelReply::Delivered),
            ChannelOp::Key(event) => {
                let args = json!({
                    "type": "text",
                    "data": { "text": event.key.to_string() },
                });
                let reply = self.call(tools::INPUT, args).await?;
                match tool_error(&reply) {
                    Some(message) => Err(ChannelError::Invoke {
                        channel: Self::NAME,
                        message,
                    }),
                    None => Ok(ChannelReply::Delivered),
                }
            }
        }
    }
}
