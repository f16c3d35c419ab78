//! Ranked status/delivery channels and the resolver that picks between them.
//!
//! The same guest can be reached several ways depending on where the agent runs: through the
//! remote tool bridge (agent outside the page), through a direct reference to the hypervisor
//! object (agent inside the page), or by pushing bytes straight into the SBI controller's input
//! queue. Each route is a [`Channel`]; the [`ChannelResolver`] walks them in priority order and
//! uses the first one whose probe succeeds.

mod bridge;
mod hypervisor;
mod queue;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use bridge::{
    pump_responses, RemoteToolBridge, ToolBridge, ToolBridgeChannel, ToolRequest, ToolResponse,
};
pub use hypervisor::{DeviceClass, Hypervisor, HypervisorChannel, HypervisorSlot};
pub use queue::ControllerQueueChannel;

/// Tool names understood by the remote bridge.
pub mod tools {
    pub const STATUS: &str = "hypervisor_status";
    pub const INPUT: &str = "hypervisor_input";
    pub const CONSOLE: &str = "hypervisor_console";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    /// Hypervisor status and console snapshots. Read-only.
    Status,
    /// Guest input.
    Delivery,
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelClass::Status => f.write_str("status"),
            ChannelClass::Delivery => f.write_str("delivery"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: char,
    pub pressed: bool,
}

impl KeyEvent {
    pub const fn press(key: char) -> Self {
        Self { key, pressed: true }
    }

    pub const fn release(key: char) -> Self {
        Self {
            key,
            pressed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    Status,
    Console,
    Key(KeyEvent),
}

impl ChannelOp {
    pub fn class(&self) -> ChannelClass {
        match self {
            ChannelOp::Status | ChannelOp::Console => ChannelClass::Status,
            ChannelOp::Key(_) => ChannelClass::Delivery,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelOp::Status => "status",
            ChannelOp::Console => "console",
            ChannelOp::Key(_) => "key",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelReply {
    Status(HypervisorStatus),
    Console(String),
    Delivered,
}

/// CPU snapshot fields reported by the hypervisor. Only `sepc` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuState {
    #[serde(default)]
    pub sepc: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reply shape of `hypervisor_status`: `{ state?, hypervisor?, error? }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypervisorStatus {
    #[serde(default)]
    pub state: Option<CpuState>,
    #[serde(default)]
    pub hypervisor: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HypervisorStatus {
    /// A hypervisor object exists or a CPU snapshot is available, and no error was reported.
    pub fn is_ready(&self) -> bool {
        self.error.is_none() && (self.hypervisor.is_some() || self.has_cpu_snapshot())
    }

    /// `state.sepc` present: the CPU has a runnable snapshot.
    pub fn has_cpu_snapshot(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.sepc.is_some())
    }
}

/// One route to the guest.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the channel can currently serve `class`. Must not have side effects.
    fn probe(&self, class: ChannelClass) -> bool;

    async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError>;
}

/// Priority-ordered channel lists for the status and delivery classes.
#[derive(Clone, Default)]
pub struct ChannelResolver {
    status: Vec<Arc<dyn Channel>>,
    delivery: Vec<Arc<dyn Channel>>,
}

impl fmt::Debug for ChannelResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelResolver")
            .field("status", &self.names(ChannelClass::Status))
            .field("delivery", &self.names(ChannelClass::Delivery))
            .finish()
    }
}

impl ChannelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `channel` at the lowest priority of both classes.
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.status.push(channel.clone());
        self.delivery.push(channel);
        self
    }

    pub fn with_status_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.status.push(channel);
        self
    }

    pub fn with_delivery_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.delivery.push(channel);
        self
    }

    /// Default ordering: remote bridge, then direct hypervisor reference, then raw controller
    /// queue. Absent routes are skipped.
    pub fn with_defaults(
        bridge: Option<Arc<dyn Channel>>,
        hypervisor: Option<Arc<dyn Channel>>,
        queue: Option<Arc<dyn Channel>>,
    ) -> Self {
        [bridge, hypervisor, queue]
            .into_iter()
            .flatten()
            .fold(Self::new(), Self::with_channel)
    }

    fn list(&self, class: ChannelClass) -> &[Arc<dyn Channel>] {
        match class {
            ChannelClass::Status => &self.status,
            ChannelClass::Delivery => &self.delivery,
        }
    }

    pub fn names(&self, class: ChannelClass) -> Vec<&'static str> {
        self.list(class).iter().map(|c| c.name()).collect()
    }

    /// First channel in `class` whose probe succeeds.
    pub fn resolve(&self, class: ChannelClass) -> Result<Arc<dyn Channel>, ChannelError> {
        self.list(class)
            .iter()
            .find(|c| c.probe(class))
            .cloned()
            .ok_or(ChannelError::Unavailable { class })
    }

    /// Runs a read-only operation, falling through to the next probed channel if one fails.
    async fn invoke_status(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
        let mut last_err = None;
        for channel in self.list(ChannelClass::Status) {
            if !channel.probe(ChannelClass::Status) {
                continue;
            }
            match channel.invoke(op.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    tracing::warn!(channel = channel.name(), op = op.name(), "{err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(ChannelError::Unavailable {
            class: ChannelClass::Status,
        }))
    }

    pub async fn query_status(&self) -> Result<HypervisorStatus, ChannelError> {
        match self.invoke_status(ChannelOp::Status).await? {
            ChannelReply::Status(status) => Ok(status),
            other => Err(unexpected_reply("status", other)),
        }
    }

    pub async fn console_snapshot(&self) -> Result<String, ChannelError> {
        match self.invoke_status(ChannelOp::Console).await? {
            ChannelReply::Console(output) => Ok(output),
            other => Err(unexpected_reply("console", other)),
        }
    }
}

fn unexpected_reply(op: &'static str, reply: ChannelReply) -> ChannelError {
    ChannelError::Invoke {
        channel: "resolver",
        message: format!("unexpected reply to {op}: {reply:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        available: AtomicBool,
        fail: bool,
        invoked: AtomicUsize,
        output: &'static str,
    }

    impl Fixed {
        fn new(name: &'static str, available: bool, fail: bool, output: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: AtomicBool::new(available),
                fail,
                invoked: AtomicUsize::new(0),
                output,
            })
        }
    }

    #[async_trait]
    impl Channel for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn probe(&self, _class: ChannelClass) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
            self.invoked.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChannelError::Invoke {
                    channel: self.name,
                    message: "boom".to_string(),
                });
            }
            Ok(match op {
                ChannelOp::Status => ChannelReply::Status(HypervisorStatus {
                    hypervisor: Some(serde_json::json!({ "name": self.name })),
                    ..Default::default()
                }),
                ChannelOp::Console => ChannelReply::Console(self.output.to_string()),
                ChannelOp::Key(_) => ChannelReply::Delivered,
            })
        }
    }

    #[test]
    fn resolve_picks_first_available_in_priority_order() {
        let bridge = Fixed::new("bridge", false, false, "");
        let direct = Fixed::new("direct", true, false, "");
        let queue = Fixed::new("queue", true, false, "");
        let resolver = ChannelResolver::with_defaults(
            Some(bridge.clone() as Arc<dyn Channel>),
            Some(direct.clone() as Arc<dyn Channel>),
            Some(queue as Arc<dyn Channel>),
        );

        assert_eq!(
            resolver.names(ChannelClass::Delivery),
            ["bridge", "direct", "queue"]
        );
        assert_eq!(
            resolver.resolve(ChannelClass::Delivery).unwrap().name(),
            "direct"
        );

        bridge.available.store(true, Ordering::SeqCst);
        assert_eq!(
            resolver.resolve(ChannelClass::Status).unwrap().name(),
            "bridge"
        );
        // Probing never invokes.
        assert_eq!(bridge.invoked.load(Ordering::SeqCst), 0);
        assert_eq!(direct.invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resolve_fails_when_nothing_probes() {
        let resolver = ChannelResolver::new().with_channel(Fixed::new("bridge", false, false, ""));
        assert!(matches!(
            resolver.resolve(ChannelClass::Delivery),
            Err(ChannelError::Unavailable {
                class: ChannelClass::Delivery
            })
        ));
        assert!(matches!(
            ChannelResolver::new().resolve(ChannelClass::Status),
            Err(ChannelError::Unavailable {
                class: ChannelClass::Status
            })
        ));
    }

    #[tokio::test]
    async fn status_reads_fall_back_past_failing_channel() {
        let broken = Fixed::new("bridge", true, true, "");
        let direct = Fixed::new("direct", true, false, "login: ");
        let resolver = ChannelResolver::new()
            .with_channel(broken.clone())
            .with_channel(direct);

        assert_eq!(resolver.console_snapshot().await.unwrap(), "login: ");
        assert_eq!(broken.invoked.load(Ordering::SeqCst), 1);

        let status = resolver.query_status().await.unwrap();
        assert!(status.is_ready());
    }

    #[tokio::test]
    async fn status_reads_report_last_error_when_all_fail() {
        let resolver = ChannelResolver::new().with_channel(Fixed::new("bridge", true, true, ""));
        let err = resolver.query_status().await.unwrap_err();
        assert!(matches!(err, ChannelError::Invoke { channel: "bridge", .. }));
    }

    #[test]
    fn status_readiness_rules() {
        let parsed: HypervisorStatus =
            serde_json::from_value(serde_json::json!({
                "state": { "sepc": "0x80200000", "pc": 1 }
            }))
            .unwrap();
        assert!(parsed.has_cpu_snapshot());
        assert!(parsed.is_ready());
        assert_eq!(parsed.state.unwrap().extra["pc"], 1);

        let errored: HypervisorStatus = serde_json::from_value(
            serde_json::json!({ "hypervisor": {}, "error": "not booted" }),
        )
        .unwrap();
        assert!(!errored.is_ready());

        let empty: HypervisorStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!empty.is_ready());

        let no_sepc: HypervisorStatus =
            serde_json::from_value(serde_json::json!({ "state": { "sepc": null } })).unwrap();
        assert!(!no_sepc.has_cpu_snapshot());
    }
}
