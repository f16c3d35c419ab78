use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Channel, ChannelClass, ChannelOp, ChannelReply, HypervisorStatus, KeyEvent};
use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Keyboard,
}

/// In-process hypervisor object, as exposed to an agent running alongside it.
pub trait Hypervisor: Send + Sync {
    fn status(&self) -> HypervisorStatus;

    fn inject_input(&self, core_id: u32, device: DeviceClass, event: KeyEvent)
        -> Result<(), String>;

    /// Accumulated console text (e.g. the rendered terminal tile). `None` when the hypervisor does
    /// not expose console output itself.
    fn console_output(&self) -> Option<String>;
}

/// Late-bound reference to the hypervisor.
///
/// The emulator attaches itself once it is constructed; until then the direct channel probes as
/// unavailable.
#[derive(Clone, Default)]
pub struct HypervisorSlot {
    inner: Arc<RwLock<Option<Arc<dyn Hypervisor>>>>,
}

impl HypervisorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, hypervisor: Arc<dyn Hypervisor>) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hypervisor);
    }

    pub fn detach(&self) -> Option<Arc<dyn Hypervisor>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn get(&self) -> Option<Arc<dyn Hypervisor>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Calls the attached hypervisor directly.
pub struct HypervisorChannel {
    slot: HypervisorSlot,
    core_id: u32,
}

impl HypervisorChannel {
    pub const NAME: &'static str = "hypervisor";

    pub fn new(slot: HypervisorSlot) -> Self {
        Self { slot, core_id: 0 }
    }

    pub fn with_core(mut self, core_id: u32) -> Self {
        self.core_id = core_id;
        self
    }

    fn hypervisor(&self) -> Result<Arc<dyn Hypervisor>, ChannelError> {
        self.slot.get().ok_or_else(|| ChannelError::Invoke {
            channel: Self::NAME,
            message: "hypervisor detached".to_string(),
        })
    }
}

#[async_trait]
impl Channel for HypervisorChannel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, _class: ChannelClass) -> bool {
        self.slot.get().is_some()
    }

    async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
        let hypervisor = self.hypervisor()?;
        match op {
            ChannelOp::Status => Ok(ChannelReply::Status(hypervisor.status())),
            ChannelOp::Console => hypervisor
                .console_output()
                .map(ChannelReply::Console)
                .ok_or(ChannelError::Unsupported {
                    channel: Self::NAME,
                    op: "console",
                }),
            ChannelOp::Key(event) => hypervisor
                .inject_input(self.core_id, DeviceClass::Keyboard, event)
                .map(|()| ChannelReply::Delivered)
                .map_err(|message| ChannelError::Invoke {
                    channel: Self::NAME,
                    message,
                }),
        }
    }
}
