use std::sync::MutexGuard;

use async_trait::async_trait;
use rvdesk_sbi::{SharedController, TimerConsoleController};
use serde_json::json;

use super::{Channel, ChannelClass, ChannelOp, ChannelReply, HypervisorStatus};
use crate::error::ChannelError;

/// Lowest-level route: pushes bytes straight into the SBI controller's input FIFO and reads its
/// console buffer.
///
/// Only key presses produce input; the guest consumes raw bytes through `console_getchar`, so a
/// release has nothing to deliver.
pub struct ControllerQueueChannel {
    controller: SharedController,
}

impl ControllerQueueChannel {
    pub const NAME: &'static str = "controller-queue";

    pub fn new(controller: SharedController) -> Self {
        Self { controller }
    }

    fn lock(&self) -> MutexGuard<'_, TimerConsoleController> {
        self.controller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Channel for ControllerQueueChannel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, _class: ChannelClass) -> bool {
        true
    }

    async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
        match op {
            ChannelOp::Status => {
                let ctl = self.lock();
                let timer = ctl.timer();
                Ok(ChannelReply::Status(HypervisorStatus {
                    hypervisor: Some(json!({
                        "channel": Self::NAME,
                        "timer_armed": timer.armed(),
                        "pending_input": ctl.pending_input(),
                        "output_len": ctl.output().len(),
                    })),
                    ..Default::default()
                }))
            }
            ChannelOp::Console => Ok(ChannelReply::Console(self.lock().snapshot_output())),
            ChannelOp::Key(event) => {
                if event.pressed {
                    let mut buf = [0u8; 4];
                    let mut ctl = self.lock();
                    for byte in event.key.encode_utf8(&mut buf).bytes() {
                        ctl.queue_input(byte);
                    }
                }
                Ok(ChannelReply::Delivered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::KeyEvent;
    use rvdesk_sbi::shared;

    #[tokio::test]
    async fn presses_queue_bytes_and_releases_do_not() {
        let controller = shared(TimerConsoleController::new());
        let channel = ControllerQueueChannel::new(controller.clone());

        for event in [
            KeyEvent::press('l'),
            KeyEvent::release('l'),
            KeyEvent::press('é'),
            KeyEvent::release('é'),
        ] {
            channel.invoke(ChannelOp::Key(event)).await.unwrap();
        }

        let mut ctl = controller.lock().unwrap();
        let queued: Vec<u8> = std::iter::from_fn(|| ctl.take_input()).collect();
        assert_eq!(queued, "lé".as_bytes());
    }

    #[tokio::test]
    async fn console_reads_controller_buffer() {
        let controller = shared(TimerConsoleController::new());
        for byte in b"~ # " {
            controller.lock().unwrap().push_output(*byte);
        }
        let channel = ControllerQueueChannel::new(controller);
        assert_eq!(
            channel.invoke(ChannelOp::Console).await.unwrap(),
            ChannelReply::Console("~ # ".to_string())
        );
        match channel.invoke(ChannelOp::Status).await.unwrap() {
            ChannelReply::Status(status) => assert!(status.is_ready()),
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
