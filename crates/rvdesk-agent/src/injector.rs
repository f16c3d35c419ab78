use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::channel::{ChannelClass, ChannelOp, ChannelResolver, KeyEvent};
use crate::error::InjectionError;

/// Delay after each press and after each release, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pace {
    pub press_ms: u32,
    pub release_ms: u32,
}

impl Pace {
    pub const DEFAULT: Pace = Pace {
        press_ms: 50,
        release_ms: 50,
    };

    pub const fn press(&self) -> Duration {
        Duration::from_millis(self.press_ms as u64)
    }

    pub const fn release(&self) -> Duration {
        Duration::from_millis(self.release_ms as u64)
    }
}

impl Default for Pace {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionReport {
    pub channel: &'static str,
    /// Characters fully delivered (press and release).
    pub delivered: usize,
}

/// Types text into the guest one paced key event at a time.
///
/// Injections are serialized: a call made while another is in flight waits for it to finish
/// (FIFO), so characters from different commands never interleave.
pub struct InputInjector {
    resolver: Arc<ChannelResolver>,
    in_flight: Mutex<()>,
}

impl InputInjector {
    pub fn new(resolver: Arc<ChannelResolver>) -> Self {
        Self {
            resolver,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn inject_text(
        &self,
        text: &str,
        pace: Pace,
    ) -> Result<InjectionReport, InjectionError> {
        let _in_flight = self.in_flight.lock().await;
        self.deliver(text, pace).await
    }

    /// Like [`InputInjector::inject_text`], but fails with [`InjectionError::Busy`] instead of
    /// waiting behind an in-flight injection.
    pub async fn try_inject_text(
        &self,
        text: &str,
        pace: Pace,
    ) -> Result<InjectionReport, InjectionError> {
        let _in_flight = self
            .in_flight
            .try_lock()
            .map_err(|_| InjectionError::Busy)?;
        self.deliver(text, pace).await
    }

    async fn deliver(&self, text: &str, pace: Pace) -> Result<InjectionReport, InjectionError> {
        let channel = self
            .resolver
            .resolve(ChannelClass::Delivery)
            .map_err(|_| InjectionError::ChannelUnavailable)?;
        let total = text.chars().count();
        tracing::debug!(channel = channel.name(), chars = total, "injecting text");

        for (delivered, key) in text.chars().enumerate() {
            for (event, wait) in [
                (KeyEvent::press(key), pace.press()),
                (KeyEvent::release(key), pace.release()),
            ] {
                if let Err(source) = channel.invoke(ChannelOp::Key(event)).await {
                    tracing::warn!(
                        channel = channel.name(),
                        delivered,
                        total,
                        "key delivery failed: {source}"
                    );
                    return Err(InjectionError::PartialDelivery {
                        delivered,
                        total,
                        channel: channel.name(),
                        source,
                    });
                }
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Ok(InjectionReport {
            channel: channel.name(),
            delivered: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelReply};
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recording {
        events: StdMutex<Vec<KeyEvent>>,
        fail_on_press: Option<char>,
    }

    #[async_trait]
    impl Channel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn probe(&self, _class: ChannelClass) -> bool {
            true
        }

        async fn invoke(&self, op: ChannelOp) -> Result<ChannelReply, ChannelError> {
            let ChannelOp::Key(event) = op else {
                return Err(ChannelError::Unsupported {
                    channel: "recording",
                    op: "status",
                });
            };
            if event.pressed && Some(event.key) == self.fail_on_press {
                return Err(ChannelError::Invoke {
                    channel: "recording",
                    message: "device gone".to_string(),
                });
            }
            self.events.lock().unwrap().push(event);
            Ok(ChannelReply::Delivered)
        }
    }

    fn injector(channel: Arc<Recording>) -> InputInjector {
        InputInjector::new(Arc::new(ChannelResolver::new().with_channel(channel)))
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_press_release_pairs_in_order() {
        let channel = Arc::new(Recording::default());
        let report = injector(channel.clone())
            .inject_text("ab", Pace::DEFAULT)
            .await
            .unwrap();

        assert_eq!(
            report,
            InjectionReport {
                channel: "recording",
                delivered: 2
            }
        );
        assert_eq!(
            channel.events.lock().unwrap().as_slice(),
            &[
                KeyEvent::press('a'),
                KeyEvent::release('a'),
                KeyEvent::press('b'),
                KeyEvent::release('b'),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paces_every_event() {
        let channel = Arc::new(Recording::default());
        let start = tokio::time::Instant::now();
        injector(channel)
            .inject_text(
                "abc",
                Pace {
                    press_ms: 10,
                    release_ms: 30,
                },
            )
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(120) && elapsed < Duration::from_millis(130),
            "{elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_injections_do_not_interleave() {
        let channel = Arc::new(Recording::default());
        let injector = Arc::new(injector(channel.clone()));

        let first = tokio::spawn({
            let injector = injector.clone();
            async move { injector.inject_text("ab", Pace::DEFAULT).await }
        });
        let second = tokio::spawn({
            let injector = injector.clone();
            async move { injector.inject_text("xy", Pace::DEFAULT).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let keys: String = channel
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.pressed)
            .map(|e| e.key)
            .collect();
        assert!(keys == "abxy" || keys == "xyab", "interleaved: {keys}");
    }

    #[tokio::test(start_paused = true)]
    async fn try_inject_rejects_while_busy() {
        let channel = Arc::new(Recording::default());
        let injector = Arc::new(injector(channel));

        let long = tokio::spawn({
            let injector = injector.clone();
            async move { injector.inject_text("long", Pace::DEFAULT).await }
        });
        // Let the spawned injection take the in-flight lock.
        tokio::task::yield_now().await;

        assert!(matches!(
            injector.try_inject_text("x", Pace::DEFAULT).await,
            Err(InjectionError::Busy)
        ));
        long.await.unwrap().unwrap();
        injector.try_inject_text("x", Pace::DEFAULT).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reports_partial_delivery() {
        let channel = Arc::new(Recording {
            fail_on_press: Some('c'),
            ..Default::default()
        });
        let err = injector(channel.clone())
            .inject_text("abcd", Pace::DEFAULT)
            .await
            .unwrap_err();

        match err {
            InjectionError::PartialDelivery {
                delivered,
                total,
                channel: name,
                ..
            } => {
                assert_eq!((delivered, total, name), (2, 4, "recording"));
            }
            other => panic!("unexpected error {other}"),
        }
        // Nothing after the failure point was sent.
        assert_eq!(channel.events.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn fails_without_delivery_channel() {
        let injector = InputInjector::new(Arc::new(ChannelResolver::new()));
        assert!(matches!(
            injector.inject_text("a", Pace::DEFAULT).await,
            Err(InjectionError::ChannelUnavailable)
        ));
    }
}
