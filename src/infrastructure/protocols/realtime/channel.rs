//! Control channel router
//!
//! Pumps inbound channel signals, one at a time and in arrival order, to a
//! single consumer and sends outbound events once the channel is open.

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::EventId;
use crate::infrastructure::protocols::realtime::events::{ClientEvent, OutboundEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Raw text transport under the router (a data channel in production)
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;

    /// Close the transport; closing twice is harmless
    async fn close(&self);
}

/// What the transport reports upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Open,
    Message(String),
    Closed,
}

/// A negotiated but not yet routed control channel
pub struct ControlLink {
    pub transport: Arc<dyn ControlTransport>,
    pub signals: mpsc::UnboundedReceiver<ChannelSignal>,
}

impl ControlLink {
    pub fn new(
        transport: Arc<dyn ControlTransport>,
        signals: mpsc::UnboundedReceiver<ChannelSignal>,
    ) -> Self {
        Self { transport, signals }
    }
}

impl std::fmt::Debug for ControlLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLink").finish_non_exhaustive()
    }
}

/// Routes events over one session's control channel
pub struct ControlChannelRouter {
    transport: Arc<dyn ControlTransport>,
    pump: JoinHandle<()>,
    open: bool,
    closed: bool,
}

impl ControlChannelRouter {
    /// Start delivering the link's signals to `deliver`.
    ///
    /// Signals are forwarded strictly in order; `deliver` must not block.
    pub fn open<F>(link: ControlLink, deliver: F) -> Self
    where
        F: Fn(ChannelSignal) + Send + 'static,
    {
        let ControlLink {
            transport,
            mut signals,
        } = link;

        let pump = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let last = signal == ChannelSignal::Closed;
                deliver(signal);
                if last {
                    break;
                }
            }
        });

        Self {
            transport,
            pump,
            open: false,
            closed: false,
        }
    }

    /// Record that the remote end is ready for traffic
    pub fn mark_open(&mut self) {
        if !self.closed {
            self.open = true;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.closed
    }

    /// Serialize and transmit one event.
    ///
    /// Returns `Ok(None)` when the channel is not open: the event is logged
    /// and dropped, never buffered.
    pub async fn send(&self, event: ClientEvent) -> Result<Option<EventId>> {
        if !self.is_open() {
            warn!(event = event.kind(), "Control channel not open, dropping event");
            return Ok(None);
        }

        let outbound = OutboundEvent::new(event);
        let text = outbound
            .to_json()
            .map_err(|e| CallError::Channel(format!("Failed to encode event: {}", e)))?;

        self.transport.send_text(text).await?;
        debug!(event_id = %outbound.event_id, event = outbound.event.kind(), "Sent control event");
        Ok(Some(outbound.event_id))
    }

    /// Stop routing and close the transport
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.open = false;
        self.pump.abort();
        self.transport.close().await;
    }
}

impl Drop for ControlChannelRouter {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        closes: Mutex<u32>,
    }

    #[async_trait]
    impl ControlTransport for RecordingTransport {
        async fn send_text(&self, text: String) -> Result<()> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let (_tx, rx) = unbounded_channel();
        let mut router = ControlChannelRouter::open(ControlLink::new(transport.clone(), rx), |_| {});

        let result = router.send(ClientEvent::continue_response()).await.unwrap();
        assert!(result.is_none());
        assert!(transport.sent.lock().unwrap().is_empty());

        router.mark_open();
        let id = router.send(ClientEvent::continue_response()).await.unwrap();
        assert!(id.is_some());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(id.unwrap().as_str()));
    }

    #[tokio::test]
    async fn test_signals_are_delivered_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let (tx, rx) = unbounded_channel();
        let (out_tx, mut out_rx) = unbounded_channel();

        let _router = ControlChannelRouter::open(ControlLink::new(transport, rx), move |signal| {
            let _ = out_tx.send(signal);
        });

        tx.send(ChannelSignal::Open).unwrap();
        for i in 0..5 {
            tx.send(ChannelSignal::Message(i.to_string())).unwrap();
        }

        assert_eq!(out_rx.recv().await, Some(ChannelSignal::Open));
        for i in 0..5 {
            assert_eq!(out_rx.recv().await, Some(ChannelSignal::Message(i.to_string())));
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = Arc::new(RecordingTransport::default());
        let (_tx, rx) = unbounded_channel();
        let mut router = ControlChannelRouter::open(ControlLink::new(transport.clone(), rx), |_| {});
        router.mark_open();

        router.close().await;
        router.close().await;

        assert_eq!(*transport.closes.lock().unwrap(), 1);
        assert!(!router.is_open());
        assert!(router.send(ClientEvent::continue_response()).await.unwrap().is_none());
    }
}
