//! Subscriber sinks.
//!
//! A sink is the capability a subscriber hands to the engine. The engine
//! calls it from its own task, one sample at a time, so implementations
//! must not block.

use iio_core::IioSample;
use tokio::sync::mpsc;

use crate::error::ObserverError;

/// Receives a subscriber's samples and errors.
pub trait SampleSink: Send {
    /// A decimated sample containing exactly the subscriber's enabled channels.
    fn on_sample(&mut self, sample: IioSample);

    /// An error kind concerning this subscriber.
    fn on_error(&mut self, error: ObserverError);

    /// Whether the other end is gone. A closed sink is removed by the engine
    /// after the delivery that noticed it.
    fn is_closed(&self) -> bool {
        false
    }
}

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// An output sample
    Sample(IioSample),
    /// An error notification
    Error(ObserverError),
}

/// Sink forwarding into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

/// Receiving end of a [`ChannelSink`].
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::UnboundedReceiver<SinkEvent>,
}

/// Create a connected sink/receiver pair.
pub fn channel_sink() -> (ChannelSink, SinkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, SinkReceiver { rx })
}

impl SampleSink for ChannelSink {
    fn on_sample(&mut self, sample: IioSample) {
        let _ = self.tx.send(SinkEvent::Sample(sample));
    }

    fn on_error(&mut self, error: ObserverError) {
        let _ = self.tx.send(SinkEvent::Error(error));
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl SinkReceiver {
    /// Wait for the next event; `None` once the subscriber is gone.
    pub async fn recv(&mut self) -> Option<SinkEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SinkEvent> {
        self.rx.try_recv().ok()
    }

    /// Every event queued right now.
    pub fn drain(&mut self) -> Vec<SinkEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
