//! Novelty notification (§4.8, §9 design note): cells newly marked
//! `Announced` are dispatched through a sink, not a callback captured by a
//! singleton, so tests can observe novelty without touching global state.

use lattice_data::Ref;

/// Receives refs as they transition to `Announced`.
pub trait NoveltySink {
    fn notify(&self, r: &Ref);
}

/// Discards every notification. The default for library use where nothing
/// is listening.
#[derive(Default)]
pub struct NoOpSink;

impl NoveltySink for NoOpSink {
    fn notify(&self, _r: &Ref) {}
}

/// Forwards every notification to an `mpsc` channel. Used by tests that
/// need to observe which cells were announced.
pub struct ChannelSink {
    sender: std::sync::mpsc::Sender<Ref>,
}

impl ChannelSink {
    pub fn new(sender: std::sync::mpsc::Sender<Ref>) -> Self {
        ChannelSink { sender }
    }
}

impl NoveltySink for ChannelSink {
    fn notify(&self, r: &Ref) {
        // A disconnected receiver just means nobody is listening anymore;
        // novelty notification is best-effort, not a delivery guarantee.
        let _ = self.sender.send(r.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_data::Cell;

    #[test]
    fn channel_sink_forwards_notifications() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = ChannelSink::new(tx);
        let r = Ref::new(Cell::Long(7));
        sink.notify(&r);
        let received = rx.recv().unwrap();
        assert_eq!(received, r);
    }
}
