//! Bounded buffer for messages published while disconnected.

use std::collections::VecDeque;

use tracing::{debug, warn};

use livewire_protocol::{Envelope, Frame};

use crate::error::ClientError;
use crate::pumps::write::FrameSink;

/// FIFO of pending outbound messages. When full, the oldest entry is
/// dropped to make room: the queue only bridges short outages.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends a message, returning the evicted oldest one if the queue was full.
    pub(crate) fn enqueue(&mut self, message: Envelope) -> Option<Envelope> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Hands every queued message to `writer` in order. A message leaves the
    /// queue only once written; on the first failure the rest stay queued for
    /// the next connection.
    pub(crate) async fn flush<W: FrameSink>(&mut self, writer: &mut W) -> Result<usize, ClientError> {
        let mut written = 0;
        while let Some(message) = self.items.front() {
            let frame = Frame::Application(message.clone());
            if let Err(e) = writer.write_frame(&frame).await {
                warn!(
                    written,
                    remaining = self.items.len(),
                    error = %e,
                    "flush interrupted, keeping remaining messages queued"
                );
                return Err(e);
            }
            self.items.pop_front();
            written += 1;
        }
        if written > 0 {
            debug!(written, "outbound queue flushed");
        }
        Ok(written)
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records written kinds and fails once `fail_after` writes succeeded.
    struct RecordingSink {
        written: Vec<String>,
        fail_after: Option<usize>,
    }

    impl FrameSink for RecordingSink {
        async fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
            if self.fail_after.is_some_and(|n| self.written.len() >= n) {
                return Err(ClientError::WriteTimeout);
            }
            self.written.push(frame.kind().to_string());
            Ok(())
        }
    }

    fn msg(kind: &str) -> Envelope {
        Envelope::new(kind, serde_json::Value::Null)
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = OutboundQueue::new(3);
        for kind in ["m1", "m2", "m3"] {
            assert!(q.enqueue(msg(kind)).is_none());
        }
        let evicted = q.enqueue(msg("m4")).unwrap();
        assert_eq!(evicted.kind, "m1");
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 1);

        let kinds: Vec<_> = q.items.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, ["m2", "m3", "m4"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut q = OutboundQueue::new(0);
        q.enqueue(msg("a"));
        q.enqueue(msg("b"));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn flush_writes_in_enqueue_order() {
        let mut q = OutboundQueue::new(10);
        for kind in ["first", "second", "third"] {
            q.enqueue(msg(kind));
        }
        let mut sink = RecordingSink {
            written: Vec::new(),
            fail_after: None,
        };
        assert_eq!(q.flush(&mut sink).await.unwrap(), 3);
        assert_eq!(sink.written, ["first", "second", "third"]);
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn failed_flush_keeps_unsent_messages() {
        let mut q = OutboundQueue::new(10);
        for kind in ["a", "b", "c", "d"] {
            q.enqueue(msg(kind));
        }
        let mut sink = RecordingSink {
            written: Vec::new(),
            fail_after: Some(2),
        };
        assert!(q.flush(&mut sink).await.is_err());
        assert_eq!(sink.written, ["a", "b"]);

        let mut sink = RecordingSink {
            written: Vec::new(),
            fail_after: None,
        };
        q.flush(&mut sink).await.unwrap();
        assert_eq!(sink.written, ["c", "d"]);
    }

    #[tokio::test]
    async fn flush_of_empty_queue_is_noop() {
        let mut q = OutboundQueue::new(5);
        let mut sink = RecordingSink {
            written: Vec::new(),
            fail_after: Some(0),
        };
        assert_eq!(q.flush(&mut sink).await.unwrap(), 0);
    }
}
