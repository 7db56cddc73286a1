use crate::core::channels::ChannelHeader;
use crate::core::types::{TypeInfo, Var};
use crossbeam::queue::{ArrayQueue, SegQueue};

/// Result of sending into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The channel is closed. Nothing was enqueued.
    Closed,
    /// The queue is at capacity. Nothing was enqueued; try again later.
    Full,
}

/// Result of a non-blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum RecvOutcome {
    Value(Var),
    /// Nothing queued right now; more may come.
    Empty,
    /// Closed and drained. Nothing will ever arrive.
    EndOfStream,
}

/// Bounded lock-free multi-producer multi-consumer queue.
///
/// Values are queued at most once and handed out at most once. Whatever is
/// still queued when the channel is dropped is dropped with it.
pub struct MpmcChannel {
    header: ChannelHeader,
    data: ArrayQueue<Var>,
    recycle: SegQueue<Var>,
}

impl MpmcChannel {
    pub fn new(type_info: TypeInfo, no_copy: bool, capacity: usize) -> Self {
        Self {
            header: ChannelHeader::new(type_info, no_copy),
            data: ArrayQueue::new(capacity.max(1)),
            recycle: SegQueue::new(),
        }
    }

    pub fn header(&self) -> &ChannelHeader {
        &self.header
    }

    /// Enqueues a clone of `value`. In copy mode the clone is written into
    /// storage from the recycle list when available. In no-copy mode it is a
    /// plain clone: plain values are still duplicated and only objects share
    /// their handle.
    pub fn send(&self, value: &Var) -> SendOutcome {
        if self.header.is_closed() {
            return SendOutcome::Closed;
        }
        let item = if self.header.no_copy() {
            value.clone()
        } else {
            let mut storage = self.recycle.pop().unwrap_or_default();
            storage.assign_from(value);
            storage
        };
        self.push(item)
    }

    /// Enqueues `value` without copying it.
    pub fn send_owned(&self, value: Var) -> SendOutcome {
        if self.header.is_closed() {
            return SendOutcome::Closed;
        }
        self.push(value)
    }

    fn push(&self, item: Var) -> SendOutcome {
        match self.data.push(item) {
            Ok(()) => SendOutcome::Delivered,
            Err(rejected) => {
                self.recycle(rejected);
                SendOutcome::Full
            }
        }
    }

    pub fn try_recv(&self) -> RecvOutcome {
        if let Some(v) = self.data.pop() {
            return RecvOutcome::Value(v);
        }
        if self.header.is_closed() {
            // A producer may have pushed right before closing.
            return match self.data.pop() {
                Some(v) => RecvOutcome::Value(v),
                None => RecvOutcome::EndOfStream,
            };
        }
        RecvOutcome::Empty
    }

    /// Returns storage of a consumed value for reuse by later sends. Ignored
    /// in no-copy mode, where the channel never owns storage.
    pub fn recycle(&self, value: Var) {
        if !self.header.no_copy() {
            self.recycle.push(value);
        }
    }

    /// Closes the channel. Returns whether it was already closed.
    pub fn close(&self) -> bool {
        self.header.close()
    }

    pub fn is_closed(&self) -> bool {
        self.header.is_closed()
    }

    /// Discards everything queued. Returns how many values were discarded.
    pub fn flush(&self) -> usize {
        let mut flushed = 0;
        while let Some(v) = self.data.pop() {
            self.recycle(v);
            flushed += 1;
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn recycled_len(&self) -> usize {
        self.recycle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn values_arrive_in_order_once() {
        let ch = MpmcChannel::new(TypeInfo::Int, false, 8);
        for i in 0..3 {
            assert_eq!(ch.send(&Var::Int(i)), SendOutcome::Delivered);
        }
        assert_eq!(ch.try_recv(), RecvOutcome::Value(Var::Int(0)));
        assert_eq!(ch.try_recv(), RecvOutcome::Value(Var::Int(1)));
        assert_eq!(ch.try_recv(), RecvOutcome::Value(Var::Int(2)));
        assert_eq!(ch.try_recv(), RecvOutcome::Empty);
    }

    #[test]
    fn closed_and_empty_is_end_of_stream() {
        let ch = MpmcChannel::new(TypeInfo::Int, false, 8);
        ch.send(&Var::Int(1));
        assert!(!ch.close());
        assert_eq!(ch.send(&Var::Int(2)), SendOutcome::Closed);
        assert_eq!(ch.try_recv(), RecvOutcome::Value(Var::Int(1)));
        assert_eq!(ch.try_recv(), RecvOutcome::EndOfStream);
        assert!(ch.close());
    }

    #[test]
    fn full_queue_rejects_without_losing_storage() {
        let ch = MpmcChannel::new(TypeInfo::String, false, 1);
        assert_eq!(ch.send(&Var::from("a")), SendOutcome::Delivered);
        assert_eq!(ch.send(&Var::from("b")), SendOutcome::Full);
        assert_eq!(ch.recycled_len(), 1);
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn copy_mode_reuses_recycled_storage() {
        let ch = MpmcChannel::new(TypeInfo::String, false, 4);
        ch.recycle(Var::String(String::with_capacity(128)));
        ch.send(&Var::from("hi"));
        match ch.try_recv() {
            RecvOutcome::Value(Var::String(s)) => {
                assert_eq!(s, "hi");
                assert!(s.capacity() >= 128);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_copy_mode_never_keeps_storage() {
        let ch = MpmcChannel::new(TypeInfo::Any, true, 4);
        ch.recycle(Var::Int(1));
        assert_eq!(ch.recycled_len(), 0);
        ch.send_owned(Var::Int(5));
        assert_eq!(ch.flush(), 1);
        assert_eq!(ch.recycled_len(), 0);
    }

    #[test]
    fn concurrent_producers_and_consumers_see_each_value_once() {
        let ch = Arc::new(MpmcChannel::new(TypeInfo::Int, false, 4096));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let ch = ch.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        while ch.send(&Var::Int(p * 1000 + i)) == SendOutcome::Full {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().expect("producer thread");
        }
        ch.close();

        let mut seen = Vec::new();
        loop {
            match ch.try_recv() {
                RecvOutcome::Value(Var::Int(v)) => seen.push(v),
                RecvOutcome::EndOfStream => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }
}
