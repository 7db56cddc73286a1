use crate::core::channels::ChannelHeader;
use crate::core::channels::mpmc::{MpmcChannel, SendOutcome};
use crate::core::types::{TypeInfo, Var};
use std::sync::{Arc, Mutex, PoisonError};

/// Fan-out channel. Every published value is cloned into each live
/// subscriber's private queue, in no-copy mode too.
pub struct BroadcastChannel {
    header: ChannelHeader,
    subscribers: Mutex<Vec<Arc<MpmcChannel>>>,
    capacity: usize,
}

impl BroadcastChannel {
    pub fn new(type_info: TypeInfo, no_copy: bool, capacity: usize) -> Self {
        Self {
            header: ChannelHeader::new(type_info, no_copy),
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn header(&self) -> &ChannelHeader {
        &self.header
    }

    /// Creates a private sub-channel that receives every value published from
    /// now on. Closing it unsubscribes.
    pub fn subscribe(&self) -> Arc<MpmcChannel> {
        let sub = Arc::new(MpmcChannel::new(
            self.header.type_info(),
            self.header.no_copy(),
            self.capacity,
        ));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // `close` sets the flag before taking this lock.
        if self.header.is_closed() {
            sub.close();
        }
        subscribers.push(sub.clone());
        sub
    }

    /// Delivers `value` to every live subscriber. Returns the number of
    /// deliveries.
    pub fn publish(&self, value: &Var) -> usize {
        if self.header.is_closed() {
            return 0;
        }
        let live: Vec<Arc<MpmcChannel>> = {
            let mut subs = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subs.retain(|s| !s.is_closed());
            subs.clone()
        };

        let mut delivered = 0;
        for sub in &live {
            match sub.send(value) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::Full => log::debug!("broadcast subscriber queue is full, value dropped"),
                SendOutcome::Closed => {}
            }
        }
        delivered
    }

    /// Closes the channel and every subscriber, so listeners drain what they
    /// have and then see end-of-stream. Returns whether it was already closed.
    pub fn close(&self) -> bool {
        let was_closed = self.header.close();
        for sub in self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            sub.close();
        }
        was_closed
    }

    pub fn is_closed(&self) -> bool {
        self.header.is_closed()
    }

    /// Discards everything queued for every subscriber.
    pub fn flush(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.flush())
            .sum()
    }

    /// Subscribers still registered, including closed ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
