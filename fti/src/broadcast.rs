//! Single-producer broadcast channels with drop-oldest overflow.
//!
//! Each sensor worker owns one [`Broadcast`] and publishes every decoded
//! sample to all subscribers. Subscribers get independent bounded queues; a
//! slow subscriber loses the oldest queued sample, never the newest, and a
//! counter records every loss. Consumers are expected to tolerate gaps.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::trace;

struct Subscriber<T> {
    tx: Sender<T>,
    // Kept so the publisher can pop the oldest element when the queue is
    // full; crossbeam channels are MPMC so this is just another receiver.
    rx: Receiver<T>,
}

/// Fan-out handle owned by the producing worker.
pub struct Broadcast<T> {
    name: &'static str,
    subs: Vec<Subscriber<T>>,
    dropped: u64,
}

impl<T: Clone> Broadcast<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subs: Vec::new(),
            dropped: 0,
        }
    }

    /// Add a subscriber with a queue of `cap` samples (at least 1).
    pub fn subscribe(&mut self, cap: usize) -> Receiver<T> {
        let (tx, rx) = bounded(cap.max(1));
        self.subs.push(Subscriber {
            tx,
            rx: rx.clone(),
        });
        rx
    }

    /// Publish one sample to every subscriber.
    pub fn publish(&mut self, sample: T) {
        for sub in &self.subs {
            let mut item = sample.clone();
            loop {
                match sub.tx.try_send(item) {
                    Ok(()) => break,
                    Err(TrySendError::Full(returned)) => {
                        // Drop the oldest queued sample to make room.
                        let _ = sub.rx.try_recv();
                        self.dropped += 1;
                        trace!(channel = self.name, dropped = self.dropped, "queue overflow");
                        item = returned;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    /// Total samples dropped to overflow across all subscribers.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_subscribers_see_sample() {
        let mut bc = Broadcast::new("test");
        let a = bc.subscribe(4);
        let b = bc.subscribe(4);
        bc.publish(7u32);
        assert_eq!(a.try_recv(), Ok(7));
        assert_eq!(b.try_recv(), Ok(7));
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let mut bc = Broadcast::new("test");
        let rx = bc.subscribe(1);
        bc.publish(1u32);
        bc.publish(2u32);
        bc.publish(3u32);
        // A never-draining capacity-1 subscriber observes only the newest.
        assert_eq!(rx.try_recv(), Ok(3));
        assert!(rx.try_recv().is_err());
        assert_eq!(bc.dropped(), 2);
    }

    #[test]
    fn test_production_order_preserved() {
        let mut bc = Broadcast::new("test");
        let rx = bc.subscribe(8);
        for i in 0..5u32 {
            bc.publish(i);
        }
        let got: Vec<u32> = rx.try_iter().collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_disconnected_subscriber_is_ignored() {
        let mut bc = Broadcast::new("test");
        let rx = bc.subscribe(1);
        drop(rx);
        let keep = bc.subscribe(1);
        bc.publish(9u32);
        assert_eq!(keep.try_recv(), Ok(9));
    }
}
