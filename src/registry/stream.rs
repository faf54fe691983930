// Per-key stream state: the active publisher and its subscriber set (C6)
//
// Mirrors the source's `RtmpChannelStatus` shape (publisher id/sender,
// `HashMap<u64, RtmpPlayerStatus>` of players) generalized from its own
// `RtmpSessionMessage` enum to a plain `Packet` channel, since this crate's
// subscribers aren't all RTMP sessions (HTTP-FLV and HLS attach the same
// way).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::packet::{Info, Packet};

use super::drop_policy::drop_packet;

struct SubscriberShared {
    queue: Mutex<VecDeque<Packet>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl SubscriberShared {
    async fn enqueue(&self, packet: Packet) {
        let mut queue = self.queue.lock().await;

        if queue.len() >= 1000 {
            drop_packet(&mut queue, self.capacity);
        }

        queue.push_back(packet);
        drop(queue);

        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The producer-facing slot held inside a `Stream`'s subscriber map
struct SubscriberSlot {
    info: Info,
    shared: Arc<SubscriberShared>,
}

/// Consumer-facing handle returned to whatever attached as a subscriber
/// (an RTMP play session, an HTTP-FLV writer, or an HLS ingestor)
pub struct SubscriberReceiver {
    info: Info,
    shared: Arc<SubscriberShared>,
}

impl SubscriberReceiver {
    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Waits for the next packet, or returns `None` once the subscriber has
    /// been removed from its stream (publisher gone, displaced, or evicted)
    pub async fn recv(&self) -> Option<Packet> {
        loop {
            let notified = self.shared.notify.notified();

            {
                let mut queue = self.shared.queue.lock().await;
                if let Some(packet) = queue.pop_front() {
                    return Some(packet);
                }
                if self.shared.is_closed() {
                    return None;
                }
            }

            notified.await;
        }
    }
}

impl Drop for SubscriberReceiver {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Builds a new subscriber, returning the producer-visible slot and the
/// handle given back to the caller of `handle_writer`
fn new_subscriber(info: Info, capacity: usize) -> (SubscriberSlot, SubscriberReceiver) {
    let shared = Arc::new(SubscriberShared {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        capacity,
    });

    (
        SubscriberSlot {
            info: info.clone(),
            shared: shared.clone(),
        },
        SubscriberReceiver { info, shared },
    )
}

/// A publisher's identity plus its rebase-on-attach timestamp baseline
pub struct PublisherState {
    pub info: Info,
}

/// All state tracked for one stream key: at most one publisher, any number
/// of subscribers
pub struct Stream {
    pub key: String,
    pub publisher: Option<PublisherState>,
    subscribers: HashMap<u64, SubscriberSlot>,
    pub last_activity: Instant,
}

/// Snapshot of one subscriber for the operational HTTP endpoint
#[derive(Clone, Debug)]
pub struct SubscriberSnapshot {
    pub uid: u64,
    pub url: String,
    pub kind: crate::packet::InfoKind,
}

/// Snapshot of one stream for the operational HTTP endpoint
#[derive(Clone, Debug)]
pub struct StreamSnapshot {
    pub key: String,
    pub publisher: Option<Info>,
    pub subscribers: Vec<SubscriberSnapshot>,
}

impl Stream {
    pub fn new(key: String) -> Stream {
        Stream {
            key,
            publisher: None,
            subscribers: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn attach_subscriber(&mut self, info: Info, capacity: usize) -> SubscriberReceiver {
        let (slot, receiver) = new_subscriber(info.clone(), capacity);
        self.subscribers.insert(info.uid, slot);
        self.last_activity = Instant::now();
        receiver
    }

    pub fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.subscribers.is_empty()
    }

    /// Fans `packet` out to every non-closed subscriber, dropping any whose
    /// receiver has gone away
    pub async fn fan_out(&mut self, packet: Packet) {
        let mut closed_uids = Vec::new();

        for (uid, subscriber) in self.subscribers.iter() {
            if subscriber.shared.is_closed() {
                closed_uids.push(*uid);
                continue;
            }

            subscriber.shared.enqueue(packet.clone()).await;
        }

        for uid in closed_uids {
            self.subscribers.remove(&uid);
        }

        self.last_activity = Instant::now();
    }

    /// Closes every subscriber queue, signalling their consumer tasks to
    /// stop; used when the publisher ends or is displaced
    pub fn close_all_subscribers(&mut self) {
        for subscriber in self.subscribers.values() {
            subscriber.shared.close();
        }
        self.subscribers.clear();
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            key: self.key.clone(),
            publisher: self.publisher.as_ref().map(|p| p.info.clone()),
            subscribers: self
                .subscribers
                .values()
                .map(|s| SubscriberSnapshot {
                    uid: s.info.uid,
                    url: s.info.url.clone(),
                    kind: s.info.kind,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::InfoKind;
    use std::sync::Arc as StdArc;

    fn test_info(uid: u64, kind: InfoKind) -> Info {
        Info::new(uid, kind, "rtmp://host/live/test".to_string(), "live/test".to_string())
    }

    fn blank_packet() -> Packet {
        Packet::new_metadata(0, 1, StdArc::new(vec![]))
    }

    #[tokio::test]
    async fn test_attach_and_receive_one_packet() {
        let mut stream = Stream::new("live/test".to_string());
        let receiver = stream.attach_subscriber(test_info(1, InfoKind::Player), 1024);

        stream.fan_out(blank_packet()).await;

        let packet = receiver.recv().await;
        assert!(packet.is_some());
    }

    #[tokio::test]
    async fn test_dropping_receiver_marks_subscriber_closed_on_next_fan_out() {
        let mut stream = Stream::new("live/test".to_string());
        let receiver = stream.attach_subscriber(test_info(1, InfoKind::Player), 1024);
        drop(receiver);

        stream.fan_out(blank_packet()).await;
        stream.fan_out(blank_packet()).await;

        assert!(stream.snapshot().subscribers.is_empty());
    }

    #[tokio::test]
    async fn test_two_subscribers_both_receive_in_order() {
        let mut stream = Stream::new("live/test".to_string());
        let r1 = stream.attach_subscriber(test_info(1, InfoKind::Player), 1024);
        let r2 = stream.attach_subscriber(test_info(2, InfoKind::Player), 1024);

        for i in 0..3u32 {
            let mut p = blank_packet();
            p.timestamp_ms = i;
            stream.fan_out(p).await;
        }

        for expected in 0..3u32 {
            assert_eq!(r1.recv().await.unwrap().timestamp_ms, expected);
            assert_eq!(r2.recv().await.unwrap().timestamp_ms, expected);
        }
    }
}
