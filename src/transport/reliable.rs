//! Reliable delivery over a best-effort relay
//!
//! Outgoing data messages are retried on a [`RetrySchedule`] until the
//! recipient acknowledges them. Incoming data messages are acknowledged
//! immediately, delivered at most once, and buffered while the consumer
//! reports them as not yet actionable.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::{Message, MessageType};
use super::traits::Connection;

/// Default interval between retries of an unacknowledged message
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// When to retry an unacknowledged message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrySchedule {
    Fixed(Duration),
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RETRY_INTERVAL)
    }
}

impl RetrySchedule {
    /// Delay before retry number `attempt` (starting at zero)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Backoff { initial, max, multiplier } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                let secs = initial.as_secs_f64() * factor;
                // Clamp in f64: the unclamped delay can exceed what a Duration holds
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Consumer verdict on a delivered payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Processed,
    /// Keep the payload and offer it again after the next successful delivery
    NotActionable,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub retries: u64,
    pub acks_received: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub buffered: usize,
}

type Handler = Box<dyn FnMut(&Value) -> Delivery + Send>;

struct Inner {
    connection: Option<Arc<dyn Connection>>,
    /// Frames written while detached, flushed in order on attach
    outbox: VecDeque<String>,
    /// Unacknowledged data frames by id
    pending: HashMap<Uuid, String>,
    processed: HashSet<Uuid>,
    /// Not yet actionable payloads, in arrival order
    buffered: Vec<(Uuid, Value)>,
    stats: ChannelStats,
}

/// At-least-once, deduplicated channel to a fixed set of recipients
#[derive(Clone)]
pub struct ReliableChannel {
    local_id: Arc<str>,
    recipients: Arc<[String]>,
    schedule: RetrySchedule,
    inner: Arc<Mutex<Inner>>,
    handler: Arc<Mutex<Option<Handler>>>,
}

impl ReliableChannel {
    /// Channel for `local_id` fanning out to `recipients`
    pub fn new(
        local_id: impl Into<String>,
        recipients: Vec<String>,
        schedule: RetrySchedule,
    ) -> Self {
        let local_id: String = local_id.into();
        Self {
            local_id: Arc::from(local_id),
            recipients: Arc::from(recipients),
            schedule,
            inner: Arc::new(Mutex::new(Inner {
                connection: None,
                outbox: VecDeque::new(),
                pending: HashMap::new(),
                processed: HashSet::new(),
                buffered: Vec::new(),
                stats: ChannelStats::default(),
            })),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    /// Bind or unbind the underlying connection.
    ///
    /// Binding flushes everything written while detached, in order.
    /// Unbinding is idempotent.
    pub fn attach(&self, connection: Option<Arc<dyn Connection>>) {
        let Some(connection) = connection else {
            if self.inner.lock().connection.take().is_some() {
                tracing::debug!(id = %self.local_id, "channel detached");
            }
            return;
        };

        let backlog: Vec<String> = {
            let mut inner = self.inner.lock();
            inner.connection = Some(Arc::clone(&connection));
            inner.outbox.drain(..).collect()
        };
        tracing::debug!(id = %self.local_id, backlog = backlog.len(), "channel attached");
        for frame in backlog {
            self.write(&connection, &frame);
        }
    }

    /// Register the payload consumer and offer it anything buffered so far.
    pub fn on_receive(&self, handler: impl FnMut(&Value) -> Delivery + Send + 'static) {
        *self.handler.lock() = Some(Box::new(handler));
        self.retry_buffered();
    }

    /// Send `payload` to every recipient, one message each.
    pub fn fan_out(&self, payload: &Value) {
        for recipient in self.recipients.iter() {
            let message = Message::data(&self.local_id, recipient, payload.clone());
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(code = e.code(), %e, "dropping unencodable payload");
                    continue;
                }
            };
            self.inner.lock().pending.insert(message.uuid, frame.clone());
            self.send(frame, true);
            self.spawn_retries(message.uuid);
        }
    }

    /// Ids of data messages still waiting for an ack
    pub fn pending(&self) -> Vec<Uuid> {
        self.inner.lock().pending.keys().copied().collect()
    }

    pub fn stats(&self) -> ChannelStats {
        let inner = self.inner.lock();
        ChannelStats {
            buffered: inner.buffered.len(),
            ..inner.stats.clone()
        }
    }

    /// Entry point for every frame arriving from the relay.
    pub fn on_frame(&self, frame: &str) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(code = e.code(), %e, "ignoring malformed frame");
                return;
            }
        };

        match message.kind {
            MessageType::Ack => {
                let mut inner = self.inner.lock();
                if inner.pending.remove(&message.uuid).is_some() {
                    inner.stats.acks_received += 1;
                }
            }
            MessageType::Data => self.on_data(message),
        }
    }

    fn on_data(&self, message: Message) {
        // Acknowledge first: the sender cannot tell lost from not actionable
        match Message::ack(message.uuid, message.sender.clone()).encode() {
            Ok(ack) => self.send(ack, false),
            Err(e) => tracing::warn!(code = e.code(), %e, "failed to encode ack"),
        }

        {
            let mut inner = self.inner.lock();
            if !inner.processed.insert(message.uuid) {
                inner.stats.duplicates += 1;
                return;
            }
        }
        let Some(data) = message.data else { return };

        match self.deliver(&data) {
            Delivery::Processed => self.retry_buffered(),
            Delivery::NotActionable => self.inner.lock().buffered.push((message.uuid, data)),
        }
    }

    fn deliver(&self, data: &Value) -> Delivery {
        let delivery = match self.handler.lock().as_mut() {
            Some(handler) => handler(data),
            None => Delivery::NotActionable,
        };
        if delivery == Delivery::Processed {
            self.inner.lock().stats.delivered += 1;
        }
        delivery
    }

    /// One pass over the buffer in arrival order.
    fn retry_buffered(&self) {
        let buffered = std::mem::take(&mut self.inner.lock().buffered);
        if buffered.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        for (uuid, data) in buffered {
            if self.deliver(&data) == Delivery::NotActionable {
                remaining.push((uuid, data));
            }
        }

        let mut inner = self.inner.lock();
        remaining.append(&mut inner.buffered);
        inner.buffered = remaining;
    }

    /// Write a frame now, or queue it while detached. Retries are not queued.
    fn send(&self, frame: String, queue_if_detached: bool) {
        let connection = {
            let mut inner = self.inner.lock();
            match &inner.connection {
                Some(connection) => Arc::clone(connection),
                None => {
                    if queue_if_detached {
                        inner.outbox.push_back(frame);
                    }
                    return;
                }
            }
        };
        self.write(&connection, &frame);
    }

    fn write(&self, connection: &Arc<dyn Connection>, frame: &str) {
        match connection.send_frame(frame) {
            Ok(()) => self.inner.lock().stats.frames_sent += 1,
            Err(e) => tracing::warn!(id = %self.local_id, code = e.code(), %e, "send failed"),
        }
    }

    fn spawn_retries(&self, uuid: Uuid) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%uuid, "no runtime, message will not be retried");
            return;
        };

        let schedule = self.schedule;
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let channel = WeakChannel {
            local_id: Arc::clone(&self.local_id),
            inner: weak,
        };

        runtime.spawn(async move {
            let mut attempt = 0u32;
            loop {
                tokio::time::sleep(schedule.delay(attempt)).await;
                if !channel.retry(uuid) {
                    break;
                }
                attempt = attempt.saturating_add(1);
            }
        });
    }

    /// Feed frames from `inbound` into [`on_frame`](Self::on_frame) until the
    /// sender side closes.
    pub fn spawn_inbound(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
    ) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                channel.on_frame(&frame);
            }
            tracing::debug!(id = %channel.local_id, "inbound stream closed");
        })
    }
}

/// What a retry task needs, without keeping the channel alive
struct WeakChannel {
    local_id: Arc<str>,
    inner: Weak<Mutex<Inner>>,
}

impl WeakChannel {
    /// Resend `uuid` if it is still unacknowledged. Returns false once the
    /// message is acked or the channel is gone.
    fn retry(&self, uuid: Uuid) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let (frame, connection) = {
            let mut inner = inner.lock();
            let Some(frame) = inner.pending.get(&uuid).cloned() else {
                return false;
            };
            let Some(connection) = inner.connection.clone() else {
                // Detached: skip this round, the outbox already holds the frame
                return true;
            };
            inner.stats.retries += 1;
            (frame, connection)
        };

        tracing::trace!(id = %self.local_id, %uuid, "retrying unacknowledged message");
        match connection.send_frame(&frame) {
            Ok(()) => inner.lock().stats.frames_sent += 1,
            Err(e) => tracing::warn!(id = %self.local_id, code = e.code(), %e, "retry failed"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use serde_json::json;

    /// Connection that records every frame written to it
    #[derive(Default)]
    struct Wire {
        frames: Mutex<Vec<String>>,
        broken: bool,
    }

    impl Connection for Wire {
        fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
            if self.broken {
                return Err(TransportError::SendFailed("broken".into()));
            }
            self.frames.lock().push(frame.to_string());
            Ok(())
        }
    }

    impl Wire {
        fn messages(&self) -> Vec<Message> {
            self.frames.lock().iter().map(|f| Message::decode(f).unwrap()).collect()
        }
    }

    fn channel(recipients: &[&str]) -> (ReliableChannel, Arc<Wire>) {
        let channel = ReliableChannel::new(
            "alice",
            recipients.iter().map(|r| r.to_string()).collect(),
            RetrySchedule::Fixed(Duration::from_millis(100)),
        );
        let wire = Arc::new(Wire::default());
        channel.attach(Some(wire.clone()));
        (channel, wire)
    }

    fn data_frame(uuid: Uuid, data: Value) -> String {
        Message {
            kind: MessageType::Data,
            uuid,
            recipient: Some("alice".into()),
            sender: Some("bob".into()),
            data: Some(data),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_one_message_per_recipient() {
        let (channel, wire) = channel(&["bob", "carol"]);
        channel.fan_out(&json!({ "n": 1 }));

        let sent = wire.messages();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].uuid, sent[1].uuid);
        let recipients: Vec<_> = sent.iter().filter_map(|m| m.recipient.clone()).collect();
        assert_eq!(recipients, vec!["bob", "carol"]);
        assert_eq!(channel.pending().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_acked() {
        let (channel, wire) = channel(&["bob"]);
        channel.fan_out(&json!("hello"));
        let uuid = wire.messages()[0].uuid;

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(wire.messages().len() >= 3, "expected retries");

        channel.on_frame(&Message::ack(uuid, None).encode().unwrap());
        let sent = wire.messages().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(wire.messages().len(), sent);
        assert!(channel.pending().is_empty());
        assert_eq!(channel.stats().acks_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_sends_flush_in_order() {
        let channel = ReliableChannel::new("alice", vec!["bob".into()], RetrySchedule::default());
        channel.attach(None);
        channel.attach(None);
        channel.fan_out(&json!(1));
        channel.fan_out(&json!(2));
        assert!(!channel.is_attached());

        let wire = Arc::new(Wire::default());
        channel.attach(Some(wire.clone()));
        let data: Vec<_> = wire.messages().into_iter().filter_map(|m| m.data).collect();
        assert_eq!(data, vec![json!(1), json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_acked_and_deduplicated() {
        let (channel, wire) = channel(&["bob"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.on_receive(move |data| {
            sink.lock().push(data.clone());
            Delivery::Processed
        });

        let uuid = Uuid::new_v4();
        channel.on_frame(&data_frame(uuid, json!("x")));
        channel.on_frame(&data_frame(uuid, json!("x")));

        assert_eq!(seen.lock().len(), 1);
        let acks: Vec<_> =
            wire.messages().into_iter().filter(|m| m.kind == MessageType::Ack).collect();
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|a| a.uuid == uuid && a.recipient.as_deref() == Some("bob")));
        assert_eq!(channel.stats().duplicates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_actionable_payloads_are_retried_in_order() {
        let (channel, _wire) = channel(&["bob"]);
        let ready = Arc::new(Mutex::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (gate, sink) = (ready.clone(), seen.clone());
        channel.on_receive(move |data| {
            if data == &json!("unlock") {
                *gate.lock() = true;
            } else if !*gate.lock() {
                return Delivery::NotActionable;
            }
            sink.lock().push(data.clone());
            Delivery::Processed
        });

        channel.on_frame(&data_frame(Uuid::new_v4(), json!("a")));
        channel.on_frame(&data_frame(Uuid::new_v4(), json!("b")));
        assert_eq!(channel.stats().buffered, 2);

        channel.on_frame(&data_frame(Uuid::new_v4(), json!("unlock")));
        assert_eq!(*seen.lock(), vec![json!("unlock"), json!("a"), json!("b")]);
        assert_eq!(channel.stats().buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_errors_are_swallowed() {
        let channel = ReliableChannel::new(
            "alice",
            vec!["bob".into()],
            RetrySchedule::Fixed(Duration::from_millis(10)),
        );
        channel.attach(Some(Arc::new(Wire { broken: true, ..Wire::default() })));
        channel.fan_out(&json!(1));
        channel.on_frame("not json");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.pending().len(), 1);
        assert!(channel.stats().retries >= 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let schedule = RetrySchedule::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(schedule.delay(0), Duration::from_millis(100));
        assert_eq!(schedule.delay(1), Duration::from_millis(200));
        assert_eq!(schedule.delay(3), Duration::from_millis(800));
        assert_eq!(schedule.delay(10), Duration::from_secs(1));
        assert_eq!(RetrySchedule::default().delay(7), DEFAULT_RETRY_INTERVAL);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let schedule = RetrySchedule::Backoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
            multiplier: 3.0,
        };
        for attempt in [40, 50, 64, 1_000, u32::MAX] {
            assert_eq!(schedule.delay(attempt), Duration::from_secs(5));
        }

        let steep = RetrySchedule::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::MAX,
            multiplier: f64::MAX,
        };
        assert_eq!(steep.delay(2), Duration::MAX);
    }
}
