use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use fleet_protocol::PushMessage;

/// One connected consumer: an id plus the outbound queue its socket loop
/// drains. Cheap to clone; a handle whose receiver is gone fails to send
/// and gets pruned.
#[derive(Clone)]
pub struct ClientHandle {
    id: Uuid,
    sender: UnboundedSender<PushMessage>,
}

impl ClientHandle {
    pub fn new(id: Uuid, sender: UnboundedSender<PushMessage>) -> Self {
        ClientHandle { id, sender }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort delivery; returns false when the consumer is gone.
    pub fn send(&self, message: PushMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Subscription scopes on a single supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// State, activity, monitoring, backup and player events.
    Detail,
    /// Raw console lines.
    Console,
}

/// Per-supervisor subscriber sets. Delivery is synchronous with the
/// triggering state change, best-effort, unordered across subscribers; a
/// failed delivery removes that client from every channel of this hub.
#[derive(Default)]
pub struct SubscriptionHub {
    channels: Mutex<HashMap<Channel, Vec<ClientHandle>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers for future pushes on `channel`. Idempotent per client id.
    pub fn subscribe(&self, channel: Channel, handle: ClientHandle) {
        let mut channels = self.channels.lock().unwrap();
        let subscribers = channels.entry(channel).or_default();
        if !subscribers.iter().any(|s| s.id == handle.id) {
            subscribers.push(handle);
        }
    }

    /// Removes the client from one channel; unknown subscribers are a no-op.
    pub fn unsubscribe(&self, channel: Channel, id: Uuid) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(subscribers) = channels.get_mut(&channel) {
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Removes the client from every channel.
    pub fn unsubscribe_all(&self, id: Uuid) {
        let mut channels = self.channels.lock().unwrap();
        for subscribers in channels.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Fans `message` out to every subscriber of `channel`, pruning dead
    /// handles from all channels as a side effect.
    pub fn publish(&self, channel: Channel, message: &PushMessage) {
        let mut channels = self.channels.lock().unwrap();
        let mut dead = Vec::new();
        if let Some(subscribers) = channels.get(&channel) {
            for subscriber in subscribers {
                if !subscriber.send(message.clone()) {
                    dead.push(subscriber.id);
                }
            }
        }
        for id in dead {
            debug!("pruning dead subscriber {}", id);
            for subscribers in channels.values_mut() {
                subscribers.retain(|s| s.id != id);
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(&channel)
            .map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::unbounded_channel;

    fn client() -> (ClientHandle, tokio::sync::mpsc::UnboundedReceiver<PushMessage>) {
        let (tx, rx) = unbounded_channel();
        (ClientHandle::new(Uuid::new_v4(), tx), rx)
    }

    fn line(text: &str) -> PushMessage {
        PushMessage::ServerConsoleLine {
            slug: "lobby".to_string(),
            line: text.to_string(),
        }
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = SubscriptionHub::new();
        let (a, mut rx_a) = client();
        let (b, mut rx_b) = client();
        hub.subscribe(Channel::Console, a);
        hub.subscribe(Channel::Console, b);

        hub.publish(Channel::Console, &line("hello"));

        assert_eq!(rx_a.try_recv().unwrap(), line("hello"));
        assert_eq!(rx_b.try_recv().unwrap(), line("hello"));
    }

    #[test]
    fn resubscribe_does_not_duplicate_delivery() {
        let hub = SubscriptionHub::new();
        let (a, mut rx) = client();
        hub.subscribe(Channel::Console, a.clone());
        hub.subscribe(Channel::Console, a);

        hub.publish(Channel::Console, &line("once"));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_delivery_prunes_from_every_channel() {
        let hub = SubscriptionHub::new();
        let (a, rx) = client();
        hub.subscribe(Channel::Console, a.clone());
        hub.subscribe(Channel::Detail, a);
        drop(rx);

        hub.publish(Channel::Console, &line("dead letter"));

        assert_eq!(hub.subscriber_count(Channel::Console), 0);
        assert_eq!(hub.subscriber_count(Channel::Detail), 0);
    }

    #[test]
    fn unsubscribe_is_targeted() {
        let hub = SubscriptionHub::new();
        let (a, mut rx) = client();
        hub.subscribe(Channel::Console, a.clone());
        hub.subscribe(Channel::Detail, a.clone());

        hub.unsubscribe(Channel::Console, a.id());
        hub.publish(Channel::Console, &line("nope"));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(Channel::Detail), 1);

        // unknown client is a no-op
        hub.unsubscribe(Channel::Detail, Uuid::new_v4());
        assert_eq!(hub.subscriber_count(Channel::Detail), 1);
    }
}
