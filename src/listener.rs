//! Listener registry (C4): tracks `LISTEN` subscriptions and dispatches
//! `NotificationResponse` messages to the right subscriber.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A single incoming NOTIFY, handed to subscribers of its channel.
#[derive(Debug, Clone)]
pub struct Notification {
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

/// Opaque handle returned by `listen`, used to cancel a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    channel: String,
    sender: mpsc::UnboundedSender<Notification>,
}

/// Maintains the duality invariant: every subscriber appears in exactly one
/// channel's subscriber list, and a channel's entry in `listener_channels`
/// exists iff at least one subscriber is registered for it. Used by the
/// Supervisor to know when a channel's last subscriber disappears, so it can
/// synthesize an `UNLISTEN`.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<SubscriberId, Subscriber>,
    listener_channels: HashMap<String, Vec<SubscriberId>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `channel`. Returns the handle and,
    /// if the server doesn't yet know about this channel, `true` meaning the
    /// caller must issue `LISTEN channel`.
    pub fn listen(
        &mut self,
        channel: &str,
        sender: mpsc::UnboundedSender<Notification>,
    ) -> (SubscriberId, bool) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let needs_listen = !self.listener_channels.contains_key(channel);
        self.listeners.insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                sender,
            },
        );
        self.listener_channels
            .entry(channel.to_string())
            .or_default()
            .push(id);

        (id, needs_listen)
    }

    /// Remove a subscriber. `Ok(Some(channel))` means that channel now has
    /// no subscribers left and the caller should issue `UNLISTEN channel`;
    /// `Ok(None)` means the channel still has other subscribers. An unknown
    /// handle (never issued, or already unlistened) is an `Error::Argument`,
    /// not a silent no-op.
    pub fn unlisten(&mut self, id: SubscriberId) -> Result<Option<String>> {
        let Some(subscriber) = self.listeners.remove(&id) else {
            return Err(Error::Argument(format!("unknown subscriber handle: {id:?}")));
        };
        let channel = subscriber.channel;

        if let Some(ids) = self.listener_channels.get_mut(&channel) {
            ids.retain(|&sid| sid != id);
            if ids.is_empty() {
                self.listener_channels.remove(&channel);
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }

    /// Dispatch a notification to every live subscriber of its channel.
    /// Subscribers whose receiver has been dropped are pruned; if that
    /// drains a channel, the now-empty channel name is returned so the
    /// caller can synthesize an `UNLISTEN`.
    pub fn dispatch(&mut self, notification: Notification) -> Option<String> {
        let Some(ids) = self.listener_channels.get(&notification.channel).cloned() else {
            return None;
        };

        let mut dead = Vec::new();
        for id in &ids {
            if let Some(subscriber) = self.listeners.get(id) {
                if subscriber.sender.send(notification.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }

        for id in &dead {
            self.listeners.remove(id);
        }

        if !dead.is_empty() {
            if let Some(ids) = self.listener_channels.get_mut(&notification.channel) {
                ids.retain(|id| !dead.contains(id));
                if ids.is_empty() {
                    self.listener_channels.remove(&notification.channel);
                    return Some(notification.channel);
                }
            }
        }

        None
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscriber_on_a_channel_needs_listen() {
        let mut registry = ListenerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_id, needs_listen) = registry.listen("foo", tx);
        assert!(needs_listen);
    }

    #[test]
    fn second_subscriber_on_same_channel_does_not_need_listen() {
        let mut registry = ListenerRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.listen("foo", tx1);
        let (_id, needs_listen) = registry.listen("foo", tx2);
        assert!(!needs_listen);
    }

    #[test]
    fn unlisten_last_subscriber_returns_channel() {
        let mut registry = ListenerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = registry.listen("foo", tx);
        assert_eq!(registry.unlisten(id).unwrap(), Some("foo".to_string()));
    }

    #[test]
    fn unlisten_of_unknown_handle_is_an_argument_error() {
        let mut registry = ListenerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _) = registry.listen("foo", tx);
        registry.unlisten(id).unwrap();
        assert!(matches!(registry.unlisten(id), Err(Error::Argument(_))));
    }

    #[test]
    fn dispatch_fans_out_to_all_subscribers_of_a_channel() {
        let mut registry = ListenerRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.listen("foo", tx1);
        registry.listen("foo", tx2);

        registry.dispatch(Notification {
            pid: 1,
            channel: "foo".into(),
            payload: "hello".into(),
        });

        assert_eq!(rx1.try_recv().unwrap().payload, "hello");
        assert_eq!(rx2.try_recv().unwrap().payload, "hello");
    }

    #[test]
    fn dispatch_prunes_dropped_subscriber_and_reports_drained_channel() {
        let mut registry = ListenerRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.listen("foo", tx);
        drop(rx);

        let drained = registry.dispatch(Notification {
            pid: 1,
            channel: "foo".into(),
            payload: "hello".into(),
        });
        assert_eq!(drained, Some("foo".to_string()));
        assert!(registry.is_empty());
    }
}
