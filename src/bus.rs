use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use serde_json::Value;

pub type Message = (String, Value);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeFlags {
    /// Deliver future publications.
    pub publish: bool,
    /// Deliver the current retained values immediately.
    pub retain: bool,
}

impl SubscribeFlags {
    pub const PUB_RETAIN: SubscribeFlags = SubscribeFlags {
        publish: true,
        retain: true,
    };
}

/// Where state changes are announced.
pub trait SettingsBus {
    fn publish(&self, topic: &str, value: Value);
}

#[derive(Debug)]
struct Subscriber {
    topic: String,
    tx: Sender<Message>,
}

#[derive(Debug, Default)]
struct Inner {
    retained: BTreeMap<String, Value>,
    subscribers: Vec<Subscriber>,
}

fn matches(filter: &str, topic: &str) -> bool {
    filter.is_empty()
        || topic == filter
        || topic
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// In-process settings bus with retained values. Cloning yields another
/// handle to the same bus.
#[derive(Debug, Clone, Default)]
pub struct RetainedBus {
    inner: Arc<Mutex<Inner>>,
}

impl RetainedBus {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive messages on `topic` and everything below it.
    pub fn subscribe(&self, topic: &str, flags: SubscribeFlags) -> Receiver<Message> {
        let (tx, rx) = unbounded();
        let mut inner = self.lock();
        if flags.retain {
            for (t, v) in inner.retained.iter().filter(|(t, _)| matches(topic, t)) {
                let _ = tx.send((t.clone(), v.clone()));
            }
        }
        if flags.publish {
            inner.subscribers.push(Subscriber {
                topic: topic.to_string(),
                tx,
            });
        }
        rx
    }

    pub fn query(&self, topic: &str) -> Option<Value> {
        self.lock().retained.get(topic).cloned()
    }
}

impl SettingsBus for RetainedBus {
    fn publish(&self, topic: &str, value: Value) {
        debug!("publish {topic} = {value}");
        let mut inner = self.lock();
        inner.retained.insert(topic.to_string(), value.clone());
        // dropped receivers unsubscribe
        inner.subscribers.retain(|sub| {
            !matches(&sub.topic, topic) || sub.tx.send((topic.to_string(), value.clone())).is_ok()
        });
    }
}
