//! Collaborators of the backfiller: historical replays and live streams.

use crate::error::{ArchiveError, Result};
use crate::tuple::{BoxedSource, Tuple};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Range of history to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest {
    /// Name used in logs and by the provider.
    pub name: String,
    /// First instant replayed, in ms.
    pub start: i64,
    /// End of the replay, exclusive, in ms.
    pub stop: i64,
}

/// A running replay of historical data.
#[async_trait]
pub trait Replay: Send {
    /// Starts the replay and returns one time-ordered source per stream.
    async fn start(&mut self) -> Result<Vec<BoxedSource>>;

    /// Asks the replay to stop early. Safe to call more than once.
    fn abort(&mut self);

    /// Waits until the replay has released its resources.
    async fn await_terminated(&mut self) -> Result<()>;
}

/// Creates replays.
#[async_trait]
pub trait ReplayProvider: Send + Sync {
    /// Creates a replay for `request`. The replay is not started.
    async fn create(&self, request: ReplayRequest) -> Result<Box<dyn Replay>>;
}

/// Kind of a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Raw telemetry packets.
    Telemetry,
    /// Processed parameters.
    Parameter,
    /// Anything else; never monitored by default.
    Other,
}

/// Handle returned by [`StreamRegistry::subscribe`].
pub type SubscriptionId = u64;

/// Receives live stream updates.
pub trait StreamSubscriber: Send + Sync {
    /// Called for every tuple published on the stream.
    fn on_tuple(&self, stream: &str, tuple: &Tuple);

    /// Called once when the stream closes.
    fn stream_closed(&self, stream: &str);
}

/// Lookup and subscription of live streams.
pub trait StreamRegistry: Send + Sync {
    /// Names of all streams of `kind`, sorted.
    fn streams_of_kind(&self, kind: StreamKind) -> Vec<String>;

    /// Returns true if a stream named `name` exists.
    fn exists(&self, name: &str) -> bool;

    /// Subscribes to a stream.
    fn subscribe(
        &self,
        name: &str,
        subscriber: Arc<dyn StreamSubscriber>,
    ) -> Result<SubscriptionId>;

    /// Removes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, name: &str, id: SubscriptionId);
}

struct LocalStream {
    kind: StreamKind,
    subscribers: Vec<(SubscriptionId, Arc<dyn StreamSubscriber>)>,
}

#[derive(Default)]
struct Registry {
    streams: HashMap<String, LocalStream>,
    next_id: SubscriptionId,
}

/// In-process [`StreamRegistry`] that delivers tuples synchronously.
#[derive(Default)]
pub struct LocalStreamRegistry {
    inner: Mutex<Registry>,
}

impl LocalStreamRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a stream. Registering an existing name keeps its subscribers.
    pub fn register(&self, name: impl Into<String>, kind: StreamKind) {
        let mut registry = self.lock();
        registry
            .streams
            .entry(name.into())
            .or_insert_with(|| LocalStream {
                kind,
                subscribers: Vec::new(),
            })
            .kind = kind;
    }

    /// Delivers `tuple` to every subscriber of `name`.
    pub fn publish(&self, name: &str, tuple: &Tuple) -> Result<()> {
        let subscribers = self.subscribers_of(name)?;
        for subscriber in subscribers {
            subscriber.on_tuple(name, tuple);
        }
        Ok(())
    }

    /// Removes the stream and notifies its subscribers.
    pub fn close(&self, name: &str) -> Result<()> {
        let stream = self
            .lock()
            .streams
            .remove(name)
            .ok_or_else(|| unknown_stream(name))?;
        debug!(stream = name, subscribers = stream.subscribers.len(), "stream closed");
        for (_, subscriber) in stream.subscribers {
            subscriber.stream_closed(name);
        }
        Ok(())
    }

    /// Number of subscribers of `name`, zero for unknown streams.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.lock()
            .streams
            .get(name)
            .map_or(0, |stream| stream.subscribers.len())
    }

    // Copied out so that callbacks run without the registry lock held.
    fn subscribers_of(&self, name: &str) -> Result<Vec<Arc<dyn StreamSubscriber>>> {
        let registry = self.lock();
        let stream = registry.streams.get(name).ok_or_else(|| unknown_stream(name))?;
        Ok(stream.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect())
    }
}

fn unknown_stream(name: &str) -> ArchiveError {
    ArchiveError::Configuration(format!("unknown stream '{}'", name))
}

impl StreamRegistry for LocalStreamRegistry {
    fn streams_of_kind(&self, kind: StreamKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .streams
            .iter()
            .filter(|(_, stream)| stream.kind == kind)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn exists(&self, name: &str) -> bool {
        self.lock().streams.contains_key(name)
    }

    fn subscribe(
        &self,
        name: &str,
        subscriber: Arc<dyn StreamSubscriber>,
    ) -> Result<SubscriptionId> {
        let mut registry = self.lock();
        let id = registry.next_id;
        let stream = registry
            .streams
            .get_mut(name)
            .ok_or_else(|| unknown_stream(name))?;
        stream.subscribers.push((id, subscriber));
        registry.next_id += 1;
        Ok(id)
    }

    fn unsubscribe(&self, name: &str, id: SubscriptionId) {
        if let Some(stream) = self.lock().streams.get_mut(name) {
            stream.subscribers.retain(|(sid, _)| *sid != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ColumnValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        tuples: AtomicUsize,
        closed: AtomicUsize,
    }

    impl StreamSubscriber for Counter {
        fn on_tuple(&self, _stream: &str, _tuple: &Tuple) {
            self.tuples.fetch_add(1, Ordering::SeqCst);
        }

        fn stream_closed(&self, _stream: &str) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_streams_of_kind_sorted() {
        let registry = LocalStreamRegistry::new();
        registry.register("tm_realtime", StreamKind::Telemetry);
        registry.register("tm_dump", StreamKind::Telemetry);
        registry.register("pp_realtime", StreamKind::Parameter);
        registry.register("cmdhist", StreamKind::Other);

        assert_eq!(
            registry.streams_of_kind(StreamKind::Telemetry),
            vec!["tm_dump", "tm_realtime"]
        );
        assert!(registry.exists("cmdhist"));
        assert!(!registry.exists("nope"));
    }

    #[test]
    fn test_publish_unsubscribe_close() {
        let registry = LocalStreamRegistry::new();
        registry.register("tm", StreamKind::Telemetry);
        let counter = Arc::new(Counter::default());
        let id = registry.subscribe("tm", counter.clone()).unwrap();
        assert_eq!(registry.subscriber_count("tm"), 1);

        let tuple = Tuple::new().with("gentime", ColumnValue::Long(1));
        registry.publish("tm", &tuple).unwrap();
        registry.unsubscribe("tm", id);
        registry.publish("tm", &tuple).unwrap();
        assert_eq!(counter.tuples.load(Ordering::SeqCst), 1);

        registry.subscribe("tm", counter.clone()).unwrap();
        registry.close("tm").unwrap();
        assert_eq!(counter.closed.load(Ordering::SeqCst), 1);
        assert!(registry.publish("tm", &tuple).is_err());
        assert!(registry.subscribe("tm", counter).is_err());
    }
}
