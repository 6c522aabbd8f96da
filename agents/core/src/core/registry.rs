use super::wrapper::{GetterOps, NodeWrapper};
use crate::core::wrapper::InternalOps;
use mbus_api::{
    events::{Event, EventSink, EventStream, WarmupSource},
    v0::{Nexus, Node, NodeId, Pool, PoolId, Replica},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};

/// Registry containing all mayastor instances which register themselves via
/// the `Register` message.
/// Said instances may also send `Deregister` to unregister themselves during
/// node/pod shutdown/restart. When this happens the node state is set as
/// `Unknown`. It's TBD how to detect when a node is really going away for
/// good.
///
/// A mayastor instance sends `Register` every N seconds as sort of a keep
/// alive message.
/// A watchful watchdog is started for each node and it will change the state
/// of said node to `Offline` if it is not petted before its `deadline`.
#[derive(Clone, Debug)]
pub struct Registry {
    pub(crate) nodes: Arc<RwLock<HashMap<NodeId, Arc<Mutex<NodeWrapper>>>>>,
    /// period to refresh the cache
    period: std::time::Duration,
    /// every consumer currently subscribed to registry change events
    sinks: Arc<RwLock<Vec<EventSink>>>,
}

impl Registry {
    /// Create a new registry with the `period` to reload the cache
    pub fn new(period: std::time::Duration) -> Self {
        let registry = Self {
            nodes: Default::default(),
            period,
            sinks: Default::default(),
        };
        registry.start();
        registry
    }

    /// Start the background task which keeps the registry's cache of
    /// pools/replicas/nexuses up to date
    pub fn start(&self) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.poller().await;
        });
    }

    /// Subscribe to every change event the registry produces from here on,
    /// preceded by a warm-up batch describing everything currently known.
    /// Each call mints an independent stream: the registry fans every event
    /// out to every subscriber still attached.
    pub(crate) async fn subscribe(&self) -> EventStream {
        let nodes = self.nodes.read().await;
        let mut snapshot = Vec::new();
        for node in nodes.values() {
            let node_info = node.lock().await.node().clone();
            let pools = node.pools().await;
            let mut pool_entries = Vec::with_capacity(pools.len());
            for pool in pools {
                let replicas = pool.replicas();
                pool_entries.push((Pool::from(&pool), replicas));
            }
            let nexuses = node.nexuses().await;
            snapshot.push((node_info, pool_entries, nexuses));
        }
        drop(nodes);

        let source = RegistrySnapshot { nodes: snapshot };
        let (sink, stream) = EventStream::new(&source);
        self.sinks.write().await.push(sink);
        stream
    }

    /// Forward every event to every subscriber.
    async fn emit_all(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let sinks = self.sinks.read().await;
        for event in events {
            for sink in sinks.iter() {
                sink.emit(event.clone());
            }
        }
    }

    /// Poll each node for resource updates
    async fn poller(&self) {
        loop {
            let nodes = self.nodes.read().await.clone();
            for (_, node) in nodes.iter() {
                let lock = node.grpc_lock().await;
                let _guard = lock.lock().await;

                let mut node_clone = node.lock().await.clone();
                if let Ok(events) = node_clone.reload().await {
                    // update node in the registry
                    *node.lock().await = node_clone;
                    self.emit_all(events).await;
                }
            }
            self.trace_all().await;
            tokio::time::delay_for(self.period).await;
        }
    }
    async fn trace_all(&self) {
        let registry = self.nodes.read().await;
        tracing::debug!("Registry update: {:?}", registry);
    }
}

/// Owned point-in-time copy of the registry's node/pool/replica/nexus state,
/// built once per `subscribe()` call to satisfy `WarmupSource`'s synchronous
/// interface without holding the async node locks across the warm-up replay.
struct RegistrySnapshot {
    #[allow(clippy::type_complexity)]
    nodes: Vec<(Node, Vec<(Pool, Vec<Replica>)>, Vec<Nexus>)>,
}

impl WarmupSource for RegistrySnapshot {
    fn nodes(&self) -> Vec<Node> {
        self.nodes.iter().map(|(node, ..)| node.clone()).collect()
    }
    fn pools(&self, node: &NodeId) -> Vec<Pool> {
        self.nodes
            .iter()
            .find(|(n, ..)| &n.id == node)
            .map(|(_, pools, _)| pools.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }
    fn replicas(&self, pool: &PoolId) -> Vec<Replica> {
        for (_, pools, _) in &self.nodes {
            if let Some((_, replicas)) = pools.iter().find(|(p, _)| &p.id == pool)
            {
                return replicas.clone();
            }
        }
        Vec::new()
    }
    fn nexuses(&self, node: &NodeId) -> Vec<Nexus> {
        self.nodes
            .iter()
            .find(|(n, ..)| &n.id == node)
            .map(|(_, _, nexuses)| nexuses.clone())
            .unwrap_or_default()
    }
}
