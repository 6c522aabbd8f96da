//! Restartable, backpressure-aware stream of control-plane change events.
//!
//! Every Node, the Registry and the Volume/Pool reconcilers emit events
//! through the same `{kind, eventType, object}` shape so that a single
//! consumer (the `VolumeManager`, the `PoolReconciler`, or an orchestrator-
//! side CR operator) can multiplex over all of them without caring which
//! component produced a given event.

use crate::v0::{Nexus, Node, Pool, Replica};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of object an `Event` carries.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A storage node
    Node(Node),
    /// A storage pool
    Pool(Pool),
    /// A replica
    Replica(Replica),
    /// A nexus
    Nexus(Nexus),
}

/// How the object changed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventType {
    /// Object observed for the first time
    New,
    /// Some field of the object changed
    Mod,
    /// Object no longer exists
    Del,
    /// A Node finished a sync cycle (no single object changed)
    Sync,
}

/// A single tagged change event, in the shape every producer (Node,
/// Registry, reconcilers) emits.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Event {
    /// what changed
    pub kind: EventKind,
    /// how it changed
    pub event_type: EventType,
}
impl Event {
    /// Build a `new` event
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            event_type: EventType::New,
        }
    }
    /// Build a `mod` event
    pub fn modified(kind: EventKind) -> Self {
        Self {
            kind,
            event_type: EventType::Mod,
        }
    }
    /// Build a `del` event
    pub fn deleted(kind: EventKind) -> Self {
        Self {
            kind,
            event_type: EventType::Del,
        }
    }
}

/// Anything that can produce the warm-up snapshot an `EventStream` replays
/// to a freshly attached consumer. Implemented by the Node registry.
pub trait WarmupSource {
    /// Every currently known node, in the order warm-up events should be
    /// synthesized for
    fn nodes(&self) -> Vec<Node>;
    /// Every pool currently known on `node`
    fn pools(&self, node: &crate::v0::NodeId) -> Vec<Pool>;
    /// Every replica currently known on `pool`
    fn replicas(&self, pool: &crate::v0::PoolId) -> Vec<Replica>;
    /// Every nexus currently known on `node`
    fn nexuses(&self, node: &crate::v0::NodeId) -> Vec<Nexus>;
}

/// Producer-side handle: every Node/Registry/reconciler holds one of these
/// and calls `emit` whenever its observed state changes.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}
impl EventSink {
    /// Push an event. Consumers never see these dropped: the channel is
    /// unbounded, matching the "no dropping, queue in memory" requirement.
    pub fn emit(&self, event: Event) {
        // the receiving EventStream may have been torn down (restart); a
        // send error here just means there is nobody left to observe it.
        let _ = self.tx.send(event);
    }
}

/// Consumer-side handle. A fresh `EventStream` replays a warm-up batch
/// before forwarding any events emitted after it was constructed, so a
/// consumer that (re)starts never needs to query current state out of band.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
    warmup: std::collections::VecDeque<Event>,
}

impl EventStream {
    /// Construct a connected `(EventSink, EventStream)` pair. `source` is
    /// snapshotted once, at construction time, to build the warm-up batch;
    /// it plays no further part once live events start flowing.
    pub fn new(source: &dyn WarmupSource) -> (EventSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let warmup = Self::synthesize_warmup(source);
        (EventSink { tx }, Self { rx, warmup })
    }

    fn synthesize_warmup(
        source: &dyn WarmupSource,
    ) -> std::collections::VecDeque<Event> {
        let mut events = std::collections::VecDeque::new();
        for node in source.nodes() {
            let node_id = node.id.clone();
            events.push_back(Event::new(EventKind::Node(node)));
            for pool in source.pools(&node_id) {
                let pool_id = pool.id.clone();
                events.push_back(Event::new(EventKind::Pool(pool)));
                for replica in source.replicas(&pool_id) {
                    events.push_back(Event::new(EventKind::Replica(replica)));
                }
            }
            for nexus in source.nexuses(&node_id) {
                events.push_back(Event::new(EventKind::Nexus(nexus)));
            }
            events.push_back(Event {
                kind: EventKind::Node(Node {
                    id: node_id,
                    ..Default::default()
                }),
                event_type: EventType::Sync,
            });
        }
        events
    }

    /// Pull the next event: the remaining warm-up batch first, in order,
    /// then live events forwarded from the channel. Returns `None` only
    /// once the paired `EventSink` (and every clone) has been dropped.
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.warmup.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v0::{NodeId, NodeState, PoolId};

    struct FakeSource {
        node: Node,
        pool: Pool,
    }
    impl WarmupSource for FakeSource {
        fn nodes(&self) -> Vec<Node> {
            vec![self.node.clone()]
        }
        fn pools(&self, node: &NodeId) -> Vec<Pool> {
            if node == &self.node.id {
                vec![self.pool.clone()]
            } else {
                vec![]
            }
        }
        fn replicas(&self, _pool: &PoolId) -> Vec<Replica> {
            vec![]
        }
        fn nexuses(&self, _node: &NodeId) -> Vec<Nexus> {
            vec![]
        }
    }

    #[tokio::test]
    async fn warmup_then_live() {
        let node = Node {
            id: NodeId::from("n1"),
            grpc_endpoint: "127.0.0.1:10124".to_string(),
            state: NodeState::Online,
        };
        let pool = Pool {
            node: node.id.clone(),
            id: PoolId::from("p1"),
            ..Default::default()
        };
        let source = FakeSource {
            node: node.clone(),
            pool: pool.clone(),
        };
        let (sink, mut stream) = EventStream::new(&source);

        assert_eq!(
            stream.next().await,
            Some(Event::new(EventKind::Node(node.clone())))
        );
        assert_eq!(
            stream.next().await,
            Some(Event::new(EventKind::Pool(pool)))
        );
        match stream.next().await {
            Some(Event {
                event_type: EventType::Sync,
                ..
            }) => {}
            other => panic!("expected a sync event, got {:?}", other),
        }

        sink.emit(Event::modified(EventKind::Node(node.clone())));
        assert_eq!(
            stream.next().await,
            Some(Event::modified(EventKind::Node(node)))
        );
    }
}
