use super::{super::node::watchdog::Watchdog, grpc::GrpcContext};
use common::{
    errors::{GrpcRequestError, NexusNotFound, PoolNotFound, SvcError},
    msg_translation::{MessageBusToRpc, RpcToMessageBus},
};
use mbus_api::{
    events::{Event, EventKind},
    v0::{
        CreatePool,
        CreateReplica,
        DestroyPool,
        DestroyReplica,
        Node,
        NodeId,
        NodeState,
        Pool,
        PoolId,
        PoolState,
        Protocol,
        Replica,
        ReplicaId,
        ShareReplica,
        UnshareReplica,
    },
    ResourceKind,
};
use mbus_api::v0::NexusState;
use rpc::mayastor::Null;
use snafu::{OptionExt, ResultExt};
use std::{cmp::Ordering, collections::HashMap};

/// A node is considered to have gone bad, and its pools/nexuses are marked
/// `Unknown`, once this many consecutive sync cycles have failed.
const SYNC_BAD_LIMIT: u32 = 3;

/// Wrapper over a `Node` plus a few useful methods/properties. Includes:
/// all pools and replicas from the node
/// a watchdog to keep track of the node's liveness
/// a lock to serialize mutating gRPC calls
#[derive(Debug, Clone)]
pub(crate) struct NodeWrapper {
    /// inner Node value
    node: Node,
    /// watchdog to track the node state
    watchdog: Watchdog,
    /// gRPC CRUD lock
    lock: Arc<tokio::sync::Mutex<()>>,
    /// pools part of the node
    pools: HashMap<PoolId, PoolWrapper>,
    /// nexuses part of the node
    nexuses: HashMap<NexusId, Nexus>,
    /// consecutive failed sync attempts
    sync_failures: u32,
    /// whether the last completed sync succeeded
    healthy: bool,
}

impl NodeWrapper {
    /// Create a new wrapper for a `Node` with a `deadline` for its watchdog
    pub(crate) fn new(node: &Node, deadline: std::time::Duration) -> Self {
        tracing::debug!("Creating new node {:?}", node);
        Self {
            node: node.clone(),
            watchdog: Watchdog::new(&node.id, deadline),
            pools: Default::default(),
            nexuses: Default::default(),
            lock: Default::default(),
            sync_failures: 0,
            healthy: true,
        }
    }

    /// Get `GrpcClient` for this node
    async fn grpc_client(&self) -> Result<GrpcClient, SvcError> {
        GrpcClient::new(&GrpcContext::new(
            self.lock.clone(),
            &self.id,
            &self.node.grpc_endpoint,
        )?)
        .await
    }

    /// Get `GrpcContext` for this node
    pub(crate) fn grpc_context(&self) -> Result<GrpcContext, SvcError> {
        GrpcContext::new(self.lock.clone(), &self.id, &self.node.grpc_endpoint)
    }

    /// Whether the watchdog deadline has expired
    pub(crate) fn registration_expired(&self) -> bool {
        self.watchdog.timestamp().elapsed() > self.watchdog.deadline()
    }

    /// On_register callback when the node is registered with the registry
    pub(crate) async fn on_register(&mut self) {
        self.watchdog.pet().await.ok();
        self.set_state(NodeState::Online);
    }

    /// Update the node state based on the watchdog
    pub(crate) fn update(&mut self) {
        if self.registration_expired() {
            self.set_state(NodeState::Offline);
        }
    }

    /// Set the node state
    pub(crate) fn set_state(&mut self, state: NodeState) {
        if self.node.state != state {
            tracing::info!(
                "Node '{}' changing from {} to {}",
                self.node.id,
                self.node.state.to_string(),
                state.to_string(),
            );
            self.node.state = state;
            if self.node.state == NodeState::Unknown {
                self.watchdog.disarm()
            }
            for (_, pool) in self.pools.iter_mut() {
                pool.set_unknown();
            }
        }
    }

    /// Get a mutable reference to the node's watchdog
    pub(crate) fn watchdog_mut(&mut self) -> &mut Watchdog {
        &mut self.watchdog
    }
    /// Get the inner node
    pub(crate) fn node(&self) -> &Node {
        &self.node
    }
    /// Get all pools
    pub(crate) fn pools(&self) -> Vec<PoolWrapper> {
        self.pools.values().cloned().collect()
    }
    /// Get pool from `pool_id` or None
    pub(crate) fn pool(&self, pool_id: &PoolId) -> Option<&PoolWrapper> {
        self.pools.get(pool_id)
    }
    /// Get all replicas
    pub(crate) fn replicas(&self) -> Vec<Replica> {
        let replicas = self.pools.iter().map(|p| p.1.replicas());
        replicas.flatten().collect()
    }
    /// Get all nexuses
    pub(crate) fn nexuses(&self) -> Vec<Nexus> {
        self.nexuses.values().cloned().collect()
    }
    /// Get nexus
    pub(crate) fn nexus(&self, nexus_id: &NexusId) -> Option<&Nexus> {
        self.nexuses.get(nexus_id)
    }
    /// Get replica from `replica_id`
    pub(crate) fn replica(&self, replica_id: &ReplicaId) -> Option<&Replica> {
        self.pools
            .iter()
            .find_map(|p| p.1.replicas.iter().find(|r| &r.uuid == replica_id))
    }
    /// Is the node online
    pub(crate) fn is_online(&self) -> bool {
        self.node.state == NodeState::Online
    }

    /// Reload the node by fetching information from mayastor, diffing it
    /// against what was previously cached and returning the change events
    /// that diff produced. A failed sync never propagates the underlying
    /// gRPC error: after `SYNC_BAD_LIMIT` consecutive failures every pool
    /// and nexus cached for this node is marked `Unknown` and `healthy` is
    /// cleared, both reported as `mod` events; a single `node/sync` event
    /// is emitted the first time a sync succeeds again afterwards.
    pub(super) async fn reload(&mut self) -> Result<Vec<Event>, SvcError> {
        if !self.is_online() {
            tracing::trace!(
                "Skipping reload of node '{}' since it's '{:?}'",
                self.id,
                self.state
            );
            return Err(SvcError::NodeNotOnline {
                node: self.id.to_owned(),
            });
        }

        tracing::trace!("Reloading node '{}'", self.id);
        match self.try_sync().await {
            Ok(events) => Ok(events),
            Err(error) => {
                tracing::warn!(
                    "Sync of node '{}' failed: {}",
                    self.id,
                    error
                );
                Ok(self.record_sync_failure())
            }
        }
    }

    /// Fetch fresh pool/replica/nexus state, diff it against the cache and
    /// replace the cache, returning the events the diff produced.
    async fn try_sync(&mut self) -> Result<Vec<Event>, SvcError> {
        let replicas = self.fetch_replicas().await?;
        let pools = self.fetch_pools().await?;
        let nexuses = self.fetch_nexuses().await?;

        let mut new_pools = HashMap::new();
        for pool in &pools {
            let pool_replicas = replicas
                .iter()
                .filter(|r| r.pool == pool.id)
                .cloned()
                .collect::<Vec<_>>();
            new_pools.insert(
                pool.id.clone(),
                PoolWrapper::new(pool, &pool_replicas),
            );
        }
        let mut new_nexuses = HashMap::new();
        for nexus in &nexuses {
            new_nexuses.insert(nexus.uuid.clone(), nexus.clone());
        }

        let mut events = diff_pools(&self.pools, &new_pools);
        events.extend(diff_nexuses(&self.nexuses, &new_nexuses));

        self.pools = new_pools;
        self.nexuses = new_nexuses;
        self.sync_failures = 0;
        if !self.healthy {
            self.healthy = true;
            events.push(Event::modified(EventKind::Node(self.node.clone())));
        }
        Ok(events)
    }

    /// Bookkeeping for a failed sync attempt: bumps the failure counter and,
    /// once it crosses `SYNC_BAD_LIMIT`, marks every cached pool/nexus
    /// `Unknown` and flips `healthy` off, returning the resulting events.
    fn record_sync_failure(&mut self) -> Vec<Event> {
        self.sync_failures = self.sync_failures.saturating_add(1);
        if self.sync_failures <= SYNC_BAD_LIMIT || !self.healthy {
            return Vec::new();
        }

        self.healthy = false;
        let mut events = Vec::new();
        for pool in self.pools.values_mut() {
            pool.set_unknown();
            events.push(Event::modified(EventKind::Pool(Pool::from(&*pool))));
        }
        for nexus in self.nexuses.values_mut() {
            nexus.state = NexusState::Unknown;
            events.push(Event::modified(EventKind::Nexus(nexus.clone())));
        }
        events
    }

    /// Add pool with replicas
    fn add_pool_with_replicas(&mut self, pool: &Pool, replicas: &[Replica]) {
        self.pools
            .insert(pool.id.clone(), PoolWrapper::new(&pool, replicas));
    }
    /// Remove pool from node
    fn remove_pool(&mut self, pool: &PoolId) {
        self.pools.remove(&pool);
    }
    /// Add replica
    fn add_replica(&mut self, replica: &Replica) {
        match self.pools.iter_mut().find(|(id, _)| id == &&replica.pool) {
            None => {
                tracing::error!("Can't add replica '{}' to pool '{}' because the pool does not exist", replica.uuid, replica.pool);
            }
            Some((_, pool)) => {
                pool.add_replica(replica);
            }
        };
    }
    /// Remove replica from pool
    fn remove_replica(&mut self, pool: &PoolId, replica: &ReplicaId) {
        match self.pools.iter_mut().find(|(id, _)| id == &pool) {
            None => (),
            Some((_, pool)) => {
                pool.remove_replica(replica);
            }
        };
    }
    /// Update a replica's share uri and protocol
    fn share_replica(
        &mut self,
        share: &Protocol,
        uri: &str,
        pool: &PoolId,
        replica: &ReplicaId,
    ) {
        match self.pools.iter_mut().find(|(id, _)| id == &pool) {
            None => (),
            Some((_, pool)) => {
                pool.update_replica(replica, share, uri);
            }
        };
    }
    /// Unshare a replica by removing its share protocol and uri
    fn unshare_replica(&mut self, pool: &PoolId, replica: &ReplicaId) {
        self.share_replica(&Protocol::Off, "", pool, replica);
    }
    /// Add a new nexus to the node
    fn add_nexus(&mut self, nexus: &Nexus) {
        self.nexuses.insert(nexus.uuid.clone(), nexus.clone());
    }
    /// Remove nexus from the node
    fn remove_nexus(&mut self, nexus: &NexusId) {
        self.nexuses.remove(nexus);
    }
    /// Update a nexus share uri
    fn share_nexus(&mut self, uri: &str, nexus: &NexusId) {
        match self.nexuses.get_mut(nexus) {
            None => (),
            Some(nexus) => {
                nexus.device_uri = uri.to_string();
            }
        }
    }
    /// Unshare a nexus by removing its share uri
    fn unshare_nexus(&mut self, nexus: &NexusId) {
        self.share_nexus("", nexus);
    }
    /// Add a Child to the nexus
    fn add_child(&mut self, nexus: &NexusId, child: &Child) {
        match self.nexuses.get_mut(nexus) {
            None => (),
            Some(nexus) => {
                nexus.children.push(child.clone());
            }
        }
    }
    /// Remove child from the nexus
    fn remove_child(&mut self, nexus: &NexusId, child: &ChildUri) {
        match self.nexuses.get_mut(nexus) {
            None => (),
            Some(nexus) => {
                nexus.children.retain(|c| &c.uri != child);
            }
        }
    }

    /// Fetch all replicas from this node via gRPC
    async fn fetch_replicas(&self) -> Result<Vec<Replica>, SvcError> {
        let mut ctx = self.grpc_client().await?;
        let rpc_replicas = ctx.client.list_replicas(Null {}).await.context(
            GrpcRequestError {
                resource: ResourceKind::Replica,
                request: "list_replicas",
            },
        )?;
        let rpc_replicas = &rpc_replicas.get_ref().replicas;
        let pools = rpc_replicas
            .iter()
            .map(|p| rpc_replica_to_bus(p, &self.id))
            .collect();
        Ok(pools)
    }
    /// Fetch all pools from this node via gRPC
    async fn fetch_pools(&self) -> Result<Vec<Pool>, SvcError> {
        let mut ctx = self.grpc_client().await?;
        let rpc_pools =
            ctx.client
                .list_pools(Null {})
                .await
                .context(GrpcRequestError {
                    resource: ResourceKind::Pool,
                    request: "list_pools",
                })?;
        let rpc_pools = &rpc_pools.get_ref().pools;
        let pools = rpc_pools
            .iter()
            .map(|p| rpc_pool_to_bus(p, &self.id))
            .collect();
        Ok(pools)
    }
    /// Fetch all nexuses from the node via gRPC
    async fn fetch_nexuses(&self) -> Result<Vec<Nexus>, SvcError> {
        let mut ctx = self.grpc_client().await?;
        let rpc_nexuses =
            ctx.client
                .list_nexus(Null {})
                .await
                .context(GrpcRequestError {
                    resource: ResourceKind::Nexus,
                    request: "list_nexus",
                })?;
        let rpc_nexuses = &rpc_nexuses.get_ref().nexus_list;
        let nexuses = rpc_nexuses
            .iter()
            .map(|n| rpc_nexus_to_bus(n, &self.id))
            .collect();
        Ok(nexuses)
    }
}

impl std::ops::Deref for NodeWrapper {
    type Target = Node;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

use crate::core::grpc::{GrpcClient, GrpcClientLocked};
use async_trait::async_trait;
use mbus_api::v0::{
    AddNexusChild,
    Child,
    ChildUri,
    CreateNexus,
    DestroyNexus,
    Nexus,
    NexusId,
    RemoveNexusChild,
    ShareNexus,
    UnshareNexus,
};
use std::{ops::Deref, sync::Arc};

/// CRUD Operations on a locked mayastor `NodeWrapper` such as:
/// pools, replicas, nexuses and their children
#[async_trait]
pub trait ClientOps {
    /// Create a pool on the node via gRPC
    async fn create_pool(&self, request: &CreatePool)
        -> Result<Pool, SvcError>;
    /// Destroy a pool on the node via gRPC
    async fn destroy_pool(&self, request: &DestroyPool)
        -> Result<(), SvcError>;
    /// Create a replica on the pool via gRPC
    async fn create_replica(
        &self,
        request: &CreateReplica,
    ) -> Result<Replica, SvcError>;
    /// Share a replica on the pool via gRPC
    async fn share_replica(
        &self,
        request: &ShareReplica,
    ) -> Result<String, SvcError>;
    /// Unshare a replica on the pool via gRPC
    async fn unshare_replica(
        &self,
        request: &UnshareReplica,
    ) -> Result<(), SvcError>;
    /// Destroy a replica on the pool via gRPC
    async fn destroy_replica(
        &self,
        request: &DestroyReplica,
    ) -> Result<(), SvcError>;

    /// Create a nexus on a node via gRPC
    async fn create_nexus(
        &self,
        request: &CreateNexus,
    ) -> Result<Nexus, SvcError>;
    /// Destroy a nexus on a node via gRPC
    async fn destroy_nexus(
        &self,
        request: &DestroyNexus,
    ) -> Result<(), SvcError>;
    /// Share a nexus on the node via gRPC
    async fn share_nexus(
        &self,
        request: &ShareNexus,
    ) -> Result<String, SvcError>;
    /// Unshare a nexus on the node via gRPC
    async fn unshare_nexus(
        &self,
        request: &UnshareNexus,
    ) -> Result<(), SvcError>;
    /// Add a child to a nexus via gRPC
    async fn add_child(
        &self,
        request: &AddNexusChild,
    ) -> Result<Child, SvcError>;
    /// Remove a child from its parent nexus via gRPC
    async fn remove_child(
        &self,
        request: &RemoveNexusChild,
    ) -> Result<(), SvcError>;
}

/// Internal operations on a mayastor locked `NodeWrapper` for the implementor
/// of the `ClientOps` trait and the `Registry` itself
#[async_trait]
pub(crate) trait InternalOps {
    /// Get the grpc lock and client pair
    async fn grpc_client_locked(&self) -> Result<GrpcClientLocked, SvcError>;
    /// Get the inner lock, typically used to sync mutating gRPC operations
    async fn grpc_lock(&self) -> Arc<tokio::sync::Mutex<()>>;
}

/// Getter operations on a mayastor locked `NodeWrapper` to get copies of its
/// resources, such as pools, replicas and nexuses
#[async_trait]
pub(crate) trait GetterOps {
    /// copy of all pool wrappers on the node
    async fn pools(&self) -> Vec<PoolWrapper>;
    /// copy of pool `pool_id`, if present
    async fn pool(&self, pool_id: &PoolId) -> Option<PoolWrapper>;

    /// copy of all replicas on the node
    async fn replicas(&self) -> Vec<Replica>;
    /// copy of replica `replica`, if present
    async fn replica(&self, replica: &ReplicaId) -> Option<Replica>;

    /// copy of all nexuses on the node
    async fn nexuses(&self) -> Vec<Nexus>;
    /// copy of nexus `nexus_id`, if present
    async fn nexus(&self, nexus_id: &NexusId) -> Option<Nexus>;
}

#[async_trait]
impl GetterOps for Arc<tokio::sync::Mutex<NodeWrapper>> {
    async fn pools(&self) -> Vec<PoolWrapper> {
        let node = self.lock().await;
        node.pools()
    }
    async fn pool(&self, pool_id: &PoolId) -> Option<PoolWrapper> {
        let node = self.lock().await;
        node.pool(pool_id).cloned()
    }
    async fn replicas(&self) -> Vec<Replica> {
        let node = self.lock().await;
        node.replicas()
    }
    async fn replica(&self, replica: &ReplicaId) -> Option<Replica> {
        let node = self.lock().await;
        node.replica(replica).cloned()
    }
    async fn nexuses(&self) -> Vec<Nexus> {
        let node = self.lock().await;
        node.nexuses()
    }
    async fn nexus(&self, nexus_id: &NexusId) -> Option<Nexus> {
        let node = self.lock().await;
        node.nexus(nexus_id).cloned()
    }
}

#[async_trait]
impl InternalOps for Arc<tokio::sync::Mutex<NodeWrapper>> {
    async fn grpc_client_locked(&self) -> Result<GrpcClientLocked, SvcError> {
        let ctx = self.lock().await.grpc_context()?;
        let client = ctx.connect_locked().await?;
        Ok(client)
    }
    async fn grpc_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.lock().await.lock.clone()
    }
}

#[async_trait]
impl ClientOps for Arc<tokio::sync::Mutex<NodeWrapper>> {
    async fn create_pool(
        &self,
        request: &CreatePool,
    ) -> Result<Pool, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let pool = match ctx.client.create_pool(request.to_rpc()).await {
            Ok(rpc_pool) => rpc_pool_to_bus(&rpc_pool.into_inner(), &request.node),
            Err(status) if status.code() == tonic::Code::AlreadyExists => {
                tracing::debug!(
                    "Pool '{}' already exists on node '{}', re-reading it",
                    request.id,
                    request.node
                );
                let rpc_pools = ctx.client.list_pools(Null {}).await.context(
                    GrpcRequestError {
                        resource: ResourceKind::Pool,
                        request: "list_pools",
                    },
                )?;
                rpc_pools
                    .get_ref()
                    .pools
                    .iter()
                    .map(|p| rpc_pool_to_bus(p, &request.node))
                    .find(|p| p.id == request.id)
                    .context(PoolNotFound {
                        pool_id: request.id.clone(),
                    })?
            }
            Err(source) => {
                return Err(SvcError::GrpcRequestError {
                    resource: ResourceKind::Pool,
                    request: "create_pool".to_string(),
                    source,
                })
            }
        };

        self.lock().await.add_pool_with_replicas(&pool, &[]);
        Ok(pool)
    }
    async fn destroy_pool(
        &self,
        request: &DestroyPool,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx.client.destroy_pool(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Pool,
                request: "destroy_pool",
            },
        )?;
        self.lock().await.remove_pool(&request.id);
        Ok(())
    }

    async fn create_replica(
        &self,
        request: &CreateReplica,
    ) -> Result<Replica, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let rpc_replica =
            ctx.client.create_replica(request.to_rpc()).await.context(
                GrpcRequestError {
                    resource: ResourceKind::Replica,
                    request: "create_replica",
                },
            )?;

        let replica =
            rpc_replica_to_bus(&rpc_replica.into_inner(), &request.node);
        self.lock().await.add_replica(&replica);
        Ok(replica)
    }

    async fn share_replica(
        &self,
        request: &ShareReplica,
    ) -> Result<String, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let share = ctx
            .client
            .share_replica(request.to_rpc())
            .await
            .context(GrpcRequestError {
                resource: ResourceKind::Replica,
                request: "share_replica",
            })?
            .into_inner()
            .uri;
        self.lock().await.share_replica(
            &request.protocol,
            &share,
            &request.pool,
            &request.uuid,
        );
        Ok(share)
    }

    async fn unshare_replica(
        &self,
        request: &UnshareReplica,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx.client.share_replica(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Replica,
                request: "unshare_replica",
            },
        )?;
        self.lock()
            .await
            .unshare_replica(&request.pool, &request.uuid);
        Ok(())
    }

    async fn destroy_replica(
        &self,
        request: &DestroyReplica,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx.client.destroy_replica(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Replica,
                request: "destroy_replica",
            },
        )?;
        self.lock()
            .await
            .remove_replica(&request.pool, &request.uuid);
        Ok(())
    }

    async fn create_nexus(
        &self,
        request: &CreateNexus,
    ) -> Result<Nexus, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let nexus = match ctx.client.create_nexus(request.to_rpc()).await {
            Ok(rpc_nexus) => {
                rpc_nexus_to_bus(&rpc_nexus.into_inner(), &request.node)
            }
            Err(status) if status.code() == tonic::Code::AlreadyExists => {
                tracing::debug!(
                    "Nexus '{}' already exists on node '{}', re-reading it",
                    request.uuid,
                    request.node
                );
                let rpc_nexuses = ctx.client.list_nexus(Null {}).await.context(
                    GrpcRequestError {
                        resource: ResourceKind::Nexus,
                        request: "list_nexus",
                    },
                )?;
                rpc_nexuses
                    .get_ref()
                    .nexus_list
                    .iter()
                    .map(|n| rpc_nexus_to_bus(n, &request.node))
                    .find(|n| n.uuid == request.uuid)
                    .context(NexusNotFound {
                        nexus_id: request.uuid.to_string(),
                    })?
            }
            Err(source) => {
                return Err(SvcError::GrpcRequestError {
                    resource: ResourceKind::Nexus,
                    request: "create_nexus".to_string(),
                    source,
                })
            }
        };
        self.lock().await.add_nexus(&nexus);
        Ok(nexus)
    }

    async fn destroy_nexus(
        &self,
        request: &DestroyNexus,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx.client.destroy_nexus(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Nexus,
                request: "destroy_nexus",
            },
        )?;
        self.lock().await.remove_nexus(&request.uuid);
        Ok(())
    }

    async fn share_nexus(
        &self,
        request: &ShareNexus,
    ) -> Result<String, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let share = ctx.client.publish_nexus(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Nexus,
                request: "publish_nexus",
            },
        )?;
        let share = share.into_inner().device_uri;
        self.lock().await.share_nexus(&share, &request.uuid);
        Ok(share)
    }

    async fn unshare_nexus(
        &self,
        request: &UnshareNexus,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx.client.unpublish_nexus(request.to_rpc()).await.context(
            GrpcRequestError {
                resource: ResourceKind::Nexus,
                request: "unpublish_nexus",
            },
        )?;
        self.lock().await.unshare_nexus(&request.uuid);
        Ok(())
    }

    async fn add_child(
        &self,
        request: &AddNexusChild,
    ) -> Result<Child, SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let rpc_child =
            ctx.client.add_child_nexus(request.to_rpc()).await.context(
                GrpcRequestError {
                    resource: ResourceKind::Child,
                    request: "add_child_nexus",
                },
            )?;
        let child = rpc_child.into_inner().to_mbus();
        self.lock().await.add_child(&request.nexus, &child);
        Ok(child)
    }

    async fn remove_child(
        &self,
        request: &RemoveNexusChild,
    ) -> Result<(), SvcError> {
        let mut ctx = self.grpc_client_locked().await?;
        let _ = ctx
            .client
            .remove_child_nexus(request.to_rpc())
            .await
            .context(GrpcRequestError {
                resource: ResourceKind::Child,
                request: "remove_child_nexus",
            })?;
        self.lock().await.remove_child(&request.nexus, &request.uri);
        Ok(())
    }
}

/// convert rpc pool to a message bus pool
fn rpc_pool_to_bus(rpc_pool: &rpc::mayastor::Pool, id: &NodeId) -> Pool {
    let mut pool = rpc_pool.to_mbus();
    pool.node = id.clone();
    pool
}

/// convert rpc replica to a message bus replica
fn rpc_replica_to_bus(
    rpc_replica: &rpc::mayastor::Replica,
    id: &NodeId,
) -> Replica {
    let mut replica = rpc_replica.to_mbus();
    replica.node = id.clone();
    replica
}

/// convert rpc nexus to a message bus nexus
fn rpc_nexus_to_bus(rpc_nexus: &rpc::mayastor::Nexus, id: &NodeId) -> Nexus {
    let mut nexus = rpc_nexus.to_mbus();
    nexus.node = id.clone();
    nexus
}

/// Diff a node's previously cached pools against a freshly fetched set,
/// producing `new`/`mod`/`del` events for the pools themselves and for the
/// replicas they carry.
fn diff_pools(
    old: &HashMap<PoolId, PoolWrapper>,
    new: &HashMap<PoolId, PoolWrapper>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for (id, pool) in new {
        match old.get(id) {
            None => {
                events.push(Event::new(EventKind::Pool(Pool::from(pool))));
                for replica in pool.replicas() {
                    events.push(Event::new(EventKind::Replica(replica)));
                }
            }
            Some(old_pool) => {
                if pool_changed(old_pool, pool) {
                    events.push(Event::modified(EventKind::Pool(Pool::from(
                        pool,
                    ))));
                }
                events.extend(diff_replicas(
                    &old_pool.replicas(),
                    &pool.replicas(),
                ));
            }
        }
    }
    for (id, pool) in old {
        if !new.contains_key(id) {
            events.push(Event::deleted(EventKind::Pool(Pool::from(pool))));
            for replica in pool.replicas() {
                events.push(Event::deleted(EventKind::Replica(replica)));
            }
        }
    }
    events
}

fn pool_changed(old: &PoolWrapper, new: &PoolWrapper) -> bool {
    old.capacity != new.capacity
        || old.used != new.used
        || old.disks != new.disks
        || old.state != new.state
}

/// Diff one pool's previously cached replicas against a freshly fetched set.
fn diff_replicas(old: &[Replica], new: &[Replica]) -> Vec<Event> {
    let mut events = Vec::new();
    for replica in new {
        match old.iter().find(|r| r.uuid == replica.uuid) {
            None => events.push(Event::new(EventKind::Replica(replica.clone()))),
            Some(old_replica) => {
                if old_replica != replica {
                    events.push(Event::modified(EventKind::Replica(
                        replica.clone(),
                    )));
                }
            }
        }
    }
    for replica in old {
        if !new.iter().any(|r| r.uuid == replica.uuid) {
            events.push(Event::deleted(EventKind::Replica(replica.clone())));
        }
    }
    events
}

/// Diff a node's previously cached nexuses against a freshly fetched set.
fn diff_nexuses(
    old: &HashMap<NexusId, Nexus>,
    new: &HashMap<NexusId, Nexus>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for (id, nexus) in new {
        match old.get(id) {
            None => events.push(Event::new(EventKind::Nexus(nexus.clone()))),
            Some(old_nexus) => {
                if nexus_changed(old_nexus, nexus) {
                    events.push(Event::modified(EventKind::Nexus(
                        nexus.clone(),
                    )));
                }
            }
        }
    }
    for (id, nexus) in old {
        if !new.contains_key(id) {
            events.push(Event::deleted(EventKind::Nexus(nexus.clone())));
        }
    }
    events
}

fn nexus_changed(old: &Nexus, new: &Nexus) -> bool {
    if old.state != new.state
        || old.device_uri != new.device_uri
        || old.size != new.size
    {
        return true;
    }
    let mut old_children = old.children.clone();
    let mut new_children = new.children.clone();
    old_children.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
    new_children.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
    old_children != new_children
}

/// Wrapper over the message bus `Pool` which includes all the replicas
/// and Ord traits to aid pool selection for volume replicas
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolWrapper {
    pool: Pool,
    replicas: Vec<Replica>,
}

impl Deref for PoolWrapper {
    type Target = Pool;
    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl PoolWrapper {
    /// New Pool wrapper with the pool and replicas
    pub fn new(pool: &Pool, replicas: &[Replica]) -> Self {
        Self {
            pool: pool.clone(),
            replicas: replicas.into(),
        }
    }

    /// Get the pool's replicas
    pub fn replicas(&self) -> Vec<Replica> {
        self.replicas.clone()
    }
    /// Get replica from the pool
    pub fn replica(&self, replica: &ReplicaId) -> Option<&Replica> {
        self.replicas.iter().find(|r| &r.uuid == replica)
    }

    /// Get the free space
    pub fn free_space(&self) -> u64 {
        if self.pool.capacity >= self.pool.used {
            self.pool.capacity - self.pool.used
        } else {
            tracing::error!(
                "Pool '{}' has a capacity of '{} B' but is using '{} B'",
                self.pool.id,
                self.pool.capacity,
                self.pool.used
            );
            0
        }
    }

    /// Set pool state as unknown
    pub fn set_unknown(&mut self) {
        self.pool.state = PoolState::Unknown;
    }

    /// Add replica to list
    pub fn add_replica(&mut self, replica: &Replica) {
        self.replicas.push(replica.clone())
    }
    /// Remove replica from list
    pub fn remove_replica(&mut self, uuid: &ReplicaId) {
        self.replicas.retain(|replica| &replica.uuid != uuid)
    }
    /// update replica from list
    pub fn update_replica(
        &mut self,
        uuid: &ReplicaId,
        share: &Protocol,
        uri: &str,
    ) {
        if let Some(replica) = self
            .replicas
            .iter_mut()
            .find(|replica| &replica.uuid == uuid)
        {
            replica.share = share.clone();
            replica.uri = uri.to_string();
        }
    }
}

impl From<&NodeWrapper> for Node {
    fn from(node: &NodeWrapper) -> Self {
        node.node.clone()
    }
}
impl From<NodeWrapper> for Vec<Replica> {
    fn from(node: NodeWrapper) -> Self {
        node.pools
            .values()
            .map(Vec::<Replica>::from)
            .flatten()
            .collect()
    }
}
impl From<NodeWrapper> for Vec<PoolWrapper> {
    fn from(node: NodeWrapper) -> Self {
        node.pools.values().cloned().collect()
    }
}

impl From<PoolWrapper> for Pool {
    fn from(pool: PoolWrapper) -> Self {
        pool.pool
    }
}
impl From<&PoolWrapper> for Pool {
    fn from(pool: &PoolWrapper) -> Self {
        pool.pool.clone()
    }
}
impl From<PoolWrapper> for Vec<Replica> {
    fn from(pool: PoolWrapper) -> Self {
        pool.replicas
    }
}
impl From<&PoolWrapper> for Vec<Replica> {
    fn from(pool: &PoolWrapper) -> Self {
        pool.replicas.clone()
    }
}

// Pool ordering used to pick the best pool for a new replica:
// 1. state (online > degraded > unknown)
// 2. smaller n replicas
// (here we should have pool IO stats over time so we can pick less active
// pools rather than the number of replicas which is useless if the volumes
// are not active)
impl PartialOrd for PoolWrapper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.pool.state.partial_cmp(&other.pool.state) {
            Some(Ordering::Greater) => Some(Ordering::Greater),
            Some(Ordering::Less) => Some(Ordering::Less),
            Some(Ordering::Equal) => {
                match self.replicas.len().cmp(&other.replicas.len()) {
                    Ordering::Greater => Some(Ordering::Greater),
                    Ordering::Less => Some(Ordering::Less),
                    Ordering::Equal => {
                        Some(self.free_space().cmp(&other.free_space()))
                    }
                }
            }
            None => None,
        }
    }
}

impl Ord for PoolWrapper {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.pool.state.partial_cmp(&other.pool.state) {
            Some(Ordering::Greater) => Ordering::Greater,
            Some(Ordering::Less) => Ordering::Less,
            Some(Ordering::Equal) => {
                match self.replicas.len().cmp(&other.replicas.len()) {
                    Ordering::Greater => Ordering::Greater,
                    Ordering::Less => Ordering::Less,
                    Ordering::Equal => {
                        self.free_space().cmp(&other.free_space())
                    }
                }
            }
            None => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbus_api::{events::EventType, v0::ChildUri};

    fn pool(id: &str, used: u64) -> Pool {
        Pool {
            node: "n1".into(),
            id: PoolId::from(id),
            disks: vec!["/dev/sdb".to_string()],
            state: PoolState::Online,
            capacity: 100,
            used,
        }
    }

    fn replica(uuid: &str, pool_id: &str) -> Replica {
        Replica {
            node: "n1".into(),
            uuid: uuid.into(),
            pool: PoolId::from(pool_id),
            thin: false,
            size: 1,
            share: Protocol::Off,
            uri: format!("bdev:///{}", uuid),
        }
    }

    #[test]
    fn diff_pools_detects_new_mod_del() {
        let mut old = HashMap::new();
        old.insert(
            PoolId::from("stale"),
            PoolWrapper::new(&pool("stale", 0), &[]),
        );
        old.insert(
            PoolId::from("p1"),
            PoolWrapper::new(&pool("p1", 0), &[replica("r1", "p1")]),
        );

        let mut new = HashMap::new();
        new.insert(
            PoolId::from("p1"),
            PoolWrapper::new(&pool("p1", 50), &[replica("r1", "p1")]),
        );
        new.insert(
            PoolId::from("fresh"),
            PoolWrapper::new(&pool("fresh", 0), &[replica("r2", "fresh")]),
        );

        let events = diff_pools(&old, &new);

        let news: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::New)
            .collect();
        let mods: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Mod)
            .collect();
        let dels: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Del)
            .collect();

        assert!(news
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Pool(p) if p.id == PoolId::from("fresh"))));
        assert!(news
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Replica(r) if r.uuid == ReplicaId::from("r2"))));
        assert!(mods
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Pool(p) if p.id == PoolId::from("p1"))));
        assert!(dels
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Pool(p) if p.id == PoolId::from("stale"))));
        // r1 is unchanged between old and new, so it produces no event
        assert!(!events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Replica(r) if r.uuid == ReplicaId::from("r1"))));
    }

    #[test]
    fn nexus_child_diff_ignores_order() {
        let child = |uri: &str| Child {
            uri: ChildUri::from(uri),
            state: mbus_api::v0::ChildState::Online,
            rebuild_progress: None,
        };
        let mut a = Nexus {
            node: "n1".into(),
            uuid: "nexus1".into(),
            size: 1,
            state: NexusState::Online,
            children: vec![child("a"), child("b")],
            device_uri: "".to_string(),
            rebuilds: 0,
        };
        let mut b = a.clone();
        b.children = vec![child("b"), child("a")];
        assert!(!nexus_changed(&a, &b));

        b.children.push(child("c"));
        assert!(nexus_changed(&a, &b));

        a.children = b.children.clone();
        assert!(!nexus_changed(&a, &b));
    }

    #[test]
    fn record_sync_failure_marks_unknown_past_bad_limit() {
        let node = Node {
            id: "n1".into(),
            grpc_endpoint: "127.0.0.1:10124".to_string(),
            state: NodeState::Online,
        };
        let mut wrapper =
            NodeWrapper::new(&node, std::time::Duration::from_secs(1));
        wrapper.add_pool_with_replicas(&pool("p1", 0), &[]);

        for _ in 0..SYNC_BAD_LIMIT {
            assert!(wrapper.record_sync_failure().is_empty());
            assert!(wrapper.healthy);
        }

        let events = wrapper.record_sync_failure();
        assert!(!wrapper.healthy);
        assert!(events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Pool(p) if p.state == PoolState::Unknown)));
    }
}
