//! Keeps the declared set of pools converged against what each node
//! actually reports, owns the committed placement for each one, and
//! finalizes a "busy" marker while a pool still holds replicas.
//!
//! Every mutation runs through a single-consumer [`WorkQueue`] so a
//! periodic reconcile pass never races a user-initiated declare/remove
//! for the same pool.

use crate::core::{registry::Registry, wrapper::ClientOps};
use common::{errors::SvcError, work_queue::WorkQueue};
use mbus_api::v0::{CreatePool, DestroyPool, NodeId, Pool, PoolId, PoolState};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;

/// Placement committed for a pool the first time it's declared. Immutable
/// afterwards: a later `declare` naming the same pool with a different
/// node or disk set is refused rather than treated as an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommittedSpec {
    pub(crate) node: NodeId,
    pub(crate) disks: Vec<String>,
}

/// Stand-in for the custom resource the on-cluster operator mirrors this
/// state onto; this agent has no Kubernetes client of its own, so the
/// mirror lives here and is surfaced to callers/logs instead.
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolMirror {
    pub(crate) state: Option<PoolState>,
    pub(crate) reason: String,
    pub(crate) capacity: u64,
    pub(crate) used: u64,
    pub(crate) busy: bool,
}

struct DesiredPool {
    spec: CommittedSpec,
    mirror: PoolMirror,
}

/// Result of a queued pool action; `WorkQueue` is single-typed per queue,
/// so `declare`/`remove`/`create` all funnel through this one shape.
enum PoolOutcome {
    Unit,
    Created(Pool),
}

/// Reconciles declared pools against the registry's observed state.
#[derive(Clone)]
pub(crate) struct PoolReconciler {
    registry: Registry,
    desired: Arc<RwLock<HashMap<PoolId, DesiredPool>>>,
    queue: WorkQueue<PoolOutcome, SvcError>,
}

impl std::fmt::Debug for PoolReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolReconciler").finish_non_exhaustive()
    }
}

impl PoolReconciler {
    pub(crate) fn new(registry: Registry) -> Self {
        Self {
            registry,
            desired: Default::default(),
            queue: WorkQueue::new(),
        }
    }

    /// Commit a pool's placement. Idempotent when `node`/`disks` match
    /// what's already committed; a mismatching re-declare is a user error,
    /// not a resync, and is rejected without touching the existing record.
    fn commit_spec(
        desired: &mut HashMap<PoolId, DesiredPool>,
        id: PoolId,
        node: NodeId,
        disks: Vec<String>,
    ) -> Result<(), SvcError> {
        match desired.get(&id) {
            Some(existing)
                if existing.spec.node == node && existing.spec.disks == disks =>
            {
                Ok(())
            }
            Some(_) => Err(SvcError::Internal {
                details: format!(
                    "pool '{}' is already committed to a different node/disk set",
                    id
                ),
            }),
            None => {
                desired.insert(
                    id,
                    DesiredPool {
                        spec: CommittedSpec { node, disks },
                        mirror: PoolMirror::default(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Commit a pool's placement without creating it remotely yet; used to
    /// bring a pool under reconciliation without an immediate RPC (e.g. a
    /// pool discovered already present on a node).
    pub(crate) async fn declare(
        &self,
        id: PoolId,
        node: NodeId,
        disks: Vec<String>,
    ) -> Result<(), SvcError> {
        let desired = self.desired.clone();
        self.queue
            .submit(move || async move {
                Self::commit_spec(&mut *desired.write().await, id, node, disks)?;
                Ok(PoolOutcome::Unit)
            })
            .await?;
        Ok(())
    }

    /// Commit a pool's placement and create it on its node, returning the
    /// created pool. The committed spec is immutable afterwards: a repeat
    /// call naming the same pool with a different node/disk set fails
    /// without touching the node or the existing record.
    pub(crate) async fn create(
        &self,
        id: PoolId,
        node_id: NodeId,
        disks: Vec<String>,
    ) -> Result<Pool, SvcError> {
        let registry = self.registry.clone();
        let desired = self.desired.clone();
        self.queue
            .submit(move || async move {
                Self::commit_spec(
                    &mut *desired.write().await,
                    id.clone(),
                    node_id.clone(),
                    disks.clone(),
                )?;
                let node = registry.get_node_wrapper(&node_id).await.ok_or_else(|| {
                    SvcError::NodeNotFound {
                        node_id: node_id.clone(),
                    }
                })?;
                let request = CreatePool {
                    node: node_id,
                    id,
                    disks,
                };
                let pool = node.create_pool(&request).await?;
                Ok(PoolOutcome::Created(pool))
            })
            .await
            .map(|outcome| match outcome {
                PoolOutcome::Created(pool) => pool,
                PoolOutcome::Unit => unreachable!("create always returns Created"),
            })
    }

    /// Stop declaring a pool. Destroys it on its node if the node is
    /// reachable; if it isn't, the failure is logged but the desired
    /// record is dropped anyway so a later `declare` isn't blocked by a
    /// pool this agent can no longer reach.
    pub(crate) async fn remove(&self, id: PoolId) -> Result<(), SvcError> {
        let registry = self.registry.clone();
        let desired = self.desired.clone();
        self.queue
            .submit(move || async move {
                let spec = desired.read().await.get(&id).map(|d| d.spec.clone());
                if let Some(spec) = spec {
                    match registry.get_node_wrapper(&spec.node).await {
                        Some(node) => {
                            let request = DestroyPool {
                                node: spec.node.clone(),
                                id: id.clone(),
                            };
                            if let Err(error) = node.destroy_pool(&request).await {
                                tracing::error!(
                                    "failed to destroy pool '{}' on node '{}': {}",
                                    id,
                                    spec.node,
                                    error
                                );
                            }
                        }
                        None => tracing::warn!(
                            "node '{}' for pool '{}' is unreachable, dropping the desired record anyway",
                            spec.node,
                            id
                        ),
                    }
                }
                desired.write().await.remove(&id);
                Ok(PoolOutcome::Unit)
            })
            .await?;
        Ok(())
    }

    /// Set the busy marker: a replica was just created on this pool.
    pub(crate) async fn on_replica_new(&self, pool_id: &PoolId) {
        if let Some(desired) = self.desired.write().await.get_mut(pool_id) {
            desired.mirror.busy = true;
        }
    }

    /// Clear the busy marker once the pool has no more replicas.
    pub(crate) async fn on_replica_del(&self, pool_id: &PoolId) {
        let still_busy = !self
            .registry
            .get_pool_wrapper(pool_id)
            .await
            .map(|pool| pool.replicas().is_empty())
            .unwrap_or(true);
        if let Some(desired) = self.desired.write().await.get_mut(pool_id) {
            desired.mirror.busy = still_busy;
        }
    }

    /// One reconcile pass: destroy pools nobody declared, create pools
    /// that are declared but missing, and mirror the rest.
    pub(crate) async fn reconcile_once(&self) {
        let observed = self.registry.get_pools_wrapper().await.unwrap_or_default();
        let observed_ids: HashMap<_, _> =
            observed.iter().map(|pool| (pool.id.clone(), pool)).collect();

        for pool in &observed {
            let known = self.desired.read().await.contains_key(&pool.id);
            if !known {
                tracing::warn!(
                    "destroying pool '{}' on node '{}': not declared by any volume spec",
                    pool.id,
                    pool.node
                );
                if let Some(node) = self.registry.get_node_wrapper(&pool.node).await {
                    let request = DestroyPool {
                        node: pool.node.clone(),
                        id: pool.id.clone(),
                    };
                    if let Err(error) = node.destroy_pool(&request).await {
                        tracing::error!(
                            "failed to destroy unknown pool '{}': {}",
                            pool.id,
                            error
                        );
                    }
                }
            }
        }

        let ids: Vec<PoolId> = self.desired.read().await.keys().cloned().collect();
        for id in ids {
            let spec = match self.desired.read().await.get(&id) {
                Some(desired) => desired.spec.clone(),
                None => continue,
            };

            match observed_ids.get(&id) {
                Some(pool) => {
                    let busy = !pool.replicas().is_empty();
                    if let Some(desired) = self.desired.write().await.get_mut(&id) {
                        desired.mirror.state = Some(pool.state.clone());
                        desired.mirror.capacity = pool.capacity;
                        desired.mirror.used = pool.used;
                        desired.mirror.reason = String::new();
                        desired.mirror.busy = busy;
                    }
                }
                None => {
                    let node = self.registry.get_node_wrapper(&spec.node).await;
                    let online = match &node {
                        Some(node) => node.lock().await.is_online(),
                        None => false,
                    };
                    if online {
                        let request = CreatePool {
                            node: spec.node.clone(),
                            id: id.clone(),
                            disks: spec.disks.clone(),
                        };
                        match node
                            .expect("just confirmed online")
                            .create_pool(&request)
                            .await
                        {
                            Ok(_) => {
                                if let Some(desired) = self.desired.write().await.get_mut(&id) {
                                    desired.mirror.reason = String::new();
                                }
                            }
                            Err(error) => {
                                tracing::error!(
                                    "failed to create declared pool '{}' on node '{}': {}",
                                    id,
                                    spec.node,
                                    error
                                );
                                if let Some(desired) = self.desired.write().await.get_mut(&id) {
                                    desired.mirror.reason = error.to_string();
                                }
                            }
                        }
                    } else if let Some(desired) = self.desired.write().await.get_mut(&id) {
                        desired.mirror.reason = format!(
                            "node '{}' is not online, pool creation is pending",
                            spec.node
                        );
                    }
                }
            }
        }
    }

    /// Spawn the periodic reconcile loop. The returned handle can be
    /// dropped to stop it.
    pub(crate) fn spawn_periodic(self, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.reconcile_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn declare_is_idempotent_but_rejects_respec() {
        let registry = Registry::new(Duration::from_secs(1));
        let reconciler = PoolReconciler::new(registry);
        let id: PoolId = "pool-1".into();
        let node: NodeId = "node-1".into();
        let disks = vec!["malloc:///disk0?size_mb=100".to_string()];

        reconciler
            .declare(id.clone(), node.clone(), disks.clone())
            .await
            .unwrap();
        reconciler
            .declare(id.clone(), node.clone(), disks.clone())
            .await
            .unwrap();

        let other_disks = vec!["malloc:///disk1?size_mb=100".to_string()];
        assert!(reconciler.declare(id, node, other_disks).await.is_err());
    }
}
