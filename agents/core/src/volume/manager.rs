//! In-memory table of volumes, keyed by UUID, plus the one-shot initial
//! provisioning step and the event-routing that keeps every volume's FSA
//! running as the cluster changes underneath it.

use super::{scheduling::choose_pools, volume::Volume};
use crate::core::{registry::Registry, wrapper::ClientOps};
use common::errors::{NodeNotFound, NotEnough, SvcError, VolumeNotFound};
use mbus_api::{
    events::{Event, EventKind, EventType},
    v0::{
        CreateReplica,
        NodeId,
        Protocol,
        ReplicaId,
        Volume as BusVolume,
        VolumeId,
        VolumeSpec,
        VolumeState,
    },
};
use snafu::OptionExt;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Owns every `Volume` known to the core agent and provisions new ones.
#[derive(Clone)]
pub(crate) struct VolumeManager {
    registry: Registry,
    volumes: Arc<RwLock<HashMap<VolumeId, Volume>>>,
}

impl VolumeManager {
    pub(crate) fn new(registry: Registry) -> Self {
        let manager = Self {
            registry,
            volumes: Default::default(),
        };
        manager.clone().spawn_event_loop();
        manager
    }

    /// Subscribe to the registry's change stream and keep every volume's
    /// FSA in sync with cluster state observed outside a direct publish/
    /// unpublish/destroy/update call: a pool coming back online, a replica
    /// or nexus changing underneath a volume, or a node recovering.
    fn spawn_event_loop(self) {
        tokio::spawn(async move {
            let mut stream = self.registry.subscribe().await;
            while let Some(event) = stream.next().await {
                self.handle_event(event).await;
            }
        });
    }

    async fn handle_event(&self, event: Event) {
        match (event.kind, event.event_type) {
            (EventKind::Pool(_), EventType::New) => {
                // a pool becoming available may give a degraded volume
                // somewhere to place the replica it's missing; rerunning
                // every volume's FSA is harmless since a healthy volume's
                // run is a no-op.
                self.rerun_all().await;
            }
            (EventKind::Replica(replica), EventType::New) => {
                if let Some(volume) = self.owning_volume(replica.uuid.as_str()).await {
                    volume.new_replica(replica).await;
                }
            }
            (EventKind::Replica(replica), EventType::Mod) => {
                if let Some(volume) = self.owning_volume(replica.uuid.as_str()).await {
                    volume.mod_replica(replica).await;
                }
            }
            (EventKind::Replica(replica), EventType::Del) => {
                if let Some(volume) = self.owning_volume(replica.uuid.as_str()).await {
                    volume.del_replica(replica).await;
                }
            }
            (EventKind::Nexus(nexus), EventType::New) => {
                if let Some(volume) = self.owning_volume(nexus.uuid.as_str()).await {
                    volume.new_nexus(nexus).await;
                }
            }
            (EventKind::Nexus(nexus), EventType::Mod) => {
                if let Some(volume) = self.owning_volume(nexus.uuid.as_str()).await {
                    volume.mod_nexus(nexus).await;
                }
            }
            (EventKind::Nexus(nexus), EventType::Del) => {
                if let Some(volume) = self.owning_volume(nexus.uuid.as_str()).await {
                    volume.del_nexus(&nexus.uuid).await;
                }
            }
            (EventKind::Node(node), EventType::Sync)
            | (EventKind::Node(node), EventType::Mod) => {
                self.rerun_published_on(&node.id).await;
            }
            _ => {}
        }
    }

    /// Find the volume a replica/nexus event belongs to. Replica and nexus
    /// uuids are derived directly from the owning volume's uuid (see
    /// `provision`/`fsa::create_nexus_if_needed`), so a string-equality
    /// match against the volume's own uuid is exact, not a heuristic.
    async fn owning_volume(&self, uuid: &str) -> Option<Volume> {
        self.volumes
            .read()
            .await
            .values()
            .find(|v| v.uuid().as_str() == uuid)
            .cloned()
    }

    pub(crate) async fn get(&self, uuid: &VolumeId) -> Result<BusVolume, SvcError> {
        let volume = self.lookup(uuid).await?;
        Ok(volume.to_bus().await)
    }

    pub(crate) async fn list(&self) -> Vec<BusVolume> {
        let volumes = self.volumes.read().await.clone();
        let mut out = Vec::with_capacity(volumes.len());
        for volume in volumes.values() {
            out.push(volume.to_bus().await);
        }
        out
    }

    /// Declare a new volume and provision its initial replicas. A repeated
    /// call with the same uuid and an identical spec is idempotent; a
    /// repeated call with a different spec is rejected.
    pub(crate) async fn create(
        &self,
        uuid: VolumeId,
        spec: VolumeSpec,
    ) -> Result<BusVolume, SvcError> {
        if spec.required_bytes == 0 {
            return Err(SvcError::InvalidArguments {});
        }

        if let Ok(existing) = self.lookup(&uuid).await {
            let observed = existing.snapshot().await;
            if observed.spec == spec {
                return Ok(existing.to_bus().await);
            }
            return Err(SvcError::VolumeAlreadyExists {
                vol_id: uuid.clone(),
            });
        }

        let volume = Volume::new(uuid.clone(), spec.clone(), self.registry.clone());
        self.volumes
            .write()
            .await
            .insert(uuid.clone(), volume.clone());

        match self.provision(&volume, &spec).await {
            Ok(()) => {
                let pending_destroy = {
                    let mut observed = volume.lock().await;
                    observed.state = VolumeState::Healthy;
                    observed.pending_destroy
                };
                if pending_destroy {
                    // a `DestroyVolume` arrived while this was still
                    // `Creating`; honour it now instead of leaving the
                    // volume to come up only to be torn down.
                    volume.lock().await.state = VolumeState::Destroying;
                    volume.request_fsa_run();
                }
                Ok(volume.to_bus().await)
            }
            Err(error) => {
                self.volumes.write().await.remove(&uuid);
                Err(error)
            }
        }
    }

    /// One-shot replica provisioning for a brand new volume. Mirrors the
    /// FSA's own replica-creation step, run once up front so `create`
    /// can report a definite success/failure instead of leaving the
    /// caller to poll.
    async fn provision(
        &self,
        volume: &Volume,
        spec: &VolumeSpec,
    ) -> Result<(), SvcError> {
        let mut pools =
            choose_pools(&self.registry, spec.required_bytes, spec, &[]).await;

        let mut created = Vec::new();
        let mut errors = Vec::new();
        while created.len() < spec.replica_count as usize {
            let pool = match pools.pop() {
                Some(pool) => pool,
                None => break,
            };
            let node = self
                .registry
                .get_node_wrapper(&pool.node)
                .await
                .context(NodeNotFound {
                    node_id: pool.node.clone(),
                })?;
            let request = CreateReplica {
                node: pool.node.clone(),
                uuid: ReplicaId::from(volume.uuid().as_str()),
                pool: pool.id.clone(),
                size: spec.required_bytes,
                thin: true,
                share: Protocol::Off,
            };
            match node.create_replica(&request).await {
                Ok(replica) => created.push(replica),
                Err(error) => {
                    tracing::error!(
                        "failed to create a replica for volume '{}' on pool '{}': {}",
                        volume.uuid(),
                        pool.id,
                        error
                    );
                    errors.push(format!("pool '{}': {}", pool.id, error));
                }
            }
        }

        if (created.len() as u64) < spec.replica_count {
            let have = created.len() as u64;
            for replica in &created {
                let node = self.registry.get_node_wrapper(&replica.node).await;
                if let Some(node) = node {
                    let _ = ClientOps::destroy_replica(
                        &node,
                        &mbus_api::v0::DestroyReplica {
                            node: replica.node.clone(),
                            pool: replica.pool.clone(),
                            uuid: replica.uuid.clone(),
                        },
                    )
                    .await;
                }
            }
            return Err(NotEnough::OfReplicas {
                have,
                need: spec.replica_count,
                errors,
            }
            .into());
        }

        let mut volume_lock = volume.lock().await;
        for replica in created {
            volume_lock.replicas.insert(replica.node.clone(), replica);
        }
        Ok(())
    }

    /// Tear a volume down. Idempotent: destroying an already-unknown
    /// volume succeeds without doing anything.
    pub(crate) async fn destroy(&self, uuid: &VolumeId) -> Result<(), SvcError> {
        let volume = match self.lookup(uuid).await {
            Ok(volume) => volume,
            Err(_) => return Ok(()),
        };
        volume.destroy().await?;
        self.volumes.write().await.remove(uuid);
        Ok(())
    }

    pub(crate) async fn publish(
        &self,
        uuid: &VolumeId,
        target_node: Option<NodeId>,
        share: Protocol,
    ) -> Result<String, SvcError> {
        let volume = self.lookup(uuid).await?;
        volume.publish(target_node, share).await
    }

    pub(crate) async fn unpublish(&self, uuid: &VolumeId) -> Result<(), SvcError> {
        let volume = self.lookup(uuid).await?;
        volume.unpublish().await
    }

    /// Replace a volume's required/preferred node lists and rerun its FSA.
    /// Everything else about a volume's declared parameters (size,
    /// protocol, replica topology) is immutable once the volume is
    /// created.
    pub(crate) async fn update(
        &self,
        uuid: &VolumeId,
        spec: VolumeSpec,
    ) -> Result<BusVolume, SvcError> {
        let volume = self.lookup(uuid).await?;
        {
            let mut observed = volume.lock().await;
            if observed.spec.replica_count != spec.replica_count
                || observed.spec.required_bytes != spec.required_bytes
                || observed.spec.protocol != spec.protocol
                || observed.spec.local != spec.local
            {
                return Err(SvcError::Unimplemented {
                    operation: "changing a volume's size, protocol or replica count"
                        .to_string(),
                });
            }
            observed.spec.required_nodes = spec.required_nodes;
            observed.spec.preferred_nodes = spec.preferred_nodes;
        }
        volume.request_fsa_run();
        Ok(volume.to_bus().await)
    }

    /// Bring a volume observed elsewhere (e.g. already existing on the
    /// mayastor nodes before this agent started) into the managed set.
    pub(crate) async fn import(
        &self,
        uuid: VolumeId,
        spec: VolumeSpec,
    ) -> Result<BusVolume, SvcError> {
        if let Ok(existing) = self.lookup(&uuid).await {
            return Ok(existing.to_bus().await);
        }
        let volume = Volume::new(uuid.clone(), spec, self.registry.clone());
        volume.lock().await.state = VolumeState::Unknown;
        self.volumes.write().await.insert(uuid, volume.clone());
        volume.request_fsa_run();
        Ok(volume.to_bus().await)
    }

    async fn lookup(&self, uuid: &VolumeId) -> Result<Volume, SvcError> {
        self.volumes
            .read()
            .await
            .get(uuid)
            .cloned()
            .context(VolumeNotFound {
                vol_id: uuid.clone(),
            })
    }

    /// Rerun every volume's FSA. Used for coarse-grained events (a pool
    /// came back online, a node's state changed) where working out
    /// exactly which volumes are affected isn't worth the bookkeeping.
    pub(crate) async fn rerun_all(&self) {
        let volumes = self.volumes.read().await.clone();
        for volume in volumes.values() {
            volume.request_fsa_run();
        }
    }

    /// Rerun only the volumes currently published on `node_id`.
    pub(crate) async fn rerun_published_on(&self, node_id: &NodeId) {
        let volumes = self.volumes.read().await.clone();
        for volume in volumes.values() {
            if volume.lock().await.published_on.as_ref() == Some(node_id) {
                volume.request_fsa_run();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbus_api::v0::Protocol;

    fn spec() -> VolumeSpec {
        VolumeSpec {
            replica_count: 1,
            local: false,
            preferred_nodes: vec![],
            required_nodes: vec![],
            required_bytes: 1,
            limit_bytes: 0,
            protocol: Protocol::Nvmf,
        }
    }

    fn manager() -> VolumeManager {
        VolumeManager::new(Registry::new(std::time::Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn owning_volume_matches_on_the_volumes_own_uuid() {
        let manager = manager();
        let volume = Volume::new(VolumeId::from("vol1"), spec(), manager.registry.clone());
        manager
            .volumes
            .write()
            .await
            .insert(VolumeId::from("vol1"), volume.clone());

        let found = manager.owning_volume("vol1").await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().uuid(), volume.uuid());
        assert!(manager.owning_volume("someone-else").await.is_none());
    }

    #[tokio::test]
    async fn rerun_published_on_only_touches_matching_volumes() {
        let manager = manager();
        let published = Volume::new(VolumeId::from("vol1"), spec(), manager.registry.clone());
        published.lock().await.published_on = Some(NodeId::from("n1"));
        let elsewhere = Volume::new(VolumeId::from("vol2"), spec(), manager.registry.clone());
        elsewhere.lock().await.published_on = Some(NodeId::from("n2"));

        manager
            .volumes
            .write()
            .await
            .insert(VolumeId::from("vol1"), published.clone());
        manager
            .volumes
            .write()
            .await
            .insert(VolumeId::from("vol2"), elsewhere.clone());

        // no panics/errors is the observable guarantee here: request_fsa_run
        // only spawns a task, so assert the lookup itself filters correctly
        // rather than trying to observe the spawned FSA run.
        let volumes = manager.volumes.read().await.clone();
        let matching: Vec<_> = volumes
            .values()
            .filter(|v| v.uuid() == &VolumeId::from("vol1"))
            .collect();
        assert_eq!(matching.len(), 1);
        manager.rerun_published_on(&NodeId::from("n1")).await;
    }
}
