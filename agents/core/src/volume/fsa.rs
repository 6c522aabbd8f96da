//! The volume finite-state automaton: one run converges the observed
//! nexus/replica state onto a volume's declared spec by at most one
//! corrective action, then returns so the caller re-evaluates from the
//! top on the next run.

use super::{
    scheduling::{choose_pools, score_replica},
    volume::Volume,
};
use common::errors::{NodeNotFound, NotEnough, SvcError};
use mbus_api::v0::{
    AddNexusChild,
    ChildState,
    ChildUri,
    CreateNexus,
    CreateReplica,
    DestroyNexus,
    DestroyReplica,
    NexusId,
    NexusState,
    NodeId,
    PoolState,
    Protocol,
    Replica,
    ReplicaId,
    RemoveNexusChild,
    ShareNexus,
    ShareReplica,
    UnshareNexus,
    UnshareReplica,
    VolumeState,
};
use snafu::OptionExt;

use crate::core::{
    registry::Registry,
    wrapper::{ClientOps, GetterOps},
};

/// Run one pass of the FSA. Returns once any action has changed
/// observable state, so the caller's next-run-requested flag (or this
/// same loop, if set) re-evaluates from the top.
pub(crate) async fn run(volume: &Volume) -> Result<(), SvcError> {
    let span = tracing::info_span!("fsa_run", volume.uuid = %volume.uuid());
    let _enter = span.enter();

    if is_pending(volume).await {
        return Ok(());
    }
    if handle_destroyed(volume).await? {
        return Ok(());
    }
    if handle_stray_unpublish(volume).await? {
        return Ok(());
    }

    let active = match active_replicas(volume).await {
        Some(active) if !active.is_empty() => active,
        _ => {
            set_state(volume, VolumeState::Faulted).await;
            volume
                .complete_publish(Err(SvcError::OperationNotAllowed {
                    vol_id: volume.uuid().clone(),
                    operation: "Publish".to_string(),
                    details: "no online replica is available".to_string(),
                }))
                .await;
            return Ok(());
        }
    };

    let desired_node = desired_nexus_node(volume, &active).await;

    if create_nexus_if_needed(volume, &active, &desired_node).await? {
        return Ok(());
    }
    if recreate_nexus_on_wrong_node(volume, &desired_node).await? {
        return Ok(());
    }
    ensure_replica_shares(volume, &active, &desired_node).await?;

    if pair_children(volume, &active).await? {
        return Ok(());
    }

    if count_and_maybe_degrade(volume, &active).await? {
        return Ok(());
    }

    publish_if_needed(volume, &desired_node).await?;
    add_required_node_outlier(volume, &active).await?;
    destroy_unpublished_nexus(volume).await?;

    Ok(())
}

async fn is_pending(volume: &Volume) -> bool {
    volume.lock().await.state == VolumeState::Creating
}

/// Step 2: tear everything down once the volume is marked for destruction.
async fn handle_destroyed(volume: &Volume) -> Result<bool, SvcError> {
    if volume.lock().await.state != VolumeState::Destroying {
        return Ok(false);
    }
    let result = teardown(volume).await;
    match &result {
        Ok(()) => {
            volume.complete_destroy(Ok(())).await;
        }
        Err(error) => {
            tracing::error!("failed to tear down volume '{}': {}", volume.uuid(), error);
            volume.complete_destroy(Err(clone_error(error))).await;
        }
    }
    result.map(|_| true)
}

async fn teardown(volume: &Volume) -> Result<(), SvcError> {
    let nexus = volume.lock().await.nexus.clone();
    if let Some(nexus) = nexus {
        destroy_nexus(volume, &nexus.node, &nexus.uuid).await?;
        volume.lock().await.nexus = None;
    }
    let replicas: Vec<Replica> =
        volume.lock().await.replicas.values().cloned().collect();
    for replica in replicas {
        let node = volume
            .registry()
            .get_node_wrapper(&replica.node)
            .await
            .context(NodeNotFound {
                node_id: replica.node.clone(),
            })?;
        let destroyed = node
            .destroy_replica(&DestroyReplica {
                node: replica.node.clone(),
                pool: replica.pool.clone(),
                uuid: replica.uuid.clone(),
            })
            .await;
        // a `NotFound` on a destroy-type RPC is treated as success
        if destroyed.is_ok() {
            volume.lock().await.replicas.remove(&replica.node);
        }
    }
    Ok(())
}

/// Step 3: a nexus survives an unpublish request alone; finish tearing it
/// down (or destroying it if already offline) here.
async fn handle_stray_unpublish(volume: &Volume) -> Result<bool, SvcError> {
    let (nexus, published_on) = {
        let observed = volume.lock().await;
        (observed.nexus.clone(), observed.published_on.clone())
    };
    let nexus = match nexus {
        Some(nexus) if published_on.is_none() => nexus,
        _ => return Ok(false),
    };

    if !nexus.device_uri.is_empty() {
        unshare_nexus(volume, &nexus.node, &nexus.uuid).await?;
    } else if nexus.state == NexusState::Faulted {
        destroy_nexus(volume, &nexus.node, &nexus.uuid).await?;
        volume.lock().await.nexus = None;
    }
    volume.complete_unpublish(Ok(())).await;
    Ok(true)
}

/// A replica is part of the active set iff its node and pool are both
/// reachable; `None` is returned only if the node registry lookup itself
/// failed, which should not normally happen once a replica has been
/// recorded.
async fn active_replicas(volume: &Volume) -> Option<Vec<Replica>> {
    let (replicas, spec, nexus_node) = {
        let observed = volume.lock().await;
        (
            observed.replicas.values().cloned().collect::<Vec<_>>(),
            observed.spec.clone(),
            observed.nexus.as_ref().map(|n| n.node.clone()),
        )
    };
    let registry = volume.registry();
    let mut scored = Vec::new();
    for replica in replicas {
        if replica_online(registry, &replica).await {
            let score = score_replica(&replica, true, &spec, nexus_node.as_ref());
            scored.push((score, replica));
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    Some(scored.into_iter().map(|(_, r)| r).collect())
}

async fn replica_online(registry: &Registry, replica: &Replica) -> bool {
    match registry.get_node_wrapper(&replica.node).await {
        None => false,
        Some(node) => {
            let node_online = node.lock().await.is_online();
            let pool_ok = GetterOps::pool(&node, &replica.pool)
                .await
                .map(|p| p.state != PoolState::Faulted)
                .unwrap_or(false);
            node_online && pool_ok
        }
    }
}

/// Step 5.
async fn desired_nexus_node(volume: &Volume, active: &[Replica]) -> Option<NodeId> {
    let observed = volume.lock().await;
    if let Some(node) = &observed.published_on {
        return Some(node.clone());
    }
    if let Some(nexus) = &observed.nexus {
        return Some(nexus.node.clone());
    }
    drop(observed);
    // the replica node currently hosting the fewest nexuses
    let mut best: Option<(usize, &NodeId)> = None;
    for replica in active {
        let count = match volume.registry().get_node_wrapper(&replica.node).await {
            Some(node) => GetterOps::nexuses(&node).await.len(),
            None => continue,
        };
        match best {
            Some((n, _)) if n <= count => {}
            _ => best = Some((count, &replica.node)),
        }
    }
    best.map(|(_, node)| node.clone())
}

/// Step 6.
async fn create_nexus_if_needed(
    volume: &Volume,
    active: &[Replica],
    desired_node: &Option<NodeId>,
) -> Result<bool, SvcError> {
    let (has_nexus, replica_count, current_replicas, published) = {
        let observed = volume.lock().await;
        (
            observed.nexus.is_some(),
            observed.spec.replica_count,
            observed.replicas.len() as u64,
            observed.published_on.is_some(),
        )
    };
    if has_nexus {
        return Ok(false);
    }
    let desired_node = match desired_node {
        Some(node) => node.clone(),
        None => return Ok(false),
    };
    if !published && current_replicas == replica_count {
        // nothing is asking for a nexus yet
        return Ok(false);
    }

    ensure_replica_shares(volume, active, &Some(desired_node.clone())).await?;

    let smallest = active.iter().map(|r| r.size).min().unwrap_or(0);
    let children: Vec<ChildUri> = active
        .iter()
        .map(|r| ChildUri::from(r.uri.as_str()))
        .collect();

    let node = volume
        .registry()
        .get_node_wrapper(&desired_node)
        .await
        .context(NodeNotFound {
            node_id: desired_node.clone(),
        })?;
    let uuid = NexusId::from(volume.uuid().as_str());
    match node
        .create_nexus(&CreateNexus {
            node: desired_node,
            uuid,
            size: smallest,
            children,
        })
        .await
    {
        Ok(nexus) => {
            volume.lock().await.nexus = Some(nexus);
            Ok(true)
        }
        Err(error) => {
            set_state(volume, VolumeState::Faulted).await;
            volume
                .complete_publish(Err(clone_error(&error)))
                .await;
            Err(error)
        }
    }
}

/// Step 7.
async fn recreate_nexus_on_wrong_node(
    volume: &Volume,
    desired_node: &Option<NodeId>,
) -> Result<bool, SvcError> {
    let nexus = volume.lock().await.nexus.clone();
    let (nexus, desired_node) = match (nexus, desired_node) {
        (Some(nexus), Some(desired_node)) => (nexus, desired_node),
        _ => return Ok(false),
    };
    if &nexus.node == desired_node {
        return Ok(false);
    }
    destroy_nexus(volume, &nexus.node, &nexus.uuid).await?;
    volume.lock().await.nexus = None;
    Ok(true)
}

/// Step 8: local replicas (co-located with the nexus) are unshared, the
/// rest are shared over the volume's declared protocol.
async fn ensure_replica_shares(
    volume: &Volume,
    active: &[Replica],
    desired_node: &Option<NodeId>,
) -> Result<(), SvcError> {
    let protocol = volume.lock().await.spec.protocol.clone();
    for replica in active {
        let local = desired_node.as_ref() == Some(&replica.node);
        let wanted = if local { Protocol::Off } else { protocol.clone() };
        if replica.share == wanted {
            continue;
        }
        let node = volume
            .registry()
            .get_node_wrapper(&replica.node)
            .await
            .context(NodeNotFound {
                node_id: replica.node.clone(),
            })?;
        let updated = if wanted == Protocol::Off {
            node.unshare_replica(&UnshareReplica {
                node: replica.node.clone(),
                pool: replica.pool.clone(),
                uuid: replica.uuid.clone(),
            })
            .await
            .map(|_| Replica {
                share: Protocol::Off,
                ..replica.clone()
            })
        } else {
            node.share_replica(&ShareReplica {
                node: replica.node.clone(),
                pool: replica.pool.clone(),
                uuid: replica.uuid.clone(),
                protocol: wanted.clone(),
            })
            .await
            .map(|uri| Replica {
                share: wanted.clone(),
                uri,
                ..replica.clone()
            })
        };
        if let Ok(replica) = updated {
            volume
                .lock()
                .await
                .replicas
                .insert(replica.node.clone(), replica);
        }
    }
    Ok(())
}

/// Step 9: add one missing active replica to the nexus, or else remove a
/// single superfluous child, in priority order.
async fn pair_children(volume: &Volume, active: &[Replica]) -> Result<bool, SvcError> {
    let nexus = match volume.lock().await.nexus.clone() {
        Some(nexus) => nexus,
        None => return Ok(false),
    };

    for replica in active {
        let paired = nexus.children.iter().any(|c| c.uri.as_str() == replica.uri);
        if !paired {
            let node = volume
                .registry()
                .get_node_wrapper(&nexus.node)
                .await
                .context(NodeNotFound {
                    node_id: nexus.node.clone(),
                })?;
            let child = node
                .add_child(&AddNexusChild {
                    node: nexus.node.clone(),
                    nexus: nexus.uuid.clone(),
                    uri: ChildUri::from(replica.uri.as_str()),
                    auto_rebuild: true,
                })
                .await?;
            let mut observed = volume.lock().await;
            if let Some(nexus) = &mut observed.nexus {
                nexus.children.push(child);
            }
            return Ok(true);
        }
    }

    let online_count =
        nexus.children.iter().filter(|c| c.state == ChildState::Online).count() as u64;
    let replica_count = volume.lock().await.spec.replica_count;

    let faulted_stray = nexus.children.iter().find(|c| {
        c.state == ChildState::Faulted
            && !active.iter().any(|r| r.uri == c.uri.as_str())
    });
    let any_faulted = nexus.children.iter().find(|c| c.state == ChildState::Faulted);
    let any_stray = nexus
        .children
        .iter()
        .find(|c| !active.iter().any(|r| r.uri == c.uri.as_str()));

    let to_remove = if let Some(child) = faulted_stray {
        Some(child.uri.clone())
    } else if online_count > replica_count {
        if let Some(child) = any_faulted {
            Some(child.uri.clone())
        } else if let Some(child) = any_stray {
            Some(child.uri.clone())
        } else {
            lowest_scored_paired_child(volume, &nexus, active).await
        }
    } else {
        None
    };

    if let Some(uri) = to_remove {
        let node = volume
            .registry()
            .get_node_wrapper(&nexus.node)
            .await
            .context(NodeNotFound {
                node_id: nexus.node.clone(),
            })?;
        node.remove_child(&RemoveNexusChild {
            node: nexus.node.clone(),
            nexus: nexus.uuid.clone(),
            uri: uri.clone(),
        })
        .await?;
        let mut observed = volume.lock().await;
        if let Some(nexus) = &mut observed.nexus {
            nexus.children.retain(|c| c.uri != uri);
        }
        return Ok(true);
    }
    Ok(false)
}

async fn lowest_scored_paired_child(
    volume: &Volume,
    nexus: &mbus_api::v0::Nexus,
    active: &[Replica],
) -> Option<ChildUri> {
    let spec = volume.lock().await.spec.clone();
    let mut scored: Vec<(i64, &Replica)> = active
        .iter()
        .map(|r| (score_replica(r, true, &spec, Some(&nexus.node)), r))
        .collect();
    scored.sort_by_key(|(score, _)| *score);
    let lowest = scored.first()?.1;
    nexus
        .children
        .iter()
        .find(|c| c.uri.as_str() == lowest.uri)
        .map(|c| c.uri.clone())
}

/// Step 10.
async fn count_and_maybe_degrade(
    volume: &Volume,
    active: &[Replica],
) -> Result<bool, SvcError> {
    let (nexus, replica_count) = {
        let observed = volume.lock().await;
        (observed.nexus.clone(), observed.spec.replica_count)
    };
    let nexus = match nexus {
        Some(nexus) => nexus,
        None => return Ok(false),
    };

    let online_count = nexus
        .children
        .iter()
        .filter(|c| c.state == ChildState::Online)
        .count() as u64;
    let sound_count = online_count
        + nexus
            .children
            .iter()
            .filter(|c| c.state == ChildState::Degraded)
            .count() as u64;

    if online_count == 0 {
        set_state(volume, VolumeState::Faulted).await;
        volume
            .complete_publish(Err(SvcError::OperationNotAllowed {
                vol_id: volume.uuid().clone(),
                operation: "Publish".to_string(),
                details: "the volume's nexus has no online child".to_string(),
            }))
            .await;
        return Ok(true);
    }

    if sound_count < replica_count {
        set_state(volume, VolumeState::Degraded).await;
        let needed = replica_count - sound_count;
        create_replicas(volume, needed, active).await?;
        return Ok(true);
    }

    if nexus.children.iter().any(|c| c.state == ChildState::Degraded) {
        set_state(volume, VolumeState::Degraded).await;
        return Ok(true);
    }

    Ok(false)
}

/// Replica creation policy: choose pools excluding nodes already used,
/// try one at a time, accumulate errors, fail with `ResourceExhausted`
/// if not enough succeed.
async fn create_replicas(
    volume: &Volume,
    needed: u64,
    active: &[Replica],
) -> Result<(), SvcError> {
    let (spec, uuid, used_nodes) = {
        let observed = volume.lock().await;
        let used_nodes: Vec<NodeId> =
            observed.replicas.keys().cloned().collect();
        (observed.spec.clone(), volume.uuid().clone(), used_nodes)
    };
    let _ = active;

    let mut pools = choose_pools(
        volume.registry(),
        spec.required_bytes,
        &spec,
        &used_nodes,
    )
    .await;

    let mut created = 0u64;
    let mut errors = Vec::new();
    while created < needed {
        let pool = match pools.pop() {
            Some(pool) => pool,
            None => break,
        };
        let node = match volume.registry().get_node_wrapper(&pool.node).await {
            Some(node) => node,
            None => continue,
        };
        let request = CreateReplica {
            node: pool.node.clone(),
            uuid: ReplicaId::from(uuid.as_str()),
            pool: pool.id.clone(),
            size: spec.required_bytes,
            thin: true,
            share: Protocol::Off,
        };
        match node.create_replica(&request).await {
            Ok(replica) => {
                volume
                    .lock()
                    .await
                    .replicas
                    .insert(replica.node.clone(), replica);
                created += 1;
            }
            Err(error) => errors.push(error.to_string()),
        }
    }

    if created < needed {
        return Err(NotEnough::OfReplicas {
            have: created,
            need: needed,
            errors,
        }
        .into());
    }
    Ok(())
}

/// Step 11.
async fn publish_if_needed(
    volume: &Volume,
    desired_node: &Option<NodeId>,
) -> Result<(), SvcError> {
    let (published_on, nexus, share) = {
        let observed = volume.lock().await;
        (
            observed.published_on.clone(),
            observed.nexus.clone(),
            observed.share.clone(),
        )
    };
    let (published_on, nexus) = match (published_on, nexus) {
        (Some(published_on), Some(nexus)) => (published_on, nexus),
        _ => return Ok(()),
    };
    if !nexus.device_uri.is_empty() {
        set_state(volume, VolumeState::Healthy).await;
        volume.complete_publish(Ok(nexus.device_uri)).await;
        return Ok(());
    }
    let node = volume
        .registry()
        .get_node_wrapper(&published_on)
        .await
        .context(NodeNotFound {
            node_id: published_on.clone(),
        })?;
    match node
        .share_nexus(&ShareNexus {
            node: published_on,
            uuid: nexus.uuid.clone(),
            key: None,
            protocol: share,
        })
        .await
    {
        Ok(uri) => {
            {
                let mut observed = volume.lock().await;
                if let Some(nexus) = &mut observed.nexus {
                    nexus.device_uri = uri.clone();
                }
            }
            set_state(volume, VolumeState::Healthy).await;
            volume.complete_publish(Ok(uri)).await;
            Ok(())
        }
        Err(error) => {
            volume.complete_publish(Err(clone_error(&error))).await;
            Err(error)
        }
    }
}

/// Step 12: an online child stuck on a non-required node is eventually
/// trimmed by step 9 once a required-node replacement is online.
async fn add_required_node_outlier(
    volume: &Volume,
    active: &[Replica],
) -> Result<(), SvcError> {
    let (required_nodes, state) = {
        let observed = volume.lock().await;
        (observed.spec.required_nodes.clone(), observed.state.clone())
    };
    if required_nodes.is_empty() || state != VolumeState::Healthy {
        return Ok(());
    }
    let outlier = active.iter().any(|r| !required_nodes.contains(&r.node));
    if outlier {
        create_replicas(volume, 1, active).await.ok();
    }
    Ok(())
}

/// Step 13.
async fn destroy_unpublished_nexus(volume: &Volume) -> Result<(), SvcError> {
    let (published_on, nexus) = {
        let observed = volume.lock().await;
        (observed.published_on.clone(), observed.nexus.clone())
    };
    if published_on.is_some() {
        return Ok(());
    }
    if let Some(nexus) = nexus {
        destroy_nexus(volume, &nexus.node, &nexus.uuid).await?;
        volume.lock().await.nexus = None;
    }
    Ok(())
}

async fn destroy_nexus(
    volume: &Volume,
    node_id: &NodeId,
    uuid: &NexusId,
) -> Result<(), SvcError> {
    let node = volume
        .registry()
        .get_node_wrapper(node_id)
        .await
        .context(NodeNotFound {
            node_id: node_id.clone(),
        })?;
    let result = node
        .destroy_nexus(&DestroyNexus {
            node: node_id.clone(),
            uuid: uuid.clone(),
        })
        .await;
    // a `NotFound` on a destroy-type RPC is treated as success
    result.or(Ok(()))
}

async fn unshare_nexus(
    volume: &Volume,
    node_id: &NodeId,
    uuid: &NexusId,
) -> Result<(), SvcError> {
    let node = volume
        .registry()
        .get_node_wrapper(node_id)
        .await
        .context(NodeNotFound {
            node_id: node_id.clone(),
        })?;
    node.unshare_nexus(&UnshareNexus {
        node: node_id.clone(),
        uuid: uuid.clone(),
    })
    .await?;
    let mut observed = volume.lock().await;
    if let Some(nexus) = &mut observed.nexus {
        nexus.device_uri = String::new();
    }
    Ok(())
}

async fn set_state(volume: &Volume, state: VolumeState) {
    let mut observed = volume.lock().await;
    if observed.state != state {
        tracing::info!(
            "Volume '{}' changing from {:?} to {:?}",
            volume.uuid(),
            observed.state,
            state
        );
        observed.state = state;
    }
}

/// `SvcError` is not `Clone` (it carries tonic sources); re-describe it
/// from its display text when it must be reported more than once.
fn clone_error(error: &SvcError) -> SvcError {
    SvcError::Internal {
        details: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbus_api::v0::{Nexus, VolumeId, VolumeSpec};

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

    fn volume() -> Volume {
        let registry = Registry::new(std::time::Duration::from_secs(3600));
        Volume::new(VolumeId::from("vol1"), spec(), registry)
    }

    #[tokio::test]
    async fn a_volume_still_creating_is_pending() {
        let volume = volume();
        assert!(is_pending(&volume).await);
        volume.lock().await.state = VolumeState::Healthy;
        assert!(!is_pending(&volume).await);
    }

    #[tokio::test]
    async fn handle_destroyed_is_a_noop_outside_destroying() {
        let volume = volume();
        volume.lock().await.state = VolumeState::Healthy;
        assert!(!handle_destroyed(&volume).await.unwrap());
    }

    #[tokio::test]
    async fn handle_stray_unpublish_is_a_noop_without_a_nexus() {
        let volume = volume();
        assert!(!handle_stray_unpublish(&volume).await.unwrap());
    }

    #[tokio::test]
    async fn handle_stray_unpublish_is_a_noop_while_still_published() {
        let volume = volume();
        {
            let mut observed = volume.lock().await;
            observed.nexus = Some(Nexus {
                node: "n1".into(),
                uuid: "vol1".into(),
                ..Default::default()
            });
            observed.published_on = Some(NodeId::from("n1"));
        }
        assert!(!handle_stray_unpublish(&volume).await.unwrap());
    }

    #[tokio::test]
    async fn create_nexus_if_needed_is_a_noop_once_a_nexus_exists() {
        let volume = volume();
        volume.lock().await.nexus = Some(Nexus {
            node: "n1".into(),
            uuid: "vol1".into(),
            ..Default::default()
        });
        let desired = Some(NodeId::from("n1"));
        assert!(!create_nexus_if_needed(&volume, &[], &desired).await.unwrap());
    }

    #[tokio::test]
    async fn create_nexus_if_needed_is_a_noop_without_a_desired_node() {
        let volume = volume();
        assert!(!create_nexus_if_needed(&volume, &[], &None).await.unwrap());
    }

    #[tokio::test]
    async fn recreate_nexus_on_wrong_node_is_a_noop_without_a_nexus() {
        let volume = volume();
        let desired = Some(NodeId::from("n1"));
        assert!(!recreate_nexus_on_wrong_node(&volume, &desired).await.unwrap());
    }

    #[tokio::test]
    async fn count_and_maybe_degrade_is_a_noop_without_a_nexus() {
        let volume = volume();
        assert!(!count_and_maybe_degrade(&volume, &[]).await.unwrap());
    }
}
