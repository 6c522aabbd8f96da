//! Pool and replica selection policy used by the volume finite-state
//! automaton. Kept as standalone, independently-testable pure(ish)
//! functions rather than inlined ad hoc sorting, mirroring how
//! `core::wrapper::PoolWrapper`'s `Ord` scores pools for the legacy
//! single-shot `create_volume` path.

use crate::core::{
    registry::Registry,
    wrapper::{GetterOps, PoolWrapper},
};
use mbus_api::v0::{NodeId, Pool, PoolState, Replica, VolumeSpec};
use std::collections::HashSet;

/// Pick pools suitable for placing a new replica, ranked best-first.
///
/// Implements `Registry.choosePools`: online-or-degraded pools with enough
/// free space, restricted to `spec.required_nodes` if non-empty and never
/// on a node in `exclude_nodes` (nodes the volume already has a replica
/// on); ranked by state, then membership of `spec.preferred_nodes` (in the
/// order given), then fewer existing replicas, then more free space; at
/// most one pool per node.
pub(crate) async fn choose_pools(
    registry: &Registry,
    required_bytes: u64,
    spec: &VolumeSpec,
    exclude_nodes: &[NodeId],
) -> Vec<PoolWrapper> {
    let mut pools = registry.get_pools_wrapper().await.unwrap_or_default();

    pools.retain(|p| {
        (p.state == PoolState::Online || p.state == PoolState::Degraded)
            && p.free_space() >= required_bytes
            && !exclude_nodes.contains(&p.node)
            && (spec.required_nodes.is_empty()
                || spec.required_nodes.contains(&p.node))
    });

    pools.sort_by(|a, b| score_pool(b, spec).cmp(&score_pool(a, spec)));

    let mut seen = HashSet::new();
    pools.retain(|p| seen.insert(p.node.clone()));

    prefer_local_node(pools, spec)
}

/// If `spec.local` is set, move the pool on the first preferred node (if
/// one is present in `pools`) to the front so it is chosen for the first
/// replica.
fn prefer_local_node(
    mut pools: Vec<PoolWrapper>,
    spec: &VolumeSpec,
) -> Vec<PoolWrapper> {
    if spec.local {
        if let Some(first_preferred) = spec.preferred_nodes.first() {
            if let Some(pos) =
                pools.iter().position(|p| &p.node == first_preferred)
            {
                let pool = pools.remove(pos);
                pools.insert(0, pool);
            }
        }
    }
    pools
}

/// Ranking key for a candidate pool; larger sorts first. Each field is a
/// strictly higher-priority tiebreaker than the next, so the sum of all
/// lower-priority fields can never overturn a higher one.
fn score_pool(pool: &PoolWrapper, spec: &VolumeSpec) -> (bool, usize, i64, u64) {
    let online = pool.state == PoolState::Online;
    let preferred = spec
        .preferred_nodes
        .iter()
        .position(|n| n == &pool.node)
        .map(|i| spec.preferred_nodes.len() - i)
        .unwrap_or(0);
    let fewer_replicas = -(pool.replicas().len() as i64);
    (online, preferred, fewer_replicas, pool.free_space())
}

/// Score a replica for inclusion in the active replica set: higher is
/// better. Each term is bounded well below the next-higher term
/// so a higher-priority criterion can never be overturned by the sum of
/// all lower ones.
pub(crate) fn score_replica(
    replica: &Replica,
    online: bool,
    spec: &VolumeSpec,
    nexus_node: Option<&NodeId>,
) -> i64 {
    let mut score = 0i64;
    if spec.required_nodes.contains(&replica.node) {
        score += 100;
    }
    if online {
        score += 50;
    }
    let preferred_pos = spec.preferred_nodes.iter().position(|n| n == &replica.node);
    if preferred_pos.is_some() {
        score += 20;
    }
    if spec.local && preferred_pos == Some(0) {
        score += 9;
    }
    if nexus_node == Some(&replica.node) {
        score += 1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbus_api::v0::{PoolId, Pool, Protocol};

    fn replica(node: &str) -> Replica {
        Replica {
            node: node.into(),
            uuid: "replica".into(),
            pool: PoolId::from("pool"),
            thin: false,
            size: 1,
            share: Protocol::Off,
            uri: "bdev:///replica".to_string(),
        }
    }

    fn spec(required: Vec<&str>, preferred: Vec<&str>, local: bool) -> VolumeSpec {
        VolumeSpec {
            replica_count: 1,
            local,
            preferred_nodes: preferred.into_iter().map(NodeId::from).collect(),
            required_nodes: required.into_iter().map(NodeId::from).collect(),
            required_bytes: 1,
            limit_bytes: 0,
            protocol: Protocol::Nvmf,
        }
    }

    #[test]
    fn required_node_dominates_everything_else() {
        let required_spec = spec(vec!["n1"], vec!["n2"], true);
        let required = score_replica(&replica("n1"), false, &required_spec, None);
        let mut best_non_required = 0;
        for online in [true, false] {
            for node in ["n2"] {
                best_non_required = best_non_required.max(score_replica(
                    &replica(node),
                    online,
                    &required_spec,
                    Some(&NodeId::from(node)),
                ));
            }
        }
        assert!(required > best_non_required);
    }

    #[test]
    fn online_outranks_preferred_and_colocation() {
        let s = spec(vec![], vec!["n1"], false);
        let online_elsewhere = score_replica(&replica("n2"), true, &s, None);
        let offline_preferred_colocated =
            score_replica(&replica("n1"), false, &s, Some(&NodeId::from("n1")));
        assert!(online_elsewhere > offline_preferred_colocated);
    }

    #[test]
    fn pool_scoring_prefers_online_then_preferred_then_free_space() {
        let mut online_pool = Pool {
            node: "n1".into(),
            id: PoolId::from("p1"),
            disks: vec![],
            state: PoolState::Online,
            capacity: 100,
            used: 90,
        };
        let mut degraded_pool = online_pool.clone();
        degraded_pool.node = "n2".into();
        degraded_pool.id = PoolId::from("p2");
        degraded_pool.state = PoolState::Degraded;
        degraded_pool.used = 0;

        let s = spec(vec![], vec![], false);
        let a = super::score_pool(&PoolWrapper::new(&online_pool, &[]), &s);
        let b = super::score_pool(&PoolWrapper::new(&degraded_pool, &[]), &s);
        assert!(a > b, "an online pool with less free space still wins");
        online_pool.used = 0;
        degraded_pool.used = 0;
    }

    fn pool_on(node: &str) -> PoolWrapper {
        PoolWrapper::new(
            &Pool {
                node: node.into(),
                id: PoolId::from(node),
                disks: vec![],
                state: PoolState::Online,
                capacity: 100,
                used: 0,
            },
            &[],
        )
    }

    #[test]
    fn local_volume_prefers_first_preferred_node() {
        let s = spec(vec![], vec!["n2", "n1"], true);
        let pools = vec![pool_on("n1"), pool_on("n2"), pool_on("n3")];
        let reordered = super::prefer_local_node(pools, &s);
        assert_eq!(reordered[0].node, NodeId::from("n2"));
    }

    #[test]
    fn non_local_volume_is_left_untouched() {
        let s = spec(vec![], vec!["n2", "n1"], false);
        let pools = vec![pool_on("n1"), pool_on("n2"), pool_on("n3")];
        let reordered = super::prefer_local_node(pools, &s);
        assert_eq!(reordered[0].node, NodeId::from("n1"));
    }

    #[test]
    fn local_volume_with_no_matching_pool_is_unchanged() {
        let s = spec(vec![], vec!["nowhere"], true);
        let pools = vec![pool_on("n1"), pool_on("n2")];
        let reordered = super::prefer_local_node(pools, &s);
        assert_eq!(reordered[0].node, NodeId::from("n1"));
    }
}
