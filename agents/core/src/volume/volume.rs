//! The per-volume object: a declared spec plus the observed state the
//! finite-state automaton in [`super::fsa`] drives towards convergence.

use crate::core::registry::Registry;
use common::errors::SvcError;
use mbus_api::v0::{
    Nexus,
    NexusId,
    NodeId,
    Protocol,
    Replica,
    Volume as BusVolume,
    VolumeId,
    VolumeSpec,
    VolumeState as BusVolumeState,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::{oneshot, Mutex, MutexGuard};

/// The three operations a caller may delegate to the FSA.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum DelegatedOp {
    Publish,
    Unpublish,
    Destroy,
}

/// Reconciled, in-memory state of a volume. Guarded by a single mutex so
/// the FSA always observes and mutates a consistent snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Observed {
    pub(crate) spec: VolumeSpec,
    pub(crate) size: u64,
    pub(crate) state: BusVolumeState,
    /// desired publish target; `None` means the caller wants it unpublished
    pub(crate) published_on: Option<NodeId>,
    pub(crate) share: Protocol,
    pub(crate) nexus: Option<Nexus>,
    /// one replica per node, keyed by the node hosting its pool
    pub(crate) replicas: HashMap<NodeId, Replica>,
    /// set while a `DestroyVolume` arrived during `Creating`
    pub(crate) pending_destroy: bool,
}

#[derive(Default)]
struct Waiters {
    publish: Vec<oneshot::Sender<Result<String, SvcError>>>,
    unpublish: Vec<oneshot::Sender<Result<(), SvcError>>>,
    destroy: Vec<oneshot::Sender<Result<(), SvcError>>>,
}

/// A volume and the machinery a delegated operation needs: the desired
/// spec, the observed state, and a single-flight scheduling slot for the
/// FSA.
#[derive(Clone)]
pub(crate) struct Volume {
    uuid: VolumeId,
    registry: Registry,
    observed: Arc<Mutex<Observed>>,
    waiters: Arc<Mutex<Waiters>>,
    run_lock: Arc<Mutex<()>>,
    rerun_requested: Arc<AtomicBool>,
}

impl Volume {
    /// New volume in `Creating`, not yet backed by any replica or nexus.
    pub(crate) fn new(uuid: VolumeId, spec: VolumeSpec, registry: Registry) -> Self {
        let size = spec.required_bytes;
        Self {
            uuid,
            registry,
            observed: Arc::new(Mutex::new(Observed {
                spec,
                size,
                state: BusVolumeState::Creating,
                published_on: None,
                share: Protocol::Off,
                nexus: None,
                replicas: HashMap::new(),
                pending_destroy: false,
            })),
            waiters: Default::default(),
            run_lock: Default::default(),
            rerun_requested: Default::default(),
        }
    }

    pub(crate) fn uuid(&self) -> &VolumeId {
        &self.uuid
    }
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().await
    }
    pub(crate) async fn snapshot(&self) -> Observed {
        self.observed.lock().await.clone()
    }

    /// Convert the current observed state to the wire representation.
    pub(crate) async fn to_bus(&self) -> BusVolume {
        let observed = self.snapshot().await;
        BusVolume {
            uuid: self.uuid.clone(),
            spec: observed.spec,
            size: observed.size,
            state: observed.state,
            published_on: observed.published_on,
            nexus: observed.nexus,
            replicas: observed.replicas.into_iter().map(|(_, r)| r).collect(),
        }
    }

    /// Request an FSA run. Never executed inline: posted onto a spawned
    /// task so the caller may complete several mutations before the FSA
    /// observes them. Only one run is ever active; a request arriving
    /// while a run is in progress just flips the rerun flag.
    pub(crate) fn request_fsa_run(&self) {
        match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => {
                let volume = self.clone();
                tokio::spawn(async move {
                    volume.run_loop(guard).await;
                });
            }
            Err(_) => {
                self.rerun_requested.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn run_loop(&self, mut guard: tokio::sync::OwnedMutexGuard<()>) {
        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            if let Err(error) = super::fsa::run(self).await {
                tracing::error!(
                    "FSA run for volume '{}' failed: {}",
                    self.uuid,
                    error
                );
                self.schedule_retry();
            }
            if !self.rerun_requested.swap(false, Ordering::SeqCst) {
                break;
            }
        }
        let _ = &mut guard;
    }

    /// Rearm the FSA after a retry delay when an unhandled error left no
    /// delegated-op caller to report it to.
    fn schedule_retry(&self) {
        let volume = self.clone();
        tokio::spawn(async move {
            tokio::time::delay_for(std::time::Duration::from_secs(30)).await;
            volume.request_fsa_run();
        });
    }

    /// Publish the volume onto `target_node`, suspending until the FSA
    /// resolves the request. Cancels any in-flight unpublish.
    pub(crate) async fn publish(
        &self,
        target_node: Option<NodeId>,
        share: Protocol,
    ) -> Result<String, SvcError> {
        self.cancel(DelegatedOp::Unpublish, "superseded by a publish request")
            .await;
        let (tx, rx) = oneshot::channel();
        {
            let mut observed = self.observed.lock().await;
            observed.published_on = Some(
                target_node.unwrap_or_else(|| observed.spec.preferred_nodes
                    .first()
                    .cloned()
                    .unwrap_or_else(|| NodeId::from(""))),
            );
            observed.share = share;
            let mut waiters = self.waiters.lock().await;
            waiters.publish.push(tx);
        }
        self.request_fsa_run();
        rx.await.unwrap_or(Err(SvcError::Cancelled {
            vol_id: self.uuid.clone(),
            reason: "the volume was torn down while publishing".to_string(),
        }))
    }

    /// Unpublish the volume, suspending until the FSA tears the nexus
    /// down. Cancels any in-flight publish.
    pub(crate) async fn unpublish(&self) -> Result<(), SvcError> {
        self.cancel(DelegatedOp::Publish, "superseded by an unpublish request")
            .await;
        let (tx, rx) = oneshot::channel();
        {
            let mut observed = self.observed.lock().await;
            observed.published_on = None;
            let mut waiters = self.waiters.lock().await;
            waiters.unpublish.push(tx);
        }
        self.request_fsa_run();
        rx.await.unwrap_or(Err(SvcError::Cancelled {
            vol_id: self.uuid.clone(),
            reason: "the volume was torn down while unpublishing".to_string(),
        }))
    }

    /// Tear the volume down entirely, suspending until the FSA finishes.
    pub(crate) async fn destroy(&self) -> Result<(), SvcError> {
        self.cancel(DelegatedOp::Publish, "the volume is being destroyed").await;
        self.cancel(DelegatedOp::Unpublish, "the volume is being destroyed")
            .await;
        let (tx, rx) = oneshot::channel();
        {
            let mut observed = self.observed.lock().await;
            if observed.state == BusVolumeState::Creating {
                // defer: `create` checks this flag once it completes
                observed.pending_destroy = true;
            } else {
                observed.state = BusVolumeState::Destroying;
            }
            let mut waiters = self.waiters.lock().await;
            waiters.destroy.push(tx);
        }
        self.request_fsa_run();
        rx.await.unwrap_or(Err(SvcError::Cancelled {
            vol_id: self.uuid.clone(),
            reason: "the volume manager shut down while destroying".to_string(),
        }))
    }

    /// Cancel every in-flight waiter of the given kind with an explicit
    /// cancellation error.
    async fn cancel(&self, op: DelegatedOp, reason: &str) {
        let mut waiters = self.waiters.lock().await;
        let error = || SvcError::Cancelled {
            vol_id: self.uuid.clone(),
            reason: reason.to_string(),
        };
        match op {
            DelegatedOp::Publish => {
                for tx in waiters.publish.drain(..) {
                    let _ = tx.send(Err(error()));
                }
            }
            DelegatedOp::Unpublish => {
                for tx in waiters.unpublish.drain(..) {
                    let _ = tx.send(Err(error()));
                }
            }
            DelegatedOp::Destroy => {
                for tx in waiters.destroy.drain(..) {
                    let _ = tx.send(Err(error()));
                }
            }
        }
    }

    /// Resolve every waiter of the given kind with the same result, as
    /// the FSA does on reaching the matching transition.
    pub(crate) async fn complete_publish(&self, result: Result<String, SvcError>) {
        let mut waiters = self.waiters.lock().await;
        for tx in waiters.publish.drain(..) {
            let _ = tx.send(clone_result(&result));
        }
    }
    pub(crate) async fn complete_unpublish(&self, result: Result<(), SvcError>) {
        let mut waiters = self.waiters.lock().await;
        for tx in waiters.unpublish.drain(..) {
            let _ = tx.send(clone_unit_result(&result));
        }
    }
    pub(crate) async fn complete_destroy(&self, result: Result<(), SvcError>) {
        let mut waiters = self.waiters.lock().await;
        for tx in waiters.destroy.drain(..) {
            let _ = tx.send(clone_unit_result(&result));
        }
    }

    /// A replica this volume owns was observed for the first time, or
    /// reappeared after being missed by a sync; record it and rerun the FSA
    /// so it gets scored and, if needed, replaced.
    pub(crate) async fn new_replica(&self, replica: Replica) {
        self.observed
            .lock()
            .await
            .replicas
            .insert(replica.node.clone(), replica);
        self.request_fsa_run();
    }

    /// A replica this volume owns changed (share state, size, ...).
    pub(crate) async fn mod_replica(&self, replica: Replica) {
        self.observed
            .lock()
            .await
            .replicas
            .insert(replica.node.clone(), replica);
        self.request_fsa_run();
    }

    /// A replica this volume owns is gone; the FSA rerun will notice the
    /// shortfall and create a replacement if the volume is still healthy
    /// enough to need one.
    pub(crate) async fn del_replica(&self, replica: Replica) {
        self.observed.lock().await.replicas.remove(&replica.node);
        self.request_fsa_run();
    }

    /// This volume's nexus was observed for the first time. Only adopted if
    /// the FSA isn't already tracking one, so an externally observed nexus
    /// never clobbers a create that's still in flight.
    pub(crate) async fn new_nexus(&self, nexus: Nexus) {
        let mut observed = self.observed.lock().await;
        if observed.nexus.is_none() {
            observed.nexus = Some(nexus);
        }
        drop(observed);
        self.request_fsa_run();
    }

    /// This volume's nexus changed (a child faulted, was rebuilt, ...).
    pub(crate) async fn mod_nexus(&self, nexus: Nexus) {
        self.observed.lock().await.nexus = Some(nexus);
        self.request_fsa_run();
    }

    /// This volume's nexus is gone; the FSA rerun will recreate it if the
    /// volume is still meant to be published.
    pub(crate) async fn del_nexus(&self, nexus_id: &NexusId) {
        let mut observed = self.observed.lock().await;
        if observed.nexus.as_ref().map(|n| &n.uuid) == Some(nexus_id) {
            observed.nexus = None;
        }
        drop(observed);
        self.request_fsa_run();
    }

    pub(crate) async fn has_publish_waiter(&self) -> bool {
        !self.waiters.lock().await.publish.is_empty()
    }
    pub(crate) async fn has_destroy_waiter(&self) -> bool {
        !self.waiters.lock().await.destroy.is_empty()
    }
}

/// `SvcError` carries non-`Clone` sources (tonic status/transport errors),
/// so a result destined for several waiters is re-described from its
/// display text rather than cloned structurally.
fn clone_result(result: &Result<String, SvcError>) -> Result<String, SvcError> {
    match result {
        Ok(uri) => Ok(uri.clone()),
        Err(error) => Err(SvcError::Internal {
            details: error.to_string(),
        }),
    }
}
fn clone_unit_result(result: &Result<(), SvcError>) -> Result<(), SvcError> {
    match result {
        Ok(()) => Ok(()),
        Err(error) => Err(SvcError::Internal {
            details: error.to_string(),
        }),
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

    fn replica(node: &str) -> Replica {
        Replica {
            node: node.into(),
            uuid: "replica".into(),
            pool: "pool".into(),
            thin: false,
            size: 1,
            share: Protocol::Off,
            uri: "bdev:///replica".to_string(),
        }
    }

    fn volume() -> Volume {
        let registry = Registry::new(std::time::Duration::from_secs(3600));
        Volume::new(VolumeId::from("vol1"), spec(), registry)
    }

    #[tokio::test]
    async fn new_replica_is_recorded_by_node() {
        let volume = volume();
        volume.new_replica(replica("n1")).await;
        let observed = volume.snapshot().await;
        assert_eq!(observed.replicas.len(), 1);
        assert!(observed.replicas.contains_key(&NodeId::from("n1")));
    }

    #[tokio::test]
    async fn del_replica_removes_only_its_node() {
        let volume = volume();
        volume.new_replica(replica("n1")).await;
        volume.new_replica(replica("n2")).await;
        volume.del_replica(replica("n1")).await;
        let observed = volume.snapshot().await;
        assert_eq!(observed.replicas.len(), 1);
        assert!(observed.replicas.contains_key(&NodeId::from("n2")));
    }

    #[tokio::test]
    async fn new_nexus_does_not_clobber_an_in_flight_nexus() {
        let volume = volume();
        let first = Nexus {
            node: "n1".into(),
            uuid: "vol1".into(),
            ..Default::default()
        };
        let second = Nexus {
            node: "n2".into(),
            uuid: "vol1".into(),
            ..Default::default()
        };
        volume.observed.lock().await.nexus = Some(first.clone());
        volume.new_nexus(second).await;
        assert_eq!(volume.snapshot().await.nexus, Some(first));
    }

    #[tokio::test]
    async fn del_nexus_ignores_a_mismatched_uuid() {
        let volume = volume();
        let nexus = Nexus {
            node: "n1".into(),
            uuid: "vol1".into(),
            ..Default::default()
        };
        volume.observed.lock().await.nexus = Some(nexus.clone());
        volume.del_nexus(&NexusId::from("someone-else")).await;
        assert_eq!(volume.snapshot().await.nexus, Some(nexus));

        volume.del_nexus(&NexusId::from("vol1")).await;
        assert_eq!(volume.snapshot().await.nexus, None);
    }

    #[tokio::test]
    async fn cancel_resolves_waiters_with_a_cancelled_error() {
        let volume = volume();
        let (tx, rx) = oneshot::channel();
        volume.waiters.lock().await.publish.push(tx);
        assert!(volume.has_publish_waiter().await);

        volume.cancel(DelegatedOp::Publish, "test teardown").await;
        assert!(!volume.has_publish_waiter().await);
        match rx.await {
            Ok(Err(SvcError::Cancelled { reason, .. })) => {
                assert_eq!(reason, "test teardown");
            }
            other => panic!("expected a cancelled result, got {:?}", other),
        }
    }
}
