use super::manager::VolumeManager;
use crate::core::{registry::Registry, wrapper::ClientOps};
use common::errors::{NodeNotFound, SvcError};
use mbus_api::v0::{
    AddNexusChild,
    Child,
    CreateNexus,
    CreateVolume,
    DestroyNexus,
    DestroyVolume,
    Filter,
    GetNexuses,
    GetVolumes,
    ImportVolume,
    Nexus,
    Nexuses,
    PublishVolume,
    RemoveNexusChild,
    ShareNexus,
    UnpublishVolume,
    UnshareNexus,
    UpdateVolume,
    Volume,
    Volumes,
};
use snafu::OptionExt;

#[derive(Debug, Clone)]
pub(super) struct Service {
    registry: Registry,
    manager: VolumeManager,
}

impl Service {
    pub(super) fn new(registry: Registry) -> Self {
        let manager = VolumeManager::new(registry.clone());
        Self {
            registry,
            manager,
        }
    }

    /// Get nexuses according to the filter
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn get_nexuses(
        &self,
        request: &GetNexuses,
    ) -> Result<Nexuses, SvcError> {
        let filter = request.filter.clone();
        let nexuses = match filter {
            Filter::None => self.registry.get_node_opt_nexuses(None).await?,
            Filter::Node(node_id) => {
                self.registry.get_node_nexuses(&node_id).await?
            }
            Filter::NodeNexus(node_id, nexus_id) => {
                let nexus =
                    self.registry.get_node_nexus(&node_id, &nexus_id).await?;
                vec![nexus]
            }
            Filter::Nexus(nexus_id) => {
                let nexus = self.registry.get_nexus(&nexus_id).await?;
                vec![nexus]
            }
            _ => {
                return Err(SvcError::InvalidFilter {
                    filter,
                })
            }
        };
        Ok(Nexuses(nexuses))
    }

    /// Create nexus
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn create_nexus(
        &self,
        request: &CreateNexus,
    ) -> Result<Nexus, SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.create_nexus(request).await
    }

    /// Destroy nexus
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn destroy_nexus(
        &self,
        request: &DestroyNexus,
    ) -> Result<(), SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.destroy_nexus(request).await
    }

    /// Share nexus
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn share_nexus(
        &self,
        request: &ShareNexus,
    ) -> Result<String, SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.share_nexus(request).await
    }

    /// Unshare nexus
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn unshare_nexus(
        &self,
        request: &UnshareNexus,
    ) -> Result<(), SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.unshare_nexus(request).await
    }

    /// Add nexus child
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn add_nexus_child(
        &self,
        request: &AddNexusChild,
    ) -> Result<Child, SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.add_child(request).await
    }

    /// Remove nexus child
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn remove_nexus_child(
        &self,
        request: &RemoveNexusChild,
    ) -> Result<(), SvcError> {
        let node = self
            .registry
            .get_node_wrapper(&request.node)
            .await
            .context(NodeNotFound {
                node_id: request.node.clone(),
            })?;
        node.remove_child(request).await
    }

    /// Get volumes according to the filter
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn get_volumes(
        &self,
        request: &GetVolumes,
    ) -> Result<Volumes, SvcError> {
        let volumes = match request.filter.clone() {
            Filter::None => self.manager.list().await,
            Filter::Volume(vol_id) => vec![self.manager.get(&vol_id).await?],
            filter => {
                return Err(SvcError::InvalidFilter {
                    filter,
                })
            }
        };
        Ok(Volumes(volumes))
    }

    /// Create volume
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn create_volume(
        &self,
        request: &CreateVolume,
    ) -> Result<Volume, SvcError> {
        self.manager
            .create(request.uuid.clone(), request.spec.clone())
            .await
    }

    /// Destroy volume
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn destroy_volume(
        &self,
        request: &DestroyVolume,
    ) -> Result<(), SvcError> {
        self.manager.destroy(&request.uuid).await
    }

    /// Publish volume
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn publish_volume(
        &self,
        request: &PublishVolume,
    ) -> Result<Volume, SvcError> {
        let _uri = self
            .manager
            .publish(
                &request.uuid,
                request.target_node.clone(),
                request.share.clone(),
            )
            .await?;
        self.manager.get(&request.uuid).await
    }

    /// Unpublish volume
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn unpublish_volume(
        &self,
        request: &UnpublishVolume,
    ) -> Result<Volume, SvcError> {
        self.manager.unpublish(&request.uuid).await?;
        self.manager.get(&request.uuid).await
    }

    /// Import a volume discovered on a rejoining node
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn import_volume(
        &self,
        request: &ImportVolume,
    ) -> Result<Volume, SvcError> {
        self.manager
            .import(request.uuid.clone(), request.spec.clone())
            .await
    }

    /// Update a volume's required/preferred node lists
    #[tracing::instrument(level = "debug", err)]
    pub(super) async fn update_volume(
        &self,
        request: &UpdateVolume,
    ) -> Result<Volume, SvcError> {
        self.manager
            .update(&request.uuid, request.spec.clone())
            .await
    }
}
