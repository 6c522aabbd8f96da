use crate::core::{registry::Registry, wrapper::*};
use common::errors::{NexusNotFound, NodeNotFound, SvcError};
use mbus_api::v0::{Nexus, NexusId, NodeId};
use snafu::OptionExt;

/// Nexus helpers
impl Registry {
    /// Get all nexuses from node `node_id` or from all nodes
    pub(crate) async fn get_node_opt_nexuses(
        &self,
        node_id: Option<NodeId>,
    ) -> Result<Vec<Nexus>, SvcError> {
        match node_id {
            None => Ok(self.get_nexuses().await),
            Some(node_id) => self.get_node_nexuses(&node_id).await,
        }
    }

    /// Get all nexuses from node `node_id`
    pub(crate) async fn get_node_nexuses(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<Nexus>, SvcError> {
        let node =
            self.get_node_wrapper(node_id).await.context(NodeNotFound {
                node_id: node_id.clone(),
            })?;
        Ok(node.nexuses().await)
    }

    /// Get nexus `nexus_id` from node `node_id`
    pub(crate) async fn get_node_nexus(
        &self,
        node_id: &NodeId,
        nexus_id: &NexusId,
    ) -> Result<Nexus, SvcError> {
        let node =
            self.get_node_wrapper(node_id).await.context(NodeNotFound {
                node_id: node_id.clone(),
            })?;
        node.nexus(nexus_id).await.context(NexusNotFound {
            nexus_id: nexus_id.clone(),
        })
    }

    /// Get nexus `nexus_id` from any node
    pub(crate) async fn get_nexus(
        &self,
        nexus_id: &NexusId,
    ) -> Result<Nexus, SvcError> {
        let nexuses = self.get_nexuses().await;
        nexuses
            .into_iter()
            .find(|n| &n.uuid == nexus_id)
            .context(NexusNotFound {
                nexus_id: nexus_id.clone(),
            })
    }

    /// Get all nexuses from all nodes
    pub(crate) async fn get_nexuses(&self) -> Vec<Nexus> {
        let nodes = self.get_nodes_wrapper().await;
        let mut nexuses = vec![];
        for node in nodes {
            nexuses.extend(node.nexuses().await);
        }
        nexuses
    }
}
