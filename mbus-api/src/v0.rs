#![allow(clippy::field_reassign_with_default)]
use super::*;
use paperclip::actix::Apiv2Schema;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::value::Value;
use std::{cmp::Ordering, fmt::Debug};
use strum_macros::{EnumString, ToString};

pub(super) const VERSION: &str = "v0";

/// Versioned Channels
#[derive(Clone, Debug, Eq, PartialEq, Hash, EnumString, ToString)]
#[strum(serialize_all = "camelCase")]
pub enum ChannelVs {
    /// Default
    Default,
    /// The control-plane core agent: node, pool and volume services
    /// multiplexed onto a single channel
    Core,
    /// Registration of storage nodes with the control plane
    Registry,
    /// Node Service which exposes the registered storage nodes
    Node,
    /// Pool Service which manages storage pools and replicas
    Pool,
    /// Volume Service which manages volumes
    Volume,
    /// Nexus Service which manages nexuses
    Nexus,
    /// Keep it In Sync Service
    Kiiss,
    /// Json gRPC Service
    JsonGrpc,
    /// Control-plane lifecycle/reconciliation events
    Events,
}
impl Default for ChannelVs {
    fn default() -> Self {
        ChannelVs::Default
    }
}

impl From<ChannelVs> for Channel {
    fn from(channel: ChannelVs) -> Self {
        Channel::v0(channel)
    }
}

/// Versioned Message Id's
#[derive(Debug, PartialEq, Clone, ToString, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum MessageIdVs {
    /// Default
    Default,
    /// Liveness Probe
    Liveness,
    /// Update Config
    ConfigUpdate,
    /// Request current Config
    ConfigGetCurrent,
    /// Register a storage node
    Register,
    /// Deregister a storage node
    Deregister,
    /// Node Service
    ///
    /// Get all node information
    GetNodes,
    /// Pool Service
    ///
    /// Get pools with filter
    GetPools,
    /// Create Pool,
    CreatePool,
    /// Destroy Pool,
    DestroyPool,
    /// Get replicas with filter
    GetReplicas,
    /// Create Replica,
    CreateReplica,
    /// Destroy Replica,
    DestroyReplica,
    /// Share Replica,
    ShareReplica,
    /// Unshare Replica,
    UnshareReplica,
    /// Volume Service
    ///
    /// Get nexuses with filter
    GetNexuses,
    /// Create nexus
    CreateNexus,
    /// Destroy Nexus
    DestroyNexus,
    /// Share Nexus
    ShareNexus,
    /// Unshare Nexus
    UnshareNexus,
    /// Remove a child from its parent nexus
    RemoveNexusChild,
    /// Add a child to a nexus
    AddNexusChild,
    /// Get all volumes
    GetVolumes,
    /// Create Volume,
    CreateVolume,
    /// Update an existing Volume's mutable spec fields
    UpdateVolume,
    /// Delete Volume
    DestroyVolume,
    /// Publish a Volume onto a node, creating its nexus there
    PublishVolume,
    /// Unpublish a Volume, tearing down its nexus
    UnpublishVolume,
    /// Import a pre-existing Volume (discovered on node rejoin) into the
    /// registry
    ImportVolume,
    /// Generic JSON gRPC message
    JsonGrpc,
}

// Only V0 should export this macro
// This allows the example code to use the v0 default
// Otherwise they have to impl whatever version they require
#[macro_export]
/// Use version 0 of the Message and Channel
macro_rules! impl_channel_id {
    ($I:ident, $C:ident) => {
        fn id(&self) -> MessageId {
            MessageId::v0(v0::MessageIdVs::$I)
        }
        fn channel(&self) -> Channel {
            Channel::v0(v0::ChannelVs::$C)
        }
    };
}

/// Liveness Probe
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Liveness {}
bus_impl_message_all!(Liveness, Liveness, (), Default);

/// Control-plane configurations that can be pushed down to a storage node
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Hash)]
pub enum Config {
    /// Global storage-node config
    NodeConfig,
    /// Child rebuild-state config
    ChildStatesConfig,
}
impl Default for Config {
    fn default() -> Self {
        Config::NodeConfig
    }
}

/// Update a storage node's configuration
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ConfigUpdate {
    /// type of config being updated
    pub kind: Config,
    /// actual config data
    pub data: Vec<u8>,
}
bus_impl_message_all!(ConfigUpdate, ConfigUpdate, (), Kiiss);

/// Request the current configuration of a given kind
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ConfigGetCurrent {
    /// type of config requested
    pub kind: Config,
}
/// Reply carrying the requested configuration
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ReplyConfig {
    /// config data
    pub config: Vec<u8>,
}
bus_impl_message_all!(
    ConfigGetCurrent,
    ConfigGetCurrent,
    ReplyConfig,
    Kiiss,
    GetConfig
);

/// Register message payload, sent by a storage node on startup and on every
/// keep-alive heartbeat
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// id of the storage node
    pub id: NodeId,
    /// grpc endpoint of the storage node
    pub grpc_endpoint: String,
}
bus_impl_message_all!(Register, Register, (), Registry);

/// Deregister message payload
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct Deregister {
    /// id of the storage node
    pub id: NodeId,
}
bus_impl_message_all!(Deregister, Deregister, (), Registry);

/// Get all the nodes
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct GetNodes {}

/// State of the Node
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
pub enum NodeState {
    /// Node has unexpectedly disappeared
    Unknown,
    /// Node is deemed online: it has not missed the registration
    /// keep-alive deadline
    Online,
    /// Node is deemed offline: it has missed the registration keep-alive
    /// deadline
    Offline,
}
impl Default for NodeState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Node information
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// id of the storage node
    pub id: NodeId,
    /// grpc endpoint of the storage node
    pub grpc_endpoint: String,
    /// deemed state of the node
    pub state: NodeState,
}

bus_impl_vector_request!(Nodes, Node);
bus_impl_message_all!(GetNodes, GetNodes, Nodes, Node);

/// Filter objects based on one of the following criteria
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Filter {
    /// All objects
    None,
    /// Filter by Node id
    Node(NodeId),
    /// Filter by Pool id
    Pool(PoolId),
    /// Filter by Node and Pool id
    NodePool(NodeId, PoolId),
    /// Filter by Node and Replica id
    NodeReplica(NodeId, ReplicaId),
    /// Filter by Node, Pool and Replica id
    NodePoolReplica(NodeId, PoolId, ReplicaId),
    /// Filter by Pool and Replica id
    PoolReplica(PoolId, ReplicaId),
    /// Filter by Replica id
    Replica(ReplicaId),
    /// Filter by Node and Nexus
    NodeNexus(NodeId, NexusId),
    /// Filter by Nexus
    Nexus(NexusId),
    /// Filter by Node and Volume
    NodeVolume(NodeId, VolumeId),
    /// Filter by Volume
    Volume(VolumeId),
}
impl Default for Filter {
    fn default() -> Self {
        Self::None
    }
}

macro_rules! bus_impl_string_id_inner {
    ($Name:ident, $Doc:literal) => {
        #[doc = $Doc]
        #[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Hash, Apiv2Schema)]
        pub struct $Name(String);

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $Name {
            /// Borrow self as a str
            pub fn as_str<'a>(&'a self) -> &'a str {
                self.0.as_str()
            }
        }

        impl From<&str> for $Name {
            fn from(id: &str) -> Self {
                $Name::from(id)
            }
        }
        impl From<String> for $Name {
            fn from(id: String) -> Self {
                $Name::from(id.as_str())
            }
        }

        impl Into<$Name> for &$Name {
            fn into(self) -> $Name {
                self.clone()
            }
        }

        impl Into<String> for $Name {
            fn into(self) -> String {
                self.to_string()
            }
        }
    };
}

macro_rules! bus_impl_string_id {
    ($Name:ident, $Doc:literal) => {
        bus_impl_string_id_inner!($Name, $Doc);
        impl Default for $Name {
            /// Generates new blank identifier
            fn default() -> Self {
                $Name(uuid::Uuid::default().to_string())
            }
        }
        impl $Name {
            /// Build Self from anything string-like
            pub fn from<T: Into<String>>(id: T) -> Self {
                $Name(id.into())
            }
            /// Generates new random identifier
            pub fn new() -> Self {
                $Name(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

macro_rules! bus_impl_string_id_percent_decoding {
    ($Name:ident, $Doc:literal) => {
        bus_impl_string_id_inner!($Name, $Doc);
        impl Default for $Name {
            fn default() -> Self {
                $Name("".to_string())
            }
        }
        impl $Name {
            /// Build Self from anything string-like, percent-decoding it
            pub fn from<T: Into<String>>(id: T) -> Self {
                let src: String = id.into();
                let decoded_src = percent_decode_str(src.clone().as_str())
                    .decode_utf8()
                    .unwrap_or(src.into())
                    .to_string();
                $Name(decoded_src)
            }
        }
    };
}

bus_impl_string_id!(NodeId, "ID of a storage node");
bus_impl_string_id!(PoolId, "ID of a storage pool");
bus_impl_string_id!(ReplicaId, "UUID of a pool replica");
bus_impl_string_id!(NexusId, "UUID of a nexus");
bus_impl_string_id_percent_decoding!(ChildUri, "URI of a nexus child");
bus_impl_string_id!(VolumeId, "UUID of a volume");
bus_impl_string_id!(JsonGrpcMethod, "JSON gRPC method");
bus_impl_string_id!(
    JsonGrpcParams,
    "Parameters to be passed to a JSON gRPC method"
);

/// Get all the pools from a specific node or None for all nodes
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct GetPools {
    /// Filter request
    pub filter: Filter,
}

/// State of the Pool
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
pub enum PoolState {
    /// unknown state
    Unknown = 0,
    /// the pool is in normal working order
    Online = 1,
    /// the pool has experienced a failure but can still function
    Degraded = 2,
    /// the pool is completely inaccessible
    Faulted = 3,
}
impl Default for PoolState {
    fn default() -> Self {
        Self::Unknown
    }
}
impl From<i32> for PoolState {
    fn from(src: i32) -> Self {
        match src {
            1 => Self::Online,
            2 => Self::Degraded,
            3 => Self::Faulted,
            _ => Self::Unknown,
        }
    }
}
// online > degraded > unknown/faulted; used to rank candidate pools
// best-first in the replica placement scorer.
impl PartialOrd for PoolState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self {
            PoolState::Unknown => match other {
                PoolState::Unknown => None,
                PoolState::Online => Some(Ordering::Less),
                PoolState::Degraded => Some(Ordering::Less),
                PoolState::Faulted => None,
            },
            PoolState::Online => match other {
                PoolState::Unknown => Some(Ordering::Greater),
                PoolState::Online => Some(Ordering::Equal),
                PoolState::Degraded => Some(Ordering::Greater),
                PoolState::Faulted => Some(Ordering::Greater),
            },
            PoolState::Degraded => match other {
                PoolState::Unknown => Some(Ordering::Greater),
                PoolState::Online => Some(Ordering::Less),
                PoolState::Degraded => Some(Ordering::Equal),
                PoolState::Faulted => Some(Ordering::Greater),
            },
            PoolState::Faulted => match other {
                PoolState::Unknown => None,
                PoolState::Online => Some(Ordering::Less),
                PoolState::Degraded => Some(Ordering::Less),
                PoolState::Faulted => Some(Ordering::Equal),
            },
        }
    }
}

/// Pool information
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub id: PoolId,
    /// absolute disk paths claimed by the pool
    pub disks: Vec<String>,
    /// current state of the pool
    pub state: PoolState,
    /// size of the pool in bytes
    pub capacity: u64,
    /// used bytes from the pool
    pub used: u64,
}
impl Pool {
    /// Free capacity on the pool
    pub fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// Create Pool Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatePool {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub id: PoolId,
    /// disk device paths or URIs to be claimed by the pool
    pub disks: Vec<String>,
}
bus_impl_message_all!(CreatePool, CreatePool, Pool, Pool);

/// Destroy Pool Request
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DestroyPool {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub id: PoolId,
}
bus_impl_message_all!(DestroyPool, DestroyPool, (), Pool);

bus_impl_vector_request!(Pools, Pool);
bus_impl_message_all!(GetPools, GetPools, Pools, Pool);

/// Get all the replicas from a specific node and pool, or all of them
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct GetReplicas {
    /// Filter request
    pub filter: Filter,
}

/// Replica information
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the replica
    pub uuid: ReplicaId,
    /// id of the pool
    pub pool: PoolId,
    /// thin provisioning
    pub thin: bool,
    /// size of the replica in bytes
    pub size: u64,
    /// protocol used for exposing the replica
    pub share: Protocol,
    /// uri usable by a nexus to access it
    pub uri: String,
}

bus_impl_vector_request!(Replicas, Replica);
bus_impl_message_all!(GetReplicas, GetReplicas, Replicas, Pool);

/// Create Replica Request
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplica {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the replica
    pub uuid: ReplicaId,
    /// id of the pool
    pub pool: PoolId,
    /// size of the replica in bytes
    pub size: u64,
    /// thin provisioning
    pub thin: bool,
    /// protocol to expose the replica over
    pub share: Protocol,
}
bus_impl_message_all!(CreateReplica, CreateReplica, Replica, Pool);

/// Destroy Replica Request
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DestroyReplica {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub pool: PoolId,
    /// uuid of the replica
    pub uuid: ReplicaId,
}
bus_impl_message_all!(DestroyReplica, DestroyReplica, (), Pool);

/// Share Replica Request
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShareReplica {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub pool: PoolId,
    /// uuid of the replica
    pub uuid: ReplicaId,
    /// protocol used for exposing the replica
    pub protocol: Protocol,
}
bus_impl_message_all!(ShareReplica, ShareReplica, String, Pool);

/// Unshare Replica Request
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnshareReplica {
    /// id of the storage node
    pub node: NodeId,
    /// id of the pool
    pub pool: PoolId,
    /// uuid of the replica
    pub uuid: ReplicaId,
}
bus_impl_message_all!(UnshareReplica, UnshareReplica, (), Pool);

/// Indicates what protocol a bdev is shared as
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    /// not shared by any of the variants (local bdev access only)
    Off = 0,
    /// shared as NVMe-oF TCP
    Nvmf = 1,
    /// shared as iSCSI
    Iscsi = 2,
    /// shared as NBD
    Nbd = 3,
}
impl Default for Protocol {
    fn default() -> Self {
        Self::Off
    }
}
impl From<i32> for Protocol {
    fn from(src: i32) -> Self {
        match src {
            0 => Self::Off,
            1 => Self::Nvmf,
            2 => Self::Iscsi,
            _ => Self::Off,
        }
    }
}

/// State of the Replica
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum ReplicaState {
    /// unknown state
    Unknown = 0,
    /// the replica is in normal working order
    Online = 1,
    /// the replica has experienced a failure but can still function
    Degraded = 2,
    /// the replica is completely inaccessible
    Faulted = 3,
}
impl Default for ReplicaState {
    fn default() -> Self {
        Self::Unknown
    }
}
impl From<i32> for ReplicaState {
    fn from(src: i32) -> Self {
        match src {
            1 => Self::Online,
            2 => Self::Degraded,
            3 => Self::Faulted,
            _ => Self::Unknown,
        }
    }
}

/// Get nexuses with a filter selection
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct GetNexuses {
    /// Filter request
    pub filter: Filter,
}

/// Nexus information
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Nexus {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub uuid: NexusId,
    /// size of the volume in bytes
    pub size: u64,
    /// current state of the nexus
    pub state: NexusState,
    /// array of children
    pub children: Vec<Child>,
    /// URI of the device for the volume (missing if not published).
    /// Missing property and empty string are treated the same.
    pub device_uri: String,
    /// total number of rebuild tasks
    pub rebuilds: u32,
}

/// Child information
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    /// uri of the child device
    pub uri: ChildUri,
    /// state of the child
    pub state: ChildState,
    /// current rebuild progress (%)
    pub rebuild_progress: Option<i32>,
}

/// Child State information
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Apiv2Schema)]
pub enum ChildState {
    /// Default Unknown state
    Unknown = 0,
    /// healthy and contains the latest bits
    Online = 1,
    /// rebuild is in progress (or other recoverable error)
    Degraded = 2,
    /// unrecoverable error (control plane must act)
    Faulted = 3,
}
impl Default for ChildState {
    fn default() -> Self {
        Self::Unknown
    }
}
impl From<i32> for ChildState {
    fn from(src: i32) -> Self {
        match src {
            1 => Self::Online,
            2 => Self::Degraded,
            3 => Self::Faulted,
            _ => Self::Unknown,
        }
    }
}

/// Nexus State information
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
pub enum NexusState {
    /// Default Unknown state
    Unknown = 0,
    /// healthy and working
    Online = 1,
    /// not healthy but able to serve IO (e.g. a rebuild is in progress)
    Degraded = 2,
    /// broken and unable to serve IO
    Faulted = 3,
}
impl Default for NexusState {
    fn default() -> Self {
        Self::Unknown
    }
}
impl From<i32> for NexusState {
    fn from(src: i32) -> Self {
        match src {
            1 => Self::Online,
            2 => Self::Degraded,
            3 => Self::Faulted,
            _ => Self::Unknown,
        }
    }
}

bus_impl_vector_request!(Nexuses, Nexus);
bus_impl_message_all!(GetNexuses, GetNexuses, Nexuses, Nexus);

/// Create Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateNexus {
    /// id of the storage node
    pub node: NodeId,
    /// the nexus uuid will be set to this
    pub uuid: NexusId,
    /// size of the device in bytes
    pub size: u64,
    /// replicas can be iscsi/nvmf remote targets or a local bdev
    /// (i.e. bdev:///name-of-the-bdev); uris to the targets we connect to
    pub children: Vec<ChildUri>,
}
bus_impl_message_all!(CreateNexus, CreateNexus, Nexus, Nexus);

/// Destroy Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestroyNexus {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub uuid: NexusId,
}
bus_impl_message_all!(DestroyNexus, DestroyNexus, (), Nexus);

/// Share Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareNexus {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub uuid: NexusId,
    /// encryption key
    pub key: Option<String>,
    /// share protocol
    pub protocol: Protocol,
}
bus_impl_message_all!(ShareNexus, ShareNexus, String, Nexus);

/// Unshare Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnshareNexus {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub uuid: NexusId,
}
bus_impl_message_all!(UnshareNexus, UnshareNexus, (), Nexus);

/// Remove Child from Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveNexusChild {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub nexus: NexusId,
    /// URI of the child device to be removed
    pub uri: ChildUri,
}
bus_impl_message_all!(RemoveNexusChild, RemoveNexusChild, (), Nexus);

/// Add child to Nexus Request
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddNexusChild {
    /// id of the storage node
    pub node: NodeId,
    /// uuid of the nexus
    pub nexus: NexusId,
    /// URI of the child device to be added
    pub uri: ChildUri,
    /// auto start rebuilding
    pub auto_rebuild: bool,
}
bus_impl_message_all!(AddNexusChild, AddNexusChild, Child, Nexus);

/// Declared desired state of a Volume. Everything here is caller-supplied
/// and immutable for the lifetime of the volume except via `UpdateVolume`.
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// number of replicas the volume's nexus should have
    pub replica_count: u64,
    /// the volume is only ever accessed locally (no nexus network sharing)
    pub local: bool,
    /// nodes to prefer, in order, when placing replicas/the nexus
    #[serde(default)]
    pub preferred_nodes: Vec<NodeId>,
    /// nodes a replica must be placed on (subset constraint)
    #[serde(default)]
    pub required_nodes: Vec<NodeId>,
    /// minimum usable size in bytes
    pub required_bytes: u64,
    /// maximum usable size in bytes, 0 meaning unbounded
    #[serde(default)]
    pub limit_bytes: u64,
    /// protocol used to share the nexus when published remotely
    pub protocol: Protocol,
}

/// Coarse lifecycle state of a Volume, driven by the finite-state
/// reconciler (see the volume FSA).
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    EnumString,
    ToString,
    Eq,
    PartialEq,
    Apiv2Schema,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum VolumeState {
    /// the volume has just been declared and has no replicas yet
    Creating,
    /// `onlineCount == replicaCount` and, if published, the nexus is online
    Healthy,
    /// fewer online replicas than `replicaCount`, but still usable
    Degraded,
    /// unusable: no online replicas, or a published nexus is faulted
    Faulted,
    /// a `DestroyVolume` is in progress
    Destroying,
    /// state could not be determined (e.g. all owning nodes are offline)
    Unknown,
}
impl Default for VolumeState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Observed state of a Volume.
#[derive(
    Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq, Apiv2Schema,
)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// uuid of the volume
    pub uuid: VolumeId,
    /// declared desired state
    pub spec: VolumeSpec,
    /// usable size in bytes, always within [requiredBytes, limitBytes]
    pub size: u64,
    /// current reconciled state
    pub state: VolumeState,
    /// node the volume is currently published on, if any
    pub published_on: Option<NodeId>,
    /// the volume's single nexus, if one currently exists
    pub nexus: Option<Nexus>,
    /// replicas backing the volume, across all pools/nodes
    pub replicas: Vec<Replica>,
}

/// Get volumes
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumes {
    /// filter volumes
    pub filter: Filter,
}
bus_impl_vector_request!(Volumes, Volume);
bus_impl_message_all!(GetVolumes, GetVolumes, Volumes, Volume);

/// Create volume
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolume {
    /// uuid the new volume should have
    pub uuid: VolumeId,
    /// the volume's declared desired state
    pub spec: VolumeSpec,
}
bus_impl_message_all!(CreateVolume, CreateVolume, Volume, Volume);

/// Update the mutable fields of an existing Volume's spec. Everything not
/// explicitly allowed here (size, protocol, replica topology) is rejected
/// with `Unimplemented`/`InvalidArgument` by the handling service.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVolume {
    /// uuid of the volume to update
    pub uuid: VolumeId,
    /// replacement spec; only `requiredNodes`/`preferredNodes` may change
    pub spec: VolumeSpec,
}
bus_impl_message_all!(UpdateVolume, UpdateVolume, Volume, Volume);

/// Delete volume
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DestroyVolume {
    /// uuid of the volume
    pub uuid: VolumeId,
}
bus_impl_message_all!(DestroyVolume, DestroyVolume, (), Volume);

/// Publish a volume onto a node: ensures replicas, creates (or moves) its
/// nexus, and shares it for remote access if requested.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublishVolume {
    /// uuid of the volume
    pub uuid: VolumeId,
    /// node the caller wants the nexus published on; `None` lets the
    /// control plane pick among the volume's replica nodes
    pub target_node: Option<NodeId>,
    /// share protocol to expose the nexus with
    pub share: Protocol,
}
bus_impl_message_all!(PublishVolume, PublishVolume, Volume, Volume);

/// Unpublish a volume: tears down its nexus, leaving the replicas intact.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnpublishVolume {
    /// uuid of the volume
    pub uuid: VolumeId,
}
bus_impl_message_all!(UnpublishVolume, UnpublishVolume, Volume, Volume);

/// Import a volume discovered on a rejoining node (its replicas/nexus
/// already exist) into the registry rather than creating new ones.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImportVolume {
    /// uuid of the volume being imported
    pub uuid: VolumeId,
    /// the spec to import it under
    pub spec: VolumeSpec,
}
bus_impl_message_all!(ImportVolume, ImportVolume, Volume, Volume);

/// Generic JSON gRPC request, used for storage-node functionality not
/// otherwise modelled as a first-class message
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JsonGrpcRequest {
    /// id of the storage node
    pub node: NodeId,
    /// JSON gRPC method to call
    pub method: JsonGrpcMethod,
    /// parameters to be passed to the above method
    pub params: JsonGrpcParams,
}
bus_impl_message_all!(JsonGrpcRequest, JsonGrpc, Value, JsonGrpc);
