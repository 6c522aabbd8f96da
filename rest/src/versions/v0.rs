use super::super::ActixRestClient;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use async_trait::async_trait;
use mbus_api::{
    message_bus::{v0, v0::BusError},
    ErrorChain,
};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use strum_macros::{self, Display};

/// Node from the node service
pub type Node = v0::Node;
/// Vector of Nodes from the node service
pub type Nodes = v0::Nodes;
/// Pool from the pool service
pub type Pool = v0::Pool;
/// Vector of Pools from the pool service
pub type Pools = v0::Pools;
/// Replica
pub type Replica = v0::Replica;
/// Vector of Replicas from the pool service
pub type Replicas = v0::Replicas;
/// Volume
pub type Volume = v0::Volume;
/// Vector of Volumes from the volume service
pub type Volumes = v0::Volumes;
/// Filter Nodes, Pools, Replicas, Volumes
pub type Filter = v0::Filter;

/// RestClient interface: read-only status surface, mirroring the
/// statistics/CR-status fields the orchestrator operators poll.
#[async_trait(?Send)]
pub trait RestClient {
    /// Get all the known nodes
    async fn get_nodes(&self) -> anyhow::Result<Vec<Node>>;
    /// Get all the known pools
    async fn get_pools(&self, filter: Filter) -> anyhow::Result<Vec<Pool>>;
    /// Get all the known replicas
    async fn get_replicas(
        &self,
        filter: Filter,
    ) -> anyhow::Result<Vec<Replica>>;
    /// Get all the known volumes
    async fn get_volumes(&self, filter: Filter) -> anyhow::Result<Vec<Volume>>;
}

#[derive(Display, Debug)]
#[allow(clippy::enum_variant_names)]
enum RestURNs {
    #[strum(serialize = "nodes")]
    GetNodes(Nodes),
    #[strum(serialize = "pools")]
    GetPools(Pools),
    #[strum(serialize = "replicas")]
    GetReplicas(Replicas),
    #[strum(serialize = "volumes")]
    GetVolumes(Volumes),
}

macro_rules! get_all {
    ($S:ident, $T:ident) => {
        $S.get_vec(format!(
            "/v0/{}",
            RestURNs::$T(Default::default()).to_string()
        ))
    };
}
macro_rules! get_filter {
    ($S:ident, $F:ident, $T:ident) => {
        $S.get_vec(format!(
            "/v0/{}",
            get_filtered_urn($F, &RestURNs::$T(Default::default()))?
        ))
    };
}

fn get_filtered_urn(filter: Filter, r: &RestURNs) -> anyhow::Result<String> {
    let urn = match r {
        RestURNs::GetNodes(_) => match filter {
            Filter::None => "nodes".to_string(),
            Filter::Node(id) => format!("nodes/{}", id),
            _ => return Err(anyhow::Error::msg("Invalid filter for Nodes")),
        },
        RestURNs::GetPools(_) => match filter {
            Filter::None => "pools".to_string(),
            Filter::Node(id) => format!("nodes/{}/pools", id),
            Filter::Pool(id) => format!("pools/{}", id),
            Filter::NodePool(n, p) => format!("nodes/{}/pools/{}", n, p),
            _ => return Err(anyhow::Error::msg("Invalid filter for pools")),
        },
        RestURNs::GetReplicas(_) => match filter {
            Filter::None => "replicas".to_string(),
            Filter::Node(id) => format!("nodes/{}/replicas", id),
            Filter::Pool(id) => format!("pools/{}/replicas", id),
            Filter::Replica(id) => format!("replicas/{}", id),
            Filter::NodePool(n, p) => {
                format!("nodes/{}/pools/{}/replicas", n, p)
            }
            Filter::NodeReplica(n, r) => format!("nodes/{}/replicas/{}", n, r),
            Filter::NodePoolReplica(n, p, r) => {
                format!("nodes/{}/pools/{}/replicas/{}", n, p, r)
            }
            Filter::PoolReplica(p, r) => format!("pools/{}/replicas/{}", p, r),
            _ => return Err(anyhow::Error::msg("Invalid filter for replicas")),
        },
        RestURNs::GetVolumes(_) => match filter {
            Filter::None => "volumes".to_string(),
            Filter::Node(id) => format!("nodes/{}/volumes", id),
            Filter::Volume(id) => format!("volumes/{}", id),
            Filter::NodeVolume(n, v) => format!("nodes/{}/volumes/{}", n, v),
            _ => return Err(anyhow::Error::msg("Invalid filter for volumes")),
        },
    };

    Ok(urn)
}

#[async_trait(?Send)]
impl RestClient for ActixRestClient {
    async fn get_nodes(&self) -> anyhow::Result<Vec<Node>> {
        get_all!(self, GetNodes).await
    }

    async fn get_pools(&self, filter: Filter) -> anyhow::Result<Vec<Pool>> {
        get_filter!(self, filter, GetPools).await
    }

    async fn get_replicas(
        &self,
        filter: Filter,
    ) -> anyhow::Result<Vec<Replica>> {
        get_filter!(self, filter, GetReplicas).await
    }

    async fn get_volumes(&self, filter: Filter) -> anyhow::Result<Vec<Volume>> {
        get_filter!(self, filter, GetVolumes).await
    }
}

impl ActixRestClient {
    /// Get RestClient v0
    pub fn v0(&self) -> impl RestClient {
        self.clone()
    }
}

/// Rest Error
#[derive(Debug)]
pub struct RestError {
    kind: BusError,
    message: String,
}

impl RestError {
    fn get_resp_error(&self) -> HttpResponse {
        match &self.kind {
            BusError::NotFound => HttpResponse::NoContent().json(()),
            BusError::NotUnique => {
                let error = serde_json::json!({"error": self.kind.as_ref(), "message": self.message });
                tracing::error!("Got error: {}", error);
                HttpResponse::InternalServerError().json(error)
            }
            BusError::MessageBusError {
                source,
            } => {
                let error = serde_json::json!({"error": source.as_ref(), "message": source.full_string() });
                tracing::error!("Got error: {}", error);
                HttpResponse::InternalServerError().json(error)
            }
        }
    }
}
// used by the trait ResponseError only when the default error_response trait
// method is used.
impl Display for RestError {
    fn fmt(&self, _: &mut Formatter<'_>) -> std::fmt::Result {
        unimplemented!()
    }
}
impl ResponseError for RestError {
    fn status_code(&self) -> StatusCode {
        self.get_resp_error().status()
    }
    fn error_response(&self) -> HttpResponse {
        self.get_resp_error()
    }
}
impl From<BusError> for RestError {
    fn from(kind: BusError) -> Self {
        Self {
            message: kind.to_string(),
            kind,
        }
    }
}
impl From<RestError> for HttpResponse {
    fn from(error: RestError) -> Self {
        error.get_resp_error()
    }
}

/// Respond using a message bus response Result<Response,BusError>.
/// On success the Response is sent via the body of an HttpResponse with
/// StatusCode OK; otherwise the RestError is returned, also as an
/// HttpResponse/ResponseError.
#[derive(Debug)]
pub struct RestRespond<T>(Result<T, RestError>);

// used by the trait ResponseError only when the default error_response trait
// method is used.
impl<T> Display for RestRespond<T> {
    fn fmt(&self, _: &mut Formatter<'_>) -> std::fmt::Result {
        unimplemented!()
    }
}
impl<T: Serialize> RestRespond<T> {
    /// Respond with a Result<T, BusError>
    pub fn result(from: Result<T, BusError>) -> HttpResponse {
        let resp: Self = from.into();
        resp.into()
    }
}
impl<T> From<Result<T, BusError>> for RestRespond<T> {
    fn from(result: Result<T, BusError>) -> Self {
        RestRespond(result.map_err(RestError::from))
    }
}
impl<T: Serialize> From<RestRespond<T>> for HttpResponse {
    fn from(resp: RestRespond<T>) -> Self {
        match resp.0 {
            Ok(resp) => HttpResponse::Ok().json(resp),
            Err(error) => error.into(),
        }
    }
}
