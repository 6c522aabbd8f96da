use super::*;
use actix_web::HttpResponse;

pub(crate) fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_replicas)
        .service(get_replica)
        .service(get_node_replicas)
        .service(get_node_pool_replicas)
        .service(get_node_pool_replica);
}

#[get("/v0/replicas")]
async fn get_replicas() -> HttpResponse {
    RestRespond::result(MessageBus::get_replicas(Filter::None).await)
}
#[get("/v0/replicas/{id}")]
async fn get_replica(
    web::Path(replica_id): web::Path<ReplicaId>,
) -> HttpResponse {
    RestRespond::result(MessageBus::get_replica(Filter::Replica(replica_id)).await)
}

#[get("/v0/nodes/{id}/replicas")]
async fn get_node_replicas(
    web::Path(node_id): web::Path<NodeId>,
) -> HttpResponse {
    RestRespond::result(MessageBus::get_replicas(Filter::Node(node_id)).await)
}

#[get("/v0/nodes/{node_id}/pools/{pool_id}/replicas")]
async fn get_node_pool_replicas(
    web::Path((node_id, pool_id)): web::Path<(NodeId, PoolId)>,
) -> HttpResponse {
    RestRespond::result(
        MessageBus::get_replicas(Filter::NodePool(node_id, pool_id)).await,
    )
}
#[get("/v0/nodes/{node_id}/pools/{pool_id}/replicas/{replica_id}")]
async fn get_node_pool_replica(
    web::Path((node_id, pool_id, replica_id)): web::Path<(
        NodeId,
        PoolId,
        ReplicaId,
    )>,
) -> HttpResponse {
    RestRespond::result(
        MessageBus::get_replica(Filter::NodePoolReplica(
            node_id, pool_id, replica_id,
        ))
        .await,
    )
}
