use super::*;
use actix_web::HttpResponse;

pub(crate) fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_pools)
        .service(get_pool)
        .service(get_node_pools)
        .service(get_node_pool);
}

#[get("/v0/pools")]
async fn get_pools() -> HttpResponse {
    RestRespond::result(MessageBus::get_pools(Filter::None).await)
}
#[get("/v0/pools/{id}")]
async fn get_pool(web::Path(pool_id): web::Path<PoolId>) -> HttpResponse {
    RestRespond::result(MessageBus::get_pool(Filter::Pool(pool_id)).await)
}

#[get("/v0/nodes/{id}/pools")]
async fn get_node_pools(web::Path(node_id): web::Path<NodeId>) -> HttpResponse {
    RestRespond::result(MessageBus::get_pools(Filter::Node(node_id)).await)
}

#[get("/v0/nodes/{node_id}/pools/{pool_id}")]
async fn get_node_pool(
    web::Path((node_id, pool_id)): web::Path<(NodeId, PoolId)>,
) -> HttpResponse {
    RestRespond::result(
        MessageBus::get_pool(Filter::NodePool(node_id, pool_id)).await,
    )
}
