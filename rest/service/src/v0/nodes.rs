use super::*;
use actix_web::HttpResponse;

pub(crate) fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_nodes).service(get_node);
}

#[get("/v0/nodes")]
async fn get_nodes() -> HttpResponse {
    RestRespond::result(MessageBus::get_nodes().await)
}
#[get("/v0/nodes/{id}")]
async fn get_node(web::Path(node_id): web::Path<NodeId>) -> HttpResponse {
    RestRespond::result(MessageBus::get_node(&node_id).await)
}
