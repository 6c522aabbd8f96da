use super::*;
use actix_web::HttpResponse;

pub(crate) fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_volumes)
        .service(get_volume)
        .service(get_node_volumes)
        .service(get_node_volume);
}

#[get("/v0/volumes")]
async fn get_volumes() -> HttpResponse {
    RestRespond::result(MessageBus::get_volumes(Filter::None).await)
}

#[get("/v0/volumes/{volume_id}")]
async fn get_volume(web::Path(volume_id): web::Path<VolumeId>) -> HttpResponse {
    RestRespond::result(MessageBus::get_volume(Filter::Volume(volume_id)).await)
}

#[get("/v0/nodes/{node_id}/volumes")]
async fn get_node_volumes(
    web::Path(node_id): web::Path<NodeId>,
) -> HttpResponse {
    RestRespond::result(MessageBus::get_volumes(Filter::Node(node_id)).await)
}
#[get("/v0/nodes/{node_id}/volumes/{volume_id}")]
async fn get_node_volume(
    web::Path((node_id, volume_id)): web::Path<(NodeId, VolumeId)>,
) -> HttpResponse {
    RestRespond::result(
        MessageBus::get_volume(Filter::NodeVolume(node_id, volume_id)).await,
    )
}
