use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, PeersResponse};

/// Local identity and the current peer list.
#[get("/peers/")]
pub async fn get_peers(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(PeersResponse {
        me: state.network.me(),
        peers: state.network.peers(),
    })
}
