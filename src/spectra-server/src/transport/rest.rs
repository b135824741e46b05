//! `GET /status`: a plain REST snapshot of session state for clients
//! that don't want to hold a WebSocket open just to poll.

use std::sync::Arc;

use actix_web::{get, web, HttpResponse, Responder};

use crate::coordinator::Coordinator;

#[get("/status")]
pub async fn status(coordinator: web::Data<Arc<Coordinator>>) -> impl Responder {
    let frame = coordinator.status_frame().await;
    HttpResponse::Ok().json(frame)
}
