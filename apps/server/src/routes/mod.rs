use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get};
use probewatch::ResultStore;
use probewatch::clock::Clock;

mod certificates;
mod dns;

macros_utils::routes! {
    route health_route,
    route certificates::list_certificates,
    route dns::list_dns,
}

/// Shared handler state
pub struct AppState {
    pub store: Arc<dyn ResultStore>,
    pub clock: Arc<dyn Clock>,
}

/// Health check route
/// The response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}
