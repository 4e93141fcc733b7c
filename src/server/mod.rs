//! Inbound HTTP surface: the ingestion trigger and a health check.

use std::net::IpAddr;

use rocket::{Build, Rocket};

use crate::graph::SenderQuery;
use crate::pipeline::IngestionPipeline;

pub mod routes;

pub struct AppState {
    pub pipeline: IngestionPipeline,
    pub default_query: SenderQuery,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
}

pub fn build(state: AppState, config: &ServerConfig) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.address))
        .merge(("port", config.port));

    mount(rocket::custom(figment), state)
}

/// Mounts routes and state on an existing Rocket instance.
pub fn mount(rocket: Rocket<Build>, state: AppState) -> Rocket<Build> {
    rocket
        .manage(state)
        .mount(
            "/",
            rocket::routes![routes::store_media_monitoring, routes::health],
        )
}
