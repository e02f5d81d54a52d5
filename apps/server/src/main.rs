#![warn(clippy::all, clippy::pedantic)]

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use probewatch::SqlResultStore;
use probewatch::clock::SystemClock;
use probewatch::database::initialize_database;
use probewatch::pool::open_pool;
use tracing::info;

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;
use routes::AppState;

const DEFAULT_DB: &str = "probewatch.db";
const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let db_path = env::var("PROBEWATCH_DB").unwrap_or_else(|_| DEFAULT_DB.to_string());
    let addr: SocketAddr = env::var("PROBEWATCH_BIND").as_deref().unwrap_or(DEFAULT_BIND).parse()?;

    let pool = open_pool(&db_path).await?;
    {
        let conn = pool.get().await.map_err(anyhow::Error::from)?;
        initialize_database(&conn).await?;
    }

    let clock = Arc::new(SystemClock);
    let state = web::Data::new(AppState {
        store: Arc::new(SqlResultStore::new(pool, clock.clone())),
        clock,
    });

    info!(%addr, db = %db_path, "Serving probe records");
    run_server(addr, state).await
}

async fn run_server(addr: SocketAddr, state: web::Data<AppState>) -> Result<(), AppError> {
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
