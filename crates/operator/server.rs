use std::net::SocketAddr;

use actix_web::{middleware, web::Data, App, HttpServer};
use anyhow::Result;
use mongodb_cluster::controllers::replica_set_controller::State;

use crate::handlers::{health, metrics};

/// Configure and start the HTTP server
pub async fn start_server(state: State, bind: SocketAddr) -> Result<()> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health::index)
            .service(health::health)
            .service(metrics::metrics)
    })
    .bind(bind)?
    .shutdown_timeout(5);

    server.run().await?;
    Ok(())
}
