use clap::Parser;
use mongodb_cluster::controllers::replica_set_controller::{self, State};
use mongodb_cluster::util::config::OperatorConfig;
use mongodb_cluster::util::telemetry;
use tracing::info;

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();
    telemetry::init(config.log_format)?;
    info!(
        agent_image = %config.agent_image,
        mongodb_image = %config.mongodb_image,
        cluster_domain = %config.cluster_domain,
        "starting MongoDB operator"
    );

    // Initiatilize Kubernetes controller state
    let state = State::default();
    let controller = replica_set_controller::run(state.clone(), config.clone());
    let server = server::start_server(state, config.http_bind);

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server?;
    Ok(())
}
