mod v0;

use actix_web::{middleware, App, HttpServer};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
pub(crate) struct CliArgs {
    /// The bind address for the REST interface
    /// Default: 0.0.0.0:8080
    #[structopt(long, default_value = "0.0.0.0:8080")]
    bind: String,
    /// The Nats Server URL or address to connect to
    /// Default: nats://0.0.0.0:4222
    #[structopt(long, short, default_value = "nats://0.0.0.0:4222")]
    nats: String,
}

fn init_tracing() {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let cli_args = CliArgs::from_args();
    mbus_api::message_bus_init(cli_args.nats).await;

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(v0::nodes::configure)
            .configure(v0::pools::configure)
            .configure(v0::replicas::configure)
            .configure(v0::volumes::configure)
    })
    .bind(cli_args.bind)?
    .run()
    .await
}
