use clap::Parser;
use tracing::{debug, error, info, warn};

mod log;
mod signal;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = camsup::config::Config::parse(args.config);

    log::set(&cfg.log.level);

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = match tokio::net::TcpListener::bind(cfg.http.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind {} failed: {}", cfg.http.listen, e);
            std::process::exit(1);
        }
    };
    info!("Server listening on {}", cfg.http.listen);

    camsup::serve(cfg, listener, shutdown_signal()).await;
    info!("Server shutdown");
}

async fn shutdown_signal() {
    let signal = signal::wait_for_stop_signal().await;
    debug!("Received signal: {}", signal);
}
