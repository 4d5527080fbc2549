use clap::Parser;
use tensorbase::{cli::Cli, infra::Logger};
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tensorbase=info"));
    let (logger, subscriber) = Logger::subscriber(filter);
    subscriber.init();

    let cli = Cli::parse();
    if let Err(e) = cli.run(&logger) {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
