use clap::Parser;
use nestegg::api::cli::{self, Cli};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = cli::run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
