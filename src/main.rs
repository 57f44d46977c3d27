mod cli;
mod config;
mod core;
mod error;
mod models;
mod sources;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    match cli::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("오류: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// 로그는 stderr로 보낸다. `RUST_LOG`가 있으면 그 값을 따른다.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "likedl=warn",
        1 => "likedl=info",
        _ => "likedl=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
