use clap::Parser;
use wildmesh_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("❌ wildmesh: {e}");
        std::process::exit(1);
    }
}
