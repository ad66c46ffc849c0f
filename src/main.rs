use clap::Parser;

use aichestrator::cli::types::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    aichestrator::infrastructure::logging::init("info", None);

    match aichestrator::cli::dispatch(cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}
