//! Sluice CLI - transcoding server entry point.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Popularity-driven video transcoding and HLS delivery server")]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        commands::Commands::Serve(args) => commands::serve(args).await?,
    }

    Ok(())
}
