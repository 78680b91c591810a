use std::sync::Arc;

use clap::Parser;

use recalld::blanking::HttpVariationGenerator;
use recalld::practice::{PracticeEngine, PracticeStore};
use recalld::server::{self, AppState};

#[derive(Parser)]
#[command(name = "recalld", about = "Adaptive flashcard practice-session engine", version)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, default_value = "recalld.db")]
    db: String,

    /// Address to bind the HTTP surface on
    #[arg(long, default_value = "127.0.0.1:7160")]
    bind: String,

    /// Base URL of the external blanking/variation service
    #[arg(long, default_value = "http://127.0.0.1:6000")]
    blanking_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let store = PracticeStore::open(&cli.db)?;
    let generator = Arc::new(HttpVariationGenerator::new(cli.blanking_url)?);
    let engine = Arc::new(PracticeEngine::new(store, generator));

    server::serve(&cli.bind, AppState { engine }).await?;
    Ok(())
}
