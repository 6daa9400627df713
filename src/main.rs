use std::{process, sync::Arc};

use clap::{ArgAction, Parser};
use mcp_rca::{
    build_server,
    config::Config,
    domain::store::CaseStore,
    llm::{HypothesisGenerator, LlmManager},
    logging,
    mcp::session::serve_stdio,
    AppState,
};
use tracing::{error, info};

/// MCP server for root cause analysis case management, served over stdio.
#[derive(Debug, Parser)]
#[command(name = "mcp-rca", version, about, disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

#[tokio::main]
async fn main() {
    logging::init_logging();

    if let Err(err) = Cli::try_parse() {
        if let Err(io_err) = err.print() {
            error!(error = %io_err, "failed to print usage");
        }
        process::exit(if err.use_stderr() { 1 } else { 0 });
    }

    match run().await {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!(error = %err, "server failed to start");
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let llm = LlmManager::from_config(&config.llm)?.map(Arc::new);
    let generator = Arc::new(HypothesisGenerator::new(llm));
    let store = Arc::new(CaseStore::json_file(&config.cases_path));

    info!(cases_path = %config.cases_path.display(), "case store ready");

    let state = AppState::new(store, generator);
    let end = serve_stdio(Arc::new(build_server(&state))).await?;
    info!(?end, "session ended");
    Ok(end.exit_code())
}
