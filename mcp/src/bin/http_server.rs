use anyhow::Result;
use project_builder_mcp::{http_server, runtime, Config};

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let config = Config::from_env()?;
    http_server::run_server(config).await
}
