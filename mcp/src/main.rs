use anyhow::Result;
use project_builder_mcp::runtime::{self, Runtime};
use project_builder_mcp::{mcp, Config};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let config = Config::from_env()?;
    info!("project builder MCP server starting");

    let runtime = Runtime::start(&config);
    let service = runtime.service().clone();

    info!("listening for MCP requests on stdin");
    let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("EOF received, shutting down");
                break;
            }
            Ok(_) => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                debug!(request = raw, "received");
                let Some(response) = mcp::handle_raw(raw, &service) else {
                    continue;
                };
                let mut encoded = serde_json::to_string(&response)?;
                debug!(response = %encoded, "sending");
                encoded.push('\n');
                stdout.write_all(encoded.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(e) => {
                error!(error = %e, "error reading stdin");
                break;
            }
        }
    }

    runtime.stop().await;
    Ok(())
}
