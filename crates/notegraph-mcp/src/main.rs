mod tools;

use std::sync::Arc;

use anyhow::Context;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};
use tracing::info;

use notegraph::utils::logging;
use notegraph::{NoteService, NotegraphConfig};

use crate::tools::NotegraphMcpServer;

#[tool_handler]
impl ServerHandler for NotegraphMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Notegraph MCP Server: capture notes, search them semantically and explore their relationship graph. Prefer small limits to keep responses token efficient.".into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// The service (and its blocking HTTP client) is created and dropped outside
/// the tokio runtime; tool calls reach it through `spawn_blocking`.
fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = NotegraphConfig::from_env().context("loading configuration")?;
    let service = Arc::new(NoteService::from_config(&cfg).context("opening note service")?);
    info!(
        notes = service.store().len(),
        embedder = %service.embedder().describe(),
        "notegraph MCP server starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(serve(Arc::clone(&service)));
    drop(runtime);
    drop(service);
    result
}

async fn serve(service: Arc<NoteService>) -> anyhow::Result<()> {
    let running = NotegraphMcpServer::new(service)
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("starting MCP server: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server task failed: {e}"))?;
    Ok(())
}
