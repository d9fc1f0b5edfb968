use anyhow::Result;
use cortex_core::{
    api::ApiServer, claims::ClaimRegistry, config::Config, entries::EntryService,
    metadata::MetadataStore, notebook::NotebookAdapter,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Cortex Core API server");

    let config = Config::load()?;
    std::fs::create_dir_all(&config.notebook.root)?;

    let notebook = NotebookAdapter::new(&config.notebook).await;
    let metadata = MetadataStore::open(&config.metadata.db_path).await?;
    let entries = Arc::new(EntryService::new(notebook, metadata.clone())?);
    let claims = Arc::new(ClaimRegistry::new());

    let api_server = ApiServer::new(&config, entries, claims.clone())?;
    let result = api_server.run().await;

    claims.shutdown().await;
    metadata.shutdown().await;
    info!("Cortex Core API server stopped");
    result?;
    Ok(())
}
