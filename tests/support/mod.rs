//! Shared helpers: run a real server on an ephemeral port and point a client at it

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use schema_rpc_client::{ClientConfig, RpcClient};
use schema_rpc_protocol::ServiceSchema;
use schema_rpc_server::{Dispatcher, HttpRpcServer};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::warn;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn compile(schema: Value) -> Arc<ServiceSchema> {
    Arc::new(ServiceSchema::from_value(schema).expect("test schema compiles"))
}

/// Serve `dispatcher` on 127.0.0.1 and return the bound address
pub async fn spawn_server(dispatcher: Dispatcher) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = HttpRpcServer::builder(dispatcher).build();
    tokio::spawn(async move {
        if let Err(err) = server.serve(listener).await {
            warn!("Test server stopped: {}", err);
        }
    });
    Ok(addr)
}

pub fn client(addr: SocketAddr, schema: Arc<ServiceSchema>, class: &str) -> Result<RpcClient> {
    client_with(addr, schema, class, ClientConfig::default())
}

pub fn client_with(
    addr: SocketAddr,
    schema: Arc<ServiceSchema>,
    class: &str,
    config: ClientConfig,
) -> Result<RpcClient> {
    Ok(RpcClient::builder(format!("http://{}", addr), schema, class)
        .config(config)
        .build()?)
}
