//! HTTP server hosting one service class

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use schema_rpc_wire::DEFAULT_PIPE_CAPACITY;
use schema_rpc_wire::codec::DEFAULT_MAX_BODY_SIZE;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::Result;
use crate::dispatch::Dispatcher;
use crate::handler::RpcHttpHandler;

/// Configuration for the HTTP RPC server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path prefix below which each method is served as `<base_path>/<method>`
    pub base_path: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum size of the JSON document of a request
    pub max_body_size: usize,
    /// Bytes buffered per attached request stream before the parser waits
    pub pipe_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            base_path: "/".to_string(),
            enable_cors: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

/// Builder for [`HttpRpcServer`]
pub struct HttpRpcServerBuilder {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl HttpRpcServerBuilder {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher,
        }
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the path prefix methods are served under
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.config.base_path = path.into();
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.config.pipe_capacity = capacity;
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> HttpRpcServer {
        let config = Arc::new(self.config);
        let handler = RpcHttpHandler::new(Arc::clone(&config), Arc::new(self.dispatcher));
        HttpRpcServer { config, handler }
    }
}

/// HTTP/1.1 server for a [`Dispatcher`]
#[derive(Clone)]
pub struct HttpRpcServer {
    config: Arc<ServerConfig>,
    handler: RpcHttpHandler,
}

impl HttpRpcServer {
    pub fn builder(dispatcher: Dispatcher) -> HttpRpcServerBuilder {
        HttpRpcServerBuilder::new(dispatcher)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until the process exits
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` completes; connections in flight keep running
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!("HTTP RPC server listening on {}", local_addr);
        let dispatcher = self.handler.dispatcher();
        info!(
            "Serving {} at {} ({} methods)",
            dispatcher.class(),
            self.config.base_path,
            dispatcher.methods().len()
        );

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("HTTP RPC server on {} shutting down", local_addr);
                    return Ok(());
                }
            };
            debug!("New connection from {}", peer_addr);

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle_request(req, Some(peer_addr)).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}
