//! # Calculator Server Example
//!
//! Serves a small calculator class over schema RPC. Every method is a
//! `POST /<method>` with a `{"args": {...}}` body:
//!
//! ```text
//! curl -X POST http://127.0.0.1:8000/divide \
//!   -H "Content-Type: application/json" \
//!   -d '{"args": {"a": 1, "b": 0}}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use schema_rpc_protocol::{CallArgs, RpcValue, ServiceSchema};
use schema_rpc_server::{Dispatcher, HandlerError, HttpRpcServer, RequestMeta};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::info;

fn calculator_schema() -> Value {
    json!({
        "definitions": {
            "DivisionByZero": {
                "properties": {
                    "name": {"type": "string"},
                    "message": {"type": "string"},
                    "stack": {"type": "string"}
                },
                "required": ["name", "message"]
            },
            "ServerOnlyContext": {
                "properties": {"ip": {"type": "string"}},
                "required": ["ip"]
            },
            "Calculator": {"properties": {
                "add": {"properties": {
                    "params": {
                        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                        "propertyOrder": ["a", "b"],
                        "required": ["a", "b"]
                    },
                    "returns": {"type": "number"}
                }},
                "divide": {"properties": {
                    "params": {
                        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                        "propertyOrder": ["a", "b"],
                        "required": ["a", "b"]
                    },
                    "returns": {"type": "number"},
                    "throws": {"$ref": "#/definitions/DivisionByZero"}
                }},
                "sum": {"properties": {
                    "params": {
                        "properties": {"values": {"type": "array", "items": {"type": "number"}}},
                        "propertyOrder": ["values"],
                        "required": ["values"]
                    },
                    "returns": {"type": "number"}
                }},
                "now": {"properties": {
                    "params": {"properties": {}, "propertyOrder": []},
                    "returns": {"type": "string", "format": "date-time"}
                }}
            }}
        }
    })
}

fn operands(args: &CallArgs) -> (f64, f64) {
    let a = args.get("a").and_then(RpcValue::as_f64).unwrap_or_default();
    let b = args.get("b").and_then(RpcValue::as_f64).unwrap_or_default();
    (a, b)
}

fn calculator(schema: Arc<ServiceSchema>) -> Result<Dispatcher> {
    let dispatcher = Dispatcher::builder(schema, "Calculator")
        .method("add", |_: Option<RpcValue>, args: CallArgs| async move {
            let (a, b) = operands(&args);
            Ok::<_, HandlerError>(RpcValue::from(a + b))
        })
        .method("divide", |context: Option<RpcValue>, args: CallArgs| async move {
            let (a, b) = operands(&args);
            if b == 0.0 {
                let caller = context
                    .as_ref()
                    .and_then(|ctx| ctx.get("ip"))
                    .and_then(RpcValue::as_str)
                    .unwrap_or("unknown");
                info!("Division by zero requested by {}", caller);
                return Err(HandlerError::raise("DivisionByZero", format!("cannot divide {} by zero", a)));
            }
            Ok(RpcValue::from(a / b))
        })
        .method("sum", |_: Option<RpcValue>, args: CallArgs| async move {
            let total: f64 = args
                .get("values")
                .and_then(RpcValue::as_array)
                .unwrap_or_default()
                .iter()
                .filter_map(RpcValue::as_f64)
                .sum();
            Ok::<_, HandlerError>(RpcValue::from(total))
        })
        .method("now", |_: Option<RpcValue>, _: CallArgs| async {
            Ok::<_, HandlerError>(RpcValue::from(Utc::now()))
        })
        .context_extractor(|request: &RequestMeta| -> Result<Value, HandlerError> {
            let ip = request.client_ip().unwrap_or_else(|| "unknown".to_string());
            Ok(json!({ "ip": ip }))
        })
        .build()?;
    Ok(dispatcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind_address: SocketAddr = std::env::var("CALCULATOR_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
        .parse()?;

    let schema = Arc::new(ServiceSchema::from_value(calculator_schema())?);
    let server = HttpRpcServer::builder(calculator(schema)?)
        .bind_address(bind_address)
        .build();

    let listener = TcpListener::bind(bind_address).await?;
    info!("Calculator listening on http://{}", listener.local_addr()?);

    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
