//! The demo object exposed by `portal serve`.

use async_trait::async_trait;
use portal_wire::LocalObject;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;

/// Methods exposed as `echo`. `log` is published as void.
pub const METHODS: &[&str] = &["echo", "add", "fail", "log", "uptime"];

pub struct EchoService {
    started: Instant,
}

impl EchoService {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalObject for EchoService {
    fn methods(&self) -> Vec<String> {
        METHODS.iter().map(|m| m.to_string()).collect()
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, String> {
        match method {
            "echo" => {
                if args.len() == 1 {
                    Ok(args.into_iter().next().unwrap_or(Value::Null))
                } else {
                    Ok(Value::Array(args))
                }
            }
            "add" => add(&args),
            "fail" => Err(args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("requested failure")
                .to_string()),
            "log" => {
                info!(args = %serde_json::Value::Array(args), "portal: remote log");
                Ok(Value::Null)
            }
            "uptime" => Ok(json!(self.started.elapsed().as_secs())),
            other => Err(format!("{other} is not a function")),
        }
    }
}

/// Sum numeric arguments; integers stay integers.
fn add(args: &[Value]) -> Result<Value, String> {
    if let Some(bad) = args.iter().find(|v| !v.is_number()) {
        return Err(format!("add expects numbers, got {bad}"));
    }
    if args.iter().all(|v| v.is_i64()) {
        let sum = args
            .iter()
            .filter_map(Value::as_i64)
            .try_fold(0i64, |acc, n| acc.checked_add(n))
            .ok_or_else(|| "add overflowed".to_string())?;
        return Ok(json!(sum));
    }
    let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
    Ok(json!(sum))
}
