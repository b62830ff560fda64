//! Tool host wire endpoint
//!
//! Reads one JSON request from stdin, writes exactly one JSON response to
//! stdout. The workspace root comes from `WORKSPACE_ROOT`. Exit code 0 only
//! when a fully serialized response was written.

use lowcortisol::sandbox::resolve_workspace_root;
use lowcortisol::tools::{build_registry, host};
use serde_json::{json, Value};
use std::io::Read;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let workspace_root = std::env::var("WORKSPACE_ROOT").unwrap_or_default();
    let registry = match resolve_workspace_root(&workspace_root)
        .and_then(|root| build_registry(&root))
    {
        Ok(registry) => registry,
        Err(error) => {
            println!("{}", host::error_envelope(&error));
            return 1;
        }
    };

    let mut raw_input = String::new();
    if std::io::stdin().read_to_string(&mut raw_input).is_err() || raw_input.trim().is_empty() {
        println!(
            "{}",
            json!({
                "ok": false,
                "error": {"type": "ValueError", "message": "No JSON request provided on stdin"},
            })
        );
        return 1;
    }

    let request: Value = match serde_json::from_str(raw_input.trim()) {
        Ok(request) => request,
        Err(error) => {
            println!(
                "{}",
                json!({
                    "ok": false,
                    "error": {"type": "InvalidJSON", "message": error.to_string()},
                })
            );
            return 1;
        }
    };

    let response = host::handle_request(&registry, &request).await;
    let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
    println!("{response}");
    if ok {
        0
    } else {
        1
    }
}
