//! Minimal stdio MCP server used by the integration tests and for manual
//! smoke-testing a configuration.
//!
//! Tools: `echo` (returns `message`), `sleep` (waits `ms` milliseconds),
//! `crash` (exits the process without answering).

use std::{
    io::{self, BufRead, Write},
    time::Duration,
};

use serde_json::{Value, json};

const PROTOCOL_VERSION: &str = "2025-03-26";

fn tools() -> Value {
    json!([
        {
            "name": "echo",
            "description": "Echo back the message",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }
        },
        {
            "name": "sleep",
            "description": "Sleep for the given number of milliseconds",
            "inputSchema": {
                "type": "object",
                "properties": {"ms": {"type": "integer"}}
            }
        },
        {
            "name": "crash",
            "description": "Exit immediately",
            "inputSchema": {"type": "object"}
        }
    ])
}

fn text(text: impl Into<String>, is_error: bool) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}], "isError": is_error})
}

fn call_tool(params: &Value) -> Value {
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
    match params.get("name").and_then(Value::as_str) {
        Some("echo") => text(
            args.get("message").and_then(Value::as_str).unwrap_or_default(),
            false,
        ),
        Some("sleep") => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(1000);
            std::thread::sleep(Duration::from_millis(ms));
            text(format!("slept {ms}ms"), false)
        },
        Some("crash") => std::process::exit(1),
        Some(other) => text(format!("unknown tool: {other}"), true),
        None => text("missing tool name", true),
    }
}

fn handle(msg: &Value) -> Option<Value> {
    let id = msg.get("id")?.clone();
    let method = msg.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = msg.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mcp-echo-server", "version": env!("CARGO_PKG_VERSION")}
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": tools()})),
        "tools/call" => Ok(call_tool(&params)),
        other => Err(json!({"code": -32601, "message": format!("Method not found: {other}")})),
    };

    Some(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    })
}

fn main() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!("mcp-echo-server: ignoring malformed line: {e}");
                continue;
            },
        };
        // Notifications carry no id and get no answer.
        if let Some(reply) = handle(&msg) {
            writeln!(stdout, "{reply}")?;
            stdout.flush()?;
        }
    }
    Ok(())
}
