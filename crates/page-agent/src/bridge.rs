//! The script installed into the tab and the call convention around it.
//!
//! Every call is wrapped in an async IIFE that resolves to exactly one of
//! `{missing: true}`, `{value: ...}` or `{error: "..."}` so that a replaced
//! document or a throwing DOM API never surfaces as a CDP exception.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::AgentError;

pub const BRIDGE_SOURCE: &str = include_str!("../assets/bridge.js");
pub const BRIDGE_VERSION: &str = "1";

/// Expression reporting whether the current document carries the bridge.
pub fn probe_expression() -> String {
    format!("(() => !!(window.__autopost && window.__autopost.version === \"{BRIDGE_VERSION}\"))()")
}

/// Expression invoking `method` on the bridge with JSON-encoded `args`.
pub fn call_expression(method: &str, args: &[Value]) -> String {
    let args = Value::Array(args.to_vec());
    format!(
        "(async () => {{ \
           const api = window.__autopost; \
           if (!api || api.version !== \"{BRIDGE_VERSION}\") {{ return {{ missing: true }}; }} \
           try {{ return {{ value: await api.{method}(...{args}) }}; }} \
           catch (e) {{ return {{ error: String((e && e.message) || e) }}; }} \
         }})()"
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reply {
    missing: bool,
    value: Value,
    error: Option<String>,
}

pub fn unwrap_reply(raw: Value) -> Result<Value, AgentError> {
    if raw.is_null() {
        return Err(AgentError::Protocol("bridge call returned nothing".into()));
    }
    let reply: Reply = serde_json::from_value(raw)?;
    if reply.missing {
        return Err(AgentError::BridgeMissing);
    }
    if let Some(error) = reply.error {
        return Err(AgentError::Page(error));
    }
    Ok(reply.value)
}
