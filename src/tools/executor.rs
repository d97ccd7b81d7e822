//! Per-run tool executor: policy gate, idempotency cache, dispatch.
//!
//! One executor exists per run, held in the state's executor slot and
//! removed at finalize. Its cache scope therefore equals the run scope:
//! any idempotency key observed more than once returns the result cached
//! on first observation, failures included, so retry loops can never
//! amplify a harmful side effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::registry::{ToolBackend, ToolRegistry};
use super::{RemoteToolClient, ToolAlias};
use crate::state::telemetry::Telemetry;
use crate::state::{PolicyContext, PolicyDecision};
use crate::types::{ErrorCode, ToolCall, ToolResult};

/// Dispatches tool calls for a single run.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    remote: Option<Arc<dyn RemoteToolClient>>,
    cache: Mutex<HashMap<String, ToolResult>>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .cache
            .lock()
            .map(|c| c.len())
            .unwrap_or(0);
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("remote_configured", &self.remote.is_some())
            .field("cached_results", &cached)
            .finish()
    }
}

impl ToolExecutor {
    /// Build an executor over a registry and an optional remote client.
    pub fn new(registry: Arc<ToolRegistry>, remote: Option<Arc<dyn RemoteToolClient>>) -> Self {
        Self {
            registry,
            remote,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this executor routes through.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether any backend resolves the alias.
    pub fn has(&self, alias: ToolAlias) -> bool {
        self.registry.has(alias)
    }

    /// Execute a tool call.
    ///
    /// In order: policy gate (denials return without dispatching),
    /// idempotency lookup (cached results replay unchanged), dispatch on
    /// the resolved backend, cache insert (failures too), telemetry.
    /// The policy decision is recorded on the run's [`PolicyContext`].
    pub async fn call(
        &self,
        policy: &mut PolicyContext,
        telemetry: &mut Telemetry,
        call: &ToolCall,
    ) -> ToolResult {
        // Policy gate.
        if let Err(denied) = check_policy(policy, call.name) {
            warn!(tool = %call.name, error = %denied, "tool call denied by policy");
            telemetry.event(
                "tool_denied",
                serde_json::json!({ "tool": call.name, "reason": denied }),
            );
            return ToolResult::failure(denied);
        }

        // Idempotency lookup.
        if let Some(hit) = self.cache_lookup(&call.idempotency_key) {
            debug!(tool = %call.name, key = %call.idempotency_key, "idempotency cache hit");
            telemetry.event(
                "tool_idempotent_hit",
                serde_json::json!({ "tool": call.name }),
            );
            return hit;
        }

        // Dispatch.
        let result = self.dispatch(call).await;

        // Cache, failures included. First writer wins, so a racing
        // caller observes the stored result rather than its own.
        let stored = self.cache_insert(call.idempotency_key.clone(), result);

        telemetry.event(
            "tool_called",
            serde_json::json!({ "tool": call.name, "ok": stored.ok }),
        );
        stored
    }

    /// Resolve the backend and invoke it, converting every failure into
    /// an error-valued result.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.registry.resolve(call.name) {
            Some(ToolBackend::Local(tool)) => match tool.invoke(&call.args).await {
                Ok(result) => result,
                Err(e) => dispatch_failure(call.name, &e),
            },
            Some(ToolBackend::Remote(fq_name)) => match &self.remote {
                Some(client) => {
                    match client.call(&fq_name, &call.args, call.timeout_ms).await {
                        Ok(result) => result,
                        Err(e) => dispatch_failure(call.name, &e),
                    }
                }
                None => ToolResult::failure(ErrorCode::McpNotConfigured.as_str()),
            },
            None => ToolResult::failure(format!("{}: {}", ErrorCode::ToolNotFound, call.name)),
        }
    }

    fn cache_lookup(&self, key: &str) -> Option<ToolResult> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).cloned()
    }

    fn cache_insert(&self, key: String, result: ToolResult) -> ToolResult {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key).or_insert(result).clone()
    }
}

/// Allowlist then denylist; the decision lands on the policy context.
fn check_policy(policy: &mut PolicyContext, alias: ToolAlias) -> Result<(), String> {
    if !policy.tool_allowlist.is_empty()
        && !policy.tool_allowlist.iter().any(|t| t == alias.as_str())
    {
        policy.last_decision = Some(PolicyDecision::Deny);
        policy.deny_reason = Some("tool not in allowlist".to_owned());
        return Err(format!("{}: allowlist", ErrorCode::PolicyDeny));
    }
    if policy.tool_denylist.iter().any(|t| t == alias.as_str()) {
        policy.last_decision = Some(PolicyDecision::Deny);
        policy.deny_reason = Some("tool in denylist".to_owned());
        return Err(format!("{}: denylist", ErrorCode::PolicyDeny));
    }
    policy.last_decision = Some(PolicyDecision::Allow);
    policy.deny_reason = None;
    Ok(())
}

fn dispatch_failure(alias: ToolAlias, error: &anyhow::Error) -> ToolResult {
    warn!(tool = %alias, error = %error, "tool dispatch failed");
    ToolResult::failure(format!("TOOL_ERROR: {error:#}"))
}
