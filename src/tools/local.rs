//! Deterministic local tools.
//!
//! Only tools that are safe and reliable in-process live here: wait,
//! diagnostics (ping, time_now_ms) and the clipboard pair. Anything
//! heavy, model-backed or isolation-worthy (capture, vision parse,
//! mouse, keyboard, UIA) is remote by design and routed through the
//! [`RemoteToolMap`](super::registry::RemoteToolMap) instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{LocalTool, ToolAlias};
use crate::types::{now_ms, ToolResult};

/// Default sleep for `wait` when no `ms` argument is given.
const DEFAULT_WAIT_MS: i64 = 250;

// ── wait ──

/// Sleep for `args.ms` milliseconds (default 250, negatives clamp to 0).
#[derive(Debug, Default)]
pub struct WaitTool;

#[async_trait]
impl LocalTool for WaitTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::Wait
    }

    async fn invoke(&self, args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        let ms = args
            .get("ms")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(DEFAULT_WAIT_MS);
        let clamped = u64::try_from(ms).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(clamped)).await;
        Ok(ToolResult::success(serde_json::json!({ "slept_ms": ms })))
    }
}

// ── diagnostics ──

/// Echo the `echo` argument back with a timestamp.
#[derive(Debug, Default)]
pub struct PingTool;

#[async_trait]
impl LocalTool for PingTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::Ping
    }

    async fn invoke(&self, args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::success(serde_json::json!({
            "echo": args.get("echo").cloned().unwrap_or(serde_json::Value::Null),
            "ts_ms": now_ms(),
        })))
    }
}

/// Current timestamp in milliseconds. Useful for latency and ordering
/// diagnostics.
#[derive(Debug, Default)]
pub struct TimeNowMsTool;

#[async_trait]
impl LocalTool for TimeNowMsTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::TimeNowMs
    }

    async fn invoke(&self, _args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::success(serde_json::json!({ "ts_ms": now_ms() })))
    }
}

// ── clipboard ──

/// Shared in-process clipboard buffer.
///
/// The OS clipboard is a tool implementation outside the core; this
/// buffer keeps the `clipboard_get`/`clipboard_set` aliases exercisable
/// and deterministic. Both tools must be built over the same handle.
#[derive(Debug, Clone, Default)]
pub struct ClipboardHandle(Arc<Mutex<String>>);

impl ClipboardHandle {
    /// Read the current clipboard text.
    ///
    /// # Errors
    ///
    /// Fails if the buffer lock is poisoned.
    pub fn read(&self) -> anyhow::Result<String> {
        let guard = self.0.lock().map_err(|_| anyhow!("clipboard lock poisoned"))?;
        Ok(guard.clone())
    }

    /// Replace the clipboard text.
    ///
    /// # Errors
    ///
    /// Fails if the buffer lock is poisoned.
    pub fn write(&self, text: &str) -> anyhow::Result<()> {
        let mut guard = self.0.lock().map_err(|_| anyhow!("clipboard lock poisoned"))?;
        guard.clear();
        guard.push_str(text);
        Ok(())
    }
}

/// Read the shared clipboard buffer.
#[derive(Debug)]
pub struct ClipboardGetTool {
    buffer: ClipboardHandle,
}

impl ClipboardGetTool {
    /// Build over a shared buffer handle.
    pub fn new(buffer: ClipboardHandle) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl LocalTool for ClipboardGetTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::ClipboardGet
    }

    async fn invoke(&self, _args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        let text = self.buffer.read()?;
        Ok(ToolResult::success(serde_json::json!({ "text": text })))
    }
}

/// Write `args.text` into the shared clipboard buffer.
#[derive(Debug)]
pub struct ClipboardSetTool {
    buffer: ClipboardHandle,
}

impl ClipboardSetTool {
    /// Build over a shared buffer handle.
    pub fn new(buffer: ClipboardHandle) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl LocalTool for ClipboardSetTool {
    fn alias(&self) -> ToolAlias {
        ToolAlias::ClipboardSet
    }

    async fn invoke(&self, args: &serde_json::Value) -> anyhow::Result<ToolResult> {
        let text = args
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        self.buffer.write(text)?;
        Ok(ToolResult::success(serde_json::json!({ "len": text.len() })))
    }
}

/// The standard local tool set: wait, ping, time_now_ms and a clipboard
/// pair sharing one buffer.
pub fn default_local_tools() -> Vec<Arc<dyn LocalTool>> {
    let clipboard = ClipboardHandle::default();
    vec![
        Arc::new(WaitTool),
        Arc::new(PingTool),
        Arc::new(TimeNowMsTool),
        Arc::new(ClipboardGetTool::new(clipboard.clone())),
        Arc::new(ClipboardSetTool::new(clipboard)),
    ]
}
