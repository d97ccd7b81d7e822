//! Tool substrate: the closed alias vocabulary, the traits for local and
//! remote backends, the registry that routes aliases, and the per-run
//! executor that enforces policy and idempotency.
//!
//! Nodes refer to tools by alias only. Whether an alias is served by an
//! in-process function or by a remote MCP server is a registry concern,
//! swappable per deployment profile without touching node logic.

pub mod executor;
pub mod local;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ToolResult;

// ── Alias vocabulary ──

/// Stable tool names used by the core.
///
/// The vocabulary is closed: nodes, selectors and policies all speak in
/// these aliases, and the registry resolves each one to a backend. New
/// aliases are added here, never invented ad hoc, so they cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAlias {
    /// Capture the screen, returning a hash and optionally a b64 payload.
    ScreenCapture,
    /// Vision-model element parse of a screenshot.
    #[serde(rename = "omniparser_v2_parse")]
    OmniparserV2Parse,
    /// Pixel diff between two captures.
    ScreenshotDiff,
    /// Bring a window to the foreground.
    FocusWindow,
    /// Dump the UI Automation tree.
    UiaTree,
    /// Click a UIA element by selector.
    UiaClick,
    /// Set text on a UIA element.
    UiaSetText,
    /// Mouse click at coordinates.
    Click,
    /// Mouse double click.
    DoubleClick,
    /// Mouse right click.
    RightClick,
    /// Move the cursor.
    Move,
    /// Drag between two points.
    Drag,
    /// Scroll wheel.
    Scroll,
    /// Type a text string.
    TypeText,
    /// Press a key chord.
    Hotkey,
    /// Hold a key down.
    KeyDown,
    /// Release a held key.
    KeyUp,
    /// Sleep for a number of milliseconds.
    Wait,
    /// Diagnostics echo.
    Ping,
    /// Diagnostics timestamp.
    TimeNowMs,
    /// Read the clipboard.
    ClipboardGet,
    /// Write the clipboard.
    ClipboardSet,
}

impl ToolAlias {
    /// Every alias in the vocabulary, for iteration and exhaustive tests.
    pub const ALL: [Self; 22] = [
        Self::ScreenCapture,
        Self::OmniparserV2Parse,
        Self::ScreenshotDiff,
        Self::FocusWindow,
        Self::UiaTree,
        Self::UiaClick,
        Self::UiaSetText,
        Self::Click,
        Self::DoubleClick,
        Self::RightClick,
        Self::Move,
        Self::Drag,
        Self::Scroll,
        Self::TypeText,
        Self::Hotkey,
        Self::KeyDown,
        Self::KeyUp,
        Self::Wait,
        Self::Ping,
        Self::TimeNowMs,
        Self::ClipboardGet,
        Self::ClipboardSet,
    ];

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScreenCapture => "screen_capture",
            Self::OmniparserV2Parse => "omniparser_v2_parse",
            Self::ScreenshotDiff => "screenshot_diff",
            Self::FocusWindow => "focus_window",
            Self::UiaTree => "uia_tree",
            Self::UiaClick => "uia_click",
            Self::UiaSetText => "uia_set_text",
            Self::Click => "click",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::Move => "move",
            Self::Drag => "drag",
            Self::Scroll => "scroll",
            Self::TypeText => "type_text",
            Self::Hotkey => "hotkey",
            Self::KeyDown => "key_down",
            Self::KeyUp => "key_up",
            Self::Wait => "wait",
            Self::Ping => "ping",
            Self::TimeNowMs => "time_now_ms",
            Self::ClipboardGet => "clipboard_get",
            Self::ClipboardSet => "clipboard_set",
        }
    }
}

impl std::fmt::Display for ToolAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a tool alias from its string form.
#[derive(Debug, Error)]
#[error("unknown tool alias: {0}")]
pub struct UnknownAlias(String);

impl std::str::FromStr for ToolAlias {
    type Err = UnknownAlias;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alias| alias.as_str() == s)
            .ok_or_else(|| UnknownAlias(s.to_owned()))
    }
}

// ── Backend traits ──

/// An in-process tool backend.
///
/// Local tools are deterministic helpers; anything heavy, model-backed
/// or isolation-worthy belongs behind the remote client instead.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// The alias this tool serves.
    fn alias(&self) -> ToolAlias;

    /// Invoke the tool.
    ///
    /// # Errors
    ///
    /// Implementation failures are converted by the executor into an
    /// error-valued [`ToolResult`]; they never unwind into node logic.
    async fn invoke(&self, args: &serde_json::Value) -> anyhow::Result<ToolResult>;
}

/// Client for tools served remotely over MCP.
///
/// The transport is outside the core; this trait is the narrow seam the
/// executor delegates to, passing the fully-qualified tool name from the
/// remote map and the call's timeout.
#[async_trait]
pub trait RemoteToolClient: Send + Sync {
    /// Invoke a remote tool by fully-qualified name.
    ///
    /// # Errors
    ///
    /// Transport failures are converted by the executor into an
    /// error-valued [`ToolResult`].
    async fn call(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        timeout_ms: i64,
    ) -> anyhow::Result<ToolResult>;
}
