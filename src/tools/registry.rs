//! Alias routing: which backend serves each tool alias.
//!
//! Two sub-maps are maintained. Local tools are in-process
//! implementations registered by handle; remote tools are
//! fully-qualified names resolved through a [`RemoteToolMap`] profile.
//! Resolution yields a tagged [`ToolBackend`] with local precedence, and
//! the remote map is swappable so dev and prod can route the same
//! aliases to different server fleets.

use std::collections::HashMap;
use std::sync::Arc;

use super::{LocalTool, ToolAlias};

// ── Remote map ──

/// Maps tool aliases to fully-qualified remote tool names,
/// e.g. `screen_capture` → `vision_server.screen_capture`.
///
/// Maintain one profile per deployment and swap the whole object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteToolMap {
    alias_to_fq: HashMap<ToolAlias, String>,
}

impl RemoteToolMap {
    /// Empty map: nothing routes remotely.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard domain split: vision, mouse, keyboard and UIA
    /// aliases each route to their own server.
    pub fn default_profile() -> Self {
        let mut map = Self::default();
        for (alias, fq) in [
            (ToolAlias::ScreenCapture, "vision_server.screen_capture"),
            (ToolAlias::OmniparserV2Parse, "vision_server.omniparser_v2_parse"),
            (ToolAlias::ScreenshotDiff, "vision_server.screenshot_diff"),
            (ToolAlias::Click, "mouse_server.click"),
            (ToolAlias::DoubleClick, "mouse_server.double_click"),
            (ToolAlias::RightClick, "mouse_server.right_click"),
            (ToolAlias::Move, "mouse_server.move"),
            (ToolAlias::Drag, "mouse_server.drag"),
            (ToolAlias::Scroll, "mouse_server.scroll"),
            (ToolAlias::TypeText, "keyboard_server.type_text"),
            (ToolAlias::Hotkey, "keyboard_server.hotkey"),
            (ToolAlias::KeyDown, "keyboard_server.key_down"),
            (ToolAlias::KeyUp, "keyboard_server.key_up"),
            (ToolAlias::FocusWindow, "uia_server.focus_window"),
            (ToolAlias::UiaTree, "uia_server.uia_tree"),
            (ToolAlias::UiaClick, "uia_server.uia_click"),
            (ToolAlias::UiaSetText, "uia_server.uia_set_text"),
        ] {
            map.insert(alias, fq);
        }
        map
    }

    /// Route an alias to a fully-qualified remote name.
    pub fn insert(&mut self, alias: ToolAlias, fq_name: impl Into<String>) {
        self.alias_to_fq.insert(alias, fq_name.into());
    }

    /// Resolve an alias, if it routes remotely.
    pub fn resolve(&self, alias: ToolAlias) -> Option<&str> {
        self.alias_to_fq.get(&alias).map(String::as_str)
    }
}

// ── Registry ──

/// The backend an alias resolves to.
#[derive(Clone)]
pub enum ToolBackend {
    /// In-process implementation.
    Local(Arc<dyn LocalTool>),
    /// Fully-qualified remote tool name for the remote client.
    Remote(String),
}

impl std::fmt::Debug for ToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(tool) => f.debug_tuple("Local").field(&tool.alias()).finish(),
            Self::Remote(fq) => f.debug_tuple("Remote").field(fq).finish(),
        }
    }
}

/// Routes aliases to backends.
///
/// Registering a local tool over an alias that also routes remotely
/// shadows the remote mapping, which is how tests and dev profiles pin
/// individual tools in-process.
pub struct ToolRegistry {
    local: HashMap<ToolAlias, Arc<dyn LocalTool>>,
    remote: RemoteToolMap,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut local: Vec<&str> = self.local.keys().map(|a| a.as_str()).collect();
        local.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("local", &local)
            .field("remote", &self.remote)
            .finish()
    }
}

impl ToolRegistry {
    /// Registry with no local tools and the given remote profile.
    pub fn new(remote: RemoteToolMap) -> Self {
        Self {
            local: HashMap::new(),
            remote,
        }
    }

    /// Standard registry: the deterministic local tools plus the
    /// default remote domain split.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(RemoteToolMap::default_profile());
        for tool in super::local::default_local_tools() {
            registry.register_local(tool);
        }
        registry
    }

    /// Register (or shadow) a local tool under its own alias.
    pub fn register_local(&mut self, tool: Arc<dyn LocalTool>) {
        self.local.insert(tool.alias(), tool);
    }

    /// Replace the remote profile.
    pub fn set_remote_map(&mut self, remote: RemoteToolMap) {
        self.remote = remote;
    }

    /// Whether the alias has a local implementation.
    pub fn has_local(&self, alias: ToolAlias) -> bool {
        self.local.contains_key(&alias)
    }

    /// Whether the alias routes to a remote tool.
    pub fn has_remote(&self, alias: ToolAlias) -> bool {
        self.remote.resolve(alias).is_some()
    }

    /// Whether either backend resolves the alias.
    pub fn has(&self, alias: ToolAlias) -> bool {
        self.has_local(alias) || self.has_remote(alias)
    }

    /// Resolve an alias to its backend, local taking precedence.
    pub fn resolve(&self, alias: ToolAlias) -> Option<ToolBackend> {
        if let Some(tool) = self.local.get(&alias) {
            return Some(ToolBackend::Local(Arc::clone(tool)));
        }
        self.remote
            .resolve(alias)
            .map(|fq| ToolBackend::Remote(fq.to_owned()))
    }
}
