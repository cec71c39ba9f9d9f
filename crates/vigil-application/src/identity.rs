//! Client identity resolution.
//!
//! The recorded client name comes from, in order: configuration, the
//! `VIGIL_CLIENT` environment variable, the name the transport reported in its
//! handshake, well-known editor environment markers, and finally `"unknown"`.

/// Environment variable naming the client explicitly.
pub const VIGIL_CLIENT_ENV: &str = "VIGIL_CLIENT";

/// Name recorded when nothing identifies the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Environment markers set by known hosts, checked in order.
const HOST_MARKERS: &[(&str, &str)] = &[
    ("CLAUDECODE", "claude-code"),
    ("CURSOR_TRACE_ID", "cursor"),
    ("WINDSURF_SESSION_ID", "windsurf"),
    ("ZED_TERM", "zed"),
    ("VSCODE_PID", "vscode"),
];

/// Resolves the client name for a session.
///
/// The environment is captured once at construction so resolution is
/// deterministic for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    configured: Option<String>,
    explicit: Option<String>,
    detected: Option<String>,
}

impl ClientIdentity {
    /// Captures `VIGIL_CLIENT` and host markers from the process environment.
    pub fn from_env(configured: Option<String>) -> Self {
        Self::from_lookup(configured, |name| std::env::var(name).ok())
    }

    /// Builds an identity from an arbitrary variable lookup.
    pub fn from_lookup<F>(configured: Option<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = lookup(VIGIL_CLIENT_ENV).and_then(non_empty);
        let detected = HOST_MARKERS
            .iter()
            .find(|(marker, _)| lookup(marker).is_some())
            .map(|(_, client)| client.to_string());
        Self {
            configured: configured.and_then(non_empty),
            explicit,
            detected,
        }
    }

    /// Always resolves to `name`.
    pub fn fixed(name: impl Into<String>) -> Self {
        Self {
            configured: non_empty(name.into()),
            ..Self::default()
        }
    }

    /// Picks the client name, given what the transport reported (if anything).
    pub fn resolve(&self, handshake: Option<&str>) -> String {
        let handshake = handshake
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != UNKNOWN_CLIENT);

        self.configured
            .as_deref()
            .or(self.explicit.as_deref())
            .or(handshake)
            .or(self.detected.as_deref())
            .unwrap_or(UNKNOWN_CLIENT)
            .to_string()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
