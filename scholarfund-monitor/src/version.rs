//! Build details for `scholarfund-monitor version`

use serde::Serialize;
use std::fmt;

use scholarfund_realtime::transport::phoenix::PROTOCOL_VSN;

#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_revision: Option<&'static str>,
    pub target: &'static str,
    pub profile: &'static str,
    /// Phoenix protocol version sent as `vsn` on the socket URL
    pub protocol_vsn: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_revision: option_env!("MONITOR_GIT_REVISION"),
            target: env!("MONITOR_TARGET"),
            profile: if cfg!(debug_assertions) { "debug" } else { "release" },
            protocol_vsn: PROTOCOL_VSN,
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scholarfund-monitor {}", self.version)?;
        if let Some(revision) = self.git_revision {
            write!(f, " ({})", revision)?;
        }
        writeln!(f)?;
        writeln!(f, "{} {} build, realtime protocol vsn {}", self.target, self.profile, self.protocol_vsn)
    }
}

/// One-line banner for startup logs
pub fn version_short() -> String {
    format!("scholarfund-monitor {}", env!("CARGO_PKG_VERSION"))
}
