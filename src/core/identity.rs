//! Robot identity resolution.
//!
//! The identity is only known once the platform has booted on real hardware.
//! Until then, and whenever the platform cannot be queried, resolvers answer
//! `None` and the service retries later.

use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};

use async_trait::async_trait;
use tracing::debug;

use crate::config::IdentityConfig;

/// Marker file content written by simulators.
const SIMULATED: &str = "simulated";

/// Produces the stable identifier attached to every metric event.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Option<String>;
}

/// Low-level platform queries used by [`PlatformIdentity`].
#[async_trait]
pub trait PlatformProbe: Send + Sync {
    /// True once the platform runs on real, fully booted hardware.
    async fn is_real_hardware(&self) -> io::Result<bool>;

    async fn hostname(&self) -> io::Result<String>;
}

/// Resolves the host name, but only on real hardware.
pub struct PlatformIdentity<P> {
    probe: P,
}

impl<P: PlatformProbe> PlatformIdentity<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl<P: PlatformProbe> IdentityResolver for PlatformIdentity<P> {
    async fn resolve(&self) -> Option<String> {
        match self.probe.is_real_hardware().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Platform not running on real hardware yet");
                return None;
            }
            Err(e) => {
                debug!("Platform probe failed: {}", e);
                return None;
            }
        }

        match self.probe.hostname().await {
            Ok(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
            Ok(_) => {
                debug!("Host name is empty");
                None
            }
            Err(e) => {
                debug!("Failed to read host name: {}", e);
                None
            }
        }
    }
}

/// Probe reading a boot marker file and a host name file.
#[derive(Debug, Clone)]
pub struct FileProbe {
    hostname_path: PathBuf,
    marker_path: PathBuf,
}

impl FileProbe {
    pub fn new(hostname_path: impl Into<PathBuf>, marker_path: impl Into<PathBuf>) -> Self {
        Self {
            hostname_path: hostname_path.into(),
            marker_path: marker_path.into(),
        }
    }
}

impl From<&IdentityConfig> for FileProbe {
    fn from(config: &IdentityConfig) -> Self {
        Self::new(&config.hostname_path, &config.robot_marker_path)
    }
}

#[async_trait]
impl PlatformProbe for FileProbe {
    async fn is_real_hardware(&self) -> io::Result<bool> {
        match tokio::fs::read_to_string(&self.marker_path).await {
            Ok(content) => Ok(content.trim() != SIMULATED),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn hostname(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.hostname_path).await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn probe_in(dir: &TempDir) -> FileProbe {
        FileProbe::new(dir.path().join("hostname"), dir.path().join("robot"))
    }

    #[tokio::test]
    async fn resolves_hostname_on_real_hardware() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hostname"), "pepper-042\n").unwrap();
        fs::write(dir.path().join("robot"), "").unwrap();

        let identity = PlatformIdentity::new(probe_in(&dir));
        assert_eq!(identity.resolve().await.as_deref(), Some("pepper-042"));
    }

    #[tokio::test]
    async fn missing_marker_means_not_booted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hostname"), "pepper-042").unwrap();

        let identity = PlatformIdentity::new(probe_in(&dir));
        assert_eq!(identity.resolve().await, None);
    }

    #[tokio::test]
    async fn simulated_platform_has_no_identity() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hostname"), "pepper-042").unwrap();
        fs::write(dir.path().join("robot"), "simulated\n").unwrap();

        let identity = PlatformIdentity::new(probe_in(&dir));
        assert_eq!(identity.resolve().await, None);
    }

    #[tokio::test]
    async fn unreadable_or_blank_hostname_is_unresolved() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("robot"), "").unwrap();

        let identity = PlatformIdentity::new(probe_in(&dir));
        assert_eq!(identity.resolve().await, None);

        fs::write(dir.path().join("hostname"), "  \n").unwrap();
        assert_eq!(identity.resolve().await, None);
    }

    #[tokio::test]
    async fn probe_errors_are_not_escalated() {
        let dir = TempDir::new().unwrap();
        // A directory where the marker file should be makes the read fail
        fs::create_dir(dir.path().join("robot")).unwrap();
        fs::write(dir.path().join("hostname"), "pepper-042").unwrap();

        let identity = PlatformIdentity::new(probe_in(&dir));
        assert_eq!(identity.resolve().await, None);
    }
}
