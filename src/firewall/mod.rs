//! Reconciling listen ports with the host firewall.
//!
//! The firewall itself is a collaborator behind the [`Firewall`] trait.
//! [`FirewallSync`] decides what a failure from it means: in `strict` mode
//! it fails the operation, in `best-effort` mode it is logged and the
//! registry mutation goes ahead.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::Registry;

pub mod ufw;
pub use ufw::Ufw;

#[async_trait]
pub trait Firewall: Send + Sync {
    /// Allow inbound TCP on `port`.  Must tolerate an already-open port.
    async fn allow(&self, port: u16) -> Result<()>;

    /// Withdraw a rule previously added by [`Firewall::allow`].
    async fn revoke(&self, port: u16) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirewallMode {
    Strict,
    #[default]
    BestEffort,
}

impl fmt::Display for FirewallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallMode::Strict => write!(f, "strict"),
            FirewallMode::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Outcome of requesting one port during a full resync.
#[derive(Debug)]
pub struct PortOutcome {
    pub port: u16,
    pub result: Result<()>,
}

pub struct FirewallSync<F> {
    firewall: F,
    mode: FirewallMode,
}

impl<F: Firewall> FirewallSync<F> {
    pub fn new(firewall: F, mode: FirewallMode) -> Self {
        Self { firewall, mode }
    }

    #[cfg(test)]
    pub fn firewall(&self) -> &F {
        &self.firewall
    }

    pub async fn open(&self, port: u16) -> Result<()> {
        let result = self.firewall.allow(port).await;
        self.settle("allow", port, result)
    }

    pub async fn close(&self, port: u16) -> Result<()> {
        let result = self.firewall.revoke(port).await;
        self.settle("revoke", port, result)
    }

    /// Requests every listen port of `registry` again.  Failures are
    /// reported per port and never stop the sweep.
    pub async fn resync(&self, registry: &Registry) -> Vec<PortOutcome> {
        let ports: BTreeSet<u16> = registry.listen_ports();
        let mut outcomes = Vec::with_capacity(ports.len());
        for port in ports {
            let result = self.firewall.allow(port).await;
            match &result {
                Ok(()) => info!("Firewall allows port {}", port),
                Err(e) => warn!("Firewall resync failed for port {}: {}", port, e),
            }
            outcomes.push(PortOutcome { port, result });
        }
        outcomes
    }

    fn settle(&self, action: &str, port: u16, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                info!("Firewall {} port {}", action, port);
                Ok(())
            }
            Err(e) => match self.mode {
                FirewallMode::Strict => Err(e),
                FirewallMode::BestEffort => {
                    warn!("Firewall {} for port {} failed, continuing: {}", action, port, e);
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::error::RegistryError;

    /// Records requested ports; optionally fails every call.  With
    /// `tamper` set, every call also appends a newline to that file, the
    /// way a concurrent writer would change the document mid-operation.
    #[derive(Default)]
    pub struct RecordingFirewall {
        pub allowed: Mutex<Vec<u16>>,
        pub revoked: Mutex<Vec<u16>>,
        pub fail: bool,
        pub tamper: Option<PathBuf>,
    }

    impl RecordingFirewall {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn tampering(path: impl Into<PathBuf>) -> Self {
            Self {
                tamper: Some(path.into()),
                ..Default::default()
            }
        }

        pub fn allowed(&self) -> Vec<u16> {
            self.allowed.lock().unwrap().clone()
        }

        pub fn revoked(&self) -> Vec<u16> {
            self.revoked.lock().unwrap().clone()
        }

        pub fn open_ports(&self) -> BTreeSet<u16> {
            let revoked = self.revoked();
            self.allowed()
                .into_iter()
                .filter(|p| !revoked.contains(p))
                .collect()
        }

        fn check(&self) -> Result<()> {
            if let Some(path) = &self.tamper {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .unwrap();
                file.write_all(b"\n").unwrap();
            }
            if self.fail {
                return Err(RegistryError::ExternalTool {
                    tool: "fake-firewall".into(),
                    detail: "exit status: 1".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Firewall for RecordingFirewall {
        async fn allow(&self, port: u16) -> Result<()> {
            self.check()?;
            self.allowed.lock().unwrap().push(port);
            Ok(())
        }

        async fn revoke(&self, port: u16) -> Result<()> {
            self.check()?;
            self.revoked.lock().unwrap().push(port);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingFirewall;
    use super::*;
    use crate::error::RegistryError;
    use crate::service::ServiceDescriptor;

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let sync = FirewallSync::new(RecordingFirewall::failing(), FirewallMode::BestEffort);
        assert!(sync.open(25565).await.is_ok());
        assert!(sync.close(25565).await.is_ok());
    }

    #[tokio::test]
    async fn strict_surfaces_failures() {
        let sync = FirewallSync::new(RecordingFirewall::failing(), FirewallMode::Strict);
        assert!(matches!(
            sync.open(25565).await,
            Err(RegistryError::ExternalTool { .. })
        ));
    }

    #[tokio::test]
    async fn resync_requests_every_listen_port() {
        let mut reg = Registry::new();
        reg.add_service(ServiceDescriptor::new("a", "h", 25565, 25567)).unwrap();
        reg.add_service(ServiceDescriptor::new("b", "h", 25565, 25566)).unwrap();

        let sync = FirewallSync::new(RecordingFirewall::default(), FirewallMode::Strict);
        let outcomes = sync.resync(&reg).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(sync.firewall().allowed(), vec![25566, 25567]);
    }

    #[tokio::test]
    async fn resync_reports_failures_per_port() {
        let mut reg = Registry::new();
        reg.add_service(ServiceDescriptor::new("a", "h", 25565, 25566)).unwrap();
        let sync = FirewallSync::new(RecordingFirewall::failing(), FirewallMode::BestEffort);
        let outcomes = sync.resync(&reg).await;
        assert_eq!(outcomes[0].port, 25566);
        assert!(outcomes[0].result.is_err());
    }

    #[test]
    fn mode_parses_kebab_case() {
        let mode: FirewallMode = serde_json::from_str("\"best-effort\"").unwrap();
        assert_eq!(mode, FirewallMode::BestEffort);
        assert_eq!(FirewallMode::Strict.to_string(), "strict");
    }
}
