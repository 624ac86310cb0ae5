use async_trait::async_trait;
use log::info;

use super::Engine;
use crate::error::Result;
use crate::process::run_tool;

/// Drives the engine's unit through the service manager, e.g.
/// `systemctl restart ZBProxy`.
pub struct SystemdEngine {
    manager: String,
    action: String,
    unit: String,
}

impl SystemdEngine {
    pub fn new(
        manager: impl Into<String>,
        action: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            manager: manager.into(),
            action: action.into(),
            unit: unit.into(),
        }
    }
}

#[async_trait]
impl Engine for SystemdEngine {
    async fn reload(&self) -> Result<()> {
        run_tool(&self.manager, &[&self.action, &self.unit]).await?;
        info!("Ran {} on engine unit {}", self.action, self.unit);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[tokio::test]
    async fn reload_runs_manager_with_action_and_unit() {
        SystemdEngine::new("true", "restart", "ZBProxy")
            .reload()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reload_failure_is_surfaced() {
        match SystemdEngine::new("false", "reload", "ZBProxy").reload().await {
            Err(RegistryError::ExternalTool { tool, .. }) => {
                assert_eq!(tool, "false reload ZBProxy")
            }
            other => panic!("expected tool failure, got {:?}", other),
        }
    }
}
