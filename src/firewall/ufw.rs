use async_trait::async_trait;

use super::Firewall;
use crate::error::Result;
use crate::process::run_tool;

/// Uncomplicated Firewall.  `ufw allow` is already idempotent: a repeated
/// rule is reported as "Skipping adding existing rule" with exit status 0.
pub struct Ufw {
    program: String,
}

impl Ufw {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn rule(port: u16) -> String {
        format!("{}/tcp", port)
    }
}

#[async_trait]
impl Firewall for Ufw {
    async fn allow(&self, port: u16) -> Result<()> {
        run_tool(&self.program, &["allow", &Self::rule(port)]).await?;
        Ok(())
    }

    async fn revoke(&self, port: u16) -> Result<()> {
        run_tool(&self.program, &["delete", "allow", &Self::rule(port)]).await?;
        Ok(())
    }
}
