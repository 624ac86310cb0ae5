//! Running the external tools the node depends on.

use log::debug;
use tokio::process::Command;

use crate::error::{RegistryError, Result};

/// Runs `program args..` to completion.  A non-zero exit or a spawn
/// failure becomes `ExternalTool`; stdout is returned on success.
pub async fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    let rendered = format!("{} {}", program, args.join(" "));
    debug!("Running {}", rendered);

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| RegistryError::ExternalTool {
            tool: rendered.clone(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RegistryError::ExternalTool {
            tool: rendered,
            detail: format!("{}: {}", output.status, stderr.trim()),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_returns_stdout() {
        let out = run_tool("echo", &["allow", "25565/tcp"]).await.unwrap();
        assert_eq!(out.trim(), "allow 25565/tcp");
    }

    #[tokio::test]
    async fn non_zero_exit_is_external_tool_failure() {
        match run_tool("false", &[]).await {
            Err(RegistryError::ExternalTool { tool, .. }) => assert_eq!(tool.trim(), "false"),
            other => panic!("expected tool failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_program_is_external_tool_failure() {
        assert!(matches!(
            run_tool("oproxy-no-such-binary", &["x"]).await,
            Err(RegistryError::ExternalTool { .. })
        ));
    }
}
