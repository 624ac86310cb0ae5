use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::firewall::FirewallMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The proxy engine's document, owned by this tool.
    pub document_path: PathBuf,
    pub firewall_program: String,
    pub firewall_mode: FirewallMode,
    pub service_manager: String,
    pub engine_unit: String,
    pub engine_action: String,
    pub reload_after_change: bool,
    pub require_root: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("ZBProxy.json"),
            firewall_program: "ufw".into(),
            firewall_mode: FirewallMode::BestEffort,
            service_manager: "systemctl".into(),
            engine_unit: "ZBProxy".into(),
            engine_action: "restart".into(),
            reload_after_change: false,
            require_root: true,
        }
    }
}

impl Config {
    pub fn load(extra: Option<&Path>) -> anyhow::Result<Self> {
        Self::figment(extra)
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Toml::file("oproxy.toml"))
            .merge(Json::file("oproxy.json"))
            .merge(Env::prefixed("OPROXY_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|_jail| {
            let cfg = Config::load(None).unwrap();
            assert_eq!(cfg.document_path, PathBuf::from("ZBProxy.json"));
            assert_eq!(cfg.firewall_mode, FirewallMode::BestEffort);
            assert!(cfg.require_root);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "oproxy.toml",
                r#"
                firewall_mode = "strict"
                engine_unit = "zbproxy-edge"
                "#,
            )?;
            jail.set_env("OPROXY_ENGINE_UNIT", "zbproxy-relay");
            jail.set_env("OPROXY_REQUIRE_ROOT", "false");

            let cfg = Config::load(None).unwrap();
            assert_eq!(cfg.firewall_mode, FirewallMode::Strict);
            assert_eq!(cfg.engine_unit, "zbproxy-relay");
            assert!(!cfg.require_root);
            Ok(())
        });
    }

    #[test]
    fn explicit_file_is_merged_under_local_files() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", r#"document_path = "/etc/zbproxy/ZBProxy.json""#)?;
            let cfg = Config::load(Some(Path::new("custom.toml"))).unwrap();
            assert_eq!(cfg.document_path, PathBuf::from("/etc/zbproxy/ZBProxy.json"));
            Ok(())
        });
    }
}
