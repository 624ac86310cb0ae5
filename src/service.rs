//! Service descriptors as they appear in the proxy engine's document.
//!
//! Field names follow the engine's PascalCase keys.  Anything the engine
//! understands but this crate does not model is kept in the `extra` maps
//! and written back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::access::{AccessDimension, AccessRule};

pub const DEFAULT_FLOW: &str = "auto";

fn default_flow() -> String {
    DEFAULT_FLOW.to_string()
}

/// One proxied route: where it listens, where it forwards, who gets in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "TargetAddress")]
    pub target_address: String,
    #[serde(rename = "TargetPort")]
    pub target_port: u16,
    #[serde(rename = "Listen")]
    pub listen: u16,
    #[serde(rename = "Flow", default = "default_flow")]
    pub flow: String,
    #[serde(rename = "IPAccess", default)]
    pub ip_access: AccessRule,
    #[serde(rename = "Minecraft", default, skip_serializing_if = "Option::is_none")]
    pub minecraft: Option<MinecraftOptions>,
    #[serde(rename = "TLSSniffing", default)]
    pub tls_sniffing: TlsSniffing,
    #[serde(rename = "Outbound", default)]
    pub outbound: Outbound,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceDescriptor {
    /// A bare descriptor with every rule unrestricted and no protocol
    /// metadata.
    pub fn new(
        name: impl Into<String>,
        target_address: impl Into<String>,
        target_port: u16,
        listen: u16,
    ) -> Self {
        Self {
            name: name.into(),
            target_address: target_address.into(),
            target_port,
            listen,
            flow: default_flow(),
            ip_access: AccessRule::unrestricted(),
            minecraft: None,
            tls_sniffing: TlsSniffing::default(),
            outbound: Outbound::default(),
            extra: Map::new(),
        }
    }

    pub fn with_minecraft(mut self, options: MinecraftOptions) -> Self {
        self.minecraft = Some(options);
        self
    }

    /// The rule for `dimension`, if the descriptor carries one.
    pub fn rule(&self, dimension: AccessDimension) -> Option<&AccessRule> {
        match dimension {
            AccessDimension::Ip => Some(&self.ip_access),
            AccessDimension::Hostname => self.minecraft.as_ref().map(|m| &m.hostname_access),
            AccessDimension::Name => self.minecraft.as_ref().map(|m| &m.name_access),
        }
    }

    /// Mutable access to a rule, creating the protocol section if the
    /// dimension lives there and it is missing.
    pub(crate) fn rule_mut(&mut self, dimension: AccessDimension) -> &mut AccessRule {
        match dimension {
            AccessDimension::Ip => &mut self.ip_access,
            AccessDimension::Hostname => {
                &mut self.minecraft.get_or_insert_with(Default::default).hostname_access
            }
            AccessDimension::Name => {
                &mut self.minecraft.get_or_insert_with(Default::default).name_access
            }
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = (AccessDimension, &AccessRule)> {
        AccessDimension::ALL
            .into_iter()
            .filter_map(move |d| self.rule(d).map(|r| (d, r)))
    }

    /// Names of lists the engine currently checks for this service.
    pub fn active_lists(&self) -> impl Iterator<Item = &str> {
        self.rules()
            .flat_map(|(_, r)| r.active_lists().iter().map(String::as_str))
    }

    pub fn is_restricted(&self) -> bool {
        self.rules().any(|(_, r)| r.is_restricted())
    }
}

/// Minecraft-specific engine settings.  Only the two access rules are
/// interpreted here; the rest is display and limits payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinecraftOptions {
    #[serde(rename = "EnableHostnameRewrite", default)]
    pub enable_hostname_rewrite: bool,
    #[serde(rename = "OnlineCount", default)]
    pub online_count: OnlineCount,
    #[serde(rename = "HostnameAccess", default)]
    pub hostname_access: AccessRule,
    #[serde(rename = "NameAccess", default)]
    pub name_access: AccessRule,
    #[serde(rename = "PingMode", default)]
    pub ping_mode: String,
    #[serde(rename = "MotdFavicon", default)]
    pub motd_favicon: String,
    #[serde(rename = "MotdDescription", default)]
    pub motd_description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DEFAULT_MOTD_FAVICON: &str = "{DEFAULT_MOTD}";
pub const DEFAULT_MOTD_DESCRIPTION: &str =
    "§d{NAME}§e service is working on §a§o{INFO}§r\n§c§lProxy for §6§n{HOST}:{PORT}§r";

impl Default for MinecraftOptions {
    fn default() -> Self {
        Self {
            enable_hostname_rewrite: false,
            online_count: OnlineCount::default(),
            hostname_access: AccessRule::unrestricted(),
            name_access: AccessRule::unrestricted(),
            ping_mode: String::new(),
            motd_favicon: DEFAULT_MOTD_FAVICON.into(),
            motd_description: DEFAULT_MOTD_DESCRIPTION.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineCount {
    #[serde(rename = "Max")]
    pub max: i64,
    /// -1 reports the upstream's real count.
    #[serde(rename = "Online")]
    pub online: i64,
    #[serde(rename = "EnableMaxLimit")]
    pub enable_max_limit: bool,
}

impl Default for OnlineCount {
    fn default() -> Self {
        Self {
            max: 114514,
            online: -1,
            enable_max_limit: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSniffing {
    #[serde(rename = "RejectNonTLS", default)]
    pub reject_non_tls: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "Type", default)]
    pub kind: String,
}
