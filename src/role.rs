//! Node roles.
//!
//! An edge node ("proxy server") fronts exactly one upstream and admits
//! only the relays it knows.  A relay node ("transit server") carries any
//! number of named services, each with its own player list.  Both store
//! the same [`Registry`]; the role only decides how it is seeded and how
//! many services it may hold.

use std::fmt;

use crate::access::AccessRule;
use crate::error::{RegistryError, Result};
use crate::registry::Registry;
use crate::service::{MinecraftOptions, ServiceDescriptor};

/// Name of the edge node's only service.
pub const EDGE_SERVICE: &str = "MinecraftProxy";
/// Gate list of an edge that sits behind relays.
pub const RELAY_GATE_LIST: &str = "TransitServerIP";
/// Gate list of an edge that faces players directly.
pub const STANDALONE_LIST: &str = "whitelist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Edge,
    Relay,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Edge => write!(f, "edge"),
            Role::Relay => write!(f, "relay"),
        }
    }
}

impl Role {
    pub fn max_services(self) -> Option<usize> {
        match self {
            Role::Edge => Some(1),
            Role::Relay => None,
        }
    }

    /// Refuses a new service once the role's cardinality is reached.
    pub fn check_capacity(self, registry: &Registry) -> Result<()> {
        match self.max_services() {
            Some(max) if registry.services().len() >= max => Err(RegistryError::RoleViolation(
                format!("an {} node holds at most {} service(s)", self, max),
            )),
            _ => Ok(()),
        }
    }

    /// The edge's service and the list its hostname gate checks.
    pub fn edge_gate(self, registry: &Registry) -> Result<(&ServiceDescriptor, String)> {
        if self != Role::Edge {
            return Err(RegistryError::RoleViolation(format!(
                "a {} node has no edge gate",
                self
            )));
        }
        let service = registry
            .services()
            .first()
            .ok_or_else(|| RegistryError::service_not_found(EDGE_SERVICE))?;
        let list = service
            .minecraft
            .as_ref()
            .and_then(|m| m.hostname_access.list_tags.first().cloned())
            .unwrap_or_else(|| RELAY_GATE_LIST.to_string());
        Ok((service, list))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeGate {
    /// Admit only connections arriving through a known relay.
    RelayAware,
    /// Face players directly with the gate open.
    Standalone,
}

/// How a fresh document is seeded.
#[derive(Debug, Clone)]
pub enum Bootstrap {
    Edge {
        target_address: String,
        target_port: u16,
        listen: u16,
        gate: EdgeGate,
    },
    Relay,
}

impl Bootstrap {
    pub fn role(&self) -> Role {
        match self {
            Bootstrap::Edge { .. } => Role::Edge,
            Bootstrap::Relay => Role::Relay,
        }
    }

    pub fn registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        if let Bootstrap::Edge {
            target_address,
            target_port,
            listen,
            gate,
        } = self
        {
            let (service, list) = edge_service(target_address, *target_port, *listen, *gate);
            registry.ensure_list(list);
            registry.insert_service(service, false)?;
        }
        Ok(registry)
    }
}

/// The edge node's service and the gate list it is seeded with.
fn edge_service(
    target_address: &str,
    target_port: u16,
    listen: u16,
    gate: EdgeGate,
) -> (ServiceDescriptor, &'static str) {
    let (hostname_access, list) = match gate {
        EdgeGate::RelayAware => (AccessRule::allow(RELAY_GATE_LIST), RELAY_GATE_LIST),
        EdgeGate::Standalone => {
            let mut rule = AccessRule::allow(STANDALONE_LIST);
            rule.open();
            (rule, STANDALONE_LIST)
        }
    };
    let service = ServiceDescriptor::new(EDGE_SERVICE, target_address, target_port, listen)
        .with_minecraft(MinecraftOptions {
            enable_hostname_rewrite: true,
            hostname_access,
            ..Default::default()
        });
    (service, list)
}

/// A relay route gated on player names, using a list named after the
/// service.
pub fn relay_service(
    name: &str,
    target_address: &str,
    target_port: u16,
    listen: u16,
    restricted: bool,
) -> ServiceDescriptor {
    let mut name_access = AccessRule::allow(name);
    if !restricted {
        name_access.open();
    }
    ServiceDescriptor::new(name, target_address, target_port, listen).with_minecraft(
        MinecraftOptions {
            enable_hostname_rewrite: false,
            name_access,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessDimension;

    fn relay_aware() -> Bootstrap {
        Bootstrap::Edge {
            target_address: "mc.example.net".into(),
            target_port: 25565,
            listen: 25565,
            gate: EdgeGate::RelayAware,
        }
    }

    #[test]
    fn relay_bootstrap_is_empty() {
        let reg = Bootstrap::Relay.registry().unwrap();
        assert!(reg.services().is_empty());
        assert_eq!(reg.lists().count(), 0);
    }

    #[test]
    fn relay_aware_edge_gates_on_relay_list() {
        let reg = relay_aware().registry().unwrap();
        assert_eq!(reg.services().len(), 1);
        let svc = &reg.services()[0];
        assert_eq!(svc.name, EDGE_SERVICE);
        assert_eq!(
            svc.rule(AccessDimension::Hostname),
            Some(&AccessRule::allow(RELAY_GATE_LIST))
        );
        assert!(reg.list(RELAY_GATE_LIST).unwrap().is_empty());
        assert_eq!(reg.lists().count(), 1);
        assert!(svc.minecraft.as_ref().unwrap().enable_hostname_rewrite);

        let (_, list) = Role::Edge.edge_gate(&reg).unwrap();
        assert_eq!(list, RELAY_GATE_LIST);
    }

    #[test]
    fn standalone_edge_is_open_but_remembers_list() {
        let reg = Bootstrap::Edge {
            target_address: "mc.example.net".into(),
            target_port: 25565,
            listen: 25565,
            gate: EdgeGate::Standalone,
        }
        .registry()
        .unwrap();
        let svc = &reg.services()[0];
        assert!(!svc.is_restricted());
        assert!(reg.list(STANDALONE_LIST).is_some());
        let (_, list) = Role::Edge.edge_gate(&reg).unwrap();
        assert_eq!(list, STANDALONE_LIST);
    }

    #[test]
    fn edge_holds_one_service() {
        let reg = relay_aware().registry().unwrap();
        assert!(matches!(
            Role::Edge.check_capacity(&reg),
            Err(RegistryError::RoleViolation(_))
        ));
        assert!(Role::Relay.check_capacity(&reg).is_ok());
    }

    #[test]
    fn relay_service_template() {
        let svc = relay_service("Lobby", "10.0.0.5", 25565, 25566, true);
        assert_eq!(svc.active_lists().collect::<Vec<_>>(), vec!["Lobby"]);
        assert!(!svc.minecraft.as_ref().unwrap().enable_hostname_rewrite);

        let open = relay_service("Lobby", "10.0.0.5", 25565, 25566, false);
        assert!(!open.is_restricted());
        assert_eq!(
            open.rule(AccessDimension::Name).unwrap().list_tags,
            vec!["Lobby".to_string()]
        );
    }

    #[test]
    fn relay_has_no_edge_gate() {
        let reg = Bootstrap::Relay.registry().unwrap();
        assert!(Role::Relay.edge_gate(&reg).is_err());
        assert!(matches!(
            Role::Edge.edge_gate(&reg),
            Err(RegistryError::NotFound { .. })
        ));
    }
}
