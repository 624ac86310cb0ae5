//! The registry: every service and access list of one node.
//!
//! All operations here are in-memory.  Loading and writing the backing
//! document is [`crate::store`]'s job, and the firewall is reconciled by
//! [`crate::node`] after a mutation has been validated.
//!
//! Invariants upheld by every mutation:
//!
//! * service names are unique;
//! * listen ports are unique across services;
//! * every list an active allow-by-list rule points at exists;
//! * list members are unique within a list.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::access::{AccessDimension, AccessList, AccessMode};
use crate::error::{EntityKind, RegistryError, Result};
use crate::service::ServiceDescriptor;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(rename = "Services", default)]
    services: Vec<ServiceDescriptor>,
    #[serde(rename = "Lists", default)]
    lists: BTreeMap<String, AccessList>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn lists(&self) -> impl Iterator<Item = (&str, &AccessList)> {
        self.lists.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn list(&self, name: &str) -> Option<&AccessList> {
        self.lists.get(name)
    }

    pub fn listen_ports(&self) -> BTreeSet<u16> {
        self.services.iter().map(|s| s.listen).collect()
    }

    fn port_owner(&self, port: u16) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.listen == port)
    }

    /// First service whose active rules gate on `list`.
    pub fn list_user(&self, list: &str) -> Option<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.active_lists().any(|l| l == list))
    }

    /// Adds a service and makes sure a list named after it exists.
    pub fn add_service(&mut self, service: ServiceDescriptor) -> Result<()> {
        self.insert_service(service, true)
    }

    pub(crate) fn insert_service(
        &mut self,
        service: ServiceDescriptor,
        own_list: bool,
    ) -> Result<()> {
        if self.service(&service.name).is_some() {
            return Err(RegistryError::AlreadyExists {
                kind: EntityKind::Service,
                name: service.name,
            });
        }
        check_port("target port", service.target_port)?;
        check_port("listen port", service.listen)?;
        if let Some(owner) = self.port_owner(service.listen) {
            return Err(RegistryError::PortConflict {
                port: service.listen,
                service: owner.name.clone(),
            });
        }

        if own_list {
            self.ensure_list(&service.name);
        }
        let referenced: Vec<String> = service.active_lists().map(str::to_string).collect();
        for list in referenced {
            self.ensure_list(&list);
        }

        info!(
            "Added service {} ({} -> {}:{})",
            service.name, service.listen, service.target_address, service.target_port
        );
        self.services.push(service);
        Ok(())
    }

    /// Removes a service.  Its list is kept.
    pub fn remove_service(&mut self, name: &str) -> Result<ServiceDescriptor> {
        let idx = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| RegistryError::service_not_found(name))?;
        let removed = self.services.remove(idx);
        info!("Removed service {}", name);
        Ok(removed)
    }

    /// Switches one rule of a service between unrestricted and
    /// allow-by-list.  Restricting with no `list` reuses the list the rule
    /// last gated on; the target list is created empty if absent.
    pub fn set_access_mode(
        &mut self,
        name: &str,
        dimension: AccessDimension,
        mode: AccessMode,
        list: Option<&str>,
    ) -> Result<()> {
        let service = self
            .services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::service_not_found(name))?;

        match mode {
            AccessMode::Unrestricted => {
                service.rule_mut(dimension).open();
                info!("Opened {} access on service {}", dimension, name);
            }
            AccessMode::AllowByList => {
                let remembered = service
                    .rule(dimension)
                    .is_some_and(|r| !r.list_tags.is_empty());
                if list.is_none() && !remembered {
                    return Err(RegistryError::NoAccessList {
                        service: name.to_string(),
                    });
                }
                let rule = service.rule_mut(dimension);
                rule.restrict(list);
                let tags = rule.list_tags.clone();
                info!(
                    "Restricted {} access on service {} to {}",
                    dimension,
                    name,
                    tags.join(", ")
                );
                for tag in &tags {
                    self.ensure_list(tag);
                }
            }
        }
        Ok(())
    }

    /// Creates an empty list unless one already exists.  Returns whether it
    /// was created.
    pub fn ensure_list(&mut self, name: &str) -> bool {
        if self.lists.contains_key(name) {
            return false;
        }
        self.lists.insert(name.to_string(), AccessList::new());
        true
    }

    pub fn create_list(&mut self, name: &str) -> Result<()> {
        if !self.ensure_list(name) {
            return Err(RegistryError::AlreadyExists {
                kind: EntityKind::List,
                name: name.to_string(),
            });
        }
        info!("Created list {}", name);
        Ok(())
    }

    /// Deletes a list no active rule gates on.
    pub fn remove_list(&mut self, name: &str) -> Result<AccessList> {
        if !self.lists.contains_key(name) {
            return Err(RegistryError::list_not_found(name));
        }
        if let Some(user) = self.list_user(name) {
            return Err(RegistryError::ListInUse {
                list: name.to_string(),
                service: user.name.clone(),
            });
        }
        info!("Deleted list {}", name);
        Ok(self.lists.remove(name).unwrap_or_default())
    }

    pub fn add_member(&mut self, list: &str, id: &str) -> Result<()> {
        let members = self
            .lists
            .get_mut(list)
            .ok_or_else(|| RegistryError::list_not_found(list))?;
        if !members.insert(id) {
            return Err(RegistryError::AlreadyMember {
                list: list.to_string(),
                id: id.to_string(),
            });
        }
        info!("Added {} to list {}", id, list);
        Ok(())
    }

    /// Like [`Registry::add_member`] but an existing member is reported as
    /// `Ok(false)`.
    pub fn try_add_member(&mut self, list: &str, id: &str) -> Result<bool> {
        match self.add_member(list, id) {
            Ok(()) => Ok(true),
            Err(RegistryError::AlreadyMember { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn remove_member(&mut self, list: &str, id: &str) -> Result<()> {
        let members = self
            .lists
            .get_mut(list)
            .ok_or_else(|| RegistryError::list_not_found(list))?;
        if !members.remove(id) {
            return Err(RegistryError::NotAMember {
                list: list.to_string(),
                id: id.to_string(),
            });
        }
        info!("Removed {} from list {}", id, list);
        Ok(())
    }

    /// Repairs what a hand-edited document may have broken.  Duplicate
    /// service names cannot be repaired and are rejected.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(RegistryError::AlreadyExists {
                    kind: EntityKind::Service,
                    name: service.name.clone(),
                });
            }
        }

        let mut ports: BTreeMap<u16, &str> = BTreeMap::new();
        for service in &self.services {
            if let Some(other) = ports.insert(service.listen, service.name.as_str()) {
                warn!(
                    "Services {} and {} both listen on port {}",
                    other, service.name, service.listen
                );
            }
        }

        for (name, list) in self.lists.iter_mut() {
            let dropped = list.dedup();
            if dropped > 0 {
                warn!("Dropped {} duplicate member(s) from list {}", dropped, name);
            }
        }

        let missing: Vec<String> = self
            .services
            .iter()
            .flat_map(|s| s.active_lists())
            .filter(|l| !self.lists.contains_key(*l))
            .map(str::to_string)
            .collect();
        for list in missing {
            if self.ensure_list(&list) {
                warn!("List {} was referenced but missing; created it empty", list);
            }
        }
        Ok(())
    }
}

fn check_port(field: &'static str, value: u16) -> Result<()> {
    if value == 0 {
        return Err(RegistryError::InvalidPort {
            field,
            value: value.into(),
        });
    }
    Ok(())
}
