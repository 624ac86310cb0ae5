//! One node's control surface.
//!
//! Every operation is a whole-document cycle: load the registry, let the
//! role and the registry validate the change in memory, reconcile the
//! firewall, write the document back at the revision it was read at, and
//! optionally ask the engine to reload.  Nothing is written when any step
//! before the write fails, and ports opened for a write that does not land
//! are revoked again.  Ports are only closed once the write has landed.

use log::{info, warn};

use crate::access::{AccessDimension, AccessMode};
use crate::engine::Engine;
use crate::error::{EntityKind, RegistryError, Result};
use crate::firewall::{Firewall, FirewallSync, PortOutcome};
#[cfg(test)]
use crate::registry::Registry;
use crate::role::{Bootstrap, Role};
use crate::service::ServiceDescriptor;
use crate::store::{DocumentStore, Snapshot};

pub struct Node<F, E> {
    role: Role,
    store: DocumentStore,
    firewall: FirewallSync<F>,
    engine: E,
    reload_after_change: bool,
}

impl<F: Firewall, E: Engine> Node<F, E> {
    pub fn new(role: Role, store: DocumentStore, firewall: FirewallSync<F>, engine: E) -> Self {
        Self {
            role,
            store,
            firewall,
            engine,
            reload_after_change: false,
        }
    }

    pub fn reload_after_change(mut self, enabled: bool) -> Self {
        self.reload_after_change = enabled;
        self
    }

    /// Current document, read-only.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.store.load()
    }

    #[cfg(test)]
    fn registry(&self) -> Result<Registry> {
        Ok(self.store.load()?.registry)
    }

    /// Seeds a fresh document for this node's role.  An existing document
    /// is only replaced when `force` is set.
    pub async fn setup(&self, bootstrap: &Bootstrap, force: bool) -> Result<()> {
        if bootstrap.role() != self.role {
            return Err(RegistryError::RoleViolation(format!(
                "cannot seed a {} node with a {} template",
                self.role,
                bootstrap.role()
            )));
        }
        let expected = self.store.revision()?;
        if expected.is_some() && !force {
            return Err(RegistryError::AlreadyExists {
                kind: EntityKind::Document,
                name: self.store.path().display().to_string(),
            });
        }
        if expected.is_some() {
            warn!("Overwriting existing {}", self.store.path().display());
        }

        let registry = bootstrap.registry()?;
        let mut opened = Vec::new();
        for port in registry.listen_ports() {
            if let Err(e) = self.firewall.open(port).await {
                self.release(&opened).await;
                return Err(e);
            }
            opened.push(port);
        }
        if let Err(e) = self.store.save(&registry, expected.as_ref()) {
            self.release(&opened).await;
            return Err(e);
        }
        info!("Initialized {} node at {}", self.role, self.store.path().display());
        self.after_change().await
    }

    pub async fn add_service(&self, service: ServiceDescriptor) -> Result<()> {
        let mut snap = self.store.load()?;
        self.role.check_capacity(&snap.registry)?;
        let port = service.listen;
        snap.registry.add_service(service)?;
        self.firewall.open(port).await?;
        if let Err(e) = self.store.save(&snap.registry, Some(&snap.revision)) {
            self.release(&[port]).await;
            return Err(e);
        }
        self.after_change().await
    }

    /// Removes a service.  With `purge`, also drops its own list (unless
    /// another service still gates on it) and, once the document is
    /// written, closes its port (unless another service still listens
    /// there).
    pub async fn remove_service(&self, name: &str, purge: bool) -> Result<ServiceDescriptor> {
        let mut snap = self.store.load()?;
        let removed = snap.registry.remove_service(name)?;
        if purge {
            if snap.registry.list(name).is_some() {
                match snap.registry.remove_list(name) {
                    Ok(_) => {}
                    Err(RegistryError::ListInUse { service, .. }) => {
                        warn!("Keeping list {}: still used by {}", name, service)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.store.save(&snap.registry, Some(&snap.revision))?;
        if purge && !snap.registry.listen_ports().contains(&removed.listen) {
            self.firewall.close(removed.listen).await?;
        }
        self.after_change().await?;
        Ok(removed)
    }

    pub async fn set_access_mode(
        &self,
        name: &str,
        dimension: AccessDimension,
        mode: AccessMode,
        list: Option<&str>,
    ) -> Result<()> {
        let mut snap = self.store.load()?;
        snap.registry.set_access_mode(name, dimension, mode, list)?;
        self.commit(&snap).await
    }

    pub async fn add_member(&self, list: &str, id: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        snap.registry.add_member(list, id)?;
        self.commit(&snap).await
    }

    /// Adds a member, reporting an existing one as `Ok(false)` without
    /// touching the document.
    pub async fn ensure_member(&self, list: &str, id: &str) -> Result<bool> {
        let mut snap = self.store.load()?;
        if !snap.registry.try_add_member(list, id)? {
            return Ok(false);
        }
        self.commit(&snap).await?;
        Ok(true)
    }

    pub async fn remove_member(&self, list: &str, id: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        snap.registry.remove_member(list, id)?;
        self.commit(&snap).await
    }

    pub async fn create_list(&self, name: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        snap.registry.create_list(name)?;
        self.commit(&snap).await
    }

    pub async fn remove_list(&self, name: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        snap.registry.remove_list(name)?;
        self.commit(&snap).await
    }

    /// Admits a relay at the edge.
    pub async fn allow_relay(&self, id: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        let (_, list) = self.role.edge_gate(&snap.registry)?;
        snap.registry.ensure_list(&list);
        snap.registry.add_member(&list, id)?;
        self.commit(&snap).await
    }

    pub async fn forget_relay(&self, id: &str) -> Result<()> {
        let mut snap = self.store.load()?;
        let (_, list) = self.role.edge_gate(&snap.registry)?;
        snap.registry.remove_member(&list, id)?;
        self.commit(&snap).await
    }

    /// Switches the edge's hostname gate on or off.
    pub async fn set_edge_gate(&self, mode: AccessMode) -> Result<()> {
        let mut snap = self.store.load()?;
        let (service, list) = self.role.edge_gate(&snap.registry)?;
        let name = service.name.clone();
        // Remembered tags come back as a whole; the gate list only seeds an
        // empty rule.
        let remembered = service
            .rule(AccessDimension::Hostname)
            .is_some_and(|r| !r.list_tags.is_empty());
        let list = (!remembered).then_some(list);
        snap.registry
            .set_access_mode(&name, AccessDimension::Hostname, mode, list.as_deref())?;
        self.commit(&snap).await
    }

    /// Re-requests an allow rule for every listen port in the document.
    pub async fn resync_firewall(&self) -> Result<Vec<PortOutcome>> {
        let snap = self.store.load()?;
        Ok(self.firewall.resync(&snap.registry).await)
    }

    pub async fn reload(&self) -> Result<()> {
        self.engine.reload().await
    }

    async fn commit(&self, snap: &Snapshot) -> Result<()> {
        self.store.save(&snap.registry, Some(&snap.revision))?;
        self.after_change().await
    }

    /// Withdraws allow rules opened for a write that did not land, sparing
    /// ports the document on disk still listens on.
    async fn release(&self, ports: &[u16]) {
        let keep = self
            .store
            .load()
            .map(|snap| snap.registry.listen_ports())
            .unwrap_or_default();
        for &port in ports.iter().filter(|p| !keep.contains(*p)) {
            if let Err(e) = self.firewall.close(port).await {
                warn!("Port {} stays open after a failed write: {}", port, e);
            }
        }
    }

    async fn after_change(&self) -> Result<()> {
        if self.reload_after_change {
            self.engine.reload().await?;
        }
        Ok(())
    }
}
