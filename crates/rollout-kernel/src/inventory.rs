//! Host inventory resolution
//!
//! Hosts come either from a static list or from the control plane. Each
//! host gets exactly one role, fixed for the rest of the run: an explicit
//! role wins, otherwise the service precedence in [`RoleRules`] decides.
//! Discovery never falls back to an empty list.

use rollout_core::{
    ControlPlane, Host, HostRecord, InventoryConfig, InventoryError, RoleRules, StaticHost,
};
use std::collections::HashSet;

/// Where the host list comes from
#[derive(Debug, Clone)]
pub enum InventorySource {
    Static(Vec<StaticHost>),
    Discover,
}

impl InventorySource {
    /// Static when the config lists hosts, discovery otherwise
    #[must_use]
    pub fn from_config(config: &InventoryConfig) -> Self {
        if config.hosts.is_empty() {
            InventorySource::Discover
        } else {
            InventorySource::Static(config.hosts.clone())
        }
    }
}

pub async fn resolve(
    source: &InventorySource,
    control_plane: &dyn ControlPlane,
    rules: &RoleRules,
) -> Result<Vec<Host>, InventoryError> {
    let hosts = match source {
        InventorySource::Static(entries) => entries
            .iter()
            .map(|e| from_static(e, rules))
            .collect::<Result<Vec<_>, _>>()?,
        InventorySource::Discover => {
            let records = control_plane.list_hosts().await.map_err(|e| {
                tracing::error!(error = %e, "host discovery failed");
                InventoryError::ControlPlane(e)
            })?;
            records
                .into_iter()
                .map(|r| from_record(r, rules))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    check_unique(&hosts)?;
    if hosts.is_empty() {
        return Err(InventoryError::Empty);
    }
    tracing::info!(
        hosts = hosts.len(),
        edge = count(&hosts, rollout_core::Role::Edge),
        worker = count(&hosts, rollout_core::Role::Worker),
        master = count(&hosts, rollout_core::Role::Master),
        "inventory resolved"
    );
    Ok(hosts)
}

fn count(hosts: &[Host], role: rollout_core::Role) -> usize {
    hosts.iter().filter(|h| h.role == role).count()
}

fn check_hostname(hostname: &str) -> Result<(), InventoryError> {
    if hostname.trim().is_empty() {
        return Err(InventoryError::InvalidHost {
            hostname: hostname.to_string(),
            reason: "empty hostname".into(),
        });
    }
    Ok(())
}

fn from_static(entry: &StaticHost, rules: &RoleRules) -> Result<Host, InventoryError> {
    check_hostname(&entry.hostname)?;
    let role = entry
        .role
        .unwrap_or_else(|| rules.classify(&entry.services));
    let address = entry
        .address
        .clone()
        .unwrap_or_else(|| entry.hostname.clone());
    Ok(Host::new(entry.hostname.clone(), address, role).with_services(entry.services.clone()))
}

fn from_record(record: HostRecord, rules: &RoleRules) -> Result<Host, InventoryError> {
    check_hostname(&record.hostname)?;
    let role = rules.classify(&record.services);
    let address = record
        .address
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| record.hostname.clone());
    Ok(Host::new(record.hostname, address, role).with_services(record.services))
}

fn check_unique(hosts: &[Host]) -> Result<(), InventoryError> {
    let mut seen = HashSet::with_capacity(hosts.len());
    for host in hosts {
        if !seen.insert(host.hostname.as_str()) {
            return Err(InventoryError::DuplicateHost(host.hostname.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::Role;
    use rollout_test_utils::{host_records, FakeControlPlane};

    fn static_host(hostname: &str, role: Option<Role>, services: &[&str]) -> StaticHost {
        StaticHost {
            hostname: hostname.into(),
            address: None,
            role,
            services: services.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn discovery_classifies_by_service_precedence() {
        let mut records = host_records(1, 2, 1);
        // A host running both master and worker services is a master
        records[1].services.insert("NAMENODE".into());
        let cp = FakeControlPlane::new(["hdfs"]).with_hosts(records);
        let hosts = resolve(&InventorySource::Discover, &cp, &RoleRules::default())
            .await
            .unwrap();
        let roles: Vec<_> = hosts.iter().map(|h| h.role).collect();
        assert_eq!(roles, vec![Role::Edge, Role::Master, Role::Worker, Role::Master]);
        assert_eq!(hosts[0].address, "10.0.10.1");
    }

    #[tokio::test]
    async fn discovery_fails_fast_when_control_plane_is_down() {
        let cp = FakeControlPlane::new(["hdfs"]).with_hosts(host_records(1, 1, 1));
        cp.set_unreachable(true);
        let err = resolve(&InventorySource::Discover, &cp, &RoleRules::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::ControlPlane(_)));
    }

    #[tokio::test]
    async fn static_hosts_keep_explicit_roles() {
        let source = InventorySource::Static(vec![
            static_host("gw", None, &[]),
            static_host("dn", None, &["datanode"]),
            static_host("pinned", Some(Role::Master), &["DATANODE"]),
        ]);
        let cp = FakeControlPlane::new(Vec::<String>::new());
        let hosts = resolve(&source, &cp, &RoleRules::default()).await.unwrap();
        assert_eq!(hosts[0].role, Role::Edge);
        assert_eq!(hosts[1].role, Role::Worker);
        assert_eq!(hosts[2].role, Role::Master);
        assert_eq!(hosts[0].address, "gw");
    }

    #[tokio::test]
    async fn duplicates_and_empty_inventories_are_rejected() {
        let cp = FakeControlPlane::new(Vec::<String>::new());
        let dup = InventorySource::Static(vec![static_host("a", None, &[]), static_host("a", None, &[])]);
        assert!(matches!(
            resolve(&dup, &cp, &RoleRules::default()).await,
            Err(InventoryError::DuplicateHost(h)) if h == "a"
        ));
        assert!(matches!(
            resolve(&InventorySource::Discover, &cp, &RoleRules::default()).await,
            Err(InventoryError::Empty)
        ));
    }
}
