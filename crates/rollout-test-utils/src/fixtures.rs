//! Fleet fixtures

use rollout_core::{Host, HostRecord, Role, RolloutConfig};

/// Version every fixture upgrades to
pub const TARGET_VERSION: &str = "8.10";

/// Hosts named `edge-01`, `worker-01`, `master-01`, ... in edge, worker,
/// master order
#[must_use]
pub fn fleet(edges: usize, workers: usize, masters: usize) -> Vec<Host> {
    let mut hosts = Vec::with_capacity(edges + workers + masters);
    for (role, count, octet) in [
        (Role::Edge, edges, 10),
        (Role::Worker, workers, 20),
        (Role::Master, masters, 30),
    ] {
        for i in 1..=count {
            hosts.push(Host::new(
                format!("{role}-{i:02}"),
                format!("10.0.{octet}.{i}"),
                role,
            ));
        }
    }
    hosts
}

/// Control-plane host listing whose services classify into the given
/// numbers of edge, worker and master hosts
#[must_use]
pub fn host_records(edges: usize, workers: usize, masters: usize) -> Vec<HostRecord> {
    fleet(edges, workers, masters)
        .into_iter()
        .map(|h| {
            let services: &[&str] = match h.role {
                Role::Master => &["NAMENODE", "ZOOKEEPER_SERVER"],
                Role::Worker => &["DATANODE", "NODEMANAGER"],
                Role::Edge => &["GATEWAY"],
            };
            HostRecord {
                hostname: h.hostname,
                address: Some(h.address),
                services: services.iter().map(|s| (*s).to_string()).collect(),
            }
        })
        .collect()
}

/// Default configuration targeting [`TARGET_VERSION`]
#[must_use]
pub fn test_config() -> RolloutConfig {
    RolloutConfig::new().with_target_version(TARGET_VERSION)
}
