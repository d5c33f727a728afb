//! Service lifecycle controller
//!
//! Stops services in topology order and starts them in the exact reverse,
//! one at a time, polling the control plane until each reaches its target
//! state. The first service that misses its bound ends the pass; the error
//! names every service already transitioned.

use rollout_core::{
    ControlPlane, ControlPlaneError, LifecycleDirection, RolloutConfig, ServiceLifecycleError,
    ServiceTopology,
};
use std::sync::Arc;
use std::time::Duration;

pub struct ServiceController {
    control_plane: Arc<dyn ControlPlane>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ServiceController {
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            control_plane,
            timeout,
            poll_interval,
        }
    }

    #[must_use]
    pub fn from_config(control_plane: Arc<dyn ControlPlane>, config: &RolloutConfig) -> Self {
        Self::new(
            control_plane,
            config.timeouts.service_timeout(),
            config.timeouts.service_poll_interval(),
        )
    }

    /// Explicit order when configured, otherwise the control plane's
    pub async fn topology(
        &self,
        explicit: Option<&[String]>,
    ) -> Result<ServiceTopology, ServiceLifecycleError> {
        if let Some(order) = explicit {
            return Ok(ServiceTopology::new(order.to_vec()));
        }
        let services = self
            .control_plane
            .list_cluster_services()
            .await
            .map_err(ServiceLifecycleError::Topology)?;
        Ok(ServiceTopology::new(services))
    }

    /// Stop every service in declared order; returns the services stopped
    pub async fn stop(&self, topology: &ServiceTopology) -> Result<Vec<String>, ServiceLifecycleError> {
        self.run(topology.stop_order(), LifecycleDirection::Stop)
            .await
    }

    /// Start every service in reverse order, then wait for fleet health
    pub async fn start(&self, topology: &ServiceTopology) -> Result<Vec<String>, ServiceLifecycleError> {
        let order = topology.start_order();
        let started = self.run(&order, LifecycleDirection::Start).await?;
        self.await_fleet_health(started).await
    }

    async fn run(
        &self,
        services: &[String],
        direction: LifecycleDirection,
    ) -> Result<Vec<String>, ServiceLifecycleError> {
        let mut transitioned = Vec::with_capacity(services.len());
        for service in services {
            tracing::info!(service = %service, %direction, "service transition");
            let issued = match direction {
                LifecycleDirection::Stop => self.control_plane.stop_service(service).await,
                LifecycleDirection::Start => self.control_plane.start_service(service).await,
            };
            if let Err(source) = issued {
                return Err(ServiceLifecycleError::ControlPlane {
                    service: service.clone(),
                    direction,
                    source,
                    transitioned,
                });
            }
            match tokio::time::timeout(self.timeout, self.wait_for(service, direction)).await {
                Ok(Ok(())) => transitioned.push(service.clone()),
                Ok(Err(source)) => {
                    return Err(ServiceLifecycleError::ControlPlane {
                        service: service.clone(),
                        direction,
                        source,
                        transitioned,
                    })
                }
                Err(_) => {
                    tracing::error!(service = %service, %direction, "service transition timed out");
                    return Err(ServiceLifecycleError::Timeout {
                        service: service.clone(),
                        direction,
                        waited_secs: self.timeout.as_secs(),
                        transitioned,
                    });
                }
            }
        }
        Ok(transitioned)
    }

    async fn wait_for(
        &self,
        service: &str,
        direction: LifecycleDirection,
    ) -> Result<(), ControlPlaneError> {
        loop {
            let state = self.control_plane.service_state(service).await?;
            let done = match direction {
                LifecycleDirection::Stop => state.is_quiesced(),
                LifecycleDirection::Start => state.is_running(),
            };
            if done {
                return Ok(());
            }
            tracing::debug!(service, %state, "waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn await_fleet_health(
        &self,
        started: Vec<String>,
    ) -> Result<Vec<String>, ServiceLifecycleError> {
        let poll = async {
            loop {
                match self.control_plane.fleet_health().await {
                    Ok(health) if health.healthy => return Ok(()),
                    Ok(health) => {
                        tracing::debug!(details = %health.details, "fleet not yet healthy");
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "fleet health poll failed");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.timeout, poll).await {
            Ok(Ok(())) => Ok(started),
            Ok(Err(e)) => Err(ServiceLifecycleError::FleetUnhealthy {
                details: e.to_string(),
                transitioned: started,
            }),
            Err(_) => {
                let details = self
                    .control_plane
                    .fleet_health()
                    .await
                    .map_or_else(|e| e.to_string(), |h| h.details);
                Err(ServiceLifecycleError::FleetUnhealthy {
                    details,
                    transitioned: started,
                })
            }
        }
    }
}

impl std::fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceController")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Services stopped by this run and not yet started again, in stop order
#[must_use]
pub fn outstanding(stopped: &[String], started: &[String]) -> Vec<String> {
    stopped
        .iter()
        .filter(|s| !started.contains(s))
        .cloned()
        .collect()
}
