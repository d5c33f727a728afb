//! Run report
//!
//! The persisted record of one run: the session snapshot, both validation
//! reports, the failure account when the run halted and the audit chain.
//! Written as `rollout-<session>.json` on completion and on halt.

use crate::audit::{verify_chain, AuditEvent};
use crate::error::{AuditError, ReportError};
use crate::failure::FailureReport;
use rollout_core::{CheckStatus, SessionStatus, UpgradeSession, ValidationReport};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub session: UpgradeSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_validation: Option<ValidationReport>,
    /// Error that halted the run, or failures deferred by the continuation policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    pub exit_code: i32,
    #[serde(default)]
    pub audit: Vec<AuditEvent>,
}

impl RunReport {
    /// Most recent validation report
    #[must_use]
    pub fn final_validation(&self) -> Option<&ValidationReport> {
        self.post_validation
            .as_ref()
            .or(self.pre_validation.as_ref())
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("rollout-{}.json", self.session.session_id)
    }

    /// Write the report under `dir`, creating it if needed
    pub fn write(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "report written");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Re-check the embedded audit chain
    pub fn verify_audit(&self) -> Result<(), AuditError> {
        verify_chain(&self.audit)
    }

    /// Operator-facing summary
    #[must_use]
    pub fn summary(&self) -> String {
        let session = &self.session;
        let mut out = String::new();

        let _ = write!(
            out,
            "Rollout {} to {}: {}",
            session.session_id, session.target_version, session.status
        );
        if let Some(phase) = session.halted_in {
            let _ = write!(out, " in {phase}");
        }
        out.push('\n');
        if let Some(error) = &self.error {
            let _ = writeln!(out, "  error: {error}");
        }

        out.push_str("\nPhases:\n");
        for phase in &session.phases {
            let _ = write!(out, "  {:<16} {}", phase.name.as_str(), phase.status);
            if let Some(detail) = &phase.detail {
                let _ = write!(out, " ({detail})");
            }
            out.push('\n');
        }

        let succeeded = session.succeeded_hosts();
        let failed = session.failed_hosts();
        let never = session.never_attempted();
        let _ = writeln!(
            out,
            "\nHosts: {} total, {} succeeded, {} failed, {} never attempted",
            session.per_host_outcome.len(),
            succeeded.len(),
            failed.len(),
            never.len()
        );
        if !succeeded.is_empty() {
            let _ = writeln!(out, "  upgraded:        {}", succeeded.join(", "));
        }
        for hostname in &failed {
            let reason = session
                .per_host_outcome
                .get(*hostname)
                .and_then(|o| o.failure.as_ref())
                .map_or_else(String::new, |f| {
                    format!(" [{} during {}] {}", f.kind, f.failed_in, f.message)
                });
            let _ = writeln!(out, "  failed:          {hostname}{reason}");
        }
        if !never.is_empty() {
            let _ = writeln!(out, "  never attempted: {}", never.join(", "));
        }

        let warnings: Vec<_> = session
            .per_host_outcome
            .iter()
            .flat_map(|(host, o)| o.warnings.iter().map(move |w| (host, w)))
            .collect();
        if !warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for (host, warning) in warnings {
                let _ = writeln!(out, "  {host}: {warning}");
            }
        }

        if let Some(validation) = self.final_validation() {
            let _ = writeln!(
                out,
                "\nValidation ({:?}): {}, {} blocker(s), {} warning(s)",
                validation.kind,
                validation.aggregate(),
                validation.with_status(CheckStatus::Blocker).len(),
                validation.with_status(CheckStatus::Warning).len()
            );
            for (host, check) in validation.with_status(CheckStatus::Blocker) {
                let _ = writeln!(out, "  blocker {host}/{}: {}", check.check_name, check.detail);
            }
        }

        if !session.service_stop_order.is_empty() {
            let _ = writeln!(
                out,
                "\nServices stopped: {}",
                session.service_stop_order.join(", ")
            );
            let _ = writeln!(
                out,
                "Services started: {}",
                session.service_start_order.join(", ")
            );
        }

        if let Some(failure) = &self.failure {
            if !failure.services_left_stopped.is_empty() {
                let _ = writeln!(
                    out,
                    "Services left stopped: {}",
                    failure.services_left_stopped.join(", ")
                );
            }
            if let Some(error) = &failure.rollback_error {
                let _ = writeln!(out, "Service rollback failed: {error}");
            }
            let _ = writeln!(out, "\nRecommendation: {}", failure.recommendation);
            if failure.operator_required {
                out.push_str("Operator action required before the next run.\n");
            }
        } else if session.status == SessionStatus::Completed && self.is_success() {
            out.push_str("\nAll hosts upgraded.\n");
        }
        let _ = write!(out, "Exit code: {}", self.exit_code);
        out
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use chrono::Utc;
    use indexmap::IndexMap;
    use rollout_core::{
        HostOutcome, HostUpgradeState, PhaseName, PhaseRecord, PhaseStatus, Role, ValidationKind,
    };
    use uuid::Uuid;

    fn report() -> RunReport {
        let mut outcomes = IndexMap::new();
        let mut up = HostOutcome::pending(Role::Worker);
        up.state = HostUpgradeState::Succeeded;
        up.warnings.push("reports 8.8, expected 8.10".into());
        outcomes.insert("worker-01".to_string(), up);
        outcomes.insert("worker-02".to_string(), HostOutcome::pending(Role::Worker));

        let audit = AuditLog::new();
        audit.append("session", "started", "8.10");
        audit.append("worker-01", "succeeded", "");

        RunReport {
            session: UpgradeSession {
                session_id: Uuid::new_v4(),
                target_version: "8.10".into(),
                started_at: Utc::now(),
                finished_at: Some(Utc::now()),
                backup_root: "/var/backups/rollout".into(),
                status: SessionStatus::Completed,
                halted_in: None,
                per_host_outcome: outcomes,
                phases: vec![PhaseRecord {
                    status: PhaseStatus::Succeeded,
                    ..PhaseRecord::pending(PhaseName::PreValidation)
                }],
                service_stop_order: vec!["hive".into(), "hdfs".into()],
                service_start_order: vec!["hdfs".into(), "hive".into()],
            },
            pre_validation: Some(ValidationReport::new(ValidationKind::Pre)),
            post_validation: None,
            error: None,
            failure: None,
            exit_code: 0,
            audit: audit.events(),
        }
    }

    #[test]
    fn write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();
        let path = report.write(&dir.path().join("reports")).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("rollout-{}.json", report.session.session_id)
        );

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.session.session_id, report.session.session_id);
        assert_eq!(loaded.audit.len(), 2);
        assert!(loaded.verify_audit().is_ok());
        assert_eq!(
            loaded.final_validation().unwrap().kind,
            ValidationKind::Pre
        );
    }

    #[test]
    fn summary_lists_hosts_and_warnings() {
        let text = report().summary();
        assert!(text.contains("completed"));
        assert!(text.contains("1 succeeded, 0 failed, 1 never attempted"));
        assert!(text.contains("never attempted: worker-02"));
        assert!(text.contains("worker-01: reports 8.8"));
        assert!(text.contains("Services started: hdfs, hive"));
        assert!(text.ends_with("Exit code: 0"));
    }

    #[test]
    fn post_validation_wins_as_final() {
        let mut report = report();
        report.post_validation = Some(ValidationReport::new(ValidationKind::Post));
        assert_eq!(
            report.final_validation().unwrap().kind,
            ValidationKind::Post
        );
    }
}
