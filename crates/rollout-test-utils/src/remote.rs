//! Scriptable remote execution channel
//!
//! Commands are recognised by content, so both the default command
//! templates and short test templates (`backup ...`, `assess ...`) work.
//! A successful `execute` followed by `reboot` takes the host down for a
//! configurable number of reachability polls, after which it reports the
//! upgraded version.

use parking_lot::Mutex;
use rollout_core::{CommandOutput, Host, RemoteError, RemoteExecutor};
use std::collections::{HashMap, HashSet};

/// Command family as seen by the fake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Disk,
    Backup,
    Remediate,
    Install,
    Assess,
    Execute,
    Reboot,
    Version,
    Other,
}

impl Step {
    #[must_use]
    pub fn classify(command: &str) -> Step {
        let c = command.trim_start();
        if c.starts_with("df ") {
            Step::Disk
        } else if c.starts_with("backup") || c.contains("tar -czf") {
            Step::Backup
        } else if c.starts_with("remediate") || c.contains("dnf remove") {
            Step::Remediate
        } else if c.starts_with("install") || c.contains("leapp-upgrade") {
            Step::Install
        } else if c.starts_with("assess") || c.contains("preupgrade") {
            Step::Assess
        } else if c.starts_with("execute") || c.contains("leapp upgrade") {
            Step::Execute
        } else if c.contains("reboot") {
            Step::Reboot
        } else if c.starts_with("version") || c.contains("VERSION_ID") {
            Step::Version
        } else {
            Step::Other
        }
    }
}

#[derive(Debug, Clone)]
struct HostScript {
    current_version: String,
    upgraded_version: String,
    free_disk_mb: u64,
    reachable: bool,
    failures: HashMap<Step, CommandOutput>,
    /// Assessment reports an inhibitor until remediation runs
    inhibitor_until_remediated: bool,
    /// Assessment reports an inhibitor no matter what
    persistent_inhibitor: bool,
    remediated: bool,
    executed: bool,
    rebooting: bool,
    down_polls_left: u32,
    never_returns: bool,
    /// Reboot command loses the connection instead of returning
    drops_on_reboot: bool,
    /// Host goes unreachable right after reporting its upgraded version
    lost_after_upgrade: bool,
}

impl HostScript {
    fn new(current_version: &str, upgraded_version: &str) -> Self {
        Self {
            current_version: current_version.to_string(),
            upgraded_version: upgraded_version.to_string(),
            free_disk_mb: 50_000,
            reachable: true,
            failures: HashMap::new(),
            inhibitor_until_remediated: false,
            persistent_inhibitor: false,
            remediated: false,
            executed: false,
            rebooting: false,
            down_polls_left: 0,
            never_returns: false,
            drops_on_reboot: false,
            lost_after_upgrade: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    current_version: String,
    upgraded_version: String,
    down_polls: u32,
    hosts: HashMap<String, HostScript>,
    log: Vec<(String, Step, String)>,
    disconnected: HashSet<String>,
}

/// Remote channel where every host upgrades cleanly unless scripted otherwise
#[derive(Debug)]
pub struct FakeRemote {
    inner: Mutex<Inner>,
}

impl FakeRemote {
    /// Hosts run `current_version` and report `upgraded_version` after reboot
    #[must_use]
    pub fn new(current_version: &str, upgraded_version: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_version: current_version.to_string(),
                upgraded_version: upgraded_version.to_string(),
                down_polls: 1,
                hosts: HashMap::new(),
                log: Vec::new(),
                disconnected: HashSet::new(),
            }),
        }
    }

    fn script<R>(&self, hostname: &str, f: impl FnOnce(&mut HostScript) -> R) -> R {
        let mut inner = self.inner.lock();
        let (current, upgraded) = (inner.current_version.clone(), inner.upgraded_version.clone());
        let script = inner
            .hosts
            .entry(hostname.to_string())
            .or_insert_with(|| HostScript::new(&current, &upgraded));
        f(script)
    }

    /// The given step exits non-zero on this host
    pub fn fail(&self, hostname: &str, step: Step, exit_code: i32, stderr: &str) {
        let output = CommandOutput::failed(exit_code, stderr);
        self.script(hostname, |s| {
            s.failures.insert(step, output);
        });
    }

    /// Reboot starts but the host never answers again
    pub fn never_returns(&self, hostname: &str) {
        self.script(hostname, |s| s.never_returns = true);
    }

    /// Reboot goes ahead but the command's connection is cut
    pub fn drop_on_reboot(&self, hostname: &str) {
        self.script(hostname, |s| s.drops_on_reboot = true);
    }

    /// Upgrade completes, then the host drops off the network
    pub fn lose_after_upgrade(&self, hostname: &str) {
        self.script(hostname, |s| s.lost_after_upgrade = true);
    }

    pub fn set_unreachable(&self, hostname: &str) {
        self.script(hostname, |s| s.reachable = false);
    }

    /// Every command fails to connect
    pub fn disconnect(&self, hostname: &str) {
        self.inner.lock().disconnected.insert(hostname.to_string());
    }

    pub fn set_free_disk_mb(&self, hostname: &str, free_mb: u64) {
        self.script(hostname, |s| s.free_disk_mb = free_mb);
    }

    /// Host comes back on a different version than the fleet default
    pub fn set_upgraded_version(&self, hostname: &str, version: &str) {
        self.script(hostname, |s| s.upgraded_version = version.to_string());
    }

    pub fn inhibit_until_remediated(&self, hostname: &str) {
        self.script(hostname, |s| s.inhibitor_until_remediated = true);
    }

    pub fn inhibit_always(&self, hostname: &str) {
        self.script(hostname, |s| s.persistent_inhibitor = true);
    }

    /// Reachability polls that report the host down after reboot
    pub fn set_down_polls(&self, polls: u32) {
        self.inner.lock().down_polls = polls;
    }

    /// `(hostname, step)` for every command received
    #[must_use]
    pub fn steps(&self) -> Vec<(String, Step)> {
        self.inner
            .lock()
            .log
            .iter()
            .map(|(h, s, _)| (h.clone(), *s))
            .collect()
    }

    /// Steps run on one host, in order
    #[must_use]
    pub fn steps_for(&self, hostname: &str) -> Vec<Step> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|(h, _, _)| h == hostname)
            .map(|(_, s, _)| *s)
            .collect()
    }

    /// Full command text received by a host
    #[must_use]
    pub fn commands_for(&self, hostname: &str) -> Vec<String> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|(h, _, _)| h == hostname)
            .map(|(_, _, c)| c.clone())
            .collect()
    }

    /// Hosts that received an `execute` command
    #[must_use]
    pub fn upgraded_hosts(&self) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter(|(_, s)| *s == Step::Execute)
            .map(|(h, _)| h)
            .collect()
    }
}

fn assessment(inhibited: bool) -> String {
    if inhibited {
        r#"{"entries":[{"title":"Unsupported kernel modules loaded","severity":"high","flags":["inhibitor"]},{"title":"Obsolete repositories configured","severity":"low","flags":[]}]}"#.to_string()
    } else {
        r#"{"entries":[{"title":"Obsolete repositories configured","severity":"low","flags":[]}]}"#.to_string()
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for FakeRemote {
    async fn execute(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
        let step = Step::classify(command);
        let down_polls = {
            let mut inner = self.inner.lock();
            inner
                .log
                .push((host.hostname.clone(), step, command.to_string()));
            if inner.disconnected.contains(&host.hostname) {
                return Err(RemoteError::Connect {
                    host: host.hostname.clone(),
                    reason: "connection refused".into(),
                });
            }
            inner.down_polls
        };
        let hostname = host.hostname.clone();
        self.script(&host.hostname, |s| {
            if s.rebooting || !s.reachable {
                return Err(RemoteError::Connect {
                    host: hostname,
                    reason: "no route to host".into(),
                });
            }
            if let Some(output) = s.failures.get(&step) {
                return Ok(output.clone());
            }
            let output = match step {
                Step::Disk => CommandOutput::ok(format!("{}\n", s.free_disk_mb)),
                Step::Assess => {
                    let inhibited = s.persistent_inhibitor
                        || (s.inhibitor_until_remediated && !s.remediated);
                    CommandOutput::ok(assessment(inhibited))
                }
                Step::Remediate => {
                    s.remediated = true;
                    CommandOutput::ok("")
                }
                Step::Execute => {
                    s.executed = true;
                    CommandOutput::ok("upgrade staged\n")
                }
                Step::Reboot => {
                    if s.executed {
                        s.current_version = s.upgraded_version.clone();
                    }
                    s.rebooting = true;
                    s.down_polls_left = down_polls;
                    if s.drops_on_reboot {
                        return Err(RemoteError::Connect {
                            host: hostname,
                            reason: "connection reset by peer".into(),
                        });
                    }
                    CommandOutput::ok("")
                }
                Step::Version => {
                    if s.executed && s.lost_after_upgrade {
                        s.reachable = false;
                    }
                    CommandOutput::ok(format!("{}\n", s.current_version))
                }
                Step::Backup | Step::Install | Step::Other => CommandOutput::ok(""),
            };
            Ok(output)
        })
    }

    async fn is_reachable(&self, host: &Host) -> bool {
        if self.inner.lock().disconnected.contains(&host.hostname) {
            return false;
        }
        self.script(&host.hostname, |s| {
            if !s.reachable {
                return false;
            }
            if !s.rebooting {
                return true;
            }
            if s.never_returns {
                return false;
            }
            if s.down_polls_left > 0 {
                s.down_polls_left -= 1;
                return false;
            }
            s.rebooting = false;
            true
        })
    }
}
