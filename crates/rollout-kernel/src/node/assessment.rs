//! Pre-upgrade assessment report
//!
//! The upgrade utility prints a JSON report with one entry per finding.
//! Entries flagged `inhibitor` block the upgrade; high-severity entries
//! without the flag are carried as warnings.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Finding {
    pub title: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Finding {
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("inhibitor"))
    }

    #[inline]
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.severity.eq_ignore_ascii_case("high")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub entries: Vec<Finding>,
}

impl Assessment {
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.entries.iter().any(Finding::is_blocking)
    }

    #[must_use]
    pub fn blocking_titles(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|f| f.is_blocking())
            .map(|f| f.title.as_str())
            .collect()
    }

    /// High-severity findings that do not block
    #[must_use]
    pub fn advisory_titles(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|f| f.is_high() && !f.is_blocking())
            .map(|f| f.title.as_str())
            .collect()
    }
}

pub fn parse_assessment(raw: &str) -> Result<Assessment, serde_json::Error> {
    serde_json::from_str(raw.trim())
}
