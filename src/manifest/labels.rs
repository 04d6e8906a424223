//! Well-known label keys, values and name suffixes
//!
//! These strings are shared with clusters that were already rolled out by
//! earlier runs, so they must stay byte-exact.

use std::collections::BTreeMap;
use std::fmt;

/// Label (and annotation) key carrying the canary version of a workload
pub const CANARY_VERSION_LABEL: &str = "workflow/version";

/// Label key carrying the blue-green color of a workload
pub const BLUE_GREEN_VERSION_LABEL: &str = "k8s.deploy.color";

pub const CANARY_SUFFIX: &str = "-canary";
pub const BASELINE_SUFFIX: &str = "-baseline";
pub const STABLE_SUFFIX: &str = "-stable";
pub const GREEN_SUFFIX: &str = "-green";

/// Canary version of a workload
///
/// Exactly one value is present on an object at any time. Re-marking an
/// object that is already `Stable` is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLabel {
    Canary,
    Baseline,
    Stable,
}

impl VersionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionLabel::Canary => "canary",
            VersionLabel::Baseline => "baseline",
            VersionLabel::Stable => "stable",
        }
    }

    /// Name suffix of the derived resource carrying this version
    pub fn suffix(&self) -> &'static str {
        match self {
            VersionLabel::Canary => CANARY_SUFFIX,
            VersionLabel::Baseline => BASELINE_SUFFIX,
            VersionLabel::Stable => STABLE_SUFFIX,
        }
    }

    /// Single-entry label map `{workflow/version: <value>}`
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(CANARY_VERSION_LABEL.to_string(), self.as_str().to_string())])
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blue-green color of a workload
///
/// `None` is the stable color. Promote moves `Green` objects to `None`;
/// reject deletes `Green` objects without transitioning them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorLabel {
    None,
    Green,
}

impl ColorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorLabel::None => "None",
            ColorLabel::Green => "green",
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            BLUE_GREEN_VERSION_LABEL.to_string(),
            self.as_str().to_string(),
        )])
    }
}

impl fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append a suffix to a resource name
pub fn suffixed_name(name: &str, suffix: &str) -> String {
    format!("{name}{suffix}")
}
