//! Environment fingerprints and build manifests compared during replay.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tek_epack::{stable_hash, HashAlgorithm};

/// Where a run happened: runtime, dependency versions, container signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub runtime: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub container: Option<String>,
}

impl EnvironmentFingerprint {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            ..Self::default()
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), version.into());
        self
    }

    pub fn with_container(mut self, signature: impl Into<String>) -> Self {
        self.container = Some(signature.into());
        self
    }

    pub fn digest(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => stable_hash(&value, HashAlgorithm::Sha256),
            Err(_) => String::new(),
        }
    }

    /// Components of `current` that differ from this recorded fingerprint.
    pub fn drift_factors(&self, current: &EnvironmentFingerprint) -> Vec<String> {
        let mut factors = Vec::new();
        if self.runtime != current.runtime {
            factors.push("environment.runtime".to_string());
        }
        let names: BTreeSet<&String> = self
            .dependencies
            .keys()
            .chain(current.dependencies.keys())
            .collect();
        for name in names {
            if self.dependencies.get(name) != current.dependencies.get(name) {
                factors.push(format!("environment.dependency.{name}"));
            }
        }
        if self.container != current.container {
            factors.push("environment.container".to_string());
        }
        factors
    }
}

/// The build under which replay runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub kernel_version: String,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
}

impl BuildManifest {
    pub fn new(kernel_version: impl Into<String>) -> Self {
        Self {
            kernel_version: kernel_version.into(),
            feature_flags: BTreeMap::new(),
        }
    }

    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.feature_flags.insert(name.into(), enabled);
        self
    }

    /// Differences between a recorded kernel version and flag set and this build.
    pub fn drift_factors(
        &self,
        recorded_version: &str,
        recorded_flags: &BTreeMap<String, bool>,
    ) -> Vec<String> {
        let mut factors = Vec::new();
        if recorded_version != self.kernel_version {
            factors.push("manifest.kernel_version".to_string());
        }
        let names: BTreeSet<&String> = recorded_flags
            .keys()
            .chain(self.feature_flags.keys())
            .collect();
        for name in names {
            if recorded_flags.get(name) != self.feature_flags.get(name) {
                factors.push(format!("manifest.feature.{name}"));
            }
        }
        factors
    }
}
