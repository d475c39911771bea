use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

pub const DEFAULT_MAX_DISPATCH_DEPTH: u32 = 16;
/// Hard ceiling for `max_dispatch_depth`; keeps nested dispatch well inside
/// the host stack.
pub const MAX_DISPATCH_DEPTH_CEILING: u32 = 64;
pub const DEFAULT_PRUNE_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Maximum number of nested dispatch requests below a top-level batch.
    pub max_dispatch_depth: u32,
    /// Upper bound on grants removed by a single `prune_expired` call.
    pub prune_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
            prune_limit: DEFAULT_PRUNE_LIMIT,
        }
    }
}

impl KernelConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, KernelError> {
        let config: KernelConfig =
            serde_json::from_str(raw).map_err(|err| KernelError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| KernelError::Config(format!("read {}: {err}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        if self.max_dispatch_depth == 0 || self.max_dispatch_depth > MAX_DISPATCH_DEPTH_CEILING {
            return Err(KernelError::Config(format!(
                "max_dispatch_depth must be within 1..={MAX_DISPATCH_DEPTH_CEILING}, got {}",
                self.max_dispatch_depth
            )));
        }
        if self.prune_limit == 0 {
            return Err(KernelError::Config("prune_limit must be positive".into()));
        }
        Ok(())
    }
}
