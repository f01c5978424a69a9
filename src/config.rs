use std::{
    env,
    path::{Path, PathBuf},
};

use crate::types::error::{DatabaseError, Result};

/// Path list of directories the operator may read from and write to.
pub const ALLOWED_DIRS_VAR: &str = "PDB_FORENSICS_ALLOWED_DIRS";
/// Fixed corruptor seed, for reproducible damage.
pub const SEED_VAR: &str = "PDB_FORENSICS_SEED";
pub const HISTORY_FILE: &str = ".pdbforensics_history";

/// Runtime settings for the operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForensicsConfig {
    pub allowed_dirs: Vec<PathBuf>,
    pub seed: Option<u64>,
    pub history_file: PathBuf,
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        let allowed_dirs = env::current_dir()
            .map(|dir| vec![dir])
            .unwrap_or_else(|_| vec![PathBuf::from(".")]);
        Self {
            allowed_dirs,
            seed: None,
            history_file: PathBuf::from(HISTORY_FILE),
        }
    }
}

impl ForensicsConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        let dirs = env::var_os(ALLOWED_DIRS_VAR);
        let seed = env::var(SEED_VAR).ok();
        let mut config = Self::from_values(None, seed.as_deref())?;
        if let Some(dirs) = dirs {
            let parsed: Vec<PathBuf> = env::split_paths(&dirs).filter(|dir| !dir.as_os_str().is_empty()).collect();
            if !parsed.is_empty() {
                config.allowed_dirs = parsed;
            }
        }
        Ok(config)
    }

    /// Build from raw setting values, as they would appear in the
    /// environment. `allowed_dirs` is a platform path list.
    pub fn from_values(allowed_dirs: Option<&str>, seed: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(dirs) = allowed_dirs {
            let parsed: Vec<PathBuf> = env::split_paths(dirs).filter(|dir| !dir.as_os_str().is_empty()).collect();
            if !parsed.is_empty() {
                config.allowed_dirs = parsed;
            }
        }
        if let Some(seed) = seed.map(str::trim).filter(|seed| !seed.is_empty()) {
            let parsed = seed.parse::<u64>().map_err(|_| DatabaseError::InvalidRequest {
                details: format!("{} must be an unsigned integer, got {:?}", SEED_VAR, seed),
            })?;
            config.seed = Some(parsed);
        }
        Ok(config)
    }

    pub fn with_allowed_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.allowed_dirs = vec![dir.as_ref().to_path_buf()];
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
