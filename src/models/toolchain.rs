use crate::models::abi::Abi;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Environment overrides applied on top of the process environment.
pub type Environment = IndexMap<String, String>;

/// A known compiler toolchain.
///
/// Query tools linked against a compiler runtime (MinGW DLLs, sysroot loaders)
/// sometimes only run inside that toolchain's environment, so the invoker
/// retries with each toolchain's variables merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    pub target_abi: Abi,
    #[serde(default)]
    pub environment: Environment,
}

impl Toolchain {
    pub fn new(name: impl Into<String>, target_abi: Abi) -> Self {
        Self {
            name: name.into(),
            target_abi,
            environment: Environment::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Merge `overrides` over `base`, later keys winning.
pub fn merged_environment(base: &Environment, overrides: &Environment) -> Environment {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
