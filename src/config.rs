//! Kernel configuration (SPEC_FULL §5 ambient Configuration).
//!
//! `KernelConfig`/`KernelConfigBuilder` follow the validate-then-build
//! builder shape of `registry::ModuleEntryBuilder`: accumulate fields with
//! chained setters, collect validation errors instead of failing eagerly,
//! and only surface them from `build()`.

use crate::layout::{validate_layout, ARENA_SIZE_DEFAULT};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub arena_size: usize,
    pub router_channel_capacity: usize,
    pub mesh_delegation_deadline: Duration,
    pub hot_path_checks: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            arena_size: ARENA_SIZE_DEFAULT,
            router_channel_capacity: 256,
            mesh_delegation_deadline: Duration::from_millis(50),
            hot_path_checks: cfg!(feature = "hot-path-checks"),
        }
    }
}

pub struct KernelConfigBuilder {
    config: KernelConfig,
    validation_errors: Vec<String>,
}

impl KernelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            validation_errors: Vec::new(),
        }
    }

    pub fn arena_size(mut self, size: usize) -> Self {
        self.config.arena_size = size;
        self
    }

    pub fn router_channel_capacity(mut self, capacity: usize) -> Self {
        if capacity == 0 {
            self.validation_errors.push("router_channel_capacity cannot be 0".to_string());
        }
        self.config.router_channel_capacity = capacity;
        self
    }

    pub fn mesh_delegation_deadline(mut self, deadline: Duration) -> Self {
        self.config.mesh_delegation_deadline = deadline;
        self
    }

    pub fn hot_path_checks(mut self, enabled: bool) -> Self {
        self.config.hot_path_checks = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.validation_errors.clone();
        if let Err(e) = validate_layout(self.config.arena_size) {
            errors.push(e.to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn build(self) -> Result<KernelConfig, Vec<String>> {
        self.validate()?;
        Ok(self.config)
    }
}

impl Default for KernelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = KernelConfigBuilder::new().build().unwrap();
        assert_eq!(config.arena_size, ARENA_SIZE_DEFAULT);
    }

    #[test]
    fn undersized_arena_is_rejected() {
        let result = KernelConfigBuilder::new().arena_size(16).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let result = KernelConfigBuilder::new().router_channel_capacity(0).build();
        assert!(result.is_err());
    }
}
