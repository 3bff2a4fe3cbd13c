//! Fixed unit catalogue (spec §4.9, §9).
//!
//! `Unit` and `ResourceLimits` are ported from the teacher's
//! `compute::engine::UnitProxy` / `ResourceLimits` (async-trait dispatch
//! target, per-kind resource ceilings). The teacher instantiated concrete
//! units per deployed WASM module; this kernel's unit catalogue is a fixed,
//! closed set of kinds the spec names, each a thin stub a host embeds real
//! compute behavior behind. Boids, Analytics, Data, and GPU are always
//! instantiated; everything else is created on first use, and an unknown
//! capability id falls back to [`GenericUnit`].

use crate::error::ExecutionError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_input_size: usize,
    pub max_output_size: usize,
    pub timeout_ms: u64,
    pub max_fuel: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_input_size: 8 * 1024 * 1024,
            max_output_size: 8 * 1024 * 1024,
            timeout_ms: 5_000,
            max_fuel: 10_000_000,
        }
    }
}

impl ResourceLimits {
    pub fn for_image() -> Self {
        Self {
            max_input_size: 32 * 1024 * 1024,
            max_output_size: 32 * 1024 * 1024,
            timeout_ms: 15_000,
            max_fuel: 200_000_000,
        }
    }

    pub fn for_crypto() -> Self {
        Self {
            max_input_size: 4 * 1024 * 1024,
            max_output_size: 1024 * 1024,
            timeout_ms: 2_000,
            max_fuel: 20_000_000,
        }
    }

    pub fn for_audio() -> Self {
        Self {
            max_input_size: 16 * 1024 * 1024,
            max_output_size: 16 * 1024 * 1024,
            timeout_ms: 10_000,
            max_fuel: 100_000_000,
        }
    }

    pub fn for_boids() -> Self {
        Self {
            max_input_size: 1024 * 1024,
            max_output_size: 1024 * 1024,
            timeout_ms: 1_000,
            max_fuel: 5_000_000,
        }
    }
}

/// A dispatch target for capability-routed jobs (spec §4.9). Matches the
/// teacher's `UnitProxy` shape: a name, the operations it understands, and
/// an async `execute`.
/// `"echo"` is accepted by every unit regardless of `operations()`: a
/// universal round-trip health check (spec §8 scenario 2).
#[async_trait]
pub trait Unit: Send + Sync {
    fn capability(&self) -> &str;
    fn operations(&self) -> &[&str];
    fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits::default()
    }
    async fn execute(&self, operation: &str, payload: &[u8]) -> Result<Vec<u8>, ExecutionError>;
}

/// A capability stub: validates the operation is one it claims to support,
/// then echoes the payload back. Real deployments register a unit with
/// actual compute behind the same capability name; this crate's job is
/// routing and lifecycle, not the compute kernels themselves (spec
/// Non-goals: "ML inference units").
pub struct StubUnit {
    capability: &'static str,
    operations: &'static [&'static str],
    limits: ResourceLimits,
}

impl StubUnit {
    pub fn new(capability: &'static str, operations: &'static [&'static str], limits: ResourceLimits) -> Self {
        Self {
            capability,
            operations,
            limits,
        }
    }
}

#[async_trait]
impl Unit for StubUnit {
    fn capability(&self) -> &str {
        self.capability
    }

    fn operations(&self) -> &[&str] {
        self.operations
    }

    fn resource_limits(&self) -> ResourceLimits {
        self.limits
    }

    async fn execute(&self, operation: &str, payload: &[u8]) -> Result<Vec<u8>, ExecutionError> {
        if operation != "echo" && !self.operations.contains(&operation) {
            return Err(ExecutionError::UnsupportedOperation {
                unit: self.capability.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(payload.to_vec())
    }
}

/// Fallback for capability ids outside the fixed catalogue: forwards the
/// payload unchanged for any operation whose name starts with `"forward:"`,
/// otherwise reports it unsupported (spec §9 "unknown ids get generic
/// forwarding/UnsupportedOperation fallback").
pub struct GenericUnit {
    capability: String,
}

impl GenericUnit {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl Unit for GenericUnit {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn operations(&self) -> &[&str] {
        &[]
    }

    async fn execute(&self, operation: &str, payload: &[u8]) -> Result<Vec<u8>, ExecutionError> {
        if operation == "echo" || operation.strip_prefix("forward:").is_some() {
            return Ok(payload.to_vec());
        }
        Err(ExecutionError::UnsupportedOperation {
            unit: self.capability.clone(),
            operation: operation.to_string(),
        })
    }
}

pub fn by_id(id: &str) -> Box<dyn Unit> {
    match id {
        "storage" => Box::new(StubUnit::new("storage", &["get", "put", "delete"], ResourceLimits::default())),
        "gpu" => Box::new(StubUnit::new("gpu", &["compute", "render"], ResourceLimits::for_image())),
        "audio" => Box::new(StubUnit::new("audio", &["encode", "decode", "mix"], ResourceLimits::for_audio())),
        "image" => Box::new(StubUnit::new("image", &["resize", "encode", "decode"], ResourceLimits::for_image())),
        "crypto" => Box::new(StubUnit::new("crypto", &["hash", "sign", "verify"], ResourceLimits::for_crypto())),
        "data" => Box::new(StubUnit::new("data", &["transform", "aggregate"], ResourceLimits::default())),
        "boids" => Box::new(StubUnit::new("boids", &["step", "reset"], ResourceLimits::for_boids())),
        "driver" => Box::new(StubUnit::new("driver", &["probe", "io"], ResourceLimits::default())),
        "identity" => Box::new(StubUnit::new("identity", &["rotate_key", "attest"], ResourceLimits::for_crypto())),
        "analytics" => Box::new(StubUnit::new("analytics", &["aggregate", "report"], ResourceLimits::default())),
        other => Box::new(GenericUnit::new(other)),
    }
}

/// The units a supervisor instantiates unconditionally at boot (spec §9),
/// driven by the same fixed catalogue the registry-scan unit loader uses.
pub fn always_instantiated() -> Vec<Box<dyn Unit>> {
    crate::registry::catalogue::ALWAYS_INSTANTIATED.iter().map(|id| by_id(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_unit_rejects_unknown_operation() {
        let unit = by_id("crypto");
        let result = unit.execute("teleport", b"x").await;
        assert!(matches!(result, Err(ExecutionError::UnsupportedOperation { .. })));
    }

    #[tokio::test]
    async fn stub_unit_echoes_known_operation() {
        let unit = by_id("crypto");
        let result = unit.execute("hash", b"payload").await.unwrap();
        assert_eq!(result, b"payload");
    }

    #[tokio::test]
    async fn generic_unit_forwards_prefixed_operations() {
        let unit = by_id("weather");
        let result = unit.execute("forward:somewhere", b"data").await.unwrap();
        assert_eq!(result, b"data");
        assert!(unit.execute("other", b"data").await.is_err());
    }

    #[test]
    fn always_instantiated_covers_the_fixed_four() {
        let units = always_instantiated();
        let caps: Vec<&str> = units.iter().map(|u| u.capability()).collect();
        assert!(caps.contains(&"boids"));
        assert!(caps.contains(&"analytics"));
        assert!(caps.contains(&"data"));
        assert!(caps.contains(&"gpu"));
    }
}
