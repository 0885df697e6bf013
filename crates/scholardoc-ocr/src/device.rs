//! Compute device selection: CUDA > MPS > CPU priority with validation.
//!
//! The actual availability and validation checks require a GPU runtime
//! binding (CUDA/MPS), which this crate does not own — that capability is
//! delegated to whatever implements [`DeviceProbe`], normally the Engine-B
//! wrapper. This module owns only the priority and fallback-tracking logic.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Compute device kinds the pipeline can dispatch Engine-B to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cuda,
    Mps,
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceType::Cuda => "cuda",
            DeviceType::Mps => "mps",
            DeviceType::Cpu => "cpu",
        };
        write!(f, "{s}")
    }
}

/// Outcome of device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub device_name: String,
    pub validated: bool,
    pub fallback_from: Option<DeviceType>,
}

/// Capability probe for GPU runtime availability and validation, owned by
/// whatever collaborator links the actual GPU bindings.
pub trait DeviceProbe {
    fn cuda_available(&self) -> bool;
    fn cuda_device_name(&self) -> String;
    fn mps_built(&self) -> bool;
    fn mps_available(&self) -> bool;
    /// Allocate a small test tensor on `device_str` ("cuda"/"mps") to confirm
    /// the runtime actually works, not just that it claims to be present.
    fn validate(&self, device_str: &str) -> bool;
}

/// A probe that reports no GPU runtime available, for CPU-only environments
/// and for tests that don't want to fake GPU behavior.
pub struct NoGpuProbe;

impl DeviceProbe for NoGpuProbe {
    fn cuda_available(&self) -> bool {
        false
    }
    fn cuda_device_name(&self) -> String {
        String::new()
    }
    fn mps_built(&self) -> bool {
        false
    }
    fn mps_available(&self) -> bool {
        false
    }
    fn validate(&self, _device_str: &str) -> bool {
        false
    }
}

/// Select the best available device in CUDA > MPS > CPU priority order,
/// validating each candidate and falling through to the next on failure.
pub fn detect_device(probe: &dyn DeviceProbe) -> DeviceInfo {
    let mut fallback_from: Option<DeviceType> = None;

    if probe.cuda_available() {
        if probe.validate("cuda") {
            let name = probe.cuda_device_name();
            info!(device = "cuda", %name, "selected compute device");
            return DeviceInfo {
                device_type: DeviceType::Cuda,
                device_name: name,
                validated: true,
                fallback_from: None,
            };
        }
        fallback_from = Some(DeviceType::Cuda);
    }

    if !probe.mps_built() {
        debug!("mps not available: runtime not built with mps support");
    } else if !probe.mps_available() {
        debug!("mps not available: no mps device present");
    } else if probe.validate("mps") {
        info!("selected compute device: mps (apple silicon)");
        return DeviceInfo {
            device_type: DeviceType::Mps,
            device_name: "Apple Silicon".to_string(),
            validated: true,
            fallback_from,
        };
    } else if fallback_from.is_none() {
        fallback_from = Some(DeviceType::Mps);
    }

    info!("selected compute device: cpu");
    DeviceInfo {
        device_type: DeviceType::Cpu,
        device_name: "cpu".to_string(),
        validated: true,
        fallback_from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        cuda: bool,
        cuda_valid: bool,
        mps_built: bool,
        mps: bool,
        mps_valid: bool,
    }

    impl DeviceProbe for FakeProbe {
        fn cuda_available(&self) -> bool {
            self.cuda
        }
        fn cuda_device_name(&self) -> String {
            "Fake CUDA Device".to_string()
        }
        fn mps_built(&self) -> bool {
            self.mps_built
        }
        fn mps_available(&self) -> bool {
            self.mps
        }
        fn validate(&self, device_str: &str) -> bool {
            match device_str {
                "cuda" => self.cuda_valid,
                "mps" => self.mps_valid,
                _ => false,
            }
        }
    }

    #[test]
    fn cpu_only_environment_falls_back_to_cpu() {
        let info = detect_device(&NoGpuProbe);
        assert_eq!(info.device_type, DeviceType::Cpu);
        assert!(info.fallback_from.is_none());
    }

    #[test]
    fn cuda_is_preferred_when_available_and_valid() {
        let probe = FakeProbe { cuda: true, cuda_valid: true, mps_built: true, mps: true, mps_valid: true };
        let info = detect_device(&probe);
        assert_eq!(info.device_type, DeviceType::Cuda);
    }

    #[test]
    fn failed_cuda_validation_falls_back_to_mps() {
        let probe = FakeProbe { cuda: true, cuda_valid: false, mps_built: true, mps: true, mps_valid: true };
        let info = detect_device(&probe);
        assert_eq!(info.device_type, DeviceType::Mps);
        assert_eq!(info.fallback_from, Some(DeviceType::Cuda));
    }

    #[test]
    fn failed_everything_falls_back_to_cpu_with_reason() {
        let probe = FakeProbe { cuda: true, cuda_valid: false, mps_built: true, mps: true, mps_valid: false };
        let info = detect_device(&probe);
        assert_eq!(info.device_type, DeviceType::Cpu);
        assert_eq!(info.fallback_from, Some(DeviceType::Cuda));
    }
}
