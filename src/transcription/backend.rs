//! Transcription engine trait and option types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Where the model runs. `Cpu` is the fallback target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub const FALLBACK: Device = Device::Cpu;

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    /// Best available target: CUDA when the NVIDIA driver tools are installed.
    pub fn detect() -> Device {
        if which::which("nvidia-smi").is_ok() {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }

    /// Parse a user-supplied device. `auto` or nothing selects `auto`, the
    /// [`Device::detect`] result taken once at start-up.
    pub fn resolve(requested: Option<&str>, auto: Device) -> Result<Device, String> {
        match requested.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("auto") => Ok(auto),
            Some("cpu") => Ok(Device::Cpu),
            Some("cuda") | Some("gpu") => Ok(Device::Cuda),
            Some(other) => Err(format!("Unknown device: {} (expected cpu, cuda or auto)", other)),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision requested for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeType {
    #[default]
    Float32,
    Float16,
}

impl ComputeType {
    pub fn parse(value: Option<&str>) -> Result<ComputeType, String> {
        match value.map(str::trim).unwrap_or("") {
            "" | "float32" => Ok(ComputeType::Float32),
            "float16" => Ok(ComputeType::Float16),
            other => Err(format!("Unknown compute type: {} (expected float32 or float16)", other)),
        }
    }

    pub fn fp16(self) -> bool {
        self == ComputeType::Float16
    }
}

/// An engine that can produce models for a device.
pub trait TranscriptionEngine: Send + Sync {
    fn id(&self) -> &'static str;

    /// Blocking. May download weights.
    fn load_model(&self, name: &str, device: Device) -> Result<Arc<dyn LoadedModel>, String>;
}

/// A model ready to transcribe files.
pub trait LoadedModel: Send + Sync {
    fn name(&self) -> &str;
    fn device(&self) -> Device;

    /// Blocking. Human-readable progress output goes to `progress`; the
    /// transcript text is returned.
    fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        fp16: bool,
        progress: &mut dyn Write,
    ) -> Result<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_devices_parse() {
        assert_eq!(Device::resolve(Some("cpu"), Device::Cuda), Ok(Device::Cpu));
        assert_eq!(Device::resolve(Some(" CUDA "), Device::Cpu), Ok(Device::Cuda));
        assert!(Device::resolve(Some("tpu"), Device::Cpu).is_err());
    }

    #[test]
    fn auto_uses_the_detected_device() {
        assert_eq!(Device::resolve(None, Device::Cuda), Ok(Device::Cuda));
        assert_eq!(Device::resolve(Some("auto"), Device::Cpu), Ok(Device::Cpu));
        assert_eq!(Device::resolve(Some(""), Device::Cuda), Ok(Device::Cuda));
    }

    #[test]
    fn compute_type_maps_to_precision_flag() {
        assert!(!ComputeType::parse(None).unwrap().fp16());
        assert!(ComputeType::parse(Some("float16")).unwrap().fp16());
        assert!(ComputeType::parse(Some("int8")).is_err());
    }
}
