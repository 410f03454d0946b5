//! Target GPU architectures and evaluation devices.
//!
//! The architecture list is explicit configuration carried by each
//! request and threaded into the build call. It is never written to the
//! harness process environment, so concurrent evaluations targeting
//! different architectures cannot race.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::EvalError;

/// A named NVIDIA GPU architecture family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuArch {
    Maxwell,
    Pascal,
    Volta,
    Turing,
    Ampere,
    Hopper,
    Ada,
}

impl GpuArch {
    pub const ALL: [GpuArch; 7] = [
        GpuArch::Maxwell,
        GpuArch::Pascal,
        GpuArch::Volta,
        GpuArch::Turing,
        GpuArch::Ampere,
        GpuArch::Hopper,
        GpuArch::Ada,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GpuArch::Maxwell => "Maxwell",
            GpuArch::Pascal => "Pascal",
            GpuArch::Volta => "Volta",
            GpuArch::Turing => "Turing",
            GpuArch::Ampere => "Ampere",
            GpuArch::Hopper => "Hopper",
            GpuArch::Ada => "Ada",
        }
    }
}

impl fmt::Display for GpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GpuArch {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GpuArch::ALL
            .iter()
            .copied()
            .find(|arch| arch.name() == s.trim())
            .ok_or_else(|| EvalError::InvalidArch {
                name: s.to_string(),
                valid: GpuArch::ALL
                    .iter()
                    .map(GpuArch::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Parse a comma-separated architecture list, e.g. `"Ada,Hopper"`.
pub fn parse_arch_list(s: &str) -> Result<Vec<GpuArch>, EvalError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// `;`-joined list in the form toolchains expect in `TORCH_CUDA_ARCH_LIST`.
pub fn arch_list_string(archs: &[GpuArch]) -> String {
    archs
        .iter()
        .map(GpuArch::name)
        .collect::<Vec<_>>()
        .join(";")
}

/// Identifier of the device evaluations run on (`cpu`, `cuda:0`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn cpu() -> Self {
        Self("cpu".to_string())
    }

    pub fn cuda(index: u32) -> Self {
        Self(format!("cuda:{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cpu(&self) -> bool {
        self.0 == "cpu"
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "cpu" {
            return Ok(Self::cpu());
        }
        match s.strip_prefix("cuda:").map(str::parse::<u32>) {
            Some(Ok(index)) => Ok(Self::cuda(index)),
            _ if s == "cuda" => Ok(Self::cuda(0)),
            _ => Err(EvalError::InvalidDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceId {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_arch() {
        assert_eq!("Ada".parse::<GpuArch>().unwrap(), GpuArch::Ada);
        assert_eq!(" Hopper ".parse::<GpuArch>().unwrap(), GpuArch::Hopper);
    }

    #[test]
    fn test_parse_invalid_arch_rejected() {
        let err = "Blackwell".parse::<GpuArch>().unwrap_err();
        assert!(matches!(err, EvalError::InvalidArch { .. }));
    }

    #[test]
    fn test_parse_arch_list() {
        let archs = parse_arch_list("Ada,Hopper").unwrap();
        assert_eq!(archs, vec![GpuArch::Ada, GpuArch::Hopper]);
        assert_eq!(arch_list_string(&archs), "Ada;Hopper");
        assert!(parse_arch_list("Ada,Nope").is_err());
    }

    #[test]
    fn test_device_parse() {
        assert!("cpu".parse::<DeviceId>().unwrap().is_cpu());
        assert_eq!("cuda:1".parse::<DeviceId>().unwrap(), DeviceId::cuda(1));
        assert_eq!("cuda".parse::<DeviceId>().unwrap(), DeviceId::cuda(0));
        assert!("tpu:0".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_device_serde_validates() {
        let d: DeviceId = serde_json::from_str("\"cuda:0\"").unwrap();
        assert_eq!(d.as_str(), "cuda:0");
        assert!(serde_json::from_str::<DeviceId>("\"gpu\"").is_err());
    }
}
