//! Architecture and firmware facts of the target system

use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
    Riscv64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Aarch64 => write!(f, "aarch64"),
            Self::Ppc64le => write!(f, "ppc64le"),
            Self::S390x => write!(f, "s390x"),
            Self::Riscv64 => write!(f, "riscv64"),
        }
    }
}

/// Device registered for a secure key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureKeyVolume {
    /// Block device name, e.g. /dev/dasdb1
    pub device: String,
    /// Mapper name recorded for the device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_name: Option<String>,
}

/// Entry of the CCA secure key repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureKey {
    pub name: String,
    #[serde(default)]
    pub volumes: Vec<SecureKeyVolume>,
}

impl SecureKey {
    /// Volume entry registered for a device, if any
    pub fn volume_for(&self, device: &str) -> Option<&SecureKeyVolume> {
        self.volumes.iter().find(|v| v.device == device)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFacts {
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub efi_boot: bool,
    /// PowerPC bare metal (OPAL firmware)
    #[serde(default)]
    pub power_nv: bool,
    /// Device tree identifies a Raspberry Pi
    #[serde(default)]
    pub raspberry_pi: bool,
    #[serde(default = "default_ram")]
    pub ram_size: DiskSize,
    #[serde(default)]
    pub tpm_available: bool,
    /// CCA coprocessor for pervasive encryption
    #[serde(default)]
    pub secure_key_support: bool,
    #[serde(default)]
    pub secure_keys: Vec<SecureKey>,
}

fn default_ram() -> DiskSize {
    DiskSize::gib(4)
}

impl Default for SystemFacts {
    fn default() -> Self {
        Self {
            architecture: Architecture::X86_64,
            efi_boot: true,
            power_nv: false,
            raspberry_pi: false,
            ram_size: default_ram(),
            tpm_available: false,
            secure_key_support: false,
            secure_keys: Vec::new(),
        }
    }
}

impl SystemFacts {
    /// Firmware boots through an EFI system partition
    pub fn uses_esp(&self) -> bool {
        match self.architecture {
            Architecture::X86_64 => self.efi_boot,
            Architecture::Aarch64 | Architecture::Riscv64 => true,
            Architecture::Ppc64le | Architecture::S390x => false,
        }
    }

    pub fn is_raspberry_pi(&self) -> bool {
        self.architecture == Architecture::Aarch64 && self.raspberry_pi
    }
}
