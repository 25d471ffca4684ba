//! Scenario files: settings, system facts and probed devices in one TOML file

use crate::devicegraph::device::{FsType, PartitionId, PartitionTableType, PartitionType};
use crate::devicegraph::fixture::{DevicesFixture, DiskFixture, FsFixture, PartitionFixture, ResizeFixture};
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::engine::{GuidedProposal, ProposalResult};
use crate::proposal::facts::SystemFacts;
use crate::proposal::settings::ProposalSettings;
use crate::utils::error::{Result, ScenarioError};
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub settings: ProposalSettings,
    #[serde(default)]
    pub facts: SystemFacts,
    #[serde(default)]
    pub devices: DevicesFixture,
}

impl Scenario {
    /// Load a scenario from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let scenario = Self::from_toml(&content)?;
        info!("Loaded scenario from {}", path.as_ref().display());
        Ok(scenario)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Probed devicegraph described by the scenario
    pub fn probed(&self) -> Result<DeviceGraph> {
        DeviceGraph::from_fixture(&self.devices)
    }

    /// Run the guided proposal on the scenario
    pub fn propose(&self) -> Result<ProposalResult> {
        let probed = self.probed()?;
        GuidedProposal::new(&self.settings, &self.facts, &probed).propose()
    }

    /// A laptop-like system: one disk with Windows and some free space
    pub fn sample() -> Self {
        let esp = PartitionFixture {
            size: DiskSize::mib(260),
            start: None,
            id: PartitionId::Esp,
            kind: PartitionType::Primary,
            resize: None,
            encryption: None,
            filesystem: Some(FsFixture {
                fs_type: FsType::Vfat,
                label: None,
                uuid: None,
                windows_system: false,
                rpi_firmware: false,
                mount_point: None,
            }),
            pv: None,
            md: None,
            btrfs: None,
        };
        let windows = PartitionFixture {
            size: DiskSize::gib(200),
            start: None,
            id: PartitionId::WindowsBasicData,
            kind: PartitionType::Primary,
            resize: Some(ResizeFixture {
                resize_ok: true,
                min_size: DiskSize::gib(80),
                max_size: None,
            }),
            encryption: None,
            filesystem: Some(FsFixture {
                fs_type: FsType::Ntfs,
                label: Some("Windows".to_string()),
                uuid: None,
                windows_system: true,
                rpi_firmware: false,
                mount_point: None,
            }),
            pv: None,
            md: None,
            btrfs: None,
        };

        Scenario {
            settings: ProposalSettings::default(),
            facts: SystemFacts::default(),
            devices: DevicesFixture {
                disks: vec![DiskFixture {
                    name: "/dev/nvme0n1".to_string(),
                    size: DiskSize::gib(256),
                    ptable: Some(PartitionTableType::Gpt),
                    grain: None,
                    dasd: None,
                    udev_paths: vec!["pci-0000:02:00.0-nvme-1".to_string()],
                    filesystem: None,
                    partitions: vec![esp, windows],
                }],
                ..Default::default()
            },
        }
    }

    /// Check the scenario before running a proposal on it
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        if self.devices.disks.is_empty() {
            return Err(ScenarioError::Invalid("the scenario has no disks".to_string()).into());
        }
        let mut names = BTreeSet::new();
        for disk in &self.devices.disks {
            if !names.insert(disk.name.as_str()) {
                return Err(ScenarioError::Invalid(format!("disk {} listed twice", disk.name)).into());
            }
        }
        for name in self
            .settings
            .candidate_devices
            .iter()
            .chain(self.settings.root_device.iter())
        {
            if !names.contains(name.as_str()) {
                return Err(ScenarioError::Invalid(format!("{} is not a disk of the scenario", name)).into());
            }
        }
        if self.facts.ram_size.is_zero() {
            return Err(ScenarioError::Invalid("RAM size must not be zero".to_string()).into());
        }

        self.probed()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ProposalError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn sample_is_valid() {
        Scenario::sample().validate().unwrap();
    }

    #[test]
    fn sample_round_trips_through_a_file() {
        let file = NamedTempFile::new().unwrap();
        Scenario::sample().save(file.path()).unwrap();

        let loaded = Scenario::from_file(file.path()).unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.devices.disks.len(), 1);
        assert_eq!(loaded.devices.disks[0].partitions.len(), 2);
        assert_eq!(loaded.settings, ProposalSettings::default());
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[devices.disks]]
name = "/dev/sda"
size = "100 GiB"
"#
        )
        .unwrap();

        let scenario = Scenario::from_file(file.path()).unwrap();
        scenario.validate().unwrap();
        assert_eq!(scenario.devices.disks[0].size, DiskSize::gib(100));
        assert!(!scenario.settings.volumes.is_empty());
    }

    #[test]
    fn unknown_candidate_is_rejected() {
        let mut scenario = Scenario::sample();
        scenario.settings.candidate_devices = vec!["/dev/sdx".to_string()];
        let err = scenario.validate().unwrap_err();
        assert!(matches!(err, ProposalError::Scenario(ScenarioError::Invalid(_))));
    }

    #[test]
    fn broken_toml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[settings\nlvm = true").unwrap();
        assert!(matches!(
            Scenario::from_file(file.path()),
            Err(ProposalError::TomlParse(_))
        ));
    }

    #[test]
    fn sample_gets_a_proposal() {
        let result = Scenario::sample().propose().unwrap();
        assert!(!result.failed);
        assert!(result.devices.is_some());
    }
}
