//! End-to-end proposals computed from scenario files

use storage_proposal::devicegraph::device::{BtrfsRaidLevel, Device, FsType, PartitionId, Sid};
use storage_proposal::space::PlannedAction;
use storage_proposal::utils::error::{BootRequirementsError, ProposalError};
use storage_proposal::volumes::spec::SWAP_MOUNT;
use storage_proposal::{DeviceGraph, ProposalResult, Scenario};

fn propose(toml: &str) -> ProposalResult {
    let scenario = Scenario::from_toml(toml).unwrap();
    scenario.validate().unwrap();
    scenario.propose().unwrap()
}

fn mount_path(graph: &DeviceGraph, blk: &str) -> Option<String> {
    let sid = graph.find_by_name(blk)?;
    let fs = graph.formatted_as(sid)?;
    match graph.device(graph.mount_point_of(fs)?) {
        Some(Device::MountPoint(mp)) => Some(mp.path.clone()),
        _ => None,
    }
}

fn partitions_with_id(graph: &DeviceGraph, id: PartitionId) -> Vec<Sid> {
    graph
        .sids()
        .into_iter()
        .filter(|sid| graph.partition(*sid).map(|p| p.id) == Some(id))
        .collect()
}

const ROOT_ONLY: &str = r#"
[[settings.volumes]]
mount_point = "/"
fs_type = "ext4"
min_size = "10 GiB"
desired_size = "20 GiB"
"#;

fn esp_scenario(esp_size: &str) -> String {
    format!(
        r#"
{ROOT_ONLY}
[[devices.disks]]
name = "/dev/sda"
size = "100 GiB"
ptable = "gpt"

[[devices.disks.partitions]]
size = "{esp_size}"
id = "esp"
filesystem = {{ type = "vfat" }}
"#
    )
}

#[test]
fn small_esp_is_reused() {
    let result = propose(&esp_scenario("33 MiB"));
    assert!(!result.failed);

    let graph = result.devices.unwrap();
    assert_eq!(mount_path(&graph, "/dev/sda1").as_deref(), Some("/boot/efi"));
    assert_eq!(partitions_with_id(&graph, PartitionId::Esp).len(), 1);
}

#[test]
fn oversized_esp_is_not_reused() {
    let result = propose(&esp_scenario("501 MiB"));
    assert!(!result.failed);
    assert!(!result.issues.matching("was not reused").is_empty());

    let graph = result.devices.unwrap();
    assert_eq!(mount_path(&graph, "/dev/sda1"), None);
    assert_eq!(partitions_with_id(&graph, PartitionId::Esp).len(), 2);
}

#[test]
fn legacy_boot_on_gpt_gets_one_bios_boot_partition() {
    let toml = format!(
        r#"
{ROOT_ONLY}
[facts]
efi_boot = false

[[devices.disks]]
name = "/dev/sda"
size = "100 GiB"
ptable = "gpt"
"#
    );
    let graph = propose(&toml).devices.unwrap();
    assert_eq!(partitions_with_id(&graph, PartitionId::BiosBoot).len(), 1);
    assert!(partitions_with_id(&graph, PartitionId::Esp).is_empty());
}

#[test]
fn ldl_dasd_is_fatal() {
    let toml = format!(
        r#"
{ROOT_ONLY}
[facts]
architecture = "s390x"
efi_boot = false

[[devices.disks]]
name = "/dev/dasda"
size = "20 GiB"
dasd = {{ type = "eckd", format = "ldl" }}
"#
    );
    let scenario = Scenario::from_toml(&toml).unwrap();
    let err = scenario.propose().unwrap_err();
    assert!(matches!(
        err,
        ProposalError::BootRequirements(BootRequirementsError::LdlDasd { .. })
    ));
}

#[test]
fn swap_closest_to_desired_size_is_reused() {
    let toml = format!(
        r#"
{ROOT_ONLY}
[[settings.volumes]]
mount_point = "swap"
fs_type = "swap"
min_size = "500 MiB"
desired_size = "1 GiB"
max_size = "2 GiB"
partition_id = "swap"

[[devices.disks]]
name = "/dev/sda"
size = "100 GiB"
ptable = "gpt"

[[devices.disks.partitions]]
size = "500 MiB"
id = "swap"
filesystem = {{ type = "swap" }}

[[devices.disks.partitions]]
size = "1 GiB"
id = "swap"
filesystem = {{ type = "swap" }}
"#
    );
    let graph = propose(&toml).devices.unwrap();
    assert_eq!(mount_path(&graph, "/dev/sda2").as_deref(), Some(SWAP_MOUNT));
    assert_eq!(mount_path(&graph, "/dev/sda1"), None);
    assert_eq!(partitions_with_id(&graph, PartitionId::Swap).len(), 2);
}

#[test]
fn btrfs_spans_two_disks() {
    let toml = r#"
[settings]
candidate_devices = ["/dev/sda", "/dev/sdb"]

[[settings.volumes]]
mount_point = "/"
fs_type = "btrfs"
min_size = "10 GiB"
desired_size = "20 GiB"
btrfs = { devices = ["/dev/sda", "/dev/sdb"], data_raid_level = "single", metadata_raid_level = "raid10" }

[[devices.disks]]
name = "/dev/sda"
size = "50 GiB"
ptable = "gpt"

[[devices.disks]]
name = "/dev/sdb"
size = "50 GiB"
ptable = "gpt"
"#;
    let result = propose(toml);
    assert!(!result.failed);
    let graph = result.devices.unwrap();

    let btrfs: Vec<Sid> = graph
        .sids()
        .into_iter()
        .filter(|sid| matches!(graph.filesystem(*sid), Some(fs) if fs.fs_type == FsType::Btrfs))
        .collect();
    assert_eq!(btrfs.len(), 1);

    let fs = graph.filesystem(btrfs[0]).unwrap();
    assert_eq!(fs.data_raid_level, Some(BtrfsRaidLevel::Single));
    assert_eq!(fs.metadata_raid_level, Some(BtrfsRaidLevel::Raid10));

    let mut disks: Vec<String> = graph
        .blk_devices_of(btrfs[0])
        .into_iter()
        .flat_map(|blk| graph.disks_of(blk))
        .map(|disk| graph.display_name(disk))
        .collect();
    disks.sort();
    assert_eq!(disks, vec!["/dev/sda", "/dev/sdb"]);
}

fn crowded_disk(other_delete_mode: &str) -> String {
    format!(
        r#"
[settings]
other_delete_mode = "{other_delete_mode}"

{ROOT_ONLY}
[[devices.disks]]
name = "/dev/sda"
size = "40 GiB"
ptable = "gpt"

[[devices.disks.partitions]]
size = "35 GiB"
id = "unknown"
"#
    )
}

#[test]
fn partitions_protected_by_policy_are_never_deleted() {
    let result = propose(&crowded_disk("none"));
    assert!(result.failed);
    assert!(result.devices.is_none());
    assert!(result.issues.has_errors());
}

#[test]
fn partitions_are_deleted_on_demand() {
    let result = propose(&crowded_disk("on_demand"));
    assert!(!result.failed);
    assert!(result
        .actions
        .iter()
        .any(|a| matches!(a, PlannedAction::Delete { name, .. } if name == "/dev/sda1")));
}

#[test]
fn unneeded_partitions_survive() {
    let toml = format!(
        r#"
[settings]
other_delete_mode = "on_demand"

{ROOT_ONLY}
[[devices.disks]]
name = "/dev/sda"
size = "100 GiB"
ptable = "gpt"

[[devices.disks.partitions]]
size = "20 GiB"
id = "unknown"
"#
    );
    let result = propose(&toml);
    assert!(!result.failed);
    assert!(!result
        .actions
        .iter()
        .any(|a| matches!(a, PlannedAction::Delete { .. })));
    let graph = result.devices.unwrap();
    let sda1 = graph.find_by_name("/dev/sda1").unwrap();
    assert_eq!(graph.partition(sda1).unwrap().id, PartitionId::Unknown);
}

#[test]
fn proposals_are_deterministic() {
    let scenario = Scenario::sample();
    let first = scenario.propose().unwrap();
    let second = scenario.propose().unwrap();

    assert_eq!(first.attempts, second.attempts);
    assert_eq!(first.actions, second.actions);
    assert_eq!(first.issues, second.issues);
    assert_eq!(
        first.devices.map(|g| g.description()),
        second.devices.map(|g| g.description())
    );
}
