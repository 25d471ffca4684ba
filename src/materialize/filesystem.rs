//! Filesystems and mount points

use super::{create_error, Creation};
use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::utils::error::MaterializeError;
use crate::volumes::planned::Formatting;
use tracing::debug;
use uuid::Uuid;

fn udev_paths<'g>(graph: &'g DeviceGraph, blk: Sid) -> &'g [String] {
    match graph.device(blk) {
        Some(Device::Disk(d)) => &d.udev_paths,
        Some(Device::Partition(p)) => &p.udev_paths,
        _ => &[],
    }
}

/// Mount-by method usable for a filesystem.
///
/// Device-mapper based devices and network filesystems are always mounted by
/// device name. Methods needing data the device does not have fall back to
/// the filesystem UUID.
pub fn resolve_mount_by(graph: &DeviceGraph, fs: Sid, requested: MountBy) -> MountBy {
    let Some(filesystem) = graph.filesystem(fs) else {
        return requested;
    };
    if filesystem.fs_type.is_network() {
        return MountBy::Device;
    }

    let blks = graph.blk_devices_of(fs);
    let mapped = blks
        .iter()
        .any(|b| matches!(graph.device(*b), Some(Device::LvmLv(_) | Device::Encryption(_))));
    if mapped {
        return MountBy::Device;
    }

    match requested {
        MountBy::Path | MountBy::Id if blks.iter().any(|b| udev_paths(graph, *b).is_empty()) => MountBy::Uuid,
        MountBy::Label if filesystem.label.is_none() => MountBy::Uuid,
        other => other,
    }
}

/// Filesystem as described by the planned formatting
pub(super) fn build(format: &Formatting) -> Filesystem {
    let mut fs = Filesystem::new(format.fs_type);
    if format.fs_type.supports_label() {
        fs.label = format.label.clone();
    }
    if format.fs_type == FsType::Btrfs {
        fs.subvolumes = format.subvolumes.clone();
        fs.snapshots = format.snapshots;
    }
    fs
}

/// Create `fs` on `blks` and mount it as planned
pub(super) fn create(
    c: &mut Creation<'_>,
    blks: &[Sid],
    mut fs: Filesystem,
    format: &Formatting,
) -> Result<Sid, MaterializeError> {
    let name = blks
        .first()
        .map(|b| c.graph.display_name(*b))
        .unwrap_or_default();
    let sid = c
        .graph
        .create_filesystem(blks, fs.clone())
        .map_err(|e| create_error(&name, e))?;

    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}:{}", sid, name).as_bytes());
    fs.uuid = Some(uuid.to_string());
    if let Some(created) = c.graph.device_mut(sid).and_then(|d| d.as_filesystem_mut()) {
        created.uuid = fs.uuid.clone();
    }
    debug!("Formatted {} as {} ({})", name, fs.fs_type, uuid);
    c.created.push(sid);

    mount(c, sid, format)?;
    Ok(sid)
}

pub(super) fn format(c: &mut Creation<'_>, blks: &[Sid], format: &Formatting) -> Result<Sid, MaterializeError> {
    create(c, blks, build(format), format)
}

/// Attach the planned mount point to an existing or new filesystem
pub(super) fn mount(c: &mut Creation<'_>, fs: Sid, format: &Formatting) -> Result<(), MaterializeError> {
    let Some(path) = &format.mount_point else {
        return Ok(());
    };
    let requested = format.mount_by.unwrap_or(c.settings.default_mount_by);
    let mount_by = resolve_mount_by(&c.graph, fs, requested);
    if mount_by != requested {
        debug!("Mounting {} by {} instead of {}", path, mount_by, requested);
    }
    let mount_point = MountPoint {
        path: path.clone(),
        mount_by,
        options: format.mount_options.clone(),
    };
    let sid = c
        .graph
        .set_mount_point(fs, mount_point)
        .map_err(|e| create_error(path, e))?;
    c.created.push(sid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::size::DiskSize;

    fn partition(graph: &mut DeviceGraph, udev: bool) -> Sid {
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(50));
        if udev {
            disk.udev_paths = vec!["pci-0000:00:17.0-ata-1".to_string()];
        }
        let disk = graph.add(Device::Disk(disk));
        graph.create_ptable(disk, PartitionTableType::Gpt).unwrap();
        graph
            .create_partition(
                disk,
                Region::new(DiskSize::mib(1), DiskSize::gib(10)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap()
    }

    #[test]
    fn path_needs_udev_paths() {
        let mut graph = DeviceGraph::new();
        let part = partition(&mut graph, false);
        let fs = graph.create_filesystem(&[part], Filesystem::new(FsType::Ext4)).unwrap();
        assert_eq!(resolve_mount_by(&graph, fs, MountBy::Path), MountBy::Uuid);

        let mut graph = DeviceGraph::new();
        let part = partition(&mut graph, true);
        let fs = graph.create_filesystem(&[part], Filesystem::new(FsType::Ext4)).unwrap();
        assert_eq!(resolve_mount_by(&graph, fs, MountBy::Path), MountBy::Path);
    }

    #[test]
    fn label_needs_a_label() {
        let mut graph = DeviceGraph::new();
        let part = partition(&mut graph, false);
        let fs = graph.create_filesystem(&[part], Filesystem::new(FsType::Xfs)).unwrap();
        assert_eq!(resolve_mount_by(&graph, fs, MountBy::Label), MountBy::Uuid);

        let mut labeled = Filesystem::new(FsType::Xfs);
        labeled.label = Some("data".to_string());
        let other = graph.create_filesystem(&[part], labeled).unwrap();
        assert_eq!(resolve_mount_by(&graph, other, MountBy::Label), MountBy::Label);
    }

    #[test]
    fn encrypted_devices_mount_by_device() {
        let mut graph = DeviceGraph::new();
        let part = partition(&mut graph, true);
        let enc = graph
            .create_encryption(
                part,
                Encryption {
                    name: "/dev/mapper/cr_sda1".to_string(),
                    dm_name: "cr_sda1".to_string(),
                    method: EncryptionMethod::Luks2,
                    pbkdf: None,
                    password: None,
                    secure_key: None,
                },
            )
            .unwrap();
        let fs = graph.create_filesystem(&[enc], Filesystem::new(FsType::Ext4)).unwrap();
        assert_eq!(resolve_mount_by(&graph, fs, MountBy::Uuid), MountBy::Device);
    }

    #[test]
    fn labels_only_on_supporting_filesystems() {
        let mut format = Formatting::new(FsType::Swap, Some("swap"));
        format.label = Some("swap".to_string());
        format.snapshots = true;
        let fs = build(&format);
        assert_eq!(fs.label.is_some(), FsType::Swap.supports_label());
        assert!(!fs.snapshots);
    }
}
