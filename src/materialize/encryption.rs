//! Encryption layers, mapper names and secure keys

use super::{create_error, Creation};
use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::facts::SystemFacts;
use crate::proposal::issues::Issue;
use crate::utils::error::MaterializeError;
use crate::volumes::planned::PlannedEncryption;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Device-mapper name proposed for an encryption on top of `blk`.
///
/// LVs use `cr_<vg>_<lv>`, anything else `cr_<basename>`.
pub fn mapper_name(graph: &DeviceGraph, blk: Sid) -> String {
    match graph.device(blk) {
        Some(Device::LvmLv(lv)) => {
            let path = lv.name.trim_start_matches("/dev/");
            format!("cr_{}", path.replace('/', "_"))
        }
        _ => format!("cr_{}", basename(&graph.display_name(blk))),
    }
}

fn used_dm_names(graph: &DeviceGraph) -> BTreeSet<String> {
    graph
        .sids()
        .into_iter()
        .filter_map(|sid| graph.device(sid).and_then(|d| d.as_encryption()))
        .map(|enc| enc.dm_name.clone())
        .collect()
}

/// `name`, or the first of `name_2`, `name_3`... not in use yet
fn unique_dm_name(graph: &DeviceGraph, name: &str) -> String {
    let used = used_dm_names(graph);
    if !used.contains(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Secure key for pervasive encryption of `device`, plus the mapper name
/// recorded for it when the key already covers the device
fn secure_key_for(graph: &DeviceGraph, facts: &SystemFacts, device: &str) -> (SecureKeyUse, Option<String>) {
    let mut keys: Vec<_> = facts.secure_keys.iter().collect();
    keys.sort_by(|a, b| a.name.cmp(&b.name));
    for key in keys {
        if let Some(volume) = key.volume_for(device) {
            let dm_name = volume.dm_name.clone().unwrap_or_else(|| key.name.clone());
            return (
                SecureKeyUse {
                    key_name: key.name.clone(),
                    generate: false,
                },
                Some(dm_name),
            );
        }
    }

    let mut taken: BTreeSet<String> = facts.secure_keys.iter().map(|k| k.name.clone()).collect();
    taken.extend(
        graph
            .sids()
            .into_iter()
            .filter_map(|sid| graph.device(sid).and_then(|d| d.as_encryption()))
            .filter_map(|enc| enc.secure_key.as_ref().map(|k| k.key_name.clone())),
    );
    let key_name = (1..)
        .map(|n| format!("secure_xts{}", n))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| "secure_xts".to_string());
    (
        SecureKeyUse {
            key_name,
            generate: true,
        },
        None,
    )
}

/// Method actually usable on this system; unavailable ones fall back to LUKS2
fn usable_method(c: &mut Creation<'_>, method: EncryptionMethod, device: &str) -> EncryptionMethod {
    let missing = match method {
        EncryptionMethod::TpmFde if !c.facts.tpm_available => Some("no TPM is available"),
        EncryptionMethod::PervasiveLuks2 if !c.facts.secure_key_support => {
            Some("the system has no secure key support")
        }
        _ => None,
    };
    match missing {
        Some(reason) => {
            warn!("{} not usable for {}: {}", method, device, reason);
            c.issues.push(
                Issue::warning(format!("{} encryption not possible for {}", method, device))
                    .with_description(format!("Using {} instead because {}", EncryptionMethod::Luks2, reason))
                    .with_attr("encryption_method"),
            );
            EncryptionMethod::Luks2
        }
        None => method,
    }
}

/// Put an encryption layer on `blk`, returning the encrypted device
pub(super) fn encrypt(c: &mut Creation<'_>, blk: Sid, planned: &PlannedEncryption) -> Result<Sid, MaterializeError> {
    let device = c.graph.display_name(blk);
    let method = usable_method(c, planned.method, &device);

    let mut dm_name = mapper_name(&c.graph, blk);
    let mut secure_key = None;
    if method == EncryptionMethod::PervasiveLuks2 {
        let (key, recorded) = secure_key_for(&c.graph, c.facts, &device);
        if let Some(recorded) = recorded {
            dm_name = recorded;
        }
        secure_key = Some(key);
    }
    let dm_name = unique_dm_name(&c.graph, &dm_name);

    let pbkdf = match method {
        EncryptionMethod::Luks1 => None,
        _ => planned.pbkdf,
    };
    let encryption = Encryption {
        name: format!("/dev/mapper/{}", dm_name),
        dm_name,
        method,
        pbkdf,
        password: planned.password.clone(),
        secure_key,
    };
    debug!("Encrypting {} as {}", device, encryption.name);
    let sid = c
        .graph
        .create_encryption(blk, encryption)
        .map_err(|e| create_error(&device, e))?;
    c.created.push(sid);
    Ok(sid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::facts::{SecureKey, SecureKeyVolume};
    use crate::proposal::settings::ProposalSettings;
    use crate::utils::size::DiskSize;

    fn graph_with_partition() -> (DeviceGraph, Sid) {
        let mut graph = DeviceGraph::new();
        let disk = graph.add(Device::Disk(Disk::new("/dev/sda", DiskSize::gib(50))));
        graph.create_ptable(disk, PartitionTableType::Gpt).unwrap();
        let part = graph
            .create_partition(
                disk,
                Region::new(DiskSize::mib(1), DiskSize::gib(10)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap();
        (graph, part)
    }

    fn planned(method: EncryptionMethod) -> PlannedEncryption {
        PlannedEncryption {
            method,
            pbkdf: None,
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn mapper_names_follow_device_names() {
        let (mut graph, part) = graph_with_partition();
        assert_eq!(mapper_name(&graph, part), "cr_sda1");

        let pv = graph.create_pv(part).unwrap();
        let vg = graph
            .create_vg(
                LvmVg {
                    vg_name: "system".to_string(),
                    extent_size: DiskSize::mib(4),
                },
                &[pv],
            )
            .unwrap();
        let lv = graph
            .create_lv(
                vg,
                LvmLv {
                    name: "/dev/system/home".to_string(),
                    lv_name: "home".to_string(),
                    size: DiskSize::gib(5),
                    lv_type: LvType::Normal,
                },
            )
            .unwrap();
        assert_eq!(mapper_name(&graph, lv), "cr_system_home");
    }

    #[test]
    fn taken_mapper_names_get_a_suffix() {
        let (graph, part) = graph_with_partition();
        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let mut c = Creation::new(graph, &settings, &facts);
        let enc = encrypt(&mut c, part, &planned(EncryptionMethod::Luks2)).unwrap();
        assert_eq!(c.graph.display_name(enc), "/dev/mapper/cr_sda1");
        assert_eq!(unique_dm_name(&c.graph, "cr_sda1"), "cr_sda1_2");
        assert_eq!(unique_dm_name(&c.graph, "cr_sdb1"), "cr_sdb1");
    }

    #[test]
    fn unavailable_tpm_falls_back_to_luks2() {
        let (graph, part) = graph_with_partition();
        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let mut c = Creation::new(graph, &settings, &facts);
        let enc = encrypt(&mut c, part, &planned(EncryptionMethod::TpmFde)).unwrap();
        let device = c.graph.device(enc).unwrap().as_encryption().unwrap();
        assert_eq!(device.method, EncryptionMethod::Luks2);
        assert_eq!(c.issues.len(), 1);
    }

    #[test]
    fn pervasive_encryption_reuses_recorded_key() {
        let (graph, part) = graph_with_partition();
        let settings = ProposalSettings::default();
        let mut facts = SystemFacts::default();
        facts.secure_key_support = true;
        facts.secure_keys = vec![SecureKey {
            name: "secure_xts1".to_string(),
            volumes: vec![SecureKeyVolume {
                device: "/dev/sda1".to_string(),
                dm_name: Some("cr_root".to_string()),
            }],
        }];
        let mut c = Creation::new(graph, &settings, &facts);
        let enc = encrypt(&mut c, part, &planned(EncryptionMethod::PervasiveLuks2)).unwrap();
        let device = c.graph.device(enc).unwrap().as_encryption().unwrap();
        assert_eq!(device.dm_name, "cr_root");
        let key = device.secure_key.as_ref().unwrap();
        assert_eq!(key.key_name, "secure_xts1");
        assert!(!key.generate);
    }

    #[test]
    fn pervasive_encryption_generates_lowest_free_key() {
        let (graph, part) = graph_with_partition();
        let settings = ProposalSettings::default();
        let mut facts = SystemFacts::default();
        facts.secure_key_support = true;
        facts.secure_keys = vec![SecureKey {
            name: "secure_xts1".to_string(),
            volumes: vec![SecureKeyVolume {
                device: "/dev/sdb1".to_string(),
                dm_name: None,
            }],
        }];
        let mut c = Creation::new(graph, &settings, &facts);
        let enc = encrypt(&mut c, part, &planned(EncryptionMethod::PervasiveLuks2)).unwrap();
        let device = c.graph.device(enc).unwrap().as_encryption().unwrap();
        assert_eq!(device.dm_name, "cr_sda1");
        let key = device.secure_key.as_ref().unwrap();
        assert_eq!(key.key_name, "secure_xts2");
        assert!(key.generate);
    }
}
