//! Settings variants tried when the proposal does not fit
//!
//! Each variant builds on the previous one, so the list goes from the
//! settings as given to the most relaxed version of them.

use crate::proposal::settings::{DeleteMode, ProposalSettings};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Variant {
    pub description: String,
    pub settings: ProposalSettings,
}

struct Variants {
    current: ProposalSettings,
    list: Vec<Variant>,
}

impl Variants {
    fn push(&mut self, description: String) {
        debug!("Fallback variant: {}", description);
        self.list.push(Variant {
            description,
            settings: self.current.clone(),
        });
    }
}

/// Volumes with a disable order, lowest order first
fn adjustable(settings: &ProposalSettings) -> Vec<usize> {
    let mut indexes: Vec<(u32, usize)> = settings
        .volumes
        .iter()
        .enumerate()
        .filter(|(_, v)| v.proposed)
        .filter_map(|(i, v)| v.disable_order.map(|order| (order, i)))
        .collect();
    indexes.sort();
    indexes.into_iter().map(|(_, i)| i).collect()
}

/// All settings variants, in the order they are tried
pub fn variants(settings: &ProposalSettings) -> Vec<Variant> {
    let mut variants = Variants {
        current: settings.clone(),
        list: Vec::new(),
    };
    variants.push("initial settings".to_string());

    if variants
        .current
        .proposed_volumes()
        .any(|v| v.separate_vg_name.is_some())
    {
        for volume in &mut variants.current.volumes {
            volume.separate_vg_name = None;
        }
        variants.push("without separate volume groups".to_string());
    }

    if !variants.current.lvm {
        variants.current.lvm = true;
        variants.push("with LVM".to_string());
    }

    for index in adjustable(settings) {
        let volume = &mut variants.current.volumes[index];
        let mount_point = volume.mount_point.clone();
        if volume.snapshots {
            volume.snapshots = false;
            variants.push(format!("without snapshots for {}", mount_point));
        }
        let volume = &mut variants.current.volumes[index];
        if volume.adjust_by_ram {
            volume.adjust_by_ram = false;
            variants.push(format!("without adjusting {} to the RAM size", mount_point));
        }
        let volume = &mut variants.current.volumes[index];
        if !volume.is_root() {
            volume.proposed = false;
            variants.push(format!("without {}", mount_point));
        }
    }

    if settings.allow_delete_relaxation {
        if variants.current.other_delete_mode == DeleteMode::None {
            variants.current.other_delete_mode = DeleteMode::OnDemand;
            variants.push("deleting other partitions when needed".to_string());
        }
        if variants.current.linux_delete_mode == DeleteMode::None {
            variants.current.linux_delete_mode = DeleteMode::OnDemand;
            variants.push("deleting Linux partitions when needed".to_string());
        }
    }

    variants.list
}
