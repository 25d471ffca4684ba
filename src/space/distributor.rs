//! Weighted distribution of space among volumes

use crate::utils::error::NotEnoughSpace;
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size limits and weight of one volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: DiskSize,
    pub desired: DiskSize,
    pub max: DiskSize,
    pub weight: u32,
}

impl SizeRange {
    pub fn new(min: DiskSize, desired: DiskSize, max: DiskSize, weight: u32) -> Self {
        Self {
            min,
            desired: desired.max(min),
            max: max.max(desired).max(min),
            weight,
        }
    }

    /// A range that accepts exactly one size
    pub fn fixed(size: DiskSize) -> Self {
        Self::new(size, size, size, 0)
    }
}

/// Split `available` among `volumes`.
///
/// Every volume gets at least its minimum, rounded up to `granularity`
/// where the space allows. It then grows by weight toward its desired size and afterwards toward its
/// maximum. Space left once every volume reached its maximum stays unassigned.
pub fn distribute(
    volumes: &[SizeRange],
    available: DiskSize,
    granularity: DiskSize,
) -> Result<Vec<DiskSize>, NotEnoughSpace> {
    let grain = if granularity.is_zero() {
        DiskSize::b(1)
    } else {
        granularity
    };

    let needed: DiskSize = volumes.iter().map(|v| v.min).sum();
    if needed > available {
        return Err(NotEnoughSpace { needed, available });
    }

    // Minimums are rounded up in order while the extra space lasts
    let mut surplus = available - needed;
    let mut assigned: Vec<DiskSize> = Vec::with_capacity(volumes.len());
    for v in volumes {
        let rounded = v.min.ceil(grain).min(v.max);
        let extra = rounded - v.min;
        if extra <= surplus {
            surplus = surplus - extra;
            assigned.push(rounded);
        } else {
            assigned.push(v.min);
        }
    }
    let targets: [fn(&SizeRange) -> DiskSize; 2] = [|v| v.desired, |v| v.max];
    for target in targets {
        let caps: Vec<DiskSize> = volumes
            .iter()
            .zip(&assigned)
            .map(|(v, a)| target(v).min(v.max).max(*a))
            .collect();
        grow(volumes, &caps, &mut assigned, &mut surplus, grain);
    }

    debug!(
        "Distributed {} among {} volumes, {} left",
        available - surplus,
        volumes.len(),
        surplus
    );
    Ok(assigned)
}

fn grow(
    volumes: &[SizeRange],
    caps: &[DiskSize],
    assigned: &mut [DiskSize],
    surplus: &mut DiskSize,
    grain: DiskSize,
) {
    let room = |assigned: &[DiskSize], i: usize| (caps[i] - assigned[i]).floor(grain);

    loop {
        let uncapped: Vec<usize> = (0..volumes.len())
            .filter(|i| room(assigned, *i) >= grain)
            .collect();
        if uncapped.is_empty() || *surplus < grain {
            return;
        }

        let total_weight: u64 = uncapped.iter().map(|i| volumes[*i].weight as u64).sum();
        let mut handed_out = DiskSize::zero();
        for &i in &uncapped {
            let share = if total_weight == 0 {
                surplus.scale(1, uncapped.len() as u64)
            } else {
                surplus.scale(volumes[i].weight as u64, total_weight)
            };
            let growth = share.floor(grain).min(room(assigned, i));
            assigned[i] += growth;
            handed_out += growth;
        }
        *surplus = *surplus - handed_out;

        if handed_out.is_zero() {
            // Shares rounded down to nothing: one granule at a time, heaviest first
            let mut order = uncapped;
            order.sort_by(|a, b| volumes[*b].weight.cmp(&volumes[*a].weight).then(a.cmp(b)));
            for i in order {
                if *surplus < grain {
                    return;
                }
                assigned[i] += grain;
                *surplus = *surplus - grain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mib(n: u64) -> DiskSize {
        DiskSize::mib(n)
    }

    fn range(min: u64, desired: u64, max: u64, weight: u32) -> SizeRange {
        SizeRange::new(mib(min), mib(desired), mib(max), weight)
    }

    #[test]
    fn not_enough_space_reports_needs() {
        let err = distribute(&[range(600, 600, 600, 1), range(500, 500, 500, 1)], mib(1000), mib(1))
            .unwrap_err();
        assert_eq!(err.needed, mib(1100));
        assert_eq!(err.available, mib(1000));
    }

    #[test]
    fn grows_to_desired_before_max() {
        let sizes = distribute(
            &[range(100, 200, 1000, 1), range(100, 500, 1000, 100)],
            mib(700),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(200), mib(500)]);
    }

    #[test]
    fn surplus_follows_weights() {
        let sizes = distribute(
            &[range(0, 0, 10_000, 1), range(0, 0, 10_000, 3)],
            mib(400),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(100), mib(300)]);
    }

    #[test]
    fn zero_weights_share_equally() {
        let sizes = distribute(
            &[range(0, 0, 10_000, 0), range(0, 0, 10_000, 0)],
            mib(400),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(200), mib(200)]);
    }

    #[test]
    fn capped_volume_returns_surplus_to_others() {
        let sizes = distribute(
            &[range(0, 0, 50, 1), range(0, 0, 10_000, 1)],
            mib(400),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(50), mib(350)]);
    }

    #[test]
    fn leftover_after_max_stays_unassigned() {
        let sizes = distribute(&[range(10, 20, 30, 1)], mib(1000), mib(1)).unwrap();
        assert_eq!(sizes, vec![mib(30)]);
    }

    #[test]
    fn residual_granules_go_to_heaviest() {
        let sizes = distribute(
            &[range(0, 0, 100, 1), range(0, 0, 100, 2)],
            mib(1),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(0), mib(1)]);
    }

    #[test]
    fn minimums_round_up_to_granularity() {
        let sizes = distribute(
            &[SizeRange::new(DiskSize::kib(1500), mib(2), mib(2), 0)],
            mib(10),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![mib(2)]);
    }

    #[test]
    fn unaligned_minimums_fit_exactly() {
        let sizes = distribute(
            &[SizeRange::new(DiskSize::kib(1536), mib(4), mib(4), 1)],
            DiskSize::kib(1536),
            mib(1),
        )
        .unwrap();
        assert_eq!(sizes, vec![DiskSize::kib(1536)]);
    }

    #[test]
    fn fits_whenever_minimums_fit() {
        let volumes = [
            SizeRange::new(DiskSize::kib(1536), mib(8), mib(8), 1),
            SizeRange::new(DiskSize::kib(2560), mib(8), mib(8), 2),
            SizeRange::new(DiskSize::kib(700), mib(1), mib(1), 0),
        ];
        let minimums: DiskSize = volumes.iter().map(|v| v.min).sum();
        for extra_kib in [0u64, 100, 512, 1023, 1024, 3000, 20_000] {
            let available = minimums + DiskSize::kib(extra_kib);
            let sizes = distribute(&volumes, available, mib(1)).unwrap();
            let total: DiskSize = sizes.iter().copied().sum();
            assert!(total <= available);
            for (size, volume) in sizes.iter().zip(&volumes) {
                assert!(*size >= volume.min && *size <= volume.max);
            }
        }
    }

    #[test]
    fn results_stay_within_bounds_and_available() {
        let volumes = [
            range(512, 2048, 2048, 0),
            range(5120, 10240, 51200, 60),
            range(10240, 40960, u64::MAX / (1024 * 1024), 40),
            range(3, 7, 9, 5),
        ];
        for available in [15_876u64, 20_000, 60_000, 200_000, 1_000_000] {
            let sizes = distribute(&volumes, mib(available), mib(4)).unwrap();
            let total: DiskSize = sizes.iter().copied().sum();
            assert!(total <= mib(available));
            for (size, volume) in sizes.iter().zip(&volumes) {
                assert!(*size >= volume.min && *size <= volume.max);
            }
        }
    }
}
