//! Guided proposal: runs attempts until one of them fits
//!
//! Every attempt works on its own copy of the probed graph and goes through
//! boot requirements, size checks, space making and materialization. Soft
//! errors move on to the next settings variant or target size, fatal ones
//! end the proposal.

use crate::boot::BootRequirementsChecker;
use crate::devicegraph::device::{PartitionTableType, Sid};
use crate::devicegraph::graph::DeviceGraph;
use crate::materialize::DevicesCreator;
use crate::proposal::facts::SystemFacts;
use crate::proposal::fallbacks::{self, Variant};
use crate::proposal::issues::{Issue, IssuesList};
use crate::proposal::planner::{DevicesPlanner, TargetSize};
use crate::proposal::settings::ProposalSettings;
use crate::space::maker::{candidate_disks, PlannedAction, SpaceMaker};
use crate::utils::error::{NotEnoughSpace, ProposalError, Result};
use crate::utils::size::DiskSize;
use crate::volumes::planned::PlannedDevices;
use std::fmt;
use tracing::{debug, info, warn};

/// Steps of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    ComputeBootRequirements,
    DistributeSizes,
    MakeSpace,
    Materialize,
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "initialization",
            Self::ComputeBootRequirements => "boot requirements",
            Self::DistributeSizes => "size distribution",
            Self::MakeSpace => "space making",
            Self::Materialize => "device creation",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct ProposalResult {
    /// Proposed devicegraph, `None` when every attempt failed
    pub devices: Option<DeviceGraph>,
    pub failed: bool,
    pub issues: IssuesList,
    /// Attempts run, including the successful one
    pub attempts: usize,
    /// Settings variant of the successful attempt
    pub variant: Option<String>,
    pub target: Option<TargetSize>,
    pub actions: Vec<PlannedAction>,
}

struct Success {
    graph: DeviceGraph,
    actions: Vec<PlannedAction>,
}

/// Progress and findings of one attempt
struct Attempt<'a> {
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
    target: TargetSize,
    step: Step,
    issues: IssuesList,
}

impl<'a> Attempt<'a> {
    fn new(settings: &'a ProposalSettings, facts: &'a SystemFacts, target: TargetSize) -> Self {
        Self {
            settings,
            facts,
            target,
            step: Step::Init,
            issues: IssuesList::new(),
        }
    }

    fn enter(&mut self, step: Step) {
        debug!("Attempt step: {}", step);
        self.step = step;
    }

    fn run(&mut self, probed: &DeviceGraph) -> Result<Success> {
        let mut graph = probed.clone();
        apply_requested_ptable(&mut graph, self.settings);

        self.enter(Step::ComputeBootRequirements);
        let collected = BootRequirementsChecker::new(&graph, self.settings, self.facts).collect()?;
        for warning in collected.warnings {
            self.issues.push(warning);
        }
        let plan = DevicesPlanner::new(self.settings, self.facts, &graph).plan(&collected.requirements, self.target);
        self.issues.extend(plan.issues);

        self.enter(Step::DistributeSizes);
        check_capacity(&graph, self.settings, &plan.devices)?;

        self.enter(Step::MakeSpace);
        let outcome = SpaceMaker::new(self.settings).provide_space(&mut graph, &plan.devices)?;
        self.issues.extend(outcome.issues);

        self.enter(Step::Materialize);
        let created =
            DevicesCreator::new(self.settings, self.facts).materialize(graph, &plan.devices, &outcome.distribution)?;
        self.issues.extend(created.issues);

        self.enter(Step::Done);
        Ok(Success {
            graph: created.graph,
            actions: outcome.actions,
        })
    }
}

/// Empty candidate disks get the requested partition table type
fn apply_requested_ptable(graph: &mut DeviceGraph, settings: &ProposalSettings) {
    let Some(requested) = settings.ptable_type else {
        return;
    };
    for disk in candidate_disks(graph, settings) {
        if !graph.children(disk).is_empty() {
            continue;
        }
        let usable = match graph.disk(disk) {
            Some(d) => {
                d.ptable.is_none()
                    && !d.is_dasd()
                    && !(requested == PartitionTableType::Msdos && d.size > requested.max_disk_size())
            }
            None => false,
        };
        if usable && graph.create_ptable(disk, requested).is_ok() {
            debug!("Using a {} partition table on {}", requested, graph.display_name(disk));
        }
    }
}

/// Cheap upper bound check before trying to make space
fn check_capacity(graph: &DeviceGraph, settings: &ProposalSettings, planned: &PlannedDevices) -> Result<()> {
    let available: DiskSize = candidate_disks(graph, settings)
        .into_iter()
        .filter_map(|d| graph.disk(d).map(|d| d.size))
        .sum();
    let partitions: DiskSize = planned.new_partitions().iter().map(|p| p.size.min).sum();
    let lvm: DiskSize = planned
        .lvm
        .iter()
        .map(|demand| demand.size.min + demand.pv_overhead())
        .sum();
    let needed = partitions + lvm;
    if needed > available {
        return Err(NotEnoughSpace { needed, available }.into());
    }
    debug!("{} needed, {} on the candidate disks", needed, available);
    Ok(())
}

pub struct GuidedProposal<'a> {
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
    probed: &'a DeviceGraph,
}

impl<'a> GuidedProposal<'a> {
    pub fn new(settings: &'a ProposalSettings, facts: &'a SystemFacts, probed: &'a DeviceGraph) -> Self {
        Self {
            settings,
            facts,
            probed,
        }
    }

    fn check_candidates(&self) -> Result<Vec<Sid>> {
        for name in &self.settings.candidate_devices {
            let is_disk = self
                .probed
                .find_by_name(name)
                .and_then(|sid| self.probed.disk(sid))
                .is_some();
            if !is_disk {
                return Err(ProposalError::DeviceNotFound(name.clone()));
            }
        }
        let candidates = candidate_disks(self.probed, self.settings);
        if candidates.is_empty() {
            return Err(ProposalError::NoCandidateDisks);
        }
        Ok(candidates)
    }

    /// Run attempts until one succeeds or all variants are exhausted
    pub fn propose(&self) -> Result<ProposalResult> {
        self.settings.validate()?;
        let candidates = self.check_candidates()?;
        info!(
            "Proposing on {} candidate disk(s): {}",
            candidates.len(),
            candidates
                .iter()
                .map(|d| self.probed.display_name(*d))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let variants: Vec<Variant> = fallbacks::variants(self.settings);
        let mut attempts = 0;
        let mut last: Option<(ProposalError, Step, IssuesList)> = None;

        for variant in &variants {
            for target in [TargetSize::Desired, TargetSize::Min] {
                attempts += 1;
                info!("Attempt {}: {}, {} sizes", attempts, variant.description, target);
                let mut attempt = Attempt::new(&variant.settings, self.facts, target);
                match attempt.run(self.probed) {
                    Ok(success) => {
                        info!("Attempt {} succeeded", attempts);
                        return Ok(ProposalResult {
                            devices: Some(success.graph),
                            failed: false,
                            issues: attempt.issues,
                            attempts,
                            variant: Some(variant.description.clone()),
                            target: Some(target),
                            actions: success.actions,
                        });
                    }
                    Err(err) if err.is_soft() => {
                        info!("Attempt {} failed during {}: {}", attempts, attempt.step, err);
                        last = Some((err, attempt.step, attempt.issues));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        warn!("No proposal possible after {} attempt(s)", attempts);
        let mut issues = IssuesList::new();
        let mut failure = Issue::error("No valid storage proposal could be found")
            .with_description(format!("{} attempt(s) failed", attempts));
        if let Some((err, step, last_issues)) = last {
            failure = failure.with_details(format!("Last attempt failed during {}: {}", step, err));
            issues.extend(last_issues);
        }
        issues.push(failure);
        Ok(ProposalResult {
            devices: None,
            failed: true,
            issues,
            attempts,
            variant: None,
            target: None,
            actions: Vec::new(),
        })
    }
}
