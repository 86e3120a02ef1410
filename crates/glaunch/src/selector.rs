//! Fit selection: which devices a launch should run on.

use std::fmt;
use std::str::FromStr;

use inventory::DeviceMemory;
use inventory::DeviceSnapshot;

/// How to choose among devices that have enough memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Leave as little free memory as possible on the chosen devices, keeping
    /// the large pools elsewhere intact for bigger jobs.
    BestFit,
    /// Leave as much free memory as possible on the chosen devices.
    #[default]
    WorstFit,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best" | "bestfit" => Ok(Self::BestFit),
            "worst" | "worstfit" => Ok(Self::WorstFit),
            _ => Err(format!(
                "invalid policy `{s}`, expected one of best, bestfit, worst, worstfit"
            )),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestFit => f.write_str("BestFit"),
            Self::WorstFit => f.write_str("WorstFit"),
        }
    }
}

/// Per-device memory the workload is expected to need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryEstimation {
    /// The workload runs with whatever it gets; any device with free memory qualifies.
    #[default]
    NoEstimation,
    /// A slight over-estimate in bytes; a device needs strictly more than this free.
    PerDevice(u64),
}

impl MemoryEstimation {
    /// Whether a device with these statistics can host the workload. Unavailable
    /// free memory never qualifies.
    pub fn admits(&self, memory: &DeviceMemory) -> bool {
        match (memory.free, self) {
            (None, _) => false,
            (Some(free), Self::NoEstimation) => free > 0,
            (Some(free), Self::PerDevice(budget)) => free > *budget,
        }
    }
}

impl fmt::Display for MemoryEstimation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEstimation => f.write_str("no estimation"),
            Self::PerDevice(bytes) => write!(f, "{} per device", utils::units::readable_size(*bytes)),
        }
    }
}

/// What to select: how many devices, how much memory each, and how to choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRequest {
    pub gpu_count: u32,
    pub memory_estimation: MemoryEstimation,
    pub policy: SelectionPolicy,
}

/// Device ids chosen for a launch, in selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection(Vec<u32>);

impl Selection {
    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    /// Comma-joined ids, the format GPU runtimes read from the environment.
    pub fn visible_devices(&self) -> String {
        self.0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<u32> for Selection {
    fn from_iter<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        Self(ids.into_iter().collect())
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self
            .0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&ids)
    }
}

/// Picks `gpu_count` devices from `devices`, or `None` if too few qualify.
///
/// Qualifying devices are ordered by descending free memory; ties keep the
/// snapshot's ascending index order. WorstFit takes the head of that order,
/// BestFit the tail.
pub fn select(devices: &[DeviceSnapshot], request: &FitRequest) -> Option<Selection> {
    let mut qualifying: Vec<(u32, u64)> = devices
        .iter()
        .filter(|device| request.memory_estimation.admits(&device.memory))
        .filter_map(|device| device.memory.free.map(|free| (device.id, free)))
        .collect();

    let wanted = request.gpu_count as usize;
    if qualifying.len() < wanted {
        tracing::debug!(
            qualifying = qualifying.len(),
            wanted,
            "Not enough devices satisfy the memory estimation"
        );
        return None;
    }

    // sort_by is stable
    qualifying.sort_by(|lhs, rhs| rhs.1.cmp(&lhs.1));

    let chosen = match request.policy {
        SelectionPolicy::WorstFit => &qualifying[..wanted],
        SelectionPolicy::BestFit => &qualifying[qualifying.len() - wanted..],
    };

    Some(Selection(chosen.iter().map(|(id, _)| *id).collect()))
}
