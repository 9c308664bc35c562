use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tolerance accepted on the sum of allocation ratios.
pub const RATIO_TOLERANCE: f64 = 0.001;

/// Upper bound on the number of units one run may generate.
pub const MAX_UNITS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrafficClass {
    High,
    Mid,
    Low,
    None,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 4] = [
        TrafficClass::High,
        TrafficClass::Mid,
        TrafficClass::Low,
        TrafficClass::None,
    ];

    /// Key used for this class in configuration files.
    pub fn config_key(&self) -> &'static str {
        match self {
            TrafficClass::High => "high_traffic",
            TrafficClass::Mid => "mid_traffic",
            TrafficClass::Low => "low_traffic",
            TrafficClass::None => "none",
        }
    }
}

impl FromStr for TrafficClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high_traffic" | "high" => Ok(TrafficClass::High),
            "mid_traffic" | "mid" => Ok(TrafficClass::Mid),
            "low_traffic" | "low" => Ok(TrafficClass::Low),
            "none" => Ok(TrafficClass::None),
            _ => Err(ConfigError::UnknownClass(s.to_string())),
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrafficClass::High => "HIGH",
            TrafficClass::Mid => "MID",
            TrafficClass::Low => "LOW",
            TrafficClass::None => "NONE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizeDistribution {
    #[default]
    Uniform,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalProcess {
    #[default]
    Constant,
    Poisson,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketSizeSpec {
    pub distribution: SizeDistribution,
    pub min: usize,
    pub max: usize,
}

impl PacketSizeSpec {
    pub fn new(distribution: SizeDistribution, min: usize, max: usize) -> Self {
        Self {
            distribution,
            min,
            max,
        }
    }

    pub fn fixed(size: usize) -> Self {
        Self::new(SizeDistribution::Uniform, size, size)
    }

    /// Draw a size in `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.max <= self.min {
            return self.min;
        }
        match self.distribution {
            SizeDistribution::Uniform => rng.gen_range(self.min..=self.max),
            SizeDistribution::Normal => {
                let (min, max) = (self.min as f64, self.max as f64);
                let mean = (min + max) / 2.0;
                let std_dev = (max - min) / 6.0;
                match Normal::new(mean, std_dev) {
                    Ok(normal) => normal.sample(rng).round().clamp(min, max) as usize,
                    Err(_) => mean.round() as usize,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstSpec {
    pub enabled: bool,
    pub on_duration: Duration,
    pub off_duration: Duration,
    pub multiplier: f64,
}

impl BurstSpec {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            on_duration: Duration::ZERO,
            off_duration: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Per-class settings a unit profile is stamped from.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTemplate {
    pub packet_arrival_rate: f64,
    pub arrival_process: ArrivalProcess,
    pub packet_size: PacketSizeSpec,
    pub burst: BurstSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitProfile {
    pub id: u64,
    pub traffic_class: TrafficClass,
    pub packet_arrival_rate: f64,
    pub arrival_process: ArrivalProcess,
    pub packet_size: PacketSizeSpec,
    pub burst: BurstSpec,
}

impl UnitProfile {
    pub fn is_active(&self) -> bool {
        self.packet_arrival_rate.is_finite() && self.packet_arrival_rate > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    Counts(BTreeMap<TrafficClass, usize>),
    Ratios {
        total_count: usize,
        ratios: BTreeMap<TrafficClass, f64>,
    },
}

impl Allocation {
    /// Exact unit count per class.
    pub fn class_counts(&self) -> Result<BTreeMap<TrafficClass, usize>, ConfigError> {
        match self {
            Allocation::Counts(counts) => Ok(counts.clone()),
            Allocation::Ratios {
                total_count,
                ratios,
            } => {
                let values: Vec<f64> = ratios.values().copied().collect();
                let counts = apportion(*total_count, &values)?;
                Ok(ratios.keys().copied().zip(counts).collect())
            }
        }
    }
}

/// Largest-remainder apportionment of `total` over `ratios`.
///
/// Ratios must be non-negative and sum to 1 within [`RATIO_TOLERANCE`]. They are
/// normalized before rounding, so the counts always add up to `total`. Ties on the
/// fractional part go to the earlier entry.
pub fn apportion(total: usize, ratios: &[f64]) -> Result<Vec<usize>, ConfigError> {
    if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) {
        return Err(ConfigError::invalid(
            "allocation.distribution",
            "ratios must be finite and non-negative",
        ));
    }
    let sum: f64 = ratios.iter().sum();
    if (sum - 1.0).abs() > RATIO_TOLERANCE {
        return Err(ConfigError::RatioSum(sum));
    }

    let exact: Vec<f64> = ratios.iter().map(|r| r / sum * total as f64).collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();
    let mut remainder = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..ratios.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    for idx in order.into_iter().cycle() {
        if remainder == 0 {
            break;
        }
        counts[idx] += 1;
        remainder -= 1;
    }
    Ok(counts)
}

/// Expand an allocation into unit profiles grouped by class (HIGH, MID, LOW,
/// NONE) with sequential ids starting at `id_start`.
pub fn generate_profiles(
    allocation: &Allocation,
    templates: &BTreeMap<TrafficClass, ProfileTemplate>,
    id_start: u64,
) -> Result<Vec<UnitProfile>, ConfigError> {
    let counts = allocation.class_counts()?;
    let total = counts
        .values()
        .try_fold(0usize, |acc, n| acc.checked_add(*n))
        .filter(|total| *total <= MAX_UNITS)
        .ok_or_else(|| ConfigError::invalid("allocation.total_count", format!("at most {MAX_UNITS} units")))?;
    let mut profiles = Vec::with_capacity(total);
    let mut next_id = id_start;

    for (class, count) in counts {
        if count == 0 {
            continue;
        }
        let template = templates
            .get(&class)
            .ok_or(ConfigError::MissingProfile(class))?;
        for _ in 0..count {
            profiles.push(UnitProfile {
                id: next_id,
                traffic_class: class,
                packet_arrival_rate: template.packet_arrival_rate,
                arrival_process: template.arrival_process,
                packet_size: template.packet_size,
                burst: template.burst,
            });
            next_id += 1;
        }
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn template(rate: f64) -> ProfileTemplate {
        ProfileTemplate {
            packet_arrival_rate: rate,
            arrival_process: ArrivalProcess::Constant,
            packet_size: PacketSizeSpec::new(SizeDistribution::Uniform, 64, 512),
            burst: BurstSpec::disabled(),
        }
    }

    fn all_templates() -> BTreeMap<TrafficClass, ProfileTemplate> {
        TrafficClass::ALL
            .iter()
            .enumerate()
            .map(|(i, class)| (*class, template(10.0 * (i + 1) as f64)))
            .collect()
    }

    #[test]
    fn apportionment_is_exact() {
        let ratio_sets: [&[f64]; 4] = [
            &[0.2, 0.3, 0.5],
            &[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            &[0.1, 0.15, 0.25, 0.5],
            &[0.9995, 0.0],
        ];
        for ratios in ratio_sets {
            for total in [0usize, 1, 2, 3, 7, 10, 99, 1000, 12345] {
                let counts = apportion(total, ratios).unwrap();
                assert_eq!(counts.iter().sum::<usize>(), total, "{ratios:?} {total}");
            }
        }
    }

    #[test]
    fn largest_remainder_wins() {
        // exact shares 3.3, 3.3, 3.4 -> floors 3,3,3 and the last has the largest remainder
        assert_eq!(apportion(10, &[0.33, 0.33, 0.34]).unwrap(), vec![3, 3, 4]);
        // equal remainders break ties by position
        assert_eq!(
            apportion(10, &[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]).unwrap(),
            vec![4, 3, 3]
        );
    }

    #[test]
    fn ratios_must_sum_to_one() {
        assert!(matches!(apportion(10, &[0.5, 0.4]), Err(ConfigError::RatioSum(_))));
        assert!(matches!(
            apportion(10, &[1.5, -0.5]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(apportion(10, &[0.5, 0.4995]).is_ok());
    }

    #[test]
    fn profiles_follow_exact_counts_in_stable_order() {
        let allocation = Allocation::Counts(BTreeMap::from([
            (TrafficClass::Low, 2),
            (TrafficClass::High, 1),
            (TrafficClass::Mid, 0),
        ]));
        let profiles = generate_profiles(&allocation, &all_templates(), 4).unwrap();
        let summary: Vec<(u64, TrafficClass)> =
            profiles.iter().map(|p| (p.id, p.traffic_class)).collect();
        assert_eq!(
            summary,
            vec![
                (4, TrafficClass::High),
                (5, TrafficClass::Low),
                (6, TrafficClass::Low)
            ]
        );
        assert_eq!(profiles[0].packet_arrival_rate, 10.0);
        assert_eq!(profiles[1].packet_arrival_rate, 30.0);
    }

    #[test]
    fn ratio_allocation_produces_total_count() {
        let allocation = Allocation::Ratios {
            total_count: 7,
            ratios: BTreeMap::from([
                (TrafficClass::High, 0.2),
                (TrafficClass::Mid, 0.3),
                (TrafficClass::Low, 0.5),
            ]),
        };
        let profiles = generate_profiles(&allocation, &all_templates(), 0).unwrap();
        assert_eq!(profiles.len(), 7);
        let ids: Vec<u64> = profiles.iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn missing_template_is_a_config_error() {
        let allocation = Allocation::Counts(BTreeMap::from([(TrafficClass::None, 1)]));
        let templates = BTreeMap::from([(TrafficClass::High, template(1.0))]);
        assert!(matches!(
            generate_profiles(&allocation, &templates, 0),
            Err(ConfigError::MissingProfile(TrafficClass::None))
        ));
    }

    #[test]
    fn oversized_allocations_fail_before_allocating() {
        let templates = BTreeMap::from([(TrafficClass::High, template(1.0)), (TrafficClass::Low, template(1.0))]);
        let over = Allocation::Counts(BTreeMap::from([(TrafficClass::High, MAX_UNITS + 1)]));
        let overflow = Allocation::Counts(BTreeMap::from([
            (TrafficClass::High, usize::MAX),
            (TrafficClass::Low, 2),
        ]));
        for allocation in [over, overflow] {
            assert!(matches!(
                generate_profiles(&allocation, &templates, 0),
                Err(ConfigError::InvalidValue {
                    field: "allocation.total_count",
                    ..
                })
            ));
        }
    }

    #[test]
    fn class_names_parse() {
        assert_eq!("high_traffic".parse::<TrafficClass>().unwrap(), TrafficClass::High);
        assert_eq!("MID".parse::<TrafficClass>().unwrap(), TrafficClass::Mid);
        assert_eq!("none".parse::<TrafficClass>().unwrap(), TrafficClass::None);
        assert!(matches!(
            "extreme".parse::<TrafficClass>(),
            Err(ConfigError::UnknownClass(_))
        ));
    }

    #[test]
    fn sizes_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for distribution in [SizeDistribution::Uniform, SizeDistribution::Normal] {
            let spec = PacketSizeSpec::new(distribution, 100, 200);
            for _ in 0..10_000 {
                let size = spec.sample(&mut rng);
                assert!((100..=200).contains(&size));
            }
        }
        assert_eq!(PacketSizeSpec::fixed(64).sample(&mut rng), 64);
    }

    #[test]
    fn normal_sizes_center_on_midpoint() {
        let mut rng = StdRng::seed_from_u64(11);
        let spec = PacketSizeSpec::new(SizeDistribution::Normal, 0, 1000);
        let n = 20_000;
        let mean = (0..n).map(|_| spec.sample(&mut rng) as f64).sum::<f64>() / n as f64;
        assert!((mean - 500.0).abs() < 10.0, "mean {mean}");
    }
}
