use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::prelude::*,
    net::Ipv4Addr,
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    logging::SimLogger,
    profile::{
        generate_profiles, Allocation, ArrivalProcess, BurstSpec, PacketSizeSpec,
        ProfileTemplate, SizeDistribution, TrafficClass, UnitProfile, MAX_UNITS,
    },
    sender::{
        iface::interface_exists, udp::MAX_UDP_PAYLOAD, AttackMode, PacketType, SenderSettings,
        SimulatorType, SourcePort,
    },
    sim::{RunSettings, DEFAULT_BATCH_SIZE},
    target::TargetDistributor,
    wire::{IPV4_HEADER_LEN, TCP_HEADER_LEN},
};

pub const DEFAULT_CONFIG_PATH: &str = "settings.toml";

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub allocation: AllocationConfig,

    /// Per-class profile blocks keyed by class name.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default)]
    pub packet_type: PacketType,

    #[serde(default)]
    pub tcp_attack_mode: AttackMode,

    /// CIDR blocks; bare addresses are read as /32.
    #[serde(default)]
    pub target_subnets: Vec<String>,

    /// Comma-separated ports and inclusive `a-b` ranges.
    #[serde(default = "default_target_ports")]
    pub target_ports: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub record_packet_details: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Unbounded until cancelled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,

    /// Send attempts per unit; 0 or absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packets_per_unit: Option<u64>,

    /// Progress log period; 0 disables it.
    #[serde(default = "default_report_interval")]
    pub report_interval_sec: f64,

    #[serde(default)]
    pub ue_simulator_type: SimulatorType,

    #[serde(default = "default_interface_id_start")]
    pub interface_id_start: u64,

    /// Source address of raw TCP segments; detected from the routing table when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<Ipv4Addr>,

    /// `match` binds to the target port. Defaults to `match` for UDP and `random` for TCP.
    #[serde(
        default,
        alias = "tcp_source_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_port: Option<SourcePort>,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Sampled sizes are full IP packet sizes instead of payload sizes.
    #[serde(default)]
    pub size_includes_headers: bool,

    /// Fixed RNG seed for reproducible runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    #[default]
    Ratio,
    Count,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AllocationConfig {
    #[serde(default)]
    pub total_count: usize,

    #[serde(default)]
    pub mode: AllocationMode,

    /// Class name to ratio (`ratio` mode) or unit count (`count` mode).
    #[serde(default)]
    pub distribution: BTreeMap<String, f64>,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProfileConfig {
    /// Packets per second.
    pub packet_arrival_rate: f64,

    #[serde(default)]
    pub arrival_process: ArrivalProcess,

    pub packet_size: PacketSizeConfig,

    #[serde(default)]
    pub burst: BurstConfig,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PacketSizeConfig {
    #[serde(default)]
    pub distribution: SizeDistribution,
    pub min: usize,
    pub max: usize,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BurstConfig {
    pub enabled: bool,
    pub on_duration_sec: f64,
    pub off_duration_sec: f64,
    pub burst_multiplier: f64,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

fn default_target_ports() -> String {
    "9000".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_report_interval() -> f64 {
    5.0
}

fn default_interface_id_start() -> u64 {
    4
}

fn default_handshake_timeout_ms() -> u64 {
    1000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            packet_type: PacketType::default(),
            tcp_attack_mode: AttackMode::default(),
            target_subnets: Vec::new(),
            target_ports: default_target_ports(),
            batch_size: default_batch_size(),
            record_packet_details: false,
            log_level: default_log_level(),
            duration_sec: None,
            packets_per_unit: None,
            report_interval_sec: default_report_interval(),
            ue_simulator_type: SimulatorType::default(),
            interface_id_start: default_interface_id_start(),
            source_ip: None,
            source_port: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            size_includes_headers: false,
            seed: None,
            other_fields: HashMap::new(),
        }
    }
}

/// Everything a run needs, derived from a validated [`SimConfig`].
#[derive(Debug)]
pub struct RunPlan {
    pub distributor: Arc<TargetDistributor>,
    pub profiles: Vec<UnitProfile>,
    pub sender: SenderSettings,
    pub run: RunSettings,
    pub record_packet_details: bool,
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let raw = fs::read_to_string(path).map_err(ConfigLoadError::Io)?;
        raw.parse()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let config_str = toml::to_string(&self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(self.simulation.log_level.trim()).map_err(|_| {
            ConfigError::invalid(
                "simulation.log_level",
                format!("'{}' is not a log level", self.simulation.log_level),
            )
        })
    }

    /// Validate every section and build the run plan. Units whose tunnel
    /// interface is missing are dropped.
    pub fn plan(&self) -> Result<RunPlan, ConfigError> {
        self.plan_with(interface_exists)
    }

    pub fn plan_with(&self, iface_exists: impl Fn(&str) -> bool) -> Result<RunPlan, ConfigError> {
        self.reject_unknown_keys()?;
        self.log_level()?;
        let sim = &self.simulation;

        if sim.batch_size == 0 {
            return Err(ConfigError::invalid("simulation.batch_size", "must be at least 1"));
        }
        let duration = match sim.duration_sec {
            Some(secs) => Some(seconds("simulation.duration_sec", secs)?),
            None => None,
        };
        let report_interval = seconds("simulation.report_interval_sec", sim.report_interval_sec)?;

        let distributor = TargetDistributor::from_config(sim.target_subnets.as_slice(), &sim.target_ports)?;
        SimLogger::targets_expanded(distributor.addresses().len(), distributor.ports().len());

        let sender = SenderSettings {
            packet_type: sim.packet_type,
            attack_mode: sim.tcp_attack_mode,
            source_port: sim.source_port.unwrap_or(match sim.packet_type {
                PacketType::Udp => SourcePort::Match,
                PacketType::Tcp | PacketType::Ping => SourcePort::Random,
            }),
            source_ip: sim.source_ip,
            handshake_timeout: Duration::from_millis(sim.handshake_timeout_ms.max(1)),
            simulator: sim.ue_simulator_type,
            probe_address: *distributor
                .addresses()
                .first()
                .ok_or(ConfigError::EmptyAddresses)?,
            port_count: distributor.ports().len(),
        };
        let header_len = if sim.size_includes_headers {
            sender.header_len()
        } else {
            0
        };

        let templates = self.templates(sim.packet_type, header_len)?;
        let allocation = self.allocation()?;
        let id_start = match sim.ue_simulator_type {
            SimulatorType::None => 0,
            _ => sim.interface_id_start,
        };
        let mut profiles = generate_profiles(&allocation, &templates, id_start)?;
        let per_class: Vec<(TrafficClass, usize)> = TrafficClass::ALL
            .iter()
            .map(|class| {
                let count = profiles.iter().filter(|p| p.traffic_class == *class).count();
                (*class, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();
        SimLogger::units_generated(profiles.len(), &per_class);

        profiles.retain(|profile| match sender.interface(profile.id) {
            Some(name) if !iface_exists(&name) => {
                SimLogger::unit_skipped(profile.id, &format!("interface {name} not found"));
                false
            }
            _ => true,
        });
        if profiles.is_empty() {
            return Err(ConfigError::NoUsableUnits);
        }

        Ok(RunPlan {
            distributor: Arc::new(distributor),
            profiles,
            run: RunSettings {
                batch_size: sim.batch_size,
                duration,
                packets_per_unit: sim.packets_per_unit.filter(|n| *n > 0),
                header_len,
                report_interval: (!report_interval.is_zero()).then_some(report_interval),
                seed: sim.seed,
            },
            sender,
            record_packet_details: sim.record_packet_details,
        })
    }

    fn reject_unknown_keys(&self) -> Result<(), ConfigError> {
        let mut sections: Vec<(String, &HashMap<String, toml::Value>)> = vec![
            (String::new(), &self.other_fields),
            ("simulation.".to_string(), &self.simulation.other_fields),
            ("allocation.".to_string(), &self.allocation.other_fields),
        ];
        for (name, profile) in &self.profiles {
            let prefix = format!("profiles.{name}.");
            sections.push((prefix.clone(), &profile.other_fields));
            sections.push((format!("{prefix}packet_size."), &profile.packet_size.other_fields));
            sections.push((format!("{prefix}burst."), &profile.burst.other_fields));
        }

        let mut unknown: Vec<String> = sections
            .into_iter()
            .flat_map(|(prefix, fields)| fields.keys().map(move |key| format!("{prefix}{key}")))
            .collect();
        unknown.sort();
        match unknown.into_iter().next() {
            Some(key) => Err(ConfigError::UnknownKey(key)),
            None => Ok(()),
        }
    }

    fn templates(
        &self,
        packet_type: PacketType,
        header_len: usize,
    ) -> Result<BTreeMap<TrafficClass, ProfileTemplate>, ConfigError> {
        let max_payload = match packet_type {
            PacketType::Udp | PacketType::Ping => MAX_UDP_PAYLOAD,
            PacketType::Tcp => u16::MAX as usize - IPV4_HEADER_LEN - TCP_HEADER_LEN,
        };

        let mut templates = BTreeMap::new();
        for (key, profile) in &self.profiles {
            let class: TrafficClass = key.parse()?;
            let template = profile.template(class, max_payload, header_len)?;
            if templates.insert(class, template).is_some() {
                return Err(ConfigError::invalid(
                    "profiles",
                    format!("class {class} is configured twice"),
                ));
            }
        }
        Ok(templates)
    }

    fn allocation(&self) -> Result<Allocation, ConfigError> {
        let allocation = &self.allocation;
        if allocation.total_count > MAX_UNITS {
            return Err(ConfigError::invalid(
                "allocation.total_count",
                format!("{} exceeds the limit of {MAX_UNITS}", allocation.total_count),
            ));
        }
        let mut entries = BTreeMap::new();
        for (key, value) in &allocation.distribution {
            let class: TrafficClass = key.parse()?;
            if !value.is_finite() || *value < 0.0 {
                return Err(ConfigError::invalid(
                    "allocation.distribution",
                    format!("{key} = {value} is negative or not a number"),
                ));
            }
            if entries.insert(class, *value).is_some() {
                return Err(ConfigError::invalid(
                    "allocation.distribution",
                    format!("class {class} is listed twice"),
                ));
            }
        }

        match allocation.mode {
            AllocationMode::Ratio => Ok(Allocation::Ratios {
                total_count: allocation.total_count,
                ratios: entries,
            }),
            AllocationMode::Count => {
                let mut counts = BTreeMap::new();
                let mut actual = 0usize;
                for (class, value) in entries {
                    if value.fract() != 0.0 {
                        return Err(ConfigError::invalid(
                            "allocation.distribution",
                            format!("count for {class} must be a whole number, got {value}"),
                        ));
                    }
                    if value > MAX_UNITS as f64 {
                        return Err(ConfigError::invalid(
                            "allocation.distribution",
                            format!("count for {class} exceeds the limit of {MAX_UNITS}"),
                        ));
                    }
                    let count = value as usize;
                    actual = actual.checked_add(count).ok_or_else(|| {
                        ConfigError::invalid("allocation.distribution", "counts overflow")
                    })?;
                    counts.insert(class, count);
                }
                if actual != allocation.total_count {
                    return Err(ConfigError::CountSum {
                        expected: allocation.total_count,
                        actual,
                    });
                }
                Ok(Allocation::Counts(counts))
            }
        }
    }
}

impl FromStr for SimConfig {
    type Err = ConfigLoadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        toml::from_str(raw).map_err(ConfigLoadError::Parse)
    }
}

impl ProfileConfig {
    fn template(
        &self,
        class: TrafficClass,
        max_payload: usize,
        header_len: usize,
    ) -> Result<ProfileTemplate, ConfigError> {
        if !self.packet_arrival_rate.is_finite() || self.packet_arrival_rate < 0.0 {
            return Err(ConfigError::invalid(
                "packet_arrival_rate",
                format!("{class}: {} is negative or not a number", self.packet_arrival_rate),
            ));
        }

        let size = &self.packet_size;
        if size.min > size.max {
            return Err(ConfigError::PacketSize {
                class,
                reason: format!("min {} is greater than max {}", size.min, size.max),
            });
        }
        if size.max.saturating_sub(header_len) > max_payload {
            return Err(ConfigError::PacketSize {
                class,
                reason: format!("max {} exceeds the {max_payload} byte payload limit", size.max),
            });
        }

        Ok(ProfileTemplate {
            packet_arrival_rate: self.packet_arrival_rate,
            arrival_process: self.arrival_process,
            packet_size: PacketSizeSpec::new(size.distribution, size.min, size.max),
            burst: self.burst.spec(class)?,
        })
    }
}

impl BurstConfig {
    fn spec(&self, class: TrafficClass) -> Result<BurstSpec, ConfigError> {
        if !self.enabled {
            return Ok(BurstSpec::disabled());
        }
        let burst_err = |reason: String| ConfigError::Burst { class, reason };

        let on = Duration::try_from_secs_f64(self.on_duration_sec)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| burst_err(format!("on_duration_sec {} must be positive", self.on_duration_sec)))?;
        let off = Duration::try_from_secs_f64(self.off_duration_sec).map_err(|_| {
            burst_err(format!("off_duration_sec {} must not be negative", self.off_duration_sec))
        })?;
        if !self.burst_multiplier.is_finite() || self.burst_multiplier <= 0.0 {
            return Err(burst_err(format!(
                "burst_multiplier {} must be positive",
                self.burst_multiplier
            )));
        }

        Ok(BurstSpec {
            enabled: true,
            on_duration: on,
            off_duration: off,
            multiplier: self.burst_multiplier,
        })
    }
}

fn seconds(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(field, format!("{secs} is not a valid number of seconds")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Could not open config")]
    Io(#[from] std::io::Error),
    #[error("Could not parse: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[simulation]
packet_type = "tcp"
tcp_attack_mode = "lazy_mimic_tls"
target_subnets = ["10.0.0.0/30", "192.168.1.10"]
target_ports = "80,443,8000-8002"
batch_size = 10
duration_sec = 30
size_includes_headers = true

[allocation]
total_count = 10
mode = "ratio"
[allocation.distribution]
high_traffic = 0.2
mid = 0.3
low_traffic = 0.5

[profiles.high_traffic]
packet_arrival_rate = 100.0
arrival_process = "poisson"
[profiles.high_traffic.packet_size]
distribution = "normal"
min = 64
max = 1400
[profiles.high_traffic.burst]
enabled = true
on_duration_sec = 2.0
off_duration_sec = 3.0
burst_multiplier = 4.0

[profiles.mid_traffic]
packet_arrival_rate = 10.0
packet_size = { min = 100, max = 200 }

[profiles.low]
packet_arrival_rate = 1.0
packet_size = { min = 64, max = 64 }
"#;

    fn sample() -> SimConfig {
        SAMPLE.parse().unwrap()
    }

    #[test]
    fn parses_and_plans_a_full_config() {
        let plan = sample().plan_with(|_| true).unwrap();

        assert_eq!(
            plan.distributor.addresses(),
            &[
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(192, 168, 1, 10)
            ]
        );
        assert_eq!(plan.distributor.ports(), &[80, 443, 8000, 8001, 8002]);
        assert_eq!(plan.profiles.len(), 10);
        let high: Vec<_> = plan
            .profiles
            .iter()
            .filter(|p| p.traffic_class == TrafficClass::High)
            .collect();
        assert_eq!(high.len(), 2);
        assert_eq!(high[0].arrival_process, ArrivalProcess::Poisson);
        assert!(high[0].burst.enabled);
        assert_eq!(high[0].burst.on_duration, Duration::from_secs(2));
        assert_eq!(plan.profiles[0].id, 0);

        assert_eq!(plan.sender.packet_type, PacketType::Tcp);
        assert_eq!(plan.sender.attack_mode, AttackMode::LazyMimicTls);
        assert_eq!(plan.sender.source_port, SourcePort::Random);
        assert_eq!(plan.sender.probe_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(plan.run.batch_size, 10);
        assert_eq!(plan.run.duration, Some(Duration::from_secs(30)));
        assert_eq!(plan.run.header_len, 40);
        assert_eq!(plan.run.report_interval, Some(Duration::from_secs(5)));
        assert!(!plan.record_packet_details);
    }

    #[test]
    fn defaults_apply() {
        let config: SimConfig = r#"
[simulation]
target_subnets = ["10.1.0.0/24"]
[allocation]
total_count = 1
mode = "count"
distribution = { none = 1 }
[profiles.none]
packet_arrival_rate = 5.0
packet_size = { min = 10, max = 20 }
"#
        .parse()
        .unwrap();
        assert_eq!(config.simulation.target_ports, "9000");
        assert_eq!(config.simulation.batch_size, 20);
        assert_eq!(config.simulation.log_level, "info");

        let plan = config.plan_with(|_| true).unwrap();
        assert_eq!(plan.sender.packet_type, PacketType::Udp);
        assert_eq!(plan.sender.source_port, SourcePort::Match);
        assert_eq!(plan.distributor.addresses().len(), 254);
        assert_eq!(plan.run.packets_per_unit, None);
        assert_eq!(plan.run.header_len, 0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = SAMPLE.replace("batch_size = 10", "batch_size = 10\nbatch_sise = 3");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::UnknownKey(key)) if key == "simulation.batch_sise"
        ));

        let raw = SAMPLE.replace("burst_multiplier = 4.0", "burst_multiplier = 4.0\njitter = 1");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::UnknownKey(key)) if key == "profiles.high_traffic.burst.jitter"
        ));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let raw = SAMPLE.replace("low_traffic = 0.5", "ultra_traffic = 0.5");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::UnknownClass(name)) if name == "ultra_traffic"
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            ("batch_size = 10", "batch_size = 0"),
            ("target_ports = \"80,443,8000-8002\"", "target_ports = \"10-5\""),
            ("\"10.0.0.0/30\", ", "\"10.0.0.0/33\", "),
            ("high_traffic = 0.2", "high_traffic = 0.4"),
            ("min = 100, max = 200", "min = 300, max = 200"),
            ("on_duration_sec = 2.0", "on_duration_sec = 0.0"),
            ("burst_multiplier = 4.0", "burst_multiplier = -1.0"),
            ("packet_arrival_rate = 10.0", "packet_arrival_rate = -1.0"),
            ("duration_sec = 30", "duration_sec = -5"),
            ("packet_type = \"tcp\"", "packet_type = \"tcp\"\nlog_level = \"loud\""),
            ("max = 1400", "max = 70000"),
        ];
        for (from, to) in cases {
            let raw = SAMPLE.replace(from, to);
            assert_ne!(raw, SAMPLE, "{from}");
            let config: SimConfig = raw.parse().unwrap();
            assert!(config.plan_with(|_| true).is_err(), "{to} accepted");
        }
    }

    #[test]
    fn count_mode_must_match_total() {
        let raw = SAMPLE
            .replace("mode = \"ratio\"", "mode = \"count\"")
            .replace("high_traffic = 0.2", "high_traffic = 2")
            .replace("mid = 0.3", "mid = 3")
            .replace("low_traffic = 0.5", "low_traffic = 4");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::CountSum {
                expected: 10,
                actual: 9
            })
        ));
    }

    #[test]
    fn huge_counts_are_rejected_without_overflow() {
        let raw = SAMPLE
            .replace("mode = \"ratio\"", "mode = \"count\"")
            .replace("high_traffic = 0.2", "high_traffic = 1e19")
            .replace("mid = 0.3", "mid = 0")
            .replace("low_traffic = 0.5", "low_traffic = 1e19");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::InvalidValue {
                field: "allocation.distribution",
                ..
            })
        ));
    }

    #[test]
    fn unit_total_is_capped() {
        let raw = SAMPLE.replace("total_count = 10", "total_count = 10000000000");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::InvalidValue {
                field: "allocation.total_count",
                ..
            })
        ));
    }

    #[test]
    fn missing_profile_is_rejected() {
        let raw = SAMPLE.replace("[profiles.low]", "[profiles.none]");
        let config: SimConfig = raw.parse().unwrap();
        assert!(matches!(
            config.plan_with(|_| true),
            Err(ConfigError::MissingProfile(TrafficClass::Low))
        ));
    }

    #[test]
    fn units_without_interface_are_skipped() {
        let raw = SAMPLE.replace(
            "batch_size = 10",
            "batch_size = 10\nue_simulator_type = \"ueransim\"",
        );
        let config: SimConfig = raw.parse().unwrap();

        let plan = config
            .plan_with(|name| name != "uesimtun5" && name != "uesimtun9")
            .unwrap();
        let ids: Vec<u64> = plan.profiles.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![4, 6, 7, 8, 10, 11, 12, 13]);

        assert!(matches!(
            config.plan_with(|_| false),
            Err(ConfigError::NoUsableUnits)
        ));
    }

    #[test]
    fn save_and_reload() {
        let path = std::env::temp_dir().join(format!("ue-traffic-{}.toml", std::process::id()));
        let config = sample();
        config.save(&path).unwrap();
        let reloaded = SimConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.simulation.target_ports, config.simulation.target_ports);
        assert_eq!(reloaded.profiles.len(), 3);
        assert!(reloaded.plan_with(|_| true).is_ok());
    }
}
