//! Cluster and session configuration: parsing, validation, and the fixed
//! resource vocabularies the rest of the workspace builds on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum worker count a cluster may request (invariant I6).
pub const MAX_WORKERS: u32 = 500;

/// The fixed set of vCPU allotments a worker may request.
const VALID_CPU_UNITS: [f64; 7] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0];

/// vCPU allotment per worker, drawn from a fixed set (invariant P7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuUnits(f64);

impl CpuUnits {
    pub fn new(value: f64) -> Result<Self> {
        if VALID_CPU_UNITS.iter().any(|v| (*v - value).abs() < 1e-9) {
            Ok(Self(value))
        } else {
            Err(Error::ConfigInvalid(format!(
                "cpu_units {value} is not one of {VALID_CPU_UNITS:?}"
            )))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Encode as thousandths-of-a-vCPU, the unit the container service API
    /// speaks (e.g. ECS `cpu` field). This encoding lives only in the task
    /// definition cache and here at the source of truth.
    pub fn as_thousandths(&self) -> u32 {
        (self.0 * 1000.0).round() as u32
    }

    /// Largest valid `CpuUnits` not exceeding `vcpus` (used for instance-type
    /// auto-sizing, invariant I8).
    pub fn largest_not_exceeding(vcpus: f64) -> Result<Self> {
        VALID_CPU_UNITS
            .iter()
            .rev()
            .find(|v| **v <= vcpus)
            .map(|v| CpuUnits(*v))
            .ok_or_else(|| {
                Error::ConfigInvalid(format!("instance has too few vCPUs ({vcpus}) for any cpu tier"))
            })
    }
}

/// Memory allotment per worker, in GB. Accepts `"8GB"`, `"8gb"`, `"8192MB"`,
/// or a bare number (interpreted as GB) at parse time; always stored as GB
/// internally (boundary behavior B3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryGb(f64);

impl MemoryGb {
    pub const MIN_GB: f64 = 0.5;
    pub const MAX_GB: f64 = 120.0;

    pub fn from_gb(gb: f64) -> Result<Self> {
        if gb < Self::MIN_GB || gb > Self::MAX_GB {
            Err(Error::ConfigInvalid(format!(
                "memory {gb}GB out of range [{}, {}]",
                Self::MIN_GB,
                Self::MAX_GB
            )))
        } else {
            Ok(Self(gb))
        }
    }

    pub fn gb(&self) -> f64 {
        self.0
    }

    /// Encode as mebibytes, the unit the container service API speaks.
    pub fn as_mebibytes(&self) -> u32 {
        (self.0 * 1024.0).round() as u32
    }

    /// Parse a human quantity string: `"8GB"`, `"8gb"`, `"8192MB"`, or a bare
    /// number meaning GB.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();

        let (number_part, gb) = if let Some(stripped) = lower.strip_suffix("gb") {
            (stripped, true)
        } else if let Some(stripped) = lower.strip_suffix("mb") {
            (stripped, false)
        } else {
            (lower.as_str(), true)
        };

        let value: f64 = number_part.trim().parse().map_err(|_| {
            Error::ConfigInvalid(format!("cannot parse memory quantity '{raw}'"))
        })?;

        let as_gb = if gb { value } else { value / 1024.0 };
        Self::from_gb(as_gb)
    }

    /// `memory_gb` is compatible with a given cpu tier if it falls within the
    /// allowed band for that tier on typical serverless container platforms
    /// (roughly: min memory scales with cpu, max memory caps out near 30GB
    /// for the smallest tiers and widens for the largest).
    pub fn compatible_with(&self, cpu: CpuUnits) -> bool {
        let (min, max) = match cpu.value() {
            v if v <= 0.25 => (0.5, 2.0),
            v if v <= 0.5 => (1.0, 4.0),
            v if v <= 1.0 => (2.0, 8.0),
            v if v <= 2.0 => (4.0, 16.0),
            v if v <= 4.0 => (8.0, 30.0),
            v if v <= 8.0 => (16.0, 60.0),
            _ => (32.0, Self::MAX_GB),
        };
        self.0 >= min && self.0 <= max
    }
}

/// Launch strategy: serverless (no instances to manage) or instance-backed
/// (a warm pool of container-agent instances).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKind {
    Serverless,
    Instance,
}

/// CPU architecture of the container image and, for instance launch, the
/// underlying instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
}

/// Configuration for an ephemeral cluster or the backend subset of a
/// detached session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub workers: u32,
    pub cpu_units: CpuUnits,
    pub memory_gb: MemoryGb,
    pub region: String,
    pub timeout_s: u32,
    pub launch_kind: LaunchKind,
    pub instance_type: Option<String>,
    pub use_spot: bool,
    pub warm_pool_timeout_s: u32,
    pub architecture: Architecture,
    pub image_ref: String,
    pub bucket: String,
    pub cluster_name: String,
    pub subnets: BTreeSet<String>,
    pub security_groups: BTreeSet<String>,
    pub account_id: String,
}

/// Builder for `ClusterConfig`, performing the validation in invariants
/// I6-I8 and boundary behaviors B1-B3 at construction time (P7).
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    workers: Option<u32>,
    cpu: Option<f64>,
    memory: Option<String>,
    region: Option<String>,
    timeout_s: u32,
    launch_kind: LaunchKind_,
    instance_type: Option<String>,
    use_spot: bool,
    warm_pool_timeout_s: u32,
    architecture: Option<Architecture>,
    image_ref: Option<String>,
    bucket: Option<String>,
    cluster_name: Option<String>,
    subnets: BTreeSet<String>,
    security_groups: BTreeSet<String>,
    account_id: Option<String>,
}

/// Internal default-carrying shim so `Default` doesn't need `LaunchKind` to
/// implement it.
#[derive(Debug, Clone, Copy)]
enum LaunchKind_ {
    Serverless,
    Instance,
}

impl Default for LaunchKind_ {
    fn default() -> Self {
        LaunchKind_::Serverless
    }
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            timeout_s: 300,
            warm_pool_timeout_s: 600,
            ..Default::default()
        }
    }

    pub fn workers(mut self, n: u32) -> Self {
        self.workers = Some(n);
        self
    }

    pub fn cpu(mut self, cpu_units: f64) -> Self {
        self.cpu = Some(cpu_units);
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn timeout_s(mut self, s: u32) -> Self {
        self.timeout_s = s;
        self
    }

    pub fn instance_launch(mut self, instance_type: impl Into<String>) -> Self {
        self.launch_kind = LaunchKind_::Instance;
        self.instance_type = Some(instance_type.into());
        self
    }

    pub fn use_spot(mut self, spot: bool) -> Self {
        self.use_spot = spot;
        self
    }

    pub fn warm_pool_timeout_s(mut self, s: u32) -> Self {
        self.warm_pool_timeout_s = s;
        self
    }

    pub fn architecture(mut self, arch: Architecture) -> Self {
        self.architecture = Some(arch);
        self
    }

    pub fn image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    pub fn subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnets.insert(subnet.into());
        self
    }

    pub fn security_group(mut self, sg: impl Into<String>) -> Self {
        self.security_groups.insert(sg.into());
        self
    }

    pub fn account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<ClusterConfig> {
        let workers = self
            .workers
            .ok_or_else(|| Error::ConfigInvalid("workers is required".into()))?;
        if workers == 0 || workers > MAX_WORKERS {
            return Err(Error::ConfigInvalid(format!(
                "workers must be in 1..={MAX_WORKERS}, got {workers}"
            )));
        }

        let launch_kind = match self.launch_kind {
            LaunchKind_::Serverless => LaunchKind::Serverless,
            LaunchKind_::Instance => LaunchKind::Instance,
        };

        if launch_kind == LaunchKind::Instance && self.instance_type.is_none() {
            return Err(Error::ConfigInvalid(
                "launch_kind = Instance requires instance_type".into(),
            ));
        }

        // For Instance launch, cpu/memory are derived from the instance spec
        // (I8), not user-supplied; for Serverless they're required.
        let (cpu_units, memory_gb, architecture) = match launch_kind {
            LaunchKind::Instance => {
                let instance_type = self.instance_type.as_deref().unwrap();
                let spec = InstanceSpec::lookup(instance_type).ok_or_else(|| {
                    Error::ConfigInvalid(format!("unknown instance_type '{instance_type}'"))
                })?;
                let cpu = CpuUnits::largest_not_exceeding(spec.vcpus)?;
                let memory = MemoryGb::from_gb(spec.memory_gb - 0.5)?;
                (cpu, memory, spec.architecture)
            }
            LaunchKind::Serverless => {
                let cpu = CpuUnits::new(self.cpu.ok_or_else(|| {
                    Error::ConfigInvalid("cpu is required for Serverless launch".into())
                })?)?;
                let memory_raw = self
                    .memory
                    .ok_or_else(|| Error::ConfigInvalid("memory is required for Serverless launch".into()))?;
                let memory = MemoryGb::parse(&memory_raw)?;
                if !memory.compatible_with(cpu) {
                    return Err(Error::ConfigInvalid(format!(
                        "memory {}GB incompatible with cpu {}",
                        memory.gb(),
                        cpu.value()
                    )));
                }
                let arch = self.architecture.unwrap_or(Architecture::X86_64);
                (cpu, memory, arch)
            }
        };

        Ok(ClusterConfig {
            workers,
            cpu_units,
            memory_gb,
            region: self
                .region
                .ok_or_else(|| Error::ConfigInvalid("region is required".into()))?,
            timeout_s: self.timeout_s,
            launch_kind,
            instance_type: self.instance_type,
            use_spot: self.use_spot,
            warm_pool_timeout_s: self.warm_pool_timeout_s,
            architecture,
            image_ref: self
                .image_ref
                .ok_or_else(|| Error::ConfigInvalid("image_ref is required".into()))?,
            bucket: self
                .bucket
                .ok_or_else(|| Error::ConfigInvalid("bucket is required".into()))?,
            cluster_name: self
                .cluster_name
                .ok_or_else(|| Error::ConfigInvalid("cluster_name is required".into()))?,
            subnets: self.subnets,
            security_groups: self.security_groups,
            account_id: self
                .account_id
                .ok_or_else(|| Error::ConfigInvalid("account_id is required".into()))?,
        })
    }
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
    }

    /// Load a `ClusterConfig` from a YAML file: parse into the raw,
    /// serde-derived shape first, then run it through the builder so every
    /// load path gets the same validation (invariants I6-I8).
    pub fn load_from_file(path: &std::path::Path) -> Result<ClusterConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigInvalid(format!("reading {}: {e}", path.display()))
        })?;
        let doc: RawClusterConfig = serde_yaml::from_str(&raw).map_err(|e| {
            Error::ConfigInvalid(format!("parsing {}: {e}", path.display()))
        })?;
        doc.into_builder().build()
    }
}

/// The on-disk shape of a cluster config file: plain strings and optional
/// fields, validated and converted into `ClusterConfig` by
/// `ClusterConfig::load_from_file`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClusterConfig {
    pub workers: u32,
    pub cpu: Option<f64>,
    pub memory: Option<String>,
    pub region: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u32,
    pub instance_type: Option<String>,
    #[serde(default)]
    pub use_spot: bool,
    #[serde(default = "default_warm_pool_timeout_s")]
    pub warm_pool_timeout_s: u32,
    pub architecture: Option<Architecture>,
    pub image_ref: String,
    pub bucket: String,
    pub cluster_name: String,
    #[serde(default)]
    pub subnets: BTreeSet<String>,
    #[serde(default)]
    pub security_groups: BTreeSet<String>,
    pub account_id: String,
}

fn default_timeout_s() -> u32 {
    300
}

fn default_warm_pool_timeout_s() -> u32 {
    600
}

impl RawClusterConfig {
    fn into_builder(self) -> ClusterConfigBuilder {
        let mut b = ClusterConfig::builder()
            .workers(self.workers)
            .region(self.region)
            .timeout_s(self.timeout_s)
            .use_spot(self.use_spot)
            .warm_pool_timeout_s(self.warm_pool_timeout_s)
            .image_ref(self.image_ref)
            .bucket(self.bucket)
            .cluster_name(self.cluster_name)
            .account_id(self.account_id);
        if let Some(cpu) = self.cpu {
            b = b.cpu(cpu);
        }
        if let Some(memory) = self.memory {
            b = b.memory(memory);
        }
        if let Some(arch) = self.architecture {
            b = b.architecture(arch);
        }
        if let Some(instance_type) = self.instance_type {
            b = b.instance_launch(instance_type);
        }
        for subnet in self.subnets {
            b = b.subnet(subnet);
        }
        for sg in self.security_groups {
            b = b.security_group(sg);
        }
        b
    }
}

/// Minimal instance-type resource table used for auto-sizing (I8). A real
/// deployment would source this from the cloud provider's instance catalog;
/// the core only needs vCPU/memory/architecture for the types it is
/// configured to use.
struct InstanceSpec {
    vcpus: f64,
    memory_gb: f64,
    architecture: Architecture,
}

impl InstanceSpec {
    fn lookup(instance_type: &str) -> Option<Self> {
        let spec = match instance_type {
            "t3.medium" => (2.0, 4.0, Architecture::X86_64),
            "t3.large" => (2.0, 8.0, Architecture::X86_64),
            "t3.xlarge" => (4.0, 16.0, Architecture::X86_64),
            "t4g.medium" => (2.0, 4.0, Architecture::Arm64),
            "t4g.large" => (2.0, 8.0, Architecture::Arm64),
            "c6i.xlarge" => (4.0, 8.0, Architecture::X86_64),
            "c6i.2xlarge" => (8.0, 16.0, Architecture::X86_64),
            "c6g.xlarge" => (4.0, 8.0, Architecture::Arm64),
            "m6i.xlarge" => (4.0, 16.0, Architecture::X86_64),
            "m6i.2xlarge" => (8.0, 32.0, Architecture::X86_64),
            "m6i.4xlarge" => (16.0, 64.0, Architecture::X86_64),
            _ => return None,
        };
        Some(InstanceSpec {
            vcpus: spec.0,
            memory_gb: spec.1,
            architecture: spec.2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ClusterConfigBuilder {
        ClusterConfig::builder()
            .region("us-east-1")
            .image_ref("example.com/worker:latest")
            .bucket("cloudburst-bucket")
            .cluster_name("test-cluster")
            .account_id("123456789012")
            .subnet("subnet-aaa")
            .security_group("sg-aaa")
    }

    #[test]
    fn workers_zero_is_invalid() {
        let err = base().workers(0).cpu(1.0).memory("2GB").build();
        assert!(matches!(err, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn workers_above_max_is_invalid() {
        let err = base().workers(501).cpu(1.0).memory("2GB").build();
        assert!(matches!(err, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn workers_at_max_is_valid() {
        let cfg = base().workers(500).cpu(1.0).memory("2GB").build().unwrap();
        assert_eq!(cfg.workers, 500);
    }

    #[test]
    fn invalid_cpu_tier_rejected() {
        let err = base().workers(2).cpu(3.0).memory("2GB").build();
        assert!(matches!(err, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn memory_parses_equivalent_forms() {
        assert_eq!(MemoryGb::parse("8GB").unwrap().gb(), 8.0);
        assert_eq!(MemoryGb::parse("8gb").unwrap().gb(), 8.0);
        assert_eq!(MemoryGb::parse("8192MB").unwrap().gb(), 8.0);
    }

    #[test]
    fn instance_launch_requires_instance_type() {
        let mut builder = base().workers(2);
        builder.launch_kind = LaunchKind_::Instance;
        let err = builder.build();
        assert!(matches!(err, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn instance_launch_derives_cpu_and_memory() {
        let cfg = base()
            .workers(2)
            .instance_launch("c6i.xlarge")
            .build()
            .unwrap();
        assert_eq!(cfg.cpu_units.value(), 4.0);
        assert_eq!(cfg.memory_gb.gb(), 7.5);
        assert_eq!(cfg.architecture, Architecture::X86_64);
    }

    #[test]
    fn incompatible_memory_rejected() {
        let err = base().workers(2).cpu(0.25).memory("64GB").build();
        assert!(matches!(err, Err(Error::ConfigInvalid(_))));
    }
}
