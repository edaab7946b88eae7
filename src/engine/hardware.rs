//! GPU and encoder capability negotiation.
//!
//! Two independent questions are asked: which GPUs does the host have, and which
//! acceleration features was the bound ffmpeg built with. A capability is usable only when
//! both answers agree. Every query is bounded and fails soft.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::core::{AccelMode, CapturedOutput, run_capture};
use crate::engine::error::ProbeError;

/// Default bound for each introspection call
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Vendors and devices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Intel => "intel",
            Self::Unknown => "unknown",
        })
    }
}

const NVIDIA_KEYWORDS: &[&str] = &["nvidia", "geforce", "quadro", "tesla"];
const AMD_KEYWORDS: &[&str] = &["amd", "radeon", "rx", "vega"];
const INTEL_KEYWORDS: &[&str] = &["intel", "uhd", "iris"];

/// Best-effort vendor guess from a free-text adapter name.
pub fn classify_vendor(name: &str) -> GpuVendor {
    let lower = name.to_lowercase();
    let hit = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if hit(NVIDIA_KEYWORDS) {
        GpuVendor::Nvidia
    } else if hit(AMD_KEYWORDS) {
        GpuVendor::Amd
    } else if hit(INTEL_KEYWORDS) {
        GpuVendor::Intel
    } else {
        GpuVendor::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareDevice {
    pub name: String,
    pub vendor: GpuVendor,
    pub memory_bytes: Option<u64>,
    pub driver_version: Option<String>,
}

impl HardwareDevice {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            vendor: classify_vendor(&name),
            name,
            memory_bytes: None,
            driver_version: None,
        }
    }
}

// ============================================================================
// Encoder capability flags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Cuda,
    Nvenc,
    Amf,
    Opencl,
    Dxva2,
    D3d11va,
    Vaapi,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Self::Cuda,
        Self::Nvenc,
        Self::Amf,
        Self::Opencl,
        Self::Dxva2,
        Self::D3d11va,
        Self::Vaapi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Nvenc => "nvenc",
            Self::Amf => "amf",
            Self::Opencl => "opencl",
            Self::Dxva2 => "dxva2",
            Self::D3d11va => "d3d11va",
            Self::Vaapi => "vaapi",
        }
    }

    /// Vendor a device must belong to for this capability to be usable.
    /// `None` means any detected GPU will do.
    pub fn required_vendor(&self) -> Option<GpuVendor> {
        match self {
            Self::Cuda | Self::Nvenc => Some(GpuVendor::Nvidia),
            Self::Amf => Some(GpuVendor::Amd),
            Self::Opencl | Self::Dxva2 | Self::D3d11va | Self::Vaapi => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the bound ffmpeg binary was built with, independent of installed hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EncoderFlags(BTreeMap<Capability, bool>);

impl Default for EncoderFlags {
    fn default() -> Self {
        Self::all_false()
    }
}

impl EncoderFlags {
    pub fn all_false() -> Self {
        Self(Capability::ALL.iter().map(|c| (*c, false)).collect())
    }

    pub fn get(&self, cap: Capability) -> bool {
        self.0.get(&cap).copied().unwrap_or(false)
    }

    pub fn set(&mut self, cap: Capability, value: bool) {
        self.0.insert(cap, value);
    }

    pub fn with(mut self, cap: Capability, value: bool) -> Self {
        self.set(cap, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, bool)> + '_ {
        self.0.iter().map(|(c, v)| (*c, *v))
    }
}

/// Fold `ffmpeg -hwaccels` output into the flags.
pub fn parse_hwaccels(output: &str, flags: &mut EncoderFlags) {
    let accels: Vec<String> = output
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    let has = |name: &str| accels.iter().any(|l| l == name);

    flags.set(Capability::Cuda, has("cuda"));
    flags.set(Capability::Opencl, has("opencl"));
    flags.set(Capability::Dxva2, has("dxva2"));
    flags.set(Capability::D3d11va, has("d3d11va"));
    flags.set(Capability::Vaapi, has("vaapi"));
}

/// Fold `ffmpeg -encoders` output into the flags.
pub fn parse_encoders(output: &str, flags: &mut EncoderFlags) {
    let lower = output.to_lowercase();
    let any = |names: &[&str]| names.iter().any(|n| lower.contains(n));

    flags.set(
        Capability::Nvenc,
        any(&["h264_nvenc", "hevc_nvenc", "av1_nvenc"]),
    );
    flags.set(Capability::Amf, any(&["h264_amf", "hevc_amf", "av1_amf"]));
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    #[default]
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

/// Immutable result of one probe cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CapabilitySnapshot {
    pub platform: Platform,
    pub hardware_devices: Vec<HardwareDevice>,
    pub encoder_flags: EncoderFlags,
}

impl CapabilitySnapshot {
    pub fn new(
        platform: Platform,
        hardware_devices: Vec<HardwareDevice>,
        encoder_flags: EncoderFlags,
    ) -> Self {
        Self {
            platform,
            hardware_devices,
            encoder_flags,
        }
    }

    /// Nothing detected, nothing supported
    pub fn empty() -> Self {
        Self::new(Platform::current(), Vec::new(), EncoderFlags::all_false())
    }

    pub fn has_vendor(&self, vendor: GpuVendor) -> bool {
        self.hardware_devices.iter().any(|d| d.vendor == vendor)
    }

    pub fn flag(&self, cap: Capability) -> bool {
        self.encoder_flags.get(cap)
    }

    /// Built into ffmpeg and backed by a matching device
    pub fn is_usable(&self, cap: Capability) -> bool {
        if !self.flag(cap) {
            return false;
        }
        match cap.required_vendor() {
            Some(vendor) => self.has_vendor(vendor),
            None => !self.hardware_devices.is_empty(),
        }
    }

    /// Fixed priority: NVIDIA CUDA, then AMD, then CPU.
    pub fn recommend(&self) -> AccelMode {
        if self.has_vendor(GpuVendor::Nvidia) && self.flag(Capability::Cuda) {
            AccelMode::Cuda
        } else if self.has_vendor(GpuVendor::Amd)
            && (self.flag(Capability::Amf) || self.flag(Capability::Opencl))
        {
            AccelMode::Amd
        } else {
            AccelMode::Cpu
        }
    }
}

pub fn recommend(snapshot: &CapabilitySnapshot) -> AccelMode {
    snapshot.recommend()
}

// ============================================================================
// Platform device enumeration
// ============================================================================

/// Source of raw GPU information. The system implementation shells out to platform tools.
pub trait DeviceQuery: Send + Sync {
    fn devices(&self, timeout: Duration) -> Result<Vec<HardwareDevice>, ProbeError>;
}

/// `lspci` on Linux, `wmic` (plus `nvidia-smi` fallback) on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevices;

impl DeviceQuery for SystemDevices {
    fn devices(&self, timeout: Duration) -> Result<Vec<HardwareDevice>, ProbeError> {
        match Platform::current() {
            Platform::Linux => {
                let mut cmd = Command::new("lspci");
                cmd.arg("-nn");
                let out = run_capture(cmd, timeout)?.require_success()?;
                Ok(parse_lspci(&out.stdout))
            }
            Platform::Windows => {
                let mut cmd = Command::new("wmic");
                cmd.args([
                    "path",
                    "win32_VideoController",
                    "get",
                    "name,AdapterRAM,DriverVersion",
                    "/format:csv",
                ]);
                match run_capture(cmd, timeout).and_then(CapturedOutput::require_success) {
                    Ok(out) => Ok(parse_wmic_csv(&out.stdout)),
                    Err(e) => {
                        debug!("wmic failed ({}), trying nvidia-smi", e);
                        nvidia_smi_devices(timeout)
                    }
                }
            }
            Platform::Other => Ok(Vec::new()),
        }
    }
}

fn nvidia_smi_devices(timeout: Duration) -> Result<Vec<HardwareDevice>, ProbeError> {
    let mut cmd = Command::new("nvidia-smi");
    cmd.args([
        "--query-gpu=name,memory.total,driver_version",
        "--format=csv,noheader,nounits",
    ]);
    let out = run_capture(cmd, timeout)?.require_success()?;
    Ok(parse_nvidia_smi(&out.stdout))
}

/// Display adapters from `lspci -nn`
pub fn parse_lspci(output: &str) -> Vec<HardwareDevice> {
    output
        .lines()
        .filter(|line| {
            line.contains("VGA compatible controller")
                || line.contains("Display controller")
                || line.contains("3D controller")
        })
        .map(|line| {
            let name = line.rsplit(": ").next().unwrap_or(line).trim();
            HardwareDevice::new(name)
        })
        .collect()
}

/// Rows of `wmic path win32_VideoController get name,AdapterRAM,DriverVersion /format:csv`.
///
/// Columns come back alphabetised: Node, AdapterRAM, DriverVersion, Name.
pub fn parse_wmic_csv(output: &str) -> Vec<HardwareDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                return None;
            }
            let name = parts[3];
            if name.is_empty() || name == "Name" {
                return None;
            }
            let mut device = HardwareDevice::new(name);
            device.memory_bytes = parts[1].parse::<u64>().ok().filter(|m| *m > 0);
            device.driver_version = Some(parts[2].to_string()).filter(|d| !d.is_empty());
            Some(device)
        })
        .collect()
}

/// `nvidia-smi --query-gpu=name,memory.total,driver_version --format=csv,noheader,nounits`
pub fn parse_nvidia_smi(output: &str) -> Vec<HardwareDevice> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 3 || parts[0].is_empty() {
                return None;
            }
            Some(HardwareDevice {
                name: parts[0].to_string(),
                vendor: GpuVendor::Nvidia,
                memory_bytes: parts[1].parse::<u64>().ok().map(|mib| mib * 1024 * 1024),
                driver_version: Some(parts[2].to_string()),
            })
        })
        .collect()
}

// ============================================================================
// Probe
// ============================================================================

/// Owns the current capability snapshot and refreshes it on demand.
pub struct CapabilityProbe {
    binary: Option<PathBuf>,
    timeout: Duration,
    devices: Box<dyn DeviceQuery>,
    current: RwLock<Arc<CapabilitySnapshot>>,
}

impl CapabilityProbe {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self::with_device_query(binary, Box::new(SystemDevices))
    }

    pub fn with_device_query(binary: Option<PathBuf>, devices: Box<dyn DeviceQuery>) -> Self {
        Self {
            binary,
            timeout: PROBE_TIMEOUT,
            devices,
            current: RwLock::new(Arc::new(CapabilitySnapshot::empty())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query the host for GPUs. Errors yield an empty list.
    pub fn probe_hardware(&self) -> Vec<HardwareDevice> {
        match self.devices.devices(self.timeout) {
            Ok(devices) => {
                debug!("Detected {} display adapter(s)", devices.len());
                devices
            }
            Err(e) => {
                warn!("Hardware probe unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Ask the bound binary what it supports. Without a binary everything is false.
    pub fn probe_encoder_support(&self) -> EncoderFlags {
        match &self.binary {
            Some(path) => probe_encoder_support(path, self.timeout),
            None => EncoderFlags::all_false(),
        }
    }

    /// Run a full probe cycle and publish the new snapshot.
    pub fn probe(&self) -> Arc<CapabilitySnapshot> {
        let snapshot = Arc::new(CapabilitySnapshot::new(
            Platform::current(),
            self.probe_hardware(),
            self.probe_encoder_support(),
        ));
        info!(
            "Capability probe: {} device(s), recommended mode {}",
            snapshot.hardware_devices.len(),
            snapshot.recommend()
        );

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        snapshot
    }

    /// Most recently published snapshot (empty until the first probe)
    pub fn snapshot(&self) -> Arc<CapabilitySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run `-hwaccels` and `-encoders` against `binary`. A failing or hanging call
/// leaves its flags false.
pub fn probe_encoder_support(binary: &std::path::Path, timeout: Duration) -> EncoderFlags {
    let mut flags = EncoderFlags::all_false();

    let mut cmd = Command::new(binary);
    cmd.args(["-hide_banner", "-hwaccels"]);
    match run_capture(cmd, timeout).and_then(CapturedOutput::require_success) {
        Ok(out) => parse_hwaccels(&out.stdout, &mut flags),
        Err(e) => warn!("Could not list hardware accelerators: {}", e),
    }

    let mut cmd = Command::new(binary);
    cmd.args(["-hide_banner", "-encoders"]);
    match run_capture(cmd, timeout).and_then(CapturedOutput::require_success) {
        Ok(out) => parse_encoders(&out.stdout, &mut flags),
        Err(e) => warn!("Could not list encoders: {}", e),
    }

    flags
}
