// Transcode orchestration engine - independent of any front end

pub mod core;
pub mod error;
pub mod hardware;
pub mod registry;
pub mod supervisor;

pub use self::core::*;
pub use error::{EngineError, ProbeError};
pub use hardware::{
    Capability, CapabilityProbe, CapabilitySnapshot, DeviceQuery, EncoderFlags, GpuVendor,
    HardwareDevice, Platform, recommend,
};
pub use registry::{RegistryMessage, SupervisorRegistry};
pub use supervisor::{ProcessSupervisor, SupervisorOptions, SupervisorStatus};
