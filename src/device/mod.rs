// GPU video device interfaces
// The device, its video service and the native decoder object are provided
// by the platform layer; this crate only drives them through these traits.

pub mod events;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{call} failed with error {code:#010x}")]
    CallFailed { call: &'static str, code: u32 },
    #[error("Device removed")]
    DeviceRemoved,
}

/// Opaque surface value as stored by the decoding library in its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawSurface(pub usize);

impl fmt::Display for RawSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Render target formats a decoder profile can write into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    Nv12,
    P010,
    P016,
}

/// Adapter identification, used for driver workarounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub vendor_id: u32,
    pub device_id: u32,
    /// Driver version as product.version.subversion.build
    pub driver_version: [u16; 4],
    pub description: String,
}

pub const VENDOR_AMD: u32 = 0x1002;
pub const VENDOR_INTEL: u32 = 0x8086;
pub const VENDOR_NVIDIA: u32 = 0x10de;

/// Decoder description: profile, coded size and output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderDesc {
    pub profile: Uuid,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

/// Bitstream configuration reported by the device for a decoder description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamConfig {
    pub bitstream_raw: u32,
    pub encryption: Uuid,
    pub decoder_specific: u32,
}

/// No bitstream encryption
pub const NO_ENCRYPT: Uuid = Uuid::from_u128(0x1b81bed0_a0c7_11d3_b984_00c04f2e73c5);

/// Texture array backing a set of decoder output surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureArrayDesc {
    pub profile: Uuid,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
    pub array_size: u32,
}

/// Decode status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub frame_index: u32,
    /// 0 = ok, anything else is a driver-reported decode problem
    pub status: u8,
}

/// One GPU decode target. Dropping the last reference releases the GPU resource.
pub trait DecodeSurface: Send + Sync {
    fn raw(&self) -> RawSurface;
    fn format(&self) -> SurfaceFormat;
    fn array_slice(&self) -> u32;
}

impl fmt::Debug for dyn DecodeSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSurface")
            .field("raw", &self.raw())
            .field("format", &self.format())
            .field("slice", &self.array_slice())
            .finish()
    }
}

/// Native decoder object bound to a surface array
pub trait NativeDecoder: Send {
    /// Decode one picture's bitstream into `target`
    fn submit(&mut self, target: RawSurface, bitstream: &[u8]) -> Result<(), DeviceError>;

    /// Poll the driver status report, if the profile supports it
    fn status_report(&mut self) -> Result<Option<StatusReport>, DeviceError>;
}

/// Video service of a live GPU device
pub trait VideoService: Send + Sync {
    fn adapter_info(&self) -> AdapterInfo;

    /// Decoder profile GUIDs the device can accelerate
    fn decoder_profiles(&self) -> Result<Vec<Uuid>, DeviceError>;

    /// Whether `profile` can decode into `format`
    fn check_format(&self, profile: &Uuid, format: SurfaceFormat) -> Result<bool, DeviceError>;

    fn decoder_configs(&self, desc: &DecoderDesc) -> Result<Vec<BitstreamConfig>, DeviceError>;

    /// Allocate a texture array and return one output surface per slice
    fn create_surfaces(
        &self,
        desc: &TextureArrayDesc,
    ) -> Result<Vec<Arc<dyn DecodeSurface>>, DeviceError>;

    fn create_decoder(
        &self,
        desc: &DecoderDesc,
        config: &BitstreamConfig,
    ) -> Result<Box<dyn NativeDecoder>, DeviceError>;
}

/// GPU device able to hand out a video service
pub trait VideoDevice: Send + Sync {
    fn open_video_service(&self) -> Result<Arc<dyn VideoService>, DeviceError>;
}
