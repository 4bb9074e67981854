// DXVA surfaces - hardware video decode surface management
// Main library entry point
//
// Data flow:
// decoder -> context -> surface pool -> surface handle -> frame buffer
// -> render path -> handle released -> pool reclaims the surface

pub mod buffer;
pub mod codec;
pub mod context;
pub mod decoder;
pub mod device;
pub mod surface;

pub use buffer::{BufferPool, FrameBufferPool, VideoBuffer};
pub use codec::{Codec, CodecParams, Packet, PixelFormat};
pub use context::{ContextError, DeviceContextManager};
pub use decoder::{
    CheckStatus, DecodeStatus, DecoderConfig, DecoderError, DeviceState, DxvaDecoder,
    HardwareDecoder, VideoPicture,
};
pub use device::events::{DeviceEvent, DeviceEventHub, DeviceEventSource};
pub use device::{DeviceError, RawSurface, SurfaceFormat, VideoDevice};
pub use surface::{SurfaceHandle, SurfaceId, SurfacePool, SurfaceState};
