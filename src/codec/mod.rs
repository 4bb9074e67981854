// Decoding library boundary
// Frames, buffer callbacks and the hardware acceleration hook the software
// decoding library drives. Raw surface values only cross this boundary.

pub mod profiles;

use crate::device::{BitstreamConfig, DeviceError, NativeDecoder, RawSurface};
use crate::surface::SurfaceHandle;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("No free buffer available")]
    NoBuffer,
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Accelerator error: {0}")]
    Accel(#[from] DeviceError),
    #[error("Decoding failed: {0}")]
    DecodeError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    Mpeg2,
    H264,
    Vc1,
    Wmv3,
    Hevc,
    Vp9,
}

/// Pixel formats exchanged with the media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Frame data lives in a hardware decode surface
    D3d11Va,
    Nv12,
    P010,
    Yuv420p,
}

/// Stream parameters handed to `open`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParams {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    /// Luma bit depth of the stream
    pub bit_depth: u8,
    /// Frame threads used by the decoding library
    pub thread_count: u32,
}

impl CodecParams {
    pub fn new(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            bit_depth: 8,
            thread_count: 1,
        }
    }

    pub fn high_bitdepth(&self) -> bool {
        self.bit_depth > 8
    }
}

/// Compressed input unit
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts: Option<i64>) -> Self {
        Self {
            data: data.into(),
            pts,
        }
    }
}

/// Flags passed to the get-buffer callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// The decoder may keep the frame as a reference
    pub const REF: BufferFlags = BufferFlags(1);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Called with the opaque surface value when the last buffer reference drops
pub type ReleaseFn = fn(RawSurface, SurfaceHandle);

struct HwBuffer {
    data: RawSurface,
    handle: Option<SurfaceHandle>,
    release: ReleaseFn,
}

impl Drop for HwBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            (self.release)(self.data, handle);
        }
    }
}

/// Reference-counted buffer attached to a frame. Clones share one buffer.
#[derive(Clone)]
pub struct BufferRef(Arc<HwBuffer>);

impl BufferRef {
    pub fn new(handle: SurfaceHandle, release: ReleaseFn) -> Self {
        Self(Arc::new(HwBuffer {
            data: handle.raw(),
            handle: Some(handle),
            release,
        }))
    }

    pub fn data(&self) -> RawSurface {
        self.0.data
    }

    pub fn handle(&self) -> Option<&SurfaceHandle> {
        self.0.handle.as_ref()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRef")
            .field("data", &self.0.data)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Picture as seen by the decoding library
#[derive(Debug, Clone)]
pub struct CodecFrame {
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub format: PixelFormat,
    surface: Option<RawSurface>,
    buffer: Option<BufferRef>,
}

impl CodecFrame {
    pub fn new(width: u32, height: u32, pts: Option<i64>) -> Self {
        Self {
            width,
            height,
            pts,
            format: PixelFormat::D3d11Va,
            surface: None,
            buffer: None,
        }
    }

    /// Surface the accelerator writes this picture into
    pub fn surface(&self) -> Option<RawSurface> {
        self.surface
    }

    pub fn buffer(&self) -> Option<&BufferRef> {
        self.buffer.as_ref()
    }

    /// Attach a surface, replacing any previous buffer
    pub fn attach(&mut self, handle: SurfaceHandle, release: ReleaseFn) {
        self.surface = Some(handle.raw());
        self.buffer = Some(BufferRef::new(handle, release));
    }
}

/// Buffer-allocation callback of the decoding library
pub trait FrameAllocator: Sync {
    fn get_buffer(&self, frame: &mut CodecFrame, flags: BufferFlags) -> Result<(), CodecError>;
}

/// Workarounds the decoding library must apply for a device/profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Workarounds {
    pub scaling_list_zigzag: bool,
    pub intel_clear_video: bool,
}

/// Hardware acceleration state handed to the decoding library for one call
pub struct AccelContext<'a> {
    pub decoder: &'a mut dyn NativeDecoder,
    pub surfaces: &'a [RawSurface],
    pub config: &'a BitstreamConfig,
    pub workarounds: Workarounds,
}

/// Decode session of the software decoding library
pub trait CodecSession: Send {
    /// Decode one packet. New pictures get their surface through `allocator`
    /// and are decoded through `accel`. Returns a picture when one is ready
    /// for output.
    fn decode(
        &mut self,
        packet: &Packet,
        accel: &mut AccelContext<'_>,
        allocator: &dyn FrameAllocator,
    ) -> Result<Option<CodecFrame>, CodecError>;
}
