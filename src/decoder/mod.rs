// Video decoder module
// Hardware decode sessions that survive device loss and reset
//
// A session is driven in this order:
// 1. open with the stream parameters
// 2. decode packets through the decoding library
// 3. get_picture for every decoded picture
// 4. check periodically to pick up device resets

pub mod dxva;
mod signal;

use crate::buffer::VideoBuffer;
use crate::codec::{CodecError, CodecParams, CodecSession, Packet, PixelFormat};
use crate::context::ContextError;
use crate::device::SurfaceFormat;
use crate::surface::SurfaceHandle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use dxva::DxvaDecoder;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("No free surface or buffer, retry later")]
    NotReady,
    #[error("Device unavailable, retry after reset")]
    DeviceUnavailable,
    #[error("Native call failed: {0}")]
    Native(String),
    #[error("Decoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("Decoder is not open")]
    NotOpen,
    #[error("No decoded picture")]
    NoPicture,
    #[error("Surface is not tracked by the pool")]
    InvalidSurface,
    #[error("Decoder is unusable and must be recreated")]
    Unusable,
    #[error("Decoder closed")]
    Closed,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DecoderError {
    /// Transient conditions the caller should requeue on
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady | Self::DeviceUnavailable)
    }
}

impl From<ContextError> for DecoderError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::Unsupported(msg) => Self::Unsupported(msg),
            ContextError::Device(e) => Self::Native(e.to_string()),
            ContextError::NoContext => Self::Native("no video context".to_string()),
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Surfaces reserved for pictures queued for presentation
    pub presentation_headroom: u32,
    /// How long `check` waits for a lost device to come back
    pub reset_timeout_ms: u64,
    /// Upper bound on output frame buffers, `None` grows on demand
    pub frame_buffer_limit: Option<usize>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            presentation_headroom: 4,
            reset_timeout_ms: 2000,
            frame_buffer_limit: None,
        }
    }
}

impl DecoderConfig {
    pub fn from_json(json: &str) -> Result<Self, DecoderError> {
        serde_json::from_str(json).map_err(|e| DecoderError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DecoderError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Input consumed, nothing to output yet
    Buffer,
    /// A picture is ready for `get_picture`
    Picture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    /// Surfaces and decoder were recreated; the decoding library must drop
    /// its reference pictures
    Flushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Open,
    Reset,
    Lost,
}

/// Decoded picture handed to the render path
#[derive(Debug, Clone)]
pub struct VideoPicture {
    pub buffer: VideoBuffer,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub pixel_format: PixelFormat,
    pub surface_format: SurfaceFormat,
}

impl VideoPicture {
    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.buffer.picture()
    }
}

/// Hardware decoder trait
pub trait HardwareDecoder: Send + Sync {
    /// Negotiate the device and allocate surfaces for a stream
    fn open(&self, params: &CodecParams) -> Result<(), DecoderError>;

    /// Decode one packet through the decoding library
    fn decode(
        &self,
        codec: &mut dyn CodecSession,
        packet: &Packet,
    ) -> Result<DecodeStatus, DecoderError>;

    /// Move the last decoded picture into an output buffer
    fn get_picture(&self) -> Result<VideoPicture, DecoderError>;

    /// Pick up device loss and reset
    fn check(&self) -> Result<CheckStatus, DecoderError>;

    fn close(&self);

    /// Get decoder info
    fn info(&self) -> &str;
}
