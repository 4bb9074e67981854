// DXVA hardware decoder
// One decode session on the shared video context. Device notifications may
// arrive on any thread; `check` recreates surfaces and the native decoder
// after a reset.

use super::signal::{ReadySignal, WaitOutcome};
use super::{
    CheckStatus, DecodeStatus, DecoderConfig, DecoderError, DeviceState, HardwareDecoder,
    VideoPicture,
};
use crate::buffer::{BufferPool, FrameBufferPool};
use crate::codec::{
    AccelContext, BufferFlags, Codec, CodecError, CodecFrame, CodecParams, CodecSession,
    FrameAllocator, Packet, PixelFormat, Workarounds,
};
use crate::context::DeviceContextManager;
use crate::device::events::{DeviceEvent, DeviceEventSource, SubscriptionId};
use crate::device::{BitstreamConfig, DecoderDesc, NativeDecoder, RawSurface};
use crate::surface::{SurfaceHandle, SurfacePool};
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Minimum surface dimension rounding for a codec
pub fn surface_alignment(codec: Codec) -> u32 {
    match codec {
        Codec::Mpeg2 => 32,
        Codec::Hevc => 128,
        _ => 16,
    }
}

/// Surfaces needed for a stream: codec references, the picture being
/// decoded, one per extra frame thread and the presentation headroom
pub fn surface_count(params: &CodecParams, headroom: u32) -> u32 {
    let refs = match params.codec {
        Codec::H264 | Codec::Hevc => 16,
        Codec::Vp9 => 8,
        _ => 2,
    };
    let threads = if params.thread_count > 1 {
        params.thread_count
    } else {
        0
    };
    refs + 1 + threads + headroom
}

fn validate_params(params: &CodecParams) -> Result<(), DecoderError> {
    if params.width == 0 || params.height == 0 {
        return Err(DecoderError::Unsupported(format!(
            "invalid dimensions {}x{}",
            params.width, params.height
        )));
    }
    let depth_ok = match params.codec {
        Codec::Hevc | Codec::Vp9 => matches!(params.bit_depth, 8 | 10),
        _ => params.bit_depth == 8,
    };
    if !depth_ok {
        return Err(DecoderError::Unsupported(format!(
            "{}-bit {:?}",
            params.bit_depth, params.codec
        )));
    }
    Ok(())
}

/// Release callback of the decoding library's buffers
fn release_buffer(data: RawSurface, handle: SurfaceHandle) {
    if handle.pool().lookup(data) != Some(handle.id()) {
        log::warn!("DXVA - release of invalid surface {}", data);
    }
    drop(handle);
}

/// Get-buffer callback handed to the decoding library
struct SurfaceAllocator<'a> {
    pool: &'a Arc<SurfacePool>,
}

impl FrameAllocator for SurfaceAllocator<'_> {
    fn get_buffer(&self, frame: &mut CodecFrame, _flags: BufferFlags) -> Result<(), CodecError> {
        let Some(handle) = self.pool.acquire(None) else {
            log::debug!("DXVA - no free decode surface");
            return Err(CodecError::NoBuffer);
        };
        frame.format = PixelFormat::D3d11Va;
        frame.attach(handle, release_buffer);
        Ok(())
    }
}

struct Session {
    // Dropped before the surfaces it decodes into
    native: Box<dyn NativeDecoder>,
    pool: Arc<SurfacePool>,
    surfaces: Vec<RawSurface>,
    config: BitstreamConfig,
    workarounds: Workarounds,
    codec: Codec,
}

struct Inner {
    state: DeviceState,
    session: Option<Session>,
    params: Option<CodecParams>,
    /// Last decoded picture waiting for `get_picture`
    present: Option<CodecFrame>,
    attached: bool,
    unusable: bool,
}

struct Shared {
    id: Uuid,
    context: Arc<DeviceContextManager>,
    config: DecoderConfig,
    inner: Mutex<Inner>,
    ready: ReadySignal,
}

impl Shared {
    fn on_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Created => log::info!("DXVA - device created"),
            DeviceEvent::Lost => {
                let mut inner = self.inner.lock();
                inner.state = DeviceState::Lost;
                self.ready.reset();
                self.context.invalidate();
                log::warn!("DXVA - device lost");
            }
            DeviceEvent::Destroy { fatal } => {
                let mut inner = self.inner.lock();
                inner.state = DeviceState::Lost;
                self.ready.reset();
                self.teardown(&mut inner);
                self.context.invalidate();
                log::warn!("DXVA - device destroyed (fatal: {}), decoder released", fatal);
            }
            DeviceEvent::Reset => {
                let mut inner = self.inner.lock();
                inner.state = DeviceState::Reset;
                self.ready.set();
                log::info!("DXVA - device reset");
            }
        }
    }

    fn open_session(&self, inner: &mut Inner, params: &CodecParams) -> Result<(), DecoderError> {
        validate_params(params)?;

        let session = match self.context.ensure_context(self.id, params.codec) {
            Ok(()) => {
                inner.attached = true;
                self.create_session(params)
            }
            Err(e) => Err(e.into()),
        };

        match session {
            Ok(session) => {
                inner.session = Some(session);
                inner.params = Some(params.clone());
                inner.state = DeviceState::Open;
                self.ready.set();
                Ok(())
            }
            Err(e) => {
                self.detach(inner);
                if matches!(e, DecoderError::Native(_)) {
                    log::error!("DXVA - failed to open decoder, it must be recreated: {}", e);
                    inner.unusable = true;
                }
                Err(e)
            }
        }
    }

    fn create_session(&self, params: &CodecParams) -> Result<Session, DecoderError> {
        let (profile, format) = self
            .context
            .get_input_and_target(params.codec, params.high_bitdepth())?;
        let desc = DecoderDesc {
            profile: profile.guid,
            width: params.width,
            height: params.height,
            format,
        };
        let config = self.context.get_config(&desc)?;

        let count = surface_count(params, self.config.presentation_headroom);
        let surfaces = self
            .context
            .create_surfaces(&desc, count, surface_alignment(params.codec))?;

        let pool = SurfacePool::new(surfaces.len());
        let mut raw = Vec::with_capacity(surfaces.len());
        for surface in surfaces {
            raw.push(surface.raw());
            if pool.add_surface(surface).is_none() {
                return Err(DecoderError::Native("surface pool rejected a surface".into()));
            }
        }

        let native = self.context.create_decoder(&desc, &config)?;
        let workarounds = self.context.workarounds(profile);

        log::info!(
            "DXVA - opened '{}' {}x{} with {} surfaces (bitstream raw {})",
            profile.name,
            params.width,
            params.height,
            count,
            config.bitstream_raw
        );

        Ok(Session {
            native,
            pool,
            surfaces: raw,
            config,
            workarounds,
            codec: params.codec,
        })
    }

    fn detach(&self, inner: &mut Inner) {
        if inner.attached {
            self.context.release(self.id);
            inner.attached = false;
        }
    }

    /// Drop the native decoder and the pool reference, then leave the context
    fn teardown(&self, inner: &mut Inner) {
        inner.present = None;
        if inner.session.take().is_some() {
            log::debug!("DXVA - session {} released", self.id);
        }
        self.detach(inner);
    }
}

pub struct DxvaDecoder {
    shared: Arc<Shared>,
    buffers: Arc<FrameBufferPool>,
    events: Arc<dyn DeviceEventSource>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl DxvaDecoder {
    pub fn new(
        context: Arc<DeviceContextManager>,
        events: Arc<dyn DeviceEventSource>,
        config: DecoderConfig,
    ) -> Self {
        let buffers = match config.frame_buffer_limit {
            Some(limit) => FrameBufferPool::with_limit(limit),
            None => FrameBufferPool::new(),
        };
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            context,
            config,
            inner: Mutex::new(Inner {
                state: DeviceState::Open,
                session: None,
                params: None,
                present: None,
                attached: false,
                unusable: false,
            }),
            ready: ReadySignal::new(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let subscription = events.subscribe(Box::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_device_event(event);
            }
        }));

        Self {
            shared,
            buffers,
            events,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    /// Only hardware surfaces are produced
    pub fn supports(&self, format: PixelFormat) -> bool {
        format == PixelFormat::D3d11Va
    }

    /// Pictures the render path may hold on top of the codec references
    pub fn allowed_references(&self) -> u32 {
        self.shared.config.presentation_headroom
    }

    pub fn state(&self) -> DeviceState {
        self.shared.inner.lock().state
    }

    pub fn is_unusable(&self) -> bool {
        self.shared.inner.lock().unusable
    }

    pub fn surface_pool(&self) -> Option<Arc<SurfacePool>> {
        self.shared
            .inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.pool.clone())
    }

    pub fn frame_buffers(&self) -> &Arc<FrameBufferPool> {
        &self.buffers
    }
}

impl HardwareDecoder for DxvaDecoder {
    fn open(&self, params: &CodecParams) -> Result<(), DecoderError> {
        let shared = &self.shared;
        if shared.ready.is_closed() {
            return Err(DecoderError::Closed);
        }

        let mut inner = shared.inner.lock();
        if inner.unusable {
            return Err(DecoderError::Unusable);
        }
        if inner.state == DeviceState::Lost {
            return Err(DecoderError::DeviceUnavailable);
        }
        if inner.session.is_some() {
            log::info!("DXVA - reopening decoder");
            shared.teardown(&mut inner);
        }
        shared.open_session(&mut inner, params)
    }

    fn decode(
        &self,
        codec: &mut dyn CodecSession,
        packet: &Packet,
    ) -> Result<DecodeStatus, DecoderError> {
        let mut inner = self.shared.inner.lock();
        if inner.unusable {
            return Err(DecoderError::Unusable);
        }
        if inner.state != DeviceState::Open {
            return Err(DecoderError::DeviceUnavailable);
        }
        let Some(session) = inner.session.as_mut() else {
            return Err(DecoderError::NotOpen);
        };

        let allocator = SurfaceAllocator {
            pool: &session.pool,
        };
        let mut accel = AccelContext {
            decoder: session.native.as_mut(),
            surfaces: &session.surfaces,
            config: &session.config,
            workarounds: session.workarounds,
        };
        let frame = match codec.decode(packet, &mut accel, &allocator) {
            Ok(frame) => frame,
            Err(CodecError::NoBuffer) => return Err(DecoderError::NotReady),
            Err(e) => return Err(e.into()),
        };

        let Some(frame) = frame else {
            return Ok(DecodeStatus::Buffer);
        };
        if !frame.surface().is_some_and(|raw| session.pool.contains(raw)) {
            log::warn!("DXVA - decoded frame does not hold a pool surface, dropping it");
            return Ok(DecodeStatus::Buffer);
        }
        inner.present = Some(frame);
        Ok(DecodeStatus::Picture)
    }

    fn get_picture(&self) -> Result<VideoPicture, DecoderError> {
        let mut inner = self.shared.inner.lock();
        if inner.unusable {
            return Err(DecoderError::Unusable);
        }
        let Some(frame) = inner.present.as_ref() else {
            return Err(DecoderError::NoPicture);
        };
        let handle = frame.buffer().and_then(|b| b.handle()).cloned();
        let (width, height, pts) = (frame.width, frame.height, frame.pts);

        let tracked = match (&handle, inner.session.as_ref()) {
            (Some(handle), Some(session)) => {
                Arc::ptr_eq(handle.pool(), &session.pool)
                    && session.pool.lookup(handle.raw()) == Some(handle.id())
            }
            _ => false,
        };
        let Some(handle) = handle.filter(|_| tracked) else {
            log::warn!("DXVA - present picture is not backed by a tracked surface");
            inner.present = None;
            return Err(DecoderError::InvalidSurface);
        };

        let Some(buffer) = self.buffers.get() else {
            return Err(DecoderError::NotReady);
        };
        if !handle.mark_render() {
            return Err(DecoderError::InvalidSurface);
        }
        inner.present = None;

        let surface_format = handle.format();
        buffer.set_picture(handle, PixelFormat::D3d11Va);
        Ok(VideoPicture {
            buffer,
            width,
            height,
            pts,
            pixel_format: PixelFormat::D3d11Va,
            surface_format,
        })
    }

    fn check(&self) -> Result<CheckStatus, DecoderError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if shared.ready.is_closed() {
            return Err(DecoderError::Closed);
        }
        if inner.unusable {
            return Err(DecoderError::Unusable);
        }

        if inner.state == DeviceState::Lost {
            let timeout = Duration::from_millis(shared.config.reset_timeout_ms);
            match MutexGuard::unlocked(&mut inner, || shared.ready.wait(timeout)) {
                WaitOutcome::Ready => {}
                WaitOutcome::Closed => return Err(DecoderError::Closed),
                WaitOutcome::TimedOut => {
                    log::warn!(
                        "DXVA - device still lost after {} ms",
                        shared.config.reset_timeout_ms
                    );
                    return Err(DecoderError::DeviceUnavailable);
                }
            }
        }

        match inner.state {
            DeviceState::Lost => Err(DecoderError::DeviceUnavailable),
            DeviceState::Reset => {
                let Some(params) = inner.params.clone() else {
                    inner.state = DeviceState::Open;
                    return Ok(CheckStatus::Ok);
                };
                log::info!("DXVA - recreating decoder after device reset");
                shared.teardown(&mut inner);
                shared.open_session(&mut inner, &params)?;
                Ok(CheckStatus::Flushed)
            }
            DeviceState::Open => {
                let Some(session) = inner.session.as_mut() else {
                    return Err(DecoderError::NotOpen);
                };
                if matches!(session.codec, Codec::H264 | Codec::Vc1 | Codec::Wmv3) {
                    match session.native.status_report() {
                        Ok(Some(report)) if report.status != 0 => log::warn!(
                            "DXVA - decoding of frame {} reported status {}",
                            report.frame_index,
                            report.status
                        ),
                        Ok(_) => {}
                        Err(e) => log::warn!("DXVA - failed to query status report: {}", e),
                    }
                }
                Ok(CheckStatus::Ok)
            }
        }
    }

    fn close(&self) {
        self.shared.ready.close();
        {
            let mut inner = self.shared.inner.lock();
            self.shared.teardown(&mut inner);
            inner.params = None;
        }
        if let Some(id) = self.subscription.lock().take() {
            self.events.unsubscribe(id);
            log::debug!("DXVA - decoder {} closed", self.shared.id);
        }
    }

    fn info(&self) -> &str {
        "DXVA (Hardware)"
    }
}

impl Drop for DxvaDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
