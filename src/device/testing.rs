// Test doubles for the device and decoding library collaborators

use super::{
    AdapterInfo, BitstreamConfig, DecodeSurface, DecoderDesc, DeviceError, NO_ENCRYPT,
    NativeDecoder, RawSurface, StatusReport, SurfaceFormat, TextureArrayDesc, VENDOR_NVIDIA,
    VideoDevice, VideoService,
};
use crate::codec::profiles::PROFILES;
use crate::codec::{
    AccelContext, BufferFlags, CodecError, CodecFrame, CodecSession, FrameAllocator, Packet,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Shared, inspectable state of a fake device
pub(crate) struct FakeState {
    profiles: Mutex<Vec<Uuid>>,
    formats: Mutex<Vec<SurfaceFormat>>,
    configs: Mutex<Vec<BitstreamConfig>>,
    adapter: Mutex<AdapterInfo>,
    failing: Mutex<HashSet<&'static str>>,
    withheld_surfaces: AtomicUsize,
    last_texture: Mutex<Option<TextureArrayDesc>>,
    status: Mutex<Option<StatusReport>>,
    services_opened: AtomicUsize,
    services_live: AtomicUsize,
    surfaces_live: AtomicUsize,
    decoders_created: AtomicUsize,
    decoders_live: AtomicUsize,
    submits: AtomicUsize,
    status_polls: AtomicUsize,
    next_raw: AtomicUsize,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            profiles: Mutex::new(PROFILES.iter().map(|p| p.guid).collect()),
            formats: Mutex::new(vec![SurfaceFormat::Nv12, SurfaceFormat::P010]),
            configs: Mutex::new(vec![
                BitstreamConfig {
                    bitstream_raw: 1,
                    encryption: NO_ENCRYPT,
                    decoder_specific: 0,
                },
                BitstreamConfig {
                    bitstream_raw: 2,
                    encryption: NO_ENCRYPT,
                    decoder_specific: 0,
                },
            ]),
            adapter: Mutex::new(AdapterInfo {
                vendor_id: VENDOR_NVIDIA,
                device_id: 0x1c82,
                driver_version: [27, 21, 14, 5671],
                description: "Fake GPU".to_string(),
            }),
            failing: Mutex::new(HashSet::new()),
            withheld_surfaces: AtomicUsize::new(0),
            last_texture: Mutex::new(None),
            status: Mutex::new(None),
            services_opened: AtomicUsize::new(0),
            services_live: AtomicUsize::new(0),
            surfaces_live: AtomicUsize::new(0),
            decoders_created: AtomicUsize::new(0),
            decoders_live: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            status_polls: AtomicUsize::new(0),
            next_raw: AtomicUsize::new(0x10000),
        })
    }

    /// Make every later call named `call` fail
    pub fn fail(&self, call: &'static str) {
        self.failing.lock().insert(call);
    }

    pub fn heal(&self, call: &'static str) {
        self.failing.lock().remove(call);
    }

    fn fail_if(&self, call: &'static str) -> Result<(), DeviceError> {
        if self.failing.lock().contains(call) {
            return Err(DeviceError::CallFailed {
                call,
                code: 0x887a_0005,
            });
        }
        Ok(())
    }

    pub fn set_profiles(&self, profiles: Vec<Uuid>) {
        *self.profiles.lock() = profiles;
    }

    pub fn set_formats(&self, formats: Vec<SurfaceFormat>) {
        *self.formats.lock() = formats;
    }

    pub fn set_configs(&self, configs: Vec<BitstreamConfig>) {
        *self.configs.lock() = configs;
    }

    pub fn set_adapter(&self, vendor_id: u32, driver_version: [u16; 4]) {
        let mut adapter = self.adapter.lock();
        adapter.vendor_id = vendor_id;
        adapter.driver_version = driver_version;
    }

    pub fn set_status(&self, status: Option<StatusReport>) {
        *self.status.lock() = status;
    }

    /// Return `n` fewer surfaces than requested
    pub fn short_surfaces(&self, n: usize) {
        self.withheld_surfaces.store(n, Ordering::SeqCst);
    }

    pub fn last_texture(&self) -> Option<TextureArrayDesc> {
        *self.last_texture.lock()
    }

    pub fn services_opened(&self) -> usize {
        self.services_opened.load(Ordering::SeqCst)
    }

    pub fn services_live(&self) -> usize {
        self.services_live.load(Ordering::SeqCst)
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces_live.load(Ordering::SeqCst)
    }

    pub fn decoders_created(&self) -> usize {
        self.decoders_created.load(Ordering::SeqCst)
    }

    pub fn decoders_live(&self) -> usize {
        self.decoders_live.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeSurface {
    raw: RawSurface,
    format: SurfaceFormat,
    slice: u32,
    state: Arc<FakeState>,
}

impl FakeSurface {
    fn create(state: &Arc<FakeState>, raw: usize, format: SurfaceFormat, slice: u32) -> Arc<dyn DecodeSurface> {
        state.surfaces_live.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeSurface {
            raw: RawSurface(raw),
            format,
            slice,
            state: state.clone(),
        })
    }

    /// A lone NV12 surface with its own state for counting releases
    pub fn standalone(raw: usize) -> (Arc<dyn DecodeSurface>, Arc<FakeState>) {
        let state = FakeState::new();
        let surface = Self::create(&state, raw, SurfaceFormat::Nv12, 0);
        (surface, state)
    }
}

impl DecodeSurface for FakeSurface {
    fn raw(&self) -> RawSurface {
        self.raw
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn array_slice(&self) -> u32 {
        self.slice
    }
}

impl Drop for FakeSurface {
    fn drop(&mut self) {
        self.state.surfaces_live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeNativeDecoder {
    state: Arc<FakeState>,
}

impl NativeDecoder for FakeNativeDecoder {
    fn submit(&mut self, _target: RawSurface, _bitstream: &[u8]) -> Result<(), DeviceError> {
        self.state.fail_if("submit")?;
        self.state.submits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn status_report(&mut self) -> Result<Option<StatusReport>, DeviceError> {
        self.state.fail_if("status_report")?;
        self.state.status_polls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.state.status.lock())
    }
}

impl Drop for FakeNativeDecoder {
    fn drop(&mut self) {
        self.state.decoders_live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeService {
    state: Arc<FakeState>,
}

impl VideoService for FakeService {
    fn adapter_info(&self) -> AdapterInfo {
        self.state.adapter.lock().clone()
    }

    fn decoder_profiles(&self) -> Result<Vec<Uuid>, DeviceError> {
        self.state.fail_if("decoder_profiles")?;
        Ok(self.state.profiles.lock().clone())
    }

    fn check_format(&self, _profile: &Uuid, format: SurfaceFormat) -> Result<bool, DeviceError> {
        self.state.fail_if("check_format")?;
        Ok(self.state.formats.lock().contains(&format))
    }

    fn decoder_configs(&self, _desc: &DecoderDesc) -> Result<Vec<BitstreamConfig>, DeviceError> {
        self.state.fail_if("decoder_configs")?;
        Ok(self.state.configs.lock().clone())
    }

    fn create_surfaces(
        &self,
        desc: &TextureArrayDesc,
    ) -> Result<Vec<Arc<dyn DecodeSurface>>, DeviceError> {
        self.state.fail_if("create_surfaces")?;
        *self.state.last_texture.lock() = Some(*desc);

        let count = (desc.array_size as usize)
            .saturating_sub(self.state.withheld_surfaces.load(Ordering::SeqCst));
        Ok((0..count)
            .map(|slice| {
                let raw = self.state.next_raw.fetch_add(0x100, Ordering::SeqCst);
                FakeSurface::create(&self.state, raw, desc.format, slice as u32)
            })
            .collect())
    }

    fn create_decoder(
        &self,
        _desc: &DecoderDesc,
        _config: &BitstreamConfig,
    ) -> Result<Box<dyn NativeDecoder>, DeviceError> {
        self.state.fail_if("create_decoder")?;
        self.state.decoders_created.fetch_add(1, Ordering::SeqCst);
        self.state.decoders_live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeNativeDecoder {
            state: self.state.clone(),
        }))
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.state.services_live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct FakeDevice {
    pub state: Arc<FakeState>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: FakeState::new(),
        }
    }
}

impl VideoDevice for FakeDevice {
    fn open_video_service(&self) -> Result<Arc<dyn VideoService>, DeviceError> {
        self.state.fail_if("open_video_service")?;
        self.state.services_opened.fetch_add(1, Ordering::SeqCst);
        self.state.services_live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeService {
            state: self.state.clone(),
        }))
    }
}

/// Decoding library stand-in that keeps the last `max_refs` pictures as
/// references. Empty packets produce no picture.
pub(crate) struct FakeCodec {
    width: u32,
    height: u32,
    max_refs: usize,
    refs: VecDeque<CodecFrame>,
}

impl FakeCodec {
    pub fn new(width: u32, height: u32, max_refs: usize) -> Self {
        Self {
            width,
            height,
            max_refs,
            refs: VecDeque::new(),
        }
    }

    /// Drop all reference pictures
    pub fn flush(&mut self) {
        self.refs.clear();
    }

    pub fn held(&self) -> usize {
        self.refs.len()
    }
}

impl CodecSession for FakeCodec {
    fn decode(
        &mut self,
        packet: &Packet,
        accel: &mut AccelContext<'_>,
        allocator: &dyn FrameAllocator,
    ) -> Result<Option<CodecFrame>, CodecError> {
        if packet.data.is_empty() {
            return Ok(None);
        }

        let mut frame = CodecFrame::new(self.width, self.height, packet.pts);
        allocator.get_buffer(&mut frame, BufferFlags::REF)?;
        let target = frame.surface().ok_or(CodecError::NoBuffer)?;
        if !accel.surfaces.contains(&target) {
            return Err(CodecError::DecodeError(format!(
                "surface {} is not in the accelerator table",
                target
            )));
        }
        accel.decoder.submit(target, &packet.data)?;

        self.refs.push_back(frame.clone());
        while self.refs.len() > self.max_refs {
            self.refs.pop_front();
        }
        Ok(Some(frame))
    }
}
