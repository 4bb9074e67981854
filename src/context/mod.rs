// Device context manager
// Shares one video service between all attached decoders, caches device
// capabilities and negotiates decoder profiles, configs and surfaces.

use crate::codec::profiles::{self, INTEL_CLEAR_VIDEO_H264, PROFILES, ProfileInfo};
use crate::codec::{Codec, Workarounds};
use crate::device::{
    AdapterInfo, BitstreamConfig, DecodeSurface, DecoderDesc, DeviceError, NO_ENCRYPT,
    NativeDecoder, SurfaceFormat, TextureArrayDesc, VENDOR_AMD, VideoDevice, VideoService,
};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// AMD drivers before this version need zigzag scaling lists
const AMD_ZIGZAG_DRIVER: [u16; 4] = [8, 17, 10, 1404];

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("No video context")]
    NoContext,
}

/// Capabilities queried once per video context
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub adapter: AdapterInfo,
    pub profiles: Vec<Uuid>,
}

impl DeviceCaps {
    pub fn supports_profile(&self, guid: &Uuid) -> bool {
        self.profiles.contains(guid)
    }

    pub fn supports_codec(&self, codec: Codec) -> bool {
        PROFILES
            .iter()
            .any(|p| p.decodes(codec) && self.supports_profile(&p.guid))
    }
}

struct ContextInner {
    service: Option<Arc<dyn VideoService>>,
    caps: Option<DeviceCaps>,
    decoders: Vec<Uuid>,
}

pub struct DeviceContextManager {
    device: Arc<dyn VideoDevice>,
    inner: Mutex<ContextInner>,
}

/// Log a failed native call with its name and pass the error on
fn check<T>(call: &'static str, result: Result<T, DeviceError>) -> Result<T, ContextError> {
    result.map_err(|e| {
        log::error!("DXVA - failed executing {}: {}", call, e);
        ContextError::Device(e)
    })
}

fn align(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

impl DeviceContextManager {
    pub fn new(device: Arc<dyn VideoDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            inner: Mutex::new(ContextInner {
                service: None,
                caps: None,
                decoders: Vec::new(),
            }),
        })
    }

    /// Attach `decoder`, creating the video context on first use
    pub fn ensure_context(&self, decoder: Uuid, codec: Codec) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();

        if inner.service.is_none() {
            let service = check("open_video_service", self.device.open_video_service())?;
            let caps = Self::query_caps(service.as_ref())?;
            inner.service = Some(service);
            inner.caps = Some(caps);
            log::info!("DXVA - video context created");
        }

        let supported = inner
            .caps
            .as_ref()
            .is_some_and(|caps| caps.supports_codec(codec));
        if !supported {
            if inner.decoders.is_empty() {
                inner.caps = None;
                inner.service = None;
            }
            return Err(ContextError::Unsupported(format!(
                "no decoder profile for {:?}",
                codec
            )));
        }

        if !inner.decoders.contains(&decoder) {
            inner.decoders.push(decoder);
        }
        Ok(())
    }

    fn query_caps(service: &dyn VideoService) -> Result<DeviceCaps, ContextError> {
        let adapter = service.adapter_info();
        let profiles = check("decoder_profiles", service.decoder_profiles())?;

        log::info!(
            "DXVA - {} (vendor {:#06x}, device {:#06x}) supports {} decoder profile(s):",
            adapter.description,
            adapter.vendor_id,
            adapter.device_id,
            profiles.len()
        );
        for guid in &profiles {
            log::info!("DXVA -   {}", profiles::profile_name(guid));
        }

        Ok(DeviceCaps { adapter, profiles })
    }

    fn service(&self) -> Result<(Arc<dyn VideoService>, DeviceCaps), ContextError> {
        let inner = self.inner.lock();
        match (&inner.service, &inner.caps) {
            (Some(service), Some(caps)) => Ok((service.clone(), caps.clone())),
            _ => Err(ContextError::NoContext),
        }
    }

    /// Pick the decoder profile and output surface format for a codec
    pub fn get_input_and_target(
        &self,
        codec: Codec,
        high_bitdepth: bool,
    ) -> Result<(&'static ProfileInfo, SurfaceFormat), ContextError> {
        let (service, caps) = self.service()?;

        let targets: &[SurfaceFormat] = if high_bitdepth {
            &[SurfaceFormat::P010, SurfaceFormat::P016]
        } else {
            &[SurfaceFormat::Nv12]
        };

        for profile in PROFILES.iter() {
            if !profile.decodes(codec) || profile.high_bitdepth != high_bitdepth {
                continue;
            }
            if !caps.supports_profile(&profile.guid) {
                continue;
            }
            log::debug!("DXVA - trying '{}'", profile.name);

            for format in targets {
                if check("check_format", service.check_format(&profile.guid, *format))? {
                    log::info!("DXVA - selected '{}' with {:?}", profile.name, format);
                    return Ok((profile, *format));
                }
            }
        }

        Err(ContextError::Unsupported(format!(
            "no {}decoder profile for {:?}",
            if high_bitdepth { "high bit depth " } else { "" },
            codec
        )))
    }

    /// Choose the best bitstream configuration for `desc`
    pub fn get_config(&self, desc: &DecoderDesc) -> Result<BitstreamConfig, ContextError> {
        let (service, _) = self.service()?;
        let configs = check("decoder_configs", service.decoder_configs(desc))?;
        let is_h264 = profiles::profile(&desc.profile).is_some_and(|p| p.decodes(Codec::H264));

        let mut best: Option<(u32, BitstreamConfig)> = None;
        for config in configs {
            let score = match config.bitstream_raw {
                1 => 1,
                2 if is_h264 => 2,
                _ => continue,
            };
            if config.encryption != NO_ENCRYPT {
                continue;
            }
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, config));
            }
        }

        best.map(|(_, config)| config).ok_or_else(|| {
            ContextError::Unsupported(format!(
                "no raw bitstream configuration for {}",
                profiles::profile_name(&desc.profile)
            ))
        })
    }

    /// Allocate `count` output surfaces in one texture array
    pub fn create_surfaces(
        &self,
        desc: &DecoderDesc,
        count: u32,
        alignment: u32,
    ) -> Result<Vec<Arc<dyn DecodeSurface>>, ContextError> {
        let (service, _) = self.service()?;
        let texture = TextureArrayDesc {
            profile: desc.profile,
            width: align(desc.width, alignment),
            height: align(desc.height, alignment),
            format: desc.format,
            array_size: count,
        };

        let surfaces = check("create_surfaces", service.create_surfaces(&texture))?;
        if surfaces.len() != count as usize {
            log::error!(
                "DXVA - requested {} surfaces, device returned {}",
                count,
                surfaces.len()
            );
            return Err(ContextError::Device(DeviceError::CallFailed {
                call: "create_surfaces",
                code: 0,
            }));
        }

        log::info!(
            "DXVA - allocated {} surfaces of {}x{} {:?}",
            count,
            texture.width,
            texture.height,
            texture.format
        );
        Ok(surfaces)
    }

    pub fn create_decoder(
        &self,
        desc: &DecoderDesc,
        config: &BitstreamConfig,
    ) -> Result<Box<dyn NativeDecoder>, ContextError> {
        let (service, _) = self.service()?;
        check("create_decoder", service.create_decoder(desc, config))
    }

    /// Decoding library workarounds for this adapter and profile
    pub fn workarounds(&self, profile: &ProfileInfo) -> Workarounds {
        let inner = self.inner.lock();
        let old_amd = inner.caps.as_ref().is_some_and(|caps| {
            caps.adapter.vendor_id == VENDOR_AMD && caps.adapter.driver_version < AMD_ZIGZAG_DRIVER
        });
        Workarounds {
            scaling_list_zigzag: old_amd,
            intel_clear_video: profile.guid == INTEL_CLEAR_VIDEO_H264,
        }
    }

    /// Detach `decoder`; the video context goes away with the last one
    pub fn release(&self, decoder: Uuid) {
        let service = {
            let mut inner = self.inner.lock();
            inner.decoders.retain(|d| *d != decoder);
            if !inner.decoders.is_empty() {
                return;
            }
            inner.caps = None;
            inner.service.take()
        };
        if service.is_some() {
            log::info!("DXVA - last decoder released, destroying video context");
        }
    }

    /// Forget the video service of a lost device. Attached decoders stay
    /// attached; the next `ensure_context` opens a service on the new device.
    pub fn invalidate(&self) {
        let service = {
            let mut inner = self.inner.lock();
            inner.caps = None;
            inner.service.take()
        };
        if service.is_some() {
            log::info!("DXVA - device lost, dropping video context");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().service.is_some()
    }

    pub fn attached(&self) -> usize {
        self.inner.lock().decoders.len()
    }

    pub fn capabilities(&self) -> Option<DeviceCaps> {
        self.inner.lock().caps.clone()
    }
}
