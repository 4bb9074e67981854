// Hardware decoder profiles
// Ordered by preference: the first profile the device supports wins.

use super::Codec;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq)]
pub struct ProfileInfo {
    pub name: &'static str,
    pub guid: Uuid,
    /// Codecs this profile decodes
    pub codecs: &'static [Codec],
    /// Decodes into 10/16-bit surfaces
    pub high_bitdepth: bool,
}

impl ProfileInfo {
    pub fn decodes(&self, codec: Codec) -> bool {
        self.codecs.contains(&codec)
    }
}

pub const MPEG2_VLD: Uuid = Uuid::from_u128(0xee27417f_5e28_4e65_beea_1d26b508adc9);
pub const MPEG1_AND_2_VLD: Uuid = Uuid::from_u128(0x86695f12_340e_4f04_9fd3_9253dd327460);
pub const H264_VLD_NOFGT: Uuid = Uuid::from_u128(0x1b81be68_a0c7_11d3_b984_00c04f2e73c5);
pub const H264_VLD_FGT: Uuid = Uuid::from_u128(0x1b81be69_a0c7_11d3_b984_00c04f2e73c5);
pub const VC1_D2010: Uuid = Uuid::from_u128(0x1b81bea4_a0c7_11d3_b984_00c04f2e73c5);
pub const VC1_VLD: Uuid = Uuid::from_u128(0x1b81bea3_a0c7_11d3_b984_00c04f2e73c5);
pub const HEVC_VLD_MAIN: Uuid = Uuid::from_u128(0x5b11d51b_2f4c_4452_bcc3_09f2a1160cc0);
pub const HEVC_VLD_MAIN10: Uuid = Uuid::from_u128(0x107af0e0_ef1a_4d19_aba8_67a163073d13);
pub const VP9_VLD_PROFILE0: Uuid = Uuid::from_u128(0x463707f8_a1d0_4585_876d_83aa6d60b89e);
pub const VP9_VLD_10BIT_PROFILE2: Uuid = Uuid::from_u128(0xa4c749ef_6ecf_48aa_8448_50a7a1165ff7);
/// Intel ClearVideo H.264; needs the ClearVideo bitstream workaround
pub const INTEL_CLEAR_VIDEO_H264: Uuid = Uuid::from_u128(0x604f8e68_4951_4c54_88fe_abd25c15b3d6);

const VC1_CODECS: &[Codec] = &[Codec::Vc1, Codec::Wmv3];

pub static PROFILES: [ProfileInfo; 11] = [
    ProfileInfo {
        name: "MPEG-2 variable-length decoder",
        guid: MPEG2_VLD,
        codecs: &[Codec::Mpeg2],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "MPEG-1/2 variable-length decoder",
        guid: MPEG1_AND_2_VLD,
        codecs: &[Codec::Mpeg2],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "H.264 variable-length decoder, no film grain technology",
        guid: H264_VLD_NOFGT,
        codecs: &[Codec::H264],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "H.264 variable-length decoder, film grain technology",
        guid: H264_VLD_FGT,
        codecs: &[Codec::H264],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "VC-1 variable-length decoder (2010)",
        guid: VC1_D2010,
        codecs: VC1_CODECS,
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "VC-1 variable-length decoder",
        guid: VC1_VLD,
        codecs: VC1_CODECS,
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "HEVC / H.265 variable-length decoder, main",
        guid: HEVC_VLD_MAIN,
        codecs: &[Codec::Hevc],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "HEVC / H.265 variable-length decoder, main10",
        guid: HEVC_VLD_MAIN10,
        codecs: &[Codec::Hevc],
        high_bitdepth: true,
    },
    ProfileInfo {
        name: "VP9 variable-length decoder, profile 0",
        guid: VP9_VLD_PROFILE0,
        codecs: &[Codec::Vp9],
        high_bitdepth: false,
    },
    ProfileInfo {
        name: "VP9 variable-length decoder, 10-bit profile 2",
        guid: VP9_VLD_10BIT_PROFILE2,
        codecs: &[Codec::Vp9],
        high_bitdepth: true,
    },
    ProfileInfo {
        name: "Intel H.264 VLD, no FGT (ClearVideo)",
        guid: INTEL_CLEAR_VIDEO_H264,
        codecs: &[Codec::H264],
        high_bitdepth: false,
    },
];

static BY_GUID: Lazy<HashMap<Uuid, &'static ProfileInfo>> =
    Lazy::new(|| PROFILES.iter().map(|p| (p.guid, p)).collect());

/// Look up a known profile by GUID
pub fn profile(guid: &Uuid) -> Option<&'static ProfileInfo> {
    BY_GUID.get(guid).copied()
}

/// Display name for a profile GUID, known or not
pub fn profile_name(guid: &Uuid) -> String {
    match profile(guid) {
        Some(info) => info.name.to_string(),
        None => format!("Unknown profile {}", guid),
    }
}
