//! Sequence Parameter Set decoding.
//!
//! Only the fields needed for stream metadata are kept: the coded picture
//! size and the VUI frame rate. Everything else is read and discarded, in
//! bitstream order, so the cursor lands on the next field of interest.
//!
//! The decoder checks that bits remain at each stage boundary (after the
//! header, the high-profile chroma block, the picture-order-count block,
//! the picture size, the cropping window, and each VUI sub-block) and
//! fails with [`SpsError::MalformedBitstream`] instead of reading past the
//! end of the payload.

use tracing::debug;

use crate::bits::BitReader;
use crate::error::SpsError;

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u8; 4] = [100, 110, 122, 144];

/// `aspect_ratio_idc` value announcing an explicit sample aspect ratio.
const EXTENDED_SAR: u32 = 255;

/// Picture parameters recovered from an SPS.
///
/// All fields are zero until an SPS was decoded successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsInfo {
    /// Coded width in pixels (macroblock aligned, cropping not applied).
    pub width: u32,
    /// Coded height in pixels (macroblock aligned, cropping not applied).
    pub height: u32,
    /// Frames per second from the VUI timing info, or 0 when absent.
    pub frame_rate: u32,
}

impl SpsInfo {
    /// A decoded SPS always yields non-zero dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Strip emulation prevention bytes (`00 00 03` becomes `00 00`).
///
/// The scan continues over the already-unescaped bytes, so a removed `03`
/// can expose another `00 00 03` pattern.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut rbsp = data.to_vec();
    let mut i = 0;
    while i + 2 < rbsp.len() {
        if rbsp[i] == 0x00 && rbsp[i + 1] == 0x00 && rbsp[i + 2] == 0x03 {
            rbsp.remove(i + 2);
        }
        i += 1;
    }
    rbsp
}

/// Decode width, height and frame rate from an SPS NAL unit.
///
/// `payload` starts with the NAL header byte and may still contain
/// emulation prevention bytes.
pub fn decode_sps(payload: &[u8]) -> Result<SpsInfo, SpsError> {
    let rbsp = remove_emulation_prevention(payload);
    let mut reader = BitReader::new(&rbsp);

    reader.enter("header");
    let _forbidden_zero_bit = reader.read_bits(1)?;
    let _nal_ref_idc = reader.read_bits(2)?;
    let _nal_unit_type = reader.read_bits(5)?;
    let profile_idc = reader.read_bits(8)? as u8;
    let _constraint_flags = reader.read_bits(8)?;
    let level_idc = reader.read_bits(8)?;
    reader.ensure_remaining()?;

    reader.enter("seq_parameter_set_id");
    let sps_id = reader.read_ue()?;

    if HIGH_PROFILES.contains(&profile_idc) {
        reader.enter("chroma_format");
        skip_high_profile_fields(&mut reader)?;
        reader.ensure_remaining()?;
    }

    reader.enter("pic_order_cnt");
    let _log2_max_frame_num_minus4 = reader.read_ue()?;
    skip_pic_order_cnt(&mut reader)?;
    let _num_ref_frames = reader.read_ue()?;
    reader.ensure_remaining()?;

    reader.enter("picture_size");
    let _gaps_in_frame_num_allowed = reader.read_bit()?;
    let width = macroblocks_to_pixels(reader.read_ue()?)?;
    let height = macroblocks_to_pixels(reader.read_ue()?)?;
    reader.ensure_remaining()?;

    reader.enter("frame_cropping");
    let frame_mbs_only = reader.read_bit()?;
    if !frame_mbs_only {
        let _mb_adaptive_frame_field = reader.read_bit()?;
    }
    let _direct_8x8_inference = reader.read_bit()?;
    if reader.read_bit()? {
        for _ in 0..4 {
            let _crop_offset = reader.read_ue()?;
        }
        reader.ensure_remaining()?;
    }

    reader.enter("vui_parameters");
    let frame_rate = if reader.read_bit()? {
        decode_vui_frame_rate(&mut reader)?
    } else {
        0
    };

    let info = SpsInfo {
        width,
        height,
        frame_rate,
    };
    debug!(
        profile_idc,
        level_idc,
        sps_id,
        width = info.width,
        height = info.height,
        frame_rate = info.frame_rate,
        "Decoded SPS"
    );
    Ok(info)
}

/// Chroma format, bit depths and scaling matrix flags.
fn skip_high_profile_fields(reader: &mut BitReader<'_>) -> Result<(), SpsError> {
    let chroma_format_idc = reader.read_ue()?;
    if chroma_format_idc == 3 {
        let _separate_colour_plane = reader.read_bit()?;
    }
    let _bit_depth_luma_minus8 = reader.read_ue()?;
    let _bit_depth_chroma_minus8 = reader.read_ue()?;
    let _qpprime_y_zero_transform_bypass = reader.read_bit()?;

    if reader.read_bit()? {
        // Only the eight list-present flags are consumed; scaling list
        // bodies are not parsed. Encoders used with the publisher do not
        // send them.
        for _ in 0..8 {
            let _scaling_list_present = reader.read_bit()?;
        }
    }
    Ok(())
}

fn skip_pic_order_cnt(reader: &mut BitReader<'_>) -> Result<(), SpsError> {
    match reader.read_ue()? {
        0 => {
            let _log2_max_poc_lsb_minus4 = reader.read_ue()?;
        }
        1 => {
            let _delta_pic_order_always_zero = reader.read_bit()?;
            let _offset_for_non_ref_pic = reader.read_se()?;
            let _offset_for_top_to_bottom_field = reader.read_se()?;
            let cycle_len = reader.read_ue()?;
            for _ in 0..cycle_len {
                let _offset_for_ref_frame = reader.read_se()?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn macroblocks_to_pixels(minus1: u32) -> Result<u32, SpsError> {
    minus1
        .checked_add(1)
        .and_then(|mbs| mbs.checked_mul(16))
        .ok_or(SpsError::InvalidValue("picture size overflows u32"))
}

/// Walk the VUI up to the timing info and derive frames per second.
fn decode_vui_frame_rate(reader: &mut BitReader<'_>) -> Result<u32, SpsError> {
    reader.enter("vui_aspect_ratio");
    if reader.read_bit()? {
        let aspect_ratio_idc = reader.read_bits(8)?;
        if aspect_ratio_idc == EXTENDED_SAR {
            let _sar_width = reader.read_bits(16)?;
            let _sar_height = reader.read_bits(16)?;
            reader.ensure_remaining()?;
        }
    }

    reader.enter("vui_overscan");
    if reader.read_bit()? {
        let _overscan_appropriate = reader.read_bit()?;
    }

    reader.enter("vui_video_signal");
    if reader.read_bit()? {
        let _video_format = reader.read_bits(3)?;
        let _video_full_range = reader.read_bit()?;
        if reader.read_bit()? {
            let _colour_primaries = reader.read_bits(8)?;
            let _transfer_characteristics = reader.read_bits(8)?;
            let _matrix_coefficients = reader.read_bits(8)?;
            reader.ensure_remaining()?;
        }
    }

    reader.enter("vui_chroma_loc");
    if reader.read_bit()? {
        let _top_field = reader.read_ue()?;
        let _bottom_field = reader.read_ue()?;
    }

    reader.enter("vui_timing_info");
    let mut frame_rate = 0;
    if reader.read_bit()? {
        let num_units_in_tick = reader.read_bits(32)?;
        let time_scale = reader.read_bits(32)?;
        if num_units_in_tick == 0 {
            return Err(SpsError::InvalidValue("num_units_in_tick is zero"));
        }
        frame_rate = (u64::from(time_scale) / (2 * u64::from(num_units_in_tick))) as u32;
    }
    reader.ensure_remaining()?;

    Ok(frame_rate)
}
