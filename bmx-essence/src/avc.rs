//! AVC (H.264/ITU-T Rec. H.264) Annex B bitstream parser.
//!
//! Scans for `0x000001` start-code-prefixed NAL units, tracking SPS/PPS
//! parameter sets and the slice-header fields needed to detect frame
//! boundaries and compute picture order count.

use std::collections::HashMap;

use crate::bitreader::BitReader;
use crate::error::{Error, Result};
use crate::{EssenceParser, FrameType, NULL_FRAME_SIZE, NULL_OFFSET};

#[derive(Debug, Clone, Default)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_set_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_frame_num: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub num_ref_frames_in_pic_order_cnt_cycle: u32,
    pub offset_for_ref_frame: Vec<i32>,
    pub separate_colour_plane_flag: bool,
    pub frame_mbs_only_flag: bool,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub vui_present: bool,
    pub timing_num_units_in_tick: u32,
    pub timing_time_scale: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub redundant_pic_cnt_present_flag: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub idr_flag: bool,
    pub frame_type: Option<FrameType>,
    pub frame_num: u32,
    pub pic_parameter_set_id: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub pic_order_cnt: i32,
    pub nal_ref_idc: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalKind {
    NonIdrSlice,
    IdrSlice,
    Sps,
    Pps,
    Other,
}

fn nal_kind(nal_unit_type: u8) -> NalKind {
    match nal_unit_type {
        1 => NalKind::NonIdrSlice,
        5 => NalKind::IdrSlice,
        7 => NalKind::Sps,
        8 => NalKind::Pps,
        _ => NalKind::Other,
    }
}

/// Find the start of the NAL unit (the byte following the start code) that
/// begins at or after `from`. Returns `None` if no start code is found.
fn find_start_code(bytes: &[u8], from: usize) -> Option<usize> {
    if bytes.len() < 3 {
        return None;
    }
    let mut i = from;
    while i + 3 <= bytes.len() {
        if bytes[i] == 0 && bytes[i + 1] == 0 && bytes[i + 2] == 1 {
            return Some(i + 3);
        }
        i += 1;
    }
    None
}

/// Strip emulation-prevention bytes (`0x03` following two zero bytes) from a
/// NAL payload before bit-level parsing.
fn strip_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zero_run = 0;
    for &b in nal {
        if zero_run >= 2 && b == 0x03 {
            zero_run = 0;
            continue;
        }
        out.push(b);
        zero_run = if b == 0 { zero_run + 1 } else { 0 };
    }
    out
}

/// `ref_pic_list_modification()` for one list direction (7.3.3.1): consume
/// the flag and, if set, the modification-op loop. Values aren't retained —
/// this parser only needs correct bit alignment for what follows.
fn skip_ref_pic_list_modification(r: &mut BitReader) -> Result<()> {
    let flag = r.read_flag()?;
    if !flag {
        return Ok(());
    }
    loop {
        let idc = r.read_ue()?;
        if idc == 3 {
            break;
        }
        match idc {
            0 | 1 => {
                let _abs_diff_pic_num_minus1 = r.read_ue()?;
            }
            2 => {
                let _long_term_pic_num = r.read_ue()?;
            }
            other => {
                return Err(Error::SyntaxViolation(format!(
                    "invalid modification_of_pic_nums_idc {other}"
                )))
            }
        }
    }
    Ok(())
}

/// `pred_weight_table()` (7.3.3.2), consumed for bit alignment only.
fn skip_pred_weight_table(
    r: &mut BitReader,
    chroma_array_type: u32,
    num_ref_idx_l0_active_minus1: u32,
    num_ref_idx_l1_active_minus1: Option<u32>,
) -> Result<()> {
    let _luma_log2_weight_denom = r.read_ue()?;
    if chroma_array_type != 0 {
        let _chroma_log2_weight_denom = r.read_ue()?;
    }
    skip_pred_weight_list(r, chroma_array_type, num_ref_idx_l0_active_minus1)?;
    if let Some(n1) = num_ref_idx_l1_active_minus1 {
        skip_pred_weight_list(r, chroma_array_type, n1)?;
    }
    Ok(())
}

fn skip_pred_weight_list(
    r: &mut BitReader,
    chroma_array_type: u32,
    num_ref_idx_active_minus1: u32,
) -> Result<()> {
    for _ in 0..=num_ref_idx_active_minus1 {
        if r.read_flag()? {
            let _luma_weight = r.read_se()?;
            let _luma_offset = r.read_se()?;
        }
        if chroma_array_type != 0 && r.read_flag()? {
            for _ in 0..2 {
                let _chroma_weight = r.read_se()?;
                let _chroma_offset = r.read_se()?;
            }
        }
    }
    Ok(())
}

/// `dec_ref_pic_marking()` (7.3.3.3). Returns whether
/// `memory_management_control_operation == 5` ("MMCO-5", reset to zero) was
/// signalled, which resets POC/`FrameNumOffset` state for the next picture.
fn parse_dec_ref_pic_marking(r: &mut BitReader, idr_flag: bool) -> Result<bool> {
    if idr_flag {
        let _no_output_of_prior_pics_flag = r.read_flag()?;
        let _long_term_reference_flag = r.read_flag()?;
        return Ok(false);
    }
    let adaptive_ref_pic_marking_mode_flag = r.read_flag()?;
    if !adaptive_ref_pic_marking_mode_flag {
        return Ok(false);
    }
    let mut mmco5 = false;
    loop {
        let op = r.read_ue()?;
        if op == 0 {
            break;
        }
        match op {
            1 | 3 => {
                let _difference_of_pic_nums_minus1 = r.read_ue()?;
                if op == 3 {
                    let _long_term_frame_idx = r.read_ue()?;
                }
            }
            2 => {
                let _long_term_pic_num = r.read_ue()?;
            }
            4 => {
                let _max_long_term_frame_idx_plus1 = r.read_ue()?;
            }
            5 => {
                mmco5 = true;
            }
            6 => {
                let _long_term_frame_idx = r.read_ue()?;
            }
            other => {
                return Err(Error::SyntaxViolation(format!(
                    "invalid memory_management_control_operation {other}"
                )))
            }
        }
    }
    Ok(mmco5)
}

pub struct AvcParser {
    sps_map: HashMap<u32, Sps>,
    pps_map: HashMap<u32, Pps>,
    prev_frame_num: Option<u32>,
    prev_pic_parameter_set_id: Option<u32>,
    prev_field_pic_flag: Option<bool>,
    prev_nal_ref_idc_zero: Option<bool>,
    prev_poc_msb: i32,
    prev_poc_lsb: i32,
    frame_num_offset: i64,
    prev_frame_num_offset: i64,
}

impl Sps {
    /// ChromaArrayType per 7.4.2.1.1: 0 when planes are coded separately,
    /// otherwise `chroma_format_idc`.
    fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }
}

impl Default for AvcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AvcParser {
    pub fn new() -> Self {
        Self {
            sps_map: HashMap::new(),
            pps_map: HashMap::new(),
            prev_frame_num: None,
            prev_pic_parameter_set_id: None,
            prev_field_pic_flag: None,
            prev_nal_ref_idc_zero: None,
            prev_poc_msb: 0,
            prev_poc_lsb: 0,
            frame_num_offset: 0,
            prev_frame_num_offset: 0,
        }
    }

    fn parse_sps(&mut self, rbsp: &[u8]) -> Result<()> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_bits(8)? as u8;
        let constraint_set_flags = r.read_bits(8)? as u8;
        let _level_idc = r.read_bits(8)?;
        let level_idc = _level_idc as u8;
        let seq_parameter_set_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut bit_depth_luma = 8;
        let mut bit_depth_chroma = 8;
        let mut separate_colour_plane_flag = false;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = r.read_flag()?;
            }
            bit_depth_luma = r.read_ue()? + 8;
            bit_depth_chroma = r.read_ue()? + 8;
            let _qpprime_y_zero_transform_bypass_flag = r.read_flag()?;
            let seq_scaling_matrix_present_flag = r.read_flag()?;
            if seq_scaling_matrix_present_flag {
                let count = if chroma_format_idc != 3 { 8 } else { 12 };
                for _ in 0..count {
                    let present = r.read_flag()?;
                    if present {
                        // Scaling-list contents aren't needed downstream;
                        // skip by consuming the delta-coded entries.
                        let size = if count == 8 { 16 } else { 64 };
                        let mut last_scale = 8i32;
                        let mut next_scale = 8i32;
                        for _ in 0..size {
                            if next_scale != 0 {
                                let delta_scale = r.read_se()?;
                                next_scale = (last_scale + delta_scale + 256) % 256;
                            }
                            last_scale = if next_scale == 0 { last_scale } else { next_scale };
                        }
                    }
                }
            }
        }

        let log2_max_frame_num = r.read_ue()? + 4;
        let pic_order_cnt_type = r.read_ue()?;

        let mut log2_max_pic_order_cnt_lsb = 0;
        let mut delta_pic_order_always_zero_flag = false;
        let mut offset_for_non_ref_pic = 0;
        let mut offset_for_top_to_bottom_field = 0;
        let mut num_ref_frames_in_pic_order_cnt_cycle = 0;
        let mut offset_for_ref_frame = Vec::new();
        match pic_order_cnt_type {
            0 => {
                log2_max_pic_order_cnt_lsb = r.read_ue()? + 4;
            }
            1 => {
                delta_pic_order_always_zero_flag = r.read_flag()?;
                offset_for_non_ref_pic = r.read_se()?;
                offset_for_top_to_bottom_field = r.read_se()?;
                num_ref_frames_in_pic_order_cnt_cycle = r.read_ue()?;
                for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                    offset_for_ref_frame.push(r.read_se()?);
                }
            }
            2 => {}
            other => {
                return Err(Error::SyntaxViolation(format!(
                    "invalid pic_order_cnt_type {other}"
                )))
            }
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_value_allowed_flag = r.read_flag()?;
        let pic_width_in_mbs = r.read_ue()? + 1;
        let pic_height_in_map_units = r.read_ue()? + 1;
        let frame_mbs_only_flag = r.read_flag()?;
        if !frame_mbs_only_flag {
            let _mb_adaptive_frame_field_flag = r.read_flag()?;
        }
        let _direct_8x8_inference_flag = r.read_flag()?;
        let frame_cropping_flag = r.read_flag()?;
        if frame_cropping_flag {
            let _left = r.read_ue()?;
            let _right = r.read_ue()?;
            let _top = r.read_ue()?;
            let _bottom = r.read_ue()?;
        }
        let vui_present = r.read_flag()?;
        let mut timing_num_units_in_tick = 0;
        let mut timing_time_scale = 0;
        if vui_present {
            // Only the timing_info portion is consumed; the remainder of
            // the VUI (HRD parameters etc.) doesn't affect frame detection.
            let aspect_ratio_info_present_flag = r.read_flag()?;
            if aspect_ratio_info_present_flag {
                let aspect_ratio_idc = r.read_bits(8)?;
                if aspect_ratio_idc == 255 {
                    let _sar_width = r.read_bits(16)?;
                    let _sar_height = r.read_bits(16)?;
                }
            }
            let overscan_info_present_flag = r.read_flag()?;
            if overscan_info_present_flag {
                let _overscan_appropriate_flag = r.read_flag()?;
            }
            let video_signal_type_present_flag = r.read_flag()?;
            if video_signal_type_present_flag {
                let _video_format = r.read_bits(3)?;
                let _video_full_range_flag = r.read_flag()?;
                let colour_description_present_flag = r.read_flag()?;
                if colour_description_present_flag {
                    let _colour_primaries = r.read_bits(8)?;
                    let _transfer_characteristics = r.read_bits(8)?;
                    let _matrix_coefficients = r.read_bits(8)?;
                }
            }
            let chroma_loc_info_present_flag = r.read_flag()?;
            if chroma_loc_info_present_flag {
                let _chroma_sample_loc_type_top_field = r.read_ue()?;
                let _chroma_sample_loc_type_bottom_field = r.read_ue()?;
            }
            let timing_info_present_flag = r.read_flag()?;
            if timing_info_present_flag {
                timing_num_units_in_tick = r.read_bits(32)?;
                timing_time_scale = r.read_bits(32)?;
            }
            // HRD/VCL-HRD/pic_struct/bitstream-restriction parsing omitted:
            // not needed for frame-boundary detection or sample timing.
        }

        self.sps_map.insert(
            seq_parameter_set_id,
            Sps {
                profile_idc,
                constraint_set_flags,
                level_idc,
                seq_parameter_set_id,
                chroma_format_idc,
                bit_depth_luma,
                bit_depth_chroma,
                pic_order_cnt_type,
                log2_max_frame_num,
                log2_max_pic_order_cnt_lsb,
                delta_pic_order_always_zero_flag,
                offset_for_non_ref_pic,
                offset_for_top_to_bottom_field,
                num_ref_frames_in_pic_order_cnt_cycle,
                offset_for_ref_frame,
                separate_colour_plane_flag,
                frame_mbs_only_flag,
                pic_width_in_mbs,
                pic_height_in_map_units,
                vui_present,
                timing_num_units_in_tick,
                timing_time_scale,
            },
        );
        Ok(())
    }

    fn parse_pps(&mut self, rbsp: &[u8]) -> Result<()> {
        let mut r = BitReader::new(rbsp);
        let pic_parameter_set_id = r.read_ue()?;
        let seq_parameter_set_id = r.read_ue()?;
        let _entropy_coding_mode_flag = r.read_flag()?;
        let bottom_field_pic_order_in_frame_present_flag = r.read_flag()?;
        let num_slice_groups_minus1 = r.read_ue()?;
        if num_slice_groups_minus1 > 0 {
            return Err(Error::SyntaxViolation(
                "FMO (num_slice_groups_minus1 > 0) is not supported".into(),
            ));
        }
        let num_ref_idx_l0_default_active_minus1 = r.read_ue()?;
        let num_ref_idx_l1_default_active_minus1 = r.read_ue()?;
        let weighted_pred_flag = r.read_flag()?;
        let weighted_bipred_idc = r.read_bits(2)? as u8;
        let _pic_init_qp_minus26 = r.read_se()?;
        let _pic_init_qs_minus26 = r.read_se()?;
        let _chroma_qp_index_offset = r.read_se()?;
        let _deblocking_filter_control_present_flag = r.read_flag()?;
        let _constrained_intra_pred_flag = r.read_flag()?;
        let redundant_pic_cnt_present_flag = r.read_flag()?;
        self.pps_map.insert(
            pic_parameter_set_id,
            Pps {
                pic_parameter_set_id,
                seq_parameter_set_id,
                bottom_field_pic_order_in_frame_present_flag,
                num_ref_idx_l0_default_active_minus1,
                num_ref_idx_l1_default_active_minus1,
                weighted_pred_flag,
                weighted_bipred_idc,
                redundant_pic_cnt_present_flag,
            },
        );
        Ok(())
    }

    /// Decode the slice header fields needed for frame-boundary detection
    /// and POC computation, from the first VCL NAL in an access unit.
    fn parse_slice_header(
        &mut self,
        rbsp: &[u8],
        nal_unit_type: u8,
        nal_ref_idc: u8,
    ) -> Result<FrameInfo> {
        let mut r = BitReader::new(rbsp);
        let _first_mb_in_slice = r.read_ue()?;
        let slice_type = r.read_ue()?;
        let pic_parameter_set_id = r.read_ue()?;

        let pps = self
            .pps_map
            .get(&pic_parameter_set_id)
            .cloned()
            .ok_or(Error::UnknownPps(pic_parameter_set_id))?;
        let sps = self
            .sps_map
            .get(&pps.seq_parameter_set_id)
            .cloned()
            .ok_or(Error::UnknownSps(pps.seq_parameter_set_id))?;

        if sps.separate_colour_plane_flag {
            let _colour_plane_id = r.read_bits(2)?;
        }

        let frame_num = r.read_bits(sps.log2_max_frame_num)?;

        let mut field_pic_flag = false;
        let mut bottom_field_flag = false;
        if !sps.frame_mbs_only_flag {
            field_pic_flag = r.read_flag()?;
            if field_pic_flag {
                bottom_field_flag = r.read_flag()?;
            }
        }

        let idr_flag = nal_unit_type == 5;
        let mut idr_pic_id = 0u32;
        if idr_flag {
            idr_pic_id = r.read_ue()?;
        }
        let _ = idr_pic_id;

        let mut pic_order_cnt_lsb = 0u32;
        let mut delta_pic_order_cnt_bottom = 0i32;
        let mut delta_pic_order_cnt = [0i32; 2];
        match sps.pic_order_cnt_type {
            0 => {
                pic_order_cnt_lsb = r.read_bits(sps.log2_max_pic_order_cnt_lsb)?;
                if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                    delta_pic_order_cnt_bottom = r.read_se()?;
                }
            }
            1 => {
                if !sps.delta_pic_order_always_zero_flag {
                    delta_pic_order_cnt[0] = r.read_se()?;
                    if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                        delta_pic_order_cnt[1] = r.read_se()?;
                    }
                }
            }
            _ => {}
        }

        if pps.redundant_pic_cnt_present_flag {
            let _redundant_pic_cnt = r.read_ue()?;
        }

        let slice_type_mod = slice_type % 5;
        let is_p_or_sp = slice_type_mod == 0 || slice_type_mod == 3;
        let is_b = slice_type_mod == 1;
        let is_i_or_si = slice_type_mod == 2 || slice_type_mod == 4;

        if is_b {
            let _direct_spatial_mv_pred_flag = r.read_flag()?;
        }

        let mut num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
        let mut num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
        if is_p_or_sp || is_b {
            let num_ref_idx_active_override_flag = r.read_flag()?;
            if num_ref_idx_active_override_flag {
                num_ref_idx_l0_active_minus1 = r.read_ue()?;
                if is_b {
                    num_ref_idx_l1_active_minus1 = r.read_ue()?;
                }
            }
        }

        if !is_i_or_si {
            skip_ref_pic_list_modification(&mut r)?;
            if is_b {
                skip_ref_pic_list_modification(&mut r)?;
            }
        }

        let use_pred_weight_table =
            (pps.weighted_pred_flag && is_p_or_sp) || (pps.weighted_bipred_idc == 1 && is_b);
        if use_pred_weight_table {
            skip_pred_weight_table(
                &mut r,
                sps.chroma_array_type(),
                num_ref_idx_l0_active_minus1,
                is_b.then_some(num_ref_idx_l1_active_minus1),
            )?;
        }

        let mmco5 = if nal_ref_idc != 0 {
            parse_dec_ref_pic_marking(&mut r, idr_flag)?
        } else {
            false
        };

        let frame_type = slice_frame_type(slice_type);
        let poc = self.compute_poc(
            &sps,
            frame_num,
            idr_flag,
            nal_ref_idc,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            delta_pic_order_cnt,
            mmco5,
        );

        Ok(FrameInfo {
            idr_flag,
            frame_type,
            frame_num,
            pic_parameter_set_id,
            field_pic_flag,
            bottom_field_flag,
            pic_order_cnt: poc,
            nal_ref_idc,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_poc(
        &mut self,
        sps: &Sps,
        frame_num: u32,
        idr_flag: bool,
        nal_ref_idc: u8,
        pic_order_cnt_lsb: u32,
        delta_pic_order_cnt_bottom: i32,
        delta_pic_order_cnt: [i32; 2],
        mmco5: bool,
    ) -> i32 {
        match sps.pic_order_cnt_type {
            0 => {
                let max_lsb = 1i32 << sps.log2_max_pic_order_cnt_lsb;
                let (prev_msb, prev_lsb) = if idr_flag {
                    (0, 0)
                } else {
                    (self.prev_poc_msb, self.prev_poc_lsb)
                };
                let lsb = pic_order_cnt_lsb as i32;
                let msb = if lsb < prev_lsb && (prev_lsb - lsb) >= max_lsb / 2 {
                    prev_msb + max_lsb
                } else if lsb > prev_lsb && (lsb - prev_lsb) > max_lsb / 2 {
                    prev_msb - max_lsb
                } else {
                    prev_msb
                };
                if nal_ref_idc != 0 {
                    if mmco5 {
                        // 8.2.1.1: the current picture's POC is output as 0,
                        // and the next picture's prevPicOrderCnt{Msb,Lsb}
                        // both reset to 0.
                        self.prev_poc_msb = 0;
                        self.prev_poc_lsb = 0;
                    } else {
                        self.prev_poc_msb = msb;
                        self.prev_poc_lsb = lsb;
                    }
                }
                let _ = delta_pic_order_cnt_bottom;
                // The current picture's own POC collapses to 0 under MMCO-5
                // (TopFieldOrderCnt -= tempPicOrderCnt, tempPicOrderCnt being
                // the POC just computed).
                if mmco5 { 0 } else { msb + lsb }
            }
            1 => {
                let frame_num_offset = if idr_flag {
                    0
                } else if self.prev_frame_num.is_some_and(|p| p > frame_num) {
                    self.prev_frame_num_offset + (1i64 << sps.log2_max_frame_num)
                } else {
                    self.prev_frame_num_offset
                };
                self.prev_frame_num_offset = if mmco5 { 0 } else { frame_num_offset };
                self.frame_num_offset = frame_num_offset;

                let abs_frame_num = if sps.num_ref_frames_in_pic_order_cnt_cycle > 0 {
                    frame_num_offset + frame_num as i64
                } else {
                    0
                };
                let abs_frame_num = if nal_ref_idc == 0 && abs_frame_num > 0 {
                    abs_frame_num - 1
                } else {
                    abs_frame_num
                };

                let mut expected_poc = 0i64;
                if abs_frame_num > 0 && sps.num_ref_frames_in_pic_order_cnt_cycle > 0 {
                    let cycle_count = (abs_frame_num - 1) / sps.num_ref_frames_in_pic_order_cnt_cycle as i64;
                    let frame_num_in_cycle =
                        (abs_frame_num - 1) % sps.num_ref_frames_in_pic_order_cnt_cycle as i64;
                    let expected_delta_per_poc_cycle: i64 =
                        sps.offset_for_ref_frame.iter().map(|&v| v as i64).sum();
                    expected_poc = cycle_count * expected_delta_per_poc_cycle;
                    for i in 0..=frame_num_in_cycle as usize {
                        if i < sps.offset_for_ref_frame.len() {
                            expected_poc += sps.offset_for_ref_frame[i] as i64;
                        }
                    }
                }
                if nal_ref_idc == 0 {
                    expected_poc += sps.offset_for_non_ref_pic as i64;
                }
                (expected_poc + delta_pic_order_cnt[0] as i64) as i32
            }
            _ => {
                // type 2: POC derived directly from frame_num, doubled for
                // non-reference pictures.
                let frame_num_offset = if idr_flag {
                    0
                } else if self.prev_frame_num.is_some_and(|p| p > frame_num) {
                    self.prev_frame_num_offset + (1i64 << sps.log2_max_frame_num)
                } else {
                    self.prev_frame_num_offset
                };
                self.prev_frame_num_offset = if mmco5 { 0 } else { frame_num_offset };
                if idr_flag {
                    0
                } else if nal_ref_idc == 0 {
                    (2 * (frame_num_offset + frame_num as i64) - 1) as i32
                } else {
                    (2 * (frame_num_offset + frame_num as i64)) as i32
                }
            }
        }
    }

    fn is_new_access_unit(&self, info: &FrameInfo) -> bool {
        let Some(prev_frame_num) = self.prev_frame_num else {
            return true;
        };
        if info.frame_num != prev_frame_num {
            return true;
        }
        if Some(info.pic_parameter_set_id) != self.prev_pic_parameter_set_id {
            return true;
        }
        if Some(info.field_pic_flag) != self.prev_field_pic_flag {
            return true;
        }
        if self.prev_nal_ref_idc_zero == Some(true) && info.nal_ref_idc != 0 {
            return true;
        }
        if self.prev_nal_ref_idc_zero == Some(false) && info.nal_ref_idc == 0 {
            return true;
        }
        if info.idr_flag {
            return true;
        }
        false
    }

    /// Heuristic classification of AVC-Intra bitrate class from a decoded
    /// frame's SPS and constant per-frame size. AVC-Intra 50 uses roughly
    /// half the frame bytes of AVC-Intra 100 at the same raster size.
    pub fn avc_intra_class(&self, sps_id: u32, frame_size: usize) -> Option<u32> {
        let sps = self.sps_map.get(&sps_id)?;
        let samples = sps.pic_width_in_mbs as usize * 16 * sps.pic_height_in_map_units as usize * 16;
        if samples == 0 {
            return None;
        }
        let bits_per_sample = frame_size * 8 / samples.max(1);
        Some(if bits_per_sample >= 3 { 100 } else { 50 })
    }
}

fn slice_frame_type(slice_type: u32) -> Option<FrameType> {
    match slice_type % 5 {
        0 => Some(FrameType::P),
        1 => Some(FrameType::B),
        2 => Some(FrameType::I),
        _ => None,
    }
}

impl EssenceParser for AvcParser {
    type FrameInfo = FrameInfo;

    fn parse_frame_start(&mut self, bytes: &[u8]) -> i64 {
        match find_start_code(bytes, 0) {
            Some(start) => (start as i64) - 3,
            None => {
                if bytes.len() < 3 {
                    NULL_OFFSET
                } else {
                    NULL_FRAME_SIZE
                }
            }
        }
    }

    fn parse_frame_size(&mut self, bytes: &[u8]) -> i64 {
        let Some(first_nal) = find_start_code(bytes, 0) else {
            return NULL_OFFSET;
        };

        let mut pos = first_nal;
        let mut first_vcl_parsed: Option<FrameInfo> = None;
        loop {
            let Some(next_nal) = find_start_code(bytes, pos) else {
                return NULL_OFFSET;
            };
            let prev_start = pos.saturating_sub(3);
            let nal_header = bytes[pos];
            let nal_unit_type = nal_header & 0x1f;
            let nal_ref_idc = (nal_header >> 5) & 0x3;

            if matches!(nal_kind(nal_unit_type), NalKind::NonIdrSlice | NalKind::IdrSlice) {
                let nal_end = next_nal - 3;
                let rbsp = strip_emulation_prevention(&bytes[pos + 1..nal_end]);
                let info = match self.parse_slice_header(&rbsp, nal_unit_type, nal_ref_idc) {
                    Ok(info) => info,
                    Err(_) => return NULL_FRAME_SIZE,
                };
                if let Some(ref first) = first_vcl_parsed {
                    if self.compare_access_unit(first, &info) {
                        return prev_start as i64;
                    }
                } else {
                    first_vcl_parsed = Some(info);
                }
            }
            pos = next_nal;
        }
    }

    fn parse_frame_info(&mut self, bytes: &[u8], size: usize) -> Result<FrameInfo> {
        let mut pos = match find_start_code(bytes, 0) {
            Some(p) => p,
            None => return Err(Error::SyntaxViolation("no start code in frame".into())),
        };
        let mut result = None;
        loop {
            let next_nal = find_start_code(bytes, pos).unwrap_or(size + 3);
            let nal_end = (next_nal - 3).min(size);
            if pos >= size {
                break;
            }
            let nal_header = bytes[pos];
            let nal_unit_type = nal_header & 0x1f;
            let nal_ref_idc = (nal_header >> 5) & 0x3;
            let rbsp = strip_emulation_prevention(&bytes[pos + 1..nal_end]);
            match nal_kind(nal_unit_type) {
                NalKind::Sps => self.parse_sps(&rbsp)?,
                NalKind::Pps => self.parse_pps(&rbsp)?,
                NalKind::NonIdrSlice | NalKind::IdrSlice if result.is_none() => {
                    result = Some(self.parse_slice_header(&rbsp, nal_unit_type, nal_ref_idc)?);
                }
                _ => {}
            }
            if next_nal >= size + 3 {
                break;
            }
            pos = next_nal;
        }
        let info = result.ok_or_else(|| Error::SyntaxViolation("frame has no VCL NAL".into()))?;
        self.prev_frame_num = Some(info.frame_num);
        self.prev_pic_parameter_set_id = Some(info.pic_parameter_set_id);
        self.prev_field_pic_flag = Some(info.field_pic_flag);
        self.prev_nal_ref_idc_zero = Some(info.nal_ref_idc == 0);
        Ok(info)
    }
}

impl AvcParser {
    fn compare_access_unit(&self, first: &FrameInfo, next: &FrameInfo) -> bool {
        next.frame_num != first.frame_num
            || next.pic_parameter_set_id != first.pic_parameter_set_id
            || next.field_pic_flag != first.field_pic_flag
            || next.idr_flag
            || (first.nal_ref_idc == 0) != (next.nal_ref_idc == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_start_code_offset() {
        let bytes = [0xaa, 0x00, 0x00, 0x01, 0x09, 0xff];
        assert_eq!(find_start_code(&bytes, 0), Some(4));
    }

    #[test]
    fn strips_emulation_prevention_byte() {
        let nal = [0x00, 0x00, 0x03, 0x01, 0x02];
        assert_eq!(strip_emulation_prevention(&nal), vec![0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn slice_type_maps_to_frame_type() {
        assert_eq!(slice_frame_type(2), Some(FrameType::I));
        assert_eq!(slice_frame_type(7), Some(FrameType::I));
        assert_eq!(slice_frame_type(0), Some(FrameType::P));
        assert_eq!(slice_frame_type(1), Some(FrameType::B));
    }

    #[test]
    fn new_access_unit_detected_on_fresh_parser() {
        let parser = AvcParser::new();
        let info = FrameInfo {
            frame_num: 0,
            ..Default::default()
        };
        assert!(parser.is_new_access_unit(&info));
    }
}
