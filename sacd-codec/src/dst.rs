// DST frame decoder: segmentation + mapping, filter/probability table
// decode, Gray-coded FIR prediction, and the per-bit arithmetic decode loop.
//
// Grounded in the reference `decoder_t`/`fr_t` structure: one `DstDecoder`
// is reused across frames of a single channel count; its table buffers are
// (re)sized on `init` and refreshed by `decode_frame` every call.

use log::warn;
use sacd_core::errors::{dst_error, Result};

use crate::arith::{flush_ok, reverse7lsb, ArithDecoder};
use crate::bitstream::BitReader;
use crate::rice::rice_decode;

const MAX_CHANNELS: usize = 6;
const MAX_FILTERS: usize = 2 * MAX_CHANNELS;
const MAX_PTABLES: usize = 2 * MAX_CHANNELS;
const MAX_PRED_ORDER: usize = 128;
const MAX_PTABLE_LEN: usize = 64;
const FILTER_SEGS: usize = 4;
const PTABLE_SEGS: usize = 8;
const MIN_FILTER_SEG_BITS: u32 = 1024;
const MIN_PTABLE_SEG_BITS: u32 = 32;
const SILENCE_BYTE: u8 = 0x69;

/// One channel's worth of per-segment table index assignment, one entry per
/// encoded bit of the frame (a `4-bit` map per §4.3.1 of the design).
#[derive(Clone)]
struct BitMap {
    values: Vec<u8>,
}

impl BitMap {
    fn new(len: usize) -> Self {
        BitMap { values: vec![0; len] }
    }
}

struct Segmentation {
    /// bit length of each segment
    lengths: Vec<u32>,
}

fn log2_round_up(n: u32) -> u32 {
    32 - (n.max(1) - 1).leading_zeros()
}

fn read_segmentation(
    reader: &mut BitReader<'_>,
    frame_bits: u32,
    min_seg_bits: u32,
    max_segs: usize,
) -> Result<Segmentation> {
    let resolution_bits = log2_round_up((frame_bits / min_seg_bits).max(1) + 1);
    let mut lengths = Vec::new();
    let mut consumed = 0u32;

    loop {
        if lengths.len() >= max_segs {
            break;
        }

        let resolution = reader.get_uint(resolution_bits).max(1);
        let scaled_length = reader.get_uint(resolution_bits);
        let seg_bits = resolution.saturating_mul(8).saturating_mul(scaled_length.max(1));

        if seg_bits < min_seg_bits || consumed + seg_bits > frame_bits {
            return dst_error("dst: segment length out of range");
        }

        lengths.push(seg_bits);
        consumed += seg_bits;

        let end_of_channel = reader.get_bit();
        if end_of_channel == 1 {
            break;
        }
    }

    if consumed > frame_bits {
        return dst_error("dst: segmentation exceeds frame length");
    }

    Ok(Segmentation { lengths })
}

fn read_table_segmentation(
    reader: &mut BitReader<'_>,
    frame_bits: u32,
    channels: usize,
    min_seg_bits: u32,
    max_segs: usize,
) -> Result<Vec<Segmentation>> {
    let same_for_all = reader.get_bit() == 1;

    if same_for_all {
        let seg = read_segmentation(reader, frame_bits, min_seg_bits, max_segs)?;
        Ok((0..channels).map(|_| Segmentation { lengths: seg.lengths.clone() }).collect())
    }
    else {
        let mut out = Vec::with_capacity(channels);
        for _ in 0..channels {
            out.push(read_segmentation(reader, frame_bits, min_seg_bits, max_segs)?);
        }
        Ok(out)
    }
}

fn read_table_mapping(
    reader: &mut BitReader<'_>,
    segs: &[Segmentation],
    table_count_hint: usize,
) -> Result<(Vec<Vec<usize>>, usize)> {
    let mut next_index = 0usize;
    let mut mapping = Vec::with_capacity(segs.len());

    for ch_seg in segs {
        let mut ch_map = Vec::with_capacity(ch_seg.lengths.len());
        for _ in &ch_seg.lengths {
            let bits = log2_round_up((next_index.max(table_count_hint) as u32) + 1).max(1);
            let idx = reader.get_uint(bits) as usize;
            if idx > next_index {
                return dst_error("dst: invalid table mapping index");
            }
            if idx == next_index {
                next_index += 1;
            }
            ch_map.push(idx);
        }
        mapping.push(ch_map);
    }

    Ok((mapping, next_index))
}

/// Coded representation of one adaptive FIR filter's taps.
#[derive(Clone)]
struct Filter {
    order: usize,
    coefs: [i32; MAX_PRED_ORDER],
}

/// Coded representation of one probability table.
#[derive(Clone)]
struct Ptable {
    len: usize,
    probs: [u32; MAX_PTABLE_LEN],
}

fn bias(x: i32) -> i32 {
    if x >= 0 {
        -((x + 4) / 8)
    }
    else {
        (-x + 3) / 8
    }
}

/// Predictor order per coding method, for filter coefficients.
const FILTER_CPRED_ORDER: [usize; 3] = [1, 2, 3];
/// Predictor coefficients per coding method, for filter coefficients.
const FILTER_CPRED_COEF: [[i32; 3]; 3] = [[-8, 0, 0], [-16, 8, 0], [-9, -5, 6]];

/// Predictor order per coding method, for probability table entries.
const PTABLE_CPRED_ORDER: [usize; 3] = [1, 2, 3];
/// Predictor coefficients per coding method, for probability table entries.
const PTABLE_CPRED_COEF: [[i32; 3]; 3] = [[-8, 0, 0], [-16, 8, 0], [-24, 24, -8]];

/// Predict coefficient `c` from up to `order` previously decoded values
/// using method `method`'s fixed tap weights. Returns the raw weighted sum;
/// [`bias`] performs the final division by 8 and rounding.
fn predict_coef(history: &[i32], c: usize, method: usize, orders: &[usize; 3], coefs: &[[i32; 3]; 3]) -> i32 {
    let order = orders[method];
    let mut acc = 0i32;
    for (t, &coef) in coefs[method].iter().take(order).enumerate() {
        if t >= c {
            break;
        }
        acc += coef * history[c - t - 1];
    }
    acc
}

fn read_filter(reader: &mut BitReader<'_>) -> Result<Filter> {
    let coded_order = reader.get_uint(7);
    let order = coded_order as usize + 1;
    if order > MAX_PRED_ORDER {
        return dst_error("dst: filter order out of range");
    }

    let mut coefs = [0i32; MAX_PRED_ORDER];
    let coded_flag = reader.get_bit();

    if coded_flag == 0 {
        for c in coefs.iter_mut().take(order) {
            *c = reader.get_sint(9);
        }
    }
    else {
        let method = reader.get_uint(2) as usize;
        let seed_order = FILTER_CPRED_ORDER[method].min(order);

        for c in coefs.iter_mut().take(seed_order) {
            *c = reader.get_sint(9);
        }

        let m = reader.get_uint(3);

        for c in seed_order..order {
            let x = predict_coef(&coefs, c, method, &FILTER_CPRED_ORDER, &FILTER_CPRED_COEF);
            let r = rice_decode(reader, m);
            coefs[c] = r + bias(x);
            if !(-256..=255).contains(&coefs[c]) {
                return dst_error("dst: decoded coefficient out of range");
            }
        }
    }

    Ok(Filter { order, coefs })
}

fn read_ptable(reader: &mut BitReader<'_>) -> Result<Ptable> {
    let coded_len = reader.get_uint(6);
    let len = coded_len as usize + 1;
    if len > MAX_PTABLE_LEN {
        return dst_error("dst: ptable length out of range");
    }

    let mut probs = [128u32; MAX_PTABLE_LEN];

    if len == 1 {
        probs[0] = 128;
        return Ok(Ptable { len, probs });
    }

    let coded_flag = reader.get_bit();

    if coded_flag == 0 {
        for p in probs.iter_mut().take(len) {
            *p = reader.get_uint(7) + 1;
        }
    }
    else {
        let method = reader.get_uint(2) as usize;
        let seed_order = PTABLE_CPRED_ORDER[method].min(len);

        for p in probs.iter_mut().take(seed_order) {
            *p = reader.get_uint(7) + 1;
        }

        let m = reader.get_uint(3);

        let mut history = [0i32; MAX_PTABLE_LEN];
        for (h, &p) in history.iter_mut().zip(probs.iter()).take(seed_order) {
            *h = p as i32;
        }

        for i in seed_order..len {
            let x = predict_coef(&history, i, method, &PTABLE_CPRED_ORDER, &PTABLE_CPRED_COEF);
            let r = rice_decode(reader, m);
            let v = r + bias(x);
            let clamped = v.clamp(1, 128) as u32;
            probs[i] = clamped;
            history[i] = clamped as i32;
        }
    }

    Ok(Ptable { len, probs })
}

/// Gray-coded lookup: for each filter and each group of 8 taps, maps an
/// 8-bit history byte directly to the partial FIR sum for that group.
struct FilterLut {
    /// `table[filter][group][gray(history_byte)]`
    table: Vec<[[i32; 256]; 16]>,
}

fn gray(i: u32) -> u32 {
    i ^ (i >> 1)
}

fn build_filter_luts(filters: &[Filter]) -> FilterLut {
    let mut table = Vec::with_capacity(filters.len());

    for f in filters {
        let mut groups = [[0i32; 256]; 16];
        let n_groups = (f.order + 7) / 8;

        for (g, group_table) in groups.iter_mut().enumerate().take(n_groups) {
            let tap_base = g * 8;
            let n_taps = (f.order - tap_base).min(8);

            for i in 0u32..256 {
                let h = gray(i);
                let mut sum = 0i32;
                for j in 0..n_taps {
                    let bit = (i >> j) & 1;
                    let tap = tap_base + j;
                    sum += (2 * bit as i32 - 1) * f.coefs[tap];
                }
                group_table[h as usize] = sum;
            }
        }

        table.push(groups);
    }

    FilterLut { table }
}

struct ChannelState {
    status: [u8; 16],
}

impl ChannelState {
    fn new() -> Self {
        ChannelState { status: [0xAA; 16] }
    }

    fn predict(&self, lut: &[[i32; 256]; 16], n_groups: usize) -> i32 {
        let mut sum = 0i32;
        for g in 0..n_groups {
            sum += lut[g][self.status[g] as usize];
        }
        sum
    }

    fn shift_in(&mut self, bit: u32) {
        let mut carry = bit as u8;
        for byte in self.status.iter_mut() {
            let new_carry = (*byte >> 7) & 1;
            *byte = (*byte << 1) | carry;
            carry = new_carry;
        }
    }
}

pub struct DstDecoder {
    channels: usize,
    max_frame_bytes: usize,
}

impl DstDecoder {
    pub fn new(channels: usize, max_frame_bytes: usize) -> Self {
        DstDecoder { channels, max_frame_bytes }
    }

    /// Decode one DST-coded frame into `channels` interleaved DSD bytes. On
    /// any malformed-frame condition, logs a warning and fills `out` with
    /// the silence byte instead of propagating a hard error, matching the
    /// per-frame error-absorption policy: structural errors (bad segment
    /// counts, arithmetic stream corruption) never poison later frames.
    pub fn decode_frame(&mut self, frame: &[u8], out: &mut Vec<u8>) {
        let bytes_per_channel = self.max_frame_bytes;
        let out_len = bytes_per_channel * self.channels;

        match self.try_decode_frame(frame, out_len) {
            Ok(buf) => *out = buf,
            Err(e) => {
                warn!("dst: frame decode failed, substituting silence: {}", e);
                *out = vec![SILENCE_BYTE; out_len];
            }
        }
    }

    fn try_decode_frame(&mut self, frame: &[u8], out_len: usize) -> Result<Vec<u8>> {
        let mut reader = BitReader::new(frame);
        let frame_bits = (frame.len() * 8) as u32;

        let coded = reader.get_bit();
        if coded == 0 {
            // Uncompressed passthrough frame: a 1-bit mode flag plus 7
            // reserved bits pad the header to a whole byte, then raw DSD
            // bytes follow byte-aligned.
            let _reserved = reader.get_uint(7);
            if frame.len() < 1 + out_len {
                return dst_error("dst: passthrough frame too short");
            }
            return Ok(frame[1..1 + out_len].to_vec());
        }

        let channels = self.channels;

        let p_same_seg_as_f = reader.get_bit() == 1;
        let filter_segs =
            read_table_segmentation(&mut reader, frame_bits, channels, MIN_FILTER_SEG_BITS, FILTER_SEGS)?;
        let ptable_segs = if p_same_seg_as_f {
            filter_segs
                .iter()
                .map(|s| Segmentation { lengths: s.lengths.clone() })
                .collect::<Vec<_>>()
        }
        else {
            read_table_segmentation(&mut reader, frame_bits, channels, MIN_PTABLE_SEG_BITS, PTABLE_SEGS)?
        };

        let (filter_map, n_filters) = read_table_mapping(&mut reader, &filter_segs, 0)?;
        let (ptable_map, n_ptables) = read_table_mapping(&mut reader, &ptable_segs, 0)?;

        if n_filters == 0 || n_filters > MAX_FILTERS || n_ptables == 0 || n_ptables > MAX_PTABLES {
            return dst_error("dst: filter/ptable count out of range");
        }

        let mut half_prob = vec![false; channels];
        for hp in half_prob.iter_mut() {
            *hp = reader.get_bit() == 1;
        }

        let mut filters = Vec::with_capacity(n_filters);
        for _ in 0..n_filters {
            filters.push(read_filter(&mut reader)?);
        }

        let mut ptables = Vec::with_capacity(n_ptables);
        for _ in 0..n_ptables {
            ptables.push(read_ptable(&mut reader)?);
        }

        let n_bits_per_ch = filter_segs.iter().map(|s| s.lengths.iter().sum::<u32>()).max().unwrap_or(0);
        if n_bits_per_ch == 0 {
            return dst_error("dst: empty segmentation");
        }

        let filter4bit = expand_bitmap(&filter_segs, &filter_map, n_bits_per_ch);
        let ptable4bit = expand_bitmap(&ptable_segs, &ptable_map, n_bits_per_ch);

        let lut = build_filter_luts(&filters);

        let mut states: Vec<ChannelState> = (0..channels).map(|_| ChannelState::new()).collect();
        let prime_p = reverse7lsb(filters[0].coefs[0]);
        let mut ac = ArithDecoder::new(prime_p);

        let mut dsd = vec![0u8; out_len];
        let n_half_bits: Vec<usize> = (0..channels)
            .map(|ch| filter4bit[ch].values.first().map(|&f| filters[f as usize].order).unwrap_or(0))
            .collect();

        for bit in 0..n_bits_per_ch as usize {
            for ch in 0..channels {
                let filter_idx = filter4bit[ch].values[bit] as usize;
                let n_groups = (filters[filter_idx].order + 7) / 8;
                let predict = states[ch].predict(&lut.table[filter_idx], n_groups);

                let p = if half_prob[ch] && bit < n_half_bits[ch] {
                    128
                }
                else {
                    let ptable_idx = ptable4bit[ch].values[bit] as usize;
                    let ptable = &ptables[ptable_idx];
                    let mag_idx = ((predict.unsigned_abs() >> 3) as usize).min(ptable.len - 1);
                    ptable.probs[mag_idx]
                };

                let residual = ac.decode_bit(&mut reader, p)?;
                let bit_value = if predict < 0 { 1 - residual } else { residual };

                let byte_idx = (bit / 8) * channels + ch;
                let bit_in_byte = 7 - (bit % 8);
                if bit_value == 1 {
                    dsd[byte_idx] |= 1 << bit_in_byte;
                }

                states[ch].shift_in(bit_value);
            }
        }

        if !flush_ok(&mut reader) {
            return dst_error("dst: arithmetic decoder failed to flush cleanly");
        }

        Ok(dsd)
    }
}

fn expand_bitmap(segs: &[Segmentation], mapping: &[Vec<usize>], total_bits: u32) -> Vec<BitMap> {
    let mut out = Vec::with_capacity(segs.len());

    for (ch, ch_segs) in segs.iter().enumerate() {
        let mut map = BitMap::new(total_bits as usize);
        let mut bit = 0usize;
        for (seg_idx, &len) in ch_segs.lengths.iter().enumerate() {
            let table_idx = mapping[ch].get(seg_idx).copied().unwrap_or(0) as u8;
            for b in map.values[bit..(bit + len as usize).min(map.values.len())].iter_mut() {
                *b = table_idx;
            }
            bit += len as usize;
        }
        out.push(map);
    }

    out
}
