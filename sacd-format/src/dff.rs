// DFF (DSDIFF) Format Parser
// Based on DSDIFF specification v1.5

use std::io::{Seek, SeekFrom};

use sacd_core::audio::{Channels, Layout};
use sacd_core::codecs::{BitOrder, ChannelDataLayout, CodecParameters};
use sacd_core::errors::{decode_error, end_of_stream_error, seek_error, unsupported_error};
use sacd_core::errors::{Result, SeekErrorKind};
use sacd_core::formats::prelude::*;
use sacd_core::io::*;
use sacd_core::meta::{Metadata, MetadataLog};
use sacd_core::probe::{Descriptor, Instantiate, QueryDescriptor};
use sacd_core::support_format;

use log::{debug, warn};

use crate::{CODEC_TYPE_DSD, CODEC_TYPE_DST};

/// FRM8 magic number (IFF container)
const DFF_FRM8_MAGIC: [u8; 4] = *b"FRM8";

/// DSD form type
const DFF_DSD_FORM: [u8; 4] = *b"DSD ";

/// Format version chunk ID
const DFF_FVER_ID: [u8; 4] = *b"FVER";

/// Property chunk ID
const DFF_PROP_ID: [u8; 4] = *b"PROP";

/// Sound property form
const DFF_SND_FORM: [u8; 4] = *b"SND ";

/// Uncompressed DSD compression tag
const DFF_CMPR_DSD: [u8; 4] = *b"DSD ";

/// DST compression tag
const DFF_CMPR_DST: [u8; 4] = *b"DST ";

/// DST frame seek index chunk ID
const DFF_DSTI_ID: [u8; 4] = *b"DSTI";

/// Edited master information container chunk ID
const DFF_DIIN_ID: [u8; 4] = *b"DIIN";

/// Track marker sub-chunk ID (inside DIIN)
const DFF_MARK_ID: [u8; 4] = *b"MARK";

/// `MARK` type: track start
const MARK_TYPE_TRACK_START: u16 = 0;
/// `MARK` type: track stop
const MARK_TYPE_TRACK_STOP: u16 = 1;

/// One DST frame's absolute file position and length, either discovered by
/// walking `DSTF` sub-chunks or read directly from a `DSTI` index chunk.
#[derive(Debug, Clone, Copy)]
struct DstFrameIndexEntry {
    pos: u64,
    len: u64,
}

/// Explicit per-frame seek index carried by an optional `DSTI` chunk,
/// letting a reader locate any DST frame without a linear `DSTF` walk.
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    entries: Vec<DstFrameIndexEntry>,
}

impl FrameIndex {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn into_frames(self) -> Vec<DstFrameIndexEntry> {
        self.entries
    }
}

/// One `MARK` sub-chunk of a `DIIN` chunk: a track boundary expressed as a
/// sample offset from the start of the audio data.
#[derive(Debug, Clone, Copy)]
struct Marker {
    /// Absolute sample position (channel-rate samples from the start of
    /// the track's audio data).
    sample_pos: u64,
    /// 0 = track start, 1 = track stop; other values are ignored.
    mark_type: u16,
}

/// DFF Header
#[derive(Debug)]
struct DffHeader {
    /// Total file size (excluding FRM8 chunk header)
    _file_size: u64,
}

impl DffHeader {
    fn read(reader: &mut MediaSourceStream) -> Result<Self> {
        let magic = reader.read_quad_bytes()?;
        if magic != DFF_FRM8_MAGIC {
            return unsupported_error("dff: invalid FRM8 magic");
        }

        let _file_size = reader.read_be_u64()?;

        let form_type = reader.read_quad_bytes()?;
        if form_type != DFF_DSD_FORM {
            return unsupported_error("dff: not a DSD form");
        }

        Ok(DffHeader { _file_size })
    }
}

/// DFF Format Version Chunk
#[derive(Debug)]
struct DffFormatVersion {
    major: u8,
}

impl DffFormatVersion {
    fn read(reader: &mut MediaSourceStream) -> Result<Self> {
        let chunk_id = reader.read_quad_bytes()?;
        if chunk_id != DFF_FVER_ID {
            return decode_error("dff: expected FVER chunk");
        }

        let chunk_size = reader.read_be_u64()?;
        if chunk_size != 4 {
            return decode_error("dff: invalid FVER chunk size");
        }

        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        let revision = reader.read_u8()?;
        let build = reader.read_u8()?;

        debug!("DFF version: {}.{}.{}.{}", major, minor, revision, build);

        Ok(DffFormatVersion { major })
    }
}

/// DFF Sound Properties
#[derive(Debug)]
struct DffSoundProperties {
    sample_rate: u32,
    channel_count: u16,
    loudspeaker_config: Option<u16>,
    compression: [u8; 4],
}

impl DffSoundProperties {
    fn read(reader: &mut MediaSourceStream) -> Result<Self> {
        let chunk_id = reader.read_quad_bytes()?;
        if chunk_id != DFF_PROP_ID {
            return decode_error("dff: expected PROP chunk");
        }

        let chunk_size = reader.read_be_u64()?;
        let prop_end = reader.pos() + chunk_size;

        let form_type = reader.read_quad_bytes()?;
        if form_type != DFF_SND_FORM {
            return unsupported_error("dff: expected SND property form");
        }

        let mut sample_rate = None;
        let mut channel_count = None;
        let mut loudspeaker_config = None;
        let mut compression = DFF_CMPR_DSD;

        while reader.pos() < prop_end {
            let id = reader.read_quad_bytes()?;
            let size = reader.read_be_u64()?;

            match &id {
                b"FS  " => {
                    sample_rate = Some(reader.read_be_u32()?);
                }
                b"CHNL" => {
                    let count = reader.read_be_u16()?;
                    channel_count = Some(count);

                    for _ in 0..count {
                        reader.read_quad_bytes()?;
                    }
                }
                b"CMPR" => {
                    compression = reader.read_quad_bytes()?;
                    if size > 4 {
                        reader.ignore_bytes(size - 4)?;
                    }
                }
                b"LSCO" => {
                    loudspeaker_config = Some(reader.read_be_u16()?);
                    if size > 2 {
                        reader.ignore_bytes(size - 2)?;
                    }
                }
                _ => {
                    warn!("dff: skipping unknown PROP chunk {}", String::from_utf8_lossy(&id));
                    reader.ignore_bytes(size)?;
                }
            }

            if size % 2 == 1 {
                reader.ignore_bytes(1)?;
            }
        }

        let sample_rate = match sample_rate {
            Some(sr) => sr,
            None => return decode_error("dff: missing sample rate in PROP chunk"),
        };

        let channel_count = match channel_count {
            Some(cc) => cc,
            None => return decode_error("dff: missing channel count in PROP chunk"),
        };

        debug!(
            "dff: properties rate={} channels={} compression={:?}",
            sample_rate, channel_count, compression
        );

        Ok(DffSoundProperties { sample_rate, channel_count, loudspeaker_config, compression })
    }

    fn validate(&self) -> Result<()> {
        if self.compression != DFF_CMPR_DSD && self.compression != DFF_CMPR_DST {
            return unsupported_error("dff: unrecognized CMPR compression tag");
        }

        if self.channel_count == 0 || self.channel_count > 6 {
            return unsupported_error("dff: unsupported channel count");
        }

        Ok(())
    }

    fn is_dst(&self) -> bool {
        self.compression == DFF_CMPR_DST
    }

    /// Resolve the channel layout, preferring the explicit `LSCO` loudspeaker
    /// configuration over a bare channel count when both disagree.
    fn channels(&self) -> Channels {
        if let Some(lsco) = self.loudspeaker_config {
            let layout = match lsco {
                0 => Some(Layout::Stereo),
                1 => Some(Layout::FivePointOne),
                3 => Some(Layout::TwoPointOne),
                4 => Some(Layout::FivePointOne),
                5 => Some(Layout::Mono),
                _ => None,
            };
            if let Some(layout) = layout {
                return layout.into_channels();
            }
        }

        match self.channel_count {
            1 => Layout::Mono.into_channels(),
            2 => Layout::Stereo.into_channels(),
            3 => Layout::TwoPointOne.into_channels(),
            6 => Layout::FivePointOne.into_channels(),
            n => {
                let mut ch = Channels::empty();
                if n >= 1 {
                    ch |= Channels::FRONT_LEFT;
                }
                if n >= 2 {
                    ch |= Channels::FRONT_RIGHT;
                }
                if n >= 3 {
                    ch |= Channels::FRONT_CENTRE;
                }
                if n >= 4 {
                    ch |= Channels::LFE1;
                }
                if n >= 5 {
                    ch |= Channels::REAR_LEFT;
                }
                if n >= 6 {
                    ch |= Channels::REAR_RIGHT;
                }
                ch
            }
        }
    }
}

/// Contiguous audio data region, either raw DSD bytes or a sequence of DST
/// frame records discovered by walking `DSTF`/`DSTC` chunks or a `DSTI`
/// index chunk.
enum AudioRegion {
    Dsd { start: u64, end: u64 },
    Dst { frames: Vec<DstFrameIndexEntry> },
}

/// Read the core fields of one `MARK` sub-chunk and convert its timecode to
/// an absolute per-channel sample position. Any trailing marker-name text is
/// left for the caller to skip using the chunk's declared size.
fn read_mark(reader: &mut MediaSourceStream, sample_rate: u32) -> Result<Marker> {
    let hours = reader.read_be_u16()? as i64;
    let minutes = reader.read_u8()? as i64;
    let seconds = reader.read_u8()? as i64;
    let samples = reader.read_be_u32()? as i64;
    let offset = reader.read_be_u32()? as i32 as i64;
    let mark_type = reader.read_be_u16()?;
    let _mark_channel = reader.read_be_u16()?;
    let _track_flags = reader.read_be_u16()?;

    let timecode_samples = (hours * 3600 + minutes * 60 + seconds) * sample_rate as i64 + samples;
    let sample_pos = (timecode_samples + offset).max(0) as u64;

    Ok(Marker { sample_pos, mark_type })
}

/// Walk a `DIIN` chunk's sub-chunks, collecting every `MARK` track boundary.
fn read_diin(reader: &mut MediaSourceStream, chunk_size: u64, sample_rate: u32) -> Result<Vec<Marker>> {
    let diin_end = reader.pos() + chunk_size;
    let mut markers = Vec::new();

    while reader.pos() < diin_end {
        let sub_id = reader.read_quad_bytes()?;
        let sub_size = reader.read_be_u64()?;
        let sub_start = reader.pos();

        if sub_id == DFF_MARK_ID {
            if sub_size < 20 {
                warn!("dff: skipping undersized MARK chunk");
            }
            else {
                markers.push(read_mark(reader, sample_rate)?);
            }
        }
        else {
            debug!("dff: skipping DIIN sub-chunk {}", String::from_utf8_lossy(&sub_id));
        }

        let consumed = reader.pos() - sub_start;
        if consumed < sub_size {
            reader.ignore_bytes(sub_size - consumed)?;
        }
        if sub_size % 2 == 1 {
            reader.ignore_bytes(1)?;
        }
    }

    Ok(markers)
}

/// Read a `DSTI` chunk: a flat array of `{offset: u64, length: u64}`
/// records giving every DST frame's absolute file position directly,
/// without requiring a linear walk of the `DST `/`DSTF` sub-chunks.
fn read_dsti(reader: &mut MediaSourceStream, chunk_size: u64) -> Result<FrameIndex> {
    const RECORD_SIZE: u64 = 16;

    if chunk_size % RECORD_SIZE != 0 {
        warn!("dff: DSTI chunk size {} is not a multiple of {}, ignoring index", chunk_size, RECORD_SIZE);
        reader.ignore_bytes(chunk_size)?;
        return Ok(FrameIndex::default());
    }

    let count = chunk_size / RECORD_SIZE;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let pos = reader.read_be_u64()?;
        let len = reader.read_be_u64()?;
        entries.push(DstFrameIndexEntry { pos, len });
    }

    Ok(FrameIndex { entries })
}

/// Pair up `Start`/`Stop` markers into `[start, end)` windows expressed in
/// the same native timestamp unit as `total_start`/`total_end` (bits for a
/// raw DSD region, frame indices for a DST region). Out-of-range or
/// unterminated markers are clamped to the valid range with a warning
/// rather than rejected outright.
fn build_track_windows(mut points: Vec<(u64, bool)>, total_start: u64, total_end: u64) -> Vec<(u64, u64)> {
    points.sort_by_key(|p| p.0);

    let mut windows = Vec::new();
    let mut pending_start: Option<u64> = None;

    for (pos, is_start) in points {
        let clamped = pos.clamp(total_start, total_end);
        if clamped != pos {
            warn!("dff: track marker at {} falls outside [{}, {}), clamped to {}", pos, total_start, total_end, clamped);
        }

        if is_start {
            if let Some(start) = pending_start.take() {
                windows.push((start, clamped.max(start)));
            }
            pending_start = Some(clamped);
        }
        else if let Some(start) = pending_start.take() {
            windows.push((start, clamped.max(start)));
        }
        else {
            warn!("dff: ignoring track-stop marker at {} with no matching start", clamped);
        }
    }

    if let Some(start) = pending_start {
        warn!("dff: track marker at {} has no matching stop, clamping to end of stream", start);
        windows.push((start, total_end));
    }

    if windows.is_empty() {
        windows.push((total_start, total_end));
    }

    windows
}

/// DFF Format Reader
pub struct DffReader {
    reader: MediaSourceStream,
    tracks: Vec<Track>,
    cues: Vec<Cue>,
    metadata: MetadataLog,
    region: AudioRegion,
    /// Per-track `[start, end)` window in the region's native timestamp
    /// unit: bits-from-data-start for `Dsd`, frame index for `Dst`.
    track_windows: Vec<(u64, u64)>,
    current_track: usize,
    data_start_pos: u64,
    data_end_pos: u64,
    current_pos: u64,
    next_frame: usize,
}

impl QueryDescriptor for DffReader {
    fn query() -> &'static [Descriptor] {
        &[support_format!("dff", "DSDIFF", &["dff"], &["audio/dsd"], &[b"FRM8"])]
    }

    fn score(_context: &[u8]) -> u8 {
        255
    }
}

impl FormatReader for DffReader {
    fn try_new(mut source: MediaSourceStream, _options: &FormatOptions) -> Result<Self> {
        let _header = DffHeader::read(&mut source)?;

        let version = DffFormatVersion::read(&mut source)?;
        if version.major != 1 {
            return unsupported_error("dff: unsupported format version");
        }

        let props = DffSoundProperties::read(&mut source)?;
        props.validate()?;

        let mut data_start_pos = None;
        let mut data_end_pos = None;
        let mut data_size = None;
        let mut dst_frames: Vec<DstFrameIndexEntry> = Vec::new();
        let mut dsti: Option<FrameIndex> = None;
        let mut markers: Vec<Marker> = Vec::new();

        // The audio data chunk is always the first large chunk in the file;
        // DSTI/DIIN, if present, are top-level siblings that follow it. Keep
        // scanning after the audio chunk instead of stopping there.
        while let Ok(chunk_id) = source.read_quad_bytes() {
            let chunk_size = source.read_be_u64()?;

            if &chunk_id == b"DSD " && !props.is_dst() && data_start_pos.is_none() {
                data_start_pos = Some(source.pos());
                data_size = Some(chunk_size);
                data_end_pos = Some(source.pos() + chunk_size);
                source.ignore_bytes(chunk_size)?;
            }
            else if &chunk_id == b"DST " && props.is_dst() && data_start_pos.is_none() {
                let dst_end = source.pos() + chunk_size;
                data_start_pos = Some(source.pos());

                // Walk FRTE/DSTF/DSTC sub-chunks for frame boundaries. FRTE
                // only carries a frame count/rate hint; every DSTF chunk is
                // one compressed frame, optionally followed by a DSTC CRC.
                while source.pos() < dst_end {
                    let sub_id = source.read_quad_bytes()?;
                    let sub_size = source.read_be_u64()?;

                    match &sub_id {
                        b"FRTE" => {
                            source.ignore_bytes(sub_size)?;
                        }
                        b"DSTF" => {
                            dst_frames.push(DstFrameIndexEntry { pos: source.pos(), len: sub_size });
                            source.ignore_bytes(sub_size)?;
                        }
                        b"DSTC" => {
                            // CRC32 over the preceding DSTF payload; not verified here.
                            source.ignore_bytes(sub_size)?;
                        }
                        _ => {
                            warn!("dff: skipping unknown DST sub-chunk {}", String::from_utf8_lossy(&sub_id));
                            source.ignore_bytes(sub_size)?;
                        }
                    }

                    if sub_size % 2 == 1 {
                        source.ignore_bytes(1)?;
                    }
                }

                data_size = Some(chunk_size);
                data_end_pos = Some(dst_end);
            }
            else if &chunk_id == DFF_DSTI_ID {
                dsti = Some(read_dsti(&mut source, chunk_size)?);
            }
            else if &chunk_id == DFF_DIIN_ID {
                markers.extend(read_diin(&mut source, chunk_size, props.sample_rate)?);
            }
            else {
                debug!("dff: skipping chunk {}", String::from_utf8_lossy(&chunk_id));
                source.ignore_bytes(chunk_size)?;
            }

            if chunk_size % 2 == 1 {
                source.ignore_bytes(1)?;
            }
        }

        let data_start_pos = match data_start_pos {
            Some(pos) => pos,
            None => return decode_error("dff: no DSD or DST audio data chunk found"),
        };

        let data_size = match data_size {
            Some(size) => size,
            None => return decode_error("dff: no audio data size"),
        };

        let data_end_pos = data_end_pos.unwrap_or(data_start_pos + data_size);

        debug!("dff: audio data start={} end={} size={}", data_start_pos, data_end_pos, data_size);

        let mut codec_params = CodecParameters::new();
        let channels = props.channels();

        if props.is_dst() {
            codec_params
                .for_codec(CODEC_TYPE_DST)
                .with_sample_rate(props.sample_rate)
                .with_bits_per_sample(1)
                .with_channels(channels)
                .with_channel_data_layout(ChannelDataLayout::Interleaved)
                .with_bit_order(BitOrder::MsbFirst);
        }
        else {
            codec_params
                .for_codec(CODEC_TYPE_DSD)
                .with_sample_rate(props.sample_rate)
                .with_bits_per_sample(1)
                .with_channels(channels)
                .with_channel_data_layout(ChannelDataLayout::Interleaved)
                .with_bit_order(BitOrder::MsbFirst);
        }

        let region = if props.is_dst() {
            let frames = match dsti {
                Some(index) if !index.is_empty() => {
                    debug!("dff: using DSTI frame index ({} frames) over in-band DSTF walk", index.entries.len());
                    index.into_frames()
                }
                _ => dst_frames,
            };

            if frames.is_empty() {
                return decode_error("dff: DST stream has no DSTF frames");
            }
            AudioRegion::Dst { frames }
        }
        else {
            AudioRegion::Dsd { start: data_start_pos, end: data_end_pos }
        };

        let tb = TimeBase::new(1, props.sample_rate);
        codec_params.with_time_base(tb);

        // Native-unit total span used both for the whole-file codec params
        // (single-track fallback) and to clamp marker-derived windows.
        let total_native_end = match &region {
            AudioRegion::Dsd { start, end } => (end - start) * 8,
            AudioRegion::Dst { frames } => frames.len() as u64,
        };

        let marker_points: Vec<(u64, bool)> = markers
            .iter()
            .filter_map(|m| {
                let is_start = match m.mark_type {
                    MARK_TYPE_TRACK_START => true,
                    MARK_TYPE_TRACK_STOP => false,
                    _ => return None,
                };

                let native_pos = match &region {
                    AudioRegion::Dsd { .. } => m.sample_pos * props.channel_count as u64,
                    AudioRegion::Dst { .. } => m.sample_pos / (props.sample_rate as u64 / 75).max(1),
                };

                Some((native_pos, is_start))
            })
            .collect();

        let track_windows = build_track_windows(marker_points, 0, total_native_end);

        let mut tracks = Vec::with_capacity(track_windows.len());
        for (i, (win_start, win_end)) in track_windows.iter().enumerate() {
            let mut params = codec_params.clone();

            match &region {
                AudioRegion::Dsd { .. } => {
                    let samples_per_channel = (win_end - win_start) / props.channel_count as u64;
                    params.with_n_frames(samples_per_channel);

                    let block_size = 4096u64;
                    params.with_max_frames_per_packet(block_size * 8).with_frames_per_block(block_size * 8);
                }
                AudioRegion::Dst { .. } => {
                    let samples_per_channel = (win_end - win_start) * (props.sample_rate as u64 / 75);
                    params.with_n_frames(samples_per_channel);
                    params
                        .with_max_frames_per_packet(props.sample_rate as u64 / 75)
                        .with_frames_per_block(props.sample_rate as u64 / 75);
                }
            }

            tracks.push(Track::new(i as u32, params));
        }

        let (current_pos, next_frame) = match &region {
            AudioRegion::Dsd { .. } => (data_start_pos + track_windows[0].0 / 8, 0),
            AudioRegion::Dst { .. } => (data_start_pos, track_windows[0].0 as usize),
        };

        // The scan above ran past the audio data to look for DSTI/DIIN;
        // rewind so the first `next_packet` call reads from the right spot.
        source.seek(SeekFrom::Start(current_pos))?;

        Ok(DffReader {
            reader: source,
            tracks,
            cues: Vec::new(),
            metadata: MetadataLog::default(),
            region,
            track_windows,
            current_track: 0,
            data_start_pos,
            data_end_pos,
            current_pos,
            next_frame,
        })
    }

    fn next_packet(&mut self) -> Result<Packet> {
        let (win_start, win_end) = self.track_windows[self.current_track];

        match &self.region {
            AudioRegion::Dsd { .. } => {
                let track_start_byte = self.data_start_pos + win_start / 8;
                let track_end_byte = (self.data_start_pos + win_end / 8).min(self.data_end_pos);

                if self.current_pos >= track_end_byte {
                    return end_of_stream_error();
                }

                let block_size = 4096u64;
                let remaining = track_end_byte - self.current_pos;
                let to_read = block_size.min(remaining);

                let buf = self.reader.read_boxed_slice_exact(to_read as usize)?;

                let ts = (self.current_pos - track_start_byte) * 8;
                self.current_pos += to_read;

                Ok(Packet::new_from_boxed_slice(self.current_track as u32, ts, to_read, buf))
            }
            AudioRegion::Dst { frames } => {
                let start_frame = win_start as usize;
                let end_frame = win_end as usize;

                if self.next_frame >= end_frame {
                    return end_of_stream_error();
                }

                let entry = frames[self.next_frame];
                self.reader.seek(SeekFrom::Start(entry.pos))?;
                let buf = self.reader.read_boxed_slice_exact(entry.len as usize)?;

                let ts = (self.next_frame - start_frame) as u64;
                self.next_frame += 1;
                self.current_pos = entry.pos + entry.len;

                Ok(Packet::new_from_boxed_slice(self.current_track as u32, ts, 1, buf))
            }
        }
    }

    fn metadata(&mut self) -> Metadata<'_> {
        self.metadata.metadata()
    }

    fn cues(&self) -> &[Cue] {
        &self.cues
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn seek(&mut self, _mode: SeekMode, to: SeekTo) -> Result<SeekedTo> {
        if let SeekTo::TimeStamp { track_id, .. } = to {
            if track_id as usize >= self.tracks.len() {
                return seek_error(SeekErrorKind::OutOfRange);
            }
            self.current_track = track_id as usize;
        }

        let (win_start, win_end) = self.track_windows[self.current_track];

        match &self.region {
            AudioRegion::Dsd { .. } => {
                let track_start_byte = self.data_start_pos + win_start / 8;
                let track_end_byte = (self.data_start_pos + win_end / 8).min(self.data_end_pos);

                let required_byte = match to {
                    SeekTo::TimeStamp { ts, .. } => track_start_byte + ts / 8,
                    SeekTo::Time { time, .. } => {
                        let track = &self.tracks[self.current_track];
                        let ts = track.codec_params.time_base.unwrap().calc_timestamp(time);
                        track_start_byte + ts / 8
                    }
                };

                if required_byte >= track_end_byte {
                    return seek_error(SeekErrorKind::OutOfRange);
                }

                self.reader.seek(SeekFrom::Start(required_byte))?;
                self.current_pos = required_byte;

                let actual_ts = (required_byte - track_start_byte) * 8;
                Ok(SeekedTo { track_id: self.current_track as u32, required_ts: actual_ts, actual_ts })
            }
            AudioRegion::Dst { frames } => {
                let start_frame = win_start as usize;
                let end_frame = win_end as usize;
                let frame_rate = 75u64;

                let target_offset = match to {
                    SeekTo::TimeStamp { ts, .. } => ts,
                    SeekTo::Time { time, .. } => (time.seconds * frame_rate) as u64,
                };

                let frame_idx =
                    (start_frame + target_offset as usize).clamp(start_frame, end_frame.saturating_sub(1).max(start_frame));
                self.next_frame = frame_idx.min(frames.len().saturating_sub(1));

                let actual_ts = (self.next_frame - start_frame) as u64;
                Ok(SeekedTo { track_id: self.current_track as u32, required_ts: target_offset, actual_ts })
            }
        }
    }

    fn into_inner(self: Box<Self>) -> MediaSourceStream {
        self.reader
    }
}
