// ISO (Scarlet Book) SACD disc image parser.
//
// Walks the Master TOC at LSN 510, then an area TOC (two-channel and/or
// multi-channel) to discover tracks, then extracts DST or raw DSD frames
// from audio sectors one frame at a time.

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

const LSN_SIZE: u64 = 2048;
const MASTER_TOC_LSN: u64 = 510;
const MASTER_TOC_MAGIC: [u8; 8] = *b"SACDMTOC";
const TWOCH_TOC_MAGIC: [u8; 8] = *b"TWOCHTOC";
const MULCH_TOC_MAGIC: [u8; 8] = *b"MULCHTOC";

const DATA_TYPE_AUDIO: u8 = 0;
const DATA_TYPE_PADDING: u8 = 7;

/// Which SACD area(s) to expose as tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    TwoChannel,
    MultiChannel,
}

struct AreaToc {
    mode: TrackMode,
    track_start_lsn: u64,
    channel_count: u16,
    loudspeaker_config: u16,
    sample_rate: u32,
    track_starts: Vec<u64>,
    track_lengths: Vec<u64>,
}

fn stride_has_magic(source: &mut MediaSourceStream, stride: u64, magic: &[u8; 8]) -> Result<bool> {
    source.seek(SeekFrom::Start(MASTER_TOC_LSN * stride))?;
    let mut probe = [0u8; 8];
    source.read_buf_exact(&mut probe)?;
    Ok(&probe == magic)
}

/// Locate the Master TOC, trying the two conventional sector strides. Returns
/// the stride that matches, leaving the stream positioned right after the
/// magic.
fn locate_master_toc(source: &mut MediaSourceStream) -> Result<u64> {
    for stride in [2048u64, 2064u64] {
        if stride_has_magic(source, stride, &MASTER_TOC_MAGIC)? {
            return Ok(stride);
        }
    }

    unsupported_error("iso: no SACDMTOC found at sector 510")
}

fn read_area_toc(
    source: &mut MediaSourceStream,
    stride: u64,
    toc_lsn: u32,
    mode: TrackMode,
) -> Result<AreaToc> {
    if toc_lsn == 0 {
        return decode_error("iso: area TOC pointer is zero");
    }

    source.seek(SeekFrom::Start(toc_lsn as u64 * stride))?;

    let magic = source.read_quad_bytes()?;
    let magic2 = source.read_quad_bytes()?;
    let mut full = [0u8; 8];
    full[0..4].copy_from_slice(&magic);
    full[4..8].copy_from_slice(&magic2);

    let expected = match mode {
        TrackMode::TwoChannel => TWOCH_TOC_MAGIC,
        TrackMode::MultiChannel => MULCH_TOC_MAGIC,
    };

    if full != expected {
        return unsupported_error("iso: area TOC magic mismatch");
    }

    // Skip size/version/track_start/track_end (per Scarlet Book layout); these
    // are not needed once SACDTRL1 supplies exact per-track bounds.
    source.ignore_bytes(16)?;

    let channel_count = source.read_be_u16()?;
    let loudspeaker_config = source.read_be_u16()?;

    // Remaining area-descriptor fixed fields up to the first sub-chunk.
    source.ignore_bytes(32)?;

    let sample_rate = 2_822_400u32;

    let area_start = toc_lsn as u64 * stride;
    let area_end = area_start + 128 * stride; // area TOC occupies a handful of sectors

    let mut track_starts = Vec::new();
    let mut track_lengths = Vec::new();

    while source.pos() < area_end {
        let id = match source.read_quad_bytes() {
            Ok(id) => id,
            Err(_) => break,
        };

        if &id == b"SACDTRL1" {
            let count = source.read_be_u16()?;
            source.ignore_bytes(2)?;
            for _ in 0..count {
                track_starts.push(source.read_be_u32()? as u64);
                track_lengths.push(source.read_be_u32()? as u64);
            }
            break;
        }
        else if &id == b"SACDTTxt" || &id == b"SACD_IGL" || &id == b"SACD_ACC" || &id == b"SACDTRL2" {
            // Metadata/text chunks are not required to locate frame data.
            debug!("iso: skipping area sub-chunk {}", String::from_utf8_lossy(&id));
            break;
        }
        else {
            break;
        }
    }

    if track_starts.is_empty() {
        return decode_error("iso: no SACDTRL1 track list in area TOC");
    }

    Ok(AreaToc {
        mode,
        track_start_lsn: track_starts[0],
        channel_count,
        loudspeaker_config,
        sample_rate,
        track_starts,
        track_lengths,
    })
}

fn channels_for(channel_count: u16, loudspeaker_config: u16) -> Channels {
    let layout = match loudspeaker_config {
        0 if channel_count == 2 => Some(Layout::Stereo),
        1 => Some(Layout::FivePointOne),
        3 => Some(Layout::TwoPointOne),
        4 => Some(Layout::FivePointOne),
        5 => Some(Layout::Mono),
        _ => None,
    };

    if let Some(layout) = layout {
        return layout.into_channels();
    }

    match channel_count {
        1 => Layout::Mono.into_channels(),
        2 => Layout::Stereo.into_channels(),
        _ => Layout::FivePointOne.into_channels(),
    }
}

/// One packet extracted from an audio sector: either audio payload bytes or
/// a boundary marking the start of a new frame.
struct SectorCursor {
    lsn: u64,
    end_lsn: u64,
}

/// ISO (Scarlet Book) SACD disc image reader. Exposes one track per index
/// discovered in the selected area's SACDTRL1 table.
pub struct IsoReader {
    reader: MediaSourceStream,
    stride: u64,
    tracks: Vec<Track>,
    cues: Vec<Cue>,
    metadata: MetadataLog,
    area: AreaToc,
    current_track: usize,
    cursor: SectorCursor,
    dst_encoded: bool,
    frame_counter: u64,
}

impl QueryDescriptor for IsoReader {
    fn query() -> &'static [Descriptor] {
        &[support_format!("sacd-iso", "SACD disc image", &["iso"], &["application/x-sacd-iso"], &[
            b"SACDMTOC"
        ])]
    }

    fn score(_context: &[u8]) -> u8 {
        254
    }
}

impl FormatReader for IsoReader {
    fn try_new(mut source: MediaSourceStream, _options: &FormatOptions) -> Result<Self> {
        let stride = locate_master_toc(&mut source)?;

        source.seek(SeekFrom::Start(MASTER_TOC_LSN * stride + 8))?;

        let _version_major = source.read_u8()?;
        let _version_minor = source.read_u8()?;
        source.ignore_bytes(2)?;

        let _album_set_size = source.read_be_u16()?;
        let _album_sequence_number = source.read_be_u16()?;
        source.ignore_bytes(4)?;

        let area_1_toc_start = source.read_be_u32()?;
        source.ignore_bytes(4)?;
        let area_2_toc_start = source.read_be_u32()?;

        // Prefer the multi-channel area when present, else fall back to
        // two-channel; both pointers may coexist on a hybrid disc.
        let (toc_lsn, mode) = if area_2_toc_start != 0 {
            (area_2_toc_start, TrackMode::MultiChannel)
        }
        else if area_1_toc_start != 0 {
            (area_1_toc_start, TrackMode::TwoChannel)
        }
        else {
            return decode_error("iso: master TOC has no area pointers");
        };

        let area = read_area_toc(&mut source, stride, toc_lsn, mode)?;

        let channels = channels_for(area.channel_count, area.loudspeaker_config);

        let mut tracks = Vec::with_capacity(area.track_starts.len());
        for (i, (&start, &len)) in area.track_starts.iter().zip(area.track_lengths.iter()).enumerate() {
            let mut codec_params = CodecParameters::new();
            codec_params
                .for_codec(CODEC_TYPE_DST)
                .with_sample_rate(area.sample_rate)
                .with_bits_per_sample(1)
                .with_channels(channels)
                .with_channel_data_layout(ChannelDataLayout::Interleaved)
                .with_bit_order(BitOrder::MsbFirst);

            let frames = len * 75; // one frame per 1/75 s, len expressed in seconds-equivalent LSN
            let tb = TimeBase::new(1, area.sample_rate);
            codec_params.with_time_base(tb).with_n_frames(frames);

            tracks.push(Track::new(i as u32, codec_params));

            debug!("iso: track {} start_lsn={} length_lsn={}", i, start, len);
        }

        let first_start = area.track_starts[0];
        let first_len = area.track_lengths[0];

        Ok(IsoReader {
            reader: source,
            stride,
            tracks,
            cues: Vec::new(),
            metadata: MetadataLog::default(),
            cursor: SectorCursor { lsn: first_start, end_lsn: first_start + first_len },
            area,
            current_track: 0,
            dst_encoded: true,
            frame_counter: 0,
        })
    }

    fn next_packet(&mut self) -> Result<Packet> {
        loop {
            if self.cursor.lsn >= self.cursor.end_lsn {
                return end_of_stream_error();
            }

            self.reader.seek(SeekFrom::Start(self.cursor.lsn * self.stride))?;

            let dst_encoded = self.reader.read_u8()? & 0x1 != 0;
            self.reader.ignore_bytes(1)?;
            let packet_info_count = self.reader.read_u8()?;
            let _frame_info_count = self.reader.read_u8()?;

            self.dst_encoded = dst_encoded;

            let mut frame_buf = Vec::new();
            let mut saw_frame_start = false;

            for _ in 0..packet_info_count {
                let descriptor = self.reader.read_be_u24()?;
                let frame_start = (descriptor >> 23) & 0x1 != 0;
                let data_type = ((descriptor >> 20) & 0x7) as u8;
                let packet_length = descriptor & 0xFFF;

                if frame_start && saw_frame_start {
                    // Next frame begins; stop consuming packets for this one.
                    break;
                }

                if frame_start {
                    saw_frame_start = true;
                }

                if data_type == DATA_TYPE_AUDIO {
                    let mut buf = vec![0u8; packet_length as usize];
                    self.reader.read_buf_exact(&mut buf)?;
                    frame_buf.extend_from_slice(&buf);
                }
                else if data_type != DATA_TYPE_PADDING {
                    self.reader.ignore_bytes(packet_length as u64)?;
                }
                else {
                    self.reader.ignore_bytes(packet_length as u64)?;
                }
            }

            self.cursor.lsn += 1;

            if frame_buf.is_empty() {
                warn!("iso: sector at lsn {} produced no audio payload, skipping", self.cursor.lsn - 1);
                continue;
            }

            let ts = self.frame_counter;
            self.frame_counter += 1;

            return Ok(Packet::new_from_boxed_slice(
                self.current_track as u32,
                ts,
                1,
                frame_buf.into_boxed_slice(),
            ));
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
        let track_id = match to {
            SeekTo::TimeStamp { track_id, .. } => track_id as usize,
            SeekTo::Time { .. } => self.current_track,
        };

        if track_id >= self.tracks.len() {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        let start = self.area.track_starts[track_id];
        let len = self.area.track_lengths[track_id];

        self.current_track = track_id;
        self.cursor = SectorCursor { lsn: start, end_lsn: start + len };
        self.frame_counter = 0;

        Ok(SeekedTo { track_id: track_id as u32, required_ts: 0, actual_ts: 0 })
    }

    fn into_inner(self: Box<Self>) -> MediaSourceStream {
        self.reader
    }
}
