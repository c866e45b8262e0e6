// Symphonia SACD/DSD/DST Bundle
// Copyright (c) 2026 M0Rf30
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A thin facade tying the container parsers in [`sacd_format`] together
//! with the DST/DSD decoders and the DSD-to-PCM converter engine in
//! [`sacd_codec`], exposing the configuration surface a host application
//! actually wants to set.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use sacd_codec::convert::ConverterType;
use sacd_codec::engine::{ConverterEngine, EngineOptions};
use sacd_codec::{CODEC_TYPE_DSD, CODEC_TYPE_DST};
use sacd_core::codecs::{BitOrder, ChannelDataLayout};
use sacd_core::errors::{config_error, decode_error, unsupported_error, Result};
use sacd_core::formats::{FormatOptions, FormatReader};
use sacd_core::io::MediaSourceStream;

use log::{debug, info};

/// Sample precision used internally by the PCM pipeline. Both variants
/// accumulate in `f64` (see [`sacd_codec::convert`]) and only the final
/// cast to the host-visible buffer differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F32,
    F64,
}

/// Which SACD area(s)/tracks are exposed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaMode {
    TwoChannel,
    MultiChannel,
    Both,
    SingleTrack,
    FullPlayback,
}

/// The full enumerated configuration surface for a decode session.
#[derive(Debug, Clone)]
pub struct SacdDecoderOptions {
    pub gain_db: f64,
    pub lfe_adjust: f64,
    pub converter_type: ConverterType,
    pub precision: Precision,
    pub user_fir_coefs: Option<Vec<f64>>,
    pub area_mode: AreaMode,
    pub dst_pool_threads: usize,
}

impl Default for SacdDecoderOptions {
    fn default() -> Self {
        SacdDecoderOptions {
            gain_db: 0.0,
            lfe_adjust: 1.0,
            converter_type: ConverterType::Multistage,
            precision: Precision::F32,
            user_fir_coefs: None,
            area_mode: AreaMode::TwoChannel,
            dst_pool_threads: 1,
        }
    }
}

impl SacdDecoderOptions {
    fn resolved_converter_type(&self) -> ConverterType {
        if self.converter_type == ConverterType::User && self.user_fir_coefs.is_none() {
            debug!("sacd: USER converter requested without coefficients, falling back to DIRECT");
            ConverterType::Direct
        }
        else {
            self.converter_type
        }
    }
}

/// Top-level SACD/DSD/DST decoder: opens a container, decodes each packet
/// through the matching codec, and runs the result through the DSD-to-PCM
/// converter engine.
pub struct SacdDecoder {
    reader: Box<dyn FormatReader>,
    engine: ConverterEngine,
    channels: usize,
    bytes_per_channel: usize,
    dsd_codec: bool,
    dst_decoder: Option<sacd_codec::DstFrameDecoder>,
    scratch: Vec<u8>,
    /// Raw DSD byte payload must be reordered to MSB-first before reaching
    /// the codec/engine layers, which assume that bit order throughout.
    needs_bit_reverse: bool,
    /// Packets whose samples occupy one contiguous run per channel (DSF)
    /// rather than being interleaved frame-by-frame (DSDIFF, ISO).
    planar: bool,
    /// The last interleaved, MSB-first DSD frame handed to the converter
    /// engine, kept so `finish` can bit-reverse the real tail instead of
    /// a synthetic silence buffer.
    last_dsd: Vec<u8>,
}

impl SacdDecoder {
    /// Probe and open `source`, selecting the default track's codec and
    /// building a converter engine sized for its sample rate and channel
    /// count.
    pub fn try_new(
        make_reader: impl FnOnce(MediaSourceStream, &FormatOptions) -> Result<Box<dyn FormatReader>>,
        source: MediaSourceStream,
        pcm_sample_rate: u32,
        options: &SacdDecoderOptions,
    ) -> Result<Self> {
        let reader = make_reader(source, &FormatOptions::default())?;

        let track = match reader.default_track() {
            Some(t) => t,
            None => return decode_error("sacd: container has no tracks"),
        };

        let params = &track.codec_params;
        let sample_rate = match params.sample_rate {
            Some(rate) => rate,
            None => return decode_error("sacd: missing sample rate"),
        };
        let channels = match params.channels {
            Some(ch) => ch.count(),
            None => return decode_error("sacd: missing channel layout"),
        };

        if sample_rate % pcm_sample_rate != 0 {
            return config_error("sacd: pcm sample rate does not evenly divide the dsd rate");
        }

        let decimation = sample_rate / pcm_sample_rate;
        if !matches!(decimation, 8 | 16 | 32 | 64 | 128 | 256 | 512 | 1024) {
            return config_error("sacd: unsupported decimation ratio");
        }

        let dsd_codec = params.codec == CODEC_TYPE_DSD;
        if !dsd_codec && params.codec != CODEC_TYPE_DST {
            return unsupported_error("sacd: unrecognized track codec");
        }

        let needs_bit_reverse = dsd_codec && params.bit_order == Some(BitOrder::LsbFirst);
        let planar = dsd_codec && params.channel_data_layout == Some(ChannelDataLayout::Planar);

        let bytes_per_channel = (sample_rate as u64 / 75 / 8) as usize;

        let dst_decoder =
            if dsd_codec { None } else { Some(sacd_codec::DstFrameDecoder::new(channels, bytes_per_channel)) };

        let lfe_channel = if channels >= 6 { Some(3) } else { None };

        let engine = ConverterEngine::new(EngineOptions {
            channels,
            decimation,
            gain_db: options.gain_db,
            lfe_adjust: options.lfe_adjust,
            converter_type: options.resolved_converter_type(),
            user_fir_coefs: options.user_fir_coefs.clone(),
            lfe_channel,
        })?;

        info!(
            "sacd: opened track codec={} rate={} channels={} decimation={}",
            params.codec, sample_rate, channels, decimation
        );

        Ok(SacdDecoder {
            reader,
            engine,
            channels,
            bytes_per_channel,
            dsd_codec,
            dst_decoder,
            scratch: Vec::new(),
            needs_bit_reverse,
            planar,
            last_dsd: vec![0x69u8; bytes_per_channel * channels],
        })
    }

    /// Rearrange one packet's per-channel contiguous runs into
    /// frame-interleaved order.
    fn deplanarize(&self, buf: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; self.bytes_per_channel * self.channels];
        for ch in 0..self.channels {
            let src = &buf[ch * self.bytes_per_channel..((ch + 1) * self.bytes_per_channel).min(buf.len())];
            for (i, &b) in src.iter().enumerate() {
                out[i * self.channels + ch] = b;
            }
        }
        out
    }

    /// Normalize a raw DSD payload to the engine's assumed convention:
    /// MSB-first bit order, frame-interleaved channel layout.
    fn normalize_dsd(&self, buf: &[u8]) -> Vec<u8> {
        let mut dsd = if self.planar { self.deplanarize(buf) } else { buf.to_vec() };
        if self.needs_bit_reverse {
            for b in dsd.iter_mut() {
                *b = b.reverse_bits();
            }
        }
        dsd
    }

    /// Decode and convert the next audio frame, returning interleaved f32
    /// PCM, or `None` at end of stream.
    pub fn next_pcm_frame(&mut self) -> Result<Option<Vec<f32>>> {
        let packet = match self.reader.next_packet() {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };

        let dsd = if self.dsd_codec {
            self.normalize_dsd(packet.buf())
        }
        else {
            let decoder = self.dst_decoder.as_mut().expect("dst decoder present for non-dsd track");
            decoder.decode_frame(packet.buf(), &mut self.scratch);
            self.scratch.clone()
        };

        self.last_dsd = dsd.clone();
        Ok(Some(self.engine.convert(&dsd, self.bytes_per_channel)))
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Run the end-of-stream reverse-tail flush over the last decoded DSD
    /// frame, producing any remaining buffered PCM.
    pub fn finish(&mut self) -> Vec<f32> {
        let last = self.last_dsd.clone();
        self.engine.flush(&last, self.bytes_per_channel)
    }
}
