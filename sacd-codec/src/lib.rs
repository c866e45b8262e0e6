// Symphonia DSD Codec
// Copyright (c) 2026 M0Rf30
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use sacd_core::audio::{AsAudioBufferRef, AudioBuffer, AudioBufferRef, Signal, SignalSpec};
use sacd_core::codecs::{decl_codec_type, CodecDescriptor, CodecParameters, CodecType};
use sacd_core::codecs::{Decoder, DecoderOptions, FinalizeResult};
use sacd_core::errors::{decode_error, unsupported_error, Result};
use sacd_core::formats::Packet;
use sacd_core::support_codec;

use log::debug;

mod arith;
mod bitstream;
pub mod convert;
mod dst;
pub mod engine;
mod pool;
mod rice;

pub use convert::{Converter, ConverterType};
pub use dst::DstDecoder as DstFrameDecoder;
pub use engine::{ConverterEngine, EngineOptions};
pub use pool::DstDecoderPool;

/// Raw DSD codec type "DSD\0"
pub const CODEC_TYPE_DSD: CodecType = decl_codec_type(b"DSD\0");

/// DST-compressed DSD codec type "DST\0"
pub const CODEC_TYPE_DST: CodecType = decl_codec_type(b"DST\0");

/// Raw DSD passthrough decoder. Packets are already 1-bit DSD, packed 8
/// samples per byte; this decoder only repackages them into an `AudioBuffer`
/// without performing any DST unpacking or PCM conversion.
pub struct DsdDecoder {
    params: CodecParameters,
    buf: AudioBuffer<u8>,
}

impl Decoder for DsdDecoder {
    fn try_new(params: &CodecParameters, _options: &DecoderOptions) -> Result<Self> {
        if params.codec != CODEC_TYPE_DSD {
            return unsupported_error("dsd: codec type is not DSD");
        }

        let sample_rate = match params.sample_rate {
            Some(rate) => rate,
            None => return decode_error("dsd: missing sample rate"),
        };

        let channels = match params.channels {
            Some(ch) => ch,
            None => return decode_error("dsd: missing channel layout"),
        };

        let spec = SignalSpec::new(sample_rate, channels);
        let duration = params.max_frames_per_packet.unwrap_or(4096);

        debug!(
            "dsd: decoder initialized rate={} channels={} duration={}",
            spec.rate,
            spec.channels.count(),
            duration
        );

        let buf = AudioBuffer::new(duration, spec);

        Ok(DsdDecoder { params: params.clone(), buf })
    }

    fn supported_codecs() -> &'static [CodecDescriptor] {
        &[support_codec!(CODEC_TYPE_DSD, "dsd", "Direct Stream Digital")]
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    fn decode(&mut self, packet: &Packet) -> Result<AudioBufferRef<'_>> {
        let data = packet.buf();
        let channels = self.buf.spec().channels.count();
        let samples_per_channel = data.len() / channels;

        if samples_per_channel > self.buf.capacity() {
            return decode_error("dsd: packet too large for buffer");
        }

        self.buf.clear();
        self.buf.render_reserved(Some(samples_per_channel));

        self.buf.fill(|audio_planes, idx| -> Result<()> {
            let data_offset = idx * channels;
            for (ch, plane) in audio_planes.planes().iter_mut().enumerate() {
                plane[idx] = if data_offset + ch < data.len() { data[data_offset + ch] } else { 0x69 };
            }
            Ok(())
        })?;

        Ok(self.buf.as_audio_buffer_ref())
    }

    fn finalize(&mut self) -> FinalizeResult {
        Default::default()
    }

    fn last_decoded(&self) -> AudioBufferRef<'_> {
        self.buf.as_audio_buffer_ref()
    }
}

/// DST decoder: unpacks DST-compressed frames into raw 1-bit DSD, same
/// output shape as [`DsdDecoder`]. Downstream PCM conversion is a separate
/// step (see [`ConverterEngine`]) so a caller that only wants DSD out can
/// stop here, matching how the container layer keeps DST and DSD frames
/// interchangeable past this point.
pub struct DstDecoder {
    params: CodecParameters,
    inner: dst::DstDecoder,
    buf: AudioBuffer<u8>,
    scratch: Vec<u8>,
}

impl Decoder for DstDecoder {
    fn try_new(params: &CodecParameters, _options: &DecoderOptions) -> Result<Self> {
        if params.codec != CODEC_TYPE_DST {
            return unsupported_error("dst: codec type is not DST");
        }

        let sample_rate = match params.sample_rate {
            Some(rate) => rate,
            None => return decode_error("dst: missing sample rate"),
        };

        let channels = match params.channels {
            Some(ch) => ch,
            None => return decode_error("dst: missing channel layout"),
        };

        let spec = SignalSpec::new(sample_rate, channels);
        let n_channels = spec.channels.count();
        let bytes_per_channel = (sample_rate as u64 / 75 / 8) as usize;
        let duration = (bytes_per_channel * 8) as u64;

        debug!(
            "dst: decoder initialized rate={} channels={} bytes_per_channel={}",
            spec.rate, n_channels, bytes_per_channel
        );

        let buf = AudioBuffer::new(duration, spec);
        let inner = dst::DstDecoder::new(n_channels, bytes_per_channel);

        Ok(DstDecoder { params: params.clone(), inner, buf, scratch: Vec::new() })
    }

    fn supported_codecs() -> &'static [CodecDescriptor] {
        &[support_codec!(CODEC_TYPE_DST, "dst", "Direct Stream Transfer")]
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    fn decode(&mut self, packet: &Packet) -> Result<AudioBufferRef<'_>> {
        self.inner.decode_frame(packet.buf(), &mut self.scratch);

        let channels = self.buf.spec().channels.count();
        let samples_per_channel = self.scratch.len() / channels;

        if samples_per_channel > self.buf.capacity() {
            return decode_error("dst: decoded frame too large for buffer");
        }

        self.buf.clear();
        self.buf.render_reserved(Some(samples_per_channel));

        let data = &self.scratch;
        self.buf.fill(|audio_planes, idx| -> Result<()> {
            let data_offset = idx * channels;
            for (ch, plane) in audio_planes.planes().iter_mut().enumerate() {
                plane[idx] = if data_offset + ch < data.len() { data[data_offset + ch] } else { 0x69 };
            }
            Ok(())
        })?;

        Ok(self.buf.as_audio_buffer_ref())
    }

    fn finalize(&mut self) -> FinalizeResult {
        Default::default()
    }

    fn last_decoded(&self) -> AudioBufferRef<'_> {
        self.buf.as_audio_buffer_ref()
    }
}
