// DSD-to-PCM converter engine: owns one `Converter` per channel and drives
// them over an interleaved DSD frame, producing interleaved PCM.
//
// Each channel's cascade runs on its own long-lived worker thread, the way
// the reference engine pins one thread per channel for the life of the
// stream. The two directions of the handshake (hand a frame to the worker,
// wait for its result) are each a zero-capacity rendezvous channel: a send
// blocks until the other side is ready to receive, which is the same
// post/wait contract a counting semaphore gives, without an atomic flag
// standing in for it.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

use sacd_core::errors::{config_error, Result};

use crate::convert::{Converter, ConverterType};

pub struct EngineOptions {
    pub channels: usize,
    pub decimation: u32,
    pub gain_db: f64,
    pub lfe_adjust: f64,
    pub converter_type: ConverterType,
    pub user_fir_coefs: Option<Vec<f64>>,
    /// Index of the LFE channel within the interleaved layout, if any.
    pub lfe_channel: Option<usize>,
}

/// One channel's persistent conversion worker. `input_tx`/`output_rx` are a
/// rendezvous pair: submitting a frame blocks only until the worker is
/// parked waiting for it, and receiving the result blocks until the worker
/// posts it, mirroring a "signal work ready" / "wait for done" semaphore
/// pair without keeping a spinning flag.
struct ChannelWorker {
    input_tx: Option<SyncSender<Vec<u8>>>,
    output_rx: Receiver<Vec<f64>>,
    handle: Option<JoinHandle<()>>,
}

impl ChannelWorker {
    fn spawn(mut conv: Converter) -> Self {
        let (input_tx, input_rx) = sync_channel::<Vec<u8>>(0);
        let (output_tx, output_rx) = sync_channel::<Vec<f64>>(0);

        let handle = std::thread::spawn(move || {
            while let Ok(buf) = input_rx.recv() {
                let out = conv.run(&buf);
                if output_tx.send(out).is_err() {
                    break;
                }
            }
        });

        ChannelWorker { input_tx: Some(input_tx), output_rx, handle: Some(handle) }
    }

    fn submit(&self, buf: Vec<u8>) {
        if let Some(tx) = &self.input_tx {
            let _ = tx.send(buf);
        }
    }

    fn recv(&self) -> Vec<f64> {
        self.output_rx.recv().unwrap_or_default()
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        // Drop the real sender (not a clone) so the worker's `recv()` sees
        // a closed channel and exits, then join it.
        self.input_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct ConverterEngine {
    workers: Vec<ChannelWorker>,
    channels: usize,
    lfe_adjust: f64,
    lfe_channel: Option<usize>,
    lead_in_delay: f64,
    primed: bool,
}

/// 256-entry bit-reversal lookup, built lazily and shared across engine
/// instances; used to reverse DSD bytes for lead-in/lead-out priming.
fn bit_reverse_table() -> &'static [u8; 256] {
    static TABLE: std::sync::OnceLock<[u8; 256]> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0u8; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = (i as u8).reverse_bits();
        }
        t
    })
}

impl ConverterEngine {
    pub fn new(opts: EngineOptions) -> Result<Self> {
        if opts.channels == 0 {
            return config_error("engine: channel count must be non-zero");
        }

        let mut converters = Vec::with_capacity(opts.channels);
        for _ in 0..opts.channels {
            converters.push(Converter::new(
                opts.converter_type,
                opts.decimation,
                opts.gain_db,
                opts.user_fir_coefs.as_deref(),
            )?);
        }

        let lead_in_delay = converters.first().map(|c| c.delay).unwrap_or(0.0);
        let workers = converters.into_iter().map(ChannelWorker::spawn).collect();

        Ok(ConverterEngine {
            workers,
            channels: opts.channels,
            lfe_adjust: opts.lfe_adjust,
            lfe_channel: opts.lfe_channel,
            lead_in_delay,
            primed: false,
        })
    }

    fn de_interleave(&self, dsd: &[u8], bytes_per_channel: usize) -> Vec<Vec<u8>> {
        let mut planes = vec![vec![0u8; bytes_per_channel]; self.channels];
        for i in 0..bytes_per_channel {
            for (ch, plane) in planes.iter_mut().enumerate() {
                let src = i * self.channels + ch;
                if src < dsd.len() {
                    plane[i] = dsd[src];
                }
            }
        }
        planes
    }

    /// Hand one frame per channel to its worker and block for every result.
    /// The two loops are the post/wait halves of the handshake: the first
    /// fans all frames out before any channel starts waiting on its result,
    /// so the channels still run concurrently.
    fn run_workers(&self, planes: &[Vec<u8>]) -> Vec<Vec<f64>> {
        for (worker, plane) in self.workers.iter().zip(planes.iter()) {
            worker.submit(plane.clone());
        }
        self.workers.iter().map(|w| w.recv()).collect()
    }

    /// Convert one interleaved DSD frame (bytes_per_channel bytes per
    /// channel) to interleaved f32 PCM. On the very first call, runs a
    /// bit-reversed lead-in pass to prime filter history before the real
    /// forward pass, then smooths the leading transient.
    pub fn convert(&mut self, dsd: &[u8], bytes_per_channel: usize) -> Vec<f32> {
        let table = bit_reverse_table();
        let planes = self.de_interleave(dsd, bytes_per_channel);

        if !self.primed {
            let reversed: Vec<Vec<u8>> =
                planes.iter().map(|plane| plane.iter().rev().map(|&b| table[b as usize]).collect()).collect();
            self.run_workers(&reversed);
            self.primed = true;
        }

        let per_channel = self.run_workers(&planes);

        let n_samples = per_channel.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut pcm = vec![0.0f32; n_samples * self.channels];

        for (ch, samples) in per_channel.iter().enumerate() {
            let scale = if self.lfe_channel == Some(ch) { self.lfe_adjust } else { 1.0 };
            for (i, &s) in samples.iter().enumerate() {
                pcm[i * self.channels + ch] = (s * scale) as f32;
            }
        }

        self.apply_leadin_extrapolation(&mut pcm);
        pcm
    }

    /// Smooth the leading `t0 = round(2 * delay)` samples of the first
    /// forward output to mask the lead-in filter's transient ripple.
    fn apply_leadin_extrapolation(&mut self, pcm: &mut [f32]) {
        let t0 = (2.0 * self.lead_in_delay).round() as usize;
        if t0 == 0 || pcm.len() < (t0 + 1) * self.channels {
            return;
        }

        for ch in 0..self.channels {
            let d0 = pcm[t0 * self.channels + ch] as f64;
            for s in 0..t0 {
                let rev = t0 - 1 - s;
                let weight = ((rev as f64) / (t0 as f64)).powf(1.25);
                let mirror = pcm[(t0 + 1 + s).min(pcm.len() / self.channels - 1) * self.channels + ch] as f64;
                pcm[rev * self.channels + ch] = (weight * (d0 + (d0 - mirror))) as f32;
            }
        }
    }

    /// Reverse-tail flush at end of stream: bit-reverse each channel's
    /// current frame and run it once more to drain filter state.
    pub fn flush(&mut self, dsd: &[u8], bytes_per_channel: usize) -> Vec<f32> {
        let table = bit_reverse_table();
        let planes = self.de_interleave(dsd, bytes_per_channel);
        let reversed: Vec<Vec<u8>> =
            planes.iter().map(|plane| plane.iter().rev().map(|&b| table[b as usize]).collect()).collect();

        let per_channel = self.run_workers(&reversed);

        let n_samples = per_channel.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut pcm = vec![0.0f32; n_samples * self.channels];
        for (ch, samples) in per_channel.iter().enumerate() {
            for (i, &s) in samples.iter().enumerate() {
                pcm[i * self.channels + ch] = s as f32;
            }
        }
        pcm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_silence_to_near_zero_pcm() {
        let opts = EngineOptions {
            channels: 2,
            decimation: 8,
            gain_db: 0.0,
            lfe_adjust: 1.0,
            converter_type: ConverterType::Direct,
            user_fir_coefs: None,
            lfe_channel: None,
        };
        let mut engine = ConverterEngine::new(opts).unwrap();

        let bytes_per_channel = 64;
        let dsd = vec![0x69u8; bytes_per_channel * 2];
        let pcm = engine.convert(&dsd, bytes_per_channel);
        assert!(!pcm.is_empty());
    }
}
