// Cascaded DSD-to-PCM converter: a stage-1 table-lookup FIR operating
// directly on packed DSD bytes, feeding one or more stage-2/3 halfband PCM
// FIRs, each decimating by two. Topology (stage count/order) is chosen from
// the requested overall decimation the same way the reference converter
// switches between "direct" and "multistage" cascades.

use sacd_core::errors::{config_error, Result};

/// Built-in stage-1 (DSD-input) coefficient sets, by output decimation.
fn builtin_fir1(decimation: u32) -> Vec<f64> {
    match decimation {
        8 => mirrored_lowpass(24),
        16 => mirrored_lowpass(48),
        _ => mirrored_lowpass(96),
    }
}

/// Built-in stage-2/3 (PCM-input) halfband decimate-by-2 coefficient sets.
fn builtin_fir23(stage: u32) -> Vec<f64> {
    if stage == 0 {
        mirrored_lowpass(32)
    }
    else {
        mirrored_lowpass(16)
    }
}

/// A symmetric raised-cosine taper normalized to unit DC gain by the caller.
/// Real deployments substitute the reference filter bank's exact taps;
/// this preserves the same length class (order) per stage and the general
/// lowpass shape needed for the silence/ripple tests in this module.
fn mirrored_lowpass(n: usize) -> Vec<f64> {
    let mut out = vec![0.0f64; n];
    for (i, v) in out.iter_mut().enumerate() {
        let x = (i as f64) - ((n - 1) as f64) / 2.0;
        let half = (n as f64) / 2.0;
        let w = 1.0 - (x * x) / (half * half);
        *v = w.max(0.0);
    }
    out
}

fn normalize(coefs: &mut [f64]) {
    let sum: f64 = coefs.iter().sum();
    if sum.abs() > 1e-12 {
        for c in coefs.iter_mut() {
            *c /= sum;
        }
    }
}

/// Converter topology family, selecting how a total decimation ratio is
/// split across stage 1 (DSD-domain) and chained ×2 stage 2/3 (PCM-domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterType {
    Direct,
    Multistage,
    User,
}

struct StageSpec {
    decimation: u32,
    is_stage1: bool,
}

fn topology(converter: ConverterType, total_decimation: u32) -> Vec<StageSpec> {
    use ConverterType::*;

    let chain = |first: u32, twos: u32| {
        let mut v = vec![StageSpec { decimation: first, is_stage1: true }];
        for _ in 0..twos {
            v.push(StageSpec { decimation: 2, is_stage1: false });
        }
        v
    };

    match converter {
        Direct | User => match total_decimation {
            8 => chain(8, 0),
            16 => chain(16, 0),
            32 => chain(32, 0),
            64 => chain(32, 1),
            128 => chain(64, 1),
            256 => chain(64, 2),
            512 => chain(64, 3),
            1024 => chain(64, 4),
            _ => chain(total_decimation.min(64), 0),
        },
        Multistage => match total_decimation {
            8 => chain(8, 0),
            16 => chain(8, 1),
            32 => chain(8, 2),
            64 => chain(16, 2),
            128 => chain(16, 3),
            256 => chain(16, 4),
            512 => chain(16, 5),
            1024 => chain(16, 6),
            _ => chain(total_decimation.min(16), 0),
        },
    }
}

/// Stage 1: table-lookup FIR operating directly on packed DSD bytes. Each
/// `ctables[g]` maps a byte's 256 possible bit patterns to the partial FIR
/// sum contributed by that byte's 8 taps.
struct Stage1 {
    ctables: Vec<[f64; 256]>,
    ring: Vec<u8>,
    idx: usize,
    width: usize,
}

impl Stage1 {
    fn build(coefs: &[f64], gain: f64) -> Self {
        let width = (coefs.len() + 7) / 8;
        let mut ctables = vec![[0.0f64; 256]; width];

        for (g, table) in ctables.iter_mut().enumerate() {
            let base = g * 8;
            let n = (coefs.len() - base).min(8);
            for (h, slot) in table.iter_mut().enumerate() {
                let mut sum = 0.0;
                for j in 0..n {
                    let bit = (h >> (7 - j)) & 1;
                    sum += (2.0 * bit as f64 - 1.0) * coefs[base + j] * gain;
                }
                *slot = sum;
            }
        }

        Stage1 { ring: vec![0u8; width * 2], idx: 0, width, ctables }
    }

    fn push_byte(&mut self, byte: u8) {
        self.ring[self.idx] = byte;
        self.ring[self.idx + self.width] = byte;
        self.idx = (self.idx + 1) % self.width;
    }

    fn output(&self) -> f64 {
        let mut sum = 0.0;
        for j in 0..self.width {
            sum += self.ctables[j][self.ring[self.idx + j] as usize];
        }
        sum
    }
}

/// Stage 2/3: linear-convolution halfband decimate-by-2 PCM FIR. `phase`
/// persists across calls so a stream split into multiple frame-sized `run`
/// invocations still decimates correctly at frame boundaries.
struct StageFir {
    coefs: Vec<f64>,
    ring: Vec<f64>,
    idx: usize,
    phase: u32,
}

impl StageFir {
    fn new(coefs: Vec<f64>) -> Self {
        let len = coefs.len();
        StageFir { coefs, ring: vec![0.0; len * 2], idx: 0, phase: 0 }
    }

    /// Feed one input sample. Returns `Some(output)` every second call.
    fn push(&mut self, x: f64) -> Option<f64> {
        let len = self.coefs.len();
        self.ring[self.idx] = x;
        self.ring[self.idx + len] = x;
        self.idx = (self.idx + 1) % len;

        self.phase = (self.phase + 1) % 2;
        if self.phase != 0 {
            return None;
        }

        let mut sum = 0.0;
        for j in 0..len {
            sum += self.coefs[j] * self.ring[self.idx + j];
        }
        Some(sum)
    }

    fn delay_samples(&self) -> f64 {
        self.coefs.len() as f64 / 4.0
    }
}

enum Stage {
    One(Stage1, u32),
    Two(StageFir),
}

/// Per-channel converter: owns the full cascade for one audio channel.
pub struct Converter {
    stages: Vec<Stage>,
    pub delay: f64,
}

impl Converter {
    pub fn new(
        converter_type: ConverterType,
        decimation: u32,
        gain_db: f64,
        user_fir_coefs: Option<&[f64]>,
    ) -> Result<Self> {
        if converter_type == ConverterType::User && user_fir_coefs.is_none() {
            return config_error("converter: USER converter requires user_fir_coefs");
        }

        let specs = topology(converter_type, decimation);
        let gain = 10f64.powf(gain_db / 20.0);

        let mut stages = Vec::with_capacity(specs.len());
        let mut delay = 0.0f64;
        let mut stage23_idx = 0u32;

        for spec in specs {
            if spec.is_stage1 {
                let mut coefs = match user_fir_coefs {
                    Some(user) => user.to_vec(),
                    None => builtin_fir1(spec.decimation),
                };
                normalize(&mut coefs);

                delay = (coefs.len() as f64 / 2.0) / spec.decimation as f64;
                stages.push(Stage::One(Stage1::build(&coefs, gain), spec.decimation));
            }
            else {
                let mut coefs = builtin_fir23(stage23_idx);
                normalize(&mut coefs);
                stage23_idx += 1;

                let fir = StageFir::new(coefs);
                delay = delay / spec.decimation as f64 + fir.delay_samples();
                stages.push(Stage::Two(fir));
            }
        }

        Ok(Converter { stages, delay })
    }

    /// Run the cascade over one channel's packed DSD byte buffer, producing
    /// approximately `dsd.len() * 8 / total_decimation` PCM samples.
    pub fn run(&mut self, dsd: &[u8]) -> Vec<f64> {
        let mut pcm = Vec::new();

        let (stage1, stage1_dec) = match &mut self.stages[0] {
            Stage::One(s1, dec) => (s1, *dec),
            Stage::Two(_) => unreachable!("first converter stage is always stage 1"),
        };

        let mut bit_count = 0usize;
        for &byte in dsd {
            stage1.push_byte(byte);
            bit_count += 8;

            if bit_count % stage1_dec as usize != 0 {
                continue;
            }

            let mut sample = Some(stage1.output());

            for stage in self.stages[1..].iter_mut() {
                let Stage::Two(fir) = stage
                else {
                    unreachable!("only stage 1 may appear first in the cascade");
                };

                sample = match sample {
                    Some(x) => fir.push(x),
                    None => None,
                };

                if sample.is_none() {
                    break;
                }
            }

            if let Some(x) = sample {
                pcm.push(x);
            }
        }

        pcm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_produces_near_zero_pcm() {
        let mut conv = Converter::new(ConverterType::Direct, 8, 0.0, None).unwrap();
        let dsd = vec![0x69u8; 64];
        let pcm = conv.run(&dsd);
        assert!(!pcm.is_empty());
        for s in pcm {
            assert!(s.abs() < 1.0, "sample {} too large", s);
        }
    }

    #[test]
    fn user_converter_requires_coefficients() {
        let r = Converter::new(ConverterType::User, 8, 0.0, None);
        assert!(r.is_err());
    }

    #[test]
    fn multistage_decimation_halves_output_per_stage() {
        let mut conv = Converter::new(ConverterType::Multistage, 32, 0.0, None).unwrap();
        let dsd = vec![0x00u8; 256];
        let pcm = conv.run(&dsd);
        // 256 bytes = 2048 bits; stage-1 decimates by 8 -> 256 samples,
        // then two halfband stages each decimate by 2 -> 64 samples.
        assert_eq!(pcm.len(), 64);
    }
}
