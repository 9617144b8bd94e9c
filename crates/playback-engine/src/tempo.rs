//! Tempo stage: pitch-preserving speed change.
//!
//! A streaming WSOLA (waveform-similarity overlap-add) stretcher. Each output
//! hop takes one Hann-windowed frame from the input, chosen within a small
//! search radius of its nominal position so that it lines up with the natural
//! continuation of the previous frame. The analysis hop is `speed` times the
//! synthesis hop, so `n` input frames come out as roughly `n / speed` frames.

use std::f64::consts::PI;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 2.0;

const SILENCE_ENERGY: f32 = 1e-6;
const SIMILARITY_THRESHOLD: f32 = 0.2;

/// Streaming time-stretcher for interleaved `f32` audio.
pub struct TempoStage {
    channels: usize,
    speed: f64,
    window_size: usize,
    hop: usize,
    search_radius: usize,
    window: Vec<f32>,
    /// Pending interleaved input; index 0 is the oldest retained frame.
    input: Vec<f32>,
    /// Nominal start (in frames into `input`) of the next analysis frame.
    analysis_pos: f64,
    /// Where the previous frame would have continued, if there was one.
    natural_next: Option<usize>,
    /// Overlap-add accumulator, `window_size` frames.
    overlap: Vec<f32>,
    frames_in: u64,
    frames_out: u64,
}

impl TempoStage {
    /// Build a stretcher for `channels` at `sample_rate`; `speed` is clamped to
    /// `[MIN_SPEED, MAX_SPEED]`.
    pub fn new(sample_rate: u32, channels: usize, speed: f64) -> Self {
        let channels = channels.max(1);
        let mut window_size = ((sample_rate.max(1) as f32) * 0.025).round() as usize;
        window_size = window_size.clamp(256, 4096);
        if window_size % 2 != 0 {
            window_size += 1;
        }
        let hop = window_size / 2;
        Self {
            channels,
            speed: clamp_speed(speed),
            window_size,
            hop,
            search_radius: hop / 2,
            window: hann_window(window_size),
            input: Vec::new(),
            analysis_pos: 0.0,
            natural_next: None,
            overlap: vec![0.0; window_size * channels],
            frames_in: 0,
            frames_out: 0,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// At (nearly) normal speed audio passes through untouched.
    pub fn is_passthrough(&self) -> bool {
        (self.speed - 1.0).abs() < 1e-3
    }

    /// Feed interleaved samples and return whatever output is ready.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        self.input.extend_from_slice(samples);
        self.frames_in += (samples.len() / self.channels) as u64;
        self.stretch_ready()
    }

    /// Run every analysis frame the pending input can fill.
    fn stretch_ready(&mut self) -> Vec<f32> {
        let ch = self.channels;
        let mut out = Vec::new();
        loop {
            let frames = self.input.len() / ch;
            let expected = self.analysis_pos.round() as usize;
            if expected + self.search_radius + self.window_size > frames {
                break;
            }

            let chosen = match self.natural_next {
                Some(natural) if natural + self.hop <= frames => {
                    self.best_candidate(natural, expected, frames)
                }
                _ => expected,
            };

            for i in 0..self.window_size {
                let w = self.window[i];
                let src = (chosen + i) * ch;
                let dst = i * ch;
                for c in 0..ch {
                    self.overlap[dst + c] += self.input[src + c] * w;
                }
            }

            out.extend_from_slice(&self.overlap[..self.hop * ch]);
            self.frames_out += self.hop as u64;
            self.overlap.drain(..self.hop * ch);
            self.overlap.resize(self.window_size * ch, 0.0);

            let natural = chosen + self.hop;
            self.analysis_pos += self.hop as f64 * self.speed;

            let lowest_needed = (self.analysis_pos.floor() as usize).saturating_sub(self.search_radius);
            let keep_from = natural.min(lowest_needed);
            if keep_from > 0 {
                self.input.drain(..keep_from * ch);
                self.analysis_pos -= keep_from as f64;
            }
            self.natural_next = Some(natural - keep_from);
        }
        out
    }

    /// Drain the stage at end of stream.
    ///
    /// The unanalysed input is padded with silence and stretched, and the
    /// output is cut so that the whole stream comes out at `frames_in / speed`.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.is_passthrough() || self.frames_in == 0 {
            return Vec::new();
        }
        let ch = self.channels;
        let target = (self.frames_in as f64 / self.speed).round() as u64;
        let mut out = Vec::new();
        while self.frames_out < target {
            // Enough silence for at least one more analysis frame.
            let pad = (self.window_size + self.search_radius + self.hop) * ch;
            self.input.resize(self.input.len() + pad, 0.0);
            out.extend(self.stretch_ready());
        }
        let excess = (self.frames_out - target) as usize * ch;
        out.truncate(out.len().saturating_sub(excess));

        self.overlap.iter_mut().for_each(|s| *s = 0.0);
        self.input.clear();
        self.analysis_pos = 0.0;
        self.natural_next = None;
        self.frames_in = 0;
        self.frames_out = 0;
        out
    }

    fn best_candidate(&self, natural: usize, expected: usize, frames: usize) -> usize {
        let max_start = frames.saturating_sub(self.window_size);
        let expected = expected.min(max_start);
        let reference: Vec<f32> = (natural..natural + self.hop)
            .map(|frame| self.mono(frame))
            .collect();
        let ref_energy = reference.iter().map(|v| v * v).sum::<f32>();
        if ref_energy <= SILENCE_ENERGY {
            return expected;
        }

        let start = expected.saturating_sub(self.search_radius);
        let end = (expected + self.search_radius).min(max_start);
        let mut best_pos = expected;
        let mut best_score = f32::NEG_INFINITY;
        for candidate in start..=end {
            let mut sum_xy = 0.0f32;
            let mut sum_y2 = 0.0f32;
            for (i, r) in reference.iter().enumerate() {
                let y = self.mono(candidate + i);
                sum_xy += r * y;
                sum_y2 += y * y;
            }
            if sum_y2 <= SILENCE_ENERGY {
                continue;
            }
            let score = sum_xy / (ref_energy * sum_y2).sqrt();
            if score > best_score {
                best_score = score;
                best_pos = candidate;
            }
        }

        if best_score < SIMILARITY_THRESHOLD {
            expected
        } else {
            best_pos
        }
    }

    fn mono(&self, frame: usize) -> f32 {
        let base = frame * self.channels;
        let sum: f32 = self.input[base..base + self.channels].iter().sum();
        sum / self.channels as f32
    }
}

/// Clamp a commanded speed into the supported range.
pub fn clamp_speed(speed: f64) -> f64 {
    if !speed.is_finite() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Periodic Hann window; two copies offset by half a window sum to one.
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * PI * (i as f64) / size as f64;
            (0.5 - 0.5 * phase.cos()) as f32
        })
        .collect()
}
