//! Source and decoder stages.
//!
//! Uses Symphonia to:
//! - probe the container and link the first audio track
//! - seek accurately to the session start, or walk the file backwards in
//!   blocks for reverse playback
//! - decode packets into interleaved `f32` samples, run them through the tempo
//!   stage, and push the result into a bounded [`SampleQueue`]
//! - keep the shared duration estimate current

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CODEC_TYPE_NULL, CodecParameters, CodecRegistry, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::bus::{BusMessage, BusSender, Stage};
use crate::pipeline::clock::Direction;
use crate::queue::SampleQueue;
use crate::tempo::TempoStage;

/// Decoders the pipeline cannot work without.
const REQUIRED_CODECS: &[(symphonia::core::codecs::CodecType, &str)] = &[
    (symphonia::core::codecs::CODEC_TYPE_PCM_S16LE, "pcm"),
    (symphonia::core::codecs::CODEC_TYPE_FLAC, "flac"),
    (symphonia::core::codecs::CODEC_TYPE_MP3, "mp3"),
    (symphonia::core::codecs::CODEC_TYPE_VORBIS, "vorbis"),
];

/// Estimates need this much decoded audio before they are trusted.
const ESTIMATE_MIN_MS: u64 = 1_000;

/// Block size for reverse playback.
const REVERSE_CHUNK_MS: u64 = 500;

/// Process-wide codec registry, built once.
pub(crate) fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        tracing::debug!("codec registry initialised");
        registry
    })
}

/// Check that every required decoder is registered.
pub(crate) fn check_codecs() -> Result<()> {
    let registry = codec_registry();
    for (codec, name) in REQUIRED_CODECS {
        if registry.get_codec(*codec).is_none() {
            return Err(anyhow!("no {name} decoder registered"));
        }
    }
    Ok(())
}

/// Duration of the current location, shared by every session that plays it.
///
/// Once the exact length is known, estimates no longer replace it.
#[derive(Debug)]
pub(crate) struct DurationCell {
    ms: AtomicU64,
    exact: AtomicBool,
}

const UNKNOWN: u64 = u64::MAX;

impl DurationCell {
    pub(crate) fn new() -> Self {
        Self {
            ms: AtomicU64::new(UNKNOWN),
            exact: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> Option<u64> {
        match self.ms.load(Ordering::Acquire) {
            UNKNOWN => None,
            ms => Some(ms),
        }
    }

    /// Store the exact duration. Returns `true` if the value changed.
    pub(crate) fn set_exact(&self, ms: u64) -> bool {
        self.exact.store(true, Ordering::Release);
        self.ms.swap(ms, Ordering::AcqRel) != ms
    }

    /// Store an estimate unless the exact value is known. Returns `true` if the value changed.
    pub(crate) fn set_estimate(&self, ms: u64) -> bool {
        if self.exact.load(Ordering::Acquire) {
            return false;
        }
        self.ms.swap(ms, Ordering::AcqRel) != ms
    }
}

/// Local file that tracks how far the demuxer has read.
pub(crate) struct SourceFile {
    file: File,
    len: u64,
    pos: Arc<AtomicU64>,
}

impl SourceFile {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat {:?}", path))?
            .len();
        Ok(Self {
            file,
            len,
            pos: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl Read for SourceFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl Seek for SourceFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let at = self.file.seek(pos)?;
        self.pos.store(at, Ordering::Relaxed);
        Ok(at)
    }
}

impl MediaSource for SourceFile {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// A probed source with its audio track linked.
pub(crate) struct OpenedSource {
    pub(crate) rate: u32,
    pub(crate) channels: usize,
    pub(crate) codec: Option<String>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    codec_params: CodecParameters,
    file_len: u64,
    read_pos: Arc<AtomicU64>,
}

impl OpenedSource {
    /// Exact duration from the container, when it declares one.
    pub(crate) fn declared_duration_ms(&self) -> Option<u64> {
        duration_ms_from_codec_params(&self.codec_params)
    }
}

/// Probe `file` and link the first audio track.
pub(crate) fn probe(file: SourceFile, path: &Path) -> Result<OpenedSource> {
    let file_len = file.len;
    let read_pos = file.pos.clone();

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;
    let format = probed.format;

    let mut linked: Option<(u32, CodecParameters)> = None;
    for track in format.tracks() {
        let params = &track.codec_params;
        let is_audio = params.codec != CODEC_TYPE_NULL
            && params.sample_rate.is_some()
            && params.channels.is_some();
        if !is_audio {
            tracing::debug!(track_id = track.id, "ignoring non-audio track");
            continue;
        }
        if let Some((linked_id, _)) = &linked {
            tracing::debug!(track_id = track.id, linked = *linked_id, "ignoring extra audio track");
            continue;
        }
        linked = Some((track.id, params.clone()));
    }
    let (track_id, codec_params) =
        linked.ok_or_else(|| anyhow!("no audio track in {:?}", path))?;

    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();

    Ok(OpenedSource {
        rate,
        channels,
        codec: codec_name_from_params(&codec_params),
        format,
        track_id,
        codec_params,
        file_len,
        read_pos,
    })
}

/// Session-specific decode parameters.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DecodeParams {
    pub(crate) start_ms: u64,
    /// Where playback stops: the end of the selection, or its start in reverse.
    /// `None` runs to the end (or top) of the file.
    pub(crate) end_ms: Option<u64>,
    pub(crate) speed: f64,
    pub(crate) direction: Direction,
}

pub(crate) struct DecodeContext {
    pub(crate) out: Arc<SampleQueue>,
    pub(crate) duration: Arc<DurationCell>,
    pub(crate) bus: BusSender,
    pub(crate) cancel: Arc<AtomicBool>,
}

/// Start the decoder thread. The output queue is closed when it finishes.
pub(crate) fn spawn_decoder(
    source: OpenedSource,
    params: DecodeParams,
    ctx: DecodeContext,
) -> JoinHandle<()> {
    thread::spawn(move || {
        match decode_loop(source, params, &ctx) {
            Ok(()) => {}
            Err(e) => ctx.bus.error(Stage::Decoder, format!("{e:#}")),
        }
        ctx.out.close();
    })
}

fn decode_loop(mut src: OpenedSource, params: DecodeParams, ctx: &DecodeContext) -> Result<()> {
    if let Some(ms) = src.declared_duration_ms() {
        if ctx.duration.set_exact(ms) {
            ctx.bus.post(BusMessage::DurationChanged);
        }
    }

    let mut decoder = codec_registry()
        .make(&src.codec_params, &DecoderOptions::default())
        .context("create decoder")?;
    let mut tempo = TempoStage::new(src.rate, src.channels, params.speed);

    match params.direction {
        Direction::Forward => decode_forward(&mut src, decoder.as_mut(), &mut tempo, params, ctx)?,
        Direction::Reverse => decode_reverse(&mut src, decoder.as_mut(), &mut tempo, params, ctx)?,
    }
    if ctx.cancel.load(Ordering::Relaxed) {
        return Ok(());
    }

    let tail = tempo.flush();
    if !tail.is_empty() {
        ctx.out.push_interleaved_blocking(&tail);
    }
    Ok(())
}

fn decode_forward(
    src: &mut OpenedSource,
    decoder: &mut dyn Decoder,
    tempo: &mut TempoStage,
    params: DecodeParams,
    ctx: &DecodeContext,
) -> Result<()> {
    let rate = src.rate;
    let channels = src.channels;
    let start_frame = ms_to_frames(params.start_ms, rate);
    let end_frame = params.end_ms.map(|ms| ms_to_frames(ms, rate));

    if start_frame > 0 {
        match seek_to_frame(src, decoder, start_frame) {
            Ok(()) => {}
            Err(SymphoniaError::SeekError(kind)) => {
                // Past the end, or not seekable: decode from the top and discard.
                tracing::debug!(?kind, start_ms = params.start_ms, "seek failed, skipping forward");
            }
            Err(e) => return Err(e).context("seek"),
        }
    }

    let mut end_of_media_frame: u64 = 0;
    let mut next_estimate_ms = ESTIMATE_MIN_MS;
    let reached_end = loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            return Ok(());
        }
        let Some((first_frame, samples)) = next_block(src, decoder)? else {
            break true;
        };

        let frames = samples.len() / channels;
        let last_frame = first_frame + frames as u64;
        end_of_media_frame = end_of_media_frame.max(last_frame);

        let skip = start_frame.saturating_sub(first_frame).min(frames as u64) as usize;
        let keep_until = match end_frame {
            Some(end) => end.saturating_sub(first_frame).min(frames as u64) as usize,
            None => frames,
        };

        if skip < keep_until {
            let stretched = tempo.process(&samples[skip * channels..keep_until * channels]);
            if !stretched.is_empty() && !ctx.out.push_interleaved_blocking(&stretched) {
                return Ok(());
            }
        }

        let decoded_ms = frames_to_ms(end_of_media_frame, rate);
        if decoded_ms >= next_estimate_ms {
            next_estimate_ms = decoded_ms + ESTIMATE_MIN_MS;
            if let Some(estimate) = estimate_duration_ms(
                decoded_ms,
                src.read_pos.load(Ordering::Relaxed),
                src.file_len,
            ) {
                if ctx.duration.set_estimate(estimate) {
                    tracing::debug!(estimate_ms = estimate, "duration estimate revised");
                    ctx.bus.post(BusMessage::DurationChanged);
                }
            }
        }

        if end_frame.is_some_and(|end| last_frame >= end) {
            break false;
        }
    };

    if reached_end {
        let exact = frames_to_ms(end_of_media_frame, rate);
        if ctx.duration.set_exact(exact) {
            tracing::debug!(duration_ms = exact, "duration measured at end of stream");
            ctx.bus.post(BusMessage::DurationChanged);
        }
    }
    Ok(())
}

/// Play from `start_ms` back down to `end_ms` (or the top of the file).
///
/// Decodes `REVERSE_CHUNK_MS` blocks walking backwards; each block is decoded
/// forwards after an accurate seek, then its frames are emitted last to first.
fn decode_reverse(
    src: &mut OpenedSource,
    decoder: &mut dyn Decoder,
    tempo: &mut TempoStage,
    params: DecodeParams,
    ctx: &DecodeContext,
) -> Result<()> {
    let rate = src.rate;
    let channels = src.channels;
    let stop_frame = ms_to_frames(params.end_ms.unwrap_or(0), rate);
    let chunk = ms_to_frames(REVERSE_CHUNK_MS, rate).max(1);
    let mut hi = ms_to_frames(params.start_ms, rate);

    while hi > stop_frame {
        if ctx.cancel.load(Ordering::Relaxed) {
            return Ok(());
        }
        let lo = hi.saturating_sub(chunk).max(stop_frame);
        seek_to_frame(src, decoder, lo).context("seek")?;

        let mut block = vec![0.0f32; (hi - lo) as usize * channels];
        while let Some((first_frame, samples)) = next_block(src, decoder)? {
            let last_frame = first_frame + (samples.len() / channels) as u64;
            let from = first_frame.max(lo);
            let to = last_frame.min(hi);
            if from < to {
                let src_at = (from - first_frame) as usize * channels;
                let dst_at = (from - lo) as usize * channels;
                let len = (to - from) as usize * channels;
                block[dst_at..dst_at + len].copy_from_slice(&samples[src_at..src_at + len]);
            }
            if last_frame >= hi {
                break;
            }
        }

        let reversed: Vec<f32> = block
            .chunks_exact(channels)
            .rev()
            .flatten()
            .copied()
            .collect();
        let stretched = tempo.process(&reversed);
        if !stretched.is_empty() && !ctx.out.push_interleaved_blocking(&stretched) {
            return Ok(());
        }
        hi = lo;
    }
    Ok(())
}

/// Accurate seek to `frame`, resetting the decoder on success.
fn seek_to_frame(
    src: &mut OpenedSource,
    decoder: &mut dyn Decoder,
    frame: u64,
) -> std::result::Result<(), SymphoniaError> {
    let rate = src.rate.max(1) as u64;
    let time = Time::new(frame / rate, (frame % rate) as f64 / rate as f64);
    let seeked = src.format.seek(
        SeekMode::Accurate,
        SeekTo::Time {
            time,
            track_id: Some(src.track_id),
        },
    )?;
    tracing::trace!(
        frame,
        required_ts = seeked.required_ts,
        actual_ts = seeked.actual_ts,
        "seeked"
    );
    decoder.reset();
    Ok(())
}

/// Decode the next packet of the linked track.
///
/// Returns the frame index of its first sample and the interleaved samples,
/// or `None` at end of stream.
fn next_block(
    src: &mut OpenedSource,
    decoder: &mut dyn Decoder,
) -> Result<Option<(u64, Vec<f32>)>> {
    loop {
        let packet = match src.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::warn!("stream parameters changed mid-file, stopping");
                return Ok(None);
            }
            Err(e) => return Err(e).context("read packet"),
        };

        if packet.track_id() != src.track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!(error = msg, "skipping undecodable packet");
                continue;
            }
            Err(SymphoniaError::IoError(e)) => {
                tracing::warn!(error = %e, "skipping packet after io error");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        if decoded.spec().channels.count() != src.channels {
            tracing::warn!(
                expected = src.channels,
                got = decoded.spec().channels.count(),
                "skipping packet with unexpected channel layout"
            );
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        let first_frame = ts_to_frames(packet.ts(), src.codec_params.time_base, src.rate);
        return Ok(Some((first_frame, sample_buf.samples().to_vec())));
    }
}

pub(crate) fn ms_to_frames(ms: u64, rate: u32) -> u64 {
    ms.saturating_mul(rate as u64) / 1000
}

pub(crate) fn frames_to_ms(frames: u64, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    frames.saturating_mul(1000) / rate as u64
}

/// Convert a packet timestamp into a frame index at `rate`.
fn ts_to_frames(ts: u64, time_base: Option<TimeBase>, rate: u32) -> u64 {
    match time_base {
        Some(tb) if !(tb.numer == 1 && tb.denom == rate) => {
            let time = tb.calc_time(ts);
            time.seconds * rate as u64 + (time.frac * rate as f64).round() as u64
        }
        _ => ts,
    }
}

/// Extrapolate the total length from how much media time the bytes read so far held.
///
/// Rounded to 100 ms so small wobbles in the read position do not count as a change.
fn estimate_duration_ms(decoded_ms: u64, bytes_read: u64, file_len: u64) -> Option<u64> {
    if decoded_ms < ESTIMATE_MIN_MS || bytes_read == 0 || file_len == 0 {
        return None;
    }
    let bytes_read = bytes_read.min(file_len);
    let estimate = (decoded_ms as u128 * file_len as u128 / bytes_read as u128) as u64;
    Some(estimate.max(decoded_ms) / 100 * 100)
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames_to_ms(frames, rate))
}

/// Best-effort codec label for status and logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
