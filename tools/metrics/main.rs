//! Offline metrics: runs a WAV file through the engine and reports loudness, clipping,
//! latency, level stability and speed as JSON.
//!
//! Usage: speechboost-metrics <input.wav> [output.wav] [--reference-lufs -16]
//!        [--autogain-target-db -20] [--boost 1.0] [--no-clarity]
//!
//! `--reference-lufs` is only what the report's loudness error is measured against.
//! `--autogain-target-db` is the speech-band RMS level the engine's AutoGain steers toward.

use anyhow::{anyhow, bail, Context, Result};
use ebur128::{EbuR128, Mode};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::Serialize;
use speechboost::{Engine, EngineConfig, Head, MediaElementId, MediaTapper, Settings, TapError};
use std::path::PathBuf;
use std::time::Instant;

const BLOCK: usize = 128;
const CLIP_LEVEL: f32 = 0.999;
// Latency search range (seconds) and correlation window (seconds).
const MAX_LAG_S: f32 = 0.1;
const CORR_WINDOW_S: f32 = 5.0;

struct Args {
    input: PathBuf,
    output: Option<PathBuf>,
    reference_lufs: f64,
    autogain_target_db: Option<f32>,
    boost: f32,
    clarity: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut input = None;
    let mut output = None;
    let mut reference_lufs = -16.0;
    let mut autogain_target_db = None;
    let mut boost = 1.0;
    let mut clarity = true;

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--reference-lufs" => {
                let v = it.next().context("--reference-lufs needs a value")?;
                reference_lufs = v.parse().with_context(|| format!("bad --reference-lufs '{}'", v))?;
            }
            "--autogain-target-db" => {
                let v = it.next().context("--autogain-target-db needs a value")?;
                let db = v.parse().with_context(|| format!("bad --autogain-target-db '{}'", v))?;
                autogain_target_db = Some(db);
            }
            "--boost" => {
                let v = it.next().context("--boost needs a value")?;
                boost = v.parse().with_context(|| format!("bad --boost '{}'", v))?;
            }
            "--no-clarity" => clarity = false,
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            _ if output.is_none() => output = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument '{}'", arg),
        }
    }

    Ok(Args {
        input: input.context("usage: speechboost-metrics <input.wav> [output.wav]")?,
        output,
        reference_lufs,
        autogain_target_db,
        boost,
        clarity,
    })
}

fn engine_config(args: &Args, rate: u32, channels: usize) -> EngineConfig {
    let mut config = EngineConfig {
        sample_rate: rate,
        max_block: BLOCK,
        max_channels: channels,
        ..EngineConfig::default()
    };
    if let Some(db) = args.autogain_target_db {
        config.autogain.target_db = db;
    }
    config
}

/// The offline run has a single, always-connected source.
struct OfflineTapper;

impl MediaTapper for OfflineTapper {
    fn connect(&mut self, _: MediaElementId, _: Head) -> std::result::Result<(), TapError> {
        Ok(())
    }

    fn disconnect(&mut self, _: MediaElementId, _: Head) -> std::result::Result<(), TapError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Report {
    input: String,
    sample_rate: u32,
    channels: usize,
    duration_s: f64,
    input_lufs: Option<f64>,
    output_lufs: Option<f64>,
    reference_lufs: f64,
    autogain_target_db: f32,
    loudness_error_db: Option<f64>,
    clipped_percent: f64,
    latency_samples: usize,
    latency_ms: f64,
    level_change_variance_db2: f64,
    realtime_factor: f64,
}

fn read_planar(path: &PathBuf) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader = WavReader::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, s) in frame.iter().enumerate() {
            planar[ch].push(*s);
        }
    }
    Ok((spec, planar))
}

fn integrated_lufs(planar: &[Vec<f32>], rate: u32) -> Result<Option<f64>> {
    let channels = planar.len();
    let mut meter =
        EbuR128::new(channels as u32, rate, Mode::I).map_err(|e| anyhow!("loudness meter: {:?}", e))?;
    let frames = planar.first().map_or(0, |c| c.len());
    let mut interleaved = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for ch in planar {
            interleaved.push(ch[i]);
        }
    }
    meter
        .add_frames_f32(&interleaved)
        .map_err(|e| anyhow!("loudness meter: {:?}", e))?;
    // Silence or too-short input has no integrated loudness.
    Ok(meter.loudness_global().ok().filter(|l| l.is_finite()))
}

fn mono(planar: &[Vec<f32>]) -> Vec<f32> {
    let n = planar.first().map_or(0, |c| c.len());
    let k = 1.0 / planar.len().max(1) as f32;
    (0..n).map(|i| planar.iter().map(|c| c[i]).sum::<f32>() * k).collect()
}

/// Lag (in samples) maximizing the normalized cross-correlation of `y` against `x`.
fn estimate_latency(x: &[f32], y: &[f32], max_lag: usize, window: usize) -> usize {
    let n = x.len().min(y.len()).min(window);
    let mut best = (0usize, f64::MIN);
    for lag in 0..=max_lag.min(n.saturating_sub(1)) {
        let mut dot = 0.0f64;
        let mut ey = 0.0f64;
        for i in 0..n - lag {
            dot += x[i] as f64 * y[i + lag] as f64;
            ey += (y[i + lag] as f64).powi(2);
        }
        let score = dot / ey.sqrt().max(1e-12);
        if score > best.1 {
            best = (lag, score);
        }
    }
    best.0
}

/// Variance of second-to-second RMS level changes (dB²), over non-silent seconds.
fn level_change_variance(x: &[f32], rate: usize) -> f64 {
    let levels: Vec<f64> = x
        .chunks(rate.max(1))
        .map(|c| {
            let ms = c.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / c.len() as f64;
            10.0 * (ms + 1e-12).log10()
        })
        .filter(|db| *db > -60.0)
        .collect();
    let deltas: Vec<f64> = levels.windows(2).map(|w| w[1] - w[0]).collect();
    if deltas.is_empty() {
        return 0.0;
    }
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args(std::env::args().skip(1))?;

    let (spec, input) = read_planar(&args.input)?;
    let rate = spec.sample_rate;
    let channels = input.len();
    let frames = input.first().map_or(0, |c| c.len());
    if frames == 0 {
        bail!("'{}' contains no audio", args.input.display());
    }

    let config = engine_config(&args, rate, channels);
    let autogain_target_db = config.autogain.target_db;
    let settings = Settings {
        boost: args.boost,
        clarity_enabled: args.clarity,
        ..Settings::default()
    };
    let builder = Engine::builder(config).settings(settings);
    #[cfg(feature = "rnnoise")]
    let builder = builder.frame_loader(std::sync::Arc::new(speechboost::RnnoiseLoader));
    let (mut engine, mut graph) = builder
        .build(Box::new(OfflineTapper))
        .context("failed to build engine")?;
    engine.scan(&[MediaElementId(0)]);

    let tick_every = ((rate as f32 * engine.tick_interval().as_secs_f32()) as usize).max(BLOCK);
    let mut output = vec![vec![0.0f32; frames]; channels];
    let mut since_tick = 0usize;

    let started = Instant::now();
    let mut pos = 0;
    while pos < frames {
        let len = (frames - pos).min(BLOCK);
        let ins: Vec<&[f32]> = input.iter().map(|c| &c[pos..pos + len]).collect();
        let mut outs: Vec<&mut [f32]> = output.iter_mut().map(|c| &mut c[pos..pos + len]).collect();
        graph.render(&ins, &mut outs);

        pos += len;
        since_tick += len;
        if since_tick >= tick_every {
            since_tick = 0;
            engine.tick();
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    engine.tick();

    let duration_s = frames as f64 / rate as f64;
    let input_lufs = integrated_lufs(&input, rate)?;
    let output_lufs = integrated_lufs(&output, rate)?;
    let clipped = output
        .iter()
        .flat_map(|c| c.iter())
        .filter(|s| s.abs() >= CLIP_LEVEL)
        .count();

    let in_mono = mono(&input);
    let out_mono = mono(&output);
    let latency = estimate_latency(
        &in_mono,
        &out_mono,
        (MAX_LAG_S * rate as f32) as usize,
        (CORR_WINDOW_S * rate as f32) as usize,
    );

    let report = Report {
        input: args.input.display().to_string(),
        sample_rate: rate,
        channels,
        duration_s,
        input_lufs,
        output_lufs,
        reference_lufs: args.reference_lufs,
        autogain_target_db,
        loudness_error_db: output_lufs.map(|l| l - args.reference_lufs),
        clipped_percent: 100.0 * clipped as f64 / (frames * channels) as f64,
        latency_samples: latency,
        latency_ms: 1000.0 * latency as f64 / rate as f64,
        level_change_variance_db2: level_change_variance(&out_mono, rate as usize),
        realtime_factor: duration_s / elapsed.max(1e-9),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = args.output {
        let out_spec = WavSpec {
            channels: channels as u16,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer =
            WavWriter::create(&path, out_spec).with_context(|| format!("failed to create '{}'", path.display()))?;
        for i in 0..frames {
            for ch in &output {
                writer.write_sample(ch[i])?;
            }
        }
        writer.finalize()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_autogain_target_reaches_engine_config() {
        let a = args(&["in.wav", "--autogain-target-db", "-18", "--reference-lufs", "-23"]).unwrap();
        let config = engine_config(&a, 44100, 2);
        assert_eq!(config.autogain.target_db, -18.0);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(a.reference_lufs, -23.0);
    }

    #[test]
    fn test_reference_lufs_leaves_engine_target_alone() {
        let a = args(&["in.wav", "out.wav", "--reference-lufs", "-14"]).unwrap();
        let config = engine_config(&a, 48000, 1);
        assert_eq!(config.autogain.target_db, EngineConfig::default().autogain.target_db);
        assert_eq!(a.output, Some(PathBuf::from("out.wav")));
    }

    #[test]
    fn test_unknown_extra_argument_is_rejected() {
        assert!(args(&["a.wav", "b.wav", "c.wav"]).is_err());
        assert!(args(&["--boost"]).is_err());
    }
}
