//! Command implementations for the keyshift CLI.
//!
//! Orchestrates the complete shift flow:
//! decode → worker channel (study, process, drain) → encode

use crate::audio::{AudioFormat, AudioSignal, DecoderChain, Encoder, WavCodec};
use crate::config::Config;
use crate::defaults;
use crate::engine::{GranularEngine, StretchEngine};
use crate::error::Result as KeyshiftResult;
use crate::output::{self, ShiftProgress};
use crate::stretch::{ShiftParams, StretchRequest, pitch_ratio};
use crate::worker::{ChannelOptions, EngineFactory, WorkerChannel};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Options for one `shift` invocation.
#[derive(Debug, Clone)]
pub struct ShiftOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub params: ShiftParams,
    pub timeout: Option<Duration>,
    pub force: bool,
    pub quiet: bool,
}

/// Engine used by the CLI.
pub fn granular_factory() -> EngineFactory {
    Box::new(|| -> KeyshiftResult<Box<dyn StretchEngine>> { Ok(Box::new(GranularEngine::new())) })
}

/// `<dir>/<stem>.shifted.wav` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}.shifted.{}", stem, AudioFormat::Wav.extension()))
}

/// Read and decode an audio file.
pub async fn load_signal(path: &Path) -> Result<(AudioFormat, AudioSignal)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let format = AudioFormat::detect(&bytes, Some(path));
    let signal = DecoderChain::default()
        .decode(&bytes, format)
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok((format, signal))
}

/// Run the shift command: decode the input, shift it on a worker, write WAV.
pub async fn run_shift(config: Config, options: ShiftOptions) -> Result<PathBuf> {
    let ShiftOptions {
        input,
        output,
        params,
        timeout,
        force,
        quiet,
    } = options;

    if !force && !params.is_within_musical_range() {
        bail!(
            "{} semitones is outside ±{}; pass --force to shift anyway",
            params.semitones,
            defaults::MAX_SEMITONES
        );
    }
    // Reject bad ratios before paying for decode and worker start-up.
    params.ratios()?;

    let output = output.unwrap_or_else(|| default_output_path(&input));
    let target = match AudioFormat::from_extension(&output) {
        AudioFormat::Unknown => config.export.format,
        format => format,
    };

    let (format, signal) = load_signal(&input).await?;
    tracing::info!(
        "loaded {} ({}, {} ch, {} Hz, {:.2}s)",
        input.display(),
        format,
        signal.channel_count(),
        signal.sample_rate(),
        signal.duration_secs()
    );

    let mut channel_options = ChannelOptions::from(&config);
    if let Some(timeout) = timeout {
        channel_options.process_timeout = timeout;
    }

    let started = Instant::now();
    let channel = WorkerChannel::spawn(granular_factory(), channel_options)?;
    channel.initialize().await?;

    let progress = ShiftProgress::new(quiet);
    let job = channel.process(StretchRequest::new(signal, params))?;
    let shifted = job.wait_with_progress(|value| progress.update(value)).await;
    channel.terminate();
    let shifted = shifted?;
    progress.finish();

    let bytes = WavCodec.encode(&shifted, target, config.export.bitrate)?;
    tokio::fs::write(&output, bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        "wrote {} ({:.2}s) in {:.2?}",
        output.display(),
        shifted.duration_secs(),
        started.elapsed()
    );
    if !quiet {
        output::render_success(&format!(
            "{} → {} ({:+} semitones, tempo ×{})",
            input.display(),
            output.display(),
            params.semitones,
            params.tempo
        ));
    }
    Ok(output)
}

/// Run the info command.
pub async fn run_info(input: &Path) -> Result<()> {
    let (format, signal) = load_signal(input).await?;
    output::render_signal_info(&input.display().to_string(), format, &signal);
    Ok(())
}

/// Run the ratio command.
pub fn run_ratio(semitones: f64) -> Result<()> {
    if !semitones.is_finite() {
        bail!("semitones must be a finite number");
    }
    let ratio = pitch_ratio(semitones);
    println!("{:+} semitones = ×{:.6}", semitones, ratio);
    if semitones.abs() > defaults::MAX_SEMITONES {
        output::render_warning(&format!(
            "outside ±{} semitones; `shift` needs --force",
            defaults::MAX_SEMITONES
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_interchange;

    fn write_tone(dir: &Path, frames: usize) -> PathBuf {
        let samples: Vec<f32> = (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin())
            .collect();
        let signal = AudioSignal::new(vec![samples], 8000).unwrap();
        let path = dir.join("tone.wav");
        std::fs::write(&path, encode_interchange(&signal).unwrap()).unwrap();
        path
    }

    fn options(input: PathBuf, output: PathBuf, semitones: f64, tempo: f64) -> ShiftOptions {
        ShiftOptions {
            input,
            output: Some(output),
            params: ShiftParams::new(semitones, tempo),
            timeout: None,
            force: false,
            quiet: true,
        }
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/music/song.wav")),
            PathBuf::from("/music/song.shifted.wav")
        );
        assert_eq!(
            default_output_path(Path::new("take.flac")),
            PathBuf::from("take.shifted.wav")
        );
    }

    #[tokio::test]
    async fn test_shift_writes_stretched_wav() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_tone(dir.path(), 8000);
        let output = dir.path().join("out.wav");

        let written = run_shift(Config::default(), options(input, output.clone(), 0.0, 2.0))
            .await
            .unwrap();

        assert_eq!(written, output);
        let (format, signal) = load_signal(&output).await.unwrap();
        assert_eq!(format, AudioFormat::Wav);
        assert_eq!(signal.sample_rate(), 8000);
        assert_eq!(signal.frames(), 4000);
    }

    #[tokio::test]
    async fn test_shift_refuses_extreme_semitones_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_tone(dir.path(), 800);
        let output = dir.path().join("out.wav");

        let err = run_shift(Config::default(), options(input, output.clone(), 30.0, 1.0))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("--force"), "got: {err}");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_shift_rejects_unknown_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("noise.bin");
        std::fs::write(&input, b"definitely not audio").unwrap();

        let result = run_shift(
            Config::default(),
            options(input, dir.path().join("out.wav"), 3.0, 1.0),
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_ratio_rejects_nan() {
        assert!(run_ratio(f64::NAN).is_err());
        assert!(run_ratio(12.0).is_ok());
    }
}
