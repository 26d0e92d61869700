use std::{
    path::Path,
    process::{Command, Stdio},
};

use crate::{
    compose::{self, CompositionRequest},
    config::EncodeSettings,
    error::{LoopmuxError, LoopmuxResult},
};

/// Media operations behind the pipeline. Implemented by the system ffmpeg
/// binary in production; tests script their own implementation to observe
/// calls without spawning processes.
pub trait MediaEngine: Send + Sync {
    /// Playable duration of a media file in seconds.
    fn probe_duration(&self, path: &Path) -> LoopmuxResult<f64>;

    /// Renders one composed background: loops/trims the source per the
    /// request and burns in every overlay layer.
    fn render_background(
        &self,
        request: &CompositionRequest,
        source: &Path,
        encode: &EncodeSettings,
        out: &Path,
    ) -> LoopmuxResult<()>;

    /// Muxes a composed background (looped as needed) with one audio track
    /// into a final output of `duration` seconds. The video stream is copied,
    /// never re-encoded.
    fn mux(
        &self,
        background: &Path,
        audio: &Path,
        duration: f64,
        encode: &EncodeSettings,
        out: &Path,
    ) -> LoopmuxResult<()>;

    /// Re-encodes a finished output at the configured quality settings.
    fn compress(&self, input: &Path, encode: &EncodeSettings, out: &Path) -> LoopmuxResult<()>;
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> LoopmuxResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            LoopmuxError::render(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Drives the system `ffmpeg` binary. We intentionally shell out rather than
/// link FFmpeg to avoid native dev header/lib requirements.
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> LoopmuxResult<Self> {
        if !is_ffmpeg_on_path() {
            return Err(LoopmuxError::render(
                "ffmpeg is required, but was not found on PATH",
            ));
        }
        Ok(Self)
    }

    fn run(&self, args: &[String]) -> LoopmuxResult<()> {
        let output = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                LoopmuxError::render(format!(
                    "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopmuxError::render(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl MediaEngine for FfmpegEngine {
    fn probe_duration(&self, path: &Path) -> LoopmuxResult<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                LoopmuxError::render(format!(
                    "failed to spawn ffprobe (is it installed and on PATH?): {e}"
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopmuxError::render(format!(
                "ffprobe failed on '{}': {}",
                path.display(),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = text.trim().parse().map_err(|_| {
            LoopmuxError::render(format!(
                "ffprobe reported no usable duration for '{}' (got '{}')",
                path.display(),
                text.trim()
            ))
        })?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(LoopmuxError::render(format!(
                "'{}' reports a non-positive duration",
                path.display()
            )));
        }
        Ok(duration)
    }

    fn render_background(
        &self,
        request: &CompositionRequest,
        source: &Path,
        encode: &EncodeSettings,
        out: &Path,
    ) -> LoopmuxResult<()> {
        ensure_parent_dir(out)?;

        // drawtext reads resolved text from files, so user text never needs
        // filtergraph escaping. The dir must outlive the ffmpeg run.
        let text_dir = tempfile::tempdir().map_err(|e| {
            LoopmuxError::render(format!("failed to create temp dir for overlay text: {e}"))
        })?;
        let text_files = compose::write_text_files(request, text_dir.path())?;
        let graph = request.filtergraph(&text_files)?;

        let args = background_args(request, &graph, source, encode, out);
        self.run(&args)
    }

    fn mux(
        &self,
        background: &Path,
        audio: &Path,
        duration: f64,
        encode: &EncodeSettings,
        out: &Path,
    ) -> LoopmuxResult<()> {
        ensure_parent_dir(out)?;
        self.run(&mux_args(background, audio, duration, encode, out))
    }

    fn compress(&self, input: &Path, encode: &EncodeSettings, out: &Path) -> LoopmuxResult<()> {
        ensure_parent_dir(out)?;
        self.run(&compress_args(input, encode, out))
    }
}

/// `-stream_loop` counts extra plays, so a plan of N source plays maps to
/// N - 1; `-t` then trims the tail to the planned duration.
fn background_args(
    request: &CompositionRequest,
    filtergraph: &str,
    source: &Path,
    encode: &EncodeSettings,
    out: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    if request.source_loops > 1 {
        args.push("-stream_loop".to_string());
        args.push((request.source_loops - 1).to_string());
    }
    args.push("-i".to_string());
    args.push(source.to_string_lossy().into_owned());
    for image in request.image_inputs() {
        // Still images get continuous timestamps so fade filters can run.
        args.push("-loop".to_string());
        args.push("1".to_string());
        args.push("-i".to_string());
        args.push(image.to_string());
    }
    args.extend([
        "-filter_complex".to_string(),
        filtergraph.to_string(),
        "-map".to_string(),
        "[vout]".to_string(),
        "-t".to_string(),
        format!("{:.3}", request.duration),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        encode.crf.to_string(),
        "-preset".to_string(),
        encode.preset.clone(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out.to_string_lossy().into_owned(),
    ]);
    args
}

/// Background loops indefinitely; `-t` plus `-shortest` stop at the audio
/// (or fixed) length. Video is stream-copied.
fn mux_args(
    background: &Path,
    audio: &Path,
    duration: f64,
    encode: &EncodeSettings,
    out: &Path,
) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        background.to_string_lossy().into_owned(),
        "-i".to_string(),
        audio.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        encode.audio_bitrate.clone(),
        "-t".to_string(),
        format!("{duration:.3}"),
        "-shortest".to_string(),
        out.to_string_lossy().into_owned(),
    ]
}

fn compress_args(input: &Path, encode: &EncodeSettings, out: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        encode.crf.to_string(),
        "-preset".to_string(),
        encode.preset.clone(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        encode.audio_bitrate.clone(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out.to_string_lossy().into_owned(),
    ]
}
