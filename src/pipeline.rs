use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rand::{SeedableRng as _, rngs::StdRng, seq::SliceRandom as _};
use rayon::prelude::*;

use crate::{
    cache::CacheIndex,
    catalog::{Catalog, ElementKind},
    compose,
    config::{ExistsBehavior, OutputLength, Profile},
    engine::MediaEngine,
    error::{LoopmuxError, LoopmuxResult},
    fingerprint::{self, CacheDecision, SourceSignature},
    metadata, reconcile, schedule,
};

/// Audio containers we pick up from the audio directory.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "ogg", "wav"];

#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Regenerate backgrounds even when the fingerprint matches.
    pub force: bool,
    /// Re-encode each finished output at the configured quality settings.
    pub compress: bool,
    /// Worker cap; `None` lets rayon size the pool.
    pub jobs: Option<usize>,
    /// Fixes the background shuffle for reproducible assignment.
    pub seed: Option<u64>,
    /// Restrict the run to audio files whose stem or name matches.
    pub only: Vec<String>,
    /// Log each file's computed timeline as JSON.
    pub dump_timeline: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileFailure {
    pub audio: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub completed: usize,
    pub reused_backgrounds: usize,
    pub skipped: usize,
    pub failures: Vec<FileFailure>,
}

impl RunSummary {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Outcome {
    /// Output produced; flag says whether the background came from cache.
    Done { reused_background: bool },
    /// Output already existed and the profile says skip.
    Skipped,
}

struct Unit {
    audio: PathBuf,
    background: PathBuf,
    output: PathBuf,
}

/// Runs the whole batch: one output per audio file, backgrounds assigned
/// round-robin from a shuffled pool, units processed in parallel. Per-file
/// errors are collected into the summary; anything else aborts the run.
pub fn run(
    profile: &Profile,
    engine: &dyn MediaEngine,
    options: &RenderOptions,
) -> LoopmuxResult<RunSummary> {
    let catalog = Catalog::load(&profile.overlay)?;

    let audio = scan_audio(&profile.paths.audio_dir, &options.only)?;
    if audio.is_empty() {
        return Err(LoopmuxError::config(format!(
            "no audio files found in '{}'",
            profile.paths.audio_dir.display()
        )));
    }
    let backgrounds = scan_backgrounds(&profile.paths.video_dir, &profile.paths.video_prefix)?;
    if backgrounds.is_empty() {
        return Err(LoopmuxError::config(format!(
            "no background videos found in '{}' (prefix '{}')",
            profile.paths.video_dir.display(),
            profile.paths.video_prefix
        )));
    }

    let output_dir = profile.paths.output_dir();
    std::fs::create_dir_all(output_dir).map_err(|e| {
        LoopmuxError::config(format!(
            "failed to create output directory '{}': {e}",
            output_dir.display()
        ))
    })?;

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let assigned = assign_backgrounds(audio.len(), &backgrounds, &mut rng);

    let units: Vec<Unit> = audio
        .into_iter()
        .zip(assigned)
        .map(|(audio, background)| {
            let output = output_path(profile, &audio);
            Unit {
                audio,
                background,
                output,
            }
        })
        .collect();

    tracing::info!(
        files = units.len(),
        backgrounds = backgrounds.len(),
        "starting batch"
    );

    let index_path = output_dir.join(CacheIndex::FILE_NAME);
    let index = Mutex::new(CacheIndex::load(&index_path));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.unwrap_or(0))
        .build()
        .map_err(|e| LoopmuxError::Other(anyhow::anyhow!("failed to build worker pool: {e}")))?;

    let results: Vec<(String, LoopmuxResult<Outcome>)> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| {
                let name = unit
                    .audio
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| unit.audio.display().to_string());
                let result = process_unit(
                    profile, &catalog, engine, options, unit, &index, &index_path,
                );
                (name, result)
            })
            .collect()
    });

    let mut summary = RunSummary::default();
    for (name, result) in results {
        match result {
            Ok(Outcome::Done { reused_background }) => {
                summary.completed += 1;
                if reused_background {
                    summary.reused_backgrounds += 1;
                }
            }
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(e) if e.is_per_file() => {
                tracing::error!(file = %name, "failed: {e}");
                summary.failures.push(FileFailure {
                    audio: name,
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        completed = summary.completed,
        reused = summary.reused_backgrounds,
        skipped = summary.skipped,
        failed = summary.failures.len(),
        "batch finished"
    );
    Ok(summary)
}

fn process_unit(
    profile: &Profile,
    catalog: &Catalog,
    engine: &dyn MediaEngine,
    options: &RenderOptions,
    unit: &Unit,
    index: &Mutex<CacheIndex>,
    index_path: &Path,
) -> LoopmuxResult<Outcome> {
    if unit.output.exists() && profile.output.exists == ExistsBehavior::Skip {
        tracing::info!(output = %unit.output.display(), "exists, skipping");
        return Ok(Outcome::Skipped);
    }

    let info = metadata::probe(&unit.audio)?;
    let resolved_texts = resolve_texts(catalog, &info.tags);

    let base_duration = engine.probe_duration(&unit.background)?;
    let plan = reconcile::reconcile(base_duration, &catalog.groups)?;
    let timeline = schedule::schedule(catalog, plan.planned_duration, &profile.transition)?;
    if options.dump_timeline {
        match serde_json::to_string(&timeline) {
            Ok(json) => tracing::info!(audio = %unit.audio.display(), timeline = %json),
            Err(e) => tracing::warn!("failed to encode timeline: {e}"),
        }
    }

    let source = SourceSignature::for_path(&unit.background)?;
    let digest = fingerprint::fingerprint(
        catalog,
        &profile.transition,
        &resolved_texts,
        &source,
        &profile.output.scale,
        &profile.encode,
    );

    let output_dir = profile.paths.output_dir();
    let (decision, recorded_artifact) = {
        let index = lock(index);
        let decision = fingerprint::decide(
            index.recorded_digest(&source.basename),
            &digest,
            options.force,
        );
        (decision, index.artifact(&source.basename).map(Path::to_path_buf))
    };

    let (background, reused_background) = match (decision, recorded_artifact) {
        (CacheDecision::Reuse, Some(artifact)) => {
            tracing::debug!(background = %artifact.display(), "background cache hit");
            (artifact, true)
        }
        _ => {
            // Two units sharing a background may both regenerate it; the
            // temp-then-rename write keeps that safe, just wasted work.
            let stem = unit
                .background
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "background".to_string());
            let artifact = output_dir.join(format!("bg-{stem}-{}.mp4", digest.short()));
            let request = compose::build_request(
                catalog,
                &timeline,
                &resolved_texts,
                &plan,
                &profile.output.scale,
            )?;

            let tmp = temp_media_path(output_dir)?;
            engine.render_background(&request, &unit.background, &profile.encode, &tmp)?;
            persist(tmp, &artifact)?;

            {
                let mut index = lock(index);
                index.record(&source.basename, digest.as_hex(), &artifact);
                if let Err(e) = index.save(index_path) {
                    // Worst case the next run regenerates; not worth failing
                    // the file over.
                    tracing::warn!("failed to save cache index: {e}");
                }
            }
            (artifact, false)
        }
    };

    let target_duration = match profile.output.length {
        OutputLength::Audio => info.duration,
        OutputLength::Seconds(s) => s,
    };

    let tmp = temp_media_path(output_dir)?;
    engine.mux(
        &background,
        &unit.audio,
        target_duration,
        &profile.encode,
        &tmp,
    )?;
    persist(tmp, &unit.output)?;

    if options.compress {
        let tmp = temp_media_path(output_dir)?;
        engine.compress(&unit.output, &profile.encode, &tmp)?;
        persist(tmp, &unit.output)?;
    }

    tracing::info!(output = %unit.output.display(), "done");
    Ok(Outcome::Done { reused_background })
}

/// Prints the reconciled plan and timeline for a hypothetical base clip
/// duration, without touching any media.
pub fn plan_json(profile: &Profile, base_duration: f64) -> LoopmuxResult<String> {
    let catalog = Catalog::load(&profile.overlay)?;
    let plan = reconcile::reconcile(base_duration, &catalog.groups)?;
    let timeline = schedule::schedule(&catalog, plan.planned_duration, &profile.transition)?;

    #[derive(serde::Serialize)]
    struct Plan<'a> {
        plan: &'a reconcile::DurationPlan,
        timeline: &'a schedule::Timeline,
    }

    serde_json::to_string_pretty(&Plan {
        plan: &plan,
        timeline: &timeline,
    })
    .map_err(|e| LoopmuxError::Other(anyhow::anyhow!("failed to encode plan: {e}")))
}

fn resolve_texts(
    catalog: &Catalog,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for element in &catalog.elements {
        if let ElementKind::Text { template, .. } = &element.kind {
            out.insert(element.id.clone(), metadata::substitute(template, tags));
        }
    }
    out
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn temp_media_path(dir: &Path) -> LoopmuxResult<tempfile::TempPath> {
    let file = tempfile::Builder::new()
        .prefix(".loopmux-")
        .suffix(".mp4")
        .tempfile_in(dir)
        .map_err(|e| {
            LoopmuxError::render(format!(
                "failed to create temp file in '{}': {e}",
                dir.display()
            ))
        })?;
    Ok(file.into_temp_path())
}

/// Final artifacts only ever appear via rename, so a failed engine call can
/// never leave a partial file at a destination path.
fn persist(tmp: tempfile::TempPath, dest: &Path) -> LoopmuxResult<()> {
    tmp.persist(dest).map_err(|e| {
        LoopmuxError::render(format!(
            "failed to move output into place at '{}': {e}",
            dest.display()
        ))
    })
}

fn output_path(profile: &Profile, audio: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    profile
        .paths
        .output_dir()
        .join(format!("{}{stem}.mp4", profile.paths.output_prefix))
}

fn scan_audio(dir: &Path, only: &[String]) -> LoopmuxResult<Vec<PathBuf>> {
    let mut files = scan_dir(dir, |name| {
        let lower = name.to_ascii_lowercase();
        AUDIO_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    })?;
    if !only.is_empty() {
        files.retain(|p| {
            let stem = p.file_stem().map(|s| s.to_string_lossy().into_owned());
            let name = p.file_name().map(|s| s.to_string_lossy().into_owned());
            only.iter()
                .any(|o| stem.as_deref() == Some(o) || name.as_deref() == Some(o))
        });
    }
    Ok(files)
}

fn scan_backgrounds(dir: &Path, prefix: &str) -> LoopmuxResult<Vec<PathBuf>> {
    scan_dir(dir, |name| {
        name.to_ascii_lowercase().ends_with(".mp4") && name.starts_with(prefix)
    })
}

/// Sorted scan so runs are deterministic before the shuffle is applied.
fn scan_dir(dir: &Path, keep: impl Fn(&str) -> bool) -> LoopmuxResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        LoopmuxError::config(format!("failed to read directory '{}': {e}", dir.display()))
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            LoopmuxError::config(format!("failed to read directory '{}': {e}", dir.display()))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if keep(name) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Round-robin over a shuffled background list, reshuffling each time the
/// list is exhausted so short pools still spread evenly.
fn assign_backgrounds(count: usize, backgrounds: &[PathBuf], rng: &mut StdRng) -> Vec<PathBuf> {
    let mut deck: Vec<&PathBuf> = backgrounds.iter().collect();
    deck.shuffle(rng);

    let mut out = Vec::with_capacity(count);
    let mut idx = 0;
    for _ in 0..count {
        if idx == deck.len() {
            deck.shuffle(rng);
            idx = 0;
        }
        out.push(deck[idx].clone());
        idx += 1;
    }
    out
}
