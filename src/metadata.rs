use std::{collections::BTreeMap, path::Path};

use symphonia::core::{
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::{MetadataOptions, MetadataRevision, StandardTagKey},
    probe::Hint,
};

use crate::error::{LoopmuxError, LoopmuxResult};

/// Probed audio properties: playable duration plus whatever tags the
/// container carries, keyed by lowercase name (`title`, `artist`, ...).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioInfo {
    pub duration: f64,
    pub tags: BTreeMap<String, String>,
}

/// Reads duration and tags from an audio file without decoding it.
pub fn probe(path: &Path) -> LoopmuxResult<AudioInfo> {
    let file = std::fs::File::open(path).map_err(|e| {
        LoopmuxError::metadata(format!("failed to open '{}': {e}", path.display()))
    })?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            LoopmuxError::metadata(format!("failed to probe '{}': {e}", path.display()))
        })?;

    let mut tags = BTreeMap::new();
    // ID3 and friends surface as probe-level metadata for mp3.
    if let Some(mut meta) = probed.metadata.get() {
        if let Some(rev) = meta.skip_to_latest() {
            collect_tags(rev, &mut tags);
        }
    }
    {
        let mut meta = probed.format.metadata();
        if let Some(rev) = meta.skip_to_latest() {
            collect_tags(rev, &mut tags);
        }
    }

    let track = probed.format.default_track().ok_or_else(|| {
        LoopmuxError::metadata(format!("'{}' has no audio track", path.display()))
    })?;
    let params = &track.codec_params;
    let duration = match (params.time_base, params.n_frames) {
        (Some(tb), Some(frames)) => {
            let t = tb.calc_time(frames);
            t.seconds as f64 + t.frac
        }
        _ => {
            return Err(LoopmuxError::metadata(format!(
                "could not determine duration of '{}'",
                path.display()
            )));
        }
    };

    if duration <= 0.0 {
        return Err(LoopmuxError::metadata(format!(
            "'{}' reports a non-positive duration",
            path.display()
        )));
    }

    Ok(AudioInfo { duration, tags })
}

fn collect_tags(rev: &MetadataRevision, out: &mut BTreeMap<String, String>) {
    for tag in rev.tags() {
        let value = tag.value.to_string();
        if value.is_empty() {
            continue;
        }
        if let Some(name) = std_key_name(tag.std_key) {
            out.insert(name.to_string(), value);
        } else if !tag.key.is_empty() {
            out.entry(tag.key.to_ascii_lowercase()).or_insert(value);
        }
    }
}

fn std_key_name(key: Option<StandardTagKey>) -> Option<&'static str> {
    match key? {
        StandardTagKey::TrackTitle => Some("title"),
        StandardTagKey::Artist => Some("artist"),
        StandardTagKey::AlbumArtist => Some("album_artist"),
        StandardTagKey::Album => Some("album"),
        StandardTagKey::Genre => Some("genre"),
        StandardTagKey::Date => Some("date"),
        StandardTagKey::TrackNumber => Some("track"),
        StandardTagKey::Composer => Some("composer"),
        _ => None,
    }
}

/// Substitutes `{name}` placeholders from the tag map. Unknown names resolve
/// to the empty string; `{{` and `}}` are literal braces.
pub fn substitute(template: &str, tags: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if closed {
                    if let Some(value) = tags.get(key.as_str()) {
                        out.push_str(value);
                    }
                } else {
                    // Unterminated placeholder, keep it literal.
                    out.push('{');
                    out.push_str(&key);
                }
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push('}');
            }
            other => out.push(other),
        }
    }

    out
}
