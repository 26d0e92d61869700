use std::{collections::BTreeMap, path::Path, time::UNIX_EPOCH};

use sha2::{Digest as _, Sha256};

use crate::{
    catalog::{Catalog, ElementKind},
    config::{EncodeSettings, TransitionMode, TransitionSettings},
    error::{LoopmuxError, LoopmuxResult},
};

/// Content digest of everything that shapes a rendered background. Equal
/// fingerprints must mean byte-identical render requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// 16-char prefix, embedded in artifact filenames.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the source background file: enough to notice replacement or
/// edit without reading its contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSignature {
    pub basename: String,
    pub size: u64,
    pub mtime_unix: i64,
}

impl SourceSignature {
    pub fn for_path(path: &Path) -> LoopmuxResult<Self> {
        let meta = std::fs::metadata(path).map_err(|e| {
            LoopmuxError::render(format!("failed to stat '{}': {e}", path.display()))
        })?;
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                LoopmuxError::render(format!("'{}' has no usable file name", path.display()))
            })?;
        let mtime_unix = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            basename,
            size: meta.len(),
            mtime_unix,
        })
    }
}

/// Derives the digest over overlay config, transition settings, resolved
/// texts, source identity and output settings. Only semantically relevant
/// attributes feed the hash, in a fixed order.
pub fn fingerprint(
    catalog: &Catalog,
    transition: &TransitionSettings,
    resolved_texts: &BTreeMap<String, String>,
    source: &SourceSignature,
    scale: &str,
    encode: &EncodeSettings,
) -> Fingerprint {
    let mut h = Hasher::new();
    h.str("loopmux-fp-v1");

    h.u64(catalog.elements.len() as u64);
    for element in &catalog.elements {
        h.str(&element.id);
        match &element.kind {
            ElementKind::Text {
                template,
                font_file,
            } => {
                h.u8(0);
                h.str(template);
                h.str(font_file);
            }
            ElementKind::Image { source, scale } => {
                h.u8(1);
                h.str(source);
                h.opt_str(scale.as_deref());
            }
        }
        h.str(&element.x);
        h.str(&element.y);
        h.u64(element.extra.len() as u64);
        for (key, value) in &element.extra {
            h.str(key);
            h.str(value);
        }
        match &element.animation {
            Some(anim) => {
                h.u8(1);
                h.str(&anim.group);
                h.f64(anim.duration);
            }
            None => h.u8(0),
        }
    }

    h.u64(catalog.groups.len() as u64);
    for group in &catalog.groups {
        h.str(&group.id);
        h.f64(group.cycle_slot_duration);
        h.u64(group.cycle_position as u64);
        h.u64(group.members.len() as u64);
        for member in &group.members {
            h.str(member);
        }
    }

    h.u8(match transition.mode {
        TransitionMode::None => 0,
        TransitionMode::Fade => 1,
    });
    h.f64(transition.duration);

    h.u64(resolved_texts.len() as u64);
    for (id, text) in resolved_texts {
        h.str(id);
        h.str(text);
    }

    h.str(&source.basename);
    h.u64(source.size);
    h.u64(source.mtime_unix as u64);

    h.str(scale);
    h.u8(encode.crf);
    h.str(&encode.preset);
    h.str(&encode.audio_bitrate);

    h.finish()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheDecision {
    Reuse,
    Regenerate,
}

/// Reuse iff not forced and the recorded digest for this basename matches.
/// The caller is responsible for checking that the recorded artifact still
/// exists on disk.
pub fn decide(recorded: Option<&str>, new: &Fingerprint, force: bool) -> CacheDecision {
    if !force && recorded == Some(new.as_hex()) {
        CacheDecision::Reuse
    } else {
        CacheDecision::Regenerate
    }
}

/// Length-prefixed SHA-256 writer so adjacent fields can never alias.
struct Hasher(Sha256);

impl Hasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn u8(&mut self, v: u8) {
        self.0.update([v]);
    }

    fn u64(&mut self, v: u64) {
        self.0.update(v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.u64(v.to_bits());
    }

    fn str(&mut self, s: &str) {
        self.u64(s.len() as u64);
        self.0.update(s.as_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.str(s);
            }
            None => self.u8(0),
        }
    }

    fn finish(self) -> Fingerprint {
        let digest = self.0.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for b in digest {
            hex.push_str(&format!("{b:02x}"));
        }
        Fingerprint(hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn catalog_for(overlays: &str) -> Catalog {
        let toml = format!(
            "[paths]\naudio_dir = \"a\"\nvideo_dir = \"v\"\n{overlays}"
        );
        let profile = Profile::from_toml(&toml).unwrap();
        Catalog::load(&profile.overlay).unwrap()
    }

    fn source() -> SourceSignature {
        SourceSignature {
            basename: "bg_city.mp4".to_string(),
            size: 1_048_576,
            mtime_unix: 1_700_000_000,
        }
    }

    fn texts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const OVERLAY_A: &str = r#"
        [[overlay]]
        name = "title"
        text = "{title}"
        fontfile = "f.ttf"
        fontsize = 48
    "#;

    #[test]
    fn identical_inputs_give_identical_digests() {
        let cat = catalog_for(OVERLAY_A);
        let t = TransitionSettings::default();
        let enc = EncodeSettings::default();
        let rt = texts(&[("title", "Night Drive")]);
        let a = fingerprint(&cat, &t, &rt, &source(), "1280:720", &enc);
        let b = fingerprint(&cat, &t, &rt, &source(), "1280:720", &enc);
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 64);
        assert_eq!(a.short().len(), 16);
    }

    #[test]
    fn config_noise_does_not_change_the_digest() {
        // Same semantics, different whitespace and comments.
        let noisy = r#"
            # the big headline
            [[overlay]]
            name    = "title"

            text     = "{title}"   # template
            fontfile = "f.ttf"
            fontsize = 48
        "#;
        let t = TransitionSettings::default();
        let enc = EncodeSettings::default();
        let rt = texts(&[("title", "X")]);
        let a = fingerprint(&catalog_for(OVERLAY_A), &t, &rt, &source(), "1280:720", &enc);
        let b = fingerprint(&catalog_for(noisy), &t, &rt, &source(), "1280:720", &enc);
        assert_eq!(a, b);
    }

    #[test]
    fn any_attribute_change_changes_the_digest() {
        let t = TransitionSettings::default();
        let enc = EncodeSettings::default();
        let rt = texts(&[("title", "X")]);
        let base = fingerprint(&catalog_for(OVERLAY_A), &t, &rt, &source(), "1280:720", &enc);

        let changed = OVERLAY_A.replace("fontsize = 48", "fontsize = 50");
        let b = fingerprint(&catalog_for(&changed), &t, &rt, &source(), "1280:720", &enc);
        assert_ne!(base, b);
    }

    #[test]
    fn resolved_text_feeds_the_digest() {
        let cat = catalog_for(OVERLAY_A);
        let t = TransitionSettings::default();
        let enc = EncodeSettings::default();
        let a = fingerprint(
            &cat,
            &t,
            &texts(&[("title", "Song A")]),
            &source(),
            "1280:720",
            &enc,
        );
        let b = fingerprint(
            &cat,
            &t,
            &texts(&[("title", "Song B")]),
            &source(),
            "1280:720",
            &enc,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn source_identity_feeds_the_digest() {
        let cat = catalog_for(OVERLAY_A);
        let t = TransitionSettings::default();
        let enc = EncodeSettings::default();
        let rt = texts(&[]);
        let a = fingerprint(&cat, &t, &rt, &source(), "1280:720", &enc);
        let mut touched = source();
        touched.mtime_unix += 60;
        let b = fingerprint(&cat, &t, &rt, &touched, "1280:720", &enc);
        assert_ne!(a, b);
    }

    #[test]
    fn scale_and_encode_settings_feed_the_digest() {
        let cat = catalog_for(OVERLAY_A);
        let t = TransitionSettings::default();
        let rt = texts(&[]);
        let a = fingerprint(&cat, &t, &rt, &source(), "1280:720", &EncodeSettings::default());
        let b = fingerprint(&cat, &t, &rt, &source(), "1920:1080", &EncodeSettings::default());
        assert_ne!(a, b);

        let enc = EncodeSettings {
            crf: 27,
            ..EncodeSettings::default()
        };
        let c = fingerprint(&cat, &t, &rt, &source(), "1280:720", &enc);
        assert_ne!(a, c);
    }

    #[test]
    fn decide_reuses_only_on_exact_match_without_force() {
        let cat = catalog_for(OVERLAY_A);
        let fp = fingerprint(
            &cat,
            &TransitionSettings::default(),
            &texts(&[]),
            &source(),
            "1280:720",
            &EncodeSettings::default(),
        );
        assert_eq!(decide(Some(fp.as_hex()), &fp, false), CacheDecision::Reuse);
        assert_eq!(
            decide(Some(fp.as_hex()), &fp, true),
            CacheDecision::Regenerate
        );
        assert_eq!(
            decide(Some("deadbeef"), &fp, false),
            CacheDecision::Regenerate
        );
        assert_eq!(decide(None, &fp, false), CacheDecision::Regenerate);
    }
}
