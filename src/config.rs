use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::error::{LoopmuxError, LoopmuxResult};

/// Run profile loaded from a TOML file. Overlay sections are kept as raw
/// attribute maps here; `catalog::Catalog::load` gives them types.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub paths: Paths,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub transition: TransitionSettings,
    #[serde(default)]
    pub encode: EncodeSettings,
    /// `[[overlay]]` array-of-tables; array order is element declaration order.
    #[serde(default)]
    pub overlay: Vec<OverlaySection>,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    /// Only background files whose name starts with this prefix are used.
    #[serde(default)]
    pub video_prefix: String,
    /// Defaults to `audio_dir` when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_prefix: String,
}

impl Paths {
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.audio_dir)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    #[serde(default)]
    pub length: OutputLength,
    #[serde(default = "default_scale")]
    pub scale: String,
    #[serde(default)]
    pub exists: ExistsBehavior,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            length: OutputLength::default(),
            scale: default_scale(),
            exists: ExistsBehavior::default(),
        }
    }
}

fn default_scale() -> String {
    "1280:720".to_string()
}

/// Final clip length: the audio track's duration, or a fixed number of seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum OutputLength {
    #[default]
    Audio,
    Seconds(f64),
}

impl<'de> serde::Deserialize<'de> for OutputLength {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Word(String),
        }

        match Raw::deserialize(de)? {
            Raw::Num(s) if s.is_finite() && s > 0.0 => Ok(Self::Seconds(s)),
            Raw::Num(s) => Err(serde::de::Error::custom(format!(
                "output length must be a positive number of seconds, got {s}"
            ))),
            Raw::Word(w) if w.eq_ignore_ascii_case("audio") => Ok(Self::Audio),
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "output length must be a number of seconds or \"audio\", got '{w}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistsBehavior {
    #[default]
    Overwrite,
    Skip,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionSettings {
    #[serde(default)]
    pub mode: TransitionMode,
    /// Cross-fade length in seconds; clamped to half a slot at schedule time.
    #[serde(default)]
    pub duration: f64,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            mode: TransitionMode::None,
            duration: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    #[default]
    None,
    Fade,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodeSettings {
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_crf() -> u8 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            crf: default_crf(),
            preset: default_preset(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// One `[[overlay]]` table: a name plus an open-ended attribute map. Values
/// are normalized to strings; everything the core does not interpret is passed
/// through verbatim to the engine's filter syntax.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct OverlaySection {
    pub name: String,
    #[serde(flatten)]
    raw: BTreeMap<String, toml::Value>,
}

impl OverlaySection {
    pub fn attrs(&self) -> LoopmuxResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.raw {
            let s = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(LoopmuxError::config(format!(
                        "overlay '{}': attribute '{key}' has unsupported type {}",
                        self.name,
                        other.type_str()
                    )));
                }
            };
            out.insert(key.clone(), s);
        }
        Ok(out)
    }
}

impl Profile {
    pub fn load(path: &Path) -> LoopmuxResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoopmuxError::config(format!("failed to read profile '{}': {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> LoopmuxResult<Self> {
        let profile: Self = toml::from_str(text)
            .map_err(|e| LoopmuxError::config(format!("invalid profile: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> LoopmuxResult<()> {
        if !self.transition.duration.is_finite() || self.transition.duration < 0.0 {
            return Err(LoopmuxError::config(
                "transition duration must be a finite number >= 0",
            ));
        }
        if self.output.scale.trim().is_empty() {
            return Err(LoopmuxError::config("output scale must be non-empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [paths]
        audio_dir = "music"
        video_dir = "backgrounds"
        video_prefix = "bg_"
        output_dir = "out"
        output_prefix = "mix_"

        [output]
        length = "audio"
        scale = "1920:1080"
        exists = "skip"

        [transition]
        mode = "fade"
        duration = 0.5

        [[overlay]]
        name = "title"
        text = "{title}"
        fontfile = "fonts/Inter.ttf"
        fontsize = 48
        x = "(w-text_w)/2"
        y = "h-120"

        [[overlay]]
        name = "badge"
        image = "assets/badge.png"
        x = "20"
        y = "20"
        animation_group = "a"
        animation_duration = 5
    "#;

    #[test]
    fn sample_profile_parses() {
        let p = Profile::from_toml(SAMPLE).unwrap();
        assert_eq!(p.paths.output_dir(), Path::new("out"));
        assert_eq!(p.output.length, OutputLength::Audio);
        assert_eq!(p.output.exists, ExistsBehavior::Skip);
        assert_eq!(p.transition.mode, TransitionMode::Fade);
        assert_eq!(p.overlay.len(), 2);
        assert_eq!(p.overlay[0].name, "title");
        assert_eq!(p.overlay[1].name, "badge");

        let attrs = p.overlay[0].attrs().unwrap();
        assert_eq!(attrs.get("fontsize").map(String::as_str), Some("48"));
        assert_eq!(attrs.get("x").map(String::as_str), Some("(w-text_w)/2"));
    }

    #[test]
    fn output_dir_defaults_to_audio_dir() {
        let p = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "music"
            video_dir = "backgrounds"
            "#,
        )
        .unwrap();
        assert_eq!(p.paths.output_dir(), Path::new("music"));
        assert_eq!(p.output.scale, "1280:720");
        assert_eq!(p.output.exists, ExistsBehavior::Overwrite);
    }

    #[test]
    fn missing_output_table_uses_defaults() {
        let p = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "a"
            video_dir = "v"
            "#,
        )
        .unwrap();
        assert_eq!(p.output.length, OutputLength::Audio);
        assert_eq!(p.output.scale, "1280:720");
        assert_eq!(p.output.exists, ExistsBehavior::Overwrite);
    }

    #[test]
    fn fixed_output_length_parses_as_seconds() {
        let p = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "a"
            video_dir = "v"
            [output]
            length = 90.0
            "#,
        )
        .unwrap();
        assert_eq!(p.output.length, OutputLength::Seconds(90.0));
    }

    #[test]
    fn bad_output_length_is_rejected() {
        let err = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "a"
            video_dir = "v"
            [output]
            length = "forever"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("config error"));
    }

    #[test]
    fn negative_transition_duration_is_rejected() {
        let err = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "a"
            video_dir = "v"
            [transition]
            duration = -1.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("transition duration"));
    }

    #[test]
    fn table_valued_overlay_attribute_is_rejected() {
        let p = Profile::from_toml(
            r#"
            [paths]
            audio_dir = "a"
            video_dir = "v"
            [[overlay]]
            name = "x"
            text = "hi"
            fontfile = "f.ttf"
            nested = { a = 1 }
            "#,
        )
        .unwrap();
        assert!(p.overlay[0].attrs().is_err());
    }
}
