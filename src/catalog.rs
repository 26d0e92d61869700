use std::collections::BTreeMap;

use crate::{
    config::OverlaySection,
    error::{LoopmuxError, LoopmuxResult},
};

/// Keys the core interprets. Everything else is forwarded verbatim to the
/// engine's filter syntax.
pub const RESERVED_KEYS: &[&str] = &[
    "animation_group",
    "animation_duration",
    "image",
    "text",
    "scale",
    "x",
    "y",
    "fontfile",
];

#[derive(Clone, Debug, PartialEq)]
pub enum ElementKind {
    Text {
        /// Raw template; `{title}`-style placeholders are substituted from
        /// audio metadata before fingerprinting and rendering.
        template: String,
        font_file: String,
    },
    Image {
        source: String,
        /// Optional `w:h` scale expression for the overlay input.
        scale: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElementAnimation {
    pub group: String,
    /// Seconds the owning group's "on" slot lasts.
    pub duration: f64,
}

/// A single overlay, immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayElement {
    pub id: String,
    pub kind: ElementKind,
    pub x: String,
    pub y: String,
    /// Residual attributes, passed through verbatim (sorted by key).
    pub extra: BTreeMap<String, String>,
    pub animation: Option<ElementAnimation>,
}

impl OverlayElement {
    pub fn is_static(&self) -> bool {
        self.animation.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnimationGroup {
    pub id: String,
    /// Member element ids in declaration order.
    pub members: Vec<String>,
    pub cycle_slot_duration: f64,
    /// Index of this group among all groups; fixes its round-robin offset.
    pub cycle_position: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub elements: Vec<OverlayElement>,
    /// Groups in first-declaration order.
    pub groups: Vec<AnimationGroup>,
}

impl Catalog {
    /// Parses and validates the overlay sections of a profile. No side
    /// effects beyond validation.
    pub fn load(sections: &[OverlaySection]) -> LoopmuxResult<Self> {
        let mut elements: Vec<OverlayElement> = Vec::with_capacity(sections.len());
        let mut groups: Vec<AnimationGroup> = Vec::new();

        for section in sections {
            let name = section.name.trim();
            if name.is_empty() {
                return Err(LoopmuxError::config("overlay name must be non-empty"));
            }
            if elements.iter().any(|e| e.id == name) {
                return Err(LoopmuxError::config(format!(
                    "duplicate overlay name '{name}'"
                )));
            }

            let mut attrs = section.attrs()?;
            let element = parse_element(name, &mut attrs)?;

            if let Some(anim) = &element.animation {
                match groups.iter_mut().find(|g| g.id == anim.group) {
                    Some(group) => {
                        if (group.cycle_slot_duration - anim.duration).abs() > f64::EPSILON {
                            return Err(LoopmuxError::config(format!(
                                "animation group '{}': members disagree on animation_duration \
                                 ({} vs {})",
                                anim.group, group.cycle_slot_duration, anim.duration
                            )));
                        }
                        group.members.push(element.id.clone());
                    }
                    None => groups.push(AnimationGroup {
                        id: anim.group.clone(),
                        members: vec![element.id.clone()],
                        cycle_slot_duration: anim.duration,
                        cycle_position: groups.len(),
                    }),
                }
            }

            elements.push(element);
        }

        Ok(Self { elements, groups })
    }

    pub fn group(&self, id: &str) -> Option<&AnimationGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn element(&self, id: &str) -> Option<&OverlayElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn has_grouped_elements(&self) -> bool {
        self.elements.iter().any(|e| e.animation.is_some())
    }
}

fn parse_element(
    name: &str,
    attrs: &mut BTreeMap<String, String>,
) -> LoopmuxResult<OverlayElement> {
    let text = attrs.remove("text");
    let image = attrs.remove("image");
    let font_file = attrs.remove("fontfile");
    let scale = attrs.remove("scale");
    let x = attrs.remove("x").unwrap_or_else(|| "0".to_string());
    let y = attrs.remove("y").unwrap_or_else(|| "0".to_string());

    let kind = match (text, image) {
        (Some(_), Some(_)) => {
            return Err(LoopmuxError::config(format!(
                "overlay '{name}': declares both 'text' and 'image'"
            )));
        }
        (Some(template), None) => {
            let font_file = font_file.ok_or_else(|| {
                LoopmuxError::config(format!(
                    "overlay '{name}': text overlays require a 'fontfile'"
                ))
            })?;
            if scale.is_some() {
                return Err(LoopmuxError::config(format!(
                    "overlay '{name}': 'scale' is only valid for image overlays"
                )));
            }
            ElementKind::Text {
                template,
                font_file,
            }
        }
        (None, Some(source)) => {
            if font_file.is_some() {
                return Err(LoopmuxError::config(format!(
                    "overlay '{name}': 'fontfile' is only valid for text overlays"
                )));
            }
            ElementKind::Image { source, scale }
        }
        (None, None) => {
            return Err(LoopmuxError::config(format!(
                "overlay '{name}': must declare either 'text' or 'image'"
            )));
        }
    };

    let animation = parse_animation(name, attrs)?;

    Ok(OverlayElement {
        id: name.to_string(),
        kind,
        x,
        y,
        extra: std::mem::take(attrs),
        animation,
    })
}

fn parse_animation(
    name: &str,
    attrs: &mut BTreeMap<String, String>,
) -> LoopmuxResult<Option<ElementAnimation>> {
    let group = attrs.remove("animation_group");
    let duration = attrs.remove("animation_duration");

    match (group, duration) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(LoopmuxError::config(format!(
            "overlay '{name}': 'animation_group' requires 'animation_duration'"
        ))),
        (None, Some(_)) => Err(LoopmuxError::config(format!(
            "overlay '{name}': 'animation_duration' requires 'animation_group'"
        ))),
        (Some(group), Some(raw)) => {
            let duration: f64 = raw.parse().map_err(|_| {
                LoopmuxError::config(format!(
                    "overlay '{name}': animation_duration '{raw}' is not a number"
                ))
            })?;
            if !duration.is_finite() || duration <= 0.0 {
                return Err(LoopmuxError::config(format!(
                    "overlay '{name}': animation_duration must be > 0, got {duration}"
                )));
            }
            Ok(Some(ElementAnimation { group, duration }))
        }
    }
}
