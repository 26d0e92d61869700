use crate::{
    catalog::Catalog,
    config::{TransitionMode, TransitionSettings},
    error::{LoopmuxError, LoopmuxResult},
};

const EPS: f64 = 1e-9;

/// Opacity over a window's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub enum OpacityCurve {
    /// Hard cut: opacity 1 for the whole window.
    Constant,
    /// Linear 0→1 ramp over the first `fade_in` seconds and 1→0 over the
    /// last `fade_out` seconds of the window.
    Fade { fade_in: f64, fade_out: f64 },
}

/// Visibility window for one element, `[start, end)` in seconds.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Window {
    pub element: String,
    pub start: f64,
    pub end: f64,
    pub opacity: OpacityCurve,
}

impl Window {
    pub fn len(&self) -> f64 {
        self.end - self.start
    }
}

/// Derived visibility schedule covering `[0, duration]`. Windows are ordered
/// by (start, declaration order): during a fade boundary the incoming slot's
/// elements come after the outgoing slot's and the engine composites them on
/// top. Recomputed per render decision, never persisted.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Timeline {
    pub duration: f64,
    pub windows: Vec<Window>,
}

/// Computes visibility/opacity windows for every element: one full-length
/// window per static element, one window per slot repetition for grouped
/// elements.
pub fn schedule(
    catalog: &Catalog,
    planned_duration: f64,
    transition: &TransitionSettings,
) -> LoopmuxResult<Timeline> {
    if !planned_duration.is_finite() || planned_duration <= 0.0 {
        return Err(LoopmuxError::schedule(format!(
            "planned duration must be > 0, got {planned_duration}"
        )));
    }
    if catalog.has_grouped_elements() && catalog.groups.is_empty() {
        // Catalog::load builds groups from the elements, so this cannot
        // happen unless the catalog was constructed by hand.
        return Err(LoopmuxError::schedule(
            "catalog has grouped elements but no animation groups",
        ));
    }

    let mut windows = Vec::new();

    for element in &catalog.elements {
        if element.is_static() {
            windows.push(Window {
                element: element.id.clone(),
                start: 0.0,
                end: planned_duration,
                opacity: OpacityCurve::Constant,
            });
        }
    }

    let cycle: f64 = catalog
        .groups
        .iter()
        .map(|g| g.cycle_slot_duration)
        .sum();
    if catalog.groups.is_empty() || cycle <= 0.0 {
        return Ok(Timeline {
            duration: planned_duration,
            windows,
        });
    }

    // Slot offset of each group within one macro-cycle (prefix sums in
    // declaration order).
    let mut offsets = Vec::with_capacity(catalog.groups.len());
    let mut acc = 0.0;
    for group in &catalog.groups {
        offsets.push(acc);
        acc += group.cycle_slot_duration;
    }

    let mut rep = 0u64;
    'cycles: loop {
        let cycle_start = rep as f64 * cycle;
        if cycle_start >= planned_duration - EPS {
            break;
        }
        for (group, offset) in catalog.groups.iter().zip(&offsets) {
            let start = cycle_start + offset;
            if start >= planned_duration - EPS {
                break 'cycles;
            }
            // Tail slot is clamped, never extended past the plan.
            let end = (start + group.cycle_slot_duration).min(planned_duration);
            let opacity = fade_curve(transition, end - start);
            for member in &group.members {
                windows.push(Window {
                    element: member.clone(),
                    start,
                    end,
                    opacity,
                });
            }
        }
        rep += 1;
    }

    Ok(Timeline {
        duration: planned_duration,
        windows,
    })
}

fn fade_curve(transition: &TransitionSettings, slot_len: f64) -> OpacityCurve {
    match transition.mode {
        TransitionMode::None => OpacityCurve::Constant,
        TransitionMode::Fade if transition.duration <= 0.0 => OpacityCurve::Constant,
        TransitionMode::Fade => {
            let margin = transition.duration.min(slot_len / 2.0);
            OpacityCurve::Fade {
                fade_in: margin,
                fade_out: margin,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{AnimationGroup, ElementAnimation, ElementKind, OverlayElement},
        config::Profile,
    };

    fn load_catalog(overlays: &str) -> Catalog {
        let toml = format!(
            "[paths]\naudio_dir = \"a\"\nvideo_dir = \"v\"\n{overlays}"
        );
        let profile = Profile::from_toml(&toml).unwrap();
        Catalog::load(&profile.overlay).unwrap()
    }

    fn two_group_catalog() -> Catalog {
        load_catalog(
            r#"
            [[overlay]]
            name = "line1"
            text = "{title}"
            fontfile = "f.ttf"
            animation_group = "a"
            animation_duration = 5

            [[overlay]]
            name = "line2"
            text = "{artist}"
            fontfile = "f.ttf"
            animation_group = "b"
            animation_duration = 5
            "#,
        )
    }

    fn no_transition() -> TransitionSettings {
        TransitionSettings::default()
    }

    fn fade(duration: f64) -> TransitionSettings {
        TransitionSettings {
            mode: TransitionMode::Fade,
            duration,
        }
    }

    #[test]
    fn round_robin_interleaves_two_groups() {
        // 40s plan, two 5s groups.
        let tl = schedule(&two_group_catalog(), 40.0, &no_transition()).unwrap();

        let a: Vec<(f64, f64)> = tl
            .windows
            .iter()
            .filter(|w| w.element == "line1")
            .map(|w| (w.start, w.end))
            .collect();
        let b: Vec<(f64, f64)> = tl
            .windows
            .iter()
            .filter(|w| w.element == "line2")
            .map(|w| (w.start, w.end))
            .collect();

        assert_eq!(a, vec![(0.0, 5.0), (10.0, 15.0), (20.0, 25.0), (30.0, 35.0)]);
        assert_eq!(b, vec![(5.0, 10.0), (15.0, 20.0), (25.0, 30.0), (35.0, 40.0)]);
    }

    #[test]
    fn scheduling_is_deterministic() {
        let cat = two_group_catalog();
        let t = fade(0.5);
        let first = schedule(&cat, 40.0, &t).unwrap();
        let second = schedule(&cat, 40.0, &t).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn static_elements_span_the_whole_plan() {
        let cat = load_catalog(
            r#"
            [[overlay]]
            name = "watermark"
            image = "w.png"
            "#,
        );
        let tl = schedule(&cat, 12.5, &fade(0.5)).unwrap();
        assert_eq!(tl.windows.len(), 1);
        assert_eq!(tl.windows[0].start, 0.0);
        assert_eq!(tl.windows[0].end, 12.5);
        assert_eq!(tl.windows[0].opacity, OpacityCurve::Constant);
    }

    #[test]
    fn fade_margins_meet_at_slot_boundaries() {
        // 0.5s fade on a 5s slot: ramp in over [0,0.5), out over [4.5,5).
        let tl = schedule(&two_group_catalog(), 10.0, &fade(0.5)).unwrap();
        let first = tl.windows.iter().find(|w| w.element == "line1").unwrap();
        assert_eq!(first.start, 0.0);
        assert_eq!(first.end, 5.0);
        assert_eq!(
            first.opacity,
            OpacityCurve::Fade {
                fade_in: 0.5,
                fade_out: 0.5
            }
        );

        // The following slot's fade-in meets it exactly at t=5.
        let second = tl.windows.iter().find(|w| w.element == "line2").unwrap();
        assert_eq!(second.start, 5.0);
        assert_eq!(
            second.opacity,
            OpacityCurve::Fade {
                fade_in: 0.5,
                fade_out: 0.5
            }
        );
    }

    #[test]
    fn fade_margin_is_clamped_to_half_slot() {
        let tl = schedule(&two_group_catalog(), 10.0, &fade(4.0)).unwrap();
        let w = tl.windows.iter().find(|w| w.element == "line1").unwrap();
        assert_eq!(
            w.opacity,
            OpacityCurve::Fade {
                fade_in: 2.5,
                fade_out: 2.5
            }
        );
    }

    #[test]
    fn tail_slot_is_clamped_to_plan() {
        // A 12s plan over a 10s macro-cycle leaves a 2s partial slot for
        // group a; its window ends at the plan, not at slot length.
        let tl = schedule(&two_group_catalog(), 12.0, &no_transition()).unwrap();
        let a: Vec<(f64, f64)> = tl
            .windows
            .iter()
            .filter(|w| w.element == "line1")
            .map(|w| (w.start, w.end))
            .collect();
        assert_eq!(a, vec![(0.0, 5.0), (10.0, 12.0)]);
    }

    #[test]
    fn incoming_slot_sorts_after_outgoing() {
        let tl = schedule(&two_group_catalog(), 10.0, &fade(0.5)).unwrap();
        let grouped: Vec<&str> = tl.windows.iter().map(|w| w.element.as_str()).collect();
        assert_eq!(grouped, vec!["line1", "line2"]);
        assert!(
            tl.windows
                .windows(2)
                .all(|pair| pair[0].start <= pair[1].start)
        );
    }

    #[test]
    fn grouped_windows_only_overlap_within_fade_margin() {
        let tl = schedule(&two_group_catalog(), 40.0, &fade(0.5)).unwrap();
        let grouped: Vec<&Window> = tl.windows.iter().collect();
        for (i, w1) in grouped.iter().enumerate() {
            for w2 in &grouped[i + 1..] {
                if w1.element == w2.element {
                    continue;
                }
                let overlap = w1.end.min(w2.end) - w1.start.max(w2.start);
                assert!(
                    overlap <= 0.5 + 1e-9,
                    "{} and {} overlap by {overlap}",
                    w1.element,
                    w2.element
                );
            }
        }
    }

    #[test]
    fn hand_built_inconsistent_catalog_is_a_schedule_error() {
        let cat = Catalog {
            elements: vec![OverlayElement {
                id: "x".to_string(),
                kind: ElementKind::Text {
                    template: "t".to_string(),
                    font_file: "f.ttf".to_string(),
                },
                x: "0".to_string(),
                y: "0".to_string(),
                extra: Default::default(),
                animation: Some(ElementAnimation {
                    group: "ghost".to_string(),
                    duration: 5.0,
                }),
            }],
            groups: Vec::<AnimationGroup>::new(),
        };
        let err = schedule(&cat, 10.0, &no_transition()).unwrap_err();
        assert!(err.to_string().contains("schedule error"));
    }
}
