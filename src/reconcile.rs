use crate::{
    catalog::AnimationGroup,
    error::{LoopmuxError, LoopmuxResult},
};

/// Slack for float duration arithmetic so 45.0 / 10.0 floors to 4, not 3.
const EPS: f64 = 1e-9;

/// Background-render plan: how often the base clip repeats and how long the
/// composed background runs. The final clip length (audio-matched or fixed)
/// is applied later, at mux time.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct DurationPlan {
    /// Length of the composed background in seconds. A whole multiple of the
    /// macro-cycle whenever animation groups exist.
    pub planned_duration: f64,
    /// How many times the base clip plays back-to-back to cover the plan.
    pub source_loops: u32,
    /// One full round-robin pass through all groups; 0 when there are none.
    pub macro_cycle: f64,
}

/// Total duration of one round-robin pass through all animation groups.
pub fn macro_cycle(groups: &[AnimationGroup]) -> f64 {
    groups.iter().map(|g| g.cycle_slot_duration).sum()
}

/// Reconciles the base clip's length against the groups' macro-cycle so the
/// composed background contains only whole cycles.
pub fn reconcile(base_duration: f64, groups: &[AnimationGroup]) -> LoopmuxResult<DurationPlan> {
    if !base_duration.is_finite() || base_duration <= 0.0 {
        return Err(LoopmuxError::config(format!(
            "base clip duration must be > 0, got {base_duration}"
        )));
    }

    if groups.is_empty() {
        return Ok(DurationPlan {
            planned_duration: base_duration,
            source_loops: 1,
            macro_cycle: 0.0,
        });
    }

    let cycle = macro_cycle(groups);
    if cycle <= 0.0 {
        // Catalog validation rejects non-positive slot durations already.
        return Err(LoopmuxError::config(
            "animation groups present but macro-cycle is zero",
        ));
    }

    if (base_duration - cycle).abs() <= EPS {
        return Ok(DurationPlan {
            planned_duration: cycle,
            source_loops: 1,
            macro_cycle: cycle,
        });
    }

    if base_duration < cycle {
        // Loop the base enough whole times to cover one macro-cycle, which is
        // the minimum unit produced, then trim to exactly that cycle.
        let loops = (cycle / base_duration - EPS).ceil().max(1.0) as u32;
        return Ok(DurationPlan {
            planned_duration: cycle,
            source_loops: loops,
            macro_cycle: cycle,
        });
    }

    // Truncate: largest whole number of macro-cycles that fits.
    let cycles = (base_duration / cycle + EPS).floor();
    Ok(DurationPlan {
        planned_duration: cycles * cycle,
        source_loops: 1,
        macro_cycle: cycle,
    })
}
