use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    catalog::{Catalog, ElementKind},
    error::{LoopmuxError, LoopmuxResult},
    reconcile::DurationPlan,
    schedule::{OpacityCurve, Timeline, Window},
};

/// One element occurrence in the composition: the element's render inputs
/// plus the visibility window it occupies. Layer order is compositing order
/// (later layers on top).
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionLayer {
    pub element_id: String,
    pub kind: LayerKind,
    pub x: String,
    pub y: String,
    /// Pass-through attributes, forwarded verbatim (sorted by key).
    pub extra: BTreeMap<String, String>,
    pub window: Window,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Text {
        /// Resolved text, placeholders already substituted.
        text: String,
        font_file: String,
    },
    Image {
        source: String,
        scale: Option<String>,
    },
}

/// Everything the engine needs to produce one composed background: loop/trim
/// instructions plus the ordered layer list. Identical fingerprints produce
/// byte-identical requests.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionRequest {
    pub scale: String,
    pub source_loops: u32,
    pub duration: f64,
    pub layers: Vec<CompositionLayer>,
}

/// Joins catalog, timeline and resolved texts into an ordered composition
/// request.
pub fn build_request(
    catalog: &Catalog,
    timeline: &Timeline,
    resolved_texts: &BTreeMap<String, String>,
    plan: &DurationPlan,
    scale: &str,
) -> LoopmuxResult<CompositionRequest> {
    let mut layers = Vec::with_capacity(timeline.windows.len());

    for window in &timeline.windows {
        let element = catalog.element(&window.element).ok_or_else(|| {
            LoopmuxError::schedule(format!(
                "timeline references unknown element '{}'",
                window.element
            ))
        })?;

        let kind = match &element.kind {
            ElementKind::Text { font_file, .. } => {
                let text = resolved_texts.get(&element.id).ok_or_else(|| {
                    LoopmuxError::schedule(format!(
                        "no resolved text for element '{}'",
                        element.id
                    ))
                })?;
                LayerKind::Text {
                    text: text.clone(),
                    font_file: font_file.clone(),
                }
            }
            ElementKind::Image { source, scale } => LayerKind::Image {
                source: source.clone(),
                scale: scale.clone(),
            },
        };

        layers.push(CompositionLayer {
            element_id: element.id.clone(),
            kind,
            x: element.x.clone(),
            y: element.y.clone(),
            extra: element.extra.clone(),
            window: window.clone(),
        });
    }

    Ok(CompositionRequest {
        scale: scale.to_string(),
        source_loops: plan.source_loops,
        duration: plan.planned_duration,
        layers,
    })
}

impl CompositionRequest {
    /// Image sources in layer order; the engine feeds them as extra inputs
    /// (`-loop 1 -i <source>`) so fades get continuous timestamps.
    pub fn image_inputs(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter_map(|l| match &l.kind {
                LayerKind::Image { source, .. } => Some(source.as_str()),
                LayerKind::Text { .. } => None,
            })
            .collect()
    }

    /// Renders the ffmpeg filtergraph for this request. `text_files` maps
    /// text element ids to drawtext `textfile` paths (the engine writes the
    /// resolved text to disk first, so user text never needs filter
    /// escaping). The output stream is `[vout]`.
    pub fn filtergraph(&self, text_files: &BTreeMap<String, PathBuf>) -> LoopmuxResult<String> {
        let mut chains = vec![format!("[0:v]scale={}[base0]", self.scale)];
        let mut base = 0usize;
        let mut image_input = 0usize;

        for layer in &self.layers {
            let next = base + 1;
            let enable = format!(
                "enable='between(t,{},{})'",
                fmt_ts(layer.window.start),
                fmt_ts(layer.window.end)
            );

            match &layer.kind {
                LayerKind::Text { font_file, .. } => {
                    let text_file = text_files.get(&layer.element_id).ok_or_else(|| {
                        LoopmuxError::render(format!(
                            "no text file prepared for element '{}'",
                            layer.element_id
                        ))
                    })?;

                    let mut parts = vec![
                        format!("textfile='{}'", escape(&text_file.to_string_lossy())),
                        format!("fontfile='{}'", escape(font_file)),
                        format!("x='{}'", escape(&layer.x)),
                        format!("y='{}'", escape(&layer.y)),
                    ];
                    for (key, value) in &layer.extra {
                        parts.push(format!("{key}='{}'", escape(value)));
                    }
                    if let Some(alpha) = alpha_expr(&layer.window) {
                        parts.push(format!("alpha='{alpha}'"));
                    }
                    parts.push(enable);

                    chains.push(format!(
                        "[base{base}]drawtext={}[base{next}]",
                        parts.join(":")
                    ));
                }
                LayerKind::Image { scale, .. } => {
                    // Input 0 is the background; image inputs follow in layer
                    // order.
                    let input = 1 + image_input;
                    image_input += 1;

                    let mut prep = vec!["format=rgba".to_string()];
                    if let Some(scale) = scale {
                        prep.insert(0, format!("scale={scale}"));
                    }
                    if let OpacityCurve::Fade { fade_in, fade_out } = layer.window.opacity {
                        let Window { start, end, .. } = layer.window;
                        if fade_in > 0.0 {
                            prep.push(format!(
                                "fade=t=in:st={}:d={}:alpha=1",
                                fmt_ts(start),
                                fmt_ts(fade_in)
                            ));
                        }
                        if fade_out > 0.0 {
                            prep.push(format!(
                                "fade=t=out:st={}:d={}:alpha=1",
                                fmt_ts(end - fade_out),
                                fmt_ts(fade_out)
                            ));
                        }
                    }
                    let label = format!("ovl{}", input);
                    chains.push(format!("[{input}:v]{}[{label}]", prep.join(",")));
                    chains.push(format!(
                        "[base{base}][{label}]overlay=x='{}':y='{}':{enable}[base{next}]",
                        escape(&layer.x),
                        escape(&layer.y)
                    ));
                }
            }
            base = next;
        }

        chains.push(format!("[base{base}]null[vout]"));
        Ok(chains.join(";"))
    }
}

/// drawtext alpha ramp: 0→1 over the leading fade, 1→0 over the trailing
/// fade, 1 in between. `None` for hard-cut windows.
fn alpha_expr(window: &Window) -> Option<String> {
    match window.opacity {
        OpacityCurve::Constant => None,
        OpacityCurve::Fade { fade_in, fade_out } => {
            let (s, e) = (window.start, window.end);
            Some(format!(
                "if(lt(t,{fi_end}),(t-{s})/{fi},if(gt(t,{fo_start}),({e}-t)/{fo},1))",
                s = fmt_ts(s),
                e = fmt_ts(e),
                fi = fmt_ts(fade_in),
                fo = fmt_ts(fade_out),
                fi_end = fmt_ts(s + fade_in),
                fo_start = fmt_ts(e - fade_out),
            ))
        }
    }
}

/// Fixed-precision timestamps keep equal requests byte-identical.
fn fmt_ts(v: f64) -> String {
    format!("{v:.3}")
}

fn escape(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Writes resolved texts to per-element temp files for drawtext, returning
/// (id → path). The `TempDir` keeps them alive for the engine call.
pub fn write_text_files(
    request: &CompositionRequest,
    dir: &Path,
) -> LoopmuxResult<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    for layer in &request.layers {
        if let LayerKind::Text { text, .. } = &layer.kind {
            if files.contains_key(&layer.element_id) {
                continue;
            }
            let path = dir.join(format!("{}.txt", layer.element_id));
            std::fs::write(&path, text).map_err(|e| {
                LoopmuxError::render(format!(
                    "failed to write text file for '{}': {e}",
                    layer.element_id
                ))
            })?;
            files.insert(layer.element_id.clone(), path);
        }
    }
    Ok(files)
}
