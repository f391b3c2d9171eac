use std::fmt;

use histogram::{Bins, ComputeDiagram, Texel, TraceEvent};
use serde::Serialize;

/// What a finished (or seeked) run looked like.
#[derive(Debug, Serialize)]
pub struct Report {
    pub diagram: String,
    pub kernel: String,
    /// The shader listing the diagram animates, one entry per line.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<String>,
    pub frames: usize,
    pub steps: u64,
    pub complete: bool,
    pub histogram: Bins,
    /// The histogram a race-free kernel ends up with.
    pub texture_histogram: Bins,
    pub chunks: Vec<Bins>,
    pub dispatches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<TraceEvent>>,
}

impl Report {
    pub fn new(diagram: &ComputeDiagram, frames: usize, with_events: bool) -> Self {
        let state = diagram.state();
        Self {
            diagram: diagram.name().to_string(),
            kernel: diagram.kernel().to_string(),
            code: diagram.spec().code_lines(),
            frames,
            steps: diagram.step_count(),
            complete: diagram.is_complete(),
            histogram: state.histogram(),
            texture_histogram: diagram.texture().histogram(),
            chunks: state.chunks.clone(),
            dispatches: state.dispatches,
            events: with_events.then(|| state.trace.clone()),
        }
    }
}

struct BinsDisplay<'a>(&'a Bins);

impl fmt::Display for BinsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ndx, texel) in Texel::ALL.iter().enumerate() {
            if ndx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:<3}", texel.letter(), self.0[texel.bin()])?;
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Diagram {} ({})", self.diagram, self.kernel)?;
        writeln!(
            f,
            "  frames={} steps={} dispatches={} complete={}",
            self.frames, self.steps, self.dispatches, self.complete
        )?;
        writeln!(f, "  histogram: {}", BinsDisplay(&self.histogram))?;
        writeln!(f, "  texture:   {}", BinsDisplay(&self.texture_histogram))?;
        if !self.code.is_empty() {
            writeln!(f, "Code:")?;
            for (ndx, line) in self.code.iter().enumerate() {
                writeln!(f, "  {ndx:>2} | {line}")?;
            }
        }
        if self.chunks.len() > 1 {
            writeln!(f, "Chunks:")?;
            for (ndx, chunk) in self.chunks.iter().enumerate() {
                writeln!(f, "  {ndx:>3}: {}", BinsDisplay(chunk))?;
            }
        }
        if let Some(events) = &self.events {
            writeln!(f, "Events:")?;
            for event in events {
                writeln!(f, "  {event}")?;
            }
        }
        Ok(())
    }
}
