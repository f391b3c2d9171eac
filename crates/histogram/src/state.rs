use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use diagramconfig::{DiagramSpec, Kernel};
use serde::Serialize;

use crate::texture::{Texel, Texture, NUM_BINS};

pub type Bins = [u32; NUM_BINS];

pub(crate) type SharedState = Rc<RefCell<DiagramState>>;

/// Places an invocation's fetch probe can travel to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Location {
    /// The invocation's fetch handle, where the probe rests when hidden.
    Home,
    /// The invocation's color swatch and value register.
    Register,
    Texel { x: usize, y: usize },
    StorageBin { chunk: usize, bin: usize },
    /// A bin in the workgroup memory of the invocation's own workgroup.
    WorkgroupBin { bin: usize },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Home => f.write_str("home"),
            Location::Register => f.write_str("register"),
            Location::Texel { x, y } => write!(f, "texel({x},{y})"),
            Location::StorageBin { chunk, bin } => write!(f, "chunks[{chunk}][{bin}]"),
            Location::WorkgroupBin { bin } => write!(f, "workgroup[{bin}]"),
        }
    }
}

/// The line and marker an invocation uses to fetch and carry values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Probe {
    pub visible: bool,
    pub from: Location,
    pub to: Location,
    /// Normalized progress of the move from `from` to `to`.
    pub progress: f32,
    pub opacity: f32,
    /// Number being carried.
    pub label: Option<u32>,
    /// Texel color being carried.
    pub texel: Option<Texel>,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            visible: false,
            from: Location::Home,
            to: Location::Home,
            progress: 1.0,
            opacity: 1.0,
            label: None,
            texel: None,
        }
    }
}

impl Probe {
    pub fn is_moving(&self) -> bool {
        self.progress < 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvocationIds {
    pub global: [usize; 2],
    pub local: usize,
}

impl fmt::Display for InvocationIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wid({},{},0) lid({},0,0)",
            self.global[0], self.global[1], self.local
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum Wait {
    Lock { bin: Location },
    Barrier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationState {
    pub ids: Option<InvocationIds>,
    pub header_opacity: f32,
    /// Program cursor position in lines; fractional while it moves.
    pub cursor: f32,
    pub cursor_visible: bool,
    pub instruction: String,
    pub value: Option<u32>,
    pub color: Option<Texel>,
    pub probe: Probe,
    pub waiting: Option<Wait>,
    pub holding: Option<Location>,
    /// Progress of the "+1" flash while it plays.
    pub flash: Option<f32>,
}

impl Default for InvocationState {
    fn default() -> Self {
        Self {
            ids: None,
            header_opacity: 0.0,
            cursor: 0.0,
            cursor_visible: true,
            instruction: "-".to_string(),
            value: None,
            color: None,
            probe: Probe::default(),
            waiting: None,
            holding: None,
            flash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkgroupState {
    /// Workgroup memory; only the chunks kernel touches it.
    pub bins: Bins,
    pub locked: [bool; NUM_BINS],
    pub barrier_count: usize,
    pub active_invocations: usize,
    pub queue: VecDeque<InvocationIds>,
    pub invocations: Vec<InvocationState>,
}

impl WorkgroupState {
    fn new(wave_size: usize) -> Self {
        Self {
            bins: [0; NUM_BINS],
            locked: [false; NUM_BINS],
            barrier_count: 0,
            active_invocations: 0,
            queue: VecDeque::new(),
            invocations: vec![InvocationState::default(); wave_size],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Dispatch {
        width: usize,
        height: usize,
        stride: usize,
    },
    Launch {
        workgroup_id: [usize; 2],
    },
    Start {
        ids: InvocationIds,
    },
    Instruction {
        text: String,
    },
    TextureLoad {
        x: usize,
        y: usize,
        texel: Texel,
    },
    Lock {
        bin: Location,
    },
    Unlock {
        bin: Location,
    },
    Read {
        bin: Location,
        value: u32,
    },
    Write {
        bin: Location,
        value: u32,
    },
    Barrier,
    Cover {
        chunk: usize,
        bin: usize,
    },
    Finish,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Dispatch {
                width,
                height,
                stride,
            } => write!(f, "dispatch {width}x{height} (stride {stride})"),
            Action::Launch { workgroup_id } => {
                write!(f, "launch workgroup ({},{})", workgroup_id[0], workgroup_id[1])
            }
            Action::Start { ids } => write!(f, "start {ids}"),
            Action::Instruction { text } => write!(f, "> {text}"),
            Action::TextureLoad { x, y, texel } => {
                write!(f, "textureLoad({x},{y}) = {}", texel.letter())
            }
            Action::Lock { bin } => write!(f, "lock {bin}"),
            Action::Unlock { bin } => write!(f, "unlock {bin}"),
            Action::Read { bin, value } => write!(f, "read {bin} = {value}"),
            Action::Write { bin, value } => write!(f, "write {bin} = {value}"),
            Action::Barrier => f.write_str("barrier"),
            Action::Cover { chunk, bin } => write!(f, "cover chunks[{chunk}][{bin}]"),
            Action::Finish => f.write_str("finish"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub step: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<usize>,
    #[serde(flatten)]
    pub action: Action,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[step {:>4}] ", self.step)?;
        match (self.workgroup, self.invocation) {
            (Some(workgroup), Some(invocation)) => write!(f, "wg{workgroup}.inv{invocation} ")?,
            (Some(workgroup), None) => write!(f, "wg{workgroup} ")?,
            _ => f.write_str("dispatcher ")?,
        }
        write!(f, "{}", self.action)
    }
}

/// Everything a diagram shows, as plain data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramState {
    pub kernel: Kernel,
    pub texture: Texture,
    /// Storage chunks; `chunks[0]` doubles as the global histogram.
    pub chunks: Vec<Bins>,
    /// Chunk bins already folded into another chunk.
    pub covered: Vec<[bool; NUM_BINS]>,
    pub storage_locked: [bool; NUM_BINS],
    pub workgroups: Vec<WorkgroupState>,
    pub pending_workgroups: VecDeque<[usize; 2]>,
    pub active_workgroups: usize,
    pub uniform_stride: usize,
    pub dispatches: usize,
    #[serde(skip)]
    pub trace: Vec<TraceEvent>,
}

impl DiagramState {
    pub fn new(spec: &DiagramSpec, texture: Texture) -> Self {
        let num_chunks = spec.num_chunks();
        let mut chunks = vec![[0; NUM_BINS]; num_chunks];
        if spec.image_data {
            for (chunk, data) in chunks
                .iter_mut()
                .zip(texture.chunk_histograms(spec.wave_size))
            {
                *chunk = data;
            }
        }
        Self {
            kernel: spec.kernel,
            texture,
            chunks,
            covered: vec![[false; NUM_BINS]; num_chunks],
            storage_locked: [false; NUM_BINS],
            workgroups: (0..spec.workgroups)
                .map(|_| WorkgroupState::new(spec.wave_size))
                .collect(),
            pending_workgroups: VecDeque::new(),
            active_workgroups: 0,
            uniform_stride: 0,
            dispatches: 0,
            trace: Vec::new(),
        }
    }

    pub fn histogram(&self) -> Bins {
        self.chunks.first().copied().unwrap_or([0; NUM_BINS])
    }

    pub fn invocation(&self, workgroup: usize, invocation: usize) -> Option<&InvocationState> {
        self.workgroups
            .get(workgroup)
            .and_then(|group| group.invocations.get(invocation))
    }

    /// True when no workgroup is running or waiting to run.
    pub fn is_idle(&self) -> bool {
        self.active_workgroups == 0 && self.pending_workgroups.is_empty()
    }

    pub(crate) fn record(
        &mut self,
        step: u64,
        workgroup: Option<usize>,
        invocation: Option<usize>,
        action: Action,
    ) {
        let event = TraceEvent {
            step,
            workgroup,
            invocation,
            action,
        };
        tracing::trace!(%event, "diagram event");
        self.trace.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagramconfig::DEFAULT_TEXTURE;

    #[test]
    fn image_data_seeds_chunks() {
        let texture = Texture::parse(&DEFAULT_TEXTURE).unwrap();
        let spec = DiagramSpec {
            wave_size: 3,
            chunks_across: 7,
            chunks_down: 2,
            image_data: true,
            ..DiagramSpec::new(Kernel::Sum)
        };
        let state = DiagramState::new(&spec, texture.clone());
        assert_eq!(state.chunks, texture.chunk_histograms(3));
        assert_eq!(state.workgroups.len(), 1);
        assert_eq!(state.workgroups[0].invocations.len(), 3);
        assert!(state.is_idle());
    }

    #[test]
    fn chunks_start_empty_without_image_data() {
        let texture = Texture::parse(&DEFAULT_TEXTURE).unwrap();
        let spec = DiagramSpec {
            workgroups: 4,
            ..DiagramSpec::new(Kernel::Race)
        };
        let state = DiagramState::new(&spec, texture);
        assert_eq!(state.chunks, vec![[0; NUM_BINS]]);
        assert_eq!(state.histogram(), [0, 0, 0]);
        assert!(state.invocation(3, 0).is_some());
        assert!(state.invocation(4, 0).is_none());
    }

    #[test]
    fn trace_events_serialize_flat() {
        let event = TraceEvent {
            step: 3,
            workgroup: Some(1),
            invocation: Some(0),
            action: Action::Write {
                bin: Location::StorageBin { chunk: 0, bin: 2 },
                value: 5,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], 3);
        assert_eq!(json["kind"], "write");
        assert_eq!(json["bin"]["at"], "storage_bin");
        assert_eq!(json["value"], 5);
        assert_eq!(
            event.to_string(),
            "[step    3] wg1.inv0 write chunks[0][2] = 5"
        );
    }
}
