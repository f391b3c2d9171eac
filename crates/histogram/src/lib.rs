//! Headless simulation of the compute-shader histogram diagrams.
//!
//! A [`ComputeDiagram`] owns a coroutine [`Manager`](coroutine::Manager) with one runner
//! per invocation, one launcher per workgroup and a dispatcher. Every frame advances the
//! choreography a little and mutates a plain [`DiagramState`], which callers can inspect
//! or serialize instead of drawing it.

mod choreo;
mod diagram;
mod error;
mod kernels;
mod state;
mod texture;

pub use diagram::ComputeDiagram;
pub use error::DiagramError;
pub use state::{
    Action, Bins, DiagramState, InvocationIds, InvocationState, Location, Probe, TraceEvent,
    Wait, WorkgroupState,
};
pub use texture::{Texel, Texture, NUM_BINS};
