use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::time::Duration;

use coroutine::tween::Playback;
use coroutine::{Manager, Runner};
use diagramconfig::{DiagramConfig, DiagramSpec, Kernel, PlaybackConfig, TimingConfig};

use crate::choreo::Actor;
use crate::error::DiagramError;
use crate::kernels::{self, Dispatch};
use crate::state::{Bins, DiagramState, SharedState, TraceEvent};
use crate::texture::{Texture, NUM_BINS};

/// One animated compute-shader diagram: the shared state, the scheduler driving it and
/// the frame clock its tweens read.
pub struct ComputeDiagram {
    name: String,
    spec: DiagramSpec,
    texture: Texture,
    timing: Rc<TimingConfig>,
    playback: Rc<Playback>,
    manager: Manager,
    state: SharedState,
    invocations: Vec<Vec<Runner>>,
    launchers: Vec<Runner>,
    dispatcher: Runner,
    frames: usize,
}

impl ComputeDiagram {
    pub fn new(
        name: impl Into<String>,
        spec: DiagramSpec,
        texture: Texture,
        timing: TimingConfig,
        playback: &PlaybackConfig,
    ) -> Result<Self, DiagramError> {
        validate_geometry(&spec, &texture)?;

        let clock = Playback::new(playback.max_frame_delta);
        clock.set_speed(playback.speed);

        // Runner order matters: within a frame every invocation sees the launcher's
        // work one frame late, and the dispatcher observes settled counts.
        let mut manager = Manager::new();
        let mut invocations = Vec::with_capacity(spec.workgroups);
        let mut launchers = Vec::with_capacity(spec.workgroups);
        for _ in 0..spec.workgroups {
            invocations.push(
                (0..spec.wave_size)
                    .map(|_| manager.create_runner())
                    .collect(),
            );
            launchers.push(manager.create_runner());
        }
        let dispatcher = manager.create_runner();

        let state = Rc::new(RefCell::new(DiagramState::new(&spec, texture.clone())));
        let diagram = Self {
            name: name.into(),
            spec,
            texture,
            timing: Rc::new(timing),
            playback: Rc::new(clock),
            manager,
            state,
            invocations,
            launchers,
            dispatcher,
            frames: 0,
        };
        diagram.install();
        tracing::debug!(
            diagram = %diagram.name,
            kernel = %diagram.spec.kernel,
            workgroups = diagram.spec.workgroups,
            wave_size = diagram.spec.wave_size,
            "diagram created"
        );
        Ok(diagram)
    }

    pub fn from_config(config: &DiagramConfig, name: &str) -> Result<Self, DiagramError> {
        let spec = config
            .diagram(name)
            .ok_or_else(|| DiagramError::UnknownDiagram(name.to_string()))?;
        let texture = Texture::parse(&config.texture_rows(spec))?;
        Self::new(
            name,
            spec.clone(),
            texture,
            config.timing.clone(),
            &config.playback,
        )
    }

    fn install(&self) {
        let kernel = self.spec.kernel;
        for (workgroup, runners) in self.invocations.iter().enumerate() {
            for (invocation, runner) in runners.iter().enumerate() {
                let actor = Actor::new(
                    Rc::clone(&self.state),
                    Rc::clone(&self.playback),
                    Rc::clone(&self.timing),
                    workgroup,
                    invocation,
                );
                runner.add(kernels::invocation_worker(actor, kernel));
            }
            self.launchers[workgroup].add(kernels::workgroup_launcher(
                Rc::clone(&self.state),
                workgroup,
            ));
        }
        self.dispatcher
            .add(kernels::dispatcher(Rc::clone(&self.state), self.rounds()));
    }

    fn rounds(&self) -> Vec<Dispatch> {
        kernels::dispatches(
            self.spec.kernel,
            self.texture.width(),
            self.texture.height(),
            self.spec.wave_size,
            self.spec.num_chunks(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> Kernel {
        self.spec.kernel
    }

    pub fn spec(&self) -> &DiagramSpec {
        &self.spec
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    /// Advances one animation frame that took `dt` of wall-clock time.
    pub fn update(&mut self, dt: Duration) -> Result<(), DiagramError> {
        self.playback.tick(dt);
        self.manager.advance()?;
        self.frames += 1;
        Ok(())
    }

    /// Fast-forwards until the step counter passes `target`, without pacing.
    ///
    /// Seeking backwards restarts the diagram first. Returns the number of frames run.
    pub fn seek(&mut self, target: u64, max_frames: usize) -> Result<usize, DiagramError> {
        if target < self.step_count() {
            self.reset();
        }
        self.manager
            .set_target_step_count(i64::try_from(target).unwrap_or(i64::MAX));

        let mut frames = 0;
        while self.manager.is_seeking() && !self.is_complete() {
            if frames >= max_frames {
                self.manager.clear_target_step_count();
                return Err(DiagramError::Stalled {
                    goal: "reach the seek target",
                    frames,
                });
            }
            self.update(Duration::ZERO)?;
            frames += 1;
        }
        self.manager.clear_target_step_count();
        tracing::debug!(
            diagram = %self.name,
            target,
            step = self.step_count(),
            frames,
            "seek finished"
        );
        Ok(frames)
    }

    /// Plays at a fixed frame delta until the dispatcher has finished.
    pub fn run_to_completion(
        &mut self,
        dt: Duration,
        max_frames: usize,
    ) -> Result<usize, DiagramError> {
        let mut frames = 0;
        while !self.is_complete() {
            if frames >= max_frames {
                return Err(DiagramError::Stalled {
                    goal: "complete",
                    frames,
                });
            }
            self.update(dt)?;
            frames += 1;
        }
        Ok(frames)
    }

    /// Restarts the diagram from its first frame.
    pub fn reset(&mut self) {
        self.manager.reset();
        self.playback.reset();
        *self.state.borrow_mut() = DiagramState::new(&self.spec, self.texture.clone());
        self.frames = 0;
        self.install();
        tracing::debug!(diagram = %self.name, "diagram reset");
    }

    pub fn is_complete(&self) -> bool {
        !self.dispatcher.is_busy()
    }

    pub fn step_count(&self) -> u64 {
        self.manager.step_count()
    }

    /// Frames advanced since the diagram was created or last reset.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// The global histogram, held in chunk 0.
    pub fn histogram(&self) -> Bins {
        self.state.borrow().histogram()
    }

    pub fn chunks(&self) -> Vec<Bins> {
        self.state.borrow().chunks.clone()
    }

    pub fn state(&self) -> Ref<'_, DiagramState> {
        self.state.borrow()
    }

    pub fn trace(&self) -> Vec<TraceEvent> {
        self.state.borrow().trace.clone()
    }
}

fn validate_geometry(spec: &DiagramSpec, texture: &Texture) -> Result<(), DiagramError> {
    let invalid = |message: String| Err(DiagramError::Geometry(message));

    if spec.workgroups == 0 || spec.wave_size == 0 || spec.num_chunks() == 0 {
        return invalid("workgroups, wave size and chunk counts must be at least 1".into());
    }

    let per_bin = matches!(spec.kernel, Kernel::Chunks | Kernel::Sum | Kernel::Reduce);
    if per_bin && spec.wave_size != NUM_BINS {
        return invalid(format!(
            "the {} kernel runs one invocation per bin and needs a wave size of {NUM_BINS}, got {}",
            spec.kernel, spec.wave_size
        ));
    }

    if spec.kernel == Kernel::Chunks {
        if !spec.workgroup_memory {
            return invalid("the chunks kernel needs workgroup memory".into());
        }
        if texture.width() % spec.wave_size != 0 {
            return invalid(format!(
                "texture width {} is not a multiple of the wave size {}",
                texture.width(),
                spec.wave_size
            ));
        }
        let needed = texture.width() / spec.wave_size * texture.height();
        if spec.num_chunks() != needed {
            return invalid(format!(
                "a {}x{} texture makes {needed} chunks of {} texels, but the diagram has {}",
                texture.width(),
                texture.height(),
                spec.wave_size,
                spec.num_chunks()
            ));
        }
    }

    if spec.image_data {
        let available = texture.chunk_histograms(spec.wave_size).len();
        if available < spec.num_chunks() {
            return invalid(format!(
                "image data only covers {available} chunks, but the diagram has {}",
                spec.num_chunks()
            ));
        }
    }

    Ok(())
}
