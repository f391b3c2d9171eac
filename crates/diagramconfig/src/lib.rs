use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which compute shader a diagram animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Kernel {
    /// One invocation walks the whole texture.
    Single,
    /// One invocation per texel, unsynchronized read-modify-write.
    Race,
    /// One invocation per texel, bins locked around the increment.
    NoRace,
    /// Two invocations contending for the same bin, shown as a still.
    LockedBin,
    /// Per-workgroup histograms in workgroup memory, copied out to chunks.
    Chunks,
    /// One workgroup summing every chunk into chunk 0.
    Sum,
    /// Pairwise reduction of chunks over several dispatches.
    Reduce,
}

impl Kernel {
    pub const ALL: [Kernel; 7] = [
        Kernel::Single,
        Kernel::Race,
        Kernel::NoRace,
        Kernel::LockedBin,
        Kernel::Chunks,
        Kernel::Sum,
        Kernel::Reduce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kernel::Single => "single",
            Kernel::Race => "race",
            Kernel::NoRace => "noRace",
            Kernel::LockedBin => "lockedBin",
            Kernel::Chunks => "chunks",
            Kernel::Sum => "sum",
            Kernel::Reduce => "reduce",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagramConfig {
    pub version: u32,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Texture rows shared by every diagram that does not set its own.
    #[serde(default)]
    pub texture: Option<Vec<String>>,
    #[serde(default)]
    pub diagrams: BTreeMap<String, DiagramSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(
        default = "default_max_frame_delta",
        deserialize_with = "deserialize_duration"
    )]
    pub max_frame_delta: Duration,
    #[serde(
        default = "default_frame_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub frame_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            max_frame_delta: default_max_frame_delta(),
            frame_interval: default_frame_interval(),
        }
    }
}

/// Durations of the primitive animations every choreography is made of.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Moving the fetch probe between two places.
    #[serde(
        rename = "move",
        default = "default_move",
        deserialize_with = "deserialize_duration"
    )]
    pub move_to: Duration,
    /// Pause after each probe move.
    #[serde(default = "default_settle", deserialize_with = "deserialize_duration")]
    pub settle: Duration,
    /// Moving the program cursor to another line.
    #[serde(default = "default_line", deserialize_with = "deserialize_duration")]
    pub line: Duration,
    /// Fading headers and probe lines.
    #[serde(default = "default_fade", deserialize_with = "deserialize_duration")]
    pub fade: Duration,
    /// The "+1" flash when a value is incremented.
    #[serde(default = "default_flash", deserialize_with = "deserialize_duration")]
    pub flash: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            move_to: default_move(),
            settle: default_settle(),
            line: default_line(),
            fade: default_fade(),
            flash: default_flash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiagramSpec {
    pub kernel: Kernel,
    #[serde(default = "default_count")]
    pub workgroups: usize,
    #[serde(default = "default_count")]
    pub wave_size: usize,
    #[serde(default = "default_count")]
    pub chunks_across: usize,
    #[serde(default = "default_count")]
    pub chunks_down: usize,
    #[serde(default)]
    pub workgroup_memory: bool,
    /// Seed the chunks with the texture's per-chunk histograms before running.
    #[serde(default)]
    pub image_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DiagramSpec {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            workgroups: 1,
            wave_size: 1,
            chunks_across: 1,
            chunks_down: 1,
            workgroup_memory: false,
            image_data: false,
            texture: None,
            code: None,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks_across * self.chunks_down
    }

    /// Non-blank code lines with the common indentation stripped.
    pub fn code_lines(&self) -> Vec<String> {
        let Some(code) = self.code.as_deref() else {
            return Vec::new();
        };
        let lines: Vec<&str> = code.lines().filter(|line| !line.trim().is_empty()).collect();
        let indent = lines
            .iter()
            .map(|line| line.len() - line.trim_start_matches(' ').len())
            .min()
            .unwrap_or(0);
        lines
            .into_iter()
            .map(|line| line[indent..].trim_end().to_string())
            .collect()
    }
}

fn default_speed() -> f32 {
    1.0
}

fn default_max_frame_delta() -> Duration {
    Duration::from_millis(100)
}

fn default_frame_interval() -> Duration {
    Duration::from_micros(16_667)
}

fn default_move() -> Duration {
    Duration::from_secs(1)
}

fn default_settle() -> Duration {
    Duration::from_millis(250)
}

fn default_line() -> Duration {
    Duration::from_millis(500)
}

fn default_fade() -> Duration {
    Duration::from_millis(500)
}

fn default_flash() -> Duration {
    Duration::from_secs(1)
}

fn default_count() -> usize {
    1
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// The 6×7 texture used throughout the article.
pub const DEFAULT_TEXTURE: [&str; 7] = [
    "BYYYYB", "BYRRYB", "BBRRBB", "RRRRRR", "BBRRBB", "BRBBRB", "YRBBRY",
];

impl DiagramConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: DiagramConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// The diagrams of the compute shader histogram article.
    pub fn builtin() -> Self {
        let mut diagrams = BTreeMap::new();

        diagrams.insert(
            "single".to_string(),
            DiagramSpec {
                code: Some(
                    "for (y = 0; y < size.y; y++) {\n  for (x = 0; x < size.x; x++) {\n    color = textureLoad(ourTexture, vec2(x,y))\n    histogram[color] += 1\n  }\n}"
                        .into(),
                ),
                ..DiagramSpec::new(Kernel::Single)
            },
        );
        diagrams.insert(
            "race".to_string(),
            DiagramSpec {
                workgroups: 4,
                code: Some(
                    "xy = glbl_inv_id\ncolor = textureLoad(ourTexture, xy)\nhistogram[color] + 1"
                        .into(),
                ),
                ..DiagramSpec::new(Kernel::Race)
            },
        );
        diagrams.insert(
            "lockedBin".to_string(),
            DiagramSpec {
                workgroups: 2,
                code: Some("atomicAdd(&histogram[color], 1)".into()),
                ..DiagramSpec::new(Kernel::LockedBin)
            },
        );
        diagrams.insert(
            "noRace".to_string(),
            DiagramSpec {
                workgroups: 4,
                code: Some(
                    "xy = gid.xy;\ncolor = texLoad(ourTex, xy)\natomicAdd(&histogram[color], 1)"
                        .into(),
                ),
                ..DiagramSpec::new(Kernel::NoRace)
            },
        );
        diagrams.insert(
            "chunks".to_string(),
            DiagramSpec {
                workgroups: 4,
                wave_size: 3,
                chunks_across: 7,
                chunks_down: 2,
                workgroup_memory: true,
                code: Some(
                    "xy = w_id * chunkSize * l_id;\ncolor = textureLoad(ourTexture, xy)\natomicAdd(&histogram[color], 1)\nwkBarrier();\nchunk[chunkNdx][bin] = atmcLoad(???)"
                        .into(),
                ),
                ..DiagramSpec::new(Kernel::Chunks)
            },
        );
        diagrams.insert(
            "sum".to_string(),
            DiagramSpec {
                wave_size: 3,
                chunks_across: 7,
                chunks_down: 2,
                image_data: true,
                ..DiagramSpec::new(Kernel::Sum)
            },
        );
        diagrams.insert(
            "reduce".to_string(),
            DiagramSpec {
                workgroups: 4,
                wave_size: 3,
                chunks_across: 7,
                chunks_down: 2,
                image_data: true,
                ..DiagramSpec::new(Kernel::Reduce)
            },
        );

        Self {
            version: 1,
            playback: PlaybackConfig::default(),
            timing: TimingConfig::default(),
            texture: Some(DEFAULT_TEXTURE.iter().map(|row| row.to_string()).collect()),
            diagrams,
        }
    }

    pub fn diagram(&self, name: &str) -> Option<&DiagramSpec> {
        self.diagrams.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.diagrams.keys().map(String::as_str)
    }

    /// Texture rows for `spec`: its own, else the shared one, else the default texture.
    pub fn texture_rows(&self, spec: &DiagramSpec) -> Vec<String> {
        spec.texture
            .clone()
            .or_else(|| self.texture.clone())
            .unwrap_or_else(|| DEFAULT_TEXTURE.iter().map(|row| row.to_string()).collect())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.diagrams.is_empty() {
            return Err(ConfigError::Invalid(
                "config must define at least one diagram".into(),
            ));
        }

        let speed = self.playback.speed;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "playback.speed must be a positive number, got {speed}"
            )));
        }

        if self.playback.max_frame_delta.is_zero() {
            return Err(ConfigError::Invalid(
                "playback.max_frame_delta must be greater than zero".into(),
            ));
        }

        if self.playback.frame_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "playback.frame_interval must be greater than zero".into(),
            ));
        }

        if let Some(rows) = &self.texture {
            validate_texture("texture", rows)?;
        }

        for (name, spec) in &self.diagrams {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("diagram name may not be empty".into()));
            }

            for (field, value) in [
                ("workgroups", spec.workgroups),
                ("wave_size", spec.wave_size),
                ("chunks_across", spec.chunks_across),
                ("chunks_down", spec.chunks_down),
            ] {
                if value == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "diagram '{name}' {field} must be at least 1"
                    )));
                }
            }

            if spec.kernel == Kernel::Chunks && !spec.workgroup_memory {
                return Err(ConfigError::Invalid(format!(
                    "diagram '{name}' uses the chunks kernel, which requires workgroup_memory = true"
                )));
            }

            if let Some(rows) = &spec.texture {
                validate_texture(&format!("diagram '{name}' texture"), rows)?;
            }
        }

        Ok(())
    }
}

fn validate_texture(label: &str, rows: &[String]) -> Result<(), ConfigError> {
    let Some(first) = rows.first() else {
        return Err(ConfigError::Invalid(format!("{label} must have at least one row")));
    };
    let width = first.chars().count();
    if width == 0 {
        return Err(ConfigError::Invalid(format!("{label} rows may not be empty")));
    }
    if let Some(row) = rows.iter().find(|row| row.chars().count() != width) {
        return Err(ConfigError::Invalid(format!(
            "{label} rows must all be {width} texels wide; '{row}' is not"
        )));
    }
    Ok(())
}
