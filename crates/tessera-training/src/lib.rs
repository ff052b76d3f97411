//! Tessera Training
//!
//! Orchestration of external LoRA training processes:
//! - Describing jobs (`TrainingConfig`) and VRAM presets (`VramPresetCatalog`)
//! - Building backend arguments (`CommandBuilder`)
//! - Locating the backend install (`ConfigResolver`)
//! - Spawning and supervising jobs (`ProcessSupervisor`, `JobRegistry`)
//! - Streaming typed progress events, heartbeats and cancellation

pub mod cancel;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod job;
pub mod parser;
pub mod preset;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod terminate;

pub use cancel::{CancelMethod, CancelOutcome, CancellationController};
pub use command::{build_args, CommandBuilder, TrainingCommand, DEFAULT_PRESET};
pub use config::{Hyperparams, ModelFamily, ModelType, Resolution, TrainingConfig};
pub use error::{TrainingError, TrainingResult};
pub use event::{EventKind, ProgressEvent};
pub use heartbeat::{HeartbeatMonitor, DEFAULT_HEARTBEAT_INTERVAL};
pub use job::{JobId, JobSnapshot, JobState, JobStatus};
pub use parser::{BackendMessage, ProgressStreamParser};
pub use preset::{Precision, VramPreset, VramPresetCatalog};
pub use registry::{JobEvents, JobRegistry};
pub use resolver::{
    ConfigResolver, GpuDevice, GpuReport, GpuStatus, InstallationReport, ResolvedBackend, ResolverSettings,
    RuntimeRequirements,
};
pub use service::{PreparedLaunch, PresetRecommendation, StartedTraining, TrainingService};
pub use settings::Settings;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use supervisor::{JobLauncher, LaunchSpec, ProcessSupervisor, StartedJob, SupervisorSettings};
