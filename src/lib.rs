//! lpm builder core - Staged Package Build Pipeline
//!
//! # Build Contract
//! 1. A template is validated before anything runs
//! 2. Dependency conditions are normalized exactly once
//! 3. Stages run in a fixed order, one at a time
//! 4. The first failing stage ends the build

pub mod templates;
pub mod validation;
pub mod hashing;
pub mod log;
pub mod script;
pub mod pipeline;

pub use templates::{load_template, normalize_dependencies, Arch, ChecksumAlgo, Dependencies, Dependency, Template, TemplateError, Version};
pub use validation::{SchemaError, TemplateRule, Validator};
pub use hashing::{file_sha256, sha256_hex};
pub use log::{BuildLog, CapturedLog, LogEntry, TracingLog};
pub use script::{HelperLibrary, PreparedScript, ScriptPreparer};
pub use pipeline::{BuildContext, BuildReport, OrchestratorConfig, PipelineState, Stage, StageError, StageOrchestrator, StageOutcome};

pub const BUILDER_VERSION: &str = env!("CARGO_PKG_VERSION");
