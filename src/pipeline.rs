//! Stage Pipeline - fixed, fail-fast build stages
//!
//! `init`, `build`, `install_files` and (when present) `post_install_files`
//! run one after another. The first stage that exits non-zero stops the
//! pipeline; whatever the finished stages wrote to disk is left in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hashing::file_sha256;
use crate::log::BuildLog;
use crate::script::{HelperLibrary, ScriptPreparer};

pub const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Couldn't launch {stage} script: {source}")]
    Launch {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't execute {stage} script from template directory (exit code {}).\n{output}", exit_code_label(.code))]
    Failed {
        stage: Stage,
        code: Option<i32>,
        output: String,
    },

    #[error("Couldn't resolve build directory {path}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline already finished; create a new orchestrator for another build")]
    AlreadyFinished,
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "killed by signal".to_string(),
    }
}

impl StageError {
    /// Stage that failed, if the error belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StageError::Launch { stage, .. } | StageError::Failed { stage, .. } => Some(*stage),
            StageError::Context { .. } | StageError::AlreadyFinished => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Build,
    InstallFiles,
    PostInstallFiles,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 4] = [Stage::Init, Stage::Build, Stage::InstallFiles, Stage::PostInstallFiles];

    /// Name of the stage script file.
    pub fn file_name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Build => "build",
            Stage::InstallFiles => "install_files",
            Stage::PostInstallFiles => "post_install_files",
        }
    }

    /// Optional stages are skipped when their script file is absent.
    pub fn is_optional(&self) -> bool {
        matches!(self, Stage::PostInstallFiles)
    }

    pub fn working_dir<'a>(&self, ctx: &'a BuildContext) -> &'a Path {
        match self {
            Stage::Build => &ctx.src_dir,
            Stage::Init | Stage::InstallFiles | Stage::PostInstallFiles => &ctx.pkg_dir,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Directories for one build run, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub stage0_scripts_dir: PathBuf,
    pub pkg_dir: PathBuf,
    pub src_dir: PathBuf,
}

impl BuildContext {
    pub fn new(stage0_scripts_dir: impl Into<PathBuf>, pkg_dir: impl Into<PathBuf>, src_dir: impl Into<PathBuf>) -> Self {
        Self {
            stage0_scripts_dir: stage0_scripts_dir.into(),
            pkg_dir: pkg_dir.into(),
            src_dir: src_dir.into(),
        }
    }

    pub fn stage_script(&self, stage: Stage) -> PathBuf {
        self.stage0_scripts_dir.join(stage.file_name())
    }

    /// Same context with every directory made absolute against the current
    /// directory. Stage scripts run elsewhere, so relative paths would
    /// resolve against the stage's working directory instead.
    pub fn to_absolute(&self) -> Result<Self, StageError> {
        let absolute = |path: &Path| {
            std::path::absolute(path).map_err(|source| StageError::Context {
                path: path.to_path_buf(),
                source,
            })
        };

        Ok(Self {
            stage0_scripts_dir: absolute(&self.stage0_scripts_dir)?,
            pkg_dir: absolute(&self.pkg_dir)?,
            src_dir: absolute(&self.src_dir)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running(Stage),
    Failed { stage: Stage, output: String },
    Completed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Failed { .. } | PipelineState::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub script_sha256: Option<String>,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageOutcome>,
}

impl BuildReport {
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage.file_name()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub shell: PathBuf,
    pub helpers: HelperLibrary,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            helpers: HelperLibrary::builtin(),
        }
    }
}

/// Runs the stage sequence for a single build
pub struct StageOrchestrator<'a> {
    preparer: ScriptPreparer,
    shell: PathBuf,
    log: &'a dyn BuildLog,
    state: PipelineState,
}

impl<'a> StageOrchestrator<'a> {
    pub fn new(config: OrchestratorConfig, log: &'a dyn BuildLog) -> Self {
        Self {
            preparer: ScriptPreparer::new(config.helpers),
            shell: config.shell,
            log,
            state: PipelineState::NotStarted,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run every applicable stage in order, stopping at the first failure.
    pub fn run(&mut self, ctx: &BuildContext) -> Result<BuildReport, StageError> {
        if self.state.is_terminal() {
            return Err(StageError::AlreadyFinished);
        }

        let id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("build", id = %id);
        let _enter = span.enter();

        let ctx = &ctx.to_absolute()?;
        let started_at = Utc::now();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            if stage.is_optional() && !ctx.stage_script(stage).exists() {
                debug!(stage = %stage, "optional stage script absent, skipping");
                continue;
            }

            self.state = PipelineState::Running(stage);

            match self.run_stage(stage, ctx) {
                Ok(outcome) => {
                    self.log.stage_output(stage, &outcome.output);
                    stages.push(outcome);
                }
                Err(err) => {
                    let output = match &err {
                        StageError::Failed { output, .. } => output.clone(),
                        other => other.to_string(),
                    };
                    error!(stage = %stage, "stage failed");
                    self.state = PipelineState::Failed { stage, output };
                    return Err(err);
                }
            }
        }

        self.state = PipelineState::Completed;
        info!(stages = stages.len(), "all stages completed");

        Ok(BuildReport {
            id,
            started_at,
            finished_at: Utc::now(),
            stages,
        })
    }

    fn run_stage(&self, stage: Stage, ctx: &BuildContext) -> Result<StageOutcome, StageError> {
        self.log.info(&format!("Executing stage0/{} script", stage));

        let prepared = self.preparer.prepare(&ctx.stage0_scripts_dir, stage.file_name());
        let working_dir = stage.working_dir(ctx);
        let script_sha256 = match file_sha256(&prepared.script_path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(stage = %stage, path = %prepared.script_path.display(), error = %e, "couldn't hash stage script");
                None
            }
        };

        debug!(shell = %self.shell.display(), working_dir = ?working_dir, "spawning stage script");

        let started_at = Utc::now();
        // $0 is the stage name, $1 the stage script path read by the trailer.
        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(&prepared.text)
            .arg(stage.file_name())
            .arg(&prepared.script_path)
            .current_dir(working_dir)
            .env("SRC", &ctx.src_dir)
            .output()
            .map_err(|source| StageError::Launch { stage, source })?;
        let finished_at = Utc::now();

        let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&result.stderr));

        if !result.status.success() {
            return Err(StageError::Failed {
                stage,
                code: result.status.code(),
                output,
            });
        }

        Ok(StageOutcome {
            stage,
            script_sha256,
            output,
            started_at,
            finished_at,
        })
    }
}
