//! Stage Pipeline Tests
//!
//! These run real stage scripts through bash and need coreutils on PATH.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use lpm_builder_core::{
    sha256_hex, BuildContext, CapturedLog, HelperLibrary, LogEntry, OrchestratorConfig,
    PipelineState, Stage, StageError, StageOrchestrator,
};
use tempfile::TempDir;

struct Workspace {
    _root: TempDir,
    ctx: BuildContext,
    trace: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(
            root.path().join("stage0"),
            root.path().join("pkg"),
            root.path().join("src"),
        );
        for dir in [&ctx.stage0_scripts_dir, &ctx.pkg_dir, &ctx.src_dir] {
            fs::create_dir_all(dir).unwrap();
        }
        let trace = root.path().join("trace");
        Self { _root: root, ctx, trace }
    }

    fn script(&self, stage: Stage, body: &str) {
        fs::write(self.ctx.stage_script(stage), body).unwrap();
    }

    /// A script that records its stage name and working directory.
    fn tracing_script(&self, stage: Stage, extra: &str) {
        self.script(
            stage,
            &format!(
                "echo \"{stage} $(pwd)\" >> \"{trace}\"\necho \"{stage} ran\"\n{extra}\n",
                stage = stage,
                trace = self.trace.display(),
                extra = extra,
            ),
        );
    }

    fn trace_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.trace)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn stages_run(&self) -> Vec<String> {
        self.trace_lines()
            .iter()
            .map(|l| l.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }
}

fn canonical(path: &Path) -> String {
    fs::canonicalize(path).unwrap().display().to_string()
}

#[test]
fn all_four_stages_run_in_order_in_their_directories() {
    let ws = Workspace::new();
    for stage in Stage::ALL {
        ws.tracing_script(stage, "");
    }

    let log = CapturedLog::new();
    let mut orchestrator = StageOrchestrator::new(OrchestratorConfig::default(), &log);
    let report = orchestrator.run(&ws.ctx).unwrap();

    assert_eq!(report.stage_names(), vec!["init", "build", "install_files", "post_install_files"]);
    assert_eq!(orchestrator.state(), &PipelineState::Completed);

    let pkg = canonical(&ws.ctx.pkg_dir);
    let src = canonical(&ws.ctx.src_dir);
    assert_eq!(
        ws.trace_lines(),
        vec![
            format!("init {}", pkg),
            format!("build {}", src),
            format!("install_files {}", pkg),
            format!("post_install_files {}", pkg),
        ]
    );

    assert_eq!(log.output_of(Stage::Build).as_deref(), Some("build ran\n"));
    for outcome in &report.stages {
        assert!(outcome.script_sha256.is_some());
        assert!(outcome.finished_at >= outcome.started_at);
    }
}

#[test]
fn failing_build_stage_halts_pipeline() {
    let ws = Workspace::new();
    ws.tracing_script(Stage::Init, "");
    ws.tracing_script(Stage::Build, "echo 'compiler exploded'\nexit 1");
    ws.tracing_script(Stage::InstallFiles, "");
    ws.tracing_script(Stage::PostInstallFiles, "");

    let log = CapturedLog::new();
    let mut orchestrator = StageOrchestrator::new(OrchestratorConfig::default(), &log);
    let err = orchestrator.run(&ws.ctx).unwrap_err();

    assert_eq!(ws.stages_run(), vec!["init", "build"]);
    assert_eq!(err.stage(), Some(Stage::Build));
    match &err {
        StageError::Failed { stage, code, output } => {
            assert_eq!(*stage, Stage::Build);
            assert_eq!(*code, Some(1));
            assert!(output.contains("compiler exploded"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("build"));

    assert!(matches!(orchestrator.state(), PipelineState::Failed { stage: Stage::Build, .. }));
    assert!(log.output_of(Stage::Init).is_some());
    assert!(log.output_of(Stage::Build).is_none());
    assert!(matches!(orchestrator.run(&ws.ctx), Err(StageError::AlreadyFinished)));
}

#[test]
fn absent_post_install_files_is_not_an_error() {
    let ws = Workspace::new();
    ws.tracing_script(Stage::Init, "");
    ws.tracing_script(Stage::Build, "");
    ws.tracing_script(Stage::InstallFiles, "");

    let log = CapturedLog::new();
    let mut orchestrator = StageOrchestrator::new(OrchestratorConfig::default(), &log);
    let report = orchestrator.run(&ws.ctx).unwrap();

    assert_eq!(ws.stages_run(), vec!["init", "build", "install_files"]);
    assert_eq!(report.stages.len(), 3);
    assert_eq!(orchestrator.state(), &PipelineState::Completed);
}

#[test]
fn missing_mandatory_script_fails_that_stage() {
    let ws = Workspace::new();
    ws.tracing_script(Stage::Init, "");
    ws.tracing_script(Stage::Build, "");

    let log = CapturedLog::new();
    let mut orchestrator = StageOrchestrator::new(OrchestratorConfig::default(), &log);
    let err = orchestrator.run(&ws.ctx).unwrap_err();

    assert_eq!(err.stage(), Some(Stage::InstallFiles));
    assert_eq!(ws.stages_run(), vec!["init", "build"]);
}

#[test]
fn wrong_checksum_removes_file_and_fails_stage() {
    let ws = Workspace::new();
    let tarball = ws.ctx.src_dir.join("source.tar.gz");
    fs::write(&tarball, b"not really a tarball").unwrap();

    ws.tracing_script(Stage::Init, "");
    ws.tracing_script(
        Stage::Build,
        &format!("validate_checksum \"{}\" \"{}\"\necho unreachable", tarball.display(), "0".repeat(64)),
    );
    ws.tracing_script(Stage::InstallFiles, "");

    let log = CapturedLog::new();
    let mut orchestrator = StageOrchestrator::new(OrchestratorConfig::default(), &log);
    let err = orchestrator.run(&ws.ctx).unwrap_err();

    assert!(!tarball.exists());
    assert_eq!(err.stage(), Some(Stage::Build));
    match err {
        StageError::Failed { output, .. } => {
            assert!(output.contains("Checksum validation failed"));
            assert!(!output.contains("unreachable"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ws.stages_run(), vec!["init", "build"]);
}

#[test]
fn matching_checksum_keeps_file() {
    let ws = Workspace::new();
    let contents = b"release 1.0\n";
    fs::write(ws.ctx.src_dir.join("release.txt"), contents).unwrap();

    ws.script(Stage::Init, "true");
    ws.script(Stage::Build, &format!("validate_checksum release.txt {}", sha256_hex(contents)));
    ws.script(Stage::InstallFiles, "true");

    let log = CapturedLog::new();
    StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ws.ctx).unwrap();

    assert!(ws.ctx.src_dir.join("release.txt").exists());
    assert!(log.output_of(Stage::Build).unwrap().contains("Checksum validation successful"));
}

#[test]
fn install_helpers_copy_from_src_into_program_tree() {
    let ws = Workspace::new();
    let bin = ws.ctx.src_dir.join("target/hello");
    fs::create_dir_all(bin.parent().unwrap()).unwrap();
    fs::write(&bin, "#!/bin/sh\necho hello\n").unwrap();
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o750)).unwrap();

    let docs = ws.ctx.src_dir.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("README"), "read me").unwrap();

    ws.script(Stage::Init, "true");
    ws.script(Stage::Build, "true");
    ws.script(
        Stage::InstallFiles,
        "install_to_package target/hello usr/bin/hello\ncopy_to_package docs usr/share/hello",
    );

    let log = CapturedLog::new();
    StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ws.ctx).unwrap();

    let installed = ws.ctx.pkg_dir.join("program/usr/bin/hello");
    assert_eq!(fs::read_to_string(&installed).unwrap(), "#!/bin/sh\necho hello\n");
    assert_eq!(fs::metadata(&installed).unwrap().permissions().mode() & 0o777, 0o750);

    let readme = ws.ctx.pkg_dir.join("program/usr/share/hello/docs/README");
    assert_eq!(fs::read_to_string(readme).unwrap(), "read me");
}

#[test]
fn strict_mode_stops_at_first_failing_command() {
    let ws = Workspace::new();
    ws.script(Stage::Init, "echo before\nfalse\necho after");

    let log = CapturedLog::new();
    let err = StageOrchestrator::new(OrchestratorConfig::default(), &log)
        .run(&ws.ctx)
        .unwrap_err();

    match err {
        StageError::Failed { stage, output, .. } => {
            assert_eq!(stage, Stage::Init);
            assert!(output.contains("before"));
            assert!(!output.contains("after"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn stderr_is_part_of_captured_output() {
    let ws = Workspace::new();
    ws.script(Stage::Init, "echo to-stdout\necho to-stderr >&2");
    ws.script(Stage::Build, "true");
    ws.script(Stage::InstallFiles, "true");

    let log = CapturedLog::new();
    StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ws.ctx).unwrap();

    assert_eq!(log.output_of(Stage::Init).as_deref(), Some("to-stdout\nto-stderr\n"));
}

#[test]
fn substituted_helper_library_is_in_scope() {
    let ws = Workspace::new();
    ws.script(Stage::Init, "greet init");
    ws.script(Stage::Build, "greet build");
    ws.script(Stage::InstallFiles, "type validate_checksum >/dev/null 2>&1 && echo leaked || echo absent");

    let config = OrchestratorConfig {
        helpers: HelperLibrary::new("function greet {\n\techo \"hello from $1\"\n}\n"),
        ..Default::default()
    };
    let log = CapturedLog::new();
    StageOrchestrator::new(config, &log).run(&ws.ctx).unwrap();

    assert_eq!(log.output_of(Stage::Init).as_deref(), Some("hello from init\n"));
    assert_eq!(log.output_of(Stage::InstallFiles).as_deref(), Some("absent\n"));
}

#[test]
fn stage_announcements_precede_output() {
    let ws = Workspace::new();
    ws.script(Stage::Init, "echo one");
    ws.script(Stage::Build, "echo two");
    ws.script(Stage::InstallFiles, "echo three");

    let log = CapturedLog::new();
    StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ws.ctx).unwrap();

    let entries = log.entries();
    assert_eq!(entries[0], LogEntry::Info("Executing stage0/init script".to_string()));
    assert_eq!(
        entries[1],
        LogEntry::StageOutput { stage: Stage::Init, output: "one\n".to_string() }
    );
    assert_eq!(entries.len(), 6);
}

#[test]
fn relative_build_directories_resolve_against_caller() {
    // Relative to the test process, not to any stage working directory.
    let root = tempfile::Builder::new().prefix("relative-build").tempdir_in(".").unwrap();
    let rel = root.path();
    assert!(rel.is_relative());

    let ctx = BuildContext::new(rel.join("stage0"), rel.join("pkg"), rel.join("src"));
    for dir in [&ctx.stage0_scripts_dir, &ctx.pkg_dir, &ctx.src_dir] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(ctx.src_dir.join("hello"), "hi\n").unwrap();

    let trace = fs::canonicalize(rel).unwrap().join("trace");
    for stage in Stage::ALL {
        let extra = if stage == Stage::InstallFiles { "install_to_package hello usr/bin/hello" } else { "" };
        fs::write(
            ctx.stage_script(stage),
            format!("echo {} >> \"{}\"\n{}\n", stage, trace.display(), extra),
        )
        .unwrap();
    }

    let log = CapturedLog::new();
    let report = StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ctx).unwrap();

    assert_eq!(report.stage_names(), vec!["init", "build", "install_files", "post_install_files"]);
    assert_eq!(
        fs::read_to_string(&trace).unwrap(),
        "init\nbuild\ninstall_files\npost_install_files\n"
    );
    assert_eq!(fs::read_to_string(ctx.pkg_dir.join("program/usr/bin/hello")).unwrap(), "hi\n");
}

#[test]
fn install_to_package_accepts_directory_target() {
    let ws = Workspace::new();
    fs::write(ws.ctx.src_dir.join("tool"), "tool").unwrap();

    ws.script(Stage::Init, "true");
    ws.script(Stage::Build, "true");
    ws.script(Stage::InstallFiles, "install_to_package tool usr/bin/");

    let log = CapturedLog::new();
    StageOrchestrator::new(OrchestratorConfig::default(), &log).run(&ws.ctx).unwrap();

    assert_eq!(fs::read_to_string(ws.ctx.pkg_dir.join("program/usr/bin/tool")).unwrap(), "tool");
}

#[test]
fn helper_arguments_are_not_glob_expanded() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.ctx.src_dir.join("lib")).unwrap();
    fs::write(ws.ctx.src_dir.join("lib/libz.so"), "elf").unwrap();

    ws.script(Stage::Init, "true");
    ws.script(Stage::Build, "true");
    ws.script(Stage::InstallFiles, "copy_to_package \"lib/*\" usr/lib");

    let log = CapturedLog::new();
    let err = StageOrchestrator::new(OrchestratorConfig::default(), &log)
        .run(&ws.ctx)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::InstallFiles));
    assert!(!ws.ctx.pkg_dir.join("program/usr/lib/libz.so").exists());
}
