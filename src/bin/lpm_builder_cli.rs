//! lpm builder CLI - build driver
//!
//! Commands: validate, build
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on any template or stage failure

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use lpm_builder_core::{
    load_template, BuildContext, OrchestratorConfig, StageOrchestrator, TracingLog,
};

#[derive(Parser)]
#[command(name = "lpm-builder-cli")]
#[command(about = "lpm builder - staged package build pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory containing the `template` file
    #[arg(short, long, default_value = ".")]
    template_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the template and print it normalized
    Validate,

    /// Validate the template, then run the build stages
    Build {
        /// Directory holding init, build, install_files and post_install_files
        #[arg(long, default_value = "stage0")]
        scripts_dir: PathBuf,

        /// Package staging directory (created if missing)
        #[arg(long)]
        pkg_dir: PathBuf,

        /// Source directory, exported to stage scripts as $SRC (created if missing)
        #[arg(long)]
        src_dir: PathBuf,

        /// Shell used to run stage scripts
        #[arg(long, default_value = lpm_builder_core::pipeline::DEFAULT_SHELL)]
        shell: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let log = TracingLog;

    let template = match load_template(&cli.template_dir, &log) {
        Ok(t) => t,
        Err(e) => {
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate => {
            print_json(&serde_json::json!({
                "success": true,
                "template": template,
            }));
            ExitCode::SUCCESS
        }

        Commands::Build { scripts_dir, pkg_dir, src_dir, shell } => {
            for dir in [&pkg_dir, &src_dir] {
                if let Err(e) = fs::create_dir_all(dir) {
                    print_json(&serde_json::json!({
                        "success": false,
                        "error": format!("Failed creating {}: {}", dir.display(), e),
                    }));
                    return ExitCode::FAILURE;
                }
            }

            let ctx = BuildContext::new(scripts_dir, pkg_dir, src_dir);
            let config = OrchestratorConfig { shell, ..Default::default() };
            let mut orchestrator = StageOrchestrator::new(config, &log);

            match orchestrator.run(&ctx) {
                Ok(report) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "package": template.name,
                        "report": report,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    print_json(&serde_json::json!({
                        "success": false,
                        "package": template.name,
                        "stage": e.stage(),
                        "error": e.to_string(),
                    }));
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed serializing output: {}", e),
    }
}
