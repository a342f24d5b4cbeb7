use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use serde::Serialize;

use deployctl::defaults::load_settings;
use deployctl::executor::{Executor, RecordingExecutor, SystemExecutor};
use deployctl::health::{HealthProbe, HttpHealthProbe, SkippedProbe};
use deployctl::pipeline::{
    self, LocalStageExecutor, PipelineContext, PipelinePlan, PipelineRunResult,
    PipelineRunStatus, PipelineStage,
};

use super::CmdResult;

#[derive(Args)]
pub struct PipelineArgs {
    #[command(subcommand)]
    command: PipelineCommand,
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Show which stages would run for a branch, grouped into waves
    Plan(PlanArgs),
    /// Run the pipeline locally
    Run(RunArgs),
}

#[derive(Args)]
struct StageSource {
    /// Pipeline YAML file (defaults to the built-in pipeline)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Release the manual approval gate of a stage (repeatable)
    #[arg(long = "approve", value_name = "STAGE")]
    approvals: Vec<String>,
}

#[derive(Args)]
struct PlanArgs {
    /// Branch being built
    #[arg(long)]
    branch: String,

    #[command(flatten)]
    source: StageSource,
}

#[derive(Args)]
struct RunArgs {
    /// Branch being built
    #[arg(long)]
    branch: String,

    /// CI build number
    #[arg(long)]
    build_number: u64,

    /// Commit hash (defaults to `git rev-parse HEAD`)
    #[arg(long)]
    revision: Option<String>,

    #[command(flatten)]
    source: StageSource,

    /// Config file for deploy stages
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record commands without running them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PipelineOutput {
    Plan(PipelinePlan),
    Run(PipelineRunResult),
}

pub fn run(args: PipelineArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PipelineOutput> {
    match args.command {
        PipelineCommand::Plan(args) => plan(args),
        PipelineCommand::Run(args) => run_pipeline(args),
    }
}

fn stages(source: &StageSource) -> deployctl::Result<Vec<PipelineStage>> {
    match &source.file {
        Some(path) => pipeline::load(path),
        None => Ok(pipeline::default_pipeline()),
    }
}

fn plan(args: PlanArgs) -> CmdResult<PipelineOutput> {
    let stages = stages(&args.source)?;
    let ctx = PipelineContext {
        branch: args.branch,
        build_number: 0,
        revision: String::new(),
        approvals: args.source.approvals,
    };

    Ok((PipelineOutput::Plan(pipeline::plan(&stages, &ctx)?), 0))
}

fn run_pipeline(args: RunArgs) -> CmdResult<PipelineOutput> {
    let stages = stages(&args.source)?;
    let revision = match args.revision {
        Some(revision) => revision,
        None => deployctl::version::current_revision()?,
    };
    let ctx = PipelineContext {
        branch: args.branch,
        build_number: args.build_number,
        revision,
        approvals: args.source.approvals,
    };
    let settings = load_settings(args.config.as_deref())?;

    let (executor, probe): (Arc<dyn Executor>, Arc<dyn HealthProbe>) = if args.dry_run {
        (Arc::new(RecordingExecutor::new()), Arc::new(SkippedProbe))
    } else {
        let timeout = Duration::from_secs(settings.health.timeout_secs);
        (Arc::new(SystemExecutor), Arc::new(HttpHealthProbe::new(timeout)?))
    };

    let stage_executor = Arc::new(LocalStageExecutor {
        context: ctx.clone(),
        settings,
        executor,
        probe,
        dry_run: args.dry_run,
    });

    let result = pipeline::run(&stages, &ctx, stage_executor)?;
    let exit_code = match result.status {
        PipelineRunStatus::Success | PipelineRunStatus::Skipped => 0,
        PipelineRunStatus::PartialSuccess | PipelineRunStatus::Failed => 1,
    };

    Ok((PipelineOutput::Run(result), exit_code))
}
