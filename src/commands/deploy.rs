use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use deployctl::defaults::load_settings;
use deployctl::deploy::{self, DeployContext, DeployReport, DeployRequest};
use deployctl::environment::Environment;
use deployctl::executor::{RecordingExecutor, SystemExecutor};
use deployctl::health::{HttpHealthProbe, SkippedProbe};
use deployctl::version::VersionLabel;

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// Target environment: development (dev), production (prod) or rollback
    #[arg(default_value = "development")]
    pub environment: String,

    /// Image tag to deploy, e.g. 42-abc1234
    #[arg(default_value = "latest")]
    pub version: String,

    /// Rollback target: development or production (overrides ROLLBACK_TARGET)
    #[arg(long)]
    pub target: Option<String>,

    /// Production mechanism: ecs or ec2 (overrides DEPLOY_METHOD)
    #[arg(long)]
    pub mechanism: Option<String>,

    /// AWS region (overrides AWS_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Config file (defaults to ./deployctl.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the commands without running them
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: DeployArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<DeployReport> {
    let environment: Environment = args.environment.parse()?;
    let version: VersionLabel = args.version.parse()?;

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(region) = args.region {
        settings.region = region;
    }

    let mut request = DeployRequest::new(environment, version, &settings);
    if let Some(target) = args.target {
        request.rollback_target = target.parse()?;
    }
    if let Some(mechanism) = args.mechanism {
        request.mechanism = mechanism.parse()?;
    }

    let report = if args.dry_run {
        let executor = RecordingExecutor::new();
        deploy::run(
            &request,
            &DeployContext {
                settings: &settings,
                executor: &executor,
                probe: &SkippedProbe,
                dry_run: true,
            },
        )?
    } else {
        let probe = HttpHealthProbe::new(Duration::from_secs(settings.health.timeout_secs))?;
        deploy::run(
            &request,
            &DeployContext {
                settings: &settings,
                executor: &SystemExecutor,
                probe: &probe,
                dry_run: false,
            },
        )?
    };

    Ok((report, 0))
}
