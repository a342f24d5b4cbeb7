//! Environment dispatcher.
//!
//! One named procedure per target. Every external command goes through the
//! session's [`Executor`] and the first failure aborts the run: no retries,
//! no automatic rollback.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::compose::{self, ComposeRewrite};
use crate::defaults::DeploySettings;
use crate::environment::{DeployMechanism, Environment, RollbackTarget};
use crate::error::{Error, HealthCheckFailedDetails, Result};
use crate::executor::{run_checked, CommandOutput, Executor, Invocation};
use crate::health::{HealthProbe, HealthStatus};
use crate::ssh::SshTarget;
use crate::utils::shell;
use crate::version::VersionLabel;

/// One invocation's worth of input.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub environment: Environment,
    pub version: VersionLabel,
    pub region: String,
    pub mechanism: DeployMechanism,
    pub rollback_target: RollbackTarget,
}

impl DeployRequest {
    /// Region, mechanism and rollback target default from `settings`.
    pub fn new(environment: Environment, version: VersionLabel, settings: &DeploySettings) -> Self {
        Self {
            environment,
            version,
            region: settings.region.clone(),
            mechanism: settings.mechanism,
            rollback_target: settings.rollback_target,
        }
    }
}

pub struct DeployContext<'a> {
    pub settings: &'a DeploySettings,
    pub executor: &'a dyn Executor,
    pub probe: &'a dyn HealthProbe,
    /// Leave files and key checks alone; the executor is expected to only record.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStep {
    pub name: String,
    pub command: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub run_id: String,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_target: Option<RollbackTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<DeployMechanism>,
    pub version: String,
    pub region: String,
    pub dry_run: bool,
    pub started_at: String,
    pub finished_at: String,
    pub steps: Vec<DeployStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeRewrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
}

struct Session<'a, 'b> {
    ctx: &'b DeployContext<'a>,
    steps: Vec<DeployStep>,
    mechanism: Option<DeployMechanism>,
    compose: Option<ComposeRewrite>,
    health: Option<HealthStatus>,
}

impl<'a, 'b> Session<'a, 'b> {
    fn new(ctx: &'b DeployContext<'a>) -> Self {
        Self {
            ctx,
            steps: Vec::new(),
            mechanism: None,
            compose: None,
            health: None,
        }
    }

    fn settings(&self) -> &'a DeploySettings {
        self.ctx.settings
    }

    fn run(&mut self, step: &str, invocation: Invocation) -> Result<CommandOutput> {
        log_status!("deploy", "{}: {}", step, invocation.render());
        let output = run_checked(self.ctx.executor, &invocation, step)?;
        self.steps.push(DeployStep {
            name: step.to_string(),
            command: invocation.render(),
            exit_code: output.exit_code,
        });
        Ok(output)
    }

    fn pause(&self, seconds: u64) {
        log_status!("deploy", "Waiting {}s for services to start", seconds);
        self.ctx.executor.sleep(Duration::from_secs(seconds));
    }
}

/// Dispatch `request` to its procedure.
///
/// On failure the error details gain `runId` and `completedSteps`.
pub fn run(request: &DeployRequest, ctx: &DeployContext) -> Result<DeployReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339();
    let mut session = Session::new(ctx);

    log_status!(
        "deploy",
        "Deploying {} to {} ({})",
        request.version,
        request.environment,
        request.region
    );

    let outcome = match request.environment {
        Environment::Development => deploy_development(&mut session, &request.version),
        Environment::Production => deploy_production(
            &mut session,
            &request.version,
            &request.region,
            request.mechanism,
        ),
        Environment::Rollback => rollback(
            &mut session,
            &request.version,
            &request.region,
            request.rollback_target,
        ),
    };

    if let Err(err) = outcome {
        return Err(with_progress(err, &run_id, &session.steps));
    }

    log_status!("deploy", "Deployment of {} complete", request.version);

    Ok(DeployReport {
        run_id,
        environment: request.environment,
        rollback_target: match request.environment {
            Environment::Rollback => Some(request.rollback_target),
            _ => None,
        },
        mechanism: session.mechanism,
        version: request.version.to_string(),
        region: request.region.clone(),
        dry_run: ctx.dry_run,
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        steps: session.steps,
        compose: session.compose,
        health: session.health,
    })
}

fn with_progress(mut err: Error, run_id: &str, steps: &[DeployStep]) -> Error {
    if let Value::Object(map) = &mut err.details {
        map.insert("runId".to_string(), Value::String(run_id.to_string()));
        map.insert(
            "completedSteps".to_string(),
            serde_json::to_value(steps).unwrap_or(Value::Array(Vec::new())),
        );
    }
    err
}

/// Local compose restart on the new tag, then a health probe.
fn deploy_development(session: &mut Session, version: &VersionLabel) -> Result<()> {
    let settings = session.settings();
    let compose_file = settings.compose_file.as_str();
    let compose_path = Path::new(compose_file);
    let images = settings.images.all();

    // Validate the rewrite before anything is stopped.
    compose::preview(compose_path, &images, version.as_str())?;

    session.run(
        "compose-down",
        Invocation::new("docker-compose", ["-f", compose_file, "down"]),
    )?;

    let rewrite = if session.ctx.dry_run {
        compose::preview(compose_path, &images, version.as_str())?
    } else {
        compose::apply(compose_path, &images, version.as_str())?
    };
    log_status!("deploy", "Pointed {} at {}", compose_file, version);
    session.compose = Some(rewrite);

    session.run(
        "compose-up",
        Invocation::new("docker-compose", ["-f", compose_file, "up", "-d"]),
    )?;

    session.pause(settings.health.delay_secs);

    let status = session.ctx.probe.check(&settings.health.url);
    session.health = Some(status.clone());
    if !status.healthy {
        return Err(Error::health_check_failed(HealthCheckFailedDetails {
            url: status.url,
            status_code: status.status_code,
            error: status.error,
        }));
    }

    log_status!("deploy", "Health check passed: {}", settings.health.url);
    Ok(())
}

/// Push both images to the registry, then roll them out with `mechanism`.
fn deploy_production(
    session: &mut Session,
    version: &VersionLabel,
    region: &str,
    mechanism: DeployMechanism,
) -> Result<()> {
    let settings = session.settings();
    let registry = settings
        .registry
        .as_deref()
        .map(|r| r.trim_end_matches('/'))
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::config_missing_key("registry", Some("ECR_REGISTRY".to_string())))?;

    // Resolve the host before pushing so a bad EC2 config fails without side effects.
    let ssh = match mechanism {
        DeployMechanism::Ec2 => Some(SshTarget::from_settings(&settings.ec2, !session.ctx.dry_run)?),
        DeployMechanism::Ecs => None,
    };
    session.mechanism = Some(mechanism);

    registry_login(session, registry, region)?;

    let images = settings.images.all();
    for image in &images {
        session.run(
            &format!("tag-{}", image),
            Invocation::new(
                "docker",
                [
                    "tag".to_string(),
                    format!("{}:{}", image, version),
                    format!("{}/{}:{}", registry, image, version),
                ],
            ),
        )?;
    }
    for image in &images {
        session.run(
            &format!("push-{}", image),
            Invocation::new(
                "docker",
                ["push".to_string(), format!("{}/{}:{}", registry, image, version)],
            ),
        )?;
    }

    match (mechanism, ssh) {
        (DeployMechanism::Ecs, _) => deploy_production_ecs(session, region),
        (DeployMechanism::Ec2, Some(ssh)) => {
            deploy_production_ec2(session, &ssh, registry, version)
        }
        (DeployMechanism::Ec2, None) => Err(Error::internal_unexpected(
            "EC2 deployment without a resolved host",
        )),
    }
}

fn registry_login(session: &mut Session, registry: &str, region: &str) -> Result<()> {
    let password = session.run(
        "registry-password",
        Invocation::new("aws", ["ecr", "get-login-password", "--region", region]),
    )?;
    session.run(
        "registry-login",
        Invocation::new(
            "docker",
            ["login", "--username", "AWS", "--password-stdin", registry],
        )
        .with_stdin(password.stdout.trim().to_string()),
    )?;
    Ok(())
}

/// Force a new deployment of both services, then block until both are stable.
fn deploy_production_ecs(session: &mut Session, region: &str) -> Result<()> {
    let ecs = &session.settings().ecs;

    for service in [&ecs.web_service, &ecs.backend_service] {
        session.run(
            &format!("update-{}", service),
            Invocation::new(
                "aws",
                [
                    "ecs",
                    "update-service",
                    "--cluster",
                    ecs.cluster.as_str(),
                    "--service",
                    service.as_str(),
                    "--force-new-deployment",
                    "--region",
                    region,
                ],
            ),
        )?;
    }

    session.run(
        "wait-services-stable",
        Invocation::new(
            "aws",
            [
                "ecs",
                "wait",
                "services-stable",
                "--cluster",
                ecs.cluster.as_str(),
                "--services",
                ecs.web_service.as_str(),
                ecs.backend_service.as_str(),
                "--region",
                region,
            ],
        ),
    )?;
    Ok(())
}

/// Script run on the EC2 host in one session: pull, rewrite, restart, prune.
pub fn remote_deploy_script(settings: &DeploySettings, registry: &str, version: &str) -> String {
    let images = settings.images.all();
    let mut commands = vec![format!("cd {}", shell::quote_path(&settings.ec2.app_dir))];

    for image in &images {
        commands.push(format!(
            "docker pull {}",
            shell::quote_arg(&format!("{}/{}:{}", registry, image, version))
        ));
    }
    commands.push(compose::remote_rewrite_command(
        &settings.compose_file,
        &images,
        Some(registry),
        version,
    ));
    commands.push(format!(
        "docker-compose -f {} up -d",
        shell::quote_arg(&settings.compose_file)
    ));
    commands.push("docker image prune -f".to_string());

    commands.join(" && ")
}

fn deploy_production_ec2(
    session: &mut Session,
    ssh: &SshTarget,
    registry: &str,
    version: &VersionLabel,
) -> Result<()> {
    let script = remote_deploy_script(session.settings(), registry, version.as_str());
    log_status!("deploy", "Opening session to {}@{}", ssh.user, ssh.host);
    session.run("remote-deploy", ssh.invocation(&script))?;
    Ok(())
}

fn rollback(
    session: &mut Session,
    version: &VersionLabel,
    region: &str,
    target: RollbackTarget,
) -> Result<()> {
    log_status!("deploy", "Rolling {} back to {}", target, version);
    match target {
        RollbackTarget::Development => deploy_development(session, version),
        RollbackTarget::Production => rollback_production(session, version, region),
    }
}

/// Pin every configured rollback service to `<taskFamily>:<version>`.
fn rollback_production(session: &mut Session, version: &VersionLabel, region: &str) -> Result<()> {
    let ecs = &session.settings().ecs;
    if ecs.rollback_services.is_empty() {
        return Err(Error::config_invalid_value(
            "ecs.rollbackServices",
            None,
            "At least one rollback service is required",
        ));
    }
    session.mechanism = Some(DeployMechanism::Ecs);

    for target in &ecs.rollback_services {
        let task_definition = format!("{}:{}", target.task_family, version);
        session.run(
            &format!("rollback-{}", target.service),
            Invocation::new(
                "aws",
                [
                    "ecs",
                    "update-service",
                    "--cluster",
                    ecs.cluster.as_str(),
                    "--service",
                    target.service.as_str(),
                    "--task-definition",
                    task_definition.as_str(),
                    "--region",
                    region,
                ],
            ),
        )?;
    }
    Ok(())
}
