//! CI pipeline declaration and local runner.
//!
//! Stages form a DAG through `needs`. Stages whose dependencies finish in the
//! same wave run concurrently. Branch gates and manual approval gates decide
//! which stages run for a given branch.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::defaults::DeploySettings;
use crate::deploy::{self, DeployContext, DeployRequest};
use crate::environment::{DeployMechanism, Environment, RollbackTarget};
use crate::error::{Error, Result};
use crate::executor::{run_checked, Executor, Invocation};
use crate::health::HealthProbe;
use crate::utils::{io, shell};
use crate::utils::template::{render_map, TemplateVars};
use crate::version::VersionLabel;

const FIELD: &str = "pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Shell command from `config.run`.
    Command,
    /// Environment dispatch from `config.environment`.
    Deploy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Branches the stage runs on; empty means every branch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approval: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub branch: String,
    pub build_number: u64,
    pub revision: String,
    /// Stage ids whose manual approval gate is released for this run.
    pub approvals: Vec<String>,
}

impl PipelineContext {
    pub fn version(&self) -> Result<VersionLabel> {
        VersionLabel::from_build(self.build_number, &self.revision)
    }

    /// Values are shell-quoted; they are spliced into `sh -c` scripts.
    fn variables(&self) -> Result<HashMap<String, String>> {
        let mut vars = HashMap::new();
        vars.insert(TemplateVars::VERSION.to_string(), self.version()?.to_string());
        vars.insert(
            TemplateVars::BRANCH.to_string(),
            shell::quote_arg(&self.branch),
        );
        vars.insert(
            TemplateVars::REVISION.to_string(),
            shell::quote_arg(&self.revision),
        );
        vars.insert(
            TemplateVars::BUILD_NUMBER.to_string(),
            self.build_number.to_string(),
        );
        Ok(vars)
    }

    fn gate(&self, stage: &PipelineStage) -> Option<PipelineStageStatus> {
        if !stage.branches.is_empty() && !stage.branches.iter().any(|b| b == &self.branch) {
            return Some(PipelineStageStatus::BranchSkipped);
        }
        if stage.approval && !self.approvals.iter().any(|a| a == &stage.id) {
            return Some(PipelineStageStatus::AwaitingApproval);
        }
        None
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub branch: String,
    pub stages: Vec<PipelinePlanStage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlanStage {
    pub id: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Fan-out group; stages sharing a wave run concurrently.
    pub wave: usize,
    pub status: PipelineStageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStageStatus {
    Ready,
    BranchSkipped,
    AwaitingApproval,
    Blocked,
}

pub trait PipelineStageExecutor: Send + Sync {
    fn execute_stage(&self, stage: &PipelineStage) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageResult {
    pub id: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub status: PipelineRunStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<crate::error::Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunResult {
    pub branch: String,
    pub version: String,
    pub stages: Vec<PipelineStageResult>,
    pub status: PipelineRunStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: PipelineRunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSummary {
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Success,
    PartialSuccess,
    Failed,
    Skipped,
}

// =============================================================================
// Declaration
// =============================================================================

fn command_stage(id: &str, needs: &[&str], run: &str) -> PipelineStage {
    let mut config = HashMap::new();
    config.insert("run".to_string(), Value::String(run.to_string()));
    PipelineStage {
        id: id.to_string(),
        stage_type: StageType::Command,
        label: None,
        needs: needs.iter().map(|s| s.to_string()).collect(),
        branches: Vec::new(),
        approval: false,
        config,
    }
}

fn deploy_stage(id: &str, environment: &str, branch: &str) -> PipelineStage {
    let mut config = HashMap::new();
    config.insert(
        "environment".to_string(),
        Value::String(environment.to_string()),
    );
    PipelineStage {
        id: id.to_string(),
        stage_type: StageType::Deploy,
        label: None,
        needs: vec!["integration-test".to_string()],
        branches: vec![branch.to_string()],
        approval: false,
        config,
    }
}

fn on_branches(mut stage: PipelineStage, branches: &[&str]) -> PipelineStage {
    stage.branches = branches.iter().map(|s| s.to_string()).collect();
    stage
}

/// The build/test/deploy graph used when no pipeline file is given.
pub fn default_pipeline() -> Vec<PipelineStage> {
    const RELEASE_BRANCHES: &[&str] = &["main", "develop"];

    let mut deploy_production = deploy_stage("deploy-production", "production", "main");
    deploy_production.approval = true;
    deploy_production.label = Some("Deploy to production (manual approval)".to_string());

    vec![
        command_stage("checkout", &[], "git checkout --quiet {{revision}}"),
        command_stage(
            "install",
            &["checkout"],
            "npm ci --prefix frontend && npm ci --prefix backend",
        ),
        command_stage(
            "lint",
            &["install"],
            "npm run lint --prefix frontend && npm run lint --prefix backend",
        ),
        command_stage(
            "test",
            &["install"],
            "npm test --prefix frontend -- --watchAll=false && npm test --prefix backend",
        ),
        command_stage("build-web", &["lint", "test"], "npm run build --prefix frontend"),
        command_stage("build-backend", &["lint", "test"], "npm run build --prefix backend"),
        command_stage(
            "image-web",
            &["build-web"],
            "docker build -t aws-app-web:{{version}} frontend",
        ),
        command_stage(
            "image-backend",
            &["build-backend"],
            "docker build -t aws-app-backend:{{version}} backend",
        ),
        on_branches(
            command_stage(
                "scan-web",
                &["image-web"],
                "trivy image --exit-code 1 --severity HIGH,CRITICAL aws-app-web:{{version}}",
            ),
            RELEASE_BRANCHES,
        ),
        on_branches(
            command_stage(
                "scan-backend",
                &["image-backend"],
                "trivy image --exit-code 1 --severity HIGH,CRITICAL aws-app-backend:{{version}}",
            ),
            RELEASE_BRANCHES,
        ),
        on_branches(
            command_stage(
                "integration-test",
                &["scan-web", "scan-backend"],
                "docker-compose -f docker-compose.test.yml up --abort-on-container-exit --exit-code-from tests",
            ),
            RELEASE_BRANCHES,
        ),
        deploy_stage("deploy-development", "development", "develop"),
        deploy_production,
    ]
}

/// Read a YAML pipeline file (`stages:` list).
pub fn load(path: &Path) -> Result<Vec<PipelineStage>> {
    let content = io::read_file(path, "read pipeline file")?;
    let file: PipelineFile = serde_yml::from_str(&content).map_err(|e| {
        Error::validation_invalid_argument(
            FIELD,
            format!("Invalid pipeline file {}: {}", path.display(), e),
            None,
            None,
        )
    })?;
    validate(&file.stages)?;
    Ok(file.stages)
}

/// Stage config must be usable before anything runs.
pub fn validate(stages: &[PipelineStage]) -> Result<()> {
    for stage in stages {
        match stage.stage_type {
            StageType::Command => {
                if config_str(stage, "run").is_none() {
                    return Err(stage_config_error(stage, "Command stage needs a 'run' string"));
                }
            }
            StageType::Deploy => {
                let environment = config_str(stage, "environment").ok_or_else(|| {
                    stage_config_error(stage, "Deploy stage needs an 'environment' string")
                })?;
                environment.parse::<Environment>()?;
                if let Some(target) = config_str(stage, "target") {
                    target.parse::<RollbackTarget>()?;
                }
                if let Some(mechanism) = config_str(stage, "mechanism") {
                    mechanism.parse::<DeployMechanism>()?;
                }
            }
        }
    }
    order_stages(stages).map(|_| ())
}

fn config_str<'s>(stage: &'s PipelineStage, key: &str) -> Option<&'s str> {
    stage.config.get(key).and_then(Value::as_str)
}

fn stage_config_error(stage: &PipelineStage, problem: &str) -> Error {
    Error::validation_invalid_argument(FIELD, problem, Some(stage.id.clone()), None)
}

// =============================================================================
// Planning
// =============================================================================

/// Topological order plus the wave (fan-out group) of each stage.
fn order_stages(stages: &[PipelineStage]) -> Result<Vec<(PipelineStage, usize)>> {
    let mut id_index = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if id_index.contains_key(&stage.id) {
            return Err(Error::validation_invalid_argument(
                FIELD,
                format!("Duplicate stage id '{}'", stage.id),
                None,
                None,
            ));
        }
        id_index.insert(stage.id.clone(), idx);
    }

    let mut indegree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];

    for (idx, stage) in stages.iter().enumerate() {
        for need in &stage.needs {
            if let Some(&parent_idx) = id_index.get(need) {
                indegree[idx] += 1;
                dependents[parent_idx].push(idx);
            } else {
                return Err(Error::validation_invalid_argument(
                    FIELD,
                    format!("Stage '{}' depends on unknown stage '{}'", stage.id, need),
                    None,
                    None,
                ));
            }
        }
    }

    let mut wave = vec![0usize; stages.len()];
    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(stages.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push((stages[idx].clone(), wave[idx]));
        for &child in &dependents[idx] {
            wave[child] = wave[child].max(wave[idx] + 1);
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != stages.len() {
        let pending: Vec<String> = stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, stage)| stage.id.clone())
            .collect();
        return Err(Error::validation_invalid_argument(
            FIELD,
            "Stages contain a cycle".to_string(),
            None,
            Some(pending),
        ));
    }

    ordered.sort_by_key(|(_, wave)| *wave);
    Ok(ordered)
}

pub fn plan(stages: &[PipelineStage], ctx: &PipelineContext) -> Result<PipelinePlan> {
    let ordered = order_stages(stages)?;
    let mut statuses: HashMap<String, PipelineStageStatus> = HashMap::new();
    let mut planned = Vec::with_capacity(ordered.len());

    for (stage, wave) in ordered {
        let blocked_by = stage
            .needs
            .iter()
            .find(|need| !matches!(statuses.get(*need), Some(PipelineStageStatus::Ready)))
            .cloned();

        let status = match (ctx.gate(&stage), &blocked_by) {
            (Some(gated), _) => gated,
            (None, Some(_)) => PipelineStageStatus::Blocked,
            (None, None) => PipelineStageStatus::Ready,
        };
        statuses.insert(stage.id.clone(), status);

        planned.push(PipelinePlanStage {
            id: stage.id,
            stage_type: stage.stage_type,
            label: stage.label,
            needs: stage.needs,
            wave,
            status,
            blocked_by: if status == PipelineStageStatus::Blocked {
                blocked_by
            } else {
                None
            },
        });
    }

    let mut warnings = Vec::new();
    if planned
        .iter()
        .any(|s| s.status == PipelineStageStatus::AwaitingApproval)
    {
        warnings.push("Some stages wait for manual approval; pass --approve <stage>".to_string());
    }

    Ok(PipelinePlan {
        branch: ctx.branch.clone(),
        stages: planned,
        warnings,
    })
}

// =============================================================================
// Running
// =============================================================================

pub fn run(
    stages: &[PipelineStage],
    ctx: &PipelineContext,
    executor: Arc<dyn PipelineStageExecutor>,
) -> Result<PipelineRunResult> {
    let version = ctx.version()?;
    let ordered = order_stages(stages)?;
    let mut results: Vec<PipelineStageResult> = Vec::with_capacity(ordered.len());
    let mut pending: Vec<PipelineStage> = Vec::new();

    for (stage, _) in ordered {
        match ctx.gate(&stage) {
            Some(PipelineStageStatus::BranchSkipped) => results.push(skipped(
                &stage,
                format!("Not run on branch '{}'", ctx.branch),
            )),
            Some(_) => results.push(skipped(&stage, "Awaiting manual approval".to_string())),
            None => pending.push(stage),
        }
    }

    while !pending.is_empty() {
        let (ready, blocked, skipped_now) = split_ready_stages(&pending, &results);
        results.extend(skipped_now);

        if ready.is_empty() {
            if blocked.is_empty() {
                break;
            }
            return Err(Error::validation_invalid_argument(
                FIELD,
                "Stages blocked by unresolved dependencies".to_string(),
                None,
                Some(blocked.iter().map(|s| s.id.clone()).collect()),
            ));
        }

        log_status!(
            "pipeline",
            "Running {}",
            ready.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().join(", ")
        );
        results.extend(execute_batch(&ready, Arc::clone(&executor))?);
        pending = blocked;
    }

    let status = derive_overall_status(&results);
    let summary = build_summary(&results, status);

    Ok(PipelineRunResult {
        branch: ctx.branch.clone(),
        version: version.to_string(),
        stages: results,
        status,
        warnings: Vec::new(),
        summary,
    })
}

fn skipped(stage: &PipelineStage, reason: String) -> PipelineStageResult {
    PipelineStageResult {
        id: stage.id.clone(),
        stage_type: stage.stage_type,
        status: PipelineRunStatus::Skipped,
        warnings: vec![reason],
        hints: Vec::new(),
        data: None,
        error: None,
    }
}

fn split_ready_stages(
    pending: &[PipelineStage],
    results: &[PipelineStageResult],
) -> (
    Vec<PipelineStage>,
    Vec<PipelineStage>,
    Vec<PipelineStageResult>,
) {
    let mut ready = Vec::new();
    let mut blocked = Vec::new();
    let mut skipped_now = Vec::new();

    let mut status_map: HashMap<String, PipelineRunStatus> = results
        .iter()
        .map(|result| (result.id.clone(), result.status))
        .collect();

    for stage in pending {
        let mut unmet = false;
        let mut failed_dependency: Option<String> = None;

        for need in &stage.needs {
            match status_map.get(need) {
                Some(PipelineRunStatus::Success) | Some(PipelineRunStatus::PartialSuccess) => {}
                Some(PipelineRunStatus::Failed) | Some(PipelineRunStatus::Skipped) => {
                    failed_dependency = Some(need.clone());
                    break;
                }
                None => unmet = true,
            }
        }

        if let Some(dep) = failed_dependency {
            status_map.insert(stage.id.clone(), PipelineRunStatus::Skipped);
            skipped_now.push(skipped(
                stage,
                format!("Skipped because '{}' did not succeed", dep),
            ));
            continue;
        }

        if unmet {
            blocked.push(stage.clone());
        } else {
            ready.push(stage.clone());
        }
    }

    (ready, blocked, skipped_now)
}

fn derive_overall_status(results: &[PipelineStageResult]) -> PipelineRunStatus {
    let has_success = results
        .iter()
        .any(|r| r.status == PipelineRunStatus::Success);
    let has_failed = results
        .iter()
        .any(|r| r.status == PipelineRunStatus::Failed);

    match (has_failed, has_success) {
        (true, true) => PipelineRunStatus::PartialSuccess,
        (true, false) => PipelineRunStatus::Failed,
        (false, true) => PipelineRunStatus::Success,
        (false, false) => PipelineRunStatus::Skipped,
    }
}

fn build_summary(results: &[PipelineStageResult], status: PipelineRunStatus) -> PipelineRunSummary {
    let count = |wanted: PipelineRunStatus| results.iter().filter(|r| r.status == wanted).count();

    let mut next_actions = Vec::new();
    if matches!(
        status,
        PipelineRunStatus::PartialSuccess | PipelineRunStatus::Failed
    ) {
        next_actions.push("Fix the failing stage and re-run the pipeline".to_string());
    }
    if results.iter().any(|r| {
        r.warnings
            .iter()
            .any(|w| w.starts_with("Awaiting manual approval"))
    }) {
        next_actions.push("Re-run with --approve <stage> to release approval gates".to_string());
    }

    PipelineRunSummary {
        total_stages: results.len(),
        succeeded: count(PipelineRunStatus::Success),
        failed: count(PipelineRunStatus::Failed),
        skipped: count(PipelineRunStatus::Skipped),
        next_actions,
    }
}

fn execute_batch(
    stages: &[PipelineStage],
    executor: Arc<dyn PipelineStageExecutor>,
) -> Result<Vec<PipelineStageResult>> {
    if stages.len() <= 1 {
        return Ok(stages
            .first()
            .map(|stage| vec![execute_single_stage(stage.clone(), executor.as_ref())])
            .unwrap_or_default());
    }

    use std::thread;

    let handles: Vec<_> = stages
        .iter()
        .map(|stage| {
            let stage = stage.clone();
            let executor = Arc::clone(&executor);
            thread::spawn(move || execute_single_stage(stage, executor.as_ref()))
        })
        .collect();

    let mut results = Vec::with_capacity(stages.len());
    for handle in handles {
        results.push(handle.join().map_err(|_| {
            Error::internal_unexpected("Stage execution thread panicked".to_string())
        })?);
    }

    Ok(results)
}

fn execute_single_stage(
    stage: PipelineStage,
    executor: &dyn PipelineStageExecutor,
) -> PipelineStageResult {
    match executor.execute_stage(&stage) {
        Ok(data) => PipelineStageResult {
            id: stage.id,
            stage_type: stage.stage_type,
            status: PipelineRunStatus::Success,
            warnings: Vec::new(),
            hints: Vec::new(),
            data: Some(data),
            error: None,
        },
        Err(err) => PipelineStageResult {
            id: stage.id,
            stage_type: stage.stage_type,
            status: PipelineRunStatus::Failed,
            warnings: Vec::new(),
            hints: err.hints.clone(),
            data: Some(err.details.clone()),
            error: Some(err.message.clone()),
        },
    }
}

// =============================================================================
// Local stage execution
// =============================================================================

/// Runs command stages through `sh -c` and deploy stages through the dispatcher.
pub struct LocalStageExecutor {
    pub context: PipelineContext,
    pub settings: DeploySettings,
    pub executor: Arc<dyn Executor>,
    pub probe: Arc<dyn HealthProbe>,
    pub dry_run: bool,
}

impl LocalStageExecutor {
    fn run_command(&self, stage: &PipelineStage) -> Result<Value> {
        let template = config_str(stage, "run")
            .ok_or_else(|| stage_config_error(stage, "Command stage needs a 'run' string"))?;
        let command = render_map(template, &self.context.variables()?);

        let output = run_checked(
            self.executor.as_ref(),
            &Invocation::new("sh", ["-c", command.as_str()]),
            &stage.id,
        )?;

        Ok(json!({ "command": command, "exitCode": output.exit_code }))
    }

    fn run_deploy(&self, stage: &PipelineStage) -> Result<Value> {
        let environment: Environment = config_str(stage, "environment")
            .ok_or_else(|| stage_config_error(stage, "Deploy stage needs an 'environment' string"))?
            .parse()?;

        let mut request =
            DeployRequest::new(environment, self.context.version()?, &self.settings);
        if let Some(target) = config_str(stage, "target") {
            request.rollback_target = target.parse()?;
        }
        if let Some(mechanism) = config_str(stage, "mechanism") {
            request.mechanism = mechanism.parse()?;
        }

        let ctx = DeployContext {
            settings: &self.settings,
            executor: self.executor.as_ref(),
            probe: self.probe.as_ref(),
            dry_run: self.dry_run,
        };
        let report = deploy::run(&request, &ctx)?;
        serde_json::to_value(report)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize deploy report".to_string())))
    }
}

impl PipelineStageExecutor for LocalStageExecutor {
    fn execute_stage(&self, stage: &PipelineStage) -> Result<Value> {
        match stage.stage_type {
            StageType::Command => self.run_command(stage),
            StageType::Deploy => self.run_deploy(stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ctx(branch: &str, approvals: &[&str]) -> PipelineContext {
        PipelineContext {
            branch: branch.to_string(),
            build_number: 42,
            revision: "abc1234def".to_string(),
            approvals: approvals.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn status_of(plan: &PipelinePlan, id: &str) -> PipelineStageStatus {
        plan.stages.iter().find(|s| s.id == id).unwrap().status
    }

    /// Records stage ids and fails the ones listed.
    struct ScriptedStages {
        ran: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl ScriptedStages {
        fn new(fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                ran: Mutex::new(Vec::new()),
                fail: fail.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    impl PipelineStageExecutor for ScriptedStages {
        fn execute_stage(&self, stage: &PipelineStage) -> Result<Value> {
            self.ran.lock().unwrap().push(stage.id.clone());
            if self.fail.contains(&stage.id) {
                return Err(Error::internal_unexpected("boom"));
            }
            Ok(json!({}))
        }
    }

    #[test]
    fn branch_and_revision_are_quoted_in_commands() {
        let recorder = Arc::new(crate::executor::RecordingExecutor::new());
        let mut context = ctx("feat;rm -rf x", &[]);
        context.revision = "abc1234$(id)".to_string();
        let local = LocalStageExecutor {
            context,
            settings: DeploySettings::default(),
            executor: recorder.clone(),
            probe: Arc::new(crate::health::SkippedProbe),
            dry_run: true,
        };

        local
            .execute_stage(&command_stage("echo", &[], "echo {{branch}} {{revision}}"))
            .unwrap();

        let invocation = &recorder.invocations()[0];
        assert_eq!(invocation.program, "sh");
        assert_eq!(invocation.args[1], "echo 'feat;rm -rf x' 'abc1234$(id)'");
    }

    #[test]
    fn default_pipeline_is_valid() {
        validate(&default_pipeline()).unwrap();
    }

    #[test]
    fn fan_out_groups_share_a_wave() {
        let plan = plan(&default_pipeline(), &ctx("develop", &[])).unwrap();
        let wave = |id: &str| plan.stages.iter().find(|s| s.id == id).unwrap().wave;

        assert_eq!(wave("checkout"), 0);
        assert_eq!(wave("install"), 1);
        assert_eq!(wave("lint"), wave("test"));
        assert_eq!(wave("build-web"), wave("build-backend"));
        assert_eq!(wave("image-web"), wave("image-backend"));
        assert_eq!(wave("scan-web"), wave("scan-backend"));
        assert!(wave("integration-test") > wave("scan-web"));
    }

    #[test]
    fn feature_branch_skips_scans_and_deploys() {
        let plan = plan(&default_pipeline(), &ctx("feature/login", &[])).unwrap();

        assert_eq!(status_of(&plan, "image-web"), PipelineStageStatus::Ready);
        assert_eq!(status_of(&plan, "scan-web"), PipelineStageStatus::BranchSkipped);
        assert_eq!(status_of(&plan, "integration-test"), PipelineStageStatus::BranchSkipped);
        assert_eq!(status_of(&plan, "deploy-development"), PipelineStageStatus::BranchSkipped);
    }

    #[test]
    fn production_deploy_waits_for_approval() {
        let waiting = plan(&default_pipeline(), &ctx("main", &[])).unwrap();
        assert_eq!(
            status_of(&waiting, "deploy-production"),
            PipelineStageStatus::AwaitingApproval
        );
        assert!(!waiting.warnings.is_empty());

        let approved = plan(&default_pipeline(), &ctx("main", &["deploy-production"])).unwrap();
        assert_eq!(status_of(&approved, "deploy-production"), PipelineStageStatus::Ready);
        assert_eq!(
            status_of(&approved, "deploy-development"),
            PipelineStageStatus::BranchSkipped
        );
    }

    #[test]
    fn cycle_and_unknown_dependency_are_rejected() {
        let mut a = command_stage("a", &["b"], "true");
        let b = command_stage("b", &["a"], "true");
        let err = order_stages(&[a.clone(), b]).unwrap_err();
        assert_eq!(err.details["tried"].as_array().unwrap().len(), 2);

        a.needs = vec!["missing".to_string()];
        assert!(order_stages(&[a]).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let a = command_stage("a", &[], "true");
        assert!(validate(&[a.clone(), a]).is_err());
    }

    #[test]
    fn deploy_stage_with_bad_environment_is_rejected() {
        let mut stage = deploy_stage("d", "staging", "main");
        stage.needs.clear();
        let err = validate(&[stage]).unwrap_err();
        assert_eq!(err.details["id"], "staging");
    }

    #[test]
    fn failed_stage_skips_dependents() {
        let stages = vec![
            command_stage("build", &[], "true"),
            command_stage("test", &["build"], "true"),
            command_stage("lint", &[], "true"),
        ];
        let exec = ScriptedStages::new(&["build"]);

        let result = run(&stages, &ctx("develop", &[]), exec.clone()).unwrap();

        assert_eq!(result.status, PipelineRunStatus::PartialSuccess);
        let test = result.stages.iter().find(|s| s.id == "test").unwrap();
        assert_eq!(test.status, PipelineRunStatus::Skipped);
        assert!(!exec.ran.lock().unwrap().contains(&"test".to_string()));
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.skipped, 1);
    }

    #[test]
    fn unapproved_production_deploy_never_runs() {
        let exec = ScriptedStages::new(&[]);

        let result = run(&default_pipeline(), &ctx("main", &[]), exec.clone()).unwrap();

        let ran = exec.ran.lock().unwrap().clone();
        assert!(ran.contains(&"integration-test".to_string()));
        assert!(!ran.contains(&"deploy-production".to_string()));
        assert!(!ran.contains(&"deploy-development".to_string()));
        assert_eq!(result.status, PipelineRunStatus::Success);
        assert!(!result.summary.next_actions.is_empty());
        assert_eq!(result.version, "42-abc1234");
    }
}
