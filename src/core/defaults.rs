use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::environment::{DeployMechanism, RollbackTarget};
use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "deployctl.json";

/// Root configuration structure for deployctl.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeployctlConfig {
    #[serde(default)]
    pub deploy: DeploySettings,
}

/// Everything the dispatcher needs besides the environment name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySettings {
    #[serde(default = "default_region")]
    pub region: String,

    /// Registry endpoint, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default)]
    pub mechanism: DeployMechanism,

    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    #[serde(default = "default_images")]
    pub images: ImageNames,

    #[serde(default = "default_health")]
    pub health: HealthSettings,

    #[serde(default = "default_ecs")]
    pub ecs: EcsSettings,

    #[serde(default = "default_ec2")]
    pub ec2: Ec2Settings,

    #[serde(default)]
    pub rollback_target: RollbackTarget,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            registry: None,
            mechanism: DeployMechanism::default(),
            compose_file: default_compose_file(),
            images: default_images(),
            health: default_health(),
            ecs: default_ecs(),
            ec2: default_ec2(),
            rollback_target: RollbackTarget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageNames {
    #[serde(default = "default_web_image")]
    pub web: String,
    #[serde(default = "default_backend_image")]
    pub backend: String,
}

impl ImageNames {
    /// Web first, then backend; every procedure walks images in this order.
    pub fn all(&self) -> Vec<String> {
        vec![self.web.clone(), self.backend.clone()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSettings {
    #[serde(default = "default_health_url")]
    pub url: String,
    #[serde(default = "default_health_delay")]
    pub delay_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsSettings {
    #[serde(default = "default_ecs_cluster")]
    pub cluster: String,
    #[serde(default = "default_web_service")]
    pub web_service: String,
    #[serde(default = "default_backend_service")]
    pub backend_service: String,
    /// Services reverted by a production rollback, each pinned to `<taskFamily>:<version>`.
    #[serde(default = "default_rollback_services")]
    pub rollback_services: Vec<RollbackService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackService {
    pub service: String,
    pub task_family: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ec2Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_ec2_user")]
    pub user: String,
    #[serde(default = "default_ec2_key_path")]
    pub key_path: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ec2_app_dir")]
    pub app_dir: String,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

fn default_images() -> ImageNames {
    ImageNames {
        web: default_web_image(),
        backend: default_backend_image(),
    }
}

fn default_web_image() -> String {
    "aws-app-web".to_string()
}

fn default_backend_image() -> String {
    "aws-app-backend".to_string()
}

fn default_health() -> HealthSettings {
    HealthSettings {
        url: default_health_url(),
        delay_secs: default_health_delay(),
        timeout_secs: default_health_timeout(),
    }
}

fn default_health_url() -> String {
    "http://localhost:3000/health".to_string()
}

fn default_health_delay() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    10
}

fn default_ecs() -> EcsSettings {
    EcsSettings {
        cluster: default_ecs_cluster(),
        web_service: default_web_service(),
        backend_service: default_backend_service(),
        rollback_services: default_rollback_services(),
    }
}

fn default_ecs_cluster() -> String {
    "aws-app-cluster".to_string()
}

fn default_web_service() -> String {
    "aws-app-web-service".to_string()
}

fn default_backend_service() -> String {
    "aws-app-backend-service".to_string()
}

fn default_rollback_services() -> Vec<RollbackService> {
    vec![
        RollbackService {
            service: default_web_service(),
            task_family: default_web_image(),
        },
        RollbackService {
            service: default_backend_service(),
            task_family: default_backend_image(),
        },
    ]
}

fn default_ec2() -> Ec2Settings {
    Ec2Settings {
        host: None,
        user: default_ec2_user(),
        key_path: default_ec2_key_path(),
        port: default_ssh_port(),
        app_dir: default_ec2_app_dir(),
    }
}

fn default_ec2_user() -> String {
    "ec2-user".to_string()
}

fn default_ec2_key_path() -> String {
    "~/.ssh/id_rsa".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ec2_app_dir() -> String {
    "/home/ec2-user/app".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load config from `path`, or from `deployctl.json` in the working directory.
///
/// A missing default file yields built-in defaults; a missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<DeployctlConfig> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(CONFIG_FILE), false),
    };

    if !path.exists() {
        if explicit {
            return Err(Error::config_invalid_value(
                "config",
                Some(path.display().to_string()),
                "Config file does not exist",
            ));
        }
        return Ok(DeployctlConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

/// Apply environment-variable overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(settings: &mut DeploySettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(region) = get("AWS_REGION") {
        settings.region = region;
    }
    if let Some(registry) = get("ECR_REGISTRY") {
        settings.registry = Some(registry);
    }
    if let Some(method) = get("DEPLOY_METHOD") {
        settings.mechanism = method.parse()?;
    }
    if let Some(host) = get("EC2_HOST") {
        settings.ec2.host = Some(host);
    }
    if let Some(user) = get("EC2_USER") {
        settings.ec2.user = user;
    }
    if let Some(key_path) = get("EC2_KEY_PATH") {
        settings.ec2.key_path = key_path;
    }
    if let Some(target) = get("ROLLBACK_TARGET") {
        settings.rollback_target = target.parse()?;
    }

    Ok(())
}

/// Config file plus process environment.
pub fn load_settings(path: Option<&Path>) -> Result<DeploySettings> {
    let mut settings = load_config(path)?.deploy;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}
