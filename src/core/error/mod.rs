use serde::{Deserialize, Serialize};
use serde_json::Value;

mod codes;

pub use codes::all_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    ComposeFileNotFound,
    ComposeImageLineMissing,

    SshIdentityFileNotFound,

    DeployCommandFailed,
    DeployHealthCheckFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::ComposeFileNotFound => "compose.file_not_found",
            ErrorCode::ComposeImageLineMissing => "compose.image_line_missing",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",

            ErrorCode::DeployCommandFailed => "deploy.command_failed",
            ErrorCode::DeployHealthCheckFailed => "deploy.health_check_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeImageLineMissingDetails {
    pub path: String,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub step: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckFailedDetails {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, env_var: Option<String>) -> Self {
        let key = key.into();
        let hint = match &env_var {
            Some(var) => format!("Set {} or add '{}' to deployctl.json", var, key),
            None => format!("Add '{}' to deployctl.json", key),
        };

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            to_details(ConfigMissingKeyDetails { key, env_var }),
        )
        .with_hint(hint)
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn compose_file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ComposeFileNotFound,
            format!("Compose file not found: {}", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Run from the directory containing the compose file or set composeFile in deployctl.json")
    }

    pub fn compose_image_line_missing(path: impl Into<String>, images: Vec<String>) -> Self {
        let path = path.into();
        let message = format!(
            "No 'image: <name>:<tag>' line found in {} for: {}",
            path,
            images.join(", ")
        );

        Self::new(
            ErrorCode::ComposeImageLineMissing,
            message,
            to_details(ComposeImageLineMissingDetails { path, images }),
        )
    }

    pub fn ssh_identity_file_not_found(identity_file: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            serde_json::json!({ "identityFile": identity_file.into() }),
        )
        .with_hint("Set EC2_KEY_PATH to an existing private key")
    }

    pub fn command_failed(details: CommandFailedDetails) -> Self {
        let message = format!("Step '{}' failed with exit code {}", details.step, details.exit_code);
        Self::new(ErrorCode::DeployCommandFailed, message, to_details(details))
    }

    pub fn health_check_failed(details: HealthCheckFailedDetails) -> Self {
        let message = match (&details.status_code, &details.error) {
            (Some(status), _) => format!("Health check at {} returned HTTP {}", details.url, status),
            (None, Some(err)) => format!("Health check at {} failed: {}", details.url, err),
            (None, None) => format!("Health check at {} failed", details.url),
        };

        Self::new(
            ErrorCode::DeployHealthCheckFailed,
            message,
            to_details(details),
        )
        .with_hint("Inspect the service logs with 'docker-compose logs'")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Exit status of the failed external command, when this error wraps one.
    pub fn command_exit_code(&self) -> Option<i32> {
        if self.code != ErrorCode::DeployCommandFailed {
            return None;
        }
        self.details
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_exposes_exit_code() {
        let err = Error::command_failed(CommandFailedDetails {
            step: "push-web".to_string(),
            command: "docker push x".to_string(),
            exit_code: 125,
            stdout: String::new(),
            stderr: "denied".to_string(),
        });

        assert_eq!(err.code.as_str(), "deploy.command_failed");
        assert_eq!(err.command_exit_code(), Some(125));
        assert!(err.message.contains("push-web"));
    }

    #[test]
    fn other_errors_have_no_command_exit_code() {
        let err = Error::compose_file_not_found("docker-compose.yml");
        assert_eq!(err.command_exit_code(), None);
    }

    #[test]
    fn health_check_message_prefers_status_code() {
        let err = Error::health_check_failed(HealthCheckFailedDetails {
            url: "http://localhost:3000/health".to_string(),
            status_code: Some(503),
            error: None,
        });
        assert!(err.message.contains("HTTP 503"));
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn config_missing_key_hints_at_env_var() {
        let err = Error::config_missing_key("registry", Some("ECR_REGISTRY".to_string()));
        assert_eq!(err.details["envVar"], "ECR_REGISTRY");
        assert!(err.hints[0].message.contains("ECR_REGISTRY"));
    }
}
