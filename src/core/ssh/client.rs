use std::path::Path;

use crate::defaults::Ec2Settings;
use crate::error::{Error, Result};
use crate::executor::Invocation;

/// A remote host reached with one non-interactive `ssh` invocation per script.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
}

impl SshTarget {
    /// Resolve the EC2 host settings, expanding `~` in the key path.
    ///
    /// With `check_key`, a key path that does not exist is an error.
    pub fn from_settings(settings: &Ec2Settings, check_key: bool) -> Result<Self> {
        let host = settings
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config_missing_key("ec2.host", Some("EC2_HOST".to_string())))?;

        let identity_file = if settings.key_path.is_empty() {
            None
        } else {
            let expanded = shellexpand::tilde(&settings.key_path).to_string();
            if check_key && !Path::new(&expanded).exists() {
                return Err(Error::ssh_identity_file_not_found(expanded));
            }
            Some(expanded)
        };

        Ok(Self {
            host,
            user: settings.user.clone(),
            port: settings.port,
            identity_file,
        })
    }

    fn build_ssh_args(&self, script: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never wait on a password or host-key prompt.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(script.to_string());

        args
    }

    /// The single `ssh` call that runs `script` on the host.
    pub fn invocation(&self, script: &str) -> Invocation {
        Invocation::new("ssh", self.build_ssh_args(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn settings(host: Option<&str>, key_path: &str) -> Ec2Settings {
        Ec2Settings {
            host: host.map(str::to_string),
            user: "ec2-user".to_string(),
            key_path: key_path.to_string(),
            port: 22,
            app_dir: "/home/ec2-user/app".to_string(),
        }
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let err = SshTarget::from_settings(&settings(None, ""), false).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
        assert_eq!(err.details["envVar"], "EC2_HOST");
    }

    #[test]
    fn missing_key_file_is_reported_when_checked() {
        let err = SshTarget::from_settings(&settings(Some("h"), "/nonexistent/key.pem"), true)
            .unwrap_err();
        assert_eq!(err.code.as_str(), "ssh.identity_file_not_found");
    }

    #[test]
    fn unchecked_key_file_is_kept_as_is() {
        let target = SshTarget::from_settings(&settings(Some("h"), "/nonexistent/key.pem"), false)
            .unwrap();
        assert_eq!(target.identity_file.as_deref(), Some("/nonexistent/key.pem"));
    }

    #[test]
    fn invocation_is_batch_mode_with_key() {
        let key = NamedTempFile::new().unwrap();
        let key_path = key.path().display().to_string();
        let target =
            SshTarget::from_settings(&settings(Some("10.0.0.5"), &key_path), true).unwrap();

        let inv = target.invocation("docker image prune -f");

        assert_eq!(inv.program, "ssh");
        assert_eq!(inv.args[0], "-i");
        assert_eq!(inv.args[1], key_path);
        assert!(inv.args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(inv.args[inv.args.len() - 2], "ec2-user@10.0.0.5");
        assert_eq!(inv.args.last().unwrap(), "docker image prune -f");
    }

    #[test]
    fn non_default_port_is_passed() {
        let mut s = settings(Some("h"), "");
        s.port = 2222;
        let inv = SshTarget::from_settings(&s, false).unwrap().invocation("true");
        assert!(inv.args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
    }
}
