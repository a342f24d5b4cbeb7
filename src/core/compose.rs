//! Image tag substitution in the compose file.
//!
//! Only the tag portion of `image: <name>:<tag>` lines is touched. Every
//! other byte of the file, including indentation and line endings, is kept.

use std::fs;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::utils::{io, shell};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRewrite {
    pub image: String,
    pub replaced: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRewrite {
    pub path: String,
    pub backup_path: String,
    pub version: String,
    pub images: Vec<ImageRewrite>,
}

fn image_line_pattern(image: &str) -> Result<Regex> {
    let pattern = format!(r"(?m)^([ \t]*image:[ \t]*){}:\S*", regex::escape(image));
    Regex::new(&pattern).map_err(|e| {
        Error::config_invalid_value("images", Some(image.to_string()), e.to_string())
    })
}

/// Point every `image: <name>:<tag>` line for `images` at `version`.
///
/// Returns the rewritten content and how many lines matched per image.
pub fn rewrite_image_tags(
    content: &str,
    images: &[String],
    version: &str,
) -> Result<(String, Vec<ImageRewrite>)> {
    let mut result = content.to_string();
    let mut rewrites = Vec::with_capacity(images.len());

    for image in images {
        let pattern = image_line_pattern(image)?;
        let replaced = pattern.find_iter(&result).count();
        result = pattern
            .replace_all(&result, |caps: &Captures| {
                format!("{}{}:{}", &caps[1], image, version)
            })
            .into_owned();
        rewrites.push(ImageRewrite {
            image: image.clone(),
            replaced,
        });
    }

    Ok((result, rewrites))
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn plan(path: &Path, images: &[String], version: &str) -> Result<(String, ComposeRewrite)> {
    if !path.is_file() {
        return Err(Error::compose_file_not_found(path.display().to_string()));
    }

    let content = io::read_file(path, "read compose file")?;
    let (updated, rewrites) = rewrite_image_tags(&content, images, version)?;

    let missing: Vec<String> = rewrites
        .iter()
        .filter(|r| r.replaced == 0)
        .map(|r| r.image.clone())
        .collect();
    if !missing.is_empty() {
        return Err(Error::compose_image_line_missing(
            path.display().to_string(),
            missing,
        ));
    }

    let rewrite = ComposeRewrite {
        path: path.display().to_string(),
        backup_path: backup_path(path).display().to_string(),
        version: version.to_string(),
        images: rewrites,
    };
    Ok((updated, rewrite))
}

/// Validate the rewrite without touching the file.
pub fn preview(path: &Path, images: &[String], version: &str) -> Result<ComposeRewrite> {
    plan(path, images, version).map(|(_, rewrite)| rewrite)
}

/// Rewrite the compose file in place, keeping a `.bak` copy of the original.
///
/// Nothing is written when any image has no matching line.
pub fn apply(path: &Path, images: &[String], version: &str) -> Result<ComposeRewrite> {
    let (updated, rewrite) = plan(path, images, version)?;

    fs::copy(path, backup_path(path)).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("back up {}", path.display())))
    })?;
    io::write_file_atomic(path, &updated, "write compose file")?;

    Ok(rewrite)
}

/// `sed` command performing the same rewrite on a remote host.
///
/// With a registry, lines are pointed at `<registry>/<image>:<version>` so the
/// host runs the images it just pulled.
pub fn remote_rewrite_command(
    path: &str,
    images: &[String],
    registry: Option<&str>,
    version: &str,
) -> String {
    let mut args = vec!["sed".to_string(), "-i.bak".to_string(), "-E".to_string()];

    for image in images {
        let reference = match registry {
            Some(registry) => format!("{}/{}", registry.trim_end_matches('/'), image),
            None => image.clone(),
        };
        let expression = format!(
            r"s|^([[:space:]]*image:[[:space:]]*)([^[:space:]]*/)?{}:[^[:space:]]*|\1{}:{}|",
            shell::escape_sed_regex(image),
            shell::escape_sed_replacement(&reference),
            shell::escape_sed_replacement(version)
        );
        args.push("-e".to_string());
        args.push(expression);
    }

    args.push(path.to_string());
    shell::quote_args(&args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPOSE: &str = "version: '3.8'\nservices:\n  web:\n    image: aws-app-web:41-0000000\n    ports:\n      - \"80:80\"\n  backend:\n    image: aws-app-backend:41-0000000\n    environment:\n      - NODE_ENV=production\n";

    fn images() -> Vec<String> {
        vec!["aws-app-web".to_string(), "aws-app-backend".to_string()]
    }

    #[test]
    fn rewrites_only_tags() {
        let (updated, rewrites) = rewrite_image_tags(COMPOSE, &images(), "42-abc1234").unwrap();

        assert_eq!(
            updated,
            COMPOSE
                .replace("aws-app-web:41-0000000", "aws-app-web:42-abc1234")
                .replace("aws-app-backend:41-0000000", "aws-app-backend:42-abc1234")
        );
        assert!(rewrites.iter().all(|r| r.replaced == 1));
    }

    #[test]
    fn does_not_touch_similarly_named_images() {
        let content = "    image: aws-app-web-worker:1\n    image: aws-app-web:1\n";
        let (updated, rewrites) =
            rewrite_image_tags(content, &["aws-app-web".to_string()], "2").unwrap();
        assert_eq!(updated, "    image: aws-app-web-worker:1\n    image: aws-app-web:2\n");
        assert_eq!(rewrites[0].replaced, 1);
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let content = "  image: aws-app-web:1\r\n  image: aws-app-backend:1\r\n";
        let (updated, _) = rewrite_image_tags(content, &images(), "9").unwrap();
        assert_eq!(updated, "  image: aws-app-web:9\r\n  image: aws-app-backend:9\r\n");
    }

    #[test]
    fn version_is_inserted_literally() {
        let (updated, _) =
            rewrite_image_tags("image: aws-app-web:1\n", &["aws-app-web".to_string()], "$1").unwrap();
        assert_eq!(updated, "image: aws-app-web:$1\n");
    }

    #[test]
    fn apply_writes_backup_and_new_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, COMPOSE).unwrap();

        let rewrite = apply(&path, &images(), "42-abc1234").unwrap();

        let updated = fs::read_to_string(&path).unwrap();
        assert!(updated.contains("image: aws-app-web:42-abc1234"));
        assert!(updated.contains("image: aws-app-backend:42-abc1234"));
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), COMPOSE);
        assert_eq!(rewrite.images.len(), 2);
    }

    #[test]
    fn preview_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, COMPOSE).unwrap();

        let rewrite = preview(&path, &images(), "42-abc1234").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), COMPOSE);
        assert!(!backup_path(&path).exists());
        assert!(rewrite.images.iter().all(|r| r.replaced == 1));
    }

    #[test]
    fn apply_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = apply(&dir.path().join("missing.yml"), &images(), "1").unwrap_err();
        assert_eq!(err.code.as_str(), "compose.file_not_found");
    }

    #[test]
    fn apply_refuses_format_drift_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker-compose.yml");
        let drifted = "services:\n  web:\n    image: aws-app-frontend:1\n  backend:\n    image: aws-app-backend:1\n";
        fs::write(&path, drifted).unwrap();

        let err = apply(&path, &images(), "2").unwrap_err();

        assert_eq!(err.code.as_str(), "compose.image_line_missing");
        assert_eq!(err.details["images"][0], "aws-app-web");
        assert_eq!(fs::read_to_string(&path).unwrap(), drifted);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn remote_command_targets_registry_images() {
        let cmd = remote_rewrite_command(
            "docker-compose.yml",
            &images(),
            Some("123.dkr.ecr.us-east-1.amazonaws.com"),
            "42-abc1234",
        );
        assert!(cmd.starts_with("sed -i.bak -E -e "));
        assert!(cmd.contains("123.dkr.ecr.us-east-1.amazonaws.com/aws-app-web:42-abc1234"));
        assert!(cmd.contains("aws-app-backend:42-abc1234"));
        assert!(cmd.ends_with(" docker-compose.yml"));
    }

    #[test]
    fn remote_command_escapes_replacement_text() {
        let cmd = remote_rewrite_command("docker-compose.yml", &images(), Some("reg|x"), "v1&x");
        assert!(cmd.contains(r"reg\|x/aws-app-web:v1\&x"));
    }

    #[test]
    fn remote_command_writes_version_literally() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), COMPOSE).unwrap();

        let cmd = remote_rewrite_command("docker-compose.yml", &images(), None, "v1&x");
        let status = std::process::Command::new("sh")
            .args(["-c", &cmd])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());

        let content = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(content.contains("    image: aws-app-web:v1&x\n"));
        assert!(content.contains("    image: aws-app-backend:v1&x\n"));
    }
}
