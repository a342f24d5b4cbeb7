use clap::Args;
use serde::Serialize;

use deployctl::version::{current_revision, VersionLabel};

use super::CmdResult;

#[derive(Args)]
pub struct VersionLabelArgs {
    /// CI build number
    #[arg(long)]
    pub build_number: u64,

    /// Commit hash (defaults to `git rev-parse HEAD`)
    #[arg(long)]
    pub revision: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionLabelOutput {
    pub version: VersionLabel,
    pub build_number: u64,
    pub revision: String,
}

pub fn run(
    args: VersionLabelArgs,
    _global: &crate::commands::GlobalArgs,
) -> CmdResult<VersionLabelOutput> {
    let revision = match args.revision {
        Some(revision) => revision,
        None => current_revision()?,
    };
    let version = VersionLabel::from_build(args.build_number, &revision)?;

    Ok((
        VersionLabelOutput {
            version,
            build_number: args.build_number,
            revision,
        },
        0,
    ))
}
