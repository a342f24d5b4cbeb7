use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;

use commands::{deploy, pipeline, version_label};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deployctl")]
#[command(version = VERSION)]
#[command(about = "Deploy the web and backend images to development, production or a rollback target")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a version to an environment
    Deploy(deploy::DeployArgs),
    /// Compute the image version label for a build
    VersionLabel(version_label::VersionLabelArgs),
    /// Plan or run the CI pipeline
    Pipeline(pipeline::PipelineArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    if let Err(err) = deployctl::output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
