pub type CmdResult<T> = deployctl::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod deploy;
pub mod pipeline;
pub mod version_label;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        deployctl::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deployctl::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::VersionLabel(args) => dispatch!(args, global, version_label),
        crate::Commands::Pipeline(args) => dispatch!(args, global, pipeline),
    }
}
