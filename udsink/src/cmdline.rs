use clap::{ArgMatches, Command};

use udsink_core::Flavor;

const HTTP: &str = "http";
const ARGO_WORKFLOW: &str = "argo-workflow";
const PROMETHEUS_PUSHER: &str = "prometheus-pusher";

pub(super) fn root_cli() -> Command {
    Command::new("udsink")
        .author("Numaflow Authors")
        .about("User-defined sinks delivering batches to external systems")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_http_subcommand())
        .subcommand(add_argo_workflow_subcommand())
        .subcommand(add_prometheus_pusher_subcommand())
}

fn add_http_subcommand() -> Command {
    Command::new(HTTP).about("Sends every batch as a JSON array to an HTTP endpoint")
}

fn add_argo_workflow_subcommand() -> Command {
    Command::new(ARGO_WORKFLOW).about("Triggers an Argo Workflow per batch")
}

fn add_prometheus_pusher_subcommand() -> Command {
    Command::new(PROMETHEUS_PUSHER).about("Pushes metric samples to a Prometheus push gateway")
}

/// The flavor selected by the subcommand, `None` for an unknown one.
pub(super) fn flavor(matches: &ArgMatches) -> Option<Flavor> {
    match matches.subcommand_name()? {
        HTTP => Some(Flavor::Http),
        ARGO_WORKFLOW => Some(Flavor::Workflow),
        PROMETHEUS_PUSHER => Some(Flavor::Prometheus),
        _ => None,
    }
}
