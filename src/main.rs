//! Binary entry point for the `azrig` CLI.
//!
//! Every pass runs against an in-memory cloud and prints the resulting
//! operation journal, one call per line, to stdout.

mod cli;

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use serde::de::DeserializeOwned;
use thiserror::Error;

use azrig::assembly::{AssemblyError, new_azure_cluster_service, new_azure_machine_service};
use azrig::config::{ConfigError, ProviderConfig};
use azrig::logging::{self, LoggingError};
use azrig::{
    ClusterScope, Context, InMemoryCloud, MachineScope, OrchestrationError, Operation,
    ResourceSku, Scope, ServiceOrchestrator, SkuCache,
};
use cli::{Cli, PassArgs, Target};

#[derive(Debug, Eq, PartialEq)]
enum TargetFile<'a> {
    Machine(&'a str),
    Cluster(&'a str),
}

impl<'a> TargetFile<'a> {
    fn from_args(target: &'a Target) -> Result<Self, clap::Error> {
        match (target.machine.as_deref(), target.cluster.as_deref()) {
            (Some(path), None) => Ok(Self::Machine(path)),
            (None, Some(path)) => Ok(Self::Cluster(path)),
            (Some(_), Some(_)) => Err(Cli::command().error(
                ErrorKind::ArgumentConflict,
                "--machine cannot be used with --cluster",
            )),
            (None, None) => Err(Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                "one of --machine or --cluster is required",
            )),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Pass(#[from] OrchestrationError),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

#[tokio::main]
async fn main() {
    let (operation, args) = match Cli::parse() {
        Cli::Reconcile(args) => (Operation::Reconcile, args),
        Cli::Pause(args) => (Operation::Pause, args),
        Cli::Delete(args) => (Operation::Delete, args),
    };
    let target = TargetFile::from_args(&args.target).unwrap_or_else(|err| err.exit());
    let exit_code = match dispatch(operation, &args, target).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(
    operation: Operation,
    args: &PassArgs,
    target: TargetFile<'_>,
) -> Result<(), CliError> {
    let config = ProviderConfig::load_without_cli_args()?;
    config.validate()?;
    logging::init(&config.log_filter)?;

    let catalogue: Vec<ResourceSku> = read_json(&args.skus)?;
    let cloud = InMemoryCloud::new();
    let ctx = Context::with_timeout(config.operation_timeout());

    let outcome = match target {
        TargetFile::Machine(path) => {
            let mut scope: MachineScope = read_json(path)?;
            config.apply_to(&mut scope.cluster.environment);
            let skus = SkuCache::new(catalogue, scope.environment().location.as_str());
            let service = new_azure_machine_service(&scope, &cloud, &skus)?;
            run_pass(&service, &cloud, &ctx, operation, args).await
        }
        TargetFile::Cluster(path) => {
            let mut scope: ClusterScope = read_json(path)?;
            config.apply_to(&mut scope.environment);
            let skus = SkuCache::new(catalogue, scope.environment().location.as_str());
            let service = new_azure_cluster_service(&scope, &cloud, &skus)?;
            run_pass(&service, &cloud, &ctx, operation, args).await
        }
    };

    write_journal(io::stdout().lock(), &cloud)?;
    outcome
}

async fn run_pass<S: Scope>(
    service: &ServiceOrchestrator<'_, S>,
    cloud: &InMemoryCloud,
    ctx: &Context,
    operation: Operation,
    args: &PassArgs,
) -> Result<(), CliError> {
    if args.assume_existing {
        service.reconcile(ctx).await?;
        cloud.clear_journal();
    }
    match operation {
        Operation::Reconcile => service.reconcile(ctx).await?,
        Operation::Pause => service.pause(ctx).await?,
        Operation::Delete => service.delete(ctx).await?,
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(raw: &str) -> Result<T, CliError> {
    let read_error = |source| CliError::Read {
        path: raw.to_owned(),
        source,
    };
    let file = Utf8Path::new(raw);
    let parent = file
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = file.file_name().ok_or_else(|| {
        read_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path does not name a file",
        ))
    })?;
    let text = Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(name))
        .map_err(read_error)?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: raw.to_owned(),
        source,
    })
}

fn write_journal(mut target: impl Write, cloud: &InMemoryCloud) -> Result<(), CliError> {
    for operation in cloud.journal() {
        writeln!(target, "{operation}").map_err(CliError::Output)?;
    }
    target.flush().map_err(CliError::Output)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn target(machine: Option<&str>, cluster: Option<&str>) -> Target {
        Target {
            machine: machine.map(str::to_owned),
            cluster: cluster.map(str::to_owned),
        }
    }

    #[rstest]
    fn errors_are_reported_verbatim() {
        let mut buffer = Vec::new();
        let err = CliError::Config(ConfigError::Invalid(String::from("timeout is zero")));
        write_error(&mut buffer, &err);
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "invalid configuration: timeout is zero\n"
        );
    }

    #[rstest]
    #[case(Some("m.json"), None, TargetFile::Machine("m.json"))]
    #[case(None, Some("c.json"), TargetFile::Cluster("c.json"))]
    fn target_file_follows_the_given_flag(
        #[case] machine: Option<&str>,
        #[case] cluster: Option<&str>,
        #[case] expected: TargetFile<'static>,
    ) {
        let args = target(machine, cluster);
        assert_eq!(TargetFile::from_args(&args).expect("one target"), expected);
    }

    #[rstest]
    #[case(Some("m.json"), Some("c.json"), ErrorKind::ArgumentConflict)]
    #[case(None, None, ErrorKind::MissingRequiredArgument)]
    fn target_file_rejects_ambiguous_flags(
        #[case] machine: Option<&str>,
        #[case] cluster: Option<&str>,
        #[case] expected: ErrorKind,
    ) {
        let args = target(machine, cluster);
        let err = TargetFile::from_args(&args).expect_err("ambiguous target");
        assert_eq!(err.kind(), expected);
    }

    #[rstest]
    fn missing_file_names_the_path() {
        let err = read_json::<Vec<ResourceSku>>("does/not/exist.json").expect_err("missing file");
        assert!(err.to_string().starts_with("failed to read does/not/exist.json"));
    }

    #[tokio::test]
    async fn journal_lists_one_call_per_line() {
        let cloud = InMemoryCloud::new();
        let spec = azrig::cloud::ResourceSpec::new(
            "Microsoft.Compute/disks",
            "d",
            "rg",
            serde_json::json!({}),
        );
        azrig::cloud::CloudClient::create_or_update(&cloud, &spec)
            .await
            .expect("create");
        let mut buffer = Vec::new();
        write_journal(&mut buffer, &cloud).expect("write journal");
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "create_or_update Microsoft.Compute/disks d\n"
        );
    }
}
