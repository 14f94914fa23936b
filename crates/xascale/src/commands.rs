use std::io::{BufWriter, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;

use xacore::config::ConfigLayer;
use xacore::report::RunReport;
use xacore::topology::Topology;
use xacore::{Orchestration, Orchestrator, RunContext};

use crate::Result;
use crate::catalog::create_registry;
use crate::common::cli::RunOpts;
use crate::common::error::{ExitCode, XaScaleError};
use crate::common::globalsettings::GlobalSettings;
use crate::output::json::plan_to_json;
use crate::{configfile, topologyfile};

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|error| {
        XaScaleError::GenericError(format!("Cannot create file {}: {error}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Writes the report as JSON into `path`.
pub fn save_report(path: &Path, report: &RunReport) -> Result<()> {
    write_json(path, report)?;
    log::info!("Run report written to {}", path.display());
    Ok(())
}

fn publish_report(gsettings: &GlobalSettings, opts: &RunOpts, report: &RunReport) -> Result<()> {
    gsettings.printer().print_report(report);
    match &opts.report {
        Some(path) => save_report(path, report),
        None => Ok(()),
    }
}

/// Resolves the configuration and computes the allocation plan without
/// executing it.
fn command_plan(
    gsettings: &GlobalSettings,
    orchestrator: &Orchestrator<'_>,
    topology: &Topology,
    opts: &RunOpts,
    base: Option<&ConfigLayer>,
    overrides: &[ConfigLayer],
) -> Result<ExitCode> {
    let spec = orchestrator.resolve(base, overrides, &opts.cli_flags())?;
    let plan = orchestrator.plan(&RunContext::new(&spec), &spec)?;
    gsettings.printer().print_plan(&spec, &plan, topology);
    if let Some(Some(path)) = &opts.plan {
        write_json(path, &plan_to_json(&spec, &plan, topology))?;
        log::info!("Allocation plan written to {}", path.display());
    }
    Ok(ExitCode::Pass)
}

/// Resolves the configuration and executes the run, unless `--check`,
/// `--plan` or `--list` is used. The returned exit code reflects the verdict.
pub async fn command_run(
    gsettings: &GlobalSettings,
    opts: RunOpts,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let registry = create_registry(&opts.catalog)?;
    let topology = topologyfile::load_or_detect(opts.topology.as_deref())?;

    if opts.list {
        gsettings.printer().print_workload_list(&registry, &topology);
        return Ok(ExitCode::Pass);
    }

    let (base, overrides) = configfile::load_layers(&opts.configs)?;
    let orchestrator = Orchestrator::new(&registry, &topology);
    if opts.plan.is_some() {
        return command_plan(
            gsettings,
            &orchestrator,
            &topology,
            &opts,
            base.as_ref(),
            &overrides,
        );
    }
    let result = orchestrator
        .orchestrate(base.as_ref(), &overrides, &opts.cli_flags(), cancel)
        .await;
    match result {
        Ok(Orchestration::Checked(spec)) => {
            gsettings.printer().print_run_spec(&spec);
            Ok(ExitCode::Pass)
        }
        Ok(Orchestration::Completed(report)) => {
            publish_report(gsettings, &opts, &report)?;
            Ok(if report.is_pass() {
                ExitCode::Pass
            } else {
                ExitCode::Failed
            })
        }
        Err(xacore::Error::FatalError(error)) => {
            if let Err(save_error) = publish_report(gsettings, &opts, &error.partial_report) {
                log::error!("{save_error}");
            }
            Err(xacore::Error::FatalError(error).into())
        }
        Err(error) => Err(error.into()),
    }
}
