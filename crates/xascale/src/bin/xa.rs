use std::io::IsTerminal;

use clap::{CommandFactory, FromArgMatches};
use cli_table::ColorChoice;
use tokio_util::sync::CancellationToken;

use xascale::commands::command_run;
use xascale::common::cli::{ColorPolicy, CommonOpts, RootOptions};
use xascale::common::error::ExitCode;
use xascale::common::globalsettings::GlobalSettings;
use xascale::common::setup::setup_logging;
use xascale::output::cli::CliOutput;
use xascale::output::json::JsonOutput;
use xascale::output::outputs::{Output, Outputs};
use xascale::output::quiet::Quiet;

fn make_global_settings(opts: CommonOpts) -> GlobalSettings {
    let color_policy = match opts.colors {
        ColorPolicy::Always => ColorChoice::AlwaysAnsi,
        ColorPolicy::Auto => {
            if std::io::stdout().is_terminal() {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            }
        }
        ColorPolicy::Never => ColorChoice::Never,
    };

    // Create Printer
    let printer: Box<dyn Output> = match opts.output_mode {
        Outputs::CLI => {
            // Set colored public for CLI
            match color_policy {
                ColorChoice::Always | ColorChoice::AlwaysAnsi => {
                    colored::control::set_override(true)
                }
                ColorChoice::Never => colored::control::set_override(false),
                _ => {}
            }

            Box::new(CliOutput::new(color_policy))
        }
        Outputs::JSON => Box::<JsonOutput>::default(),
        Outputs::Quiet => Box::<Quiet>::default(),
    };

    GlobalSettings::new(printer)
}

/// Cancels the run on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the run");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let gsettings = make_global_settings(top_opts.common);

    let code = match command_run(&gsettings, top_opts.run, cancel_on_interrupt()).await {
        Ok(code) => code,
        Err(e) => {
            let code = e.exit_code();
            gsettings.printer().print_error(e.into());
            code
        }
    };
    if code != ExitCode::Pass {
        std::process::exit(code.code());
    }
}
