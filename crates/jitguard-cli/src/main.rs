//! jitguard - host process for the compiler provider broker.

mod list;
mod providers;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jitguard_core::BrokerConfig;

/// Exit status when the host loop hits its deadline.
const TIMEOUT_EXIT_CODE: u8 = 124;

#[derive(Parser)]
#[command(name = "jitguard")]
#[command(about = "Drive compile requests through a fault-isolating compiler broker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host loop against a compiler provider
    Run {
        /// Provider to compile with
        #[arg(long)]
        compiler: Option<String>,

        /// Broker property as key=value (repeatable)
        #[arg(short = 'D', value_name = "KEY=VALUE")]
        define: Vec<String>,

        /// Stop submitting after this many requests
        #[arg(long)]
        requests: Option<u64>,

        /// Attempt count at which the provider signals completion
        #[arg(long, default_value = "10")]
        signal_after: u32,

        /// Milliseconds between compile requests
        #[arg(long, default_value = "5")]
        interval_ms: u64,

        /// Give up after this many milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Directory for diagnostic reports (defaults to the working directory)
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Print one line per compile request
        #[arg(long)]
        print_compilation: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the available compiler providers
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Format jitguard-core errors with recovery hints
            let (message, code) = match err.downcast_ref::<jitguard_core::Error>() {
                Some(core_err) => {
                    let code = if matches!(core_err, jitguard_core::Error::Timeout(_)) {
                        TIMEOUT_EXIT_CODE
                    } else {
                        1
                    };
                    (core_err.with_hint(), code)
                }
                None => (format!("{err:#}"), 1),
            };
            eprintln!("error: {message}");
            ExitCode::from(code)
        }
    }
}

fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            compiler,
            define,
            requests,
            signal_after,
            interval_ms,
            timeout_ms,
            report_dir,
            print_compilation,
            json,
        } => {
            let mut properties = define;
            if let Some(compiler) = compiler {
                properties.push(format!("compiler={compiler}"));
            }
            if print_compilation {
                properties.push("printCompilation=true".to_string());
            }

            let mut config = BrokerConfig::default()
                .apply_env()?
                .with_properties(&properties)?;
            if let Some(dir) = report_dir {
                config = config.with_report_dir(dir);
            }
            if config.compiler.is_none() {
                anyhow::bail!("no compiler selected; pass --compiler or -D compiler=NAME");
            }

            let options = run::RunOptions {
                requests,
                signal_after,
                interval: Duration::from_millis(interval_ms),
                timeout: Duration::from_millis(timeout_ms),
            };
            let summary = run::execute(config, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "processed {} requests (compiled {}, skipped {}) in {:.2}s",
                    summary.submitted,
                    summary.stats.compiled,
                    summary.stats.skipped,
                    summary.elapsed_secs
                );
            }
            Ok(())
        }

        Commands::List { json } => list::execute(json),
    }
}
