use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use feedflow::{config, logger::init_tracing, registry::Registry};

mod cli;

use cli::{Cli, CliContext, Commands};

fn runtime(proc_num: usize) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if proc_num > 0 {
        builder.worker_threads(proc_num);
    }
    builder.enable_all().thread_name("feedflow-worker").build()
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Run);

    if let Commands::SampleConfig { path } = &command {
        return match cli::config::sample(path.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ {e:#}");
                e.exit_code()
            }
        };
    }

    let config_path = match config::locate(cli.config.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("❌ {e:#}");
            return ExitCode::from(1);
        }
    };
    let app = match config::load(&config_path) {
        Ok(app) => Arc::new(app),
        Err(e) => {
            eprintln!("❌ {}: {e}", config_path.display());
            return ExitCode::from(1);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&app.log_level);
    let log_dir = cli.log_file.then(|| app.flow_data.join("logs"));
    let _guard = match init_tracing(level, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ cannot initialise logging: {e:#}");
            return ExitCode::from(1);
        }
    };

    let rt = match runtime(app.proc_num) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("❌ cannot start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let context = CliContext {
        config_path,
        app,
        registry: Registry::builtin(),
    };
    match rt.block_on(cli::execute(&context, command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "feedflow failed");
            eprintln!("❌ {e:#}");
            e.exit_code()
        }
    }
}
