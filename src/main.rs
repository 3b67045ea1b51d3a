use catalog_harvest::cli::{CliArgs, Mode};
use catalog_harvest::config::HarvestConfig;
use catalog_harvest::core::processor;
use catalog_harvest::error::{AppError, AppResult};
use catalog_harvest::logging::{log, setup_logging, LogLevel};
use catalog_harvest::testing;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tokio::runtime::Builder;

fn main() -> ExitCode {
    let cli_args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            setup_logging(None);
            log(LogLevel::Error, &format!("CLI Argument Error: {}", e));
            let _ = CliArgs::command().print_help();
            return ExitCode::from(2);
        }
    };

    let log_file = cli_args.get_log_file();
    setup_logging(log_file.as_deref());

    let runtime = match Builder::new_multi_thread()
        .enable_all()
        .thread_name("harvest-worker")
        .worker_threads(num_cpus::get())
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("FATAL: Failed to build Tokio runtime: {}", e),
            );
            return ExitCode::FAILURE;
        }
    };

    let main_result: AppResult<i32> = runtime.block_on(async {
        let args = cli_args;

        if let Mode::ParseFile { input, output } = args.mode() {
            if !input.exists() {
                log(
                    LogLevel::Error,
                    &format!("Parse input file not found: {}", input.display()),
                );
                return Err(AppError::Argument("Parse input file not found.".to_string()));
            }
            return match testing::test_parse_file(&input, &output).await {
                Ok(_) => Ok(0),
                Err(e) => {
                    log(LogLevel::Error, &format!("Parse test failed: {:?}", e));
                    Ok(1)
                }
            };
        }

        let mut config = HarvestConfig::load(&args.get_config_path())?;
        args.apply_overrides(&mut config)?;
        config.validate()?;

        match args.mode() {
            Mode::SeedCategories => processor::seed(&config).await,
            Mode::Report => processor::report(&config).await,
            Mode::Harvest { dry_run } => processor::run(config, dry_run).await,
            Mode::ParseFile { .. } => Ok(0),
        }
    });

    match main_result {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(AppError::Argument(msg)) => {
            log(LogLevel::Error, &msg);
            let _ = CliArgs::command().print_help();
            ExitCode::from(2)
        }
        Err(e) => {
            log(LogLevel::Error, &format!("FATAL: {}", e));
            ExitCode::FAILURE
        }
    }
}
