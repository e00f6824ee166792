use clap::error::ErrorKind;
use conus404_wind::cli::Cli;
use conus404_wind::input::JobConfig;
use conus404_wind::log::{config_echo, show_farewell_with_timing, show_greeting, show_outcome};
use conus404_wind::{run_day, DayOutcome};
use env_logger::Env;
use std::time::Instant;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = match Cli::parse_known(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Bad usage is reported like any other failed day
            let _ = e.print();
            return;
        }
    };

    run(&cli.date).await;
}

async fn run(date: &str) {
    let start_time = Instant::now();

    let config = match JobConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            show_outcome(&DayOutcome::Failed {
                date: date.to_string(),
                error,
            });
            return;
        }
    };

    show_greeting(&config, date);
    config_echo(&config);

    let outcome = run_day(&config, date).await;
    show_outcome(&outcome);

    show_farewell_with_timing(start_time.elapsed());
}
