use crate::input::JobConfig;
use crate::DayOutcome;
use std::time::Duration;

const RULE_WIDTH: usize = 80;

pub fn show_greeting(config: &JobConfig, date: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    println!("{}", rule);
    println!("CONUS404 {} 10-METER WIND DATA DOWNLOAD", config.metadata.region.to_uppercase());
    println!("{}", rule);
    println!("Target Region:      {}", config.metadata.region);
    println!("Target Date:        {}", date);
    println!(
        "Grid Dimensions:    {} x {}  points",
        config.window.rows(),
        config.window.cols()
    );
    println!("Total Grid Points:  {}", group_thousands(config.window.cell_count()));
    println!("Output Directory:   {}", config.output.root);
    println!("Variables:          {}", config.variables.join(", "));
    println!("{}", rule);
}

pub fn config_echo(config: &JobConfig) {
    println!("Source:             {}", config.source.describe());
    println!("Grid Indices:       {}", config.window.describe());
}

pub fn show_connecting(config: &JobConfig) {
    println!("Initializing connection to {}...", config.source.describe());
}

pub fn show_subset_ready(config: &JobConfig) {
    println!(
        "Dataset connection established and subsetted to {} region",
        config.metadata.region
    );
}

pub fn show_processing(date: &str) {
    println!("Processing {}...", date);
}

/// Final status line: a check mark with the file and hour count, or a cross
/// with the error.
pub fn show_outcome(outcome: &DayOutcome) {
    println!("{}", outcome_line(outcome));
}

pub fn outcome_line(outcome: &DayOutcome) -> String {
    match outcome {
        DayOutcome::Saved(report) => {
            format!("✓ Saved {} ({} hours)", report.path, report.time_steps)
        }
        DayOutcome::Failed { date, error } => {
            format!("✗ Error processing {}: {}", date, error)
        }
    }
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("Finished in {:.1}s", elapsed.as_secs_f64());
}

/// `22100` -> `22,100`
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
