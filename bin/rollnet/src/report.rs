use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use rollnet_devnet::{Outcome, RunReport};

use crate::suites::Suite;

/// Failure messages longer than this are cut in the table; the logs carry the full chain.
const MAX_MESSAGE_LEN: usize = 120;

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let cut = message.chars().take(MAX_MESSAGE_LEN).collect::<String>();
    format!("{cut}...")
}

fn status(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASSED",
        Outcome::Failed(_) => "FAILED",
        Outcome::Skipped => "SKIPPED",
        Outcome::Unfinished => "UNFINISHED",
    }
}

pub fn render(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Scenario", "Status", "Duration", "Details"]);

    for outcome in &report.outcomes {
        let details = match &outcome.outcome {
            Outcome::Failed(message) => truncate(message),
            _ => String::new(),
        };
        table.add_row(vec![
            outcome.name.clone(),
            status(&outcome.outcome).to_string(),
            format!("{:.1?}", outcome.duration),
            details,
        ]);
    }
    table
}

pub fn summary(report: &RunReport) -> String {
    format!(
        "{} scenarios: {} passed, {} failed, {} skipped, {} unfinished",
        report.outcomes.len(),
        report.passed(),
        report.failed(),
        report.skipped(),
        report.unfinished()
    )
}

pub fn list(suites: &[Suite]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Suite", "Scenario", "Description"]);

    for suite in suites {
        table.add_row(vec![suite.name.to_string(), String::new(), suite.description.to_string()]);
        for scenario in &suite.scenarios {
            table.add_row(vec![
                String::new(),
                scenario.name.clone(),
                scenario.description.clone(),
            ]);
        }
    }
    table
}
