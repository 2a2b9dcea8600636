//! `hive schedule`: runnable and blocked tasks plus execution waves.

use anyhow::Result;
use serde_json::json;

use hive::config::Config;
use hive::task::{compute_schedule, compute_waves};

use super::print_json;

pub fn cmd_schedule(config: &Config, feature: &str, json: bool) -> Result<()> {
    let tasks = config.tasks().list(feature)?;
    let schedule = compute_schedule(&tasks);
    let waves = compute_waves(&tasks);

    if json {
        return print_json(&json!({
            "runnable": schedule.runnable,
            "blocked": schedule.blocked,
            "waves": waves,
        }));
    }

    println!("{}", console::style(format!("Schedule for {}", feature)).bold().cyan());
    println!();
    if schedule.runnable.is_empty() {
        println!("Runnable: {}", console::style("none").dim());
    } else {
        println!("Runnable:");
        for folder in &schedule.runnable {
            println!("  {} {}", console::style("▶").green(), folder);
        }
    }

    if !schedule.blocked.is_empty() {
        println!();
        println!("Blocked:");
        for blocked in &schedule.blocked {
            println!(
                "  {} {} {}",
                console::style("■").red(),
                blocked.folder,
                console::style(format!("(waiting on {})", blocked.waiting_on.join(", "))).dim()
            );
        }
    }

    if !waves.is_empty() {
        println!();
        println!("Waves:");
        for (i, wave) in waves.iter().enumerate() {
            println!("  {:>2}. {}", i + 1, wave.join(", "));
        }
    }
    Ok(())
}
