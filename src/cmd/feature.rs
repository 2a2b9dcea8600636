//! Feature commands: `hive feature create|list`.

use anyhow::Result;
use serde_json::{Value, json};

use hive::config::Config;

use super::super::FeatureCommands;
use super::print_json;

pub fn cmd_feature(config: &Config, command: &FeatureCommands, json: bool) -> Result<()> {
    let features = config.features();

    match command {
        FeatureCommands::Create { name } => {
            let feature = features.create(name)?;
            if json {
                return print_json(&feature);
            }
            println!(
                "{} feature {}",
                console::style("Created").green().bold(),
                console::style(&feature.name).cyan()
            );
            println!(
                "  Plan: {}",
                config.paths.plan_file(&feature.name).display()
            );
        }
        FeatureCommands::List => {
            let names = features.list()?;
            if json {
                let entries = names
                    .iter()
                    .map(|name| -> Result<Value> {
                        Ok(json!({
                            "name": name,
                            "status": features.find(name)?.map(|f| f.status),
                        }))
                    })
                    .collect::<Result<Vec<_>>>()?;
                return print_json(&entries);
            }
            if names.is_empty() {
                println!("No features found. Run 'hive feature create <name>' first.");
                return Ok(());
            }
            for name in &names {
                let status = match features.find(name)? {
                    Some(f) => f.status.to_string(),
                    None => "-".to_string(),
                };
                println!("{:<30} {}", name, console::style(status).dim());
            }
        }
    }
    Ok(())
}
