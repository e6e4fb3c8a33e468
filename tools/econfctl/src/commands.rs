//! Subcommand implementations

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use econfmanager::{
    DefaultValue, Interface, ParameterDescriptor, ParameterId, ParameterValue, Store,
};
use tracing::{info, warn};

fn default_label(default: &DefaultValue) -> String {
    match default {
        DefaultValue::File(name) => format!("file:{}", name),
        other => other.materialize(None).to_string(),
    }
}

fn format_millis(millis: i64) -> String {
    if millis == 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn value_cell(iface: &Interface, id: ParameterId) -> String {
    match iface.entry(id).value {
        Some(value) => value.to_string(),
        None => "<write-only>".dimmed().to_string(),
    }
}

pub fn list(iface: &Interface, group: Option<&str>) -> Result<()> {
    let catalog = iface.catalog();
    let descriptors: Vec<&ParameterDescriptor> = match group {
        Some(group) => {
            let found: Vec<_> = catalog.in_group(group).collect();
            if found.is_empty() {
                anyhow::bail!(
                    "unknown group '{}' (available: {})",
                    group,
                    catalog.groups().join(", ")
                );
            }
            found
        },
        None => catalog.descriptors().iter().collect(),
    };

    println!(
        "{:<36} {:<7} {:<11} {}",
        "NAME".bold(),
        "TYPE".bold(),
        "ACCESS".bold(),
        "VALUE".bold()
    );
    for d in descriptors {
        let mut flags = String::new();
        if d.polled {
            flags.push_str(" [polled]");
        }
        if iface.entry(d.id).dirty {
            flags.push_str(" [unsaved]");
        }
        println!(
            "{:<36} {:<7} {:<11} {}{}",
            d.name.cyan(),
            d.value_type.as_str(),
            d.access.as_str(),
            value_cell(iface, d.id),
            flags.yellow()
        );
    }
    Ok(())
}

pub fn get(iface: &Interface, names: &[String], json: bool) -> Result<()> {
    let mut values = BTreeMap::new();
    for name in names {
        let descriptor = iface.find(name)?;
        let value = iface.get(descriptor.id)?;
        if json {
            values.insert(descriptor.name, value.to_plain_json());
        } else if names.len() == 1 {
            println!("{}", value);
        } else {
            println!("{} = {}", descriptor.name.cyan(), value);
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    }
    Ok(())
}

pub async fn set(iface: &Interface, name: &str, input: &str, json: bool) -> Result<()> {
    let descriptor = iface.find(name)?;
    let id = descriptor.id;
    let before = iface.entry(id).value;

    if json {
        let raw: serde_json::Value =
            serde_json::from_str(input).with_context(|| format!("'{}' is not JSON", input))?;
        iface.set_from_json(id, &raw).await?;
    } else {
        iface.set_from_str(id, input).await?;
    }
    iface.save().await?;

    match (before, iface.entry(id).value) {
        (Some(old), Some(new)) if old == new => {
            println!("{} unchanged ({})", descriptor.name.cyan(), new);
        },
        (Some(old), Some(new)) => {
            println!("{}: {} -> {}", descriptor.name.cyan(), old, new.to_string().green());
        },
        _ => println!("{} written", descriptor.name.cyan()),
    }
    Ok(())
}

pub fn describe(iface: &Interface, name: &str) -> Result<()> {
    let d = iface.find(name)?;
    let entry = iface.entry(d.id);

    println!("{} ({})", d.title.bold(), d.name.cyan());
    if !d.comment.is_empty() {
        println!("  {}", d.comment);
    }
    println!("  constant:    {}", d.const_name);
    println!("  group:       {}", d.group);
    println!("  type:        {}", d.value_type);
    println!("  access:      {}", d.access.as_str());
    println!("  validation:  {}", d.validation);
    println!("  default:     {}", default_label(&d.default));
    println!("  polled:      {}", d.polled);
    println!("  persistent:  {}", d.persistent);
    println!("  value:       {}", value_cell(iface, d.id));
    println!("  updated:     {}", format_millis(entry.updated_at));
    if entry.dirty {
        println!("  {}", "not yet saved".yellow());
    }
    Ok(())
}

/// Print changes until interrupted
///
/// With a data source the poll scheduler drives changes; without one the
/// databases are re-read every interval to pick up other writers.
pub async fn watch(iface: &Interface, names: &[String], interval: Duration) -> Result<()> {
    let ids: Vec<ParameterId> = if names.is_empty() {
        iface
            .catalog()
            .descriptors()
            .iter()
            .filter(|d| d.access.can_read())
            .map(|d| d.id)
            .collect()
    } else {
        names
            .iter()
            .map(|n| iface.find(n).map(|d| d.id))
            .collect::<econfmanager::Result<_>>()?
    };

    for &id in &ids {
        iface.add_callback(id, |id, value: &ParameterValue| {
            println!(
                "{} {} = {}",
                chrono::Utc::now().format("%H:%M:%S%.3f").to_string().dimmed(),
                id.name().cyan(),
                value
            );
            Ok(())
        });
    }

    let polling = iface.has_data_source();
    if polling {
        iface.set_up_timer_poll(interval.as_millis() as u64)?;
    }
    info!(
        "Watching {} parameters every {}ms ({})",
        ids.len(),
        interval.as_millis(),
        if polling { "polling source" } else { "reloading databases" }
    );

    let mut ticker = tokio::time::interval(interval);
    let shutdown = common::shutdown::wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                info!("Received {}, stopping watch", signal);
                break;
            }
            _ = ticker.tick(), if !polling => {
                if let Err(e) = iface.reload().await {
                    warn!("Reload failed: {}", e);
                }
            }
        }
    }

    iface.stop_timer_poll().await;
    Ok(())
}

pub async fn reset(iface: &Interface, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("factory reset drops every saved value; re-run with --yes");
    }
    let changed = iface.factory_reset().await?;
    println!("{} ({} parameters changed)", "Factory reset complete".green(), changed.len());
    for id in changed {
        println!("  {}", id.name());
    }
    Ok(())
}

/// Readable values, keyed by wire name
fn readable_values(iface: &Interface) -> Vec<(ParameterId, ParameterValue)> {
    iface
        .catalog()
        .descriptors()
        .iter()
        .filter_map(|d| iface.entry(d.id).value.map(|v| (d.id, v)))
        .collect()
}

pub async fn export(iface: &Interface, output: Option<&Path>, db: Option<&Path>) -> Result<()> {
    let values = readable_values(iface);
    let document: BTreeMap<&str, serde_json::Value> = values
        .iter()
        .map(|(id, value)| (id.name(), value.to_plain_json()))
        .collect();
    let text = serde_json::to_string_pretty(&document)?;

    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Exported {} values to {}", document.len(), path.display());
        },
        None => println!("{}", text),
    }

    if let Some(db) = db {
        let persistent = values
            .iter()
            .filter(|(id, _)| id.descriptor().persistent)
            .map(|(id, value)| (*id, value));
        let written =
            Store::write_snapshot(db, persistent, chrono::Utc::now().timestamp_millis()).await?;
        eprintln!("Wrote {} values to snapshot {}", written, db.display());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "never");
        assert_eq!(format_millis(1_000), "1970-01-01 00:00:01.000 UTC");
    }

    #[test]
    fn test_default_label_for_file_default() {
        assert_eq!(default_label(&DefaultValue::File("cal.bin")), "file:cal.bin");
        assert_eq!(default_label(&DefaultValue::U32(30)), "30");
    }

    #[tokio::test]
    async fn test_export_snapshot_seeds_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let iface = Interface::init(dir.path().join("p.db"), dir.path().join("s.db"), None)
            .await
            .unwrap();
        iface.set_device_serial_number("SN-7".into()).await.unwrap();
        reset(&iface, false).await.unwrap_err();

        let json = dir.path().join("values.json");
        let snapshot = dir.path().join("factory.db");
        export(&iface, Some(&json), Some(&snapshot)).await.unwrap();
        iface.shutdown().await.unwrap();

        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(exported["device@serial_number"], "SN-7");
        assert!(exported.get("device@access_key").is_none());

        let fresh = Interface::init(&snapshot, dir.path().join("other.db"), None)
            .await
            .unwrap();
        assert_eq!(fresh.get_device_serial_number().unwrap(), "SN-7");
        fresh.shutdown().await.unwrap();
    }
}
