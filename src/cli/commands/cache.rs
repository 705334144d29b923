//! Cache command - inspect or clear cached artifacts

use crate::build::cache_dir;
use crate::cache::{Cache, CacheRecordInfo};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, project: &Path) -> KilnResult<()> {
    let dir = cache_dir(project, config);

    match args.action {
        CacheAction::Path => {
            println!("{}", dir.display());
            Ok(())
        }
        CacheAction::List { format } => {
            let records = Cache::open(&dir).await?.list().await?;
            print_records(&records, format)
        }
        CacheAction::Clear { yes } => clear(&Cache::open(&dir).await?, yes).await,
    }
}

fn print_records(records: &[CacheRecordInfo], format: OutputFormat) -> KilnResult<()> {
    match format {
        OutputFormat::Table => {
            if records.is_empty() {
                println!("Cache is empty.");
                return Ok(());
            }
            println!("{:<40} {:<34} {:>10}", "TARGET", "HASH", "SIZE");
            println!("{}", "-".repeat(86));
            for record in records {
                println!(
                    "{:<40} {:<34} {:>10}",
                    record.target_path,
                    record.hash,
                    format_bytes(record.size)
                );
            }
            println!();
            let total: u64 = records.iter().map(|r| r.size).sum();
            println!("Total: {} artifact(s), {}", records.len(), format_bytes(total));
        }
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "target": r.target_path,
                        "hash": r.hash.to_hex(),
                        "size": r.size,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Plain => {
            for record in records {
                println!("{}", record.target_path);
            }
        }
    }
    Ok(())
}

async fn clear(cache: &Cache, yes: bool) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let count = cache.list().await?.len();

    if count == 0 {
        ui::step_ok(&ctx, "Cache is already empty");
        return Ok(());
    }

    let prompt = format!("Delete {} cached artifact(s)?", count);
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::remark(&ctx, "Nothing deleted (pass --yes to skip the prompt)");
        return Ok(());
    }

    cache.purge().await?;
    ui::step_ok_detail(
        &ctx,
        &format!("Removed {} artifact(s)", count),
        &cache.dir().display().to_string(),
    );
    Ok(())
}

/// Format bytes as human-readable size (e.g., "1.5 MB")
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
