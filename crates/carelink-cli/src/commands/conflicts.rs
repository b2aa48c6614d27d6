use crate::commands::common::{
    conflict_to_item, format_conflict_lines, open_context, ConflictItem, StoragePaths,
};
use crate::error::CliError;

/// Split `TABLE/RECORD_ID` into its parts.
pub fn parse_record_filter(filter: &str) -> Result<(String, String), CliError> {
    match filter.split_once('/') {
        Some((table, record_id)) if !table.trim().is_empty() && !record_id.trim().is_empty() => {
            Ok((table.trim().to_string(), record_id.trim().to_string()))
        }
        _ => Err(CliError::Config(format!(
            "expected TABLE/RECORD_ID, got '{filter}'"
        ))),
    }
}

pub async fn run_conflicts(
    limit: usize,
    record: Option<&str>,
    as_json: bool,
    paths: &StoragePaths,
) -> Result<(), CliError> {
    let context = open_context(paths).await?;
    let log = context.conflict_log();
    let resolutions = match record {
        Some(filter) => {
            let (table, record_id) = parse_record_filter(filter)?;
            log.for_record(&table, &record_id).await?
        }
        None => log.recent(limit).await?,
    };

    if as_json {
        let items = resolutions
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if resolutions.is_empty() {
        println!("No conflict resolutions recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&resolutions) {
        println!("{line}");
    }
    Ok(())
}
