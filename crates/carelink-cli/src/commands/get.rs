use serde_json::json;

use crate::commands::common::{normalize_key, open_context, read_source_label, StoragePaths};
use crate::error::CliError;

pub async fn run_get(
    feature: &str,
    key: &str,
    as_json: bool,
    paths: &StoragePaths,
) -> Result<(), CliError> {
    let key = normalize_key(key)?;
    let context = open_context(paths).await?;
    let outcome = context.coordinator(feature)?.read_detailed(&key).await;

    let Some(value) = outcome.value else {
        return Err(CliError::RecordNotFound {
            feature: feature.to_string(),
            key,
        });
    };

    let source = read_source_label(outcome.source);
    if as_json {
        let item = json!({
            "feature": feature,
            "key": key,
            "source": source,
            "value": value,
        });
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!("[{source}] {}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
