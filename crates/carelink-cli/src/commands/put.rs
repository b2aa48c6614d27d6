use crate::commands::common::{normalize_key, open_context, parse_value, StoragePaths};
use crate::error::CliError;

pub async fn run_put(
    feature: &str,
    key: &str,
    raw_value: &str,
    paths: &StoragePaths,
) -> Result<(), CliError> {
    let key = normalize_key(key)?;
    let context = open_context(paths).await?;
    let status = context
        .coordinator(feature)?
        .write(&key, parse_value(raw_value))
        .await?;

    println!("{feature}:{key} {status}");
    Ok(())
}
