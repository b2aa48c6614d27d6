use crate::commands::common::{normalize_key, open_context, StoragePaths};
use crate::error::CliError;

pub async fn run_delete(feature: &str, key: &str, paths: &StoragePaths) -> Result<(), CliError> {
    let key = normalize_key(key)?;
    let context = open_context(paths).await?;
    if context.coordinator(feature)?.delete(&key).await? {
        println!("Deleted {feature}:{key}");
    } else {
        println!("Nothing stored locally for {feature}:{key}");
    }
    Ok(())
}
