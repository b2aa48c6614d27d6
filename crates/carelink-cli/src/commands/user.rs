use crate::commands::common::{open_context, StoragePaths};
use crate::error::CliError;

pub async fn run_user(
    id: Option<&str>,
    email: Option<&str>,
    paths: &StoragePaths,
) -> Result<(), CliError> {
    let id = id.map(str::trim).filter(|id| !id.is_empty());
    let email = email.map(str::trim).filter(|email| !email.is_empty());
    if id.is_none() && email.is_none() {
        return Err(CliError::MissingUserLookup);
    }

    let context = open_context(paths).await?;
    let directory = context
        .users()
        .ok_or_else(|| CliError::Config("the users feature is not configured".to_string()))?;
    let user = directory
        .resolve(id, email)
        .await
        .ok_or(CliError::UserNotFound)?;

    println!("{} (via {})", user.key, user.layer);
    println!("{}", serde_json::to_string_pretty(&user.value)?);
    Ok(())
}
