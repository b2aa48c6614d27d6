use carelink_core::audit::{AuditEntry, AuditOutcome};

use crate::cli::{AuditCommands, Outcome};
use crate::commands::common::{format_timestamp, open_context, parse_value, StoragePaths};
use crate::error::CliError;

pub async fn run_audit(command: AuditCommands, paths: &StoragePaths) -> Result<(), CliError> {
    match command {
        AuditCommands::Record {
            user_id,
            user_name,
            action,
            resource,
            outcome,
            reason,
            details,
        } => {
            let context = open_context(paths).await?;
            let tenant_id = context.settings().tenant_id.clone();
            let entry = build_entry(
                &tenant_id,
                &user_id,
                &user_name,
                &action,
                &resource,
                outcome,
                reason,
                details.as_deref(),
            );
            let status = context.audit_log()?.record(&entry).await?;
            println!("{} {status}", entry.id);
            Ok(())
        }
        AuditCommands::Show { id } => {
            let context = open_context(paths).await?;
            let entry = context
                .audit_log()?
                .read(id.trim())
                .await?
                .ok_or_else(|| CliError::AuditEntryNotFound(id.clone()))?;
            println!(
                "{}  {} {} on {} by {} ({})",
                format_timestamp(entry.occurred_at),
                match entry.outcome {
                    AuditOutcome::Success => "ok",
                    AuditOutcome::Failure => "FAILED",
                },
                entry.action,
                entry.resource,
                entry.user_name,
                entry.user_id
            );
            if let Some(reason) = &entry.failure_reason {
                println!("reason: {reason}");
            }
            if !entry.details.is_null() {
                println!("{}", serde_json::to_string_pretty(&entry.details)?);
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_entry(
    tenant_id: &str,
    user_id: &str,
    user_name: &str,
    action: &str,
    resource: &str,
    outcome: Outcome,
    reason: Option<String>,
    details: Option<&str>,
) -> AuditEntry {
    let mut entry = AuditEntry::new(
        tenant_id,
        user_id,
        user_name,
        action,
        resource,
        match outcome {
            Outcome::Success => AuditOutcome::Success,
            Outcome::Failure => AuditOutcome::Failure,
        },
    );
    if let Some(details) = details {
        entry = entry.with_details(parse_value(details));
    }
    match reason {
        Some(reason) if outcome == Outcome::Failure => entry.with_failure_reason(reason),
        _ => entry,
    }
}
