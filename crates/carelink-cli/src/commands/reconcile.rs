use carelink_core::sync::ReconcileReport;

use crate::commands::common::{normalize_key, open_context, StoragePaths};
use crate::error::CliError;

pub fn format_report(report: &ReconcileReport) -> String {
    format!(
        "attempted={} synced={} still_pending={} failed={}",
        report.attempted, report.synced, report.still_pending, report.permanently_failed
    )
}

pub async fn run_reconcile(paths: &StoragePaths) -> Result<(), CliError> {
    let context = open_context(paths).await?;
    if !context.remote_configured() {
        println!("Remote not configured; pending records stay local.");
    }

    let report = context.reconcile_all().await;
    println!("{}", format_report(&report));
    Ok(())
}

pub async fn run_retry(feature: &str, key: &str, paths: &StoragePaths) -> Result<(), CliError> {
    let key = normalize_key(key)?;
    let context = open_context(paths).await?;
    let coordinator = context.coordinator(feature)?;

    if !coordinator.retry_failed(&key).await? {
        println!("{feature}:{key} is not marked failed");
        return Ok(());
    }

    let report = coordinator.background_reconcile().await?;
    println!("Requeued {feature}:{key}; {}", format_report(&report));
    Ok(())
}

pub async fn run_watch(paths: &StoragePaths) -> Result<(), CliError> {
    let mut context = open_context(paths).await?;
    if !context.remote_configured() {
        return Err(CliError::Config(
            "no remote configured; run `carelink config init --supabase-url ...`".to_string(),
        ));
    }

    context.start_reconciler();
    println!(
        "Reconciling every {}s. Press Ctrl-C to stop.",
        context.settings().reconcile_interval_secs
    );
    tokio::signal::ctrl_c().await?;

    context.shutdown().await;
    println!("Reconciler stopped");
    Ok(())
}
