use carelink_core::SyncStatus;
use serde::Serialize;

use crate::commands::common::{open_context, StoragePaths};
use crate::error::CliError;

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct FeatureStatus {
    pub feature: String,
    pub table: String,
    pub synced: usize,
    pub pending: usize,
    pub failed: usize,
}

impl FeatureStatus {
    pub fn count(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Failed => self.failed += 1,
        }
    }
}

pub fn format_status_lines(statuses: &[FeatureStatus]) -> Vec<String> {
    statuses
        .iter()
        .map(|status| {
            format!(
                "{:<10} synced={:<4} pending={:<4} failed={}",
                status.feature, status.synced, status.pending, status.failed
            )
        })
        .collect()
}

pub async fn run_status(as_json: bool, paths: &StoragePaths) -> Result<(), CliError> {
    let context = open_context(paths).await?;

    let mut statuses = Vec::new();
    for coordinator in context.coordinators() {
        let feature = coordinator.feature();
        let mut status = FeatureStatus {
            feature: feature.name.clone(),
            table: feature.table.clone(),
            ..FeatureStatus::default()
        };
        for record in coordinator.local_records().await? {
            status.count(record.sync_status);
        }
        statuses.push(status);
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if !context.remote_configured() {
        println!("Remote: not configured (offline)");
    }
    for line in format_status_lines(&statuses) {
        println!("{line}");
    }
    Ok(())
}
