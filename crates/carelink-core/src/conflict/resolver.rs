//! Open-conflict bookkeeping and resolution

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use super::detector::ConflictDetector;
use super::strategy::{Strategy, StrategyTable, MANUAL};
use crate::models::{ConflictId, ConflictRecord, ConflictResolution, ResolvedBy, SyncRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unknown conflict: {0}")]
    UnknownConflict(ConflictId),
    #[error("Conflict {0} needs manual resolution")]
    ManualResolutionRequired(ConflictId),
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("Strategy {strategy} cannot resolve conflict {conflict_id}")]
    StrategyNotApplicable {
        strategy: String,
        conflict_id: ConflictId,
    },
    #[error("Conflict {0} no longer matches the local record")]
    StaleConflict(ConflictId),
}

type TupleKey = (String, String, String);

/// Holds open conflicts and the resolutions applied to them.
///
/// At most one conflict is open per table/record/field.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    detector: ConflictDetector,
    strategies: StrategyTable,
    open: HashMap<ConflictId, ConflictRecord>,
    by_tuple: HashMap<TupleKey, ConflictId>,
    history: Vec<ConflictResolution>,
}

impl ConflictResolver {
    pub fn new(detector: ConflictDetector, strategies: StrategyTable) -> Self {
        Self {
            detector,
            strategies,
            ..Self::default()
        }
    }

    pub const fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub const fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    /// Detect divergences between two record versions and open them.
    pub fn detect(
        &mut self,
        table_name: &str,
        local: &SyncRecord,
        remote: &SyncRecord,
    ) -> Vec<ConflictId> {
        let records = self.detector.detect(table_name, local, remote);
        self.register(records)
    }

    /// Open conflicts; a record for an already open tuple refreshes it in place.
    pub fn register(&mut self, records: Vec<ConflictRecord>) -> Vec<ConflictId> {
        records
            .into_iter()
            .map(|mut record| {
                let tuple = record.tuple_key();
                if let Some(existing) = self.by_tuple.get(&tuple).copied() {
                    record.id = existing;
                } else {
                    self.by_tuple.insert(tuple, record.id);
                }
                let id = record.id;
                tracing::debug!(
                    "Open conflict {id} on {}/{}/{} ({:?})",
                    record.table_name,
                    record.record_id,
                    record.field_name,
                    record.priority
                );
                self.open.insert(id, record);
                id
            })
            .collect()
    }

    pub fn get(&self, id: ConflictId) -> Option<&ConflictRecord> {
        self.open.get(&id)
    }

    /// Open conflicts, most urgent first
    pub fn open_conflicts(&self) -> Vec<&ConflictRecord> {
        let mut open: Vec<_> = self.open.values().collect();
        open.sort_by(|left, right| {
            right
                .priority
                .cmp(&left.priority)
                .then_with(|| left.id.cmp(&right.id))
        });
        open
    }

    pub fn history(&self) -> &[ConflictResolution] {
        &self.history
    }

    /// Resolve using the first applicable automatic strategy, or `user_input`
    /// as a manual resolution when given.
    pub fn resolve(
        &mut self,
        id: ConflictId,
        user_input: Option<Value>,
    ) -> Result<ConflictResolution, ResolveError> {
        let resolution = self.prepare(id, None, user_input)?;
        self.commit(&resolution)?;
        Ok(resolution)
    }

    /// Resolve with a named strategy.
    pub fn resolve_with(
        &mut self,
        id: ConflictId,
        strategy_name: &str,
        user_input: Option<Value>,
    ) -> Result<ConflictResolution, ResolveError> {
        let resolution = self.prepare(id, Some(strategy_name), user_input)?;
        self.commit(&resolution)?;
        Ok(resolution)
    }

    /// Work out a resolution without closing the conflict.
    ///
    /// `None` picks the first applicable automatic strategy, or the manual
    /// strategy when `user_input` is given. The conflict stays open until
    /// [`commit`](Self::commit) is called with the result.
    pub fn prepare(
        &self,
        id: ConflictId,
        strategy_name: Option<&str>,
        user_input: Option<Value>,
    ) -> Result<ConflictResolution, ResolveError> {
        let conflict = self.open.get(&id).ok_or(ResolveError::UnknownConflict(id))?;

        let strategy_name = match strategy_name {
            Some(name) => name,
            None if user_input.is_some() => MANUAL,
            None => {
                if !conflict.auto_resolvable {
                    return Err(ResolveError::ManualResolutionRequired(id));
                }
                let (strategy, value) =
                    self.strategies.automatic_for(conflict).ok_or_else(|| {
                        ResolveError::StrategyNotApplicable {
                            strategy: "automatic".to_string(),
                            conflict_id: id,
                        }
                    })?;
                return Ok(resolution_for(
                    conflict,
                    &strategy.name,
                    value,
                    ResolvedBy::System,
                ));
            }
        };

        let strategy = self
            .strategies
            .get(strategy_name)
            .ok_or_else(|| ResolveError::UnknownStrategy(strategy_name.to_string()))?;
        let not_applicable = |strategy: &Strategy| ResolveError::StrategyNotApplicable {
            strategy: strategy.name.clone(),
            conflict_id: id,
        };

        if !strategy.applies_to(conflict.conflict_type) {
            return Err(not_applicable(strategy));
        }
        if strategy.requires_user_input {
            if user_input.is_none() {
                return Err(ResolveError::ManualResolutionRequired(id));
            }
        } else if !conflict.auto_resolvable {
            return Err(ResolveError::ManualResolutionRequired(id));
        }

        let value = strategy
            .kind
            .apply(conflict, user_input.as_ref())
            .ok_or_else(|| not_applicable(strategy))?;
        let resolved_by = if strategy.requires_user_input {
            ResolvedBy::User
        } else {
            ResolvedBy::System
        };
        Ok(resolution_for(conflict, &strategy.name, value, resolved_by))
    }

    /// Close the conflict a prepared resolution belongs to and record it.
    pub fn commit(&mut self, resolution: &ConflictResolution) -> Result<(), ResolveError> {
        let id = resolution.conflict_id;
        self.remove(id).ok_or(ResolveError::UnknownConflict(id))?;
        tracing::info!(
            "Resolved conflict {id} on {}/{}/{} with {}",
            resolution.table_name,
            resolution.record_id,
            resolution.field_name,
            resolution.strategy_name
        );
        self.history.push(resolution.clone());
        Ok(())
    }

    /// Drop an open conflict without resolving it.
    pub fn discard(&mut self, id: ConflictId) -> Option<ConflictRecord> {
        let conflict = self.remove(id)?;
        tracing::debug!(
            "Discarded conflict {id} on {}/{}/{}",
            conflict.table_name,
            conflict.record_id,
            conflict.field_name
        );
        Some(conflict)
    }

    /// Drop every open conflict on one record.
    pub fn discard_record(&mut self, table_name: &str, record_id: &str) -> Vec<ConflictId> {
        let ids: Vec<_> = self
            .open
            .values()
            .filter(|conflict| conflict.table_name == table_name && conflict.record_id == record_id)
            .map(|conflict| conflict.id)
            .collect();
        for id in &ids {
            self.discard(*id);
        }
        ids
    }

    fn remove(&mut self, id: ConflictId) -> Option<ConflictRecord> {
        let conflict = self.open.remove(&id)?;
        self.by_tuple.remove(&conflict.tuple_key());
        Some(conflict)
    }
}

fn resolution_for(
    conflict: &ConflictRecord,
    strategy_name: &str,
    resolved_value: Value,
    resolved_by: ResolvedBy,
) -> ConflictResolution {
    ConflictResolution {
        conflict_id: conflict.id,
        table_name: conflict.table_name.clone(),
        record_id: conflict.record_id.clone(),
        field_name: conflict.field_name.clone(),
        strategy_name: strategy_name.to_string(),
        resolved_value,
        resolved_by,
        resolved_at: Utc::now(),
    }
}
