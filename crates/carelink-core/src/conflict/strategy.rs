//! Resolution strategies and the rule table that orders them

use serde_json::Value;

use crate::models::{ConflictRecord, ConflictType};

pub const LAST_WRITE_WINS: &str = "last_write_wins";
pub const FIRST_WRITE_WINS: &str = "first_write_wins";
pub const LOCAL_WINS: &str = "local_wins";
pub const REMOTE_WINS: &str = "remote_wins";
pub const STRING_MERGE: &str = "string_merge";
pub const MANUAL: &str = "manual";

const STRING_MERGE_SEPARATOR: &str = " | ";

const ALL_TYPES: [ConflictType; 3] = [
    ConflictType::ConcurrentUpdate,
    ConflictType::UpdateDelete,
    ConflictType::TypeMismatch,
];

/// How a strategy picks the winning value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyKind {
    /// Later client timestamp wins; ties keep local
    LastWriteWins,
    /// Earlier client timestamp wins; ties keep local
    FirstWriteWins,
    LocalWins,
    RemoteWins,
    /// Concatenate two strings
    StringMerge { separator: String },
    /// Use the value a person supplied
    Manual,
}

impl StrategyKind {
    /// Winning value, or `None` when this kind cannot handle the conflict.
    pub fn apply(&self, conflict: &ConflictRecord, user_input: Option<&Value>) -> Option<Value> {
        match self {
            Self::LastWriteWins => Some(if conflict.remote_timestamp > conflict.local_timestamp {
                conflict.remote_value.clone()
            } else {
                conflict.local_value.clone()
            }),
            Self::FirstWriteWins => Some(if conflict.remote_timestamp < conflict.local_timestamp {
                conflict.remote_value.clone()
            } else {
                conflict.local_value.clone()
            }),
            Self::LocalWins => Some(conflict.local_value.clone()),
            Self::RemoteWins => Some(conflict.remote_value.clone()),
            Self::StringMerge { separator } => {
                match (&conflict.local_value, &conflict.remote_value) {
                    (Value::String(local), Value::String(remote)) if local == remote => {
                        Some(Value::String(local.clone()))
                    }
                    (Value::String(local), Value::String(remote)) => {
                        Some(Value::String(format!("{local}{separator}{remote}")))
                    }
                    _ => None,
                }
            }
            Self::Manual => user_input.cloned(),
        }
    }
}

/// One row of the strategy table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub name: String,
    /// Lower runs first
    pub priority: u32,
    pub applicable_types: Vec<ConflictType>,
    pub requires_user_input: bool,
    pub kind: StrategyKind,
}

impl Strategy {
    pub fn new(name: impl Into<String>, priority: u32, kind: StrategyKind) -> Self {
        let requires_user_input = matches!(kind, StrategyKind::Manual);
        let applicable_types = match kind {
            StrategyKind::StringMerge { .. } => vec![ConflictType::ConcurrentUpdate],
            _ => ALL_TYPES.to_vec(),
        };
        Self {
            name: name.into(),
            priority,
            applicable_types,
            requires_user_input,
            kind,
        }
    }

    #[must_use]
    pub fn for_types(mut self, types: impl IntoIterator<Item = ConflictType>) -> Self {
        self.applicable_types = types.into_iter().collect();
        self
    }

    pub fn applies_to(&self, conflict_type: ConflictType) -> bool {
        self.applicable_types.contains(&conflict_type)
    }
}

/// Strategies ordered by ascending priority
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: Vec<Strategy>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new([
            Strategy::new(LAST_WRITE_WINS, 1, StrategyKind::LastWriteWins),
            Strategy::new(FIRST_WRITE_WINS, 2, StrategyKind::FirstWriteWins),
            Strategy::new(LOCAL_WINS, 3, StrategyKind::LocalWins),
            Strategy::new(REMOTE_WINS, 4, StrategyKind::RemoteWins),
            Strategy::new(
                STRING_MERGE,
                5,
                StrategyKind::StringMerge {
                    separator: STRING_MERGE_SEPARATOR.to_string(),
                },
            ),
            Strategy::new(MANUAL, 6, StrategyKind::Manual),
        ])
    }
}

impl StrategyTable {
    pub fn new(strategies: impl IntoIterator<Item = Strategy>) -> Self {
        let mut table = Self {
            strategies: Vec::new(),
        };
        for strategy in strategies {
            table.insert(strategy);
        }
        table
    }

    /// Add a strategy, replacing any existing one with the same name
    pub fn insert(&mut self, strategy: Strategy) {
        self.strategies.retain(|existing| existing.name != strategy.name);
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|strategy| strategy.priority);
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|strategy| strategy.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    /// First strategy that can settle `conflict` without a person.
    pub fn automatic_for(&self, conflict: &ConflictRecord) -> Option<(&Strategy, Value)> {
        self.strategies
            .iter()
            .filter(|strategy| !strategy.requires_user_input)
            .filter(|strategy| strategy.applies_to(conflict.conflict_type))
            .find_map(|strategy| {
                strategy
                    .kind
                    .apply(conflict, None)
                    .map(|value| (strategy, value))
            })
    }
}
