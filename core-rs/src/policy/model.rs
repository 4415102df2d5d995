//! Policy model: how policy rows are laid out and matched
//!
//! The model is the "grammar" half of the rule set. The embedded default
//! ([`DEFAULT_MODEL`]) is used when no model file is deployed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{RbacError, Result};

pub const DEFAULT_MODEL: &str = include_str!("model.yaml");

/// Policy row column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Sub,
    Obj,
    Act,
    App,
}

/// How matching rows combine into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    AllowIfAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectMatch {
    KeyMatch,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMatch {
    Token,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyModel {
    pub policy_definition: Vec<Field>,
    pub policy_effect: Effect,
    pub object_match: ObjectMatch,
    pub action_match: ActionMatch,
}

impl PolicyModel {
    pub fn parse(content: &str) -> Result<Self> {
        let model: PolicyModel = serde_yaml::from_str(content)
            .map_err(|e| RbacError::Model(format!("Invalid policy model: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    /// Load the model at `path`, falling back to [`DEFAULT_MODEL`] when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Self::parse(DEFAULT_MODEL);
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        let definition = &self.policy_definition;
        if definition.len() != 4 {
            return Err(RbacError::Model(format!(
                "policy_definition must list sub, obj, act and app exactly once, got {} fields",
                definition.len()
            )));
        }
        for field in [Field::Sub, Field::Obj, Field::Act, Field::App] {
            if !definition.contains(&field) {
                return Err(RbacError::Model(format!("policy_definition is missing {:?}", field)));
            }
        }
        Ok(())
    }

    /// Column index of `field` in a policy row.
    pub fn column(&self, field: Field) -> usize {
        self.policy_definition
            .iter()
            .position(|f| *f == field)
            .unwrap_or(0)
    }
}

impl Default for PolicyModel {
    fn default() -> Self {
        PolicyModel {
            policy_definition: vec![Field::Sub, Field::Obj, Field::Act, Field::App],
            policy_effect: Effect::AllowIfAny,
            object_match: ObjectMatch::KeyMatch,
            action_match: ActionMatch::Token,
        }
    }
}
