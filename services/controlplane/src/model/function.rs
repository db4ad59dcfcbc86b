//! Registered function definitions.
//!
//! # Purpose
//! A function row holds the code blob and entry point an endpoint executes.
//! Names are not unique: registering the same name again stores a new
//! version under a fresh uuid.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionStatus {
    Registered,
}

impl FunctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionStatus::Registered => "REGISTERED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "REGISTERED" => Some(FunctionStatus::Registered),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Function {
    pub function_uuid: String,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub status: FunctionStatus,
    pub code: String,
    pub entry_point: String,
}

/// Replacement fields for an existing function row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FunctionUpdate {
    pub name: String,
    pub description: String,
    pub code: String,
    pub entry_point: String,
}
