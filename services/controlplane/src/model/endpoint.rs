//! Execution endpoint registrations.
//!
//! # Purpose
//! An endpoint uuid is minted once and keeps its owner for life. Access
//! groups attached to an endpoint live in the store next to it, not here.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointStatus {
    Offline,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Offline => "OFFLINE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OFFLINE" => Some(EndpointStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub endpoint_uuid: String,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub status: EndpointStatus,
}
