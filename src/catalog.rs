//! Character catalog records supplied wholesale by the caller.
use serde::{Deserialize, Serialize};

use crate::rarity::Rarity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    #[serde(default)]
    pub image: Option<String>,
}

/// Parse a JSON catalog document (an array of character records).
pub fn parse_catalog(json: &str) -> Result<Vec<Character>, serde_json::Error> {
    serde_json::from_str(json)
}
