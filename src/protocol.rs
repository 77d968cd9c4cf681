//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! The challenge itself goes out as `domain::Challenge`; its camelCase field
//! names are the contract and are not wrapped in a separate DTO.

use serde::{Deserialize, Serialize};

use crate::domain::{AnswerRequest, RawFilters};

/// Response headers carrying provenance out-of-band.
pub const HEADER_CHALLENGE_SOURCE: &str = "x-challenge-source";
pub const HEADER_PARSING_METHOD: &str = "x-parsing-method";

#[derive(Debug, Default, Deserialize)]
pub struct GenerateChallengeIn {
    #[serde(default)]
    pub filters: RawFilters,
}

/// Same shape as `AnswerRequest`; kept as an alias so handlers read naturally.
pub type GenerateAnswerIn = AnswerRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAnswerOut {
    pub solution_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub window_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
