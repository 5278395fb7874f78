use serde::{Deserialize, Serialize};

use crate::ledger::{VoteDirection, VoteOutcome};

/// Body of `POST /posts/{id}/vote`. The type stays raw text so an unknown
/// value is reported as an invalid vote type rather than a malformed body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub vote_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCastResponse {
    pub success: bool,
    pub score: i64,
    pub user_vote: Option<VoteDirection>,
}

impl From<VoteOutcome> for VoteCastResponse {
    fn from(outcome: VoteOutcome) -> Self {
        Self {
            success: true,
            score: outcome.score,
            user_vote: outcome.user_vote,
        }
    }
}
