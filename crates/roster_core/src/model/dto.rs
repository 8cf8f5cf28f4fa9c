//! Constructor-style projections returned by explicit queries.

use crate::db::StoreResult;
use crate::model::member::MemberId;
use crate::store::{FromRow, Row};
use serde::{Deserialize, Serialize};

/// Member row joined with its team name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: MemberId,
    pub username: String,
    pub team_name: String,
}

impl FromRow for MemberDto {
    fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            team_name: row.get("team_name")?,
        })
    }
}
