//! Post vote ledger.
//!
//! Keeps one vote row per (post, user) and the denormalized `posts.score`
//! consistent with the set of live votes. Every write runs inside a single
//! transaction whose first statement writes the post row, so concurrent
//! voters on the same post serialize behind that lock.

mod vote;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    AccessMode, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, EntityTrait, IsolationLevel, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::entities::{post, post_vote};

pub use vote::{UnknownVoteType, VoteDirection, VoteType, transition};

pub const MAX_IDENTIFIER_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("post {0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("stored vote on post {post_id} is unreadable: {source}")]
    CorruptVote {
        post_id: String,
        #[source]
        source: UnknownVoteType,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] DbErr),
}

/// Score after an operation together with the caller's live vote, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub score: i64,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Clone)]
pub struct VoteLedger {
    database: DatabaseConnection,
}

impl VoteLedger {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    /// Applies `requested` for `user_id` on `post_id` and returns the
    /// committed score. The vote row and the score move together or not at
    /// all: any error drops the transaction before commit.
    pub async fn cast_vote(
        &self,
        post_id: &str,
        user_id: &str,
        requested: VoteDirection,
    ) -> Result<VoteOutcome, LedgerError> {
        ensure_addressable_post(post_id)?;
        ensure_identifier("user id", user_id)?;

        let txn = self.database.begin().await?;
        let now = Utc::now().fixed_offset();

        // Writing the post row first takes its write lock before anything is
        // read: a row lock on server backends, the database write lock on
        // SQLite. Later reads in this transaction see a stable vote and score.
        let touched = post::Entity::update_many()
            .col_expr(post::Column::UpdatedAt, Expr::value(now))
            .filter(post::Column::Id.eq(post_id))
            .exec(&txn)
            .await?;
        if touched.rows_affected == 0 {
            return Err(LedgerError::NotFound(post_id.to_owned()));
        }

        let existing = post_vote::Entity::find_by_id((post_id.to_owned(), user_id.to_owned()))
            .one(&txn)
            .await?;
        let current = existing
            .as_ref()
            .map(|row| parse_stored(post_id, &row.vote_type))
            .transpose()?;

        let step = transition(current, requested);

        if existing.is_some() {
            let updated = post_vote::Entity::update_many()
                .col_expr(post_vote::Column::VoteType, Expr::value(step.next.as_str()))
                .col_expr(post_vote::Column::UpdatedAt, Expr::value(now))
                .filter(post_vote::Column::PostId.eq(post_id))
                .filter(post_vote::Column::UserId.eq(user_id))
                .exec(&txn)
                .await?;
            assert_eq!(updated.rows_affected, 1, "Vote row must exist under lock");
        } else {
            let vote = post_vote::ActiveModel {
                post_id: Set(post_id.to_owned()),
                user_id: Set(user_id.to_owned()),
                vote_type: Set(step.next.as_str().to_owned()),
                created_at: Set(now),
                updated_at: Set(now),
            };
            post_vote::Entity::insert(vote)
                .exec_without_returning(&txn)
                .await?;
        }

        post::Entity::update_many()
            .col_expr(
                post::Column::Score,
                Expr::col(post::Column::Score).add(step.delta),
            )
            .col_expr(post::Column::UpdatedAt, Expr::value(now))
            .filter(post::Column::Id.eq(post_id))
            .exec(&txn)
            .await?;

        let score = read_score(&txn, post_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(post_id.to_owned()))?;

        txn.commit().await?;

        info!(
            post_id,
            user_id,
            previous = current.map(VoteType::as_str).unwrap_or("NONE"),
            next = step.next.as_str(),
            delta = step.delta,
            score,
            "Vote recorded"
        );

        Ok(VoteOutcome {
            score,
            user_vote: step.next.live(),
        })
    }

    /// Current score and, when `user_id` is given, that user's live vote.
    /// Both values come from one read-only snapshot.
    pub async fn vote_state(
        &self,
        post_id: &str,
        user_id: Option<&str>,
    ) -> Result<VoteOutcome, LedgerError> {
        ensure_addressable_post(post_id)?;
        if let Some(user_id) = user_id {
            ensure_identifier("user id", user_id)?;
        }

        let txn = match self.database.get_database_backend() {
            DbBackend::Sqlite => self.database.begin().await?,
            _ => {
                self.database
                    .begin_with_config(
                        Some(IsolationLevel::RepeatableRead),
                        Some(AccessMode::ReadOnly),
                    )
                    .await?
            }
        };

        let score = read_score(&txn, post_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(post_id.to_owned()))?;

        let user_vote = match user_id {
            Some(user_id) => {
                let row = post_vote::Entity::find_by_id((post_id.to_owned(), user_id.to_owned()))
                    .one(&txn)
                    .await?;
                row.map(|row| parse_stored(post_id, &row.vote_type))
                    .transpose()?
                    .and_then(VoteType::live)
            }
            None => None,
        };

        txn.commit().await?;
        debug!(post_id, score, "Vote state read");

        Ok(VoteOutcome { score, user_vote })
    }
}

/// Parses a vote type received from a client. Only live directions are
/// accepted.
pub fn parse_direction(raw: &str) -> Result<VoteDirection, LedgerError> {
    raw.parse::<VoteDirection>()
        .map_err(|_| LedgerError::InvalidArgument("Invalid vote type".to_string()))
}

async fn read_score(txn: &DatabaseTransaction, post_id: &str) -> Result<Option<i64>, DbErr> {
    post::Entity::find_by_id(post_id.to_owned())
        .select_only()
        .column(post::Column::Score)
        .into_tuple::<i64>()
        .one(txn)
        .await
}

fn parse_stored(post_id: &str, raw: &str) -> Result<VoteType, LedgerError> {
    raw.parse::<VoteType>()
        .map_err(|source| LedgerError::CorruptVote {
            post_id: post_id.to_owned(),
            source,
        })
}

/// Ids that no stored post can carry are reported the same way as any other
/// unknown post.
fn ensure_addressable_post(post_id: &str) -> Result<(), LedgerError> {
    if post_id.trim().is_empty() || post_id.len() > MAX_IDENTIFIER_LEN {
        return Err(LedgerError::NotFound(post_id.to_owned()));
    }
    Ok(())
}

fn ensure_identifier(label: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(format!(
            "{label} must not be empty"
        )));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "{label} exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};

    use super::*;
    use crate::testing::{file_database, insert_post, insert_user, memory_database};

    async fn ledger_with_post(post_id: &str, voters: &[&str]) -> (VoteLedger, DatabaseConnection) {
        let database = memory_database().await;
        insert_user(&database, "author").await;
        for voter in voters {
            insert_user(&database, voter).await;
        }
        insert_post(&database, post_id, "author").await;
        (VoteLedger::new(database.clone()), database)
    }

    async fn live_weight_sum(database: &DatabaseConnection, post_id: &str) -> i64 {
        post_vote::Entity::find()
            .filter(post_vote::Column::PostId.eq(post_id))
            .all(database)
            .await
            .expect("votes load")
            .iter()
            .map(|row| row.vote_type.parse::<VoteType>().expect("stored type").weight())
            .sum()
    }

    #[tokio::test]
    async fn vote_flip_cancel_scenario() {
        let (ledger, database) = ledger_with_post("p1", &["alice", "bob"]).await;

        let outcome = ledger.cast_vote("p1", "alice", VoteDirection::Up).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: 1, user_vote: Some(VoteDirection::Up) });

        let outcome = ledger.cast_vote("p1", "alice", VoteDirection::Down).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: -1, user_vote: Some(VoteDirection::Down) });

        let outcome = ledger.cast_vote("p1", "alice", VoteDirection::Down).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: 0, user_vote: None });

        let outcome = ledger.cast_vote("p1", "bob", VoteDirection::Up).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: 1, user_vote: Some(VoteDirection::Up) });

        assert_eq!(live_weight_sum(&database, "p1").await, 1);

        let alice = ledger.vote_state("p1", Some("alice")).await.unwrap();
        assert_eq!(alice, VoteOutcome { score: 1, user_vote: None });
    }

    #[tokio::test]
    async fn cancelled_row_is_kept_and_reused() {
        let (ledger, database) = ledger_with_post("p1", &["alice"]).await;

        ledger.cast_vote("p1", "alice", VoteDirection::Up).await.unwrap();
        let outcome = ledger.cast_vote("p1", "alice", VoteDirection::Up).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: 0, user_vote: None });

        let row = post_vote::Entity::find_by_id(("p1".to_string(), "alice".to_string()))
            .one(&database)
            .await
            .unwrap()
            .expect("tombstone retained");
        assert_eq!(row.vote_type, "CANCELLED");

        let outcome = ledger.cast_vote("p1", "alice", VoteDirection::Down).await.unwrap();
        assert_eq!(outcome, VoteOutcome { score: -1, user_vote: Some(VoteDirection::Down) });

        let rows = post_vote::Entity::find().count(&database).await.unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn score_tracks_live_votes_after_every_call() {
        let voters = ["u1", "u2", "u3"];
        let (ledger, database) = ledger_with_post("p1", &voters).await;
        let script = [
            ("u1", VoteDirection::Up),
            ("u2", VoteDirection::Down),
            ("u1", VoteDirection::Down),
            ("u3", VoteDirection::Up),
            ("u2", VoteDirection::Down),
            ("u3", VoteDirection::Up),
            ("u3", VoteDirection::Down),
            ("u1", VoteDirection::Up),
        ];

        for (user, direction) in script {
            let outcome = ledger.cast_vote("p1", user, direction).await.unwrap();
            assert_eq!(outcome.score, live_weight_sum(&database, "p1").await);
            let state = ledger.vote_state("p1", Some(user)).await.unwrap();
            assert_eq!(state, outcome);
        }
    }

    #[tokio::test]
    async fn missing_post_is_not_found_without_side_effects() {
        let (ledger, database) = ledger_with_post("p1", &["alice"]).await;

        let err = ledger
            .cast_vote("missing", "alice", VoteDirection::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(ref id) if id == "missing"));

        let err = ledger.vote_state("missing", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let rows = post_vote::Entity::find().count(&database).await.unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn anonymous_state_has_score_only() {
        let (ledger, _database) = ledger_with_post("p1", &["alice"]).await;
        ledger.cast_vote("p1", "alice", VoteDirection::Down).await.unwrap();

        let state = ledger.vote_state("p1", None).await.unwrap();
        assert_eq!(state, VoteOutcome { score: -1, user_vote: None });

        let stranger = ledger.vote_state("p1", Some("nobody")).await.unwrap();
        assert_eq!(stranger.user_vote, None);
    }

    #[tokio::test]
    async fn corrupt_row_rolls_back() {
        let (ledger, database) = ledger_with_post("p1", &["alice"]).await;
        let now = Utc::now().fixed_offset();
        post_vote::Entity::insert(post_vote::ActiveModel {
            post_id: Set("p1".to_string()),
            user_id: Set("alice".to_string()),
            vote_type: Set("SIDEWAYS".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .exec_without_returning(&database)
        .await
        .unwrap();

        let err = ledger
            .cast_vote("p1", "alice", VoteDirection::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CorruptVote { .. }));

        let state = ledger.vote_state("p1", None).await.unwrap();
        assert_eq!(state.score, 0);
    }

    #[tokio::test]
    async fn rejects_blank_identifiers() {
        let (ledger, _database) = ledger_with_post("p1", &[]).await;
        let err = ledger.cast_vote("p1", "  ", VoteDirection::Up).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert!(matches!(
            parse_direction("CANCELLED"),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(parse_direction("UP").unwrap(), VoteDirection::Up);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_votes_are_all_counted() {
        const VOTERS: usize = 16;
        let dir = tempfile::tempdir().expect("temp dir");
        let database = file_database(&dir, 8).await;
        insert_user(&database, "author").await;
        let names: Vec<String> = (0..VOTERS).map(|i| format!("voter-{i}")).collect();
        for name in &names {
            insert_user(&database, name).await;
        }
        insert_post(&database, "p1", "author").await;
        let ledger = VoteLedger::new(database.clone());

        let mut handles = Vec::with_capacity(VOTERS);
        for name in names {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.cast_vote("p1", &name, VoteDirection::Up).await
            }));
        }

        let mut failures = Vec::new();
        for handle in handles {
            match handle.await.expect("task joins") {
                Ok(outcome) => assert_eq!(outcome.user_vote, Some(VoteDirection::Up)),
                Err(err) => failures.push(err.to_string()),
            }
        }
        assert!(failures.is_empty(), "votes failed: {failures:?}");

        let state = ledger.vote_state("p1", None).await.unwrap();
        assert_eq!(state.score, VOTERS as i64);
        assert_eq!(live_weight_sum(&database, "p1").await, VOTERS as i64);
    }

    #[tokio::test]
    async fn unaddressable_post_ids_are_not_found() {
        let (ledger, database) = ledger_with_post("p1", &["alice"]).await;
        let long_id = "x".repeat(MAX_IDENTIFIER_LEN + 1);

        for post_id in [long_id.as_str(), "", "   "] {
            let err = ledger
                .cast_vote(post_id, "alice", VoteDirection::Up)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(_)), "{post_id:?}: {err}");

            let err = ledger.vote_state(post_id, Some("alice")).await.unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(_)), "{post_id:?}: {err}");
        }

        let rows = post_vote::Entity::find().count(&database).await.unwrap();
        assert_eq!(rows, 0);
    }
}
