//! `PostgreSQL` session store.
//!
//! Rotation runs as a single transaction: a conditional `UPDATE ... WHERE used
//! = false` claims the predecessor and the successor is inserted before
//! commit. A concurrent refresh that lost the race updates zero rows and is
//! rolled back as a replay, unless the predecessor does not exist at all.
//! Schema lives in `db/sql/01_sessions.sql`.

use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use tracing::{Instrument, error, info_span};
use uuid::Uuid;

use crate::rotation::{
    error::{Error, Result},
    session::{Session, SessionStore, StoreFuture},
};

const INSERT_SESSION: &str = r"
    INSERT INTO sessions
        (id, subject_id, secret_hash, linking_id, client_ip, expires_at, used, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

const SELECT_BY_LINKING_ID: &str = r"
    SELECT id, subject_id, secret_hash, linking_id, client_ip, expires_at, used, created_at
    FROM sessions
    WHERE linking_id = $1
";

const CLAIM_SESSION: &str = "UPDATE sessions SET used = true WHERE id = $1 AND used = false";

const SESSION_EXISTS: &str = "SELECT 1 FROM sessions WHERE id = $1";

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn insert_query(session: &Session) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(INSERT_SESSION)
        .bind(session.id)
        .bind(session.subject_id)
        .bind(session.secret_hash.as_str())
        .bind(session.linking_id.as_str())
        .bind(session.client_ip.as_str())
        .bind(session.expires_at)
        .bind(session.used)
        .bind(session.created_at)
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let read = |err: sqlx::Error| {
        error!("Failed to read session row: {}", err);
        Error::internal("failed to read session", err)
    };
    Ok(Session {
        id: row.try_get("id").map_err(read)?,
        subject_id: row.try_get("subject_id").map_err(read)?,
        secret_hash: row.try_get("secret_hash").map_err(read)?,
        linking_id: row.try_get("linking_id").map_err(read)?,
        client_ip: row.try_get("client_ip").map_err(read)?,
        expires_at: row.try_get("expires_at").map_err(read)?,
        used: row.try_get("used").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

impl SessionStore for PgSessionStore {
    fn create_session<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = INSERT_SESSION
            );
            insert_query(session)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| {
                    error!("Failed to insert session into database: {}", err);
                    Error::internal("failed to persist session", err)
                })?;
            Ok(())
        })
    }

    fn find_session_by_linking_id<'a>(&'a self, linking_id: &'a str) -> StoreFuture<'a, Session> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = SELECT_BY_LINKING_ID
            );
            let row = sqlx::query(SELECT_BY_LINKING_ID)
                .bind(linking_id)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| {
                    error!("Failed to retrieve session from database: {}", err);
                    Error::internal("failed to retrieve session", err)
                })?;

            let Some(row) = row else {
                return Err(Error::NotFound);
            };

            session_from_row(&row)
        })
    }

    fn mark_session_used<'a>(
        &'a self,
        session_id: Uuid,
        successor: &'a Session,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|err| {
                error!("Failed to begin rotation transaction: {}", err);
                Error::internal("failed to begin rotation", err)
            })?;

            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = CLAIM_SESSION
            );
            let claimed = sqlx::query(CLAIM_SESSION)
                .bind(session_id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .map_err(|err| {
                    error!("Failed to mark session as used: {}", err);
                    Error::internal("failed to invalidate session", err)
                })?;

            if claimed.rows_affected() == 0 {
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = SESSION_EXISTS
                );
                let exists = sqlx::query(SESSION_EXISTS)
                    .bind(session_id)
                    .fetch_optional(&mut *tx)
                    .instrument(span)
                    .await
                    .map_err(|err| {
                        error!("Failed to look up predecessor session: {}", err);
                        Error::internal("failed to retrieve session", err)
                    })?
                    .is_some();
                rollback(tx).await;
                return Err(if exists {
                    Error::ReplayDetected
                } else {
                    Error::NotFound
                });
            }

            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = INSERT_SESSION
            );
            insert_query(successor)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .map_err(|err| {
                    error!("Failed to insert successor session: {}", err);
                    Error::internal("failed to persist session", err)
                })?;

            tx.commit().await.map_err(|err| {
                error!("Failed to commit rotation transaction: {}", err);
                Error::internal("failed to commit rotation", err)
            })?;

            Ok(())
        })
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) {
    if let Err(err) = tx.rollback().await {
        error!("Failed to roll back rotation transaction: {}", err);
    }
}
