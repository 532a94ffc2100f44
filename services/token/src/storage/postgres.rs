use crate::config::JwtAlgorithm;
use crate::error::TokenError;
use crate::keys::SigningKey;
use crate::refresh::RevocationRecord;
use crate::storage::{KeyStore, RevocationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, instrument};
use zeroize::Zeroizing;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS signing_keys (
        key_id      TEXT PRIMARY KEY,
        algorithm   TEXT NOT NULL,
        private_pem TEXT NOT NULL,
        public_pem  TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS signing_keys_created_at_idx
        ON signing_keys (created_at DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS refresh_tokens (
        token_hash  TEXT PRIMARY KEY,
        subject     TEXT NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL,
        revoked     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL
    )"#,
];

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, TokenError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create the key and refresh-token tables if they do not exist.
pub async fn migrate(pool: &PgPool) -> Result<(), TokenError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Database schema ready");
    Ok(())
}

/// Signing keys in the `signing_keys` table.
#[derive(Debug, Clone)]
pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    /// Store over `pool`.
    pub fn new(pool: PgPool) -> Self {
        PgKeyStore { pool }
    }

    fn from_row(row: &PgRow) -> Result<SigningKey, TokenError> {
        let algorithm: String = row.try_get("algorithm")?;
        Ok(SigningKey {
            key_id: row.try_get("key_id")?,
            algorithm: JwtAlgorithm::parse(&algorithm)?,
            private_pem: Zeroizing::new(row.try_get("private_pem")?),
            public_pem: row.try_get("public_pem")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    #[instrument(skip(self, key), fields(kid = %key.key_id))]
    async fn save(&self, key: &SigningKey) -> Result<(), TokenError> {
        sqlx::query(
            r#"INSERT INTO signing_keys
                (key_id, algorithm, private_pem, public_pem, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&key.key_id)
        .bind(key.algorithm.as_str())
        .bind(key.private_pem.as_str())
        .bind(&key.public_pem)
        .bind(key.created_at)
        .bind(key.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_latest(&self) -> Result<Option<SigningKey>, TokenError> {
        let row = sqlx::query(
            r#"SELECT key_id, algorithm, private_pem, public_pem, created_at, expires_at
            FROM signing_keys ORDER BY created_at DESC LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_signing_since(&self, since: DateTime<Utc>) -> Result<Vec<SigningKey>, TokenError> {
        let rows = sqlx::query(
            r#"SELECT key_id, algorithm, private_pem, public_pem, created_at, expires_at
            FROM signing_keys
            WHERE created_at >= (
                SELECT COALESCE(MAX(created_at), '-infinity'::timestamptz)
                FROM signing_keys WHERE created_at < $1
            )
            ORDER BY created_at ASC"#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}

/// Revocation records in the `refresh_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    /// Store over `pool`.
    pub fn new(pool: PgPool) -> Self {
        PgRevocationStore { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    #[instrument(skip(self, record))]
    async fn save(&self, record: &RevocationRecord) -> Result<(), TokenError> {
        sqlx::query(
            r#"INSERT INTO refresh_tokens (token_hash, subject, expires_at, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_hash) DO NOTHING"#,
        )
        .bind(&record.token_hash)
        .bind(&record.subject)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, token_hash))]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RevocationRecord>, TokenError> {
        let row = sqlx::query(
            r#"SELECT token_hash, subject, expires_at, revoked, created_at
            FROM refresh_tokens WHERE token_hash = $1"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(RevocationRecord {
                token_hash: row.try_get("token_hash")?,
                subject: row.try_get("subject")?,
                expires_at: row.try_get("expires_at")?,
                revoked: row.try_get("revoked")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, token_hash))]
    async fn update_revoked(&self, token_hash: &str) -> Result<bool, TokenError> {
        let result = sqlx::query(r#"UPDATE refresh_tokens SET revoked = TRUE WHERE token_hash = $1 AND revoked = FALSE"#)
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
