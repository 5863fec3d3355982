//! SQLite database for bots, users, offers and transactions

use crate::store::{OfferStore, OfferTx, StoreError};
use crate::types::{
    BotCredentials, NewOffer, Offer, OfferStatus, TransactionRecord, User,
};
use crate::vault::{self, BotSecrets, SealedSecrets};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Timestamps are stored as RFC 3339 UTC with milliseconds so that text order is time order
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {}: {}", raw, e)))
}

fn row_to_transaction(row: &SqliteRow) -> Result<TransactionRecord, StoreError> {
    let offer_id: String = row.try_get("offer_id")?;
    let price: String = row.try_get("price")?;
    let status: String = row.try_get("status")?;

    Ok(TransactionRecord {
        offer_id: Uuid::parse_str(&offer_id)
            .map_err(|e| StoreError::Corrupt(format!("offer id {}: {}", offer_id, e)))?,
        seller_id: row.try_get("seller_id")?,
        buyer_id: row.try_get("buyer_id")?,
        bot_id: row.try_get("bot_id")?,
        provider_offer_id: row.try_get("provider_offer_id")?,
        price: Decimal::from_str(&price).map_err(|e| StoreError::Corrupt(format!("price {}: {}", price, e)))?,
        status: status.parse().map_err(StoreError::Corrupt)?,
    })
}

fn row_to_offer(row: &SqliteRow) -> Result<Offer, StoreError> {
    let id: String = row.try_get("id")?;
    let price: String = row.try_get("price")?;
    let status: String = row.try_get("status")?;
    let reserved_until: Option<String> = row.try_get("reserved_until")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Offer {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("offer id {}: {}", id, e)))?,
        seller_id: row.try_get("seller_id")?,
        bot_id: row.try_get("bot_id")?,
        provider_offer_id: row.try_get("provider_offer_id")?,
        asset_id: row.try_get("asset_id")?,
        class_id: row.try_get("class_id")?,
        instance_id: row.try_get("instance_id")?,
        market_name: row.try_get("market_name")?,
        price: Decimal::from_str(&price).map_err(|e| StoreError::Corrupt(format!("price {}: {}", price, e)))?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        reserved_until: reserved_until.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // Transactions never span a provider call
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bots (
                bot_id TEXT PRIMARY KEY,
                account_name TEXT NOT NULL,
                device_id TEXT NOT NULL DEFAULT '',
                sealed_secrets BLOB NOT NULL,
                salt BLOB NOT NULL,
                nonce BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                steam_id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                trade_url TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offers (
                id TEXT PRIMARY KEY,
                seller_id TEXT NOT NULL,
                bot_id TEXT,
                provider_offer_id TEXT UNIQUE,
                asset_id TEXT NOT NULL,
                class_id TEXT NOT NULL DEFAULT '',
                instance_id TEXT NOT NULL DEFAULT '',
                market_name TEXT NOT NULL DEFAULT '',
                price TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'onsale',
                reserved_until TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                offer_id TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                buyer_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                provider_offer_id TEXT,
                price TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (offer_id) REFERENCES offers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_status_deadline ON offers(status, reserved_until)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_seller ON offers(seller_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_offer ON transactions(offer_id)")
            .execute(&self.pool)
            .await?;

        info!("Database initialized");
        Ok(())
    }

    /// Seal and store a bot's credentials, replacing an existing entry
    pub async fn add_bot(&self, credentials: &BotCredentials, passphrase: &str) -> Result<()> {
        let sealed = vault::seal(
            &BotSecrets {
                password: credentials.password.clone(),
                shared_secret: credentials.shared_secret.clone(),
                identity_secret: credentials.identity_secret.clone(),
            },
            passphrase,
        )?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO bots (bot_id, account_name, device_id, sealed_secrets, salt, nonce, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credentials.bot_id)
        .bind(&credentials.account_name)
        .bind(BotCredentials::normalize_device_id(&credentials.device_id))
        .bind(sealed.ciphertext)
        .bind(sealed.salt)
        .bind(sealed.nonce)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        info!("[Db] Stored bot {} ({})", credentials.bot_id, credentials.account_name);
        Ok(())
    }

    /// Open every stored bot. A wrong passphrase fails the whole load.
    pub async fn load_bots(&self, passphrase: &str) -> Result<Vec<BotCredentials>> {
        let rows = sqlx::query(
            "SELECT bot_id, account_name, device_id, sealed_secrets, salt, nonce FROM bots ORDER BY bot_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut bots = Vec::with_capacity(rows.len());
        for row in rows {
            let bot_id: String = row.get("bot_id");
            let sealed = SealedSecrets {
                ciphertext: row.get("sealed_secrets"),
                salt: row.get("salt"),
                nonce: row.get("nonce"),
            };
            let secrets = vault::open(&sealed, passphrase)
                .with_context(|| format!("Failed to open secrets of bot {}", bot_id))?;

            bots.push(BotCredentials {
                bot_id,
                account_name: row.get("account_name"),
                password: secrets.password,
                shared_secret: secrets.shared_secret,
                identity_secret: secrets.identity_secret,
                device_id: row.get("device_id"),
            });
        }
        Ok(bots)
    }

    /// Create or update a marketplace user
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (steam_id, username, trade_url, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(steam_id) DO UPDATE SET username = excluded.username, trade_url = excluded.trade_url
            "#,
        )
        .bind(&user.steam_id)
        .bind(&user.username)
        .bind(&user.trade_url)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert an on-sale listing that is not held by any bot yet
    pub async fn create_listing(&self, offer: &NewOffer) -> Result<Uuid> {
        let mut tx = self.begin().await?;
        let id = tx.create_offer_row(offer).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Offers of one seller, newest first
    pub async fn offers_by_seller(&self, seller_id: &str) -> Result<Vec<Offer>> {
        let rows = sqlx::query("SELECT * FROM offers WHERE seller_id = ? ORDER BY created_at DESC")
            .bind(seller_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_offer).collect::<Result<Vec<_>, _>>()?)
    }

    /// Every offer, newest first
    pub async fn all_offers(&self) -> Result<Vec<Offer>> {
        let rows = sqlx::query("SELECT * FROM offers ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_offer).collect::<Result<Vec<_>, _>>()?)
    }

    /// Purchase records of one offer
    pub async fn transactions_for_offer(&self, offer_id: Uuid) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE offer_id = ? ORDER BY created_at")
            .bind(offer_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_transaction).collect::<Result<Vec<_>, _>>()?)
    }

    /// Purchases made by one buyer, newest first
    pub async fn transactions_for_buyer(&self, buyer_id: &str) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE buyer_id = ? ORDER BY created_at DESC")
            .bind(buyer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_transaction).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl OfferStore for Database {
    type Tx = SqliteOfferTx;

    async fn begin(&self) -> Result<SqliteOfferTx, StoreError> {
        Ok(SqliteOfferTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn user_trade_url(&self, steam_id: &str) -> Result<String, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT trade_url FROM users WHERE steam_id = ?")
            .bind(steam_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(url,)| url)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", steam_id)))
    }

    async fn offer(&self, offer_id: Uuid) -> Result<Offer, StoreError> {
        let row = sqlx::query("SELECT * FROM offers WHERE id = ?")
            .bind(offer_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("offer {}", offer_id)))?;
        row_to_offer(&row)
    }

    async fn offer_by_provider_id(&self, provider_offer_id: &str) -> Result<Offer, StoreError> {
        let row = sqlx::query("SELECT * FROM offers WHERE provider_offer_id = ?")
            .bind(provider_offer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("trade offer {}", provider_offer_id)))?;
        row_to_offer(&row)
    }

    async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Offer>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM offers WHERE status = 'reserved' AND (reserved_until IS NULL OR reserved_until <= ?) ORDER BY reserved_until",
        )
        .bind(ts(now))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_offer).collect()
    }

    async fn reserved_counts(&self) -> Result<HashMap<String, u32>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT bot_id, COUNT(*) FROM offers WHERE status = 'reserved' AND bot_id IS NOT NULL GROUP BY bot_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(bot_id, count)| (bot_id, count.max(0) as u32))
            .collect())
    }
}

fn expect_one(result: SqliteQueryResult, offer_id: Uuid) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("offer {}", offer_id)));
    }
    Ok(())
}

/// Open SQLite transaction. SQLite has no `SELECT ... FOR UPDATE`, so a locking
/// read starts with a no-op write; the transaction then holds the write lock
/// from its first statement and never has to upgrade a read snapshot.
pub struct SqliteOfferTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl OfferTx for SqliteOfferTx {
    async fn create_offer_row(&mut self, offer: &NewOffer) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO offers (id, seller_id, asset_id, class_id, instance_id, market_name, price, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'onsale', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&offer.seller_id)
        .bind(&offer.asset_id)
        .bind(&offer.class_id)
        .bind(&offer.instance_id)
        .bind(&offer.market_name)
        .bind(offer.price.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn offer_for_update(&mut self, offer_id: Uuid) -> Result<Offer, StoreError> {
        let touched = sqlx::query("UPDATE offers SET updated_at = updated_at WHERE id = ?")
            .bind(offer_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        expect_one(touched, offer_id)?;

        let row = sqlx::query("SELECT * FROM offers WHERE id = ?")
            .bind(offer_id.to_string())
            .fetch_one(&mut *self.tx)
            .await?;
        row_to_offer(&row)
    }

    async fn update_offer_after_receive(
        &mut self,
        offer_id: Uuid,
        bot_id: &str,
        provider_offer_id: &str,
        reserved_until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE offers
            SET bot_id = ?, provider_offer_id = ?, reserved_until = ?, status = 'reserved', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(bot_id.to_string())
        .bind(provider_offer_id.to_string())
        .bind(ts(reserved_until))
        .bind(ts(Utc::now()))
        .bind(offer_id.to_string());
        expect_one(query.execute(&mut *self.tx).await?, offer_id)
    }

    async fn change_offer_status(&mut self, offer_id: Uuid, status: OfferStatus) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE offers SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ts(Utc::now()))
            .bind(offer_id.to_string());
        expect_one(query.execute(&mut *self.tx).await?, offer_id)
    }

    async fn release_offer(&mut self, offer_id: Uuid) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE offers
            SET status = 'onsale', bot_id = NULL, provider_offer_id = NULL, reserved_until = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ts(Utc::now()))
        .bind(offer_id.to_string());
        expect_one(query.execute(&mut *self.tx).await?, offer_id)
    }

    async fn create_transaction_record(&mut self, record: &TransactionRecord) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO transactions (id, offer_id, seller_id, buyer_id, bot_id, provider_offer_id, price, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(record.offer_id.to_string())
        .bind(&record.seller_id)
        .bind(&record.buyer_id)
        .bind(&record.bot_id)
        .bind(&record.provider_offer_id)
        .bind(record.price.to_string())
        .bind(record.status.as_str())
        .bind(ts(Utc::now()))
        .execute(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
