use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use beerbot_core::domain::beer::{Beer, BeerId, NewBeer, OriginMessage, UserId};
use beerbot_core::ports::{BeerFilter, LedgerStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

const SELECT_BEER: &str = "SELECT id, giver_id, receiver_id, created_at_ms,
        origin_user_id, origin_text, origin_channel, origin_ts, origin_thread_ts
    FROM beer";

pub struct SqlLedgerStore {
    pool: DbPool,
}

impl SqlLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_row(&self, beer: NewBeer) -> Result<BeerId, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_on(&mut *conn, &beer).await
    }

    async fn insert_rows(&self, beers: Vec<NewBeer>) -> Result<Vec<BeerId>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(beers.len());
        for beer in &beers {
            ids.push(insert_on(&mut *tx, beer).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn select_rows(&self, filter: &BeerFilter) -> Result<Vec<Beer>, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_BEER);
        push_filter(&mut query, filter);
        query.push(" ORDER BY created_at_ms ASC, rowid ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_beer).collect()
    }

    async fn any_row(&self, filter: &BeerFilter) -> Result<bool, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT EXISTS (SELECT 1 FROM beer");
        push_filter(&mut query, filter);
        query.push(") AS found");

        let row = query.build().fetch_one(&self.pool).await?;
        let found: i64 = row.try_get("found").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(found != 0)
    }

    async fn delete_rows(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM beer").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

async fn insert_on(conn: &mut SqliteConnection, beer: &NewBeer) -> Result<BeerId, RepositoryError> {
    let id = BeerId(uuid::Uuid::new_v4().to_string());
    let origin = beer.origin.as_ref();

    sqlx::query(
        "INSERT INTO beer (id, giver_id, receiver_id, created_at_ms,
                           origin_user_id, origin_text, origin_channel, origin_ts,
                           origin_thread_ts)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id.0)
    .bind(beer.giver.as_str())
    .bind(beer.receiver.as_str())
    .bind(beer.created_at.timestamp_millis())
    .bind(origin.map(|origin| origin.author.as_str().to_owned()))
    .bind(origin.map(|origin| origin.text.clone()))
    .bind(origin.map(|origin| origin.channel.clone()))
    .bind(origin.map(|origin| origin.ts.clone()))
    .bind(origin.and_then(|origin| origin.thread_ts.clone()))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &BeerFilter) {
    let mut separator = " WHERE ";
    if let Some(giver) = &filter.giver {
        query.push(separator).push("giver_id = ").push_bind(giver.as_str().to_owned());
        separator = " AND ";
    }
    if let Some(receiver) = &filter.receiver {
        query.push(separator).push("receiver_id = ").push_bind(receiver.as_str().to_owned());
        separator = " AND ";
    }
    if let Some(since) = filter.created_since {
        query.push(separator).push("created_at_ms >= ").push_bind(since.timestamp_millis());
        separator = " AND ";
    }
    if let Some(origin_ts) = &filter.origin_ts {
        query.push(separator).push("origin_ts = ").push_bind(origin_ts.clone());
    }
}

fn row_to_beer(row: &sqlx::sqlite::SqliteRow) -> Result<Beer, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let giver_id: String =
        row.try_get("giver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let receiver_id: String =
        row.try_get("receiver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_ms: i64 =
        row.try_get("created_at_ms").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let origin_user_id: Option<String> =
        row.try_get("origin_user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let origin_text: Option<String> =
        row.try_get("origin_text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let origin_channel: Option<String> =
        row.try_get("origin_channel").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let origin_ts: Option<String> =
        row.try_get("origin_ts").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let origin_thread_ts: Option<String> =
        row.try_get("origin_thread_ts").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at_ms).ok_or_else(|| {
        RepositoryError::Decode(format!("beer `{id}` has out-of-range created_at_ms {created_at_ms}"))
    })?;

    let origin = match (origin_user_id, origin_channel, origin_ts) {
        (Some(author), Some(channel), Some(ts)) => Some(OriginMessage {
            author: UserId(author),
            text: origin_text.unwrap_or_default(),
            channel,
            ts,
            thread_ts: origin_thread_ts,
        }),
        _ => None,
    };

    Ok(Beer {
        id: BeerId(id),
        giver: UserId(giver_id),
        receiver: UserId(receiver_id),
        created_at,
        origin,
    })
}

#[async_trait]
impl LedgerStore for SqlLedgerStore {
    async fn insert(&self, beer: NewBeer) -> Result<BeerId, StoreError> {
        Ok(self.insert_row(beer).await?)
    }

    async fn insert_many(&self, beers: Vec<NewBeer>) -> Result<Vec<BeerId>, StoreError> {
        Ok(self.insert_rows(beers).await?)
    }

    async fn find(&self, filter: &BeerFilter) -> Result<Vec<Beer>, StoreError> {
        Ok(self.select_rows(filter).await?)
    }

    async fn exists(&self, filter: &BeerFilter) -> Result<bool, StoreError> {
        Ok(self.any_row(filter).await?)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        Ok(self.delete_rows().await?)
    }
}
