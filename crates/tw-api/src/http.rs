//! REST client for the hosted community backend.
//!
//! # Endpoints
//!
//! | Operation       | Method | Path                       |
//! |-----------------|--------|----------------------------|
//! | Feed page       | GET    | `/feed`                    |
//! | Quote batch     | POST   | `/market/quotes`           |
//! | History range   | GET    | `/market/history/{symbol}` |
//! | Cast vote       | POST   | `/votes`                   |
//! | Toggle bookmark | POST   | `/bookmarks/toggle`        |
//! | Bookmark set    | GET    | `/bookmarks`               |
//! | Symbol search   | GET    | `/market/search`           |
//!
//! Quote batches come back as a symbol-keyed map with parallel
//! `timestamps`/`prices` arrays for the sparkline. History rows carry either
//! an epoch `timestamp` or a `date` string, depending on backend version;
//! both are accepted here.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;

use tw_core::error::TwError;
use tw_core::types::{
    FeedItem, FeedPage, FeedSortKey, HistoryBar, MarketSnapshot, PricePoint, Region, SymbolInfo,
    VoteReceipt, VoteTarget,
};

use crate::{CommunityApi, MarketApi};

/// REST implementation of [`MarketApi`] and [`CommunityApi`].
pub struct HttpApi {
    http: reqwest::Client,
    /// Base URL without a trailing slash.
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TwError::Config("backend base_url is empty".to_string()).into());
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { http, base_url })
    }
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedItemDto {
    symbol: String,
    #[serde(default)]
    thread_count: u32,
    #[serde(default)]
    comment_count: u32,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    upvotes: u32,
    #[serde(default)]
    downvotes: u32,
    my_vote: Option<i8>,
}

#[derive(Debug, Deserialize)]
struct FeedPageDto {
    #[serde(default)]
    items: Vec<FeedItemDto>,
    has_more: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct QuoteDto {
    price: Option<f64>,
    change: Option<f64>,
    change_percent: Option<f64>,
    currency: Option<String>,
    #[serde(default)]
    timestamps: Vec<u64>,
    #[serde(default)]
    prices: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryRowDto {
    timestamp: Option<i64>,
    date: Option<String>,
    #[serde(default)]
    open: f64,
    #[serde(default)]
    close: f64,
}

#[derive(Debug, Deserialize)]
struct SearchHitDto {
    symbol: String,
    name: Option<String>,
    market: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookmarkSetDto {
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BookmarkToggleDto {
    bookmarked: bool,
}

// ---------------------------------------------------------------------------
// DTO conversion
// ---------------------------------------------------------------------------

fn item_from_dto(dto: FeedItemDto) -> FeedItem {
    FeedItem {
        symbol: dto.symbol,
        thread_count: dto.thread_count,
        comment_count: dto.comment_count,
        score: dto.score,
        upvotes: dto.upvotes,
        downvotes: dto.downvotes,
        my_vote: dto.my_vote,
        snapshot: None,
    }
}

/// Assemble a page, deriving `has_more` when the backend omits the flag:
/// a full page means more rows may exist, a short page is the end.
fn page_from_dto(dto: FeedPageDto, limit: usize) -> FeedPage {
    let items: Vec<FeedItem> = dto.items.into_iter().map(item_from_dto).collect();
    let has_more = dto.has_more.unwrap_or(limit > 0 && items.len() >= limit);
    FeedPage { items, has_more }
}

fn snapshot_from_quote(dto: QuoteDto) -> MarketSnapshot {
    let series = dto
        .timestamps
        .iter()
        .zip(dto.prices.iter())
        .map(|(&timestamp_ms, &price)| PricePoint { timestamp_ms, price })
        .collect();
    MarketSnapshot {
        last_price: dto.price,
        change: dto.change,
        change_percent: dto.change_percent,
        currency: dto.currency,
        series,
    }
}

fn parse_row_date(date: &str) -> Option<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Rows without any usable time reference are dropped.
fn bar_from_row(row: &HistoryRowDto) -> Option<HistoryBar> {
    let ms = match row.timestamp {
        Some(ts) => ts,
        None => parse_row_date(row.date.as_deref()?)?,
    };
    (ms >= 0).then_some(HistoryBar {
        timestamp_ms: ms as u64,
        open: row.open,
        close: row.close,
    })
}

fn info_from_hit(hit: SearchHitDto) -> SymbolInfo {
    // NSE/BSE listings are the Indian half of the symbol universe.
    let region = match hit.market.as_deref() {
        Some("NSE" | "BSE" | "IN") => Region::India,
        _ => Region::Us,
    };
    let name = hit.name.unwrap_or_else(|| hit.symbol.clone());
    SymbolInfo { symbol: hit.symbol, name, region }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketApi for HttpApi {
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        region: Region,
    ) -> Result<HashMap<String, MarketSnapshot>> {
        let url = format!("{}/market/quotes", self.base_url);
        let body = serde_json::json!({ "symbols": symbols, "region": region.code() });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("quote batch request failed")?
            .error_for_status()
            .map_err(|e| TwError::Api(format!("quote batch: {e}")))?;

        let rows: HashMap<String, QuoteDto> = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("quote batch body: {e}")))?;

        debug!("[api] quote batch returned {}/{} symbols", rows.len(), symbols.len());
        Ok(rows
            .into_iter()
            .map(|(symbol, dto)| (symbol, snapshot_from_quote(dto)))
            .collect())
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<HistoryBar>> {
        let url = format!("{}/market/history/{symbol}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("range", range), ("interval", interval)])
            .send()
            .await
            .with_context(|| format!("history request failed for {symbol}"))?
            .error_for_status()
            .map_err(|e| TwError::Api(format!("history for {symbol}: {e}")))?;

        let rows: Vec<HistoryRowDto> = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("history body for {symbol}: {e}")))?;

        let mut bars: Vec<HistoryBar> = rows.iter().filter_map(bar_from_row).collect();
        bars.sort_by_key(|b| b.timestamp_ms);
        Ok(bars)
    }
}

#[async_trait]
impl CommunityApi for HttpApi {
    async fn fetch_feed_page(
        &self,
        region: Region,
        sort: FeedSortKey,
        offset: usize,
        limit: usize,
    ) -> Result<FeedPage> {
        let url = format!("{}/feed", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("region", region.code().to_string()),
                ("sort", sort.as_str().to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("feed page request failed")?
            .error_for_status()
            .map_err(|e| TwError::Api(format!("feed page: {e}")))?;

        let dto: FeedPageDto = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("feed page body: {e}")))?;
        Ok(page_from_dto(dto, limit))
    }

    async fn cast_vote(&self, target: &VoteTarget, value: i8) -> Result<VoteReceipt> {
        let url = format!("{}/votes", self.base_url);
        let body = serde_json::json!({
            "kind": target.kind.as_str(),
            "id": target.id,
            "value": value,
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("vote request failed for {target}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(
                TwError::Mutation(format!("vote on {target} rejected: HTTP {status}")).into()
            );
        }
        let receipt: VoteReceipt = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("vote receipt for {target}: {e}")))?;
        Ok(receipt)
    }

    async fn toggle_bookmark(&self, symbol: &str, region: Region) -> Result<bool> {
        let url = format!("{}/bookmarks/toggle", self.base_url);
        let body = serde_json::json!({ "symbol": symbol, "region": region.code() });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("bookmark toggle request failed for {symbol}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TwError::Mutation(format!(
                "bookmark toggle on {symbol} rejected: HTTP {status}"
            ))
            .into());
        }
        let dto: BookmarkToggleDto = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("bookmark toggle body: {e}")))?;
        Ok(dto.bookmarked)
    }

    async fn fetch_bookmarks(&self, user_id: &str, region: Region) -> Result<Vec<String>> {
        let url = format!("{}/bookmarks", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("user_id", user_id), ("region", region.code())])
            .send()
            .await
            .context("bookmark set request failed")?
            .error_for_status()
            .map_err(|e| TwError::Api(format!("bookmark set: {e}")))?;

        let dto: BookmarkSetDto = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("bookmark set body: {e}")))?;
        Ok(dto.symbols)
    }

    async fn search_symbols(&self, query: &str, region: Region) -> Result<Vec<SymbolInfo>> {
        let url = format!("{}/market/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("q", query), ("region", region.code())])
            .send()
            .await
            .context("symbol search request failed")?
            .error_for_status()
            .map_err(|e| TwError::Api(format!("symbol search: {e}")))?;

        let hits: Vec<SearchHitDto> = resp
            .json()
            .await
            .map_err(|e| TwError::Parse(format!("symbol search body: {e}")))?;
        Ok(hits.into_iter().map(info_from_hit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_dto_zips_series() {
        let dto: QuoteDto = serde_json::from_str(
            r#"{
                "price": 101.5, "change": 1.5, "change_percent": 1.5,
                "currency": "USD",
                "timestamps": [1000, 2000, 3000],
                "prices": [100.0, 100.5, 101.5]
            }"#,
        )
        .unwrap();
        let snap = snapshot_from_quote(dto);
        assert_eq!(snap.last_price, Some(101.5));
        assert_eq!(snap.series.len(), 3);
        assert_eq!(snap.series[1], PricePoint { timestamp_ms: 2000, price: 100.5 });
    }

    #[test]
    fn quote_dto_partial_row() {
        let dto: QuoteDto = serde_json::from_str(r#"{ "price": 12.0 }"#).unwrap();
        let snap = snapshot_from_quote(dto);
        assert_eq!(snap.last_price, Some(12.0));
        assert_eq!(snap.change, None);
        assert!(!snap.has_series());
    }

    #[test]
    fn page_has_more_fallback() {
        let full: FeedPageDto = serde_json::from_str(
            r#"{ "items": [{"symbol":"A"},{"symbol":"B"}] }"#,
        )
        .unwrap();
        assert!(page_from_dto(full, 2).has_more);

        let short: FeedPageDto = serde_json::from_str(r#"{ "items": [{"symbol":"A"}] }"#).unwrap();
        assert!(!page_from_dto(short, 2).has_more);

        // An explicit flag always wins over the size heuristic.
        let explicit: FeedPageDto = serde_json::from_str(
            r#"{ "items": [{"symbol":"A"},{"symbol":"B"}], "has_more": false }"#,
        )
        .unwrap();
        assert!(!page_from_dto(explicit, 2).has_more);
    }

    #[test]
    fn feed_item_dto_fills_defaults() {
        let dto: FeedPageDto =
            serde_json::from_str(r#"{ "items": [{"symbol":"INFY.NS","score":-3,"my_vote":-1}] }"#)
                .unwrap();
        let page = page_from_dto(dto, 20);
        assert_eq!(page.items[0].symbol, "INFY.NS");
        assert_eq!(page.items[0].score, -3);
        assert_eq!(page.items[0].my_vote, Some(-1));
        assert_eq!(page.items[0].upvotes, 0);
        assert!(page.items[0].snapshot.is_none());
    }

    #[test]
    fn history_row_time_sources() {
        let explicit = HistoryRowDto {
            timestamp: Some(1_700_000_000_000),
            date: None,
            open: 1.0,
            close: 2.0,
        };
        assert_eq!(bar_from_row(&explicit).unwrap().timestamp_ms, 1_700_000_000_000);

        let daily = HistoryRowDto {
            timestamp: None,
            date: Some("2024-01-02".to_string()),
            open: 1.0,
            close: 2.0,
        };
        assert_eq!(bar_from_row(&daily).unwrap().timestamp_ms, 1_704_153_600_000);

        let intraday = HistoryRowDto {
            timestamp: None,
            date: Some("2024-01-02 09:30:00".to_string()),
            open: 1.0,
            close: 2.0,
        };
        assert_eq!(bar_from_row(&intraday).unwrap().timestamp_ms, 1_704_187_800_000);

        let useless = HistoryRowDto { timestamp: None, date: None, open: 1.0, close: 2.0 };
        assert!(bar_from_row(&useless).is_none());
    }

    #[test]
    fn search_hit_region_mapping() {
        let nse = SearchHitDto {
            symbol: "INFY.NS".to_string(),
            name: Some("Infosys".to_string()),
            market: Some("NSE".to_string()),
        };
        assert_eq!(info_from_hit(nse).region, Region::India);

        let us = SearchHitDto {
            symbol: "AAPL".to_string(),
            name: None,
            market: Some("US".to_string()),
        };
        let info = info_from_hit(us);
        assert_eq!(info.region, Region::Us);
        assert_eq!(info.name, "AAPL"); // falls back to the symbol
    }
}
