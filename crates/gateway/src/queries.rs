//! Request-response operations on the upstream session.
//!
//! Thin call-and-return wrappers used by the REST handlers. None of them
//! touch the stream registry.

use crate::error::Result;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};
use upstream::{
    Bar, ContractDetails, HistoricalRequest, Instrument, InstrumentId, Position, UpstreamSession,
    WhatToShow,
};

/// Duration requested when the caller gives none.
pub const DEFAULT_HISTORY_DURATION: &str = "1 D";

/// Limit reported when the caller gives none.
pub const DEFAULT_CANDLE_LIMIT: usize = 100;

/// One managed account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub id: String,
    pub account_id: String,
}

pub async fn accounts(session: &dyn UpstreamSession) -> Result<Vec<AccountEntry>> {
    let accounts = session.managed_accounts().await?;
    Ok(accounts
        .into_iter()
        .map(|account| AccountEntry {
            id: account.clone(),
            account_id: account,
        })
        .collect())
}

pub async fn positions(session: &dyn UpstreamSession, account: &str) -> Result<Vec<Position>> {
    Ok(session.positions(account).await?)
}

/// Symbol patterns tried for a search, most specific first.
///
/// Short symbols are padded with wildcards so partial tickers still match.
pub fn search_patterns(symbol: &str) -> Vec<String> {
    let symbol = symbol.to_uppercase();
    if symbol.chars().count() <= 3 {
        vec![symbol.clone(), format!("{}*", symbol), format!("{}?", symbol)]
    } else {
        vec![symbol]
    }
}

/// Contracts matching `symbol`, unique by contract id.
///
/// A pattern that fails is logged and skipped.
pub async fn search(session: &dyn UpstreamSession, symbol: &str) -> Vec<Instrument> {
    info!("Searching for symbol: {}", symbol);
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for pattern in search_patterns(symbol) {
        match session.matching_symbols(&pattern).await {
            Ok(matches) => {
                for description in matches {
                    if seen.insert(description.contract.con_id) {
                        results.push(description.contract);
                    }
                }
            }
            Err(e) => warn!("Pattern {} failed: {}", pattern, e),
        }
    }

    info!("Found {} unique contracts", results.len());
    results
}

/// Query string of the historical data endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub con_id: InstrumentId,
    /// Bar size, in the platform's form (`"5 mins"`).
    pub interval: String,
    /// Accepted and logged; the window is sized by `duration` alone.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// End of the window, unix seconds; absent means now.
    pub end_time: Option<i64>,
    pub duration: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_CANDLE_LIMIT
}

/// Format an end time the way historical requests expect it.
///
/// Absent or zero means "now", sent as an empty string.
pub fn format_end_time(end_time: Option<i64>) -> String {
    end_time
        .filter(|secs| *secs != 0)
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .map(|dt| dt.format("%Y%m%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Historical candles for a contract, oldest first.
///
/// Every bar the session returns for the window is passed through. An
/// unknown contract yields an empty list.
pub async fn load_history(session: &dyn UpstreamSession, query: &HistoryQuery) -> Result<Vec<Bar>> {
    let Some(instrument) = session.resolve(query.con_id).await? else {
        error!("No contract details found for conId {}", query.con_id);
        return Ok(Vec::new());
    };

    let request = HistoricalRequest {
        end_date_time: format_end_time(query.end_time),
        duration: query
            .duration
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_HISTORY_DURATION.to_string()),
        bar_size: query.interval.clone(),
        what_to_show: WhatToShow::Trades,
        use_rth: true,
    };
    info!(
        "Requesting historical data for {}: duration={}, barSize={}, endDateTime='{}', limit={}",
        instrument.con_id, request.duration, request.bar_size, request.end_date_time, query.limit
    );

    let bars = session.historical_bars(&instrument, &request).await?;
    info!("Returning {} candles", bars.len());
    Ok(bars)
}

/// First contract-details record for `con_id`; failures are logged and
/// reported as `None`.
pub async fn symbol_info(session: &dyn UpstreamSession, con_id: InstrumentId) -> Option<ContractDetails> {
    match session.contract_details(con_id).await {
        Ok(details) => details.into_iter().next(),
        Err(e) => {
            error!("Symbol info error for {}: {}", con_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use upstream::{SimConfig, SimulatedSession};

    async fn connected() -> SimulatedSession {
        let session = SimulatedSession::new(SimConfig {
            tick_interval: None,
            ..SimConfig::default()
        });
        session.connect().await.unwrap();
        session
    }

    fn history(con_id: InstrumentId, limit: usize) -> HistoryQuery {
        HistoryQuery {
            con_id,
            interval: "1 hour".to_string(),
            limit,
            end_time: None,
            duration: Some("2 D".to_string()),
        }
    }

    #[test]
    fn test_search_patterns() {
        assert_eq!(search_patterns("aa"), vec!["AA", "AA*", "AA?"]);
        assert_eq!(search_patterns("msft"), vec!["MSFT"]);
    }

    #[test]
    fn test_format_end_time() {
        assert_eq!(format_end_time(None), "");
        assert_eq!(format_end_time(Some(0)), "");

        let formatted = format_end_time(Some(1_700_000_000));
        let naive = NaiveDateTime::parse_from_str(&formatted, "%Y%m%d %H:%M:%S").unwrap();
        let back = Local.from_local_datetime(&naive).earliest().unwrap();
        assert_eq!(back.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_search_dedupes_in_pattern_order() {
        let session = connected().await;
        let results = search(&session, "a").await;
        let ids: Vec<_> = results.iter().map(|c| c.con_id).collect();

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids.first(), Some(&1715006));
        assert!(ids.contains(&251962528));
    }

    #[tokio::test]
    async fn test_search_when_disconnected_is_empty() {
        let session = SimulatedSession::new(SimConfig::default());
        assert!(search(&session, "AAPL").await.is_empty());
    }

    #[tokio::test]
    async fn test_accounts_shape() {
        let session = connected().await;
        let accounts = accounts(&session).await.unwrap();
        assert_eq!(
            serde_json::to_value(&accounts).unwrap(),
            serde_json::json!([{"id": "DU0000001", "accountId": "DU0000001"}])
        );
    }

    #[tokio::test]
    async fn test_load_history_returns_whole_window() {
        let session = connected().await;
        let window = |limit| HistoryQuery {
            end_time: Some(1_700_000_000),
            ..history(265598, limit)
        };
        let small = load_history(&session, &window(5)).await.unwrap();
        let large = load_history(&session, &window(1_000)).await.unwrap();

        // Two days of hourly bars, whatever the limit.
        assert_eq!(small.len(), 48);
        assert_eq!(small, large);
        assert!(small.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[tokio::test]
    async fn test_load_history_ends_before_end_time() {
        let session = connected().await;
        let query = HistoryQuery {
            end_time: Some(1_700_000_000),
            ..history(265598, 100)
        };
        let bars = load_history(&session, &query).await.unwrap();
        assert_eq!(bars.len(), 48);
        assert!(bars.iter().all(|b| b.time < 1_700_000_000));
    }

    #[tokio::test]
    async fn test_load_history_unknown_contract_is_empty() {
        let session = connected().await;
        assert!(load_history(&session, &history(999, 100)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_symbol_info() {
        let session = connected().await;
        let details = symbol_info(&session, 272093).await.unwrap();
        assert_eq!(details.contract.symbol, "MSFT");
        assert!(symbol_info(&session, 999).await.is_none());

        session.disconnect().await;
        assert!(symbol_info(&session, 272093).await.is_none());
    }
}
