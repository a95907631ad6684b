//! Upstream session trait.
//!
//! One implementation of this trait owns the single connection to the
//! trading platform. It is shared by every handler in the process, so all
//! methods take `&self` and implementations must tolerate concurrent calls.

use crate::error::Result;
use crate::types::{
    BarUpdate, Bar, ContractDescription, ContractDetails, HistoricalRequest, Instrument,
    InstrumentId, Position, SubscriptionId, TickBatch, WhatToShow,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Request/response calls and push-style event streams of the platform session.
///
/// Streaming works in two halves: `subscribe_*` asks the platform to start
/// pushing data for an instrument and returns a token, while `tick_events` /
/// `bar_events` hand out receivers on the session-wide event buses. Events
/// carry the instrument id (ticks) or subscription token (bars) so a
/// consumer can filter the ones it asked for.
///
/// # Example
///
/// ```ignore
/// let mut ticks = session.tick_events();
/// let token = session.subscribe_ticks(&instrument).await?;
/// while let Ok(batch) = ticks.recv().await {
///     for ticker in batch.tickers.iter().filter(|t| t.instrument_id == instrument.con_id) {
///         // ...
///     }
/// }
/// session.unsubscribe_ticks(token).await?;
/// ```
#[async_trait]
pub trait UpstreamSession: Send + Sync + 'static {
    /// Open the connection. Calling it on a connected session is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Active subscriptions are dropped.
    async fn disconnect(&self);

    /// Whether the session currently has a live connection.
    fn is_connected(&self) -> bool;

    /// Contract details matching a contract id (empty when unknown).
    async fn contract_details(&self, con_id: InstrumentId) -> Result<Vec<ContractDetails>>;

    /// Resolve an id to a fully specified instrument.
    async fn resolve(&self, con_id: InstrumentId) -> Result<Option<Instrument>> {
        let details = self.contract_details(con_id).await?;
        Ok(details.into_iter().next().map(|d| d.contract))
    }

    /// Contracts whose symbol or name matches `pattern`.
    async fn matching_symbols(&self, pattern: &str) -> Result<Vec<ContractDescription>>;

    /// Accounts managed by the logged-in identity.
    async fn managed_accounts(&self) -> Result<Vec<String>>;

    /// Positions held in `account`.
    async fn positions(&self, account: &str) -> Result<Vec<Position>>;

    /// Historical bars for `instrument`, oldest first.
    async fn historical_bars(
        &self,
        instrument: &Instrument,
        request: &HistoricalRequest,
    ) -> Result<Vec<Bar>>;

    /// Start streaming market data (ticks) for `instrument`.
    async fn subscribe_ticks(&self, instrument: &Instrument) -> Result<SubscriptionId>;

    /// Stop a tick stream.
    async fn unsubscribe_ticks(&self, subscription: SubscriptionId) -> Result<()>;

    /// Start streaming real-time bars of `granularity_secs` for `instrument`.
    async fn subscribe_bars(
        &self,
        instrument: &Instrument,
        granularity_secs: u32,
        what_to_show: WhatToShow,
    ) -> Result<SubscriptionId>;

    /// Stop a bar stream.
    async fn unsubscribe_bars(&self, subscription: SubscriptionId) -> Result<()>;

    /// Receiver on the session-wide tick bus.
    fn tick_events(&self) -> broadcast::Receiver<TickBatch>;

    /// Receiver on the session-wide bar bus.
    fn bar_events(&self) -> broadcast::Receiver<BarUpdate>;
}
