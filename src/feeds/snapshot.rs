use crate::models::strike_curve::Quote;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Everything one estimate needs from the exchange, captured at `as_of`.
///
/// Chains are keyed by expiration, so an expiration listed twice upstream is
/// merged into one chain rather than producing two probability points.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub coin: String,
    /// Index price in dollars. None or zero means the index request failed upstream.
    pub spot: Option<f64>,
    /// Reference "now" for every time to expiration derived from this snapshot.
    pub as_of: DateTime<Utc>,
    chains: BTreeMap<DateTime<Utc>, Vec<Quote>>,
}

impl MarketSnapshot {
    pub fn new(coin: impl Into<String>, spot: Option<f64>, as_of: DateTime<Utc>) -> Self {
        Self {
            coin: coin.into(),
            spot,
            as_of,
            chains: BTreeMap::new(),
        }
    }

    /// Build from whole chains. Chains with the same expiration are concatenated.
    #[cfg(test)]
    pub fn from_chains(
        coin: impl Into<String>,
        spot: Option<f64>,
        as_of: DateTime<Utc>,
        chains: impl IntoIterator<Item = (DateTime<Utc>, Vec<Quote>)>,
    ) -> Self {
        let mut snapshot = Self::new(coin, spot, as_of);
        for (expiration, quotes) in chains {
            snapshot.chains.entry(expiration).or_default().extend(quotes);
        }
        snapshot
    }

    pub fn add_quote(&mut self, expiration: DateTime<Utc>, quote: Quote) {
        self.chains.entry(expiration).or_default().push(quote);
    }

    /// Distinct expirations with at least one quote, earliest first.
    pub fn expirations(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.chains.keys().copied()
    }

    /// Call quotes for one expiration.
    pub fn quotes(&self, expiration: DateTime<Utc>) -> Option<&[Quote]> {
        self.chains.get(&expiration).map(Vec::as_slice)
    }

    pub fn chains(&self) -> impl Iterator<Item = (DateTime<Utc>, &[Quote])> + '_ {
        self.chains.iter().map(|(exp, quotes)| (*exp, quotes.as_slice()))
    }

    #[inline]
    pub fn quote_count(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }
}
