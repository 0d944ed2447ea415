use super::snapshot::MarketSnapshot;
use crate::errors::{EstimationError, EstimationResult};
use crate::models::strike_curve::Quote;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Deribit options settle at 08:00 UTC on the expiration date.
const SETTLEMENT_HOUR_UTC: u32 = 8;

/// Deribit public REST client. All methods return Result, never panic.
#[derive(Clone)]
pub struct DeribitClient {
    client: Client,
    base_url: String,
}

impl DeribitClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str) -> EstimationResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EstimationError::ExchangeApi {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: RpcEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| EstimationError::Parse(format!("GET {path}: {e}")))?;

        envelope.into_result(status.as_u16(), path)
    }

    // ── Public endpoints ──

    /// Live (unexpired) option instruments for `currency`.
    pub async fn get_instruments(&self, currency: &str) -> EstimationResult<Vec<Instrument>> {
        self.public_get(&format!(
            "/public/get_instruments?currency={}&kind=option&expired=false",
            currency.to_uppercase()
        ))
        .await
    }

    /// Mark prices for every option on `currency` in one request.
    pub async fn get_book_summary(&self, currency: &str) -> EstimationResult<Vec<BookSummary>> {
        self.public_get(&format!(
            "/public/get_book_summary_by_currency?currency={}&kind=option",
            currency.to_uppercase()
        ))
        .await
    }

    /// Dollar index price, e.g. `btc_usd`. None if the exchange returned no price.
    pub async fn get_index_price(&self, currency: &str) -> EstimationResult<Option<f64>> {
        let index: IndexPrice = self
            .public_get(&format!(
                "/public/get_index_price?index_name={}_usd",
                currency.to_lowercase()
            ))
            .await?;
        Ok(index.index_price)
    }

    /// Instruments, marks and index price fetched concurrently and joined into
    /// one snapshot of call quotes per expiration.
    pub async fn fetch_snapshot(&self, coin: &str) -> EstimationResult<MarketSnapshot> {
        let as_of = Utc::now();

        let (instruments, summaries, spot) = futures_util::future::try_join3(
            self.get_instruments(coin),
            self.get_book_summary(coin),
            self.get_index_price(coin),
        )
        .await?;

        let snapshot = assemble_snapshot(coin, spot, as_of, &instruments, &summaries);

        tracing::info!(
            coin = %snapshot.coin,
            spot = ?snapshot.spot,
            expirations = snapshot.expirations().count(),
            quotes = snapshot.quote_count(),
            "market snapshot fetched"
        );

        Ok(snapshot)
    }
}

// ── Wire types ──

#[derive(Debug, serde::Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, serde::Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl<T> RpcEnvelope<T> {
    fn into_result(self, status: u16, path: &str) -> EstimationResult<T> {
        if let Some(err) = self.error {
            return Err(EstimationError::ExchangeApi {
                status,
                body: format!("{} (code {})", err.message, err.code),
            });
        }
        self.result
            .ok_or_else(|| EstimationError::Parse(format!("GET {path}: response has no result")))
    }
}

/// Entry of `public/get_instruments`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Instrument {
    pub instrument_name: String,
    pub option_type: Option<String>,
    pub strike: Option<f64>,
    /// Milliseconds since the epoch.
    pub expiration_timestamp: Option<i64>,
}

/// Entry of `public/get_book_summary_by_currency`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BookSummary {
    pub instrument_name: String,
    /// In units of the underlying. Null for instruments without a mark.
    pub mark_price: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
struct IndexPrice {
    index_price: Option<f64>,
}

/// Parsed option instrument name, e.g. `BTC-29SEP23-26000-C`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSymbol {
    pub coin: String,
    pub expiration: DateTime<Utc>,
    pub strike: u64,
    pub is_call: bool,
}

/// Parse `COIN-DMMMYY-STRIKE-C|P`. Returns None for anything else
/// (futures, fractional strikes, malformed dates).
pub fn parse_option_symbol(name: &str) -> Option<OptionSymbol> {
    let mut parts = name.split('-');
    let coin = parts.next()?;
    let date = parts.next()?;
    let strike = parts.next()?;
    let kind = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let expiration = NaiveDate::parse_from_str(date, "%d%b%y")
        .ok()?
        .and_hms_opt(SETTLEMENT_HOUR_UTC, 0, 0)?
        .and_utc();

    let is_call = match kind {
        "C" => true,
        "P" => false,
        _ => return None,
    };

    Some(OptionSymbol {
        coin: coin.to_string(),
        expiration,
        strike: strike.parse().ok()?,
        is_call,
    })
}

impl Instrument {
    /// Expiration, strike and call flag from the listing fields, falling back to
    /// the instrument name when any of them is missing.
    fn symbol(&self) -> Option<OptionSymbol> {
        let listed = match (&self.option_type, self.strike, self.expiration_timestamp) {
            (Some(kind), Some(strike), Some(ts)) if strike > 0.0 && strike.fract() == 0.0 => {
                DateTime::from_timestamp_millis(ts).map(|expiration| OptionSymbol {
                    coin: String::new(),
                    expiration,
                    strike: strike as u64,
                    is_call: kind == "call",
                })
            }
            _ => None,
        };
        listed.or_else(|| parse_option_symbol(&self.instrument_name))
    }
}

/// Join book summaries with the instrument listing into call chains.
///
/// Puts, unparseable instruments and quotes without a usable mark are dropped.
/// Summaries for instruments missing from the listing are placed by their name.
pub fn assemble_snapshot(
    coin: &str,
    spot: Option<f64>,
    as_of: DateTime<Utc>,
    instruments: &[Instrument],
    summaries: &[BookSummary],
) -> MarketSnapshot {
    let listing: HashMap<&str, &Instrument> = instruments
        .iter()
        .map(|i| (i.instrument_name.as_str(), i))
        .collect();

    let mut snapshot = MarketSnapshot::new(coin.to_uppercase(), spot, as_of);
    let mut dropped: usize = 0;

    for summary in summaries {
        let symbol = match listing.get(summary.instrument_name.as_str()) {
            Some(instrument) => instrument.symbol(),
            None => parse_option_symbol(&summary.instrument_name),
        };

        let Some(symbol) = symbol else {
            dropped += 1;
            continue;
        };
        if !symbol.is_call {
            continue;
        }

        match summary.mark_price {
            Some(mark) if mark.is_finite() && mark >= 0.0 => snapshot.add_quote(
                symbol.expiration,
                Quote {
                    strike: symbol.strike,
                    mark_price: mark,
                },
            ),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(coin, dropped, "book summaries without a usable call quote");
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_option_symbol() {
        let sym = parse_option_symbol("BTC-29SEP23-26000-C").unwrap();
        assert_eq!(sym.coin, "BTC");
        assert_eq!(sym.strike, 26_000);
        assert!(sym.is_call);
        assert_eq!(sym.expiration, Utc.with_ymd_and_hms(2023, 9, 29, 8, 0, 0).unwrap());

        let sym = parse_option_symbol("ETH-1OCT23-1700-P").unwrap();
        assert!(!sym.is_call);
        assert_eq!(sym.expiration, Utc.with_ymd_and_hms(2023, 10, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_non_options() {
        assert!(parse_option_symbol("BTC-PERPETUAL").is_none());
        assert!(parse_option_symbol("BTC-29SEP23").is_none());
        assert!(parse_option_symbol("BTC-29SEP23-26000-X").is_none());
        assert!(parse_option_symbol("XRP_USDC-29SEP23-0d5-C").is_none());
        assert!(parse_option_symbol("BTC-31FOO23-26000-C").is_none());
    }

    #[test]
    fn test_book_summary_envelope() {
        let body = r#"{
            "jsonrpc": "2.0",
            "result": [
                {"instrument_name": "BTC-29SEP23-26000-C", "mark_price": 0.0412, "underlying_price": 26050.1},
                {"instrument_name": "BTC-29SEP23-27000-C", "mark_price": null}
            ],
            "usIn": 1693555200000000,
            "testnet": false
        }"#;
        let env: RpcEnvelope<Vec<BookSummary>> = serde_json::from_str(body).unwrap();
        let rows = env.into_result(200, "/public/get_book_summary_by_currency").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mark_price, Some(0.0412));
        assert_eq!(rows[1].mark_price, None);
    }

    #[test]
    fn test_error_envelope() {
        let body = r#"{"jsonrpc":"2.0","error":{"message":"Invalid params","code":-32602},"testnet":false}"#;
        let env: RpcEnvelope<Vec<Instrument>> = serde_json::from_str(body).unwrap();
        let err = env.into_result(400, "/public/get_instruments").unwrap_err();
        assert!(matches!(err, EstimationError::ExchangeApi { status: 400, ref body } if body.contains("-32602")));
    }

    #[test]
    fn test_index_price_payload() {
        let body = r#"{"jsonrpc":"2.0","result":{"index_price":26012.45,"estimated_delivery_price":26012.45}}"#;
        let env: RpcEnvelope<IndexPrice> = serde_json::from_str(body).unwrap();
        assert_eq!(env.into_result(200, "/public/get_index_price").unwrap().index_price, Some(26012.45));
    }

    #[test]
    fn test_assemble_snapshot_joins_and_filters() {
        let instruments: Vec<Instrument> = serde_json::from_str(
            r#"[
                {"instrument_name": "BTC-29SEP23-26000-C", "option_type": "call", "strike": 26000.0,
                 "expiration_timestamp": 1695974400000, "kind": "option"},
                {"instrument_name": "BTC-29SEP23-26000-P", "option_type": "put", "strike": 26000.0,
                 "expiration_timestamp": 1695974400000, "kind": "option"}
            ]"#,
        )
        .unwrap();
        let summaries = vec![
            BookSummary { instrument_name: "BTC-29SEP23-26000-C".into(), mark_price: Some(0.04) },
            BookSummary { instrument_name: "BTC-29SEP23-26000-P".into(), mark_price: Some(0.03) },
            // Not in the listing: placed by its name.
            BookSummary { instrument_name: "BTC-29SEP23-27000-C".into(), mark_price: Some(0.02) },
            BookSummary { instrument_name: "BTC-29SEP23-28000-C".into(), mark_price: None },
            BookSummary { instrument_name: "BTC-6OCT23-26000-C".into(), mark_price: Some(0.05) },
        ];
        let as_of = Utc.with_ymd_and_hms(2023, 9, 1, 8, 0, 0).unwrap();

        let snapshot = assemble_snapshot("btc", Some(26_000.0), as_of, &instruments, &summaries);

        assert_eq!(snapshot.coin, "BTC");
        let sep = Utc.with_ymd_and_hms(2023, 9, 29, 8, 0, 0).unwrap();
        let oct = Utc.with_ymd_and_hms(2023, 10, 6, 8, 0, 0).unwrap();
        assert_eq!(snapshot.expirations().collect::<Vec<_>>(), vec![sep, oct]);

        let strikes: Vec<u64> = snapshot.quotes(sep).unwrap().iter().map(|q| q.strike).collect();
        assert_eq!(strikes, vec![26_000, 27_000]);
        assert_eq!(snapshot.quote_count(), 3);
    }
}
