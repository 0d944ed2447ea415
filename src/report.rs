/// Console and JSON presentation of estimates.
/// All functions are pure -- they take results and return strings.

use crate::errors::EstimationResult;
use crate::estimator::ladder::StrikeLadder;
use crate::estimator::types::{Anomaly, ProbabilityEstimate};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// One point of the fitted expiration curve.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CurveSample {
    pub time_to_expiration: f64,
    pub probability: f64,
}

/// JSON shape of a probability estimate: the estimate plus sampled curve.
#[derive(Debug, serde::Serialize)]
pub struct EstimateReport<'a> {
    #[serde(flatten)]
    pub estimate: &'a ProbabilityEstimate,
    pub curve: Vec<CurveSample>,
}

impl<'a> EstimateReport<'a> {
    pub fn new(estimate: &'a ProbabilityEstimate, samples: usize) -> Self {
        let curve = estimate
            .curve
            .as_ref()
            .map(|c| {
                c.samples(samples)
                    .into_iter()
                    .map(|(time_to_expiration, probability)| CurveSample {
                        time_to_expiration,
                        probability,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { estimate, curve }
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn cents(dollars: f64) -> f64 {
    100.0 * dollars
}

pub fn render_estimate(estimate: &ProbabilityEstimate, samples: usize) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_estimate(&mut out, &EstimateReport::new(estimate, samples));
    out
}

fn write_estimate(out: &mut String, report: &EstimateReport<'_>) -> std::fmt::Result {
    let est = report.estimate;
    let coin = &est.query.coin;

    writeln!(out, "{coin} is currently trading at $ {:.2}", est.spot)?;
    writeln!(
        out,
        "Probability of {coin} trading on or above {} on {} is {:.2} %",
        est.query.strike,
        timestamp(est.query.expiration),
        100.0 * est.probability
    )?;
    writeln!(out, "Value of shares : YES - {:.2} ¢", cents(est.prices.yes))?;
    writeln!(out, "                   NO - {:.2} ¢", cents(est.prices.no))?;

    writeln!(out)?;
    writeln!(out, "Traded expirations (as of {})", timestamp(est.as_of))?;
    writeln!(
        out,
        "  {:<22} {:>8} {:>7} {:>12} {:>9}",
        "expiration", "t (yrs)", "quotes", "call @ K", "P(ITM)"
    )?;
    for d in &est.expirations {
        writeln!(
            out,
            "  {:<22} {:>8.4} {:>7} {:>12.2} {:>7.2} %",
            timestamp(d.expiration),
            d.time_to_expiration,
            d.quotes_in_window,
            d.call_price_at_strike,
            100.0 * d.probability
        )?;
    }

    if !est.skipped.is_empty() {
        writeln!(out, "Skipped (too few quotes near {}):", est.query.strike)?;
        for s in &est.skipped {
            writeln!(out, "  {:<22} {:>7} quotes", timestamp(s.expiration), s.quotes_in_window)?;
        }
    }

    if est.has_anomalies() {
        write_anomalies(out, &est.anomalies)?;
    }

    if !report.curve.is_empty() {
        writeln!(out)?;
        writeln!(out, "Expiration curve")?;
        writeln!(out, "  {:>8} {:>9}", "t (yrs)", "P(ITM)")?;
        for s in &report.curve {
            writeln!(out, "  {:>8.4} {:>7.2} %", s.time_to_expiration, 100.0 * s.probability)?;
        }
    }

    Ok(())
}

pub fn render_ladder(ladder: &StrikeLadder) -> String {
    let mut out = String::new();
    let _ = write_ladder(&mut out, ladder);
    out
}

fn write_ladder(out: &mut String, ladder: &StrikeLadder) -> std::fmt::Result {
    writeln!(
        out,
        "{} | $ {:.2} | {}",
        ladder.coin,
        ladder.spot,
        timestamp(ladder.expiration)
    )?;
    writeln!(out, "-----------------------")?;
    for rung in &ladder.rungs {
        writeln!(
            out,
            "{} | {:.1} % | YES {:.2} ¢ / NO {:.2} ¢",
            rung.strike,
            100.0 * rung.probability,
            cents(rung.prices.yes),
            cents(rung.prices.no)
        )?;
    }
    writeln!(out, "-----------------------")?;
    for range in &ladder.ranges {
        writeln!(
            out,
            "{} - {} | {:.2} %",
            range.lower,
            range.upper,
            100.0 * range.probability
        )?;
    }

    write_anomalies(out, &ladder.anomalies)
}

fn write_anomalies(out: &mut String, anomalies: &[Anomaly]) -> std::fmt::Result {
    if anomalies.is_empty() {
        return Ok(());
    }
    writeln!(out, "Warnings:")?;
    for a in anomalies {
        writeln!(out, "  {a}")?;
    }
    Ok(())
}

pub fn render_json<T: serde::Serialize>(value: &T) -> EstimationResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
