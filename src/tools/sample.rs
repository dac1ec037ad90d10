//! Offline finance backend
//!
//! Serves a small fixed universe (AAPL, MSFT, GOOGL) so the orchestrator can
//! run end to end without the financial tools service: the demo binary, the
//! API server when no service is configured, and the test suite.

use super::backend::FinanceBackend;
use crate::chart::{GROWTH_COLUMN, PRICE_COLUMN, VALUATION_COLUMN};
use crate::dataset::{Dataset, YEAR_COLUMN};
use crate::error::ToolError;
use crate::models::{NewsArticle, VERDICT_NO_EXTREME_RISK};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

struct Company {
    ticker: &'static str,
    name: &'static str,
    aliases: &'static [&'static str],
    sector: &'static str,
    /// calendarYear, revenuePerShare, netIncomePerShare, peRatio, roe, debtToEquity
    years: [(&'static str, f64, f64, f64, f64, f64); 4],
    last_close: f64,
}

static UNIVERSE: [Company; 3] = [
    Company {
        ticker: "AAPL",
        name: "Apple Inc.",
        aliases: &["apple", "apple inc", "apple inc."],
        sector: "Technology",
        years: [
            ("2020", 15.66, 3.31, 35.2, 0.88, 1.73),
            ("2021", 21.90, 5.67, 28.9, 1.50, 1.98),
            ("2022", 24.32, 6.15, 24.4, 1.97, 2.37),
            ("2023", 24.22, 6.16, 29.8, 1.56, 1.79),
        ],
        last_close: 189.95,
    },
    Company {
        ticker: "MSFT",
        name: "Microsoft Corporation",
        aliases: &["microsoft", "microsoft corp", "microsoft corporation"],
        sector: "Technology",
        years: [
            ("2020", 18.98, 5.82, 35.0, 0.38, 0.61),
            ("2021", 22.32, 8.12, 37.6, 0.43, 0.50),
            ("2022", 26.46, 9.70, 26.5, 0.44, 0.37),
            ("2023", 28.46, 9.72, 34.9, 0.35, 0.29),
        ],
        last_close: 374.51,
    },
    Company {
        ticker: "GOOGL",
        name: "Alphabet Inc.",
        aliases: &["google", "alphabet", "alphabet inc", "alphabet inc."],
        sector: "Communication Services",
        years: [
            ("2020", 13.53, 2.96, 34.2, 0.19, 0.11),
            ("2021", 19.48, 5.69, 25.0, 0.32, 0.11),
            ("2022", 21.85, 4.59, 19.3, 0.24, 0.12),
            ("2023", 24.45, 5.84, 23.9, 0.27, 0.10),
        ],
        last_close: 139.69,
    },
];

const FUNDAMENTAL_COLUMNS: [&str; 6] = [
    YEAR_COLUMN,
    "revenuePerShare",
    "netIncomePerShare",
    "peRatio",
    "roe",
    "debtToEquity",
];

pub struct SampleFinanceBackend {
    verdict: String,
    quota_exhausted: AtomicBool,
}

impl SampleFinanceBackend {
    pub fn new() -> Self {
        Self {
            verdict: VERDICT_NO_EXTREME_RISK.to_string(),
            quota_exhausted: AtomicBool::new(false),
        }
    }

    /// Verdict returned by `analyze_risk`, whatever the data
    pub fn with_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.verdict = verdict.into();
        self
    }

    /// Refuse every data call as if the provider quota were spent
    pub fn exhaust_quota(&self) {
        self.quota_exhausted.store(true, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), ToolError> {
        if self.quota_exhausted.load(Ordering::SeqCst) {
            return Err(ToolError::QuotaExceeded("sample quota exhausted".to_string()));
        }
        Ok(())
    }

    fn company(ticker: &str) -> Result<&'static Company, ToolError> {
        UNIVERSE
            .iter()
            .find(|c| c.ticker.eq_ignore_ascii_case(ticker.trim()))
            .ok_or_else(|| ToolError::Upstream(format!("no data for ticker '{}'", ticker)))
    }
}

impl Default for SampleFinanceBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn fundamentals(company: &Company) -> Result<Dataset, ToolError> {
    let data = company
        .years
        .iter()
        .map(|(year, revenue, income, pe, roe, dte)| {
            vec![json!(year), json!(revenue), json!(income), json!(pe), json!(roe), json!(dte)]
        })
        .collect();
    Ok(Dataset::new(
        FUNDAMENTAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        data,
    )?)
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Trading-day style date labels ending today
fn date_labels(period_days: u32) -> Vec<Value> {
    let today = Utc::now().date_naive();
    (0..period_days)
        .rev()
        .map(|offset| json!((today - Duration::days(offset as i64)).format("%Y-%m-%d").to_string()))
        .collect()
}

/// Deterministic gentle drift ending at the last known close
fn closes(company: &Company, period_days: u32) -> Vec<f64> {
    let start = company.last_close * 0.85;
    let step = (company.last_close - start) / period_days.max(1) as f64;
    (1..=period_days)
        .map(|i| {
            let wobble = ((i % 7) as f64 - 3.0) * 0.002 * company.last_close;
            round(start + step * i as f64 + wobble, 2)
        })
        .collect()
}

#[async_trait]
impl FinanceBackend for SampleFinanceBackend {
    async fn search_ticker(&self, company_name: &str) -> Result<String, ToolError> {
        self.guard()?;
        let needle = company_name.trim().to_lowercase();
        UNIVERSE
            .iter()
            .find(|c| c.aliases.contains(&needle.as_str()) || c.ticker.eq_ignore_ascii_case(&needle))
            .map(|c| c.ticker.to_string())
            .ok_or_else(|| ToolError::Upstream(format!("no ticker found for '{}'", company_name)))
    }

    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Dataset, ToolError> {
        self.guard()?;
        fundamentals(Self::company(ticker)?)
    }

    async fn preprocess(&self, fetched: &Dataset) -> Result<Dataset, ToolError> {
        let revenue = fetched
            .column("revenuePerShare")
            .ok_or_else(|| ToolError::Upstream("fundamentals lack revenuePerShare".to_string()))?;
        let pe = fetched
            .column("peRatio")
            .ok_or_else(|| ToolError::Upstream("fundamentals lack peRatio".to_string()))?;
        let years = fetched
            .column(YEAR_COLUMN)
            .ok_or_else(|| ToolError::Upstream(format!("fundamentals lack {}", YEAR_COLUMN)))?;
        let roe = fetched.column("roe");
        let dte = fetched.column("debtToEquity");

        let mut data = Vec::with_capacity(fetched.row_count());
        for row in 0..fetched.row_count() {
            let growth = match (row.checked_sub(1), number(revenue.get(row).copied())) {
                (Some(prev), Some(current)) => number(revenue.get(prev).copied())
                    .filter(|p| *p != 0.0)
                    .map(|p| json!(round((current - p) / p * 100.0, 2)))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            };
            let earnings_yield = number(pe.get(row).copied())
                .filter(|p| *p != 0.0)
                .map(|p| json!(round(1.0 / p, 4)))
                .unwrap_or(Value::Null);
            let cell = |column: &Option<Vec<&Value>>| {
                column
                    .as_ref()
                    .and_then(|values| values.get(row).map(|v| (*v).clone()))
                    .unwrap_or(Value::Null)
            };

            data.push(vec![
                years[row].clone(),
                growth,
                earnings_yield,
                cell(&roe),
                cell(&dte),
            ]);
        }

        Ok(Dataset::new(
            vec![
                YEAR_COLUMN.to_string(),
                GROWTH_COLUMN.to_string(),
                VALUATION_COLUMN.to_string(),
                "roe".to_string(),
                "debtToEquity".to_string(),
            ],
            data,
        )?)
    }

    async fn analyze_risk(&self, _processed: &Dataset) -> Result<String, ToolError> {
        Ok(self.verdict.clone())
    }

    async fn price_history(&self, ticker: &str, period_days: u32) -> Result<Dataset, ToolError> {
        self.guard()?;
        let company = Self::company(ticker)?;
        let data = closes(company, period_days)
            .into_iter()
            .map(|close| vec![json!(close)])
            .collect();
        Ok(Dataset::new(vec![PRICE_COLUMN.to_string()], data)?.with_index(date_labels(period_days))?)
    }

    async fn compare_fundamentals(
        &self,
        tickers: &[String],
        metric: &str,
    ) -> Result<Dataset, ToolError> {
        self.guard()?;
        if !FUNDAMENTAL_COLUMNS.contains(&metric) || metric == YEAR_COLUMN {
            return Err(ToolError::Validation(format!(
                "metric '{}' is not available; available metrics: {}",
                metric,
                FUNDAMENTAL_COLUMNS[1..].join(", ")
            )));
        }

        let datasets = tickers
            .iter()
            .map(|t| Self::company(t).and_then(fundamentals))
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = vec![YEAR_COLUMN.to_string()];
        columns.extend(tickers.iter().map(|t| t.to_uppercase()));

        let years = datasets
            .first()
            .and_then(|d| d.column(YEAR_COLUMN))
            .unwrap_or_default();
        let data = years
            .iter()
            .enumerate()
            .map(|(row, year)| {
                let mut cells = vec![(*year).clone()];
                for dataset in &datasets {
                    let value = dataset
                        .column(metric)
                        .and_then(|values| values.get(row).map(|v| (*v).clone()))
                        .unwrap_or(Value::Null);
                    cells.push(value);
                }
                cells
            })
            .collect();

        Ok(Dataset::new(columns, data)?)
    }

    async fn compare_prices(
        &self,
        tickers: &[String],
        period_days: u32,
    ) -> Result<Dataset, ToolError> {
        self.guard()?;
        let series = tickers
            .iter()
            .map(|t| {
                Self::company(t).map(|company| {
                    let values = closes(company, period_days);
                    let base = values.first().copied().unwrap_or(1.0);
                    values
                        .into_iter()
                        .map(|v| round(v / base * 100.0, 2))
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let data = (0..period_days as usize)
            .map(|row| series.iter().map(|s| json!(s[row])).collect())
            .collect();

        Ok(Dataset::new(tickers.iter().map(|t| t.to_uppercase()).collect(), data)?
            .with_index(date_labels(period_days))?)
    }

    async fn recent_news(
        &self,
        ticker: &str,
        company_name: &str,
    ) -> Result<Vec<NewsArticle>, ToolError> {
        self.guard()?;
        let company = Self::company(ticker)?;
        let name = if company_name.trim().is_empty() {
            company.name
        } else {
            company_name
        };
        let today = Utc::now().date_naive();

        Ok(vec![
            NewsArticle {
                title: format!("{} reports quarterly results above expectations", name),
                url: format!("https://news.example.com/{}/earnings", company.ticker.to_lowercase()),
                site: Some("Example Markets".to_string()),
                image: None,
                published_at: Some(today.format("%Y-%m-%d").to_string()),
            },
            NewsArticle {
                title: format!("Analysts revisit their outlook on {}", company.ticker),
                url: format!("https://news.example.com/{}/outlook", company.ticker.to_lowercase()),
                site: Some("Example Wire".to_string()),
                image: None,
                published_at: Some((today - Duration::days(2)).format("%Y-%m-%d").to_string()),
            },
        ])
    }

    async fn company_profile(&self, ticker: &str) -> Result<Value, ToolError> {
        self.guard()?;
        // Unknown symbols yield an empty profile, as the live provider does
        let Ok(company) = Self::company(ticker) else {
            return Ok(json!({}));
        };
        Ok(json!({
            "symbol": company.ticker,
            "companyName": company.name,
            "sector": company.sector,
            "price": company.last_close,
            "currency": "USD",
            "description": format!(
                "{} is a large-cap company listed in the United States, operating in the {} sector.",
                company.name, company.sector
            ),
        }))
    }
}
