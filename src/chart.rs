//! Chart descriptions
//!
//! A `ChartSpec` is a renderer-agnostic description of a figure. It is always
//! built from a dataset (one held in the conversation state, or one returned
//! by a data tool); how it ends up on screen is the presentation layer's job.

use crate::dataset::{cell_text, Dataset, YEAR_COLUMN};
use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const GROWTH_COLUMN: &str = "revenuePerShare_YoY_Growth";
pub const VALUATION_COLUMN: &str = "earningsYield";
pub const PRICE_COLUMN: &str = "close";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
}

impl ChartKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "line" => Some(ChartKind::Line),
            "bar" => Some(ChartKind::Bar),
            "scatter" => Some(ChartKind::Scatter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub name: String,
    pub y: Vec<Value>,
    #[serde(default)]
    pub axis: Axis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub kind: ChartKind,
    pub x_label: String,
    pub x: Vec<Value>,
    pub series: Vec<Series>,
    #[serde(default)]
    pub y_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2_label: Option<String>,
}

/// Arguments of a user-requested chart
#[derive(Debug, Clone, Default)]
pub struct CustomChartRequest<'a> {
    pub chart_type: &'a str,
    pub x_column: &'a str,
    pub y_column: &'a str,
    pub title: Option<&'a str>,
    pub color_column: Option<&'a str>,
}

impl ChartSpec {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| OrchestrationError::ChartError(format!("malformed chart payload: {}", e)))
    }

    /// Chart over columns picked by the inference collaborator.
    ///
    /// Every referenced column must exist in the dataset; the error names the
    /// offending column and lists the valid ones.
    pub fn custom(dataset: &Dataset, request: &CustomChartRequest<'_>) -> Result<Self> {
        let kind = ChartKind::parse(request.chart_type).ok_or_else(|| {
            OrchestrationError::ChartError(format!(
                "unsupported chart type '{}' (expected line, bar or scatter)",
                request.chart_type
            ))
        })?;

        let mut referenced = vec![request.x_column, request.y_column];
        referenced.extend(request.color_column);
        for column in referenced {
            if !dataset.has_column(column) {
                return Err(OrchestrationError::ChartError(format!(
                    "column '{}' does not exist; available columns: {}",
                    column,
                    dataset.columns().join(", ")
                )));
            }
        }

        let title = request
            .title
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} by {}", request.y_column, request.x_column));

        let xs = column_values(dataset, request.x_column)?;
        let ys = column_values(dataset, request.y_column)?;

        let (x, series) = match request.color_column {
            None => (
                xs,
                vec![Series {
                    name: request.y_column.to_string(),
                    y: ys,
                    axis: Axis::Primary,
                }],
            ),
            Some(color) => {
                let groups = column_values(dataset, color)?;
                split_by_group(&xs, &ys, &groups)
            }
        };

        Ok(Self {
            title,
            kind,
            x_label: request.x_column.to_string(),
            x,
            series,
            y_label: request.y_column.to_string(),
            y2_label: None,
        })
    }

    /// Closing price over time for one ticker
    pub fn price_history(ticker: &str, period_days: u32, prices: &Dataset) -> Result<Self> {
        let closes = column_values(prices, PRICE_COLUMN)?;
        Ok(Self {
            title: format!("{} share price over {} days", ticker.to_uppercase(), period_days),
            kind: ChartKind::Line,
            x_label: "Date".to_string(),
            x: row_labels(prices),
            series: vec![Series {
                name: ticker.to_uppercase(),
                y: closes,
                axis: Axis::Primary,
            }],
            y_label: "Closing price (USD)".to_string(),
            y2_label: None,
        })
    }

    /// One series per ticker column, over `calendarYear`
    pub fn fundamental_comparison(metric: &str, dataset: &Dataset) -> Result<Self> {
        let x = column_values(dataset, YEAR_COLUMN)?;
        let series = ticker_series(dataset, &[YEAR_COLUMN])?;
        Ok(Self {
            title: format!("{} over time", metric.to_uppercase()),
            kind: ChartKind::Line,
            x_label: "Year".to_string(),
            x,
            series,
            y_label: metric.to_uppercase(),
            y2_label: None,
        })
    }

    /// One series per ticker column; values are already normalized to base 100
    pub fn price_comparison(dataset: &Dataset) -> Result<Self> {
        let series = ticker_series(dataset, &[])?;
        Ok(Self {
            title: "Share price performance (base 100)".to_string(),
            kind: ChartKind::Line,
            x_label: "Date".to_string(),
            x: row_labels(dataset),
            series,
            y_label: "Normalized performance (base 100)".to_string(),
            y2_label: None,
        })
    }

    /// Revenue growth against earnings yield, the closing chart of a full
    /// risk analysis. Returns the missing column names when the dataset
    /// lacks any of the three required ones.
    pub fn growth_vs_valuation(
        ticker: &str,
        dataset: &Dataset,
    ) -> std::result::Result<Self, Vec<&'static str>> {
        let missing: Vec<&'static str> = [YEAR_COLUMN, GROWTH_COLUMN, VALUATION_COLUMN]
            .into_iter()
            .filter(|c| !dataset.has_column(c))
            .collect();
        if !missing.is_empty() || dataset.is_empty() {
            return Err(missing);
        }

        let owned = |name: &str| -> Vec<Value> {
            dataset
                .column(name)
                .map(|values| values.into_iter().cloned().collect())
                .unwrap_or_default()
        };

        Ok(Self {
            title: format!("Growth vs. valuation for {}", ticker.to_uppercase()),
            kind: ChartKind::Line,
            x_label: "Year".to_string(),
            x: owned(YEAR_COLUMN),
            series: vec![
                Series {
                    name: "Revenue growth (%)".to_string(),
                    y: owned(GROWTH_COLUMN),
                    axis: Axis::Primary,
                },
                Series {
                    name: "Earnings yield (valuation)".to_string(),
                    y: owned(VALUATION_COLUMN),
                    axis: Axis::Secondary,
                },
            ],
            y_label: "Annual revenue growth".to_string(),
            y2_label: Some("Earnings yield (inverse of P/E)".to_string()),
        })
    }
}

fn column_values(dataset: &Dataset, name: &str) -> Result<Vec<Value>> {
    dataset
        .column(name)
        .map(|values| values.into_iter().cloned().collect())
        .ok_or_else(|| OrchestrationError::ChartError(format!("column '{}' does not exist", name)))
}

/// Index values when present, otherwise row numbers
fn row_labels(dataset: &Dataset) -> Vec<Value> {
    if dataset.index.is_empty() {
        (0..dataset.row_count()).map(Value::from).collect()
    } else {
        dataset.index.clone()
    }
}

fn ticker_series(dataset: &Dataset, skip: &[&str]) -> Result<Vec<Series>> {
    let series: Vec<Series> = dataset
        .columns()
        .iter()
        .filter(|c| !skip.contains(&c.as_str()))
        .map(|c| {
            Ok(Series {
                name: c.clone(),
                y: column_values(dataset, c)?,
                axis: Axis::Primary,
            })
        })
        .collect::<Result<_>>()?;

    if series.is_empty() {
        return Err(OrchestrationError::ChartError(
            "comparison dataset has no ticker columns".to_string(),
        ));
    }
    Ok(series)
}

/// Pivot (x, y, group) triples into one series per group over the union of x
fn split_by_group(xs: &[Value], ys: &[Value], groups: &[Value]) -> (Vec<Value>, Vec<Series>) {
    let mut x_axis: Vec<Value> = Vec::new();
    for x in xs {
        if !x_axis.contains(x) {
            x_axis.push(x.clone());
        }
    }

    let mut by_group: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for ((x, y), group) in xs.iter().zip(ys).zip(groups) {
        let slot = x_axis.iter().position(|v| v == x).unwrap_or(0);
        let values = by_group
            .entry(cell_text(group))
            .or_insert_with(|| vec![Value::Null; x_axis.len()]);
        values[slot] = y.clone();
    }

    let series = by_group
        .into_iter()
        .map(|(name, y)| Series {
            name,
            y,
            axis: Axis::Primary,
        })
        .collect();

    (x_axis, series)
}
