//! Aggregate statistics over a region's health records.
//!
//! Everything here is pure computation; the narrative sections built on top
//! of it live in `region_analysis`.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::HealthRecord;

const MIN_PAIRED_OBSERVATIONS: usize = 3;
const MAX_CORRELATIONS: usize = 10;
const MAX_CATEGORY_VALUES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub first: String,
    pub second: String,
    pub coefficient: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

/// Everything computed from the raw records, handed to the narrative prompts
/// and to the response statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataPackage {
    pub total_records: usize,
    pub features: Vec<String>,
    pub statistics: BTreeMap<String, FeatureStats>,
    pub correlations: Vec<Correlation>,
    pub categories: BTreeMap<String, Vec<CategoryCount>>,
    pub risk_scores: BTreeMap<String, f64>,
}

/// A clinical risk flagged when any of its measurements crosses a threshold.
struct RiskIndicator {
    name: &'static str,
    thresholds: &'static [(&'static [&'static str], f64)],
}

const RISK_INDICATORS: &[RiskIndicator] = &[
    RiskIndicator {
        name: "hypertension",
        thresholds: &[
            (&["systolic_bp", "sys_bp", "systolic"], 140.0),
            (&["diastolic_bp", "dia_bp", "diastolic"], 90.0),
        ],
    },
    RiskIndicator {
        name: "diabetes",
        thresholds: &[
            (&["blood_glucose", "glucose", "fasting_glucose"], 126.0),
            (&["hba1c"], 6.5),
        ],
    },
    RiskIndicator {
        name: "obesity",
        thresholds: &[(&["bmi"], 30.0)],
    },
    RiskIndicator {
        name: "high_cholesterol",
        thresholds: &[(&["cholesterol", "total_cholesterol"], 240.0)],
    },
];

pub fn build_data_package(records: &[HealthRecord]) -> DataPackage {
    let columns = numeric_columns(records);

    DataPackage {
        total_records: records.len(),
        features: columns.keys().cloned().collect(),
        statistics: columns
            .iter()
            .filter_map(|(name, values)| feature_stats(values).map(|s| (name.clone(), s)))
            .collect(),
        correlations: strongest_correlations(&columns),
        categories: category_counts(records),
        risk_scores: risk_scores(records),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Per-feature columns aligned by record index; `None` where a record does
/// not report the feature.
fn numeric_columns(records: &[HealthRecord]) -> BTreeMap<String, Vec<Option<f64>>> {
    let names: BTreeSet<&String> = records
        .iter()
        .flat_map(|r| r.data.iter())
        .filter(|(_, v)| numeric_value(v).is_some())
        .map(|(k, _)| k)
        .collect();

    names
        .into_iter()
        .map(|name| {
            let column = records
                .iter()
                .map(|r| r.data.get(name).and_then(numeric_value))
                .collect();
            (name.clone(), column)
        })
        .collect()
}

fn feature_stats(column: &[Option<f64>]) -> Option<FeatureStats> {
    let values: Vec<f64> = column.iter().flatten().copied().collect();
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    Some(FeatureStats {
        count,
        mean: round(mean, 2),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std_dev: round(variance.sqrt(), 2),
    })
}

/// Pearson correlation over the records that report both features.
fn pearson(first: &[Option<f64>], second: &[Option<f64>]) -> Option<(f64, usize)> {
    let pairs: Vec<(f64, f64)> = first
        .iter()
        .zip(second)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();

    let n = pairs.len();
    if n < MIN_PAIRED_OBSERVATIONS {
        return None;
    }

    let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / n as f64;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        cov += (a - mean_a) * (b - mean_b);
        var_a += (a - mean_a).powi(2);
        var_b += (b - mean_b).powi(2);
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt()), n))
}

fn strongest_correlations(columns: &BTreeMap<String, Vec<Option<f64>>>) -> Vec<Correlation> {
    let entries: Vec<(&String, &Vec<Option<f64>>)> = columns.iter().collect();

    let mut correlations = Vec::new();
    for (i, (first, a)) in entries.iter().enumerate() {
        for (second, b) in &entries[i + 1..] {
            if let Some((coefficient, observations)) = pearson(a, b) {
                correlations.push(Correlation {
                    first: (*first).clone(),
                    second: (*second).clone(),
                    coefficient: round(coefficient, 3),
                    observations,
                });
            }
        }
    }

    correlations.sort_by(|x, y| y.coefficient.abs().total_cmp(&x.coefficient.abs()));
    correlations.truncate(MAX_CORRELATIONS);
    correlations
}

fn category_counts(records: &[HealthRecord]) -> BTreeMap<String, Vec<CategoryCount>> {
    let mut counts: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
    for record in records {
        for (field, value) in &record.data {
            if let Value::String(s) = value {
                let s = s.trim();
                if !s.is_empty() {
                    *counts
                        .entry(field.clone())
                        .or_default()
                        .entry(s.to_string())
                        .or_default() += 1;
                }
            }
        }
    }

    counts
        .into_iter()
        .map(|(field, values)| {
            let mut values: Vec<CategoryCount> = values
                .into_iter()
                .map(|(value, count)| CategoryCount { value, count })
                .collect();
            values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
            values.truncate(MAX_CATEGORY_VALUES);
            (field, values)
        })
        .collect()
}

/// Percentage of reporting records flagged for each indicator. Indicators no
/// record reports are left out.
fn risk_scores(records: &[HealthRecord]) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();

    for indicator in RISK_INDICATORS {
        let mut reporting = 0usize;
        let mut flagged = 0usize;

        for record in records {
            let readings: Vec<(f64, f64)> = indicator
                .thresholds
                .iter()
                .filter_map(|(aliases, threshold)| {
                    lookup_alias(record, aliases).map(|value| (value, *threshold))
                })
                .collect();

            if readings.is_empty() {
                continue;
            }
            reporting += 1;
            if readings.iter().any(|(value, threshold)| value >= threshold) {
                flagged += 1;
            }
        }

        if reporting > 0 {
            let pct = flagged as f64 * 100.0 / reporting as f64;
            scores.insert(indicator.name.to_string(), round(pct, 1));
        }
    }

    scores
}

fn lookup_alias(record: &HealthRecord, aliases: &[&str]) -> Option<f64> {
    record.data.iter().find_map(|(key, value)| {
        aliases
            .iter()
            .any(|alias| key.eq_ignore_ascii_case(alias))
            .then(|| numeric_value(value))
            .flatten()
    })
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
