use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{CountryFeatureVector, ImpactRow};

pub const FEATURE_YEARS: [i32; 3] = [2020, 2021, 2022];
pub const DEFAULT_K: usize = 3;
pub const RANDOM_SEED: u64 = 42;

const FEATURES: usize = 6;
const N_INIT: usize = 10;
const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-4;

/// Per-100k rate for one country-year.
///
/// `None` when the country has no rows for the year at all. A year that is
/// present but sums to zero (or only holds nulls) is a literal zero rate.
fn yearly_rate(
    rows: &[&ImpactRow],
    year: i32,
    population: f64,
    pick: fn(&ImpactRow) -> Option<f64>,
) -> Option<f64> {
    let mut reported = false;
    let mut total = 0.0;
    for row in rows.iter().filter(|row| row.year == year) {
        reported = true;
        total += pick(row).unwrap_or(0.0);
    }
    if !reported {
        return None;
    }
    if total == 0.0 {
        Some(0.0)
    } else {
        Some(total / population * 100_000.0)
    }
}

/// Six per-100k rates per country: deaths 2020-2022 then cases 2020-2022.
///
/// Countries without a positive population, or missing any year, are left out.
pub fn build_features(rows: &[ImpactRow]) -> Vec<(String, [f64; FEATURES])> {
    let mut by_country: BTreeMap<&str, Vec<&ImpactRow>> = BTreeMap::new();
    for row in rows {
        by_country.entry(row.country.as_str()).or_default().push(row);
    }

    let mut features = Vec::with_capacity(by_country.len());
    for (country, group) in by_country {
        let population = group
            .iter()
            .filter_map(|row| row.population)
            .fold(None, |max: Option<f64>, value| Some(max.map_or(value, |m| m.max(value))));
        let Some(population) = population.filter(|value| *value > 0.0) else {
            debug!(country, "dropping country without population");
            continue;
        };

        let mut values = [None; FEATURES];
        for (index, year) in FEATURE_YEARS.iter().enumerate() {
            values[index] = yearly_rate(&group, *year, population, |row| row.deaths);
            values[index + 3] = yearly_rate(&group, *year, population, |row| row.cases);
        }

        let mut complete = [0.0; FEATURES];
        let mut has_null = false;
        for (slot, value) in complete.iter_mut().zip(values) {
            match value {
                Some(value) => *slot = value,
                None => has_null = true,
            }
        }
        if has_null {
            debug!(country, "dropping country with missing yearly totals");
            continue;
        }
        features.push((country.to_string(), complete));
    }
    features
}

/// Zero mean, unit variance per column. Constant columns are only centred.
pub fn standardize<const D: usize>(points: &[[f64; D]]) -> Vec<[f64; D]> {
    let n = points.len() as f64;
    let mut scaled = points.to_vec();
    if points.is_empty() {
        return scaled;
    }

    for column in 0..D {
        let mean = points.iter().map(|point| point[column]).sum::<f64>() / n;
        let variance = points
            .iter()
            .map(|point| (point[column] - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        for point in scaled.iter_mut() {
            point[column] = (point[column] - mean) / scale;
        }
    }
    scaled
}

fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest<const D: usize>(point: &[f64; D], centers: &[[f64; D]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (index, center) in centers.iter().enumerate() {
        let distance = squared_distance(point, center);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

fn kmeans_plus_plus<const D: usize>(
    points: &[[f64; D]],
    k: usize,
    rng: &mut StdRng,
) -> Vec<[f64; D]> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);

    while centers.len() < k {
        let distances: Vec<f64> = points
            .iter()
            .map(|point| nearest(point, &centers).1)
            .collect();
        let total: f64 = distances.iter().sum();
        if total <= 0.0 {
            centers.push(points[rng.gen_range(0..points.len())]);
            continue;
        }

        let mut target = rng.gen::<f64>() * total;
        let mut chosen = points.len() - 1;
        for (index, distance) in distances.iter().enumerate() {
            if target < *distance {
                chosen = index;
                break;
            }
            target -= distance;
        }
        centers.push(points[chosen]);
    }
    centers
}

/// One Lloyd run from k-means++ seeds. Returns labels and inertia.
fn lloyd<const D: usize>(points: &[[f64; D]], k: usize, rng: &mut StdRng) -> (Vec<usize>, f64) {
    let mut centers = kmeans_plus_plus(points, k, rng);
    let mut labels = vec![0; points.len()];

    for _ in 0..MAX_ITER {
        for (label, point) in labels.iter_mut().zip(points) {
            *label = nearest(point, &centers).0;
        }

        let mut sums = vec![[0.0; D]; k];
        let mut counts = vec![0usize; k];
        for (label, point) in labels.iter().zip(points) {
            counts[*label] += 1;
            for (sum, value) in sums[*label].iter_mut().zip(point) {
                *sum += value;
            }
        }

        let mut shift = 0.0;
        for cluster in 0..k {
            let updated = if counts[cluster] == 0 {
                // Re-seed an empty cluster at the point farthest from its center.
                let (farthest, _) = points
                    .iter()
                    .enumerate()
                    .map(|(index, point)| {
                        (index, squared_distance(point, &centers[labels[index]]))
                    })
                    .fold((0, f64::NEG_INFINITY), |best, item| {
                        if item.1 > best.1 {
                            item
                        } else {
                            best
                        }
                    });
                labels[farthest] = cluster;
                points[farthest]
            } else {
                let mut mean = sums[cluster];
                for value in mean.iter_mut() {
                    *value /= counts[cluster] as f64;
                }
                mean
            };
            shift += squared_distance(&centers[cluster], &updated);
            centers[cluster] = updated;
        }

        if shift <= TOLERANCE * TOLERANCE {
            break;
        }
    }

    let mut inertia = 0.0;
    for (label, point) in labels.iter_mut().zip(points) {
        let (index, distance) = nearest(point, &centers);
        *label = index;
        inertia += distance;
    }
    (labels, inertia)
}

/// Best of several seeded k-means runs; labels renumbered by first appearance.
pub fn kmeans<const D: usize>(points: &[[f64; D]], k: usize, seed: u64) -> Vec<usize> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(Vec<usize>, f64)> = None;
    for _ in 0..N_INIT {
        let (labels, inertia) = lloyd(points, k, &mut rng);
        if best.as_ref().map_or(true, |(_, lowest)| inertia < *lowest) {
            best = Some((labels, inertia));
        }
    }

    let labels = best.map(|(labels, _)| labels).unwrap_or_default();
    let mut renumber: Vec<Option<usize>> = vec![None; k];
    let mut next = 0;
    labels
        .into_iter()
        .map(|label| {
            *renumber[label].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// Groups countries by per-capita pandemic impact across 2020-2022.
///
/// Returns an empty result when fewer countries survive filtering than
/// clusters were requested.
pub fn cluster(rows: &[ImpactRow], k: usize) -> Result<Vec<CountryFeatureVector>> {
    if k == 0 {
        return Err(PipelineError::InvalidArgument(
            "number of clusters must be at least 1".to_string(),
        ));
    }

    let features = build_features(rows);
    if features.is_empty() || features.len() < k {
        debug!(k, countries = features.len(), "not enough countries to cluster");
        return Ok(Vec::new());
    }

    let raw: Vec<[f64; FEATURES]> = features.iter().map(|(_, values)| *values).collect();
    let labels = kmeans(&standardize(&raw), k, RANDOM_SEED);
    info!(k, countries = features.len(), "countries clustered");

    Ok(features
        .into_iter()
        .zip(labels)
        .map(|((country, v), cluster)| CountryFeatureVector {
            country,
            deaths_2020_per100k: v[0],
            deaths_2021_per100k: v[1],
            deaths_2022_per100k: v[2],
            cases_2020_per100k: v[3],
            cases_2021_per100k: v[4],
            cases_2022_per100k: v[5],
            cluster,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MortalityTrend {
    Spike,
    Increasing,
    Decreasing,
    Mixed,
}

impl fmt::Display for MortalityTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MortalityTrend::Spike => "a sharp mortality spike in 2021",
            MortalityTrend::Increasing => "a steady increase in mortality",
            MortalityTrend::Decreasing => "a steady decrease in mortality",
            MortalityTrend::Mixed => "a mixed mortality trend",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseLevel {
    VeryHigh,
    Moderate,
    RelativelyLow,
}

impl fmt::Display for CaseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaseLevel::VeryHigh => "very high",
            CaseLevel::Moderate => "moderate",
            CaseLevel::RelativelyLow => "relatively low",
        })
    }
}

pub fn classify_mortality([d2020, d2021, d2022]: [f64; 3]) -> MortalityTrend {
    if d2021 > d2020 * 1.5 && d2021 > d2022 * 1.5 {
        MortalityTrend::Spike
    } else if d2020 < d2021 && d2021 < d2022 {
        MortalityTrend::Increasing
    } else if d2020 > d2021 && d2021 > d2022 {
        MortalityTrend::Decreasing
    } else {
        MortalityTrend::Mixed
    }
}

pub fn classify_cases(cases: [f64; 3]) -> CaseLevel {
    let average = cases.iter().sum::<f64>() / 3.0;
    if average > 20_000.0 {
        CaseLevel::VeryHigh
    } else if average > 10_000.0 {
        CaseLevel::Moderate
    } else {
        CaseLevel::RelativelyLow
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub members: usize,
    pub mean_deaths_per100k: [f64; 3],
    pub mean_cases_per100k: [f64; 3],
    pub mortality_trend: MortalityTrend,
    pub case_level: CaseLevel,
    pub summary: String,
}

fn thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0.0 && digits != "0" {
        grouped.insert(0, '-');
    }
    grouped
}

/// Mean rates and a plain-language reading of each cluster, by cluster id.
pub fn explain_clusters(features: &[CountryFeatureVector]) -> Vec<ClusterProfile> {
    let mut groups: BTreeMap<usize, ([f64; 3], [f64; 3], usize)> = BTreeMap::new();
    for row in features {
        let entry = groups.entry(row.cluster).or_insert(([0.0; 3], [0.0; 3], 0));
        for (sum, value) in entry.0.iter_mut().zip(row.deaths()) {
            *sum += value;
        }
        for (sum, value) in entry.1.iter_mut().zip(row.cases()) {
            *sum += value;
        }
        entry.2 += 1;
    }

    groups
        .into_iter()
        .map(|(cluster, (deaths, cases, members))| {
            let mean_deaths = deaths.map(|total| total / members as f64);
            let mean_cases = cases.map(|total| total / members as f64);
            let mortality_trend = classify_mortality(mean_deaths);
            let case_level = classify_cases(mean_cases);
            let summary = format!(
                "Cluster {cluster}: Countries with {mortality_trend}. On average, they had {case_level} case rates (~{} per 100k in 2020, {} in 2021, {} in 2022).",
                thousands(mean_cases[0]),
                thousands(mean_cases[1]),
                thousands(mean_cases[2]),
            );
            ClusterProfile {
                cluster,
                members,
                mean_deaths_per100k: mean_deaths,
                mean_cases_per100k: mean_cases,
                mortality_trend,
                case_level,
                summary,
            }
        })
        .collect()
}
