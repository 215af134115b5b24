//! Cluster accounting rows and the pricing engine.
//!
//! Rows arrive as strings straight from the scheduler's accounting dump.
//! Every parser here is total: malformed fields price as zero rather than
//! failing the whole batch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::money::to_cents;
use crate::rates::RateTable;
use crate::tier::Tier;

/// One raw accounting row as delivered by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Submitting username.
    pub user: String,
    /// Scheduler job id; step rows carry a `.step` suffix.
    pub job_id: String,
    /// Wall-clock duration, `D-HH:MM:SS`, `HH:MM:SS`, or `MM:SS`.
    pub elapsed: String,
    /// Aggregate CPU time across cores, same formats as `elapsed`.
    pub total_cpu: String,
    /// Requested trackable resources, e.g. `cpu=8,mem=32G,gres/gpu=2`.
    pub req_tres: String,
    /// Final scheduler state, e.g. `COMPLETED`.
    pub state: String,
    /// Job end timestamp as reported by the scheduler.
    pub end: String,
}

/// One priced parent job, ready to become a receipt line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedJob {
    /// Submitting username.
    pub username: String,
    /// Canonical job id, used as the global billing dedup key.
    pub job_key: String,
    /// Billable CPU core-hours.
    pub cpu_core_hours: f64,
    /// Billable GPU-hours.
    pub gpu_hours: f64,
    /// Billable memory GB-hours.
    pub mem_gb_hours: f64,
    /// Tier the cost was computed at.
    pub tier: Tier,
    /// Cost in integer cents.
    pub cost_cents: i64,
    /// Final scheduler state, carried through for display.
    pub state: String,
    /// Job end timestamp, carried through for display.
    pub end: String,
}

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)-)?(?:(\d+):)?(\d+):(\d+(?:\.\d+)?)$")
        .unwrap_or_else(|e| panic!("invalid duration regex: {e}"))
});
static CPU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cpu=(\d+)").unwrap_or_else(|e| panic!("invalid cpu regex: {e}")));
static GPU_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"gres/gpu=(\d+)").unwrap_or_else(|e| panic!("invalid gpu regex: {e}"))
});
static MEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mem=(\d+(?:\.\d+)?)([MG])").unwrap_or_else(|e| panic!("invalid mem regex: {e}"))
});
static ARRAY_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(?:_\d+)?$").unwrap_or_else(|e| panic!("invalid job id regex: {e}"))
});

/// Parse a scheduler duration into fractional hours.
///
/// Accepts `D-HH:MM:SS[.fff]`, `HH:MM:SS[.fff]`, and `MM:SS[.fff]`.
/// Malformed input parses as `0.0`.
#[must_use]
pub fn hms_to_hours(text: &str) -> f64 {
    let Some(caps) = DURATION_RE.captures(text.trim()) else {
        return 0.0;
    };
    let days: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let hours: f64 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let minutes: f64 = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let seconds: f64 = caps
        .get(4)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    days * 24.0 + hours + minutes / 60.0 + seconds / 3600.0
}

/// Requested CPU count from a TRES string (`cpu=N`), 0 when absent.
#[must_use]
pub fn extract_cpu_count(req_tres: &str) -> u64 {
    CPU_RE
        .captures(req_tres)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Requested GPU count from a TRES string (`gres/gpu=N`), 0 when absent.
#[must_use]
pub fn extract_gpu_count(req_tres: &str) -> u64 {
    GPU_RE
        .captures(req_tres)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Requested memory in GB from a TRES string (`mem=<n>[MG]`), 0 when absent.
#[must_use]
pub fn extract_mem_gb(req_tres: &str) -> f64 {
    let Some(caps) = MEM_RE.captures(req_tres) else {
        return 0.0;
    };
    let value: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    match caps.get(2).map(|m| m.as_str()) {
        Some("M") => value / 1024.0,
        _ => value,
    }
}

/// Canonical billing key for a job id.
///
/// Step rows like `12345.batch` or `12345.0` collapse to the parent id
/// `12345` (array tasks `12345_7.ext` likewise); anything else passes
/// through unchanged.
#[must_use]
pub fn canonical_job_id(job_id: &str) -> String {
    if let Some((prefix, _)) = job_id.split_once('.') {
        if ARRAY_ID_RE.is_match(prefix) {
            return prefix.to_string();
        }
    }
    job_id.to_string()
}

/// Price a batch of accounting rows.
///
/// Step rows are discarded; only parent jobs bill. CPU core-hours come
/// from the aggregate CPU time when the scheduler reported one, otherwise
/// from requested cores times wall-clock. `resolve_tier` maps a username
/// to its billing tier (override first, then classification).
///
/// # Errors
///
/// Currently infallible; the `Result` leaves room for tier resolvers that
/// consult external state.
pub fn compute_job_costs<F>(
    jobs: &[JobRecord],
    rates: &RateTable,
    mut resolve_tier: F,
) -> Result<Vec<PricedJob>>
where
    F: FnMut(&str) -> Tier,
{
    let mut priced = Vec::with_capacity(jobs.len());
    for job in jobs {
        let job_key = canonical_job_id(&job.job_id);
        if job_key != job.job_id {
            // Step row; its usage is already in the parent.
            continue;
        }

        let elapsed_hours = hms_to_hours(&job.elapsed);
        let total_cpu_hours = hms_to_hours(&job.total_cpu);
        #[allow(clippy::cast_precision_loss)]
        let cpu_core_hours = if total_cpu_hours > 0.0 {
            total_cpu_hours
        } else {
            extract_cpu_count(&job.req_tres) as f64 * elapsed_hours
        };
        #[allow(clippy::cast_precision_loss)]
        let gpu_hours = extract_gpu_count(&job.req_tres) as f64 * elapsed_hours;
        let mem_gb_hours = extract_mem_gb(&job.req_tres) * elapsed_hours;

        let tier = resolve_tier(&job.user);
        let card = rates.for_tier(tier);
        let cost =
            cpu_core_hours * card.cpu + gpu_hours * card.gpu + mem_gb_hours * card.mem;

        priced.push(PricedJob {
            username: job.user.clone(),
            job_key,
            cpu_core_hours,
            gpu_hours,
            mem_gb_hours,
            tier,
            cost_cents: to_cents(cost),
            state: job.state.clone(),
            end: job.end.clone(),
        });
    }
    Ok(priced)
}

/// Result of one accounting fetch.
#[derive(Debug, Clone)]
pub struct JobFetch {
    /// The raw rows.
    pub jobs: Vec<JobRecord>,
    /// Label for where the rows came from.
    pub source: String,
    /// Human-readable fetch notes (warnings, truncations).
    pub notes: Vec<String>,
}

/// A source of cluster accounting rows.
///
/// Concrete scheduler integrations live outside this workspace; billing
/// only depends on this contract.
#[async_trait::async_trait]
pub trait JobSource: Send + Sync {
    /// Fetch rows whose end time falls in `[start, end]`, optionally for a
    /// single user.
    async fn fetch_jobs(
        &self,
        start: &str,
        end: &str,
        username: Option<&str>,
    ) -> Result<JobFetch>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::RateTable;

    fn job(user: &str, job_id: &str, elapsed: &str, total_cpu: &str, tres: &str) -> JobRecord {
        JobRecord {
            user: user.into(),
            job_id: job_id.into(),
            elapsed: elapsed.into(),
            total_cpu: total_cpu.into(),
            req_tres: tres.into(),
            state: "COMPLETED".into(),
            end: "2025-03-01T10:00:00".into(),
        }
    }

    #[test]
    fn duration_formats() {
        assert!((hms_to_hours("1-02:30:00") - 26.5).abs() < 1e-9);
        assert!((hms_to_hours("02:30:00") - 2.5).abs() < 1e-9);
        assert!((hms_to_hours("30:00") - 0.5).abs() < 1e-9);
        assert!((hms_to_hours("00:00:01.500") - 1.5 / 3600.0).abs() < 1e-12);
        assert_eq!(hms_to_hours("whenever"), 0.0);
        assert_eq!(hms_to_hours(""), 0.0);
    }

    #[test]
    fn tres_extraction() {
        let tres = "billing=8,cpu=8,mem=32G,gres/gpu=2,node=1";
        assert_eq!(extract_cpu_count(tres), 8);
        assert_eq!(extract_gpu_count(tres), 2);
        assert!((extract_mem_gb(tres) - 32.0).abs() < 1e-9);
        assert!((extract_mem_gb("mem=512M") - 0.5).abs() < 1e-9);
        assert_eq!(extract_cpu_count("node=1"), 0);
    }

    #[test]
    fn canonical_ids_collapse_steps() {
        assert_eq!(canonical_job_id("12345.batch"), "12345");
        assert_eq!(canonical_job_id("12345.0"), "12345");
        assert_eq!(canonical_job_id("12345_7.extern"), "12345_7");
        assert_eq!(canonical_job_id("12345"), "12345");
        assert_eq!(canonical_job_id("job.named"), "job.named");
    }

    #[test]
    fn step_rows_are_not_priced() {
        let rows = vec![
            job("acme.co.th", "100", "01:00:00", "", "cpu=4,mem=8G"),
            job("acme.co.th", "100.batch", "01:00:00", "", "cpu=4,mem=8G"),
        ];
        let priced =
            compute_job_costs(&rows, &RateTable::default(), classify).unwrap();
        assert_eq!(priced.len(), 1);
        assert_eq!(priced[0].job_key, "100");
    }

    #[test]
    fn total_cpu_preferred_over_requested() {
        // 2h elapsed, 8h aggregate CPU: bill 8 core-hours, not 16.
        let rows = vec![job("x9z", "7", "02:00:00", "08:00:00", "cpu=8")];
        let priced =
            compute_job_costs(&rows, &RateTable::default(), classify).unwrap();
        assert!((priced[0].cpu_core_hours - 8.0).abs() < 1e-9);
    }

    #[test]
    fn private_gpu_job_cost() {
        // 1h, 4 cpu-core-hours + 1 gpu-hour + 8 mem-gb-hours at private
        // rates: 4*5 + 1*100 + 8*2 = 136.00
        let rows = vec![job("x9z", "42", "01:00:00", "04:00:00", "cpu=4,mem=8G,gres/gpu=1")];
        let priced =
            compute_job_costs(&rows, &RateTable::default(), classify).unwrap();
        assert_eq!(priced[0].cost_cents, 13_600);
        assert_eq!(priced[0].tier, Tier::Private);
    }

    fn classify(user: &str) -> Tier {
        crate::tier::classify_username(user)
    }
}
