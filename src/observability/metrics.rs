//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! operational statistics across job processing, pipeline steps, and
//! terminology lookups. Served as a JSON snapshot on `GET /metrics`.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Job lifecycle metrics (atomic for high frequency)
    jobs_received: AtomicU64,
    jobs_running: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_rejected: AtomicU64,
    max_jobs_running_reached: AtomicU64,

    // Run durations (mutex protected for percentile computation)
    run_times: Mutex<Vec<u64>>, // in milliseconds

    // Per-step statistics (mutex protected for complex data)
    step_stats: Mutex<HashMap<String, StepExecutionStats>>,

    // Terminology lookup metrics
    code_lookups: AtomicU64,
    code_hits: AtomicU64,
    code_misses: AtomicU64,
    description_searches: AtomicU64,
    fuzzy_fallbacks: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_received: AtomicU64::new(0),
            jobs_running: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            max_jobs_running_reached: AtomicU64::new(0),
            run_times: Mutex::new(Vec::new()),
            step_stats: Mutex::new(HashMap::new()),
            code_lookups: AtomicU64::new(0),
            code_hits: AtomicU64::new(0),
            code_misses: AtomicU64::new(0),
            description_searches: AtomicU64::new(0),
            fuzzy_fallbacks: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Job lifecycle metrics
    pub fn job_received(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        let new_count = self.jobs_running.fetch_add(1, Ordering::Relaxed) + 1;

        // Track the high-water mark of simultaneously running jobs
        let current_max = self.max_jobs_running_reached.load(Ordering::Relaxed);
        if new_count > current_max {
            self.max_jobs_running_reached
                .store(new_count, Ordering::Relaxed);
        }
    }

    pub fn job_completed(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.jobs_running.fetch_sub(1, Ordering::Relaxed);
        self.record_run_time(duration);
    }

    pub fn job_failed(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.jobs_running.fetch_sub(1, Ordering::Relaxed);

        // Record run time even for failed jobs
        self.record_run_time(duration);
    }

    fn record_run_time(&self, duration: Duration) {
        if let Ok(mut times) = self.run_times.lock() {
            times.push(duration.as_millis() as u64);

            // Limit to last 1000 measurements to prevent unbounded growth
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    // Step execution metrics
    pub fn step_executed(&self, step_name: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.step_stats.lock() {
            let step_stats = Self::get_or_create_step_stats(&mut stats, step_name);
            Self::update_step_execution_stats(step_stats, duration, success);
        }
    }

    pub fn step_skipped(&self, step_name: &str) {
        if let Ok(mut stats) = self.step_stats.lock() {
            let step_stats = Self::get_or_create_step_stats(&mut stats, step_name);
            step_stats.skips += 1;
        }
    }

    /// Create or retrieve step stats entry (pure function)
    fn get_or_create_step_stats<'a>(
        stats: &'a mut HashMap<String, StepExecutionStats>,
        step_name: &str,
    ) -> &'a mut StepExecutionStats {
        stats
            .entry(step_name.to_string())
            .or_insert_with(|| StepExecutionStats {
                name: step_name.to_string(),
                executions: 0,
                failures: 0,
                skips: 0,
                execution_times: Vec::new(),
                last_execution: 0,
            })
    }

    /// Update step execution statistics (pure function)
    fn update_step_execution_stats(
        step_stats: &mut StepExecutionStats,
        duration: Duration,
        success: bool,
    ) {
        step_stats.executions += 1;
        step_stats.last_execution = current_timestamp();
        step_stats.execution_times.push(duration.as_millis() as u64);

        // Limit execution times to prevent unbounded growth
        if step_stats.execution_times.len() > 1000 {
            step_stats.execution_times.remove(0);
        }

        if !success {
            step_stats.failures += 1;
        }
    }

    // Terminology lookup metrics
    pub fn code_lookup(&self, hit: bool) {
        self.code_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.code_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.code_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn description_search(&self, fuzzy_fallback: bool) {
        self.description_searches.fetch_add(1, Ordering::Relaxed);
        if fuzzy_fallback {
            self.fuzzy_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        self.jobs_received.store(0, Ordering::Relaxed);
        self.jobs_running.store(0, Ordering::Relaxed);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.jobs_rejected.store(0, Ordering::Relaxed);
        self.max_jobs_running_reached.store(0, Ordering::Relaxed);
        self.code_lookups.store(0, Ordering::Relaxed);
        self.code_hits.store(0, Ordering::Relaxed);
        self.code_misses.store(0, Ordering::Relaxed);
        self.description_searches.store(0, Ordering::Relaxed);
        self.fuzzy_fallbacks.store(0, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.run_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.step_stats.lock() {
            stats.clear();
        }
    }

    /// Calculate run time statistics (pure function)
    fn calculate_run_time_statistics(&self) -> (f64, f64, f64, f64) {
        if let Ok(times) = self.run_times.lock() {
            if times.is_empty() {
                (0.0, 0.0, 0.0, 0.0)
            } else {
                let mut sorted_times = times.clone();
                sorted_times.sort_unstable();

                let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
                let p50 = percentile(&sorted_times, 50.0);
                let p95 = percentile(&sorted_times, 95.0);
                let p99 = percentile(&sorted_times, 99.0);

                (avg, p50, p95, p99)
            }
        } else {
            (0.0, 0.0, 0.0, 0.0)
        }
    }

    /// Build step statistics summary (pure function)
    fn build_step_statistics(
        &self,
    ) -> (HashMap<String, StepExecutionStatsSnapshot>, u64, u64, u64, f64) {
        if let Ok(stats) = self.step_stats.lock() {
            let mut processed_stats = HashMap::new();
            let mut total_executions = 0u64;
            let mut total_failures = 0u64;
            let mut total_skips = 0u64;
            let mut total_time = 0u64;
            let mut total_count = 0u64;

            for (name, stats) in stats.iter() {
                processed_stats.insert(name.clone(), Self::create_step_snapshot(stats));

                total_executions += stats.executions;
                total_failures += stats.failures;
                total_skips += stats.skips;
                total_time += stats.execution_times.iter().sum::<u64>();
                total_count += stats.execution_times.len() as u64;
            }

            let avg_all_steps = if total_count == 0 {
                0.0
            } else {
                total_time as f64 / total_count as f64
            };

            (
                processed_stats,
                total_executions,
                total_failures,
                total_skips,
                avg_all_steps,
            )
        } else {
            (HashMap::new(), 0, 0, 0, 0.0)
        }
    }

    /// Create step execution snapshot (pure function)
    fn create_step_snapshot(stats: &StepExecutionStats) -> StepExecutionStatsSnapshot {
        let avg_execution_time = if stats.execution_times.is_empty() {
            0.0
        } else {
            stats.execution_times.iter().sum::<u64>() as f64 / stats.execution_times.len() as f64
        };

        let success_rate = if stats.executions == 0 {
            0.0
        } else {
            (stats.executions - stats.failures) as f64 / stats.executions as f64
        };

        StepExecutionStatsSnapshot {
            name: stats.name.clone(),
            executions: stats.executions,
            failures: stats.failures,
            skips: stats.skips,
            avg_execution_time_ms: avg_execution_time,
            last_execution: stats.last_execution,
            success_rate,
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_run_time_ms, p50, p95, p99) = self.calculate_run_time_statistics();
        let (step_stats, total_executions, total_failures, total_skips, avg_step_time) =
            self.build_step_statistics();

        MetricsSnapshot {
            jobs: JobMetrics {
                jobs_received: self.jobs_received.load(Ordering::Relaxed),
                jobs_running: self.jobs_running.load(Ordering::Relaxed),
                jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
                jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
                jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
                avg_run_time_ms,
                run_time_p50_ms: p50,
                run_time_p95_ms: p95,
                run_time_p99_ms: p99,
                max_jobs_running_reached: self.max_jobs_running_reached.load(Ordering::Relaxed)
                    as u32,
            },
            steps: StepMetrics {
                step_stats,
                total_executions,
                total_failures,
                total_skips,
                avg_execution_time_ms: avg_step_time,
            },
            terminology: TerminologyMetrics {
                code_lookups: self.code_lookups.load(Ordering::Relaxed),
                code_hits: self.code_hits.load(Ordering::Relaxed),
                code_misses: self.code_misses.load(Ordering::Relaxed),
                description_searches: self.description_searches.load(Ordering::Relaxed),
                fuzzy_fallbacks: self.fuzzy_fallbacks.load(Ordering::Relaxed),
            },
            uptime_seconds: now - self.uptime_start.load(Ordering::Relaxed),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal step statistics (with timing data)
#[derive(Debug)]
struct StepExecutionStats {
    name: String,
    executions: u64,
    failures: u64,
    skips: u64,
    execution_times: Vec<u64>, // milliseconds
    last_execution: u64,
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub jobs: JobMetrics,
    pub steps: StepMetrics,
    pub terminology: TerminologyMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct JobMetrics {
    pub jobs_received: u64,
    pub jobs_running: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
    pub avg_run_time_ms: f64,
    pub run_time_p50_ms: f64,
    pub run_time_p95_ms: f64,
    pub run_time_p99_ms: f64,
    pub max_jobs_running_reached: u32,
}

#[derive(Debug, Serialize)]
pub struct StepMetrics {
    pub step_stats: HashMap<String, StepExecutionStatsSnapshot>,
    pub total_executions: u64,
    pub total_failures: u64,
    pub total_skips: u64,
    pub avg_execution_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct StepExecutionStatsSnapshot {
    pub name: String,
    pub executions: u64,
    pub failures: u64,
    pub skips: u64,
    pub avg_execution_time_ms: f64,
    pub last_execution: u64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct TerminologyMetrics {
    pub code_lookups: u64,
    pub code_hits: u64,
    pub code_misses: u64,
    pub description_searches: u64,
    pub fuzzy_fallbacks: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
