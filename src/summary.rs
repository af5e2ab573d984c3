//! Per-window measurement summary
//!
//! Reconciles the client-side timestamp pairs drained from one window
//! with the server counter deltas bracketing it, producing a
//! [`PerfStatus`] sample. Pure functions of their inputs; the controller
//! owns all the sequencing.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use serde::Serialize;

use crate::client::{ContextStat, ModelStatus};
use crate::error::{MedirError, Result};
use crate::timestamp::{TimestampPair, NANOS_PER_SECOND};

/// One measurement sample exported to the report and CSV sinks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerfStatus {
    /// Concurrency level this sample was taken at
    pub concurrency: usize,
    /// Batch size of every request
    pub batch_size: usize,

    /// Requests counted by the server inside the window
    pub server_request_count: u64,
    /// Server-side total handling time delta in nanoseconds
    pub server_cumm_time_ns: u64,
    /// Server-side queue time delta in nanoseconds
    pub server_queue_time_ns: u64,
    /// Server-side compute time delta in nanoseconds
    pub server_compute_time_ns: u64,

    /// Requests counted by the client inside the window
    pub client_request_count: u64,
    /// Length of the client measurement window in nanoseconds
    pub client_duration_ns: u64,
    /// Smallest observed request latency in nanoseconds
    pub client_min_latency_ns: u64,
    /// Largest observed request latency in nanoseconds
    pub client_max_latency_ns: u64,
    /// Mean request latency in nanoseconds
    pub client_avg_latency_ns: u64,
    /// Latency standard deviation in microseconds
    ///
    /// Microseconds keep the squared terms inside 64 bits.
    pub std_us: u64,

    /// Average end-to-end client-library time per request in nanoseconds
    pub client_avg_request_time_ns: u64,
    /// Average marshal-and-send time per request in nanoseconds
    pub client_avg_send_time_ns: u64,
    /// Average receive-and-unmarshal time per request in nanoseconds
    pub client_avg_receive_time_ns: u64,

    /// Inferences per second seen by the client
    pub client_infer_per_sec: u64,
}

impl PerfStatus {
    /// Mean latency in whole milliseconds (dynamic-sweep stop test)
    #[must_use]
    pub fn avg_latency_ms(&self) -> u64 {
        self.client_avg_latency_ns / 1_000_000
    }
}

/// Fixed parameters of one summarization
#[derive(Debug, Clone, Copy)]
pub struct SummaryParams {
    /// Concurrency level being measured
    pub concurrency: usize,
    /// Batch size of every request
    pub batch_size: usize,
    /// Nominal measurement window length in milliseconds
    pub measurement_window_ms: u64,
    /// Requested model version; negative selects the latest
    pub model_version: i64,
}

/// Summarize one window's drained timestamps and counter deltas
///
/// The window is centered inside the drained span: workers may still be
/// ramping or draining at the edges, so only requests ending inside the
/// centered interior contribute to client statistics.
///
/// # Errors
///
/// Returns `Internal` when no request ends inside the window, or when
/// the end status is missing the target version or batch-size entry.
pub fn summarize(
    timestamps: &[TimestampPair],
    start_status: &ModelStatus,
    end_status: &ModelStatus,
    start_stat: &ContextStat,
    end_stat: &ContextStat,
    params: &SummaryParams,
) -> Result<PerfStatus> {
    let mut summary = PerfStatus {
        concurrency: params.concurrency,
        batch_size: params.batch_size,
        ..PerfStatus::default()
    };

    summarize_client(timestamps, params, &mut summary)?;
    summarize_context_stat(start_stat, end_stat, &mut summary);
    summarize_server(start_status, end_status, params, &mut summary)?;

    Ok(summary)
}

fn summarize_client(
    timestamps: &[TimestampPair],
    params: &SummaryParams,
    summary: &mut PerfStatus,
) -> Result<()> {
    let first_start_ns = timestamps.iter().map(|pair| pair.start_ns).min().unwrap_or(0);
    let last_end_ns = timestamps.iter().map(|pair| pair.end_ns).max().unwrap_or(0);

    // Center the nominal window inside the drained span. The measurement
    // sleep overshoots by 20% so that a nonzero interior normally exists
    // on both sides.
    let window_ns = params.measurement_window_ms * 1_000_000;
    let span_past_window = last_end_ns.saturating_sub(first_start_ns.saturating_add(window_ns));
    let offset = span_past_window / 2;
    let client_start_ns = first_start_ns + offset;
    let client_end_ns = client_start_ns + window_ns;

    let mut valid_count: u64 = 0;
    let mut min_latency_ns = u64::MAX;
    let mut max_latency_ns: u64 = 0;
    let mut total_latency_ns: u128 = 0;
    let mut total_square_latency_us: u128 = 0;
    for pair in timestamps {
        // Requests are counted by their end time; a boundary end is in.
        if pair.end_ns >= client_start_ns && pair.end_ns <= client_end_ns {
            let latency = pair.latency_ns();
            min_latency_ns = min_latency_ns.min(latency);
            max_latency_ns = max_latency_ns.max(latency);
            total_latency_ns += u128::from(latency);
            let latency_us = u128::from(latency) / 1000;
            total_square_latency_us += latency_us * latency_us;
            valid_count += 1;
        }
    }

    if valid_count == 0 {
        return Err(MedirError::Internal(
            "No valid requests recorded within time interval. \
             Please use a larger time window."
                .to_string(),
        ));
    }

    summary.client_request_count = valid_count;
    summary.client_duration_ns = client_end_ns - client_start_ns;
    summary.client_infer_per_sec = ((u128::from(valid_count)
        * u128::from(summary.batch_size as u64)
        * u128::from(NANOS_PER_SECOND))
        / u128::from(summary.client_duration_ns.max(1))) as u64;
    summary.client_min_latency_ns = min_latency_ns;
    summary.client_max_latency_ns = max_latency_ns;
    summary.client_avg_latency_ns = (total_latency_ns / u128::from(valid_count)) as u64;

    // Standard deviation in the microsecond domain, variance clamped at
    // zero against floating/integer roundoff.
    let expected_square_latency_us = total_square_latency_us / u128::from(valid_count);
    let avg_latency_us = u128::from(summary.client_avg_latency_ns) / 1000;
    let square_avg_latency_us = avg_latency_us * avg_latency_us;
    let variance_us = expected_square_latency_us.saturating_sub(square_avg_latency_us);
    summary.std_us = (variance_us as f64).sqrt() as u64;

    Ok(())
}

fn summarize_context_stat(
    start_stat: &ContextStat,
    end_stat: &ContextStat,
    summary: &mut PerfStatus,
) {
    let completed_count = end_stat
        .completed_request_count
        .saturating_sub(start_stat.completed_request_count);
    if completed_count == 0 {
        return;
    }
    let request_time_ns = end_stat
        .cumulative_total_request_time_ns
        .saturating_sub(start_stat.cumulative_total_request_time_ns);
    let send_time_ns = end_stat
        .cumulative_send_time_ns
        .saturating_sub(start_stat.cumulative_send_time_ns);
    let receive_time_ns = end_stat
        .cumulative_receive_time_ns
        .saturating_sub(start_stat.cumulative_receive_time_ns);
    summary.client_avg_request_time_ns = request_time_ns / completed_count;
    summary.client_avg_send_time_ns = send_time_ns / completed_count;
    summary.client_avg_receive_time_ns = receive_time_ns / completed_count;
}

fn summarize_server(
    start_status: &ModelStatus,
    end_status: &ModelStatus,
    params: &SummaryParams,
    summary: &mut PerfStatus,
) -> Result<()> {
    // Version -1 selects the numerically largest version present in the
    // end status; the start status is read under the same key. If the
    // server rolled versions mid-window the start entries default to
    // zero and the delta overcounts.
    let status_version = if params.model_version < 0 {
        end_status.version_status.keys().copied().max().unwrap_or(0)
    } else {
        params.model_version
    };

    let end_version = end_status
        .version_status
        .get(&status_version)
        .ok_or_else(|| MedirError::Internal("missing model version status".to_string()))?;
    let batch_key = u32::try_from(params.batch_size).unwrap_or(u32::MAX);
    let end_stats = end_version
        .infer_stats
        .get(&batch_key)
        .ok_or_else(|| MedirError::Internal("missing inference stats".to_string()))?;

    let start_stats = start_status
        .version_status
        .get(&status_version)
        .and_then(|version| version.infer_stats.get(&batch_key))
        .copied()
        .unwrap_or_default();

    summary.server_request_count = end_stats
        .success
        .count
        .saturating_sub(start_stats.success.count);
    summary.server_cumm_time_ns = end_stats
        .success
        .total_time_ns
        .saturating_sub(start_stats.success.total_time_ns);
    summary.server_queue_time_ns = end_stats
        .queue
        .total_time_ns
        .saturating_sub(start_stats.queue.total_time_ns);
    summary.server_compute_time_ns = end_stats
        .compute
        .total_time_ns
        .saturating_sub(start_stats.compute.total_time_ns);

    Ok(())
}
