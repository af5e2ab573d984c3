//! Report and CSV sinks for measurement samples
//!
//! One human-readable block per completed step, a closing
//! throughput-vs-latency listing for dynamic sweeps, and an optional
//! tabular file with the latency components broken out in microseconds.

use std::io::Write;
use std::path::Path;

use crate::client::Protocol;
use crate::error::{MedirError, Result};
use crate::summary::PerfStatus;

/// Print the report block for one completed step
pub fn report_step(summary: &PerfStatus, protocol: Protocol, verbose: bool) {
    let server_count = summary.server_request_count;
    let cumm_avg_us = checked_avg_us(summary.server_cumm_time_ns, server_count);
    let queue_avg_us = checked_avg_us(summary.server_queue_time_ns, server_count);
    let compute_avg_us = checked_avg_us(summary.server_compute_time_ns, server_count);
    let overhead_us = cumm_avg_us.saturating_sub(queue_avg_us + compute_avg_us);

    let avg_latency_us = summary.client_avg_latency_ns / 1000;
    let avg_request_time_us = summary.client_avg_request_time_ns / 1000;
    let avg_send_time_us = summary.client_avg_send_time_ns / 1000;
    let avg_receive_time_us = summary.client_avg_receive_time_ns / 1000;
    let avg_response_wait_us =
        avg_request_time_us.saturating_sub(avg_send_time_us + avg_receive_time_us);

    let client_library_detail = match protocol {
        Protocol::Grpc => {
            let total = avg_send_time_us + avg_receive_time_us + avg_request_time_us;
            if verbose {
                format!(
                    "    Avg gRPC time: {total} usec (marshal {avg_send_time_us} usec \
                     + response wait {avg_request_time_us} usec \
                     + unmarshal {avg_receive_time_us} usec)"
                )
            } else {
                format!(
                    "    Avg gRPC time: {total} usec ((un)marshal request/response {} usec \
                     + response wait {avg_request_time_us} usec)",
                    avg_send_time_us + avg_receive_time_us
                )
            }
        }
        Protocol::Http => {
            if verbose {
                format!(
                    "    Avg HTTP time: {avg_request_time_us} usec (send {avg_send_time_us} usec \
                     + response wait {avg_response_wait_us} usec \
                     + receive {avg_receive_time_us} usec)"
                )
            } else {
                format!(
                    "    Avg HTTP time: {avg_request_time_us} usec (send/recv {} usec \
                     + response wait {avg_response_wait_us} usec)",
                    avg_send_time_us + avg_receive_time_us
                )
            }
        }
    };

    println!("  Client: ");
    println!("    Request count: {}", summary.client_request_count);
    println!(
        "    Throughput: {} infer/sec",
        summary.client_infer_per_sec
    );
    println!(
        "    Avg latency: {avg_latency_us} usec (standard deviation {} usec)",
        summary.std_us
    );
    println!("{client_library_detail}");
    println!("  Server: ");
    println!("    Request count: {server_count}");
    println!(
        "    Avg request latency: {cumm_avg_us} usec (overhead {overhead_us} usec + \
         queue {queue_avg_us} usec + compute {compute_avg_us} usec)"
    );
    println!();
}

/// Print the closing throughput-vs-latency listing for a dynamic sweep
pub fn print_sweep_summary(summaries: &[PerfStatus]) {
    println!("Inferences/Second vs. Client Average Batch Latency");
    for status in summaries {
        println!(
            "Concurrency: {}, {} infer/sec, latency {} usec",
            status.concurrency,
            status.client_infer_per_sec,
            status.client_avg_latency_ns / 1000
        );
    }
}

/// Write the throughput-vs-latency curve as CSV, rows ascending by
/// inferences per second, all times in microseconds
///
/// # Errors
///
/// Returns `Internal` when the file cannot be created or written.
pub fn write_csv(path: &Path, summaries: &[PerfStatus]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .map_err(|e| MedirError::Internal(format!("failed to create {}: {e}", path.display())))?;
    writeln!(
        file,
        "Concurrency,Inferences/Second,Client Send,Network+Server Send/Recv,\
         Server Queue,Server Compute,Client Recv"
    )
    .map_err(|e| MedirError::Internal(format!("failed to write {}: {e}", path.display())))?;

    let mut sorted: Vec<&PerfStatus> = summaries.iter().collect();
    sorted.sort_by_key(|status| status.client_infer_per_sec);

    for status in sorted {
        let avg_queue_ns = status
            .server_queue_time_ns
            .checked_div(status.server_request_count)
            .unwrap_or(0);
        let avg_compute_ns = status
            .server_compute_time_ns
            .checked_div(status.server_request_count)
            .unwrap_or(0);
        // Whatever part of the client latency neither endpoint accounts
        // for: network plus client/server send-receive overlap.
        let avg_network_misc_ns = status.client_avg_latency_ns.saturating_sub(
            avg_queue_ns
                + avg_compute_ns
                + status.client_avg_send_time_ns
                + status.client_avg_receive_time_ns,
        );
        writeln!(
            file,
            "{},{},{},{},{},{},{}",
            status.concurrency,
            status.client_infer_per_sec,
            status.client_avg_send_time_ns / 1000,
            avg_network_misc_ns / 1000,
            avg_queue_ns / 1000,
            avg_compute_ns / 1000,
            status.client_avg_receive_time_ns / 1000
        )
        .map_err(|e| MedirError::Internal(format!("failed to write {}: {e}", path.display())))?;
    }
    Ok(())
}

fn checked_avg_us(total_ns: u64, count: u64) -> u64 {
    (total_ns / 1000).checked_div(count).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(concurrency: usize, infer_per_sec: u64) -> PerfStatus {
        PerfStatus {
            concurrency,
            batch_size: 1,
            server_request_count: 100,
            server_cumm_time_ns: 900_000_000,
            server_queue_time_ns: 100_000_000,
            server_compute_time_ns: 600_000_000,
            client_request_count: 90,
            client_duration_ns: 1_000_000_000,
            client_min_latency_ns: 8_000_000,
            client_max_latency_ns: 12_000_000,
            client_avg_latency_ns: 10_000_000,
            std_us: 120,
            client_avg_request_time_ns: 9_500_000,
            client_avg_send_time_ns: 50_000,
            client_avg_receive_time_ns: 70_000,
            client_infer_per_sec: infer_per_sec,
        }
    }

    #[test]
    fn test_csv_rows_sorted_by_throughput() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("curve.csv");
        let summaries = vec![sample(3, 290), sample(1, 110), sample(2, 205)];
        write_csv(&path, &summaries).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines[0],
            "Concurrency,Inferences/Second,Client Send,Network+Server Send/Recv,\
             Server Queue,Server Compute,Client Recv"
        );
        assert!(lines[1].starts_with("1,110,"));
        assert!(lines[2].starts_with("2,205,"));
        assert!(lines[3].starts_with("3,290,"));
    }

    #[test]
    fn test_csv_columns_in_microseconds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("curve.csv");
        write_csv(&path, &[sample(1, 100)]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let row = contents.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        // queue avg = 100ms/100 = 1ms = 1000us; compute avg = 6000us.
        assert_eq!(fields[4], "1000");
        assert_eq!(fields[5], "6000");
        // network+misc = 10000us - 1000 - 6000 - 50 - 70 = 2880us.
        assert_eq!(fields[3], "2880");
    }

    #[test]
    fn test_zero_server_count_does_not_panic() {
        let mut status = sample(1, 100);
        status.server_request_count = 0;
        report_step(&status, Protocol::Http, false);
        report_step(&status, Protocol::Grpc, true);
    }
}
