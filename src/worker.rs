//! Worker strategies driving load against the service
//!
//! Both strategies run until the early-exit flag is raised or a request
//! fails; a failing worker stores its error in its shared status slot
//! and exits, and the controller notices the bad slot on its next
//! measurement pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::RngCore;

use crate::client::{ClientFactory, InferContext, RunOptions};
use crate::error::{MedirError, Result};
use crate::pause::PauseGate;
use crate::timestamp::{now_ns, StatusLedger, TimestampPair};

/// Error slot written once by a failing worker
pub type WorkerStatus = Arc<Mutex<Option<MedirError>>>;

/// Shared state handed to every worker
pub(crate) struct WorkerShared {
    pub ledger: Arc<StatusLedger>,
    pub gate: Arc<PauseGate>,
    pub early_exit: Arc<AtomicBool>,
    pub batch_size: usize,
}

/// Negotiate options and bind random inputs for one context
///
/// Fails when the batch size is zero or exceeds the model's maximum, or
/// when any input has a variable-size shape. One random byte buffer
/// sized to the largest input backs every binding.
///
/// # Errors
///
/// Returns `InvalidArgument` on any of the above.
pub fn prepare_context(ctx: &mut dyn InferContext, batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(MedirError::InvalidArgument(
            "batch size must be > 0".to_string(),
        ));
    }
    if batch_size > ctx.max_batch_size() {
        return Err(MedirError::InvalidArgument(format!(
            "expecting batch size <= {} for model '{}'",
            ctx.max_batch_size(),
            ctx.model_name()
        )));
    }

    let inputs = ctx.inputs();
    let mut max_input_byte_size: u64 = 0;
    for input in &inputs {
        match input.byte_size() {
            Some(byte_size) => max_input_byte_size = max_input_byte_size.max(byte_size),
            None => {
                return Err(MedirError::InvalidArgument(format!(
                    "input '{}' has variable-size shape, unable to create \
                     input values for model '{}'",
                    input.name,
                    ctx.model_name()
                )));
            }
        }
    }

    let mut input_buf = vec![0u8; usize::try_from(max_input_byte_size).unwrap_or(usize::MAX)];
    rand::thread_rng().fill_bytes(&mut input_buf);

    ctx.set_run_options(&RunOptions { batch_size })?;
    for input in &inputs {
        let byte_size = usize::try_from(input.byte_size().unwrap_or(0)).unwrap_or(0);
        for _ in 0..batch_size {
            ctx.set_raw_input(&input.name, &input_buf[..byte_size])?;
        }
    }
    Ok(())
}

fn store_error(status: &WorkerStatus, error: MedirError) {
    let mut slot = status.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(error);
    }
}

/// Synchronous worker body: one blocking request at a time
///
/// Each iteration records the request's monotonic start and end, appends
/// the pair and the context's cumulative stat to the ledger, then parks
/// on the pause gate if this worker's index is at or above the pause
/// index.
pub(crate) fn run_sync_worker(
    shared: &WorkerShared,
    factory: &Arc<dyn ClientFactory>,
    status: &WorkerStatus,
    worker_index: usize,
) {
    let mut ctx = match factory.infer_context() {
        Ok(ctx) => ctx,
        Err(error) => {
            store_error(status, error);
            return;
        }
    };
    if let Err(error) = prepare_context(ctx.as_mut(), shared.batch_size) {
        store_error(status, error);
        return;
    }

    loop {
        let start_ns = now_ns();
        let result = ctx.run();
        let end_ns = now_ns();
        if let Err(error) = result {
            store_error(status, error);
            return;
        }

        shared
            .ledger
            .record(worker_index, TimestampPair { start_ns, end_ns }, ctx.stat());

        shared.gate.wait_while_paused(worker_index);

        if shared.early_exit.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Asynchronous worker body: one thread multiplexing the whole level
///
/// Keeps the number of in-flight requests equal to the pause index by
/// issuing through the context's pipelined interface, then drains
/// completions — blocking when the level is saturated, polling when more
/// requests should be issued first.
pub(crate) fn run_async_worker(
    shared: &WorkerShared,
    factory: &Arc<dyn ClientFactory>,
    status: &WorkerStatus,
) {
    let mut ctx = match factory.infer_context() {
        Ok(ctx) => ctx,
        Err(error) => {
            store_error(status, error);
            return;
        }
    };
    if let Err(error) = prepare_context(ctx.as_mut(), shared.batch_size) {
        store_error(status, error);
        return;
    }

    let mut start_times: HashMap<u64, u64> = HashMap::new();
    loop {
        while start_times.len() < shared.gate.active_count() {
            let start_ns = now_ns();
            match ctx.async_run() {
                Ok(id) => {
                    start_times.insert(id, start_ns);
                }
                Err(error) => {
                    store_error(status, error);
                    return;
                }
            }
        }

        loop {
            let block = start_times.len() >= shared.gate.active_count();
            let id = match ctx.ready_async_request(block) {
                Ok(id) => id,
                Err(MedirError::Unavailable) => break,
                Err(error) => {
                    store_error(status, error);
                    return;
                }
            };
            let result = ctx.async_run_results(id);
            let end_ns = now_ns();
            if let Err(error) = result {
                store_error(status, error);
                return;
            }
            let start_ns = start_times.remove(&id).unwrap_or(end_ns);
            shared
                .ledger
                .record(0, TimestampPair { start_ns, end_ns }, ctx.stat());
        }

        if shared.early_exit.load(Ordering::SeqCst) {
            return;
        }
    }
}
