//! Bounded worker batch for parallel sub-request IO.
//!
//! Each logical read builds its own batch, mirroring the per-read worker
//! pool lifecycle: jobs are enqueued up front, a bounded set of named worker
//! threads drains the queue, and the caller blocks until everything
//! finished. Scoped threads let jobs borrow the caller's buffer slices
//! without any copying.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

pub type IoJob<'env> = Box<dyn FnOnce() -> Result<()> + Send + 'env>;

/// Run `jobs` on at most `thread_count` worker threads named
/// `<thread_name>-<idx>` and wait for completion. Any job failure fails the
/// whole batch; the first error encountered is returned.
pub fn run_io_batch<'env>(jobs: Vec<IoJob<'env>>, thread_count: usize, thread_name: &str) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    let thread_count = thread_count.clamp(1, jobs.len());

    let queue: Mutex<VecDeque<IoJob<'env>>> = Mutex::new(jobs.into());
    let errors: Mutex<Vec<anyhow::Error>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker_idx in 0..thread_count {
            let builder = std::thread::Builder::new().name(format!("{}-{}", thread_name, worker_idx));
            let spawned = builder.spawn_scoped(scope, || loop {
                let job = queue.lock().unwrap().pop_front();
                match job {
                    Some(job) => {
                        if let Err(err) = job() {
                            errors.lock().unwrap().push(err);
                        }
                    }
                    None => break,
                }
            });
            if let Err(err) = spawned {
                // Out of threads; workers already running keep draining the
                // queue, and with none at all the leftover jobs fail below.
                errors
                    .lock()
                    .unwrap()
                    .push(anyhow!("Failed to spawn IO worker thread: {}", err));
                break;
            }
        }
    });

    let mut errors = errors.into_inner().unwrap();
    let leftover = queue.into_inner().unwrap();
    if !leftover.is_empty() {
        errors.push(anyhow!("{} IO jobs never ran", leftover.len()));
    }
    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_jobs_run() {
        let counter = AtomicUsize::new(0);
        let jobs: Vec<IoJob> = (0..32)
            .map(|_| {
                Box::new(|| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as IoJob
            })
            .collect();
        run_io_batch(jobs, 4, "test-io").unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_jobs_can_borrow_disjoint_buffer_chunks() {
        let mut buffer = vec![0u8; 16];
        let jobs: Vec<IoJob> = buffer
            .chunks_mut(4)
            .enumerate()
            .map(|(idx, chunk)| {
                Box::new(move || {
                    chunk.fill(idx as u8 + 1);
                    Ok(())
                }) as IoJob
            })
            .collect();
        run_io_batch(jobs, 2, "test-io").unwrap();
        assert_eq!(buffer[..4], [1; 4]);
        assert_eq!(buffer[12..], [4; 4]);
    }

    #[test]
    fn test_single_failure_fails_batch() {
        let jobs: Vec<IoJob> = vec![
            Box::new(|| Ok(())),
            Box::new(|| bail!("disk exploded")),
            Box::new(|| Ok(())),
        ];
        let err = run_io_batch(jobs, 3, "test-io").unwrap_err();
        assert!(err.to_string().contains("disk exploded"));
    }

    #[test]
    fn test_workers_report_thread_name() {
        let jobs: Vec<IoJob> = vec![Box::new(|| {
            let name = std::thread::current().name().unwrap_or("").to_string();
            assert!(name.starts_with("blk-read"));
            Ok(())
        })];
        run_io_batch(jobs, 1, "blk-read").unwrap();
    }
}
