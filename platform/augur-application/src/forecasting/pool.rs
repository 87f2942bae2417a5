use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

pub(crate) fn normalize_parallelism(value: Option<usize>) -> usize {
    value.unwrap_or(1).max(1)
}

/// Runs `work` for every ticker and returns the results in input order.
pub(crate) fn run_tickers<T, F>(tickers: &[String], parallelism: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(&str) -> T + Sync,
{
    if parallelism <= 1 || tickers.len() <= 1 {
        return tickers.iter().map(|ticker| work(ticker)).collect();
    }
    run_parallel(tickers, parallelism, &work)
}

fn run_parallel<T, F>(tickers: &[String], parallelism: usize, work: &F) -> Vec<T>
where
    T: Send,
    F: Fn(&str) -> T + Sync,
{
    let worker_count = parallelism.min(tickers.len());
    let next_index = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, T)>();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            scope.spawn(move || loop {
                let idx = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if idx >= tickers.len() {
                    break;
                }
                if tx.send((idx, work(&tickers[idx]))).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut results: Vec<(usize, T)> = Vec::with_capacity(tickers.len());
        while let Ok(message) = rx.recv() {
            results.push(message);
        }
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, result)| result).collect()
    })
}
