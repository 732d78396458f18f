//! Fork–join fan-out.
//!
//! Each `Parallel*` node partitions its scan into many more chunks than
//! workers (to smooth skew), pushes the chunks onto a shared queue, and
//! joins a scoped thread per worker. Workers pull chunks until the queue
//! drains; a chunk that breaks early only ends that chunk. There is no
//! work migration past the join: the fan-out is a barrier.

use parking_lot::Mutex;

/// A drain-only chunk queue shared by the workers of one fan-out.
pub struct WorkQueue<T> {
    chunks: Mutex<Vec<T>>,
}

impl<T> WorkQueue<T> {
    fn new(mut chunks: Vec<T>) -> Self {
        // Pop from the back; reverse so chunks drain in scan order.
        chunks.reverse();
        WorkQueue { chunks: Mutex::new(chunks) }
    }

    pub fn next(&self) -> Option<T> {
        self.chunks.lock().pop()
    }
}

/// Run `worker` once per thread over the shared chunk queue and join.
/// With one worker (or one chunk) everything stays on the calling thread.
pub fn fork_join<T, F>(threads: usize, chunks: Vec<T>, worker: F)
where
    T: Send,
    F: Fn(&WorkQueue<T>) + Sync,
{
    if chunks.is_empty() {
        return;
    }
    let workers = threads.clamp(1, chunks.len());
    let queue = WorkQueue::new(chunks);
    if workers == 1 {
        worker(&queue);
        return;
    }
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker(&queue));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_chunk_is_processed_exactly_once() {
        let seen = AtomicUsize::new(0);
        let chunks: Vec<usize> = (0..100).collect();
        fork_join(4, chunks, |queue| {
            while let Some(chunk) = queue.next() {
                seen.fetch_add(chunk, Ordering::SeqCst);
            }
        });
        assert_eq!(seen.load(Ordering::SeqCst), (0..100).sum::<usize>());
    }

    #[test]
    fn single_thread_runs_inline() {
        let seen = AtomicUsize::new(0);
        fork_join(1, vec![1, 2, 3], |queue| {
            while let Some(chunk) = queue.next() {
                seen.fetch_add(chunk, Ordering::SeqCst);
            }
        });
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }
}
