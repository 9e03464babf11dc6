// Prefetch module
// One background thread drains a FIFO of requested frame indices and warms
// the cache for each. The warmed frame is released immediately; the worker
// never looks at the pixels.
//
// Shutdown sets the stop flag, pushes a wake-up request and joins. The flag
// is only checked after a request has been dequeued, so the wake-up always
// reaches an idle worker and the join always completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::decoder::FrameIndex;
use crate::error::CacheError;

/// A request on the prefetch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchRequest {
    /// Load this frame into the cache.
    Frame(FrameIndex),
    /// No work; wakes the worker so it can observe the stop flag.
    Wake,
}

pub(crate) type PrefetchSender = mpsc::UnboundedSender<PrefetchRequest>;
pub(crate) type PrefetchReceiver = mpsc::UnboundedReceiver<PrefetchRequest>;

pub(crate) fn channel() -> (PrefetchSender, PrefetchReceiver) {
    mpsc::unbounded_channel()
}

/// Something the worker can warm frames in.
pub(crate) trait PrefetchTarget: Send + Sync + 'static {
    /// Load `index` and let go of it.
    fn warm(&self, index: FrameIndex) -> Result<(), CacheError>;
}

/// Owner side of the prefetch thread.
pub(crate) struct PrefetchWorker {
    sender: PrefetchSender,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchWorker {
    /// Start the worker thread draining `receiver`.
    pub fn spawn<T: PrefetchTarget>(
        name: String,
        target: Arc<T>,
        sender: PrefetchSender,
        receiver: PrefetchReceiver,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(target, receiver, thread_stop))?;
        Ok(Self { sender, stop, handle: Some(handle) })
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        // The receiver only disappears once the thread has exited.
        let _ = self.sender.send(PrefetchRequest::Wake);
        if handle.join().is_err() {
            tracing::error!("prefetch worker panicked");
        }
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T: PrefetchTarget>(target: Arc<T>, mut receiver: PrefetchReceiver, stop: Arc<AtomicBool>) {
    tracing::debug!("prefetch worker started");
    let mut active = true;
    while let Some(request) = receiver.blocking_recv() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let PrefetchRequest::Frame(index) = request else {
            continue;
        };
        if !active {
            continue;
        }
        match target.warm(index) {
            Ok(()) => tracing::trace!(index, "prefetched frame"),
            Err(CacheError::NoSuchFrame) => tracing::debug!(index, "prefetch of missing frame ignored"),
            Err(err) => {
                tracing::warn!(index, error = %err, "prefetch stopped after cache error");
                active = false;
            }
        }
    }
    tracing::debug!("prefetch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<FrameIndex>>,
        fail_on: Option<FrameIndex>,
    }

    impl PrefetchTarget for Recorder {
        fn warm(&self, index: FrameIndex) -> Result<(), CacheError> {
            self.seen.lock().push(index);
            match self.fail_on {
                Some(bad) if bad == index => Err(DecodeError::FileRead.into()),
                _ if index >= 100 => Err(CacheError::NoSuchFrame),
                _ => Ok(()),
            }
        }
    }

    fn wait_for(recorder: &Recorder, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.seen.lock().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_requests_drain_in_fifo_order() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = channel();
        let mut worker = PrefetchWorker::spawn("prefetch-test".into(), Arc::clone(&recorder), tx.clone(), rx).unwrap();
        for i in [3, 1, 2] {
            tx.send(PrefetchRequest::Frame(i)).unwrap();
        }
        wait_for(&recorder, 3);
        worker.shutdown();
        assert_eq!(*recorder.seen.lock(), vec![3, 1, 2]);
    }

    #[test]
    fn test_shutdown_of_idle_worker_completes() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = channel();
        let mut worker = PrefetchWorker::spawn("prefetch-idle".into(), Arc::clone(&recorder), tx, rx).unwrap();
        worker.shutdown();
        worker.shutdown();
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_missing_frames_do_not_stop_worker() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = channel();
        let _worker = PrefetchWorker::spawn("prefetch-missing".into(), Arc::clone(&recorder), tx.clone(), rx).unwrap();
        tx.send(PrefetchRequest::Frame(500)).unwrap();
        tx.send(PrefetchRequest::Frame(4)).unwrap();
        wait_for(&recorder, 2);
        assert_eq!(*recorder.seen.lock(), vec![500, 4]);
    }

    #[test]
    fn test_fatal_error_stops_new_work_but_keeps_draining() {
        let recorder = Arc::new(Recorder { fail_on: Some(2), ..Default::default() });
        let (tx, rx) = channel();
        let mut worker = PrefetchWorker::spawn("prefetch-fatal".into(), Arc::clone(&recorder), tx.clone(), rx).unwrap();
        for i in [1, 2, 3, 4] {
            tx.send(PrefetchRequest::Frame(i)).unwrap();
        }
        wait_for(&recorder, 2);
        thread::sleep(Duration::from_millis(20));
        worker.shutdown();
        assert_eq!(*recorder.seen.lock(), vec![1, 2]);
        // Joined thread has dropped its receiver.
        assert!(tx.is_closed());
    }
}
