use std::sync::Mutex;

/// Tracks how many agencies have finished submitting their bets
///
/// every finished stream of batches counts, even if an agency submits more than once.
#[derive(Debug)]
pub struct CompletionBarrier {
    finished: Mutex<usize>,
    total: usize,
}

impl CompletionBarrier {
    pub fn new(total: usize) -> Self {
        Self {
            finished: Mutex::new(0),
            total,
        }
    }

    /// Marks one more agency as done
    ///
    /// returns true if this call is the one that completed the barrier
    pub fn mark_agency_done(&self) -> bool {
        let mut finished = self.finished.lock().unwrap();
        *finished += 1;

        *finished == self.total
    }

    pub fn is_complete(&self) -> bool {
        *self.finished.lock().unwrap() >= self.total
    }

    pub fn finished(&self) -> usize {
        *self.finished.lock().unwrap()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
