// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Workers drive a connection's read-parse-respond-write cycle off the
//! reactor thread. A worker never touches the reactor's connection table or
//! timer heap directly: it receives a [`Job`] that *owns* the `Connection`
//! taken out of that table, and hands it back on a [`Handback`] channel
//! together with the [`Directive`] the reactor should act on. Ownership of
//! the value, not a lock around it, is what keeps a connection from being
//! touched by two threads at once.

use std::sync::{Arc, Once};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use mio::{Token, Waker};

use crate::connection::{Connection, Directive};

/// Depth of the bounded job queue workers pull from. Past this, `send`
/// blocks the reactor thread — a deliberate backpressure valve rather than
/// an unbounded queue that could grow without limit under load.
pub const QUEUE_CAPACITY: usize = 4096;

/// One unit of work: a connection the reactor observed readiness for, handed
/// over by value.
pub struct Job {
    pub connection: Connection,
    pub readable: bool,
    pub writable: bool,
}

/// A finished job, returned to the reactor together with what it should do
/// with the connection next.
pub struct Handback {
    pub token: Token,
    pub connection: Connection,
    pub directive: Directive,
}

/// A single worker thread's view of the shared job/handback channels.
struct Worker {
    jobs: Receiver<Job>,
    handback: Sender<Handback>,
    reactor_waker: Arc<Waker>,
    root: Arc<str>,
}

impl Worker {
    fn run(self) {
        // recv() returning Err means the reactor dropped the job sender,
        // which only happens during pool shutdown.
        while let Ok(job) = self.jobs.recv() {
            let token = job.connection.token();
            let mut connection = job.connection;
            let directive = connection.process(job.readable, job.writable, &self.root);

            let handback = Handback {
                token,
                connection,
                directive,
            };

            if self.handback.send(handback).is_err() {
                return;
            }
            // Wake the reactor's poll even if it's blocked with no other
            // readiness events pending.
            if self.reactor_waker.wake().is_err() {
                return;
            }
        }
    }
}

/// Fixed-size pool of worker threads sharing one bounded job queue.
pub struct WorkerPool {
    jobs_tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    shutdown_once: Once,
}

impl WorkerPool {
    /// Spawns `num_workers` threads, each pulling from the same bounded job
    /// queue and pushing finished jobs onto one shared handback channel.
    pub fn new(
        num_workers: usize,
        root: Arc<str>,
        reactor_waker: Arc<Waker>,
    ) -> (Self, Receiver<Handback>) {
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let (handback_tx, handback_rx) = crossbeam_channel::unbounded();

        let handles = (0..num_workers)
            .map(|i| {
                let worker = Worker {
                    jobs: jobs_rx.clone(),
                    handback: handback_tx.clone(),
                    reactor_waker: reactor_waker.clone(),
                    root: root.clone(),
                };
                std::thread::Builder::new()
                    .name(format!("kestrel-worker-{i}"))
                    .spawn(move || worker.run())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        (
            Self {
                jobs_tx: Some(jobs_tx),
                handles,
                shutdown_once: Once::new(),
            },
            handback_rx,
        )
    }

    /// Hands a connection off to the pool. Blocks the reactor thread if the
    /// queue is at capacity, rather than dropping the job.
    pub fn dispatch(&self, job: Job) {
        if let Some(tx) = &self.jobs_tx {
            // A full queue applies backpressure to the reactor; a closed
            // channel only happens after `shutdown`, at which point there's
            // nowhere for this job to go and it's simply dropped.
            let _ = tx.send(job);
        }
    }

    /// Closes the job queue and joins every worker thread. Safe to call more
    /// than once; only the first call does anything.
    pub fn shutdown(&mut self) {
        let jobs_tx = &mut self.jobs_tx;
        self.shutdown_once.call_once(|| {
            jobs_tx.take();
        });
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;

    // `Waker` borrows its registry's lifetime by fd, not by reference, so the
    // backing `Poll` must outlive every `Arc<Waker>` clone handed to workers.
    fn test_waker() -> (Poll, Arc<Waker>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        (poll, waker)
    }

    #[test]
    fn shutdown_is_idempotent_and_joins_threads() {
        let (_poll, waker) = test_waker();
        let (mut pool, _handback_rx) = WorkerPool::new(2, Arc::from("/tmp"), waker);
        pool.shutdown();
        pool.shutdown();
        assert!(pool.handles.is_empty());
    }

    #[test]
    fn dropping_the_pool_shuts_it_down() {
        let (_poll, waker) = test_waker();
        let (pool, _handback_rx) = WorkerPool::new(1, Arc::from("/tmp"), waker);
        drop(pool);
    }
}
