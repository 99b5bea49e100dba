//! Communication between ranks.
//!
//! A rank is a worker that owns one part of a [`Partition`](crate::mesh::Partition). Ranks only
//! interact through the collective operations of a [`Communicator`]: every rank of a group must
//! call the same sequence of collectives, otherwise the group deadlocks.
//!
//! [`ThreadComm`] runs each rank on its own thread within a single process, with one mailbox per
//! ordered pair of ranks. [`SerialComm`] is the trivial single-rank communicator.
use crate::sparse::Triplet;
use crate::Error;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::trace;
use std::marker::PhantomData;
use std::sync::{Arc, Barrier};
use std::thread;

/// Reduction operators for [`Communicator::all_reduce_f64`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Collective operations across a group of ranks.
pub trait Communicator<T>: Send + Sync {
    /// Index of this rank within the group, in `0 .. size()`.
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocks until every rank of the group has called `barrier`.
    fn barrier(&self);

    /// All-to-all exchange of matrix contributions.
    ///
    /// `outgoing[dst]` holds the triplets this rank sends to rank `dst`. The result holds the
    /// triplets sent to this rank, ordered by source rank. Passing `None` aborts the exchange:
    /// the rank still takes part in the collective, but every rank of the group receives
    /// [`Error::PeerAborted`] naming the lowest aborting rank.
    fn exchange(&self, outgoing: Option<Vec<Vec<Triplet<T>>>>) -> Result<Vec<Triplet<T>>, Error>;

    /// Reduces a value over all ranks and returns the result on every rank.
    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> Result<f64, Error>;
}

/// Communicator for a group consisting of a single rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> SerialComm<T> {
    pub fn new() -> Self {
        Self { marker: PhantomData }
    }
}

impl<T> Communicator<T> for SerialComm<T> {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn exchange(&self, outgoing: Option<Vec<Vec<Triplet<T>>>>) -> Result<Vec<Triplet<T>>, Error> {
        match outgoing {
            Some(mut buffers) if buffers.len() == 1 => Ok(buffers.pop().unwrap_or_default()),
            Some(buffers) => Err(Error::InvalidArgument(format!(
                "expected 1 outgoing buffer, got {}",
                buffers.len()
            ))),
            None => Err(Error::PeerAborted { rank: 0 }),
        }
    }

    fn all_reduce_f64(&self, value: f64, _op: ReduceOp) -> Result<f64, Error> {
        Ok(value)
    }
}

#[derive(Debug)]
enum Message<T> {
    Triplets(Vec<Triplet<T>>),
    Scalar(f64),
    Abort,
}

/// Communicator endpoint for a rank running on its own thread.
///
/// Every ordered pair of ranks `(src, dst)` is connected by its own unbounded channel, so
/// messages between two ranks arrive in the order they were sent. Sends never block, which lets
/// every rank first post all its messages and then receive.
#[derive(Debug)]
pub struct ThreadComm<T> {
    rank: usize,
    // Indexed by destination rank
    senders: Vec<Sender<Message<T>>>,
    // Indexed by source rank
    receivers: Vec<Receiver<Message<T>>>,
    barrier: Arc<Barrier>,
}

impl<T: Send> ThreadComm<T> {
    /// Creates the endpoints of a group of `size` ranks. Endpoint `r` belongs to rank `r`.
    pub fn create(size: usize) -> Vec<Self> {
        let barrier = Arc::new(Barrier::new(size.max(1)));

        // channels[src][dst]
        let mut senders: Vec<Vec<Sender<Message<T>>>> = Vec::with_capacity(size);
        let mut receivers: Vec<Vec<Receiver<Message<T>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for _src in 0..size {
            let mut row = Vec::with_capacity(size);
            for receivers_of_dst in receivers.iter_mut() {
                let (sender, receiver) = unbounded();
                row.push(sender);
                receivers_of_dst.push(receiver);
            }
            senders.push(row);
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadComm {
                rank,
                senders,
                receivers,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn send(&self, dst: usize, message: Message<T>) -> Result<(), Error> {
        self.senders[dst]
            .send(message)
            .map_err(|_| Error::Communication {
                peer: dst,
                reason: "receiving rank has shut down".to_string(),
            })
    }

    fn receive(&self, src: usize) -> Result<Message<T>, Error> {
        self.receivers[src]
            .recv()
            .map_err(|_| Error::Communication {
                peer: src,
                reason: "sending rank has shut down".to_string(),
            })
    }
}

impl<T: Send> Communicator<T> for ThreadComm<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn exchange(&self, outgoing: Option<Vec<Vec<Triplet<T>>>>) -> Result<Vec<Triplet<T>>, Error> {
        let size = self.size();
        let mut invalid_outgoing = None;
        let buffers = match outgoing {
            Some(buffers) if buffers.len() == size => Some(buffers),
            Some(buffers) => {
                invalid_outgoing = Some(buffers.len());
                None
            }
            None => None,
        };
        match buffers {
            Some(buffers) => {
                for (dst, buffer) in buffers.into_iter().enumerate() {
                    trace!("Rank {} sends {} triplets to rank {}", self.rank, buffer.len(), dst);
                    self.send(dst, Message::Triplets(buffer))?;
                }
            }
            None => {
                for dst in 0..size {
                    self.send(dst, Message::Abort)?;
                }
            }
        }

        // Every message of this collective must be drained, even after an abort, so that the
        // mailboxes are empty for the next collective
        let mut received = Vec::new();
        let mut first_aborted_rank = None;
        for src in 0..size {
            match self.receive(src)? {
                Message::Triplets(triplets) => received.extend(triplets),
                Message::Abort => {
                    first_aborted_rank.get_or_insert(src);
                }
                Message::Scalar(_) => {
                    return Err(Error::Communication {
                        peer: src,
                        reason: "unexpected scalar message during exchange".to_string(),
                    })
                }
            }
        }

        if let Some(num_buffers) = invalid_outgoing {
            return Err(Error::InvalidArgument(format!(
                "expected {size} outgoing buffers, got {num_buffers}"
            )));
        }
        match first_aborted_rank {
            Some(rank) => Err(Error::PeerAborted { rank }),
            None => Ok(received),
        }
    }

    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> Result<f64, Error> {
        for dst in 0..self.size() {
            self.send(dst, Message::Scalar(value))?;
        }

        // Reduce in rank order, so that every rank computes a bitwise identical result
        let mut result: Option<f64> = None;
        for src in 0..self.size() {
            match self.receive(src)? {
                Message::Scalar(x) => {
                    result = Some(result.map_or(x, |acc| op.apply(acc, x)));
                }
                _ => {
                    return Err(Error::Communication {
                        peer: src,
                        reason: "unexpected message during reduction".to_string(),
                    })
                }
            }
        }
        Ok(result.unwrap_or(value))
    }
}

/// Runs `f` on `size` ranks, each on its own scoped thread with its own [`ThreadComm`].
///
/// Returns the results in rank order. A panic on any rank is propagated to the caller once all
/// ranks have finished.
pub fn run_ranks<T, R, F>(size: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(ThreadComm<T>) -> R + Sync,
{
    let endpoints = ThreadComm::create(size);
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}
