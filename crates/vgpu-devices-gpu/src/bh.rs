//! Bottom halves: work posted from notification contexts and run on one display-owning thread.
//!
//! The worker owns its state `S` outright. Tasks get `&mut S`, run to completion in submission
//! order, and never overlap, so nothing reached only from tasks needs a lock.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Task(Task<S>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("display worker has stopped")]
pub struct BhError;

/// Posts tasks to a [`DisplayWorker`].
pub struct BhHandle<S> {
    tx: Sender<Message<S>>,
}

impl<S> Clone for BhHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> std::fmt::Debug for BhHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BhHandle").finish_non_exhaustive()
    }
}

impl<S: 'static> BhHandle<S> {
    /// Queues `task` without waiting for it.
    pub fn submit<F>(&self, task: F) -> Result<(), BhError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Message::Task(Box::new(task)))
            .map_err(|_| BhError)
    }

    /// Runs `f` on the worker and waits for its result.
    ///
    /// Must not be called from a task: the worker would wait on itself.
    pub fn call<R, F>(&self, f: F) -> Result<R, BhError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(move |state| {
            let _ = tx.send(f(state));
        })?;
        rx.recv().map_err(|_| BhError)
    }

    /// Waits until every task submitted before this call has run.
    pub fn sync(&self) -> Result<(), BhError> {
        self.call(|_| ())
    }
}

/// The display-owning worker thread.
pub struct DisplayWorker<S> {
    handle: BhHandle<S>,
    thread: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> DisplayWorker<S> {
    pub fn spawn(name: &str, mut state: S) -> io::Result<Self> {
        let (tx, rx): (Sender<Message<S>>, Receiver<Message<S>>) = mpsc::channel();
        let thread = thread::Builder::new().name(name.to_owned()).spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    Message::Task(task) => task(&mut state),
                    Message::Shutdown => break,
                }
            }
            state
        })?;
        Ok(Self {
            handle: BhHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> BhHandle<S> {
        self.handle.clone()
    }

    /// Runs every queued task, stops the thread and hands back the state.
    ///
    /// Returns `None` if a task panicked.
    pub fn shutdown(mut self) -> Option<S> {
        self.stop()
    }

    fn stop(&mut self) -> Option<S> {
        let thread = self.thread.take()?;
        let _ = self.handle.tx.send(Message::Shutdown);
        match thread.join() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::error!("display worker panicked");
                None
            }
        }
    }
}

impl<S> Drop for DisplayWorker<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.tx.send(Message::Shutdown);
            let _ = thread.join();
        }
    }
}
