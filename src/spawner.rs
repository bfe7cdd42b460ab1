// MIT License
//
// Copyright (c) 2019 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Fire-and-forget execution of background copy tasks.

use std::{
    sync::{Arc, Mutex},
    thread,
};

/// A boxed task handed to a [`BackgroundSpawner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task independently of the caller.
///
/// The dictionary never waits for, or inspects the outcome of, a spawned
/// task. A spawner may run the task on the calling thread.
pub trait BackgroundSpawner: Send + Sync {
    fn spawn(&self, task: Task);
}

impl<S: BackgroundSpawner + ?Sized> BackgroundSpawner for Arc<S> {
    fn spawn(&self, task: Task) {
        (**self).spawn(task)
    }
}

/// Spawns every task onto its own detached OS thread.
///
/// If the thread cannot be created, the task runs on the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSpawner;

impl BackgroundSpawner for ThreadSpawner {
    fn spawn(&self, task: Task) {
        // a failed spawn drops its closure; the slot lets us take the task back
        let slot = Arc::new(Mutex::new(Some(task)));
        let thread_slot = slot.clone();

        let result = thread::Builder::new()
            .name("dictionary-grow".to_string())
            .spawn(move || {
                let task = thread_slot.lock().ok().and_then(|mut t| t.take());

                if let Some(task) = task {
                    task();
                }
            });

        if let Err(error) = result {
            tracing::warn!(error = %error, "failed to spawn background copy thread, copying inline");

            let task = slot.lock().ok().and_then(|mut t| t.take());

            if let Some(task) = task {
                task();
            }
        }
    }
}

/// Runs every task immediately on the calling thread.
///
/// Resizes then complete before the triggering insert returns, which makes
/// resize behaviour deterministic.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineSpawner;

impl BackgroundSpawner for InlineSpawner {
    fn spawn(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    };

    #[test]
    fn inline_runs_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        InlineSpawner.spawn(Box::new(move || flag.store(true, Ordering::Relaxed)));

        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn thread_runs_task() {
        let (sender, receiver) = mpsc::channel();

        ThreadSpawner.spawn(Box::new(move || sender.send(42).unwrap()));

        assert_eq!(receiver.recv().unwrap(), 42);
    }
}
