use std::{
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    Runtime, RuntimeError, RuntimeSettings,
    channel::{self, PlainValue, Request},
};

type Job = Box<dyn FnOnce(&mut Runtime) + Send + 'static>;

const THREAD_NAME: &str = "neutrino-interpreter";

struct State {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    has_work: Condvar,
}

impl Shared {
    fn close(&self) -> VecDeque<Job> {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.has_work.notify_all();
        std::mem::take(&mut state.jobs)
    }
}

enum Slot<T> {
    Pending,
    Ready(T),
    Dropped,
}

/// One-shot hand-off from the interpreter thread back to a submitter.
struct Completion<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        })
    }

    fn finish(&self, slot: Slot<T>) {
        let mut current = self.slot.lock();
        if matches!(*current, Slot::Pending) {
            *current = slot;
            self.done.notify_all();
        }
    }

    fn wait(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.done.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Dropped) {
            Slot::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Sending half of a [`Completion`]. Dropping it unsent wakes the
/// submitter with nothing, so a job that never runs cannot strand it.
struct Reply<T>(Arc<Completion<T>>);

impl<T> Reply<T> {
    fn send(self, value: T) {
        self.0.finish(Slot::Ready(value));
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        self.0.finish(Slot::Dropped);
    }
}

/// Closes the queue when the interpreter thread exits, also by panic.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        let abandoned = self.0.close();
        if !abandoned.is_empty() {
            log::warn!("interpreter thread exited with {} jobs queued", abandoned.len());
        }
    }
}

/// Serializes work onto the one thread that owns a [`Runtime`].
///
/// The runtime is built on that thread and never leaves it, so the heap is
/// not shared. Submitters hand in closures, either fire-and-forget or
/// blocking until theirs has run.
pub struct WorkQueue {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Starts the interpreter thread and waits until its runtime exists.
    pub fn new(settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        Self::with_setup(settings, |_| Ok(()))
    }

    /// Like [`WorkQueue::new`], but runs `setup` on the interpreter thread
    /// before any job. Runtime state that cannot cross threads, such as a
    /// [`LambdaCompiler`](crate::LambdaCompiler), is installed here.
    pub fn with_setup<S>(settings: RuntimeSettings, setup: S) -> Result<Self, RuntimeError>
    where
        S: FnOnce(&mut Runtime) -> Result<(), RuntimeError> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            has_work: Condvar::new(),
        });
        let started = Completion::new();
        let reply = Reply(Arc::clone(&started));
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let _close = CloseOnExit(Arc::clone(&worker_shared));
                let mut runtime = match Runtime::new(settings) {
                    Ok(runtime) => runtime,
                    Err(error) => return reply.send(Err(error)),
                };
                if let Err(error) = setup(&mut runtime) {
                    return reply.send(Err(error));
                }
                reply.send(Ok(()));
                worker_loop(&worker_shared, runtime);
            })
            .expect("spawn interpreter thread");
        let queue = Self {
            shared,
            handle: Mutex::new(Some(handle)),
        };
        match started.wait() {
            Some(Ok(())) => Ok(queue),
            Some(Err(error)) => Err(error),
            None => Err(RuntimeError::WorkerDied),
        }
    }

    /// Queues `job` without waiting for it. False if the queue is closed.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return false;
            }
            state.jobs.push_back(Box::new(job));
        }
        self.shared.has_work.notify_one();
        true
    }

    /// Queues `job` and blocks until the interpreter thread has run it.
    ///
    /// None if the queue is closed or the job never completed.
    pub fn submit_sync<F, T>(&self, job: F) -> Option<T>
    where
        F: FnOnce(&mut Runtime) -> T + Send + 'static,
        T: Send + 'static,
    {
        debug_assert_ne!(
            thread::current().name(),
            Some(THREAD_NAME),
            "submit_sync from the interpreter thread would deadlock"
        );
        let completion = Completion::new();
        let reply = Reply(Arc::clone(&completion));
        if !self.submit(move |runtime| reply.send(job(runtime))) {
            return None;
        }
        completion.wait()
    }

    /// Runs a channel request on the interpreter thread.
    pub fn request(&self, request: Request) -> PlainValue {
        self.submit_sync(move |runtime| channel::handle_request(runtime, &request))
            .unwrap_or_else(|| {
                log::warn!("work queue closed, request dropped");
                PlainValue::Void
            })
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stops accepting work, lets the thread finish what is queued and
    /// joins it.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.has_work.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("interpreter thread panicked");
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, mut runtime: Runtime) {
    log::debug!("interpreter thread running");
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break Some(job);
                }
                if state.shutdown {
                    break None;
                }
                shared.has_work.wait(&mut state);
            }
        };
        let Some(job) = job else { break };
        job(&mut runtime);
    }
    log::debug!(
        "interpreter thread done after {} collections",
        runtime.heap().stats().collections
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapSettings, InstanceType, Value, bytecode::CodeBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> WorkQueue {
        WorkQueue::new(RuntimeSettings::default()).unwrap()
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            assert!(queue.submit(move |_| seen.lock().push(i)));
        }
        queue.shutdown();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn submit_sync_returns_the_result() {
        let queue = queue();
        let name = queue.submit_sync(|_| thread::current().name().map(str::to_string));
        assert_eq!(name, Some(Some(THREAD_NAME.to_string())));
        let sum = queue.submit_sync(|runtime| {
            let mut code = CodeBuilder::new();
            code.push(Value::from_i64(20));
            code.push(Value::from_i64(22));
            code.builtin(1, 10);
            code.slap(2);
            code.return_();
            let lambda = runtime.assemble(code, 0).ok()?;
            runtime.call(lambda, &[]).ok()?.as_i64()
        });
        assert_eq!(sum, Some(Some(42)));
    }

    #[test]
    fn the_runtime_persists_between_jobs() {
        let queue = queue();
        queue.submit(|runtime| {
            runtime.define_global("answer", Value::from_i64(42)).unwrap();
        });
        let answer = queue.submit_sync(|runtime| runtime.global("answer"));
        assert_eq!(answer, Some(Some(Value::from_i64(42))));
    }

    #[test]
    fn requests_are_answered() {
        let queue = queue();
        queue.submit_sync(|runtime| {
            let refs = runtime.refs();
            let scope = refs.enter();
            let mut body = CodeBuilder::new();
            body.argument(0);
            body.builtin(0, 14);
            body.slap(1);
            body.return_();
            let lambda = scope.new_ref(runtime.assemble(body, 0).unwrap());
            let integer = runtime.roots().protocol(InstanceType::SmallInteger).value();
            let keywords = runtime.roots().empty_tuple.cast();
            let mut factory = runtime.factory();
            let name = factory.new_string("abs").unwrap();
            let selector = factory.new_selector(name, 0, keywords, false).unwrap();
            let signature = factory.new_signature(&[integer]).unwrap();
            let method = factory.new_method(selector, signature, lambda.get()).unwrap();
            runtime.add_method(integer, method).unwrap();
        });
        assert_eq!(
            queue.request(Request::new(-9, "abs", vec![])),
            PlainValue::Integer(9)
        );
        assert_eq!(queue.request(Request::new(-9, "nope", vec![])), PlainValue::Void);
    }

    #[test]
    fn shutdown_drains_and_rejects() {
        let queue = queue();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            queue.submit(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(queue.is_shut_down());
        assert_eq!(queue.pending(), 0);
        assert!(!queue.submit(|_| {}));
        assert_eq!(queue.submit_sync(|_| 1), None);
        assert_eq!(queue.request(Request::new(1, "abs", vec![])), PlainValue::Void);
    }

    #[test]
    fn invalid_settings_are_reported() {
        let settings = RuntimeSettings {
            heap: HeapSettings {
                semi_space_size: 0,
                ..HeapSettings::default()
            },
            ..RuntimeSettings::default()
        };
        assert!(matches!(
            WorkQueue::new(settings),
            Err(RuntimeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn a_panicking_job_closes_the_queue() {
        let queue = queue();
        let result: Option<()> = queue.submit_sync(|_| panic!("job failed"));
        assert_eq!(result, None);
        queue.shutdown();
        assert!(queue.is_shut_down());
        assert!(!queue.submit(|_| {}));
    }

    #[test]
    fn setup_runs_before_jobs() {
        let queue = WorkQueue::with_setup(RuntimeSettings::default(), |runtime| {
            runtime.define_global("ready", Value::from_i64(1))
        })
        .unwrap();
        let ready = queue.submit_sync(|runtime| runtime.global("ready"));
        assert_eq!(ready, Some(Some(Value::from_i64(1))));
    }

    #[test]
    fn setup_errors_are_reported() {
        let result = WorkQueue::with_setup(RuntimeSettings::default(), |_| {
            Err(RuntimeError::NotCompiled)
        });
        assert!(matches!(result, Err(RuntimeError::NotCompiled)));
    }

    #[test]
    fn a_thread_dying_at_startup_is_reported() {
        let result = WorkQueue::with_setup(RuntimeSettings::default(), |_| {
            panic!("setup failed")
        });
        assert!(matches!(result, Err(RuntimeError::WorkerDied)));
    }
}
