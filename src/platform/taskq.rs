//! A bounded pool of worker threads executing submitted tasks.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::error::Result;

/// A single queued task.
struct Task
{
	id: u64,
	run: Box<dyn FnOnce() + Send>,
}

struct State
{
	tasks: VecDeque<Task>,
	next_id: u64,
	shutdown: bool,
}

struct Inner
{
	state: Mutex<State>,
	cv: Condvar,
}

/// A bounded worker pool.
///
/// Tasks are executed in dispatch order, with up to `nthreads` running
/// concurrently. A queued task can be removed again with `cancel`; once a
/// worker has picked a task up it always runs to completion.
pub(crate) struct TaskQueue
{
	inner: Arc<Inner>,
	workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TaskQueue
{
	/// Creates a new task queue backed by `nthreads` worker threads.
	pub(crate) fn new(name: &str, nthreads: usize) -> Result<TaskQueue>
	{
		let inner = Arc::new(Inner {
			state: Mutex::new(State { tasks: VecDeque::new(), next_id: 1, shutdown: false }),
			cv: Condvar::new(),
		});

		let mut workers = Vec::with_capacity(nthreads);
		for i in 0..nthreads {
			let inner = Arc::clone(&inner);
			let handle = thread::Builder::new()
				.name(format!("{}-{}", name, i))
				.spawn(move || worker(&inner))?;
			workers.push(handle);
		}

		Ok(TaskQueue { inner, workers: Mutex::new(workers) })
	}

	/// Queues a task for execution, returning its cancellation ID.
	///
	/// If the queue is already shut down the task is run inline on the
	/// calling thread, so that queued completions are never lost, and the
	/// reserved ID zero is returned.
	pub(crate) fn dispatch(&self, f: Box<dyn FnOnce() + Send>) -> u64
	{
		let mut state = self.inner.state.lock().unwrap();
		if state.shutdown {
			drop(state);
			f();
			return 0;
		}

		let id = state.next_id;
		state.next_id += 1;
		state.tasks.push_back(Task { id, run: f });
		self.inner.cv.notify_one();
		id
	}

	/// Removes a task that has not yet started running.
	///
	/// Returns `true` if the task was removed before execution.
	pub(crate) fn cancel(&self, id: u64) -> bool
	{
		let mut state = self.inner.state.lock().unwrap();
		if let Some(pos) = state.tasks.iter().position(|t| t.id == id) {
			state.tasks.remove(pos);
			true
		}
		else {
			false
		}
	}

	/// Stops the queue, draining any remaining tasks first.
	pub(crate) fn shutdown(&self)
	{
		{
			let mut state = self.inner.state.lock().unwrap();
			state.shutdown = true;
			self.inner.cv.notify_all();
		}

		let workers = { self.workers.lock().unwrap().split_off(0) };
		for w in workers {
			// A worker that panicked already tore the process down.
			let _ = w.join();
		}
	}
}

impl Drop for TaskQueue
{
	fn drop(&mut self)
	{
		self.shutdown();
	}
}

fn worker(inner: &Inner)
{
	let mut state = inner.state.lock().unwrap();
	loop {
		if let Some(task) = state.tasks.pop_front() {
			drop(state);
			(task.run)();
			state = inner.state.lock().unwrap();
		}
		else if state.shutdown {
			break;
		}
		else {
			state = inner.cv.wait(state).unwrap();
		}
	}
}

#[cfg(test)]
mod tests
{
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;

	#[test]
	fn tasks_run()
	{
		let tq = TaskQueue::new("test-tq", 2).unwrap();
		let count = Arc::new(AtomicUsize::new(0));

		for _ in 0..10 {
			let count = Arc::clone(&count);
			tq.dispatch(Box::new(move || {
				count.fetch_add(1, Ordering::SeqCst);
			}));
		}

		tq.shutdown();
		assert_eq!(count.load(Ordering::SeqCst), 10);
	}

	#[test]
	fn queued_task_can_be_canceled()
	{
		let tq = TaskQueue::new("test-tq", 1).unwrap();
		let count = Arc::new(AtomicUsize::new(0));

		// Tie up the single worker so the next task stays queued.
		tq.dispatch(Box::new(|| std::thread::sleep(Duration::from_millis(100))));

		let c = Arc::clone(&count);
		let id = tq.dispatch(Box::new(move || {
			c.fetch_add(1, Ordering::SeqCst);
		}));

		assert!(tq.cancel(id));
		assert!(!tq.cancel(id));

		tq.shutdown();
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn shutdown_drains_queue()
	{
		let tq = TaskQueue::new("test-tq", 1).unwrap();
		let count = Arc::new(AtomicUsize::new(0));

		tq.dispatch(Box::new(|| std::thread::sleep(Duration::from_millis(50))));
		for _ in 0..5 {
			let c = Arc::clone(&count);
			tq.dispatch(Box::new(move || {
				c.fetch_add(1, Ordering::SeqCst);
			}));
		}

		tq.shutdown();
		assert_eq!(count.load(Ordering::SeqCst), 5);
	}
}
