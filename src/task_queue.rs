use crate::chain::{run_chain, ChainOutcome, RegisterChain};
use crate::transport::ControlTransport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub type TaskCallback = Box<dyn FnOnce(&ChainOutcome) + Send>;

struct Task {
    name: String,
    chain: RegisterChain,
    on_done: Option<TaskCallback>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    busy: bool,
    /// A task is being handed to the transport on some thread.
    starting: bool,
    /// That task finished before the hand-off returned.
    finished_while_starting: bool,
}

impl QueueState {
    /// Pop the next task, or mark the queue idle.
    fn take_next(&mut self) -> Option<Task> {
        let next = self.pending.pop_front();
        if next.is_none() {
            self.busy = false;
        }
        next
    }
}

struct Inner<T: ControlTransport + ?Sized> {
    transport: Arc<T>,
    state: Mutex<QueueState>,
}

/// FIFO of named register chains with at most one in flight.
///
/// A task starts immediately when the queue is idle; otherwise it waits and
/// is started from the previous task's completion. A failed task is logged
/// and does not hold up the tasks behind it.
pub struct TaskQueue<T: ControlTransport + ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: ControlTransport + ?Sized> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ControlTransport + ?Sized> TaskQueue<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    pub fn enqueue(&self, name: impl Into<String>, chain: RegisterChain) {
        self.push(Task {
            name: name.into(),
            chain,
            on_done: None,
        });
    }

    /// Like [`TaskQueue::enqueue`], calling `on_done` with the chain's outcome.
    pub fn enqueue_with(&self, name: impl Into<String>, chain: RegisterChain, on_done: TaskCallback) {
        self.push(Task {
            name: name.into(),
            chain,
            on_done: Some(on_done),
        });
    }

    /// True while a task is in flight.
    pub fn is_busy(&self) -> bool {
        lock(&self.inner.state).busy
    }

    /// Tasks waiting behind the one in flight.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    fn push(&self, task: Task) {
        let start_now = {
            let mut state = lock(&self.inner.state);
            if state.busy {
                log::debug!("Queueing USB task '{}'", task.name);
                state.pending.push_back(task);
                None
            } else {
                state.busy = true;
                Some(task)
            }
        };
        if let Some(task) = start_now {
            Inner::start(self.inner.clone(), task);
        }
    }
}

impl<T: ControlTransport + ?Sized> Inner<T> {
    /// Start `task` and every task that finishes synchronously behind it.
    fn start(inner: Arc<Self>, mut task: Task) {
        loop {
            lock(&inner.state).starting = true;

            log::debug!("Starting USB task '{}' ({} steps)", task.name, task.chain.len());
            let Task { name, chain, on_done } = task;
            let finisher = inner.clone();
            run_chain(
                inner.transport.clone(),
                chain,
                Box::new(move |outcome| Inner::finish(finisher, name, on_done, outcome)),
            );

            let next = {
                let mut state = lock(&inner.state);
                state.starting = false;
                if !std::mem::take(&mut state.finished_while_starting) {
                    return;
                }
                state.take_next()
            };
            match next {
                Some(next) => task = next,
                None => return,
            }
        }
    }

    fn finish(inner: Arc<Self>, name: String, on_done: Option<TaskCallback>, outcome: ChainOutcome) {
        if let Err(failure) = &outcome {
            log::warn!(
                "USB task '{}' failed with {:?} ({})",
                name,
                failure.result_code(),
                failure
            );
        }
        if let Some(on_done) = on_done {
            on_done(&outcome);
        }

        let next = {
            let mut state = lock(&inner.state);
            if state.starting {
                state.finished_while_starting = true;
                return;
            }
            state.take_next()
        };
        if let Some(task) = next {
            Inner::start(inner, task);
        }
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, ValueSource, OV534_REG_WRITE};
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::ControlRequest;
    use crate::types::UsbResultCode;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn recorder() -> (Arc<Mutex<Vec<(String, bool)>>>, impl Fn(&str) -> TaskCallback) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let make = move |name: &str| -> TaskCallback {
            let sink = sink.clone();
            let name = name.to_string();
            Box::new(move |outcome: &ChainOutcome| sink.lock().unwrap().push((name, outcome.is_ok())))
        };
        (events, make)
    }

    fn write_chain(register: u8, value: u8) -> RegisterChain {
        RegisterChain::new(protocol::sccb_write(register, ValueSource::Literal(value)))
    }

    #[test]
    fn test_three_tasks_run_in_fifo_order() {
        let transport = ScriptedTransport::deferred();
        let queue = TaskQueue::new(transport.clone());
        let (events, callback) = recorder();

        queue.enqueue_with("first", write_chain(0x01, 0x11), callback("first"));
        queue.enqueue_with("second", write_chain(0x02, 0x22), callback("second"));
        queue.enqueue_with("third", write_chain(0x03, 0x33), callback("third"));

        // First task's first transfer is in flight; the others wait.
        assert!(queue.is_busy());
        assert_eq!(transport.pending_count(), 1);
        assert_eq!(queue.pending_len(), 2);
        assert_eq!(transport.log(), vec![ControlRequest::write(protocol::OV534_REG_SUBADDR, 0x01)]);

        // Finish the first task's four transfers; the second starts only then.
        for _ in 0..3 {
            assert!(transport.complete_next());
            assert!(events.lock().unwrap().is_empty());
        }
        assert!(transport.complete_next());
        assert_eq!(*events.lock().unwrap(), vec![("first".to_string(), true)]);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(
            transport.log().last(),
            Some(&ControlRequest::write(protocol::OV534_REG_SUBADDR, 0x02))
        );

        transport.drain();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ("first".to_string(), true),
                ("second".to_string(), true),
                ("third".to_string(), true),
            ]
        );
        assert!(!queue.is_busy());
        assert_eq!(transport.log().len(), 12);
    }

    #[test]
    fn test_failed_task_does_not_block_queue() {
        init_logging();
        let transport = ScriptedTransport::new();
        transport.fail_on(ControlRequest::write(OV534_REG_WRITE, 0x42), UsbResultCode::Pipe);
        let queue = TaskQueue::new(transport.clone());
        let (events, callback) = recorder();

        queue.enqueue_with("broken", write_chain(0x08, 0x42), callback("broken"));
        queue.enqueue_with("healthy", write_chain(0x09, 0x43), callback("healthy"));

        assert_eq!(
            *events.lock().unwrap(),
            vec![("broken".to_string(), false), ("healthy".to_string(), true)]
        );
        assert_eq!(transport.register(OV534_REG_WRITE), Some(0x43));
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_enqueue_from_completion_callback() {
        let transport = ScriptedTransport::new();
        let queue = TaskQueue::new(transport.clone());
        let (events, callback) = recorder();

        let chained = queue.clone();
        let follow_up = callback("follow-up");
        queue.enqueue_with(
            "outer",
            write_chain(0x01, 0x01),
            Box::new(move |_| chained.enqueue_with("follow-up", write_chain(0x02, 0x02), follow_up)),
        );

        assert_eq!(*events.lock().unwrap(), vec![("follow-up".to_string(), true)]);
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_long_synchronous_backlog() {
        let transport = ScriptedTransport::new();
        let queue = TaskQueue::new(transport.clone());
        let completed = Arc::new(Mutex::new(0usize));

        let backlog = queue.clone();
        let counter = completed.clone();
        queue.enqueue_with(
            "fill",
            RegisterChain::new(protocol::ov534_write(0xe5, 0x00)),
            Box::new(move |_| {
                for i in 0..20_000u32 {
                    let counter = counter.clone();
                    backlog.enqueue_with(
                        format!("task {}", i),
                        RegisterChain::new(protocol::ov534_write(0xe5, i as u8)),
                        Box::new(move |_| *counter.lock().unwrap() += 1),
                    );
                }
            }),
        );

        assert_eq!(*completed.lock().unwrap(), 20_000);
        assert_eq!(transport.log().len(), 20_001);
        assert!(!queue.is_busy());
        assert_eq!(queue.pending_len(), 0);
    }
}
