use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, error};


/// A dedicated OS thread driving a single-threaded tokio runtime. All socket I/O and timers of
///  a server or client run here, while application threads interact through queues only.
///
/// Dropping the reactor shuts the runtime down, which cancels all of its tasks and closes
///  their sockets.
pub struct Reactor {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Reactor {
    pub fn start(name: &str) -> anyhow::Result<Reactor> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, shutdown_recv) = oneshot::channel::<()>();

        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("{}: reactor started", thread_name);
                let _ = runtime.block_on(shutdown_recv);
                drop(runtime);
                debug!("{}: reactor stopped", thread_name);
            })?;

        Ok(Reactor {
            handle,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("reactor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use super::*;

    #[test]
    fn test_spawned_tasks_run_and_are_cancelled_on_drop() {
        let reactor = Reactor::start("test-reactor").unwrap();
        let (send, recv) = std::sync::mpsc::channel();
        reactor.handle().spawn(async move {
            send.send(42).unwrap();
        });
        assert_eq!(recv.recv_timeout(Duration::from_secs(1)).unwrap(), 42);

        let finished = Arc::new(AtomicBool::new(false));
        let finished_in_task = finished.clone();
        reactor.handle().spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            finished_in_task.store(true, Ordering::SeqCst);
        });
        drop(reactor);
        assert!(!finished.load(Ordering::SeqCst));
    }
}
