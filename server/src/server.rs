//! Connection supervisor: accept loop, worker tasks, coordinated shutdown.
//!
//! One tokio task per accepted connection, tracked in a `JoinSet` so
//! shutdown can wait for in-flight workers to finish. Shutdown is
//! cooperative and non-preemptive: clearing the atomic `accepting` and
//! `receiving` flags stops the accept loop immediately, while workers exit
//! after completing their current frame-processing step (or when their
//! idle deadline fires).

use crate::conn::{ConnError, FrameConn};
use crate::router::Router;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Cloneable handle that stops the server from anywhere: the router's
/// admin shutdown handler, a Ctrl-C hook, or a test.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle {
    accepting: Arc<AtomicBool>,
    receiving: Arc<AtomicBool>,
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops accepting new connections and asks workers to wind down.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.accepting.store(false, Ordering::SeqCst);
        self.receiving.store(false, Ordering::SeqCst);
        // notify_one stores a permit, so a shutdown landing while the
        // accept loop is between polls is not lost.
        self.notify.notify_one();
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    /// Whether shutdown has been requested at least once.
    pub fn was_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Accepts connections and runs one worker per connection until shutdown.
pub struct Server {
    router: Arc<Router>,
    handle: ShutdownHandle,
    idle_timeout: Duration,
    next_conn_id: AtomicU64,
    worker_count: AtomicUsize,
}

impl Server {
    pub fn new(router: Arc<Router>, handle: ShutdownHandle, idle_timeout: Duration) -> Self {
        Self {
            router,
            handle,
            idle_timeout,
            next_conn_id: AtomicU64::new(1),
            worker_count: AtomicUsize::new(0),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Number of connection workers currently tracked by the supervisor.
    /// Finished workers are reaped as the accept loop runs, so this does
    /// not grow with connection churn.
    pub fn active_workers(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// Runs the accept loop on a bound listener, then blocks until every
    /// active worker has finished once shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        self.handle.accepting.store(true, Ordering::SeqCst);
        self.handle.receiving.store(true, Ordering::SeqCst);

        info!("server listening on {}", listener.local_addr()?);

        let mut workers = JoinSet::new();

        while self.handle.is_accepting() {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                            info!("connection {} accepted from {}", conn_id, addr);

                            let router = Arc::clone(&self.router);
                            let handle = self.handle.clone();
                            let idle_timeout = self.idle_timeout;
                            workers.spawn(async move {
                                process_client(router, handle, conn_id, stream, idle_timeout).await;
                            });
                        }
                        Err(e) => {
                            warn!("failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished workers as we go; an unreaped JoinSet
                // entry would otherwise linger per connection for the
                // life of the server.
                Some(result) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = result {
                        error!("worker task failed: {}", e);
                    }
                }
                _ = self.handle.notify.notified() => {}
            }
            self.worker_count.store(workers.len(), Ordering::SeqCst);
        }

        // Close the listener right away; workers drain at their own pace.
        drop(listener);
        info!("no longer accepting connections, waiting for {} worker(s)", workers.len());

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("worker task failed: {}", e);
            }
            self.worker_count.store(workers.len(), Ordering::SeqCst);
        }

        info!("server stopped");
        Ok(())
    }
}

/// Worker loop for one connection: read a frame, hand it to the router,
/// stop on any error or on the router's disconnect signal. Every exit path
/// runs the same cleanup so neither registry entries nor sockets leak.
async fn process_client(
    router: Arc<Router>,
    handle: ShutdownHandle,
    conn_id: u64,
    stream: TcpStream,
    idle_timeout: Duration,
) {
    let mut conn = FrameConn::new(stream, idle_timeout);

    while handle.is_receiving() {
        let frame = match conn.read_frame().await {
            Ok(frame) => frame,
            Err(ConnError::Closed) => {
                debug!("connection {} closed by peer", conn_id);
                break;
            }
            Err(ConnError::IdleTimeout) => {
                info!("connection {} evicted after idle timeout", conn_id);
                break;
            }
            Err(e) => {
                debug!("connection {} read failed: {}", conn_id, e);
                break;
            }
        };

        match router.route(conn_id, &mut conn, frame).await {
            Ok(false) => {}
            Ok(true) => {
                debug!("connection {} told to disconnect", conn_id);
                break;
            }
            Err(e) => {
                debug!("connection {} reply failed: {}", conn_id, e);
                break;
            }
        }
    }

    router.client_disconnected(conn_id);
    // The socket closes when `conn` drops here.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ExactMatchVerifier;
    use crate::registry::ClientRegistry;
    use crate::storage::{MemoryStorage, Storage};
    use shared::pad_credential;
    use tokio::time::timeout;

    fn test_server() -> Arc<Server> {
        let registry = Arc::new(ClientRegistry::new());
        let storage = Arc::new(MemoryStorage::new());
        storage.add_admin(
            pad_credential(b"admin").unwrap(),
            pad_credential(b"pass").unwrap(),
        );
        let handle = ShutdownHandle::new();
        let router = Arc::new(Router::new(
            registry,
            storage as Arc<dyn Storage>,
            Box::new(ExactMatchVerifier),
            handle.clone(),
        ));
        Arc::new(Server::new(router, handle, Duration::from_secs(900)))
    }

    async fn wait_for_workers(server: &Server, predicate: impl Fn(usize) -> bool) {
        let polling = async {
            while !predicate(server.active_workers()) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(Duration::from_secs(5), polling)
            .await
            .expect("worker count never reached the expected value");
    }

    #[tokio::test]
    async fn test_finished_workers_are_reaped_during_accept() {
        let server = test_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let serve_task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };

        // One connection stays open so the worker count cannot sit at
        // zero before the accept loop has done anything.
        let keeper = TcpStream::connect(addr).await.unwrap();
        wait_for_workers(&server, |n| n >= 1).await;

        // Churn through connections that disconnect immediately. Each
        // worker finishes as soon as it sees EOF.
        for _ in 0..20 {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        }

        // The accept loop reaps completed workers as it runs, so the
        // tracked count drains back down to the one live connection
        // without any shutdown.
        wait_for_workers(&server, |n| n == 1).await;

        drop(keeper);
        server.shutdown_handle().shutdown();
        let _ = timeout(Duration::from_secs(5), serve_task).await;
    }

    #[tokio::test]
    async fn test_shutdown_wakes_idle_accept_loop() {
        let server = test_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let serve_task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };

        // No connection ever arrives; shutdown alone must unblock the
        // accept loop. The stored notify permit covers a shutdown that
        // lands between loop iterations.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown_handle().shutdown();

        let result = timeout(Duration::from_secs(5), serve_task)
            .await
            .expect("serve() should return after shutdown with no connections")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_shutdown_handle_flags() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_accepting());
        assert!(!handle.is_receiving());
        assert!(!handle.was_requested());

        handle.accepting.store(true, Ordering::SeqCst);
        handle.receiving.store(true, Ordering::SeqCst);

        handle.shutdown();
        assert!(!handle.is_accepting());
        assert!(!handle.is_receiving());
        assert!(handle.was_requested());
    }

    #[test]
    fn test_shutdown_handle_clones_share_state() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();

        handle.shutdown();
        assert!(clone.was_requested());
    }
}
