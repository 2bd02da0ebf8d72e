//! Parent side of the link.
//!
//! The server binds an ephemeral loopback port and accepts worker
//! connections on a background task. Every connection gets its own handler
//! task in a [`JoinSet`]; the set is the handler registry, and the only state
//! handlers share is that registry and the [`ResultStore`].
//!
//! Workers cannot make progress before their options request is answered,
//! and a handler is registered before it reads its first frame. So once a
//! worker process has exited, its handler is already in the registry, and
//! [`LinkServer::wait_finish`] after the exit is a complete barrier for that
//! worker's results.

use super::call::{DispatchError, SinkCall};
use super::frame::{read_frame, write_frame, InfraRequest, LinkFrame};
use super::LinkError;
use crate::options::RunOptions;
use crate::results::ResultStore;
use crate::sink::SharedSink;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Loopback address workers connect to
pub const LINK_HOST: &str = "127.0.0.1";

/// State every connection handler needs
struct HandlerContext {
    sink: SharedSink,
    options: Arc<RunOptions>,
    store: ResultStore,
}

/// Listener for forked workers
pub struct LinkServer {
    addr: SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    handlers: Arc<Mutex<JoinSet<()>>>,
}

impl LinkServer {
    /// Bind an ephemeral local port and start accepting connections.
    ///
    /// Forwarded sink calls go to `sink`, options requests are answered with
    /// `options`, and reported results are merged into `store`.
    pub async fn open(
        sink: SharedSink,
        options: Arc<RunOptions>,
        store: ResultStore,
    ) -> Result<Self, LinkError> {
        let listener = TcpListener::bind((LINK_HOST, 0)).await?;
        let addr = listener.local_addr()?;
        info!("Link server listening on {}", addr);

        let context = Arc::new(HandlerContext {
            sink,
            options,
            store,
        });
        let handlers: Arc<Mutex<JoinSet<()>>> = Arc::new(Mutex::new(JoinSet::new()));

        let registry = handlers.clone();
        let accept_task = tokio::spawn(async move {
            let mut next_id: u64 = 1;
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let id = next_id;
                        next_id += 1;
                        debug!("Accepted link connection {} from {}", id, peer);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY on connection {}: {}", id, e);
                        }
                        registry
                            .lock()
                            .spawn(handle_connection(id, stream, context.clone()));
                    }
                    Err(e) => {
                        warn!("Link server stopped accepting connections: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            accept_task: Mutex::new(Some(accept_task)),
            handlers,
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of handlers currently registered
    pub fn active_handlers(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Wait until every registered handler has terminated, and remove them
    /// from the registry. Handlers registered while waiting are left for the
    /// next call.
    pub async fn wait_finish(&self) {
        let mut finished = std::mem::replace(&mut *self.handlers.lock(), JoinSet::new());
        while let Some(outcome) = finished.join_next().await {
            if let Err(e) = outcome {
                if e.is_panic() {
                    warn!("Link handler panicked: {}", e);
                }
            }
        }
    }

    /// Stop accepting, close every live connection, and join all handlers.
    /// Safe to call more than once.
    pub async fn terminate(&self) {
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            task.abort();
            // Dropping the aborted task's listener closes the port
            let _ = task.await;
        }

        let mut live = std::mem::replace(&mut *self.handlers.lock(), JoinSet::new());
        if !live.is_empty() {
            debug!("Closing {} live link connection(s)", live.len());
        }
        live.abort_all();
        while live.join_next().await.is_some() {}
    }
}

impl Drop for LinkServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn handle_connection(id: u64, stream: TcpStream, context: Arc<HandlerContext>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        match read_frame(&mut reader).await {
            Ok(None) => {
                debug!("Link connection {} closed by worker", id);
                break;
            }
            Ok(Some(LinkFrame::Finish)) => {
                debug!("Link connection {} finished", id);
                break;
            }
            Ok(Some(frame)) => {
                if let Err(e) = context.dispatch(frame, &mut writer).await {
                    warn!("Closing link connection {}: {}", id, e);
                    break;
                }
            }
            Err(e) => {
                warn!("Closing link connection {}: {}", id, e);
                break;
            }
        }
    }
}

impl HandlerContext {
    async fn dispatch(&self, frame: LinkFrame, writer: &mut OwnedWriteHalf) -> Result<(), LinkError> {
        match frame {
            LinkFrame::InfraRequest(InfraRequest::Options) => {
                let response = LinkFrame::InfraResponse(Box::new((*self.options).clone()));
                write_frame(writer, &response).await
            }
            LinkFrame::ResultsReport { descriptor, result } => {
                debug!("Received results for {}", descriptor);
                self.store.merge(descriptor, result);
                Ok(())
            }
            LinkFrame::OutputCall { method, args } => {
                self.forward(&method, &args);
                Ok(())
            }
            other => Err(LinkError::UnexpectedFrame {
                expected: "OutputCall, InfraRequest, ResultsReport or Finish",
                actual: other.kind(),
            }),
        }
    }

    fn forward(&self, method: &str, args: &[u8]) {
        let call = match SinkCall::decode(method, args) {
            Ok(call) => call,
            Err(DispatchError::Forbidden(name)) => {
                warn!("Ignoring forbidden forwarded method: {}", name);
                return;
            }
            Err(e) => {
                warn!("{}", e);
                let mut sink = self.sink.lock();
                if let Err(print_err) = sink.println(&format!("WARNING: {}", e)) {
                    warn!("Failed to print to output sink: {:#}", print_err);
                }
                return;
            }
        };

        let mut sink = self.sink.lock();
        if let Err(e) = call.apply(sink.as_mut()) {
            warn!("Forwarded {} call failed: {:#}", call.method(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BenchmarkDescriptor, Mode};
    use crate::link::client::LinkClient;
    use crate::link::frame::{read_frame_blocking, write_frame_blocking};
    use crate::sink::{shared, RecordingSink, SinkEvent};
    use std::time::Duration;

    async fn server_with_recorder() -> (LinkServer, RecordingSink, ResultStore) {
        let recorder = RecordingSink::new();
        let store = ResultStore::new();
        let options = Arc::new(RunOptions::builder().forks(2).build().unwrap());
        let server = LinkServer::open(shared(recorder.clone()), options, store.clone())
            .await
            .unwrap();
        (server, recorder, store)
    }

    #[tokio::test]
    async fn test_options_request_is_answered() {
        let (server, _recorder, _store) = server_with_recorder().await;
        let (host, port) = (server.host(), server.port());

        let options = tokio::task::spawn_blocking(move || {
            let client = LinkClient::connect(&host, port).unwrap();
            let options = client.request_options().unwrap();
            client.finish().unwrap();
            options
        })
        .await
        .unwrap();

        assert_eq!(options.forks(), Some(2));
        server.wait_finish().await;
        assert_eq!(server.active_handlers(), 0);
        server.terminate().await;
    }

    #[tokio::test]
    async fn test_unknown_and_forbidden_methods_are_dropped() {
        let (server, recorder, _store) = server_with_recorder().await;
        let (host, port) = (server.host(), server.port());

        tokio::task::spawn_blocking(move || {
            let client = LinkClient::connect(&host, port).unwrap();
            client.request_options().unwrap();
            let mut stream = client.try_clone_stream().unwrap();
            for method in ["run_start", "run_end", "print_banner"] {
                let frame = LinkFrame::OutputCall {
                    method: method.to_string(),
                    args: Vec::new(),
                };
                write_frame_blocking(&mut stream, &frame).unwrap();
            }
            let (method, args) = SinkCall::Println("still alive".to_string()).encode().unwrap();
            write_frame_blocking(
                &mut stream,
                &LinkFrame::OutputCall {
                    method: method.to_string(),
                    args,
                },
            )
            .unwrap();
            // close without Finish
            drop(stream);
            drop(client);
        })
        .await
        .unwrap();

        server.wait_finish().await;
        let events = recorder.events();
        assert!(!events.contains(&SinkEvent::RunStart));
        assert!(!events.iter().any(|e| matches!(e, SinkEvent::RunEnd(_))));
        assert_eq!(
            recorder.lines(),
            vec![
                "WARNING: Unknown method to forward: print_banner".to_string(),
                "still alive".to_string()
            ]
        );
        server.terminate().await;
    }

    #[tokio::test]
    async fn test_unexpected_frame_closes_connection() {
        let (server, _recorder, store) = server_with_recorder().await;
        let (host, port) = (server.host(), server.port());

        let closed = tokio::task::spawn_blocking(move || {
            let mut stream = std::net::TcpStream::connect((host.as_str(), port)).unwrap();
            let bogus = LinkFrame::InfraResponse(Box::new(RunOptions::default()));
            write_frame_blocking(&mut stream, &bogus).unwrap();
            // server hangs up rather than answering
            read_frame_blocking(&mut stream)
        })
        .await
        .unwrap();

        assert!(matches!(closed, Ok(None) | Err(LinkError::Io(_))));
        server.wait_finish().await;
        assert!(store.is_empty());
        server.terminate().await;
    }

    #[tokio::test]
    async fn test_terminate_unblocks_silent_worker() {
        let (server, _recorder, _store) = server_with_recorder().await;
        let (host, port) = (server.host(), server.port());

        let worker = tokio::task::spawn_blocking(move || {
            let client = LinkClient::connect(&host, port).unwrap();
            client.request_options().unwrap();
            // never sends Finish; blocks until the parent closes the socket
            let mut stream = client.try_clone_stream().unwrap();
            read_frame_blocking(&mut stream)
        });

        // wait for the handler to register
        for _ in 0..100 {
            if server.active_handlers() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        server.terminate().await;
        server.terminate().await;
        assert_eq!(server.active_handlers(), 0);

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker still blocked after terminate")
            .unwrap();
        assert!(matches!(outcome, Ok(None) | Err(LinkError::Io(_))));
    }

    #[tokio::test]
    async fn test_results_report_is_merged() {
        use crate::results::{IterationKind, IterationSample, ResultValue, RunResult, ThreadResult, TimeUnit};

        let (server, _recorder, store) = server_with_recorder().await;
        let (host, port) = (server.host(), server.port());
        let descriptor = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);
        let reported = descriptor.clone();

        tokio::task::spawn_blocking(move || {
            let value = ResultValue::throughput("bench", 500, 1_000_000_000, TimeUnit::Seconds);
            let sample = IterationSample::from_threads(
                1,
                IterationKind::Measurement,
                1_000_000_000,
                vec![ThreadResult::new(value)],
            )
            .unwrap();
            let client = LinkClient::connect(&host, port).unwrap();
            client.request_options().unwrap();
            client
                .report(&reported, &RunResult::from_iterations(&[sample]).unwrap())
                .unwrap();
            client.finish().unwrap();
        })
        .await
        .unwrap();

        server.wait_finish().await;
        let merged = store.get(&descriptor).unwrap();
        assert_eq!(merged.primary().score(), Some(500.0));
        server.terminate().await;
    }
}
