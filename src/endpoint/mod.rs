//! UDP endpoint actors.
//!
//! An [`Endpoint`] owns one background thread and, at any moment, at most one
//! socket. Application code never sees the socket; it only talks to the
//! endpoint's [`MessageQueue`].
//!
//! # Overview
//!
//! - An **ingress** endpoint receives datagrams, frames them with the binary
//!   codec and queues every decoded message in wire order. Consumers poll the
//!   queue.
//! - An **egress** endpoint blocks on its queue, encodes each message as one
//!   frame and sends it to its peer as one datagram.
//!
//! Both share the same lifecycle:
//!
//! ```text
//! Bound --socket error / decoder panic--> Backoff(n) --delay elapsed--> Bound
//!   |                         |
//!   +------- shutdown --------+--> Stopped
//! ```
//!
//! The socket lives inside a single `Bound` session and is closed when the
//! session ends, whatever the reason. A decoder that panics ends the session
//! the same way a socket error does; the thread keeps running. Consecutive failures grow the backoff
//! per [`RetryPolicy`]; a session that handled at least one datagram resets
//! the count. When the policy is exhausted the thread ends and the error is
//! returned from [`Endpoint::join`].
//!
//! # See Also
//!
//! - [`protocol`](crate::protocol): Frame codecs used by both roles.
mod config;
mod socket;

use std::{
    any::Any,
    io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    Command,
    protocol::{Registry, WireMessage, decode_datagram, encode_frame},
    queue::MessageQueue,
};

pub use config::{
    DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_POLL_INTERVAL, EndpointConfig,
    MIN_POLL_INTERVAL, RetryPolicy, Role,
};
pub use socket::{DatagramSocket, SocketFactory, UdpFactory};

use socket::is_timeout;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("gave up after {attempts} consecutive socket failures: {source}")]
    RetriesExhausted { attempts: u32, source: io::Error },

    #[error("failed to spawn endpoint thread: {0}")]
    Spawn(io::Error),

    #[error("endpoint thread panicked")]
    Panicked,
}

/// Cooperative stop flag shared between an endpoint and its owner.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running endpoint thread.
///
/// Dropping the handle triggers shutdown and waits for the thread.
#[derive(Debug)]
pub struct Endpoint<T> {
    address: SocketAddr,
    role: Role,
    queue: MessageQueue<T>,
    shutdown: ShutdownSignal,
    thread: Option<JoinHandle<Result<(), EndpointError>>>,
}

impl Endpoint<Command> {
    /// Ingress endpoint for the built-in commands with a fresh queue.
    pub fn ingress(address: SocketAddr) -> Result<Self, EndpointError> {
        Self::spawn(
            EndpointConfig::ingress(address),
            Command::registry(),
            MessageQueue::new(),
        )
    }

    /// Egress endpoint for the built-in commands with a fresh queue.
    pub fn egress(address: SocketAddr, peer: SocketAddr) -> Result<Self, EndpointError> {
        Self::spawn(
            EndpointConfig::egress(address, peer),
            Registry::new(),
            MessageQueue::new(),
        )
    }
}

impl<T: WireMessage + Send + 'static> Endpoint<T> {
    pub fn spawn(
        config: EndpointConfig,
        registry: Registry<T>,
        queue: MessageQueue<T>,
    ) -> Result<Self, EndpointError> {
        Self::spawn_with(UdpFactory, config, registry, queue)
    }

    /// Starts an endpoint whose sockets come from `factory`.
    pub fn spawn_with<F: SocketFactory>(
        factory: F,
        config: EndpointConfig,
        registry: Registry<T>,
        queue: MessageQueue<T>,
    ) -> Result<Self, EndpointError> {
        let shutdown = ShutdownSignal::new();
        let address = config.address;
        let role = config.role;

        let actor = Actor {
            config,
            factory,
            registry,
            queue: queue.clone(),
            shutdown: shutdown.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("{role}-{address}"))
            .spawn(move || actor.run())
            .map_err(EndpointError::Spawn)?;

        Ok(Self {
            address,
            role,
            queue,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl<T> Endpoint<T> {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queue feeding (egress) or fed by (ingress) this endpoint.
    pub fn queue(&self) -> &MessageQueue<T> {
        &self.queue
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread to end and returns why it ended.
    pub fn join(mut self) -> Result<(), EndpointError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| EndpointError::Panicked)?,
            None => Ok(()),
        }
    }

    /// Triggers shutdown, then joins.
    pub fn stop(self) -> Result<(), EndpointError> {
        self.shutdown();
        self.join()
    }
}

impl<T> Drop for Endpoint<T> {
    fn drop(&mut self) {
        self.shutdown.trigger();

        if let Some(thread) = self.thread.take() {
            debug!("shutting down {} endpoint {}", self.role, self.address);
            let _ = thread.join();
        }
    }
}

/// Socket error that ended a session.
struct Failure {
    source: io::Error,
    /// The session handled traffic before failing.
    progressed: bool,
}

impl Failure {
    fn at_open(source: io::Error) -> Self {
        Self {
            source,
            progressed: false,
        }
    }
}

struct Actor<T, F> {
    config: EndpointConfig,
    factory: F,
    registry: Registry<T>,
    queue: MessageQueue<T>,
    shutdown: ShutdownSignal,
}

impl<T: WireMessage, F: SocketFactory> Actor<T, F> {
    fn run(mut self) -> Result<(), EndpointError> {
        let role = self.config.role;
        let address = self.config.address;
        let mut failures = 0u32;

        while !self.shutdown.is_triggered() {
            let session = match role {
                Role::Ingress => self.receive(),
                Role::Egress { peer } => self.send(peer),
            };

            let Err(failure) = session else {
                break;
            };

            if failure.progressed {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            if self.config.retry.exhausted(failures) {
                error!("{role} endpoint {address} giving up after {failures} failures: {}", failure.source);
                return Err(EndpointError::RetriesExhausted {
                    attempts: failures,
                    source: failure.source,
                });
            }

            let delay = self.config.retry.backoff(failures - 1);
            warn!(
                "{role} endpoint {address} socket failure #{failures}: {}; reopening in {delay:?}",
                failure.source
            );
            self.pause(delay);
        }

        info!("{role} endpoint {address} stopped");
        Ok(())
    }

    fn open(&mut self) -> Result<F::Socket, Failure> {
        let mut socket = self.factory.open(&self.config).map_err(Failure::at_open)?;
        socket
            .set_read_timeout(Some(self.config.poll_interval()))
            .map_err(Failure::at_open)?;
        info!("{} endpoint bound at {}", self.config.role, self.config.address);
        Ok(socket)
    }

    /// One ingress session: runs until shutdown or a socket error.
    fn receive(&mut self) -> Result<(), Failure> {
        let mut socket = self.open()?;
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut progressed = false;

        while !self.shutdown.is_triggered() {
            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if is_timeout(&e) => continue,
                Err(source) => return Err(Failure { source, progressed }),
            };

            // A panicking decoder closes the socket like any other failure.
            let registry = &self.registry;
            let datagram = &buf[..len];
            let report = panic::catch_unwind(AssertUnwindSafe(|| decode_datagram(registry, datagram)))
                .map_err(|payload| {
                    let reason = panic_reason(payload.as_ref());
                    error!("decoder panicked on {len} byte datagram: {reason}");
                    Failure {
                        source: io::Error::other(format!("decoder panicked: {reason}")),
                        progressed,
                    }
                })?;
            progressed = true;

            debug!("received {len} byte datagram with {} frames", report.messages.len());
            if let Some(err) = &report.error {
                warn!("dropping rest of datagram after {} bytes: {err}", report.consumed);
            } else if report.trailing() > 0 {
                warn!("ignoring {} trailing bytes of datagram", report.trailing());
            }

            self.queue.extend(report.messages);
        }

        Ok(())
    }

    /// One egress session: runs until shutdown or a socket error.
    fn send(&mut self, peer: SocketAddr) -> Result<(), Failure> {
        let mut socket = self.open()?;
        let mut progressed = false;

        while !self.shutdown.is_triggered() {
            let Some(message) = self.queue.pop_timeout(self.config.poll_interval()) else {
                continue;
            };

            let frame = match encode_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("dropping '{}' message: {e}", message.tag());
                    continue;
                }
            };

            socket
                .send_to(&frame, peer)
                .map_err(|source| Failure { source, progressed })?;
            progressed = true;
            debug!("sent '{}' frame of {} bytes to {peer}", message.tag(), frame.len());
        }

        Ok(())
    }

    /// Sleeps for `delay`, returning early on shutdown.
    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.shutdown.is_triggered() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.config.poll_interval()));
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        net::UdpSocket,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use crate::{
        command::KeyCode,
        protocol::{CodecError, encode_frame_into},
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn free_addr() -> SocketAddr {
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(5))
    }

    fn wait_for<T>(queue: &MessageQueue<T>, count: usize) -> Vec<T> {
        let deadline = Instant::now() + WAIT;
        let mut out = Vec::new();
        while out.len() < count && Instant::now() < deadline {
            match queue.try_pop() {
                Some(item) => out.push(item),
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
        out
    }

    enum Step {
        Datagram(Vec<u8>),
        Fail(io::ErrorKind),
    }

    /// Sockets replaying a shared script; an exhausted script behaves like a
    /// quiet network.
    #[derive(Clone)]
    struct ScriptedFactory {
        script: Arc<Mutex<VecDeque<Step>>>,
        opens: Arc<AtomicUsize>,
        fail_open: bool,
    }

    impl ScriptedFactory {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.into())),
                opens: Arc::new(AtomicUsize::new(0)),
                fail_open: false,
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    struct ScriptedSocket {
        script: Arc<Mutex<VecDeque<Step>>>,
        timeout: Duration,
    }

    impl DatagramSocket for ScriptedSocket {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Datagram(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                None => {
                    thread::sleep(self.timeout);
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                }
            }
        }

        fn send_to(&mut self, buf: &[u8], _peer: SocketAddr) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
            // Same contract as UdpSocket.
            if timeout == Some(Duration::ZERO) {
                return Err(io::Error::from(io::ErrorKind::InvalidInput));
            }
            self.timeout = timeout.unwrap_or(Duration::from_millis(10));
            Ok(())
        }
    }

    impl SocketFactory for ScriptedFactory {
        type Socket = ScriptedSocket;

        fn open(&mut self, _config: &EndpointConfig) -> io::Result<ScriptedSocket> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(io::Error::from(io::ErrorKind::AddrInUse));
            }
            Ok(ScriptedSocket {
                script: Arc::clone(&self.script),
                timeout: Duration::from_millis(10),
            })
        }
    }

    fn scripted_ingress(factory: ScriptedFactory, retry: RetryPolicy) -> Endpoint<Command> {
        let config = EndpointConfig::ingress(free_addr())
            .with_poll_interval(Duration::from_millis(10))
            .with_retry(retry);
        Endpoint::spawn_with(factory, config, Command::registry(), MessageQueue::new()).unwrap()
    }

    #[test]
    fn ingress_decodes_udp_datagrams() {
        let address = free_addr();
        let endpoint = Endpoint::ingress(address).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut datagram = Vec::new();
        encode_frame_into(&Command::moved(1, 2.0, 3.0), &mut datagram).unwrap();
        encode_frame_into(&Command::input(KeyCode::Spacebar), &mut datagram).unwrap();

        // The endpoint may not be bound yet; resend until something arrives.
        let deadline = Instant::now() + WAIT;
        while endpoint.queue().is_empty() && Instant::now() < deadline {
            sender.send_to(&datagram, address).unwrap();
            thread::sleep(Duration::from_millis(20));
        }

        let received = wait_for(endpoint.queue(), 2);
        assert_eq!(
            received,
            vec![Command::moved(1, 2.0, 3.0), Command::input(KeyCode::Spacebar)]
        );
        endpoint.stop().unwrap();
    }

    #[test]
    fn egress_sends_one_frame_per_message() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(WAIT)).unwrap();
        let endpoint = Endpoint::egress(free_addr(), receiver.local_addr().unwrap()).unwrap();

        endpoint.queue().push(Command::spawn(9, 2, 1.0, -1.0));
        endpoint.queue().push(Command::moved(9, 1.5, -1.0));

        let registry = Command::registry();
        let mut buf = [0u8; 1024];
        for expected in [Command::spawn(9, 2, 1.0, -1.0), Command::moved(9, 1.5, -1.0)] {
            let len = receiver.recv(&mut buf).unwrap();
            let report = decode_datagram(&registry, &buf[..len]);
            assert!(report.is_complete());
            assert_eq!(report.messages, vec![expected]);
        }

        endpoint.stop().unwrap();
    }

    #[test]
    fn ingress_reopens_after_socket_failure() {
        let frame = encode_frame(&Command::moved(5, 0.0, 1.0)).unwrap();
        let factory = ScriptedFactory::new(vec![
            Step::Fail(io::ErrorKind::ConnectionReset),
            Step::Datagram(frame),
        ]);
        let endpoint = scripted_ingress(factory.clone(), fast_retry());

        assert_eq!(wait_for(endpoint.queue(), 1), vec![Command::moved(5, 0.0, 1.0)]);
        assert_eq!(factory.opens(), 2);
        assert!(!endpoint.is_finished());
        endpoint.stop().unwrap();
    }

    #[test]
    fn malformed_datagram_keeps_socket() {
        let mut garbage = Vec::new();
        garbage.extend_from_slice(&12u64.to_be_bytes());
        garbage.extend_from_slice(&4u64.to_be_bytes());
        garbage.extend_from_slice(b"Nope");
        let valid = encode_frame(&Command::input(KeyCode::W)).unwrap();

        let factory = ScriptedFactory::new(vec![Step::Datagram(garbage), Step::Datagram(valid)]);
        let endpoint = scripted_ingress(factory.clone(), fast_retry());

        assert_eq!(wait_for(endpoint.queue(), 1), vec![Command::input(KeyCode::W)]);
        assert_eq!(factory.opens(), 1);
        endpoint.stop().unwrap();
    }

    fn decode_boom(_: &[u8]) -> Result<(Command, usize), CodecError> {
        panic!("boom decoder bug")
    }

    #[test]
    fn panicking_decoder_reopens_socket() {
        let mut boom = Vec::new();
        boom.extend_from_slice(&12u64.to_be_bytes());
        boom.extend_from_slice(&4u64.to_be_bytes());
        boom.extend_from_slice(b"Boom");
        let valid = encode_frame(&Command::moved(8, 3.0, 4.0)).unwrap();

        let factory = ScriptedFactory::new(vec![Step::Datagram(boom), Step::Datagram(valid)]);
        let mut registry = Command::registry();
        registry.register("Boom", decode_boom);
        let config = EndpointConfig::ingress(free_addr())
            .with_poll_interval(Duration::from_millis(10))
            .with_retry(fast_retry());
        let endpoint =
            Endpoint::spawn_with(factory.clone(), config, registry, MessageQueue::new()).unwrap();

        assert_eq!(wait_for(endpoint.queue(), 1), vec![Command::moved(8, 3.0, 4.0)]);
        assert_eq!(factory.opens(), 2);
        assert!(!endpoint.is_finished());
        endpoint.stop().unwrap();
    }

    #[test]
    fn zero_poll_interval_still_receives() {
        let valid = encode_frame(&Command::input(KeyCode::W)).unwrap();
        let factory = ScriptedFactory::new(vec![Step::Datagram(valid)]);
        let mut config = EndpointConfig::ingress(free_addr()).with_retry(fast_retry());
        config.poll_interval = Duration::ZERO;
        let endpoint =
            Endpoint::spawn_with(factory.clone(), config, Command::registry(), MessageQueue::new())
                .unwrap();

        assert_eq!(wait_for(endpoint.queue(), 1), vec![Command::input(KeyCode::W)]);
        assert_eq!(factory.opens(), 1);
        endpoint.stop().unwrap();
    }

    #[test]
    fn exhausted_retries_are_reported() {
        let mut factory = ScriptedFactory::new(Vec::new());
        factory.fail_open = true;
        let endpoint = scripted_ingress(factory.clone(), fast_retry().with_max_retries(2));

        match endpoint.join() {
            Err(EndpointError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(factory.opens(), 3);
    }

    #[test]
    fn shutdown_interrupts_backoff() {
        let mut factory = ScriptedFactory::new(Vec::new());
        factory.fail_open = true;
        let retry = RetryPolicy::default()
            .with_initial_backoff(Duration::from_secs(60))
            .with_max_backoff(Duration::from_secs(60));
        let endpoint = scripted_ingress(factory, retry);

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        endpoint.stop().unwrap();
        assert!(start.elapsed() < WAIT);
    }

    #[test]
    fn shutdown_stops_idle_egress() {
        let endpoint = Endpoint::egress(free_addr(), free_addr()).unwrap();
        thread::sleep(Duration::from_millis(20));
        let signal = endpoint.shutdown_signal();
        signal.trigger();
        assert!(endpoint.join().is_ok());
    }

    struct Unencodable;

    impl WireMessage for Unencodable {
        fn tag(&self) -> &'static str {
            "Ünencodable"
        }

        fn encode_payload(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
            Ok(())
        }
    }

    #[test]
    fn unencodable_message_is_dropped() {
        let factory = ScriptedFactory::new(Vec::new());
        let config = EndpointConfig::egress(free_addr(), free_addr())
            .with_poll_interval(Duration::from_millis(10));
        let endpoint =
            Endpoint::spawn_with(factory.clone(), config, Registry::new(), MessageQueue::new())
                .unwrap();

        endpoint.queue().push(Unencodable);
        let deadline = Instant::now() + WAIT;
        while !endpoint.queue().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(endpoint.queue().is_empty());
        assert!(!endpoint.is_finished());
        assert_eq!(factory.opens(), 1);
        endpoint.stop().unwrap();
    }
}
