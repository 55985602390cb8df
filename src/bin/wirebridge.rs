use std::{error::Error, net::SocketAddr, thread, time::Duration};

use clap::{Parser, Subcommand};
use log::{info, warn};
use wirebridge::{
    Command, Endpoint, EndpointConfig, MessageQueue, Registry, RetryPolicy, ShutdownSignal,
};

const TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
    /// Give up after this many consecutive socket failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,
    /// Longest wait between socket reopen attempts, in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    max_backoff_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Print every command received at an address
    Listen {
        /// Address to receive datagrams on
        address: SocketAddr,
        /// Re-send received commands to this peer
        #[arg(long)]
        forward: Option<SocketAddr>,
        /// Local address used when forwarding
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
    /// Send a single Move command
    Send {
        /// Local address to send from
        bind: SocketAddr,
        /// Destination of the datagram
        peer: SocketAddr,
        uid: u64,
        #[arg(allow_negative_numbers = true)]
        x: f32,
        #[arg(allow_negative_numbers = true)]
        y: f32,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut retry =
        RetryPolicy::default().with_max_backoff(Duration::from_millis(cli.max_backoff_ms));
    retry.max_retries = cli.max_retries;

    match cli.mode {
        Mode::Listen {
            address,
            forward,
            bind,
        } => listen(address, forward.map(|peer| (bind, peer)), retry),
        Mode::Send {
            bind,
            peer,
            uid,
            x,
            y,
        } => send(bind, peer, Command::moved(uid, x, y), retry),
    }
}

fn on_interrupt(signals: Vec<ShutdownSignal>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        for signal in &signals {
            signal.trigger();
        }
    })
}

fn listen(
    address: SocketAddr,
    forward: Option<(SocketAddr, SocketAddr)>,
    retry: RetryPolicy,
) -> Result<(), Box<dyn Error>> {
    let ingress = Endpoint::spawn(
        EndpointConfig::ingress(address).with_retry(retry),
        Command::registry(),
        MessageQueue::new(),
    )?;
    let egress = forward
        .map(|(bind, peer)| {
            Endpoint::spawn(
                EndpointConfig::egress(bind, peer).with_retry(retry),
                Registry::new(),
                MessageQueue::new(),
            )
        })
        .transpose()?;

    let running = ShutdownSignal::new();
    let mut signals = vec![running.clone(), ingress.shutdown_signal()];
    signals.extend(egress.iter().map(Endpoint::shutdown_signal));
    on_interrupt(signals)?;

    info!("listening at {address}");
    while !running.is_triggered() && !ingress.is_finished() {
        for command in ingress.queue().drain() {
            println!("{command:?}");
            if let Some(egress) = &egress {
                egress.queue().push(command);
            }
        }
        thread::sleep(TICK);
    }

    ingress.stop()?;
    if let Some(egress) = egress {
        egress.stop()?;
    }
    Ok(())
}

fn send(
    bind: SocketAddr,
    peer: SocketAddr,
    command: Command,
    retry: RetryPolicy,
) -> Result<(), Box<dyn Error>> {
    let egress = Endpoint::spawn(
        EndpointConfig::egress(bind, peer).with_retry(retry),
        Registry::new(),
        MessageQueue::new(),
    )?;
    on_interrupt(vec![egress.shutdown_signal()])?;

    egress.queue().push(command);
    if hand_off(&egress) {
        info!("handed {command:?} to the socket for {peer}");
    } else {
        warn!("{command:?} was never handed to the socket for {peer}");
    }
    egress.stop()?;
    Ok(())
}

/// Waits until the egress endpoint has taken everything off its queue.
///
/// A popped command is handed to the socket before the endpoint re-checks
/// shutdown; a failed send is logged by the endpoint itself. Returns false if
/// the endpoint stopped with commands still queued.
fn hand_off(egress: &Endpoint<Command>) -> bool {
    while !egress.queue().is_empty() && !egress.is_finished() {
        thread::sleep(TICK);
    }
    egress.queue().is_empty()
}
