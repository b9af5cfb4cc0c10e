use crate::device::Transport;
use crate::modbus::{
    self, Codec, ModbusRtuCodec, ModbusTcpCodec, Operation, Request, Response,
};
use futures::{SinkExt as _, StreamExt as _};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU16;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::SendError;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Passing this as the TCP host constructs an inert connection that answers
/// reads with zeroed registers and acknowledges writes without ever touching
/// the network. Useful for exercising the tool with no hardware around.
pub const OFFLINE_SENTINEL: &str = "0.0.0.0";

/// Modbus TCP port the panel listens on unless told otherwise.
pub const DEFAULT_TCP_PORT: u16 = 502;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not open {1:?} for reading and writing")]
    OpenDevice(#[source] std::io::Error, PathBuf),
    #[error("scheduling a request failed")]
    ScheduleRequest(#[source] SendError<modbus::Request>),
    #[error("could not read data from the link")]
    Receive(#[source] std::io::Error),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not shut down the connection")]
    Shutdown(#[source] std::io::Error),
    #[error("no response arrived within the read timeout")]
    Timeout,
    #[error("device responded with modbus exception code {0}")]
    Exception(u8),
    #[error("response does not match the shape of the request")]
    UnexpectedResponse,
}

#[derive(Default)]
pub struct ResponseTracker {
    responses: Mutex<BTreeMap<u16, Option<Response>>>,
    change_notify: Notify,
}

impl ResponseTracker {
    pub fn mark_timeout(&self, transaction_id: u16) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(transaction_id, None);
        self.change_notify.notify_waiters();
        drop(guard);
    }

    pub fn add_response(&self, response: Response) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(response.transaction_id, Some(response));
        self.change_notify.notify_waiters();
        drop(guard);
    }

    pub async fn wait_for(&self, transaction_id: u16) -> Option<Response> {
        loop {
            let notified = self.change_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(v) = guard.remove(&transaction_id) {
                    return v;
                }
            }
            notified.await;
        }
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// The modbus unit ID of the device.
    #[arg(long, short = 'i', default_value = "1")]
    device_id: u8,

    /// If the modbus response isn't received in this amount of time, consider
    /// the request failed.
    ///
    /// Nothing is retried: the failure surfaces to the caller.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// Fail if the modbus request can't be written to the link in this amount
    /// of time.
    #[arg(long, default_value = "3s")]
    send_timeout: humantime::Duration,
}

#[derive(clap::Parser, Clone)]
#[group(required = true)]
pub struct ConnectionGroup {
    /// Connect to the device over Modbus TCP. `host` or `host:port`; port 502
    /// is assumed when absent. The host `0.0.0.0` selects an offline dummy.
    #[arg(long)]
    tcp: Option<String>,
    /// Connect to the device over serial Modbus RTU.
    ///
    /// Specify the path to the serial device.
    #[arg(long)]
    rtu: Option<PathBuf>,
}

impl Args {
    pub fn offline(&self) -> bool {
        match &self.how.tcp {
            Some(host) => {
                host == OFFLINE_SENTINEL || host.starts_with(&format!("{OFFLINE_SENTINEL}:"))
            }
            None => false,
        }
    }
}

pub struct Connection {
    request_queue: tokio::sync::mpsc::UnboundedSender<Request>,
    pub worker: tokio::task::JoinHandle<Result<(), Error>>,
    response_tracker: Arc<ResponseTracker>,
    transaction_id_generator: AtomicU16,
    device_id: u8,
}

impl Connection {
    /// Establish the link described by `args`.
    ///
    /// The link is fully set up (or refused) here; the worker task spawned to
    /// pump it never observes a half-connected state.
    pub async fn new(args: Args) -> Result<Connection, Error> {
        let (request_queue, jobs) = tokio::sync::mpsc::unbounded_channel();
        let response_tracker = Arc::new(ResponseTracker::default());
        let tracker = Arc::clone(&response_tracker);
        let worker = if args.offline() {
            info!("offline sentinel address given, not connecting anywhere");
            tokio::task::spawn(offline_worker(jobs, tracker))
        } else if let Some(address) = args.how.tcp.clone() {
            let address = match address.find(':') {
                Some(_) => address,
                None => format!("{address}:{DEFAULT_TCP_PORT}"),
            };
            let io = tcp_connect(&address).await?;
            let worker = Worker { args: args.clone(), responses: tracker, stamp_rtu_ids: false };
            tokio::task::spawn(worker.serve(Framed::new(io, ModbusTcpCodec {}), jobs))
        } else if let Some(path) = args.how.rtu.clone() {
            let device = tokio::fs::File::options()
                .read(true)
                .write(true)
                .create(false)
                .open(&path)
                .await
                .map_err(|e| Error::OpenDevice(e, path))?;
            let worker = Worker { args: args.clone(), responses: tracker, stamp_rtu_ids: true };
            tokio::task::spawn(worker.serve(Framed::new(device, ModbusRtuCodec {}), jobs))
        } else {
            unreachable!("clap requires one of `--tcp` and `--rtu`");
        };
        Ok(Self {
            request_queue,
            worker,
            response_tracker,
            transaction_id_generator: AtomicU16::new(0),
            device_id: args.device_id,
        })
    }

    fn new_transaction_id(&self) -> u16 {
        self.transaction_id_generator.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Send one request and wait for its response. No retries: a timeout or
    /// an exception response is the caller's problem to surface.
    pub async fn send(&self, operation: Operation) -> Result<Response, Error> {
        let transaction_id = self.new_transaction_id();
        let request = Request { device_id: self.device_id, transaction_id, operation };
        self.request_queue.send(request).map_err(Error::ScheduleRequest)?;
        let response = self.response_tracker.wait_for(transaction_id).await;
        let response = response.ok_or(Error::Timeout)?;
        match response.exception_code() {
            Some(code) => Err(Error::Exception(code)),
            None => Ok(response),
        }
    }
}

impl Transport for Connection {
    async fn read_inputs(&self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let response = self.send(Operation::GetInputs { address, count }).await?;
        response.registers().ok_or(Error::UnexpectedResponse)
    }

    async fn read_holdings(&self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let response = self.send(Operation::GetHoldings { address, count }).await?;
        response.registers().ok_or(Error::UnexpectedResponse)
    }

    async fn write_holding(&self, address: u16, value: u16) -> Result<(), Error> {
        let response = self.send(Operation::SetHolding { address, value }).await?;
        match response.kind {
            modbus::ResponseKind::SetHolding { .. } => Ok(()),
            _ => Err(Error::UnexpectedResponse),
        }
    }
}

async fn tcp_connect(address: &str) -> Result<TcpStream, Error> {
    info!(message = "connecting...", address);
    let addresses = tokio::net::lookup_host(address)
        .await
        .map_err(|e| Error::LookupHost(e, address.to_string()))?
        .collect::<Vec<_>>();
    debug!(message = "resolved", ?addresses);
    let socket = TcpStream::connect(&*addresses)
        .await
        .map_err(|e| Error::Connect(e, address.to_string()))?;
    let nodelay_result = socket.set_nodelay(true);
    trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
    info!(message = "connected");
    Ok(socket)
}

struct Worker {
    args: Args,
    responses: Arc<ResponseTracker>,
    /// RTU frames carry no transaction id; stamp the id of the request that
    /// is in flight onto whatever comes back.
    stamp_rtu_ids: bool,
}

impl Worker {
    /// Pump requests through the link one at a time.
    ///
    /// The panel and the drive both handle a single outstanding request, so
    /// there is no pipelining here: send, then wait for the response or the
    /// read timeout, then move on to the next queued request.
    async fn serve<S>(
        self,
        mut io: Framed<S, impl Codec>,
        mut jobs: UnboundedReceiver<Request>,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(req) = jobs.recv().await {
            let sent = tokio::time::timeout(*self.args.send_timeout, io.send(&req)).await;
            match sent {
                Err(_elapsed) => {
                    warn!(transaction = req.transaction_id, "sending a request timed out");
                    self.responses.mark_timeout(req.transaction_id);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.responses.mark_timeout(req.transaction_id);
                    return Err(Error::Send(e));
                }
                Ok(Ok(())) => {}
            }
            self.wait_for_response(&mut io, &req).await?;
        }
        io.close().await.map_err(Error::Shutdown)?;
        Ok(())
    }

    async fn wait_for_response<S>(
        &self,
        io: &mut Framed<S, impl Codec>,
        req: &Request,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = tokio::time::Instant::now() + *self.args.read_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, io.next()).await;
            match frame {
                Err(_elapsed) => {
                    debug!(transaction = req.transaction_id, "request timed out");
                    self.responses.mark_timeout(req.transaction_id);
                    return Ok(());
                }
                Ok(None) => {
                    self.responses.mark_timeout(req.transaction_id);
                    return Err(Error::Receive(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "link closed while waiting for a response",
                    )));
                }
                Ok(Some(Err(e))) => {
                    self.responses.mark_timeout(req.transaction_id);
                    return Err(Error::Receive(e));
                }
                Ok(Some(Ok(mut response))) => {
                    if self.stamp_rtu_ids {
                        response.transaction_id = req.transaction_id;
                    }
                    if response.transaction_id != req.transaction_id {
                        debug!(
                            message = "a response we were not expecting",
                            transaction = response.transaction_id,
                        );
                        continue;
                    }
                    trace!(message = "decoded a response", transaction = response.transaction_id);
                    self.responses.add_response(response);
                    return Ok(());
                }
            }
        }
    }
}

/// Serves the [`OFFLINE_SENTINEL`] connection: every read yields zeroes and
/// every write is acknowledged, with nothing behind it.
async fn offline_worker(
    mut jobs: UnboundedReceiver<Request>,
    responses: Arc<ResponseTracker>,
) -> Result<(), Error> {
    while let Some(req) = jobs.recv().await {
        let kind = match req.operation {
            Operation::GetInputs { count, .. } | Operation::GetHoldings { count, .. } => {
                modbus::ResponseKind::GetRegisters { values: vec![0; usize::from(count) * 2] }
            }
            Operation::SetHolding { address, value } => {
                modbus::ResponseKind::SetHolding { address, value }
            }
        };
        responses.add_response(Response {
            device_id: req.device_id,
            transaction_id: req.transaction_id,
            kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracker_returns_responses_added_before_waiting() {
        let tracker = ResponseTracker::default();
        tracker.add_response(Response {
            device_id: 1,
            transaction_id: 3,
            kind: modbus::ResponseKind::SetHolding { address: 1, value: 2 },
        });
        assert!(tracker.wait_for(3).await.is_some());
    }

    #[tokio::test]
    async fn tracker_reports_timeouts() {
        let tracker = Arc::new(ResponseTracker::default());
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::task::spawn(async move { tracker.wait_for(9).await })
        };
        tracker.mark_timeout(9);
        assert!(waiter.await.unwrap().is_none());
    }
}
