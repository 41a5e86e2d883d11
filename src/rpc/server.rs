use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use capnp::message::{Builder, HeapAllocator, ReaderOptions};

use super::{RpcError, RpcObject};
use crate::rpc_capnp::{rpc_call, rpc_response};

/// How long the accept loop waits between polls of a non-blocking listener
/// while checking for shutdown. Small relative to any RPC deadline so
/// `stop()` is observed promptly.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A unary RPC server multiplexing several [`RpcObject`] handlers over one
/// TCP listener by opcode (C4). Each accepted connection is served on its
/// own thread ("a pool of worker executors that handle inbound RPCs
/// concurrently" — the pool just grows one thread per live connection,
/// rather than a fixed size, since unary calls are short-lived).
pub struct RpcServer {
    services: Arc<HashMap<i16, Box<dyn RpcObject>>>,
    listener: Option<TcpListener>,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    pub fn new_with_services(services: Vec<(i16, Box<dyn RpcObject>)>) -> RpcServer {
        RpcServer {
            services: Arc::new(services.into_iter().collect()),
            listener: None,
            stop: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
        }
    }

    /// Binds the listening socket. Must be called before [`RpcServer::repl`].
    pub fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.listener = Some(TcpListener::bind(addr)?);
        Ok(())
    }

    /// Returns the bound local address, e.g. to read back an OS-assigned
    /// ephemeral port in tests.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener
            .as_ref()
            .expect("bind must be called before local_addr")
            .local_addr()
    }

    /// Spawns the accept loop on a background thread and returns
    /// immediately; does not block for the server's lifetime.
    pub fn repl(&mut self) -> io::Result<()> {
        let listener = self
            .listener
            .as_ref()
            .expect("bind must be called before repl")
            .try_clone()?;
        listener.set_nonblocking(true)?;
        let services = self.services.clone();
        let stop = self.stop.clone();
        self.accept_thread = Some(thread::spawn(move || {
            Self::accept_loop(listener, services, stop)
        }));
        Ok(())
    }

    /// Signals the accept loop to stop after its next poll. Does not
    /// forcibly close in-flight connections; callers must tolerate a reply
    /// arriving after this returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn accept_loop(
        listener: TcpListener,
        services: Arc<HashMap<i16, Box<dyn RpcObject>>>,
        stop: Arc<AtomicBool>,
    ) {
        while !stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _peer)) => {
                    let services = services.clone();
                    thread::spawn(move || {
                        if let Err(e) = Self::serve_one(stream, &services) {
                            log::debug!("rpc connection ended with error: {e}");
                        }
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => log::warn!("rpc accept error: {e}"),
            }
        }
    }

    fn serve_one(
        mut stream: TcpStream,
        services: &HashMap<i16, Box<dyn RpcObject>>,
    ) -> Result<(), RpcError> {
        let message = capnp::serialize::read_message(&mut stream, ReaderOptions::new())?;
        let call = message.get_root::<rpc_call::Reader>()?;
        let opcode = call.get_opcode();
        let params = call.get_params();

        let handler = services
            .get(&opcode)
            .ok_or(RpcError::UnknownOpcode(opcode))?;

        let mut response_message: Builder<HeapAllocator> = Builder::new_default();
        {
            let response = response_message.init_root::<rpc_response::Builder>();
            handler.handle_rpc(params, response.get_result())?;
        }
        capnp::serialize::write_message(&mut stream, &response_message)?;
        use std::io::Write;
        stream.flush()?;
        Ok(())
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}
