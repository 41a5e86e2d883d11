use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use capnp::any_pointer;
use capnp::message::{Builder, HeapAllocator, Reader, ReaderOptions};
use capnp::serialize::OwnedSegments;

use super::RpcError;
use crate::rpc_capnp::{rpc_call, rpc_response};

/// A single outbound unary RPC. Construct with the verb's opcode, fill in
/// the params via [`Rpc::get_param_builder`], then [`Rpc::send`].
///
/// # Panics
/// Never panics on malformed peer input; errors are returned as
/// [`RpcError`]. Panics only if capnp's root message, which this type just
/// initialized itself, somehow fails to re-read (a capnp invariant, not a
/// peer-controlled condition).
pub struct Rpc {
    message: Builder<HeapAllocator>,
}

impl Rpc {
    pub fn new(opcode: i16) -> Rpc {
        let mut message = Builder::new_default();
        {
            let mut call = message.init_root::<rpc_call::Builder>();
            call.set_opcode(opcode);
        }
        Rpc { message }
    }

    /// Returns the `AnyPointer` params slot so the caller can
    /// `init_as::<SomeRequest::Builder>()` the verb-specific payload.
    pub fn get_param_builder(&mut self) -> any_pointer::Builder {
        self.message
            .get_root::<rpc_call::Builder>()
            .expect("rpc call root was just initialized")
            .get_params()
    }

    /// Sends the call to `addr`, enforcing `deadline` as the connect, read,
    /// and write timeout. A failure at any stage (connection refused,
    /// timeout, malformed reply) is an `RpcError`; per the transport's
    /// fire-and-measure semantics, this call is never retried here.
    pub fn send(
        &self,
        addr: SocketAddr,
        deadline: Duration,
    ) -> Result<Reader<OwnedSegments>, RpcError> {
        let mut stream = TcpStream::connect_timeout(&addr, deadline)?;
        stream.set_read_timeout(Some(deadline))?;
        stream.set_write_timeout(Some(deadline))?;
        capnp::serialize::write_message(&mut stream, &self.message)?;
        stream.flush()?;
        let reply = capnp::serialize::read_message(&mut stream, ReaderOptions::new())?;
        Ok(reply)
    }

    /// Narrows a received reply envelope down to its `result` `AnyPointer`,
    /// ready for the caller to `get_as::<SomeReply::Reader>()`.
    pub fn get_result_reader(msg: &Reader<OwnedSegments>) -> Result<any_pointer::Reader, RpcError> {
        let response = msg.get_root::<rpc_response::Reader>()?;
        Ok(response.get_result())
    }
}
