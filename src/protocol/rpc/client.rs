//! Minimal outbound ONC-RPC client.
//!
//! Used for server-initiated traffic that travels over fresh connections:
//! NLM_GRANTED callbacks to a client's lock manager and NSM SM_NOTIFY after
//! restart. One call per connection; the deadline covers connect, write and
//! reply.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::pool::BufferPool;
use crate::protocol::rpc::wire::{read_record, write_record};
use crate::protocol::xdr::rpc::{
    accept_body, accepted_reply, call_body, opaque_auth, reply_body, rpc_body, rpc_msg,
};
use crate::protocol::xdr::{deserialize, invalid_data, serialize_to_vec};

static NEXT_XID: AtomicU32 = AtomicU32::new(0x6e66_7331);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("rpc client i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("rpc call not accepted")]
    Rejected,
    #[error("rpc call timed out")]
    Timeout,
}

/// One AUTH_NULL call round trip to `addr`. Returns the result bytes that
/// follow the accepted-reply header.
pub async fn call_once(
    addr: &str,
    prog: u32,
    vers: u32,
    proc: u32,
    args: &[u8],
    deadline: Duration,
) -> Result<Vec<u8>, ClientError> {
    tokio::time::timeout(deadline, call_inner(addr, prog, vers, proc, args))
        .await
        .map_err(|_| ClientError::Timeout)?
}

async fn call_inner(
    addr: &str,
    prog: u32,
    vers: u32,
    proc: u32,
    args: &[u8],
) -> Result<Vec<u8>, ClientError> {
    let xid = NEXT_XID.fetch_add(1, Ordering::Relaxed);
    let msg = rpc_msg {
        xid,
        body: rpc_body::CALL(call_body {
            rpcvers: 2,
            prog,
            vers,
            proc,
            cred: opaque_auth::default(),
            verf: opaque_auth::default(),
        }),
    };
    let mut record = serialize_to_vec(&msg)?;
    record.extend_from_slice(args);

    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    write_record(&mut stream, &record).await?;

    let pool = BufferPool::new();
    loop {
        let reply = read_record(&mut stream, &pool).await?;
        let mut cursor = Cursor::new(reply.as_slice());
        let msg = deserialize::<rpc_msg>(&mut cursor)?;
        if msg.xid != xid {
            // Stale traffic on a fresh connection; keep waiting.
            continue;
        }
        return match msg.body {
            rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply {
                reply_data: accept_body::SUCCESS,
                ..
            })) => {
                let offset = cursor.position() as usize;
                Ok(reply.as_slice()[offset..].to_vec())
            }
            rpc_body::REPLY(_) => Err(ClientError::Rejected),
            rpc_body::CALL(_) => {
                Err(ClientError::Io(invalid_data("CALL received where REPLY expected")))
            }
        };
    }
}
