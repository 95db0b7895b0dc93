//! Record-marked framing (RFC 5531 record marking standard) and call-header
//! parsing.
//!
//! Every message on TCP is preceded by a 4-byte marker: bit 31 is the
//! last-fragment flag, bits 0..31 the fragment length. Fragments above 1 MiB
//! are rejected before allocation; multi-fragment records are concatenated
//! under the same cap for the whole record. Replies always leave as a single
//! last-fragment record.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::pool::{BufferPool, PooledBuf};
use crate::protocol::xdr::rpc::{opaque_auth, MSG_TYPE_CALL};
use crate::protocol::xdr::{deserialize, invalid_data};

/// Upper bound for one fragment and for a whole reassembled record.
pub const MAX_FRAGMENT_LENGTH: usize = 1024 * 1024;

const LAST_FRAGMENT: u32 = 1 << 31;

/// Reads the 4-byte record marker. Split from the body read so the caller
/// can apply an idle deadline here and a per-request deadline to the rest.
pub async fn read_marker<R: AsyncRead + Unpin>(src: &mut R) -> std::io::Result<u32> {
    let mut marker = [0u8; 4];
    src.read_exact(&mut marker).await?;
    Ok(u32::from_be_bytes(marker))
}

/// Reads one complete record, reassembling fragments.
pub async fn read_record<R: AsyncRead + Unpin>(
    src: &mut R,
    pool: &Arc<BufferPool>,
) -> std::io::Result<PooledBuf> {
    let header = read_marker(src).await?;
    read_record_body(src, pool, header).await
}

/// Reads the remainder of a record whose first marker has been consumed.
pub async fn read_record_body<R: AsyncRead + Unpin>(
    src: &mut R,
    pool: &Arc<BufferPool>,
    header: u32,
) -> std::io::Result<PooledBuf> {
    let mut marker = [0u8; 4];
    let mut is_last = header & LAST_FRAGMENT != 0;
    let len = (header & !LAST_FRAGMENT) as usize;
    if len > MAX_FRAGMENT_LENGTH {
        return Err(invalid_data(format!("fragment length {len} exceeds cap")));
    }

    let mut record = pool.acquire(len);
    src.read_exact(record.as_mut_slice()).await?;
    trace!(len, is_last, "read fragment");

    while !is_last {
        src.read_exact(&mut marker).await?;
        let header = u32::from_be_bytes(marker);
        is_last = header & LAST_FRAGMENT != 0;
        let len = (header & !LAST_FRAGMENT) as usize;
        if record.len().saturating_add(len) > MAX_FRAGMENT_LENGTH {
            return Err(invalid_data("record length exceeds cap"));
        }
        let start = record.len();
        let vec = record.as_mut_vec();
        vec.resize(start + len, 0);
        src.read_exact(&mut vec[start..]).await?;
        trace!(len, is_last, "read continuation fragment");
    }
    Ok(record)
}

/// Writes `payload` as one last-fragment record.
pub async fn write_record<W: AsyncWrite + Unpin>(
    dest: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    debug_assert!(payload.len() < LAST_FRAGMENT as usize);
    let marker = LAST_FRAGMENT | payload.len() as u32;
    dest.write_all(&marker.to_be_bytes()).await?;
    dest.write_all(payload).await?;
    dest.flush().await
}

/// A decoded call header plus the byte offsets dispatch and GSS need.
#[derive(Clone, Debug)]
pub struct RpcCall {
    pub xid: u32,
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: opaque_auth,
    pub verf: opaque_auth,
    /// End of the credential — the span `[0, header_end)` is what an
    /// RPCSEC_GSS data verifier signs.
    pub header_end: usize,
    /// Start of the procedure arguments.
    pub args_offset: usize,
}

impl RpcCall {
    /// The argument bytes within `record`.
    pub fn args<'r>(&self, record: &'r [u8]) -> &'r [u8] {
        &record[self.args_offset.min(record.len())..]
    }

    /// The header span an RPCSEC_GSS data verifier covers.
    pub fn gss_header<'r>(&self, record: &'r [u8]) -> &'r [u8] {
        &record[..self.header_end.min(record.len())]
    }
}

/// Parses a call header out of a complete record.
///
/// The record must carry msg_type CALL; REPLY records are routed to the
/// back-channel before this runs.
pub fn parse_call(record: &[u8]) -> std::io::Result<RpcCall> {
    let mut cursor = Cursor::new(record);
    let xid = deserialize::<u32>(&mut cursor)?;
    let mtype = deserialize::<u32>(&mut cursor)?;
    if mtype != MSG_TYPE_CALL {
        return Err(invalid_data(format!("expected CALL, got msg_type {mtype}")));
    }
    let rpcvers = deserialize::<u32>(&mut cursor)?;
    let prog = deserialize::<u32>(&mut cursor)?;
    let vers = deserialize::<u32>(&mut cursor)?;
    let proc = deserialize::<u32>(&mut cursor)?;
    let cred = deserialize::<opaque_auth>(&mut cursor)?;
    let header_end = cursor.position() as usize;
    let verf = deserialize::<opaque_auth>(&mut cursor)?;
    let args_offset = cursor.position() as usize;
    Ok(RpcCall { xid, rpcvers, prog, vers, proc, cred, verf, header_end, args_offset })
}

/// True when the record is an RPC REPLY (back-channel traffic).
pub fn is_reply(record: &[u8]) -> bool {
    record.len() >= 8 && record[4..8] == 1u32.to_be_bytes()
}

/// XID of a record, for routing replies.
pub fn record_xid(record: &[u8]) -> Option<u32> {
    record.get(..4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::rpc::{auth_flavor, call_body, rpc_body, rpc_msg};
    use crate::protocol::xdr::Serialize;

    fn call_record(xid: u32) -> Vec<u8> {
        let msg = rpc_msg {
            xid,
            body: rpc_body::CALL(call_body {
                rpcvers: 2,
                prog: 100003,
                vers: 3,
                proc: 6,
                cred: opaque_auth::new(auth_flavor::AUTH_UNIX, vec![0; 8]),
                verf: opaque_auth::default(),
            }),
        };
        let mut buf = Vec::new();
        msg.serialize(&mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn single_fragment_round_trip() {
        let payload = call_record(7);
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_record(&mut client, &payload).await.unwrap();

        let pool = BufferPool::new();
        let record = read_record(&mut server, &pool).await.unwrap();
        assert_eq!(record.as_slice(), payload.as_slice());
    }

    #[tokio::test]
    async fn oversized_fragment_is_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let marker = LAST_FRAGMENT | (MAX_FRAGMENT_LENGTH as u32 + 1);
        client.write_all(&marker.to_be_bytes()).await.unwrap();

        let pool = BufferPool::new();
        let err = read_record(&mut server, &pool).await.expect_err("expected cap error");
        assert!(err.to_string().contains("exceeds cap"));
    }

    #[tokio::test]
    async fn multi_fragment_records_are_concatenated() {
        let payload = call_record(3);
        let split_at = 10usize;
        let (mut client, mut server) = tokio::io::duplex(4096);

        let first = &payload[..split_at];
        let second = &payload[split_at..];
        client.write_all(&(first.len() as u32).to_be_bytes()).await.unwrap();
        client.write_all(first).await.unwrap();
        client
            .write_all(&(LAST_FRAGMENT | second.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client.write_all(second).await.unwrap();

        let pool = BufferPool::new();
        let record = read_record(&mut server, &pool).await.unwrap();
        assert_eq!(record.as_slice(), payload.as_slice());
    }

    #[test]
    fn parse_call_exposes_offsets() {
        let record = call_record(0x1234);
        let call = parse_call(&record).unwrap();
        assert_eq!(call.xid, 0x1234);
        assert_eq!(call.prog, 100003);
        assert_eq!(call.vers, 3);
        assert_eq!(call.proc, 6);
        assert_eq!(call.cred.flavor, auth_flavor::AUTH_UNIX);
        // header: xid + mtype + rpcvers + prog + vers + proc = 24 bytes,
        // then credential (flavor + len + 8 bytes body).
        assert_eq!(call.header_end, 24 + 4 + 4 + 8);
        // verifier AUTH_NULL: flavor + zero length.
        assert_eq!(call.args_offset, call.header_end + 8);
        assert!(call.args(&record).is_empty());
    }

    #[test]
    fn reply_records_are_recognized() {
        let mut record = call_record(1);
        assert!(!is_reply(&record));
        record[4..8].copy_from_slice(&1u32.to_be_bytes());
        assert!(is_reply(&record));
        assert_eq!(record_xid(&record), Some(1));
    }
}
