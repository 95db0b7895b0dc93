//! NFSv4.1 end-to-end: client/session establishment, namespace navigation,
//! and the slot replay cache.

mod support;

use std::io::Cursor;

use nfs_tundra::xdr::nfs4::{
    self, channel_attrs4, nfs_opnum4, nfsstat4, sessionid4, NFS4_SESSIONID_SIZE,
};
use nfs_tundra::xdr::{deserialize, Serialize};
use support::{call_record, connect, parse_reply, roundtrip, start_adapter, unix_cred};

fn compound_args(minor: u32, ops: &[u8], op_count: u32) -> Vec<u8> {
    let mut body = Vec::new();
    nfs4::utf8string::from("t").serialize(&mut body).unwrap();
    minor.serialize(&mut body).unwrap();
    op_count.serialize(&mut body).unwrap();
    body.extend_from_slice(ops);
    body
}

fn sequence_op(session: sessionid4, slot: u32, seq: u32) -> Vec<u8> {
    let mut op = Vec::new();
    (nfs_opnum4::OP_SEQUENCE as u32).serialize(&mut op).unwrap();
    nfs4::SEQUENCE4args {
        sa_sessionid: session,
        sa_sequenceid: seq,
        sa_slotid: slot,
        sa_highest_slotid: 0,
        sa_cachethis: true,
    }
    .serialize(&mut op)
    .unwrap();
    op
}

/// Parses the compound header and returns (status, rest-offset).
fn compound_status(results: &[u8]) -> (nfsstat4, usize) {
    let mut cursor = Cursor::new(results);
    let status = deserialize::<nfsstat4>(&mut cursor).unwrap();
    let _tag = deserialize::<nfs4::utf8string>(&mut cursor).unwrap();
    let _count = deserialize::<u32>(&mut cursor).unwrap();
    (status, cursor.position() as usize)
}

async fn establish_session(
    stream: &mut tokio::net::TcpStream,
) -> (u64, sessionid4) {
    // EXCHANGE_ID.
    let mut ops = Vec::new();
    (nfs_opnum4::OP_EXCHANGE_ID as u32).serialize(&mut ops).unwrap();
    nfs4::client_owner4 { co_verifier: [9; 8], co_ownerid: b"tundra-test-client".to_vec() }
        .serialize(&mut ops)
        .unwrap();
    0u32.serialize(&mut ops).unwrap(); // eia_flags
    0u32.serialize(&mut ops).unwrap(); // SP4_NONE
    0u32.serialize(&mut ops).unwrap(); // no client impl id

    let record =
        call_record(100, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 1));
    let reply = roundtrip(stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, rest) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);

    let mut cursor = Cursor::new(&reply[offset + rest..]);
    let opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(opnum, nfs_opnum4::OP_EXCHANGE_ID as u32);
    let op_status = deserialize::<nfsstat4>(&mut cursor).unwrap();
    assert_eq!(op_status, nfsstat4::NFS4_OK);
    let client_id = deserialize::<u64>(&mut cursor).unwrap();
    let cs_sequence = deserialize::<u32>(&mut cursor).unwrap();

    // CREATE_SESSION.
    let mut ops = Vec::new();
    (nfs_opnum4::OP_CREATE_SESSION as u32).serialize(&mut ops).unwrap();
    client_id.serialize(&mut ops).unwrap();
    cs_sequence.serialize(&mut ops).unwrap();
    0u32.serialize(&mut ops).unwrap(); // flags
    channel_attrs4 { ca_maxrequests: 32, ..Default::default() }.serialize(&mut ops).unwrap();
    channel_attrs4 { ca_maxrequests: 4, ..Default::default() }.serialize(&mut ops).unwrap();
    0x4000_0001u32.serialize(&mut ops).unwrap(); // cb_program
    0u32.serialize(&mut ops).unwrap(); // no sec_parms

    let record =
        call_record(101, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 1));
    let reply = roundtrip(stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, rest) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);

    let mut cursor = Cursor::new(&reply[offset + rest..]);
    let _opnum = deserialize::<u32>(&mut cursor).unwrap();
    let op_status = deserialize::<nfsstat4>(&mut cursor).unwrap();
    assert_eq!(op_status, nfsstat4::NFS4_OK);
    let mut session = [0u8; NFS4_SESSIONID_SIZE];
    std::io::Read::read_exact(&mut cursor, &mut session).unwrap();

    (client_id, session)
}

#[tokio::test]
async fn slot_replay_returns_byte_identical_reply() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let (_client, session) = establish_session(&mut stream).await;

    // SEQUENCE(slot 0, seq 1) + PUTROOTFH + GETFH.
    let mut ops = sequence_op(session, 0, 1);
    (nfs_opnum4::OP_PUTROOTFH as u32).serialize(&mut ops).unwrap();
    (nfs_opnum4::OP_GETFH as u32).serialize(&mut ops).unwrap();
    let record =
        call_record(200, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 3));

    let first = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&first);
    let (status, _) = compound_status(&first[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);

    // Byte-identical retransmission: byte-identical reply.
    let second = roundtrip(&mut stream, &record).await;
    assert_eq!(first, second);

    // The successor sequence executes fresh.
    let mut ops = sequence_op(session, 0, 2);
    (nfs_opnum4::OP_PUTROOTFH as u32).serialize(&mut ops).unwrap();
    let record =
        call_record(201, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 2));
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, _) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);
}

#[tokio::test]
async fn misordered_sequence_is_rejected() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let (_client, session) = establish_session(&mut stream).await;

    // Slot 0 expects sequence 1; 5 is far ahead.
    let ops = sequence_op(session, 0, 5);
    let record =
        call_record(300, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 1));
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, _) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4ERR_SEQ_MISORDERED);
}

#[tokio::test]
async fn pseudo_namespace_navigates_to_export_root() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let (_client, session) = establish_session(&mut stream).await;

    // SEQUENCE + PUTROOTFH + LOOKUP("export1") + GETFH.
    let mut ops = sequence_op(session, 0, 1);
    (nfs_opnum4::OP_PUTROOTFH as u32).serialize(&mut ops).unwrap();
    (nfs_opnum4::OP_LOOKUP as u32).serialize(&mut ops).unwrap();
    nfs4::utf8string::from(support::EXPORT).serialize(&mut ops).unwrap();
    (nfs_opnum4::OP_GETFH as u32).serialize(&mut ops).unwrap();
    let record =
        call_record(400, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 4));
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, rest) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);

    // Walk the four results; the final GETFH carries the share root.
    let mut cursor = Cursor::new(&reply[offset + rest..]);
    for _ in 0..2 {
        let _opnum = deserialize::<u32>(&mut cursor).unwrap();
        let op_status = deserialize::<nfsstat4>(&mut cursor).unwrap();
        assert_eq!(op_status, nfsstat4::NFS4_OK);
        // SEQUENCE resok / PUTROOTFH are fixed-size or empty.
        if _opnum == nfs_opnum4::OP_SEQUENCE as u32 {
            let mut skip = [0u8; NFS4_SESSIONID_SIZE + 5 * 4];
            std::io::Read::read_exact(&mut cursor, &mut skip).unwrap();
        }
    }
    let opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(opnum, nfs_opnum4::OP_LOOKUP as u32);
    assert_eq!(deserialize::<nfsstat4>(&mut cursor).unwrap(), nfsstat4::NFS4_OK);

    let opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(opnum, nfs_opnum4::OP_GETFH as u32);
    assert_eq!(deserialize::<nfsstat4>(&mut cursor).unwrap(), nfsstat4::NFS4_OK);
    let fh = deserialize::<nfs4::nfs_fh4>(&mut cursor).unwrap();
    assert_eq!(fh.data, b"export1:/".to_vec());
}

#[tokio::test]
async fn getattr_on_pseudo_root_reports_directory_on_pseudo_fsid() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let (_client, session) = establish_session(&mut stream).await;

    let mut ops = sequence_op(session, 0, 1);
    (nfs_opnum4::OP_PUTROOTFH as u32).serialize(&mut ops).unwrap();
    (nfs_opnum4::OP_GETATTR as u32).serialize(&mut ops).unwrap();
    let mut bitmap = nfs4::bitmap4::new();
    nfs4::bitmap_set(&mut bitmap, nfs4::FATTR4_TYPE);
    nfs4::bitmap_set(&mut bitmap, nfs4::FATTR4_FSID);
    bitmap.serialize(&mut ops).unwrap();

    let record =
        call_record(500, nfs4::PROGRAM, 4, 1, unix_cred(1000, 1000), &compound_args(1, &ops, 3));
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let (status, rest) = compound_status(&reply[offset..]);
    assert_eq!(status, nfsstat4::NFS4_OK);

    let mut cursor = Cursor::new(&reply[offset + rest..]);
    // SEQUENCE result.
    let _opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(deserialize::<nfsstat4>(&mut cursor).unwrap(), nfsstat4::NFS4_OK);
    let mut skip = [0u8; NFS4_SESSIONID_SIZE + 5 * 4];
    std::io::Read::read_exact(&mut cursor, &mut skip).unwrap();
    // PUTROOTFH result.
    let _opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(deserialize::<nfsstat4>(&mut cursor).unwrap(), nfsstat4::NFS4_OK);
    // GETATTR result.
    let opnum = deserialize::<u32>(&mut cursor).unwrap();
    assert_eq!(opnum, nfs_opnum4::OP_GETATTR as u32);
    assert_eq!(deserialize::<nfsstat4>(&mut cursor).unwrap(), nfsstat4::NFS4_OK);
    let attrs = deserialize::<nfs4::fattr4>(&mut cursor).unwrap();
    assert!(nfs4::bitmap_get(&attrs.attrmask, nfs4::FATTR4_TYPE));
    assert!(nfs4::bitmap_get(&attrs.attrmask, nfs4::FATTR4_FSID));

    let mut vals = Cursor::new(attrs.attr_vals.as_slice());
    let ftype = deserialize::<nfs4::nfs_ftype4>(&mut vals).unwrap();
    assert_eq!(ftype, nfs4::nfs_ftype4::NF4DIR);
    let fsid = deserialize::<nfs4::fsid4>(&mut vals).unwrap();
    assert_eq!((fsid.major, fsid.minor), (0, 1));
}

#[tokio::test]
async fn v4_null_procedure_answers_success() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let record = call_record(1, nfs4::PROGRAM, 4, 0, unix_cred(1000, 1000), &[]);
    let reply = roundtrip(&mut stream, &record).await;
    let (msg, _) = parse_reply(&reply);
    assert_eq!(msg.xid, 1);
}
