//! NLM v4 over the wire: conflict detection, blocking queue admission, and
//! idempotent unlock.

mod support;

use std::io::Cursor;

use nfs_tundra::xdr::nlm::{
    self, caller_name, netobj, nlm4_lock, nlm4_lockargs, nlm4_res, nlm4_stats, nlm4_testargs,
    nlm4_unlockargs, NlmProgram,
};
use nfs_tundra::xdr::{deserialize, serialize_to_vec};
use support::{call_record, connect, parse_reply, roundtrip, start_adapter, unix_cred};

fn lock_of(host: &str, svid: u32, offset: u64, len: u64) -> nlm4_lock {
    nlm4_lock {
        caller_name: caller_name(host.as_bytes().to_vec()),
        fh: netobj(b"export1:/hello.txt".to_vec()),
        oh: netobj(vec![svid as u8]),
        svid,
        l_offset: offset,
        l_len: len,
    }
}

fn lock_args(host: &str, svid: u32, exclusive: bool, block: bool) -> Vec<u8> {
    serialize_to_vec(&nlm4_lockargs {
        cookie: netobj(vec![0xc0]),
        block,
        exclusive,
        alock: lock_of(host, svid, 0, 0),
        reclaim: false,
        state: 1,
    })
    .unwrap()
}

async fn nlm_call(
    stream: &mut tokio::net::TcpStream,
    xid: u32,
    proc: NlmProgram,
    args: &[u8],
) -> Vec<u8> {
    let record = call_record(xid, nlm::PROGRAM, nlm::VERSION, proc as u32, unix_cred(1, 1), args);
    let reply = roundtrip(stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    reply[offset..].to_vec()
}

#[tokio::test]
async fn exclusive_lock_excludes_other_owners_until_unlock() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;

    // Host A takes the whole file exclusively.
    let results =
        nlm_call(&mut stream, 1, NlmProgram::NLMPROC4_LOCK, &lock_args("hostA", 1, true, false))
            .await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);

    // Host B is denied.
    let results =
        nlm_call(&mut stream, 2, NlmProgram::NLMPROC4_LOCK, &lock_args("hostB", 2, true, false))
            .await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_DENIED);

    // TEST from host B reports the conflicting holder.
    let test_args = serialize_to_vec(&nlm4_testargs {
        cookie: netobj(vec![0xc1]),
        exclusive: true,
        alock: lock_of("hostB", 2, 0, 0),
    })
    .unwrap();
    let results = nlm_call(&mut stream, 3, NlmProgram::NLMPROC4_TEST, &test_args).await;
    let mut cursor = Cursor::new(&results);
    let _cookie = deserialize::<Vec<u8>>(&mut cursor).unwrap();
    let stat = deserialize::<nlm4_stats>(&mut cursor).unwrap();
    assert_eq!(stat, nlm4_stats::NLM4_DENIED);

    // Host A unlocks; host B may now acquire.
    let unlock_args = serialize_to_vec(&nlm4_unlockargs {
        cookie: netobj(vec![0xc2]),
        alock: lock_of("hostA", 1, 0, 0),
    })
    .unwrap();
    let results = nlm_call(&mut stream, 4, NlmProgram::NLMPROC4_UNLOCK, &unlock_args).await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);

    let results =
        nlm_call(&mut stream, 5, NlmProgram::NLMPROC4_LOCK, &lock_args("hostB", 2, true, false))
            .await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);
}

#[tokio::test]
async fn blocking_lock_answers_blocked_and_cancel_removes_the_waiter() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;

    let results =
        nlm_call(&mut stream, 1, NlmProgram::NLMPROC4_LOCK, &lock_args("hostA", 1, true, false))
            .await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);

    // Host B asks to wait.
    let results =
        nlm_call(&mut stream, 2, NlmProgram::NLMPROC4_LOCK, &lock_args("hostB", 2, true, true))
            .await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_BLOCKED);

    // CANCEL matches the outstanding blocked request.
    let cancel_args = serialize_to_vec(&nlm::nlm4_cancargs {
        cookie: netobj(vec![0xc3]),
        block: true,
        exclusive: true,
        alock: lock_of("hostB", 2, 0, 0),
    })
    .unwrap();
    let results = nlm_call(&mut stream, 3, NlmProgram::NLMPROC4_CANCEL, &cancel_args).await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);
}

#[tokio::test]
async fn unlock_of_absent_range_still_succeeds() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;

    let unlock_args = serialize_to_vec(&nlm4_unlockargs {
        cookie: netobj(vec![0xc4]),
        alock: lock_of("hostZ", 9, 100, 10),
    })
    .unwrap();
    let results = nlm_call(&mut stream, 1, NlmProgram::NLMPROC4_UNLOCK, &unlock_args).await;
    let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
    assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED);
}

#[tokio::test]
async fn shared_locks_from_different_owners_coexist() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;

    for (xid, host, svid) in [(1u32, "hostA", 1u32), (2, "hostB", 2)] {
        let results =
            nlm_call(&mut stream, xid, NlmProgram::NLMPROC4_LOCK, &lock_args(host, svid, false, false))
                .await;
        let res = deserialize::<nlm4_res>(&mut Cursor::new(&results)).unwrap();
        assert_eq!(res.stat, nlm4_stats::NLM4_GRANTED, "shared lock for {host}");
    }
}
