//! Ancillary services over the wire: the embedded portmapper, NSM
//! registration, and the RPCSEC_GSS handshake.

mod support;

use std::io::Cursor;

use nfs_tundra::xdr::nsm::{
    self, mon, mon_id, my_id, sm_name, sm_res, sm_stat_res, NsmProgram,
};
use nfs_tundra::xdr::portmap::{self, mapping, PortmapProgram, IPPROTO_TCP};
use nfs_tundra::xdr::rpc::{
    auth_flavor, opaque_auth, rpc_gss_cred, rpc_gss_init_res, rpc_gss_proc, rpc_gss_service,
    rpc_body, reply_body,
};
use nfs_tundra::xdr::{deserialize, nfs3, serialize_to_vec, Serialize};
use support::{call_record, connect, parse_reply, roundtrip, start_adapter, start_adapter_with};

#[tokio::test]
async fn portmapper_serves_getport_for_registered_programs() {
    let adapter = start_adapter().await;
    let pm_addr = adapter.portmap_addr().expect("portmapper bound");
    let mut stream = tokio::net::TcpStream::connect(pm_addr).await.unwrap();

    let query = mapping { prog: nfs3::PROGRAM, vers: 3, prot: IPPROTO_TCP, port: 0 };
    let record = call_record(
        1,
        portmap::PROGRAM,
        2,
        PortmapProgram::PMAPPROC_GETPORT as u32,
        opaque_auth::default(),
        &serialize_to_vec(&query).unwrap(),
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let port = deserialize::<u32>(&mut Cursor::new(&reply[offset..])).unwrap();
    assert_eq!(port, adapter.bound_addr().port() as u32);
}

#[tokio::test]
async fn portmapper_speaks_rpcbind_versions_two_through_four() {
    let adapter = start_adapter().await;
    let pm_addr = adapter.portmap_addr().expect("portmapper bound");
    let mut stream = tokio::net::TcpStream::connect(pm_addr).await.unwrap();

    for vers in [2u32, 3, 4] {
        let record = call_record(
            vers,
            portmap::PROGRAM,
            vers,
            PortmapProgram::PMAPPROC_NULL as u32,
            opaque_auth::default(),
            &[],
        );
        let reply = roundtrip(&mut stream, &record).await;
        let (msg, _) = parse_reply(&reply);
        assert_eq!(msg.xid, vers);
    }

    // Version 5 is outside the spoken range.
    let record = call_record(
        9,
        portmap::PROGRAM,
        5,
        PortmapProgram::PMAPPROC_NULL as u32,
        opaque_auth::default(),
        &[],
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (msg, _) = parse_reply(&reply);
    match msg.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => match accepted.reply_data {
            nfs_tundra::xdr::rpc::accept_body::PROG_MISMATCH(info) => {
                assert_eq!((info.low, info.high), (2, 4));
            }
            other => panic!("expected PROG_MISMATCH, got {other:?}"),
        },
        other => panic!("expected MSG_ACCEPTED, got {other:?}"),
    }
}

#[tokio::test]
async fn portmap_dump_lists_the_nfs_family() {
    let adapter = start_adapter().await;
    let pm_addr = adapter.portmap_addr().expect("portmapper bound");
    let mut stream = tokio::net::TcpStream::connect(pm_addr).await.unwrap();

    let record = call_record(
        2,
        portmap::PROGRAM,
        2,
        PortmapProgram::PMAPPROC_DUMP as u32,
        opaque_auth::default(),
        &[],
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let mut cursor = Cursor::new(&reply[offset..]);

    let mut programs = Vec::new();
    while deserialize::<bool>(&mut cursor).unwrap() {
        let map = deserialize::<mapping>(&mut cursor).unwrap();
        programs.push(map.prog);
    }
    for expected in [100003u32, 100005, 100021, 100024] {
        assert!(programs.contains(&expected), "missing program {expected}");
    }
}

#[tokio::test]
async fn nsm_monitor_registration_persists_and_unmonitors() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;

    let args = mon {
        mon_id: mon_id {
            mon_name: sm_name(b"client-7".to_vec()),
            my_id: my_id {
                my_name: sm_name(b"tundra-server".to_vec()),
                my_prog: 100021,
                my_vers: 4,
                my_proc: 5,
            },
        },
        priv_: [7; 16],
    };
    let record = call_record(
        1,
        nsm::PROGRAM,
        nsm::VERSION,
        NsmProgram::SM_MON as u32,
        opaque_auth::default(),
        &serialize_to_vec(&args).unwrap(),
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (_, offset) = parse_reply(&reply);
    let res = deserialize::<sm_stat_res>(&mut Cursor::new(&reply[offset..])).unwrap();
    assert_eq!(res.res_stat, sm_res::STAT_SUCC);
    // Server state counter is odd while the server is up.
    assert_eq!(res.state % 2, 1);

    let record = call_record(
        2,
        nsm::PROGRAM,
        nsm::VERSION,
        NsmProgram::SM_UNMON as u32,
        opaque_auth::default(),
        &serialize_to_vec(&args.mon_id).unwrap(),
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (msg, _) = parse_reply(&reply);
    assert_eq!(msg.xid, 2);
}

fn gss_cred(proc: rpc_gss_proc, seq: u32, handle: Vec<u8>) -> opaque_auth {
    let cred = rpc_gss_cred {
        version: 1,
        gss_proc: proc,
        seq_num: seq,
        service: rpc_gss_service::rpc_gss_svc_none,
        handle,
    };
    opaque_auth::new(auth_flavor::RPCSEC_GSS, serialize_to_vec(&cred).unwrap())
}

#[tokio::test]
async fn gss_handshake_establishes_context_and_binds_identity() {
    let adapter = start_adapter_with(|settings| {
        settings.kerberos.identity_table = vec![nfs_tundra::settings::IdentityEntry {
            principal: "alice@EXAMPLE.COM".to_string(),
            uid: 4242,
            gid: 4242,
            gids: vec![],
        }];
    })
    .await;
    let mut stream = connect(&adapter).await;

    // INIT round.
    let token = serialize_to_vec(&b"ap-req".to_vec()).unwrap();
    let record = call_record(
        1,
        nfs3::PROGRAM,
        3,
        0,
        gss_cred(rpc_gss_proc::RPCSEC_GSS_INIT, 0, Vec::new()),
        &token,
    );
    let reply = roundtrip(&mut stream, &record).await;
    let (msg, offset) = parse_reply(&reply);
    assert_eq!(msg.xid, 1);
    let res = deserialize::<rpc_gss_init_res>(&mut Cursor::new(&reply[offset..])).unwrap();
    assert_eq!(res.gss_major, 0);
    assert_eq!(res.seq_window, 128);
    assert_eq!(res.gss_token, b"ap-rep");
    let handle = res.handle.clone();

    // DATA call: LOOKUP("hello.txt") under the mapped identity. The call
    // verifier is the mechanism MIC over the header through the credential.
    let mut args = Vec::new();
    nfs3::diropargs3 {
        dir: nfs3::nfs_fh3 { data: b"export1:/".to_vec() },
        name: nfs3::filename3::from("hello.txt"),
    }
    .serialize(&mut args)
    .unwrap();

    let cred = gss_cred(rpc_gss_proc::RPCSEC_GSS_DATA, 1, handle);
    let mut record = call_record(2, nfs3::PROGRAM, 3, 3, cred.clone(), &args);
    // Header length: fixed call fields plus the serialized credential.
    let header_len = 24 + 8 + cred.body.len() + (4 - cred.body.len() % 4) % 4;
    let mut mic = b"test-session-key".to_vec();
    mic.push(header_len as u8);
    mic.push(0);
    // Replace the AUTH_NULL verifier with the GSS MIC verifier.
    let verifier_offset = header_len;
    let mut patched = record[..verifier_offset].to_vec();
    opaque_auth::new(auth_flavor::RPCSEC_GSS, mic).serialize(&mut patched).unwrap();
    patched.extend_from_slice(&args);
    record = patched;

    let reply = roundtrip(&mut stream, &record).await;
    let (msg, offset) = parse_reply(&reply);
    assert_eq!(msg.xid, 2);
    match &msg.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => {
            assert_eq!(accepted.reply_data, nfs_tundra::xdr::rpc::accept_body::SUCCESS);
            // Reply verifier is the MIC over the sequence number.
            assert_eq!(accepted.verf.flavor, auth_flavor::RPCSEC_GSS);
        }
        other => panic!("expected MSG_ACCEPTED, got {other:?}"),
    }
    let status = deserialize::<nfs3::nfsstat3>(&mut Cursor::new(&reply[offset..])).unwrap();
    assert_eq!(status, nfs3::nfsstat3::NFS3_OK);
}
