//! Attribute operations: GETATTR, SETATTR, VERIFY, NVERIFY, ACCESS and
//! READDIR, plus the fattr4 encoder they share.
//!
//! The encoder serves both real objects (store attributes in the v3
//! vocabulary) and pseudo-fs nodes (synthesized directory attributes on
//! fsid (0,1)). VERIFY re-encodes the requested attributes and compares
//! bytes, so client and server agree on representation by construction.

use std::io::Cursor;

use tracing::debug;

use super::{map_stat, OpResult};
use crate::protocol::nfs::v4::acl;
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::nfs::v4::pseudofs;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs3::{fattr3, ftype3, sattr3, set_atime, set_mtime, set_size3};
use crate::protocol::xdr::nfs4::{
    bitmap4, bitmap_get, bitmap_set, fattr4, fsid4, nfs_fh4, nfs_ftype4, nfsace4, nfsstat4,
    nfstime4, stateid4, utf8string, READDIR4args, FATTR4_ACL, FATTR4_CHANGE,
    FATTR4_FH_EXPIRE_TYPE, FATTR4_FILEHANDLE, FATTR4_FILEID, FATTR4_FSID, FATTR4_LEASE_TIME,
    FATTR4_LINK_SUPPORT, FATTR4_MODE, FATTR4_NAMED_ATTR, FATTR4_NUMLINKS, FATTR4_OWNER,
    FATTR4_OWNER_GROUP, FATTR4_RDATTR_ERROR, FATTR4_SIZE, FATTR4_SPACE_USED,
    FATTR4_SUPPORTED_ATTRS, FATTR4_SYMLINK_SUPPORT, FATTR4_TIME_ACCESS, FATTR4_TIME_METADATA,
    FATTR4_TIME_MODIFY, FATTR4_TYPE, FATTR4_UNIQUE_HANDLES,
};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::store::RawHandle;

/// Settable time attributes (RFC 7530 section 5.8.2).
pub const FATTR4_TIME_ACCESS_SET: u32 = 48;
pub const FATTR4_TIME_MODIFY_SET: u32 = 54;

/// What GETATTR can serve.
pub fn supported_attrs() -> bitmap4 {
    let mut bm = bitmap4::new();
    for attr in [
        FATTR4_SUPPORTED_ATTRS,
        FATTR4_TYPE,
        FATTR4_FH_EXPIRE_TYPE,
        FATTR4_CHANGE,
        FATTR4_SIZE,
        FATTR4_LINK_SUPPORT,
        FATTR4_SYMLINK_SUPPORT,
        FATTR4_NAMED_ATTR,
        FATTR4_FSID,
        FATTR4_UNIQUE_HANDLES,
        FATTR4_LEASE_TIME,
        FATTR4_RDATTR_ERROR,
        FATTR4_ACL,
        FATTR4_FILEHANDLE,
        FATTR4_FILEID,
        FATTR4_MODE,
        FATTR4_NUMLINKS,
        FATTR4_OWNER,
        FATTR4_OWNER_GROUP,
        FATTR4_SPACE_USED,
        FATTR4_TIME_ACCESS,
        FATTR4_TIME_METADATA,
        FATTR4_TIME_MODIFY,
    ] {
        bitmap_set(&mut bm, attr);
    }
    bm
}

/// Object description fed to the encoder.
pub enum ObjectInfo {
    Real {
        attr: fattr3,
        handle: RawHandle,
        acl: Option<Vec<nfsace4>>,
    },
    Pseudo {
        file_id: u64,
        handle: RawHandle,
        change: u64,
    },
}

impl ObjectInfo {
    /// Resolves the current handle into an encodable description.
    pub async fn resolve(
        handle: &RawHandle,
        ctx: &RequestContext,
        want_acl: bool,
    ) -> Result<ObjectInfo, nfsstat4> {
        if pseudofs::is_pseudo_handle(handle) {
            let fs = ctx.deps.state4.pseudofs();
            let node = fs.by_handle(handle).ok_or(nfsstat4::NFS4ERR_STALE)?;
            return Ok(ObjectInfo::Pseudo {
                file_id: node.file_id,
                handle: handle.clone(),
                change: fs.change_id(),
            });
        }
        let attr = ctx.deps.stores.metadata.getattr(handle).await.map_err(map_stat)?;
        let acl = if want_acl {
            ctx.deps.stores.metadata.get_acl(handle).await.ok()
        } else {
            None
        };
        Ok(ObjectInfo::Real { attr, handle: handle.clone(), acl })
    }
}

fn ftype4_of(ftype: ftype3) -> nfs_ftype4 {
    match ftype {
        ftype3::NF3REG => nfs_ftype4::NF4REG,
        ftype3::NF3DIR => nfs_ftype4::NF4DIR,
        ftype3::NF3BLK => nfs_ftype4::NF4BLK,
        ftype3::NF3CHR => nfs_ftype4::NF4CHR,
        ftype3::NF3LNK => nfs_ftype4::NF4LNK,
        ftype3::NF3SOCK => nfs_ftype4::NF4SOCK,
        ftype3::NF3FIFO => nfs_ftype4::NF4FIFO,
    }
}

fn change_of(attr: &fattr3) -> u64 {
    (attr.mtime.seconds as u64) << 32 | attr.mtime.nseconds as u64
}

fn time4(t: crate::protocol::xdr::nfs3::nfstime3) -> nfstime4 {
    nfstime4 { seconds: t.seconds as i64, nseconds: t.nseconds }
}

/// Encodes the requested attributes; unsupported bits are simply omitted
/// from the returned mask, as the protocol allows.
pub fn encode_attrs(
    requested: &bitmap4,
    info: &ObjectInfo,
    lease_seconds: u32,
) -> std::io::Result<(bitmap4, Vec<u8>)> {
    let supported = supported_attrs();
    let mut mask = bitmap4::new();
    let mut vals = Vec::new();

    let highest = requested.len() as u32 * 32;
    for attr in 0..highest {
        if !bitmap_get(requested, attr) || !bitmap_get(&supported, attr) {
            continue;
        }
        if attr == FATTR4_ACL && !matches!(info, ObjectInfo::Real { acl: Some(_), .. }) {
            continue;
        }
        bitmap_set(&mut mask, attr);
        match attr {
            FATTR4_SUPPORTED_ATTRS => supported.serialize(&mut vals)?,
            FATTR4_TYPE => match info {
                ObjectInfo::Real { attr, .. } => ftype4_of(attr.ftype).serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => nfs_ftype4::NF4DIR.serialize(&mut vals)?,
            },
            // FH4_PERSISTENT: handles survive restart.
            FATTR4_FH_EXPIRE_TYPE => 0u32.serialize(&mut vals)?,
            FATTR4_CHANGE => match info {
                ObjectInfo::Real { attr, .. } => change_of(attr).serialize(&mut vals)?,
                ObjectInfo::Pseudo { change, .. } => change.serialize(&mut vals)?,
            },
            FATTR4_SIZE => match info {
                ObjectInfo::Real { attr, .. } => attr.size.serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => 4096u64.serialize(&mut vals)?,
            },
            FATTR4_LINK_SUPPORT | FATTR4_SYMLINK_SUPPORT | FATTR4_UNIQUE_HANDLES => {
                true.serialize(&mut vals)?
            }
            FATTR4_NAMED_ATTR => false.serialize(&mut vals)?,
            FATTR4_FSID => match info {
                ObjectInfo::Real { attr, .. } => {
                    fsid4 { major: attr.fsid, minor: 0 }.serialize(&mut vals)?
                }
                ObjectInfo::Pseudo { .. } => pseudofs::PSEUDO_FSID.serialize(&mut vals)?,
            },
            FATTR4_LEASE_TIME => lease_seconds.serialize(&mut vals)?,
            FATTR4_RDATTR_ERROR => nfsstat4::NFS4_OK.serialize(&mut vals)?,
            FATTR4_ACL => {
                if let ObjectInfo::Real { acl: Some(acl), .. } = info {
                    acl.serialize(&mut vals)?
                }
            }
            FATTR4_FILEHANDLE => match info {
                ObjectInfo::Real { handle, .. } | ObjectInfo::Pseudo { handle, .. } => {
                    nfs_fh4 { data: handle.clone() }.serialize(&mut vals)?
                }
            },
            FATTR4_FILEID => match info {
                ObjectInfo::Real { attr, .. } => attr.fileid.serialize(&mut vals)?,
                ObjectInfo::Pseudo { file_id, .. } => file_id.serialize(&mut vals)?,
            },
            FATTR4_MODE => match info {
                ObjectInfo::Real { attr, .. } => (attr.mode & 0o7777).serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => 0o555u32.serialize(&mut vals)?,
            },
            FATTR4_NUMLINKS => match info {
                ObjectInfo::Real { attr, .. } => attr.nlink.serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => 2u32.serialize(&mut vals)?,
            },
            FATTR4_OWNER => match info {
                ObjectInfo::Real { attr, .. } => {
                    utf8string(attr.uid.to_string().into_bytes()).serialize(&mut vals)?
                }
                ObjectInfo::Pseudo { .. } => utf8string::from("0").serialize(&mut vals)?,
            },
            FATTR4_OWNER_GROUP => match info {
                ObjectInfo::Real { attr, .. } => {
                    utf8string(attr.gid.to_string().into_bytes()).serialize(&mut vals)?
                }
                ObjectInfo::Pseudo { .. } => utf8string::from("0").serialize(&mut vals)?,
            },
            FATTR4_SPACE_USED => match info {
                ObjectInfo::Real { attr, .. } => attr.used.serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => 4096u64.serialize(&mut vals)?,
            },
            FATTR4_TIME_ACCESS => match info {
                ObjectInfo::Real { attr, .. } => time4(attr.atime).serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => nfstime4::default().serialize(&mut vals)?,
            },
            FATTR4_TIME_METADATA => match info {
                ObjectInfo::Real { attr, .. } => time4(attr.ctime).serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => nfstime4::default().serialize(&mut vals)?,
            },
            FATTR4_TIME_MODIFY => match info {
                ObjectInfo::Real { attr, .. } => time4(attr.mtime).serialize(&mut vals)?,
                ObjectInfo::Pseudo { .. } => nfstime4::default().serialize(&mut vals)?,
            },
            _ => {}
        }
    }
    Ok((mask, vals))
}

pub(super) async fn getattr(
    requested: &bitmap4,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    let want_acl = bitmap_get(requested, FATTR4_ACL);
    let info = ObjectInfo::resolve(&fh, ctx, want_acl).await?;
    let lease = ctx.deps.state4.lease_seconds() as u32;
    let (mask, vals) =
        encode_attrs(requested, &info, lease).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    fattr4 { attrmask: mask, attr_vals: vals }
        .serialize(out)
        .map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

/// Decoded subset of settable attributes.
struct SettableAttrs {
    sattr: sattr3,
    acl: Option<Vec<nfsace4>>,
    mode: Option<u32>,
    set_bits: bitmap4,
}

fn decode_settable(attrs: &fattr4) -> Result<SettableAttrs, nfsstat4> {
    let mut cursor = Cursor::new(attrs.attr_vals.as_slice());
    let mut decoded = SettableAttrs {
        sattr: sattr3::default(),
        acl: None,
        mode: None,
        set_bits: bitmap4::new(),
    };
    let highest = attrs.attrmask.len() as u32 * 32;
    for attr in 0..highest {
        if !bitmap_get(&attrs.attrmask, attr) {
            continue;
        }
        match attr {
            FATTR4_SIZE => {
                let size = deserialize::<u64>(&mut cursor)
                    .map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
                decoded.sattr.size = set_size3::size(size);
            }
            FATTR4_ACL => {
                let acl = deserialize::<Vec<nfsace4>>(&mut cursor)
                    .map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
                decoded.acl = Some(acl);
            }
            FATTR4_MODE => {
                let mode = deserialize::<u32>(&mut cursor)
                    .map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
                decoded.mode = Some(mode);
                decoded.sattr.mode = crate::protocol::xdr::nfs3::set_mode3::mode(mode);
            }
            FATTR4_TIME_ACCESS_SET => {
                decoded.sattr.atime = decode_settime(&mut cursor)?
                    .map(set_atime::SET_TO_CLIENT_TIME)
                    .unwrap_or(set_atime::SET_TO_SERVER_TIME);
            }
            FATTR4_TIME_MODIFY_SET => {
                decoded.sattr.mtime = decode_settime(&mut cursor)?
                    .map(set_mtime::SET_TO_CLIENT_TIME)
                    .unwrap_or(set_mtime::SET_TO_SERVER_TIME);
            }
            _ => return Err(nfsstat4::NFS4ERR_ATTRNOTSUPP),
        }
        bitmap_set(&mut decoded.set_bits, attr);
    }
    Ok(decoded)
}

fn decode_settime(
    cursor: &mut Cursor<&[u8]>,
) -> Result<Option<crate::protocol::xdr::nfs3::nfstime3>, nfsstat4> {
    let how = deserialize::<u32>(cursor).map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
    match how {
        0 => Ok(None),
        1 => {
            let t = deserialize::<nfstime4>(cursor).map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
            Ok(Some(crate::protocol::xdr::nfs3::nfstime3 {
                seconds: t.seconds as u32,
                nseconds: t.nseconds,
            }))
        }
        _ => Err(nfsstat4::NFS4ERR_BADXDR),
    }
}

pub(super) async fn setattr(
    _stateid: &stateid4,
    attrs: &fattr4,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    // The result body always carries the attrs-set bitmap, success or not.
    let finish = |out: &mut Vec<u8>, bits: &bitmap4, status: Option<nfsstat4>| -> OpResult {
        bits.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
        match status {
            None => Ok(()),
            Some(status) => Err(status),
        }
    };

    let fh = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&fh) {
        return finish(out, &bitmap4::new(), Some(nfsstat4::NFS4ERR_ROFS));
    }
    let decoded = match decode_settable(attrs) {
        Ok(decoded) => decoded,
        Err(status) => return finish(out, &bitmap4::new(), Some(status)),
    };

    if let Some(acl) = &decoded.acl {
        if acl::validate(acl).is_err() {
            return finish(out, &bitmap4::new(), Some(nfsstat4::NFS4ERR_INVAL));
        }
        if let Err(stat) = ctx.deps.stores.metadata.set_acl(&fh, acl.clone()).await {
            return finish(out, &bitmap4::new(), Some(map_stat(stat)));
        }
    }

    // chmod also reshapes the stored ACL's rwx projection.
    if let Some(mode) = decoded.mode {
        if let Ok(current) = ctx.deps.stores.metadata.get_acl(&fh).await {
            if !current.is_empty() {
                let adjusted = acl::adjust_acl_for_mode(&current, mode);
                let _ = ctx.deps.stores.metadata.set_acl(&fh, adjusted).await;
            }
        }
    }

    match ctx.deps.stores.metadata.setattr(&fh, decoded.sattr).await {
        Ok(_) => finish(out, &decoded.set_bits, None),
        Err(stat) => finish(out, &bitmap4::new(), Some(map_stat(stat))),
    }
}

/// VERIFY (`expect_same = true`) and NVERIFY (`false`).
pub(super) async fn verify(
    attrs: &fattr4,
    state: &mut CompoundState,
    ctx: &RequestContext,
    expect_same: bool,
) -> OpResult {
    let fh = state.fh()?.clone();
    let info = ObjectInfo::resolve(&fh, ctx, bitmap_get(&attrs.attrmask, FATTR4_ACL)).await?;
    let lease = ctx.deps.state4.lease_seconds() as u32;
    let (mask, vals) = encode_attrs(&attrs.attrmask, &info, lease)
        .map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    if mask != attrs.attrmask {
        return Err(nfsstat4::NFS4ERR_ATTRNOTSUPP);
    }
    let same = vals == attrs.attr_vals;
    match (expect_same, same) {
        (true, true) | (false, false) => Ok(()),
        (true, false) => Err(nfsstat4::NFS4ERR_NOT_SAME),
        (false, true) => Err(nfsstat4::NFS4ERR_SAME),
    }
}

pub(super) async fn access(
    requested: u32,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    use crate::protocol::xdr::nfs3::{
        ACCESS3_DELETE, ACCESS3_EXECUTE, ACCESS3_EXTEND, ACCESS3_LOOKUP, ACCESS3_MODIFY,
        ACCESS3_READ,
    };
    let fh = state.fh()?.clone();
    let supported = ACCESS3_READ
        | ACCESS3_LOOKUP
        | ACCESS3_MODIFY
        | ACCESS3_EXTEND
        | ACCESS3_DELETE
        | ACCESS3_EXECUTE;

    let granted = if pseudofs::is_pseudo_handle(&fh) {
        requested & (ACCESS3_READ | ACCESS3_LOOKUP)
    } else {
        let attr = ctx.deps.stores.metadata.getattr(&fh).await.map_err(map_stat)?;
        let acl = ctx.deps.stores.metadata.get_acl(&fh).await.unwrap_or_default();
        if acl.is_empty() {
            requested & mode_access_bits(&attr, &ctx.creds)
        } else {
            let identity =
                acl::FileIdentity { owner_uid: attr.uid, group_gid: attr.gid };
            let mut granted = 0;
            for (access_bit, ace_mask) in [
                (ACCESS3_READ, acl::ACE4_READ_DATA),
                (ACCESS3_LOOKUP, acl::ACE4_EXECUTE),
                (ACCESS3_MODIFY, acl::ACE4_WRITE_DATA),
                (ACCESS3_EXTEND, acl::ACE4_APPEND_DATA),
                (ACCESS3_DELETE, acl::ACE4_DELETE_CHILD),
                (ACCESS3_EXECUTE, acl::ACE4_EXECUTE),
            ] {
                if requested & access_bit != 0
                    && acl::evaluate(&acl, &ctx.creds, &identity, ace_mask)
                {
                    granted |= access_bit;
                }
            }
            granted
        }
    };

    (supported & requested).serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    granted.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    Ok(())
}

fn mode_access_bits(attr: &fattr3, creds: &crate::protocol::auth::Credentials) -> u32 {
    use crate::protocol::xdr::nfs3::{
        ACCESS3_DELETE, ACCESS3_EXECUTE, ACCESS3_EXTEND, ACCESS3_LOOKUP, ACCESS3_MODIFY,
        ACCESS3_READ,
    };
    let mode = attr.mode;
    let (r, w, x) = if creds.uid == 0 {
        (true, true, true)
    } else if creds.uid == attr.uid {
        (mode & 0o400 != 0, mode & 0o200 != 0, mode & 0o100 != 0)
    } else if creds.is_member_of(attr.gid) {
        (mode & 0o040 != 0, mode & 0o020 != 0, mode & 0o010 != 0)
    } else {
        (mode & 0o004 != 0, mode & 0o002 != 0, mode & 0o001 != 0)
    };
    let mut bits = 0;
    if r {
        bits |= ACCESS3_READ;
    }
    if w {
        bits |= ACCESS3_MODIFY | ACCESS3_EXTEND | ACCESS3_DELETE;
    }
    if x {
        bits |= ACCESS3_LOOKUP | ACCESS3_EXECUTE;
    }
    bits
}

pub(super) async fn readdir(
    args: &READDIR4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    let lease = ctx.deps.state4.lease_seconds() as u32;
    let budget = (args.maxcount as usize).saturating_sub(128);
    debug!(xid = ctx.xid, cookie = args.cookie, "readdir4");

    let mut entries_bytes = Vec::new();
    let mut eof = true;

    if pseudofs::is_pseudo_handle(&fh) {
        let (listing, change) = {
            let fs = ctx.deps.state4.pseudofs();
            let node = fs.by_handle(&fh).ok_or(nfsstat4::NFS4ERR_STALE)?;
            (fs.entries(node), fs.change_id())
        };
        // Pseudo cookies are ordinal positions, stable because the listing
        // order is stable.
        for (position, (name, file_id, handle)) in listing.iter().enumerate() {
            let cookie = position as u64 + 3;
            if cookie <= args.cookie {
                continue;
            }
            let info = if pseudofs::is_pseudo_handle(handle) {
                ObjectInfo::Pseudo { file_id: *file_id, handle: handle.clone(), change }
            } else {
                match ObjectInfo::resolve(handle, ctx, false).await {
                    Ok(info) => info,
                    Err(_) => continue,
                }
            };
            if !push_entry4(&mut entries_bytes, cookie, name.as_bytes(), &args.attr_request, &info, lease, budget)?
            {
                eof = false;
                break;
            }
        }
    } else {
        let batch = ctx
            .deps
            .stores
            .metadata
            .readdir(&fh, args.cookie, 256)
            .await
            .map_err(map_stat)?;
        eof = batch.end;
        for entry in &batch.entries {
            let info = ObjectInfo::Real {
                attr: entry.attr,
                handle: entry.handle.clone(),
                acl: None,
            };
            if !push_entry4(
                &mut entries_bytes,
                entry.cookie,
                entry.name.as_ref(),
                &args.attr_request,
                &info,
                lease,
                budget,
            )? {
                eof = false;
                break;
            }
        }
    }

    // cookieverf: tied to this boot so replayed cookies from an older
    // instance fail loudly.
    let verf = ctx.deps.state4.server_verifier();
    verf.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    out.extend_from_slice(&entries_bytes);
    false.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    eof.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    Ok(())
}

/// Appends one entry4 unless it would overflow the byte budget; false means
/// the listing was truncated.
fn push_entry4(
    entries: &mut Vec<u8>,
    cookie: u64,
    name: &[u8],
    attr_request: &bitmap4,
    info: &ObjectInfo,
    lease: u32,
    budget: usize,
) -> Result<bool, nfsstat4> {
    let mut one = Vec::with_capacity(name.len() + 64);
    let encoded: std::io::Result<()> = (|| {
        true.serialize(&mut one)?;
        cookie.serialize(&mut one)?;
        crate::protocol::xdr::write_opaque(name, &mut one)?;
        let (mask, vals) = encode_attrs(attr_request, info, lease)?;
        fattr4 { attrmask: mask, attr_vals: vals }.serialize(&mut one)
    })();
    encoded.map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    if entries.len() + one.len() > budget {
        return Ok(false);
    }
    entries.extend_from_slice(&one);
    Ok(true)
}
