//! ACCESS procedure (RFC 1813 section 3.3.4).
//!
//! Access bits are decided against the file's mode and the caller's
//! credentials; the store is only consulted for attributes.

use std::io::Read;

use tracing::debug;

use super::write_error;
use crate::protocol::auth::Credentials;
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{
    fattr3, ftype3, nfs_fh3, nfsstat3, post_op_attr, ACCESS3_DELETE, ACCESS3_EXECUTE,
    ACCESS3_EXTEND, ACCESS3_LOOKUP, ACCESS3_MODIFY, ACCESS3_READ,
};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_access(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    let requested = deserialize::<u32>(input)?;
    debug!(xid = ctx.xid, ?fh, requested, "nfsproc3_access");

    match ctx.deps.stores.metadata.getattr(fh.raw()).await {
        Ok(attr) => {
            let granted = requested & allowed_bits(&attr, &ctx.creds);
            nfsstat3::NFS3_OK.serialize(output)?;
            post_op_attr::attributes(attr).serialize(output)?;
            granted.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &post_op_attr::Void),
    }
}

/// Computes the permitted ACCESS bits from the POSIX mode triplet.
fn allowed_bits(attr: &fattr3, creds: &Credentials) -> u32 {
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
        bits |= ACCESS3_MODIFY | ACCESS3_EXTEND;
        if attr.ftype == ftype3::NF3DIR {
            bits |= ACCESS3_DELETE;
        }
    }
    if x {
        bits |= if attr.ftype == ftype3::NF3DIR { ACCESS3_LOOKUP } else { ACCESS3_EXECUTE };
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn attr(uid: u32, gid: u32, mode: u32, ftype: ftype3) -> fattr3 {
        fattr3 { uid, gid, mode, ftype, ..Default::default() }
    }

    fn creds(uid: u32, gid: u32) -> Credentials {
        let mut c = Credentials::anonymous();
        c.uid = uid;
        c.gid = gid;
        c.gids = smallvec![gid];
        c
    }

    #[test]
    fn owner_uses_user_triplet() {
        let bits = allowed_bits(&attr(10, 20, 0o740, ftype3::NF3REG), &creds(10, 99));
        assert_eq!(bits & ACCESS3_READ, ACCESS3_READ);
        assert_eq!(bits & ACCESS3_MODIFY, ACCESS3_MODIFY);
        assert_eq!(bits & ACCESS3_EXECUTE, ACCESS3_EXECUTE);
    }

    #[test]
    fn group_member_uses_group_triplet() {
        let bits = allowed_bits(&attr(10, 20, 0o740, ftype3::NF3REG), &creds(11, 20));
        assert_eq!(bits & ACCESS3_READ, ACCESS3_READ);
        assert_eq!(bits & ACCESS3_MODIFY, 0);
    }

    #[test]
    fn directories_report_lookup_not_execute() {
        let bits = allowed_bits(&attr(10, 20, 0o755, ftype3::NF3DIR), &creds(99, 99));
        assert_eq!(bits & ACCESS3_LOOKUP, ACCESS3_LOOKUP);
        assert_eq!(bits & ACCESS3_EXECUTE, 0);
    }
}
