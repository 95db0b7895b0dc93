//! NFSv4 ACL evaluation and POSIX-mode derivation (RFC 7530 section 6).
//!
//! Evaluation is process-first-match: ACEs are scanned in order, INHERIT_ONLY
//! entries are skipped, and each requested mask bit is decided by the first
//! ALLOW or DENY entry that covers it. Access is granted iff every requested
//! bit ends up allowed. The special whos `OWNER@`, `GROUP@` and `EVERYONE@`
//! resolve dynamically against the file's current owner and group.

use crate::protocol::auth::Credentials;
use crate::protocol::xdr::nfs4::{nfsace4, utf8string};

// ACE types.
pub const ACE4_ACCESS_ALLOWED_ACE_TYPE: u32 = 0;
pub const ACE4_ACCESS_DENIED_ACE_TYPE: u32 = 1;
pub const ACE4_SYSTEM_AUDIT_ACE_TYPE: u32 = 2;
pub const ACE4_SYSTEM_ALARM_ACE_TYPE: u32 = 3;

// ACE flags.
pub const ACE4_FILE_INHERIT_ACE: u32 = 0x0000_0001;
pub const ACE4_DIRECTORY_INHERIT_ACE: u32 = 0x0000_0002;
pub const ACE4_NO_PROPAGATE_INHERIT_ACE: u32 = 0x0000_0004;
pub const ACE4_INHERIT_ONLY_ACE: u32 = 0x0000_0008;
pub const ACE4_IDENTIFIER_GROUP: u32 = 0x0000_0040;
pub const ACE4_INHERITED_ACE: u32 = 0x0000_0080;

// Access mask bits.
pub const ACE4_READ_DATA: u32 = 0x0000_0001;
pub const ACE4_WRITE_DATA: u32 = 0x0000_0002;
pub const ACE4_APPEND_DATA: u32 = 0x0000_0004;
pub const ACE4_READ_NAMED_ATTRS: u32 = 0x0000_0008;
pub const ACE4_WRITE_NAMED_ATTRS: u32 = 0x0000_0010;
pub const ACE4_EXECUTE: u32 = 0x0000_0020;
pub const ACE4_DELETE_CHILD: u32 = 0x0000_0040;
pub const ACE4_READ_ATTRIBUTES: u32 = 0x0000_0080;
pub const ACE4_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
pub const ACE4_DELETE: u32 = 0x0001_0000;
pub const ACE4_READ_ACL: u32 = 0x0002_0000;
pub const ACE4_WRITE_ACL: u32 = 0x0004_0000;
pub const ACE4_WRITE_OWNER: u32 = 0x0008_0000;
pub const ACE4_SYNCHRONIZE: u32 = 0x0010_0000;

/// Largest ACL accepted by validation.
pub const MAX_ACES: usize = 128;

/// Mask bits mapped from the POSIX `r` bit.
const POSIX_READ_BITS: u32 = ACE4_READ_DATA;
/// Mask bits mapped from the POSIX `w` bit.
const POSIX_WRITE_BITS: u32 = ACE4_WRITE_DATA | ACE4_APPEND_DATA;
/// Mask bits mapped from the POSIX `x` bit.
const POSIX_EXEC_BITS: u32 = ACE4_EXECUTE;
const POSIX_BITS: u32 = POSIX_READ_BITS | POSIX_WRITE_BITS | POSIX_EXEC_BITS;

/// Owner/group identity of the file being evaluated.
#[derive(Copy, Clone, Debug)]
pub struct FileIdentity {
    pub owner_uid: u32,
    pub group_gid: u32,
}

fn who_is(ace: &nfsace4) -> Who {
    match ace.who.0.as_slice() {
        b"OWNER@" => Who::Owner,
        b"GROUP@" => Who::Group,
        b"EVERYONE@" => Who::Everyone,
        other => {
            let text = String::from_utf8_lossy(other);
            match text.split('@').next().and_then(|n| n.parse::<u32>().ok()) {
                Some(id) if ace.flag & ACE4_IDENTIFIER_GROUP != 0 => Who::Gid(id),
                Some(id) => Who::Uid(id),
                None => Who::Unknown,
            }
        }
    }
}

enum Who {
    Owner,
    Group,
    Everyone,
    Uid(u32),
    Gid(u32),
    Unknown,
}

fn matches(ace: &nfsace4, creds: &Credentials, file: &FileIdentity) -> bool {
    match who_is(ace) {
        Who::Owner => creds.uid == file.owner_uid,
        Who::Group => creds.is_member_of(file.group_gid),
        Who::Everyone => true,
        Who::Uid(uid) => creds.uid == uid,
        Who::Gid(gid) => creds.is_member_of(gid),
        Who::Unknown => false,
    }
}

/// Process-first-match evaluation: true iff every bit of `requested` is
/// decided "allowed".
pub fn evaluate(
    acl: &[nfsace4],
    creds: &Credentials,
    file: &FileIdentity,
    requested: u32,
) -> bool {
    if requested == 0 {
        return true;
    }
    let mut allowed: u32 = 0;
    let mut denied: u32 = 0;
    for ace in acl {
        if ace.flag & ACE4_INHERIT_ONLY_ACE != 0 {
            continue;
        }
        if ace.acetype != ACE4_ACCESS_ALLOWED_ACE_TYPE
            && ace.acetype != ACE4_ACCESS_DENIED_ACE_TYPE
        {
            // AUDIT/ALARM entries never decide bits.
            continue;
        }
        if !matches(ace, creds, file) {
            continue;
        }
        let undecided = ace.access_mask & !(allowed | denied);
        if ace.acetype == ACE4_ACCESS_ALLOWED_ACE_TYPE {
            allowed |= undecided;
        } else {
            denied |= undecided;
        }
        if requested & !(allowed | denied) == 0 {
            break;
        }
    }
    requested & allowed == requested
}

/// Canonical ordering: explicit denies, explicit allows, inherited denies,
/// inherited allows. AUDIT/ALARM entries may appear anywhere.
pub fn validate(acl: &[nfsace4]) -> Result<(), AclError> {
    if acl.len() > MAX_ACES {
        return Err(AclError::TooManyAces(acl.len()));
    }
    let rank_of = |ace: &nfsace4| -> Option<u8> {
        let inherited = ace.flag & ACE4_INHERITED_ACE != 0;
        match (ace.acetype, inherited) {
            (ACE4_ACCESS_DENIED_ACE_TYPE, false) => Some(0),
            (ACE4_ACCESS_ALLOWED_ACE_TYPE, false) => Some(1),
            (ACE4_ACCESS_DENIED_ACE_TYPE, true) => Some(2),
            (ACE4_ACCESS_ALLOWED_ACE_TYPE, true) => Some(3),
            (ACE4_SYSTEM_AUDIT_ACE_TYPE | ACE4_SYSTEM_ALARM_ACE_TYPE, _) => None,
            _ => Some(u8::MAX), // unknown type: rejected below
        }
    };
    let mut last_rank = 0u8;
    for (index, ace) in acl.iter().enumerate() {
        match rank_of(ace) {
            None => continue,
            Some(u8::MAX) => return Err(AclError::UnknownType(ace.acetype)),
            Some(rank) => {
                if rank < last_rank {
                    return Err(AclError::NotCanonical { index });
                }
                last_rank = rank;
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AclError {
    #[error("ACL has {0} entries, limit is {MAX_ACES}")]
    TooManyAces(usize),
    #[error("unknown ACE type {0}")]
    UnknownType(u32),
    #[error("ACE at index {index} violates canonical ordering")]
    NotCanonical { index: usize },
}

fn special(who: &str) -> utf8string {
    utf8string::from(who)
}

fn mode_bits_to_mask(r: bool, w: bool, x: bool) -> u32 {
    let mut mask = ACE4_READ_ATTRIBUTES | ACE4_READ_ACL | ACE4_SYNCHRONIZE;
    if r {
        mask |= POSIX_READ_BITS;
    }
    if w {
        mask |= POSIX_WRITE_BITS;
    }
    if x {
        mask |= POSIX_EXEC_BITS;
    }
    mask
}

/// Builds the three-ACE ALLOW list equivalent to a POSIX mode.
pub fn synthesize_from_mode(mode: u32, _uid: u32, _gid: u32, _is_dir: bool) -> Vec<nfsace4> {
    let triplet = |shift: u32| {
        (mode >> shift & 0o4 != 0, mode >> shift & 0o2 != 0, mode >> shift & 0o1 != 0)
    };
    let (ur, uw, ux) = triplet(6);
    let (gr, gw, gx) = triplet(3);
    let (or, ow, ox) = triplet(0);
    vec![
        nfsace4 {
            acetype: ACE4_ACCESS_ALLOWED_ACE_TYPE,
            flag: 0,
            access_mask: mode_bits_to_mask(ur, uw, ux) | ACE4_WRITE_ACL | ACE4_WRITE_ATTRIBUTES,
            who: special("OWNER@"),
        },
        nfsace4 {
            acetype: ACE4_ACCESS_ALLOWED_ACE_TYPE,
            flag: ACE4_IDENTIFIER_GROUP,
            access_mask: mode_bits_to_mask(gr, gw, gx),
            who: special("GROUP@"),
        },
        nfsace4 {
            acetype: ACE4_ACCESS_ALLOWED_ACE_TYPE,
            flag: 0,
            access_mask: mode_bits_to_mask(or, ow, ox),
            who: special("EVERYONE@"),
        },
    ]
}

fn mask_to_mode_bits(mask: u32) -> u32 {
    let mut bits = 0;
    if mask & POSIX_READ_BITS != 0 {
        bits |= 0o4;
    }
    if mask & POSIX_WRITE_BITS != 0 {
        bits |= 0o2;
    }
    if mask & POSIX_EXEC_BITS != 0 {
        bits |= 0o1;
    }
    bits
}

/// Reads the POSIX mode back out of the special-who ALLOW entries. DENY
/// entries and named-who entries do not contribute.
pub fn derive_mode(acl: &[nfsace4]) -> u32 {
    let mut mode = 0u32;
    for ace in acl {
        if ace.acetype != ACE4_ACCESS_ALLOWED_ACE_TYPE
            || ace.flag & ACE4_INHERIT_ONLY_ACE != 0
        {
            continue;
        }
        let bits = mask_to_mode_bits(ace.access_mask);
        match ace.who.0.as_slice() {
            b"OWNER@" => mode |= bits << 6,
            b"GROUP@" => mode |= bits << 3,
            b"EVERYONE@" => mode |= bits,
            _ => {}
        }
    }
    mode
}

/// Applies a chmod to an existing ACL: only the rwx-mapped bits of the
/// special-who ACEs change, every other entry and bit is preserved.
pub fn adjust_acl_for_mode(acl: &[nfsace4], mode: u32) -> Vec<nfsace4> {
    acl.iter()
        .map(|ace| {
            if ace.acetype != ACE4_ACCESS_ALLOWED_ACE_TYPE
                && ace.acetype != ACE4_ACCESS_DENIED_ACE_TYPE
            {
                return ace.clone();
            }
            let shift = match ace.who.0.as_slice() {
                b"OWNER@" => 6,
                b"GROUP@" => 3,
                b"EVERYONE@" => 0,
                _ => return ace.clone(),
            };
            let bits = mode >> shift & 0o7;
            let wanted = mode_bits_to_mask(bits & 0o4 != 0, bits & 0o2 != 0, bits & 0o1 != 0)
                & POSIX_BITS;
            let mut updated = ace.clone();
            if ace.acetype == ACE4_ACCESS_ALLOWED_ACE_TYPE {
                updated.access_mask = (ace.access_mask & !POSIX_BITS) | wanted;
            } else {
                // A deny entry blocks exactly the bits the mode removes.
                updated.access_mask = (ace.access_mask & !POSIX_BITS) | (POSIX_BITS & !wanted);
            }
            updated
        })
        .collect()
}

/// Inheritance for a newly created object: parent ACEs flagged for the
/// object kind propagate, marked inherited; NO_PROPAGATE strips further
/// inheritance flags.
pub fn inherit_for_new_object(parent_acl: &[nfsace4], is_dir: bool) -> Vec<nfsace4> {
    let mut inherited = Vec::new();
    for ace in parent_acl {
        let wants = if is_dir {
            ace.flag & ACE4_DIRECTORY_INHERIT_ACE != 0
        } else {
            ace.flag & ACE4_FILE_INHERIT_ACE != 0
        };
        if !wants {
            continue;
        }
        let mut child = ace.clone();
        child.flag |= ACE4_INHERITED_ACE;
        child.flag &= !ACE4_INHERIT_ONLY_ACE;
        if ace.flag & ACE4_NO_PROPAGATE_INHERIT_ACE != 0 || !is_dir {
            child.flag &= !(ACE4_FILE_INHERIT_ACE
                | ACE4_DIRECTORY_INHERIT_ACE
                | ACE4_NO_PROPAGATE_INHERIT_ACE);
        }
        inherited.push(child);
    }
    inherited
}
