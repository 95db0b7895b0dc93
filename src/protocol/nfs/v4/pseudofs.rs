//! Pseudo-filesystem: the navigable v4 namespace that unions the exports.
//!
//! Nodes are rebuilt deterministically from the share list, so a share path
//! yields the same handle and file-id across rebuilds and across restarts.
//! The root handle is the fixed string `pseudofs:/`; interior node handles
//! append the path. An export leaf resolves to the share's real root handle,
//! which is where navigation crosses into the store's namespace.

use std::collections::BTreeMap;

use crate::protocol::xdr::nfs4::{fsid4, NFS4_FHSIZE};
use crate::store::{RawHandle, Share};

/// Handle prefix for every pseudo-fs node.
pub const PSEUDOFS_TAG: &[u8] = b"pseudofs:";
/// The root's complete handle.
pub const ROOT_HANDLE: &[u8] = b"pseudofs:/";

/// Pseudo nodes all live on this synthetic fsid.
pub const PSEUDO_FSID: fsid4 = fsid4 { major: 0, minor: 1 };

pub fn is_pseudo_handle(handle: &[u8]) -> bool {
    handle.starts_with(PSEUDOFS_TAG)
}

/// Deterministic non-zero file id for a pseudo path (FNV-1a, root pinned
/// to 1).
fn file_id_for(path: &str) -> u64 {
    if path.is_empty() {
        return 1;
    }
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in path.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash | 1
}

#[derive(Clone, Debug)]
pub struct PseudoNode {
    /// Slash-free path below the root; empty for the root itself.
    pub path: String,
    pub handle: RawHandle,
    pub file_id: u64,
    pub children: BTreeMap<String, PseudoChild>,
}

#[derive(Clone, Debug)]
pub enum PseudoChild {
    /// Interior namespace directory.
    Dir(String),
    /// Export point: resolves to the share's real root handle.
    Export(RawHandle),
}

/// Outcome of a pseudo-fs lookup step.
#[derive(Clone, Debug)]
pub enum LookupResult {
    /// Still inside the pseudo namespace.
    Pseudo(RawHandle),
    /// Crossed into a share; the real root handle.
    Export(RawHandle),
}

pub struct PseudoFs {
    nodes: BTreeMap<String, PseudoNode>,
    /// Advances on every rebuild so clients revalidate cached root state.
    change_id: u64,
}

impl PseudoFs {
    /// Builds the namespace for a share list. Shares named `a/b` produce
    /// the interior directory `a` with export child `b`.
    pub fn build(shares: &[Share], change_id: u64) -> Self {
        let mut nodes: BTreeMap<String, PseudoNode> = BTreeMap::new();
        nodes.insert(String::new(), node_for(""));

        for share in shares {
            let name = share.name.trim_matches('/');
            if name.is_empty() {
                continue;
            }
            let parts: Vec<&str> = name.split('/').collect();
            let mut path = String::new();
            for (depth, part) in parts.iter().enumerate() {
                let parent_path = path.clone();
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(part);

                let is_leaf = depth == parts.len() - 1;
                let child = if is_leaf {
                    PseudoChild::Export(share.root.clone())
                } else {
                    PseudoChild::Dir(path.clone())
                };
                nodes
                    .entry(parent_path)
                    .or_insert_with_key(|key| node_for(key))
                    .children
                    .insert(part.to_string(), child);
                if !is_leaf {
                    nodes.entry(path.clone()).or_insert_with_key(|key| node_for(key));
                }
            }
        }

        Self { nodes, change_id }
    }

    pub fn change_id(&self) -> u64 {
        self.change_id
    }

    pub fn root(&self) -> &PseudoNode {
        self.nodes.get("").expect("pseudo-fs root always exists")
    }

    pub fn by_handle(&self, handle: &[u8]) -> Option<&PseudoNode> {
        let path = handle.strip_prefix(PSEUDOFS_TAG)?;
        let path = std::str::from_utf8(path).ok()?.trim_start_matches('/');
        self.nodes.get(path)
    }

    /// Resolves one lookup step. `None` when the name does not exist.
    pub fn lookup(&self, node: &PseudoNode, name: &str) -> Option<LookupResult> {
        match node.children.get(name)? {
            PseudoChild::Dir(path) => {
                self.nodes.get(path).map(|n| LookupResult::Pseudo(n.handle.clone()))
            }
            PseudoChild::Export(root) => Some(LookupResult::Export(root.clone())),
        }
    }

    /// Parent of a pseudo node, clamped at the root.
    pub fn parent(&self, node: &PseudoNode) -> &PseudoNode {
        match node.path.rsplit_once('/') {
            Some((parent, _)) => self.nodes.get(parent).unwrap_or_else(|| self.root()),
            None if node.path.is_empty() => self.root(),
            None => self.root(),
        }
    }

    /// Children in stable order, with the handles enumeration reports.
    pub fn entries(&self, node: &PseudoNode) -> Vec<(String, u64, RawHandle)> {
        node.children
            .iter()
            .map(|(name, child)| match child {
                PseudoChild::Dir(path) => {
                    let node = &self.nodes[path];
                    (name.clone(), node.file_id, node.handle.clone())
                }
                PseudoChild::Export(root) => {
                    let path = if node.path.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{name}", node.path)
                    };
                    (name.clone(), file_id_for(&path), root.clone())
                }
            })
            .collect()
    }
}

fn node_for(path: &str) -> PseudoNode {
    let mut handle = PSEUDOFS_TAG.to_vec();
    handle.push(b'/');
    handle.extend_from_slice(path.as_bytes());
    debug_assert!(handle.len() <= NFS4_FHSIZE);
    PseudoNode {
        path: path.to_string(),
        handle,
        file_id: file_id_for(path),
        children: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(name: &str) -> Share {
        Share { name: name.to_string(), root: format!("{name}:").into_bytes() }
    }

    #[test]
    fn root_handle_is_stable() {
        let fs = PseudoFs::build(&[share("export1")], 1);
        assert_eq!(fs.root().handle, ROOT_HANDLE.to_vec());
        assert_eq!(fs.root().file_id, 1);
    }

    #[test]
    fn handles_and_file_ids_survive_rebuilds() {
        let first = PseudoFs::build(&[share("a/b"), share("c")], 1);
        let second = PseudoFs::build(&[share("c"), share("a/b"), share("d")], 2);

        let a1 = first.by_handle(b"pseudofs:/a").unwrap();
        let a2 = second.by_handle(b"pseudofs:/a").unwrap();
        assert_eq!(a1.handle, a2.handle);
        assert_eq!(a1.file_id, a2.file_id);
        assert_ne!(a1.file_id, 0);
    }

    #[test]
    fn change_id_advances_per_rebuild() {
        let first = PseudoFs::build(&[share("x")], 5);
        let second = PseudoFs::build(&[share("x")], 6);
        assert!(second.change_id() > first.change_id());
    }

    #[test]
    fn lookup_crosses_into_export_root() {
        let fs = PseudoFs::build(&[share("a/b")], 1);
        let root = fs.root();
        match fs.lookup(root, "a").unwrap() {
            LookupResult::Pseudo(handle) => {
                let a = fs.by_handle(&handle).unwrap();
                match fs.lookup(a, "b").unwrap() {
                    LookupResult::Export(real) => assert_eq!(real, b"a/b:".to_vec()),
                    other => panic!("expected export, got {other:?}"),
                }
            }
            other => panic!("expected pseudo dir, got {other:?}"),
        }
    }

    #[test]
    fn parent_of_root_is_root() {
        let fs = PseudoFs::build(&[share("a/b")], 1);
        let root = fs.root();
        assert_eq!(fs.parent(root).path, "");
        let a = fs.by_handle(b"pseudofs:/a").unwrap();
        assert_eq!(fs.parent(a).path, "");
    }

    #[test]
    fn entries_list_children_in_stable_order() {
        let fs = PseudoFs::build(&[share("zeta"), share("alpha")], 1);
        let names: Vec<String> =
            fs.entries(fs.root()).into_iter().map(|(name, _, _)| name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn handles_fit_the_v4_limit() {
        let long = "d".repeat(80);
        let fs = PseudoFs::build(&[share(&long)], 1);
        let node = fs.by_handle(format!("pseudofs:/{long}").as_bytes()).unwrap();
        assert!(node.handle.len() <= NFS4_FHSIZE);
    }
}
