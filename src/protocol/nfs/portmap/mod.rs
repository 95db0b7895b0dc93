//! Embedded RPCBIND service (RFC 1833) answering NULL, SET, UNSET, GETPORT
//! and DUMP on versions 2 through 4.
//!
//! The registry is an injected object, not a global: the adapter registers
//! its own programs on start and unregisters them on stop, and external
//! services could do the same through SET/UNSET.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;

use num_traits::FromPrimitive;
use tracing::debug;

use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::portmap::{mapping, PortmapProgram};
use crate::protocol::xdr::{deserialize, Serialize};

/// Program/version to port registry.
pub struct PortmapRegistry {
    entries: Mutex<BTreeMap<(u32, u32, u32), u32>>,
}

impl PortmapRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(BTreeMap::new()) }
    }

    /// Registers a binding. Existing bindings are not overwritten, matching
    /// rpcbind SET semantics; returns whether the binding was installed.
    pub fn set(&self, prog: u32, vers: u32, prot: u32, port: u32) -> bool {
        let mut entries = self.entries.lock().expect("portmap lock");
        match entries.entry((prog, vers, prot)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(port);
                true
            }
        }
    }

    /// Removes all protocols' bindings for (prog, vers).
    pub fn unset(&self, prog: u32, vers: u32) -> bool {
        let mut entries = self.entries.lock().expect("portmap lock");
        let before = entries.len();
        entries.retain(|(p, v, _), _| !(*p == prog && *v == vers));
        entries.len() != before
    }

    pub fn get_port(&self, prog: u32, vers: u32, prot: u32) -> u32 {
        let entries = self.entries.lock().expect("portmap lock");
        if let Some(port) = entries.get(&(prog, vers, prot)) {
            return *port;
        }
        // Fall back to any version of the program on the same protocol,
        // mirroring rpcbind's lenient lookup for version-agnostic clients.
        entries
            .iter()
            .find(|((p, _, pr), _)| *p == prog && *pr == prot)
            .map(|(_, port)| *port)
            .unwrap_or(0)
    }

    pub fn dump(&self) -> Vec<mapping> {
        self.entries
            .lock()
            .expect("portmap lock")
            .iter()
            .map(|((prog, vers, prot), port)| mapping {
                prog: *prog,
                vers: *vers,
                prot: *prot,
                port: *port,
            })
            .collect()
    }
}

impl Default for PortmapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes one portmap call.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    use PortmapProgram::*;
    match PortmapProgram::from_u32(proc).unwrap_or(PortmapProgram::INVALID) {
        PMAPPROC_NULL => Ok(()),
        PMAPPROC_SET => {
            let map = deserialize::<mapping>(input)?;
            debug!(xid = ctx.xid, ?map, "pmapproc_set");
            let ok = ctx.deps.portmap.set(map.prog, map.vers, map.prot, map.port);
            ok.serialize(output)?;
            Ok(())
        }
        PMAPPROC_UNSET => {
            let map = deserialize::<mapping>(input)?;
            debug!(xid = ctx.xid, ?map, "pmapproc_unset");
            let ok = ctx.deps.portmap.unset(map.prog, map.vers);
            ok.serialize(output)?;
            Ok(())
        }
        PMAPPROC_GETPORT => {
            let map = deserialize::<mapping>(input)?;
            let port = ctx.deps.portmap.get_port(map.prog, map.vers, map.prot);
            debug!(xid = ctx.xid, ?map, port, "pmapproc_getport");
            port.serialize(output)?;
            Ok(())
        }
        PMAPPROC_DUMP => {
            for map in ctx.deps.portmap.dump() {
                true.serialize(output)?;
                map.serialize(output)?;
            }
            false.serialize(output)?;
            Ok(())
        }
        PMAPPROC_CALLIT | INVALID => {
            Err(HandlerError::System(format!("portmap procedure {proc} routed past table")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::portmap::IPPROTO_TCP;

    #[test]
    fn set_does_not_overwrite_existing_binding() {
        let registry = PortmapRegistry::new();
        assert!(registry.set(100003, 3, IPPROTO_TCP, 2049));
        assert!(!registry.set(100003, 3, IPPROTO_TCP, 3049));
        assert_eq!(registry.get_port(100003, 3, IPPROTO_TCP), 2049);
    }

    #[test]
    fn unset_clears_all_protocols_for_version() {
        let registry = PortmapRegistry::new();
        registry.set(100021, 4, IPPROTO_TCP, 2049);
        assert!(registry.unset(100021, 4));
        assert_eq!(registry.get_port(100021, 4, IPPROTO_TCP), 0);
        assert!(!registry.unset(100021, 4));
    }

    #[test]
    fn getport_falls_back_across_versions() {
        let registry = PortmapRegistry::new();
        registry.set(100003, 3, IPPROTO_TCP, 2049);
        assert_eq!(registry.get_port(100003, 4, IPPROTO_TCP), 2049);
    }

    #[test]
    fn dump_lists_registrations_in_order() {
        let registry = PortmapRegistry::new();
        registry.set(100005, 3, IPPROTO_TCP, 2049);
        registry.set(100003, 3, IPPROTO_TCP, 2049);
        let mappings = registry.dump();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].prog, 100003);
        assert_eq!(mappings[1].prog, 100005);
    }
}
