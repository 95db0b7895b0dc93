//! NFSv4.0 / 4.1: the compound engine, state manager and supporting
//! machinery. The protocol has two procedures — NULL and COMPOUND — and
//! everything interesting happens inside the latter.

pub mod acl;
pub mod compound;
pub mod delegation;
pub mod ops;
pub mod pseudofs;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

use std::io::Read;

use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};

/// NULL procedure number.
pub const PROC_NULL: u32 = 0;
/// COMPOUND procedure number; every other number is PROC_UNAVAIL.
pub const PROC_COMPOUND: u32 = 1;

/// Routes one NFSv4 call.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    match proc {
        PROC_NULL => Ok(()),
        PROC_COMPOUND => compound::execute(input, output, ctx).await,
        other => Err(HandlerError::System(format!("v4 procedure {other} routed past table"))),
    }
}
