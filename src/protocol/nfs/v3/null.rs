//! NULL procedure: no arguments, no results.

use crate::protocol::rpc::context::HandlerResult;

pub fn nfsproc3_null(_output: &mut Vec<u8>) -> HandlerResult {
    Ok(())
}
