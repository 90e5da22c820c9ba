// src/core/context.rs
//
// Per-worker state bundle passed to handlers. Kept deliberately small
// and explicit rather than a process-wide singleton, per the design
// notes: handlers receive only what they need (config, the worker's
// captured effective uid for `TSI_PING_UID`) and nothing that would let
// a handler reach back into the identity-switch machinery itself.

use std::sync::Arc;

use crate::config::Config;

pub struct TsiContext {
    pub config: Arc<Config>,
    pub effective_uid: u32,
}
