//! Derived conversation sessions: bursts separated by idle gaps.

use crate::error::Result;
use crate::store::Store;
use crate::types::SessionBounds;

use super::{QueryOpts, scan_messages};

/// Session derivation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SessionParams {
    /// A new session starts when the gap to the previous message exceeds
    /// this many seconds (default: 1800)
    pub idle_threshold: i64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            idle_threshold: 1800,
        }
    }
}

/// Partitions the window's messages into sessions.
///
/// Computed on demand from the message stream; ids are sequential within
/// the result.
pub fn sessions(
    store: &Store,
    corpus_id: &str,
    opts: &QueryOpts,
    params: SessionParams,
) -> Result<Vec<SessionBounds>> {
    let mut out: Vec<SessionBounds> = Vec::new();

    scan_messages(store, corpus_id, opts, |row| {
        match out.last_mut() {
            Some(current) if row.ts - current.end_ts <= params.idle_threshold => {
                current.end_ts = row.ts;
            }
            _ => {
                out.push(SessionBounds {
                    id: out.len() as i64 + 1,
                    start_ts: row.ts,
                    end_ts: row.ts,
                    first_message_id: row.id,
                });
            }
        }
        Ok(())
    })?;

    Ok(out)
}
