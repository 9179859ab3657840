// The response object the worker thread fills in and hands back through the
// user callback.

use crate::node::Node;

/// Result of one completed (or failed) transfer.
///
/// `node`/`prev_node` follow the etcd v2 convention: `node` is the post-op
/// state, `prev_node` (set for compare-and-swap-style updates) is the state
/// before. Both are `None` on error.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub http_code: Option<u32>,
    pub cluster_id: Option<String>,
    pub etcd_index: Option<i64>,
    pub raft_index: Option<i64>,
    pub raft_term: Option<i64>,
    pub action: Option<String>,
    pub node: Option<Node>,
    pub prev_node: Option<Node>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }
}
