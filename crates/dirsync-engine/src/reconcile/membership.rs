//! Group membership cycle pruning.
//!
//! Group records may list other groups as members. Within one batch the
//! membership graph is kept acyclic: edges are added in batch order and an
//! edge that would close a cycle is dropped.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use dirsync_core::{PrincipalKey, PrincipalKind, SourceId};
use dirsync_directory::RemoteRecord;

/// A membership edge dropped to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedEdge {
    /// Group whose member list was shortened.
    pub group: PrincipalKey,
    /// Member group that was removed.
    pub member: PrincipalKey,
}

/// Remove group-in-group edges that would create a cycle.
///
/// Records are visited in order. A later record for the same group replaces
/// the edges of the earlier one. Returns the dropped edges.
pub fn prune_cycles(source_id: &SourceId, records: &mut [RemoteRecord]) -> Vec<PrunedEdge> {
    let mut graph: HashMap<PrincipalKey, HashSet<PrincipalKey>> = HashMap::new();
    let mut pruned = Vec::new();

    for record in records.iter_mut() {
        if record.kind != PrincipalKind::Group {
            continue;
        }
        let group = record.key();
        graph.insert(group.clone(), HashSet::new());

        let mut kept = Vec::with_capacity(record.members.len());
        for member in record.members.drain(..) {
            if member.kind != PrincipalKind::Group {
                kept.push(member);
                continue;
            }
            let member_key = member.key();
            if reaches(&graph, &member_key, &group) {
                warn!(
                    source_id = %source_id,
                    group = %group,
                    member = %member_key,
                    "Dropping group membership that would create a cycle"
                );
                pruned.push(PrunedEdge {
                    group: group.clone(),
                    member: member_key,
                });
                continue;
            }
            graph
                .entry(group.clone())
                .or_default()
                .insert(member_key);
            kept.push(member);
        }
        record.members = kept;
    }

    pruned
}

fn reaches(
    graph: &HashMap<PrincipalKey, HashSet<PrincipalKey>>,
    from: &PrincipalKey,
    to: &PrincipalKey,
) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = graph.get(node) {
            stack.extend(next.iter());
        }
    }
    false
}
