//! Deleting redundant copies found by the dedup analysis.

use crate::analysis::integrity::DedupCandidate;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remediate::executor::Executor;
use crate::remote::error::FailureClass;
use crate::remote::service::DriveService;

/// Delete all but one member of each group.
///
/// Every member is re-fetched first. If the ids that still resolve differ
/// from the candidate set, the group is aborted untouched. Otherwise the
/// smallest id is kept and the rest are deleted.
pub fn execute_dedup<S: DriveService>(exec: &mut Executor<'_, S>, groups: &[DedupCandidate]) {
    for group in groups {
        if exec.should_halt() {
            break;
        }
        let Some(confirmed) = confirm_members(exec, group) else {
            continue;
        };

        let mut expected = group.ids.clone();
        expected.sort();
        if confirmed != expected || confirmed.len() < 2 {
            exec.abort_group(
                &group.path,
                format!("expected members {expected:?}, found {confirmed:?}; nothing deleted"),
            );
            continue;
        }

        for id in &confirmed[1..] {
            if exec.should_halt() {
                return;
            }
            exec.apply(
                LogEntry::info(EventType::ItemDeleted)
                    .item(id, None)
                    .path(group.path.clone())
                    .size(group.size),
                id,
                &format!("delete duplicate of {}", confirmed[0]),
                |s| s.delete_item(id),
            );
        }
    }
}

/// Sorted ids of the members that still exist, or `None` if a lookup failed
/// for any reason other than the item being gone.
fn confirm_members<S: DriveService>(
    exec: &mut Executor<'_, S>,
    group: &DedupCandidate,
) -> Option<Vec<String>> {
    let mut confirmed = Vec::with_capacity(group.ids.len());
    for id in &group.ids {
        match exec.service().get_item(id) {
            Ok(item) if !item.trashed => confirmed.push(item.id),
            Ok(_) => {}
            Err(e) if e.class == FailureClass::NotFound => {}
            Err(e) => {
                exec.record_failure(id, "confirm dedup member", &e);
                exec.abort_group(&group.path, format!("could not confirm {id}: {e}"));
                return None;
            }
        }
    }
    confirmed.sort();
    Some(confirmed)
}
