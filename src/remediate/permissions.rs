//! Removing an account's direct access.

use crate::download::record::MetadataRecord;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remediate::executor::Executor;
use crate::remote::service::DriveService;

/// Delete every `user` permission naming `email` from each record's item.
///
/// Records without such a permission, or whose permissions were never
/// fetched, are skipped.
pub fn remove_permission<S, I>(exec: &mut Executor<'_, S>, records: I, email: &str)
where
    S: DriveService,
    I: IntoIterator<Item = MetadataRecord>,
{
    'records: for record in records {
        let targets: Vec<_> = record
            .permissions
            .iter()
            .filter(|p| p.is_user(email))
            .collect();
        if record.is_failed() || targets.is_empty() {
            exec.skip();
            continue;
        }
        for permission in targets {
            if exec.should_halt() {
                break 'records;
            }
            exec.apply(
                LogEntry::info(EventType::PermissionRemoved)
                    .item(&record.id, record.name.as_deref()),
                &record.id,
                &format!("delete {} permission {}", permission.role, permission.id),
                |s| s.delete_permission(&record.id, &permission.id),
            );
        }
    }
}
