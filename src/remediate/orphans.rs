//! Deleting parentless items nobody else can see.

use crate::analysis::integrity::Orphan;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remediate::executor::Executor;
use crate::remote::pager::fetch_all_permissions;
use crate::remote::service::DriveService;
use crate::remote::types::{Permission, ROLE_OWNER};

/// Delete orphans whose every permission is a `user` permission for `email`.
///
/// Permissions are re-read from the service before each decision; the saved
/// stream may be stale.
pub fn remove_orphans<S: DriveService>(exec: &mut Executor<'_, S>, orphans: &[Orphan], email: &str) {
    let page_size = exec.config().permission_page_size.max(1);
    for orphan in orphans {
        if exec.should_halt() {
            break;
        }
        let current = match fetch_all_permissions(exec.service(), &orphan.id, page_size) {
            Ok(perms) => perms,
            Err(e) => {
                exec.record_failure(&orphan.id, "read permissions", &e);
                continue;
            }
        };
        if !private_to(&current, email) {
            exec.skip();
            continue;
        }
        exec.apply(
            LogEntry::info(EventType::ItemDeleted)
                .item(&orphan.id, None)
                .path(orphan.path.clone())
                .size(orphan.size),
            &orphan.id,
            "delete orphan",
            |s| s.delete_item(&orphan.id),
        );
    }
}

/// Owned by `email` and shared with nobody else.
fn private_to(permissions: &[Permission], email: &str) -> bool {
    permissions.iter().any(|p| p.grants(ROLE_OWNER, email))
        && permissions.iter().all(|p| p.is_user(email))
}
