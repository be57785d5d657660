//! Ownership transfer between two accounts.

use crate::download::record::MetadataRecord;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remediate::executor::Executor;
use crate::remote::service::DriveService;
use crate::remote::types::{NewPermission, ROLE_OWNER};

/// For every record owned by `from`, make `to` the owner.
///
/// An existing `user` permission for `to` is promoted; otherwise a new owner
/// permission is created. Records whose permissions were never fetched, or
/// that `to` already owns, are skipped.
pub fn transfer_ownership<S, I>(exec: &mut Executor<'_, S>, records: I, from: &str, to: &str)
where
    S: DriveService,
    I: IntoIterator<Item = MetadataRecord>,
{
    for record in records {
        if exec.should_halt() {
            break;
        }
        if record.is_failed()
            || !record.permissions.iter().any(|p| p.grants(ROLE_OWNER, from))
            || record.permissions.iter().any(|p| p.grants(ROLE_OWNER, to))
        {
            exec.skip();
            continue;
        }

        let entry = || {
            LogEntry::info(EventType::PermissionUpdated).item(&record.id, record.name.as_deref())
        };
        match record.permissions.iter().find(|p| p.is_user(to)) {
            Some(existing) => {
                exec.apply(entry(), &record.id, "promote to owner", |s| {
                    s.update_permission(&record.id, &existing.id, ROLE_OWNER, true)
                });
            }
            None => {
                let grant = NewPermission::user(ROLE_OWNER, to);
                exec.apply(
                    LogEntry::info(EventType::PermissionCreated)
                        .item(&record.id, record.name.as_deref()),
                    &record.id,
                    "create owner permission",
                    |s| s.create_permission(&record.id, &grant, true),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::activity::ActivityLoggerHandle;
    use crate::remediate::executor::RemediationConfig;
    use crate::remote::fixture::{DriveFixture, FixtureDrive, FixtureItem};
    use crate::remote::pager::PagePosition;
    use crate::remote::types::{Permission, RemoteItem};

    fn perm(id: &str, role: &str, email: &str) -> Permission {
        Permission {
            id: id.to_string(),
            kind: "user".to_string(),
            role: role.to_string(),
            email_address: Some(email.to_string()),
        }
    }

    fn fixture_item(id: &str, permissions: Vec<Permission>) -> FixtureItem {
        FixtureItem {
            item: RemoteItem {
                id: id.to_string(),
                name: Some(format!("{id}.txt")),
                parents: vec!["root".to_string()],
                size: Some(1),
                md5_checksum: None,
                trashed: false,
                mime_type: None,
            },
            permissions,
        }
    }

    fn records(drive: &FixtureDrive, ids: &[&str]) -> Vec<MetadataRecord> {
        ids.iter()
            .map(|id| {
                let item = drive.get_item(id).unwrap();
                MetadataRecord::from_item(item, PagePosition::default(), Ok(drive.permissions_of(id)))
            })
            .collect()
    }

    #[test]
    fn promotes_existing_permission_or_creates_one() {
        let drive = FixtureDrive::new(DriveFixture {
            max_page_size: None,
            items: vec![
                fixture_item(
                    "a",
                    vec![perm("p1", "owner", "old@x.org"), perm("p2", "writer", "new@x.org")],
                ),
                fixture_item("b", vec![perm("p3", "owner", "old@x.org")]),
                fixture_item("c", vec![perm("p4", "owner", "other@x.org")]),
            ],
        });
        let recs = records(&drive, &["a", "b", "c"]);

        let mut exec = Executor::new(
            "transfer-ownership",
            &drive,
            RemediationConfig::default(),
            ActivityLoggerHandle::disabled(),
            None,
        );
        transfer_ownership(&mut exec, recs, "old@x.org", "new@x.org");
        let report = exec.finish();

        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        for id in ["a", "b"] {
            let perms = drive.permissions_of(id);
            assert!(perms.iter().any(|p| p.grants(ROLE_OWNER, "new@x.org")), "{id}");
            assert!(!perms.iter().any(|p| p.grants(ROLE_OWNER, "old@x.org")), "{id}");
        }
        assert_eq!(drive.permissions_of("a").len(), 2);
    }

    #[test]
    fn failed_records_are_skipped() {
        let drive = FixtureDrive::new(DriveFixture {
            max_page_size: None,
            items: vec![fixture_item("a", vec![perm("p1", "owner", "old@x.org")])],
        });
        let mut rec = records(&drive, &["a"]).remove(0);
        rec.permissions.clear();
        rec.error = Some(crate::remote::error::FailureClass::Server);

        let mut exec = Executor::new(
            "transfer-ownership",
            &drive,
            RemediationConfig::default(),
            ActivityLoggerHandle::disabled(),
            None,
        );
        transfer_ownership(&mut exec, vec![rec], "old@x.org", "new@x.org");
        let report = exec.finish();
        assert_eq!(report.skipped, 1);
        assert_eq!(drive.calls().mutations, 0);
    }
}
