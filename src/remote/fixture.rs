//! In-process drive backend served from a JSON description.
//!
//! `FixtureDrive` implements [`DriveService`] over a list of items and their
//! permissions. It paginates with opaque offset tokens over the items matching
//! the request's [`ItemQuery`], applies mutations to its own state, counts
//! calls, and can inject failures (per-item permission failures, seeded random
//! permission failures, listing interruption after N pages) so download,
//! resume and remediation runs can be rehearsed offline.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::errors::{DahError, Result};
use crate::remote::error::{FailureClass, RemoteError};
use crate::remote::query::ItemQuery;
use crate::remote::service::{DriveService, RemoteResult};
use crate::remote::types::{
    ListRequest, NewPermission, Page, Permission, RemoteItem, ROLE_OWNER,
};

/// Role given to a previous owner when ownership is transferred away.
const DEMOTED_OWNER_ROLE: &str = "writer";

/// On-disk description of a drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveFixture {
    /// Service-side cap on page size; requests asking for more get this many.
    pub max_page_size: Option<u32>,
    pub items: Vec<FixtureItem>,
}

/// One item plus its permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureItem {
    #[serde(flatten)]
    pub item: RemoteItem,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Call counters, exposed for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_pages: usize,
    pub permission_pages: usize,
    pub get_item: usize,
    pub mutations: usize,
}

struct FixtureState {
    max_page_size: u32,
    items: Vec<RemoteItem>,
    permissions: HashMap<String, Vec<Permission>>,
    next_permission_id: u64,
    permission_failures: HashMap<String, FailureClass>,
    random_failures: Option<(f64, StdRng)>,
    fail_listing_after: Option<usize>,
    permission_fetches: HashMap<String, usize>,
    calls: CallCounts,
}

/// Drive backend held entirely in memory.
pub struct FixtureDrive {
    state: Mutex<FixtureState>,
}

impl FixtureDrive {
    pub fn new(fixture: DriveFixture) -> Self {
        let mut items = Vec::with_capacity(fixture.items.len());
        let mut permissions = HashMap::new();
        for entry in fixture.items {
            permissions.insert(entry.item.id.clone(), entry.permissions);
            items.push(entry.item);
        }
        Self {
            state: Mutex::new(FixtureState {
                max_page_size: fixture.max_page_size.unwrap_or(1_000).max(1),
                items,
                permissions,
                next_permission_id: 1,
                permission_failures: HashMap::new(),
                random_failures: None,
                fail_listing_after: None,
                permission_fetches: HashMap::new(),
                calls: CallCounts::default(),
            }),
        }
    }

    /// Load a fixture from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| DahError::io(path, source))?;
        let fixture: DriveFixture = serde_json::from_str(&raw)?;
        Ok(Self::new(fixture))
    }

    /// Make every permission listing for `file_id` fail with `class`.
    pub fn fail_permissions_for(&self, file_id: &str, class: FailureClass) {
        self.state
            .lock()
            .permission_failures
            .insert(file_id.to_string(), class);
    }

    /// Stop failing permission listings for `file_id`.
    pub fn clear_permission_failure(&self, file_id: &str) {
        self.state.lock().permission_failures.remove(file_id);
    }

    /// Fail each permission listing with probability `rate`, reproducibly.
    pub fn fail_permissions_randomly(&self, rate: f64, seed: u64) {
        self.state.lock().random_failures =
            Some((rate.clamp(0.0, 1.0), StdRng::seed_from_u64(seed)));
    }

    /// Serve `pages` listing pages, then fail every further page request.
    pub fn fail_listing_after(&self, pages: Option<usize>) {
        let mut state = self.state.lock();
        let served = state.calls.list_pages;
        state.fail_listing_after = pages.map(|n| served + n);
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls.clone()
    }

    /// How many times the permissions of `file_id` were requested.
    pub fn permission_fetches(&self, file_id: &str) -> usize {
        self.state
            .lock()
            .permission_fetches
            .get(file_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.state.lock().items.iter().any(|item| item.id == file_id)
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Current state, in the on-disk form.
    pub fn snapshot(&self) -> DriveFixture {
        let state = self.state.lock();
        DriveFixture {
            max_page_size: Some(state.max_page_size),
            items: state
                .items
                .iter()
                .map(|item| FixtureItem {
                    item: item.clone(),
                    permissions: state.permissions.get(&item.id).cloned().unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Write the current state back to disk, so mutations outlive the process.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json).map_err(|source| DahError::io(path, source))
    }

    pub fn permissions_of(&self, file_id: &str) -> Vec<Permission> {
        self.state
            .lock()
            .permissions
            .get(file_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn not_found(file_id: &str) -> RemoteError {
    RemoteError::from_status(404, format!("file not found: {file_id}"))
}

fn parse_offset(token: Option<&str>) -> RemoteResult<usize> {
    match token {
        None => Ok(0),
        Some(raw) => raw
            .strip_prefix("offset:")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| RemoteError::from_status(400, format!("invalid page token {raw:?}"))),
    }
}

/// Slice `all` into the page starting at the request's token.
fn page_of<T: Clone>(all: &[T], request: &ListRequest, cap: u32) -> RemoteResult<Page<T>> {
    let start = parse_offset(request.page_token.as_deref())?;
    let size = request.page_size.clamp(1, cap) as usize;
    let end = start.saturating_add(size).min(all.len());
    let items = all.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let next = (end < all.len()).then(|| format!("offset:{end}"));
    Ok(Page::new(items, next))
}

impl FixtureState {
    fn item_exists(&self, file_id: &str) -> bool {
        self.items.iter().any(|item| item.id == file_id)
    }

    fn demote_owners(&mut self, file_id: &str, except: &str) {
        if let Some(perms) = self.permissions.get_mut(file_id) {
            for perm in perms.iter_mut() {
                if perm.role == ROLE_OWNER && perm.id != except {
                    perm.role = DEMOTED_OWNER_ROLE.to_string();
                }
            }
        }
    }
}

impl DriveService for FixtureDrive {
    fn list_items(&self, request: &ListRequest) -> RemoteResult<Page<RemoteItem>> {
        let mut state = self.state.lock();
        if state
            .fail_listing_after
            .is_some_and(|limit| state.calls.list_pages >= limit)
        {
            return Err(RemoteError::from_status(503, "listing interrupted"));
        }
        state.calls.list_pages += 1;
        match request.query.as_deref() {
            None => page_of(&state.items, request, state.max_page_size),
            Some(raw) => {
                let query = ItemQuery::parse(raw)?;
                let matching: Vec<RemoteItem> = state
                    .items
                    .iter()
                    .filter(|item| query.matches(item))
                    .cloned()
                    .collect();
                page_of(&matching, request, state.max_page_size)
            }
        }
    }

    fn list_permissions(
        &self,
        file_id: &str,
        request: &ListRequest,
    ) -> RemoteResult<Page<Permission>> {
        let mut state = self.state.lock();
        state.calls.permission_pages += 1;
        *state
            .permission_fetches
            .entry(file_id.to_string())
            .or_insert(0) += 1;

        if let Some(class) = state.permission_failures.get(file_id).copied() {
            return Err(RemoteError::new(
                class,
                format!("permission listing failed for {file_id}"),
            ));
        }
        if let Some((rate, rng)) = state.random_failures.as_mut()
            && rng.random_bool(*rate)
        {
            return Err(RemoteError::from_status(500, "injected failure"));
        }
        if !state.item_exists(file_id) {
            return Err(not_found(file_id));
        }

        let perms = state.permissions.get(file_id).cloned().unwrap_or_default();
        page_of(&perms, request, state.max_page_size)
    }

    fn get_item(&self, file_id: &str) -> RemoteResult<RemoteItem> {
        let mut state = self.state.lock();
        state.calls.get_item += 1;
        state
            .items
            .iter()
            .find(|item| item.id == file_id)
            .cloned()
            .ok_or_else(|| not_found(file_id))
    }

    fn update_permission(
        &self,
        file_id: &str,
        permission_id: &str,
        role: &str,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission> {
        let mut state = self.state.lock();
        state.calls.mutations += 1;
        if role == ROLE_OWNER && !transfer_ownership {
            return Err(RemoteError::from_status(
                403,
                "transferOwnership must be set to grant the owner role",
            ));
        }
        let updated = {
            let perm = state
                .permissions
                .get_mut(file_id)
                .and_then(|perms| perms.iter_mut().find(|p| p.id == permission_id))
                .ok_or_else(|| {
                    RemoteError::from_status(404, format!("permission not found: {permission_id}"))
                })?;
            perm.role = role.to_string();
            perm.clone()
        };
        if role == ROLE_OWNER {
            state.demote_owners(file_id, permission_id);
        }
        Ok(updated)
    }

    fn create_permission(
        &self,
        file_id: &str,
        permission: &NewPermission,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission> {
        let mut state = self.state.lock();
        state.calls.mutations += 1;
        if !state.item_exists(file_id) {
            return Err(not_found(file_id));
        }
        if permission.role == ROLE_OWNER && !transfer_ownership {
            return Err(RemoteError::from_status(
                403,
                "transferOwnership must be set to grant the owner role",
            ));
        }
        let id = format!("perm-{}", state.next_permission_id);
        state.next_permission_id += 1;
        let created = Permission {
            id: id.clone(),
            kind: permission.kind.clone(),
            role: permission.role.clone(),
            email_address: Some(permission.email_address.clone()),
        };
        state
            .permissions
            .entry(file_id.to_string())
            .or_default()
            .push(created.clone());
        if permission.role == ROLE_OWNER {
            state.demote_owners(file_id, &id);
        }
        Ok(created)
    }

    fn delete_permission(&self, file_id: &str, permission_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.mutations += 1;
        let perms = state
            .permissions
            .get_mut(file_id)
            .ok_or_else(|| not_found(file_id))?;
        let before = perms.len();
        perms.retain(|p| p.id != permission_id);
        if perms.len() == before {
            return Err(RemoteError::from_status(
                404,
                format!("permission not found: {permission_id}"),
            ));
        }
        Ok(())
    }

    fn delete_item(&self, file_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.mutations += 1;
        let before = state.items.len();
        state.items.retain(|item| item.id != file_id);
        if state.items.len() == before {
            return Err(not_found(file_id));
        }
        state.permissions.remove(file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::pager::{fetch_all_permissions, list_items};

    fn item(id: &str) -> FixtureItem {
        FixtureItem {
            item: RemoteItem {
                id: id.to_string(),
                name: Some(format!("{id}.txt")),
                parents: vec!["root".to_string()],
                size: Some(10),
                md5_checksum: Some(format!("md5-{id}")),
                trashed: false,
                mime_type: None,
            },
            permissions: vec![Permission {
                id: format!("{id}-owner"),
                kind: "user".to_string(),
                role: ROLE_OWNER.to_string(),
                email_address: Some("me@example.org".to_string()),
            }],
        }
    }

    fn drive(n: usize, max_page_size: u32) -> FixtureDrive {
        FixtureDrive::new(DriveFixture {
            max_page_size: Some(max_page_size),
            items: (0..n).map(|i| item(&format!("f{i}"))).collect(),
        })
    }

    #[test]
    fn saved_state_reloads_with_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drive.json");
        let drive = drive(3, 2);
        drive.delete_item("f1").unwrap();
        drive.save(&path).unwrap();

        let reloaded = FixtureDrive::from_path(&path).unwrap();
        assert_eq!(reloaded.item_count(), 2);
        assert!(!reloaded.contains("f1"));
        assert_eq!(reloaded.permissions_of("f2").len(), 1);
    }

    #[test]
    fn pages_respect_service_cap() {
        let drive = drive(5, 2);
        let all: Vec<_> = list_items(&drive, ListRequest::new(100))
            .map(std::result::Result::unwrap)
            .collect();
        assert_eq!(all.len(), 5);
        assert_eq!(drive.calls().list_pages, 3);
        assert_eq!(all[4].1.next_page_token, None);
        assert_eq!(all[0].1.next_page_token.as_deref(), Some("offset:2"));
    }

    #[test]
    fn query_filters_before_paging() {
        let drive = drive(5, 2);
        let request = ListRequest::new(2).with_query("name != 'f1.txt' and name != 'f3.txt'");
        let listed: Vec<_> = list_items(&drive, request)
            .map(std::result::Result::unwrap)
            .collect();
        let ids: Vec<_> = listed.iter().map(|(item, _)| item.id.as_str()).collect();
        assert_eq!(ids, ["f0", "f2", "f4"]);
        assert_eq!(listed[1].1.next_page_token.as_deref(), Some("offset:2"));
        assert_eq!(listed[2].1.next_page_token, None);
    }

    #[test]
    fn unknown_query_is_rejected_not_ignored() {
        let drive = drive(3, 10);
        let err = drive
            .list_items(&ListRequest::new(10).with_query("starred = true"))
            .unwrap_err();
        assert_eq!(err.class, FailureClass::InvalidRequest);
    }

    #[test]
    fn listing_interruption_fails_after_budget() {
        let drive = drive(6, 2);
        drive.fail_listing_after(Some(1));
        let results: Vec<_> = list_items(&drive, ListRequest::new(2)).collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }

    #[test]
    fn injected_permission_failure_is_classified() {
        let drive = drive(1, 10);
        drive.fail_permissions_for("f0", FailureClass::RateLimited);
        let err = fetch_all_permissions(&drive, "f0", 10).unwrap_err();
        assert_eq!(err.class, FailureClass::RateLimited);
        drive.clear_permission_failure("f0");
        assert_eq!(fetch_all_permissions(&drive, "f0", 10).unwrap().len(), 1);
        assert_eq!(drive.permission_fetches("f0"), 2);
    }

    #[test]
    fn seeded_random_failures_are_reproducible() {
        let outcomes = |seed| {
            let drive = drive(20, 10);
            drive.fail_permissions_randomly(0.5, seed);
            (0..20)
                .map(|i| fetch_all_permissions(&drive, &format!("f{i}"), 10).is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(outcomes(7), outcomes(7));
    }

    #[test]
    fn ownership_transfer_demotes_previous_owner() {
        let drive = drive(1, 10);
        let created = drive
            .create_permission("f0", &NewPermission::user(ROLE_OWNER, "new@example.org"), true)
            .unwrap();
        let perms = drive.permissions_of("f0");
        let owners: Vec<_> = perms.iter().filter(|p| p.role == ROLE_OWNER).collect();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].id, created.id);
    }

    #[test]
    fn owner_grant_without_transfer_is_rejected() {
        let drive = drive(1, 10);
        let err = drive
            .create_permission("f0", &NewPermission::user(ROLE_OWNER, "x@example.org"), false)
            .unwrap_err();
        assert_eq!(err.class, FailureClass::PermissionDenied);
    }

    #[test]
    fn delete_item_then_get_is_not_found() {
        let drive = drive(2, 10);
        drive.delete_item("f1").unwrap();
        assert!(!drive.contains("f1"));
        assert_eq!(
            drive.get_item("f1").unwrap_err().class,
            FailureClass::NotFound
        );
        assert_eq!(
            drive.delete_item("f1").unwrap_err().class,
            FailureClass::NotFound
        );
    }

    #[test]
    fn fixture_json_flattens_item_fields() {
        let raw = r#"{
            "max_page_size": 2,
            "items": [
                {"id": "a", "name": "A", "parents": ["root"], "size": 5,
                 "permissions": [{"id": "p1", "type": "user", "role": "owner",
                                  "emailAddress": "me@example.org"}]}
            ]
        }"#;
        let fixture: DriveFixture = serde_json::from_str(raw).unwrap();
        assert_eq!(fixture.items[0].item.size, Some(5));
        assert_eq!(fixture.items[0].permissions[0].role, "owner");
    }
}
