//! The remote drive service boundary.
//!
//! Everything the crate needs from the remote side is expressed through
//! [`DriveService`]. Transport, authentication and wire encoding live behind
//! implementations of this trait; the crate ships [`FixtureDrive`] for offline
//! runs and tests.
//!
//! [`FixtureDrive`]: crate::remote::fixture::FixtureDrive

use crate::remote::error::RemoteError;
use crate::remote::types::{ListRequest, NewPermission, Page, Permission, RemoteItem};

/// Result alias for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Request/response operations offered by the remote drive.
///
/// All calls are synchronous and may fail with a classified [`RemoteError`].
/// Mutations take `&self`; implementations own whatever interior state they need.
pub trait DriveService {
    /// List one page of items visible to the account.
    fn list_items(&self, request: &ListRequest) -> RemoteResult<Page<RemoteItem>>;

    /// List one page of permissions on `file_id`.
    fn list_permissions(
        &self,
        file_id: &str,
        request: &ListRequest,
    ) -> RemoteResult<Page<Permission>>;

    /// Fetch the attributes of a single item.
    fn get_item(&self, file_id: &str) -> RemoteResult<RemoteItem>;

    /// Change the role of an existing permission.
    fn update_permission(
        &self,
        file_id: &str,
        permission_id: &str,
        role: &str,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission>;

    /// Add a permission to an item.
    fn create_permission(
        &self,
        file_id: &str,
        permission: &NewPermission,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission>;

    /// Remove a permission from an item.
    fn delete_permission(&self, file_id: &str, permission_id: &str) -> RemoteResult<()>;

    /// Delete an item.
    fn delete_item(&self, file_id: &str) -> RemoteResult<()>;
}

impl<S: DriveService + ?Sized> DriveService for &S {
    fn list_items(&self, request: &ListRequest) -> RemoteResult<Page<RemoteItem>> {
        (**self).list_items(request)
    }

    fn list_permissions(
        &self,
        file_id: &str,
        request: &ListRequest,
    ) -> RemoteResult<Page<Permission>> {
        (**self).list_permissions(file_id, request)
    }

    fn get_item(&self, file_id: &str) -> RemoteResult<RemoteItem> {
        (**self).get_item(file_id)
    }

    fn update_permission(
        &self,
        file_id: &str,
        permission_id: &str,
        role: &str,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission> {
        (**self).update_permission(file_id, permission_id, role, transfer_ownership)
    }

    fn create_permission(
        &self,
        file_id: &str,
        permission: &NewPermission,
        transfer_ownership: bool,
    ) -> RemoteResult<Permission> {
        (**self).create_permission(file_id, permission, transfer_ownership)
    }

    fn delete_permission(&self, file_id: &str, permission_id: &str) -> RemoteResult<()> {
        (**self).delete_permission(file_id, permission_id)
    }

    fn delete_item(&self, file_id: &str) -> RemoteResult<()> {
        (**self).delete_item(file_id)
    }
}
