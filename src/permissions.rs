//! Host permission capability.
//!
//! Desktop hosts grant Bluetooth access at the OS level, so the default
//! provider always succeeds. Mobile hosts plug in their own provider.

use async_trait::async_trait;

use crate::error::Result;

/// Makes sure the host has granted the Bluetooth permissions the scale needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Request or verify the permissions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] when the user refused.
    async fn ensure_authorized(&self) -> Result<()>;
}

/// Provider for hosts without a runtime permission prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAuthorized;

#[async_trait]
impl PermissionProvider for AlwaysAuthorized {
    async fn ensure_authorized(&self) -> Result<()> {
        Ok(())
    }
}
