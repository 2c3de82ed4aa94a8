//! Capability checks against CRM entities.

use crate::error::LinkError;
use crate::model::{ContactRef, Principal};

/// Decides whether a principal may see an entity.
pub trait AccessControl: Send + Sync {
    fn can_access(&self, principal: &Principal, entity: &ContactRef) -> Result<bool, LinkError>;
}

/// Grants every principal access to every entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn can_access(&self, _principal: &Principal, _entity: &ContactRef) -> Result<bool, LinkError> {
        Ok(true)
    }
}
