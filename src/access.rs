use crate::error::{Error, Result};
use crate::types::{AccessKey, Collaborator, Permission};

/// Placeholder shown instead of the secret key material in listings.
pub const HIDDEN_KEY_NAME: &str = "(hidden)";

/// Fails unless `account_id` holds at least `required` on the app.
pub fn require_permission(
    collaborators: &[Collaborator],
    account_id: &str,
    required: Permission,
) -> Result<()> {
    let Some(membership) = collaborators.iter().find(|c| c.account_id == account_id) else {
        return Err(Error::Forbidden);
    };

    if membership.permission.satisfies(required) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

#[must_use]
pub fn is_owner(collaborators: &[Collaborator], account_id: &str) -> bool {
    collaborators
        .iter()
        .any(|c| c.account_id == account_id && c.permission == Permission::Owner)
}

/// Replaces the secret token with a placeholder before a key leaves the
/// server.
#[must_use]
pub fn mask_access_key(mut key: AccessKey) -> AccessKey {
    key.name = HIDDEN_KEY_NAME.to_string();
    key
}
