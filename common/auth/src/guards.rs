use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};

/// Confirm the decoded claims grant a required permission.
///
/// An absent or empty permission set and a missing grant are distinct 403s so
/// operators can tell a misconfigured role apart from an insufficient one.
pub fn ensure_permission(permission: &str, claims: &Claims) -> AuthResult<()> {
    if claims.permissions.is_empty() {
        return Err(AuthError::NoPermissionsInClaims);
    }

    if !claims.has_permission(permission) {
        return Err(AuthError::PermissionDenied(permission.to_string()));
    }

    Ok(())
}
