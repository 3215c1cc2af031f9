use std::collections::BTreeSet;

/// An authenticated caller and the roles already resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub roles: Vec<String>,
}

/// Per-request permission decision, computed upstream and threaded through
/// every engine call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated principal, if the request is authenticated.
    pub principal: Option<Principal>,
    /// Master-key style access: internal fields, raw expressions and
    /// unscoped reads/writes are allowed.
    pub privileged: bool,
    /// Fields this caller may neither read nor filter on.
    pub protected_fields: BTreeSet<String>,
    /// Distributed trace identifier for observability.
    pub trace_id: String,
}

impl RequestContext {
    #[must_use]
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_protected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_protected(&self, field: &str) -> bool {
        !self.privileged && self.protected_fields.contains(field)
    }

    /// ACL subjects this caller acts as; `None` when privileged (no scoping).
    #[must_use]
    pub fn acl_scope(&self) -> Option<Vec<String>> {
        if self.privileged {
            return None;
        }
        let mut scope = vec!["*".to_string()];
        if let Some(principal) = &self.principal {
            scope.push(principal.id.clone());
            scope.extend(principal.roles.iter().map(|r| format!("role:{r}")));
        }
        Some(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_has_no_scope() {
        assert_eq!(RequestContext::privileged().acl_scope(), None);
    }

    #[test]
    fn principal_scope_includes_roles() {
        let ctx = RequestContext::for_principal(Principal {
            id: "u1".to_string(),
            roles: vec!["admin".to_string()],
        });
        assert_eq!(
            ctx.acl_scope(),
            Some(vec!["*".to_string(), "u1".to_string(), "role:admin".to_string()])
        );
    }

    #[test]
    fn protected_fields_ignored_when_privileged() {
        let mut ctx = RequestContext::anonymous().with_protected_fields(["email"]);
        assert!(ctx.is_protected("email"));
        ctx.privileged = true;
        assert!(!ctx.is_protected("email"));
    }
}
