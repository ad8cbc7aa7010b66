//! Identity resolution from request context

use crate::error::{AuthzError, Result};
use crate::types::Identity;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What the surrounding request pipeline knows about a request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated principal, if any
    pub principal: Option<Identity>,

    /// Free-form request attributes (headers, session data, ...)
    pub attributes: Map<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: Identity) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Maps a request to the identity whose roles are checked
pub type IdentityFn = Arc<dyn Fn(&RequestContext) -> Result<Identity> + Send + Sync>;

/// Use the context principal; no principal is unauthenticated
pub fn principal_identity() -> IdentityFn {
    Arc::new(|ctx: &RequestContext| {
        ctx.principal
            .clone()
            .ok_or_else(|| AuthzError::Unauthenticated("No principal on request".to_string()))
    })
}
