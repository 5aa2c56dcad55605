use std::ops::Deref;
use std::sync::Arc;

use axum::extract::FromRef;

use crate::registry::Registry;

pub struct InnerAdminContext {
    pub(crate) registry: Arc<Registry>,
}

#[derive(Clone, FromRef)]
pub struct AdminContext(pub(crate) Arc<InnerAdminContext>);

impl Deref for AdminContext {
    type Target = InnerAdminContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AdminContext {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self(Arc::new(InnerAdminContext { registry }))
    }
}
