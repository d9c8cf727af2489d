use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use super::{ACCESS_CONTROL, Filter, FilterFactory};
use crate::address::{Address, param};
use crate::contract::Request;
use crate::error::RpcError;
use crate::protocol::Invoker;

/// Comma-separated caller applications; `*` admits everyone.
pub const ALLOW_PARAM: &str = "access_control.allow";

#[derive(Debug, Default, Clone, Copy)]
pub struct AccessControlFilterFactory;

impl FilterFactory for AccessControlFilterFactory {
    fn create(&self, address: &Address) -> Result<Arc<dyn Filter>, RpcError> {
        let allowed: BTreeSet<String> = address
            .parameter(ALLOW_PARAM)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if allowed.is_empty() {
            return Err(RpcError::invalid_config(
                address.path(),
                format!("{ALLOW_PARAM} must list at least one application"),
            ));
        }
        Ok(Arc::new(AccessControlFilter { allowed }))
    }
}

struct AccessControlFilter {
    allowed: BTreeSet<String>,
}

impl AccessControlFilter {
    fn admits(&self, application: Option<&str>) -> bool {
        self.allowed.contains("*") || application.is_some_and(|app| self.allowed.contains(app))
    }
}

impl Filter for AccessControlFilter {
    fn name(&self) -> &str {
        ACCESS_CONTROL
    }

    fn filter(
        &self,
        _address: &Address,
        request: &Request,
        next: &dyn Invoker,
    ) -> Result<Value, RpcError> {
        let application = request.attachment(param::APPLICATION);
        if !self.admits(application) {
            tracing::warn!(
                interface = request.interface(),
                method = request.method(),
                application = application.unwrap_or("-"),
                "caller not allowed"
            );
            return Err(RpcError::Rejected {
                interface: request.interface().to_owned(),
                method: request.method().to_owned(),
                filter: ACCESS_CONTROL.to_owned(),
                reason: format!("application '{}' is not allowed", application.unwrap_or("")),
            });
        }
        next.call(request)
    }
}
