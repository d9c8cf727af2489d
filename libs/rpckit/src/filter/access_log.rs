use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::{ACCESS_LOG, Filter, FilterFactory};
use crate::address::{Address, param};
use crate::contract::Request;
use crate::error::RpcError;
use crate::protocol::Invoker;

/// Emits one `rpckit::access` event per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogFilterFactory;

impl FilterFactory for AccessLogFilterFactory {
    fn create(&self, _address: &Address) -> Result<Arc<dyn Filter>, RpcError> {
        Ok(Arc::new(AccessLogFilter))
    }
}

struct AccessLogFilter;

impl Filter for AccessLogFilter {
    fn name(&self) -> &str {
        ACCESS_LOG
    }

    fn filter(
        &self,
        address: &Address,
        request: &Request,
        next: &dyn Invoker,
    ) -> Result<Value, RpcError> {
        let started = Instant::now();
        let result = next.call(request);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let side = address.parameter_or(param::NODE_TYPE, param::NODE_TYPE_SERVICE);

        match &result {
            Ok(_) => tracing::info!(
                target: "rpckit::access",
                side,
                interface = request.interface(),
                method = request.method(),
                request_id = request.request_id(),
                application = request.attachment(param::APPLICATION).unwrap_or("-"),
                elapsed_ms,
                outcome = "ok",
                "rpc call"
            ),
            Err(e) => tracing::info!(
                target: "rpckit::access",
                side,
                interface = request.interface(),
                method = request.method(),
                request_id = request.request_id(),
                application = request.attachment(param::APPLICATION).unwrap_or("-"),
                elapsed_ms,
                outcome = "error",
                error = %e,
                "rpc call"
            ),
        }
        result
    }
}
