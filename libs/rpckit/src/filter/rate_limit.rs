use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;

use super::{Filter, FilterFactory, RATE_LIMIT};
use crate::address::Address;
use crate::contract::Request;
use crate::error::RpcError;
use crate::protocol::Invoker;

/// Sustained calls per second. Required.
pub const QPS_PARAM: &str = "rate_limit.qps";
/// Burst size; defaults to the qps value.
pub const BURST_PARAM: &str = "rate_limit.burst";

/// One direct limiter per guarded target.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateLimitFilterFactory;

impl FilterFactory for RateLimitFilterFactory {
    fn create(&self, address: &Address) -> Result<Arc<dyn Filter>, RpcError> {
        let qps = read_non_zero(address, QPS_PARAM)?.ok_or_else(|| {
            RpcError::invalid_config(address.path(), format!("{QPS_PARAM} is required"))
        })?;
        let burst = read_non_zero(address, BURST_PARAM)?.unwrap_or(qps);
        let limiter = RateLimiter::direct(Quota::per_second(qps).allow_burst(burst));
        Ok(Arc::new(RateLimitFilter { limiter }))
    }
}

fn read_non_zero(address: &Address, key: &str) -> Result<Option<NonZeroU32>, RpcError> {
    address
        .parameter(key)
        .map(|raw| {
            raw.trim()
                .parse::<NonZeroU32>()
                .map_err(|_| RpcError::invalid_config(address.path(), format!("{key} must be a positive integer, got '{raw}'")))
        })
        .transpose()
}

struct RateLimitFilter {
    limiter: DefaultDirectRateLimiter,
}

impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        RATE_LIMIT
    }

    fn filter(
        &self,
        _address: &Address,
        request: &Request,
        next: &dyn Invoker,
    ) -> Result<Value, RpcError> {
        if self.limiter.check().is_err() {
            tracing::debug!(
                interface = request.interface(),
                method = request.method(),
                "call rejected by rate limit"
            );
            return Err(RpcError::Rejected {
                interface: request.interface().to_owned(),
                method: request.method().to_owned(),
                filter: RATE_LIMIT.to_owned(),
                reason: "rate limit exceeded".to_owned(),
            });
        }
        next.call(request)
    }
}
