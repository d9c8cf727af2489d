//! Cross-cutting interception around providers and referers.
//!
//! Filters are named capabilities (`dyn FilterFactory`) listed in the
//! Address's `filter` parameter. The chain runs them in listed order, each
//! one deciding whether and how to call the next.

mod access_control;
mod access_log;
mod rate_limit;

pub use access_control::{AccessControlFilterFactory, ALLOW_PARAM};
pub use access_log::AccessLogFilterFactory;
pub use rate_limit::{BURST_PARAM, QPS_PARAM, RateLimitFilterFactory};

use std::sync::Arc;

use serde_json::Value;

use crate::address::{Address, param};
use crate::capability::CapabilityHub;
use crate::contract::Request;
use crate::error::RpcError;
use crate::protocol::Invoker;

pub const ACCESS_LOG: &str = "access_log";
pub const RATE_LIMIT: &str = "rate_limit";
pub const ACCESS_CONTROL: &str = "access_control";

pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Runs around `next`. `address` is the Address of the wrapped target.
    ///
    /// # Errors
    /// A refusal, or whatever `next` reports.
    fn filter(&self, address: &Address, request: &Request, next: &dyn Invoker)
    -> Result<Value, RpcError>;
}

pub trait FilterFactory: Send + Sync {
    /// Builds a filter configured from the Address it will guard.
    ///
    /// # Errors
    /// When the Address carries invalid filter settings.
    fn create(&self, address: &Address) -> Result<Arc<dyn Filter>, RpcError>;
}

/// Ordered filters in front of a single target.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|x| x.name()))
            .finish()
    }
}

impl FilterChain {
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Resolves every name in the Address's `filter` parameter.
    ///
    /// # Errors
    /// Unknown filter names and invalid filter settings.
    pub fn from_address(hub: &CapabilityHub, address: &Address) -> Result<Self, RpcError> {
        let names = address.parameter(param::FILTER).unwrap_or_default();
        let mut filters = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let factory = hub.resolve::<dyn FilterFactory>(name)?;
            filters.push(factory.create(address)?);
        }
        Ok(Self { filters })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Runs the request through every filter and finally into `target`.
    ///
    /// # Errors
    /// Whatever a filter or the target reports.
    pub fn invoke(&self, target: &dyn Invoker, request: &Request) -> Result<Value, RpcError> {
        Next {
            filters: &self.filters,
            target,
        }
        .call(request)
    }
}

struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    target: &'a dyn Invoker,
}

impl Invoker for Next<'_> {
    fn address(&self) -> &Address {
        self.target.address()
    }

    fn call(&self, request: &Request) -> Result<Value, RpcError> {
        match self.filters.split_first() {
            Some((first, rest)) => first.filter(
                self.target.address(),
                request,
                &Next {
                    filters: rest,
                    target: self.target,
                },
            ),
            None => self.target.call(request),
        }
    }
}
