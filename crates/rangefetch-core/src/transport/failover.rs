//! Ordered fallback across candidate upstream routes.

use std::sync::Arc;

use crate::error::{FetchError, FetchResult};
use crate::message::{clone_request, FetchRequest, FetchResponse};
use crate::sync_get::Fetch;

struct Route {
    name: String,
    transport: Arc<dyn Fetch>,
}

/// Tries each route in order until one completes a round trip.
///
/// Any answer counts as completed, error statuses included; only transport
/// failures move on to the next route.
#[derive(Default)]
pub struct FailoverTransport {
    routes: Vec<Route>,
}

impl FailoverTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, name: impl Into<String>, transport: Arc<dyn Fetch>) -> Self {
        self.routes.push(Route {
            name: name.into(),
            transport,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Fetch for FailoverTransport {
    fn fetch(&self, req: FetchRequest) -> FetchResult<FetchResponse> {
        for route in &self.routes {
            match route.transport.fetch(clone_request(&req)) {
                Ok(res) => return Ok(res),
                Err(e) => {
                    tracing::warn!("route {} failed for {}: {}", route.name, req.uri(), e);
                }
            }
        }
        Err(FetchError::NoUpstreamRoute {
            target: req.uri().to_string(),
            candidates: self.routes.len(),
        })
    }
}
