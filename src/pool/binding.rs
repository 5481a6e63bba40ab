//! Association between one in-flight request and the proxy serving it
//!
//! A binding is an owned value handed from selection to outcome recording,
//! so attribution never depends on which task or thread the response is
//! handled on. The client settles it exactly once after classification.

use tracing::debug;

use crate::models::ProxyDescriptor;

/// The proxy chosen for one outbound attempt
#[derive(Debug)]
pub struct RequestBinding {
    proxy: ProxyDescriptor,
    host: String,
    settled: bool,
}

impl RequestBinding {
    pub(crate) fn new(proxy: ProxyDescriptor, host: impl Into<String>) -> Self {
        Self {
            proxy,
            host: host.into(),
            settled: false,
        }
    }

    pub fn proxy_id(&self) -> i64 {
        self.proxy.id
    }

    /// Destination host of the bound request
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy state as of selection
    pub fn proxy(&self) -> &ProxyDescriptor {
        &self.proxy
    }

    /// Release the binding once its outcome has been recorded
    pub fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for RequestBinding {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                proxy_id = self.proxy.id,
                host = %self.host,
                "Request binding released without a recorded outcome"
            );
        }
    }
}
