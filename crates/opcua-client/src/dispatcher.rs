//! Typed service dispatch: encode `TypeId ‖ request`, send, match the
//! response by type id, surface ServiceFault as an error.

use std::time::Duration;

use opcua_core::codec::{BinaryDecode, CodecError};
use opcua_core::types::DEFAULT_TIMEOUT_HINT_MS;

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::messages::{
    decode_type_id, encode_message, ServiceFault, ServiceRequest, ServiceResponse,
    SERVICE_FAULT_TYPE_ID,
};

/// Slack on top of the request's own timeoutHint before the local timer
/// abandons the waiter.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub(crate) struct ServiceDispatcher {
    connection: ConnectionHandle,
}

impl ServiceDispatcher {
    pub fn new(connection: ConnectionHandle) -> Self {
        ServiceDispatcher { connection }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// One typed round-trip. The caller has already stamped the request
    /// header; its timeoutHint doubles as the local timeout.
    pub async fn call<R, S>(&self, request: &R) -> Result<S>
    where
        R: ServiceRequest,
        S: ServiceResponse,
    {
        let hint = request.request_header().timeout_hint;
        let hint = if hint == 0 { DEFAULT_TIMEOUT_HINT_MS } else { hint };
        let timeout = Duration::from_millis(u64::from(hint)) + TIMEOUT_GRACE;

        let payload = encode_message(request);
        let response = self.connection.call_raw(payload, timeout).await?;

        let (type_id, mut reader) = decode_type_id(&response)?;
        if type_id == SERVICE_FAULT_TYPE_ID {
            let fault = ServiceFault::decode(&mut reader)?;
            tracing::debug!(
                status = %fault.response_header.service_result,
                service = std::any::type_name::<R>(),
                "service fault"
            );
            return Err(Error::Service(fault.response_header.service_result));
        }
        if type_id != S::TYPE_ID {
            return Err(CodecError::OutOfRange {
                field: "response type id",
            }
            .into());
        }

        let decoded = S::decode(&mut reader)?;
        let service_result = decoded.response_header().service_result;
        if service_result.is_bad() {
            return Err(Error::Service(service_result));
        }
        Ok(decoded)
    }
}
