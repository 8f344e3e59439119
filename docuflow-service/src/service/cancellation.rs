//! Cancellation token management for in-flight transforms.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::service::DocumentService;

/// A token registered under a request id
pub(crate) struct RegisteredToken {
    /// Distinguishes a re-registration of the same request id
    registration: Uuid,
    token: CancellationToken,
}

/// Keeps a request id registered for as long as its transform runs.
///
/// Dropping the guard unregisters the id, including when the transform's
/// future is dropped before it completes. A guard only removes its own
/// registration, never a later one that reused the id.
pub(crate) struct TransformRegistration<'a> {
    tokens: &'a DashMap<String, RegisteredToken>,
    request_id: String,
    registration: Uuid,
    token: CancellationToken,
}

impl TransformRegistration<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TransformRegistration<'_> {
    fn drop(&mut self) {
        let removed = self
            .tokens
            .remove_if(&self.request_id, |_, registered| {
                registered.registration == self.registration
            })
            .is_some();
        if removed {
            debug!(request_id = %self.request_id, "Transform token released");
        }
    }
}

impl DocumentService {
    /// Register a cancellation token under a caller-supplied request id.
    pub(crate) fn register_transform_token(
        &self,
        request_id: &str,
    ) -> ServiceResult<TransformRegistration<'_>> {
        match self.transform_tokens.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(ServiceError::InvalidRequest {
                message: format!("Transform request {request_id} is already running"),
            }),
            Entry::Vacant(slot) => {
                let registration = Uuid::new_v4();
                let token = CancellationToken::new();
                slot.insert(RegisteredToken {
                    registration,
                    token: token.clone(),
                });
                Ok(TransformRegistration {
                    tokens: &self.transform_tokens,
                    request_id: request_id.to_string(),
                    registration,
                    token,
                })
            }
        }
    }

    /// Cancel a running transform. Returns false if no such request is running.
    pub fn cancel_transform(&self, request_id: &str) -> bool {
        if let Some((_, registered)) = self.transform_tokens.remove(request_id) {
            registered.token.cancel();
            info!(request_id = %request_id, "Transform cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Number of request ids currently registered
    #[cfg(test)]
    pub(crate) fn running_transforms(&self) -> usize {
        self.transform_tokens.len()
    }
}
