use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Input for invoking a named function on a field device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFunctionInput {
    pub device_id: String,
    pub function_name: String,
    pub argument: String,
}

/// Successful response from a device function call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFunctionOutput {
    /// Integer returned by the device function, when reported
    pub return_value: Option<i64>,
}

/// Remote control plane for field devices.
///
/// Implementations return `DeviceControlError` when the device rejects or
/// cannot be reached, and `AuthError` when the control plane refuses the
/// credentials.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceController: Send + Sync {
    async fn call_function(&self, input: CallFunctionInput) -> DomainResult<CallFunctionOutput>;
}

/// Receives the signal that a device has just come online
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceReachabilityListener: Send + Sync {
    async fn on_device_reachable(&self, device_id: &str);
}
