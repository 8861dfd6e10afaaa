//! Lifecycle request and response envelopes
//!
//! Wire shapes follow the orchestrator's custom-resource protocol: PascalCase
//! keys, `SUCCESS`/`FAILED` status strings, and a flat string map of output
//! attributes.

mod properties;

pub use properties::Properties;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::PhysicalId;

/// Property naming an explicit physical id seed
pub const PHYSICAL_ID_PROPERTY: &str = "PhysicalId";
/// Property naming the handler function, used as a seed when present
pub const FUNCTION_NAME_PROPERTY: &str = "FunctionName";
/// Property requesting a deliberate Create failure
pub const FAIL_CREATE_PROPERTY: &str = "FailCreate";

/// Lifecycle operation requested by the orchestrator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RequestType {
    /// First-time provisioning
    Create,
    /// Property change on an existing resource
    Update,
    /// Removal of an existing resource
    Delete,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// Request envelope delivered by the orchestrator
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRequest {
    /// Create, Update, or Delete
    pub request_type: RequestType,
    /// Declared resource type, used for routing
    #[serde(rename = "ResourceType")]
    pub resource_kind: String,
    /// Current resource properties
    #[serde(default)]
    pub resource_properties: Properties,
    /// Previous resource properties (Update only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Properties>,
    /// Physical id assigned on Create (Update/Delete only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    /// Owning stack
    pub stack_id: String,
    /// Unique id of this attempt
    pub request_id: String,
    /// Logical name of the resource within the stack
    pub logical_resource_id: String,
    /// Where the response must be delivered
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    /// Handler address the orchestrator invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
}

impl LifecycleRequest {
    /// Correlation fields echoed back in the response
    pub fn correlation(&self) -> Correlation {
        Correlation {
            stack_id: self.stack_id.clone(),
            request_id: self.request_id.clone(),
            logical_resource_id: self.logical_resource_id.clone(),
            response_url: Some(self.response_url.clone()),
            physical_resource_id: self.physical_resource_id.clone(),
        }
    }

    /// Resolve the physical id for this request
    ///
    /// Update and Delete reuse the id the orchestrator sends. Create derives
    /// one from the first seed present: the `PhysicalId` property, the
    /// `FunctionName` property, the handler's natural name property, and
    /// finally the stack and logical id.
    pub fn resolve_physical_id(&self, name_property: Option<&str>) -> PhysicalId {
        if let Some(existing) = self
            .physical_resource_id
            .as_deref()
            .filter(|id| !id.is_empty())
        {
            return PhysicalId::from(existing);
        }

        let props = &self.resource_properties;
        let seed = props
            .get_str(PHYSICAL_ID_PROPERTY)
            .or_else(|| props.get_str(FUNCTION_NAME_PROPERTY))
            .or_else(|| name_property.and_then(|key| props.get_str(key)))
            .unwrap_or_else(|| format!("{}/{}", self.stack_id, self.logical_resource_id));

        PhysicalId::derive(&seed)
    }
}

/// Correlation fields of a request, recoverable even from malformed envelopes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Correlation {
    /// Owning stack
    pub stack_id: String,
    /// Unique id of the attempt
    pub request_id: String,
    /// Logical name of the resource
    pub logical_resource_id: String,
    /// Where the response must be delivered, if known
    pub response_url: Option<String>,
    /// Physical id sent with the request, if any
    pub physical_resource_id: Option<String>,
}

impl Correlation {
    /// Best-effort extraction from an untyped envelope
    pub fn salvage(raw: &Value) -> Self {
        let field = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            stack_id: field("StackId").unwrap_or_default(),
            request_id: field("RequestId").unwrap_or_default(),
            logical_resource_id: field("LogicalResourceId").unwrap_or_default(),
            response_url: field("ResponseURL"),
            physical_resource_id: field("PhysicalResourceId"),
        }
    }

    /// Physical id to report when nothing better is known
    pub fn fallback_physical_id(&self) -> PhysicalId {
        match &self.physical_resource_id {
            Some(id) => PhysicalId::from(id.as_str()),
            None => PhysicalId::derive(&format!("{}/{}", self.stack_id, self.logical_resource_id)),
        }
    }
}

/// Outcome reported to the orchestrator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Operation completed
    Success,
    /// Operation failed; `Reason` explains why
    Failed,
}

/// Response envelope delivered back to the orchestrator
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    /// SUCCESS or FAILED
    pub status: ResponseStatus,
    /// Human-readable failure reason (FAILED only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Physical id of the managed resource
    pub physical_resource_id: String,
    /// Owning stack
    pub stack_id: String,
    /// Attempt being answered
    pub request_id: String,
    /// Logical name of the resource
    pub logical_resource_id: String,
    /// Mask `data` in orchestrator output
    #[serde(default)]
    pub no_echo: bool,
    /// Output attributes
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl LifecycleResponse {
    /// Build a SUCCESS response
    pub fn success(
        correlation: &Correlation,
        physical_id: &PhysicalId,
        data: BTreeMap<String, String>,
        no_echo: bool,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: physical_id.to_string(),
            stack_id: correlation.stack_id.clone(),
            request_id: correlation.request_id.clone(),
            logical_resource_id: correlation.logical_resource_id.clone(),
            no_echo,
            data,
        }
    }

    /// Build a FAILED response
    pub fn failed(
        correlation: &Correlation,
        physical_id: &PhysicalId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            physical_resource_id: physical_id.to_string(),
            stack_id: correlation.stack_id.clone(),
            request_id: correlation.request_id.clone(),
            logical_resource_id: correlation.logical_resource_id.clone(),
            no_echo: false,
            data: BTreeMap::new(),
        }
    }

    /// True for SUCCESS responses
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

impl std::fmt::Debug for LifecycleResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // NoEcho data may carry private keys
        let data: Vec<&str> = self.data.keys().map(String::as_str).collect();
        let mut s = f.debug_struct("LifecycleResponse");
        s.field("status", &self.status)
            .field("reason", &self.reason)
            .field("physical_resource_id", &self.physical_resource_id)
            .field("request_id", &self.request_id)
            .field("logical_resource_id", &self.logical_resource_id)
            .field("no_echo", &self.no_echo);
        if self.no_echo {
            s.field("data_keys", &data);
        } else {
            s.field("data", &self.data);
        }
        s.finish()
    }
}

/// Immutable view of one invocation: the request plus its resolved identity
#[derive(Clone, Debug)]
pub struct RequestContext {
    request: LifecycleRequest,
    physical_id: PhysicalId,
}

impl RequestContext {
    /// Build a context, resolving the physical id from the request
    pub fn new(request: LifecycleRequest, name_property: Option<&str>) -> Self {
        let physical_id = request.resolve_physical_id(name_property);
        Self {
            request,
            physical_id,
        }
    }

    /// The original request
    pub fn request(&self) -> &LifecycleRequest {
        &self.request
    }

    /// Create, Update, or Delete
    pub fn request_type(&self) -> RequestType {
        self.request.request_type
    }

    /// Current resource properties
    pub fn properties(&self) -> &Properties {
        &self.request.resource_properties
    }

    /// Previous resource properties, when the orchestrator sent them
    pub fn old_properties(&self) -> Option<&Properties> {
        self.request.old_resource_properties.as_ref()
    }

    /// Resolved physical id
    pub fn physical_id(&self) -> &PhysicalId {
        &self.physical_id
    }
}
