//! Store records with their lifecycle state machine

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credentials::StoreCredentials;
use crate::error::{Result, StoreError};

/// Longest accepted store name.
///
/// Keeps `store-<name>` and `woo-<name>` within Kubernetes namespace and Helm
/// release name limits.
pub const MAX_NAME_LEN: usize = 40;

/// Prefix of the namespace every store is deployed into
pub const NAMESPACE_PREFIX: &str = "store-";

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid name pattern"));

/// A validated store name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreName(String);

impl StoreName {
    /// Normalize and validate a user-supplied name
    ///
    /// Names are lower-cased and spaces/underscores become hyphens before the
    /// pattern check, so `"Fashion Shop"` is accepted as `fashion-shop`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw);

        if normalized.is_empty() {
            return Err(StoreError::invalid("Store name is required"));
        }
        if normalized.len() > MAX_NAME_LEN {
            return Err(StoreError::invalid(format!(
                "Store name '{}' is longer than {} characters",
                normalized, MAX_NAME_LEN
            )));
        }
        if !NAME_PATTERN.is_match(&normalized) {
            return Err(StoreError::invalid(format!(
                "Store name '{}' must contain only lowercase letters, digits and hyphens, \
                 and start and end with a letter or digit",
                normalized
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace the store's release lives in
    pub fn namespace(&self) -> String {
        format!("{}{}", NAMESPACE_PREFIX, self.0)
    }

    /// Public host name under the configured base domain
    pub fn host(&self, base_domain: &str) -> String {
        format!("{}.{}", self.0, base_domain.trim_start_matches('.'))
    }

    /// Public URL under the configured base domain
    pub fn url(&self, scheme: &str, base_domain: &str) -> String {
        format!("{}://{}", scheme, self.host(base_domain))
    }
}

/// Lower-case and replace spaces/underscores with hyphens
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '_'], "-")
}

impl TryFrom<String> for StoreName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StoreName> for String {
    fn from(name: StoreName) -> Self {
        name.0
    }
}

impl AsRef<str> for StoreName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported store templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[serde(rename = "woocommerce")]
    WooCommerce,
}

impl StoreKind {
    /// Parse the `type` field of a create request
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "woocommerce" => Ok(Self::WooCommerce),
            "" => Err(StoreError::invalid("Store type is required")),
            other => Err(StoreError::invalid(format!(
                "Invalid store type '{}': must be 'woocommerce'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WooCommerce => "woocommerce",
        }
    }

    /// Prefix used for the release name (`woo-<name>`)
    pub fn release_prefix(&self) -> &'static str {
        match self {
            Self::WooCommerce => "woo",
        }
    }

    /// Release that backs a store of this kind
    pub fn release_ref(&self, name: &StoreName) -> ReleaseRef {
        ReleaseRef {
            release: format!("{}-{}", self.release_prefix(), name),
            namespace: name.namespace(),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Requested,
    Provisioning,
    Ready,
    Failed,
    Deleting,
}

impl StoreStatus {
    /// Whether a provisioning or deletion task owns the record in this state
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Requested | Self::Provisioning | Self::Deleting)
    }

    /// Check whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: StoreStatus) -> bool {
        use StoreStatus::*;
        matches!(
            (self, next),
            (Requested, Provisioning)
                | (Requested, Failed)
                | (Requested, Deleting)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Provisioning, Deleting)
                | (Provisioning, Requested)
                | (Ready, Deleting)
                | (Failed, Deleting)
                | (Failed, Requested)
                | (Deleting, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of the deployed release and its isolation boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRef {
    /// Helm release name
    pub release: String,

    /// Namespace holding every resource of the store
    pub namespace: String,
}

impl std::fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.release)
    }
}

/// The durable record of one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    /// Random identifier, regenerated on every fresh create
    pub id: String,

    pub name: StoreName,

    pub kind: StoreKind,

    pub status: StoreStatus,

    /// Public URL, present only while `Ready`
    #[serde(default)]
    pub url: Option<String>,

    /// Failure reason, present only while `Failed`
    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub release_ref: ReleaseRef,

    /// Provisioning attempt counter, starts at 1
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    /// Generated credentials; `None` for adopted stores
    #[serde(default)]
    pub credentials: Option<StoreCredentials>,
}

fn default_attempt() -> u32 {
    1
}

impl StoreRecord {
    /// Create a record for a freshly accepted create request
    pub fn requested(name: StoreName, kind: StoreKind, credentials: StoreCredentials) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            release_ref: kind.release_ref(&name),
            name,
            kind,
            status: StoreStatus::Requested,
            url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            attempt: 1,
            credentials: Some(credentials),
        }
    }

    /// Create a `Ready` record for a release found in the cluster without one
    pub fn adopted(name: StoreName, kind: StoreKind, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            release_ref: kind.release_ref(&name),
            name,
            kind,
            status: StoreStatus::Ready,
            url: Some(url),
            error_message: None,
            created_at: now,
            updated_at: now,
            attempt: 1,
            credentials: None,
        }
    }

    fn transition(&mut self, next: StoreStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::internal(format!(
                "store '{}' cannot move from {} to {}",
                self.name, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the record as being provisioned
    pub fn mark_provisioning(&mut self) -> Result<()> {
        self.transition(StoreStatus::Provisioning)?;
        self.url = None;
        self.error_message = None;
        Ok(())
    }

    /// Mark the record as ready at `url`
    pub fn mark_ready(&mut self, url: String) -> Result<()> {
        self.transition(StoreStatus::Ready)?;
        self.url = Some(url);
        self.error_message = None;
        Ok(())
    }

    /// Mark the record as failed with a human-readable reason
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(StoreStatus::Failed)?;
        self.url = None;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Mark the record as being torn down
    pub fn mark_deleting(&mut self) -> Result<()> {
        self.transition(StoreStatus::Deleting)?;
        self.url = None;
        self.error_message = None;
        Ok(())
    }

    /// Put an interrupted record back to `Requested` for another attempt
    pub fn mark_retry(&mut self) -> Result<()> {
        self.transition(StoreStatus::Requested)?;
        self.attempt += 1;
        self.url = None;
        self.error_message = None;
        Ok(())
    }

    /// Check the `url`/`errorMessage` invariants
    pub fn is_consistent(&self) -> bool {
        let url_ok = self.url.is_some() == (self.status == StoreStatus::Ready);
        let error_ok = self.error_message.is_some() == (self.status == StoreStatus::Failed);
        url_ok && error_ok
    }
}

fn new_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}
