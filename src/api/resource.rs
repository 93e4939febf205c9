//! Resource types and actions of the Advertising API.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Entity families exposed by the campaign management endpoints.
///
/// Every resource shares the same request/response shape, so adding one is a
/// matter of extending this enum and its lookup tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ResourceType {
    Campaign,
    Portfolio,
    AdGroup,
    Ad,
    Target,
    AdAssociation,
}

impl ResourceType {
    /// Plural collection name used in URL paths and request bodies.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Campaign => "campaigns",
            Self::Portfolio => "portfolios",
            Self::AdGroup => "adGroups",
            Self::Ad => "ads",
            Self::Target => "targets",
            Self::AdAssociation => "adAssociations",
        }
    }

    /// Field carrying the entity identifier.
    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Campaign => "campaignId",
            Self::Portfolio => "portfolioId",
            Self::AdGroup => "adGroupId",
            Self::Ad => "adId",
            Self::Target => "targetId",
            Self::AdAssociation => "adAssociationId",
        }
    }

    /// Request key listing identifiers for deletes and id filters.
    pub fn id_list_field(&self) -> String {
        format!("{}s", self.id_field())
    }

    /// Query filter key matching on identifiers.
    pub fn id_filter_field(&self) -> String {
        format!("{}Filter", self.id_field())
    }

    /// Key wrapping an entity inside a multi-status success entry.
    pub fn singular_key(&self) -> &str {
        self.as_ref()
    }

    /// Maximum number of items accepted in one mutation call.
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Campaign | Self::Portfolio | Self::AdGroup | Self::Ad => 100,
            Self::AdAssociation => 500,
            Self::Target => 1000,
        }
    }
}

/// Operation applied to a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    Query,
}

impl Action {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Query)
    }

    /// Whether resubmitting the same payload cannot create duplicates.
    ///
    /// Creates are only replay-safe when the caller attaches an idempotency key.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Self::Create)
    }
}

/// Path of the endpoint serving `action` on `resource`, relative to the API base URL.
pub fn endpoint_path(resource: ResourceType, action: Action) -> String {
    format!("/adsApi/v1/{}/{}", action, resource.collection())
}
