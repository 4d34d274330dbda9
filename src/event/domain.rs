use serde::{Deserialize, Serialize};

/// Marketplace notifications emitted by the API tier.
///
/// Serialized with a `type` discriminator and camelCase fields, which is the
/// shape browser clients filter on (`categoryId` for companies, `rfqOwnerId`
/// for buyers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "rfq.created", rename_all = "camelCase")]
    RfqCreated {
        id: i64,
        title: String,
        category_id: Option<i64>,
        category: String,
        message: String,
    },
    #[serde(rename = "quotation.created", rename_all = "camelCase")]
    QuotationCreated {
        rfq_id: i64,
        rfq_title: String,
        rfq_owner_id: i64,
        company: String,
        message: String,
    },
    #[serde(rename = "quotation.accepted", rename_all = "camelCase")]
    QuotationAccepted { rfq_id: i64, message: String },
}

impl DomainEvent {
    pub fn rfq_created(
        id: i64,
        title: impl Into<String>,
        category_id: Option<i64>,
        category: impl Into<String>,
    ) -> Self {
        let title = title.into();
        Self::RfqCreated {
            id,
            message: format!("New Request: {}", title),
            title,
            category_id,
            category: category.into(),
        }
    }

    pub fn quotation_created(
        rfq_id: i64,
        rfq_title: impl Into<String>,
        rfq_owner_id: i64,
        company: impl Into<String>,
    ) -> Self {
        let rfq_title = rfq_title.into();
        Self::QuotationCreated {
            rfq_id,
            message: format!("New Quote for: {}", rfq_title),
            rfq_title,
            rfq_owner_id,
            company: company.into(),
        }
    }

    pub fn quotation_accepted(rfq_id: i64, rfq_title: &str) -> Self {
        Self::QuotationAccepted {
            rfq_id,
            message: format!("Quote Accepted for: {}", rfq_title),
        }
    }

    /// Wire discriminator, e.g. `rfq.created`
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RfqCreated { .. } => "rfq.created",
            Self::QuotationCreated { .. } => "quotation.created",
            Self::QuotationAccepted { .. } => "quotation.accepted",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RfqCreated { message, .. }
            | Self::QuotationCreated { message, .. }
            | Self::QuotationAccepted { message, .. } => message,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
