//! Outbound document and upload ports.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::invoice::{Invoice, PaymentBreakup};
use crate::domain::quotation::QuotationView;
use crate::domain::request::RequestView;
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("template rendering failed: {0}")]
    Template(String),
    #[error("document conversion failed: {0}")]
    Conversion(String),
    #[error("storage failed: {0}")]
    Storage(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl From<DocumentError> for ApplicationError {
    fn from(value: DocumentError) -> Self {
        match value {
            DocumentError::Rejected(reason) => {
                crate::errors::ValidationFailure::field("proof", reason).into()
            }
            other => ApplicationError::Integration(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvoiceDocument {
    pub invoice: Invoice,
    pub breakups: Vec<PaymentBreakup>,
    pub trip_title: String,
    pub total_paid: Decimal,
    pub total_remaining: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProformaDocument {
    pub quotation: QuotationView,
    pub request: RequestView,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentPayload {
    Invoice(InvoiceDocument),
    Proforma(ProformaDocument),
}

impl DocumentPayload {
    /// File name without extension, e.g. the invoice number.
    pub fn stem(&self) -> String {
        match self {
            Self::Invoice(document) => document.invoice.invoice_number.clone(),
            Self::Proforma(document) => {
                format!("proforma-{}-v{}", document.request.id, document.quotation.version)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, payload: &DocumentPayload) -> Result<RenderedDocument, DocumentError>;
}

/// Stores uploaded payment proofs and returns a reference that can be recorded on the payment.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, DocumentError>;
}
