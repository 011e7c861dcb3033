//! Invoice and proforma documents.
//!
//! Documents are rendered from tera templates and converted to PDF through `wkhtmltopdf`
//! when the binary is available. Without it the rendered HTML is returned for the browser
//! to print.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use tourdesk_core::documents::{DocumentError, DocumentPayload, DocumentRenderer, RenderedDocument};

const INVOICE_TEMPLATE: &str = "invoice.html.tera";
const PROFORMA_TEMPLATE: &str = "proforma.html.tera";

/// Registers the filters the document templates use.
///
/// - `money`: two decimal places, e.g. `invoice.total_amount | money`
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", money_filter);
}

fn money_filter(value: &tera::Value, _args: &HashMap<String, tera::Value>) -> tera::Result<tera::Value> {
    let formatted = match value {
        // Decimals serialise as strings to keep their precision.
        tera::Value::String(raw) => match raw.parse::<rust_decimal::Decimal>() {
            Ok(amount) => format!("{:.2}", amount.round_dp(2)),
            Err(_) => raw.clone(),
        },
        tera::Value::Number(number) => format!("{:.2}", number.as_f64().unwrap_or_default()),
        tera::Value::Null => "0.00".to_owned(),
        other => other.to_string(),
    };
    Ok(tera::Value::String(formatted))
}

#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    tera: Tera,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl TemplateRenderer {
    /// Loads templates from `template_dir`, falling back to the embedded copies for any
    /// template the directory does not provide.
    pub fn new(template_dir: &Path, wkhtmltopdf_path: Option<PathBuf>) -> Self {
        let pattern = format!("{}/**/*.tera", template_dir.display());
        let mut tera = match Tera::new(&pattern) {
            Ok(tera) => tera,
            Err(error) => {
                warn!(
                    event_name = "document.templates.fallback",
                    template_dir = %template_dir.display(),
                    error = %error,
                    "document templates unavailable on disk; using embedded templates"
                );
                Tera::default()
            }
        };
        add_embedded_templates(&mut tera);
        register_template_filters(&mut tera);

        let wkhtmltopdf_path = wkhtmltopdf_path.or_else(|| which::which("wkhtmltopdf").ok());
        match &wkhtmltopdf_path {
            Some(path) => info!(
                event_name = "document.converter.found",
                path = %path.display(),
                "wkhtmltopdf found"
            ),
            None => warn!(
                event_name = "document.converter.missing",
                "wkhtmltopdf not found; documents will be served as HTML"
            ),
        }

        Self { tera, wkhtmltopdf_path }
    }

    /// Embedded templates only, HTML output.
    pub fn embedded() -> Self {
        let mut tera = Tera::default();
        add_embedded_templates(&mut tera);
        register_template_filters(&mut tera);
        Self { tera, wkhtmltopdf_path: None }
    }

    pub fn render_html(&self, payload: &DocumentPayload) -> Result<String, DocumentError> {
        let (template, context) = match payload {
            DocumentPayload::Invoice(document) => {
                let context = Context::from_serialize(document)
                    .map_err(|error| DocumentError::Template(error.to_string()))?;
                (INVOICE_TEMPLATE, context)
            }
            DocumentPayload::Proforma(document) => {
                let context = Context::from_serialize(document)
                    .map_err(|error| DocumentError::Template(error.to_string()))?;
                (PROFORMA_TEMPLATE, context)
            }
        };
        self.tera.render(template, &context).map_err(|error| DocumentError::Template(error.to_string()))
    }

    async fn convert_to_pdf(&self, html: &str, converter: &Path) -> Result<Vec<u8>, DocumentError> {
        let scratch = std::env::temp_dir();
        let stem = Uuid::new_v4();
        let html_path = scratch.join(format!("tourdesk_{stem}.html"));
        let pdf_path = scratch.join(format!("tourdesk_{stem}.pdf"));

        tokio::fs::write(&html_path, html)
            .await
            .map_err(|error| DocumentError::Conversion(error.to_string()))?;

        let output = Command::new(converter)
            .args(["--page-size", "A4", "--encoding", "utf-8", "--quiet"])
            .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
            .args(["--margin-left", "10mm", "--margin-right", "10mm"])
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let result = match output {
            Ok(output) if output.status.success() => tokio::fs::read(&pdf_path)
                .await
                .map_err(|error| DocumentError::Conversion(error.to_string())),
            Ok(output) => Err(DocumentError::Conversion(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            )),
            Err(error) => Err(DocumentError::Conversion(error.to_string())),
        };

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&pdf_path).await;
        result
    }
}

fn add_embedded_templates(tera: &mut Tera) {
    let embedded = [
        (INVOICE_TEMPLATE, include_str!("../../../templates/documents/invoice.html.tera")),
        (PROFORMA_TEMPLATE, include_str!("../../../templates/documents/proforma.html.tera")),
    ];
    for (name, body) in embedded {
        if tera.get_template_names().any(|existing| existing == name) {
            continue;
        }
        if let Err(error) = tera.add_raw_template(name, body) {
            warn!(
                event_name = "document.templates.invalid",
                template = name,
                error = %error,
                "embedded template failed to parse"
            );
        }
    }
}

#[async_trait]
impl DocumentRenderer for TemplateRenderer {
    async fn render(&self, payload: &DocumentPayload) -> Result<RenderedDocument, DocumentError> {
        let html = self.render_html(payload)?;
        let stem = payload.stem();

        if let Some(converter) = &self.wkhtmltopdf_path {
            match self.convert_to_pdf(&html, converter).await {
                Ok(bytes) => {
                    info!(
                        event_name = "document.rendered",
                        document = %stem,
                        format = "pdf",
                        size = bytes.len(),
                        "document rendered"
                    );
                    return Ok(RenderedDocument {
                        file_name: format!("{stem}.pdf"),
                        content_type: "application/pdf",
                        bytes,
                    });
                }
                Err(error) => warn!(
                    event_name = "document.conversion_failed",
                    document = %stem,
                    error = %error,
                    "PDF conversion failed; serving HTML"
                ),
            }
        }

        Ok(RenderedDocument {
            file_name: format!("{stem}.html"),
            content_type: "text/html; charset=utf-8",
            bytes: html.into_bytes(),
        })
    }
}
