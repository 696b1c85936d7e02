use chrono::{DateTime, Utc};
use integrity_engine::AuditEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{GdprError, GdprResult};

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
}

/// A data subject access/portability request.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub principal_id: String,
    pub request_type: String,
    pub format: ExportFormat,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub include_metadata: bool,
    pub requested_by: String,
}

impl ExportRequest {
    pub fn access(principal_id: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            request_type: "access".to_string(),
            format: ExportFormat::Json,
            date_range: None,
            include_metadata: true,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_date_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_range = Some((from, to));
        self
    }
}

/// Result envelope: the rendered bytes plus export metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub request_id: Uuid,
    pub record_count: u64,
    pub data_size: u64,
    pub exported_by: String,
    pub categories: Vec<String>,
    pub retention_policies: Vec<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Render events in the requested format.
pub fn render_export(
    request: &ExportRequest,
    request_id: Uuid,
    events: &[AuditEvent],
) -> GdprResult<Vec<u8>> {
    match request.format {
        ExportFormat::Json => render_json(request, request_id, events),
        ExportFormat::Csv => Ok(render_csv(events).into_bytes()),
        ExportFormat::Xml => Ok(render_xml(request, request_id, events).into_bytes()),
    }
}

fn event_values(events: &[AuditEvent]) -> GdprResult<Vec<Value>> {
    events
        .iter()
        .map(|event| serde_json::to_value(event).map_err(|e| GdprError::ExportFailed(e.to_string())))
        .collect()
}

fn render_json(
    request: &ExportRequest,
    request_id: Uuid,
    events: &[AuditEvent],
) -> GdprResult<Vec<u8>> {
    let logs = event_values(events)?;

    let wrapper = if request.include_metadata {
        json!({
            "exportMetadata": {
                "requestId": request_id.to_string(),
                "requestType": request.request_type,
                "principalId": request.principal_id,
                "exportedBy": request.requested_by,
                "exportedAt": Utc::now().to_rfc3339(),
                "recordCount": events.len(),
            },
            "auditLogs": logs,
        })
    } else {
        json!({ "auditLogs": logs })
    };

    serde_json::to_vec_pretty(&wrapper).map_err(|e| GdprError::ExportFailed(e.to_string()))
}

/// RFC-4180-style CSV. Header row is the union of keys of the first record;
/// values containing comma, quote, or newline are quoted with inner quotes
/// doubled.
fn render_csv(events: &[AuditEvent]) -> String {
    let values = match event_values(events) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };

    let Some(first) = values.first().and_then(|v| v.as_object()) else {
        return String::new();
    };
    let columns: Vec<String> = first.keys().cloned().collect();

    let mut out = String::new();
    out.push_str(
        &columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for value in &values {
        let row = columns
            .iter()
            .map(|column| {
                let cell = value.get(column).cloned().unwrap_or(Value::Null);
                csv_escape(&csv_cell(&cell))
            })
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    out
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn render_xml(request: &ExportRequest, request_id: Uuid, events: &[AuditEvent]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gdprExport>\n");

    if request.include_metadata {
        out.push_str("  <exportMetadata>\n");
        out.push_str(&format!(
            "    <requestId>{}</requestId>\n",
            xml_escape(&request_id.to_string())
        ));
        out.push_str(&format!(
            "    <principalId>{}</principalId>\n",
            xml_escape(&request.principal_id)
        ));
        out.push_str(&format!(
            "    <exportedBy>{}</exportedBy>\n",
            xml_escape(&request.requested_by)
        ));
        out.push_str(&format!("    <recordCount>{}</recordCount>\n", events.len()));
        out.push_str("  </exportMetadata>\n");
    }

    if let Ok(values) = event_values(events) {
        for value in &values {
            out.push_str("  <auditLog>\n");
            write_xml_value(value, 2, &mut out);
            out.push_str("  </auditLog>\n");
        }
    }

    out.push_str("</gdprExport>\n");
    out
}

fn write_xml_value(value: &Value, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth + 1);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    // Arrays become repeated child elements under the key.
                    Value::Array(items) => {
                        for item in items {
                            out.push_str(&format!("{indent}<{key}>"));
                            write_xml_scalar_or_nested(item, depth + 1, out);
                            out.push_str(&format!("</{key}>\n"));
                        }
                    }
                    Value::Object(_) => {
                        out.push_str(&format!("{indent}<{key}>\n"));
                        write_xml_value(val, depth + 1, out);
                        out.push_str(&format!("{indent}</{key}>\n"));
                    }
                    other => {
                        out.push_str(&format!("{indent}<{key}>"));
                        out.push_str(&xml_escape(&csv_cell(other)));
                        out.push_str(&format!("</{key}>\n"));
                    }
                }
            }
        }
        other => {
            out.push_str(&indent);
            out.push_str(&xml_escape(&csv_cell(other)));
            out.push('\n');
        }
    }
}

fn write_xml_scalar_or_nested(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Object(_) => {
            out.push('\n');
            write_xml_value(value, depth, out);
            out.push_str(&"  ".repeat(depth + 1));
        }
        other => out.push_str(&xml_escape(&csv_cell(other))),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}
