//! Small HTML fragments for reviewers: the pages behind the one-click
//! approve/reject links and the approval email body.

use crate::approval::ApprovalLinks;
use crate::models::approval::ApprovalRequest;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Error,
}

impl Tone {
    fn color(self) -> &'static str {
        match self {
            Tone::Success => "#107c10",
            Tone::Warning => "#ca5010",
            Tone::Error => "#a4262c",
        }
    }
}

/// A complete page with a title and pre-escaped body fragments.
pub fn page(tone: Tone, title: &str, body_html: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>body{{font-family:Segoe UI,Arial,sans-serif;margin:40px;color:#323130}}\
         h1{{color:{color}}}pre{{background:#f3f2f1;padding:12px;overflow:auto}}\
         dt{{font-weight:600}}</style></head>\
         <body><h1>{title}</h1>{body}</body></html>",
        title = escape(title),
        color = tone.color(),
        body = body_html,
    )
}

/// `<dl>` summary of a request, with the payload pretty-printed.
pub fn request_summary(request: &ApprovalRequest) -> String {
    let payload = serde_json::to_string_pretty(&request.payload).unwrap_or_default();
    let mut html = format!(
        "<dl><dt>Request ID</dt><dd>{}</dd><dt>Status</dt><dd>{}</dd>\
         <dt>Entity</dt><dd>{}</dd><dt>Requested by</dt><dd>{}</dd>\
         <dt>Created</dt><dd>{}</dd>",
        escape(&request.id),
        escape(&request.status.to_string()),
        escape(&request.entity),
        escape(&request.created_by),
        escape(&request.created_at.to_rfc3339()),
    );
    if !request.justification.is_empty() {
        html.push_str(&format!(
            "<dt>Justification</dt><dd>{}</dd>",
            escape(&request.justification)
        ));
    }
    if let Some(reason) = &request.rejection_reason {
        html.push_str(&format!("<dt>Rejection reason</dt><dd>{}</dd>", escape(reason)));
    }
    if let Some(err) = &request.last_error {
        html.push_str(&format!("<dt>Last error</dt><dd>{}</dd>", escape(err)));
    }
    html.push_str(&format!("</dl><pre>{}</pre>", escape(&payload)));
    html
}

pub fn approval_email(request: &ApprovalRequest, links: &ApprovalLinks) -> String {
    format!(
        "<p>A sales order creation is waiting for your decision.</p>{}\
         <p><a href=\"{}\">Approve</a> &nbsp; <a href=\"{}\">Reject</a> &nbsp; \
         <a href=\"{}\">View status</a></p>",
        request_summary(request),
        escape(&links.approve),
        escape(&links.reject),
        escape(&links.status),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_neutralizes_markup() {
        assert_eq!(
            escape("<script>alert('x') & \"y\"</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;) &amp; &quot;y&quot;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_summary_escapes_user_fields() {
        let request: ApprovalRequest = serde_json::from_value(serde_json::json!({
            "id": "REQ-1",
            "status": "pending",
            "entity": "salesorders",
            "created_at": "2024-01-01T12:00:00Z",
            "created_by": "<b>mallory</b>",
            "payload": {"SoldToParty": "<img>"}
        }))
        .unwrap();
        let html = request_summary(&request);
        assert!(html.contains("&lt;b&gt;mallory&lt;/b&gt;"));
        assert!(!html.contains("<img>"));
    }

    #[test]
    fn test_page_uses_tone_color() {
        let html = page(Tone::Error, "Rejected <now>", "<p>x</p>");
        assert!(html.contains("#a4262c"));
        assert!(html.contains("Rejected &lt;now&gt;"));
    }
}
