//! HTTP response handlers.

use anyhow::Result;
use tiny_http::{Header, Method, Request, Response, StatusCode};

use crate::route::RewriteRule;

mod mime {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
}

/// Respond with a rendered HTML page.
pub fn respond_html(request: Request, body: String) -> Result<()> {
    if is_head_request(&request) {
        return send_head(request, 200, mime::HTML);
    }
    send_body(request, 200, mime::HTML, body.into_bytes())
}

/// Respond with a redirect for a matched rewrite rule.
pub fn respond_redirect(request: Request, rule: &RewriteRule) -> Result<()> {
    let response = Response::empty(StatusCode(rule.status)).with_header(
        Header::from_bytes("Location", rule.to.as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid redirect target: {}", rule.to))?,
    );
    request.respond(response)?;
    Ok(())
}

/// Respond with 404.
pub fn respond_not_found(request: Request) -> Result<()> {
    if is_head_request(&request) {
        return send_head(request, 404, mime::PLAIN);
    }
    send_body(request, 404, mime::PLAIN, b"404 Not Found".to_vec())
}

/// Respond with 500 after a render failure.
pub fn respond_error(request: Request) -> Result<()> {
    if is_head_request(&request) {
        return send_head(request, 500, mime::PLAIN);
    }
    send_body(request, 500, mime::PLAIN, b"500 Internal Server Error".to_vec())
}

/// Respond with 503 while the bootstrap pass is still running.
pub fn respond_loading(request: Request) -> Result<()> {
    let body = "<!DOCTYPE html>\
        <html><head><meta http-equiv=\"refresh\" content=\"1\">\
        <title>Starting</title></head>\
        <body><p>Starting up, one moment...</p></body></html>";

    let response = Response::from_string(body)
        .with_status_code(StatusCode(503))
        .with_header(Header::from_bytes("Content-Type", mime::HTML).unwrap())
        .with_header(Header::from_bytes("Retry-After", "1").unwrap());
    request.respond(response)?;
    Ok(())
}

/// Respond with 503 during shutdown.
pub fn respond_unavailable(request: Request) -> Result<()> {
    send_body(request, 503, mime::PLAIN, b"503 Service Unavailable".to_vec())
}

fn is_head_request(request: &Request) -> bool {
    *request.method() == Method::Head
}

fn send_body(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(Header::from_bytes("Content-Type", content_type).unwrap());
    request.respond(response)?;
    Ok(())
}

/// HEAD variant: status and headers only.
fn send_head(request: Request, status: u16, content_type: &str) -> Result<()> {
    let response = Response::empty(StatusCode(status))
        .with_header(Header::from_bytes("Content-Type", content_type).unwrap());
    request.respond(response)?;
    Ok(())
}
