//! Request and response rewriting done when forwarding (RFC 3261 §16.6, §16.7).

use bytes::Bytes;
use sip_core::{default_reason, Headers, Request, Response, StatusLine};

use crate::error::ForkError;
use crate::target::Target;

/// Max-Forwards inserted when the request carries none.
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Builds the request sent on one branch.
///
/// The copy gets the target as Request-URI, or as a pushed Route when the
/// target is a loose router; Max-Forwards is decremented and a Via carrying
/// the target's branch id goes on top.
pub fn prepare_branch_request(
    original: &Request,
    target: &Target,
    via_host: &str,
    via_transport: &str,
) -> Result<Request, ForkError> {
    let mut request = original.clone();

    if target.uri().is_loose_route() {
        request
            .headers_mut()
            .push_front("Route", format!("<{}>", target.uri()));
    } else {
        request.set_uri(target.uri().clone());
    }

    let max_forwards = match request.headers().get("Max-Forwards") {
        Some(value) => value.trim().parse::<u32>().unwrap_or(DEFAULT_MAX_FORWARDS),
        None => DEFAULT_MAX_FORWARDS,
    };
    if max_forwards == 0 {
        return Err(ForkError::TooManyHops);
    }
    request
        .headers_mut()
        .set("Max-Forwards", (max_forwards - 1).to_string());

    let via = format!(
        "SIP/2.0/{} {};branch={}",
        via_transport,
        via_host,
        target.tid()
    );
    request.headers_mut().push_front("Via", via);
    Ok(request)
}

/// Removes the proxy's own Via. Returns `false` when no Via is left, which
/// means the response was addressed to the proxy itself.
pub fn strip_top_via(response: &mut Response) -> bool {
    response.headers_mut().remove_first("Via");
    response.headers().contains("Via")
}

/// Builds a response to `request` (RFC 3261 §8.2.6): Via, From, To, Call-ID
/// and CSeq are copied and the body is empty.
pub fn make_response(request: &Request, code: u16) -> Result<Response, ForkError> {
    let mut headers = Headers::new();
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        for value in request.headers().get_all(name) {
            headers.push(name, value.clone());
        }
    }
    headers.push("Content-Length", "0");
    let status = StatusLine::new(code, default_reason(code))?;
    Ok(Response::new(status, headers, Bytes::new())?)
}

/// Branch parameter of the top Via, if any.
pub fn top_via_branch(headers: &Headers) -> Option<&str> {
    headers
        .get("Via")?
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("branch"))
        .map(|(_, value)| value.trim())
}
