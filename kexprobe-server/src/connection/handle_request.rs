use std::{collections::HashMap, error::Error as StdError};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{
    body::Body,
    header::{self, HeaderMap, HeaderValue},
    Method, Request, Response, StatusCode,
};
use kexprobe::{Error as ProbeError, GroupPreference, ProbeRequest, Transport};
use serde::Serialize;
use url::form_urlencoded;

use crate::report::ClientReport;

use super::Connection;

pub const MAX_FORM_SIZE: usize = 16 * 1024;

impl Connection {
    pub(super) async fn handle_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let resp = if method == Method::POST {
            self.handle_probe(req).await
        } else {
            self.handle_page(req.headers())
        };

        log::debug!(
            "[{id:#010x}] [{addr}] {method} {path} {status}",
            id = self.id,
            addr = self.addr,
            status = resp.status(),
        );

        resp
    }

    async fn handle_probe<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let body = match Limited::new(req.into_body(), MAX_FORM_SIZE).collect().await {
            Ok(body) => body.to_bytes(),
            Err(err) => return text(StatusCode::BAD_REQUEST, format!("can't parse form: {err}")),
        };

        let (transport, request) = match parse_form(&body) {
            Ok(form) => form,
            Err(msg) => return text(StatusCode::BAD_REQUEST, msg),
        };

        let request = request.with_trust_anchors(self.ctx.landmarks.latest().into_iter().collect());

        log::info!(
            "[{id:#010x}] [{addr}] probing {request} over {transport}",
            id = self.id,
            addr = self.addr,
        );

        let result = kexprobe::probe(transport, &request, &self.ctx.probe_options).await;

        json(StatusCode::OK, &result)
    }

    fn handle_page(&self, headers: &HeaderMap) -> Response<Full<Bytes>> {
        // Read back what was recorded during the handshake, never recomputed.
        let report = ClientReport::new(
            self.tls,
            self.ctx.table.report(self.id).as_ref(),
            &self.ctx.server_trust_anchor,
        );

        if accepts_json(headers) {
            return json(StatusCode::OK, &report);
        }

        let page = report.render(&self.ctx.server_trust_anchor, self.ctx.landmarks.latest().as_ref());
        respond(StatusCode::OK, "text/html; charset=utf-8", page)
    }
}

/// Validates a probe form. The error is the message for a 400 response.
fn parse_form(body: &[u8]) -> Result<(Transport, ProbeRequest), String> {
    let mut fields = HashMap::new();
    for (key, value) in form_urlencoded::parse(body) {
        fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }

    let field = |name: &str| {
        fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };

    let remote = field("remote").ok_or("missing remote parameter")?;

    let request = ProbeRequest::new(remote, field("servername")).map_err(|err| match err {
        ProbeError::InvalidServerName(_) => err.to_string(),
        err => format!("can't parse remote: {err}"),
    })?;

    let transport = field("transport")
        .and_then(|transport| transport.parse::<Transport>().ok())
        .ok_or("missing or invalid transport parameter (use tcp or quic)")?;

    let groups = match (field("groups"), field("method")) {
        (Some(groups), _) => GroupPreference::parse_list(groups),
        (None, Some(method)) => method.parse(),
        (None, None) => Ok(GroupPreference::default()),
    }
    .map_err(|err| err.to_string())?;

    // Any non-empty value counts, as with an HTML checkbox.
    let insecure = fields.get("insecure").is_some_and(|value| !value.is_empty());

    Ok((transport, request.with_insecure(insecure).with_groups(groups)))
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("application/json"))
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn text(status: StatusCode, msg: impl Into<String>) -> Response<Full<Bytes>> {
    respond(status, "text/plain; charset=utf-8", msg.into())
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode response: {err}")),
    }
}
