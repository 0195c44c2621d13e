//! HTTP egress tool with SSRF protection.
//!
//! Destination checks run before any connection: scheme, domain allow/deny
//! globs, then every resolved address against the private-range and
//! metadata-endpoint rules. Redirects are disabled so a friendly host
//! cannot bounce the request somewhere the checks would have refused.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hb_domain::config::HttpEgressConfig;
use hb_domain::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestArgs {
    pub url: String,
    #[serde(default = "d_get")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// A string is sent verbatim; any other JSON value is sent as JSON.
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn d_get() -> String {
    "GET".into()
}

pub struct HttpEgress {
    config: HttpEgressConfig,
    allow: Vec<Pattern>,
    block: Vec<Pattern>,
    client: reqwest::Client,
}

impl HttpEgress {
    pub fn new(config: HttpEgressConfig) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        Error::Internal(format!("invalid domain pattern '{p}': {e}"))
                    })
                })
                .collect()
        };
        let allow = compile(&config.allow_domains)?;
        let block = compile(&config.block_domains)?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("building http client: {e}")))?;
        Ok(Self {
            config,
            allow,
            block,
            client,
        })
    }

    pub async fn request(
        &self,
        req: HttpRequestArgs,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let url = reqwest::Url::parse(&req.url)
            .map_err(|e| Error::InvalidParameter(format!("invalid url: {e}")))?;
        self.check_destination(&url).await?;

        let method = reqwest::Method::from_bytes(req.method.to_uppercase().as_bytes())
            .map_err(|_| Error::InvalidParameter(format!("invalid method '{}'", req.method)))?;

        let timeout = Duration::from_secs(
            req.timeout_secs
                .unwrap_or(self.config.default_timeout_secs)
                .min(self.config.max_timeout_secs),
        );

        let mut builder = self.client.request(method, url).timeout(timeout);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = req.body {
            builder = match body {
                Value::String(raw) => builder.body(raw),
                other => builder.json(&other),
            };
        }

        let response = tokio::select! {
            result = builder.send() => result.map_err(request_err)?,
            _ = cancel.cancelled() => {
                return Err(Error::Internal("request cancelled by caller".into()));
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        let cap = self.config.max_response_size_kb * 1024;
        let mut body = Vec::new();
        let mut truncated = false;
        let mut response = response;
        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk.map_err(request_err)?,
                _ = cancel.cancelled() => {
                    return Err(Error::Internal("request cancelled by caller".into()));
                }
            };
            match chunk {
                Some(bytes) => {
                    if body.len() + bytes.len() > cap {
                        body.extend_from_slice(&bytes[..cap - body.len()]);
                        truncated = true;
                        break;
                    }
                    body.extend_from_slice(&bytes);
                }
                None => break,
            }
        }

        Ok(serde_json::json!({
            "status": status,
            "content_type": content_type,
            "body": String::from_utf8_lossy(&body),
            "truncated": truncated,
        }))
    }

    async fn check_destination(&self, url: &reqwest::Url) -> Result<()> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Blocked(format!(
                "scheme '{}' is not allowed for egress",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidParameter("url has no host".into()))?;

        if self.config.block_metadata_endpoints && is_metadata_host(host) {
            return Err(Error::Blocked(format!(
                "'{host}' is a cloud metadata endpoint"
            )));
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|p| p.matches(host)) {
            return Err(Error::Blocked(format!(
                "'{host}' is not on the egress allowlist"
            )));
        }
        if self.block.iter().any(|p| p.matches(host)) {
            return Err(Error::Blocked(format!(
                "'{host}' is on the egress denylist"
            )));
        }

        // Literal IP hosts are checked directly; names are resolved and
        // every address checked.
        let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => {
                let port = url.port_or_known_default().unwrap_or(80);
                tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|e| Error::Internal(format!("resolving '{host}': {e}")))?
                    .map(|sa| sa.ip())
                    .collect()
            }
        };

        for ip in addrs {
            if self.config.block_metadata_endpoints && is_metadata_ip(ip) {
                return Err(Error::Blocked(format!(
                    "'{host}' resolves to metadata endpoint {ip}"
                )));
            }
            if self.config.block_private_ips && is_private_ip(ip) {
                return Err(Error::Blocked(format!(
                    "'{host}' resolves to private address {ip}"
                )));
            }
        }
        Ok(())
    }
}

fn request_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("http request timed out: {e}"))
    } else {
        Error::Internal(format!("http request failed: {e}"))
    }
}

fn is_metadata_host(host: &str) -> bool {
    matches!(host, "metadata.google.internal" | "metadata")
}

fn is_metadata_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets() == [169, 254, 169, 254],
        IpAddr::V6(v6) => {
            // fd00:ec2::254 (AWS IMDSv2 over IPv6).
            let seg = v6.segments();
            seg[0] == 0xfd00 && seg[1] == 0x0ec2 && seg[7] == 0x0254
        }
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (seg[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (seg[0] & 0xffc0) == 0xfe80
        }
    }
}
