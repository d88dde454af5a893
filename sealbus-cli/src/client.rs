//! HTTP initiator talking to a sealbus responder.

use anyhow::{anyhow, bail, Context};
use sealbus::secrets::{HandshakeActor, SecureChannel};
use sealbus::transport::{PublicKeyResponse, StatusResponse, ENVELOPE_CONTENT_TYPE};
use sealbus::Request;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ResponderClient {
    pub base_url: String,
    http: reqwest::Client,
}

impl ResponderClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Deliver one envelope and return the raw reply.
    pub async fn post_envelope(&self, envelope: Vec<u8>, silent: bool) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .http
            .post(self.url("/channel"))
            .query(&[("silent", silent)])
            .header(reqwest::header::CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            bail!("responder refused the request ({}): {}", status, message);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Run the initiator side of a handshake over HTTP.
    pub async fn handshake(&self, actor: &mut HandshakeActor) -> anyhow::Result<()> {
        let mut hello = Vec::new();
        actor.initiate(&mut hello)?;
        let reply = self.post_envelope(hello, false).await?;
        actor.complete(&mut Cursor::new(reply))?;
        info!("Channel {} established with {}", actor.id(), self.base_url);
        Ok(())
    }

    /// Send a sealed request and, unless `silent`, return the echoed request.
    pub async fn send(
        &self,
        channel: &SecureChannel,
        request: &Request,
        silent: bool,
    ) -> anyhow::Result<Option<Request>> {
        let mut envelope = Vec::new();
        channel.write_with_source(channel.id(), &mut envelope, request)?;
        let reply = self.post_envelope(envelope, silent).await?;
        if silent {
            debug!("Silent request sent, {} reply bytes ignored", reply.len());
            return Ok(None);
        }
        let echo: Request = channel
            .read(&mut Cursor::new(reply))
            .map_err(|e| anyhow!("could not open the responder's echo: {}", e))?;
        Ok(Some(echo))
    }

    pub async fn public_key(&self) -> anyhow::Result<PublicKeyResponse> {
        Ok(self.http.get(self.url("/pubkey")).send().await?.json().await?)
    }

    pub async fn status(&self) -> anyhow::Result<StatusResponse> {
        Ok(self.http.get(self.url("/status")).send().await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = ResponderClient::new("http://localhost:7878/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://localhost:7878");
        assert_eq!(client.url("/channel"), "http://localhost:7878/channel");
        assert_eq!(client.url("status"), "http://localhost:7878/status");
    }
}
