//! S3-compatible object store client signed with SigV4.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use time::OffsetDateTime;
use url::Url;

use super::object::{ObjectStoreClient, ObjectStoreConfig, ObjectStoreError, service_url};
use super::signing::{Credentials, SignableRequest, amz_timestamps, authorization, sha256_hex};

const PUBLIC_READ: &str = "public-read";
const MAX_ERROR_BODY: usize = 512;

pub struct S3Client {
    http: Client,
    access_key_id: String,
    secret_access_key: String,
    region: String,
    endpoint: Option<String>,
    force_path_style: bool,
}

impl S3Client {
    pub fn new(config: &ObjectStoreConfig, timeout: Duration) -> Result<Self, ObjectStoreError> {
        let http = Client::builder()
            .user_agent(concat!("chartd/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(ObjectStoreError::transport)?;
        Ok(Self {
            http,
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            force_path_style: config.force_path_style,
        })
    }
}

fn host_header(url: &Url) -> Result<String, ObjectStoreError> {
    let host = url
        .host_str()
        .ok_or_else(|| ObjectStoreError::Endpoint(url.to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let address = service_url(
            self.endpoint.as_deref(),
            self.force_path_style,
            &self.region,
            bucket,
            key,
        )?;
        let url = Url::parse(&address).map_err(|_| ObjectStoreError::Endpoint(address.clone()))?;

        let payload_hash = sha256_hex(&body);
        let (amz_date, _) = amz_timestamps(OffsetDateTime::now_utc());
        let signable = SignableRequest {
            method: "PUT",
            canonical_uri: url.path(),
            headers: vec![
                ("content-type", content_type.to_string()),
                ("host", host_header(&url)?),
                ("x-amz-acl", PUBLIC_READ.to_string()),
                ("x-amz-content-sha256", payload_hash.clone()),
                ("x-amz-date", amz_date.clone()),
            ],
            payload_hash: &payload_hash,
        };
        let credentials = Credentials {
            access_key_id: &self.access_key_id,
            secret_access_key: &self.secret_access_key,
            region: &self.region,
        };
        let signature = authorization(&signable, &credentials, &amz_date)
            .map_err(|_| ObjectStoreError::Signing)?;

        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header("x-amz-acl", PUBLIC_READ)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header(AUTHORIZATION, signature)
            .body(body)
            .send()
            .await
            .map_err(ObjectStoreError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|idx| text.is_char_boundary(*idx))
                    .unwrap_or(0);
                text.truncate(cut);
            }
            return Err(ObjectStoreError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(())
    }
}
