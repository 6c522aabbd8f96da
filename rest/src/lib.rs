#![warn(missing_docs)]
//! Client library which exposes node/pool/replica/volume status from the
//! control plane's agents through REST.
//! Different versions are exposed through `versions`.
//!
//! # Example:
//!
//! async fn main() {
//!     use rest_client::versions::v0::RestClient;
//!     let client = RestClient::new("http://localhost:8080");
//!     let _nodes = client.get_nodes().await.unwrap();
//! }

/// expose different versions of the client
pub mod versions;

use actix_web::client::Client;
use serde::Deserialize;
use std::string::ToString;

/// Actix Rest Client
#[derive(Clone)]
pub struct ActixRestClient {
    client: actix_web::client::Client,
    url: String,
}

impl ActixRestClient {
    /// creates a new client which uses the specified `url`
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::default(),
            url: url.to_string(),
        })
    }
    async fn get_vec<R>(&self, urn: String) -> anyhow::Result<Vec<R>>
    where
        for<'de> R: Deserialize<'de>,
    {
        let uri = format!("{}{}", self.url, urn);

        let mut rest_response =
            self.client.get(uri.clone()).send().await.map_err(|error| {
                anyhow::anyhow!(
                    "Failed to get uri '{}' from rest, err={:?}",
                    uri,
                    error
                )
            })?;

        let rest_body = rest_response.body().await?;
        match serde_json::from_slice(&rest_body) {
            Ok(result) => Ok(result),
            Err(_) => Ok(vec![serde_json::from_slice::<R>(&rest_body)?]),
        }
    }
}
