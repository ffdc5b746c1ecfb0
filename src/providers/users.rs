// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User directory client. Identity data comes from the KYC provider through
//! the user service, so both lookups share one endpoint.

use async_trait::async_trait;

use super::{http::JsonApi, ProviderError, UserDirectory, UserProfile, VerifiedIdentity};
use crate::config::ServiceEndpoint;

#[derive(Debug, Clone)]
pub struct UserApiClient {
    api: JsonApi,
}

impl UserApiClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ProviderError> {
        Ok(Self {
            api: JsonApi::new(&endpoint.base_url, &endpoint.api_key)?,
        })
    }
}

#[async_trait]
impl UserDirectory for UserApiClient {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
        self.api.get_optional(&format!("/users/{user_id}"), &[]).await
    }

    async fn identity(&self, user_id: &str) -> Result<Option<VerifiedIdentity>, ProviderError> {
        self.api
            .get_optional(&format!("/users/{user_id}/identity"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn missing_identity_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/u1/identity"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "u1",
                "phone_number": "2348012345678",
                "evm_wallet_address": "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12"
            })))
            .mount(&server)
            .await;

        let client = UserApiClient::new(&ServiceEndpoint {
            base_url: server.uri(),
            api_key: "k".into(),
        })
        .unwrap();

        assert_eq!(client.identity("u1").await.unwrap(), None);
        let user = client.find_user("u1").await.unwrap().expect("user exists");
        assert_eq!(user.phone_number, "2348012345678");
        assert_eq!(user.solana_wallet_address, None);
    }
}
