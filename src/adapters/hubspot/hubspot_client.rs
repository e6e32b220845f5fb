//! HubSpot CRM adapter.
//!
//! Implements `CrmClient` against the CRM v3 objects API with a private-app
//! bearer token. Associations are created inline with the object.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::wire::{
    self, association_type, Association, BatchResponse, BatchUpsert, CreateObject, ListResponse,
    ObjectResponse, UpdateObject, UpsertInput,
};
use crate::domain::billing::{
    CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, CrmPaymentId, DealStage,
};
use crate::ports::{
    ContactProperties, CrmClient, CrmError, DealPage, DealProperties, InvoiceProperties,
    LineItemProperties, PaymentProperties,
};

const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEAL_PAGE_SIZE: u32 = 100;

/// HubSpot API configuration.
#[derive(Clone)]
pub struct HubSpotConfig {
    access_token: SecretString,
    base_url: String,
    timeout: Duration,
}

impl HubSpotConfig {
    pub fn new(access_token: SecretString) -> Self {
        Self {
            access_token,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HubSpotClient {
    config: HubSpotConfig,
    http_client: reqwest::Client,
}

impl HubSpotClient {
    pub fn new(config: HubSpotConfig) -> Result<Self, CrmError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CrmError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/crm/v3/objects/{}", self.config.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<T, CrmError> {
        let response = self.dispatch(request, operation).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| CrmError::decode(format!("{}: {}", operation, e)))
    }

    async fn dispatch(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, CrmError> {
        let response = request
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrmError::timeout(format!(
                        "{} timed out after {}s",
                        operation,
                        self.config.timeout.as_secs()
                    ))
                } else {
                    CrmError::network(format!("{}: {}", operation, e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(operation, status = status.as_u16(), body = %body, "HubSpot error response");
        Err(CrmError::from_status(status.as_u16(), body))
    }

    async fn create_object<B: Serialize>(
        &self,
        object_type: &str,
        body: &B,
        operation: &'static str,
    ) -> Result<String, CrmError> {
        let created: ObjectResponse = self
            .send(
                self.http_client.post(self.url(object_type)).json(body),
                operation,
            )
            .await?;
        Ok(created.id)
    }

    async fn patch_deal(
        &self,
        deal_id: &CrmDealId,
        body: &UpdateObject,
        operation: &'static str,
    ) -> Result<(), CrmError> {
        self.dispatch(
            self.http_client
                .patch(self.url(&format!("deals/{}", deal_id)))
                .json(body),
            operation,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    async fn upsert_contact(&self, contact: &ContactProperties) -> Result<CrmContactId, CrmError> {
        let body = BatchUpsert {
            inputs: vec![UpsertInput {
                id_property: "email",
                id: contact.email.clone(),
                properties: wire::contact_properties(contact),
            }],
        };

        let response: BatchResponse = self
            .send(
                self.http_client
                    .post(self.url("contacts/batch/upsert"))
                    .json(&body),
                "upsert_contact",
            )
            .await?;

        response
            .results
            .into_iter()
            .next()
            .map(|r| CrmContactId::new(r.id))
            .ok_or_else(|| CrmError::decode("upsert_contact: empty results"))
    }

    async fn create_deal(
        &self,
        deal: &DealProperties,
        contact: &CrmContactId,
    ) -> Result<CrmDealId, CrmError> {
        let body = CreateObject {
            properties: wire::deal_properties(deal),
            associations: vec![Association::to(
                contact.as_str(),
                association_type::DEAL_TO_CONTACT,
            )],
        };
        self.create_object("deals", &body, "create_deal")
            .await
            .map(CrmDealId::new)
    }

    async fn update_deal(&self, deal_id: &CrmDealId, deal: &DealProperties) -> Result<(), CrmError> {
        let body = UpdateObject {
            properties: wire::deal_properties(deal),
        };
        self.patch_deal(deal_id, &body, "update_deal").await
    }

    async fn update_deal_stage(
        &self,
        deal_id: &CrmDealId,
        stage: DealStage,
    ) -> Result<(), CrmError> {
        let mut properties = serde_json::Map::new();
        properties.insert("dealstage".to_string(), stage.as_str().into());
        self.patch_deal(deal_id, &UpdateObject { properties }, "update_deal_stage")
            .await
    }

    async fn list_deals(&self, after: Option<&str>) -> Result<DealPage, CrmError> {
        let mut query = vec![
            ("limit", DEAL_PAGE_SIZE.to_string()),
            ("properties", wire::DEAL_LIST_PROPERTIES.to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let response: ListResponse = self
            .send(
                self.http_client.get(self.url("deals")).query(&query),
                "list_deals",
            )
            .await?;

        Ok(DealPage {
            next_after: response.paging.and_then(|p| p.next).map(|n| n.after),
            deals: response
                .results
                .into_iter()
                .map(|d| d.into_snapshot())
                .collect(),
        })
    }

    async fn create_invoice(
        &self,
        invoice: &InvoiceProperties,
        contact: &CrmContactId,
        deal: &CrmDealId,
    ) -> Result<CrmInvoiceId, CrmError> {
        let body = CreateObject {
            properties: wire::invoice_properties(invoice),
            associations: vec![
                Association::to(contact.as_str(), association_type::INVOICE_TO_CONTACT),
                Association::to(deal.as_str(), association_type::INVOICE_TO_DEAL),
            ],
        };
        self.create_object("invoices", &body, "create_invoice")
            .await
            .map(CrmInvoiceId::new)
    }

    async fn create_line_item(
        &self,
        line_item: &LineItemProperties,
        invoice: &CrmInvoiceId,
    ) -> Result<CrmLineItemId, CrmError> {
        let body = CreateObject {
            properties: wire::line_item_properties(line_item),
            associations: vec![Association::to(
                invoice.as_str(),
                association_type::LINE_ITEM_TO_INVOICE,
            )],
        };
        self.create_object("line_items", &body, "create_line_item")
            .await
            .map(CrmLineItemId::new)
    }

    async fn create_payment(
        &self,
        payment: &PaymentProperties,
        line_item: &CrmLineItemId,
    ) -> Result<CrmPaymentId, CrmError> {
        let body = CreateObject {
            properties: wire::payment_properties(payment),
            associations: vec![Association::to(
                line_item.as_str(),
                association_type::PAYMENT_TO_LINE_ITEM,
            )],
        };
        self.create_object("commerce_payments", &body, "create_payment")
            .await
            .map(CrmPaymentId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_public_api() {
        let config = HubSpotConfig::new(SecretString::new("pat-na1-test".to_string()));
        assert_eq!(config.base_url, "https://api.hubapi.com");
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn object_urls_are_v3() {
        let client = HubSpotClient::new(
            HubSpotConfig::new(SecretString::new("token".to_string()))
                .with_base_url("http://localhost:9000"),
        )
        .unwrap();

        assert_eq!(
            client.url("contacts/batch/upsert"),
            "http://localhost:9000/crm/v3/objects/contacts/batch/upsert"
        );
        assert_eq!(client.url("deals/42"), "http://localhost:9000/crm/v3/objects/deals/42");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_retryable_failure() {
        let client = HubSpotClient::new(
            HubSpotConfig::new(SecretString::new("token".to_string()))
                .with_base_url("http://127.0.0.1:9")
                .with_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let err = client
            .update_deal_stage(&CrmDealId::new("1"), DealStage::ClosedLost)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
