//! HubSpot CRM v3 request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ports::{
    ContactProperties, DealProperties, DealSnapshot, InvoiceProperties, LineItemProperties,
    PaymentProperties,
};
use crate::domain::billing::CrmDealId;

/// HubSpot-defined association type ids for the default object schema.
pub mod association_type {
    pub const DEAL_TO_CONTACT: u32 = 3;
    pub const INVOICE_TO_CONTACT: u32 = 177;
    pub const INVOICE_TO_DEAL: u32 = 175;
    pub const LINE_ITEM_TO_INVOICE: u32 = 410;
    pub const PAYMENT_TO_LINE_ITEM: u32 = 396;
}

pub const DEAL_LIST_PROPERTIES: &str = "first_subscription_date,dealstage";

#[derive(Debug, Serialize)]
pub struct CreateObject {
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<Association>,
}

#[derive(Debug, Serialize)]
pub struct UpdateObject {
    pub properties: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Association {
    pub to: AssociationTarget,
    pub types: Vec<AssociationType>,
}

impl Association {
    pub fn to(id: &str, type_id: u32) -> Self {
        Self {
            to: AssociationTarget { id: id.to_string() },
            types: vec![AssociationType {
                association_category: "HUBSPOT_DEFINED",
                association_type_id: type_id,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssociationTarget {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationType {
    pub association_category: &'static str,
    pub association_type_id: u32,
}

#[derive(Debug, Serialize)]
pub struct BatchUpsert {
    pub inputs: Vec<UpsertInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertInput {
    pub id_property: &'static str,
    pub id: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<ObjectResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub results: Vec<ListedObject>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub struct ListedObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    pub next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
pub struct NextPage {
    pub after: String,
}

impl ListedObject {
    fn string_property(&self, name: &str) -> Option<String> {
        match self.properties.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn into_snapshot(self) -> DealSnapshot {
        DealSnapshot {
            stage: self.string_property("dealstage"),
            first_subscription_date: self.string_property("first_subscription_date"),
            id: CrmDealId::new(self.id),
        }
    }
}

fn props<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn money(amount: f64) -> Value {
    Value::String(format!("{:.2}", amount))
}

pub fn contact_properties(contact: &ContactProperties) -> Map<String, Value> {
    props([
        ("email", Value::from(contact.email.as_str())),
        ("firstname", Value::from(contact.firstname.as_str())),
        ("lastname", Value::from(contact.lastname.as_str())),
    ])
}

pub fn deal_properties(deal: &DealProperties) -> Map<String, Value> {
    props([
        ("dealname", Value::from(deal.dealname.as_str())),
        ("dealstage", Value::from(deal.dealstage.as_str())),
        ("pipeline", Value::from(deal.pipeline.as_str())),
        (
            "stripe_subscription_id",
            Value::from(deal.stripe_subscription_id.as_str()),
        ),
    ])
}

pub fn invoice_properties(invoice: &InvoiceProperties) -> Map<String, Value> {
    props([
        ("stripe_invoice_id", Value::from(invoice.stripe_invoice_id.as_str())),
        ("hs_currency", Value::from(invoice.currency.to_uppercase())),
        ("amount", money(invoice.amount)),
        (
            "hs_invoice_date",
            Value::String(invoice.invoice_date.date().format("%Y-%m-%d").to_string()),
        ),
    ])
}

pub fn line_item_properties(line_item: &LineItemProperties) -> Map<String, Value> {
    props([
        ("name", Value::from(line_item.name.as_str())),
        ("quantity", Value::String(line_item.quantity.to_string())),
        ("price", money(line_item.price)),
    ])
}

pub fn payment_properties(payment: &PaymentProperties) -> Map<String, Value> {
    props([
        ("hs_initial_amount", money(payment.amount)),
        ("hs_currency_code", Value::from(payment.currency.to_uppercase())),
        (
            "hs_initiated_date",
            Value::String(payment.payment_date.as_datetime().to_rfc3339()),
        ),
        ("stripe_invoice_id", Value::from(payment.stripe_invoice_id.as_str())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::DealStage;
    use crate::domain::foundation::Timestamp;

    #[test]
    fn deal_properties_use_hubspot_names() {
        let deal = DealProperties {
            dealname: "Pro – ana@example.com".to_string(),
            dealstage: DealStage::ContractSent,
            pipeline: "default".to_string(),
            stripe_subscription_id: "sub_1".to_string(),
        };

        let props = deal_properties(&deal);

        assert_eq!(props["dealstage"], "contractsent");
        assert_eq!(props["stripe_subscription_id"], "sub_1");
        assert!(!props.contains_key("first_subscription_date"));
    }

    #[test]
    fn amounts_are_sent_with_two_decimals() {
        let invoice = InvoiceProperties {
            stripe_invoice_id: "in_1".to_string(),
            currency: "usd".to_string(),
            amount: 25.0,
            invoice_date: Timestamp::from_unix_secs(1_704_067_200).unwrap(),
        };

        let props = invoice_properties(&invoice);

        assert_eq!(props["amount"], "25.00");
        assert_eq!(props["hs_currency"], "USD");
        assert_eq!(props["hs_invoice_date"], "2024-01-01");
    }

    #[test]
    fn association_serializes_in_hubspot_shape() {
        let json = serde_json::to_value(Association::to("501", association_type::DEAL_TO_CONTACT))
            .unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "to": {"id": "501"},
                "types": [{"associationCategory": "HUBSPOT_DEFINED", "associationTypeId": 3}]
            })
        );
    }

    #[test]
    fn listed_deal_with_blank_properties_has_none() {
        let listed: ListedObject = serde_json::from_value(serde_json::json!({
            "id": "77",
            "properties": {"dealstage": "contractsent", "first_subscription_date": ""}
        }))
        .unwrap();

        let snapshot = listed.into_snapshot();

        assert_eq!(snapshot.id.as_str(), "77");
        assert_eq!(snapshot.stage.as_deref(), Some("contractsent"));
        assert!(snapshot.first_subscription_date.is_none());
    }
}
