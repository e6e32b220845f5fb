//! PostgreSQL implementation of LedgerStore.
//!
//! Every method is one statement (the deal link adds a follow-up read when
//! the compare-and-set loses). Status writes set `status` and `is_active`
//! together; the table carries a CHECK constraint for the same invariant.
//! The invoice claim is a conditional update, so two deliveries of the same
//! paid invoice cannot both win it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{
    BillingLinkage, Cancellation, CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId,
    InvoiceChainState, InvoiceResume, Role, StatusChange, Subscription, SubscriptionStatus, User,
    INVOICE_CLAIM_TIMEOUT_SECS,
};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::ports::{InvoiceClaim, LedgerStore, LinkOutcome, SaveResult};

const USER_COLUMNS: &str = "id, email, name, role, password_hash, stripe_customer_id, \
     lifecycle_status, crm_contact_id, crm_deal_id, crm_invoice_id, crm_line_item_id, \
     invoiced_external_id, invoice_state, invoice_claimed_at, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, stripe_subscription_id, stripe_customer_id, \
     stripe_price_id, plan_name, status, currency, current_period_start, current_period_end, \
     cancel_at, cancel_at_period_end, canceled_at, metadata, created_at, updated_at";

pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    role: String,
    password_hash: String,
    stripe_customer_id: Option<String>,
    lifecycle_status: Option<String>,
    crm_contact_id: Option<String>,
    crm_deal_id: Option<String>,
    crm_invoice_id: Option<String>,
    crm_line_item_id: Option<String>,
    invoiced_external_id: Option<String>,
    invoice_state: Option<String>,
    invoice_claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let lifecycle_status = row
            .lifecycle_status
            .as_deref()
            .map(parse_status)
            .transpose()?;
        let invoice_state = row
            .invoice_state
            .as_deref()
            .map(|s| {
                InvoiceChainState::parse(s).ok_or_else(|| {
                    DomainError::database(format!("Invalid invoice state value: {}", s))
                })
            })
            .transpose()?;

        Ok(User {
            id: UserId::from_uuid(row.id),
            email: row.email,
            name: row.name,
            role: Role::parse_lenient(&row.role),
            password_hash: row.password_hash,
            billing: BillingLinkage {
                external_customer_id: row.stripe_customer_id,
                lifecycle_status,
                crm_contact_id: row.crm_contact_id.map(CrmContactId::new),
                crm_deal_id: row.crm_deal_id.map(CrmDealId::new),
                crm_invoice_id: row.crm_invoice_id.map(CrmInvoiceId::new),
                crm_line_item_id: row.crm_line_item_id.map(CrmLineItemId::new),
                invoiced_external_id: row.invoiced_external_id,
                invoice_state,
                invoice_claimed_at: row.invoice_claimed_at.map(Timestamp::from_datetime),
            },
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    stripe_subscription_id: String,
    stripe_customer_id: String,
    stripe_price_id: String,
    plan_name: String,
    status: String,
    currency: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    cancel_at: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    canceled_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription::reconstitute(
            SubscriptionId::from_uuid(row.id),
            UserId::from_uuid(row.user_id),
            row.stripe_subscription_id,
            row.stripe_customer_id,
            row.stripe_price_id,
            row.plan_name,
            parse_status(&row.status)?,
            row.currency,
            Timestamp::from_datetime(row.current_period_start),
            Timestamp::from_datetime(row.current_period_end),
            Cancellation {
                cancel_at: row.cancel_at.map(Timestamp::from_datetime),
                cancel_at_period_end: row.cancel_at_period_end,
                canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            },
            row.metadata,
            Timestamp::from_datetime(row.created_at),
            Timestamp::from_datetime(row.updated_at),
        ))
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    s.parse::<SubscriptionStatus>()
        .map_err(|e| DomainError::database(format!("Invalid status value: {}", e)))
}

fn db_error(operation: &str, e: sqlx::Error) -> DomainError {
    DomainError::database(format!("Failed to {}: {}", operation, e))
}

fn user_not_found(user_id: &UserId) -> DomainError {
    DomainError::new(ErrorCode::UserNotFound, "User not found")
        .with_detail("user_id", user_id.to_string())
}

fn optional_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.map(|t| *t.as_datetime())
}

impl PostgresLedgerStore {
    async fn fetch_user(
        &self,
        filter: &str,
        bind: &str,
        operation: &str,
    ) -> Result<Option<User>, DomainError> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(operation, e))?
            .map(User::try_from)
            .transpose()
    }

    async fn update_user_column(
        &self,
        user_id: &UserId,
        column: &'static str,
        value: &str,
    ) -> Result<(), DomainError> {
        let sql = format!(
            "UPDATE users SET {} = $2, updated_at = NOW() WHERE id = $1",
            column
        );
        let result = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("update user", e))?;

        if result.rows_affected() == 0 {
            return Err(user_not_found(user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find user", e))?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        self.fetch_user("LOWER(email) = LOWER($1)", email, "find user by email")
            .await
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, DomainError> {
        self.fetch_user("stripe_customer_id = $1", customer_id, "find user by customer")
            .await
    }

    async fn set_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<(), DomainError> {
        self.update_user_column(user_id, "stripe_customer_id", customer_id)
            .await
    }

    async fn set_lifecycle_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError> {
        self.update_user_column(user_id, "lifecycle_status", status.as_str())
            .await
    }

    async fn set_lifecycle_status_by_customer(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE users SET lifecycle_status = $2, updated_at = NOW() \
             WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("set lifecycle status", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_crm_contact_id(
        &self,
        user_id: &UserId,
        contact_id: &CrmContactId,
    ) -> Result<(), DomainError> {
        self.update_user_column(user_id, "crm_contact_id", contact_id.as_str())
            .await
    }

    async fn link_crm_deal(
        &self,
        user_id: &UserId,
        deal_id: &CrmDealId,
    ) -> Result<LinkOutcome, DomainError> {
        let result = sqlx::query(
            "UPDATE users SET crm_deal_id = $2, updated_at = NOW() \
             WHERE id = $1 AND crm_deal_id IS NULL",
        )
        .bind(user_id.as_uuid())
        .bind(deal_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("link deal", e))?;

        if result.rows_affected() == 1 {
            return Ok(LinkOutcome::Linked);
        }

        let stored: Option<(Option<String>,)> =
            sqlx::query_as("SELECT crm_deal_id FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("read linked deal", e))?;

        match stored {
            None => Err(user_not_found(user_id)),
            Some((Some(existing),)) if existing != deal_id.as_str() => {
                Ok(LinkOutcome::AlreadyLinked(CrmDealId::new(existing)))
            }
            Some(_) => Ok(LinkOutcome::Linked),
        }
    }

    async fn claim_invoice(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
    ) -> Result<InvoiceClaim, DomainError> {
        // SET expressions see the row as it was before the update.
        let claimed: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            UPDATE users SET
                crm_invoice_id = CASE WHEN invoiced_external_id = $2 THEN crm_invoice_id END,
                crm_line_item_id = CASE WHEN invoiced_external_id = $2 THEN crm_line_item_id END,
                invoiced_external_id = $2,
                invoice_state = 'claimed',
                invoice_claimed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND (invoiced_external_id IS DISTINCT FROM $2
                   OR invoice_state IS NULL
                   OR invoice_state = 'interrupted'
                   OR (invoice_state = 'claimed'
                       AND invoice_claimed_at <= NOW() - make_interval(secs => $3)))
            RETURNING crm_invoice_id, crm_line_item_id
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(external_invoice_id)
        .bind(INVOICE_CLAIM_TIMEOUT_SECS as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("claim invoice", e))?;

        Ok(match claimed {
            Some((invoice_id, line_item_id)) => InvoiceClaim::Claimed(InvoiceResume {
                invoice_id: invoice_id.map(CrmInvoiceId::new),
                line_item_id: line_item_id.map(CrmLineItemId::new),
            }),
            None => InvoiceClaim::Held,
        })
    }

    async fn set_crm_invoice_id(
        &self,
        user_id: &UserId,
        invoice_id: &CrmInvoiceId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE users SET crm_invoice_id = $2, updated_at = NOW() \
             WHERE id = $1 AND invoiced_external_id = $3",
        )
        .bind(user_id.as_uuid())
        .bind(invoice_id.as_str())
        .bind(external_invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("set crm invoice", e))?;
        Ok(())
    }

    async fn set_crm_line_item_id(
        &self,
        user_id: &UserId,
        line_item_id: &CrmLineItemId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE users SET crm_line_item_id = $2, updated_at = NOW() \
             WHERE id = $1 AND invoiced_external_id = $3",
        )
        .bind(user_id.as_uuid())
        .bind(line_item_id.as_str())
        .bind(external_invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("set crm line item", e))?;
        Ok(())
    }

    async fn finish_invoice_claim(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
        state: InvoiceChainState,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE users SET invoice_state = $3, updated_at = NOW() \
             WHERE id = $1 AND invoiced_external_id = $2 AND invoice_state = 'claimed'",
        )
        .bind(user_id.as_uuid())
        .bind(external_invoice_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("finish invoice claim", e))?;
        Ok(())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE stripe_subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(external_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subscription", e))?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, stripe_subscription_id, stripe_customer_id, stripe_price_id,
                plan_name, status, is_active, currency, current_period_start,
                current_period_end, cancel_at, cancel_at_period_end, canceled_at,
                metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (stripe_subscription_id) DO NOTHING
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.external_customer_id)
        .bind(&subscription.external_price_id)
        .bind(&subscription.plan_name)
        .bind(subscription.status().as_str())
        .bind(subscription.is_active())
        .bind(&subscription.currency)
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(optional_datetime(subscription.cancellation.cancel_at))
        .bind(subscription.cancellation.cancel_at_period_end)
        .bind(optional_datetime(subscription.cancellation.canceled_at))
        .bind(&subscription.metadata)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert subscription", e))?;

        Ok(if result.rows_affected() == 0 {
            SaveResult::AlreadyExists
        } else {
            SaveResult::Inserted
        })
    }

    async fn apply_status_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                status = $2,
                is_active = $3,
                cancel_at = $4,
                cancel_at_period_end = $5,
                canceled_at = $6,
                current_period_start = COALESCE($7, current_period_start),
                current_period_end = COALESCE($8, current_period_end),
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );

        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(external_subscription_id)
            .bind(change.status.as_str())
            .bind(change.status.is_active())
            .bind(optional_datetime(change.cancellation.cancel_at))
            .bind(change.cancellation.cancel_at_period_end)
            .bind(optional_datetime(change.cancellation.canceled_at))
            .bind(optional_datetime(change.current_period_start))
            .bind(optional_datetime(change.current_period_end))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("apply status change", e))?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn find_active_subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND is_active \
             ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find active subscription", e))?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn update_cancellation(
        &self,
        external_subscription_id: &str,
        cancellation: &Cancellation,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                cancel_at = $2,
                cancel_at_period_end = $3,
                canceled_at = $4,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .bind(optional_datetime(cancellation.cancel_at))
        .bind(cancellation.cancel_at_period_end)
        .bind(optional_datetime(cancellation.canceled_at))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update cancellation", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_row(lifecycle_status: Option<&str>) -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            name: "Ana".to_string(),
            role: "admin".to_string(),
            password_hash: "hash".to_string(),
            stripe_customer_id: Some("cus_1".to_string()),
            lifecycle_status: lifecycle_status.map(str::to_string),
            crm_contact_id: Some("101".to_string()),
            crm_deal_id: None,
            crm_invoice_id: Some("501".to_string()),
            crm_line_item_id: None,
            invoiced_external_id: Some("in_1".to_string()),
            invoice_state: Some("interrupted".to_string()),
            invoice_claimed_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn user_row_maps_linkage() {
        let user = User::try_from(user_row(Some("past_due"))).unwrap();

        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.billing.lifecycle_status, Some(SubscriptionStatus::PastDue));
        assert_eq!(user.billing.crm_contact_id, Some(CrmContactId::new("101")));
        assert!(user.billing.crm_deal_id.is_none());
        assert_eq!(user.billing.invoice_state, Some(InvoiceChainState::Interrupted));
        assert!(user.billing.can_claim_invoice("in_1", Timestamp::now()));
    }

    #[test]
    fn user_row_with_unknown_invoice_state_is_rejected() {
        let mut row = user_row(None);
        row.invoice_state = Some("pending".to_string());

        let err = User::try_from(row).unwrap_err();

        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn user_row_with_unknown_status_is_rejected() {
        let err = User::try_from(user_row(Some("trialing"))).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn subscription_row_derives_is_active_from_status() {
        let now = Utc::now();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            stripe_subscription_id: "sub_1".to_string(),
            stripe_customer_id: "cus_1".to_string(),
            stripe_price_id: "price_1".to_string(),
            plan_name: "Pro".to_string(),
            status: "canceled".to_string(),
            currency: "usd".to_string(),
            current_period_start: now,
            current_period_end: now,
            cancel_at: None,
            cancel_at_period_end: true,
            canceled_at: Some(now),
            metadata: serde_json::json!({"user_id": "x"}),
            created_at: now,
            updated_at: now,
        };

        let subscription = Subscription::try_from(row).unwrap();

        assert_eq!(subscription.status(), SubscriptionStatus::Canceled);
        assert!(!subscription.is_active());
        assert!(subscription.cancellation.cancel_at_period_end);
    }
}
