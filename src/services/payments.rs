use crate::{
    auth::AuthUser,
    config::AppConfig,
    entities::order::{self, Entity as OrderEntity},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{ensure_owner_or_admin, order_to_response, OrderResponse, PaymentStatus, OrderStatus},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Connection settings for the external payment processor.
#[derive(Clone, Debug)]
pub struct PaymentGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
    pub intent_timeout: Duration,
}

impl From<&AppConfig> for PaymentGatewayConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.payment_api_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.payment_api_key.clone(),
            api_secret: cfg.payment_api_secret.clone(),
            webhook_secret: cfg.payment_webhook_secret.clone(),
            intent_timeout: Duration::from_secs(cfg.payment_intent_timeout_secs),
        }
    }
}

/// Remote intent as returned to the client.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub provider_order_id: String,
    /// Amount in integer minor units (e.g. cents)
    pub amount: i64,
    pub currency: String,
}

/// Signed settlement callback relayed after the client completes payment.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentCallback {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    /// Hex HMAC-SHA-256 over `"{provider_order_id}|{provider_payment_id}"`
    pub signature: String,
}

#[derive(Debug, Serialize)]
struct ProviderOrderRequest {
    amount: i64,
    currency: String,
    receipt: String,
}

#[derive(Debug, Deserialize)]
struct ProviderOrderResponse {
    id: String,
}

/// Converts a major-unit decimal amount into integer minor units for the
/// processor API. Payment amounts never travel as floats.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("Amount {} out of range for minor units", amount))
        })
}

/// Computes the callback signature for the given provider identifiers.
pub fn sign_callback(secret: &str, provider_order_id: &str, provider_payment_id: &str) -> String {
    let payload = format!("{}|{}", provider_order_id, provider_payment_id);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_callback_signature(secret: &str, callback: &PaymentCallback) -> bool {
    let expected = sign_callback(
        secret,
        &callback.provider_order_id,
        &callback.provider_payment_id,
    );
    constant_time_eq(&expected, &callback.signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Isolates all interaction with the external payment processor: intent
/// creation and signature-verified settlement. Settlement is the only path
/// that can mark an order paid.
#[derive(Clone)]
pub struct PaymentGatewayService {
    db: Arc<DatabaseConnection>,
    config: PaymentGatewayConfig,
    client: reqwest::Client,
    event_sender: Arc<EventSender>,
}

impl PaymentGatewayService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: PaymentGatewayConfig,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.intent_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            db,
            config,
            client,
            event_sender,
        }
    }

    /// Creates (or reuses) a remote payment intent for an unpaid order.
    /// Never changes `payment_status`; a timeout leaves the order pending
    /// and the call safe to retry.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_intent(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        ensure_owner_or_admin(user, &order)?;

        match PaymentStatus::parse(&order.payment_status)? {
            PaymentStatus::Pending => {}
            PaymentStatus::Paid => {
                return Err(ServiceError::Conflict("Order is already paid".to_string()))
            }
            PaymentStatus::Failed => {
                return Err(ServiceError::Conflict(
                    "Payment for this order has already failed".to_string(),
                ))
            }
        }

        let amount = to_minor_units(order.total_amount)?;
        let currency = order.currency.clone();

        // A retried call reuses the recorded unpaid intent instead of
        // minting a new remote order.
        if let Some(existing) = order.provider_order_id.clone() {
            info!(order_id = %order_id, provider_order_id = %existing, "Reusing existing payment intent");
            return Ok(PaymentIntentResponse {
                provider_order_id: existing,
                amount,
                currency,
            });
        }

        let request = ProviderOrderRequest {
            amount,
            currency: currency.clone(),
            receipt: order.order_number.clone(),
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Payment provider call failed");
                ServiceError::PaymentUpstream(format!("intent creation failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!(order_id = %order_id, status = %status, "Payment provider rejected intent creation");
            return Err(ServiceError::PaymentUpstream(format!(
                "intent creation returned {}",
                status
            )));
        }

        let provider_order: ProviderOrderResponse = response.json().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Payment provider returned malformed intent");
            ServiceError::PaymentUpstream(format!("malformed intent response: {}", e))
        })?;

        let mut active: order::ActiveModel = order.into();
        active.provider_order_id = Set(Some(provider_order.id.clone()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(db).await.map_err(ServiceError::DatabaseError)?;

        info!(
            order_id = %order_id,
            provider_order_id = %provider_order.id,
            amount_minor = amount,
            "Payment intent created"
        );

        Ok(PaymentIntentResponse {
            provider_order_id: provider_order.id,
            amount,
            currency,
        })
    }

    /// Verifies a payment callback and settles the order. The transition to
    /// paid is a single conditional update keyed on `payment_status =
    /// 'pending'`; when two callbacks race exactly one wins and the loser
    /// observes the idempotent already-paid outcome.
    #[instrument(skip(self, callback), fields(order_id = %order_id))]
    pub async fn verify_and_settle(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        callback: PaymentCallback,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // The callback must reference the intent recorded on this order.
        match &order.provider_order_id {
            Some(recorded) if *recorded == callback.provider_order_id => {}
            _ => {
                warn!(
                    order_id = %order_id,
                    callback_provider_order_id = %callback.provider_order_id,
                    "Payment callback referenced a different provider order"
                );
                return Err(ServiceError::OrderMismatch);
            }
        }

        ensure_owner_or_admin(user, &order)?;

        if !verify_callback_signature(&self.config.webhook_secret, &callback) {
            // Security event: possible forgery or misconfigured secret.
            warn!(
                order_id = %order_id,
                provider_order_id = %callback.provider_order_id,
                "Payment callback signature verification failed"
            );
            return Err(ServiceError::InvalidSignature);
        }

        match PaymentStatus::parse(&order.payment_status)? {
            PaymentStatus::Pending => {}
            PaymentStatus::Paid => return Err(ServiceError::AlreadyPaid),
            PaymentStatus::Failed => {
                return Err(ServiceError::Conflict(
                    "Payment for this order has already failed".to_string(),
                ))
            }
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid.to_string()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Processing.to_string()),
            )
            .col_expr(
                order::Column::ProviderPaymentId,
                Expr::value(callback.provider_payment_id.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(
                order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()),
            )
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            // A concurrent callback settled first; this is the idempotent
            // already-paid case, not an error.
            info!(order_id = %order_id, "Settlement lost the conditional update race");
            return Err(ServiceError::AlreadyPaid);
        }

        info!(
            order_id = %order_id,
            provider_payment_id = %callback.provider_payment_id,
            "Order settled"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPaid {
                order_id,
                provider_payment_id: callback.provider_payment_id.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send order paid event");
        }

        self.load_order_response(order_id).await
    }

    /// Records a provider-reported payment failure: `pending/pending` moves
    /// to `cancelled/failed`. Guarded by the same conditional update, so a
    /// settled order can never be clawed back.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn report_failure(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        ensure_owner_or_admin(user, &order)?;

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.to_string()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(
                order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_string()),
            )
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            match PaymentStatus::parse(&order.payment_status)? {
                // Duplicate failure reports are a no-op.
                PaymentStatus::Failed => return self.load_order_response(order_id).await,
                _ => {
                    return Err(ServiceError::Conflict(
                        "Order is already paid".to_string(),
                    ))
                }
            }
        }

        warn!(order_id = %order_id, "Payment reported failed; order cancelled");

        if let Err(e) = self.event_sender.send(Event::PaymentFailed { order_id }).await {
            warn!(error = %e, order_id = %order_id, "Failed to send payment failed event");
        }

        self.load_order_response(order_id).await
    }

    async fn load_order_response(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        order_to_response(order, items)
    }
}
