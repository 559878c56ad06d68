use crate::{
    auth::AuthUser,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    entities::product::Entity as ProductEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::addresses::{self, AddressInput},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Fulfillment status of an order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

/// Payment status of an order. Monotonic: once `Paid`, never anything else.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::from_str(raw)
            .map_err(|_| ServiceError::InvalidStatus(format!("Unknown order status: {raw}")))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::from_str(raw)
            .map_err(|_| ServiceError::InvalidStatus(format!("Unknown payment status: {raw}")))
    }
}

/// Validates if a fulfillment status transition is allowed. Payment-status
/// guards (e.g. `Processing` requires a paid order) are enforced separately
/// against the order row.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    match (from, to) {
        (OrderStatus::Pending, OrderStatus::Processing) => true,
        (OrderStatus::Pending, OrderStatus::Cancelled) => true,
        (OrderStatus::Processing, OrderStatus::Completed) => true,

        // Allow transitioning to the same status (no-op)
        _ if from == to => true,

        // Terminal states and everything else
        _ => false,
    }
}

fn validate_non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must not be negative".into());
        Err(err)
    }
}

/// One cart line item submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_non_negative_decimal")]
    pub unit_price: Decimal,
}

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemInput>,
    /// Existing address-book entry to ship to
    pub shipping_address_id: Option<Uuid>,
    /// Inline shipping address; persisted to the address book
    pub shipping_address: Option<AddressInput>,
    #[validate(length(min = 1, max = 50, message = "Payment method is required"))]
    pub payment_method: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub provider_order_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub shipping_address_id: Uuid,
    pub shipping_address: String,
    pub notes: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Computes (subtotal, shipping, total) for a set of line items.
pub fn order_totals(items: &[OrderItemInput], shipping_cost: Decimal) -> (Decimal, Decimal, Decimal) {
    let subtotal: Decimal = items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum();
    (subtotal, shipping_cost, subtotal + shipping_cost)
}

/// The only component that writes order and order-item rows. Sequences
/// checkout, enforces ownership on reads, and drives the fulfillment
/// state machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    shipping_flat_rate: Decimal,
    default_currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        shipping_flat_rate: Decimal,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            shipping_flat_rate,
            default_currency,
        }
    }

    /// Creates a new order with its line items as a single atomic unit.
    /// A reader can never observe the order without its items.
    #[instrument(skip(self, request), fields(user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        // Every referenced product must exist and be active before we touch
        // the ledger; the product name is snapshotted onto the line item.
        let mut product_names = Vec::with_capacity(request.items.len());
        for item in &request.items {
            item.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            let product = ProductEntity::find_by_id(item.product_id)
                .one(db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            product_names.push(product.name);
        }

        let (subtotal, shipping_cost, total_amount) =
            order_totals(&request.items, self.shipping_flat_rate);

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let shipping = self
            .resolve_shipping_address(&txn, user, &request, now)
            .await?;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            user_id: Set(user.user_id),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            subtotal: Set(subtotal),
            shipping_cost: Set(shipping_cost),
            total_amount: Set(total_amount),
            currency: Set(self.default_currency.clone()),
            payment_method: Set(request.payment_method.clone()),
            provider_order_id: Set(None),
            provider_payment_id: Set(None),
            shipping_address_id: Set(shipping.0),
            shipping_address: Set(shipping.1),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(request.items.len());
        for (item, product_name) in request.items.iter().zip(product_names) {
            let item_model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(product_name),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order item");
                ServiceError::DatabaseError(e)
            })?;
            item_models.push(item_model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, user_id = %user.user_id, total = %total_amount, "Order created");

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order created event");
        }

        order_to_response(order_model, item_models)
    }

    /// Resolves the shipping destination: either an existing address-book
    /// entry owned by the requester, or an inline address persisted inside
    /// the order-creation transaction. Returns (address id, snapshot text).
    async fn resolve_shipping_address(
        &self,
        txn: &DatabaseTransaction,
        user: &AuthUser,
        request: &CreateOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, String), ServiceError> {
        if let Some(address_id) = request.shipping_address_id {
            let address = addresses::find_owned(txn, user.user_id, address_id).await?;
            return Ok((address.id, addresses::format_shipping_address(&address)));
        }

        if let Some(input) = &request.shipping_address {
            let address = addresses::insert_address(txn, user.user_id, input, now).await?;
            return Ok((address.id, addresses::format_shipping_address(&address)));
        }

        Err(ServiceError::ValidationError(
            "A shipping address is required".to_string(),
        ))
    }

    /// Retrieves an order with its line items. Only the order's owner or an
    /// administrator may read it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
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

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        order_to_response(order, items)
    }

    /// Lists orders with pagination. Customers see their own orders;
    /// administrators see everything.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let page = page.max(1);

        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if !user.is_admin() {
            query = query.filter(order::Column::UserId.eq(user.user_id));
        }

        let paginator = query.paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let orders = orders
            .into_iter()
            .map(|order| order_to_response(order, Vec::new()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Updates an order's fulfillment status, enforcing the state machine
    /// and the payment-status guards.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        ensure_owner_or_admin(user, &order)?;

        let current_status = OrderStatus::parse(&order.status)?;
        let payment_status = PaymentStatus::parse(&order.payment_status)?;

        if current_status == new_status {
            // No-op update; nothing to write.
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return order_to_response(order, items);
        }

        // Customers may only cancel; fulfillment transitions are admin-only.
        if !user.is_admin() && new_status != OrderStatus::Cancelled {
            return Err(ServiceError::Forbidden(
                "Only an administrator may change fulfillment status".to_string(),
            ));
        }

        if current_status.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "Order is already {} and cannot change status",
                current_status
            )));
        }

        if new_status == OrderStatus::Processing && payment_status != PaymentStatus::Paid {
            return Err(ServiceError::Conflict(
                "Order cannot move to processing before payment is settled".to_string(),
            ));
        }

        if new_status == OrderStatus::Cancelled && payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict(
                "A paid order cannot be cancelled".to_string(),
            ));
        }

        if !is_valid_transition(current_status, new_status) {
            return Err(ServiceError::Conflict(format!(
                "Cannot transition from status '{}' to '{}'",
                current_status, new_status
            )));
        }

        let old_status = order.status.clone();
        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(now));

        let updated = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status,
            "Order status updated"
        );

        let event = if new_status == OrderStatus::Cancelled {
            Event::OrderCancelled(order_id)
        } else {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.to_string(),
            }
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order status event");
        }

        order_to_response(updated, items)
    }

    /// Privileged cleanup: removes an order and its line items. Normal
    /// operation cancels orders instead of deleting them.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, user: &AuthUser, order_id: Uuid) -> Result<(), ServiceError> {
        if !user.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only an administrator may delete orders".to_string(),
            ));
        }

        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let result = OrderEntity::delete_by_id(order_id)
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, "Order deleted");

        if let Err(e) = self.event_sender.send(Event::OrderDeleted(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order deleted event");
        }

        Ok(())
    }
}

/// Maps a ledger row (plus line items) into the API representation,
/// re-validating the stored status strings at the boundary.
pub(crate) fn order_to_response(
    order: OrderModel,
    items: Vec<OrderItemModel>,
) -> Result<OrderResponse, ServiceError> {
    let status = OrderStatus::parse(&order.status)?;
    let payment_status = PaymentStatus::parse(&order.payment_status)?;

    Ok(OrderResponse {
        id: order.id,
        order_number: order.order_number,
        user_id: order.user_id,
        status,
        payment_status,
        subtotal: order.subtotal,
        shipping_cost: order.shipping_cost,
        total_amount: order.total_amount,
        currency: order.currency,
        payment_method: order.payment_method,
        provider_order_id: order.provider_order_id,
        provider_payment_id: order.provider_payment_id,
        shipping_address_id: order.shipping_address_id,
        shipping_address: order.shipping_address,
        notes: order.notes,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
        created_at: order.created_at,
        updated_at: order.updated_at,
    })
}

/// Reads are visible to the order's owner and to administrators only.
pub(crate) fn ensure_owner_or_admin(user: &AuthUser, order: &OrderModel) -> Result<(), ServiceError> {
    if order.user_id == user.user_id || user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "You do not have access to this order".to_string(),
        ))
    }
}
