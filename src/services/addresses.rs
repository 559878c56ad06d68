use crate::{
    auth::AuthUser,
    entities::address::{
        self, ActiveModel as AddressActiveModel, Entity as AddressEntity, Model as AddressModel,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A shipping destination as submitted by the user.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 100, message = "Recipient name is required"))]
    pub recipient: String,
    #[validate(length(min = 1, max = 30, message = "Phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, max = 200, message = "Address line 1 is required"))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 100, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, max = 20, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100, message = "Country is required"))]
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddressResponse {
    pub id: Uuid,
    pub recipient: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<AddressModel> for AddressResponse {
    fn from(model: AddressModel) -> Self {
        Self {
            id: model.id,
            recipient: model.recipient,
            phone: model.phone,
            line1: model.line1,
            line2: model.line2,
            city: model.city,
            state: model.state,
            postal_code: model.postal_code,
            country: model.country,
            is_default: model.is_default,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Renders the single-line shipping snapshot frozen onto orders.
pub fn format_shipping_address(address: &AddressModel) -> String {
    let mut parts = vec![address.recipient.clone(), address.line1.clone()];
    if let Some(line2) = &address.line2 {
        if !line2.trim().is_empty() {
            parts.push(line2.clone());
        }
    }
    parts.push(address.city.clone());
    parts.push(format!("{} {}", address.state, address.postal_code));
    parts.push(address.country.clone());
    parts.join(", ")
}

/// Loads an address and checks it belongs to the given user.
pub(crate) async fn find_owned<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: Uuid,
) -> Result<AddressModel, ServiceError> {
    AddressEntity::find_by_id(address_id)
        .one(db)
        .await
        .map_err(ServiceError::DatabaseError)?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
}

/// Inserts a new address for the user. The first address a user ever
/// creates becomes the default.
pub(crate) async fn insert_address<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    input: &AddressInput,
    now: DateTime<Utc>,
) -> Result<AddressModel, ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let existing = AddressEntity::find()
        .filter(address::Column::UserId.eq(user_id))
        .count(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let model = AddressActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        recipient: Set(input.recipient.clone()),
        phone: Set(input.phone.clone()),
        line1: Set(input.line1.clone()),
        line2: Set(input.line2.clone()),
        city: Set(input.city.clone()),
        state: Set(input.state.clone()),
        postal_code: Set(input.postal_code.clone()),
        country: Set(input.country.clone()),
        is_default: Set(existing == 0),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };

    model.insert(db).await.map_err(ServiceError::DatabaseError)
}

/// User address book. Maintains the invariant that a user with at least one
/// address has exactly one default.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(user_id = %user.user_id))]
    pub async fn create_address(
        &self,
        user: &AuthUser,
        input: AddressInput,
    ) -> Result<AddressResponse, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let model = insert_address(&txn, user.user_id, &input, Utc::now()).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(address_id = %model.id, user_id = %user.user_id, "Address created");
        Ok(model.into())
    }

    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn list_addresses(&self, user: &AuthUser) -> Result<Vec<AddressResponse>, ServiceError> {
        let addresses = AddressEntity::find()
            .filter(address::Column::UserId.eq(user.user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(addresses.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, input), fields(address_id = %address_id))]
    pub async fn update_address(
        &self,
        user: &AuthUser,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressResponse, ServiceError> {
        input
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let address = find_owned(&txn, user.user_id, address_id).await?;

        let mut active: AddressActiveModel = address.into();
        active.recipient = Set(input.recipient);
        active.phone = Set(input.phone);
        active.line1 = Set(input.line1);
        active.line2 = Set(input.line2);
        active.city = Set(input.city);
        active.state = Set(input.state);
        active.postal_code = Set(input.postal_code);
        active.country = Set(input.country);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        Ok(updated.into())
    }

    /// Makes the given address the user's default. Unsetting the previous
    /// default and setting the new one happen in one transaction so a
    /// concurrent reader never observes two defaults.
    #[instrument(skip(self), fields(address_id = %address_id))]
    pub async fn set_default(
        &self,
        user: &AuthUser,
        address_id: Uuid,
    ) -> Result<AddressResponse, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let address = find_owned(&txn, user.user_id, address_id).await?;

        AddressEntity::update_many()
            .col_expr(address::Column::IsDefault, Expr::value(false))
            .filter(address::Column::UserId.eq(user.user_id))
            .filter(address::Column::IsDefault.eq(true))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut active: AddressActiveModel = address.into();
        active.is_default = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(address_id = %address_id, user_id = %user.user_id, "Default address changed");
        Ok(updated.into())
    }

    /// Deletes an address. When the default is removed and other addresses
    /// remain, the most recently created one is promoted so the user never
    /// ends up with addresses but no default.
    #[instrument(skip(self), fields(address_id = %address_id))]
    pub async fn delete_address(
        &self,
        user: &AuthUser,
        address_id: Uuid,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let address = find_owned(&txn, user.user_id, address_id).await?;
        let was_default = address.is_default;

        AddressEntity::delete_by_id(address.id)
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if was_default {
            let successor = AddressEntity::find()
                .filter(address::Column::UserId.eq(user.user_id))
                .order_by_desc(address::Column::CreatedAt)
                .one(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;

            if let Some(successor) = successor {
                let mut active: AddressActiveModel = successor.into();
                active.is_default = Set(true);
                active.updated_at = Set(Some(Utc::now()));
                active
                    .update(&txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
            }
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(address_id = %address_id, user_id = %user.user_id, "Address deleted");
        Ok(())
    }
}
