use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        addresses::AddressService,
        orders::OrderService,
        payments::{PaymentGatewayConfig, PaymentGatewayService},
    },
};

pub mod addresses;
pub mod orders;
pub mod payments;

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentGatewayService>,
    pub addresses: Arc<AddressService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let mut shipping_flat_rate = Decimal::from_f64_retain(config.shipping_flat_rate)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        shipping_flat_rate.rescale(2);

        Self {
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                shipping_flat_rate,
                config.default_currency.clone(),
            )),
            payments: Arc::new(PaymentGatewayService::new(
                db.clone(),
                PaymentGatewayConfig::from(config),
                event_sender,
            )),
            addresses: Arc::new(AddressService::new(db)),
        }
    }
}
