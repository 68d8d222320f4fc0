use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use super::order::{Order, OrderStatus};
use super::order_manager::{GatewayReport, OrderLifecycleManager};
use crate::error::{GatewayError, OrderError};
use crate::gateway::{Gateway, GatewayOrder, GatewayOrderRequest};

/// Submission and polling limits for live orders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSettings {
    /// Submissions per order before it may be rejected locally
    pub submit_attempts: u32,
    /// Status polls after an unacknowledged submission
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            poll_attempts: 5,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Bring one strategy's book in line with the exchange
///
/// Submits new orders, retries unacknowledged ones, forwards cancel requests
/// and polls every working order once. Runs between ticks; nothing here is
/// fatal, failures come back for the event stream.
pub async fn sync_orders<G: Gateway + ?Sized>(
    gateway: &G,
    book: &mut OrderLifecycleManager,
    settings: &LiveSettings,
) -> Vec<GatewayError> {
    let mut errors = Vec::new();

    let pending: Vec<(Uuid, OrderStatus, bool)> = book
        .orders()
        .iter()
        .filter(|o| !o.is_terminal())
        .map(|o| (o.id, o.status, o.gateway_id.is_some()))
        .collect();

    for (id, status, acknowledged) in pending {
        let result = match (status, acknowledged) {
            (OrderStatus::Created, _) | (OrderStatus::Opening, false) => {
                submit(gateway, book, id, settings, &mut errors).await
            }
            (OrderStatus::Cancelling, true) => cancel(gateway, book, id).await,
            (_, true) => refresh(gateway, book, id).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!("order {} could not be reconciled: {}", id, e);
            errors.push(GatewayError::Request(e.to_string()));
        }
    }

    errors
}

async fn submit<G: Gateway + ?Sized>(
    gateway: &G,
    book: &mut OrderLifecycleManager,
    id: Uuid,
    settings: &LiveSettings,
    errors: &mut Vec<GatewayError>,
) -> Result<(), OrderError> {
    let order = book.order_mut(id)?;
    if order.status == OrderStatus::Created {
        order.transition(OrderStatus::Opening, Utc::now())?;
        book.record_update(id)?;
    }

    let order = book.order_mut(id)?;
    let attempts = order.submit_attempts;
    let symbol = order.symbol.clone();
    let client_order_id = order.client_order_id.clone();

    // Never resubmit blindly: the last attempt may have reached the exchange
    if attempts > 0 {
        match gateway.get_order(&symbol, &client_order_id).await {
            Ok(Some(remote)) => return apply(book, id, &remote),
            Ok(None) if attempts >= settings.submit_attempts => {
                tracing::warn!("❌ order {} not acknowledged after {} attempts", id, attempts);
                return book.reject(id, &format!("not acknowledged after {} attempts", attempts), Utc::now());
            }
            Ok(None) => {}
            Err(e) => {
                errors.push(GatewayError::OrderFailed { reason: e.to_string() });
                return Ok(());
            }
        }
    }

    let order = book.order_mut(id)?;
    order.submit_attempts += 1;
    let request = request_for(order);
    let closing = order.closes.is_some();

    let result = if closing {
        gateway.close(&request).await
    } else {
        gateway.open(&request).await
    };

    match result {
        Ok(Some(ack)) => apply(book, id, &ack),
        Ok(None) => poll_until_acknowledged(gateway, book, id, settings, errors).await,
        Err(e) => {
            tracing::warn!("order {} submission failed: {}", id, e);
            errors.push(GatewayError::OrderFailed { reason: e.to_string() });
            Ok(())
        }
    }
}

async fn poll_until_acknowledged<G: Gateway + ?Sized>(
    gateway: &G,
    book: &mut OrderLifecycleManager,
    id: Uuid,
    settings: &LiveSettings,
    errors: &mut Vec<GatewayError>,
) -> Result<(), OrderError> {
    let (symbol, client_order_id) = {
        let order = book.order_mut(id)?;
        (order.symbol.clone(), order.client_order_id.clone())
    };

    for attempt in 1..=settings.poll_attempts {
        tokio::time::sleep(settings.poll_interval).await;

        match gateway.get_order(&symbol, &client_order_id).await {
            Ok(Some(remote)) => {
                apply(book, id, &remote)?;
                let status = book.order_mut(id)?.status;
                if status.is_working() || status.is_terminal() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("poll {} for order {} failed: {}", attempt, id, e),
        }
    }

    tracing::warn!("⏱️ order {} unconfirmed after {} polls", id, settings.poll_attempts);
    errors.push(GatewayError::OrderTimeout {
        order_id: id,
        attempts: settings.poll_attempts,
    });
    Ok(())
}

async fn cancel<G: Gateway + ?Sized>(gateway: &G, book: &mut OrderLifecycleManager, id: Uuid) -> Result<(), OrderError> {
    let order = book.order_mut(id)?;
    let (symbol, client_order_id) = (order.symbol.clone(), order.client_order_id.clone());

    match gateway.cancel(&symbol, &client_order_id).await {
        Ok(Some(remote)) => apply(book, id, &remote),
        Ok(None) => {
            tracing::warn!("cancel for order {}: exchange does not know it", id);
            Ok(())
        }
        Err(e) => {
            tracing::warn!("cancel for order {} failed: {}", id, e);
            Ok(())
        }
    }
}

async fn refresh<G: Gateway + ?Sized>(gateway: &G, book: &mut OrderLifecycleManager, id: Uuid) -> Result<(), OrderError> {
    let order = book.order_mut(id)?;
    let (symbol, client_order_id) = (order.symbol.clone(), order.client_order_id.clone());

    match gateway.get_order(&symbol, &client_order_id).await {
        Ok(Some(remote)) => apply(book, id, &remote),
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::debug!("refresh of order {} failed: {}", id, e);
            Ok(())
        }
    }
}

fn apply(book: &mut OrderLifecycleManager, id: Uuid, remote: &GatewayOrder) -> Result<(), OrderError> {
    book.apply_gateway_report(
        id,
        GatewayReport {
            gateway_id: Some(remote.id.clone()),
            status: remote.status.to_local(),
            executed_volume: remote.executed_volume,
            average_price: remote.price,
        },
        Utc::now(),
    )
}

fn request_for(order: &Order) -> GatewayOrderRequest {
    GatewayOrderRequest {
        client_order_id: order.client_order_id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        order_type: order.order_type,
        volume: order.volume,
        price: order.price,
        stop_price: order.stop_price,
    }
}
