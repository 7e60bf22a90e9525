use super::ledger::WalletLedger;
use super::locks::{TenantGuard, TenantLocks};
use super::reconciler::FailedPaymentReconciler;
use crate::config::BillingConfig;
use crate::domain::money::Amount;
use crate::domain::payment::{
    CallbackPayload, FailedPayment, GatewayOrderParams, OrderStatus, PaymentOrder,
};
use crate::domain::ports::{ClockHandle, GatewayClientHandle, PaymentOrderStoreHandle};
use crate::domain::principal::Principal;
use crate::domain::tenant::TenantId;
use crate::domain::transaction::{LedgerReference, Transaction, TransactionKind};
use crate::domain::wallet::Wallet;
use crate::error::{BillingError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` under `secret`, as the gateway signs callbacks.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = hmac_for(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn hmac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::ValidationError("gateway secret rejected by HMAC".to_string()))
}

/// How a gateway callback was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Verified and credited; carries the wallet after the credit.
    Credited {
        order: PaymentOrder,
        transaction: Transaction,
        wallet: Wallet,
    },
    /// The order was already verified; nothing changed.
    AlreadyVerified { order: PaymentOrder },
    /// The order had failed earlier; the reconciler entry was updated.
    AlreadyFailed {
        order: PaymentOrder,
        failed: FailedPayment,
    },
    /// Signed correctly but inconsistent with the order; handed to an admin.
    Escalated {
        order: PaymentOrder,
        failed: FailedPayment,
    },
}

/// Recharge orders and the verification of their gateway callbacks.
#[derive(Clone)]
pub struct PaymentGatewayAdapter {
    orders: PaymentOrderStoreHandle,
    client: GatewayClientHandle,
    ledger: WalletLedger,
    reconciler: FailedPaymentReconciler,
    locks: TenantLocks,
    clock: ClockHandle,
    secret: String,
    key_id: String,
    currency: String,
    timeout: Duration,
}

impl PaymentGatewayAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: PaymentOrderStoreHandle,
        client: GatewayClientHandle,
        ledger: WalletLedger,
        reconciler: FailedPaymentReconciler,
        locks: TenantLocks,
        clock: ClockHandle,
        config: &BillingConfig,
    ) -> Self {
        Self {
            orders,
            client,
            ledger,
            reconciler,
            locks,
            clock,
            secret: config.gateway_secret.clone(),
            key_id: config.gateway_key_id.clone(),
            currency: config.currency.clone(),
            timeout: config.gateway_timeout,
        }
    }

    pub async fn create_order(
        &self,
        principal: &Principal,
        tenant: &TenantId,
        amount: Amount,
    ) -> Result<GatewayOrderParams> {
        principal.authorize_for(tenant)?;
        self.ledger.wallet(tenant).await?;

        let id = Uuid::new_v4();
        let gateway_order_id = tokio::time::timeout(
            self.timeout,
            self.client.create_order(id, amount, &self.currency),
        )
        .await
        .map_err(|_| {
            BillingError::Timeout(format!("gateway did not register order {id} within {:?}", self.timeout))
        })??;

        let now = self.clock.now();
        let order = PaymentOrder {
            id,
            tenant: tenant.clone(),
            amount,
            gateway_order_id: gateway_order_id.clone(),
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(order).await?;
        tracing::info!(order_id = %id, %tenant, %amount, %gateway_order_id, "payment order created");

        Ok(GatewayOrderParams {
            order_id: id,
            gateway_order_id,
            amount,
            currency: self.currency.clone(),
            key_id: self.key_id.clone(),
        })
    }

    pub async fn order(&self, principal: &Principal, id: Uuid) -> Result<PaymentOrder> {
        let order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("payment order {id}")))?;
        principal.authorize_for(&order.tenant)?;
        Ok(order)
    }

    /// Settles a gateway callback. The wallet is credited at most once per
    /// order, however many times the gateway calls back.
    ///
    /// Once the order is known, every outcome is decided under its tenant's
    /// guard: a forged or inconsistent callback always leaves the order failed
    /// with exactly one reconciler entry.
    pub async fn handle_callback(&self, payload: &[u8], signature: &str) -> Result<CallbackOutcome> {
        let callback: CallbackPayload = serde_json::from_slice(payload).map_err(|e| {
            BillingError::ValidationError(format!("malformed gateway callback: {e}"))
        })?;
        let Some(order) = self.orders.find_by_gateway_order(&callback.gateway_order_id).await? else {
            tracing::warn!(gateway_order_id = %callback.gateway_order_id, "callback for unknown order");
            return Err(BillingError::NotFound(format!(
                "payment order with gateway id {}",
                callback.gateway_order_id
            )));
        };

        let guard = self.locks.acquire(&order.tenant).await;
        let order = self.reload(order.id).await?;

        if order.status == OrderStatus::Verified {
            tracing::info!(order_id = %order.id, "callback for verified order ignored");
            return Ok(CallbackOutcome::AlreadyVerified { order });
        }

        if !self.signature_matches(payload, signature)? {
            tracing::warn!(order_id = %order.id, tenant = %order.tenant, "gateway signature mismatch");
            let order_id = order.id;
            return match self.fail_locked(&guard, order, "signature verification failed").await? {
                CallbackOutcome::AlreadyVerified { order } => {
                    Ok(CallbackOutcome::AlreadyVerified { order })
                }
                _ => Err(BillingError::SignatureVerification {
                    order_id: order_id.to_string(),
                }),
            };
        }

        if order.status == OrderStatus::Failed {
            let failed = self
                .reconciler
                .record_locked(
                    &guard,
                    &order,
                    &format!(
                        "valid callback for payment {} arrived after the order failed",
                        callback.gateway_payment_id
                    ),
                )
                .await?;
            return Ok(CallbackOutcome::AlreadyFailed { order, failed });
        }

        if callback.amount != order.amount.value() {
            let reason = format!(
                "callback amount {} does not match order amount {}",
                callback.amount, order.amount
            );
            return self.fail_locked(&guard, order, &reason).await;
        }

        self.verify_and_credit_locked(&guard, order, &callback.gateway_payment_id)
            .await
    }

    fn signature_matches(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return Ok(false);
        };
        let mut mac = hmac_for(&self.secret)?;
        mac.update(payload);
        Ok(mac.verify_slice(&expected).is_ok())
    }

    async fn reload(&self, id: Uuid) -> Result<PaymentOrder> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("payment order {id}")))
    }

    async fn verify_and_credit_locked(
        &self,
        guard: &TenantGuard,
        order: PaymentOrder,
        payment_id: &str,
    ) -> Result<CallbackOutcome> {
        let Some(order) = self
            .orders
            .transition(order.id, OrderStatus::Created, OrderStatus::Verified, self.clock.now())
            .await?
        else {
            return self.settled_elsewhere_locked(guard, order.id).await;
        };

        let receipt = match self
            .ledger
            .credit_locked(
                guard,
                order.amount,
                TransactionKind::CreditRecharge,
                LedgerReference::PaymentOrder(order.id),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.reopen_locked(guard, &order, &e).await;
                return Err(e);
            }
        };
        tracing::info!(
            order_id = %order.id,
            tenant = %order.tenant,
            payment_id,
            balance = %receipt.wallet.balance,
            "recharge verified"
        );
        Ok(CallbackOutcome::Credited {
            order,
            transaction: receipt.transaction,
            wallet: receipt.wallet,
        })
    }

    /// Undoes the verification of an order whose credit could not be
    /// committed, so the gateway's retry can settle it. If the order cannot be
    /// reopened it is escalated instead.
    async fn reopen_locked(&self, guard: &TenantGuard, order: &PaymentOrder, cause: &BillingError) {
        let reopened = self
            .orders
            .transition(order.id, OrderStatus::Verified, OrderStatus::Created, self.clock.now())
            .await;
        if let Ok(Some(_)) = reopened {
            tracing::error!(order_id = %order.id, tenant = %order.tenant, error = %cause, "recharge credit failed; order reopened");
            return;
        }

        let reason = format!("verified but not credited: {cause}");
        if let Err(e) = self.reconciler.record_locked(guard, order, &reason).await {
            tracing::error!(
                order_id = %order.id,
                tenant = %order.tenant,
                error = %e,
                cause = %cause,
                "recharge left verified without credit and could not be escalated"
            );
        }
    }

    /// Moves the order to failed and escalates it. If the order was settled
    /// in the meantime, reports that state instead.
    async fn fail_locked(
        &self,
        guard: &TenantGuard,
        order: PaymentOrder,
        reason: &str,
    ) -> Result<CallbackOutcome> {
        let order = match order.status {
            OrderStatus::Created => match self
                .orders
                .transition(order.id, OrderStatus::Created, OrderStatus::Failed, self.clock.now())
                .await?
            {
                Some(failed) => failed,
                None => return self.settled_elsewhere_locked(guard, order.id).await,
            },
            _ => order,
        };
        let failed = self.reconciler.record_locked(guard, &order, reason).await?;
        Ok(CallbackOutcome::Escalated { order, failed })
    }

    async fn settled_elsewhere_locked(&self, guard: &TenantGuard, id: Uuid) -> Result<CallbackOutcome> {
        let order = self.reload(id).await?;
        match order.status {
            OrderStatus::Failed => {
                let failed = self
                    .reconciler
                    .record_locked(guard, &order, "concurrent callback after the order failed")
                    .await?;
                Ok(CallbackOutcome::AlreadyFailed { order, failed })
            }
            _ => Ok(CallbackOutcome::AlreadyVerified { order }),
        }
    }
}
