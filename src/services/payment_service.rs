use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, prelude::DateTimeWithTimeZone,
    sea_query::Expr,
};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    audit,
    config::GatewayConfig,
    dto::payments::{CreatedPayment, RefundReceipt},
    entity::payments::{
        ActiveModel as PaymentActive, Column as PayCol, Entity as Payments, Model as PaymentModel,
    },
    error::{AppError, AppResult},
    gateway::{CaptureOutcome, GatewayError, PaymentGateway},
    models::{METHOD_CASH_ON_DELIVERY, METHOD_PAYPAL, Payment, PaymentStatus},
};

/// Payments against the external processor, plus cash on delivery.
#[derive(Clone)]
pub struct PaymentService {
    db: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    config: GatewayConfig,
}

impl PaymentService {
    pub fn new(
        db: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            config,
        }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        amount: i64,
        currency: &str,
        idempotency_key: Option<String>,
    ) -> AppResult<CreatedPayment> {
        validate_amount(amount)?;
        let currency = normalize_currency(currency)?;
        let idempotency_key = idempotency_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if let Some(key) = idempotency_key.as_deref() {
            let existing = Payments::find()
                .filter(PayCol::UserId.eq(user_id))
                .filter(PayCol::IdempotencyKey.eq(key))
                .one(&self.db)
                .await?;
            if let Some(existing) = existing {
                tracing::debug!(payment_id = %existing.id, "idempotent create replayed");
                return Ok(CreatedPayment {
                    payment: existing.into(),
                    approve_url: None,
                });
            }
        }

        let intent = self
            .call(
                self.gateway
                    .create_intent(amount, &currency, idempotency_key.as_deref()),
            )
            .await
            .map_err(into_app_error)?;

        let now = Utc::now();
        let payment = PaymentActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_id: Set(None),
            transaction_id: Set(intent.transaction_id),
            amount: Set(amount),
            currency: Set(currency),
            payment_method: Set(METHOD_PAYPAL.to_string()),
            status: Set(PaymentStatus::Pending),
            capture_id: Set(None),
            refunded_amount: Set(0),
            idempotency_key: Set(idempotency_key),
            lease_expires_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(payment_id = %payment.id, transaction_id = %payment.transaction_id, amount, "payment intent created");
        audit::record(
            &self.db,
            Some(user_id),
            "payment_created",
            "payments",
            json!({ "payment_id": payment.id, "amount": amount }),
        )
        .await;

        Ok(CreatedPayment {
            payment: payment.into(),
            approve_url: intent.approve_url,
        })
    }

    /// Local pending payment settled by whoever delivers the goods.
    pub async fn cash_on_delivery(
        &self,
        user_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> AppResult<Payment> {
        validate_amount(amount)?;
        let currency = normalize_currency(currency)?;

        let now = Utc::now();
        let payment = PaymentActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_id: Set(None),
            transaction_id: Set(format!("cod_{}", Uuid::new_v4().simple())),
            amount: Set(amount),
            currency: Set(currency),
            payment_method: Set(METHOD_CASH_ON_DELIVERY.to_string()),
            status: Set(PaymentStatus::Pending),
            capture_id: Set(None),
            refunded_amount: Set(0),
            idempotency_key: Set(None),
            lease_expires_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(payment_id = %payment.id, amount, "cash on delivery payment recorded");
        Ok(payment.into())
    }

    pub async fn capture(&self, transaction_id: &str, user_id: Uuid) -> AppResult<Payment> {
        self.capture_with_budget(transaction_id, user_id, self.config.retry_budget)
            .await
    }

    /// Captures with up to `retry_budget` retries after transient failures.
    /// The n-th retry waits `n * backoff_step`.
    #[instrument(skip(self))]
    pub async fn capture_with_budget(
        &self,
        transaction_id: &str,
        user_id: Uuid,
        retry_budget: u32,
    ) -> AppResult<Payment> {
        let payment = self.find_owned(transaction_id, user_id).await?;
        ensure_capturable(&payment)?;
        if let Some(order_id) = payment.order_id {
            if self.order_has_capture(order_id, Some(payment.id)).await? {
                return Err(AppError::Conflict(
                    "order already has a captured payment".to_string(),
                ));
            }
        }
        self.claim_lease(&payment).await?;

        let capture_once = move || self.call(self.gateway.capture(transaction_id));
        let (mut outcome, attempt) =
            retry_transient(retry_budget, self.config.backoff_step, capture_once).await;
        if matches!(outcome, Err(GatewayError::AlreadyCaptured)) {
            tracing::warn!(payment_id = %payment.id, "gateway already captured, reconciling");
            outcome = self.call(self.gateway.capture_status(transaction_id)).await;
        }

        match outcome {
            Ok(CaptureOutcome::Completed { capture_id }) => {
                let captured = self
                    .settle(
                        &payment,
                        PaymentActive {
                            status: Set(PaymentStatus::Completed),
                            capture_id: Set(capture_id),
                            lease_expires_at: Set(None),
                            updated_at: Set(Utc::now().into()),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(payment_id = %payment.id, attempts = attempt, "payment captured");
                audit::record(
                    &self.db,
                    Some(user_id),
                    "payment_captured",
                    "payments",
                    json!({ "payment_id": payment.id, "attempts": attempt }),
                )
                .await;
                Ok(captured)
            }
            Ok(CaptureOutcome::Other(status)) => {
                self.release_lease(payment.id).await?;
                Err(AppError::PaymentGateway(format!(
                    "capture answered with status {status}"
                )))
            }
            Err(GatewayError::Rejected { code, message }) => {
                self.settle(
                    &payment,
                    PaymentActive {
                        status: Set(PaymentStatus::Failed),
                        lease_expires_at: Set(None),
                        updated_at: Set(Utc::now().into()),
                        ..Default::default()
                    },
                )
                .await?;
                tracing::warn!(payment_id = %payment.id, %code, %message, "capture rejected");
                audit::record(
                    &self.db,
                    Some(user_id),
                    "payment_rejected",
                    "payments",
                    json!({ "payment_id": payment.id, "code": code }),
                )
                .await;
                Err(AppError::PaymentRejected(rejection_message(&code).to_string()))
            }
            Err(err) => {
                self.release_lease(payment.id).await?;
                tracing::error!(payment_id = %payment.id, attempts = attempt, error = %err, "capture gave up");
                Err(AppError::PaymentGateway(err.to_string()))
            }
        }
    }

    /// Partial or full refund of a captured payment. Status is left as is.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> AppResult<RefundReceipt> {
        let payment = Payments::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound)?;

        if payment.status != PaymentStatus::Completed {
            return Err(AppError::Conflict(
                "only captured payments can be refunded".to_string(),
            ));
        }
        let capture_id = payment
            .capture_id
            .clone()
            .ok_or_else(|| AppError::Conflict("payment has no capture to refund".to_string()))?;

        validate_amount(amount)?;
        let currency = normalize_currency(currency)?;
        if currency != payment.currency {
            return Err(AppError::InvalidArgument(format!(
                "refund currency must be {}",
                payment.currency
            )));
        }
        let refundable = payment.amount - payment.refunded_amount;
        if amount > refundable {
            return Err(AppError::InvalidArgument(format!(
                "at most {refundable} can still be refunded"
            )));
        }

        // reserve before the gateway call; 0 rows means another refund got there first
        let reserved = Payments::update_many()
            .col_expr(
                PayCol::RefundedAmount,
                Expr::col(PayCol::RefundedAmount).add(amount),
            )
            .col_expr(PayCol::UpdatedAt, Expr::value(DateTimeWithTimeZone::from(Utc::now())))
            .filter(PayCol::Id.eq(payment_id))
            .filter(PayCol::Status.eq(PaymentStatus::Completed))
            .filter(PayCol::RefundedAmount.lte(payment.amount - amount))
            .exec(&self.db)
            .await?;
        if reserved.rows_affected == 0 {
            return Err(AppError::Conflict(
                "payment changed while refunding".to_string(),
            ));
        }

        let refund = match self
            .call(self.gateway.refund(&capture_id, amount, &currency))
            .await
        {
            Ok(refund) => refund,
            Err(err) => {
                Payments::update_many()
                    .col_expr(
                        PayCol::RefundedAmount,
                        Expr::col(PayCol::RefundedAmount).sub(amount),
                    )
                    .filter(PayCol::Id.eq(payment_id))
                    .exec(&self.db)
                    .await?;
                return Err(into_app_error(err));
            }
        };

        let payment = Payments::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound)?;

        tracing::info!(%payment_id, refund_id = %refund.refund_id, amount, "payment refunded");
        audit::record(
            &self.db,
            None,
            "payment_refunded",
            "payments",
            json!({ "payment_id": payment_id, "refund_id": refund.refund_id, "amount": amount }),
        )
        .await;

        Ok(RefundReceipt {
            refund_id: refund.refund_id,
            status: refund.status,
            payment: payment.into(),
        })
    }

    pub async fn mark_refunded(&self, payment_id: Uuid) -> AppResult<Payment> {
        let result = Payments::update_many()
            .set(PaymentActive {
                status: Set(PaymentStatus::Refunded),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(PayCol::Id.eq(payment_id))
            .filter(PayCol::Status.eq(PaymentStatus::Completed))
            .exec(&self.db)
            .await?;

        let payment = Payments::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFound)?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "only captured payments can be marked refunded".to_string(),
            ));
        }

        tracing::info!(%payment_id, "payment marked refunded");
        Ok(payment.into())
    }

    /// Voids a pending payment. Cash on delivery never reached the gateway
    /// and is voided locally.
    pub async fn cancel(&self, transaction_id: &str, user_id: Uuid) -> AppResult<Payment> {
        let payment = self.find_owned(transaction_id, user_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(AppError::Conflict(
                "only pending payments can be cancelled".to_string(),
            ));
        }
        if lease_held(&payment, Utc::now().timestamp_millis()) {
            return Err(AppError::Conflict("capture in progress".to_string()));
        }

        if payment.payment_method != METHOD_CASH_ON_DELIVERY {
            self.call(self.gateway.void(transaction_id))
                .await
                .map_err(into_app_error)?;
        }

        let now = Utc::now();
        let result = Payments::update_many()
            .set(PaymentActive {
                status: Set(PaymentStatus::Failed),
                updated_at: Set(now.into()),
                ..Default::default()
            })
            .filter(PayCol::Id.eq(payment.id))
            .filter(PayCol::Status.eq(PaymentStatus::Pending))
            .filter(lease_free(now.timestamp_millis()))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "payment changed while cancelling".to_string(),
            ));
        }

        tracing::info!(payment_id = %payment.id, "payment cancelled");
        audit::record(
            &self.db,
            Some(user_id),
            "payment_cancelled",
            "payments",
            json!({ "payment_id": payment.id }),
        )
        .await;

        let mut cancelled = Payment::from(payment);
        cancelled.status = PaymentStatus::Failed;
        cancelled.updated_at = now;
        Ok(cancelled)
    }

    pub async fn status(&self, payment_id: Uuid, user_id: Uuid) -> AppResult<Payment> {
        Payments::find_by_id(payment_id)
            .filter(PayCol::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .map(Payment::from)
            .ok_or(AppError::NotFoundOrUnauthorized)
    }

    pub async fn history(&self, user_id: Uuid) -> AppResult<Vec<Payment>> {
        let payments = Payments::find()
            .filter(PayCol::UserId.eq(user_id))
            .order_by_desc(PayCol::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(payments.into_iter().map(Payment::from).collect())
    }

    pub async fn find_by_id(&self, payment_id: Uuid) -> AppResult<Option<Payment>> {
        Ok(Payments::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .map(Payment::from))
    }

    /// Links a payment to an order. Relinking to the same order is a no-op.
    pub async fn attach_to_order(&self, payment_id: Uuid, order_id: Uuid) -> AppResult<()> {
        self.attach_to_order_in(&self.db, payment_id, order_id).await
    }

    pub async fn attach_to_order_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<()> {
        let result = Payments::update_many()
            .set(PaymentActive {
                order_id: Set(Some(order_id)),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(PayCol::Id.eq(payment_id))
            .filter(
                Condition::any()
                    .add(PayCol::OrderId.is_null())
                    .add(PayCol::OrderId.eq(order_id)),
            )
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "payment belongs to another order".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether money was taken for the order, by any payment other than `except`.
    pub async fn order_has_capture(&self, order_id: Uuid, except: Option<Uuid>) -> AppResult<bool> {
        let mut finder = Payments::find()
            .filter(PayCol::OrderId.eq(order_id))
            .filter(PayCol::Status.is_in([PaymentStatus::Completed, PaymentStatus::Refunded]));
        if let Some(except) = except {
            finder = finder.filter(PayCol::Id.ne(except));
        }
        Ok(finder.one(&self.db).await?.is_some())
    }

    async fn find_owned(&self, transaction_id: &str, user_id: Uuid) -> AppResult<PaymentModel> {
        Payments::find()
            .filter(PayCol::TransactionId.eq(transaction_id))
            .filter(PayCol::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .ok_or(AppError::NotFoundOrUnauthorized)
    }

    async fn claim_lease(&self, payment: &PaymentModel) -> AppResult<()> {
        let now = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(self.config.capture_lease.as_millis()).unwrap_or(i64::MAX);
        let result = Payments::update_many()
            .set(PaymentActive {
                lease_expires_at: Set(Some(now.saturating_add(lease_ms))),
                ..Default::default()
            })
            .filter(PayCol::Id.eq(payment.id))
            .filter(PayCol::Status.eq(PaymentStatus::Pending))
            .filter(lease_free(now))
            .filter(no_sibling_capture(payment, now))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 1 {
            return Ok(());
        }

        // lost the race: tell the caller what won
        match Payments::find_by_id(payment.id).one(&self.db).await? {
            Some(current) if current.status != PaymentStatus::Pending => {
                ensure_capturable(&current)?;
                Err(AppError::Conflict("capture in progress".to_string()))
            }
            Some(current) if lease_held(&current, now) => {
                Err(AppError::Conflict("capture in progress".to_string()))
            }
            Some(_) => Err(AppError::Conflict(
                "order already has a captured payment or one being captured".to_string(),
            )),
            None => Err(AppError::NotFoundOrUnauthorized),
        }
    }

    async fn release_lease(&self, payment_id: Uuid) -> AppResult<()> {
        Payments::update_many()
            .set(PaymentActive {
                lease_expires_at: Set(None),
                ..Default::default()
            })
            .filter(PayCol::Id.eq(payment_id))
            .filter(PayCol::Status.eq(PaymentStatus::Pending))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Moves a leased pending payment to its outcome.
    async fn settle(&self, payment: &PaymentModel, change: PaymentActive) -> AppResult<Payment> {
        let result = Payments::update_many()
            .set(change)
            .filter(PayCol::Id.eq(payment.id))
            .filter(PayCol::Status.eq(PaymentStatus::Pending))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "payment changed during capture".to_string(),
            ));
        }
        Payments::find_by_id(payment.id)
            .one(&self.db)
            .await?
            .map(Payment::from)
            .ok_or(AppError::NotFoundOrUnauthorized)
    }

    /// Bounds a single gateway round trip. Running out of time is transient.
    async fn call<T, F>(&self, request: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let limit = self.config.call_timeout;
        tokio::time::timeout(limit, request)
            .await
            .unwrap_or_else(|_| Err(GatewayError::Transient(format!("no answer within {limit:?}"))))
    }
}

fn ensure_capturable(payment: &PaymentModel) -> AppResult<()> {
    match payment.status {
        PaymentStatus::Pending if payment.payment_method == METHOD_CASH_ON_DELIVERY => Err(
            AppError::Conflict("cash on delivery is settled on delivery".to_string()),
        ),
        PaymentStatus::Pending => Ok(()),
        PaymentStatus::Completed => Err(AppError::Conflict("already captured".to_string())),
        PaymentStatus::Failed => Err(AppError::Conflict("payment has failed".to_string())),
        PaymentStatus::Refunded => Err(AppError::Conflict("payment was refunded".to_string())),
    }
}

fn lease_free(now_millis: i64) -> Condition {
    Condition::any()
        .add(PayCol::LeaseExpiresAt.is_null())
        .add(PayCol::LeaseExpiresAt.lt(now_millis))
}

/// No other payment of the same order is captured or holds a live lease.
/// Unlinked payments have no siblings.
fn no_sibling_capture(payment: &PaymentModel, now_millis: i64) -> Condition {
    let Some(order_id) = payment.order_id else {
        return Condition::all();
    };
    let siblings = Payments::find()
        .select_only()
        .column(PayCol::Id)
        .filter(PayCol::OrderId.eq(order_id))
        .filter(PayCol::Id.ne(payment.id))
        .filter(
            Condition::any()
                .add(PayCol::Status.is_in([PaymentStatus::Completed, PaymentStatus::Refunded]))
                .add(
                    Condition::all()
                        .add(PayCol::Status.eq(PaymentStatus::Pending))
                        .add(PayCol::LeaseExpiresAt.gte(now_millis)),
                ),
        )
        .into_query();
    Condition::all().add(Expr::exists(siblings)).not()
}

/// Calls `op` until it stops failing transiently or `retry_budget` retries
/// are spent. The n-th retry waits `n * backoff_step`. Returns the last
/// answer and the number of calls made.
async fn retry_transient<T, F, Fut>(
    retry_budget: u32,
    backoff_step: Duration,
    mut op: F,
) -> (Result<T, GatewayError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(err) if err.is_transient() && attempt <= retry_budget => {
                let wait = backoff_step * attempt;
                tracing::warn!(error = %err, attempt, ?wait, "gateway call failed transiently, retrying");
                tokio::time::sleep(wait).await;
            }
            other => return (other, attempt),
        }
    }
}

fn lease_held(payment: &PaymentModel, now_millis: i64) -> bool {
    payment
        .lease_expires_at
        .is_some_and(|expires| expires >= now_millis)
}

fn validate_amount(amount: i64) -> AppResult<()> {
    if amount <= 0 {
        return Err(AppError::InvalidArgument(
            "amount must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// ISO 4217 style: three letters, stored upper case.
pub fn normalize_currency(currency: &str) -> AppResult<String> {
    let currency = currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::InvalidArgument(
            "currency must be a three-letter code".to_string(),
        ));
    }
    Ok(currency.to_ascii_uppercase())
}

fn into_app_error(err: GatewayError) -> AppError {
    match err {
        GatewayError::Rejected { code, .. } => {
            AppError::PaymentRejected(rejection_message(&code).to_string())
        }
        other => AppError::PaymentGateway(other.to_string()),
    }
}

/// What the payer can do about a rejection.
fn rejection_message(code: &str) -> &'static str {
    match code {
        "INSTRUMENT_DECLINED" => {
            "Your payment method was declined. Please choose a different funding source."
        }
        "PAYER_ACTION_REQUIRED" => {
            "Additional approval is required. Please finish approving the payment and try again."
        }
        "PAYER_CANNOT_PAY" | "TRANSACTION_REFUSED" => {
            "This account cannot complete the payment. Please use another payment method."
        }
        "COMPLIANCE_VIOLATION" | "PAYEE_ACCOUNT_RESTRICTED" => {
            "This payment cannot be processed. Please contact support."
        }
        "MAX_NUMBER_OF_PAYMENT_ATTEMPTS_EXCEEDED" => {
            "Too many payment attempts. Please try again later or use another payment method."
        }
        _ => "The payment was declined. Please try another payment method.",
    }
}
