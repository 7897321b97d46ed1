//! A scripted in-process provider for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use meridian_core::{PaymentStatus, Price, ProviderKind};

use super::{
    OrderMeta, PaymentDetails, PaymentError, PaymentIntent, PaymentProvider, ProviderDescriptor,
    ProviderPayment, ProviderRefund, WebhookUpdate,
};

#[derive(Default)]
struct Script {
    status: Option<PaymentStatus>,
    fail_next: Option<String>,
    webhook: Option<WebhookUpdate>,
    calls: Vec<String>,
    intents: u32,
    amounts: HashMap<String, Price>,
    amount_override: Option<Price>,
}

/// Provider that answers from a script and records every call.
///
/// Payments report [`PaymentStatus::Paid`] unless told otherwise, for the
/// amount their intent was created with. Webhooks
/// accept any delivery carrying an `x-test-signature: valid` header.
pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<Script>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Mutex::new(Script::default()),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status reported by every subsequent payment call.
    pub fn set_status(&self, status: PaymentStatus) {
        self.script().status = Some(status);
    }

    /// Amount reported by every subsequent payment, whatever the intent was
    /// created for.
    pub fn set_amount(&self, amount: Price) {
        self.script().amount_override = Some(amount);
    }

    /// Make the next vendor call fail with a vendor rejection.
    pub fn fail_next(&self, message: &str) {
        self.script().fail_next = Some(message.to_string());
    }

    /// Update returned by the next correctly signed webhook.
    pub fn set_webhook(&self, update: WebhookUpdate) {
        self.script().webhook = Some(update);
    }

    /// Calls made so far, as `"{operation}:{id}"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    fn record(&self, call: String) -> Result<PaymentStatus, PaymentError> {
        let mut script = self.script();
        script.calls.push(call);
        if let Some(message) = script.fail_next.take() {
            return Err(PaymentError::Api {
                provider: self.kind,
                status: 402,
                code: Some("card_declined".to_string()),
                message,
            });
        }
        Ok(script.status.unwrap_or(PaymentStatus::Paid))
    }

    fn payment(&self, intent: &str, id: &str, status: PaymentStatus) -> ProviderPayment {
        let script = self.script();
        let amount = script
            .amount_override
            .or_else(|| script.amounts.get(intent).copied());
        ProviderPayment {
            id: id.to_string(),
            status,
            vendor_status: status.as_str().to_ascii_uppercase(),
            amount,
        }
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: self.kind,
            display_name: "Scripted",
            environment: "test".to_string(),
            application_id: None,
            location_id: None,
            publishable_key: None,
            is_default: false,
        }
    }

    async fn create_payment(
        &self,
        amount: Price,
        meta: &OrderMeta,
    ) -> Result<PaymentIntent, PaymentError> {
        self.record(format!("create:{}", meta.reference_id))?;
        let id = {
            let mut script = self.script();
            script.intents += 1;
            let id = format!("{}_intent_{}", self.kind, script.intents);
            script.amounts.insert(id.clone(), amount);
            id
        };
        Ok(PaymentIntent {
            client_secret: format!("{id}_secret"),
            payment_intent_id: id,
            provider: self.kind,
            amount,
        })
    }

    async fn process_payment(
        &self,
        payment_intent_id: &str,
        _details: &PaymentDetails,
    ) -> Result<ProviderPayment, PaymentError> {
        let status = self.record(format!("process:{payment_intent_id}"))?;
        Ok(self.payment(
            payment_intent_id,
            &format!("{payment_intent_id}_payment"),
            status,
        ))
    }

    async fn verify_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProviderPayment, PaymentError> {
        let status = self.record(format!("verify:{payment_intent_id}"))?;
        Ok(self.payment(
            payment_intent_id,
            &format!("{payment_intent_id}_payment"),
            status,
        ))
    }

    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        let status = self.record(format!("get:{payment_id}"))?;
        Ok(self.payment(payment_id, payment_id, status))
    }

    async fn capture_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.record(format!("capture:{payment_id}"))?;
        Ok(self.payment(payment_id, payment_id, PaymentStatus::Paid))
    }

    async fn cancel_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.record(format!("cancel:{payment_id}"))?;
        Ok(self.payment(payment_id, payment_id, PaymentStatus::Cancelled))
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Price>,
        _reason: Option<&str>,
    ) -> Result<ProviderRefund, PaymentError> {
        self.record(format!("refund:{payment_id}"))?;
        Ok(ProviderRefund {
            id: format!("{payment_id}_refund"),
            payment_id: payment_id.to_string(),
            status: PaymentStatus::Refunded,
            vendor_status: "COMPLETED".to_string(),
            amount,
        })
    }

    fn parse_webhook(
        &self,
        headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<Option<WebhookUpdate>, PaymentError> {
        let signed = headers
            .get("x-test-signature")
            .is_some_and(|v| v.as_bytes() == b"valid");
        if !signed {
            return Err(PaymentError::InvalidSignature("signature mismatch".to_string()));
        }
        Ok(self.script().webhook.take())
    }
}
