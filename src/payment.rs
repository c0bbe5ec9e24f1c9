//! LemonSqueezy integration: hosted checkout creation and subscription webhooks.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::models::{Id, SubscriptionUpdate, User};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";
const DEFAULT_API_BASE: &str = "https://api.lemonsqueezy.com";
const JSON_API: &str = "application/vnd.api+json";

/// Events that carry subscription state.
const SUBSCRIPTION_EVENTS: &[&str] = &[
    "subscription_created",
    "subscription_updated",
    "subscription_cancelled",
    "subscription_resumed",
    "subscription_expired",
    "subscription_paused",
    "subscription_unpaused",
];

#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    #[error("payment provider not configured")]
    NotConfigured,
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected request: {0}")]
    Provider(String),
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Default)]
pub struct PaymentConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub store_id: Option<String>,
    pub variant_id: Option<String>,
    pub webhook_secret: Option<String>,
}

impl PaymentConfig {
    pub fn from_env() -> Self {
        fn opt(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            api_base: opt("LEMONSQUEEZY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: opt("LEMONSQUEEZY_API_KEY"),
            store_id: opt("LEMONSQUEEZY_STORE_ID"),
            variant_id: opt("LEMONSQUEEZY_VARIANT_ID"),
            webhook_secret: opt("LEMONSQUEEZY_WEBHOOK_SECRET"),
        }
    }
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Returns the hosted checkout URL the user should be redirected to.
    async fn create_checkout(&self, user: &User) -> Result<String, PaymentError>;
}

pub struct LemonSqueezy {
    cfg: PaymentConfig,
    http: reqwest::Client,
}

impl LemonSqueezy {
    pub fn new(cfg: PaymentConfig) -> Self {
        Self { cfg, http: reqwest::Client::new() }
    }

    fn checkout_body(user: &User, store_id: &str, variant_id: &str) -> Value {
        json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "product_options": { "enabled_variants": [variant_id] },
                    "checkout_options": { "embed": false, "media": true, "logo": true },
                    "checkout_data": {
                        "email": user.email,
                        "custom": { "user_id": user.id.to_string() }
                    },
                    "expires_at": null
                },
                "relationships": {
                    "store": { "data": { "type": "stores", "id": store_id } },
                    "variant": { "data": { "type": "variants", "id": variant_id } }
                }
            }
        })
    }
}

#[async_trait]
impl CheckoutProvider for LemonSqueezy {
    async fn create_checkout(&self, user: &User) -> Result<String, PaymentError> {
        let (Some(key), Some(store), Some(variant)) =
            (&self.cfg.api_key, &self.cfg.store_id, &self.cfg.variant_id)
        else {
            return Err(PaymentError::NotConfigured);
        };
        let url = format!("{}/v1/checkouts", self.cfg.api_base.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(key)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
            .header(reqwest::header::ACCEPT, JSON_API)
            .json(&Self::checkout_body(user, store, variant))
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            let detail = body
                .pointer("/errors/0/detail")
                .and_then(Value::as_str)
                .unwrap_or("failed to create checkout");
            return Err(PaymentError::Provider(format!("{status}: {detail}")));
        }
        body.pointer("/data/attributes/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Provider("checkout response missing url".into()))
    }
}

/// Checks a hex HMAC-SHA256 of the raw body, compared in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<(), PaymentError> {
    let given = hex::decode(signature_hex.trim()).map_err(|_| PaymentError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| PaymentError::InvalidSignature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    if expected.len() == given.len() && bool::from(expected.as_slice().ct_eq(&given)) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub meta: WebhookMeta,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMeta {
    pub event_name: String,
    #[serde(default)]
    pub custom_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub id: Value,
    #[serde(default)]
    pub attributes: Value,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, PaymentError> {
        serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))
    }

    /// `custom_data.user_id` from `meta`, falling back to the subscription attributes.
    fn user_id(&self) -> Option<Id> {
        let from_meta = self.meta.custom_data.as_ref().and_then(|c| c.get("user_id"));
        let from_attrs = self.data.attributes.pointer("/custom_data/user_id");
        id_from_value(from_meta.or(from_attrs)?)
    }

    /// `None` for events that do not concern subscriptions or carry no user.
    pub fn subscription_update(&self) -> Option<SubscriptionUpdate> {
        if !SUBSCRIPTION_EVENTS.contains(&self.meta.event_name.as_str()) {
            return None;
        }
        let user_id = self.user_id()?;
        let attrs = &self.data.attributes;
        let status = attrs.get("status").and_then(Value::as_str).map(str::to_string);
        Some(SubscriptionUpdate {
            user_id,
            is_subscribed: status.as_deref() == Some("active"),
            customer_id: attrs.get("customer_id").and_then(scalar_string),
            subscription_id: scalar_string(&self.data.id),
            status,
        })
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_from_value(v: &Value) -> Option<Id> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
