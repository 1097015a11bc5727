use crate::{config::GatewayConfig, entities::order::OrderLine, errors::ServiceError};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Payment session returned by a successful `Init` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub payment_id: String,
    pub payment_url: String,
    pub status: String,
}

/// Current gateway-side state of a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentState {
    pub payment_id: String,
    pub status: String,
    pub receipt_url: Option<String>,
}

/// One fiscal receipt line. All amounts are integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptItem {
    pub name: String,
    /// Grams ordered
    pub quantity: i32,
    pub unit_price_minor: i64,
    /// Discounted line amount; the items of a receipt sum exactly to the
    /// payment amount
    pub amount_minor: i64,
}

/// Fully assembled `Init` request.
#[derive(Debug, Clone)]
pub struct PaymentInit {
    pub order_id: Uuid,
    pub amount_minor: i64,
    pub description: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub receipt_items: Vec<ReceiptItem>,
}

/// Client for the card-payment provider.
///
/// Every request carries a `Token`: the SHA-256 hex digest of the values of
/// all top-level scalar parameters plus the shared password, concatenated in
/// alphabetical key order. Notifications from the gateway are verified with
/// the same construction.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            config,
        }
    }

    /// Creates a payment session for an order.
    ///
    /// The fiscal receipt must reconcile before anything goes on the wire:
    /// line amounts are checked to sum exactly to `amount_minor`.
    #[instrument(skip(self, init), fields(order_id = %init.order_id, amount = init.amount_minor))]
    pub async fn init_payment(&self, init: &PaymentInit) -> Result<PaymentSession, ServiceError> {
        let receipt_sum: i64 = init.receipt_items.iter().map(|i| i.amount_minor).sum();
        if receipt_sum != init.amount_minor {
            return Err(ServiceError::InvalidOperation(format!(
                "fiscal receipt does not reconcile: items sum to {} but payment amount is {}",
                receipt_sum, init.amount_minor
            )));
        }

        let mut params = BTreeMap::new();
        params.insert("Amount".to_string(), init.amount_minor.to_string());
        params.insert("Description".to_string(), init.description.clone());
        params.insert("FailURL".to_string(), self.config.fail_url.clone());
        params.insert(
            "NotificationURL".to_string(),
            self.config.notification_url.clone(),
        );
        params.insert("OrderId".to_string(), init.order_id.to_string());
        params.insert("SuccessURL".to_string(), self.config.success_url.clone());
        params.insert(
            "TerminalKey".to_string(),
            self.config.terminal_key.clone(),
        );
        let token = make_token(&params, &self.config.password);

        let items: Vec<Value> = init
            .receipt_items
            .iter()
            .map(|item| {
                json!({
                    "Name": item.name,
                    "Quantity": item.quantity,
                    "Price": item.unit_price_minor,
                    "Amount": item.amount_minor,
                    "Tax": "none",
                })
            })
            .collect();
        let mut receipt = json!({
            "Phone": init.customer_phone,
            "Taxation": self.config.taxation,
            "Items": items,
        });
        if let Some(email) = &init.customer_email {
            receipt["Email"] = json!(email);
        }

        let mut body = json!({
            "TerminalKey": self.config.terminal_key,
            "Amount": init.amount_minor,
            "OrderId": init.order_id.to_string(),
            "Description": init.description,
            "NotificationURL": self.config.notification_url,
            "SuccessURL": self.config.success_url,
            "FailURL": self.config.fail_url,
            "Token": token,
        });
        body["Receipt"] = receipt;

        let response = self.post("Init", &body).await?;
        if response
            .get("Success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let payment_id = response
                .get("PaymentId")
                .and_then(scalar_to_string)
                .ok_or_else(|| {
                    ServiceError::ExternalServiceError(
                        "gateway Init response is missing PaymentId".to_string(),
                    )
                })?;
            let payment_url = response
                .get("PaymentURL")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ServiceError::ExternalServiceError(
                        "gateway Init response is missing PaymentURL".to_string(),
                    )
                })?
                .to_string();
            let status = response
                .get("Status")
                .and_then(Value::as_str)
                .unwrap_or("NEW")
                .to_string();
            Ok(PaymentSession {
                payment_id,
                payment_url,
                status,
            })
        } else {
            Err(ServiceError::PaymentFailed(gateway_error_message(&response)))
        }
    }

    /// Polls the current state of a payment, surfacing the fiscal receipt
    /// URL once the provider has generated one.
    #[instrument(skip(self))]
    pub async fn get_state(&self, payment_id: &str) -> Result<PaymentState, ServiceError> {
        let mut params = BTreeMap::new();
        params.insert("PaymentId".to_string(), payment_id.to_string());
        params.insert(
            "TerminalKey".to_string(),
            self.config.terminal_key.clone(),
        );
        let token = make_token(&params, &self.config.password);

        let body = json!({
            "TerminalKey": self.config.terminal_key,
            "PaymentId": payment_id,
            "Token": token,
        });

        let response = self.post("GetState", &body).await?;
        if !response
            .get("Success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(ServiceError::ExternalServiceError(gateway_error_message(
                &response,
            )));
        }

        Ok(PaymentState {
            payment_id: response
                .get("PaymentId")
                .and_then(scalar_to_string)
                .unwrap_or_else(|| payment_id.to_string()),
            status: response
                .get("Status")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string(),
            receipt_url: extract_receipt_url(&response),
        })
    }

    /// Verifies a push notification's signature. Mismatches mean a forged or
    /// corrupted notification and must be rejected before any mutation.
    pub fn verify_notification(&self, fields: &Map<String, Value>) -> bool {
        let Some(received) = fields.get("Token").and_then(Value::as_str) else {
            return false;
        };
        let expected = notification_token(fields, &self.config.password);
        constant_time_eq(&expected, received)
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), method);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("gateway {} request failed: {}", method, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway {} returned HTTP {}",
                method, status
            )));
        }

        response.json::<Value>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "gateway {} returned malformed JSON: {}",
                method, e
            ))
        })
    }
}

/// Builds fiscal receipt lines whose minor-unit amounts sum exactly to the
/// payment total, distributing the order-level discount proportionally.
pub fn build_receipt_items(
    lines: &[OrderLine],
    total_minor: i64,
) -> Result<Vec<ReceiptItem>, ServiceError> {
    let mut gross = Vec::with_capacity(lines.len());
    for line in lines {
        let unit = to_minor_units(line.price_per_gram)?;
        gross.push(unit * i64::from(line.quantity));
    }

    let amounts = distribute_line_amounts(&gross, total_minor)?;

    Ok(lines
        .iter()
        .zip(amounts)
        .map(|(line, amount_minor)| ReceiptItem {
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price_minor: to_minor_units(line.price_per_gram).unwrap_or(0),
            amount_minor,
        })
        .collect())
}

/// Distributes `total` minor units over lines proportionally to their gross
/// amounts. Every line keeps at least one minor unit (regulatory minimum) and
/// the rounding remainder lands on the last line, so the result sums exactly
/// to `total`. Fails when the discount cannot be distributed under the floor.
pub fn distribute_line_amounts(gross: &[i64], total: i64) -> Result<Vec<i64>, ServiceError> {
    if gross.is_empty() {
        return Err(ServiceError::InvalidOperation(
            "cannot build a fiscal receipt with no line items".to_string(),
        ));
    }
    if gross.iter().any(|&g| g <= 0) {
        return Err(ServiceError::InvalidOperation(
            "fiscal receipt lines must have positive gross amounts".to_string(),
        ));
    }

    let gross_sum: i64 = gross.iter().sum();
    if total > gross_sum {
        return Err(ServiceError::InvalidOperation(format!(
            "payment amount {} exceeds gross receipt amount {}",
            total, gross_sum
        )));
    }
    let floor = gross.len() as i64;
    if total < floor {
        return Err(ServiceError::InvalidOperation(format!(
            "discount cannot be distributed: total {} is below the {}-line regulatory minimum",
            total, floor
        )));
    }
    if total == gross_sum {
        return Ok(gross.to_vec());
    }

    let mut amounts: Vec<i64> = gross
        .iter()
        .map(|&g| {
            let scaled = (i128::from(g) * i128::from(total)) / i128::from(gross_sum);
            (scaled as i64).max(1)
        })
        .collect();

    // Push the rounding remainder onto the tail, never dipping below the
    // one-minor-unit floor.
    let mut remainder = total - amounts.iter().sum::<i64>();
    let mut idx = amounts.len();
    while remainder != 0 {
        if idx == 0 {
            return Err(ServiceError::InvalidOperation(
                "discount cannot be distributed across receipt lines".to_string(),
            ));
        }
        idx -= 1;
        let adjusted = (amounts[idx] + remainder).max(1);
        remainder -= adjusted - amounts[idx];
        amounts[idx] = adjusted;
    }

    debug_assert_eq!(amounts.iter().sum::<i64>(), total);
    Ok(amounts)
}

/// Converts a base-unit amount to integer minor units (×100).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InvalidOperation(format!("amount {} does not fit in minor units", amount))
        })
}

/// Request token: SHA-256 over the concatenated values of all scalar
/// parameters plus the password, in alphabetical key order.
pub fn make_token(params: &BTreeMap<String, String>, password: &str) -> String {
    let mut signed = params.clone();
    signed.insert("Password".to_string(), password.to_string());

    let mut hasher = Sha256::new();
    for value in signed.values() {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Expected token for a gateway notification: same construction as
/// [`make_token`], over the notification's scalar fields minus `Token` itself.
pub fn notification_token(fields: &Map<String, Value>, password: &str) -> String {
    let params: BTreeMap<String, String> = fields
        .iter()
        .filter(|(key, _)| key.as_str() != "Token")
        .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key.clone(), v)))
        .collect();
    make_token(&params, password)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        _ => None,
    }
}

fn gateway_error_message(response: &Value) -> String {
    let message = response
        .get("Message")
        .and_then(Value::as_str)
        .unwrap_or("gateway rejected the request");
    match response.get("Details").and_then(Value::as_str) {
        Some(details) if !details.is_empty() => format!("{}: {}", message, details),
        _ => message.to_string(),
    }
}

fn extract_receipt_url(response: &Value) -> Option<String> {
    if let Some(url) = response.get("ReceiptUrl").and_then(Value::as_str) {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }
    // Some gateway versions tuck the URL into a Params key/value list.
    response
        .get("Params")
        .and_then(Value::as_array)
        .and_then(|params| {
            params.iter().find_map(|entry| {
                let key = entry.get("Key").and_then(Value::as_str)?;
                if key.eq_ignore_ascii_case("ReceiptUrl") {
                    entry
                        .get("Value")
                        .and_then(Value::as_str)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                } else {
                    None
                }
            })
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn token_ignores_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert("Amount".to_string(), "80000".to_string());
        forward.insert("OrderId".to_string(), "42".to_string());

        let mut reversed = BTreeMap::new();
        reversed.insert("OrderId".to_string(), "42".to_string());
        reversed.insert("Amount".to_string(), "80000".to_string());

        assert_eq!(
            make_token(&forward, "secret"),
            make_token(&reversed, "secret")
        );
    }

    #[test]
    fn token_depends_on_password() {
        let mut params = BTreeMap::new();
        params.insert("Amount".to_string(), "80000".to_string());
        assert_ne!(make_token(&params, "secret"), make_token(&params, "other"));
    }

    #[test]
    fn notification_token_excludes_token_and_nested_fields() {
        let mut fields = Map::new();
        fields.insert("Amount".to_string(), json!(80000));
        fields.insert("Success".to_string(), json!(true));
        fields.insert("Data".to_string(), json!({"nested": "object"}));

        let without_token = notification_token(&fields, "secret");
        fields.insert("Token".to_string(), json!(without_token.clone()));
        let with_token = notification_token(&fields, "secret");

        assert_eq!(without_token, with_token);
    }

    #[test]
    fn verify_notification_rejects_tampering() {
        let config = GatewayConfig {
            password: "secret".to_string(),
            ..GatewayConfig::default()
        };
        let client = GatewayClient::new(config);

        let mut fields = Map::new();
        fields.insert("Amount".to_string(), json!(80000));
        fields.insert("Status".to_string(), json!("CONFIRMED"));
        let token = notification_token(&fields, "secret");
        fields.insert("Token".to_string(), json!(token));

        assert!(client.verify_notification(&fields));

        fields.insert("Amount".to_string(), json!(1));
        assert!(!client.verify_notification(&fields));
    }

    #[test]
    fn verify_notification_requires_token_field() {
        let client = GatewayClient::new(GatewayConfig::default());
        let fields = Map::new();
        assert!(!client.verify_notification(&fields));
    }

    #[test]
    fn distribution_without_discount_is_identity() {
        let gross = [10_000, 20_000, 30_000];
        assert_eq!(
            distribute_line_amounts(&gross, 60_000).unwrap(),
            vec![10_000, 20_000, 30_000]
        );
    }

    #[test]
    fn distribution_is_proportional_and_exact() {
        let gross = [10_000, 20_000, 30_000];
        let amounts = distribute_line_amounts(&gross, 54_000).unwrap();
        assert_eq!(amounts, vec![9_000, 18_000, 27_000]);
    }

    #[test]
    fn distribution_keeps_one_minor_unit_per_line() {
        let gross = [1, 1, 100];
        let amounts = distribute_line_amounts(&gross, 3).unwrap();
        assert_eq!(amounts.iter().sum::<i64>(), 3);
        assert!(amounts.iter().all(|&a| a >= 1));
    }

    #[test]
    fn undistributable_discount_is_a_construction_error() {
        let gross = [100, 100, 100];
        assert!(distribute_line_amounts(&gross, 2).is_err());
    }

    #[test]
    fn overlarge_total_is_rejected() {
        let gross = [100];
        assert!(distribute_line_amounts(&gross, 200).is_err());
    }

    #[test]
    fn minor_unit_conversion_rounds_to_cents() {
        assert_eq!(to_minor_units(dec!(800)).unwrap(), 80_000);
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1_234);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 1);
    }

    #[test]
    fn receipt_items_reconcile_with_payment_amount() {
        let lines = vec![
            OrderLine {
                id: Uuid::new_v4(),
                name: "Da Hong Pao".into(),
                price_per_gram: dec!(12.50),
                quantity: 40,
            },
            OrderLine {
                id: Uuid::new_v4(),
                name: "Laoshan Green".into(),
                price_per_gram: dec!(5.00),
                quantity: 100,
            },
        ];
        // gross: 50000 + 50000 minor; 20% off -> 80000
        let items = build_receipt_items(&lines, 80_000).unwrap();
        assert_eq!(items.iter().map(|i| i.amount_minor).sum::<i64>(), 80_000);
        assert_eq!(items[0].amount_minor, 40_000);
        assert_eq!(items[1].amount_minor, 40_000);
    }

    #[test]
    fn receipt_url_extracted_from_params_list() {
        let response = json!({
            "Success": true,
            "Params": [
                {"Key": "Route", "Value": "ACQ"},
                {"Key": "ReceiptUrl", "Value": "https://receipts.example.com/r/1"}
            ]
        });
        assert_eq!(
            extract_receipt_url(&response).as_deref(),
            Some("https://receipts.example.com/r/1")
        );
    }

    #[test]
    fn missing_receipt_url_is_none() {
        let response = json!({"Success": true, "Status": "CONFIRMED"});
        assert_eq!(extract_receipt_url(&response), None);
    }
}
