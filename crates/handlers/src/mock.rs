//! Mock service handler
//!
//! Simulates downstream services with configurable latency and success
//! rate. Each known service has a built-in result shape so the generic
//! success template still renders something useful.

use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

use crate::registry::HandlerResult;
use crate::HandlerError;

pub struct MockServiceHandler;

impl MockServiceHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        service_name: &str,
        delay_ms: u64,
        success_rate: f64,
        slots: &HashMap<String, String>,
    ) -> Result<HandlerResult, HandlerError> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let roll: f64 = rand::thread_rng().gen();
        if roll > success_rate {
            return Err(HandlerError::Transient(format!(
                "simulated outage of {}",
                service_name
            )));
        }

        let data = Self::service_data(service_name, slots);
        Ok(HandlerResult::success(data))
    }

    fn order_suffix() -> String {
        let n: u32 = rand::thread_rng().gen_range(100_000..999_999);
        n.to_string()
    }

    fn slot<'a>(slots: &'a HashMap<String, String>, name: &str, default: &'a str) -> &'a str {
        slots.get(name).map(|s| s.as_str()).unwrap_or(default)
    }

    fn service_data(service_name: &str, slots: &HashMap<String, String>) -> serde_json::Value {
        match service_name {
            "book_flight_service" => serde_json::json!({
                "order_id": format!("FL{}", Self::order_suffix()),
                "departure_city": Self::slot(slots, "departure_city", "未知"),
                "arrival_city": Self::slot(slots, "arrival_city", "未知"),
                "departure_date": Self::slot(slots, "departure_date", "未知"),
                "passenger_count": Self::slot(slots, "passenger_count", "1"),
                "price": rand::thread_rng().gen_range(480..2280),
            }),
            "book_train_service" => serde_json::json!({
                "order_id": format!("TR{}", Self::order_suffix()),
                "departure_city": Self::slot(slots, "departure_city", "未知"),
                "arrival_city": Self::slot(slots, "arrival_city", "未知"),
                "departure_date": Self::slot(slots, "departure_date", "未知"),
                "seat_class": Self::slot(slots, "seat_class", "二等座"),
            }),
            "check_balance_service" => serde_json::json!({
                "card_type": Self::slot(slots, "card_type", "储蓄卡"),
                "balance": format!("{:.2}", rand::thread_rng().gen_range(100.0..99_999.0)),
                "currency": "CNY",
            }),
            other => serde_json::json!({
                "service": other,
                "result": "ok",
            }),
        }
    }
}

impl Default for MockServiceHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> HashMap<String, String> {
        [
            ("departure_city", "北京"),
            ("arrival_city", "上海"),
            ("departure_date", "2024-03-16"),
            ("passenger_count", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn test_flight_booking_result_shape() {
        let handler = MockServiceHandler::new();
        let result = handler
            .execute("book_flight_service", 0, 1.0, &slots())
            .await
            .unwrap();

        assert!(result.success);
        let order_id = result.data["order_id"].as_str().unwrap();
        assert!(order_id.starts_with("FL"));
        assert!(order_id.len() > 2);
        assert_eq!(result.data["departure_city"], "北京");
    }

    #[tokio::test]
    async fn test_always_failing_service_is_transient() {
        let handler = MockServiceHandler::new();
        let result = handler.execute("book_flight_service", 0, 0.0, &slots()).await;
        match result {
            Err(e) => assert!(e.is_transient()),
            Ok(_) => panic!("expected simulated outage"),
        }
    }

    #[tokio::test]
    async fn test_unknown_service_generic_result() {
        let handler = MockServiceHandler::new();
        let result = handler
            .execute("weather_service", 0, 1.0, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.data["service"], "weather_service");
    }
}
