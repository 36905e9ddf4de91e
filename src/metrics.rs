//! Prometheus metrics for the relay pipeline

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

pub const SUBSCRIPTION_LABEL: &str = "subscription";
pub const WEBHOOK_LABEL: &str = "webhook";
pub const OUTCOME_LABEL: &str = "outcome";

lazy_static! {
    /// Events received from the chain, per subscription
    static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "chainrelay_events_received_total",
        "Total number of chain events received",
        &[SUBSCRIPTION_LABEL]
    ).expect("Failed to create events_received metric");

    /// Events that passed / failed the subscription's filters
    static ref EVENTS_FILTERED: CounterVec = register_counter_vec!(
        "chainrelay_events_filtered_total",
        "Events evaluated against subscription filters",
        &[SUBSCRIPTION_LABEL, OUTCOME_LABEL]
    ).expect("Failed to create events_filtered metric");

    /// Deliveries written to the queue
    static ref DELIVERIES_ENQUEUED: CounterVec = register_counter_vec!(
        "chainrelay_deliveries_enqueued_total",
        "Webhook deliveries enqueued",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create deliveries_enqueued metric");

    /// Send attempts, by outcome
    static ref DELIVERY_ATTEMPTS: CounterVec = register_counter_vec!(
        "chainrelay_delivery_attempts_total",
        "Webhook send attempts",
        &[WEBHOOK_LABEL, OUTCOME_LABEL]
    ).expect("Failed to create delivery_attempts metric");

    /// Completed deliveries
    static ref DELIVERIES_COMPLETED: CounterVec = register_counter_vec!(
        "chainrelay_deliveries_completed_total",
        "Webhook deliveries completed successfully",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create deliveries_completed metric");

    /// Rescheduled retries
    static ref DELIVERY_RETRIES: CounterVec = register_counter_vec!(
        "chainrelay_delivery_retries_total",
        "Webhook deliveries rescheduled for retry",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create delivery_retries metric");

    /// Deliveries moved to the dead-letter store
    static ref DELIVERIES_DEAD_LETTERED: CounterVec = register_counter_vec!(
        "chainrelay_deliveries_dead_lettered_total",
        "Webhook deliveries moved to the dead-letter queue",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create deliveries_dead_lettered metric");

    /// Sends blocked by an open circuit
    static ref CIRCUIT_SHORT_CIRCUITS: CounterVec = register_counter_vec!(
        "chainrelay_circuit_short_circuits_total",
        "Deliveries short-circuited by an open circuit breaker",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create circuit_short_circuits metric");

    /// Webhook response time
    static ref DELIVERY_RESPONSE_TIME: HistogramVec = register_histogram_vec!(
        "chainrelay_webhook_response_time_seconds",
        "Webhook response time in seconds",
        &[WEBHOOK_LABEL]
    ).expect("Failed to create webhook_response_time metric");

    /// Registered subscriptions
    static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        "chainrelay_active_subscriptions",
        "Number of registered subscriptions"
    ).expect("Failed to create active_subscriptions metric");
}

pub fn record_event_received(subscription_id: &str) {
    EVENTS_RECEIVED.with_label_values(&[subscription_id]).inc();
}

pub fn record_event_filtered(subscription_id: &str, matched: bool) {
    let outcome = if matched { "matched" } else { "filtered" };
    EVENTS_FILTERED
        .with_label_values(&[subscription_id, outcome])
        .inc();
}

pub fn record_delivery_enqueued(webhook_id: &str) {
    DELIVERIES_ENQUEUED.with_label_values(&[webhook_id]).inc();
}

pub fn record_delivery_attempt(webhook_id: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    DELIVERY_ATTEMPTS
        .with_label_values(&[webhook_id, outcome])
        .inc();
}

pub fn record_delivery_completed(webhook_id: &str) {
    DELIVERIES_COMPLETED.with_label_values(&[webhook_id]).inc();
}

pub fn record_delivery_retry(webhook_id: &str) {
    DELIVERY_RETRIES.with_label_values(&[webhook_id]).inc();
}

pub fn record_delivery_dead_lettered(webhook_id: &str) {
    DELIVERIES_DEAD_LETTERED
        .with_label_values(&[webhook_id])
        .inc();
}

pub fn record_circuit_short_circuit(webhook_id: &str) {
    CIRCUIT_SHORT_CIRCUITS.with_label_values(&[webhook_id]).inc();
}

pub fn record_delivery_response_time(webhook_id: &str, elapsed: Duration) {
    DELIVERY_RESPONSE_TIME
        .with_label_values(&[webhook_id])
        .observe(elapsed.as_secs_f64());
}

pub fn set_active_subscriptions(count: i64) {
    ACTIVE_SUBSCRIPTIONS.set(count);
}
