//! Error Recovery Integration Tests
//!
//! End-to-end tests for the resilience core including:
//! - Circuit breaker state transitions and half-open admission
//! - Connection recovery backoff and isolation
//! - Graceful degradation between multiplayer modes
//! - Error handler reporting and recovery dispatch
//! - Configuration loading

#![allow(clippy::unwrap_used, clippy::panic)]

use netplay_resilience::config::ResilienceConfig;
use netplay_resilience::error::error_recovery::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, ConnectionRecoveryManager,
    DegradationConfig, DegradationState, ErrorHandler, ErrorInfo, FallbackModeStrategy,
    GracefulDegradationManager, MultiplayerBackend, MultiplayerMode, NetworkRetryStrategy,
    Notification, NotificationLevel, RecoverableConnection, RecoveryConfig, RecoveryState,
    calculate_backoff_delay,
};
use netplay_resilience::{ErrorCategory, ErrorCode, ResilienceError, Result, get_error_category};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::time::{Duration, Instant};

fn timeout_failure() -> Result<()> {
    Err(ResilienceError::operation(ErrorCode::NetworkTimeout, "room server did not answer"))
}

fn quick_breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
    CircuitBreaker::with_config(
        "room-server",
        CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_timeout(timeout)
            .with_success_threshold(1),
    )
}

// ============================================================================
// Circuit Breaker Tests
// ============================================================================

#[test]
fn test_circuit_breaker_default_creation() {
    let cb = CircuitBreaker::new("relay");
    let metrics = cb.metrics();

    assert_eq!(cb.name(), "relay");
    assert_eq!(metrics.state, CircuitBreakerState::Closed);
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(metrics.successful_requests, 0);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(cb.config(), CircuitBreakerConfig::default());
}

#[test]
fn test_circuit_breaker_opens_and_rejects_until_timeout() {
    let cb = quick_breaker(3, Duration::from_secs(60));
    for _ in 0..3 {
        assert!(cb.execute(timeout_failure).is_err());
    }
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    let ran = AtomicBool::new(false);
    let rejected = cb.execute(|| {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    });

    let err = rejected.unwrap_err();
    assert!(matches!(err, ResilienceError::CircuitOpen(ref name) if name == "room-server"));
    assert!(err.is_service_unavailable());
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable.code());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(cb.metrics().rejected_requests, 1);
}

#[test]
fn test_circuit_breaker_half_open_after_timeout() {
    let cb = quick_breaker(1, Duration::from_millis(20));
    let _ = cb.execute(timeout_failure);
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cb.execute(|| Ok(7u8)).unwrap(), 7);
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[test]
fn test_circuit_breaker_half_open_failure_reopens() {
    let cb = quick_breaker(1, Duration::from_millis(10));
    let _ = cb.execute(timeout_failure);
    std::thread::sleep(Duration::from_millis(30));

    let _ = cb.execute(timeout_failure);
    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

#[test]
fn test_circuit_breaker_half_open_admits_single_trial() {
    let cb = Arc::new(quick_breaker(1, Duration::from_secs(60)));
    cb.force_half_open();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let trial = {
        let cb = Arc::clone(&cb);
        std::thread::spawn(move || {
            cb.execute(|| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
        })
    };

    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = cb.execute(|| Ok(()));
    assert!(matches!(second, Err(ResilienceError::HalfOpenLimitReached(_))));

    release_tx.send(()).unwrap();
    trial.join().unwrap().unwrap();
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[test]
fn test_circuit_breaker_concurrent_failures_open_once() {
    let cb = Arc::new(quick_breaker(5, Duration::from_secs(60)));
    let transitions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&transitions);
    cb.set_state_change_listener(Some(Arc::new(
        move |_: &str, _from: CircuitBreakerState, to: CircuitBreakerState| {
            if to == CircuitBreakerState::Open {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
    )));

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cb = Arc::clone(&cb);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    let _ = cb.execute(timeout_failure);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = cb.metrics();
    assert_eq!(cb.state(), CircuitBreakerState::Open);
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.total_requests, 40);
    assert_eq!(metrics.failed_requests + metrics.rejected_requests, 40);
}

#[test]
fn test_circuit_breaker_catches_panics() {
    let cb = quick_breaker(1, Duration::from_secs(60));
    let result: Result<()> = cb.execute(|| panic!("decoder blew up"));

    assert!(matches!(
        result,
        Err(ResilienceError::Internal(ref msg)) if msg.contains("decoder blew up")
    ));
    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

#[test]
fn test_circuit_breaker_reset_is_idempotent() {
    let cb = quick_breaker(1, Duration::from_secs(60));
    let _ = cb.execute(timeout_failure);
    cb.force_open();

    cb.reset();
    cb.reset();
    let metrics = cb.metrics();
    assert_eq!(metrics.state, CircuitBreakerState::Closed);
    assert_eq!(metrics.consecutive_failures, 0);
    assert_eq!(metrics.total_requests, 0);
}

#[test]
fn test_circuit_breaker_config_round_trip() {
    let cb = CircuitBreaker::new("mesh");
    let config = CircuitBreakerConfig::default()
        .with_failure_threshold(9)
        .with_timeout(Duration::from_secs(5))
        .with_success_threshold(2)
        .with_max_half_open_calls(3);

    cb.update_config(config.clone()).unwrap();
    assert_eq!(cb.config(), config);
    assert!(cb.update_config(config.with_failure_threshold(0)).is_err());
}

#[test]
fn test_circuit_breaker_metrics_json() {
    let cb = CircuitBreaker::new("relay");
    cb.execute(|| Ok(())).unwrap();

    let json: serde_json::Value = serde_json::from_str(&cb.metrics_json().unwrap()).unwrap();
    assert_eq!(json["name"], "relay");
    assert_eq!(json["successful_requests"], 1);
    assert_eq!(json["state"], "Closed");
}

#[tokio::test]
async fn test_circuit_breaker_execute_async() {
    let cb = quick_breaker(2, Duration::from_secs(60));

    let value = cb.execute_async(async { Ok::<_, ResilienceError>(41 + 1) }).await.unwrap();
    assert_eq!(value, 42);

    let fail = true;
    let panicked: Result<()> = cb
        .execute_async(async move {
            if fail {
                panic!("task failed");
            }
            Ok(())
        })
        .await;
    assert!(matches!(panicked, Err(ResilienceError::Internal(_))));

    let _ = cb.execute_async(async { timeout_failure() }).await;
    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

// ============================================================================
// Connection Recovery Tests
// ============================================================================

struct CountingConnection {
    connected: AtomicBool,
    attempts: AtomicU32,
    succeed_on: u32,
}

impl CountingConnection {
    fn new(succeed_on: u32) -> Arc<Self> {
        Arc::new(Self { connected: AtomicBool::new(false), attempts: AtomicU32::new(0), succeed_on })
    }
}

impl RecoverableConnection for CountingConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.succeed_on {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ResilienceError::operation(ErrorCode::ConnectionRefused, "refused"))
        }
    }
}

fn fast_recovery(max_retries: u32) -> RecoveryConfig {
    RecoveryConfig::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(1), Duration::from_millis(4))
        .with_jitter(false)
}

#[test]
fn test_backoff_delays_double_until_cap() {
    let config = RecoveryConfig::default().with_jitter(false);
    let delays: Vec<u128> =
        (1..=7).map(|attempt| calculate_backoff_delay(&config, attempt).as_millis()).collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
}

#[test]
fn test_non_retryable_error_starts_nothing() {
    let connection = CountingConnection::new(1);
    let manager = ConnectionRecoveryManager::with_config(connection.clone(), fast_recovery(3));
    let info = ErrorInfo::new(ErrorCode::AuthenticationFailed, "", "RoomClient");

    let result = manager.start_recovery(&info);
    assert_eq!(result, Err(ResilienceError::NonRetryable { code: 2002 }));
    assert_eq!(manager.state(), RecoveryState::Idle);

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(connection.attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_recovery_managers_do_not_share_counters() {
    let slow = CountingConnection::new(3);
    let fast = CountingConnection::new(1);
    let first = ConnectionRecoveryManager::with_config(slow.clone(), fast_recovery(5));
    let second = ConnectionRecoveryManager::with_config(fast.clone(), fast_recovery(5));
    let info = ErrorInfo::new(ErrorCode::ConnectionLost, "", "RelayClient");

    first.start_recovery(&info).unwrap();
    second.start_recovery(&info).unwrap();

    assert_eq!(first.wait_for_completion(Duration::from_secs(5)), RecoveryState::Succeeded);
    assert_eq!(second.wait_for_completion(Duration::from_secs(5)), RecoveryState::Succeeded);
    assert_eq!(first.status().attempts, 3);
    assert_eq!(second.status().attempts, 1);
}

#[test]
fn test_already_connected_short_circuits() {
    let connection = CountingConnection::new(1);
    connection.connected.store(true, Ordering::SeqCst);
    let manager = ConnectionRecoveryManager::with_config(connection.clone(), fast_recovery(3));

    manager.start_recovery(&ErrorInfo::new(ErrorCode::NetworkTimeout, "", "Net")).unwrap();
    assert_eq!(manager.wait_for_completion(Duration::from_secs(5)), RecoveryState::Succeeded);
    assert_eq!(connection.attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_drop_aborts_running_recovery_promptly() {
    let connection = CountingConnection::new(1);
    let config = fast_recovery(3).with_delays(Duration::from_secs(60), Duration::from_secs(60));
    let manager = ConnectionRecoveryManager::with_config(connection.clone(), config);
    manager.start_recovery(&ErrorInfo::new(ErrorCode::HostUnreachable, "", "Net")).unwrap();

    let started = Instant::now();
    drop(manager);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(connection.attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_recovery_config_round_trip() {
    let manager = ConnectionRecoveryManager::new(CountingConnection::new(1));
    let config = fast_recovery(9).with_multiplier(3.0);
    manager.update_config(config.clone()).unwrap();
    assert_eq!(manager.config(), config);
}

// ============================================================================
// Graceful Degradation Tests
// ============================================================================

struct SwitchableBackend {
    up: AtomicBool,
}

impl SwitchableBackend {
    fn new(up: bool) -> Arc<Self> {
        Arc::new(Self { up: AtomicBool::new(up) })
    }
}

impl MultiplayerBackend for SwitchableBackend {
    fn is_available(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

fn manual_degradation() -> GracefulDegradationManager {
    GracefulDegradationManager::with_config(DegradationConfig::default().with_auto_recovery(false))
}

#[test]
fn test_degradation_internet_down_mesh_up() {
    let manager = manual_degradation();
    let internet: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(false);
    let mesh: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    manager.register_backend(MultiplayerMode::Internet, &internet);
    manager.register_backend(MultiplayerMode::LocalMesh, &mesh);

    assert!(manager.initialize(MultiplayerMode::Internet).is_ok());
    assert_eq!(manager.current_mode(), MultiplayerMode::LocalMesh);
    assert_eq!(manager.state(), DegradationState::Degraded);
    assert!(manager.is_degraded());
}

#[test]
fn test_degradation_falls_to_offline_then_recovers() {
    let manager = manual_degradation();
    let internet_backend = SwitchableBackend::new(true);
    let internet: Arc<dyn MultiplayerBackend> = internet_backend.clone();
    manager.register_backend(MultiplayerMode::Internet, &internet);
    manager.initialize(MultiplayerMode::Internet).unwrap();

    internet_backend.up.store(false, Ordering::SeqCst);
    let info = ErrorInfo::new(ErrorCode::ConnectionLost, "", "RelayClient");
    assert_eq!(manager.handle_error(&info).unwrap(), Some(MultiplayerMode::Offline));
    assert!(manager.is_degraded());

    internet_backend.up.store(true, Ordering::SeqCst);
    manager.attempt_recovery(MultiplayerMode::Internet).unwrap();
    assert_eq!(manager.state(), DegradationState::Normal);
    assert!(!manager.is_degraded());
    assert_eq!(manager.status().fallback_attempts, 0);
}

#[test]
fn test_breaker_opening_drives_degradation() {
    let manager = manual_degradation();
    let internet: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    let mesh: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    manager.register_backend(MultiplayerMode::Internet, &internet);
    manager.register_backend(MultiplayerMode::LocalMesh, &mesh);
    manager.initialize(MultiplayerMode::Internet).unwrap();

    let cb = quick_breaker(2, Duration::from_secs(60));
    cb.set_state_change_listener(Some(manager.circuit_breaker_listener()));
    let _ = cb.execute(timeout_failure);
    let _ = cb.execute(timeout_failure);

    assert_eq!(cb.state(), CircuitBreakerState::Open);
    assert_eq!(manager.current_mode(), MultiplayerMode::LocalMesh);
}

// ============================================================================
// Error Handler Tests
// ============================================================================

#[test]
fn test_report_error_default_message() {
    let handler = ErrorHandler::new();
    let info = handler.report_error(ErrorCode::NetworkTimeout, "", "Net");

    assert_eq!(info.message, "Unable to connect to multiplayer service");
    assert_eq!(info.category, ErrorCategory::NetworkConnectivity);
    assert_eq!(info.component, "Net");
}

#[test]
fn test_handler_notifications_follow_category() {
    let handler = ErrorHandler::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    handler.set_notification_callback(Some(Arc::new(move |notification: &Notification| {
        sink.lock().unwrap().push(notification.level);
    })));

    handler.report_error(ErrorCode::LocalNetworkAccessDenied, "", "Mesh");
    handler.report_error(ErrorCode::InvalidConfiguration, "", "Settings");
    handler.report_error(ErrorCode::PacketRejected, "", "Filter");
    handler.report_error(ErrorCode::ProtocolVersionMismatch, "", "Peer");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            NotificationLevel::Error,
            NotificationLevel::Error,
            NotificationLevel::Critical,
            NotificationLevel::Info,
        ]
    );
}

#[test]
fn test_handler_retry_strategy_end_to_end() {
    let handler = Arc::new(ErrorHandler::new());
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&retries);
    let strategy = NetworkRetryStrategy::with_config(
        fast_recovery(2),
        Arc::new(move |_: &ErrorInfo| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    handler.register_recovery_strategy(ErrorCategory::NetworkConnectivity, Arc::new(strategy));

    let (tx, rx) = mpsc::channel();
    handler.set_recovery_success_callback(Some(Arc::new(move |info: &ErrorInfo| {
        let _ = tx.send(info.code);
    })));

    handler.report_error(ErrorCode::RelayDisconnected, "relay gone", "RelayClient");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1007);
    assert_eq!(retries.load(Ordering::SeqCst), 1);

    let stats = handler.error_statistics();
    assert_eq!(stats.recovery_attempts, 1);
    assert_eq!(stats.successful_recoveries, 1);
    handler.shutdown();
}

#[test]
fn test_handler_fallback_strategy_switches_mode() {
    let manager = Arc::new(manual_degradation());
    let internet: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    let mesh: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    manager.register_backend(MultiplayerMode::Internet, &internet);
    manager.register_backend(MultiplayerMode::LocalMesh, &mesh);
    manager.initialize(MultiplayerMode::Internet).unwrap();

    let handler = ErrorHandler::new();
    handler.register_recovery_strategy(
        ErrorCategory::NetworkConnectivity,
        Arc::new(FallbackModeStrategy::for_degradation_manager(&manager)),
    );

    let (tx, rx) = mpsc::channel();
    handler.set_recovery_success_callback(Some(Arc::new(move |info: &ErrorInfo| {
        let _ = tx.send(info.code);
    })));

    handler.report_error(ErrorCode::ServiceUnavailable, "", "RoomClient");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1004);
    assert_eq!(manager.current_mode(), MultiplayerMode::LocalMesh);
    assert!((handler.error_statistics().recovery_rate() - 1.0).abs() < f64::EPSILON);
}

struct SlowBackend {
    probe_time: Duration,
}

impl MultiplayerBackend for SlowBackend {
    fn is_available(&self) -> bool {
        std::thread::sleep(self.probe_time);
        true
    }
}

#[test]
fn test_report_error_does_not_wait_for_fallback_switch() {
    let manager = Arc::new(manual_degradation());
    let internet: Arc<dyn MultiplayerBackend> = SwitchableBackend::new(true);
    let mesh: Arc<dyn MultiplayerBackend> =
        Arc::new(SlowBackend { probe_time: Duration::from_millis(500) });
    manager.register_backend(MultiplayerMode::Internet, &internet);
    manager.register_backend(MultiplayerMode::LocalMesh, &mesh);
    manager.initialize(MultiplayerMode::Internet).unwrap();

    let handler = ErrorHandler::new();
    handler.register_recovery_strategy(
        ErrorCategory::NetworkConnectivity,
        Arc::new(FallbackModeStrategy::for_degradation_manager(&manager)),
    );
    let (tx, rx) = mpsc::channel();
    handler.set_recovery_success_callback(Some(Arc::new(move |_: &ErrorInfo| {
        let _ = tx.send(());
    })));

    let started = Instant::now();
    handler.report_error(ErrorCode::ServiceUnavailable, "", "RoomClient");
    assert!(started.elapsed() < Duration::from_millis(100));

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(manager.current_mode(), MultiplayerMode::LocalMesh);
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_resilience_config_json_round_trip() {
    let mut config = ResilienceConfig::default();
    config.recovery = config.recovery.with_max_retries(4);
    config.error_handler = config.error_handler.with_max_error_history(10);

    let json = config.to_json_string().unwrap();
    let parsed = ResilienceConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, config);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_classification_is_total_and_deterministic(code in any::<u32>()) {
        let first = get_error_category(code);
        prop_assert_eq!(first, get_error_category(code));
        if !(1000..8000).contains(&code) {
            prop_assert_eq!(first, ErrorCategory::Unknown);
        }
    }

    #[test]
    fn prop_backoff_is_monotonic_and_capped(attempt in 1u32..64) {
        let config = RecoveryConfig::default().with_jitter(false);
        let current = calculate_backoff_delay(&config, attempt);
        let next = calculate_backoff_delay(&config, attempt + 1);
        prop_assert!(current <= next);
        prop_assert!(next <= config.max_delay);
    }
}
