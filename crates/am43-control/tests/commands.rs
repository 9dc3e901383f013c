//! Command round trips against the simulated host.

mod common;

use std::time::Duration;

use am43_control::{
    BatteryLevel, Command, ControlError, LightLevel, Percentage, SessionState,
};
use am43_protocol::Pin;
use am43_sim::{Behavior, SimMotor};
use common::*;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_move_to_writes_one_frame() {
    let host = host();
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    device.move_to(50).await.unwrap();

    let stats = host.stats(&blind()).unwrap();
    assert_eq!(
        stats.writes,
        vec![vec![0x00, 0xFF, 0x00, 0x00, 0x9A, 0x0D, 0x01, 0x32, 0xDA]]
    );
    assert_eq!(
        host.motor(&blind()).unwrap().position(),
        Some(Percentage::new(50).unwrap())
    );
    assert_eq!(device.state(), SessionState::Ready);
    assert_eq!(host.connect_count(&blind()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queries() {
    let host = host();
    host.update_motor(&blind(), |motor| {
        motor.set_battery(BatteryLevel::from_raw(64));
        motor.set_light(LightLevel::from_raw(6));
    });
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    assert_eq!(device.battery().await.unwrap().percent(), 64);
    assert_eq!(device.light().await.unwrap().value(), 6);
    let report = device.position().await.unwrap();
    assert_eq!(report.position, Some(Percentage::OPEN));
    assert!(report.flags.has_light_sensor);

    let state = device.read_state().await.unwrap();
    assert_eq!(state.battery.percent(), 64);
    assert!(state.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_open_close_stop() {
    let host = host();
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    device.close_blind().await.unwrap();
    assert_eq!(host.motor(&blind()).unwrap().position(), Some(Percentage::CLOSED));
    device.stop().await.unwrap();
    device.open_blind().await.unwrap();
    assert_eq!(host.motor(&blind()).unwrap().position(), Some(Percentage::OPEN));

    device.set_light_threshold(7).await.unwrap();
    assert_eq!(host.motor(&blind()).unwrap().light_threshold().value(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_after_three_attempts() {
    let host = host();
    host.update_behavior(&blind(), |b| b.silent = true);
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    let started = Instant::now();
    let err = device.battery().await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::CommandTimeout {
            command: "get_battery",
            attempts: 3
        }
    ));
    assert!(started.elapsed() >= Duration::from_secs(6));

    // Every attempt resends the same frame
    let stats = host.stats(&blind()).unwrap();
    assert_eq!(stats.writes.len(), 3);
    assert!(stats.writes.iter().all(|w| *w == stats.writes[0]));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(host.write_count(&blind()), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_reply_is_retried() {
    let host = host();
    host.update_behavior(&blind(), |b| b.drop_replies = 1);
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    let started = Instant::now();
    device.move_to(25).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(host.write_count(&blind()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_reply_is_dropped_and_retried() {
    let host = host();
    host.update_behavior(&blind(), |b| b.corrupt_replies = 2);
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    assert_eq!(device.battery().await.unwrap().percent(), 80);
    assert_eq!(host.write_count(&blind()), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_command() {
    let host = host();
    host.update_behavior(&blind(), |b| b.reject_commands = true);
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    let err = device.stop().await.unwrap_err();
    assert!(matches!(err, ControlError::CommandRejected { command: "stop" }));
    assert_eq!(host.write_count(&blind()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_validation_before_io() {
    let host = host();
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    assert!(matches!(
        device.move_to(101).await,
        Err(ControlError::Validation(_))
    ));
    assert!(matches!(
        device.set_light_threshold(10).await,
        Err(ControlError::Validation(_))
    ));
    settle().await;
    assert_eq!(host.connect_count(&blind()), 0);
    assert_eq!(host.write_count(&blind()), 0);
    assert!(controller.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_commands_complete_in_submission_order() {
    let host = host();
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    let (a, b, c) = tokio::join!(device.move_to(10), device.move_to(20), device.move_to(30));
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let targets: Vec<u8> = host
        .stats(&blind())
        .unwrap()
        .writes
        .iter()
        .map(|w| w[7])
        .collect();
    assert_eq!(targets, vec![10, 20, 30]);
    assert_eq!(
        host.motor(&blind()).unwrap().position(),
        Some(Percentage::new(30).unwrap())
    );
}

#[tokio::test(start_paused = true)]
async fn test_devices_do_not_block_each_other() {
    let host = host();
    host.add_device(other_blind(), SimMotor::new());
    host.update_behavior(&other_blind(), |b| b.silent = true);
    let controller = controller(&host, config()).await;

    let stuck = controller.device(other_blind());
    let pending = tokio::spawn(async move { stuck.battery().await });
    wait_until(|| host.write_count(&other_blind()) == 1).await;

    let started = Instant::now();
    let device = controller.device(blind());
    device.move_to(40).await.unwrap();
    device.battery().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(matches!(
        pending.await.unwrap(),
        Err(ControlError::CommandTimeout { attempts: 3, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_login_precedes_commands() {
    let pin = Pin::new(1234).unwrap();
    let host = host();
    host.update_motor(&blind(), |motor| *motor = SimMotor::new().with_pin(pin));

    let mut config = config();
    config.pin = Some(1234);
    let controller = controller(&host, config).await;
    let device = controller.device(blind());

    device.move_to(60).await.unwrap();
    let writes = host.stats(&blind()).unwrap().writes;
    assert_eq!(writes.len(), 2);
    assert_eq!(
        writes[0],
        Command::Login(pin).encode().to_wire(am43_control::Checksum::Sum8)
    );
    assert!(host.motor(&blind()).unwrap().is_logged_in());
}

#[tokio::test(start_paused = true)]
async fn test_missing_login_is_rejected() {
    let host = host();
    host.update_motor(&blind(), |motor| {
        *motor = SimMotor::new().with_pin(Pin::new(42).unwrap())
    });
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());

    assert!(matches!(
        device.move_to(60).await,
        Err(ControlError::CommandRejected { command: "move_to" })
    ));
    // Queries need no login
    device.battery().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_xor_checksum_end_to_end() {
    let host = am43_sim::SimHost::new(am43_control::Checksum::Xor);
    host.add_device(blind(), SimMotor::new());
    host.set_behavior(&blind(), Behavior::default());
    let mut config = config();
    config.checksum = am43_control::Checksum::Xor;
    let controller = controller(&host, config).await;

    controller.device(blind()).move_to(50).await.unwrap();
    let writes = host.stats(&blind()).unwrap().writes;
    // 9A ^ 0D ^ 01 ^ 32
    assert_eq!(writes[0].last(), Some(&0xA4));
}

#[tokio::test(start_paused = true)]
async fn test_truncated_reply_does_not_spoil_the_retry() {
    let host = host();
    host.update_behavior(&blind(), |b| b.truncate_replies = 1);
    let mut config = config();
    config.max_attempts = 2;
    let controller = controller(&host, config).await;
    let device = controller.device(blind());

    let started = Instant::now();
    assert_eq!(device.battery().await.unwrap().percent(), 80);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(host.write_count(&blind()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_queued_behind_timeouts_still_times_out() {
    let host = host();
    host.update_behavior(&blind(), |b| b.silent = true);
    let mut config = config();
    // Far shorter than the time spent queued behind two timeouts
    config.request_timeout_ms = Some(500);
    let controller = controller(&host, config).await;
    let device = controller.device(blind());
    device.open().await.unwrap();

    let (a, b, c) = tokio::join!(device.battery(), device.battery(), device.battery());
    for result in [a, b, c] {
        assert!(
            matches!(
                result,
                Err(ControlError::CommandTimeout {
                    command: "get_battery",
                    attempts: 3
                })
            ),
            "{result:?}"
        );
    }
    assert_eq!(device.state(), SessionState::Ready);
    assert_eq!(host.write_count(&blind()), 9);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_frame_code_is_dropped() {
    let host = host();
    let controller = controller(&host, config()).await;
    let device = controller.device(blind());
    device.open().await.unwrap();
    let mut everything = device.subscribe_all();

    let stray = am43_protocol::Frame::new(0x55, vec![1, 2, 3]).unwrap();
    assert!(host.notify(&blind(), &stray));
    assert!(tokio::time::timeout(Duration::from_secs(1), everything.next())
        .await
        .is_err());

    assert_eq!(device.battery().await.unwrap().percent(), 80);
    assert_eq!(device.state(), SessionState::Ready);
}
