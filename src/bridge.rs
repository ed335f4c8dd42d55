//! Single serialized execution context for all device I/O.
//!
//! The underlying device-control client is not safe for concurrent use, so
//! every caller (the automation loop or a request-handling thread) submits a
//! command to one long-lived worker task and blocks until that worker has
//! finished it. Commands execute one at a time in submission order.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::devices::{DeviceError, OutletController, OutletState};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Submitted before the worker context was started. Surfaced immediately
    /// instead of implicitly creating a second, unsynchronized worker.
    #[error("execution context not started")]
    NotReady,
    #[error("execution context already started")]
    AlreadyStarted,
    #[error("execution context stopped")]
    WorkerGone,
    /// The caller stopped waiting; the underlying operation may still
    /// complete, so no rollback can be assumed.
    #[error("timed out waiting for device operation")]
    Timeout,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    TurnOutlet {
        device: String,
        outlet: u8,
        on: bool,
    },
    QueryState {
        device: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    State(OutletState),
}

struct BridgeRequest {
    command: DeviceCommand,
    reply: oneshot::Sender<Result<CommandOutcome, BridgeError>>,
}

/// Handle to the owning execution context. Cheap to clone via `Arc`; callable
/// from any task or thread.
pub struct ExecutionBridge {
    sender: OnceCell<mpsc::Sender<BridgeRequest>>,
    reply_timeout: Duration,
}

impl ExecutionBridge {
    pub fn new(reply_timeout: Duration) -> Self {
        Self {
            sender: OnceCell::new(),
            reply_timeout,
        }
    }

    /// Spawn the worker that owns the controller. `op_timeout` bounds each
    /// device call; an operation past it is treated as failed and retried by
    /// the caller on its next cycle, never re-run by the bridge itself.
    pub fn start(
        &self,
        controller: Arc<dyn OutletController>,
        op_timeout: Duration,
    ) -> Result<(), BridgeError> {
        let (tx, mut rx) = mpsc::channel::<BridgeRequest>(64);
        self.sender.set(tx).map_err(|_| BridgeError::AlreadyStarted)?;

        tokio::spawn(async move {
            info!("device execution context started");
            while let Some(request) = rx.recv().await {
                let result = execute(controller.as_ref(), &request.command, op_timeout).await;
                if request.reply.send(result).is_err() {
                    debug!(command = ?request.command, "caller gave up before completion");
                }
            }
            warn!("device execution context stopped");
        });
        Ok(())
    }

    /// Submit one command and block until the worker has executed it.
    pub async fn submit_and_await(
        &self,
        command: DeviceCommand,
    ) -> Result<CommandOutcome, BridgeError> {
        let sender = self.sender.get().ok_or(BridgeError::NotReady)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(BridgeRequest {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::WorkerGone)?;

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::WorkerGone),
            Err(_) => Err(BridgeError::Timeout),
        }
    }
}

async fn execute(
    controller: &dyn OutletController,
    command: &DeviceCommand,
    op_timeout: Duration,
) -> Result<CommandOutcome, BridgeError> {
    match command {
        DeviceCommand::TurnOutlet { device, outlet, on } => {
            match tokio::time::timeout(op_timeout, controller.turn_outlet(device, *outlet, *on))
                .await
            {
                Ok(Ok(())) => Ok(CommandOutcome::Applied),
                Ok(Err(e)) => Err(BridgeError::Device(e)),
                Err(_) => Err(BridgeError::Timeout),
            }
        }
        DeviceCommand::QueryState { device } => {
            match tokio::time::timeout(op_timeout, controller.query_state(device)).await {
                Ok(Ok(state)) => Ok(CommandOutcome::State(state)),
                Ok(Err(DeviceError::Unreachable(_))) => {
                    Ok(CommandOutcome::State(OutletState::Unreachable))
                }
                Ok(Err(e)) => Err(BridgeError::Device(e)),
                Err(_) => Err(BridgeError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct InstantController;

    #[async_trait]
    impl OutletController for InstantController {
        async fn turn_outlet(&self, _: &str, _: u8, _: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn query_state(&self, _: &str) -> Result<OutletState, DeviceError> {
            Ok(OutletState::Off)
        }
    }

    struct StuckController;

    #[async_trait]
    impl OutletController for StuckController {
        async fn turn_outlet(&self, _: &str, _: u8, _: bool) -> Result<(), DeviceError> {
            std::future::pending().await
        }
        async fn query_state(&self, _: &str) -> Result<OutletState, DeviceError> {
            std::future::pending().await
        }
    }

    fn turn_on(device: &str) -> DeviceCommand {
        DeviceCommand::TurnOutlet {
            device: device.to_string(),
            outlet: 0,
            on: true,
        }
    }

    #[tokio::test]
    async fn test_not_ready_before_start() {
        let bridge = ExecutionBridge::new(Duration::from_secs(1));
        let err = bridge.submit_and_await(turn_on("porch")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let bridge = ExecutionBridge::new(Duration::from_secs(1));
        bridge
            .start(Arc::new(InstantController), Duration::from_secs(1))
            .unwrap();
        let err = bridge
            .start(Arc::new(InstantController), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_submit_and_await_round_trip() {
        let bridge = ExecutionBridge::new(Duration::from_secs(1));
        bridge
            .start(Arc::new(InstantController), Duration::from_secs(1))
            .unwrap();
        let outcome = bridge.submit_and_await(turn_on("porch")).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);

        let outcome = bridge
            .submit_and_await(DeviceCommand::QueryState {
                device: "porch".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::State(OutletState::Off));
    }

    #[tokio::test]
    async fn test_stuck_operation_times_out() {
        let bridge = ExecutionBridge::new(Duration::from_secs(5));
        bridge
            .start(Arc::new(StuckController), Duration::from_millis(20))
            .unwrap();
        let err = bridge.submit_and_await(turn_on("porch")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout));
    }
}
