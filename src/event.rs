//! Command queue from the wake cycle to the radio task.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use frame_core::SessionCredentials;

/// Maximum number of commands that can be queued
const COMMAND_QUEUE_SIZE: usize = 4;

/// Requests the radio task acts on
#[derive(Clone)]
pub enum RadioCommand {
    /// Power up the chip and start associating with these credentials
    Start(SessionCredentials),
    /// Leave the network and drop to the lowest power mode
    Stop,
}

pub static COMMAND_CHANNEL: Channel<CriticalSectionRawMutex, RadioCommand, COMMAND_QUEUE_SIZE> =
    Channel::new();

/// Queue a command without waiting; fails only when the queue is full.
pub fn send_command(command: RadioCommand) -> Result<(), RadioCommand> {
    COMMAND_CHANNEL
        .try_send(command)
        .map_err(|TrySendError::Full(command)| command)
}

/// Receive the next command
pub async fn receive_command() -> RadioCommand {
    COMMAND_CHANNEL.receive().await
}
