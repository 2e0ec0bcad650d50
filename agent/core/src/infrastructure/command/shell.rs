// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Runs [`HostCommand`]s as child processes.
//!
//! Arguments are passed as separate argv entries, never through a shell, so
//! volume and export names cannot inject extra commands.

use crate::domain::command::{CommandError, CommandExecutor, HostCommand};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone)]
pub struct ShellCommandExecutor;

impl ShellCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute(&self, command: &HostCommand) -> Result<(), CommandError> {
        let start_time = Instant::now();
        debug!(command = %command, "Executing host command");

        let output = tokio::process::Command::new(command.program())
            .args(command.args())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let duration_ms = start_time.elapsed().as_millis() as u64;

        if output.status.success() {
            debug!(command = %command, duration_ms, "Host command succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(
            command = %command,
            status = %output.status,
            duration_ms,
            stderr = %stderr,
            "Host command failed"
        );
        Err(CommandError::NonZeroExit {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }
}
